//! CLI entry point for the coverage zoner.
//!
//! Provides subcommands for processing a drive-test export into zone and
//! operator coverage tables, and for inspecting the columns of an export.

use anyhow::Result;
use clap::{Parser, Subcommand};
use coverage_zoner::{
    config::{ExtraOperator, ProcessingConfig, ZoneMode},
    engine::{cancel::CancelToken, projection::Krovak},
    mapping::{ColumnRef, suggest_roles},
    output::{append_record, print_json},
    parser::load_rows,
    pipeline::process_file,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "coverage_zoner")]
#[command(about = "Aggregates drive-test measurements into coverage zones", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Zone a measurement export and write the zones and stats tables
    Process {
        /// Semicolon-delimited measurement export
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// JSON config file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Partitioning mode: grid-center, grid-first or segments
        #[arg(short, long)]
        mode: Option<ZoneMode>,

        /// Zone edge or segment length in metres
        #[arg(long)]
        cell_size: Option<f64>,

        /// Minimum mean RSRP (dBm) for good coverage
        #[arg(long, allow_hyphen_values = true)]
        rsrp_threshold: Option<f64>,

        /// Minimum mean SINR (dB) for good coverage
        #[arg(long, allow_hyphen_values = true)]
        sinr_threshold: Option<f64>,

        /// Generate rows for partitions an operator has no measurements in
        #[arg(short, long, default_value_t = false)]
        empty_partitions: bool,

        /// Extra operator to backfill, as MCC:MNC or MCC:MNC:PCI
        #[arg(long = "extra-operator", value_name = "MCC:MNC[:PCI]")]
        extra_operators: Vec<ExtraOperator>,

        /// Distance slack when assigning points to segments
        #[arg(long)]
        tolerance: Option<f64>,

        /// Suffix inserted before _zones.csv / _stats.csv
        #[arg(long)]
        output_suffix: Option<String>,

        /// CSV file to append the run summary to
        #[arg(long)]
        summary_csv: Option<PathBuf>,

        /// Column mapping override, as role=column (index or header name)
        #[arg(long = "map", value_name = "ROLE=COLUMN", value_parser = parse_mapping)]
        mappings: Vec<(String, ColumnRef)>,
    },
    /// Show the detected header and suggested column roles of an export
    Columns {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/coverage_zoner.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("coverage_zoner.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            config,
            mode,
            cell_size,
            rsrp_threshold,
            sinr_threshold,
            empty_partitions,
            extra_operators,
            tolerance,
            output_suffix,
            summary_csv,
            mappings,
        } => {
            let mut settings = match &config {
                Some(path) => ProcessingConfig::load(path)?,
                None => ProcessingConfig::default(),
            };
            if let Some(mode) = mode {
                settings.mode = mode;
            }
            if let Some(cell) = cell_size {
                settings.cell_size_m = cell;
            }
            if let Some(t) = rsrp_threshold {
                settings.rsrp_threshold = t;
            }
            if let Some(t) = sinr_threshold {
                settings.sinr_threshold = t;
            }
            if empty_partitions {
                settings.generate_empty_partitions = true;
            }
            settings.extra_operators.extend(extra_operators);
            if let Some(t) = tolerance {
                settings.boundary_tolerance = t;
            }
            if output_suffix.is_some() {
                settings.output_suffix = output_suffix;
            }
            settings.column_mapping.extend(mappings);

            let summary = process_file(&input, &settings, &Krovak::new(), &CancelToken::new())?;
            print_json(&summary)?;

            if let Some(path) = summary_csv {
                append_record(&path, &summary)?;
            }
        }
        Commands::Columns { input } => {
            let source = load_rows(&input)?;
            info!(
                header_line = source.header_line,
                columns = source.columns.len(),
                records = source.records.len(),
                "Header detected"
            );
            for (index, name) in source.columns.iter().enumerate() {
                info!(index, name = %name, "Column");
            }
            for (role, index) in suggest_roles(&source.columns) {
                info!(role = %role, index, column = %source.columns[index], "Suggested role");
            }
        }
    }

    Ok(())
}

fn parse_mapping(s: &str) -> Result<(String, ColumnRef), String> {
    let (role, column) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ROLE=COLUMN, got '{}'", s))?;
    let column: ColumnRef = column.parse().map_err(|e| format!("{:?}", e))?;
    Ok((role.trim().to_ascii_lowercase(), column))
}
