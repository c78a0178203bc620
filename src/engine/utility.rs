use std::cmp::Ordering;

/// Computes the arithmetic mean of a slice of values. Returns `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Parses a measurement cell, accepting a comma as the decimal separator.
///
/// Blank cells and anything that does not parse to a finite number yield `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let v: f64 = s.replace(',', ".").parse().ok()?;
    v.is_finite().then_some(v)
}

/// Orders identifier strings numerically where possible.
///
/// Numeric values come first in ascending order, non-numeric values after
/// them. Ties (equal numbers such as `"5"` and `"5.0"`, or two non-numeric
/// values) fall back to plain text comparison so the order stays total.
pub fn compare_numeric_text(a: &str, b: &str) -> Ordering {
    let by_number = match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_number.then_with(|| a.cmp(b))
}

/// Same as [`compare_numeric_text`] for optional identifiers; a missing value
/// sorts like an empty (non-numeric) string.
pub fn compare_optional_numeric_text(a: Option<&str>, b: Option<&str>) -> Ordering {
    compare_numeric_text(a.unwrap_or(""), b.unwrap_or(""))
}

/// Renders integral numbers without a fractional part (`"231.0"` -> `"231"`,
/// `"01"` -> `"1"`). Non-numeric input is returned trimmed but otherwise as is.
pub fn format_int_like(raw: &str) -> String {
    match parse_number(raw) {
        Some(v) => number_label(v),
        None => raw.trim().to_string(),
    }
}

/// Formats a number the way thresholds appear in report headers: integers
/// without decimals, everything else in shortest round-trip form.
pub fn number_label(v: f64) -> String {
    if v.trunc() == v && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_empty() {
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_mean_values() {
        assert_eq!(mean(&[-100.0, -110.0]), Some(-105.0));
    }

    #[test]
    fn test_parse_number_comma_decimal() {
        assert_eq!(parse_number("48,1234"), Some(48.1234));
        assert_eq!(parse_number(" -95.5 "), Some(-95.5));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn test_compare_numeric_before_text() {
        assert_eq!(compare_numeric_text("100", "2000"), Ordering::Less);
        assert_eq!(compare_numeric_text("9", "10"), Ordering::Less);
        assert_eq!(compare_numeric_text("abc", "10"), Ordering::Greater);
        assert_eq!(compare_numeric_text("abc", "abd"), Ordering::Less);
        assert_eq!(compare_numeric_text("5", "5.0"), Ordering::Less);
        assert_eq!(compare_numeric_text("7", "7"), Ordering::Equal);
    }

    #[test]
    fn test_compare_optional_missing_sorts_last() {
        assert_eq!(
            compare_optional_numeric_text(None, Some("12")),
            Ordering::Greater
        );
    }

    #[test]
    fn test_format_int_like() {
        assert_eq!(format_int_like("231.0"), "231");
        assert_eq!(format_int_like("01"), "1");
        assert_eq!(format_int_like("12,5"), "12.5");
        assert_eq!(format_int_like(" xyz "), "xyz");
    }

    #[test]
    fn test_number_label() {
        assert_eq!(number_label(-110.0), "-110");
        assert_eq!(number_label(-5.5), "-5.5");
    }
}
