//! Conversion between WGS 84 lon/lat (EPSG:4326) and S-JTSK / Krovák East
//! North (EPSG:5514) metres.
//!
//! The datum shift is the "S-JTSK to WGS 84 (4)" Helmert transformation between
//! the Bessel 1841 and WGS 84 ellipsoids. The projector holds only constants,
//! so a single instance can be shared across threads and batches are projected
//! with rayon.

use crate::engine::types::{GeoPoint, PlanarPoint};
use crate::error::ProjectionError;
use rayon::prelude::*;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// A pair of coordinate reference systems: geographic and planar metric.
pub trait Projection: Send + Sync {
    fn to_planar(&self, lon: f64, lat: f64) -> Result<PlanarPoint, ProjectionError>;
    fn to_geographic(&self, point: PlanarPoint) -> Result<GeoPoint, ProjectionError>;
}

/// Projects a batch of lon/lat points in parallel. Results keep input order.
pub fn project_batch<P: Projection + ?Sized>(
    projection: &P,
    points: &[GeoPoint],
) -> Vec<Result<PlanarPoint, ProjectionError>> {
    points
        .par_iter()
        .map(|p| projection.to_planar(p.lon, p.lat))
        .collect()
}

/// Inverse of [`project_batch`].
pub fn unproject_batch<P: Projection + ?Sized>(
    projection: &P,
    points: &[PlanarPoint],
) -> Vec<Result<GeoPoint, ProjectionError>> {
    points
        .par_iter()
        .map(|p| projection.to_geographic(*p))
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Ellipsoid {
    a: f64,
    rf: f64,
    e2: f64,
    e: f64,
}

impl Ellipsoid {
    const fn flattening(&self) -> f64 {
        1.0 / self.rf
    }

    fn new(a: f64, rf: f64) -> Self {
        let f = 1.0 / rf;
        let e2 = 2.0 * f - f * f;
        Self {
            a,
            rf,
            e2,
            e: e2.sqrt(),
        }
    }
}

fn wgs84() -> Ellipsoid {
    Ellipsoid::new(6_378_137.0, 298.257_223_563)
}

fn bessel_1841() -> Ellipsoid {
    Ellipsoid::new(6_377_397.155, 299.152_812_8)
}

/// Krovák oblique conformal conic projection in East/North axis order.
#[derive(Debug, Clone)]
pub struct Krovak {
    wgs84: Ellipsoid,
    bessel: Ellipsoid,
    e: f64,
    lon0: f64,
    alfa: f64,
    hae: f64,
    k: f64,
    ro0: f64,
    ad: f64,
    s0: f64,
    n: f64,
}

impl Default for Krovak {
    fn default() -> Self {
        Self::new()
    }
}

impl Krovak {
    const LAT0_DEG: f64 = 49.5;
    const LON0_DEG: f64 = 24.833_333_333_333_3;
    const PSEUDO_STANDARD_PARALLEL_DEG: f64 = 78.5;
    const SCALE: f64 = 0.9999;
    const UQ: f64 = 1.042_168_563_804_74;

    pub fn new() -> Self {
        let bessel = bessel_1841();
        let es = bessel.e2;
        let e = bessel.e;
        let lat0 = Self::LAT0_DEG.to_radians();
        let s0 = Self::PSEUDO_STANDARD_PARALLEL_DEG.to_radians();
        let sin_lat0 = lat0.sin();
        let cos_lat0 = lat0.cos();

        let alfa = (1.0 + (es * cos_lat0.powi(4)) / (1.0 - es)).sqrt();
        let u0 = asinz(sin_lat0 / alfa);
        let g = ((1.0 + e * sin_lat0) / (1.0 - e * sin_lat0)).powf(alfa * e / 2.0);
        let k = (u0 / 2.0 + FRAC_PI_4).tan() / (lat0 / 2.0 + FRAC_PI_4).tan().powf(alfa) * g;
        let n0 = bessel.a * (1.0 - es).sqrt() / (1.0 - es * sin_lat0 * sin_lat0);

        Self {
            wgs84: wgs84(),
            bessel,
            e,
            lon0: Self::LON0_DEG.to_radians(),
            alfa,
            hae: alfa * e / 2.0,
            k,
            ro0: Self::SCALE * n0 / s0.tan(),
            ad: FRAC_PI_2 - Self::UQ,
            s0,
            n: s0.sin(),
        }
    }

    /// Bessel lon/lat (radians) to native Krovák (southing, westing), negated
    /// into the EPSG:5514 quadrant.
    fn forward_core(&self, lon: f64, lat: f64) -> (f64, f64) {
        let dlon = adjust_lon(lon - self.lon0);
        let sin_lat = lat.sin();
        let gfi = ((1.0 + self.e * sin_lat) / (1.0 - self.e * sin_lat)).powf(self.hae);
        let u = 2.0 * ((self.k * (lat / 2.0 + FRAC_PI_4).tan().powf(self.alfa) / gfi).atan() - FRAC_PI_4);
        let deltav = -dlon * self.alfa;
        let s = asinz(self.ad.cos() * u.sin() + self.ad.sin() * u.cos() * deltav.cos());
        let d = asinz(u.cos() * deltav.sin() / s.cos());
        let eps = self.n * d;
        let ro = self.ro0 * (self.s0 / 2.0 + FRAC_PI_4).tan().powf(self.n)
            / (s / 2.0 + FRAC_PI_4).tan().powf(self.n);

        (-(ro * eps.cos()), -(ro * eps.sin()))
    }

    fn inverse_core(&self, x: f64, y: f64) -> (f64, f64) {
        const MAX_ITER: usize = 15;
        const TOLERANCE: f64 = 1e-10;

        let xt = -x;
        let yt = -y;
        let ro = xt.hypot(yt);
        let epsilon = yt.atan2(xt);
        let d = epsilon / self.n;
        let s = 2.0 * ((self.ro0 / ro).powf(1.0 / self.n) * (self.s0 / 2.0 + FRAC_PI_4).tan()).atan()
            - 2.0 * FRAC_PI_4;
        let u = asinz(self.ad.cos() * s.sin() - self.ad.sin() * s.cos() * d.cos());
        let deltav = asinz(s.cos() * d.sin() / u.cos());
        let lon = self.lon0 - deltav / self.alfa;

        let mut lat = u;
        for _ in 0..MAX_ITER {
            let prev = lat;
            let sin_prev = prev.sin();
            let gfi = ((1.0 + self.e * sin_prev) / (1.0 - self.e * sin_prev)).powf(self.e / 2.0);
            lat = 2.0
                * (((1.0 / self.k) * (u / 2.0 + FRAC_PI_4).tan()).powf(1.0 / self.alfa) * gfi).atan()
                - 2.0 * FRAC_PI_4;
            if (lat - prev).abs() < TOLERANCE {
                break;
            }
        }
        (adjust_lon(lon), lat)
    }

    fn forward_degrees(&self, lon_deg: f64, lat_deg: f64) -> Result<(f64, f64), ProjectionError> {
        if !lon_deg.is_finite() || !lat_deg.is_finite() {
            return Err(ProjectionError::NonFinite(lon_deg, lat_deg));
        }
        let (x, y, z) = geodetic_to_ecef(lon_deg.to_radians(), lat_deg.to_radians(), &self.wgs84);
        let (x, y, z) = helmert_sjtsk_wgs84(x, y, z, true);
        let (lon_b, lat_b) = ecef_to_geodetic(x, y, z, &self.bessel);
        let (south, west) = self.forward_core(lon_b, lat_b);
        if !south.is_finite() || !west.is_finite() {
            return Err(ProjectionError::Degenerate(lon_deg, lat_deg));
        }
        // EPSG:5514 is East/North: swap the native axis order.
        Ok((west, south))
    }

    fn inverse_approx(&self, x: f64, y: f64) -> (f64, f64) {
        let (lon_b, lat_b) = self.inverse_core(y, x);
        let (gx, gy, gz) = geodetic_to_ecef(lon_b, lat_b, &self.bessel);
        let (gx, gy, gz) = helmert_sjtsk_wgs84(gx, gy, gz, false);
        let (lon, lat) = ecef_to_geodetic(gx, gy, gz, &self.wgs84);
        (lon.to_degrees(), lat.to_degrees())
    }
}

impl Projection for Krovak {
    fn to_planar(&self, lon: f64, lat: f64) -> Result<PlanarPoint, ProjectionError> {
        let (x, y) = self.forward_degrees(lon, lat)?;
        Ok(PlanarPoint::new(x, y))
    }

    /// Closed-form inverse followed by Newton refinement against the forward
    /// map, so round trips agree to well below a centimetre.
    fn to_geographic(&self, point: PlanarPoint) -> Result<GeoPoint, ProjectionError> {
        const STEP_DEG: f64 = 1e-6;
        const MAX_STEPS: usize = 8;

        let PlanarPoint { x, y } = point;
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::NonFinite(x, y));
        }
        let (mut lon, mut lat) = self.inverse_approx(x, y);
        if !lon.is_finite() || !lat.is_finite() {
            return Err(ProjectionError::Degenerate(x, y));
        }

        for _ in 0..MAX_STEPS {
            let (fx, fy) = self.forward_degrees(lon, lat)?;
            let rx = x - fx;
            let ry = y - fy;
            if rx.hypot(ry) < 1e-6 {
                break;
            }

            let (fx_lon, fy_lon) = self.forward_degrees(lon + STEP_DEG, lat)?;
            let (fx_lat, fy_lat) = self.forward_degrees(lon, lat + STEP_DEG)?;
            let j11 = (fx_lon - fx) / STEP_DEG;
            let j21 = (fy_lon - fy) / STEP_DEG;
            let j12 = (fx_lat - fx) / STEP_DEG;
            let j22 = (fy_lat - fy) / STEP_DEG;

            let det = j11 * j22 - j12 * j21;
            if det.abs() < 1e-12 {
                break;
            }
            let d_lon = (rx * j22 - ry * j12) / det;
            let d_lat = (ry * j11 - rx * j21) / det;
            lon += d_lon;
            lat += d_lat;
            if d_lon.abs() + d_lat.abs() < 1e-12 {
                break;
            }
        }

        Ok(GeoPoint { lon, lat })
    }
}

/// "S-JTSK to WGS 84 (4)", position-vector convention. `inverse` maps WGS 84
/// geocentric coordinates onto the Bessel datum.
fn helmert_sjtsk_wgs84(x: f64, y: f64, z: f64, inverse: bool) -> (f64, f64, f64) {
    const TX: f64 = 485.0;
    const TY: f64 = 169.5;
    const TZ: f64 = 483.8;
    const RX_SEC: f64 = 7.786;
    const RY_SEC: f64 = 4.398;
    const RZ_SEC: f64 = 4.103;

    let sec = PI / (180.0 * 3600.0);
    let (rx, ry, rz) = (RX_SEC * sec, RY_SEC * sec, RZ_SEC * sec);
    let m = [[1.0, -rz, ry], [rz, 1.0, -rx], [-ry, rx, 1.0]];

    if !inverse {
        return (
            TX + m[0][0] * x + m[0][1] * y + m[0][2] * z,
            TY + m[1][0] * x + m[1][1] * y + m[1][2] * z,
            TZ + m[2][0] * x + m[2][1] * y + m[2][2] * z,
        );
    }

    let (bx, by, bz) = (x - TX, y - TY, z - TZ);
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det == 0.0 {
        return (x, y, z);
    }
    let inv = [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det,
        ],
    ];
    (
        inv[0][0] * bx + inv[0][1] * by + inv[0][2] * bz,
        inv[1][0] * bx + inv[1][1] * by + inv[1][2] * bz,
        inv[2][0] * bx + inv[2][1] * by + inv[2][2] * bz,
    )
}

fn geodetic_to_ecef(lon: f64, lat: f64, ell: &Ellipsoid) -> (f64, f64, f64) {
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let n = ell.a / (1.0 - ell.e2 * sin_lat * sin_lat).sqrt();
    (
        n * cos_lat * cos_lon,
        n * cos_lat * sin_lon,
        n * (1.0 - ell.e2) * sin_lat,
    )
}

/// Bowring's closed form plus a few fixed-point refinements. Height is
/// discarded; every point in this pipeline sits on the ellipsoid.
fn ecef_to_geodetic(x: f64, y: f64, z: f64, ell: &Ellipsoid) -> (f64, f64) {
    let p = x.hypot(y);
    if p == 0.0 {
        let lat = if z > 0.0 {
            FRAC_PI_2
        } else if z < 0.0 {
            -FRAC_PI_2
        } else {
            0.0
        };
        return (0.0, lat);
    }

    let lon = y.atan2(x);
    let b = ell.a * (1.0 - ell.flattening());
    let ep2 = (ell.a * ell.a - b * b) / (b * b);
    let theta = (z * ell.a).atan2(p * b);
    let (sin_t, cos_t) = theta.sin_cos();
    let mut lat = (z + ep2 * b * sin_t.powi(3)).atan2(p - ell.e2 * ell.a * cos_t.powi(3));

    for _ in 0..3 {
        let sin_lat = lat.sin();
        let n = ell.a / (1.0 - ell.e2 * sin_lat * sin_lat).sqrt();
        let h = p / lat.cos() - n;
        let next = z.atan2(p * (1.0 - ell.e2 * (n / (n + h))));
        let converged = (next - lat).abs() < 1e-14;
        lat = next;
        if converged {
            break;
        }
    }
    (lon, lat)
}

fn adjust_lon(mut lon: f64) -> f64 {
    while lon > PI {
        lon -= 2.0 * PI;
    }
    while lon < -PI {
        lon += 2.0 * PI;
    }
    lon
}

fn asinz(v: f64) -> f64 {
    v.clamp(-1.0, 1.0).asin()
}

/// Identity projection for stage tests: planar metres double as lon/lat.
#[cfg(test)]
pub(crate) struct Flat;

#[cfg(test)]
impl Projection for Flat {
    fn to_planar(&self, lon: f64, lat: f64) -> Result<PlanarPoint, ProjectionError> {
        Ok(PlanarPoint::new(lon, lat))
    }
    fn to_geographic(&self, p: PlanarPoint) -> Result<GeoPoint, ProjectionError> {
        Ok(GeoPoint { lon: p.x, lat: p.y })
    }
}
