//! Pure-Rust map projections (Snyder 1987, USGS Prof. Paper 1395).
//!
//! Covers the systems a Sentinel-2 workflow over Australia and the US needs:
//! geographic lon/lat, UTM and MGA (transverse Mercator), Albers equal-area
//! conic (GDA94/GDA2020 Australian Albers, CONUS Albers) and Web Mercator.
//! GDA94, GDA2020 and WGS84 are treated as coincident; the datum shift
//! between them is well below a 100 m pixel.

use crate::error::{Error, Result};

// ── Ellipsoids ───────────────────────────────────────────────────────────

/// Reference ellipsoid given by semi-major axis and inverse flattening.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub a: f64,
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_223_563,
    };

    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_222_101,
    };

    /// First eccentricity squared
    pub fn e2(&self) -> f64 {
        let f = 1.0 / self.inv_f;
        2.0 * f - f * f
    }

    /// Second eccentricity squared
    pub fn ep2(&self) -> f64 {
        let e2 = self.e2();
        e2 / (1.0 - e2)
    }
}

const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// A map projection between geographic degrees and planar map units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Longitude/latitude in degrees, passed through unchanged.
    Geographic,
    TransverseMercator {
        ellipsoid: Ellipsoid,
        /// Central meridian, degrees
        lon0: f64,
        k0: f64,
        false_easting: f64,
        false_northing: f64,
    },
    AlbersEqualArea {
        ellipsoid: Ellipsoid,
        /// Standard parallels, degrees
        lat1: f64,
        lat2: f64,
        /// Latitude of origin, degrees
        lat0: f64,
        /// Central meridian, degrees
        lon0: f64,
        false_easting: f64,
        false_northing: f64,
    },
    /// Spherical Mercator on the WGS84 semi-major axis (EPSG:3857).
    WebMercator,
}

impl Projection {
    /// Resolve a projection from an EPSG code.
    pub fn from_epsg(code: u32) -> Result<Self> {
        let projection = match code {
            // WGS84, GDA94, ETRS89, GDA2020, NAD83
            4326 | 4283 | 4258 | 7844 | 4269 => Projection::Geographic,
            32601..=32660 => Self::utm(Ellipsoid::WGS84, code - 32600, true),
            32701..=32760 => Self::utm(Ellipsoid::WGS84, code - 32700, false),
            // GDA94 / MGA zones 48-58
            28348..=28358 => Self::utm(Ellipsoid::GRS80, code - 28300, false),
            // GDA2020 / MGA zones 46-59
            7846..=7859 => Self::utm(Ellipsoid::GRS80, code - 7800, false),
            // GDA94 and GDA2020 Australian Albers
            3577 | 9473 => Projection::AlbersEqualArea {
                ellipsoid: Ellipsoid::GRS80,
                lat1: -18.0,
                lat2: -36.0,
                lat0: 0.0,
                lon0: 132.0,
                false_easting: 0.0,
                false_northing: 0.0,
            },
            // NAD83 / Conus Albers
            5070 => Projection::AlbersEqualArea {
                ellipsoid: Ellipsoid::GRS80,
                lat1: 29.5,
                lat2: 45.5,
                lat0: 23.0,
                lon0: -96.0,
                false_easting: 0.0,
                false_northing: 0.0,
            },
            3857 | 900913 => Projection::WebMercator,
            other => return Err(Error::UnsupportedCrs(other)),
        };
        Ok(projection)
    }

    /// Transverse Mercator with UTM zone parameters.
    pub fn utm(ellipsoid: Ellipsoid, zone: u32, north: bool) -> Self {
        Projection::TransverseMercator {
            ellipsoid,
            lon0: (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0,
            k0: UTM_K0,
            false_easting: UTM_FALSE_EASTING,
            false_northing: if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH },
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Projection::Geographic)
    }

    /// Project geographic (lon, lat) degrees to map coordinates.
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
            return Err(Error::Geometry(format!(
                "invalid geographic coordinate ({}, {})",
                lon, lat
            )));
        }
        let xy = match *self {
            Projection::Geographic => (lon, lat),
            Projection::TransverseMercator {
                ellipsoid,
                lon0,
                k0,
                false_easting,
                false_northing,
            } => {
                let (x, y) = tm_forward(ellipsoid, lon0, k0, lon, lat);
                (x + false_easting, y + false_northing)
            }
            Projection::AlbersEqualArea {
                ellipsoid,
                lat1,
                lat2,
                lat0,
                lon0,
                false_easting,
                false_northing,
            } => {
                let albers = AlbersConstants::new(ellipsoid, lat1, lat2, lat0, lon0);
                let (x, y) = albers.forward(lon, lat);
                (x + false_easting, y + false_northing)
            }
            Projection::WebMercator => {
                let a = Ellipsoid::WGS84.a;
                let lat = lat.clamp(-WEB_MERCATOR_MAX_LAT, WEB_MERCATOR_MAX_LAT);
                let y = (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
                (a * lon.to_radians(), a * y)
            }
        };
        Ok(xy)
    }

    /// Unproject map coordinates to geographic (lon, lat) degrees.
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(Error::Geometry(format!(
                "invalid map coordinate ({}, {})",
                x, y
            )));
        }
        let lonlat = match *self {
            Projection::Geographic => (x, y),
            Projection::TransverseMercator {
                ellipsoid,
                lon0,
                k0,
                false_easting,
                false_northing,
            } => tm_inverse(ellipsoid, lon0, k0, x - false_easting, y - false_northing),
            Projection::AlbersEqualArea {
                ellipsoid,
                lat1,
                lat2,
                lat0,
                lon0,
                false_easting,
                false_northing,
            } => {
                let albers = AlbersConstants::new(ellipsoid, lat1, lat2, lat0, lon0);
                albers.inverse(x - false_easting, y - false_northing)
            }
            Projection::WebMercator => {
                let a = Ellipsoid::WGS84.a;
                let lat = (2.0 * (y / a).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
                ((x / a).to_degrees(), lat)
            }
        };
        Ok(lonlat)
    }
}

// ── Transverse Mercator (Snyder pp. 60-64) ───────────────────────────────

/// Meridional arc from the equator to `lat` (radians). Snyder eq. 3-21.
fn meridional_arc(ellipsoid: Ellipsoid, lat: f64) -> f64 {
    let e2 = ellipsoid.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    ellipsoid.a
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

fn tm_forward(ellipsoid: Ellipsoid, lon0_deg: f64, k0: f64, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
    let e2 = ellipsoid.e2();
    let ep2 = ellipsoid.ep2();
    let lat = lat_deg.to_radians();
    let dlon = (lon_deg - lon0_deg).to_radians();

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = ellipsoid.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = ep2 * cos_lat * cos_lat;
    let a1 = cos_lat * dlon;
    let a2 = a1 * a1;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    // Snyder eq. 8-9
    let x = k0
        * n
        * (a1
            + (1.0 - t + c) * a2 * a1 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a4 * a1 / 120.0);

    // Snyder eq. 8-10, latitude of origin on the equator
    let y = k0
        * (meridional_arc(ellipsoid, lat)
            + n * tan_lat
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));

    (x, y)
}

fn tm_inverse(ellipsoid: Ellipsoid, lon0_deg: f64, k0: f64, x: f64, y: f64) -> (f64, f64) {
    let a = ellipsoid.a;
    let e2 = ellipsoid.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = ellipsoid.ep2();

    // Footpoint latitude, Snyder eqs. 8-18 to 8-20
    let m = y / k0;
    let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let sqrt_1_e2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let cos1 = phi1.cos();
    let tan1 = phi1.tan();
    let denom = 1.0 - e2 * sin1 * sin1;

    let c1 = ep2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let n1 = a / denom.sqrt();
    let r1 = a * (1.0 - e2) / denom.powf(1.5);
    let d = x / (n1 * k0);
    let d2 = d * d;
    let d4 = d2 * d2;
    let d6 = d4 * d2;

    // Snyder eqs. 8-17, 8-18
    let lat = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let dlon = (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d4 * d
            / 120.0)
        / cos1;

    (lon0_deg + dlon.to_degrees(), lat.to_degrees())
}

// ── Albers equal-area conic (Snyder pp. 98-103) ──────────────────────────

struct AlbersConstants {
    a: f64,
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
    lon0: f64,
}

impl AlbersConstants {
    fn new(ellipsoid: Ellipsoid, lat1: f64, lat2: f64, lat0: f64, lon0: f64) -> Self {
        let e2 = ellipsoid.e2();
        let e = e2.sqrt();
        let m = |phi: f64| {
            let s = phi.sin();
            phi.cos() / (1.0 - e2 * s * s).sqrt()
        };

        let (p1, p2, p0) = (lat1.to_radians(), lat2.to_radians(), lat0.to_radians());
        let (m1, m2) = (m(p1), m(p2));
        let (q1, q2, q0) = (albers_q(e, e2, p1), albers_q(e, e2, p2), albers_q(e, e2, p0));

        // Snyder eqs. 14-14, 14-13; a single standard parallel degenerates to sin(lat1)
        let n = if (lat1 - lat2).abs() < 1e-10 {
            p1.sin()
        } else {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        };
        let c = m1 * m1 + n * q1;
        let rho0 = ellipsoid.a * (c - n * q0).sqrt() / n;

        Self {
            a: ellipsoid.a,
            e,
            e2,
            n,
            c,
            rho0,
            lon0: lon0.to_radians(),
        }
    }

    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let q = albers_q(self.e, self.e2, lat.to_radians());
        let rho = self.a * (self.c - self.n * q).max(0.0).sqrt() / self.n;
        let theta = self.n * wrap_pi(lon.to_radians() - self.lon0);
        (rho * theta.sin(), self.rho0 - rho * theta.cos())
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        // For n < 0 the signs of x, y and rho0 are reversed (Snyder p. 101)
        let sign = self.n.signum();
        let dy = self.rho0 - y;
        let rho = x.hypot(dy) * sign;
        let theta = (x * sign).atan2(dy * sign);
        let q = (self.c - (rho * self.n / self.a).powi(2)) / self.n;

        let lon = (self.lon0 + theta / self.n).to_degrees();
        (lon, self.phi_from_q(q).to_degrees())
    }

    /// Iterate Snyder eq. 3-16 for latitude given authalic q.
    fn phi_from_q(&self, q: f64) -> f64 {
        let qp = albers_q(self.e, self.e2, std::f64::consts::FRAC_PI_2);
        if (q.abs() - qp.abs()).abs() < 1e-12 {
            return std::f64::consts::FRAC_PI_2.copysign(q);
        }

        let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
        for _ in 0..15 {
            let s = phi.sin();
            let one_es2 = 1.0 - self.e2 * s * s;
            let delta = one_es2 * one_es2 / (2.0 * phi.cos())
                * (q / (1.0 - self.e2) - s / one_es2
                    + (1.0 / (2.0 * self.e)) * ((1.0 - self.e * s) / (1.0 + self.e * s)).ln());
            phi += delta;
            if delta.abs() < 1e-12 {
                break;
            }
        }
        phi
    }
}

/// Authalic q function, Snyder eq. 3-12.
fn albers_q(e: f64, e2: f64, phi: f64) -> f64 {
    let s = phi.sin();
    (1.0 - e2) * (s / (1.0 - e2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

fn wrap_pi(angle: f64) -> f64 {
    use std::f64::consts::PI;
    let mut a = angle;
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    a
}
