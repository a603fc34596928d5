// ─────────────────────────────────────────────────────────────────────
// SCPN Ocean Sieve — Grid
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The immutable mesh shared read-only by every operator: coordinate
//! axes in radians, per-cell areas, the land/water mask, and
//! great-circle distances on the sphere.

use ndarray::{Array1, Array2, Array4};

use crate::constants::{DEG_TO_RAD, POLE_TOL_DEGREES, R_EARTH};
use crate::error::{SieveError, SieveResult};

/// 4-D analysis grid: outer (time, depth) axes carry no physics beyond
/// indexing; the horizontal (lat, lon) axes carry the spherical metric.
#[derive(Debug, Clone)]
pub struct Grid {
    pub time: Array1<f64>,
    pub depth: Array1<f64>,
    /// Latitude in radians, strictly increasing, within [-π/2, π/2].
    pub lat: Array1<f64>,
    /// Longitude in radians, strictly increasing.
    pub lon: Array1<f64>,
    /// Cell areas in m², `[nlat, nlon]`.
    pub areas: Array2<f64>,
    /// Water mask, `[ntime, ndepth, nlat, nlon]`; true = water.
    pub mask: Array4<bool>,
    pub periodic_x: bool,
    pub periodic_y: bool,
}

impl Grid {
    /// Build and validate a grid. Areas are derived from the axes with
    /// midpoint cell widths: `dA = R²·cos(lat)·Δlon·Δlat`.
    pub fn new(
        time: Array1<f64>,
        depth: Array1<f64>,
        lat: Array1<f64>,
        lon: Array1<f64>,
        mask: Array4<bool>,
        periodic_x: bool,
        periodic_y: bool,
    ) -> SieveResult<Self> {
        if lon.len() < 2 || lat.len() < 2 {
            return Err(SieveError::GridViolation(
                "need at least two points on each horizontal axis".to_string(),
            ));
        }
        for j in 1..lon.len() {
            if lon[j] <= lon[j - 1] {
                return Err(SieveError::GridViolation(format!(
                    "longitude must be strictly increasing (violated at index {j})"
                )));
            }
        }
        for i in 1..lat.len() {
            if lat[i] <= lat[i - 1] {
                return Err(SieveError::GridViolation(format!(
                    "latitude must be strictly increasing (violated at index {i})"
                )));
            }
        }
        let half_pi = std::f64::consts::FRAC_PI_2 + 1e-12;
        if lat.iter().any(|&l| l.abs() > half_pi) {
            return Err(SieveError::GridViolation(
                "latitude must lie within [-π/2, π/2] radians; \
                 degree inputs must be converted first"
                    .to_string(),
            ));
        }
        if periodic_y && !axis_is_uniform(&lat) {
            return Err(SieveError::GridViolation(
                "periodic latitude requires a uniform latitude grid".to_string(),
            ));
        }
        let expected = (
            time.len().max(1),
            depth.len().max(1),
            lat.len(),
            lon.len(),
        );
        if mask.dim() != expected {
            return Err(SieveError::ShapeMismatch(format!(
                "mask has shape {:?}, expected {:?}",
                mask.dim(),
                expected
            )));
        }

        let areas = compute_cell_areas(&lat, &lon, periodic_x);

        Ok(Grid {
            time,
            depth,
            lat,
            lon,
            areas,
            mask,
            periodic_x,
            periodic_y,
        })
    }

    pub fn ntime(&self) -> usize {
        self.time.len().max(1)
    }

    pub fn ndepth(&self) -> usize {
        self.depth.len().max(1)
    }

    pub fn nlat(&self) -> usize {
        self.lat.len()
    }

    pub fn nlon(&self) -> usize {
        self.lon.len()
    }

    #[inline]
    pub fn water(&self, itime: usize, idepth: usize, ilat: usize, ilon: usize) -> bool {
        self.mask[[itime, idepth, ilat, ilon]]
    }

    #[inline]
    pub fn area(&self, ilat: usize, ilon: usize) -> f64 {
        self.areas[[ilat, ilon]]
    }

    /// Whether a latitude row sits within 0.01° of a pole.
    #[inline]
    pub fn is_pole_row(&self, ilat: usize) -> bool {
        (self.lat[ilat].abs() / DEG_TO_RAD - 90.0).abs() < POLE_TOL_DEGREES
    }

    /// Great-circle distance between two points (haversine form).
    pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let h = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        R_EARTH * 2.0 * h.min(1.0).sqrt().asin()
    }

    /// Flag every pole row as land across all times and depths.
    pub fn mask_out_pole(&mut self) {
        let (nt, nz, nlat, nlon) = self.mask.dim();
        for ilat in 0..nlat {
            if !self.is_pole_row(ilat) {
                continue;
            }
            for it in 0..nt {
                for iz in 0..nz {
                    for ilon in 0..nlon {
                        self.mask[[it, iz, ilat, ilon]] = false;
                    }
                }
            }
        }
    }

    /// Uniform spacing of the latitude axis, if it has one.
    pub fn uniform_lat_spacing(&self) -> Option<f64> {
        if axis_is_uniform(&self.lat) {
            Some(self.lat[1] - self.lat[0])
        } else {
            None
        }
    }
}

/// Convert degree-valued coordinate axes to radians in place.
pub fn convert_coordinates(lon: &mut Array1<f64>, lat: &mut Array1<f64>) {
    lon.mapv_inplace(|v| v * DEG_TO_RAD);
    lat.mapv_inplace(|v| v * DEG_TO_RAD);
}

fn axis_is_uniform(axis: &Array1<f64>) -> bool {
    if axis.len() < 3 {
        return true;
    }
    let d0 = axis[1] - axis[0];
    (2..axis.len()).all(|i| ((axis[i] - axis[i - 1]) - d0).abs() <= 1e-10 * d0.abs().max(1e-300))
}

/// Midpoint cell widths along an axis. Endpoints fall back to the
/// one-sided width, or wrap when the axis is a full periodic circle.
fn cell_widths(axis: &Array1<f64>, periodic: bool, period: f64) -> Array1<f64> {
    let n = axis.len();
    let mut widths = Array1::zeros(n);
    for i in 0..n {
        let upper = if i + 1 < n {
            (axis[i] + axis[i + 1]) / 2.0
        } else if periodic {
            (axis[i] + axis[0] + period) / 2.0
        } else {
            axis[i] + (axis[i] - axis[i - 1]) / 2.0
        };
        let lower = if i > 0 {
            (axis[i - 1] + axis[i]) / 2.0
        } else if periodic {
            (axis[n - 1] - period + axis[i]) / 2.0
        } else {
            axis[i] - (axis[i + 1] - axis[i]) / 2.0
        };
        widths[i] = upper - lower;
    }
    widths
}

fn compute_cell_areas(lat: &Array1<f64>, lon: &Array1<f64>, periodic_x: bool) -> Array2<f64> {
    let dlat = cell_widths(lat, false, 0.0);
    let dlon = cell_widths(lon, periodic_x, std::f64::consts::TAU);
    let mut areas = Array2::zeros((lat.len(), lon.len()));
    for i in 0..lat.len() {
        let band = R_EARTH * R_EARTH * lat[i].cos().max(0.0) * dlat[i];
        for j in 0..lon.len() {
            areas[[i, j]] = band * dlon[j];
        }
    }
    areas
}
