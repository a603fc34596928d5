//! Vorticity, divergence, and Okubo–Weiss.
//!
//! All three come out of the same pair of angular derivative stencils,
//! so they are computed together at each point.

use ndarray::{Array4, ArrayView2, s};
use rayon::prelude::*;

use sieve_types::constants::R_EARTH;
use sieve_types::grid::Grid;

use crate::derivatives::{spher_derivative_at_point, GridAxis};

#[derive(Debug, Clone, Copy, Default)]
pub struct PointVorticity {
    /// Radial vorticity component ω_r.
    pub vort_r: f64,
    /// Horizontal divergence ∇·u.
    pub divergence: f64,
    /// Okubo–Weiss parameter `s_n² + s_s² − ω_r²`.
    pub okubo_weiss: f64,
}

/// Vorticity bundle at one point of a velocity slice. The
/// `(itime, idepth)` pair selects the mask slice.
#[allow(clippy::too_many_arguments)]
pub fn vorticity_at_point<'a>(
    grid: &Grid,
    u_lon: ArrayView2<'a, f64>,
    u_lat: ArrayView2<'a, f64>,
    itime: usize,
    idepth: usize,
    ilat: usize,
    ilon: usize,
    diff_order: usize,
    use_mask: bool,
) -> PointVorticity {
    if grid.is_pole_row(ilat) {
        return PointVorticity::default();
    }

    let fields = [u_lon, u_lat];
    let mut d_dlon = [0.0; 2];
    let mut d_dlat = [0.0; 2];
    spher_derivative_at_point(
        &mut d_dlon,
        &fields,
        grid,
        GridAxis::Lon,
        itime,
        idepth,
        ilat,
        ilon,
        1,
        diff_order,
        use_mask,
    );
    spher_derivative_at_point(
        &mut d_dlat,
        &fields,
        grid,
        GridAxis::Lat,
        itime,
        idepth,
        ilat,
        ilon,
        1,
        diff_order,
        use_mask,
    );
    let (ulon_lon, ulat_lon) = (d_dlon[0], d_dlon[1]);
    let (ulon_lat, ulat_lat) = (d_dlat[0], d_dlat[1]);

    let lat = grid.lat[ilat];
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();
    let u_lon_loc = u_lon[[ilat, ilon]];
    let u_lat_loc = u_lat[[ilat, ilon]];

    let vort_r = (ulat_lon / cos_lat - ulon_lat + tan_lat * u_lon_loc) / R_EARTH;
    let divergence =
        ulon_lon / (R_EARTH * cos_lat) + ulat_lat / R_EARTH - u_lat_loc * tan_lat / R_EARTH;

    let s_n = (cos_lat * ulon_lon - ulat_lat) / R_EARTH;
    let s_s = (cos_lat * ulat_lon + ulon_lat) / R_EARTH;
    let okubo_weiss = s_n * s_n + s_s * s_s - vort_r * vort_r;

    PointVorticity {
        vort_r,
        divergence,
        okubo_weiss,
    }
}

/// Field bundle produced by [`compute_vorticity`].
#[derive(Debug, Clone)]
pub struct VorticityFields {
    pub vort_r: Array4<f64>,
    pub divergence: Array4<f64>,
    pub okubo_weiss: Array4<f64>,
}

/// Vorticity, divergence, and Okubo–Weiss over the whole 4-D velocity
/// field. Land points receive `land_value` (the fill value for output
/// products, 0 for arrays that feed further arithmetic).
pub fn compute_vorticity(
    grid: &Grid,
    u_lon: &Array4<f64>,
    u_lat: &Array4<f64>,
    diff_order: usize,
    use_mask: bool,
    land_value: f64,
) -> VorticityFields {
    let dim = u_lon.dim();
    let (ntime, ndepth, nlat, nlon) = dim;
    let mut out = VorticityFields {
        vort_r: Array4::zeros(dim),
        divergence: Array4::zeros(dim),
        okubo_weiss: Array4::zeros(dim),
    };

    for itime in 0..ntime {
        for idepth in 0..ndepth {
            let lon_slice = u_lon.slice(s![itime, idepth, .., ..]);
            let lat_slice = u_lat.slice(s![itime, idepth, .., ..]);

            let rows: Vec<[Vec<f64>; 3]> = (0..nlat)
                .into_par_iter()
                .map(|ilat| {
                    let mut vort = vec![land_value; nlon];
                    let mut div = vec![land_value; nlon];
                    let mut ow = vec![land_value; nlon];
                    for ilon in 0..nlon {
                        if !grid.water(itime, idepth, ilat, ilon) {
                            continue;
                        }
                        let p = vorticity_at_point(
                            grid, lon_slice, lat_slice, itime, idepth, ilat, ilon, diff_order,
                            use_mask,
                        );
                        vort[ilon] = p.vort_r;
                        div[ilon] = p.divergence;
                        ow[ilon] = p.okubo_weiss;
                    }
                    [vort, div, ow]
                })
                .collect();

            for (ilat, [vort, div, ow]) in rows.iter().enumerate() {
                for ilon in 0..nlon {
                    out.vort_r[[itime, idepth, ilat, ilon]] = vort[ilon];
                    out.divergence[[itime, idepth, ilat, ilon]] = div[ilon];
                    out.okubo_weiss[[itime, idepth, ilat, ilon]] = ow[ilon];
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn test_grid(nlat: usize, nlon: usize) -> Grid {
        let lat = Array1::linspace(-1.2, 1.2, nlat);
        let lon = Array1::linspace(
            0.0,
            std::f64::consts::TAU * (nlon as f64 - 1.0) / nlon as f64,
            nlon,
        );
        let mask = Array4::from_elem((1, 1, nlat, nlon), true);
        Grid::new(
            Array1::zeros(1),
            Array1::zeros(1),
            lat,
            lon,
            mask,
            true,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_solid_body_rotation_vorticity() {
        // u_lon = Ω R cos(lat) is solid-body rotation about the polar
        // axis: ω_r = 2Ω sin(lat), divergence = 0.
        let nlat = 64;
        let nlon = 32;
        let grid = test_grid(nlat, nlon);
        let omega = 1.0e-5;
        let u_lon = Array4::from_shape_fn((1, 1, nlat, nlon), |(_, _, i, _)| {
            omega * R_EARTH * grid.lat[i].cos()
        });
        let u_lat = Array4::zeros((1, 1, nlat, nlon));

        let fields = compute_vorticity(&grid, &u_lon, &u_lat, 4, true, 0.0);
        for i in 4..nlat - 4 {
            for j in 0..nlon {
                let expected = 2.0 * omega * grid.lat[i].sin();
                let got = fields.vort_r[[0, 0, i, j]];
                assert!(
                    (got - expected).abs() < 1e-6 * omega,
                    "ω_r at ({i},{j}): {got} vs {expected}"
                );
                assert!(fields.divergence[[0, 0, i, j]].abs() < 1e-10 * omega);
            }
        }
    }

    #[test]
    fn test_divergent_flow_has_zero_vorticity() {
        // u_lat = sin(lat)·cos(lat) has no zonal component and no
        // zonal variation, so ω_r depends only on ∂u_lat/∂lon = 0.
        let nlat = 48;
        let nlon = 24;
        let grid = test_grid(nlat, nlon);
        let u_lon = Array4::zeros((1, 1, nlat, nlon));
        let u_lat = Array4::from_shape_fn((1, 1, nlat, nlon), |(_, _, i, _)| {
            grid.lat[i].sin() * grid.lat[i].cos()
        });

        let fields = compute_vorticity(&grid, &u_lon, &u_lat, 4, true, 0.0);
        for i in 4..nlat - 4 {
            for j in 0..nlon {
                assert!(fields.vort_r[[0, 0, i, j]].abs() < 1e-12);
                // div = (1/R)(∂lat(u_lat) − u_lat tan) =
                //       (1/R)(cos2lat − sin·cos·tan)
                let lat = grid.lat[i];
                let expected = ((2.0 * lat).cos() - lat.sin().powi(2)) / R_EARTH;
                let got = fields.divergence[[0, 0, i, j]];
                assert!(
                    (got - expected).abs() < 1e-4 * (1.0 / R_EARTH),
                    "div at ({i},{j}): {got} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn test_land_gets_land_value() {
        let nlat = 16;
        let nlon = 16;
        let lat = Array1::linspace(-1.0, 1.0, nlat);
        let lon = Array1::linspace(0.0, 6.0, nlon);
        let mut mask = Array4::from_elem((1, 1, nlat, nlon), true);
        mask[[0, 0, 5, 5]] = false;
        let grid = Grid::new(
            Array1::zeros(1),
            Array1::zeros(1),
            lat,
            lon,
            mask,
            false,
            false,
        )
        .unwrap();
        let u_lon = Array4::from_elem((1, 1, nlat, nlon), 1.0);
        let u_lat = Array4::zeros((1, 1, nlat, nlon));
        let fields = compute_vorticity(&grid, &u_lon, &u_lat, 2, true, -999.0);
        assert_eq!(fields.vort_r[[0, 0, 5, 5]], -999.0);
        assert_eq!(fields.okubo_weiss[[0, 0, 5, 5]], -999.0);
        assert!(fields.vort_r[[0, 0, 8, 8]] != -999.0);
    }
}
