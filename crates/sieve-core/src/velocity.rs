//! Velocity reconstructions and basis changes.
//!
//! The toroidal part of the flow is generated by the stream function Ψ
//! and the potential part by the scalar potential Φ:
//!
//! ```text
//! u_lon = −(1/R) ∂Ψ/∂lat + (1/(R cos lat)) ∂Φ/∂lon
//! u_lat =  (1/(R cos lat)) ∂Ψ/∂lon + (1/R) ∂Φ/∂lat
//! ```
//!
//! Cartesian components are used wherever quadratic products feed the
//! coarse-graining kernel, so the metric terms stay out of the hot loop.

use ndarray::{Array2, Array4, ArrayView2, s};
use rayon::prelude::*;

use sieve_types::constants::R_EARTH;
use sieve_types::grid::Grid;

use crate::derivatives::{spher_derivative_at_point, GridAxis};
use crate::rows::rows_to_array2;

/// `(u_lon, u_lat)` generated by a stream function slice.
pub fn toroidal_vel_slice(
    grid: &Grid,
    psi: ArrayView2<'_, f64>,
    itime: usize,
    idepth: usize,
    diff_order: usize,
    use_mask: bool,
) -> (Array2<f64>, Array2<f64>) {
    vel_from_potential_slice(grid, psi, itime, idepth, diff_order, use_mask, true)
}

/// `(u_lon, u_lat)` generated by a scalar potential slice.
pub fn potential_vel_slice(
    grid: &Grid,
    phi: ArrayView2<'_, f64>,
    itime: usize,
    idepth: usize,
    diff_order: usize,
    use_mask: bool,
) -> (Array2<f64>, Array2<f64>) {
    vel_from_potential_slice(grid, phi, itime, idepth, diff_order, use_mask, false)
}

#[allow(clippy::too_many_arguments)]
fn vel_from_potential_slice(
    grid: &Grid,
    f: ArrayView2<'_, f64>,
    itime: usize,
    idepth: usize,
    diff_order: usize,
    use_mask: bool,
    toroidal: bool,
) -> (Array2<f64>, Array2<f64>) {
    let nlat = grid.nlat();
    let nlon = grid.nlon();

    let rows: Vec<(Vec<f64>, Vec<f64>)> = (0..nlat)
        .into_par_iter()
        .map(|ilat| {
            let mut u_lon_row = vec![0.0; nlon];
            let mut u_lat_row = vec![0.0; nlon];
            if grid.is_pole_row(ilat) {
                // sec(lat) is singular here; the projection does not
                // carry first-derivative rows at the poles either.
                return (u_lon_row, u_lat_row);
            }
            let cos_lat = grid.lat[ilat].cos();
            let mut dlon = [0.0];
            let mut dlat = [0.0];
            for ilon in 0..nlon {
                spher_derivative_at_point(
                    &mut dlon,
                    &[f],
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
                    &mut dlat,
                    &[f],
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
                if toroidal {
                    u_lon_row[ilon] = -dlat[0] / R_EARTH;
                    u_lat_row[ilon] = dlon[0] / (R_EARTH * cos_lat);
                } else {
                    u_lon_row[ilon] = dlon[0] / (R_EARTH * cos_lat);
                    u_lat_row[ilon] = dlat[0] / R_EARTH;
                }
            }
            (u_lon_row, u_lat_row)
        })
        .collect();

    let lon_rows: Vec<Vec<f64>> = rows.iter().map(|(a, _)| a.clone()).collect();
    let lat_rows: Vec<Vec<f64>> = rows.into_iter().map(|(_, b)| b).collect();
    (
        rows_to_array2(&lon_rows, nlon),
        rows_to_array2(&lat_rows, nlon),
    )
}

/// 4-D driver: velocities from a stream function over all slices.
pub fn toroidal_vel_from_psi(
    grid: &Grid,
    psi: &Array4<f64>,
    diff_order: usize,
    use_mask: bool,
) -> (Array4<f64>, Array4<f64>) {
    vel_from_potential(grid, psi, diff_order, use_mask, true)
}

/// 4-D driver: velocities from a scalar potential over all slices.
pub fn potential_vel_from_phi(
    grid: &Grid,
    phi: &Array4<f64>,
    diff_order: usize,
    use_mask: bool,
) -> (Array4<f64>, Array4<f64>) {
    vel_from_potential(grid, phi, diff_order, use_mask, false)
}

fn vel_from_potential(
    grid: &Grid,
    f: &Array4<f64>,
    diff_order: usize,
    use_mask: bool,
    toroidal: bool,
) -> (Array4<f64>, Array4<f64>) {
    let dim = f.dim();
    let mut u_lon = Array4::zeros(dim);
    let mut u_lat = Array4::zeros(dim);
    for itime in 0..dim.0 {
        for idepth in 0..dim.1 {
            let slice = f.slice(s![itime, idepth, .., ..]);
            let (lon2, lat2) =
                vel_from_potential_slice(grid, slice, itime, idepth, diff_order, use_mask, toroidal);
            u_lon.slice_mut(s![itime, idepth, .., ..]).assign(&lon2);
            u_lat.slice_mut(s![itime, idepth, .., ..]).assign(&lat2);
        }
    }
    (u_lon, u_lat)
}

/// Rotate tangential velocities into the global Cartesian frame. The
/// radial component is identically zero for these 2-D flows.
pub fn vel_spher_to_cart(
    grid: &Grid,
    u_lon: &Array4<f64>,
    u_lat: &Array4<f64>,
) -> (Array4<f64>, Array4<f64>, Array4<f64>) {
    let dim = u_lon.dim();
    let mut u_x = Array4::zeros(dim);
    let mut u_y = Array4::zeros(dim);
    let mut u_z = Array4::zeros(dim);
    for itime in 0..dim.0 {
        for idepth in 0..dim.1 {
            for ilat in 0..dim.2 {
                let (sin_lat, cos_lat) = grid.lat[ilat].sin_cos();
                for ilon in 0..dim.3 {
                    let (sin_lon, cos_lon) = grid.lon[ilon].sin_cos();
                    let ul = u_lon[[itime, idepth, ilat, ilon]];
                    let um = u_lat[[itime, idepth, ilat, ilon]];
                    u_x[[itime, idepth, ilat, ilon]] = -ul * sin_lon - um * sin_lat * cos_lon;
                    u_y[[itime, idepth, ilat, ilon]] = ul * cos_lon - um * sin_lat * sin_lon;
                    u_z[[itime, idepth, ilat, ilon]] = um * cos_lat;
                }
            }
        }
    }
    (u_x, u_y, u_z)
}

/// Project Cartesian velocities back onto the local `(ê_lon, ê_lat)`
/// basis (the tangential part; any radial component is discarded).
pub fn vel_cart_to_spher(
    grid: &Grid,
    u_x: &Array4<f64>,
    u_y: &Array4<f64>,
    u_z: &Array4<f64>,
) -> (Array4<f64>, Array4<f64>) {
    let dim = u_x.dim();
    let mut u_lon = Array4::zeros(dim);
    let mut u_lat = Array4::zeros(dim);
    for itime in 0..dim.0 {
        for idepth in 0..dim.1 {
            for ilat in 0..dim.2 {
                let (sin_lat, cos_lat) = grid.lat[ilat].sin_cos();
                for ilon in 0..dim.3 {
                    let (sin_lon, cos_lon) = grid.lon[ilon].sin_cos();
                    let ux = u_x[[itime, idepth, ilat, ilon]];
                    let uy = u_y[[itime, idepth, ilat, ilon]];
                    let uz = u_z[[itime, idepth, ilat, ilon]];
                    u_lon[[itime, idepth, ilat, ilon]] = -ux * sin_lon + uy * cos_lon;
                    u_lat[[itime, idepth, ilat, ilon]] =
                        -ux * sin_lat * cos_lon - uy * sin_lat * sin_lon + uz * cos_lat;
                }
            }
        }
    }
    (u_lon, u_lat)
}
