//! Point derivatives of 2-D surface fields on the sphere.
//!
//! Every caller that needs derivatives of several fields at the same
//! point goes through one stencil build, so the index arithmetic and
//! the Vandermonde solve are amortised across the request vector.

use ndarray::ArrayView2;
use sieve_math::stencil::{build_stencil, wrap_index};
use sieve_types::constants::R_EARTH;
use sieve_types::grid::Grid;

/// Horizontal axis selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAxis {
    Lon,
    Lat,
}

/// Derivative of each field in `fields` along `axis` at one grid point,
/// written into `out` (one slot per field). The `(itime, idepth)` pair
/// only selects the mask slice; the field views are 2-D `[nlat, nlon]`
/// slices. When no stencil can be built the slots are left at zero:
/// the derivative is omitted, not guessed.
#[allow(clippy::too_many_arguments)]
pub fn spher_derivative_at_point(
    out: &mut [f64],
    fields: &[ArrayView2<f64>],
    grid: &Grid,
    axis: GridAxis,
    itime: usize,
    idepth: usize,
    ilat: usize,
    ilon: usize,
    deriv_order: usize,
    accuracy_order: usize,
    use_mask: bool,
) {
    debug_assert_eq!(out.len(), fields.len());
    for slot in out.iter_mut() {
        *slot = 0.0;
    }

    match axis {
        GridAxis::Lon => {
            let Some(coords) = grid.lon.as_slice() else {
                return;
            };
            let period = if grid.periodic_x {
                Some(std::f64::consts::TAU)
            } else {
                None
            };
            let water = |j: usize| !use_mask || grid.water(itime, idepth, ilat, j);
            let Some(st) = build_stencil(coords, period, ilon, deriv_order, accuracy_order, water)
            else {
                return;
            };
            let n = coords.len();
            for (slot, field) in out.iter_mut().zip(fields.iter()) {
                let mut sum = 0.0;
                for (idx, &w) in st.span().zip(st.weights.iter()) {
                    sum += w * field[[ilat, wrap_index(idx, n)]];
                }
                *slot = sum;
            }
        }
        GridAxis::Lat => {
            let Some(coords) = grid.lat.as_slice() else {
                return;
            };
            let period = match (grid.periodic_y, grid.uniform_lat_spacing()) {
                (true, Some(dlat)) => Some(dlat * coords.len() as f64),
                _ => None,
            };
            let water = |i: usize| !use_mask || grid.water(itime, idepth, i, ilon);
            let Some(st) = build_stencil(coords, period, ilat, deriv_order, accuracy_order, water)
            else {
                return;
            };
            let n = coords.len();
            for (slot, field) in out.iter_mut().zip(fields.iter()) {
                let mut sum = 0.0;
                for (idx, &w) in st.span().zip(st.weights.iter()) {
                    sum += w * field[[wrap_index(idx, n), ilon]];
                }
                *slot = sum;
            }
        }
    }
}

/// Cartesian derivatives of surface fields by the chain rule through
/// `(lon, lat)`. The fields live on the spherical shell, so there is no
/// radial variation and the three Cartesian directions are spanned by
/// the two angular derivatives.
#[allow(clippy::too_many_arguments)]
pub fn cart_derivatives_at_point(
    x_out: &mut [f64],
    y_out: &mut [f64],
    z_out: &mut [f64],
    fields: &[ArrayView2<f64>],
    grid: &Grid,
    itime: usize,
    idepth: usize,
    ilat: usize,
    ilon: usize,
    accuracy_order: usize,
    use_mask: bool,
) {
    let nf = fields.len();
    debug_assert!(nf <= 16);
    let mut dlon = [0.0f64; 16];
    let mut dlat = [0.0f64; 16];
    spher_derivative_at_point(
        &mut dlon[..nf],
        fields,
        grid,
        GridAxis::Lon,
        itime,
        idepth,
        ilat,
        ilon,
        1,
        accuracy_order,
        use_mask,
    );
    spher_derivative_at_point(
        &mut dlat[..nf],
        fields,
        grid,
        GridAxis::Lat,
        itime,
        idepth,
        ilat,
        ilon,
        1,
        accuracy_order,
        use_mask,
    );

    let lon = grid.lon[ilon];
    let lat = grid.lat[ilat];
    let cos_lat = lat.cos();
    let sin_lat = lat.sin();
    let cos_lon = lon.cos();
    let sin_lon = lon.sin();

    // sec(lat) is singular exactly at the poles; those rows never
    // contribute angular derivatives.
    let sec_over_r = if cos_lat.abs() > 1e-12 {
        1.0 / (R_EARTH * cos_lat)
    } else {
        0.0
    };

    let dlon_dx = -sin_lon * sec_over_r;
    let dlon_dy = cos_lon * sec_over_r;
    let dlat_dx = -cos_lon * sin_lat / R_EARTH;
    let dlat_dy = -sin_lon * sin_lat / R_EARTH;
    let dlat_dz = cos_lat / R_EARTH;

    for f in 0..nf {
        x_out[f] = dlon[f] * dlon_dx + dlat[f] * dlat_dx;
        y_out[f] = dlon[f] * dlon_dy + dlat[f] * dlat_dy;
        z_out[f] = dlat[f] * dlat_dz;
    }
}
