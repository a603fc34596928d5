//! Geodesic coarse-graining kernel.
//!
//! For a center point and a filter scale ℓ, the raw weight of every
//! candidate point is `K(2d/ℓ)·dA·mask`, with `d` the great-circle
//! distance to the center. Weights are renormalised per center so the
//! applied kernel is a partition of unity: filtering a constant returns
//! that constant.
//!
//! The scan box is a latitude half-window satisfying
//! `R·Δi·Δlat ≥ ℓ_support` plus a longitudinal window that grows as
//! `1/cos lat`, wrapping the full circle when the domain is periodic.
//! When the longitude grid is uniform, periodic, and spans the full
//! circle, the kernel row is rotationally invariant in longitude: it is
//! computed once per center latitude at lon index 0 and translated at
//! use.

use ndarray::{Array2, ArrayView2};

use sieve_types::config::KernelShape;
use sieve_types::constants::R_EARTH;
use sieve_types::grid::Grid;

/// Kernel profile `K(r)` with `r = d/(ℓ/2)`.
pub fn kernel_value(shape: KernelShape, dist: f64, scale: f64) -> f64 {
    let r = dist / (scale / 2.0);
    match shape {
        KernelShape::TopHat => {
            if r <= 1.0 {
                1.0
            } else {
                0.0
            }
        }
        KernelShape::TanhRamp { delta } => 0.5 * (1.0 - ((r - 1.0) / delta).tanh()),
        KernelShape::Gaussian => (-2.0 * r * r).exp(),
    }
}

/// Radius (in units of ℓ/2) beyond which the kernel is negligible;
/// bounds the scan box.
pub fn support_radius_factor(shape: KernelShape) -> f64 {
    match shape {
        KernelShape::TopHat => 1.0,
        KernelShape::TanhRamp { delta } => 1.0 + 8.0 * delta,
        KernelShape::Gaussian => 2.5,
    }
}

/// Kernel normalisation constant α: the second moment of `K` under the
/// 2-D radial measure, normalised by the zeroth. Recorded with the
/// per-scale outputs so downstream transfer estimates can undo the
/// kernel shape.
pub fn kernel_alpha(shape: KernelShape) -> f64 {
    // Simpson quadrature of K(r)·r³ and K(r)·r over the support. The
    // rule count keeps the sharp top-hat edge below the 1e-3 level.
    let upper = support_radius_factor(shape).max(1.0) + 1.0;
    let n = 20_000;
    let h = upper / n as f64;
    let mut second = 0.0;
    let mut zeroth = 0.0;
    for k in 0..=n {
        let r = k as f64 * h;
        let w = if k == 0 || k == n {
            1.0
        } else if k % 2 == 1 {
            4.0
        } else {
            2.0
        };
        let kv = kernel_value(shape, r, 2.0); // scale 2 ⇒ K evaluated at r directly
        second += w * kv * r * r * r;
        zeroth += w * kv * r;
    }
    if zeroth > 0.0 {
        second / zeroth
    } else {
        0.0
    }
}

/// Inclusive latitude index window `[lb, ub]` whose rows can contribute
/// to a kernel centred on row `ilat` with support radius `cutoff`
/// metres. Walks the (possibly non-uniform) axis outward.
pub fn lat_bounds(grid: &Grid, ilat: usize, cutoff: f64) -> (usize, usize) {
    let nlat = grid.nlat();
    let lat0 = grid.lat[ilat];
    let mut lb = ilat;
    while lb > 0 && R_EARTH * (lat0 - grid.lat[lb - 1]) <= cutoff {
        lb -= 1;
    }
    let mut ub = ilat;
    while ub + 1 < nlat && R_EARTH * (grid.lat[ub + 1] - lat0) <= cutoff {
        ub += 1;
    }
    (lb, ub)
}

/// Fill `local` with kernel values for a center at `(ilat0, ilon0)`,
/// rows `lat_lb..=lat_ub`. Rows outside the window are zeroed.
#[allow(clippy::too_many_arguments)]
pub fn compute_local_kernel(
    local: &mut Array2<f64>,
    shape: KernelShape,
    scale: f64,
    grid: &Grid,
    ilat0: usize,
    ilon0: usize,
    lat_lb: usize,
    lat_ub: usize,
) {
    local.fill(0.0);
    let cutoff = support_radius_factor(shape) * scale / 2.0;
    let lat0 = grid.lat[ilat0];
    let lon0 = grid.lon[ilon0];
    let nlon = grid.nlon();

    for i in lat_lb..=lat_ub {
        let lat = grid.lat[i];
        // Cheap zonal pre-check: d ≥ (2/π)·R·cos(lat_far)·Δlon, so a
        // slack factor above π/2 never discards a contributing point.
        let min_cos = lat.cos().min(lat0.cos()).max(0.0);
        for j in 0..nlon {
            let mut dlon = (grid.lon[j] - lon0).abs();
            if grid.periodic_x {
                dlon = dlon.min(std::f64::consts::TAU - dlon);
            }
            if R_EARTH * min_cos * dlon > cutoff * 1.6 {
                continue;
            }
            let d = Grid::distance(lat0, lon0, lat, grid.lon[j]);
            if d <= cutoff {
                local[[i, j]] = kernel_value(shape, d, scale);
            }
        }
    }
}

/// Area-weighted, renormalised kernel application to a vector of
/// fields in a single pass over the scan box.
///
/// `field_use_mask` selects, per field, between a water-only average
/// (land excluded from support and normalisation) and an average over
/// every cell in the box (fields like Ψ and Φ are defined over land by
/// the projection and keep their land values).
///
/// `kernel_ilon0` is the longitude index the kernel row was computed
/// at; when it differs from `ilon` the row is translated, which is
/// exact on a uniform periodic full-span longitude grid.
#[allow(clippy::too_many_arguments)]
pub fn apply_filter_at_point(
    out: &mut [f64],
    fields: &[ArrayView2<'_, f64>],
    field_use_mask: &[bool],
    grid: &Grid,
    itime: usize,
    idepth: usize,
    ilon: usize,
    lat_lb: usize,
    lat_ub: usize,
    local_kernel: &Array2<f64>,
    kernel_ilon0: usize,
) {
    debug_assert_eq!(out.len(), fields.len());
    debug_assert_eq!(field_use_mask.len(), fields.len());
    debug_assert!(fields.len() <= 16, "filter request vector too long");
    let nf = fields.len();
    let nlon = grid.nlon();

    let mut num = [0.0f64; 16];
    let mut denom_masked = 0.0;
    let mut denom_full = 0.0;

    for i in lat_lb..=lat_ub {
        for j in 0..nlon {
            let jk = (j + kernel_ilon0 + nlon - ilon) % nlon;
            let k = local_kernel[[i, jk]];
            if k == 0.0 {
                continue;
            }
            let ka = k * grid.area(i, j);
            let wet = grid.water(itime, idepth, i, j);
            denom_full += ka;
            if wet {
                denom_masked += ka;
            }
            for f in 0..nf {
                if !field_use_mask[f] || wet {
                    num[f] += ka * fields[f][[i, j]];
                }
            }
        }
    }

    for f in 0..nf {
        let denom = if field_use_mask[f] {
            denom_masked
        } else {
            denom_full
        };
        out[f] = if denom > 0.0 { num[f] / denom } else { 0.0 };
    }
}

/// Coarse quadratic products at one point: the six symmetric Cartesian
/// velocity dyads and the three vorticity-velocity products, without
/// materialising any product array. Always a water-only average.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilteredQuadratics {
    pub uxux: f64,
    pub uxuy: f64,
    pub uxuz: f64,
    pub uyuy: f64,
    pub uyuz: f64,
    pub uzuz: f64,
    pub vort_ux: f64,
    pub vort_uy: f64,
    pub vort_uz: f64,
}

#[allow(clippy::too_many_arguments)]
pub fn apply_filter_quadratics(
    u_x: ArrayView2<'_, f64>,
    u_y: ArrayView2<'_, f64>,
    u_z: ArrayView2<'_, f64>,
    vort_r: ArrayView2<'_, f64>,
    grid: &Grid,
    itime: usize,
    idepth: usize,
    ilon: usize,
    lat_lb: usize,
    lat_ub: usize,
    local_kernel: &Array2<f64>,
    kernel_ilon0: usize,
) -> FilteredQuadratics {
    let nlon = grid.nlon();
    let mut acc = FilteredQuadratics::default();
    let mut denom = 0.0;

    for i in lat_lb..=lat_ub {
        for j in 0..nlon {
            let jk = (j + kernel_ilon0 + nlon - ilon) % nlon;
            let k = local_kernel[[i, jk]];
            if k == 0.0 || !grid.water(itime, idepth, i, j) {
                continue;
            }
            let ka = k * grid.area(i, j);
            denom += ka;
            let ux = u_x[[i, j]];
            let uy = u_y[[i, j]];
            let uz = u_z[[i, j]];
            let w = vort_r[[i, j]];
            acc.uxux += ka * ux * ux;
            acc.uxuy += ka * ux * uy;
            acc.uxuz += ka * ux * uz;
            acc.uyuy += ka * uy * uy;
            acc.uyuz += ka * uy * uz;
            acc.uzuz += ka * uz * uz;
            acc.vort_ux += ka * w * ux;
            acc.vort_uy += ka * w * uy;
            acc.vort_uz += ka * w * uz;
        }
    }

    if denom > 0.0 {
        let inv = 1.0 / denom;
        acc.uxux *= inv;
        acc.uxuy *= inv;
        acc.uxuz *= inv;
        acc.uyuy *= inv;
        acc.uyuz *= inv;
        acc.uzuz *= inv;
        acc.vort_ux *= inv;
        acc.vort_uy *= inv;
        acc.vort_uz *= inv;
    }
    acc
}
