//! Scale-transfer diagnostics derived from the coarse fields.
//!
//! The sub-filter stress is `τᵢⱼ = ⟨uᵢuⱼ⟩ − ⟨uᵢ⟩⟨uⱼ⟩` in Cartesian
//! components. From it:
//!
//! - energy cascade `Π = −ρ₀·τᵢⱼ·∂ⱼūᵢ`;
//! - the shifted-derivative variant `Π₂ = −ρ₀[∂ⱼ(τᵢⱼūᵢ) − ūᵢ∂ⱼτᵢⱼ]`,
//!   algebraically the same contraction with the derivative moved onto
//!   the stress;
//! - enstrophy cascade `Z = −ρ₀·τ(ω,uⱼ)·∂ⱼω̄`;
//! - energy transport `∇·J` with
//!   `Jⱼ = ρ₀(ūᵢ⟨uᵢuⱼ⟩ − ½|ū|²ūⱼ) = ½ρ₀|ū|²ūⱼ + ρ₀ūᵢτᵢⱼ`.

use ndarray::{s, Array4};
use rayon::prelude::*;

use sieve_types::grid::Grid;

use crate::derivatives::cart_derivatives_at_point;

/// Coarse quadratic products from the kernel pass: six symmetric
/// velocity dyads and three vorticity-velocity products.
#[derive(Debug, Clone)]
pub struct QuadFields {
    pub uxux: Array4<f64>,
    pub uxuy: Array4<f64>,
    pub uxuz: Array4<f64>,
    pub uyuy: Array4<f64>,
    pub uyuz: Array4<f64>,
    pub uzuz: Array4<f64>,
    pub vort_ux: Array4<f64>,
    pub vort_uy: Array4<f64>,
    pub vort_uz: Array4<f64>,
}

impl QuadFields {
    pub fn zeros(dim: (usize, usize, usize, usize)) -> Self {
        QuadFields {
            uxux: Array4::zeros(dim),
            uxuy: Array4::zeros(dim),
            uxuz: Array4::zeros(dim),
            uyuy: Array4::zeros(dim),
            uyuz: Array4::zeros(dim),
            uzuz: Array4::zeros(dim),
            vort_ux: Array4::zeros(dim),
            vort_uy: Array4::zeros(dim),
            vort_uz: Array4::zeros(dim),
        }
    }
}

/// Evaluate `f` at every water point, `fill_value` on land.
fn pointwise(
    grid: &Grid,
    fill_value: f64,
    f: impl Fn(usize, usize, usize, usize) -> f64 + Sync,
) -> Array4<f64> {
    let (ntime, ndepth, nlat, nlon) = grid.mask.dim();
    let mut out = Array4::zeros((ntime, ndepth, nlat, nlon));
    for itime in 0..ntime {
        for idepth in 0..ndepth {
            let rows: Vec<Vec<f64>> = (0..nlat)
                .into_par_iter()
                .map(|ilat| {
                    (0..nlon)
                        .map(|ilon| {
                            if grid.water(itime, idepth, ilat, ilon) {
                                f(itime, idepth, ilat, ilon)
                            } else {
                                fill_value
                            }
                        })
                        .collect()
                })
                .collect();
            for (ilat, row) in rows.iter().enumerate() {
                for (ilon, &v) in row.iter().enumerate() {
                    out[[itime, idepth, ilat, ilon]] = v;
                }
            }
        }
    }
    out
}

/// Energy cascade Π from the coarse Cartesian velocity and the coarse
/// dyads.
#[allow(clippy::too_many_arguments)]
pub fn compute_pi(
    grid: &Grid,
    u_x: &Array4<f64>,
    u_y: &Array4<f64>,
    u_z: &Array4<f64>,
    quads: &QuadFields,
    diff_order: usize,
    rho0: f64,
    fill_value: f64,
) -> Array4<f64> {
    pointwise(grid, fill_value, |itime, idepth, ilat, ilon| {
        let fields = [
            u_x.slice(s![itime, idepth, .., ..]),
            u_y.slice(s![itime, idepth, .., ..]),
            u_z.slice(s![itime, idepth, .., ..]),
        ];
        let mut dx = [0.0; 3];
        let mut dy = [0.0; 3];
        let mut dz = [0.0; 3];
        cart_derivatives_at_point(
            &mut dx, &mut dy, &mut dz, &fields, grid, itime, idepth, ilat, ilon, diff_order, true,
        );
        let idx = [itime, idepth, ilat, ilon];
        let (ux, uy, uz) = (u_x[idx], u_y[idx], u_z[idx]);

        let tau_xx = quads.uxux[idx] - ux * ux;
        let tau_xy = quads.uxuy[idx] - ux * uy;
        let tau_xz = quads.uxuz[idx] - ux * uz;
        let tau_yy = quads.uyuy[idx] - uy * uy;
        let tau_yz = quads.uyuz[idx] - uy * uz;
        let tau_zz = quads.uzuz[idx] - uz * uz;

        // τ is symmetric, so contracting with ∂ⱼūᵢ equals contracting
        // with the strain tensor.
        -rho0
            * (tau_xx * dx[0]
                + tau_yy * dy[1]
                + tau_zz * dz[2]
                + tau_xy * (dy[0] + dx[1])
                + tau_xz * (dz[0] + dx[2])
                + tau_yz * (dz[1] + dy[2]))
    })
}

/// Π with the derivative moved onto the stress via the product rule;
/// the discretisation differs from [`compute_pi`] by where the stencils
/// sit, which is the point of reporting both.
#[allow(clippy::too_many_arguments)]
pub fn compute_pi_shift_deriv(
    grid: &Grid,
    u_x: &Array4<f64>,
    u_y: &Array4<f64>,
    u_z: &Array4<f64>,
    quads: &QuadFields,
    diff_order: usize,
    rho0: f64,
    fill_value: f64,
) -> Array4<f64> {
    let dim = u_x.dim();
    let (ntime, ndepth, nlat, nlon) = dim;

    // Materialise τ and the contracted flux tᵢ = τᵢⱼūⱼ once.
    let mut tau = QuadFields::zeros(dim);
    let mut t_x = Array4::zeros(dim);
    let mut t_y = Array4::zeros(dim);
    let mut t_z = Array4::zeros(dim);
    for itime in 0..ntime {
        for idepth in 0..ndepth {
            for ilat in 0..nlat {
                for ilon in 0..nlon {
                    let idx = [itime, idepth, ilat, ilon];
                    if !grid.water(itime, idepth, ilat, ilon) {
                        continue;
                    }
                    let (ux, uy, uz) = (u_x[idx], u_y[idx], u_z[idx]);
                    let txx = quads.uxux[idx] - ux * ux;
                    let txy = quads.uxuy[idx] - ux * uy;
                    let txz = quads.uxuz[idx] - ux * uz;
                    let tyy = quads.uyuy[idx] - uy * uy;
                    let tyz = quads.uyuz[idx] - uy * uz;
                    let tzz = quads.uzuz[idx] - uz * uz;
                    tau.uxux[idx] = txx;
                    tau.uxuy[idx] = txy;
                    tau.uxuz[idx] = txz;
                    tau.uyuy[idx] = tyy;
                    tau.uyuz[idx] = tyz;
                    tau.uzuz[idx] = tzz;
                    t_x[idx] = txx * ux + txy * uy + txz * uz;
                    t_y[idx] = txy * ux + tyy * uy + tyz * uz;
                    t_z[idx] = txz * ux + tyz * uy + tzz * uz;
                }
            }
        }
    }

    pointwise(grid, fill_value, |itime, idepth, ilat, ilon| {
        let fields = [
            t_x.slice(s![itime, idepth, .., ..]),
            t_y.slice(s![itime, idepth, .., ..]),
            t_z.slice(s![itime, idepth, .., ..]),
            tau.uxux.slice(s![itime, idepth, .., ..]),
            tau.uxuy.slice(s![itime, idepth, .., ..]),
            tau.uxuz.slice(s![itime, idepth, .., ..]),
            tau.uyuy.slice(s![itime, idepth, .., ..]),
            tau.uyuz.slice(s![itime, idepth, .., ..]),
            tau.uzuz.slice(s![itime, idepth, .., ..]),
        ];
        let mut dx = [0.0; 9];
        let mut dy = [0.0; 9];
        let mut dz = [0.0; 9];
        cart_derivatives_at_point(
            &mut dx, &mut dy, &mut dz, &fields, grid, itime, idepth, ilat, ilon, diff_order, true,
        );
        let idx = [itime, idepth, ilat, ilon];
        let (ux, uy, uz) = (u_x[idx], u_y[idx], u_z[idx]);

        let div_flux = dx[0] + dy[1] + dz[2];
        // ∂ⱼτᵢⱼ per Cartesian row i, from the six symmetric components
        // ordered [xx, xy, xz, yy, yz, zz] at field slots 3..9.
        let div_tau_x = dx[3] + dy[4] + dz[5];
        let div_tau_y = dx[4] + dy[6] + dz[7];
        let div_tau_z = dx[5] + dy[7] + dz[8];

        -rho0 * (div_flux - (ux * div_tau_x + uy * div_tau_y + uz * div_tau_z))
    })
}

/// Enstrophy cascade Z from the coarse vorticity and the coarse
/// vorticity-velocity products.
#[allow(clippy::too_many_arguments)]
pub fn compute_z(
    grid: &Grid,
    u_x: &Array4<f64>,
    u_y: &Array4<f64>,
    u_z: &Array4<f64>,
    vort_r: &Array4<f64>,
    quads: &QuadFields,
    diff_order: usize,
    rho0: f64,
    fill_value: f64,
) -> Array4<f64> {
    pointwise(grid, fill_value, |itime, idepth, ilat, ilon| {
        let fields = [vort_r.slice(s![itime, idepth, .., ..])];
        let mut dx = [0.0; 1];
        let mut dy = [0.0; 1];
        let mut dz = [0.0; 1];
        cart_derivatives_at_point(
            &mut dx, &mut dy, &mut dz, &fields, grid, itime, idepth, ilat, ilon, diff_order, true,
        );
        let idx = [itime, idepth, ilat, ilon];
        let w = vort_r[idx];
        let tau_wx = quads.vort_ux[idx] - w * u_x[idx];
        let tau_wy = quads.vort_uy[idx] - w * u_y[idx];
        let tau_wz = quads.vort_uz[idx] - w * u_z[idx];
        -rho0 * (tau_wx * dx[0] + tau_wy * dy[0] + tau_wz * dz[0])
    })
}

/// Divergence of the coarse energy transport flux
/// `Jⱼ = ρ₀(ūᵢ⟨uᵢuⱼ⟩ − ½|ū|²ūⱼ)`.
#[allow(clippy::too_many_arguments)]
pub fn compute_div_transport(
    grid: &Grid,
    u_x: &Array4<f64>,
    u_y: &Array4<f64>,
    u_z: &Array4<f64>,
    quads: &QuadFields,
    diff_order: usize,
    rho0: f64,
    fill_value: f64,
) -> Array4<f64> {
    let dim = u_x.dim();
    let (ntime, ndepth, nlat, nlon) = dim;

    let mut j_x = Array4::zeros(dim);
    let mut j_y = Array4::zeros(dim);
    let mut j_z = Array4::zeros(dim);
    for itime in 0..ntime {
        for idepth in 0..ndepth {
            for ilat in 0..nlat {
                for ilon in 0..nlon {
                    let idx = [itime, idepth, ilat, ilon];
                    if !grid.water(itime, idepth, ilat, ilon) {
                        continue;
                    }
                    let (ux, uy, uz) = (u_x[idx], u_y[idx], u_z[idx]);
                    let half_ke = 0.5 * (ux * ux + uy * uy + uz * uz);
                    j_x[idx] = rho0
                        * (ux * quads.uxux[idx] + uy * quads.uxuy[idx] + uz * quads.uxuz[idx]
                            - half_ke * ux);
                    j_y[idx] = rho0
                        * (ux * quads.uxuy[idx] + uy * quads.uyuy[idx] + uz * quads.uyuz[idx]
                            - half_ke * uy);
                    j_z[idx] = rho0
                        * (ux * quads.uxuz[idx] + uy * quads.uyuz[idx] + uz * quads.uzuz[idx]
                            - half_ke * uz);
                }
            }
        }
    }

    pointwise(grid, fill_value, |itime, idepth, ilat, ilon| {
        let fields = [
            j_x.slice(s![itime, idepth, .., ..]),
            j_y.slice(s![itime, idepth, .., ..]),
            j_z.slice(s![itime, idepth, .., ..]),
        ];
        let mut dx = [0.0; 3];
        let mut dy = [0.0; 3];
        let mut dz = [0.0; 3];
        cart_derivatives_at_point(
            &mut dx, &mut dy, &mut dz, &fields, grid, itime, idepth, ilat, ilon, diff_order, true,
        );
        dx[0] + dy[1] + dz[2]
    })
}
