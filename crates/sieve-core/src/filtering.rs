//! Coarse-graining driver for Helmholtz-decomposed flow.
//!
//! For every filter scale ℓ the driver filters the potentials and the
//! Cartesian quadratic products at each grid point, rebuilds coarse
//! velocities from the coarse potentials, and derives the diagnostic
//! set (KE family, vorticity, divergence, Okubo–Weiss, Π, Π₂, Z, ∇·J)
//! for the toroidal, potential, and total components.
//!
//! The loop structure is: scale outermost; a parallel pass over
//! latitude rows (each row owns its kernel; when the longitude grid is
//! uniform, periodic, and full-span the row kernel is computed once at
//! lon 0 and translated); time and depth innermost. Every output index
//! is written by exactly one row task.

use ndarray::{s, Array2, Array4, ArrayView2};
use rayon::prelude::*;
use tracing::info;

use sieve_types::config::SieveConfig;
use sieve_types::error::{SieveError, SieveResult};
use sieve_types::grid::Grid;

use crate::diagnostics::{
    compute_div_transport, compute_pi, compute_pi_shift_deriv, compute_z, QuadFields,
};
use crate::kernel::{
    apply_filter_at_point, apply_filter_quadratics, compute_local_kernel, kernel_alpha,
    lat_bounds, support_radius_factor,
};
use crate::rows::slab_offset;
use crate::velocity::{potential_vel_from_phi, toroidal_vel_from_psi, vel_spher_to_cart};
use crate::vorticity::compute_vorticity;

/// Helmholtz representation of the velocity dyad, filtered alongside
/// the potentials when `comp_pi_helmholtz` is set.
#[derive(Debug, Clone)]
pub struct UiujHelmholtz {
    pub f_r: Array4<f64>,
    pub f_phi: Array4<f64>,
    pub f_psi: Array4<f64>,
}

/// Input fields for the filtering driver: the projected potentials
/// (defined over land as well) and, optionally, the dyad potentials.
#[derive(Debug, Clone)]
pub struct HelmholtzInput {
    pub f_toroidal: Array4<f64>,
    pub f_potential: Array4<f64>,
    pub uiuj_helmholtz: Option<UiujHelmholtz>,
}

/// Per-scale products for one velocity component (tor, pot, or tot).
#[derive(Debug, Clone)]
pub struct ComponentProducts {
    pub u_lon: Array4<f64>,
    pub u_lat: Array4<f64>,
    /// `½ρ₀⟨uᵢuᵢ⟩`.
    pub ke_filt: Array4<f64>,
    /// `ke_filt − ke_coarse`.
    pub ke_fine: Array4<f64>,
    /// `ke_orig − ke_coarse`.
    pub ke_fine_mod: Array4<f64>,
    pub pi: Array4<f64>,
    pub pi2: Array4<f64>,
    pub z: Array4<f64>,
    pub div_j: Array4<f64>,
    pub vort_r: Array4<f64>,
    pub divergence: Array4<f64>,
    pub enstrophy: Array4<f64>,
    pub okubo_weiss: Option<Array4<f64>>,
}

/// Everything one filter scale produces for the output collaborator.
#[derive(Debug, Clone)]
pub struct FilterProducts {
    pub scale: f64,
    pub kernel_alpha: f64,
    pub coarse_f_tor: Array4<f64>,
    pub coarse_f_pot: Array4<f64>,
    pub coarse_uiuj: Option<UiujHelmholtz>,
    pub toroidal: ComponentProducts,
    pub potential: ComponentProducts,
    pub total: ComponentProducts,
}

impl FilterProducts {
    /// Per-scale output file name, scale in km.
    pub fn output_filename(&self) -> String {
        format!("filter_{}km.nc", self.scale / 1e3)
    }

    /// Variables the output collaborator should emit at this scale,
    /// honouring the output gating flags.
    pub fn variable_names(&self, config: &SieveConfig) -> Vec<&'static str> {
        let mut names = Vec::new();
        if config.output.no_full_outputs {
            return names;
        }
        names.extend([
            "coarse_F_tor",
            "coarse_F_pot",
        ]);
        if self.coarse_uiuj.is_some() {
            names.extend(["coarse_uiuj_F_r", "coarse_uiuj_F_Phi", "coarse_uiuj_F_Psi"]);
        }
        names.extend([
            "u_lon_tor",
            "u_lat_tor",
            "u_lon_pot",
            "u_lat_pot",
            "KE_tor_fine",
            "KE_pot_fine",
            "KE_tot_fine",
            "Pi_tor",
            "Pi_pot",
            "Pi_tot",
            "Pi2_tor",
            "Pi2_pot",
            "Pi2_tot",
            "Z_tor",
            "Z_pot",
            "Z_tot",
        ]);
        if !config.output.minimal_output {
            names.extend([
                "KE_tor_fine_mod",
                "KE_pot_fine_mod",
                "KE_tot_fine_mod",
                "div_tor",
                "div_pot",
                "div_tot",
                "KE_tor_filt",
                "KE_pot_filt",
                "KE_tot_filt",
                "Enstrophy_tor",
                "Enstrophy_pot",
                "Enstrophy_tot",
                "vort_r_tor",
                "vort_r_pot",
                "vort_r_tot",
            ]);
            if config.output.do_okuboweiss_analysis {
                names.extend(["OkuboWeiss_tor", "OkuboWeiss_pot", "OkuboWeiss_tot"]);
            }
        }
        names
    }
}

/// Output collaborator boundary: receives one product set per scale.
pub trait ScaleSink {
    fn write_scale(&mut self, products: &FilterProducts) -> SieveResult<()>;
}

/// A sink that keeps every product set in memory; used by tests and by
/// embedders that do their own serialisation.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub products: Vec<FilterProducts>,
}

impl ScaleSink for CollectingSink {
    fn write_scale(&mut self, products: &FilterProducts) -> SieveResult<()> {
        self.products.push(products.clone());
        Ok(())
    }
}

/// Pointwise kinetic energy `½ρ₀(u_lon² + u_lat²)`, `land_value` on
/// land.
fn kinetic_energy(
    grid: &Grid,
    u_lon: &Array4<f64>,
    u_lat: &Array4<f64>,
    rho0: f64,
    land_value: f64,
) -> Array4<f64> {
    let dim = u_lon.dim();
    let mut ke = Array4::from_elem(dim, land_value);
    let (ntime, ndepth, nlat, nlon) = dim;
    for itime in 0..ntime {
        for idepth in 0..ndepth {
            for ilat in 0..nlat {
                for ilon in 0..nlon {
                    if grid.water(itime, idepth, ilat, ilon) {
                        let idx = [itime, idepth, ilat, ilon];
                        ke[idx] =
                            0.5 * rho0 * (u_lon[idx] * u_lon[idx] + u_lat[idx] * u_lat[idx]);
                    }
                }
            }
        }
    }
    ke
}

/// Build the diagnostic set for one velocity component at one scale.
#[allow(clippy::too_many_arguments)]
fn component_products(
    grid: &Grid,
    config: &SieveConfig,
    u_lon: Array4<f64>,
    u_lat: Array4<f64>,
    quads: &QuadFields,
    ke_orig: &Array4<f64>,
    mut ke_filt: Array4<f64>,
) -> ComponentProducts {
    let diff_order = config.solver.diff_order;
    let rho0 = config.physics.rho0;
    let fill = config.physics.fill_value;
    let dim = u_lon.dim();
    let (ntime, ndepth, nlat, nlon) = dim;

    let vort = compute_vorticity(grid, &u_lon, &u_lat, diff_order, true, fill);
    let (u_x, u_y, u_z) = vel_spher_to_cart(grid, &u_lon, &u_lat);

    let pi = compute_pi(grid, &u_x, &u_y, &u_z, quads, diff_order, rho0, fill);
    let pi2 = compute_pi_shift_deriv(grid, &u_x, &u_y, &u_z, quads, diff_order, rho0, fill);
    let z = compute_z(
        grid,
        &u_x,
        &u_y,
        &u_z,
        &vort.vort_r,
        quads,
        diff_order,
        rho0,
        fill,
    );
    let div_j = compute_div_transport(grid, &u_x, &u_y, &u_z, quads, diff_order, rho0, fill);

    let ke_coarse = kinetic_energy(grid, &u_lon, &u_lat, rho0, fill);
    let mut ke_fine = Array4::from_elem(dim, fill);
    let mut ke_fine_mod = Array4::from_elem(dim, fill);
    let mut enstrophy = Array4::from_elem(dim, fill);
    for itime in 0..ntime {
        for idepth in 0..ndepth {
            for ilat in 0..nlat {
                for ilon in 0..nlon {
                    let idx = [itime, idepth, ilat, ilon];
                    if !grid.water(itime, idepth, ilat, ilon) {
                        ke_filt[idx] = fill;
                        continue;
                    }
                    ke_fine[idx] = ke_filt[idx] - ke_coarse[idx];
                    ke_fine_mod[idx] = ke_orig[idx] - ke_coarse[idx];
                    enstrophy[idx] = 0.5 * rho0 * vort.vort_r[idx] * vort.vort_r[idx];
                }
            }
        }
    }

    ComponentProducts {
        u_lon,
        u_lat,
        ke_filt,
        ke_fine,
        ke_fine_mod,
        pi,
        pi2,
        z,
        div_j,
        vort_r: vort.vort_r,
        divergence: vort.divergence,
        enstrophy,
        okubo_weiss: config
            .output
            .do_okuboweiss_analysis
            .then_some(vort.okubo_weiss),
    }
}

const LINEAR_SLOTS: usize = 5; // f_pot, f_tor, uiuj_r, uiuj_psi, uiuj_phi
const QUAD_SLOTS: usize = 10; // six dyads, three ω·u products, ke_filt

/// Filter the decomposed flow at every configured scale, handing each
/// scale's products to the sink.
pub fn filter_helmholtz(
    input: &HelmholtzInput,
    grid: &Grid,
    config: &SieveConfig,
    sink: &mut dyn ScaleSink,
) -> SieveResult<()> {
    let dim = input.f_toroidal.dim();
    if dim != grid.mask.dim() || dim != input.f_potential.dim() {
        return Err(SieveError::ShapeMismatch(format!(
            "potential shape {:?} does not match grid mask {:?}",
            dim,
            grid.mask.dim()
        )));
    }
    if let Some(uiuj) = &input.uiuj_helmholtz {
        if uiuj.f_r.dim() != dim || uiuj.f_phi.dim() != dim || uiuj.f_psi.dim() != dim {
            return Err(SieveError::ShapeMismatch(
                "dyad potential shapes do not match the grid".to_string(),
            ));
        }
    }
    let (ntime, ndepth, nlat, nlon) = dim;
    let diff_order = config.solver.diff_order;
    let rho0 = config.physics.rho0;
    let shape = config.filter.kernel;
    let alpha = kernel_alpha(shape);
    let cacheable =
        grid.periodic_x && config.domain.uniform_lon_grid && config.domain.full_lon_span;

    // Unfiltered machinery, shared by every scale.
    let (u_lon_tor, u_lat_tor) = toroidal_vel_from_psi(grid, &input.f_toroidal, diff_order, true);
    let (u_lon_pot, u_lat_pot) =
        potential_vel_from_phi(grid, &input.f_potential, diff_order, true);
    let u_lon_tot = &u_lon_tor + &u_lon_pot;
    let u_lat_tot = &u_lat_tor + &u_lat_pot;

    let comp_u_lon = [u_lon_tor, u_lon_pot, u_lon_tot];
    let comp_u_lat = [u_lat_tor, u_lat_pot, u_lat_tot];

    let ke_orig: [Array4<f64>; 3] = std::array::from_fn(|c| {
        kinetic_energy(grid, &comp_u_lon[c], &comp_u_lat[c], rho0, 0.0)
    });
    // Unfiltered vorticity feeds the ω·u quadratics; land stays 0 so a
    // masked kernel never reads it.
    let vort_full: [Array4<f64>; 3] = std::array::from_fn(|c| {
        compute_vorticity(grid, &comp_u_lon[c], &comp_u_lat[c], diff_order, true, 0.0).vort_r
    });
    let cart: [(Array4<f64>, Array4<f64>, Array4<f64>); 3] =
        std::array::from_fn(|c| vel_spher_to_cart(grid, &comp_u_lon[c], &comp_u_lat[c]));

    let slab_len = ntime * ndepth * nlon;

    for &scale in &config.filter.scales {
        info!(scale_km = scale / 1e3, "filtering at scale");
        let cutoff = support_radius_factor(shape) * scale / 2.0;
        let with_uiuj = input.uiuj_helmholtz.is_some();
        let nlin = if with_uiuj { LINEAR_SLOTS } else { 2 };

        let slabs: Vec<(Vec<[f64; LINEAR_SLOTS]>, [Vec<[f64; QUAD_SLOTS]>; 3])> = (0..nlat)
            .into_par_iter()
            .map(|ilat| {
                let (lat_lb, lat_ub) = lat_bounds(grid, ilat, cutoff);
                let mut local = Array2::zeros((nlat, nlon));
                if cacheable {
                    compute_local_kernel(&mut local, shape, scale, grid, ilat, 0, lat_lb, lat_ub);
                }

                let mut lin = vec![[0.0; LINEAR_SLOTS]; slab_len];
                let mut quad: [Vec<[f64; QUAD_SLOTS]>; 3] =
                    std::array::from_fn(|_| vec![[0.0; QUAD_SLOTS]; slab_len]);
                let mut fields: Vec<ArrayView2<'_, f64>> = Vec::with_capacity(LINEAR_SLOTS);

                for ilon in 0..nlon {
                    if !cacheable {
                        compute_local_kernel(
                            &mut local, shape, scale, grid, ilat, ilon, lat_lb, lat_ub,
                        );
                    }
                    let kernel_ilon0 = if cacheable { 0 } else { ilon };

                    for itime in 0..ntime {
                        for idepth in 0..ndepth {
                            let off = slab_offset(ndepth, nlon, itime, idepth, ilon);

                            // The potentials exist over land from the
                            // projection, so they are filtered over
                            // land too (unmasked average).
                            fields.clear();
                            fields.push(input.f_potential.slice(s![itime, idepth, .., ..]));
                            fields.push(input.f_toroidal.slice(s![itime, idepth, .., ..]));
                            if let Some(uiuj) = &input.uiuj_helmholtz {
                                fields.push(uiuj.f_r.slice(s![itime, idepth, .., ..]));
                                fields.push(uiuj.f_psi.slice(s![itime, idepth, .., ..]));
                                fields.push(uiuj.f_phi.slice(s![itime, idepth, .., ..]));
                            }
                            apply_filter_at_point(
                                &mut lin[off][..nlin],
                                &fields,
                                &[false; LINEAR_SLOTS][..nlin],
                                grid,
                                itime,
                                idepth,
                                ilon,
                                lat_lb,
                                lat_ub,
                                &local,
                                kernel_ilon0,
                            );

                            // Quadratics only make sense on water.
                            if grid.water(itime, idepth, ilat, ilon) {
                                for c in 0..3 {
                                    let (u_x, u_y, u_z) = &cart[c];
                                    let q = apply_filter_quadratics(
                                        u_x.slice(s![itime, idepth, .., ..]),
                                        u_y.slice(s![itime, idepth, .., ..]),
                                        u_z.slice(s![itime, idepth, .., ..]),
                                        vort_full[c].slice(s![itime, idepth, .., ..]),
                                        grid,
                                        itime,
                                        idepth,
                                        ilon,
                                        lat_lb,
                                        lat_ub,
                                        &local,
                                        kernel_ilon0,
                                    );
                                    quad[c][off] = [
                                        q.uxux,
                                        q.uxuy,
                                        q.uxuz,
                                        q.uyuy,
                                        q.uyuz,
                                        q.uzuz,
                                        q.vort_ux,
                                        q.vort_uy,
                                        q.vort_uz,
                                        0.5 * rho0 * (q.uxux + q.uyuy + q.uzuz),
                                    ];
                                }
                            }
                        }
                    }
                }
                (lin, quad)
            })
            .collect();

        // Scatter the row slabs.
        let mut coarse_f_pot = Array4::zeros(dim);
        let mut coarse_f_tor = Array4::zeros(dim);
        let mut coarse_uiuj = input.uiuj_helmholtz.as_ref().map(|_| UiujHelmholtz {
            f_r: Array4::zeros(dim),
            f_phi: Array4::zeros(dim),
            f_psi: Array4::zeros(dim),
        });
        let mut quads = [
            QuadFields::zeros(dim),
            QuadFields::zeros(dim),
            QuadFields::zeros(dim),
        ];
        let mut ke_filt: [Array4<f64>; 3] = std::array::from_fn(|_| Array4::zeros(dim));

        for (ilat, (lin, quad)) in slabs.iter().enumerate() {
            for itime in 0..ntime {
                for idepth in 0..ndepth {
                    for ilon in 0..nlon {
                        let off = slab_offset(ndepth, nlon, itime, idepth, ilon);
                        let idx = [itime, idepth, ilat, ilon];
                        coarse_f_pot[idx] = lin[off][0];
                        coarse_f_tor[idx] = lin[off][1];
                        if let Some(uiuj) = coarse_uiuj.as_mut() {
                            uiuj.f_r[idx] = lin[off][2];
                            uiuj.f_psi[idx] = lin[off][3];
                            uiuj.f_phi[idx] = lin[off][4];
                        }
                        for c in 0..3 {
                            let q = &quad[c][off];
                            quads[c].uxux[idx] = q[0];
                            quads[c].uxuy[idx] = q[1];
                            quads[c].uxuz[idx] = q[2];
                            quads[c].uyuy[idx] = q[3];
                            quads[c].uyuz[idx] = q[4];
                            quads[c].uzuz[idx] = q[5];
                            quads[c].vort_ux[idx] = q[6];
                            quads[c].vort_uy[idx] = q[7];
                            quads[c].vort_uz[idx] = q[8];
                            ke_filt[c][idx] = q[9];
                        }
                    }
                }
            }
        }

        // Coarse velocities from the coarse potentials.
        let (cu_lon_tor, cu_lat_tor) =
            toroidal_vel_from_psi(grid, &coarse_f_tor, diff_order, true);
        let (cu_lon_pot, cu_lat_pot) =
            potential_vel_from_phi(grid, &coarse_f_pot, diff_order, true);
        let cu_lon_tot = &cu_lon_tor + &cu_lon_pot;
        let cu_lat_tot = &cu_lat_tor + &cu_lat_pot;

        let [quads_tor, quads_pot, quads_tot] = quads;
        let [ke_filt_tor, ke_filt_pot, ke_filt_tot] = ke_filt;

        let toroidal = component_products(
            grid,
            config,
            cu_lon_tor,
            cu_lat_tor,
            &quads_tor,
            &ke_orig[0],
            ke_filt_tor,
        );
        let potential = component_products(
            grid,
            config,
            cu_lon_pot,
            cu_lat_pot,
            &quads_pot,
            &ke_orig[1],
            ke_filt_pot,
        );
        let total = component_products(
            grid,
            config,
            cu_lon_tot,
            cu_lat_tot,
            &quads_tot,
            &ke_orig[2],
            ke_filt_tot,
        );

        let products = FilterProducts {
            scale,
            kernel_alpha: alpha,
            coarse_f_tor,
            coarse_f_pot,
            coarse_uiuj,
            toroidal,
            potential,
            total,
        };
        sink.write_scale(&products)?;
    }

    Ok(())
}
