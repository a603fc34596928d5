//! Helmholtz projection of `(u_lon, u_lat)` into toroidal and
//! potential parts by sparse least squares.
//!
//! Per (time, depth) slice the overdetermined block system
//!
//! ```text
//! [ −∂/∂lat           sec(lat)·∂/∂lon ]   [ Ψ ]     [ u_lon_rem  ]
//! [  sec(lat)·∂/∂lon   ∂/∂lat         ] · [ Φ ]  ≈  [ u_lat_rem  ]
//! [  λ·Δ_s             0              ]             [ λ·ω_r_rem  ]
//! [  0                 λ·Δ_s          ]             [ λ·∇·u_rem  ]
//! ```
//!
//! is solved by LSQR, with `λ = Tikhov_Laplace / deriv_scale_factor`
//! bringing the Laplacian rows to the same magnitude as the velocity
//! rows. The operator depends only on the geometry, so it is assembled
//! once and reused across every slice; the seed is subtracted so each
//! solve works on the residual field and adds the seed back afterwards.
//!
//! Pole-adjacent rows get no first-derivative rows at all. When the
//! Laplacian regularisation is off, the pole-most latitude row instead
//! carries zonal-constancy rows that pin the constant null space.

use ndarray::{s, Array2, Array4};
use tracing::{debug, info, warn};

use sieve_math::lsqr::{lsqr_solve, LsqrConfig, LsqrTermination};
use sieve_math::sparse::{CrsMatrix, SparseBuilder};
use sieve_math::stencil::{build_stencil, wrap_index};
use sieve_types::config::{SieveConfig, SolverParams};
use sieve_types::constants::{BAD_VEL_THRESHOLD, R_EARTH};
use sieve_types::error::{SieveError, SieveResult};
use sieve_types::grid::Grid;

use crate::velocity::{potential_vel_slice, toroidal_vel_slice};
use crate::vorticity::vorticity_at_point;

/// Projection solver controls.
#[derive(Debug, Clone)]
pub struct ProjectionSettings {
    pub rel_tol: f64,
    pub max_iters: usize,
    pub use_mask: bool,
    pub weight_err: bool,
    pub tikhov_laplace: f64,
    pub diff_order: usize,
}

impl ProjectionSettings {
    pub fn from_solver(params: &SolverParams) -> Self {
        ProjectionSettings {
            rel_tol: params.tolerance,
            max_iters: params.max_iterations,
            use_mask: params.use_mask,
            weight_err: params.weight_err,
            tikhov_laplace: params.tikhov_laplace,
            diff_order: params.diff_order,
        }
    }

    pub fn from_config(config: &SieveConfig) -> Self {
        Self::from_solver(&config.solver)
    }

    /// Solver attributes the output collaborator attaches to the
    /// projection file.
    pub fn attributes(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("rel_tol", self.rel_tol),
            ("max_iters", self.max_iters as f64),
            ("diff_order", self.diff_order as f64),
            ("use_mask", f64::from(u8::from(self.use_mask))),
            ("weight_err", f64::from(u8::from(self.weight_err))),
            ("Tikhov_Laplace", self.tikhov_laplace),
        ]
    }
}

/// Starting iterate for the potentials.
#[derive(Debug, Clone)]
pub enum ProjectionSeed {
    Zero,
    /// One global seed, refreshed with each solved slice.
    Single { psi: Array2<f64>, phi: Array2<f64> },
    /// Independent seed per (time, depth) slice.
    PerSlice { psi: Array4<f64>, phi: Array4<f64> },
}

/// Per-rank tally of LSQR termination causes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationCounts {
    pub abs_tol: usize,
    pub rel_tol: usize,
    pub max_iter: usize,
    pub rounding: usize,
}

impl TerminationCounts {
    pub fn record(&mut self, termination: LsqrTermination) {
        match termination {
            LsqrTermination::AbsoluteTolerance => self.abs_tol += 1,
            LsqrTermination::RelativeTolerance => self.rel_tol += 1,
            LsqrTermination::IterationLimit => self.max_iter += 1,
            LsqrTermination::RoundOff => self.rounding += 1,
        }
    }

    /// Fold another rank's tally into this one.
    pub fn merge(&mut self, other: &TerminationCounts) {
        self.abs_tol += other.abs_tol;
        self.rel_tol += other.rel_tol;
        self.max_iter += other.max_iter;
        self.rounding += other.rounding;
    }

    pub fn total(&self) -> usize {
        self.abs_tol + self.rel_tol + self.max_iter + self.rounding
    }
}

/// Per-slice error and energy norms, all area-weighted.
#[derive(Debug, Clone)]
pub struct ProjectionReport {
    pub total_area: Array2<f64>,
    pub projection_2error: Array2<f64>,
    pub projection_inferror: Array2<f64>,
    pub velocity_2norm: Array2<f64>,
    pub velocity_infnorm: Array2<f64>,
    pub toroidal_ke: Array2<f64>,
    pub potential_ke: Array2<f64>,
    pub projection_ke: Array2<f64>,
    pub iterations: Array2<usize>,
    pub terminations: TerminationCounts,
}

/// Everything the projection produces for the output collaborator.
#[derive(Debug, Clone)]
pub struct ProjectionOutput {
    pub psi: Array4<f64>,
    pub phi: Array4<f64>,
    pub u_lon_tor: Array4<f64>,
    pub u_lat_tor: Array4<f64>,
    pub u_lon_pot: Array4<f64>,
    pub u_lat_pot: Array4<f64>,
    pub report: ProjectionReport,
}

/// Force land samples to zero and scrub corrupt samples (|u| above the
/// 30 km/s threshold). Returns the number of corrupt samples found.
pub fn scrub_velocity(u_lon: &mut Array4<f64>, u_lat: &mut Array4<f64>, grid: &Grid) -> usize {
    let mut bad = 0usize;
    for (flat, (ul, um)) in u_lon.iter_mut().zip(u_lat.iter_mut()).enumerate() {
        let wet = grid
            .mask
            .as_slice()
            .map(|m| m[flat])
            .unwrap_or(true);
        if !wet {
            *ul = 0.0;
            *um = 0.0;
        } else if ul.abs() > BAD_VEL_THRESHOLD
            || um.abs() > BAD_VEL_THRESHOLD
            || !ul.is_finite()
            || !um.is_finite()
        {
            warn!(index = flat, "corrupt velocity sample, setting to zero");
            *ul = 0.0;
            *um = 0.0;
            bad += 1;
        }
    }
    bad
}

/// Mean |weight| of a mid-latitude first-derivative stencil; brings the
/// Laplacian block rows to the same units as the velocity rows.
pub fn deriv_scale_factor(grid: &Grid, diff_order: usize) -> f64 {
    let Some(coords) = grid.lat.as_slice() else {
        return 1.0;
    };
    match build_stencil(coords, None, grid.nlat() / 2, 1, diff_order, |_| true) {
        Some(st) => {
            st.weights.iter().map(|w| w.abs()).sum::<f64>() / st.weights.len() as f64
        }
        None => 1.0,
    }
}

/// Assemble the 4N×2N operator. The geometry is time/depth-invariant,
/// so the (0, 0) mask slice stands in for every slice.
fn assemble_operator(grid: &Grid, settings: &ProjectionSettings, scale_factor: f64) -> CrsMatrix {
    let nlat = grid.nlat();
    let nlon = grid.nlon();
    let npts = nlat * nlon;
    let mut builder = SparseBuilder::new(4 * npts, 2 * npts);

    let lon_coords = grid.lon.as_slice();
    let lat_coords = grid.lat.as_slice();
    let (Some(lon_coords), Some(lat_coords)) = (lon_coords, lat_coords) else {
        return builder.build();
    };
    let lon_period = grid.periodic_x.then_some(std::f64::consts::TAU);
    let lat_period = match (grid.periodic_y, grid.uniform_lat_spacing()) {
        (true, Some(dlat)) => Some(dlat * nlat as f64),
        _ => None,
    };

    let r_inv = 1.0 / R_EARTH;
    let r2_inv = r_inv * r_inv;
    let lambda = settings.tikhov_laplace / scale_factor;

    for ilat in 0..nlat {
        let is_pole = grid.is_pole_row(ilat);
        let cos_lat = grid.lat[ilat].cos();
        let tan_lat = grid.lat[ilat].tan();
        let sec_lat = if cos_lat.abs() > 1e-12 {
            1.0 / cos_lat
        } else {
            0.0
        };

        for ilon in 0..nlon {
            let idx = ilat * nlon + ilon;
            let weight = if settings.weight_err {
                grid.area(ilat, ilon).sqrt()
            } else {
                1.0
            };

            let lon_water =
                |j: usize| !settings.use_mask || grid.water(0, 0, ilat, j);
            let lat_water =
                |i: usize| !settings.use_mask || grid.water(0, 0, i, ilon);

            if !is_pole {
                // Velocity-matching rows.
                if let Some(st) = build_stencil(
                    lon_coords,
                    lon_period,
                    ilon,
                    1,
                    settings.diff_order,
                    lon_water,
                ) {
                    for (off, &w) in st.span().zip(st.weights.iter()) {
                        let dcol = ilat * nlon + wrap_index(off, nlon);
                        let val = w * sec_lat * r_inv * weight;
                        builder.add(npts + idx, dcol, val); // u_lat ← Ψ
                        builder.add(idx, npts + dcol, val); // u_lon ← Φ
                    }
                }
                if let Some(st) = build_stencil(
                    lat_coords,
                    lat_period,
                    ilat,
                    1,
                    settings.diff_order,
                    lat_water,
                ) {
                    for (off, &w) in st.span().zip(st.weights.iter()) {
                        let dcol = wrap_index(off, nlat) * nlon + ilon;
                        let val = w * r_inv * weight;
                        builder.add(idx, dcol, -val); // u_lon ← Ψ
                        builder.add(npts + idx, npts + dcol, val); // u_lat ← Φ
                    }
                }
            }

            if ilat == 0 && settings.tikhov_laplace == 0.0 {
                // Pin the Laplacian null space: force the pole-most row
                // to be zonally constant in each potential.
                if let Some(st) = build_stencil(
                    lon_coords,
                    lon_period,
                    ilon,
                    1,
                    settings.diff_order,
                    lon_water,
                ) {
                    for (off, &w) in st.span().zip(st.weights.iter()) {
                        let dcol = ilat * nlon + wrap_index(off, nlon);
                        let val = w * sec_lat * r_inv * weight;
                        builder.add(2 * npts + idx, npts + dcol, val); // Φ
                        builder.add(3 * npts + idx, dcol, val); // Ψ
                    }
                }
            } else if !is_pole && settings.tikhov_laplace > 0.0 {
                // Spherical Laplacian rows, matching vorticity (of Ψ)
                // and divergence (of Φ).
                if let Some(st) = build_stencil(
                    lon_coords,
                    lon_period,
                    ilon,
                    2,
                    settings.diff_order,
                    lon_water,
                ) {
                    for (off, &w) in st.span().zip(st.weights.iter()) {
                        let dcol = ilat * nlon + wrap_index(off, nlon);
                        let val = w * sec_lat * sec_lat * r2_inv * lambda * weight;
                        builder.add(2 * npts + idx, dcol, val);
                        builder.add(3 * npts + idx, npts + dcol, val);
                    }
                }
                if let Some(st) = build_stencil(
                    lat_coords,
                    lat_period,
                    ilat,
                    2,
                    settings.diff_order,
                    lat_water,
                ) {
                    for (off, &w) in st.span().zip(st.weights.iter()) {
                        let dcol = wrap_index(off, nlat) * nlon + ilon;
                        let val = w * r2_inv * lambda * weight;
                        builder.add(2 * npts + idx, dcol, val);
                        builder.add(3 * npts + idx, npts + dcol, val);
                    }
                }
                if let Some(st) = build_stencil(
                    lat_coords,
                    lat_period,
                    ilat,
                    1,
                    settings.diff_order,
                    lat_water,
                ) {
                    for (off, &w) in st.span().zip(st.weights.iter()) {
                        let dcol = wrap_index(off, nlat) * nlon + ilon;
                        let val = -w * tan_lat * r2_inv * lambda * weight;
                        builder.add(2 * npts + idx, dcol, val);
                        builder.add(3 * npts + idx, npts + dcol, val);
                    }
                }
            }
        }
    }

    builder.build()
}

/// Project the velocity field. `u_lon`/`u_lat` are scrubbed in place
/// (land zeroed, corrupt samples removed) before solving.
pub fn apply_projection(
    u_lon: &mut Array4<f64>,
    u_lat: &mut Array4<f64>,
    grid: &Grid,
    settings: &ProjectionSettings,
    seed: &ProjectionSeed,
) -> SieveResult<ProjectionOutput> {
    let dim = u_lon.dim();
    if dim != grid.mask.dim() || dim != u_lat.dim() {
        return Err(SieveError::ShapeMismatch(format!(
            "velocity shape {:?} does not match grid mask {:?}",
            dim,
            grid.mask.dim()
        )));
    }
    let (ntime, ndepth, nlat, nlon) = dim;
    let npts = nlat * nlon;

    match seed {
        ProjectionSeed::Single { psi, phi }
            if psi.dim() != (nlat, nlon) || phi.dim() != (nlat, nlon) =>
        {
            return Err(SieveError::ShapeMismatch(format!(
                "seed shape {:?} does not match the horizontal grid ({nlat}, {nlon})",
                psi.dim()
            )));
        }
        ProjectionSeed::PerSlice { psi, phi } if psi.dim() != dim || phi.dim() != dim => {
            return Err(SieveError::ShapeMismatch(format!(
                "per-slice seed shape {:?} does not match the velocity shape {dim:?}",
                psi.dim()
            )));
        }
        _ => {}
    }

    scrub_velocity(u_lon, u_lat, grid);

    let scale_factor = deriv_scale_factor(grid, settings.diff_order);
    info!(
        deriv_scale_factor = scale_factor,
        "assembling the least-squares operator"
    );
    let matrix = assemble_operator(grid, settings, scale_factor);
    debug!(nnz = matrix.nnz(), rows = 4 * npts, cols = 2 * npts, "operator assembled");
    let lsqr_config = LsqrConfig::with_tolerance(settings.rel_tol, settings.max_iters);
    let lambda = settings.tikhov_laplace / scale_factor;

    let mut out = ProjectionOutput {
        psi: Array4::zeros(dim),
        phi: Array4::zeros(dim),
        u_lon_tor: Array4::zeros(dim),
        u_lat_tor: Array4::zeros(dim),
        u_lon_pot: Array4::zeros(dim),
        u_lat_pot: Array4::zeros(dim),
        report: ProjectionReport {
            total_area: Array2::zeros((ntime, ndepth)),
            projection_2error: Array2::zeros((ntime, ndepth)),
            projection_inferror: Array2::zeros((ntime, ndepth)),
            velocity_2norm: Array2::zeros((ntime, ndepth)),
            velocity_infnorm: Array2::zeros((ntime, ndepth)),
            toroidal_ke: Array2::zeros((ntime, ndepth)),
            potential_ke: Array2::zeros((ntime, ndepth)),
            projection_ke: Array2::zeros((ntime, ndepth)),
            iterations: Array2::zeros((ntime, ndepth)),
            terminations: TerminationCounts::default(),
        },
    };

    let (mut seed_psi, mut seed_phi) = match seed {
        ProjectionSeed::Zero | ProjectionSeed::PerSlice { .. } => {
            (Array2::zeros((nlat, nlon)), Array2::zeros((nlat, nlon)))
        }
        ProjectionSeed::Single { psi, phi } => (psi.clone(), phi.clone()),
    };

    let mut rhs = vec![0.0; 4 * npts];
    let mut solution = vec![0.0; 2 * npts];

    for itime in 0..ntime {
        for idepth in 0..ndepth {
            if let ProjectionSeed::PerSlice { psi, phi } = seed {
                seed_psi.assign(&psi.slice(s![itime, idepth, .., ..]));
                seed_phi.assign(&phi.slice(s![itime, idepth, .., ..]));
            }

            // Velocity carried by the seed; the solve works on what is
            // left over.
            let (tor_seed_lon, tor_seed_lat) = toroidal_vel_slice(
                grid,
                seed_psi.view(),
                itime,
                idepth,
                settings.diff_order,
                settings.use_mask,
            );
            let (pot_seed_lon, pot_seed_lat) = potential_vel_slice(
                grid,
                seed_phi.view(),
                itime,
                idepth,
                settings.diff_order,
                settings.use_mask,
            );

            let mut rem_lon = Array2::zeros((nlat, nlon));
            let mut rem_lat = Array2::zeros((nlat, nlon));
            for ilat in 0..nlat {
                for ilon in 0..nlon {
                    rem_lon[[ilat, ilon]] = u_lon[[itime, idepth, ilat, ilon]]
                        - tor_seed_lon[[ilat, ilon]]
                        - pot_seed_lon[[ilat, ilon]];
                    rem_lat[[ilat, ilon]] = u_lat[[itime, idepth, ilat, ilon]]
                        - tor_seed_lat[[ilat, ilon]]
                        - pot_seed_lat[[ilat, ilon]];
                }
            }

            for ilat in 0..nlat {
                let is_pole = grid.is_pole_row(ilat);
                for ilon in 0..nlon {
                    let idx = ilat * nlon + ilon;
                    let point = vorticity_at_point(
                        grid,
                        rem_lon.view(),
                        rem_lat.view(),
                        itime,
                        idepth,
                        ilat,
                        ilon,
                        settings.diff_order,
                        settings.use_mask,
                    );
                    rhs[idx] = rem_lon[[ilat, ilon]];
                    rhs[npts + idx] = rem_lat[[ilat, ilon]];
                    if ilat == 0 || is_pole {
                        rhs[2 * npts + idx] = 0.0;
                        rhs[3 * npts + idx] = 0.0;
                    } else {
                        rhs[2 * npts + idx] = point.vort_r * lambda;
                        rhs[3 * npts + idx] = point.divergence * lambda;
                    }
                    if settings.weight_err {
                        let w = grid.area(ilat, ilon).sqrt();
                        rhs[idx] *= w;
                        rhs[npts + idx] *= w;
                        rhs[2 * npts + idx] *= w;
                        rhs[3 * npts + idx] *= w;
                    }
                }
            }

            let result = lsqr_solve(&matrix, &rhs, &mut solution, &lsqr_config);
            out.report.terminations.record(result.termination);
            out.report.iterations[[itime, idepth]] = result.iterations;
            match result.termination {
                LsqrTermination::IterationLimit => warn!(
                    itime,
                    idepth,
                    iterations = result.iterations,
                    residual = result.residual,
                    "LSQR hit the iteration cap; keeping best iterate"
                ),
                LsqrTermination::RoundOff => debug!(
                    itime,
                    idepth,
                    "LSQR stopped on round-off; keeping best iterate"
                ),
                _ => debug!(
                    itime,
                    idepth,
                    iterations = result.iterations,
                    residual = result.residual,
                    "slice projected"
                ),
            }

            let mut psi_slice = seed_psi.clone();
            let mut phi_slice = seed_phi.clone();
            for ilat in 0..nlat {
                for ilon in 0..nlon {
                    let idx = ilat * nlon + ilon;
                    psi_slice[[ilat, ilon]] += solution[idx];
                    phi_slice[[ilat, ilon]] += solution[npts + idx];
                }
            }

            let (tor_lon, tor_lat) = toroidal_vel_slice(
                grid,
                psi_slice.view(),
                itime,
                idepth,
                settings.diff_order,
                settings.use_mask,
            );
            let (pot_lon, pot_lat) = potential_vel_slice(
                grid,
                phi_slice.view(),
                itime,
                idepth,
                settings.diff_order,
                settings.use_mask,
            );

            out.psi.slice_mut(s![itime, idepth, .., ..]).assign(&psi_slice);
            out.phi.slice_mut(s![itime, idepth, .., ..]).assign(&phi_slice);
            out.u_lon_tor
                .slice_mut(s![itime, idepth, .., ..])
                .assign(&tor_lon);
            out.u_lat_tor
                .slice_mut(s![itime, idepth, .., ..])
                .assign(&tor_lat);
            out.u_lon_pot
                .slice_mut(s![itime, idepth, .., ..])
                .assign(&pot_lon);
            out.u_lat_pot
                .slice_mut(s![itime, idepth, .., ..])
                .assign(&pot_lat);

            // Without per-slice seeds, the freshest solution seeds the
            // next slice.
            if !matches!(seed, ProjectionSeed::PerSlice { .. }) {
                seed_psi = psi_slice;
                seed_phi = phi_slice;
            }
        }
    }

    let t = &out.report.terminations;
    info!(
        abs_tol = t.abs_tol,
        rel_tol = t.rel_tol,
        max_iter = t.max_iter,
        rounding = t.rounding,
        "projection termination counts"
    );

    compute_report_norms(&mut out, u_lon, u_lat, grid);
    Ok(out)
}

/// Area-weighted L² and L∞ norms of the projection error and the
/// decomposed energies, per slice.
fn compute_report_norms(
    out: &mut ProjectionOutput,
    u_lon: &Array4<f64>,
    u_lat: &Array4<f64>,
    grid: &Grid,
) {
    let (ntime, ndepth, nlat, nlon) = u_lon.dim();
    for itime in 0..ntime {
        for idepth in 0..ndepth {
            let mut total_area = 0.0;
            let mut error2 = 0.0;
            let mut error_inf: f64 = 0.0;
            let mut vel_inf: f64 = 0.0;
            let mut tor_ke = 0.0;
            let mut pot_ke = 0.0;
            let mut proj_ke = 0.0;
            let mut orig_ke = 0.0;

            for ilat in 0..nlat {
                for ilon in 0..nlon {
                    let idx = [itime, idepth, ilat, ilon];
                    let area = grid.area(ilat, ilon);
                    total_area += area;

                    let ut = out.u_lon_tor[idx];
                    let vt = out.u_lat_tor[idx];
                    let up = out.u_lon_pot[idx];
                    let vp = out.u_lat_pot[idx];
                    let du = u_lon[idx] - ut - up;
                    let dv = u_lat[idx] - vt - vp;

                    error2 += area * (du * du + dv * dv);
                    error_inf = error_inf.max((du * du + dv * dv).sqrt());
                    vel_inf = vel_inf
                        .max((u_lon[idx] * u_lon[idx] + u_lat[idx] * u_lat[idx]).sqrt());

                    tor_ke += area * (ut * ut + vt * vt);
                    pot_ke += area * (up * up + vp * vp);
                    proj_ke += area * ((ut + up) * (ut + up) + (vt + vp) * (vt + vp));
                    orig_ke += area * (u_lon[idx] * u_lon[idx] + u_lat[idx] * u_lat[idx]);
                }
            }

            out.report.total_area[[itime, idepth]] = total_area;
            out.report.projection_2error[[itime, idepth]] = (error2 / total_area).sqrt();
            out.report.projection_inferror[[itime, idepth]] = error_inf;
            out.report.velocity_2norm[[itime, idepth]] = (orig_ke / total_area).sqrt();
            out.report.velocity_infnorm[[itime, idepth]] = vel_inf;
            out.report.projection_ke[[itime, idepth]] = (proj_ke / total_area).sqrt();
            out.report.toroidal_ke[[itime, idepth]] = (tor_ke / total_area).sqrt();
            out.report.potential_ke[[itime, idepth]] = (pot_ke / total_area).sqrt();
        }
    }
}
