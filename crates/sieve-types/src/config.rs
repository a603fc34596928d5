// ─────────────────────────────────────────────────────────────────────
// SCPN Ocean Sieve — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::error::{SieveError, SieveResult};

/// Top-level engine configuration.
///
/// One immutable value read at startup and passed by reference through
/// all operators. `validate()` turns the build-time invariants of the
/// flag set into startup preconditions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SieveConfig {
    pub domain: DomainFlags,
    pub output: OutputFlags,
    pub physics: PhysicsParams,
    pub solver: SolverParams,
    pub filter: FilterParams,
}

/// Geometry of the horizontal grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainFlags {
    /// Planar (Cartesian) geometry. Not supported by the projection
    /// engine; `validate()` rejects it.
    pub cartesian: bool,
    /// Longitude axis is circular.
    pub periodic_x: bool,
    /// Latitude axis is circular (requires a uniform latitude grid).
    pub periodic_y: bool,
    pub uniform_lon_grid: bool,
    pub uniform_lat_grid: bool,
    /// Longitude spans the full 2π.
    pub full_lon_span: bool,
    /// Pole-extension preprocessing is handled by an external
    /// collaborator; the flag is recorded here so outputs can carry it.
    pub extend_domain_to_poles: bool,
}

impl Default for DomainFlags {
    fn default() -> Self {
        DomainFlags {
            cartesian: false,
            periodic_x: true,
            periodic_y: false,
            uniform_lon_grid: true,
            uniform_lat_grid: true,
            full_lon_span: true,
            extend_domain_to_poles: false,
        }
    }
}

/// Which product families the output collaborator should emit.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OutputFlags {
    pub minimal_output: bool,
    pub no_full_outputs: bool,
    pub apply_postprocess: bool,
    pub do_okuboweiss_analysis: bool,
    /// Filter the Helmholtz representation of the velocity dyad
    /// alongside Ψ and Φ.
    pub comp_pi_helmholtz: bool,
}

/// Physical constants as recorded with the outputs. The geometry
/// kernels use the compiled-in Earth radius.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsParams {
    pub rho0: f64,
    pub r_earth: f64,
    pub fill_value: f64,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        PhysicsParams {
            rho0: crate::constants::RHO0,
            r_earth: crate::constants::R_EARTH,
            fill_value: crate::constants::FILL_VALUE,
        }
    }
}

/// Helmholtz projection solver parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Relative and absolute LSQR tolerance.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Tikhonov weight on the Laplacian residual rows.
    pub tikhov_laplace: f64,
    /// Restrict stencils and averages to water cells.
    pub use_mask: bool,
    /// Weight each equation row by √dA.
    pub weight_err: bool,
    /// Finite-difference accuracy order (2, 4, or 6).
    pub diff_order: usize,
}

impl Default for SolverParams {
    fn default() -> Self {
        SolverParams {
            tolerance: 5e-3,
            max_iterations: 100_000,
            tikhov_laplace: 1.0,
            use_mask: false,
            weight_err: true,
            diff_order: 4,
        }
    }
}

/// Coarse-graining parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Filter scales ℓ in metres.
    pub scales: Vec<f64>,
    pub kernel: KernelShape,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            scales: vec![1.0e5, 2.5e5, 5.0e5],
            kernel: KernelShape::default(),
        }
    }
}

/// The closed set of smoothing kernel families.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum KernelShape {
    /// Sharp indicator of the geodesic disc of radius ℓ/2.
    TopHat,
    /// Smooth top-hat, `K(r) = ½(1 − tanh((r − 1)/δ))` with `r = 2d/ℓ`.
    TanhRamp { delta: f64 },
    /// `K(r) = exp(−2r²)`.
    Gaussian,
}

impl Default for KernelShape {
    fn default() -> Self {
        KernelShape::TanhRamp { delta: 0.1 }
    }
}

impl SieveConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> SieveResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Enforce the flag invariants at startup.
    pub fn validate(&self) -> SieveResult<()> {
        if self.domain.cartesian {
            return Err(SieveError::ConfigError(
                "Cartesian geometry is not handled by the spherical projection engine".to_string(),
            ));
        }
        if self.domain.periodic_y && !self.domain.uniform_lat_grid {
            return Err(SieveError::ConfigError(
                "periodic_y requires uniform_lat_grid".to_string(),
            ));
        }
        if self.output.no_full_outputs && !(self.output.apply_postprocess && self.output.minimal_output)
        {
            return Err(SieveError::ConfigError(
                "no_full_outputs requires apply_postprocess and minimal_output, \
                 otherwise nothing would be emitted"
                    .to_string(),
            ));
        }
        if !matches!(self.solver.diff_order, 2 | 4 | 6) {
            return Err(SieveError::ConfigError(format!(
                "diff_order must be 2, 4, or 6 (got {})",
                self.solver.diff_order
            )));
        }
        if self.solver.tolerance <= 0.0 {
            return Err(SieveError::ConfigError(
                "solver tolerance must be positive".to_string(),
            ));
        }
        if self.solver.tikhov_laplace < 0.0 {
            return Err(SieveError::ConfigError(
                "tikhov_laplace must be non-negative".to_string(),
            ));
        }
        if self.filter.scales.iter().any(|&s| s <= 0.0) {
            return Err(SieveError::ConfigError(
                "a zero or negative filter scale would NaN the kernel normalisation".to_string(),
            ));
        }
        if let KernelShape::TanhRamp { delta } = self.filter.kernel {
            if delta <= 0.0 {
                return Err(SieveError::ConfigError(
                    "tanh ramp width must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}
