// ─────────────────────────────────────────────────────────────────────
// SCPN Ocean Sieve — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Mean Earth radius (m).
pub const R_EARTH: f64 = 6.371e6;

/// Reference seawater density (kg/m³) used in all energy densities.
pub const RHO0: f64 = 1025.0;

/// Value written to diagnostic outputs over land.
pub const FILL_VALUE: f64 = -32767.0;

/// Velocity magnitudes above this (m/s) are treated as corrupt samples
/// and zeroed with a warning.
pub const BAD_VEL_THRESHOLD: f64 = 30000.0;

/// Latitude rows within this many degrees of ±90° are pole rows: the
/// projection skips their first-derivative rows and they can be masked
/// out entirely on request.
pub const POLE_TOL_DEGREES: f64 = 0.01;

/// Degrees → radians.
pub const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
