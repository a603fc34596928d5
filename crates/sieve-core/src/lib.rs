// ─────────────────────────────────────────────────────────────────────
// SCPN Ocean Sieve — Sieve Core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Helmholtz projection and geodesic coarse-graining of 2-D oceanic
//! velocity fields on the sphere.
//!
//! The two entry points are [`helmholtz::apply_projection`], which
//! splits `(u_lon, u_lat)` into toroidal and potential parts by sparse
//! least squares, and [`filtering::filter_helmholtz`], which
//! coarse-grains the decomposed flow over a list of filter scales and
//! derives the cascade diagnostics.

pub mod derivatives;
pub mod diagnostics;
pub mod domain;
pub mod filtering;
pub mod helmholtz;
pub mod kernel;
pub mod velocity;
pub mod vorticity;

mod rows;
