// ─────────────────────────────────────────────────────────────────────
// SCPN Ocean Sieve — Error
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SieveError {
    #[error("Solver failed on slice (time={time}, depth={depth}): {message}")]
    SolverFailed {
        time: usize,
        depth: usize,
        message: String,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Grid violation: {0}")]
    GridViolation(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Decomposition error: {0}")]
    Decomposition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SieveResult<T> = Result<T, SieveError>;
