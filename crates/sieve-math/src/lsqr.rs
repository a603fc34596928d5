// ─────────────────────────────────────────────────────────────────────
// SCPN Ocean Sieve — LSQR
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! LSQR solver for sparse least-squares problems `min ‖Ax − b‖₂`
//! (Paige & Saunders, 1982).
//!
//! LSQR runs Golub-Kahan bidiagonalisation of `A`, updating the
//! solution through a QR factorisation of the lower-bidiagonal system
//! carried by plane rotations. It only touches `A` through `A·v` and
//! `Aᵀ·u` products, so the CRS operator stays immutable and shared.
//!
//! Termination follows the usual taxonomy: a compatible-system exit on
//! the residual norm, a least-squares exit on the normal-equation
//! residual, an iteration cap, and a round-off exit when further
//! progress is below working precision. The round-off and cap exits are
//! non-fatal for callers: the best iterate found so far is in `x`.

use crate::sparse::CrsMatrix;

/// Stopping control for one LSQR run.
#[derive(Debug, Clone)]
pub struct LsqrConfig {
    /// Least-squares tolerance on `‖Aᵀr‖/(‖A‖·‖r‖)`.
    pub atol: f64,
    /// Compatible-system tolerance on `‖r‖/‖b‖`.
    pub btol: f64,
    pub max_iters: usize,
}

impl LsqrConfig {
    /// Both tolerances set to the same relative tolerance, which is how
    /// the projection solver drives LSQR.
    pub fn with_tolerance(rel_tol: f64, max_iters: usize) -> Self {
        LsqrConfig {
            atol: rel_tol,
            btol: rel_tol,
            max_iters,
        }
    }
}

/// Why LSQR stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsqrTermination {
    /// `‖r‖ ≤ btol·‖b‖ + atol·‖A‖·‖x‖`: x solves the system.
    AbsoluteTolerance,
    /// `‖Aᵀr‖ ≤ atol·‖A‖·‖r‖`: x solves the least-squares problem.
    RelativeTolerance,
    /// Iteration cap reached; best iterate kept.
    IterationLimit,
    /// Rounding errors prevent further progress; best iterate kept.
    RoundOff,
}

#[derive(Debug, Clone)]
pub struct LsqrResult {
    pub iterations: usize,
    /// Final residual norm ‖b − Ax‖₂.
    pub residual: f64,
    pub termination: LsqrTermination,
}

#[inline]
fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

#[inline]
fn scale(alpha: f64, v: &mut [f64]) {
    for x in v.iter_mut() {
        *x *= alpha;
    }
}

/// Solve `min ‖Ax − b‖₂` from a zero initial iterate. `x` is
/// overwritten with the solution.
pub fn lsqr_solve(a: &CrsMatrix, b: &[f64], x: &mut [f64], config: &LsqrConfig) -> LsqrResult {
    let m = a.nrows();
    let n = a.ncols();
    assert_eq!(b.len(), m, "lsqr_solve: rhs length");
    assert_eq!(x.len(), n, "lsqr_solve: solution length");

    x.fill(0.0);

    let mut u = b.to_vec();
    let mut beta = norm2(&u);
    let bnorm = beta;
    if bnorm == 0.0 {
        return LsqrResult {
            iterations: 0,
            residual: 0.0,
            termination: LsqrTermination::AbsoluteTolerance,
        };
    }
    scale(1.0 / beta, &mut u);

    let mut v = vec![0.0; n];
    a.mul_transpose_vec(&u, &mut v);
    let mut alfa = norm2(&v);
    if alfa == 0.0 {
        // b is orthogonal to the range of A: x = 0 is the LS solution.
        return LsqrResult {
            iterations: 0,
            residual: bnorm,
            termination: LsqrTermination::RelativeTolerance,
        };
    }
    scale(1.0 / alfa, &mut v);

    let mut w = v.clone();
    let mut rhobar = alfa;
    let mut phibar = beta;
    let mut anorm: f64 = 0.0;
    let mut rnorm = beta;

    let mut tmp_m = vec![0.0; m];
    let mut tmp_n = vec![0.0; n];

    for itn in 1..=config.max_iters {
        // Bidiagonalisation step: u = A v − α u, v = Aᵀ u − β v.
        a.mul_vec(&v, &mut tmp_m);
        for (ui, &ti) in u.iter_mut().zip(tmp_m.iter()) {
            *ui = ti - alfa * *ui;
        }
        beta = norm2(&u);
        if beta > 0.0 {
            scale(1.0 / beta, &mut u);
            anorm = (anorm * anorm + alfa * alfa + beta * beta).sqrt();
            a.mul_transpose_vec(&u, &mut tmp_n);
            for (vi, &ti) in v.iter_mut().zip(tmp_n.iter()) {
                *vi = ti - beta * *vi;
            }
            alfa = norm2(&v);
            if alfa > 0.0 {
                scale(1.0 / alfa, &mut v);
            }
        } else {
            anorm = (anorm * anorm + alfa * alfa).sqrt();
        }

        // Plane rotation eliminating the subdiagonal β.
        let rho = rhobar.hypot(beta);
        let cs = rhobar / rho;
        let sn = beta / rho;
        let theta = sn * alfa;
        rhobar = -cs * alfa;
        let phi = cs * phibar;
        phibar *= sn;

        // Update x and the search direction.
        let t1 = phi / rho;
        let t2 = -theta / rho;
        for j in 0..n {
            x[j] += t1 * w[j];
            w[j] = v[j] + t2 * w[j];
        }

        rnorm = phibar;
        let arnorm = alfa * (cs * phibar).abs();
        let xnorm = norm2(x);

        let test1 = rnorm / bnorm;
        let test2 = if anorm > 0.0 && rnorm > 0.0 {
            arnorm / (anorm * rnorm)
        } else {
            0.0
        };
        let rtol = config.btol + config.atol * anorm * xnorm / bnorm;

        // The convergence exits take precedence over the round-off
        // exits when both fire on the same iteration.
        let t1_damped = test1 / (1.0 + anorm * xnorm / bnorm);
        let termination = if test1 <= rtol {
            Some(LsqrTermination::AbsoluteTolerance)
        } else if test2 <= config.atol {
            Some(LsqrTermination::RelativeTolerance)
        } else if 1.0 + test2 <= 1.0 || 1.0 + t1_damped <= 1.0 {
            // Further progress is below working precision.
            Some(LsqrTermination::RoundOff)
        } else {
            None
        };
        if let Some(termination) = termination {
            return LsqrResult {
                iterations: itn,
                residual: rnorm,
                termination,
            };
        }
    }

    LsqrResult {
        iterations: config.max_iters,
        residual: rnorm,
        termination: LsqrTermination::IterationLimit,
    }
}
