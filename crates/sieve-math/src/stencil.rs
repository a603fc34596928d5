//! Finite-difference stencils on non-uniform 1-D axes.
//!
//! A stencil of derivative order `d` and accuracy order `a` spans
//! `2⌊a/2⌋ + d` consecutive axis points. The preferred placement is
//! centred on the evaluation point; near a non-periodic boundary, or
//! when masked (land) cells intrude, the window slides toward the
//! interior until every point in it is usable. On periodic axes the
//! window wraps instead, and the returned `lower_bound` may be
//! negative; callers reduce indices modulo the axis length.
//!
//! Weights are obtained by inverting the local Vandermonde system in
//! coordinates relative to the evaluation point, which makes them exact
//! for polynomials up to degree `width − 1` on the supplied axis.

/// A one-dimensional derivative stencil: signed offset of the first
/// point plus one weight per point.
#[derive(Debug, Clone, PartialEq)]
pub struct Stencil {
    pub lower_bound: isize,
    pub weights: Vec<f64>,
}

impl Stencil {
    /// Indices covered by the stencil, unreduced.
    pub fn span(&self) -> std::ops::Range<isize> {
        self.lower_bound..self.lower_bound + self.weights.len() as isize
    }
}

/// Number of axis points a stencil spans.
pub fn stencil_width(deriv_order: usize, accuracy_order: usize) -> usize {
    2 * (accuracy_order / 2) + deriv_order
}

/// Reduce a signed axis index onto `[0, n)`.
#[inline]
pub fn wrap_index(idx: isize, n: usize) -> usize {
    idx.rem_euclid(n as isize) as usize
}

/// Build a derivative stencil at `center` on the axis `coords`.
///
/// `period` is `Some(p)` for a circular axis with circumference `p`
/// (2π for full-span longitude, `n·Δ` for a uniform periodic latitude);
/// `None` for a bounded axis. `water` reports, for a physical
/// (already-reduced) axis index, whether the cell is usable.
///
/// Returns `None` when no window of unmasked points containing `center`
/// exists; callers treat that as "skip this point".
pub fn build_stencil(
    coords: &[f64],
    period: Option<f64>,
    center: usize,
    deriv_order: usize,
    accuracy_order: usize,
    water: impl Fn(usize) -> bool,
) -> Option<Stencil> {
    let n = coords.len();
    let width = stencil_width(deriv_order, accuracy_order);
    if width > n || center >= n || !water(center) {
        return None;
    }

    let ideal = center as isize - ((width - 1) / 2) as isize;
    let lb = find_window(ideal, width, n, period.is_some(), center, &water)?;

    let xc = coords[center];
    let mut xi = vec![0.0; width];
    for (k, x) in xi.iter_mut().enumerate() {
        let idx = lb + k as isize;
        let phys = wrap_index(idx, n);
        let mut coord = coords[phys];
        if let Some(p) = period {
            if idx < 0 {
                coord -= p;
            } else if idx >= n as isize {
                coord += p;
            }
        }
        *x = coord - xc;
    }

    let weights = vandermonde_weights(&xi, deriv_order)?;
    Some(Stencil {
        lower_bound: lb,
        weights,
    })
}

/// Find the valid window closest to the ideal placement. Candidates are
/// tried in order of increasing displacement, alternating sides.
fn find_window(
    ideal: isize,
    width: usize,
    n: usize,
    periodic: bool,
    center: usize,
    water: &impl Fn(usize) -> bool,
) -> Option<isize> {
    let max_shift = n as isize;
    for shift in 0..=max_shift {
        for sign in [1isize, -1] {
            if shift == 0 && sign < 0 {
                continue;
            }
            let lb = ideal + sign * shift;
            // The window must still contain the evaluation point.
            if lb > center as isize || lb + width as isize <= center as isize {
                continue;
            }
            if !periodic && (lb < 0 || lb + width as isize > n as isize) {
                continue;
            }
            let ok = (0..width as isize).all(|k| water(wrap_index(lb + k, n)));
            if ok {
                return Some(lb);
            }
        }
    }
    None
}

/// Solve the Vandermonde system `Σ_j w_j ξ_j^k = k!·δ_{k,d}` by Gaussian
/// elimination with partial pivoting. The systems are tiny (≤ 8×8).
fn vandermonde_weights(xi: &[f64], deriv_order: usize) -> Option<Vec<f64>> {
    let w = xi.len();
    let mut a = vec![vec![0.0; w]; w];
    let mut rhs = vec![0.0; w];
    for k in 0..w {
        for (j, &x) in xi.iter().enumerate() {
            a[k][j] = x.powi(k as i32);
        }
    }
    rhs[deriv_order] = factorial(deriv_order);

    for col in 0..w {
        let mut pivot = col;
        for row in col + 1..w {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-300 {
            return None; // degenerate axis (coincident points)
        }
        a.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in col + 1..w {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..w {
                a[row][k] -= factor * a[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut weights = vec![0.0; w];
    for row in (0..w).rev() {
        let mut sum = rhs[row];
        for col in row + 1..w {
            sum -= a[row][col] * weights[col];
        }
        weights[row] = sum / a[row][row];
    }
    Some(weights)
}

fn factorial(n: usize) -> f64 {
    (1..=n).product::<usize>() as f64
}
