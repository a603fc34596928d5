//! Row-slab plumbing for the rayon loops: every parallel pass maps one
//! latitude row to a flat slab of values, and the slabs are scattered
//! back into the 4-D arrays serially.

use ndarray::Array2;

/// Offset of `(itime, idepth, ilon)` inside a latitude-row slab.
#[inline]
pub(crate) fn slab_offset(ndepth: usize, nlon: usize, itime: usize, idepth: usize, ilon: usize) -> usize {
    (itime * ndepth + idepth) * nlon + ilon
}

/// Assemble per-latitude rows (length `nlon`) into a 2-D slice array.
pub(crate) fn rows_to_array2(rows: &[Vec<f64>], nlon: usize) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), nlon));
    for (ilat, row) in rows.iter().enumerate() {
        for (ilon, &v) in row.iter().enumerate() {
            out[[ilat, ilon]] = v;
        }
    }
    out
}
