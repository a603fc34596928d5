// ─────────────────────────────────────────────────────────────────────
// SCPN Ocean Sieve — Rank Decomposition Scaffolding
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Deterministic decomposition of the outer (time, depth) product
//! across ranks, and the thread-level chunking used inside each rank.
//!
//! This module defines the partition metadata and the reduction merges;
//! it can be wired to an MPI binding in a later phase. Ranks never
//! communicate during inner computation, so everything a launcher needs
//! is which (time, depth) slab each rank owns.

use tracing::warn;

use sieve_types::error::{SieveError, SieveResult};

use crate::helmholtz::TerminationCounts;

/// How many ranks divide each outer axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorLayout {
    pub nprocs_in_time: usize,
    pub nprocs_in_depth: usize,
}

/// Clean up a requested rank layout against the actual axis sizes: a
/// size-1 axis takes a single rank and pushes the whole world onto the
/// other axis. The product must match the world size exactly.
pub fn check_processor_divisions(
    ntime: usize,
    ndepth: usize,
    requested_time: usize,
    requested_depth: usize,
    world_size: usize,
) -> SieveResult<ProcessorLayout> {
    if world_size == 0 {
        return Err(SieveError::Decomposition(
            "world size must be at least 1".to_string(),
        ));
    }
    let nprocs_in_time = if ntime == 1 {
        1
    } else if ndepth == 1 {
        world_size
    } else {
        requested_time
    };
    let nprocs_in_depth = if ndepth == 1 {
        1
    } else if ntime == 1 {
        world_size
    } else {
        requested_depth
    };

    if nprocs_in_time != requested_time {
        warn!(
            requested = requested_time,
            using = nprocs_in_time,
            "changing number of processors in time"
        );
    }
    if nprocs_in_depth != requested_depth {
        warn!(
            requested = requested_depth,
            using = nprocs_in_depth,
            "changing number of processors in depth"
        );
    }

    if nprocs_in_time * nprocs_in_depth != world_size {
        return Err(SieveError::Decomposition(format!(
            "processor grid {nprocs_in_time}×{nprocs_in_depth} does not match world size {world_size}"
        )));
    }
    if nprocs_in_time > ntime || nprocs_in_depth > ndepth {
        return Err(SieveError::Decomposition(format!(
            "cannot split (time={ntime}, depth={ndepth}) across \
             {nprocs_in_time}×{nprocs_in_depth} ranks"
        )));
    }
    Ok(ProcessorLayout {
        nprocs_in_time,
        nprocs_in_depth,
    })
}

/// The (time, depth) slab owned by one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slab {
    pub rank: usize,
    pub time_start: usize,
    pub time_count: usize,
    pub depth_start: usize,
    pub depth_count: usize,
}

fn block_partition(n: usize, parts: usize) -> Vec<(usize, usize)> {
    let base = n / parts;
    let rem = n % parts;
    let mut out = Vec::with_capacity(parts);
    let mut cursor = 0;
    for p in 0..parts {
        let count = base + usize::from(p < rem);
        out.push((cursor, count));
        cursor += count;
    }
    out
}

/// Partition the (time, depth) product over the rank grid. Rank order
/// is row-major in (time, depth).
pub fn decompose_time_depth(
    ntime: usize,
    ndepth: usize,
    layout: ProcessorLayout,
) -> SieveResult<Vec<Slab>> {
    if layout.nprocs_in_time == 0 || layout.nprocs_in_depth == 0 {
        return Err(SieveError::Decomposition(
            "processor grid must be at least 1×1".to_string(),
        ));
    }
    if layout.nprocs_in_time > ntime || layout.nprocs_in_depth > ndepth {
        return Err(SieveError::Decomposition(format!(
            "cannot split (time={ntime}, depth={ndepth}) across \
             {}×{} ranks",
            layout.nprocs_in_time, layout.nprocs_in_depth
        )));
    }
    let time_blocks = block_partition(ntime, layout.nprocs_in_time);
    let depth_blocks = block_partition(ndepth, layout.nprocs_in_depth);
    let mut slabs = Vec::with_capacity(layout.nprocs_in_time * layout.nprocs_in_depth);
    for &(time_start, time_count) in &time_blocks {
        for &(depth_start, depth_count) in &depth_blocks {
            slabs.push(Slab {
                rank: slabs.len(),
                time_start,
                time_count,
                depth_start,
                depth_count,
            });
        }
    }
    Ok(slabs)
}

/// Chunk size for the dynamic thread schedule over spatial points.
pub fn thread_chunk_size(nlat: usize, nlon: usize, num_threads: usize) -> usize {
    (nlat * nlon / (64 * num_threads.max(1))).max(1)
}

/// Reduce per-rank termination tallies to the global tally reported by
/// rank 0.
pub fn merge_termination_counts(per_rank: &[TerminationCounts]) -> TerminationCounts {
    let mut total = TerminationCounts::default();
    for counts in per_rank {
        total.merge(counts);
    }
    total
}
