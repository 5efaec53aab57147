//! Contiguous block decomposition of a globally ordered index space.
//!
//! The first `n % size` ranks receive one extra entry. Every rank can compute
//! the owner of any global position without communicating.

use std::ops::Range;

/// Positions `[start, end)` owned by `rank` when `n_global` entries are split
/// over `size` ranks.
pub fn block_range(n_global: usize, rank: usize, size: usize) -> Range<usize> {
    let size = size.max(1);
    let base = n_global / size;
    let extra = n_global % size;
    let start = rank * base + rank.min(extra);
    let len = base + usize::from(rank < extra);
    start..(start + len).min(n_global)
}

/// Rank owning global position `pos` under [`block_range`].
pub fn block_owner(pos: usize, n_global: usize, size: usize) -> usize {
    let size = size.max(1);
    let base = n_global / size;
    let extra = n_global % size;
    let big = extra * (base + 1);
    if pos < big {
        pos / (base + 1)
    } else if base == 0 {
        // Only reachable for out-of-range positions.
        size - 1
    } else {
        extra + (pos - big) / base
    }
}
