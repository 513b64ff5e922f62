//! Offset Mapper (spec §3.2, §4.2): pure functions translating a logical
//! byte range into per-subvolume chunks, and reconciling per-subvolume
//! sizes back into a logical file size. Nothing here touches a subvolume —
//! every function is a closed-form computation over `(stripe_size,
//! stripe_count)` so the fanout engine (`crate::fanout`) and the offset
//! tests can exercise the geometry math without any IO.

use crate::geometry::Geometry;

/// `Chunk` is one subvolume's share of a logical byte range: the stripe
/// index that owns it, the offset to use against that subvolume (already
/// translated for sparse vs coalesced layout), and how many bytes of the
/// logical range land on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub stripe_index: usize,
    pub subvolume_offset: u64,
    pub logical_offset: u64,
    pub len: u64,
}

/// Returns the stripe index that owns logical byte `offset` (spec §4.2 "owner").
#[must_use]
pub fn owner(geometry: &Geometry, offset: u64) -> usize {
    let size = geometry.stripe_size();
    let count = geometry.stripe_count() as u64;
    ((offset / size) % count) as usize
}

/// Returns the per-subvolume file offset a logical `offset` maps to, given
/// whether the geometry uses the coalesced or sparse layout (spec §4.2).
///
/// In the sparse layout every subvolume holds one byte out of every
/// `stripe_size * stripe_count` logical bytes at the same relative
/// position, so the per-subvolume offset equals the logical "line" start
/// plus the within-stripe remainder. In the coalesced layout each
/// subvolume instead packs its stripes back-to-back with no holes, so the
/// mapping additionally divides the line number by `stripe_count`.
#[must_use]
pub fn subvolume_offset(geometry: &Geometry, offset: u64) -> u64 {
    if !geometry.coalesce() {
        // Sparse layout: every subvolume is written at the same offset the
        // logical byte lives at, leaving holes on non-owners (spec §6.1).
        return offset;
    }
    let size = geometry.stripe_size();
    let count = geometry.stripe_count() as u64;
    let line = offset / (size * count);
    let within = offset % size;
    line * size + within
}

/// Splits a logical `[offset, offset+len)` byte range into the ordered
/// sequence of per-subvolume chunks that cover it (spec §4.2, §4.4.3-4.4.4).
///
/// Chunks are returned in ascending logical-offset order; the caller
/// dispatches each to `geometry.subvolume(chunk.stripe_index)`.
#[must_use]
pub fn split(geometry: &Geometry, offset: u64, len: u64) -> Vec<Chunk> {
    if len == 0 {
        return Vec::new();
    }
    let size = geometry.stripe_size();
    let mut chunks = Vec::new();
    let mut pos = offset;
    let end = offset + len;
    while pos < end {
        let stripe_index = owner(geometry, pos);
        let stripe_start = (pos / size) * size;
        let stripe_end = stripe_start + size;
        let chunk_end = stripe_end.min(end);
        let chunk_len = chunk_end - pos;
        chunks.push(Chunk {
            stripe_index,
            subvolume_offset: subvolume_offset(geometry, pos),
            logical_offset: pos,
            len: chunk_len,
        });
        pos = chunk_end;
    }
    chunks
}

/// Reconciles the per-subvolume sizes reported by an `fstat`/`readv` fanout
/// into the single logical file size (spec §4.2 "size reconciliation").
///
/// This reconciliation is meaningful only for the **coalesced** layout,
/// where each subvolume reports only the bytes it owns: a subvolume's
/// on-disk size only tells us how far *that* subvolume's own stripes
/// extend. If it has a partial final stripe, that stripe is necessarily
/// the file's last one, and the logical size is exactly its offset plus
/// its length. If its last stripe is full, the file may or may not
/// continue past it — but then whichever subvolume actually holds the true
/// end will itself report a partial stripe (or, in the aligned case, every
/// subvolume agrees). Taking the maximum candidate across all subvolumes
/// recovers the logical size in both cases.
///
/// In the **sparse** layout every subvolume is written at its unmodified
/// logical offset (spec §6.1), so the owner of the final stripe already
/// reports the logical size directly and the per-subvolume candidates are
/// just the raw sizes themselves.
///
/// # Panics
/// Panics if `sizes.len() != geometry.stripe_count()`.
#[must_use]
pub fn reconcile_size(geometry: &Geometry, sizes: &[u64]) -> u64 {
    assert_eq!(sizes.len(), geometry.stripe_count());

    if !geometry.coalesce() {
        return sizes.iter().copied().max().unwrap_or(0);
    }

    let size = geometry.stripe_size();
    let count = geometry.stripe_count() as u64;

    sizes
        .iter()
        .enumerate()
        .map(|(index, &subvolume_size)| {
            let full_lines = subvolume_size / size;
            let remainder = subvolume_size % size;
            let index = index as u64;
            if remainder > 0 {
                full_lines * size * count + index * size + remainder
            } else if full_lines > 0 {
                (full_lines - 1) * size * count + index * size + size
            } else {
                0
            }
        })
        .max()
        .unwrap_or(0)
}

/// `TruncateTarget` is the per-subvolume truncate call the engine must issue
/// to realize a logical truncate to `size` (spec §4.4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncateTarget {
    pub stripe_index: usize,
    pub size: u64,
}

/// Computes the per-subvolume truncate targets for a logical truncate to
/// `new_size` (spec §4.2 "truncate target resolution"): subvolumes whose
/// stripes fall entirely before the new end-of-file are rounded up to the
/// next stripe-line boundary (their last owned stripe on that line is kept
/// whole), the subvolume holding the new EOF is truncated to its exact
/// partial length, and subvolumes past it are rounded down to the last
/// complete line so their stale tail data is dropped rather than left
/// dangling. Each of those three logical values is then mapped to a
/// backend offset via [`subvolume_offset`], which is the identity for
/// sparse layouts and the packed coalesced mapping otherwise.
#[must_use]
pub fn truncate_targets(geometry: &Geometry, new_size: u64) -> Vec<TruncateTarget> {
    let size = geometry.stripe_size();
    let count = geometry.stripe_count();
    let line_size = size * count as u64;
    let eof_index = if new_size == 0 {
        0
    } else {
        owner(geometry, new_size - 1)
    };
    let ceil_line = new_size.div_ceil(line_size) * line_size;
    let floor_line = (new_size / line_size) * line_size;

    (0..count)
        .map(|i| {
            let logical_target = match i.cmp(&eof_index) {
                std::cmp::Ordering::Less => ceil_line,
                std::cmp::Ordering::Equal => new_size,
                std::cmp::Ordering::Greater => floor_line,
            };
            TruncateTarget {
                stripe_index: i,
                size: subvolume_offset(geometry, logical_target),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subvolume::SubvolumeId;

    fn geometry(size: u64, count: usize, coalesce: bool) -> Geometry {
        let subs: Vec<SubvolumeId> = (0..count as u64).map(SubvolumeId::new).collect();
        Geometry::new(size, subs, coalesce).unwrap()
    }

    #[test]
    fn owner_cycles_through_subvolumes() {
        let g = geometry(1024, 3, false);
        assert_eq!(owner(&g, 0), 0);
        assert_eq!(owner(&g, 1024), 1);
        assert_eq!(owner(&g, 2048), 2);
        assert_eq!(owner(&g, 3072), 0);
        assert_eq!(owner(&g, 3072 + 500), 0);
    }

    #[test]
    fn sparse_subvolume_offset_is_the_identity() {
        let g = geometry(1024, 2, false);
        assert_eq!(subvolume_offset(&g, 0), 0);
        assert_eq!(subvolume_offset(&g, 1024), 1024);
        assert_eq!(subvolume_offset(&g, 2048), 2048);
        assert_eq!(subvolume_offset(&g, 1024 + 100), 1124);
    }

    #[test]
    fn coalesced_subvolume_offset_packs_stripes() {
        let g = geometry(1024, 2, true);
        assert_eq!(subvolume_offset(&g, 0), 0);
        assert_eq!(subvolume_offset(&g, 1024), 0);
        assert_eq!(subvolume_offset(&g, 2048), 1024);
        assert_eq!(subvolume_offset(&g, 3072), 1024);
    }

    #[test]
    fn split_a_range_within_one_stripe() {
        let g = geometry(1024, 2, false);
        let chunks = split(&g, 100, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].stripe_index, 0);
        assert_eq!(chunks[0].subvolume_offset, 100);
        assert_eq!(chunks[0].len, 50);
    }

    #[test]
    fn split_a_range_crossing_subvolumes() {
        let g = geometry(1024, 2, false);
        let chunks = split(&g, 1000, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].stripe_index, 0);
        assert_eq!(chunks[0].len, 24);
        assert_eq!(chunks[1].stripe_index, 1);
        assert_eq!(chunks[1].len, 76);
    }

    #[test]
    fn split_a_range_spanning_multiple_lines() {
        let g = geometry(1024, 2, false);
        let chunks = split(&g, 0, 1024 * 4);
        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.stripe_index, i % 2);
            assert_eq!(chunk.len, 1024);
        }
    }

    #[test]
    fn reconcile_size_of_evenly_filled_file() {
        let g = geometry(1024, 2, true);
        // 2048 logical bytes: each subvolume holds one full 1024-byte stripe.
        let sizes = [1024, 1024];
        assert_eq!(reconcile_size(&g, &sizes), 2048);
    }

    #[test]
    fn reconcile_size_with_partial_final_stripe() {
        let g = geometry(1024, 2, true);
        // Subvolume 0 holds a full 1024-byte stripe (line 0), subvolume 1
        // holds a 100-byte partial stripe (line 0): logical size 1124.
        let sizes = [1024, 100];
        assert_eq!(reconcile_size(&g, &sizes), 1124);
    }

    #[test]
    fn reconcile_size_in_sparse_layout_is_just_the_max_raw_size() {
        // Sparse layout (spec §4.2): every subvolume is written at its
        // unmodified logical offset, so the owner of the final stripe
        // already reports the logical size directly.
        let g = geometry(1024, 2, false);
        let sizes = [1024, 1124];
        assert_eq!(reconcile_size(&g, &sizes), 1124);
    }

    #[test]
    fn reconcile_size_of_empty_file() {
        let g = geometry(1024, 2, false);
        assert_eq!(reconcile_size(&g, &[0, 0]), 0);
    }

    #[test]
    fn truncate_targets_shrink_past_subvolumes_to_zero_coalesced() {
        let g = geometry(1024, 3, true);
        // New size 1124 lands in stripe line 0, owned by subvolume 1 (1024..2048),
        // at within-stripe offset 100. Coalesced backend offsets pack stripes,
        // so subvolume 0's one full owned stripe is still just 1024 bytes.
        let targets = truncate_targets(&g, 1124);
        assert_eq!(targets[0].size, 1024);
        assert_eq!(targets[1].size, 100);
        assert_eq!(targets[2].size, 0);
    }

    #[test]
    fn truncate_targets_use_raw_offsets_in_sparse_layout() {
        let g = geometry(1024, 3, false);
        // Same logical truncate as above, but sparse backend offsets equal
        // logical offsets unchanged: subvolumes before the EOF stripe are
        // rounded up to the next full line (3072), not packed to 1024.
        let targets = truncate_targets(&g, 1124);
        assert_eq!(targets[0].size, 3072);
        assert_eq!(targets[1].size, 1124);
        assert_eq!(targets[2].size, 0);
    }

    #[test]
    fn truncate_to_zero_zeroes_every_subvolume() {
        let g = geometry(1024, 2, false);
        let targets = truncate_targets(&g, 0);
        assert!(targets.iter().all(|t| t.size == 0));
    }
}
