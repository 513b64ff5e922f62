//! Read (spec §4.4.2): decompose the requested range into per-subvolume
//! chunks, wind them concurrently, and merge the replies in logical order
//! — zero-filling any short-read gap once size reconciliation confirms
//! bytes should have been there.

use crate::error::{Result, StripeError};
use crate::geometry::Geometry;
use crate::offset::{reconcile_size, split};
use crate::subvolume::Iatt;

use super::Engine;

/// Outcome of a read fanout: the concatenated bytes in logical order and
/// the reconciled attributes (size set to the logical file size).
pub struct ReadOutcome {
    pub data: Vec<u8>,
    pub attr: Iatt,
}

struct ChunkReply {
    logical_offset: u64,
    requested: usize,
    data: Vec<u8>,
}

impl Engine {
    /// Reads `[offset, offset+len)` from the striped regular file at
    /// `path` (identical on every subvolume) using `geometry` (spec
    /// §4.4.2).
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any chunk's subvolume
    /// fails, or [`StripeError::NoGeometry`] if a chunk's owning
    /// subvolume index isn't in this engine's configured list.
    pub async fn read(&self, geometry: &Geometry, path: &str, offset: u64, len: usize) -> Result<ReadOutcome> {
        if len == 0 {
            return Ok(ReadOutcome {
                data: Vec::new(),
                attr: Iatt::default(),
            });
        }

        let chunks = split(geometry, offset, len as u64);
        let mut handles = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let subvolume = self
                .subvolume(geometry.subvolume(chunk.stripe_index))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            let logical_offset = chunk.logical_offset;
            handles.push(tokio::spawn(async move {
                subvolume
                    .read(&path, chunk.subvolume_offset, chunk.len as usize)
                    .await
                    .map(|reply| ChunkReply {
                        logical_offset,
                        requested: chunk.len as usize,
                        data: reply.data,
                    })
            }));
        }

        // Collected in dispatch order, which is logical-offset order —
        // spec §9's open question resolved by never reordering on
        // completion (child completions may race, this `Vec` index never
        // does).
        let mut replies = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = handle
                .await
                .map_err(|_| StripeError::Consistency("read child task panicked".into()))?;
            match result {
                Ok(reply) => replies.push(reply),
                Err(err) => {
                    return Err(StripeError::ChildFailed {
                        fop: "readv",
                        errno: err.errno,
                    });
                }
            }
        }

        let short_read = replies.iter().any(|r| r.data.len() < r.requested);

        // Each chunk owns exactly `requested` bytes of the merged buffer at
        // `logical_offset - offset`; whatever its subvolume didn't return
        // (a hole, or EOF within that stripe) stays zero-filled rather than
        // shifting later chunks down (spec §4.4.2 step 4).
        let mut data = vec![0u8; len];
        for reply in &replies {
            let start = (reply.logical_offset - offset) as usize;
            let n = reply.data.len().min(reply.requested);
            data[start..start + n].copy_from_slice(&reply.data[..n]);
        }

        let mut attr = Iatt::default();
        attr.size = if short_read {
            let sizes = self.fstat_all(geometry, path).await?;
            reconcile_size(geometry, &sizes)
        } else {
            offset + len as u64
        };

        Ok(ReadOutcome { data, attr })
    }

    /// Fans `getattr` out to every subvolume owning `path` under
    /// `geometry`, returning their raw per-subvolume sizes (spec §4.4.2
    /// step 4's "secondary fstat fan-out").
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn fstat_all(&self, geometry: &Geometry, path: &str) -> Result<Vec<u64>> {
        let mut handles = Vec::with_capacity(geometry.stripe_count());
        for i in 0..geometry.stripe_count() {
            let subvolume = self
                .subvolume(geometry.subvolume(i))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            handles.push(tokio::spawn(async move { subvolume.getattr(&path).await }));
        }
        let mut sizes = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = handle
                .await
                .map_err(|_| StripeError::Consistency("fstat child task panicked".into()))?;
            match result {
                Ok(attr) => sizes.push(attr.size),
                Err(err) => {
                    return Err(StripeError::ChildFailed {
                        fop: "fstat",
                        errno: err.errno,
                    });
                }
            }
        }
        Ok(sizes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PatternRules};
    use crate::subvolume::{MockSubvolume, Subvolume, SubvolumeId};
    use std::sync::Arc;

    async fn engine_with_file(count: u64, stripe_size: u64, coalesce: bool) -> (Engine, Geometry) {
        let subs: Vec<Arc<dyn Subvolume>> = (0..count)
            .map(|i| Arc::new(MockSubvolume::new(SubvolumeId::new(i))) as Arc<dyn Subvolume>)
            .collect();
        for (i, sv) in subs.iter().enumerate() {
            let xattrs = crate::geometry::StripeXattrs {
                stripe_size: stripe_size as i64,
                stripe_count: count as i32,
                stripe_index: i as i32,
                stripe_coalesce: i32::from(coalesce),
            };
            sv.create("/", "a.bin", 0o644, Some(xattrs), None).await.unwrap();
        }
        let config = Config::new(PatternRules::new(Vec::new(), stripe_size).unwrap(), true, coalesce);
        let geometry = Geometry::new(
            stripe_size,
            (0..count).map(SubvolumeId::new).collect(),
            coalesce,
        )
        .unwrap();
        (Engine::new(subs, config), geometry)
    }

    #[tokio::test]
    async fn read_merges_chunks_in_logical_order() {
        let (engine, geometry) = engine_with_file(4, 131072, true).await;
        for sv in engine.subvolumes() {
            sv.write("/a.bin", 0, &vec![0xAAu8; 131072]).await.unwrap();
        }
        let outcome = engine.read(&geometry, "/a.bin", 0, 524288).await.unwrap();
        assert_eq!(outcome.data.len(), 524288);
        assert!(outcome.data.iter().all(|&b| b == 0xAA));
        assert_eq!(outcome.attr.size, 524288);
    }

    #[tokio::test]
    async fn read_zero_fills_short_read_gap() {
        let (engine, geometry) = engine_with_file(4, 131072, true).await;
        // Only the owner of logical offset 200000 has data.
        let owner = crate::offset::owner(&geometry, 200_000);
        let sv = &engine.subvolumes()[owner];
        let backend_off = crate::offset::subvolume_offset(&geometry, 200_000);
        let mut buf = vec![0u8; backend_off as usize + 1];
        buf[backend_off as usize] = 0x5A;
        sv.write("/a.bin", 0, &buf).await.unwrap();

        let outcome = engine.read(&geometry, "/a.bin", 0, 524288).await.unwrap();
        assert_eq!(outcome.data.len(), 524288);
        assert_eq!(outcome.data[200_000], 0x5A);
        assert!(outcome.data[..200_000].iter().all(|&b| b == 0));
        assert_eq!(outcome.attr.size, 200_001);
    }
}
