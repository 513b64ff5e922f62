//! Write (spec §4.4.3): decompose the requested range into per-subvolume
//! chunks exactly as read does, fan each chunk out to its owner, and walk
//! the replies in dispatch (logical) order so a partial failure reports
//! the exact contiguous prefix the caller can safely retry from — spec
//! §9's ordering open question, resolved identically to read's.

use crate::error::{Result, StripeError};
use crate::geometry::Geometry;
use crate::offset::split;
use crate::subvolume::Iatt;

use super::Engine;

/// Outcome of a write fanout: bytes actually written (the longest
/// contiguous logical prefix covered before any child failed) and the
/// pre/post attributes.
pub struct WriteOutcome {
    pub written: usize,
    pub pre: Iatt,
    pub post: Iatt,
}

struct ChunkReply {
    requested: usize,
    written: usize,
    errno: Option<i32>,
}

impl Engine {
    /// Writes `data` at `offset` into the striped regular file at `path`
    /// (spec §4.4.3).
    ///
    /// # Errors
    /// Returns [`StripeError::NoGeometry`] if a chunk's owning subvolume
    /// index isn't in this engine's configured list, or
    /// [`StripeError::Consistency`] if a child task panics. A failing
    /// child write is not itself an error here — it's reported back to
    /// the caller as a short write via `written`/the post attr, matching
    /// how a real write(2) can return fewer bytes than requested.
    pub async fn write(&self, geometry: &Geometry, path: &str, offset: u64, data: &[u8]) -> Result<WriteOutcome> {
        let pre = self.stat_merged(geometry, path).await?;

        if data.is_empty() {
            return Ok(WriteOutcome { written: 0, pre, post: pre });
        }

        let chunks = split(geometry, offset, data.len() as u64);
        let mut handles = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let subvolume = self
                .subvolume(geometry.subvolume(chunk.stripe_index))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            let start = (chunk.logical_offset - offset) as usize;
            let slice = data[start..start + chunk.len as usize].to_vec();
            handles.push(tokio::spawn(async move {
                let requested = slice.len();
                match subvolume.write(&path, chunk.subvolume_offset, &slice).await {
                    Ok(reply) => ChunkReply {
                        requested,
                        written: reply.written,
                        errno: None,
                    },
                    Err(err) => ChunkReply {
                        requested,
                        written: 0,
                        errno: Some(err.errno),
                    },
                }
            }));
        }

        // Collected in dispatch order, which is logical-offset order — the
        // same resolution read.rs gives spec §9's ordering question.
        let mut replies = Vec::with_capacity(handles.len());
        for handle in handles {
            replies.push(
                handle
                    .await
                    .map_err(|_| StripeError::Consistency("write child task panicked".into()))?,
            );
        }

        let mut written = 0usize;
        for reply in &replies {
            if reply.errno.is_some() {
                break;
            }
            written += reply.written;
            if reply.written < reply.requested {
                break;
            }
        }

        let post = self.stat_merged(geometry, path).await?;
        Ok(WriteOutcome { written, pre, post })
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
        let geometry = Geometry::new(stripe_size, (0..count).map(SubvolumeId::new).collect(), coalesce).unwrap();
        (Engine::new(subs, config), geometry)
    }

    #[tokio::test]
    async fn write_spans_multiple_subvolumes_and_reports_full_length() {
        let (engine, geometry) = engine_with_file(4, 131072, true).await;
        let data = vec![0xABu8; 524288];
        let outcome = engine.write(&geometry, "/a.bin", 0, &data).await.unwrap();
        assert_eq!(outcome.written, 524288);
        assert_eq!(outcome.post.size, 524288);
        for sv in engine.subvolumes() {
            assert_eq!(sv.raw_bytes("/a.bin").unwrap().len(), 131072);
        }
    }

    #[tokio::test]
    async fn write_stops_at_the_first_failing_child_in_logical_order() {
        // Mirrors spec §8's scenario 5: N=4, S=131072, EIO injected on
        // subvolume 2 while writing a request spanning all four stripes.
        let (engine, geometry) = engine_with_file(4, 131072, true).await;
        engine.subvolumes()[2].inject_failure(libc::EIO);
        let data = vec![0x11u8; 131072 * 4];
        let outcome = engine.write(&geometry, "/a.bin", 0, &data).await.unwrap();
        assert_eq!(outcome.written, 262144);
    }

    #[tokio::test]
    async fn empty_write_is_a_no_op() {
        let (engine, geometry) = engine_with_file(2, 4096, true).await;
        let outcome = engine.write(&geometry, "/a.bin", 0, &[]).await.unwrap();
        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.pre, outcome.post);
    }
}
