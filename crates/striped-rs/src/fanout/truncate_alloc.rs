//! Truncate / Ftruncate (spec §4.4.4) and Fallocate / Discard / Zerofill
//! (spec §4.4.5): both resolve per-subvolume targets via
//! `crate::offset`, fan out concurrently, and reconcile pre/post
//! attributes.

use crate::error::{Result, StripeError};
use crate::geometry::Geometry;
use crate::offset::{reconcile_size, split, truncate_targets};
use crate::subvolume::Iatt;

use super::Engine;
use super::attr::AttrPair;

impl Engine {
    /// Truncates the striped file at `path` to `new_size` (spec §4.4.4).
    /// Every subvolume is touched — those entirely before the new EOF are
    /// rounded up to the next stripe-line, the EOF owner gets the exact
    /// partial length, and those past it are rounded down — so pre/post
    /// sizes are reconciled directly from the per-subvolume truncate
    /// replies rather than a separate fstat fanout.
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume's truncate
    /// call fails.
    pub async fn truncate(&self, geometry: &Geometry, path: &str, new_size: u64) -> Result<AttrPair> {
        let targets = truncate_targets(geometry, new_size);
        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let subvolume = self
                .subvolume(geometry.subvolume(target.stripe_index))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            handles.push(tokio::spawn(
                async move { subvolume.truncate(&path, target.size).await },
            ));
        }

        let mut pre_sizes = vec![0u64; handles.len()];
        let mut post_sizes = vec![0u64; handles.len()];
        let mut pre_blocks = 0u64;
        let mut post_blocks = 0u64;
        let mut pre_primary = None;
        let mut post_primary = None;
        for (i, handle) in handles.into_iter().enumerate() {
            let (pre, post) = handle
                .await
                .map_err(|_| StripeError::Consistency("truncate child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "truncate", errno: err.errno })?;
            pre_sizes[i] = pre.size;
            post_sizes[i] = post.size;
            pre_blocks += pre.blocks;
            post_blocks += post.blocks;
            if i == 0 {
                pre_primary = Some(pre);
                post_primary = Some(post);
            }
        }

        let mut pre = pre_primary.ok_or(StripeError::NoGeometry)?;
        let mut post = post_primary.ok_or(StripeError::NoGeometry)?;
        pre.size = reconcile_size(geometry, &pre_sizes);
        pre.blocks = pre_blocks;
        post.size = reconcile_size(geometry, &post_sizes);
        post.blocks = post_blocks;
        Ok(AttrPair { pre, post })
    }

    /// Fallocate/discard/zerofill over `[offset, offset+len)` (spec
    /// §4.4.5): chunked identically to write, one sub-request per chunk
    /// at the chunk's backend offset and length, with the first failing
    /// child's errno winning.
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any chunk's subvolume fails.
    pub async fn fallocate(&self, geometry: &Geometry, path: &str, offset: u64, len: u64, zero: bool) -> Result<AttrPair> {
        let pre = self.stat_merged(geometry, path).await?;
        let chunks = split(geometry, offset, len);
        let mut handles = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let subvolume = self
                .subvolume(geometry.subvolume(chunk.stripe_index))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            handles.push(tokio::spawn(async move {
                subvolume
                    .fallocate(&path, chunk.subvolume_offset, chunk.len, zero)
                    .await
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|_| StripeError::Consistency("fallocate child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "fallocate", errno: err.errno })?;
        }
        let post = self.stat_merged(geometry, path).await?;
        Ok(AttrPair { pre, post })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PatternRules};
    use crate::subvolume::{MockSubvolume, Subvolume, SubvolumeId};
    use std::sync::Arc;

    async fn engine_with_file(count: u64, stripe_size: u64, coalesce: bool, initial: u64) -> (Engine, Geometry) {
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
        let geometry = Geometry::new(stripe_size, (0..count).map(SubvolumeId::new).collect(), coalesce).unwrap();
        for sv in &subs {
            let target = crate::offset::subvolume_offset(&geometry, initial);
            sv.truncate("/a.bin", target).await.unwrap();
        }
        let config = Config::new(PatternRules::new(Vec::new(), stripe_size).unwrap(), true, coalesce);
        (Engine::new(subs, config), geometry)
    }

    #[tokio::test]
    async fn truncate_shrinks_to_scenario_targets() {
        // Mirrors spec §8's scenario 4: N=4, S=131072, truncate to 300000.
        let (engine, geometry) = engine_with_file(4, 131072, true, 131072 * 4).await;
        let result = engine.truncate(&geometry, "/a.bin", 300_000).await.unwrap();
        assert_eq!(result.post.size, 300_000);
        assert_eq!(engine.subvolumes()[0].raw_bytes("/a.bin").unwrap().len(), 131072);
        assert_eq!(engine.subvolumes()[1].raw_bytes("/a.bin").unwrap().len(), 131072);
        assert_eq!(engine.subvolumes()[2].raw_bytes("/a.bin").unwrap().len(), 37856);
        assert_eq!(engine.subvolumes()[3].raw_bytes("/a.bin").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn truncate_to_zero_empties_every_subvolume() {
        let (engine, geometry) = engine_with_file(3, 4096, true, 4096 * 3).await;
        let result = engine.truncate(&geometry, "/a.bin", 0).await.unwrap();
        assert_eq!(result.post.size, 0);
        for sv in engine.subvolumes() {
            assert!(sv.raw_bytes("/a.bin").unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn fallocate_extends_and_reconciles_size() {
        let (engine, geometry) = engine_with_file(2, 4096, true, 0).await;
        let result = engine.fallocate(&geometry, "/a.bin", 0, 8192, false).await.unwrap();
        assert_eq!(result.pre.size, 0);
        assert_eq!(result.post.size, 8192);
    }
}
