//! Lookup (spec §4.4.1): fan out to all N subvolumes, run geometry
//! discovery (`crate::geometry::discover`) over the replies, and schedule
//! best-effort self-heal for subvolumes that disagree.
//!
//! The fanout/reconciliation core is factored out as [`run_discovery`] so
//! `readdirp` (spec §4.4.10) can reuse the same size reconciliation and
//! self-heal scheduling for directory entries that don't yet have an
//! allocated inode to cache geometry under.

use std::sync::Arc;

use crate::error::{Result, StripeError};
use crate::geometry::{DiscoveryReply, Geometry, discover};
use crate::heal::heal_missing_entry;
use crate::offset::reconcile_size;
use crate::subvolume::{ChildError, Iatt, Subvolume, SubvolumeId};

use super::Engine;

/// Outcome of a lookup fanout: the merged attributes and, for a striped
/// regular file, the newly-discovered (and now-published) geometry.
pub struct LookupOutcome {
    pub attr: Iatt,
    pub geometry: Option<Arc<Geometry>>,
}

pub(super) struct DiscoveredEntry {
    pub attr: Iatt,
    pub geometry: Option<Geometry>,
    pub needs_xattr_heal_subvolumes: Vec<SubvolumeId>,
    pub missing: Vec<(SubvolumeId, Arc<dyn Subvolume>)>,
}

struct ChildLookup {
    subvolume: Arc<dyn Subvolume>,
    attr: std::result::Result<Iatt, ChildError>,
}

impl Engine {
    /// Fans a `lookup(parent, name)` out to all subvolumes, publishes any
    /// discovered geometry under `inode`, and schedules self-heal (spec
    /// §4.4.1).
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if the primary subvolume (child
    /// 0) returns `ENOENT` or any subvolume fails with something other
    /// than `ENOENT`; returns [`StripeError::Consistency`] if replies
    /// disagree on `stripe-count` or gfid.
    pub async fn lookup(&self, inode: u64, parent: &str, name: &str) -> Result<LookupOutcome> {
        let discovered = run_discovery(self, parent, name).await?;
        let mut geometry = None;
        if let Some(g) = discovered.geometry {
            geometry = Some(self.cache().publish_or_get(inode, g));
        }
        for id in discovered.needs_xattr_heal_subvolumes {
            self.mark_degraded(inode, id);
        }
        if !discovered.missing.is_empty() {
            schedule_entry_heal(self, parent, name, discovered.attr, discovered.missing, geometry.as_deref());
        }
        Ok(LookupOutcome {
            attr: discovered.attr,
            geometry,
        })
    }
}

/// Runs the fan-out + discovery + size reconciliation core of `lookup`
/// without touching the inode geometry cache, so callers that don't yet
/// have an allocated inode for this entry (spec §4.4.10's `readdirp`
/// follow-up) can still reconcile size/blocks.
///
/// # Errors
/// See [`Engine::lookup`].
pub(super) async fn run_discovery(engine: &Engine, parent: &str, name: &str) -> Result<DiscoveredEntry> {
    let mut handles = Vec::with_capacity(engine.stripe_count());
    for sv in engine.subvolumes() {
        let sv = sv.clone();
        let parent = parent.to_string();
        let name = name.to_string();
        handles.push(tokio::spawn(async move {
            let attr = sv.lookup(&parent, &name).await;
            ChildLookup { subvolume: sv, attr }
        }));
    }

    let mut children = Vec::with_capacity(handles.len());
    for handle in handles {
        children.push(
            handle
                .await
                .map_err(|_| StripeError::Consistency("lookup child task panicked".into()))?,
        );
    }

    // Primary subvolume (child 0) is authoritative: ENOENT there is fatal.
    if let Err(err) = &children[0].attr {
        if err.errno == libc::ENOENT {
            return Err(StripeError::ChildFailed {
                fop: "lookup",
                errno: libc::ENOENT,
            });
        }
    }

    let mut sizes = vec![0u64; children.len()];
    let mut gfid: Option<[u8; 16]> = None;
    let mut primary_attr: Option<Iatt> = None;
    let mut total_blocks = 0u64;
    let mut discovery_replies = Vec::with_capacity(children.len());
    let mut missing: Vec<(SubvolumeId, Arc<dyn Subvolume>)> = Vec::new();

    for (i, child) in children.iter().enumerate() {
        match &child.attr {
            Ok(attr) => {
                sizes[i] = attr.size;
                if i == 0 {
                    primary_attr = Some(*attr);
                }
                if !attr.is_dir {
                    total_blocks += attr.blocks;
                    match gfid {
                        None => gfid = Some(attr.gfid),
                        Some(existing) if existing != attr.gfid => {
                            return Err(StripeError::Consistency(format!(
                                "gfid mismatch from subvolume {}",
                                child.subvolume.id().index()
                            )));
                        }
                        Some(_) => {}
                    }
                    let xattrs = fetch_stripe_xattrs(child.subvolume.as_ref(), &join(parent, name)).await;
                    discovery_replies.push(DiscoveryReply {
                        subvolume: child.subvolume.id(),
                        stripe_size: xattrs.0,
                        stripe_count: xattrs.1,
                        stripe_index: xattrs.2,
                        stripe_coalesce: xattrs.3,
                        enoent: false,
                    });
                }
            }
            Err(err) if err.errno == libc::ENOENT => {
                missing.push((child.subvolume.id(), child.subvolume.clone()));
                discovery_replies.push(DiscoveryReply {
                    subvolume: child.subvolume.id(),
                    stripe_size: None,
                    stripe_count: None,
                    stripe_index: None,
                    stripe_coalesce: None,
                    enoent: true,
                });
            }
            Err(err) => {
                return Err(StripeError::ChildFailed {
                    fop: "lookup",
                    errno: err.errno,
                });
            }
        }
    }

    let mut attr = primary_attr.ok_or(StripeError::ChildFailed {
        fop: "lookup",
        errno: libc::ENOENT,
    })?;

    let mut geometry = None;
    let mut needs_xattr_heal_subvolumes = Vec::new();
    if !attr.is_dir {
        attr.blocks = total_blocks;
        let discovery = discover(&discovery_replies)?;
        if discovery.needs_xattr_heal {
            // `missing` is the ENOENT set; a subvolume flagged here is the
            // opposite case — present, but missing one of the first three
            // geometry xattrs (spec §4.1 step 2) — so it's read back off
            // the discovery replies themselves, not off `missing`.
            needs_xattr_heal_subvolumes = discovery_replies
                .iter()
                .filter(|reply| {
                    !reply.enoent
                        && !(reply.stripe_size.is_some() && reply.stripe_count.is_some() && reply.stripe_index.is_some())
                })
                .map(|reply| reply.subvolume)
                .collect();
        }
        if let Some(g) = discovery.geometry {
            attr.size = reconcile_size(&g, &sizes);
            geometry = Some(g);
        }
    }

    Ok(DiscoveredEntry {
        attr,
        geometry,
        needs_xattr_heal_subvolumes,
        missing,
    })
}

pub(super) fn schedule_entry_heal(
    engine: &Engine,
    parent: &str,
    name: &str,
    primary: Iatt,
    missing: Vec<(SubvolumeId, Arc<dyn Subvolume>)>,
    geometry: Option<&Geometry>,
) {
    let stripe_size = geometry.map_or(engine.config().patterns.default_block_size(), Geometry::stripe_size);
    let stripe_count = engine.stripe_count();
    let coalesce = geometry.map_or(engine.config().coalesce, Geometry::coalesce);
    let parent = parent.to_string();
    let name = name.to_string();
    for (id, subvolume) in missing {
        let parent = parent.clone();
        let name = name.clone();
        let stripe_index = engine
            .subvolumes()
            .iter()
            .position(|sv| sv.id() == id)
            .unwrap_or(0);
        tokio::spawn(async move {
            let outcome = heal_missing_entry(
                subvolume.as_ref(),
                &parent,
                &name,
                &primary,
                stripe_index,
                stripe_size,
                stripe_count,
                coalesce,
            )
            .await;
            if let crate::heal::HealOutcome::Failed { errno } = outcome {
                tracing::warn!(subvolume = id.index(), errno, "self-heal create failed");
            }
        });
    }
}

async fn fetch_stripe_xattrs(
    subvolume: &dyn Subvolume,
    path: &str,
) -> (Option<i64>, Option<i32>, Option<i32>, Option<i32>) {
    let size = subvolume
        .getxattr(path, "stripe-size")
        .await
        .ok()
        .and_then(|b| b.as_slice().try_into().ok())
        .map(i64::from_le_bytes);
    let count = subvolume
        .getxattr(path, "stripe-count")
        .await
        .ok()
        .and_then(|b| b.as_slice().try_into().ok())
        .map(i32::from_le_bytes);
    let index = subvolume
        .getxattr(path, "stripe-index")
        .await
        .ok()
        .and_then(|b| b.as_slice().try_into().ok())
        .map(i32::from_le_bytes);
    let coalesce = subvolume
        .getxattr(path, "stripe-coalesce")
        .await
        .ok()
        .and_then(|b| b.as_slice().try_into().ok())
        .map(i32::from_le_bytes);
    (size, count, index, coalesce)
}

pub(super) fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PatternRules};
    use crate::subvolume::MockSubvolume;
    use std::sync::Arc as StdArc;

    fn engine_with(count: u64) -> Engine {
        let subs: Vec<Arc<dyn Subvolume>> = (0..count)
            .map(|i| StdArc::new(MockSubvolume::new(SubvolumeId::new(i))) as Arc<dyn Subvolume>)
            .collect();
        let config = Config::new(PatternRules::new(Vec::new(), 131072).unwrap(), true, true);
        Engine::new(subs, config)
    }

    async fn create_striped(engine: &Engine, name: &str, size: u64) {
        let count = engine.stripe_count();
        for (i, sv) in engine.subvolumes().iter().enumerate() {
            let xattrs = crate::geometry::StripeXattrs {
                stripe_size: size as i64,
                stripe_count: count as i32,
                stripe_index: i as i32,
                stripe_coalesce: 1,
            };
            sv.create("/", name, 0o644, Some(xattrs), None).await.unwrap();
        }
    }

    #[tokio::test]
    async fn lookup_fails_when_primary_returns_enoent() {
        let engine = engine_with(3);
        let err = engine.lookup(1, "/", "missing.txt").await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[tokio::test]
    async fn lookup_discovers_and_publishes_geometry() {
        let engine = engine_with(4);
        create_striped(&engine, "a.bin", 131072).await;
        let outcome = engine.lookup(1, "/", "a.bin").await.unwrap();
        let geometry = outcome.geometry.expect("geometry discovered");
        assert_eq!(geometry.stripe_count(), 4);
        assert_eq!(geometry.stripe_size(), 131072);
        assert!(engine.cache().get(1).is_some());
    }

    #[tokio::test]
    async fn lookup_succeeds_and_heals_when_non_primary_missing() {
        let engine = engine_with(3);
        create_striped(&engine, "a.bin", 4096).await;
        // Simulate subvolume 2 lagging: remove its entry by unlinking.
        engine.subvolumes()[2].unlink("/", "a.bin").await.unwrap();

        let outcome = engine.lookup(5, "/", "a.bin").await;
        assert!(outcome.is_ok());

        // Self-heal runs on a spawned task; give it a turn to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let healed = engine.subvolumes()[2].lookup("/", "a.bin").await;
        assert!(healed.is_ok());
    }

    #[tokio::test]
    async fn lookup_flags_the_subvolume_actually_missing_xattrs_as_degraded() {
        let engine = engine_with(3);
        create_striped(&engine, "a.bin", 4096).await;
        // Subvolume 1 has the entry but never got its geometry xattrs —
        // distinct from an ENOENT/missing-entry case.
        engine.subvolumes()[1].unlink("/", "a.bin").await.unwrap();
        engine.subvolumes()[1]
            .create("/", "a.bin", 0o644, None, None)
            .await
            .unwrap();

        let outcome = engine.lookup(9, "/", "a.bin").await.unwrap();
        assert!(outcome.geometry.is_none(), "degraded file has no complete geometry");
        assert!(engine.is_degraded(9));
    }

    #[tokio::test]
    async fn run_discovery_reconciles_without_touching_the_cache() {
        let engine = engine_with(2);
        create_striped(&engine, "b.bin", 4096).await;
        engine.subvolumes()[0].write("/b.bin", 0, &[0u8; 4096]).await.unwrap();
        engine.subvolumes()[1].write("/b.bin", 0, &[0u8; 100]).await.unwrap();

        let discovered = run_discovery(&engine, "/", "b.bin").await.unwrap();
        assert_eq!(discovered.attr.size, 4196);
        assert!(engine.cache().is_empty());
    }
}
