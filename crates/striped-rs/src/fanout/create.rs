//! Create / Mknod (spec §4.1 "Creation protocol", §4.4.6): two-phase
//! create — subvolume 0 first to settle the primary inode and gfid, then
//! the remaining subvolumes in parallel, each stamped with its own
//! `stripe-index`. Any phase-2 failure rolls back every subvolume that
//! already has a backend file for this name.

use std::sync::Arc;

use crate::error::{Result, StripeError};
use crate::geometry::{Geometry, StripeXattrs};
use crate::subvolume::{Iatt, Subvolume};

use super::Engine;

/// Outcome of a create fanout: the primary's attributes and the
/// newly-published geometry.
pub struct CreateOutcome {
    pub attr: Iatt,
    pub geometry: Arc<Geometry>,
}

impl Engine {
    /// Creates a new striped regular file `name` under `parent` (spec
    /// §4.1 "Creation protocol", §4.4.6). `stripe_size` is resolved from
    /// `self.config().patterns` by the caller's logical path before
    /// calling this.
    ///
    /// # Errors
    /// Returns [`StripeError::Unavailable`] if any subvolume is down, and
    /// [`StripeError::ChildFailed`] if phase 1 or any phase-2 create
    /// fails (phase-2 failures trigger a compensating unlink on every
    /// subvolume before the error is returned).
    pub async fn create(&self, inode: u64, parent: &str, name: &str, mode: u32, stripe_size: u64) -> Result<CreateOutcome> {
        self.require_all_up("create")?;

        let coalesce = self.config().coalesce;
        let count = self.stripe_count();

        let xattrs_for = |index: usize| {
            self.config().use_xattr.then(|| StripeXattrs {
                stripe_size: stripe_size as i64,
                stripe_count: count as i32,
                stripe_index: index as i32,
                stripe_coalesce: i32::from(coalesce),
            })
        };

        // Phase 1: reserve the gfid on the primary subvolume.
        let primary_reply = self
            .primary()
            .create(parent, name, mode, xattrs_for(0), None)
            .await
            .map_err(|err| StripeError::ChildFailed { fop: "create", errno: err.errno })?;
        let gfid = primary_reply.attr.gfid;

        // Phase 2: fan the same create out to the remaining subvolumes,
        // each carrying its own stripe-index and the primary's gfid so
        // every subvolume settles on one identity instead of racing its
        // own (spec §4.1).
        let mut handles = Vec::with_capacity(count.saturating_sub(1));
        for i in 1..count {
            let subvolume = self.subvolumes()[i].clone();
            let parent = parent.to_string();
            let name = name.to_string();
            let xattrs = xattrs_for(i);
            handles.push(tokio::spawn(
                async move { subvolume.create(&parent, &name, mode, xattrs, Some(gfid)).await },
            ));
        }

        let mut phase2_failure = None;
        for handle in handles {
            let result = handle
                .await
                .map_err(|_| StripeError::Consistency("create child task panicked".into()))?;
            if phase2_failure.is_none() {
                if let Err(err) = result {
                    phase2_failure = Some(err.errno);
                }
            }
        }

        if let Some(errno) = phase2_failure {
            self.rollback_create(parent, name).await;
            return Err(StripeError::ChildFailed { fop: "create", errno });
        }

        let subvolumes: Vec<_> = self.subvolumes().iter().map(|sv| sv.id()).collect();
        let geometry = Geometry::new(stripe_size, subvolumes, coalesce)?;
        let geometry = self.cache().publish_or_get(inode, geometry);
        Ok(CreateOutcome {
            attr: primary_reply.attr,
            geometry,
        })
    }

    /// Compensating unlink on every subvolume after a failed phase-2
    /// create (spec §4.4.6: "on any phase-2 failure, unlink on all
    /// subvolumes including those that succeeded").
    async fn rollback_create(&self, parent: &str, name: &str) {
        let mut handles = Vec::with_capacity(self.stripe_count());
        for sv in self.subvolumes() {
            let sv = sv.clone();
            let parent = parent.to_string();
            let name = name.to_string();
            handles.push(tokio::spawn(async move {
                let _ = sv.unlink(&parent, &name).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PatternRules};
    use crate::subvolume::{MockSubvolume, SubvolumeId};

    fn engine(count: u64) -> Engine {
        let subs: Vec<Arc<dyn Subvolume>> = (0..count)
            .map(|i| Arc::new(MockSubvolume::new(SubvolumeId::new(i))) as Arc<dyn Subvolume>)
            .collect();
        let config = Config::new(PatternRules::new(Vec::new(), 4096).unwrap(), true, true);
        Engine::new(subs, config)
    }

    #[tokio::test]
    async fn create_publishes_geometry_and_stamps_every_index() {
        let e = engine(3);
        let outcome = e.create(1, "/", "a.bin", 0o644, 4096).await.unwrap();
        assert_eq!(outcome.geometry.stripe_count(), 3);
        for (i, sv) in e.subvolumes().iter().enumerate() {
            let index = sv.getxattr("/a.bin", "stripe-index").await.unwrap();
            assert_eq!(i32::from_le_bytes(index.try_into().unwrap()), i as i32);
        }
    }

    #[tokio::test]
    async fn create_rolls_back_every_subvolume_on_phase2_failure() {
        let failing = MockSubvolume::new(SubvolumeId::new(2));
        failing.inject_failure(libc::ENOSPC);
        let subs: Vec<Arc<dyn Subvolume>> = vec![
            Arc::new(MockSubvolume::new(SubvolumeId::new(0))),
            Arc::new(MockSubvolume::new(SubvolumeId::new(1))),
            Arc::new(failing),
        ];
        let config = Config::new(PatternRules::new(Vec::new(), 4096).unwrap(), true, true);
        let e = Engine::new(subs, config);
        let err = e.create(1, "/", "a.bin", 0o644, 4096).await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOSPC);
        for sv in e.subvolumes() {
            assert!(sv.lookup("/", "a.bin").await.is_err());
        }
    }
}
