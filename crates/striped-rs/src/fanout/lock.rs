//! Lock (posix lock fop, spec §4.4.9): fan out to all N subvolumes; the
//! returned lock record is taken from the primary. A failure on any
//! subvolume fails the whole fop; no attempt is made to unlock
//! subvolumes that already succeeded — the caller is expected to retry
//! or close.

use crate::error::{Result, StripeError};
use crate::geometry::Geometry;
use crate::subvolume::LockRequest;

use super::Engine;

/// Outcome of a posix-lock fanout.
pub struct LockOutcome {
    pub start: u64,
    pub len: u64,
}

impl Engine {
    /// Fans a posix-lock request out to every subvolume owning `path`
    /// under `geometry` (spec §4.4.9).
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn lock(&self, geometry: &Geometry, path: &str, req: LockRequest) -> Result<LockOutcome> {
        let mut handles = Vec::with_capacity(geometry.stripe_count());
        for i in 0..geometry.stripe_count() {
            let subvolume = self
                .subvolume(geometry.subvolume(i))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            handles.push(tokio::spawn(async move { subvolume.lock(&path, req).await }));
        }
        let mut primary = None;
        for (i, handle) in handles.into_iter().enumerate() {
            let reply = handle
                .await
                .map_err(|_| StripeError::Consistency("lock child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "lock", errno: err.errno })?;
            if i == 0 {
                primary = Some(reply);
            }
        }
        let reply = primary.ok_or(StripeError::NoGeometry)?;
        Ok(LockOutcome {
            start: reply.start,
            len: reply.len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PatternRules};
    use crate::subvolume::{MockSubvolume, Subvolume, SubvolumeId};
    use std::sync::Arc;

    async fn engine_with_file(count: u64) -> (Engine, Geometry) {
        let subs: Vec<Arc<dyn Subvolume>> = (0..count)
            .map(|i| Arc::new(MockSubvolume::new(SubvolumeId::new(i))) as Arc<dyn Subvolume>)
            .collect();
        for sv in &subs {
            sv.create("/", "a.bin", 0o644, None, None).await.unwrap();
        }
        let config = Config::new(PatternRules::new(Vec::new(), 4096).unwrap(), true, true);
        let geometry = Geometry::new(4096, (0..count).map(SubvolumeId::new).collect(), true).unwrap();
        (Engine::new(subs, config), geometry)
    }

    #[tokio::test]
    async fn lock_succeeds_and_returns_the_primarys_record() {
        let (engine, geometry) = engine_with_file(3).await;
        let outcome = engine
            .lock(
                &geometry,
                "/a.bin",
                LockRequest {
                    start: 10,
                    len: 20,
                    exclusive: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.start, 10);
        assert_eq!(outcome.len, 20);
    }

    #[tokio::test]
    async fn lock_fails_when_any_subvolume_fails() {
        let failing = MockSubvolume::new(SubvolumeId::new(1));
        failing.create("/", "a.bin", 0o644, None, None).await.unwrap();
        failing.inject_failure(libc::EIO);
        let primary = MockSubvolume::new(SubvolumeId::new(0));
        primary.create("/", "a.bin", 0o644, None, None).await.unwrap();
        let subs: Vec<Arc<dyn Subvolume>> = vec![Arc::new(primary), Arc::new(failing)];
        let config = Config::new(PatternRules::new(Vec::new(), 4096).unwrap(), true, true);
        let engine = Engine::new(subs, config);
        let geometry = Geometry::new(4096, vec![SubvolumeId::new(0), SubvolumeId::new(1)], true).unwrap();
        let err = engine
            .lock(
                &geometry,
                "/a.bin",
                LockRequest {
                    start: 0,
                    len: 10,
                    exclusive: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
    }
}
