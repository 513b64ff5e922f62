//! Request Fanout Engine (spec §4.4): the per-fop state machines that
//! split a caller's request across the subvolumes that own it, wind the
//! sub-requests concurrently, and merge the replies back into one answer.
//!
//! One file per fop family, matching `striped-cli`'s own
//! `ops_attr`/`ops_io`/`ops_create`/`ops_dir`/`ops_sync` split — each
//! module is an `impl Engine` block for the fops it covers. `Engine` is
//! the shared, per-translator-instance state: the ordered subvolume list,
//! the geometry cache, the resolved config, and the subvolume health
//! bitmap (spec §5 "Shared resources").

mod attr;
mod create;
mod dir;
mod lock;
mod lookup;
mod namespace;
mod read;
mod truncate_alloc;
mod write;
mod xattr;

pub use attr::StatResult;
pub use create::CreateOutcome;
pub use dir::{DirEntryView, ReaddirEntry};
pub use lock::LockOutcome;
pub use lookup::LookupOutcome;
pub use read::ReadOutcome;
pub use write::WriteOutcome;
pub use xattr::PathinfoResult;

use std::sync::Arc;
use std::sync::RwLock;

use crate::cache::GeometryCache;
use crate::config::Config;
use crate::heal::DegradedState;
use crate::subvolume::{Subvolume, SubvolumeId};

/// `HealthBitmap` is the up/down snapshot of every subvolume (spec §5
/// "Subvolume health bitmap ... updated under a short lock on child
/// up/down notifications; readers take a snapshot"). `ENOTCONN`-class
/// fops (§4.4.7) consult a snapshot once at the start of the fop rather
/// than re-reading it per child, so a flap mid-fop can't produce a
/// half-consistent decision.
pub struct HealthBitmap {
    up: RwLock<Vec<bool>>,
}

impl HealthBitmap {
    #[must_use]
    pub fn all_up(count: usize) -> Self {
        Self {
            up: RwLock::new(vec![true; count]),
        }
    }

    pub fn set_up(&self, index: usize, up: bool) {
        if let Some(slot) = self.up.write().unwrap().get_mut(index) {
            *slot = up;
        }
    }

    /// A point-in-time snapshot; true iff every subvolume was up.
    #[must_use]
    pub fn all_currently_up(&self) -> bool {
        self.up.read().unwrap().iter().all(|&up| up)
    }
}

/// `Engine` is the per-translator-instance fanout state (spec §4.4's
/// shared context across every fop).
pub struct Engine {
    subvolumes: Vec<Arc<dyn Subvolume>>,
    cache: GeometryCache,
    config: Config,
    health: HealthBitmap,
    degraded: RwLock<std::collections::HashMap<u64, DegradedState>>,
}

impl Engine {
    #[must_use]
    pub fn new(subvolumes: Vec<Arc<dyn Subvolume>>, config: Config) -> Self {
        let count = subvolumes.len();
        Self {
            subvolumes,
            cache: GeometryCache::new(),
            config,
            health: HealthBitmap::all_up(count),
            degraded: RwLock::new(std::collections::HashMap::new()),
        }
    }

    #[must_use]
    pub fn stripe_count(&self) -> usize {
        self.subvolumes.len()
    }

    #[must_use]
    pub fn subvolumes(&self) -> &[Arc<dyn Subvolume>] {
        &self.subvolumes
    }

    #[must_use]
    pub fn subvolume(&self, id: SubvolumeId) -> Option<&Arc<dyn Subvolume>> {
        self.subvolumes.iter().find(|sv| sv.id() == id)
    }

    #[must_use]
    pub const fn cache(&self) -> &GeometryCache {
        &self.cache
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn health(&self) -> &HealthBitmap {
        &self.health
    }

    /// Primary subvolume: always child 0 (spec §4.4 "the primary
    /// subvolume is always child 0").
    #[must_use]
    pub fn primary(&self) -> &Arc<dyn Subvolume> {
        &self.subvolumes[0]
    }

    pub fn mark_degraded(&self, inode: u64, subvolume: SubvolumeId) {
        self.degraded
            .write()
            .unwrap()
            .entry(inode)
            .or_default()
            .flag(subvolume);
    }

    #[must_use]
    pub fn is_degraded(&self, inode: u64) -> bool {
        self.degraded
            .read()
            .unwrap()
            .get(&inode)
            .is_some_and(DegradedState::is_degraded)
    }

    /// Requires every subvolume to be up, per spec §4.4.7's
    /// availability policy for namespace-mutating fops.
    ///
    /// # Errors
    /// Returns [`crate::error::StripeError::Unavailable`] if the health
    /// snapshot shows any subvolume down.
    pub fn require_all_up(&self, fop: &'static str) -> crate::error::Result<()> {
        if self.health.all_currently_up() {
            Ok(())
        } else {
            Err(crate::error::StripeError::Unavailable { fop })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PatternRules};
    use crate::subvolume::MockSubvolume;

    fn engine(count: u64) -> Engine {
        let subs: Vec<Arc<dyn Subvolume>> = (0..count)
            .map(|i| Arc::new(MockSubvolume::new(SubvolumeId::new(i))) as Arc<dyn Subvolume>)
            .collect();
        let config = Config::new(PatternRules::new(Vec::new(), 131072).unwrap(), true, true);
        Engine::new(subs, config)
    }

    #[test]
    fn primary_is_always_child_zero() {
        let e = engine(3);
        assert_eq!(e.primary().id(), SubvolumeId::new(0));
    }

    #[test]
    fn health_bitmap_starts_all_up() {
        let e = engine(4);
        assert!(e.require_all_up("mkdir").is_ok());
    }

    #[test]
    fn health_bitmap_flags_a_down_subvolume() {
        let e = engine(4);
        e.health().set_up(2, false);
        assert!(e.require_all_up("mkdir").is_err());
    }

    #[test]
    fn degraded_state_is_per_inode() {
        let e = engine(2);
        assert!(!e.is_degraded(1));
        e.mark_degraded(1, SubvolumeId::new(0));
        assert!(e.is_degraded(1));
        assert!(!e.is_degraded(2));
    }
}
