//! Self-Heal & Consistency (spec §4.5): best-effort recreation of stub
//! files on subvolumes that lagged behind a create, and the degraded-flag
//! bookkeeping for files whose geometry xattrs are incomplete.
//!
//! Everything here is deliberately *not* about reconstructing file data —
//! spec §1's Non-goals exclude that entirely. This module only repairs
//! namespace/metadata drift: a missing directory entry, or a missing
//! geometry xattr that would otherwise make discovery (`crate::geometry`)
//! silently disagree about a file's layout.

use crate::geometry::StripeXattrs;
use crate::subvolume::{ChildResult, CreateReply, Iatt, SetAttr, Subvolume, SubvolumeId};

/// Outcome of one self-heal attempt against a single lagging subvolume.
#[derive(Debug)]
pub enum HealOutcome {
    Recreated,
    /// The stub create or the follow-up setattr failed; carries the
    /// errno for logging. Never propagated to the fop's caller (spec
    /// §4.5 "Best-effort: failures are logged, never propagated").
    Failed { errno: i32 },
}

/// Recreates a zero-length stub on `subvolume` for a file that the
/// primary subvolume reports present but this one reports `ENOENT` (spec
/// §4.5 "Missing entry"). Carries the correct `stripe-index`, the
/// primary's mode, and then `setattr`s the stub to the primary's
/// uid/gid — mirroring the two-step create-then-setattr sequence spec
/// §4.5 specifies.
pub async fn heal_missing_entry(
    subvolume: &dyn Subvolume,
    parent: &str,
    name: &str,
    primary: &Iatt,
    stripe_index: usize,
    stripe_size: u64,
    stripe_count: usize,
    coalesce: bool,
) -> HealOutcome {
    let xattrs = StripeXattrs {
        stripe_size: stripe_size as i64,
        stripe_count: stripe_count as i32,
        stripe_index: stripe_index as i32,
        stripe_coalesce: i32::from(coalesce),
    };
    let mode = if primary.is_dir {
        primary.mode | 0o040000
    } else {
        primary.mode
    };

    let create: ChildResult<CreateReply> = if primary.is_dir {
        subvolume.mkdir(parent, name, mode).await.map(|attr| CreateReply { attr })
    } else {
        subvolume.create(parent, name, mode, Some(xattrs), Some(primary.gfid)).await
    };

    if let Err(err) = create {
        return HealOutcome::Failed { errno: err.errno };
    }

    let path = if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    };
    let setattr = subvolume
        .setattr(
            &path,
            SetAttr {
                size: None,
                mode: None,
                uid: Some(primary.uid),
                gid: Some(primary.gid),
            },
        )
        .await;

    match setattr {
        Ok(_) => HealOutcome::Recreated,
        Err(err) => HealOutcome::Failed { errno: err.errno },
    }
}

/// Degraded-file bookkeeping (spec §4.5 "Missing geometry xattr"):
/// rewriting the missing xattr is out of core scope, so the engine only
/// needs to remember which subvolumes were flagged so follow-on fops that
/// require full geometry can fail fast (spec §7 "Geometry errors")
/// instead of silently operating on a partial descriptor.
#[derive(Clone, Debug, Default)]
pub struct DegradedState {
    flagged: Vec<SubvolumeId>,
}

impl DegradedState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flagged: Vec::new(),
        }
    }

    pub fn flag(&mut self, subvolume: SubvolumeId) {
        if !self.flagged.contains(&subvolume) {
            self.flagged.push(subvolume);
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.flagged.is_empty()
    }

    #[must_use]
    pub fn flagged_subvolumes(&self) -> &[SubvolumeId] {
        &self.flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subvolume::MockSubvolume;

    fn primary_iatt() -> Iatt {
        Iatt {
            size: 0,
            blocks: 0,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            is_dir: false,
            gfid: [7; 16],
        }
    }

    #[tokio::test]
    async fn heal_recreates_missing_stub_with_owner_and_index() {
        let sv = MockSubvolume::new(SubvolumeId::new(2));
        let outcome = heal_missing_entry(&sv, "/", "a.txt", &primary_iatt(), 2, 131072, 4, true).await;
        assert!(matches!(outcome, HealOutcome::Recreated));

        let attr = sv.lookup("/", "a.txt").await.unwrap();
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.gid, 1000);
        assert_eq!(attr.size, 0);
    }

    #[tokio::test]
    async fn heal_recreates_missing_directory_stub() {
        let sv = MockSubvolume::new(SubvolumeId::new(1));
        let mut dir_iatt = primary_iatt();
        dir_iatt.is_dir = true;
        let outcome = heal_missing_entry(&sv, "/", "sub", &dir_iatt, 1, 131072, 3, false).await;
        assert!(matches!(outcome, HealOutcome::Recreated));
        let attr = sv.lookup("/", "sub").await.unwrap();
        assert!(attr.is_dir);
    }

    #[tokio::test]
    async fn heal_reports_failure_without_panicking() {
        let sv = MockSubvolume::new(SubvolumeId::new(0));
        sv.inject_failure(libc::ENOSPC);
        let outcome = heal_missing_entry(&sv, "/", "a.txt", &primary_iatt(), 0, 131072, 4, true).await;
        assert!(matches!(outcome, HealOutcome::Failed { errno } if errno == libc::ENOSPC));
    }

    #[test]
    fn degraded_state_flags_each_subvolume_once() {
        let mut state = DegradedState::new();
        assert!(!state.is_degraded());
        state.flag(SubvolumeId::new(1));
        state.flag(SubvolumeId::new(1));
        state.flag(SubvolumeId::new(2));
        assert!(state.is_degraded());
        assert_eq!(state.flagged_subvolumes().len(), 2);
    }
}
