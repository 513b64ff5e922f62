//! Geometry Descriptor (spec §3.1, §4.1): the immutable per-file record that
//! fully determines how a logical file is laid out across subvolumes.

use crate::error::{Result, StripeError};
use crate::subvolume::SubvolumeId;

/// Minimum allowed `stripe_size`, in bytes. Must stay a multiple of 512.
pub const MIN_STRIPE_SIZE: u64 = 512;

/// `Geometry` is the immutable tuple (stripe_size, stripe_count, subvolume
/// array, coalesce) described in spec §3.1. Once published into the
/// context cache (`crate::cache`) it is never mutated; a reconfiguration
/// requires purge-and-relookup (invariant G1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    stripe_size: u64,
    subvolumes: Vec<SubvolumeId>,
    coalesce: bool,
}

impl Geometry {
    /// Builds a new geometry, validating invariants G2 (no duplicate subvolumes)
    /// and the stripe-size constraints from spec §3.1.
    ///
    /// # Errors
    /// Returns [`StripeError::InvalidConfig`] if `stripe_size` is not a
    /// positive multiple of 512 bytes, if `stripe_count` is outside
    /// `2..=256`, or if `subvolumes` contains duplicates.
    pub fn new(stripe_size: u64, subvolumes: Vec<SubvolumeId>, coalesce: bool) -> Result<Self> {
        if stripe_size == 0 || stripe_size < MIN_STRIPE_SIZE || stripe_size % 512 != 0 {
            return Err(StripeError::InvalidConfig(format!(
                "stripe_size {stripe_size} must be a multiple of 512 and at least {MIN_STRIPE_SIZE}"
            )));
        }
        if !(2..=256).contains(&subvolumes.len()) {
            return Err(StripeError::InvalidConfig(format!(
                "stripe_count {} must be in 2..=256",
                subvolumes.len()
            )));
        }
        let mut seen = subvolumes.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != subvolumes.len() {
            return Err(StripeError::InvalidConfig(
                "subvolumes array contains duplicates".to_string(),
            ));
        }
        Ok(Self {
            stripe_size,
            subvolumes,
            coalesce,
        })
    }

    #[must_use]
    pub const fn stripe_size(&self) -> u64 {
        self.stripe_size
    }

    #[must_use]
    pub fn stripe_count(&self) -> usize {
        self.subvolumes.len()
    }

    #[must_use]
    pub const fn coalesce(&self) -> bool {
        self.coalesce
    }

    #[must_use]
    pub fn subvolumes(&self) -> &[SubvolumeId] {
        &self.subvolumes
    }

    /// Returns the subvolume that owns stripe index `i`.
    #[must_use]
    pub fn subvolume(&self, i: usize) -> SubvolumeId {
        self.subvolumes[i]
    }
}

/// `StripeXattrs` is the per-subvolume, per-file extended-attribute record
/// from spec §3.2. `stripe_coalesce` defaults to `0` (sparse) when absent,
/// per invariant backward-compatibility rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StripeXattrs {
    pub stripe_size: i64,
    pub stripe_count: i32,
    pub stripe_index: i32,
    pub stripe_coalesce: i32,
}

impl StripeXattrs {
    #[must_use]
    pub const fn coalesce(&self) -> bool {
        self.stripe_coalesce != 0
    }
}

/// `DiscoveryReply` is one subvolume's answer to a geometry-discovery
/// getxattr fan-out (spec §4.1). `None` for a field means that attribute
/// was missing on this reply.
#[derive(Clone, Debug)]
pub struct DiscoveryReply {
    pub subvolume: SubvolumeId,
    pub stripe_size: Option<i64>,
    pub stripe_count: Option<i32>,
    pub stripe_index: Option<i32>,
    pub stripe_coalesce: Option<i32>,
    /// `true` if this subvolume returned `ENOENT` for the file (spec §4.1 step 2 / §4.5).
    pub enoent: bool,
}

/// Outcome of running the discovery protocol (spec §4.1) across all replies.
pub struct Discovery {
    pub geometry: Option<Geometry>,
    /// `true` if any participating subvolume was missing one or more of the
    /// first three geometry xattrs — marks the file as needing self-heal,
    /// without failing the lookup (spec §4.1 step 2).
    pub needs_xattr_heal: bool,
    /// `true` if some (but not all) subvolumes answered `ENOENT` — schedules
    /// stub self-heal (spec §4.1 step 5, §4.5) while the lookup still succeeds.
    pub needs_entry_heal: Vec<SubvolumeId>,
}

/// Runs the discovery protocol described in spec §4.1 over one lookup's
/// worth of per-subvolume xattr replies.
///
/// # Errors
/// Returns [`StripeError::Consistency`] if replying subvolumes disagree on
/// `stripe-count` (spec §4.1 step 3), or if gfid-free replies leave no slot
/// filled for some stripe index once all subvolumes that exist have replied
/// (an incomplete, non-degraded-tolerant geometry).
pub fn discover(replies: &[DiscoveryReply]) -> Result<Discovery> {
    let mut stripe_size: Option<i64> = None;
    let mut stripe_count: Option<i32> = None;
    let mut coalesce = 0i32;
    let mut needs_xattr_heal = false;
    let mut needs_entry_heal = Vec::new();
    let mut slots: Vec<Option<SubvolumeId>> = Vec::new();

    for reply in replies {
        if reply.enoent {
            // spec §4.1 step 5 / §4.5: missing entirely, schedule self-heal,
            // but this reply fills no slot — geometry stays degraded until
            // the stub is recreated and a subsequent lookup fills it in.
            needs_entry_heal.push(reply.subvolume);
            continue;
        }

        match (reply.stripe_size, reply.stripe_count, reply.stripe_index) {
            (Some(size), Some(count), Some(index)) => {
                match stripe_count {
                    None => {
                        stripe_size = Some(size);
                        stripe_count = Some(count);
                        slots = vec![None; count.max(0) as usize];
                    }
                    Some(existing) if existing != count => {
                        return Err(StripeError::Consistency(format!(
                            "stripe-count mismatch: {existing} vs {count}"
                        )));
                    }
                    _ => {}
                }
                if let Some(slot) = slots.get_mut(index.max(0) as usize) {
                    *slot = Some(reply.subvolume);
                }
                if let Some(c) = reply.stripe_coalesce {
                    coalesce = c;
                }
            }
            // spec §4.1 step 2: missing one of the first three xattrs —
            // flag for self-heal but this reply still fills no slot.
            _ => needs_xattr_heal = true,
        }
    }

    // spec §4.1 step 5: every slot must be filled for the descriptor to be
    // valid; otherwise the file is degraded (geometry stays `None`) even
    // though the lookup itself may still report success to its caller.
    let geometry = match (stripe_size, stripe_count) {
        (Some(size), Some(count)) if count > 0 && size > 0 && slots.iter().all(Option::is_some) => {
            let subvolumes: Vec<SubvolumeId> = slots.into_iter().flatten().collect();
            Geometry::new(size as u64, subvolumes, coalesce != 0).ok()
        }
        _ => None,
    };

    Ok(Discovery {
        geometry,
        needs_xattr_heal,
        needs_entry_heal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(n: u64) -> SubvolumeId {
        SubvolumeId::new(n)
    }

    #[test]
    fn geometry_rejects_non_512_multiple() {
        assert!(Geometry::new(513, vec![sv(0), sv(1)], true).is_err());
    }

    #[test]
    fn geometry_rejects_single_subvolume() {
        assert!(Geometry::new(1024, vec![sv(0)], true).is_err());
    }

    #[test]
    fn geometry_rejects_duplicate_subvolumes() {
        assert!(Geometry::new(1024, vec![sv(0), sv(0)], true).is_err());
    }

    #[test]
    fn geometry_owner_lookup_by_index() {
        let g = Geometry::new(1024, vec![sv(7), sv(9), sv(11)], false).unwrap();
        assert_eq!(g.subvolume(0), sv(7));
        assert_eq!(g.subvolume(2), sv(11));
        assert_eq!(g.stripe_count(), 3);
    }

    #[test]
    fn discover_seeds_from_first_reply_and_validates_rest() {
        let replies = vec![
            DiscoveryReply {
                subvolume: sv(0),
                stripe_size: Some(131072),
                stripe_count: Some(2),
                stripe_index: Some(0),
                stripe_coalesce: Some(1),
                enoent: false,
            },
            DiscoveryReply {
                subvolume: sv(1),
                stripe_size: Some(131072),
                stripe_count: Some(2),
                stripe_index: Some(1),
                stripe_coalesce: Some(1),
                enoent: false,
            },
        ];
        let discovery = discover(&replies).unwrap();
        let geometry = discovery.geometry.expect("geometry discovered");
        assert_eq!(geometry.stripe_size(), 131072);
        assert_eq!(geometry.stripe_count(), 2);
        assert!(geometry.coalesce());
        assert!(!discovery.needs_xattr_heal);
        assert!(discovery.needs_entry_heal.is_empty());
    }

    #[test]
    fn discover_fails_on_stripe_count_mismatch() {
        let replies = vec![
            DiscoveryReply {
                subvolume: sv(0),
                stripe_size: Some(131072),
                stripe_count: Some(2),
                stripe_index: Some(0),
                stripe_coalesce: Some(1),
                enoent: false,
            },
            DiscoveryReply {
                subvolume: sv(1),
                stripe_size: Some(131072),
                stripe_count: Some(3),
                stripe_index: Some(1),
                stripe_coalesce: Some(1),
                enoent: false,
            },
        ];
        assert!(discover(&replies).is_err());
    }

    #[test]
    fn discover_flags_missing_xattrs_without_failing() {
        let replies = vec![
            DiscoveryReply {
                subvolume: sv(0),
                stripe_size: Some(131072),
                stripe_count: Some(2),
                stripe_index: Some(0),
                stripe_coalesce: Some(1),
                enoent: false,
            },
            DiscoveryReply {
                subvolume: sv(1),
                stripe_size: None,
                stripe_count: None,
                stripe_index: None,
                stripe_coalesce: None,
                enoent: false,
            },
        ];
        let discovery = discover(&replies).unwrap();
        assert!(discovery.needs_xattr_heal);
    }

    #[test]
    fn discover_defaults_coalesce_to_sparse_when_absent() {
        let replies = vec![
            DiscoveryReply {
                subvolume: sv(0),
                stripe_size: Some(4096),
                stripe_count: Some(2),
                stripe_index: Some(0),
                stripe_coalesce: None,
                enoent: false,
            },
            DiscoveryReply {
                subvolume: sv(1),
                stripe_size: Some(4096),
                stripe_count: Some(2),
                stripe_index: Some(1),
                stripe_coalesce: None,
                enoent: false,
            },
        ];
        let discovery = discover(&replies).unwrap();
        assert!(!discovery.geometry.unwrap().coalesce());
    }
}
