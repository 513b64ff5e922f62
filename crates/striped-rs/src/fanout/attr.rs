//! Stat / Fstat / Setattr / Fsetattr (spec §4.4.8): fan out to every
//! subvolume, reconcile size/blocks via `crate::offset::reconcile_size`,
//! and take everything else — mode, owner, gfid — from the primary.

use crate::error::{Result, StripeError};
use crate::geometry::Geometry;
use crate::offset::reconcile_size;
use crate::subvolume::{Iatt, SetAttr, Subvolume};

use super::Engine;

/// Outcome of a plain stat-class fanout: the merged attributes.
pub struct StatResult {
    pub attr: Iatt,
}

/// Outcome of a mutating fanout that reports both the pre- and
/// post-operation attributes (truncate, fallocate, setattr).
pub struct AttrPair {
    pub pre: Iatt,
    pub post: Iatt,
}

impl Engine {
    /// Fans `getattr` out to every subvolume owning `path` under
    /// `geometry` and reconciles size/blocks (spec §4.4.8).
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn stat(&self, geometry: &Geometry, path: &str) -> Result<StatResult> {
        Ok(StatResult {
            attr: self.stat_merged(geometry, path).await?,
        })
    }

    /// Shared by every fop family that needs a freshly reconciled iatt
    /// before or after mutating a striped file (read's short-read gap,
    /// write's pre/post, fallocate's pre/post, plain stat).
    pub(super) async fn stat_merged(&self, geometry: &Geometry, path: &str) -> Result<Iatt> {
        let mut handles = Vec::with_capacity(geometry.stripe_count());
        for i in 0..geometry.stripe_count() {
            let subvolume = self
                .subvolume(geometry.subvolume(i))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            handles.push(tokio::spawn(async move { subvolume.getattr(&path).await }));
        }
        let mut primary_attr = None;
        let mut sizes = vec![0u64; handles.len()];
        let mut total_blocks = 0u64;
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle
                .await
                .map_err(|_| StripeError::Consistency("stat child task panicked".into()))?;
            match result {
                Ok(attr) => {
                    sizes[i] = attr.size;
                    total_blocks += attr.blocks;
                    if i == 0 {
                        primary_attr = Some(attr);
                    }
                }
                Err(err) => {
                    return Err(StripeError::ChildFailed {
                        fop: "stat",
                        errno: err.errno,
                    });
                }
            }
        }
        let mut attr = primary_attr.ok_or(StripeError::NoGeometry)?;
        attr.size = reconcile_size(geometry, &sizes);
        attr.blocks = total_blocks;
        Ok(attr)
    }

    /// Fans `setattr` out for a striped regular file (spec §4.4.8). A
    /// `size` change routes through truncate-target resolution exactly as
    /// an explicit truncate would (§4.2); every other field is forwarded
    /// unchanged to every subvolume.
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn setattr(&self, geometry: &Geometry, path: &str, attr: SetAttr) -> Result<AttrPair> {
        let mut result = if attr.size.is_some() {
            self.truncate(geometry, path, attr.size.unwrap()).await?
        } else {
            AttrPair {
                pre: self.stat_merged(geometry, path).await?,
                post: self.stat_merged(geometry, path).await?,
            }
        };

        let non_size = SetAttr { size: None, ..attr };
        if non_size.mode.is_some() || non_size.uid.is_some() || non_size.gid.is_some() {
            let mut handles = Vec::with_capacity(geometry.stripe_count());
            for i in 0..geometry.stripe_count() {
                let subvolume = self
                    .subvolume(geometry.subvolume(i))
                    .cloned()
                    .ok_or(StripeError::NoGeometry)?;
                let path = path.to_string();
                handles.push(tokio::spawn(async move { subvolume.setattr(&path, non_size).await }));
            }
            for handle in handles {
                let reply = handle
                    .await
                    .map_err(|_| StripeError::Consistency("setattr child task panicked".into()))?
                    .map_err(|err| StripeError::ChildFailed { fop: "setattr", errno: err.errno })?;
                let _ = reply;
            }
            result.post = self.stat_merged(geometry, path).await?;
        }

        Ok(result)
    }

    /// Fans `fsync`/`fdatasync` out to every subvolume owning `path` under
    /// `geometry` (spec §1: fsync is one of the fops that touch a striped
    /// regular file and must be fanned out like any other metadata op).
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn fsync(&self, geometry: &Geometry, path: &str, datasync: bool) -> Result<()> {
        let mut handles = Vec::with_capacity(geometry.stripe_count());
        for i in 0..geometry.stripe_count() {
            let subvolume = self
                .subvolume(geometry.subvolume(i))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            handles.push(tokio::spawn(async move { subvolume.fsync(&path, datasync).await }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|_| StripeError::Consistency("fsync child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "fsync", errno: err.errno })?;
        }
        Ok(())
    }

    /// Fans a directory `setattr` out to every subvolume uniformly —
    /// directories are replicated, not striped, so there is no size to
    /// reconcile (spec §4.4.10).
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn setattr_dir(&self, path: &str, attr: SetAttr) -> Result<AttrPair> {
        let mut handles = Vec::with_capacity(self.stripe_count());
        for sv in self.subvolumes() {
            let sv = sv.clone();
            let path = path.to_string();
            handles.push(tokio::spawn(async move { sv.setattr(&path, attr).await }));
        }
        let mut pre = None;
        let mut post = None;
        for (i, handle) in handles.into_iter().enumerate() {
            let reply = handle
                .await
                .map_err(|_| StripeError::Consistency("setattr child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "setattr", errno: err.errno })?;
            if i == 0 {
                pre = Some(reply.0);
                post = Some(reply.1);
            }
        }
        Ok(AttrPair {
            pre: pre.ok_or(StripeError::NoGeometry)?,
            post: post.ok_or(StripeError::NoGeometry)?,
        })
    }
}
