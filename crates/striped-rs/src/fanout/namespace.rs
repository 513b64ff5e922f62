//! Mkdir / Rmdir / Unlink / Rename / Link (spec §4.4.7): all require
//! every subvolume up, since they mutate namespace metadata that must
//! stay consistent. Each fans to subvolume 0 first, then winds out to the
//! remainder in parallel only after the primary succeeds.

use crate::error::{Result, StripeError};
use crate::subvolume::{Iatt, Subvolume};

use super::Engine;

impl Engine {
    /// Creates a replicated directory `name` under `parent` on every
    /// subvolume (spec §4.4.7).
    ///
    /// # Errors
    /// Returns [`StripeError::Unavailable`] if any subvolume is down, or
    /// [`StripeError::ChildFailed`] if subvolume 0's `mkdir` fails or any
    /// later subvolume's `mkdir` fails after subvolume 0 succeeded.
    pub async fn mkdir(&self, parent: &str, name: &str, mode: u32) -> Result<Iatt> {
        self.require_all_up("mkdir")?;
        let attr = self
            .primary()
            .mkdir(parent, name, mode)
            .await
            .map_err(|err| StripeError::ChildFailed { fop: "mkdir", errno: err.errno })?;
        let mut handles = Vec::with_capacity(self.stripe_count().saturating_sub(1));
        for sv in &self.subvolumes()[1..] {
            let sv = sv.clone();
            let parent = parent.to_string();
            let name = name.to_string();
            handles.push(tokio::spawn(async move { sv.mkdir(&parent, &name, mode).await }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|_| StripeError::Consistency("mkdir child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "mkdir", errno: err.errno })?;
        }
        Ok(attr)
    }

    /// Removes directory `name` under `parent` from every subvolume
    /// (spec §4.4.7).
    ///
    /// # Errors
    /// Returns [`StripeError::Unavailable`] if any subvolume is down, or
    /// [`StripeError::ChildFailed`] if any subvolume's `rmdir` fails.
    pub async fn rmdir(&self, parent: &str, name: &str) -> Result<()> {
        self.require_all_up("rmdir")?;
        self.primary()
            .rmdir(parent, name)
            .await
            .map_err(|err| StripeError::ChildFailed { fop: "rmdir", errno: err.errno })?;
        let mut handles = Vec::with_capacity(self.stripe_count().saturating_sub(1));
        for sv in &self.subvolumes()[1..] {
            let sv = sv.clone();
            let parent = parent.to_string();
            let name = name.to_string();
            handles.push(tokio::spawn(async move { sv.rmdir(&parent, &name).await }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|_| StripeError::Consistency("rmdir child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "rmdir", errno: err.errno })?;
        }
        Ok(())
    }

    /// Unlinks `name` under `parent` from every subvolume (spec §4.4.7).
    ///
    /// # Errors
    /// Returns [`StripeError::Unavailable`] if any subvolume is down, or
    /// [`StripeError::ChildFailed`] if any subvolume's `unlink` fails.
    pub async fn unlink(&self, parent: &str, name: &str) -> Result<()> {
        self.require_all_up("unlink")?;
        self.primary()
            .unlink(parent, name)
            .await
            .map_err(|err| StripeError::ChildFailed { fop: "unlink", errno: err.errno })?;
        let mut handles = Vec::with_capacity(self.stripe_count().saturating_sub(1));
        for sv in &self.subvolumes()[1..] {
            let sv = sv.clone();
            let parent = parent.to_string();
            let name = name.to_string();
            handles.push(tokio::spawn(async move { sv.unlink(&parent, &name).await }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|_| StripeError::Consistency("unlink child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "unlink", errno: err.errno })?;
        }
        Ok(())
    }

    /// Renames across every subvolume (spec §4.4.7). If the source is a
    /// regular file, its geometry travels with the inode unchanged — the
    /// engine performs no re-discovery here.
    ///
    /// # Errors
    /// Returns [`StripeError::Unavailable`] if any subvolume is down, or
    /// [`StripeError::ChildFailed`] if any subvolume's `rename` fails.
    pub async fn rename(&self, old_parent: &str, old_name: &str, new_parent: &str, new_name: &str) -> Result<()> {
        self.require_all_up("rename")?;
        self.primary()
            .rename(old_parent, old_name, new_parent, new_name)
            .await
            .map_err(|err| StripeError::ChildFailed { fop: "rename", errno: err.errno })?;
        let mut handles = Vec::with_capacity(self.stripe_count().saturating_sub(1));
        for sv in &self.subvolumes()[1..] {
            let sv = sv.clone();
            let old_parent = old_parent.to_string();
            let old_name = old_name.to_string();
            let new_parent = new_parent.to_string();
            let new_name = new_name.to_string();
            handles.push(tokio::spawn(async move {
                sv.rename(&old_parent, &old_name, &new_parent, &new_name).await
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|_| StripeError::Consistency("rename child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "rename", errno: err.errno })?;
        }
        Ok(())
    }

    /// Hard-links `path` to `new_parent/new_name` on every subvolume
    /// (spec §4.4.7).
    ///
    /// # Errors
    /// Returns [`StripeError::Unavailable`] if any subvolume is down, or
    /// [`StripeError::ChildFailed`] if any subvolume's `link` fails.
    pub async fn link(&self, path: &str, new_parent: &str, new_name: &str) -> Result<Iatt> {
        self.require_all_up("link")?;
        let attr = self
            .primary()
            .link(path, new_parent, new_name)
            .await
            .map_err(|err| StripeError::ChildFailed { fop: "link", errno: err.errno })?;
        let mut handles = Vec::with_capacity(self.stripe_count().saturating_sub(1));
        for sv in &self.subvolumes()[1..] {
            let sv = sv.clone();
            let path = path.to_string();
            let new_parent = new_parent.to_string();
            let new_name = new_name.to_string();
            handles.push(tokio::spawn(async move { sv.link(&path, &new_parent, &new_name).await }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|_| StripeError::Consistency("link child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "link", errno: err.errno })?;
        }
        Ok(attr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PatternRules};
    use crate::subvolume::{MockSubvolume, SubvolumeId};
    use std::sync::Arc;

    fn engine(count: u64) -> Engine {
        let subs: Vec<Arc<dyn Subvolume>> = (0..count)
            .map(|i| Arc::new(MockSubvolume::new(SubvolumeId::new(i))) as Arc<dyn Subvolume>)
            .collect();
        let config = Config::new(PatternRules::new(Vec::new(), 4096).unwrap(), true, true);
        Engine::new(subs, config)
    }

    #[tokio::test]
    async fn mkdir_creates_on_every_subvolume() {
        let e = engine(3);
        e.mkdir("/", "sub", 0o755).await.unwrap();
        for sv in e.subvolumes() {
            assert!(sv.lookup("/", "sub").await.unwrap().is_dir);
        }
    }

    #[tokio::test]
    async fn namespace_fops_fail_fast_when_a_subvolume_is_down() {
        let e = engine(3);
        e.health().set_up(1, false);
        let err = e.mkdir("/", "sub", 0o755).await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOTCONN);
    }

    #[tokio::test]
    async fn unlink_removes_from_every_subvolume() {
        let e = engine(2);
        for sv in e.subvolumes() {
            sv.create("/", "a.txt", 0o644, None, None).await.unwrap();
        }
        e.unlink("/", "a.txt").await.unwrap();
        for sv in e.subvolumes() {
            assert!(sv.lookup("/", "a.txt").await.is_err());
        }
    }

    #[tokio::test]
    async fn rename_moves_on_every_subvolume() {
        let e = engine(2);
        e.mkdir("/", "dst", 0o755).await.unwrap();
        for sv in e.subvolumes() {
            sv.create("/", "a.txt", 0o644, None, None).await.unwrap();
        }
        e.rename("/", "a.txt", "/dst", "b.txt").await.unwrap();
        for sv in e.subvolumes() {
            assert!(sv.lookup("/dst", "b.txt").await.is_ok());
            assert!(sv.lookup("/", "a.txt").await.is_err());
        }
    }
}
