//! Opendir / Readdirp / Fsyncdir (spec §4.4.10): directories are fully
//! replicated (not striped), so `opendir`/`fsyncdir` just fan out to
//! confirm every subvolume has the directory; `readdirp` lists entries
//! from the primary subvolume and follows up with the same discovery
//! fanout `lookup` uses (spec §4.4.1) to reconcile each regular file's
//! size/blocks before returning the entry list.

use crate::error::{Result, StripeError};
use crate::subvolume::{Iatt, Subvolume};

use super::Engine;
use super::lookup::{run_discovery, schedule_entry_heal};

/// One entry returned from a `readdirp` fanout, already reconciled.
pub struct DirEntryView {
    pub name: String,
    pub is_dir: bool,
    pub attr: Iatt,
}

/// Alias kept for callers that think of this as "the readdir entry type".
pub type ReaddirEntry = DirEntryView;

impl Engine {
    /// Confirms every subvolume has directory `path` (spec §4.4.10).
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn opendir(&self, path: &str) -> Result<()> {
        let mut handles = Vec::with_capacity(self.stripe_count());
        for sv in self.subvolumes() {
            let sv = sv.clone();
            let path = path.to_string();
            handles.push(tokio::spawn(async move { sv.readdir(&path).await.map(|_| ()) }));
        }
        for handle in handles {
            let result = handle
                .await
                .map_err(|_| StripeError::Consistency("opendir child task panicked".into()))?;
            result.map_err(|err| StripeError::ChildFailed { fop: "opendir", errno: err.errno })?;
        }
        Ok(())
    }

    /// Fans a directory fsync out to every subvolume (spec §4.4.10).
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn fsyncdir(&self, path: &str) -> Result<()> {
        let mut handles = Vec::with_capacity(self.stripe_count());
        for sv in self.subvolumes() {
            let sv = sv.clone();
            let path = path.to_string();
            handles.push(tokio::spawn(async move { sv.fsync(&path, false).await }));
        }
        for handle in handles {
            let result = handle
                .await
                .map_err(|_| StripeError::Consistency("fsyncdir child task panicked".into()))?;
            result.map_err(|err| StripeError::ChildFailed { fop: "fsyncdir", errno: err.errno })?;
        }
        Ok(())
    }

    /// Lists `path`'s entries from the primary subvolume, reconciling each
    /// regular file's size/blocks via the same discovery fanout `lookup`
    /// runs (spec §4.4.10). Entries that are missing on some subvolumes
    /// still get self-heal scheduled, exactly as a direct lookup would.
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if the primary's `readdir`
    /// fails, or if reconciling one of its entries fails.
    pub async fn readdirp(&self, path: &str) -> Result<Vec<DirEntryView>> {
        let entries = self
            .primary()
            .readdir(path)
            .await
            .map_err(|err| StripeError::ChildFailed { fop: "readdirp", errno: err.errno })?;

        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            let discovered = run_discovery(self, path, &entry.name).await?;
            if !discovered.missing.is_empty() {
                schedule_entry_heal(self, path, &entry.name, discovered.attr, discovered.missing, discovered.geometry.as_ref());
            }
            views.push(DirEntryView {
                name: entry.name,
                is_dir: discovered.attr.is_dir,
                attr: discovered.attr,
            });
        }
        Ok(views)
    }
}
