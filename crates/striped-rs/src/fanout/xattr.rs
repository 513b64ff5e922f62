//! Getxattr fanout for the three virtual attributes spec §4.4.11 exposes
//! above a striped file: `pathinfo` (§6.3's human-readable backend map),
//! `lockinfo` (a union of every subvolume's lock-table dump) and
//! `quota-size` (a big-endian 8-byte sum of every subvolume's reported
//! quota usage).

use std::collections::BTreeMap;

use crate::error::{Result, StripeError};
use crate::geometry::Geometry;

use super::Engine;

/// Outcome of a `pathinfo` fanout: the assembled diagnostic string.
pub struct PathinfoResult {
    pub pathinfo: String,
}

impl Engine {
    /// Builds the `pathinfo` string for `path` (spec §6.3): a
    /// `<STRIPE:<instance>:[<stripe-size>]>` header followed by every
    /// subvolume's own pathinfo reply, in stripe-index order.
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn pathinfo(&self, geometry: &Geometry, instance_name: &str, path: &str) -> Result<PathinfoResult> {
        let mut handles = Vec::with_capacity(geometry.stripe_count());
        for i in 0..geometry.stripe_count() {
            let subvolume = self
                .subvolume(geometry.subvolume(i))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            handles.push(tokio::spawn(async move { subvolume.pathinfo(&path).await }));
        }
        let mut children = Vec::with_capacity(handles.len());
        for handle in handles {
            let reply = handle
                .await
                .map_err(|_| StripeError::Consistency("pathinfo child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "pathinfo", errno: err.errno })?;
            children.push(reply);
        }

        let mut pathinfo = format!("(<STRIPE:{instance_name}:[{}]>", geometry.stripe_size());
        for child in children {
            pathinfo.push(' ');
            pathinfo.push_str(&child);
        }
        pathinfo.push(')');

        Ok(PathinfoResult { pathinfo })
    }

    /// Unions every subvolume's `lockinfo` xattr (spec §4.4.11): each
    /// child's value is a `\n`-delimited set of `key=value` lines; the
    /// merged result is deduplicated by key and re-sorted so the caller
    /// sees one coherent lock table regardless of which subvolume a given
    /// byte range's lock actually lives on.
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails.
    pub async fn lockinfo(&self, geometry: &Geometry, path: &str) -> Result<Vec<u8>> {
        let mut handles = Vec::with_capacity(geometry.stripe_count());
        for i in 0..geometry.stripe_count() {
            let subvolume = self
                .subvolume(geometry.subvolume(i))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            handles.push(tokio::spawn(async move { subvolume.getxattr(&path, "lockinfo").await }));
        }

        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for handle in handles {
            let bytes = handle
                .await
                .map_err(|_| StripeError::Consistency("lockinfo child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "lockinfo", errno: err.errno })?;
            let text = String::from_utf8_lossy(&bytes);
            for line in text.lines().filter(|l| !l.is_empty()) {
                if let Some((key, value)) = line.split_once('=') {
                    merged.insert(key.to_string(), value.to_string());
                }
            }
        }

        let mut out = String::new();
        for (key, value) in merged {
            out.push_str(&key);
            out.push('=');
            out.push_str(&value);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    /// Sums every subvolume's `trusted.glusterfs.quota.size` xattr (spec
    /// §4.4.11), each a big-endian `u64`, returning the total re-encoded
    /// the same way.
    ///
    /// # Errors
    /// Returns [`StripeError::ChildFailed`] if any subvolume fails, or
    /// [`StripeError::Consistency`] if a reply isn't 8 bytes.
    pub async fn quota_size(&self, geometry: &Geometry, path: &str) -> Result<[u8; 8]> {
        let mut handles = Vec::with_capacity(geometry.stripe_count());
        for i in 0..geometry.stripe_count() {
            let subvolume = self
                .subvolume(geometry.subvolume(i))
                .cloned()
                .ok_or(StripeError::NoGeometry)?;
            let path = path.to_string();
            handles.push(tokio::spawn(async move {
                subvolume.getxattr(&path, "trusted.glusterfs.quota.size").await
            }));
        }

        let mut total = 0u64;
        for handle in handles {
            let bytes = handle
                .await
                .map_err(|_| StripeError::Consistency("quota-size child task panicked".into()))?
                .map_err(|err| StripeError::ChildFailed { fop: "quota-size", errno: err.errno })?;
            let array: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StripeError::Consistency("quota-size reply was not 8 bytes".into()))?;
            total += u64::from_be_bytes(array);
        }
        Ok(total.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PatternRules};
    use crate::subvolume::{MockSubvolume, Subvolume, SubvolumeId};
    use std::sync::Arc;

    async fn engine_with_file(count: u64, stripe_size: u64) -> (Engine, Geometry) {
        let subs: Vec<Arc<dyn Subvolume>> = (0..count)
            .map(|i| Arc::new(MockSubvolume::new(SubvolumeId::new(i))) as Arc<dyn Subvolume>)
            .collect();
        for (i, sv) in subs.iter().enumerate() {
            let xattrs = crate::geometry::StripeXattrs {
                stripe_size: stripe_size as i64,
                stripe_count: count as i32,
                stripe_index: i as i32,
                stripe_coalesce: 1,
            };
            sv.create("/", "a.bin", 0o644, Some(xattrs), None).await.unwrap();
        }
        let config = Config::new(PatternRules::new(Vec::new(), stripe_size).unwrap(), true, true);
        let geometry = Geometry::new(stripe_size, (0..count).map(SubvolumeId::new).collect(), true).unwrap();
        (Engine::new(subs, config), geometry)
    }

    #[tokio::test]
    async fn pathinfo_lists_every_subvolume_in_order() {
        let (engine, geometry) = engine_with_file(3, 4096).await;
        let result = engine.pathinfo(&geometry, "vol0-stripe", "/a.bin").await.unwrap();
        assert!(result.pathinfo.starts_with("(<STRIPE:vol0-stripe:[4096]>"));
        assert!(result.pathinfo.ends_with(')'));
    }

    #[tokio::test]
    async fn quota_size_sums_every_subvolume() {
        let (engine, geometry) = engine_with_file(2, 4096).await;
        for (i, sv) in engine.subvolumes().iter().enumerate() {
            sv.setxattr(
                "/a.bin",
                "trusted.glusterfs.quota.size",
                (((i as u64) + 1) * 100).to_be_bytes().to_vec(),
            )
            .await
            .unwrap();
        }
        let total = engine.quota_size(&geometry, "/a.bin").await.unwrap();
        assert_eq!(u64::from_be_bytes(total), 300);
    }

    #[tokio::test]
    async fn lockinfo_merges_distinct_keys_from_every_subvolume() {
        let (engine, geometry) = engine_with_file(2, 4096).await;
        engine.subvolumes()[0]
            .setxattr("/a.bin", "lockinfo", b"a=1\n".to_vec())
            .await
            .unwrap();
        engine.subvolumes()[1]
            .setxattr("/a.bin", "lockinfo", b"b=2\n".to_vec())
            .await
            .unwrap();
        let merged = engine.lockinfo(&geometry, "/a.bin").await.unwrap();
        let text = String::from_utf8(merged).unwrap();
        assert!(text.contains("a=1"));
        assert!(text.contains("b=2"));
    }
}
