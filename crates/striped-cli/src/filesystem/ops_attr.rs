//! Lookup / Forget / Getattr / Setattr / Getxattr / Statfs / Access (spec
//! §4.4.1, §4.4.8, §4.4.11): the metadata-only fops. Every call here
//! either consults the already-cached geometry or runs the engine's own
//! discovery fanout, never touching file data.

use std::ffi::OsStr;

use fuser::{ReplyAttr, ReplyEmpty, ReplyEntry, ReplyStatfs, ReplyXattr};

use striped_rs::subvolume::SetAttr;

use super::core::{self, TTL};
use super::StripedFs;

impl StripedFs {
    pub(super) fn op_lookup(&mut self, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let parent_path = match self.resolve(parent) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let child_path = core::join(&parent_path, name);

        let ino = self.inodes.lock().unwrap().ino_for_path(&child_path, false);

        match self.rt.block_on(self.engine.lookup(ino, &parent_path, name)) {
            Ok(outcome) => {
                let mut inodes = self.inodes.lock().unwrap();
                inodes.ino_for_path(&child_path, outcome.attr.is_dir);
                inodes.bump(ino, 1);
                drop(inodes);
                reply.entry(&TTL, &core::file_attr(ino, &outcome.attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_forget(&mut self, ino: u64, nlookup: u64) {
        if self.inodes.lock().unwrap().forget(ino, nlookup).is_some() {
            self.engine.cache().forget(ino);
        }
    }

    pub(super) fn op_getattr(&mut self, ino: u64, reply: ReplyAttr) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let is_dir = self.inodes.lock().unwrap().is_dir(ino).unwrap_or(true);
        if is_dir {
            // No separate "stat a directory" fop exists on the engine; an
            // all-`None` setattr fans out with no writes and hands back the
            // primary's current attributes, same as a plain getattr would.
            match self.rt.block_on(self.engine.setattr_dir(&path, SetAttr::default())) {
                Ok(result) => reply.attr(&TTL, &core::file_attr(ino, &result.post)),
                Err(err) => reply.error(err.errno()),
            }
            return;
        }
        let Some(geometry) = self.engine.cache().get(ino) else {
            reply.error(libc::EBADFD);
            return;
        };
        match self.rt.block_on(self.engine.stat(&geometry, &path)) {
            Ok(result) => reply.attr(&TTL, &core::file_attr(ino, &result.attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_setattr(
        &mut self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        reply: ReplyAttr,
    ) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let attr = SetAttr { size, mode, uid, gid };
        let is_dir = self.inodes.lock().unwrap().is_dir(ino).unwrap_or(true);
        if is_dir {
            match self.rt.block_on(self.engine.setattr_dir(&path, attr)) {
                Ok(result) => reply.attr(&TTL, &core::file_attr(ino, &result.post)),
                Err(err) => reply.error(err.errno()),
            }
            return;
        }
        let Some(geometry) = self.engine.cache().get(ino) else {
            reply.error(libc::EBADFD);
            return;
        };
        match self.rt.block_on(self.engine.setattr(&geometry, &path, attr)) {
            Ok(result) => reply.attr(&TTL, &core::file_attr(ino, &result.post)),
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_access(&mut self, ino: u64, reply: ReplyEmpty) {
        match self.resolve(ino) {
            Ok(_) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    pub(super) fn op_getxattr(&mut self, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(geometry) = self.engine.cache().get(ino) else {
            reply.error(libc::ENODATA);
            return;
        };

        let value = match name {
            "trusted.glusterfs.pathinfo" => self
                .rt
                .block_on(self.engine.pathinfo(&geometry, "striped-cli", &path))
                .map(|r| r.pathinfo.into_bytes()),
            "lockinfo" => self.rt.block_on(self.engine.lockinfo(&geometry, &path)),
            "trusted.glusterfs.quota.size" => self
                .rt
                .block_on(self.engine.quota_size(&geometry, &path))
                .map(|bytes| bytes.to_vec()),
            _ => {
                reply.error(libc::ENODATA);
                return;
            }
        };

        match value {
            Ok(bytes) => {
                if size == 0 {
                    reply.size(bytes.len() as u32);
                } else if bytes.len() > size as usize {
                    reply.error(libc::ERANGE);
                } else {
                    reply.data(&bytes);
                }
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_statfs(&mut self, reply: ReplyStatfs) {
        // Capacity accounting across heterogeneous subvolumes is out of
        // scope; report a permissive stub so tools that merely check for
        // free space succeed.
        reply.statfs(0, 0, 0, 0, 0, 512, 255, 0);
    }
}
