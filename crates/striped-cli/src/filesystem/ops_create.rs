//! Create / Mknod / Mkdir / Unlink / Rmdir / Rename / Link (spec §4.1,
//! §4.4.6, §4.4.7): every fop that adds, removes, or moves a directory
//! entry, plus the inode-table bookkeeping that keeps logical paths and
//! FUSE inode numbers in sync.

use std::ffi::OsStr;

use fuser::{ReplyCreate, ReplyEmpty, ReplyEntry};

use super::core::{self, TTL};
use super::StripedFs;

impl StripedFs {
    pub(super) fn op_create(&mut self, parent: u64, name: &OsStr, mode: u32, reply: ReplyCreate) {
        let parent_path = match self.resolve(parent) {
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
        let child_path = core::join(&parent_path, name);
        let ino = self.inodes.lock().unwrap().ino_for_path(&child_path, false);
        let stripe_size = self.engine.config().patterns.resolve(&child_path);

        match self.rt.block_on(self.engine.create(ino, &parent_path, name, mode, stripe_size)) {
            Ok(outcome) => {
                self.inodes.lock().unwrap().bump(ino, 1);
                reply.created(&TTL, &core::file_attr(ino, &outcome.attr), 0, ino, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_mknod(&mut self, parent: u64, name: &OsStr, mode: u32, reply: ReplyEntry) {
        let parent_path = match self.resolve(parent) {
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
        let child_path = core::join(&parent_path, name);
        let ino = self.inodes.lock().unwrap().ino_for_path(&child_path, false);
        let stripe_size = self.engine.config().patterns.resolve(&child_path);

        match self.rt.block_on(self.engine.create(ino, &parent_path, name, mode, stripe_size)) {
            Ok(outcome) => {
                let mut inodes = self.inodes.lock().unwrap();
                inodes.bump(ino, 1);
                drop(inodes);
                reply.entry(&TTL, &core::file_attr(ino, &outcome.attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_mkdir(&mut self, parent: u64, name: &OsStr, mode: u32, reply: ReplyEntry) {
        let parent_path = match self.resolve(parent) {
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
        let child_path = core::join(&parent_path, name);

        match self.rt.block_on(self.engine.mkdir(&parent_path, name, mode)) {
            Ok(attr) => {
                let mut inodes = self.inodes.lock().unwrap();
                let ino = inodes.ino_for_path(&child_path, true);
                inodes.bump(ino, 1);
                drop(inodes);
                reply.entry(&TTL, &core::file_attr(ino, &attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_unlink(&mut self, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let parent_path = match self.resolve(parent) {
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
        match self.rt.block_on(self.engine.unlink(&parent_path, name)) {
            Ok(()) => {
                let child_path = core::join(&parent_path, name);
                if let Some(ino) = self.inodes.lock().unwrap().remove_path(&child_path) {
                    self.engine.cache().forget(ino);
                }
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_rmdir(&mut self, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let parent_path = match self.resolve(parent) {
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
        match self.rt.block_on(self.engine.rmdir(&parent_path, name)) {
            Ok(()) => {
                let child_path = core::join(&parent_path, name);
                self.inodes.lock().unwrap().remove_path(&child_path);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_rename(&mut self, parent: u64, name: &OsStr, newparent: u64, newname: &OsStr, reply: ReplyEmpty) {
        let old_parent = match self.resolve(parent) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let new_parent = match self.resolve(newparent) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let (Some(name), Some(newname)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };

        match self.rt.block_on(self.engine.rename(&old_parent, name, &new_parent, newname)) {
            Ok(()) => {
                let old_path = core::join(&old_parent, name);
                let new_path = core::join(&new_parent, newname);
                self.inodes.lock().unwrap().rename(&old_path, &new_path);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_link(&mut self, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let new_parent = match self.resolve(newparent) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let Some(newname) = newname.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };

        match self.rt.block_on(self.engine.link(&path, &new_parent, newname)) {
            Ok(attr) => {
                // Hardlinks get their own FUSE inode number here: the
                // inode table is keyed one-to-one by logical path, so a
                // second name for the same gfid is tracked as a distinct
                // entry rather than sharing `ino`.
                let new_path = core::join(&new_parent, newname);
                let mut inodes = self.inodes.lock().unwrap();
                let new_ino = inodes.ino_for_path(&new_path, false);
                inodes.bump(new_ino, 1);
                drop(inodes);
                reply.entry(&TTL, &core::file_attr(new_ino, &attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }
}
