//! Bridges `striped-rs`'s async fanout engine to `fuser`'s synchronous
//! `Filesystem` trait. Every callback blocks the calling fuse worker
//! thread on the async engine via `rt.block_on`, mirroring how the
//! translator's real dispatch loop (spec §1) serializes an incoming fop
//! onto the fanout engine before replying.
//!
//! One file per fop family, matching `striped-rs`'s own `fanout/` split:
//! `ops_attr` (lookup/getattr/setattr/getxattr/statfs/access/forget),
//! `ops_io` (open/read/write/lock), `ops_create`
//! (create/mknod/mkdir/rmdir/unlink/rename/link) and `ops_dir`
//! (opendir/readdir/releasedir/fsyncdir). `ops_sync` covers
//! flush/release/fsync for regular files.

mod core;
mod ops_attr;
mod ops_create;
mod ops_dir;
mod ops_io;
mod ops_sync;

use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use fuser::{
    Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs,
    ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use tokio::runtime::Handle;

use striped_rs::fanout::Engine;

use core::InodeTable;

/// The FUSE front end for one mounted translator instance.
pub struct StripedFs {
    engine: Arc<Engine>,
    rt: Handle,
    inodes: Mutex<InodeTable>,
}

impl StripedFs {
    #[must_use]
    pub fn new(engine: Arc<Engine>, rt: Handle) -> Self {
        Self { engine, rt, inodes: Mutex::new(InodeTable::new()) }
    }

    fn resolve(&self, ino: u64) -> Result<String, i32> {
        self.inodes.lock().unwrap().path(ino).ok_or(libc::ENOENT)
    }
}

impl Filesystem for StripedFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.op_lookup(parent, name, reply);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.op_forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        self.op_getattr(ino, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        self.op_setattr(ino, mode, uid, gid, size, reply);
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        self.op_access(ino, reply);
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        self.op_getxattr(ino, name, size, reply);
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        self.op_statfs(reply);
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        self.op_mknod(parent, name, mode, reply);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        self.op_create(parent, name, mode, reply);
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        self.op_mkdir(parent, name, mode, reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.op_unlink(parent, name, reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.op_rmdir(parent, name, reply);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        self.op_rename(parent, name, newparent, newname, reply);
    }

    fn link(&mut self, _req: &Request<'_>, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
        self.op_link(ino, newparent, newname, reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        self.op_open(ino, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.op_read(ino, fh, offset, size, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        self.op_write(ino, fh, offset, data, reply);
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        self.op_flush(ino, fh, reply);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.op_release(ino, fh, reply);
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        self.op_fsync(ino, fh, datasync, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn setlk(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        _pid: u32,
        _sleep: bool,
        reply: ReplyEmpty,
    ) {
        self.op_setlk(ino, fh, start, end, typ, reply);
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        self.op_opendir(ino, reply);
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, offset: i64, reply: ReplyDirectory) {
        self.op_readdir(ino, fh, offset, reply);
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.op_releasedir(ino, fh, reply);
    }

    fn fsyncdir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        self.op_fsyncdir(ino, fh, datasync, reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn striped_fs_implements_filesystem() {
        fn assert_impl<T: Filesystem>() {}
        assert_impl::<StripedFs>();
    }
}
