//! Open / Read / Write / Lock (spec §4.4.2, §4.4.3, §4.4.9): the fops that
//! touch striped file data. Every one needs the inode's published
//! geometry; a miss means the file was looked up before this translator
//! instance discovered its layout, which should not happen once `lookup`
//! or `create` has run.

use fuser::{ReplyData, ReplyEmpty, ReplyOpen, ReplyWrite};

use striped_rs::subvolume::LockRequest;

use super::StripedFs;

impl StripedFs {
    pub(super) fn op_open(&mut self, ino: u64, reply: ReplyOpen) {
        match self.resolve(ino) {
            // The inode itself doubles as the file handle: geometry is
            // already keyed by inode in the cache, so no extra per-fd
            // state is needed beyond what `lookup`/`create` published.
            Ok(_) => reply.opened(ino, 0),
            Err(errno) => reply.error(errno),
        }
    }

    pub(super) fn op_read(&mut self, ino: u64, fh: u64, offset: i64, size: u32, reply: ReplyData) {
        let path = match self.resolve(fh) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let Some(geometry) = self.engine.cache().get(ino) else {
            reply.error(libc::EBADFD);
            return;
        };
        let offset = offset.max(0) as u64;
        match self.rt.block_on(self.engine.read(&geometry, &path, offset, size as usize)) {
            Ok(outcome) => reply.data(&outcome.data),
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_write(&mut self, ino: u64, fh: u64, offset: i64, data: &[u8], reply: ReplyWrite) {
        let path = match self.resolve(fh) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let Some(geometry) = self.engine.cache().get(ino) else {
            reply.error(libc::EBADFD);
            return;
        };
        let offset = offset.max(0) as u64;
        match self.rt.block_on(self.engine.write(&geometry, &path, offset, data)) {
            Ok(outcome) => reply.written(outcome.written as u32),
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_setlk(&mut self, ino: u64, fh: u64, start: u64, end: u64, typ: i32, reply: ReplyEmpty) {
        let path = match self.resolve(fh) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let Some(geometry) = self.engine.cache().get(ino) else {
            reply.error(libc::EBADFD);
            return;
        };
        let req = LockRequest {
            start,
            len: end.saturating_sub(start) + 1,
            exclusive: typ == libc::F_WRLCK,
        };
        match self.rt.block_on(self.engine.lock(&geometry, &path, req)) {
            Ok(_) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }
}
