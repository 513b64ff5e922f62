//! Flush / Release / Fsync (spec §4.4.8): the close-path fops for a
//! regular file's open handle. Flush and release carry no state to flush
//! beyond what every write already committed, so both are existence
//! checks; fsync is the one that actually fans out to the subvolumes.

use fuser::ReplyEmpty;

use super::StripedFs;

impl StripedFs {
    pub(super) fn op_flush(&mut self, ino: u64, _fh: u64, reply: ReplyEmpty) {
        match self.resolve(ino) {
            Ok(_) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    pub(super) fn op_release(&mut self, ino: u64, _fh: u64, reply: ReplyEmpty) {
        match self.resolve(ino) {
            Ok(_) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    pub(super) fn op_fsync(&mut self, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
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
        match self.rt.block_on(self.engine.fsync(&geometry, &path, datasync)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }
}
