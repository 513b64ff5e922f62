//! Opendir / Readdir / Releasedir / Fsyncdir (spec §4.4.10): directory
//! fops are replicated across every subvolume, never striped, so none of
//! these need geometry.

use fuser::{FileType, ReplyDirectory, ReplyEmpty, ReplyOpen};

use super::core;
use super::StripedFs;

impl StripedFs {
    pub(super) fn op_opendir(&mut self, ino: u64, reply: ReplyOpen) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.rt.block_on(self.engine.opendir(&path)) {
            Ok(()) => reply.opened(ino, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_readdir(&mut self, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        match self.rt.block_on(self.engine.readdirp(&path)) {
            Ok(views) => {
                let parent = core::parent_path(&path);
                let parent_ino = if ino == core::ROOT_INO {
                    core::ROOT_INO
                } else {
                    self.inodes.lock().unwrap().ino_for_path(&parent, true)
                };

                let mut entries = vec![
                    (ino, FileType::Directory, ".".to_string()),
                    (parent_ino, FileType::Directory, "..".to_string()),
                ];
                for view in views {
                    let child_path = core::join(&path, &view.name);
                    let child_ino = self.inodes.lock().unwrap().ino_for_path(&child_path, view.is_dir);
                    let kind = if view.is_dir { FileType::Directory } else { FileType::RegularFile };
                    entries.push((child_ino, kind, view.name));
                }

                for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
                    if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    pub(super) fn op_releasedir(&mut self, _ino: u64, _fh: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    pub(super) fn op_fsyncdir(&mut self, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.rt.block_on(self.engine.fsyncdir(&path)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }
}
