//! Directory-backed [`Subvolume`]: the real, on-disk collaborator the
//! engine fans fops out to. Each logical path is resolved under one
//! configured root directory; per-file geometry and gfid live as real
//! extended attributes via the `xattr` crate, and every blocking
//! filesystem call runs on tokio's blocking pool so the async engine
//! never stalls a worker thread on disk IO.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use striped_rs::geometry::StripeXattrs;
use striped_rs::subvolume::{
    ChildError, ChildResult, CreateReply, DirEntry, Iatt, LockReply, LockRequest, ReadReply,
    SetAttr, Subvolume, SubvolumeId, WriteReply,
};

/// A real directory tree acting as one backend subvolume.
pub struct DirSubvolume {
    id: SubvolumeId,
    root: PathBuf,
}

impl DirSubvolume {
    #[must_use]
    pub const fn new(id: SubvolumeId, root: PathBuf) -> Self {
        Self { id, root }
    }

    fn resolve(&self, logical: &str) -> PathBuf {
        if logical == "/" {
            self.root.clone()
        } else {
            self.root.join(logical.trim_start_matches('/'))
        }
    }

    fn join(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }
}

#[async_trait]
impl Subvolume for DirSubvolume {
    fn id(&self) -> SubvolumeId {
        self.id
    }

    async fn lookup(&self, parent: &str, name: &str) -> ChildResult<Iatt> {
        let full = self.resolve(&Self::join(parent, name));
        blocking(move || {
            let meta = fs::metadata(&full).map_err(|e| io_err(e, "lookup"))?;
            let gfid = read_gfid(&full).unwrap_or_default();
            Ok(iatt_from_metadata(&meta, gfid))
        })
        .await
    }

    async fn getattr(&self, path: &str) -> ChildResult<Iatt> {
        let full = self.resolve(path);
        blocking(move || {
            let meta = fs::metadata(&full).map_err(|e| io_err(e, "getattr"))?;
            let gfid = read_gfid(&full).unwrap_or_default();
            Ok(iatt_from_metadata(&meta, gfid))
        })
        .await
    }

    async fn setattr(&self, path: &str, attr: SetAttr) -> ChildResult<(Iatt, Iatt)> {
        let full = self.resolve(path);
        blocking(move || {
            let gfid = read_gfid(&full).unwrap_or_default();
            let pre = iatt_from_metadata(&fs::metadata(&full).map_err(|e| io_err(e, "setattr"))?, gfid);

            if let Some(size) = attr.size {
                let file = OpenOptions::new().write(true).open(&full).map_err(|e| io_err(e, "ftruncate"))?;
                file.set_len(size).map_err(|e| io_err(e, "ftruncate"))?;
            }
            if let Some(mode) = attr.mode {
                fs::set_permissions(&full, Permissions::from_mode(mode & 0o7777)).map_err(|e| io_err(e, "chmod"))?;
            }
            if attr.uid.is_some() || attr.gid.is_some() {
                chown(&full, attr.uid, attr.gid)?;
            }

            let post = iatt_from_metadata(&fs::metadata(&full).map_err(|e| io_err(e, "setattr"))?, gfid);
            Ok((pre, post))
        })
        .await
    }

    async fn read(&self, path: &str, offset: u64, len: usize) -> ChildResult<ReadReply> {
        let full = self.resolve(path);
        blocking(move || {
            let mut file = File::open(&full).map_err(|e| io_err(e, "read"))?;
            let meta = file.metadata().map_err(|e| io_err(e, "read"))?;
            let gfid = read_gfid(&full).unwrap_or_default();
            file.seek(SeekFrom::Start(offset)).map_err(|e| io_err(e, "read seek"))?;
            let mut data = vec![0u8; len];
            let n = read_fully(&mut file, &mut data)?;
            data.truncate(n);
            Ok(ReadReply { data, attr: iatt_from_metadata(&meta, gfid) })
        })
        .await
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> ChildResult<WriteReply> {
        let full = self.resolve(path);
        let data = data.to_vec();
        blocking(move || {
            let mut file = OpenOptions::new().write(true).open(&full).map_err(|e| io_err(e, "write"))?;
            let gfid = read_gfid(&full).unwrap_or_default();
            let pre = iatt_from_metadata(&file.metadata().map_err(|e| io_err(e, "write"))?, gfid);
            file.seek(SeekFrom::Start(offset)).map_err(|e| io_err(e, "write seek"))?;
            file.write_all(&data).map_err(|e| io_err(e, "write"))?;
            let post = iatt_from_metadata(&file.metadata().map_err(|e| io_err(e, "write"))?, gfid);
            Ok(WriteReply { written: data.len(), pre, post })
        })
        .await
    }

    async fn truncate(&self, path: &str, size: u64) -> ChildResult<(Iatt, Iatt)> {
        let full = self.resolve(path);
        blocking(move || {
            let gfid = read_gfid(&full).unwrap_or_default();
            let pre = iatt_from_metadata(&fs::metadata(&full).map_err(|e| io_err(e, "truncate"))?, gfid);
            let file = OpenOptions::new().write(true).open(&full).map_err(|e| io_err(e, "truncate"))?;
            file.set_len(size).map_err(|e| io_err(e, "ftruncate"))?;
            let post = iatt_from_metadata(&file.metadata().map_err(|e| io_err(e, "truncate"))?, gfid);
            Ok((pre, post))
        })
        .await
    }

    async fn fallocate(&self, path: &str, offset: u64, len: u64, zero: bool) -> ChildResult<(Iatt, Iatt)> {
        let full = self.resolve(path);
        blocking(move || {
            let gfid = read_gfid(&full).unwrap_or_default();
            let pre = iatt_from_metadata(&fs::metadata(&full).map_err(|e| io_err(e, "fallocate"))?, gfid);
            let mut file = OpenOptions::new().write(true).open(&full).map_err(|e| io_err(e, "fallocate"))?;
            let end = offset + len;
            if pre.size < end {
                file.set_len(end).map_err(|e| io_err(e, "fallocate"))?;
            }
            if zero {
                file.seek(SeekFrom::Start(offset)).map_err(|e| io_err(e, "fallocate seek"))?;
                file.write_all(&vec![0u8; len as usize]).map_err(|e| io_err(e, "zerofill"))?;
            }
            let post = iatt_from_metadata(&file.metadata().map_err(|e| io_err(e, "fallocate"))?, gfid);
            Ok((pre, post))
        })
        .await
    }

    async fn create(
        &self,
        parent: &str,
        name: &str,
        mode: u32,
        xattrs: Option<StripeXattrs>,
        gfid: Option<[u8; 16]>,
    ) -> ChildResult<CreateReply> {
        let full = self.resolve(&Self::join(parent, name));
        let perm = mode & 0o7777;
        blocking(move || {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&full)
                .map_err(|e| io_err(e, "create"))?;
            file.set_permissions(Permissions::from_mode(perm)).map_err(|e| io_err(e, "create"))?;
            let gfid = gfid.unwrap_or_else(random_gfid);
            write_gfid(&full, &gfid)?;
            if let Some(x) = xattrs {
                set_stripe_xattrs(&full, &x)?;
            }
            let meta = file.metadata().map_err(|e| io_err(e, "create"))?;
            Ok(CreateReply { attr: iatt_from_metadata(&meta, gfid) })
        })
        .await
    }

    async fn mkdir(&self, parent: &str, name: &str, mode: u32) -> ChildResult<Iatt> {
        let full = self.resolve(&Self::join(parent, name));
        let perm = mode & 0o7777;
        blocking(move || {
            fs::create_dir(&full).map_err(|e| io_err(e, "mkdir"))?;
            fs::set_permissions(&full, Permissions::from_mode(perm)).map_err(|e| io_err(e, "mkdir"))?;
            let meta = fs::metadata(&full).map_err(|e| io_err(e, "mkdir"))?;
            Ok(iatt_from_metadata(&meta, [0u8; 16]))
        })
        .await
    }

    async fn rmdir(&self, parent: &str, name: &str) -> ChildResult<()> {
        let full = self.resolve(&Self::join(parent, name));
        blocking(move || fs::remove_dir(&full).map_err(|e| io_err(e, "rmdir"))).await
    }

    async fn unlink(&self, parent: &str, name: &str) -> ChildResult<()> {
        let full = self.resolve(&Self::join(parent, name));
        blocking(move || fs::remove_file(&full).map_err(|e| io_err(e, "unlink"))).await
    }

    async fn rename(&self, old_parent: &str, old_name: &str, new_parent: &str, new_name: &str) -> ChildResult<()> {
        let old = self.resolve(&Self::join(old_parent, old_name));
        let new = self.resolve(&Self::join(new_parent, new_name));
        blocking(move || fs::rename(&old, &new).map_err(|e| io_err(e, "rename"))).await
    }

    async fn link(&self, path: &str, new_parent: &str, new_name: &str) -> ChildResult<Iatt> {
        let src = self.resolve(path);
        let dst = self.resolve(&Self::join(new_parent, new_name));
        blocking(move || {
            fs::hard_link(&src, &dst).map_err(|e| io_err(e, "link"))?;
            let gfid = read_gfid(&dst).unwrap_or_default();
            let meta = fs::metadata(&dst).map_err(|e| io_err(e, "link"))?;
            Ok(iatt_from_metadata(&meta, gfid))
        })
        .await
    }

    async fn fsync(&self, path: &str, datasync: bool) -> ChildResult<()> {
        let full = self.resolve(path);
        blocking(move || {
            let file = OpenOptions::new().read(true).open(&full).map_err(|e| io_err(e, "fsync"))?;
            if datasync {
                file.sync_data().map_err(|e| io_err(e, "fdatasync"))
            } else {
                file.sync_all().map_err(|e| io_err(e, "fsync"))
            }
        })
        .await
    }

    async fn readdir(&self, path: &str) -> ChildResult<Vec<DirEntry>> {
        let full = self.resolve(path);
        blocking(move || {
            let mut entries = Vec::new();
            for entry in fs::read_dir(&full).map_err(|e| io_err(e, "readdir"))? {
                let entry = entry.map_err(|e| io_err(e, "readdir"))?;
                let is_dir = entry.file_type().map_err(|e| io_err(e, "readdir"))?.is_dir();
                entries.push(DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir,
                });
            }
            Ok(entries)
        })
        .await
    }

    async fn getxattr(&self, path: &str, name: &str) -> ChildResult<Vec<u8>> {
        let full = self.resolve(path);
        let key = xattr_key(name);
        blocking(move || {
            xattr::get(&full, &key)
                .map_err(|e| io_err(e, "getxattr"))?
                .ok_or_else(|| ChildError::new(libc::ENODATA, "no such attribute"))
        })
        .await
    }

    async fn setxattr(&self, path: &str, name: &str, value: Vec<u8>) -> ChildResult<()> {
        let full = self.resolve(path);
        let key = xattr_key(name);
        blocking(move || xattr::set(&full, &key, &value).map_err(|e| io_err(e, "setxattr"))).await
    }

    async fn pathinfo(&self, path: &str) -> ChildResult<String> {
        let full = self.resolve(path);
        Ok(format!("<POSIX:{}:{}>", self.id.index(), full.display()))
    }

    async fn lock(&self, path: &str, req: LockRequest) -> ChildResult<LockReply> {
        let full = self.resolve(path);
        blocking(move || {
            let file = OpenOptions::new().read(true).write(true).open(&full).map_err(|e| io_err(e, "lock"))?;
            let operation = (if req.exclusive { libc::LOCK_EX } else { libc::LOCK_SH }) | libc::LOCK_NB;
            let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
            if rc != 0 {
                return Err(io_err(std::io::Error::last_os_error(), "flock"));
            }
            Ok(LockReply { start: req.start, len: req.len })
        })
        .await
    }
}

/// Runs a blocking filesystem closure on tokio's blocking pool, so the
/// async fanout engine never stalls a worker thread on disk IO.
async fn blocking<T, F>(f: F) -> ChildResult<T>
where
    F: FnOnce() -> ChildResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|_| Err(ChildError::new(libc::EIO, "background task panicked")))
}

fn io_err(err: std::io::Error, context: &str) -> ChildError {
    ChildError::new(err.raw_os_error().unwrap_or(libc::EIO), format!("{context}: {err}"))
}

fn read_fully(file: &mut File, buf: &mut [u8]) -> ChildResult<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(io_err(e, "read")),
        }
    }
    Ok(total)
}

fn iatt_from_metadata(meta: &fs::Metadata, gfid: [u8; 16]) -> Iatt {
    Iatt {
        size: meta.len(),
        blocks: meta.blocks(),
        mode: meta.mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
        is_dir: meta.is_dir(),
        gfid,
    }
}

fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> ChildResult<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ChildError::new(libc::EINVAL, "path contains a NUL byte"))?;
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid.unwrap_or(u32::MAX), gid.unwrap_or(u32::MAX)) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io_err(std::io::Error::last_os_error(), "chown"))
    }
}

/// Bare xattr names (everything the engine's own fanout code uses —
/// `stripe-size`, `lockinfo`, ...) live under the `user.` namespace, the
/// one unprivileged real filesystems actually allow; already-namespaced
/// names (like `trusted.glusterfs.quota.size`) are passed through as-is.
fn xattr_key(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("user.{name}")
    }
}

fn read_gfid(path: &Path) -> Option<[u8; 16]> {
    xattr::get(path, "user.gfid").ok().flatten()?.try_into().ok()
}

fn write_gfid(path: &Path, gfid: &[u8; 16]) -> ChildResult<()> {
    xattr::set(path, "user.gfid", gfid).map_err(|e| io_err(e, "setxattr gfid"))
}

fn random_gfid() -> [u8; 16] {
    use rand::RngCore;
    let mut gfid = [0u8; 16];
    rand::rng().fill_bytes(&mut gfid);
    gfid
}

fn set_stripe_xattrs(path: &Path, x: &StripeXattrs) -> ChildResult<()> {
    xattr::set(path, "user.stripe-size", &x.stripe_size.to_le_bytes()).map_err(|e| io_err(e, "setxattr"))?;
    xattr::set(path, "user.stripe-count", &x.stripe_count.to_le_bytes()).map_err(|e| io_err(e, "setxattr"))?;
    xattr::set(path, "user.stripe-index", &x.stripe_index.to_le_bytes()).map_err(|e| io_err(e, "setxattr"))?;
    xattr::set(path, "user.stripe-coalesce", &x.stripe_coalesce.to_le_bytes()).map_err(|e| io_err(e, "setxattr"))?;
    Ok(())
}
