//! The subvolume collaborator interface (spec §1: "the core only calls
//! opaque `subvol.fop(...)` and receives callbacks").
//!
//! Everything below this trait — the per-subvolume RPC client, the real
//! on-disk backend — is out of the core's scope; the engine only depends
//! on this trait and the types it exchanges. `MockSubvolume` is an
//! in-memory test double used by the engine's own unit and scenario
//! tests; `striped-cli` supplies a real, directory-backed implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::geometry::StripeXattrs;

/// `SubvolumeId` addresses one of the N backend subvolumes by its fixed
/// position in the translator's configured child list (spec glossary:
/// "Subvolume ... addressed only by an index").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubvolumeId(u64);

impl SubvolumeId {
    #[must_use]
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> u64 {
        self.0
    }
}

/// `ChildError` is what a subvolume fop call fails with: a POSIX errno plus
/// an optional message for logging.
#[derive(Clone, Debug)]
pub struct ChildError {
    pub errno: i32,
    pub message: String,
}

impl ChildError {
    #[must_use]
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ChildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "errno {}: {}", self.errno, self.message)
    }
}

impl std::error::Error for ChildError {}

/// `ChildResult` is the result type every [`Subvolume`] method returns.
pub type ChildResult<T> = std::result::Result<T, ChildError>;

/// `Iatt` is a minimal stat-like attribute record — the subset of POSIX
/// metadata the engine reconciles or forwards (spec §3.3, §4.4.8).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Iatt {
    pub size: u64,
    pub blocks: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub is_dir: bool,
    pub gfid: [u8; 16],
}

/// `SetAttr` carries the optional fields a `setattr`/`fsetattr` fop may update.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetAttr {
    pub size: Option<u64>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// `ReadReply` is what a child `read` returns: the bytes actually read and
/// the subvolume's current attributes (used for size reconciliation).
#[derive(Clone, Debug, Default)]
pub struct ReadReply {
    pub data: Vec<u8>,
    pub attr: Iatt,
}

/// `WriteReply` is what a child `write` returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteReply {
    pub written: usize,
    pub pre: Iatt,
    pub post: Iatt,
}

/// `CreateReply` is what a child `create`/`mknod` returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreateReply {
    pub attr: Iatt,
}

/// `DirEntry` is one entry from a child `readdir` (spec §4.4.10).
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// `LockRequest`/`LockReply` model the posix-lock fop (spec §4.4.9).
#[derive(Clone, Copy, Debug)]
pub struct LockRequest {
    pub start: u64,
    pub len: u64,
    pub exclusive: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LockReply {
    pub start: u64,
    pub len: u64,
}

/// `Subvolume` is the opaque per-backend fop interface the fanout engine
/// dispatches to. Every method corresponds to one fop class from spec §4.4.
#[async_trait]
pub trait Subvolume: Send + Sync {
    fn id(&self) -> SubvolumeId;

    async fn lookup(&self, parent: &str, name: &str) -> ChildResult<Iatt>;
    async fn getattr(&self, path: &str) -> ChildResult<Iatt>;
    async fn setattr(&self, path: &str, attr: SetAttr) -> ChildResult<(Iatt, Iatt)>;

    async fn read(&self, path: &str, offset: u64, len: usize) -> ChildResult<ReadReply>;
    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> ChildResult<WriteReply>;
    async fn truncate(&self, path: &str, size: u64) -> ChildResult<(Iatt, Iatt)>;
    async fn fallocate(&self, path: &str, offset: u64, len: u64, zero: bool) -> ChildResult<(Iatt, Iatt)>;

    /// `gfid`, when set, pins the new file's gfid to a caller-chosen value
    /// (spec §4.1's "creation xattr" a phase-2 create carries so every
    /// subvolume settles on the primary's gfid rather than racing its
    /// own). `None` means "generate one" — the path phase-1 create (and
    /// any subvolume created outside the two-phase protocol) takes.
    async fn create(
        &self,
        parent: &str,
        name: &str,
        mode: u32,
        xattrs: Option<StripeXattrs>,
        gfid: Option<[u8; 16]>,
    ) -> ChildResult<CreateReply>;
    async fn mkdir(&self, parent: &str, name: &str, mode: u32) -> ChildResult<Iatt>;
    async fn rmdir(&self, parent: &str, name: &str) -> ChildResult<()>;
    async fn unlink(&self, parent: &str, name: &str) -> ChildResult<()>;
    async fn rename(
        &self,
        old_parent: &str,
        old_name: &str,
        new_parent: &str,
        new_name: &str,
    ) -> ChildResult<()>;
    async fn link(&self, path: &str, new_parent: &str, new_name: &str) -> ChildResult<Iatt>;

    async fn fsync(&self, path: &str, datasync: bool) -> ChildResult<()>;
    async fn readdir(&self, path: &str) -> ChildResult<Vec<DirEntry>>;

    async fn getxattr(&self, path: &str, name: &str) -> ChildResult<Vec<u8>>;
    async fn setxattr(&self, path: &str, name: &str, value: Vec<u8>) -> ChildResult<()>;
    async fn pathinfo(&self, path: &str) -> ChildResult<String>;

    async fn lock(&self, path: &str, req: LockRequest) -> ChildResult<LockReply>;
}

#[derive(Clone, Debug, Default)]
struct MockFile {
    data: Vec<u8>,
    mode: u32,
    uid: u32,
    gid: u32,
    is_dir: bool,
    gfid: [u8; 16],
    xattrs: HashMap<String, Vec<u8>>,
    children: Vec<String>,
}

/// `MockSubvolume` is an in-memory stand-in for the RPC-client collaborator,
/// used by the engine's own tests and by `striped-cli`'s `scenario`
/// subcommand. Fault injection lets tests reproduce spec §8's failure
/// scenarios (e.g. `EIO` on a specific subvolume).
pub struct MockSubvolume {
    id: SubvolumeId,
    files: Mutex<HashMap<String, MockFile>>,
    fail_next: Mutex<Option<i32>>,
    down: std::sync::atomic::AtomicBool,
}

impl MockSubvolume {
    #[must_use]
    pub fn new(id: SubvolumeId) -> Self {
        let mut files = HashMap::new();
        files.insert(
            "/".to_string(),
            MockFile {
                is_dir: true,
                mode: 0o755,
                ..Default::default()
            },
        );
        Self {
            id,
            files: Mutex::new(files),
            fail_next: Mutex::new(None),
            down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Causes the next fop call to fail with `errno`, once.
    pub fn inject_failure(&self, errno: i32) {
        *self.fail_next.lock().unwrap() = Some(errno);
    }

    /// Marks this subvolume as unreachable for availability-class fops.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, std::sync::atomic::Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_down(&self) -> bool {
        self.down.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> ChildResult<()> {
        if self.down.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ChildError::new(libc::ENOTCONN, "subvolume marked down"));
        }
        if let Some(errno) = self.fail_next.lock().unwrap().take() {
            return Err(ChildError::new(errno, "injected failure"));
        }
        Ok(())
    }

    fn join(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    fn iatt_of(file: &MockFile) -> Iatt {
        Iatt {
            size: file.data.len() as u64,
            blocks: (file.data.len() as u64).div_ceil(512),
            mode: file.mode,
            uid: file.uid,
            gid: file.gid,
            is_dir: file.is_dir,
            gfid: file.gfid,
        }
    }

    /// Present only for tests that want to inspect raw backend bytes
    /// directly (mirrors spec §8 scenarios checking backend offsets).
    #[must_use]
    pub fn raw_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).map(|f| f.data.clone())
    }
}

#[async_trait]
impl Subvolume for MockSubvolume {
    fn id(&self) -> SubvolumeId {
        self.id
    }

    async fn lookup(&self, parent: &str, name: &str) -> ChildResult<Iatt> {
        self.take_injected_failure()?;
        let path = Self::join(parent, name);
        let files = self.files.lock().unwrap();
        files
            .get(&path)
            .map(Self::iatt_of)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))
    }

    async fn getattr(&self, path: &str) -> ChildResult<Iatt> {
        self.take_injected_failure()?;
        let files = self.files.lock().unwrap();
        files
            .get(path)
            .map(Self::iatt_of)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))
    }

    async fn setattr(&self, path: &str, attr: SetAttr) -> ChildResult<(Iatt, Iatt)> {
        self.take_injected_failure()?;
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        let pre = Self::iatt_of(file);
        if let Some(size) = attr.size {
            file.data.resize(size as usize, 0);
        }
        if let Some(mode) = attr.mode {
            file.mode = mode;
        }
        if let Some(uid) = attr.uid {
            file.uid = uid;
        }
        if let Some(gid) = attr.gid {
            file.gid = gid;
        }
        let post = Self::iatt_of(file);
        Ok((pre, post))
    }

    async fn read(&self, path: &str, offset: u64, len: usize) -> ChildResult<ReadReply> {
        self.take_injected_failure()?;
        let files = self.files.lock().unwrap();
        let file = files
            .get(path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        let off = offset as usize;
        let data = if off >= file.data.len() {
            Vec::new()
        } else {
            let end = (off + len).min(file.data.len());
            file.data[off..end].to_vec()
        };
        Ok(ReadReply {
            data,
            attr: Self::iatt_of(file),
        })
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> ChildResult<WriteReply> {
        self.take_injected_failure()?;
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        let pre = Self::iatt_of(file);
        let off = offset as usize;
        let end = off + data.len();
        if file.data.len() < end {
            file.data.resize(end, 0);
        }
        file.data[off..end].copy_from_slice(data);
        let post = Self::iatt_of(file);
        Ok(WriteReply {
            written: data.len(),
            pre,
            post,
        })
    }

    async fn truncate(&self, path: &str, size: u64) -> ChildResult<(Iatt, Iatt)> {
        self.take_injected_failure()?;
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        let pre = Self::iatt_of(file);
        file.data.resize(size as usize, 0);
        let post = Self::iatt_of(file);
        Ok((pre, post))
    }

    async fn fallocate(&self, path: &str, offset: u64, len: u64, zero: bool) -> ChildResult<(Iatt, Iatt)> {
        self.take_injected_failure()?;
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        let pre = Self::iatt_of(file);
        let end = (offset + len) as usize;
        if file.data.len() < end {
            file.data.resize(end, 0);
        }
        if zero {
            for b in &mut file.data[offset as usize..end] {
                *b = 0;
            }
        }
        let post = Self::iatt_of(file);
        Ok((pre, post))
    }

    async fn create(
        &self,
        parent: &str,
        name: &str,
        mode: u32,
        xattrs: Option<StripeXattrs>,
        gfid: Option<[u8; 16]>,
    ) -> ChildResult<CreateReply> {
        self.take_injected_failure()?;
        let path = Self::join(parent, name);
        let mut files = self.files.lock().unwrap();
        if files.contains_key(&path) {
            return Err(ChildError::new(libc::EEXIST, "already exists"));
        }
        if !files.contains_key(parent) {
            return Err(ChildError::new(libc::ENOENT, "parent missing"));
        }
        let gfid = gfid.unwrap_or_else(|| {
            let mut gfid = [0u8; 16];
            gfid[0..8].copy_from_slice(&rand_u64().to_le_bytes());
            gfid
        });
        let mut file = MockFile {
            mode,
            gfid,
            ..Default::default()
        };
        if let Some(x) = xattrs {
            file.xattrs.insert(
                "stripe-size".to_string(),
                x.stripe_size.to_le_bytes().to_vec(),
            );
            file.xattrs.insert(
                "stripe-count".to_string(),
                x.stripe_count.to_le_bytes().to_vec(),
            );
            file.xattrs.insert(
                "stripe-index".to_string(),
                x.stripe_index.to_le_bytes().to_vec(),
            );
            file.xattrs.insert(
                "stripe-coalesce".to_string(),
                x.stripe_coalesce.to_le_bytes().to_vec(),
            );
        }
        let attr = Self::iatt_of(&file);
        files.insert(path.clone(), file);
        if let Some(parent_file) = files.get_mut(parent) {
            parent_file.children.push(name.to_string());
        }
        Ok(CreateReply { attr })
    }

    async fn mkdir(&self, parent: &str, name: &str, mode: u32) -> ChildResult<Iatt> {
        self.take_injected_failure()?;
        let path = Self::join(parent, name);
        let mut files = self.files.lock().unwrap();
        if files.contains_key(&path) {
            return Err(ChildError::new(libc::EEXIST, "already exists"));
        }
        let file = MockFile {
            is_dir: true,
            mode,
            ..Default::default()
        };
        let attr = Self::iatt_of(&file);
        files.insert(path, file);
        if let Some(parent_file) = files.get_mut(parent) {
            parent_file.children.push(name.to_string());
        }
        Ok(attr)
    }

    async fn rmdir(&self, parent: &str, name: &str) -> ChildResult<()> {
        self.take_injected_failure()?;
        let path = Self::join(parent, name);
        let mut files = self.files.lock().unwrap();
        files
            .remove(&path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such directory"))?;
        if let Some(parent_file) = files.get_mut(parent) {
            parent_file.children.retain(|c| c != name);
        }
        Ok(())
    }

    async fn unlink(&self, parent: &str, name: &str) -> ChildResult<()> {
        self.take_injected_failure()?;
        let path = Self::join(parent, name);
        let mut files = self.files.lock().unwrap();
        files
            .remove(&path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        if let Some(parent_file) = files.get_mut(parent) {
            parent_file.children.retain(|c| c != name);
        }
        Ok(())
    }

    async fn rename(
        &self,
        old_parent: &str,
        old_name: &str,
        new_parent: &str,
        new_name: &str,
    ) -> ChildResult<()> {
        self.take_injected_failure()?;
        let old_path = Self::join(old_parent, old_name);
        let new_path = Self::join(new_parent, new_name);
        let mut files = self.files.lock().unwrap();
        let file = files
            .remove(&old_path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        if let Some(parent_file) = files.get_mut(old_parent) {
            parent_file.children.retain(|c| c != old_name);
        }
        files.insert(new_path, file);
        if let Some(parent_file) = files.get_mut(new_parent) {
            parent_file.children.push(new_name.to_string());
        }
        Ok(())
    }

    async fn link(&self, path: &str, new_parent: &str, new_name: &str) -> ChildResult<Iatt> {
        self.take_injected_failure()?;
        let new_path = Self::join(new_parent, new_name);
        let mut files = self.files.lock().unwrap();
        let file = files
            .get(path)
            .cloned()
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        let attr = Self::iatt_of(&file);
        files.insert(new_path, file);
        if let Some(parent_file) = files.get_mut(new_parent) {
            parent_file.children.push(new_name.to_string());
        }
        Ok(attr)
    }

    async fn fsync(&self, path: &str, _datasync: bool) -> ChildResult<()> {
        self.take_injected_failure()?;
        let files = self.files.lock().unwrap();
        if files.contains_key(path) {
            Ok(())
        } else {
            Err(ChildError::new(libc::ENOENT, "no such file"))
        }
    }

    async fn readdir(&self, path: &str) -> ChildResult<Vec<DirEntry>> {
        self.take_injected_failure()?;
        let files = self.files.lock().unwrap();
        let dir = files
            .get(path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such directory"))?;
        Ok(dir
            .children
            .iter()
            .map(|name| {
                let child_path = Self::join(path, name);
                let is_dir = files.get(&child_path).is_some_and(|f| f.is_dir);
                DirEntry {
                    name: name.clone(),
                    is_dir,
                }
            })
            .collect())
    }

    async fn getxattr(&self, path: &str, name: &str) -> ChildResult<Vec<u8>> {
        self.take_injected_failure()?;
        let files = self.files.lock().unwrap();
        let file = files
            .get(path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        file.xattrs
            .get(name)
            .cloned()
            .ok_or_else(|| ChildError::new(libc::ENODATA, "no such attribute"))
    }

    async fn setxattr(&self, path: &str, name: &str, value: Vec<u8>) -> ChildResult<()> {
        self.take_injected_failure()?;
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(path)
            .ok_or_else(|| ChildError::new(libc::ENOENT, "no such file"))?;
        file.xattrs.insert(name.to_string(), value);
        Ok(())
    }

    async fn pathinfo(&self, path: &str) -> ChildResult<String> {
        self.take_injected_failure()?;
        Ok(format!("<POSIX:{}:{path}>", self.id.index()))
    }

    async fn lock(&self, path: &str, req: LockRequest) -> ChildResult<LockReply> {
        self.take_injected_failure()?;
        let files = self.files.lock().unwrap();
        if files.contains_key(path) {
            Ok(LockReply {
                start: req.start,
                len: req.len,
            })
        } else {
            Err(ChildError::new(libc::ENOENT, "no such file"))
        }
    }
}

fn rand_u64() -> u64 {
    use rand::Rng;
    rand::rng().random()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_lookup_round_trips() {
        let sv = MockSubvolume::new(SubvolumeId::new(0));
        sv.create("/", "a.txt", 0o644, None, None).await.unwrap();
        let attr = sv.lookup("/", "a.txt").await.unwrap();
        assert_eq!(attr.size, 0);
        assert!(!attr.is_dir);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let sv = MockSubvolume::new(SubvolumeId::new(0));
        sv.create("/", "a.txt", 0o644, None, None).await.unwrap();
        sv.inject_failure(libc::EIO);
        let err = sv.read("/a.txt", 0, 10).await.unwrap_err();
        assert_eq!(err.errno, libc::EIO);
        // second call succeeds: failure was consumed
        sv.read("/a.txt", 0, 10).await.unwrap();
    }

    #[tokio::test]
    async fn write_then_read_round_trips_bytes() {
        let sv = MockSubvolume::new(SubvolumeId::new(0));
        sv.create("/", "a.txt", 0o644, None, None).await.unwrap();
        sv.write("/a.txt", 0, b"hello").await.unwrap();
        let reply = sv.read("/a.txt", 0, 5).await.unwrap();
        assert_eq!(reply.data, b"hello");
    }

    #[tokio::test]
    async fn down_subvolume_fails_with_enotconn() {
        let sv = MockSubvolume::new(SubvolumeId::new(0));
        sv.set_down(true);
        let err = sv.getattr("/").await.unwrap_err();
        assert_eq!(err.errno, libc::ENOTCONN);
    }
}
