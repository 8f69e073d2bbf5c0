//! FUSE mounter.
//!
//! Serves a path-based [`VfsOps`] through the kernel. FUSE speaks inodes,
//! so the adapter hands out inode numbers for paths as it sees them and
//! keeps one content snapshot per open handle.
//!
//! Engine calls are async; FUSE callbacks are not. Each callback blocks on
//! the tokio runtime the mounter was created with.

use fuser::consts::FOPEN_DIRECT_IO;
use fuser::{
    FileAttr as FuseAttr, FileType as FuseFileType, Filesystem, MountOption, ReplyAttr,
    ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite,
    Request, TimeOrNow,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::runtime::Handle;

use vaultfs_kernel::vfs::{
    Access, MountGuard, Mounter, NodeAttr, NodeKind, SecretFile, VfsError, VfsOps, VfsResult,
};

use crate::constants::{ATTR_TTL, FUSE_FSNAME, FUSE_SUBTYPE};

const ROOT_INODE: u64 = 1;

/// Mounts filesystems through FUSE.
#[derive(Debug, Clone)]
pub struct FuseMounter {
    runtime: Handle,
}

impl FuseMounter {
    /// Engine calls from FUSE threads run on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Mounter for FuseMounter {
    fn attach(&self, mountpoint: &Path, fs: Arc<dyn VfsOps>) -> VfsResult<Box<dyn MountGuard>> {
        std::fs::create_dir_all(mountpoint)?;

        let options = [
            MountOption::RO,
            MountOption::FSName(FUSE_FSNAME.to_string()),
            MountOption::Subtype(FUSE_SUBTYPE.to_string()),
            MountOption::AllowOther,
            MountOption::AutoUnmount,
        ];
        let adapter = FuseAdapter::new(fs, self.runtime.clone());
        let session = fuser::spawn_mount2(adapter, mountpoint, &options)
            .map_err(|e| VfsError::mount_failed(format!("{}: {}", mountpoint.display(), e)))?;

        tracing::info!(mountpoint = %mountpoint.display(), "fuse session started");
        Ok(Box::new(FuseGuard {
            mountpoint: mountpoint.to_path_buf(),
            session: Mutex::new(Some(session)),
        }))
    }
}

/// Live FUSE session. Dropping the session unmounts it.
struct FuseGuard {
    mountpoint: PathBuf,
    session: Mutex<Option<fuser::BackgroundSession>>,
}

impl MountGuard for FuseGuard {
    fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    fn detach(self: Box<Self>) -> VfsResult<()> {
        if let Some(session) = self.session.lock().take() {
            drop(session);
            tracing::info!(mountpoint = %self.mountpoint.display(), "fuse session ended");
        }
        Ok(())
    }
}

// ============================================================================
// Inode table
// ============================================================================

/// Inode numbers for engine paths (`""` is the root).
///
/// Each node counts the references the kernel holds through `lookup`.
/// A node is dropped once the kernel forgets all of them; nodes handed out
/// by `readdir` alone hold none and are pruned when the directory closes.
#[derive(Debug)]
struct InodeTable {
    by_inode: HashMap<u64, Node>,
    by_path: HashMap<String, u64>,
    next_inode: u64,
}

#[derive(Debug)]
struct Node {
    path: String,
    lookups: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            by_inode: HashMap::new(),
            by_path: HashMap::new(),
            next_inode: ROOT_INODE + 1,
        };
        table.by_inode.insert(
            ROOT_INODE,
            Node {
                path: String::new(),
                lookups: 1,
            },
        );
        table.by_path.insert(String::new(), ROOT_INODE);
        table
    }

    fn path(&self, inode: u64) -> Option<&str> {
        self.by_inode.get(&inode).map(|node| node.path.as_str())
    }

    /// Inode for `path` without taking a kernel reference.
    fn assign(&mut self, path: &str) -> u64 {
        if let Some(&inode) = self.by_path.get(path) {
            return inode;
        }
        let inode = self.next_inode;
        self.next_inode += 1;
        self.by_inode.insert(
            inode,
            Node {
                path: path.to_string(),
                lookups: 0,
            },
        );
        self.by_path.insert(path.to_string(), inode);
        inode
    }

    /// Inode for `path`, counting one kernel reference.
    fn lookup(&mut self, path: &str) -> u64 {
        let inode = self.assign(path);
        if let Some(node) = self.by_inode.get_mut(&inode) {
            node.lookups += 1;
        }
        inode
    }

    /// Release `count` kernel references. The root is never forgotten.
    fn forget(&mut self, inode: u64, count: u64) {
        if inode == ROOT_INODE {
            return;
        }
        let Some(node) = self.by_inode.get_mut(&inode) else {
            return;
        };
        node.lookups = node.lookups.saturating_sub(count);
        if node.lookups == 0 {
            self.remove(inode);
        }
    }

    /// Drop every node the kernel holds no reference to.
    fn prune(&mut self) {
        let idle: Vec<u64> = self
            .by_inode
            .iter()
            .filter(|(inode, node)| **inode != ROOT_INODE && node.lookups == 0)
            .map(|(inode, _)| *inode)
            .collect();
        for inode in idle {
            self.remove(inode);
        }
    }

    fn remove(&mut self, inode: u64) {
        if let Some(node) = self.by_inode.remove(&inode) {
            self.by_path.remove(&node.path);
        }
    }

    fn len(&self) -> usize {
        self.by_inode.len()
    }

    fn child(parent: &str, name: &str) -> String {
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent, name)
        }
    }

    fn parent(path: &str) -> &str {
        path.rsplit_once('/').map_or("", |(parent, _)| parent)
    }
}

// ============================================================================
// Conversions
// ============================================================================

fn errno(e: &VfsError) -> i32 {
    match e {
        VfsError::NotFound(_) => libc::ENOENT,
        VfsError::IsADirectory(_) => libc::EISDIR,
        VfsError::NotADirectory(_) => libc::ENOTDIR,
        VfsError::PermissionDenied(_) => libc::EACCES,
        VfsError::ReadOnly => libc::EROFS,
        VfsError::InvalidPath(_) => libc::EINVAL,
        VfsError::Io(io) => io.raw_os_error().unwrap_or(libc::EIO),
        VfsError::MountFailed(_) | VfsError::Other(_) => libc::EIO,
    }
}

fn access_mode(flags: i32) -> Access {
    let writes = flags & libc::O_ACCMODE != libc::O_RDONLY
        || flags & (libc::O_APPEND | libc::O_TRUNC) != 0;
    if writes { Access::Write } else { Access::Read }
}

fn fuse_kind(kind: NodeKind) -> FuseFileType {
    match kind {
        NodeKind::Secret => FuseFileType::RegularFile,
        NodeKind::Directory => FuseFileType::Directory,
    }
}

// ============================================================================
// Adapter
// ============================================================================

struct FuseAdapter {
    fs: Arc<dyn VfsOps>,
    runtime: Handle,
    inodes: InodeTable,
    handles: HashMap<u64, SecretFile>,
    next_handle: u64,
    uid: u32,
    gid: u32,
}

impl FuseAdapter {
    fn new(fs: Arc<dyn VfsOps>, runtime: Handle) -> Self {
        Self {
            fs,
            runtime,
            inodes: InodeTable::new(),
            handles: HashMap::new(),
            next_handle: 1,
            // SAFETY: getuid/getgid cannot fail and take no arguments.
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn to_fuse_attr(&self, inode: u64, attr: &NodeAttr) -> FuseAttr {
        FuseAttr {
            ino: inode,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: attr.mtime,
            mtime: attr.mtime,
            ctime: attr.mtime,
            crtime: attr.mtime,
            kind: fuse_kind(attr.kind),
            perm: attr.perm as u16,
            nlink: attr.nlink(),
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    fn path_of(&self, inode: u64) -> Option<String> {
        self.inodes.path(inode).map(str::to_string)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, i32> {
        let parent = self.inodes.path(parent).ok_or(libc::ENOENT)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(InodeTable::child(parent, name))
    }

    fn getattr_path(&self, path: &str) -> VfsResult<NodeAttr> {
        let fs = Arc::clone(&self.fs);
        self.runtime
            .block_on(async move { fs.getattr(Path::new(path)).await })
    }
}

impl Filesystem for FuseAdapter {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.getattr_path(&path) {
            Ok(attr) => {
                let inode = self.inodes.lookup(&path);
                reply.entry(&ATTR_TTL, &self.to_fuse_attr(inode, &attr), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.getattr_path(&path) {
            Ok(attr) => reply.attr(&ATTR_TTL, &self.to_fuse_attr(ino, &attr)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let fs = Arc::clone(&self.fs);
        let listed = {
            let path = path.clone();
            self.runtime
                .block_on(async move { fs.readdir(Path::new(&path)).await })
        };
        let listed = match listed {
            Ok(listed) => listed,
            Err(e) => return reply.error(errno(&e)),
        };

        let parent_inode = self.inodes.assign(InodeTable::parent(&path));
        let mut entries = vec![
            (ino, FuseFileType::Directory, ".".to_string()),
            (parent_inode, FuseFileType::Directory, "..".to_string()),
        ];
        for entry in listed {
            let child = InodeTable::child(&path, &entry.name);
            let inode = self.inodes.assign(&child);
            entries.push((inode, fuse_kind(entry.kind), entry.name));
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (inode, kind, name)) in entries.iter().enumerate().skip(skip) {
            if reply.add(*inode, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        self.inodes.prune();
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let fs = Arc::clone(&self.fs);
        let access = access_mode(flags);
        let opened = self
            .runtime
            .block_on(async move { fs.open(Path::new(&path), access).await });

        match opened {
            Ok(file) => {
                let fh = self.next_handle;
                self.next_handle += 1;
                self.handles.insert(fh, file);
                // Content length may differ from the size reported by
                // getattr if the backend changed in between.
                reply.opened(fh, FOPEN_DIRECT_IO);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(file) = self.handles.get(&fh) else {
            return reply.error(libc::EBADF);
        };
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        reply.data(file.read(offset, size));
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.remove(&fh);
        reply.ok();
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        let fs = Arc::clone(&self.fs);
        match self
            .runtime
            .block_on(async move { fs.unlink(Path::new(&path)).await })
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        reply.error(libc::EROFS);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(libc::EROFS);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
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
        reply.error(libc::EROFS);
    }
}
