//! Write-only filesystem over a backing storage directory.
//!
//! Clients may create directories and write new files; reading file
//! contents, listing directory entries and every destructive or renaming
//! verb is refused. Directory and file creation is additionally gated by
//! the allow/deny naming policy. Metadata of existing entries stays
//! visible: a client that knows a name can stat it, but nothing can be
//! read out of it.

mod handle;
mod inode;

use std::ffi::OsStr;
use std::fs::Metadata;
use std::io;
use std::num::NonZeroU32;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use nix::sys::statvfs;
use nix::unistd::{self, AccessFlags};
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
};
use rfuse3::raw::{Filesystem, Request};
use rfuse3::{FileType, Result as FuseResult, SetAttr, Timestamp};

use crate::policy::{Decision, PolicyEngine};

use handle::HandleTable;
use inode::InodeTable;

pub use inode::ROOT_INODE;

const ATTR_TTL: Duration = Duration::from_secs(1);
const MAX_WRITE: u32 = 1024 * 1024;

/// Build a write-only filesystem over `storage_dir`.
///
/// Fails when the storage directory does not exist or is not a
/// directory; this is the fatal startup check, everything later is a
/// per-request error.
pub async fn new_write_only_fs(
    storage_dir: impl Into<PathBuf>,
    policy: PolicyEngine,
) -> io::Result<WriteOnlyFs> {
    let storage_root = storage_dir.into();
    let meta = tokio::fs::metadata(&storage_root).await?;
    if !meta.is_dir() {
        return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
    }
    Ok(WriteOnlyFs {
        storage_root,
        policy,
        inodes: Mutex::new(InodeTable::new()),
        handles: HandleTable::new(),
    })
}

#[derive(Debug)]
pub struct WriteOnlyFs {
    storage_root: PathBuf,
    policy: PolicyEngine,
    inodes: Mutex<InodeTable>,
    handles: HandleTable,
}

impl WriteOnlyFs {
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Real on-disk location for a virtual path: the storage root with
    /// the rooted virtual path appended verbatim.
    fn real_path(&self, vpath: &str) -> PathBuf {
        let mut real = self.storage_root.as_os_str().to_os_string();
        real.push(vpath);
        PathBuf::from(real)
    }

    fn vpath_of(&self, ino: u64) -> FuseResult<String> {
        match self.inodes.lock().unwrap().path_of(ino) {
            Some(path) => Ok(path.to_string()),
            None => Err(libc::ENOENT.into()),
        }
    }

    /// Join a directory inode with one name component from the kernel.
    ///
    /// Components arrive one at a time, so a name that would move the
    /// path upwards or span several segments is invalid here; this is
    /// what keeps every virtual path rooted under the storage root.
    fn child_vpath(&self, parent: u64, name: &OsStr) -> FuseResult<String> {
        let parent_path = self.vpath_of(parent)?;
        let Some(name) = name.to_str() else {
            return Err(libc::EINVAL.into());
        };
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(libc::EINVAL.into());
        }
        let mut path = parent_path;
        if path != "/" {
            path.push('/');
        }
        path.push_str(name);
        Ok(path)
    }

    fn check_policy(&self, vpath: &str) -> FuseResult<()> {
        match self.policy.evaluate(vpath) {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(libc::EPERM.into()),
        }
    }
}

/// Attributes for the kernel: real metadata, but carrying the inode the
/// table handed out (rfuse3 uses `attr.ino` as the node id).
fn attr_for(ino: u64, meta: &Metadata) -> FileAttr {
    let mut attr = attr_from_metadata(meta);
    attr.ino = ino;
    attr
}

fn file_type_from_mode(mode: u32) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn attr_from_metadata(meta: &Metadata) -> FileAttr {
    FileAttr {
        ino: meta.ino(),
        size: meta.size(),
        blocks: meta.blocks(),
        atime: Timestamp::new(meta.atime(), meta.atime_nsec() as u32),
        mtime: Timestamp::new(meta.mtime(), meta.mtime_nsec() as u32),
        ctime: Timestamp::new(meta.ctime(), meta.ctime_nsec() as u32),
        #[cfg(target_os = "macos")]
        crtime: Timestamp::new(meta.ctime(), meta.ctime_nsec() as u32),
        kind: file_type_from_mode(meta.mode()),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: meta.blksize() as u32,
    }
}

fn reply_entry(attr: FileAttr) -> ReplyEntry {
    ReplyEntry {
        ttl: ATTR_TTL,
        attr,
        generation: 0,
    }
}

/// Translate the kernel's open flags into the real create call, forcing
/// the owner-write bit on top of the requested mode so the storage side
/// stays writable for subsequent writes.
fn open_for_create(real: &Path, flags: u32, mode: u32) -> io::Result<std::fs::File> {
    let flags = flags as i32;
    let mut opts = std::fs::OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_RDWR => opts.read(true).write(true),
        libc::O_WRONLY => opts.write(true),
        _ => opts.read(true),
    };
    opts.create(true)
        .custom_flags(flags & !(libc::O_ACCMODE | libc::O_CREAT))
        .mode(mode | libc::S_IWUSR);
    opts.open(real)
}

impl Filesystem for WriteOnlyFs {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        Ok(ReplyInit {
            max_write: NonZeroU32::new(MAX_WRITE).unwrap(),
        })
    }

    async fn destroy(&self, _req: Request) {}

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let vpath = self.child_vpath(parent, name)?;
        let meta = tokio::fs::symlink_metadata(self.real_path(&vpath)).await?;
        let ino = self.inodes.lock().unwrap().assign(&vpath);
        Ok(reply_entry(attr_for(ino, &meta)))
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}

    // Metadata stays visible: a client that knows a name can stat it.
    async fn getattr(
        &self,
        _req: Request,
        inode: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let vpath = self.vpath_of(inode)?;
        let meta = tokio::fs::symlink_metadata(self.real_path(&vpath)).await?;
        Ok(ReplyAttr {
            ttl: ATTR_TTL,
            attr: attr_for(inode, &meta),
        })
    }

    // chmod is accepted and deliberately changes nothing, so callers
    // probing permission bits do not fail. Everything else that arrives
    // through setattr (truncate, chown, utime) is refused.
    async fn setattr(
        &self,
        req: Request,
        inode: u64,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        if set_attr.size.is_some()
            || set_attr.uid.is_some()
            || set_attr.gid.is_some()
            || set_attr.atime.is_some()
            || set_attr.mtime.is_some()
        {
            return Err(libc::EPERM.into());
        }
        self.getattr(req, inode, fh, 0).await
    }

    async fn mkdir(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let vpath = self.child_vpath(parent, name)?;
        self.check_policy(&vpath)?;
        let real = self.real_path(&vpath);
        tokio::fs::create_dir(&real).await?;
        // Owner-only bits, whatever mode the client asked for.
        tokio::fs::set_permissions(&real, std::fs::Permissions::from_mode(0o700)).await?;
        let meta = tokio::fs::symlink_metadata(&real).await?;
        let ino = self.inodes.lock().unwrap().assign(&vpath);
        Ok(reply_entry(attr_for(ino, &meta)))
    }

    async fn create(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let vpath = self.child_vpath(parent, name)?;
        self.check_policy(&vpath)?;
        let file = open_for_create(&self.real_path(&vpath), flags, mode)?;
        let meta = file.metadata()?;
        let ino = self.inodes.lock().unwrap().assign(&vpath);
        let attr = attr_for(ino, &meta);
        let fh = self.handles.insert(file);
        Ok(ReplyCreated {
            ttl: ATTR_TTL,
            attr,
            generation: 0,
            fh,
            flags: 0,
        })
    }

    // A short write is a failure, never a partial success.
    async fn write(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let Some(file) = self.handles.get(fh) else {
            return Err(libc::EBADF.into());
        };
        let written = file.write_at(data, offset)?;
        if written != data.len() {
            return Err(libc::EIO.into());
        }
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        self.handles.remove(fh);
        Ok(())
    }

    async fn flush(&self, _req: Request, _inode: u64, _fh: u64, _lock_owner: u64) -> FuseResult<()> {
        Ok(())
    }

    // Durability is delegated to the storage on each write.
    async fn fsync(&self, _req: Request, _inode: u64, _fh: u64, _datasync: bool) -> FuseResult<()> {
        Ok(())
    }

    // ===== the write-only boundary: nothing below hands out content =====

    async fn open(&self, _req: Request, _inode: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        Err(libc::EPERM.into())
    }

    async fn read(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _offset: u64,
        _size: u32,
    ) -> FuseResult<ReplyData> {
        Err(libc::EPERM.into())
    }

    async fn readlink(&self, _req: Request, _inode: u64) -> FuseResult<ReplyData> {
        Err(libc::EPERM.into())
    }

    async fn mknod(
        &self,
        _req: Request,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _rdev: u32,
    ) -> FuseResult<ReplyEntry> {
        Err(libc::EPERM.into())
    }

    async fn unlink(&self, _req: Request, _parent: u64, _name: &OsStr) -> FuseResult<()> {
        Err(libc::EPERM.into())
    }

    async fn rmdir(&self, _req: Request, _parent: u64, _name: &OsStr) -> FuseResult<()> {
        Err(libc::EPERM.into())
    }

    async fn rename(
        &self,
        _req: Request,
        _parent: u64,
        _name: &OsStr,
        _new_parent: u64,
        _new_name: &OsStr,
    ) -> FuseResult<()> {
        Err(libc::EPERM.into())
    }

    async fn symlink(
        &self,
        _req: Request,
        _parent: u64,
        _name: &OsStr,
        _link: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        Err(libc::EPERM.into())
    }

    async fn link(
        &self,
        _req: Request,
        _inode: u64,
        _new_parent: u64,
        _new_name: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        Err(libc::EPERM.into())
    }

    async fn opendir(&self, _req: Request, inode: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        self.vpath_of(inode)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    // Directory contents are never revealed, even when present.
    async fn readdir<'a>(
        &'a self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let entries: Vec<FuseResult<DirectoryEntry>> = Vec::new();
        Ok(ReplyDirectory {
            entries: Box::pin(stream::iter(entries)),
        })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        _parent: u64,
        _fh: u64,
        _offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let entries: Vec<FuseResult<DirectoryEntryPlus>> = Vec::new();
        Ok(ReplyDirectoryPlus {
            entries: Box::pin(stream::iter(entries)),
        })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        Ok(())
    }

    // Write-intent checks are always refused; other checks go through the
    // naming policy and then the real access(2).
    async fn access(&self, _req: Request, inode: u64, mask: u32) -> FuseResult<()> {
        if mask as i32 & libc::W_OK != 0 {
            return Err(libc::EPERM.into());
        }
        let vpath = self.vpath_of(inode)?;
        self.check_policy(&vpath)?;
        let flags = AccessFlags::from_bits_truncate(mask as i32);
        unistd::access(&self.real_path(&vpath), flags).map_err(io::Error::from)?;
        Ok(())
    }

    // Statistics of the storage root, whatever path was asked about.
    async fn statfs(&self, _req: Request, _inode: u64) -> FuseResult<ReplyStatFs> {
        let st = statvfs::statvfs(&self.storage_root).map_err(io::Error::from)?;
        Ok(ReplyStatFs {
            blocks: st.blocks(),
            bfree: st.blocks_free(),
            bavail: st.blocks_available(),
            files: st.files(),
            ffree: st.files_free(),
            bsize: st.block_size() as u32,
            namelen: st.name_max() as u32,
            frsize: st.fragment_size() as u32,
        })
    }

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}
