//! Directory fd resource and path-relative execution beneath it.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{FsError, FsErrorKind, FsResult};
use crate::flags::Fdflags;
use crate::model::{
    Advisorylock, DirEntry, FdAttributes, Filetype, ReadWriteStrategy, StructStat, Timespec,
    Whence,
};
use crate::path::VirtualPath;
use crate::platform::HostPlatform;
use crate::resolver::SymlinkResolver;
use crate::resource::FdResource;
use crate::rights::{FdRightsBlock, Rights};

pub struct DirectoryFdResource<P: HostPlatform> {
    platform: Arc<P>,
    handle: RwLock<Option<P::Handle>>,
    rights: FdRightsBlock,
    resolver: SymlinkResolver,
    preopen: Option<VirtualPath>,
    /// Sandbox roots list themselves as `..`.
    root: bool,
}

impl<P: HostPlatform> fmt::Debug for DirectoryFdResource<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryFdResource")
            .field("rights", &self.rights)
            .field("preopen", &self.preopen)
            .finish_non_exhaustive()
    }
}

impl<P: HostPlatform> DirectoryFdResource<P> {
    pub fn new(
        platform: Arc<P>,
        handle: P::Handle,
        rights: FdRightsBlock,
        resolver: SymlinkResolver,
    ) -> Self {
        Self {
            platform,
            handle: RwLock::new(Some(handle)),
            rights,
            resolver,
            preopen: None,
            root: false,
        }
    }

    /// A directory the guest cannot step above, such as the working
    /// directory.
    pub fn sandbox_root(self) -> Self {
        Self { root: true, ..self }
    }

    /// A sandbox root, reported to the guest under `virtual_path`.
    pub fn preopened(
        platform: Arc<P>,
        handle: P::Handle,
        rights: FdRightsBlock,
        resolver: SymlinkResolver,
        virtual_path: VirtualPath,
    ) -> Self {
        Self {
            preopen: Some(virtual_path),
            ..Self::new(platform, handle, rights, resolver).sandbox_root()
        }
    }

    pub fn preopen_path(&self) -> Option<&VirtualPath> {
        self.preopen.as_ref()
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn require(&self, rights: Rights, context: &'static str) -> FsResult<()> {
        self.rights.require(rights, context)
    }

    fn with_handle<T>(
        &self,
        context: &'static str,
        f: impl FnOnce(&P::Handle) -> FsResult<T>,
    ) -> FsResult<T> {
        let guard = self.handle.read();
        match guard.as_ref() {
            Some(handle) => f(handle),
            None => Err(FsError::new(FsErrorKind::BadFileDescriptor, context)),
        }
    }

    /// Resolve `path` beneath this directory and run `block` against the
    /// terminal `(directory, name)` pair. Intermediate handles are closed
    /// before this returns, whatever `block` does.
    pub fn run_at<T>(
        &self,
        path: &VirtualPath,
        follow_symlinks: bool,
        block: impl FnOnce(&P, &P::Handle, &str) -> FsResult<T>,
    ) -> FsResult<T> {
        self.with_handle("dir.resolve", |base| {
            let resolved = self
                .resolver
                .resolve(self.platform.as_ref(), base, path, follow_symlinks)?;
            block(&self.platform, resolved.directory(), resolved.name())
        })
    }

    /// Two-path variant of [`run_at`](Self::run_at), for rename and link.
    /// `old` and `new` may be the same resource.
    pub fn run_at_pair<T>(
        old: &Self,
        old_path: &VirtualPath,
        follow_old: bool,
        new: &Self,
        new_path: &VirtualPath,
        block: impl FnOnce(&P, (&P::Handle, &str), (&P::Handle, &str)) -> FsResult<T>,
    ) -> FsResult<T> {
        // Read guards are taken in address order: a queued close blocks
        // later readers, so two opposite pairs must not interleave.
        let same = std::ptr::eq(old, new);
        let old_first = same || (old as *const Self) < (new as *const Self);
        let (first, second) = if old_first { (old, new) } else { (new, old) };
        let first_guard = first.handle.read();
        let second_guard = (!same).then(|| second.handle.read());

        let first_base = first_guard
            .as_ref()
            .ok_or_else(|| FsError::new(FsErrorKind::BadFileDescriptor, "dir.resolve_pair"))?;
        let second_base = match &second_guard {
            None => first_base,
            Some(guard) => guard
                .as_ref()
                .ok_or_else(|| FsError::new(FsErrorKind::BadFileDescriptor, "dir.resolve_pair"))?,
        };
        let (old_base, new_base) = if old_first {
            (first_base, second_base)
        } else {
            (second_base, first_base)
        };

        let platform = old.platform.as_ref();
        let old_resolved = old.resolver.resolve(platform, old_base, old_path, follow_old)?;
        let new_resolved = new.resolver.resolve(platform, new_base, new_path, false)?;
        block(
            platform,
            (old_resolved.directory(), old_resolved.name()),
            (new_resolved.directory(), new_resolved.name()),
        )
    }
}

impl<P: HostPlatform> FdResource for DirectoryFdResource<P> {
    fn fd_attributes(&self) -> FsResult<FdAttributes> {
        Ok(FdAttributes {
            filetype: Filetype::Directory,
            flags: Fdflags::empty(),
            rights: self.rights,
        })
    }

    fn rights(&self) -> FdRightsBlock {
        self.rights
    }

    fn stat(&self) -> FsResult<StructStat> {
        self.require(Rights::FD_FILESTAT_GET, "dir.stat")?;
        self.with_handle("dir.stat", |h| self.platform.dir_stat(h))
    }

    fn seek(&self, _offset: i64, _whence: Whence) -> FsResult<u64> {
        Err(FsError::new(FsErrorKind::BadFileDescriptor, "dir.seek"))
    }

    fn read(&self, _bufs: &mut [&mut [u8]], _strategy: ReadWriteStrategy) -> FsResult<usize> {
        Err(FsError::new(FsErrorKind::BadFileDescriptor, "dir.read"))
    }

    fn write(&self, _bufs: &[&[u8]], _strategy: ReadWriteStrategy) -> FsResult<usize> {
        Err(FsError::new(FsErrorKind::BadFileDescriptor, "dir.write"))
    }

    fn sync(&self, _metadata: bool) -> FsResult<()> {
        Err(FsError::new(FsErrorKind::BadFileDescriptor, "dir.sync"))
    }

    fn truncate(&self, _length: u64) -> FsResult<()> {
        Err(FsError::new(FsErrorKind::BadFileDescriptor, "dir.truncate"))
    }

    fn allocate(&self, _offset: u64, _length: u64) -> FsResult<()> {
        Err(FsError::new(FsErrorKind::IsDirectory, "dir.allocate"))
    }

    fn chmod(&self, mode: u32) -> FsResult<()> {
        self.require(Rights::FD_FILESTAT_SET_TIMES, "dir.chmod")?;
        self.with_handle("dir.chmod", |h| self.platform.dir_chmod(h, mode))
    }

    fn chown(&self, owner: Option<u32>, group: Option<u32>) -> FsResult<()> {
        self.require(Rights::FD_FILESTAT_SET_TIMES, "dir.chown")?;
        self.with_handle("dir.chown", |h| self.platform.dir_chown(h, owner, group))
    }

    fn set_timestamp(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> FsResult<()> {
        self.require(Rights::FD_FILESTAT_SET_TIMES, "dir.set_times")?;
        self.with_handle("dir.set_times", |h| {
            self.platform.dir_set_times(h, atime, mtime)
        })
    }

    fn set_fd_flags(&self, _flags: Fdflags) -> FsResult<()> {
        Err(FsError::new(FsErrorKind::BadFileDescriptor, "dir.set_flags"))
    }

    fn add_advisory_lock(&self, _lock: &Advisorylock) -> FsResult<()> {
        Err(FsError::new(FsErrorKind::BadFileDescriptor, "dir.lock"))
    }

    fn remove_advisory_lock(&self, _lock: &Advisorylock) -> FsResult<()> {
        Err(FsError::new(FsErrorKind::BadFileDescriptor, "dir.unlock"))
    }

    /// Entries prefixed with `.` and `..`; cookies count from 1.
    fn read_dir(&self) -> FsResult<Vec<DirEntry>> {
        self.require(Rights::FD_READDIR, "dir.read_dir")?;
        self.with_handle("dir.read_dir", |h| {
            let own = self.platform.dir_stat(h)?;
            let parent = if self.root {
                own.ino
            } else {
                // Unknown when the parent cannot be stat'ed.
                self.platform.stat_at(h, "..").map_or(0, |stat| stat.ino)
            };
            let listed = self.platform.read_dir(h)?;
            let dots = [(".", own.ino), ("..", parent)].map(|(name, inode)| DirEntry {
                name: name.to_owned(),
                filetype: Filetype::Directory,
                inode,
                cookie: 0,
            });
            Ok(dots
                .into_iter()
                .chain(listed)
                .enumerate()
                .map(|(index, entry)| DirEntry {
                    cookie: index as u64 + 1,
                    ..entry
                })
                .collect())
        })
    }

    fn close(&self) -> FsResult<()> {
        match self.handle.write().take() {
            Some(handle) => self.platform.close_dir(handle),
            None => Err(FsError::new(FsErrorKind::BadFileDescriptor, "dir.close")),
        }
    }
}
