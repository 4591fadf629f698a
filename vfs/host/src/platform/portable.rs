//! Path-based backend on top of `std::fs`.
//!
//! Directory handles are host paths rather than descriptors, so
//! "no-follow" is checked with `symlink_metadata` before acting, and the
//! components of a held directory are re-checked on every use. This is the
//! native backend on Windows and is available everywhere for hosts without
//! `*at` syscalls. Byte-range locks are tracked per process.

use std::fs::{self, File, FileTimes, Metadata, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use sandboxfs_core::{
    AccessMode, AdvisoryLockKind, Component, ComponentOpener, DirEntry, Fdflags, FileHandle,
    Filetype, FsError, FsErrorKind, FsResult, HostPlatform, OpenFlags, Opened, StructStat,
    Subcomponent, Timespec, VirtualPath,
};

use crate::{io_result, map_io_error};

/// A directory held by path: the host root it was opened under plus the
/// components walked below it. Every use re-checks those components, so a
/// directory swapped for a symlink after opening is refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortableDir {
    root: PathBuf,
    below: Vec<String>,
}

impl PortableDir {
    fn root(path: PathBuf) -> Self {
        Self {
            root: path,
            below: Vec::new(),
        }
    }

    fn subdir(&self, name: &str) -> Self {
        let name = name.trim_end_matches('/');
        let mut dir = self.clone();
        if !name.is_empty() && name != "." {
            dir.below.push(name.to_owned());
        }
        dir
    }

    /// Host path as it was when opened.
    pub fn path(&self) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(&self.below);
        path
    }

    fn checked_path(&self, context: &'static str) -> FsResult<PathBuf> {
        let mut path = self.root.clone();
        for name in &self.below {
            path.push(name);
            let metadata = lstat(context, &path)?;
            if metadata.file_type().is_symlink() {
                return Err(FsError::new(FsErrorKind::NotCapable, context));
            }
            if !metadata.is_dir() {
                return Err(FsError::new(FsErrorKind::NotDirectory, context));
            }
        }
        Ok(path)
    }

    fn child(&self, context: &'static str, name: &str) -> FsResult<PathBuf> {
        let mut path = self.checked_path(context)?;
        if name != "." {
            path.push(name);
        }
        Ok(path)
    }
}

#[derive(Debug)]
pub struct PortableFile {
    file: File,
    /// Key for the lock registry. File operations act on `file` only.
    path: PathBuf,
    owner: u64,
    locks: Arc<LockRegistry>,
}

#[derive(Debug)]
struct LockRange {
    path: PathBuf,
    owner: u64,
    kind: AdvisoryLockKind,
    start: u64,
    /// Exclusive; `None` runs to end of file.
    end: Option<u64>,
}

impl LockRange {
    fn overlaps(&self, start: u64, end: Option<u64>) -> bool {
        let before_end = end.is_none_or(|end| self.start < end);
        let after_start = self.end.is_none_or(|own_end| start < own_end);
        before_end && after_start
    }
}

/// Advisory byte-range locks held by files of one platform instance.
#[derive(Debug, Default)]
struct LockRegistry {
    ranges: Mutex<Vec<LockRange>>,
    next_owner: AtomicU64,
}

impl LockRegistry {
    fn owner(&self) -> u64 {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(
        &self,
        path: &Path,
        owner: u64,
        kind: AdvisoryLockKind,
        start: u64,
        end: Option<u64>,
    ) -> FsResult<()> {
        let mut ranges = self.ranges.lock();
        let conflict = ranges.iter().any(|range| {
            range.path == path
                && range.owner != owner
                && range.overlaps(start, end)
                && (kind == AdvisoryLockKind::Write || range.kind == AdvisoryLockKind::Write)
        });
        if conflict {
            return Err(FsError::new(FsErrorKind::Again, "host.lock"));
        }
        ranges.retain(|range| !(range.owner == owner && range.overlaps(start, end)));
        ranges.push(LockRange {
            path: path.to_owned(),
            owner,
            kind,
            start,
            end,
        });
        Ok(())
    }

    fn unlock(&self, owner: u64, start: u64, end: Option<u64>) {
        self.ranges
            .lock()
            .retain(|range| !(range.owner == owner && range.overlaps(start, end)));
    }

    fn release_all(&self, owner: u64) {
        self.ranges.lock().retain(|range| range.owner != owner);
    }
}

#[derive(Clone, Debug, Default)]
pub struct PortablePlatform {
    locks: Arc<LockRegistry>,
}

impl PortablePlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

fn filetype_of(file_type: fs::FileType) -> Filetype {
    if file_type.is_symlink() {
        return Filetype::SymbolicLink;
    }
    if file_type.is_dir() {
        return Filetype::Directory;
    }
    if file_type.is_file() {
        return Filetype::RegularFile;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_block_device() {
            return Filetype::BlockDevice;
        }
        if file_type.is_char_device() {
            return Filetype::CharacterDevice;
        }
        if file_type.is_socket() {
            return Filetype::SocketStream;
        }
    }
    Filetype::Unknown
}

#[cfg(any(not(unix), test))]
fn timespec_of(time: std::io::Result<SystemTime>) -> Timespec {
    match time.map(|time| time.duration_since(UNIX_EPOCH)) {
        Ok(Ok(since)) => Timespec::new(since.as_secs() as i64, since.subsec_nanos()),
        Ok(Err(before)) => {
            let before = before.duration();
            let secs = -(before.as_secs() as i64);
            match before.subsec_nanos() {
                0 => Timespec::new(secs, 0),
                nanos => Timespec::new(secs - 1, 1_000_000_000 - nanos),
            }
        }
        Err(_) => Timespec::default(),
    }
}

fn system_time_of(time: Timespec) -> FsResult<SystemTime> {
    let nanos = Duration::from_nanos(u64::from(time.nanos));
    let converted = if time.secs >= 0 {
        UNIX_EPOCH.checked_add(Duration::from_secs(time.secs as u64) + nanos)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(time.secs.unsigned_abs()))
            .and_then(|t| t.checked_add(nanos))
    };
    converted.ok_or_else(|| FsError::new(FsErrorKind::Overflow, "host.set_times"))
}

fn file_times(atime: Option<Timespec>, mtime: Option<Timespec>) -> FsResult<FileTimes> {
    let mut times = FileTimes::new();
    if let Some(atime) = atime {
        times = times.set_accessed(system_time_of(atime)?);
    }
    if let Some(mtime) = mtime {
        times = times.set_modified(system_time_of(mtime)?);
    }
    Ok(times)
}

#[cfg(unix)]
fn stat_of(metadata: &Metadata) -> StructStat {
    use std::os::unix::fs::MetadataExt;

    StructStat {
        dev: metadata.dev(),
        ino: metadata.ino(),
        filetype: filetype_of(metadata.file_type()),
        mode: metadata.mode() & 0o7777,
        nlink: metadata.nlink(),
        uid: metadata.uid(),
        gid: metadata.gid(),
        size: metadata.size(),
        atime: Timespec::new(metadata.atime(), metadata.atime_nsec() as u32),
        mtime: Timespec::new(metadata.mtime(), metadata.mtime_nsec() as u32),
        ctime: Timespec::new(metadata.ctime(), metadata.ctime_nsec() as u32),
    }
}

/// Without stable file ids `ino` stays 0, which never compares equal.
#[cfg(not(unix))]
fn stat_of(metadata: &Metadata) -> StructStat {
    let filetype = filetype_of(metadata.file_type());
    let mut mode = if metadata.permissions().readonly() {
        0o444
    } else {
        0o666
    };
    if filetype == Filetype::Directory {
        mode |= 0o111;
    }
    StructStat {
        dev: 0,
        ino: 0,
        filetype,
        mode,
        nlink: 1,
        uid: 0,
        gid: 0,
        size: metadata.len(),
        atime: timespec_of(metadata.accessed()),
        mtime: timespec_of(metadata.modified()),
        ctime: timespec_of(metadata.created()),
    }
}

fn lstat(context: &'static str, path: &Path) -> FsResult<Metadata> {
    io_result(context, fs::symlink_metadata(path))
}

#[cfg(unix)]
fn permissions_for(mode: u32, _current: &Metadata) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    fs::Permissions::from_mode(mode)
}

/// Only the owner write bit maps to anything: the read-only attribute.
#[cfg(not(unix))]
fn permissions_for(mode: u32, current: &Metadata) -> fs::Permissions {
    let mut permissions = current.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    permissions
}

fn set_mode(context: &'static str, path: &Path, mode: u32) -> FsResult<()> {
    let permissions = permissions_for(mode, &lstat(context, path)?);
    io_result(context, fs::set_permissions(path, permissions))
}

fn set_owner(
    context: &'static str,
    path: &Path,
    owner: Option<u32>,
    group: Option<u32>,
) -> FsResult<()> {
    #[cfg(unix)]
    {
        io_result(context, std::os::unix::fs::lchown(path, owner, group))
    }
    #[cfg(not(unix))]
    {
        let _ = (path, owner, group);
        Err(FsError::new(FsErrorKind::NotSupported, context))
    }
}

/// Open any path, directories included, for timestamp updates.
fn open_for_times(context: &'static str, path: &Path) -> FsResult<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        options.write(true).custom_flags(
            windows_sys::Win32::Storage::FileSystem::FILE_FLAG_BACKUP_SEMANTICS,
        );
    }
    io_result(context, options.open(path))
}

fn set_path_times(
    context: &'static str,
    path: &Path,
    atime: Option<Timespec>,
    mtime: Option<Timespec>,
) -> FsResult<()> {
    let times = file_times(atime, mtime)?;
    let file = open_for_times(context, path)?;
    io_result(context, file.set_times(times))
}

fn virtual_target(target: PathBuf) -> FsResult<VirtualPath> {
    let target = target
        .into_os_string()
        .into_string()
        .map_err(|_| FsError::new(FsErrorKind::InvalidArgument, "host.readlink"))?;
    #[cfg(windows)]
    let target = target.replace('\\', "/");
    VirtualPath::new(target)
}

impl ComponentOpener for PortablePlatform {
    type Handle = PortableDir;

    fn open_component(
        &self,
        parent: &PortableDir,
        component: Component<'_>,
    ) -> FsResult<Subcomponent<PortableDir>> {
        let path = parent.child("host.open_component", component.name)?;
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if component.is_basename && err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Subcomponent::Other);
            }
            Err(err) => return Err(map_io_error("host.open_component", err)),
        };
        if metadata.file_type().is_symlink() {
            let target = io_result("host.open_component", fs::read_link(&path))?;
            return virtual_target(target).map(Subcomponent::Symlink);
        }
        if metadata.is_dir() && !component.is_basename {
            return Ok(Subcomponent::Directory(parent.subdir(component.name)));
        }
        Ok(Subcomponent::Other)
    }

    fn close_handle(&self, _handle: PortableDir) {}
}

impl HostPlatform for PortablePlatform {
    type File = PortableFile;

    fn open_root(&self, relative_to: Option<&PortableDir>, path: &Path) -> FsResult<PortableDir> {
        let joined = match relative_to {
            Some(base) if path.is_relative() => base.checked_path("host.open_root")?.join(path),
            _ => path.to_owned(),
        };
        let absolute = io_result("host.open_root", std::path::absolute(&joined))?;
        if !io_result("host.open_root", fs::metadata(&absolute))?.is_dir() {
            return Err(FsError::new(FsErrorKind::NotDirectory, "host.open_root"));
        }
        Ok(PortableDir::root(absolute))
    }

    fn close_dir(&self, _dir: PortableDir) -> FsResult<()> {
        Ok(())
    }

    fn dir_stat(&self, dir: &PortableDir) -> FsResult<StructStat> {
        let path = dir.checked_path("host.dir_stat")?;
        io_result("host.dir_stat", fs::metadata(path)).map(|m| stat_of(&m))
    }

    fn dir_chmod(&self, dir: &PortableDir, mode: u32) -> FsResult<()> {
        set_mode("host.dir_chmod", &dir.checked_path("host.dir_chmod")?, mode)
    }

    fn dir_chown(&self, dir: &PortableDir, owner: Option<u32>, group: Option<u32>) -> FsResult<()> {
        set_owner(
            "host.dir_chown",
            &dir.checked_path("host.dir_chown")?,
            owner,
            group,
        )
    }

    fn dir_set_times(
        &self,
        dir: &PortableDir,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
    ) -> FsResult<()> {
        let path = dir.checked_path("host.dir_set_times")?;
        set_path_times("host.dir_set_times", &path, atime, mtime)
    }

    fn read_dir(&self, dir: &PortableDir) -> FsResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in io_result("host.readdir", fs::read_dir(dir.checked_path("host.readdir")?))? {
            let entry = io_result("host.readdir", entry)?;
            let file_type = io_result("host.readdir", entry.file_type())?;
            #[cfg(unix)]
            let inode = std::os::unix::fs::DirEntryExt::ino(&entry);
            #[cfg(not(unix))]
            let inode = 0;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                filetype: filetype_of(file_type),
                inode,
                cookie: 0,
            });
        }
        Ok(entries)
    }

    fn open_at(
        &self,
        dir: &PortableDir,
        name: &str,
        flags: OpenFlags,
        _fdflags: Fdflags,
        mode: u32,
    ) -> FsResult<Opened<PortableDir, PortableFile>> {
        let path = dir.child("host.openat", name)?;
        let writable = flags.contains(OpenFlags::WRITE);
        match fs::symlink_metadata(&path) {
            Ok(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) => {
                return Err(FsError::new(FsErrorKind::Exists, "host.openat"));
            }
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(FsError::new(FsErrorKind::TooManySymbolicLinks, "host.openat"));
            }
            Ok(metadata) if metadata.is_dir() => {
                if writable || flags.contains(OpenFlags::TRUNC) {
                    return Err(FsError::new(FsErrorKind::IsDirectory, "host.openat"));
                }
                return Ok(Opened::Directory(dir.subdir(name)));
            }
            Ok(_) if flags.contains(OpenFlags::DIRECTORY) => {
                return Err(FsError::new(FsErrorKind::NotDirectory, "host.openat"));
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if !flags.contains(OpenFlags::CREATE) || flags.contains(OpenFlags::DIRECTORY) {
                    return Err(map_io_error("host.openat", err));
                }
            }
            Err(err) => return Err(map_io_error("host.openat", err)),
        }

        // std requires write access to create or truncate; do that step
        // separately when the guest asked for a read-only handle.
        let needs_prepare =
            !writable && flags.intersects(OpenFlags::CREATE | OpenFlags::TRUNC);
        let mut options = OpenOptions::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode).custom_flags(libc::O_NOFOLLOW);
        }
        #[cfg(not(unix))]
        let _ = mode;
        if needs_prepare {
            let mut prepare = options.clone();
            prepare
                .write(true)
                .create(flags.contains(OpenFlags::CREATE))
                .create_new(flags.contains(OpenFlags::CREATE | OpenFlags::EXCL))
                .truncate(flags.contains(OpenFlags::TRUNC));
            drop(io_result("host.openat", prepare.open(&path))?);
            options.read(true);
        } else {
            options
                .read(flags.contains(OpenFlags::READ) || !writable)
                .write(writable)
                .create(flags.contains(OpenFlags::CREATE))
                .create_new(flags.contains(OpenFlags::CREATE | OpenFlags::EXCL))
                .truncate(flags.contains(OpenFlags::TRUNC));
        }
        let file = io_result("host.openat", options.open(&path))?;
        Ok(Opened::File(PortableFile {
            file,
            path,
            owner: self.locks.owner(),
            locks: Arc::clone(&self.locks),
        }))
    }

    fn stat_at(&self, dir: &PortableDir, name: &str) -> FsResult<StructStat> {
        lstat("host.stat_at", &dir.child("host.stat_at", name)?).map(|m| stat_of(&m))
    }

    fn mkdir_at(&self, dir: &PortableDir, name: &str, mode: u32) -> FsResult<()> {
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        io_result("host.mkdirat", builder.create(dir.child("host.mkdirat", name)?))
    }

    fn unlink_file_at(&self, dir: &PortableDir, name: &str) -> FsResult<()> {
        let path = dir.child("host.unlinkat", name)?;
        let metadata = lstat("host.unlinkat", &path)?;
        if metadata.is_dir() {
            return Err(FsError::new(FsErrorKind::IsDirectory, "host.unlinkat"));
        }
        #[cfg(windows)]
        if metadata.file_type().is_symlink() && fs::metadata(&path).is_ok_and(|m| m.is_dir()) {
            return io_result("host.unlinkat", fs::remove_dir(&path));
        }
        io_result("host.unlinkat", fs::remove_file(&path))
    }

    fn remove_directory_at(&self, dir: &PortableDir, name: &str) -> FsResult<()> {
        let path = dir.child("host.rmdirat", name)?;
        if !lstat("host.rmdirat", &path)?.is_dir() {
            return Err(FsError::new(FsErrorKind::NotDirectory, "host.rmdirat"));
        }
        io_result("host.rmdirat", fs::remove_dir(&path))
    }

    fn rename_at(
        &self,
        old_dir: &PortableDir,
        old_name: &str,
        new_dir: &PortableDir,
        new_name: &str,
    ) -> FsResult<()> {
        let old = old_dir.child("host.renameat", old_name)?;
        let new = new_dir.child("host.renameat", new_name)?;
        // Windows refuses to replace a directory; an empty one may go.
        #[cfg(windows)]
        if fs::symlink_metadata(&new).is_ok_and(|m| m.is_dir())
            && lstat("host.renameat", &old)?.is_dir()
        {
            io_result("host.renameat", fs::remove_dir(&new))?;
        }
        io_result("host.renameat", fs::rename(old, new))
    }

    fn hardlink_at(
        &self,
        old_dir: &PortableDir,
        old_name: &str,
        new_dir: &PortableDir,
        new_name: &str,
    ) -> FsResult<()> {
        let old = old_dir.child("host.linkat", old_name)?;
        let new = new_dir.child("host.linkat", new_name)?;
        io_result("host.linkat", fs::hard_link(old, new))
    }

    fn symlink_at(&self, dir: &PortableDir, name: &str, target: &VirtualPath) -> FsResult<()> {
        let link = dir.child("host.symlinkat", name)?;
        #[cfg(unix)]
        {
            io_result(
                "host.symlinkat",
                std::os::unix::fs::symlink(target.as_str(), link),
            )
        }
        #[cfg(windows)]
        {
            let points_at_dir = fs::metadata(dir.checked_path("host.symlinkat")?.join(target.as_str())).is_ok_and(|m| m.is_dir());
            let created = if points_at_dir {
                std::os::windows::fs::symlink_dir(target.as_str(), link)
            } else {
                std::os::windows::fs::symlink_file(target.as_str(), link)
            };
            io_result("host.symlinkat", created)
        }
        #[cfg(not(any(unix, windows)))]
        {
            let _ = (link, target);
            Err(FsError::new(FsErrorKind::NotSupported, "host.symlinkat"))
        }
    }

    fn read_link_at(&self, dir: &PortableDir, name: &str) -> FsResult<VirtualPath> {
        let path = dir.child("host.readlinkat", name)?;
        if !lstat("host.readlinkat", &path)?.file_type().is_symlink() {
            return Err(FsError::new(FsErrorKind::InvalidArgument, "host.readlinkat"));
        }
        virtual_target(io_result("host.readlinkat", fs::read_link(&path))?)
    }

    fn chmod_at(&self, dir: &PortableDir, name: &str, mode: u32) -> FsResult<()> {
        let path = dir.child("host.chmodat", name)?;
        if lstat("host.chmodat", &path)?.file_type().is_symlink() {
            return Err(FsError::new(FsErrorKind::NotSupported, "host.chmodat"));
        }
        set_mode("host.chmodat", &path, mode)
    }

    fn chown_at(
        &self,
        dir: &PortableDir,
        name: &str,
        owner: Option<u32>,
        group: Option<u32>,
    ) -> FsResult<()> {
        set_owner("host.chownat", &dir.child("host.chownat", name)?, owner, group)
    }

    fn set_times_at(
        &self,
        dir: &PortableDir,
        name: &str,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
    ) -> FsResult<()> {
        let path = dir.child("host.set_times_at", name)?;
        if lstat("host.set_times_at", &path)?.file_type().is_symlink() {
            return Err(FsError::new(FsErrorKind::NotSupported, "host.set_times_at"));
        }
        set_path_times("host.set_times_at", &path, atime, mtime)
    }

    fn check_access_at(&self, dir: &PortableDir, name: &str, mode: AccessMode) -> FsResult<()> {
        let metadata = lstat("host.access", &dir.child("host.access", name)?)?;
        if mode.contains(AccessMode::WRITE) && metadata.permissions().readonly() {
            return Err(FsError::new(FsErrorKind::AccessDenied, "host.access"));
        }
        #[cfg(unix)]
        if mode.contains(AccessMode::EXECUTE) {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(FsError::new(FsErrorKind::AccessDenied, "host.access"));
            }
        }
        Ok(())
    }

    fn directory_is_empty_at(&self, dir: &PortableDir, name: &str) -> FsResult<bool> {
        let path = dir.child("host.is_empty", name)?;
        let mut entries = io_result("host.is_empty", fs::read_dir(path))?;
        Ok(entries.next().is_none())
    }
}

fn lock_end(start: u64, len: u64) -> Option<u64> {
    (len != 0).then(|| start.saturating_add(len))
}

impl FileHandle for PortableFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        #[cfg(unix)]
        let read = std::os::unix::fs::FileExt::read_at(&self.file, buf, offset);
        #[cfg(windows)]
        let read = std::os::windows::fs::FileExt::seek_read(&self.file, buf, offset);
        io_result("host.pread", read)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> FsResult<usize> {
        #[cfg(unix)]
        let written = std::os::unix::fs::FileExt::write_at(&self.file, buf, offset);
        #[cfg(windows)]
        let written = std::os::windows::fs::FileExt::seek_write(&self.file, buf, offset);
        io_result("host.pwrite", written)
    }

    fn stat(&self) -> FsResult<StructStat> {
        io_result("host.fstat", self.file.metadata()).map(|m| stat_of(&m))
    }

    fn sync(&self, data_only: bool) -> FsResult<()> {
        if data_only {
            io_result("host.fdatasync", self.file.sync_data())
        } else {
            io_result("host.fsync", self.file.sync_all())
        }
    }

    fn set_len(&self, len: u64) -> FsResult<()> {
        io_result("host.ftruncate", self.file.set_len(len))
    }

    fn allocate(&self, offset: u64, len: u64) -> FsResult<()> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| FsError::new(FsErrorKind::FileTooLarge, "host.allocate"))?;
        if end > self.stat()?.size {
            self.set_len(end)?;
        }
        Ok(())
    }

    fn chmod(&self, mode: u32) -> FsResult<()> {
        let current = io_result("host.fchmod", self.file.metadata())?;
        io_result(
            "host.fchmod",
            self.file.set_permissions(permissions_for(mode, &current)),
        )
    }

    fn chown(&self, owner: Option<u32>, group: Option<u32>) -> FsResult<()> {
        #[cfg(unix)]
        {
            io_result("host.fchown", std::os::unix::fs::fchown(&self.file, owner, group))
        }
        #[cfg(not(unix))]
        {
            let _ = (owner, group);
            Err(FsError::new(FsErrorKind::NotSupported, "host.fchown"))
        }
    }

    fn set_times(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> FsResult<()> {
        let times = file_times(atime, mtime)?;
        io_result("host.futimens", self.file.set_times(times))
    }

    /// Regular files never block.
    fn set_nonblocking(&self, _nonblocking: bool) -> FsResult<()> {
        Ok(())
    }

    fn lock(&self, kind: AdvisoryLockKind, start: u64, len: u64) -> FsResult<()> {
        self.locks
            .lock(&self.path, self.owner, kind, start, lock_end(start, len))
    }

    fn unlock(&self, start: u64, len: u64) -> FsResult<()> {
        self.locks.unlock(self.owner, start, lock_end(start, len));
        Ok(())
    }

    fn close(self) -> FsResult<()> {
        self.locks.release_all(self.owner);
        Ok(())
    }
}
