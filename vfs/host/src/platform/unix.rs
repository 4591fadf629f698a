//! POSIX backend for Linux, Android and Apple targets.
//!
//! Every operation is an `*at` call relative to an open directory fd, with
//! symlink following disabled at the host level.

use std::ffi::{CStr, CString};
use std::fs::File;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileExt;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::Path;

use sandboxfs_core::{
    AccessMode, AdvisoryLockKind, Component, ComponentOpener, DirEntry, Fdflags, FileHandle,
    Filetype, FsError, FsErrorKind, FsResult, HostPlatform, OpenFlags, Opened, StructStat,
    Subcomponent, Timespec, VirtualPath,
};

use crate::{io_result, map_io_error};

/// Open directory fd.
#[derive(Debug)]
pub struct DirHandle {
    fd: OwnedFd,
}

impl DirHandle {
    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[derive(Debug)]
pub struct UnixFile {
    file: File,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnixPlatform;

impl UnixPlatform {
    pub fn new() -> Self {
        Self
    }
}

fn c_name(context: &'static str, name: &str) -> FsResult<CString> {
    CString::new(name).map_err(|_| FsError::new(FsErrorKind::InvalidArgument, context))
}

fn cvt(context: &'static str, res: libc::c_int) -> FsResult<libc::c_int> {
    if res < 0 {
        Err(map_io_error(context, io::Error::last_os_error()))
    } else {
        Ok(res)
    }
}

fn openat_raw(dir: RawFd, name: &CStr, flags: libc::c_int, mode: u32) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::openat(dir, name.as_ptr(), flags, mode as libc::c_uint) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn open_directory_nofollow(dir: RawFd, name: &CStr) -> io::Result<DirHandle> {
    let flags = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW;
    openat_raw(dir, name, flags, 0).map(|fd| DirHandle { fd })
}

fn fstat(context: &'static str, fd: RawFd) -> FsResult<StructStat> {
    let mut st = unsafe { mem::zeroed::<libc::stat>() };
    cvt(context, unsafe { libc::fstat(fd, &mut st) })?;
    Ok(stat_from_libc(&st))
}

fn lstat_at(context: &'static str, dir: RawFd, name: &CStr) -> FsResult<StructStat> {
    let mut st = unsafe { mem::zeroed::<libc::stat>() };
    cvt(context, unsafe {
        libc::fstatat(dir, name.as_ptr(), &mut st, libc::AT_SYMLINK_NOFOLLOW)
    })?;
    Ok(stat_from_libc(&st))
}

fn read_link_raw(dir: RawFd, name: &CStr) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; 256];
    loop {
        let res = unsafe {
            libc::readlinkat(dir, name.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        let len = res as usize;
        if len < buf.len() {
            buf.truncate(len);
            return Ok(buf);
        }
        buf.resize(buf.len() * 2, 0);
    }
}

fn filetype_from_mode(mode: libc::mode_t) -> Filetype {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => Filetype::Directory,
        libc::S_IFREG => Filetype::RegularFile,
        libc::S_IFLNK => Filetype::SymbolicLink,
        libc::S_IFCHR => Filetype::CharacterDevice,
        libc::S_IFBLK => Filetype::BlockDevice,
        libc::S_IFSOCK => Filetype::SocketStream,
        _ => Filetype::Unknown,
    }
}

fn stat_from_libc(st: &libc::stat) -> StructStat {
    StructStat {
        dev: st.st_dev as u64,
        ino: st.st_ino as u64,
        filetype: filetype_from_mode(st.st_mode),
        mode: (st.st_mode & 0o7777) as u32,
        nlink: st.st_nlink as u64,
        uid: st.st_uid,
        gid: st.st_gid,
        size: st.st_size as u64,
        atime: Timespec::new(st.st_atime as i64, st.st_atime_nsec as u32),
        mtime: Timespec::new(st.st_mtime as i64, st.st_mtime_nsec as u32),
        ctime: Timespec::new(st.st_ctime as i64, st.st_ctime_nsec as u32),
    }
}

fn utimens(atime: Option<Timespec>, mtime: Option<Timespec>) -> [libc::timespec; 2] {
    [atime, mtime].map(|time| match time {
        Some(time) => libc::timespec {
            tv_sec: time.secs as libc::time_t,
            tv_nsec: time.nanos as _,
        },
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
    })
}

fn owner_ids(owner: Option<u32>, group: Option<u32>) -> (libc::uid_t, libc::gid_t) {
    (
        owner.map_or(!0, |uid| uid as libc::uid_t),
        group.map_or(!0, |gid| gid as libc::gid_t),
    )
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "emscripten"))] {
        fn errno_location() -> *mut libc::c_int {
            unsafe { libc::__errno_location() }
        }
    } else if #[cfg(target_os = "android")] {
        fn errno_location() -> *mut libc::c_int {
            unsafe { libc::__errno() }
        }
    } else {
        fn errno_location() -> *mut libc::c_int {
            unsafe { libc::__error() }
        }
    }
}

fn read_dir_raw(dir: &DirHandle) -> FsResult<Vec<DirEntry>> {
    let dup = cvt("host.readdir", unsafe { libc::dup(dir.raw()) })?;
    let dirp = unsafe { libc::fdopendir(dup) };
    if dirp.is_null() {
        let err = io::Error::last_os_error();
        unsafe { libc::close(dup) };
        return Err(map_io_error("host.readdir", err));
    }
    // The duplicate shares its offset with `dir`.
    unsafe { libc::rewinddir(dirp) };

    let mut entries = Vec::new();
    let result = loop {
        unsafe { *errno_location() = 0 };
        let ent = unsafe { libc::readdir(dirp) };
        if ent.is_null() {
            let code = unsafe { *errno_location() };
            if code == 0 {
                break Ok(());
            }
            break Err(map_io_error("host.readdir", io::Error::from_raw_os_error(code)));
        }
        let name = unsafe { CStr::from_ptr((*ent).d_name.as_ptr()) };
        if name.to_bytes() == b"." || name.to_bytes() == b".." {
            continue;
        }
        match lstat_at("host.readdir", dir.raw(), name) {
            Ok(stat) => entries.push(DirEntry {
                name: String::from_utf8_lossy(name.to_bytes()).into_owned(),
                filetype: stat.filetype,
                inode: stat.ino,
                cookie: 0,
            }),
            // Removed between readdir and stat.
            Err(err) if err.kind() == FsErrorKind::NoEntry => {}
            Err(err) => break Err(err),
        }
    };
    unsafe { libc::closedir(dirp) };
    result.map(|()| entries)
}

impl ComponentOpener for UnixPlatform {
    type Handle = DirHandle;

    fn open_component(
        &self,
        parent: &DirHandle,
        component: Component<'_>,
    ) -> FsResult<Subcomponent<DirHandle>> {
        let name = c_name("host.open_component", component.name)?;
        if !component.is_basename {
            match open_directory_nofollow(parent.raw(), &name) {
                Ok(handle) => return Ok(Subcomponent::Directory(handle)),
                Err(err)
                    if matches!(
                        err.raw_os_error(),
                        Some(libc::ENOTDIR | libc::ELOOP | libc::EMLINK)
                    ) => {}
                Err(err) => return Err(map_io_error("host.open_component", err)),
            }
        }
        match read_link_raw(parent.raw(), &name) {
            Ok(target) => Ok(Subcomponent::Symlink(VirtualPath::from_bytes(target)?)),
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => Ok(Subcomponent::Other),
            Err(err) if component.is_basename && err.raw_os_error() == Some(libc::ENOENT) => {
                Ok(Subcomponent::Other)
            }
            Err(err) => Err(map_io_error("host.open_component", err)),
        }
    }

    fn close_handle(&self, handle: DirHandle) {
        if let Err(error) = self.close_dir(handle) {
            tracing::debug!(%error, "host.close_component");
        }
    }
}

impl HostPlatform for UnixPlatform {
    type File = UnixFile;

    fn open_root(&self, relative_to: Option<&DirHandle>, path: &Path) -> FsResult<DirHandle> {
        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| FsError::new(FsErrorKind::InvalidArgument, "host.open_root"))?;
        let dir = relative_to.map_or(libc::AT_FDCWD, DirHandle::raw);
        let flags = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC;
        let fd = io_result("host.open_root", openat_raw(dir, &cpath, flags, 0))?;
        Ok(DirHandle { fd })
    }

    fn close_dir(&self, dir: DirHandle) -> FsResult<()> {
        let fd = dir.fd.into_raw_fd();
        cvt("host.close_dir", unsafe { libc::close(fd) }).map(drop)
    }

    fn dir_stat(&self, dir: &DirHandle) -> FsResult<StructStat> {
        fstat("host.dir_stat", dir.raw())
    }

    fn dir_chmod(&self, dir: &DirHandle, mode: u32) -> FsResult<()> {
        cvt("host.dir_chmod", unsafe {
            libc::fchmod(dir.raw(), mode as libc::mode_t)
        })
        .map(drop)
    }

    fn dir_chown(&self, dir: &DirHandle, owner: Option<u32>, group: Option<u32>) -> FsResult<()> {
        let (uid, gid) = owner_ids(owner, group);
        cvt("host.dir_chown", unsafe { libc::fchown(dir.raw(), uid, gid) }).map(drop)
    }

    fn dir_set_times(
        &self,
        dir: &DirHandle,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
    ) -> FsResult<()> {
        let times = utimens(atime, mtime);
        cvt("host.dir_set_times", unsafe {
            libc::futimens(dir.raw(), times.as_ptr())
        })
        .map(drop)
    }

    fn read_dir(&self, dir: &DirHandle) -> FsResult<Vec<DirEntry>> {
        read_dir_raw(dir)
    }

    fn open_at(
        &self,
        dir: &DirHandle,
        name: &str,
        flags: OpenFlags,
        fdflags: Fdflags,
        mode: u32,
    ) -> FsResult<Opened<DirHandle, UnixFile>> {
        let cname = c_name("host.openat", name)?;
        let mut oflags = libc::O_CLOEXEC | libc::O_NOFOLLOW;
        oflags |= match (flags.contains(OpenFlags::READ), flags.contains(OpenFlags::WRITE)) {
            (true, true) => libc::O_RDWR,
            (false, true) => libc::O_WRONLY,
            _ => libc::O_RDONLY,
        };
        for (flag, native) in [
            (OpenFlags::CREATE, libc::O_CREAT),
            (OpenFlags::EXCL, libc::O_EXCL),
            (OpenFlags::TRUNC, libc::O_TRUNC),
            (OpenFlags::DIRECTORY, libc::O_DIRECTORY),
        ] {
            if flags.contains(flag) {
                oflags |= native;
            }
        }
        // APPEND stays emulated: a native O_APPEND would also redirect
        // positioned writes.
        for (flag, native) in [
            (Fdflags::NONBLOCK, libc::O_NONBLOCK),
            (Fdflags::SYNC, libc::O_SYNC),
            (Fdflags::DSYNC, libc::O_DSYNC),
        ] {
            if fdflags.contains(flag) {
                oflags |= native;
            }
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        if fdflags.contains(Fdflags::RSYNC) {
            oflags |= libc::O_RSYNC;
        }

        let fd = io_result("host.openat", openat_raw(dir.raw(), &cname, oflags, mode))?;
        let stat = fstat("host.openat", fd.as_raw_fd())?;
        if stat.filetype == Filetype::Directory {
            Ok(Opened::Directory(DirHandle { fd }))
        } else {
            Ok(Opened::File(UnixFile {
                file: File::from(fd),
            }))
        }
    }

    fn stat_at(&self, dir: &DirHandle, name: &str) -> FsResult<StructStat> {
        lstat_at("host.stat_at", dir.raw(), &c_name("host.stat_at", name)?)
    }

    fn mkdir_at(&self, dir: &DirHandle, name: &str, mode: u32) -> FsResult<()> {
        let cname = c_name("host.mkdirat", name)?;
        cvt("host.mkdirat", unsafe {
            libc::mkdirat(dir.raw(), cname.as_ptr(), mode as libc::mode_t)
        })
        .map(drop)
    }

    fn unlink_file_at(&self, dir: &DirHandle, name: &str) -> FsResult<()> {
        let cname = c_name("host.unlinkat", name)?;
        if unsafe { libc::unlinkat(dir.raw(), cname.as_ptr(), 0) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        // Apple reports EPERM for directories.
        if err.raw_os_error() == Some(libc::EPERM)
            && lstat_at("host.unlinkat", dir.raw(), &cname)
                .is_ok_and(|st| st.filetype == Filetype::Directory)
        {
            return Err(FsError::with_source(FsErrorKind::IsDirectory, "host.unlinkat", err));
        }
        Err(map_io_error("host.unlinkat", err))
    }

    fn remove_directory_at(&self, dir: &DirHandle, name: &str) -> FsResult<()> {
        let cname = c_name("host.rmdirat", name)?;
        if unsafe { libc::unlinkat(dir.raw(), cname.as_ptr(), libc::AT_REMOVEDIR) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EEXIST) {
            return Err(FsError::with_source(FsErrorKind::NotEmpty, "host.rmdirat", err));
        }
        Err(map_io_error("host.rmdirat", err))
    }

    fn rename_at(
        &self,
        old_dir: &DirHandle,
        old_name: &str,
        new_dir: &DirHandle,
        new_name: &str,
    ) -> FsResult<()> {
        let old = c_name("host.renameat", old_name)?;
        let new = c_name("host.renameat", new_name)?;
        cvt("host.renameat", unsafe {
            libc::renameat(old_dir.raw(), old.as_ptr(), new_dir.raw(), new.as_ptr())
        })
        .map(drop)
    }

    fn hardlink_at(
        &self,
        old_dir: &DirHandle,
        old_name: &str,
        new_dir: &DirHandle,
        new_name: &str,
    ) -> FsResult<()> {
        let old = c_name("host.linkat", old_name)?;
        let new = c_name("host.linkat", new_name)?;
        cvt("host.linkat", unsafe {
            libc::linkat(old_dir.raw(), old.as_ptr(), new_dir.raw(), new.as_ptr(), 0)
        })
        .map(drop)
    }

    fn symlink_at(&self, dir: &DirHandle, name: &str, target: &VirtualPath) -> FsResult<()> {
        let cname = c_name("host.symlinkat", name)?;
        let ctarget = c_name("host.symlinkat", target.as_str())?;
        cvt("host.symlinkat", unsafe {
            libc::symlinkat(ctarget.as_ptr(), dir.raw(), cname.as_ptr())
        })
        .map(drop)
    }

    fn read_link_at(&self, dir: &DirHandle, name: &str) -> FsResult<VirtualPath> {
        let cname = c_name("host.readlinkat", name)?;
        let target = io_result("host.readlinkat", read_link_raw(dir.raw(), &cname))?;
        VirtualPath::from_bytes(target)
    }

    fn chmod_at(&self, dir: &DirHandle, name: &str, mode: u32) -> FsResult<()> {
        let cname = c_name("host.fchmodat", name)?;
        // Linux cannot change the mode of a symlink itself.
        if lstat_at("host.fchmodat", dir.raw(), &cname)?.filetype == Filetype::SymbolicLink {
            return Err(FsError::new(FsErrorKind::NotSupported, "host.fchmodat"));
        }
        cvt("host.fchmodat", unsafe {
            libc::fchmodat(dir.raw(), cname.as_ptr(), mode as libc::mode_t, 0)
        })
        .map(drop)
    }

    fn chown_at(
        &self,
        dir: &DirHandle,
        name: &str,
        owner: Option<u32>,
        group: Option<u32>,
    ) -> FsResult<()> {
        let cname = c_name("host.fchownat", name)?;
        let (uid, gid) = owner_ids(owner, group);
        cvt("host.fchownat", unsafe {
            libc::fchownat(
                dir.raw(),
                cname.as_ptr(),
                uid,
                gid,
                libc::AT_SYMLINK_NOFOLLOW,
            )
        })
        .map(drop)
    }

    fn set_times_at(
        &self,
        dir: &DirHandle,
        name: &str,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
    ) -> FsResult<()> {
        let cname = c_name("host.utimensat", name)?;
        let times = utimens(atime, mtime);
        cvt("host.utimensat", unsafe {
            libc::utimensat(
                dir.raw(),
                cname.as_ptr(),
                times.as_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
            )
        })
        .map(drop)
    }

    fn check_access_at(&self, dir: &DirHandle, name: &str, mode: AccessMode) -> FsResult<()> {
        let cname = c_name("host.faccessat", name)?;
        let filetype = lstat_at("host.faccessat", dir.raw(), &cname)?.filetype;
        // A symlink is checked as the link itself, which carries no
        // permission bits of its own.
        if mode.is_empty() || filetype == Filetype::SymbolicLink {
            return Ok(());
        }
        let mut amode = 0;
        for (flag, native) in [
            (AccessMode::READ, libc::R_OK),
            (AccessMode::WRITE, libc::W_OK),
            (AccessMode::EXECUTE, libc::X_OK),
        ] {
            if mode.contains(flag) {
                amode |= native;
            }
        }
        let nofollow = cvt("host.faccessat", unsafe {
            libc::faccessat(dir.raw(), cname.as_ptr(), amode, libc::AT_SYMLINK_NOFOLLOW)
        });
        match nofollow {
            // Some libcs reject the flag; `name` was not a symlink above.
            Err(err)
                if matches!(
                    err.kind(),
                    FsErrorKind::InvalidArgument | FsErrorKind::NotSupported
                ) =>
            {
                cvt("host.faccessat", unsafe {
                    libc::faccessat(dir.raw(), cname.as_ptr(), amode, 0)
                })
                .map(drop)
            }
            other => other.map(drop),
        }
    }

    fn directory_is_empty_at(&self, dir: &DirHandle, name: &str) -> FsResult<bool> {
        let cname = c_name("host.is_empty", name)?;
        let child = io_result("host.is_empty", open_directory_nofollow(dir.raw(), &cname))?;
        let empty = read_dir_raw(&child).map(|entries| entries.is_empty());
        self.close_dir(child)?;
        empty
    }
}

impl UnixFile {
    fn raw(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn fcntl_lock(
        &self,
        context: &'static str,
        kind: libc::c_int,
        start: u64,
        len: u64,
    ) -> FsResult<()> {
        let mut lock = unsafe { mem::zeroed::<libc::flock>() };
        lock.l_type = kind as _;
        lock.l_whence = libc::SEEK_SET as _;
        lock.l_start = start as libc::off_t;
        lock.l_len = len as libc::off_t;
        if unsafe { libc::fcntl(self.raw(), libc::F_SETLK, &lock as *const libc::flock) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        // POSIX allows either code for a conflicting lock.
        if err.raw_os_error() == Some(libc::EACCES) {
            return Err(FsError::with_source(FsErrorKind::Again, context, err));
        }
        Err(map_io_error(context, err))
    }
}

impl FileHandle for UnixFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        io_result("host.pread", self.file.read_at(buf, offset))
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> FsResult<usize> {
        io_result("host.pwrite", self.file.write_at(buf, offset))
    }

    fn stat(&self) -> FsResult<StructStat> {
        fstat("host.fstat", self.raw())
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

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn allocate(&self, offset: u64, len: u64) -> FsResult<()> {
        let res = unsafe {
            libc::posix_fallocate(self.raw(), offset as libc::off_t, len as libc::off_t)
        };
        if res != 0 {
            return Err(map_io_error(
                "host.fallocate",
                io::Error::from_raw_os_error(res),
            ));
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn allocate(&self, offset: u64, len: u64) -> FsResult<()> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| FsError::new(FsErrorKind::FileTooLarge, "host.fallocate"))?;
        if end > self.stat()?.size {
            self.set_len(end)?;
        }
        Ok(())
    }

    fn chmod(&self, mode: u32) -> FsResult<()> {
        cvt("host.fchmod", unsafe {
            libc::fchmod(self.raw(), mode as libc::mode_t)
        })
        .map(drop)
    }

    fn chown(&self, owner: Option<u32>, group: Option<u32>) -> FsResult<()> {
        let (uid, gid) = owner_ids(owner, group);
        cvt("host.fchown", unsafe { libc::fchown(self.raw(), uid, gid) }).map(drop)
    }

    fn set_times(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> FsResult<()> {
        let times = utimens(atime, mtime);
        cvt("host.futimens", unsafe {
            libc::futimens(self.raw(), times.as_ptr())
        })
        .map(drop)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> FsResult<()> {
        let flags = cvt("host.fcntl", unsafe { libc::fcntl(self.raw(), libc::F_GETFL) })?;
        let updated = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if updated != flags {
            cvt("host.fcntl", unsafe {
                libc::fcntl(self.raw(), libc::F_SETFL, updated)
            })?;
        }
        Ok(())
    }

    fn lock(&self, kind: AdvisoryLockKind, start: u64, len: u64) -> FsResult<()> {
        let native = match kind {
            AdvisoryLockKind::Read => libc::F_RDLCK,
            AdvisoryLockKind::Write => libc::F_WRLCK,
        };
        self.fcntl_lock("host.lock", native as libc::c_int, start, len)
    }

    fn unlock(&self, start: u64, len: u64) -> FsResult<()> {
        self.fcntl_lock("host.unlock", libc::F_UNLCK as libc::c_int, start, len)
    }

    fn close(self) -> FsResult<()> {
        let fd = self.file.into_raw_fd();
        cvt("host.close", unsafe { libc::close(fd) }).map(drop)
    }
}
