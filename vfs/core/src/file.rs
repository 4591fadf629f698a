//! Regular-file fd resource.
//!
//! The cursor and fd flags live here, not in the native handle: reads and
//! writes are always positioned at the host level. Append mode is
//! emulated so that positioned writes still land at their offset.

use parking_lot::{Mutex, RwLock};

use crate::error::{FsError, FsErrorKind, FsResult};
use crate::flags::Fdflags;
use crate::model::{
    AdvisoryLockKind, Advisorylock, DirEntry, FdAttributes, Filetype, ReadWriteStrategy,
    StructStat, Timespec, Whence,
};
use crate::platform::FileHandle;
use crate::resource::{FdResource, read_in_order, write_in_order};
use crate::rights::{FdRightsBlock, Rights};

#[derive(Debug, Default)]
struct FileState {
    position: u64,
    flags: Fdflags,
}

pub struct FileFdResource<F> {
    handle: RwLock<Option<F>>,
    state: Mutex<FileState>,
    rights: FdRightsBlock,
}

impl<F: FileHandle> FileFdResource<F> {
    pub fn new(handle: F, rights: FdRightsBlock, flags: Fdflags) -> Self {
        Self {
            handle: RwLock::new(Some(handle)),
            state: Mutex::new(FileState { position: 0, flags }),
            rights,
        }
    }

    /// Current cursor, for diagnostics and tests.
    pub fn position(&self) -> u64 {
        self.state.lock().position
    }

    fn with_handle<T>(
        &self,
        context: &'static str,
        f: impl FnOnce(&F) -> FsResult<T>,
    ) -> FsResult<T> {
        let guard = self.handle.read();
        match guard.as_ref() {
            Some(handle) => f(handle),
            None => Err(FsError::new(FsErrorKind::BadFileDescriptor, context)),
        }
    }

    fn transfer_rights(base: Rights, strategy: ReadWriteStrategy) -> Rights {
        match strategy {
            ReadWriteStrategy::CurrentPosition => base,
            ReadWriteStrategy::Position(_) => base | Rights::FD_SEEK,
        }
    }

    /// Absolute start of a lock request.
    fn lock_start(&self, handle: &F, lock: &Advisorylock) -> FsResult<u64> {
        let origin = match lock.whence {
            Whence::Set => 0,
            Whence::Current => self.state.lock().position,
            Whence::End => handle.stat()?.size,
        };
        offset_from(origin, lock.start, "file.lock")
    }
}

fn offset_from(origin: u64, delta: i64, context: &'static str) -> FsResult<u64> {
    let target = i128::from(origin) + i128::from(delta);
    if target < 0 {
        return Err(FsError::new(FsErrorKind::InvalidArgument, context));
    }
    u64::try_from(target).map_err(|_| FsError::new(FsErrorKind::Overflow, context))
}

impl<F: FileHandle> FdResource for FileFdResource<F> {
    fn fd_attributes(&self) -> FsResult<FdAttributes> {
        let filetype = self.with_handle("file.fdstat", |h| h.stat())?.filetype;
        Ok(FdAttributes {
            filetype: match filetype {
                Filetype::Unknown => Filetype::RegularFile,
                other => other,
            },
            flags: self.state.lock().flags,
            rights: self.rights,
        })
    }

    fn rights(&self) -> FdRightsBlock {
        self.rights
    }

    fn stat(&self) -> FsResult<StructStat> {
        self.rights.require(Rights::FD_FILESTAT_GET, "file.stat")?;
        self.with_handle("file.stat", |h| h.stat())
    }

    fn seek(&self, offset: i64, whence: Whence) -> FsResult<u64> {
        let needed = if offset == 0 && whence == Whence::Current {
            Rights::FD_TELL
        } else {
            Rights::FD_SEEK
        };
        self.rights.require(needed, "file.seek")?;
        self.with_handle("file.seek", |h| {
            let mut state = self.state.lock();
            let origin = match whence {
                Whence::Set => 0,
                Whence::Current => state.position,
                Whence::End => h.stat()?.size,
            };
            state.position = offset_from(origin, offset, "file.seek")?;
            Ok(state.position)
        })
    }

    fn read(&self, bufs: &mut [&mut [u8]], strategy: ReadWriteStrategy) -> FsResult<usize> {
        self.rights
            .require(Self::transfer_rights(Rights::FD_READ, strategy), "file.read")?;
        self.with_handle("file.read", |h| match strategy {
            ReadWriteStrategy::Position(offset) => {
                read_in_order(bufs, |buf, done| h.read_at(buf, offset.saturating_add(done)))
            }
            ReadWriteStrategy::CurrentPosition => {
                let mut state = self.state.lock();
                let start = state.position;
                let total = read_in_order(bufs, |buf, done| h.read_at(buf, start + done))?;
                state.position = start + total as u64;
                Ok(total)
            }
        })
    }

    fn write(&self, bufs: &[&[u8]], strategy: ReadWriteStrategy) -> FsResult<usize> {
        self.rights
            .require(Self::transfer_rights(Rights::FD_WRITE, strategy), "file.write")?;
        self.with_handle("file.write", |h| match strategy {
            ReadWriteStrategy::Position(offset) => {
                write_in_order(bufs, |buf, done| h.write_at(buf, offset.saturating_add(done)))
            }
            ReadWriteStrategy::CurrentPosition => {
                let mut state = self.state.lock();
                let start = if state.flags.contains(Fdflags::APPEND) {
                    h.stat()?.size
                } else {
                    state.position
                };
                let total = write_in_order(bufs, |buf, done| h.write_at(buf, start + done))?;
                state.position = start + total as u64;
                Ok(total)
            }
        })
    }

    fn sync(&self, metadata: bool) -> FsResult<()> {
        let needed = if metadata {
            Rights::FD_SYNC
        } else {
            Rights::FD_DATASYNC
        };
        self.rights.require(needed, "file.sync")?;
        self.with_handle("file.sync", |h| h.sync(!metadata))
    }

    fn truncate(&self, length: u64) -> FsResult<()> {
        self.rights
            .require(Rights::FD_FILESTAT_SET_SIZE, "file.truncate")?;
        self.with_handle("file.truncate", |h| h.set_len(length))
    }

    fn allocate(&self, offset: u64, length: u64) -> FsResult<()> {
        self.rights.require(Rights::FD_ALLOCATE, "file.allocate")?;
        self.with_handle("file.allocate", |h| h.allocate(offset, length))
    }

    fn chmod(&self, mode: u32) -> FsResult<()> {
        self.rights
            .require(Rights::FD_FILESTAT_SET_TIMES, "file.chmod")?;
        self.with_handle("file.chmod", |h| h.chmod(mode))
    }

    fn chown(&self, owner: Option<u32>, group: Option<u32>) -> FsResult<()> {
        self.rights
            .require(Rights::FD_FILESTAT_SET_TIMES, "file.chown")?;
        self.with_handle("file.chown", |h| h.chown(owner, group))
    }

    fn set_timestamp(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> FsResult<()> {
        self.rights
            .require(Rights::FD_FILESTAT_SET_TIMES, "file.set_times")?;
        self.with_handle("file.set_times", |h| h.set_times(atime, mtime))
    }

    fn set_fd_flags(&self, flags: Fdflags) -> FsResult<()> {
        self.rights
            .require(Rights::FD_FDSTAT_SET_FLAGS, "file.set_flags")?;
        self.with_handle("file.set_flags", |h| {
            let mut state = self.state.lock();
            let nonblocking = flags.contains(Fdflags::NONBLOCK);
            if nonblocking != state.flags.contains(Fdflags::NONBLOCK) {
                h.set_nonblocking(nonblocking)?;
            }
            state.flags = flags;
            Ok(())
        })
    }

    fn add_advisory_lock(&self, lock: &Advisorylock) -> FsResult<()> {
        let needed = match lock.kind {
            AdvisoryLockKind::Read => Rights::FD_READ,
            AdvisoryLockKind::Write => Rights::FD_WRITE,
        };
        self.rights.require(needed, "file.lock")?;
        self.with_handle("file.lock", |h| {
            let start = self.lock_start(h, lock)?;
            h.lock(lock.kind, start, lock.length)
        })
    }

    fn remove_advisory_lock(&self, lock: &Advisorylock) -> FsResult<()> {
        self.with_handle("file.unlock", |h| {
            let start = self.lock_start(h, lock)?;
            h.unlock(start, lock.length)
        })
    }

    fn read_dir(&self) -> FsResult<Vec<DirEntry>> {
        Err(FsError::new(FsErrorKind::NotDirectory, "file.read_dir"))
    }

    fn close(&self) -> FsResult<()> {
        match self.handle.write().take() {
            Some(handle) => handle.close(),
            None => Err(FsError::new(FsErrorKind::BadFileDescriptor, "file.close")),
        }
    }
}
