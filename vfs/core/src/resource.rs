//! The capability contract every fd-table entry implements.

use std::sync::Arc;

use crate::directory::DirectoryFdResource;
use crate::error::{FsError, FsErrorKind, FsResult};
use crate::file::FileFdResource;
use crate::flags::Fdflags;
use crate::model::{Advisorylock, DirEntry, FdAttributes, ReadWriteStrategy, StructStat, Timespec, Whence};
use crate::platform::HostPlatform;
use crate::rights::FdRightsBlock;
use crate::stdio::StdioFdResource;

/// Operations on an open fd.
///
/// Variants reject operations that make no sense for them; see the
/// individual implementations for which error they use.
pub trait FdResource: Send + Sync {
    fn fd_attributes(&self) -> FsResult<FdAttributes>;
    fn rights(&self) -> FdRightsBlock;
    fn stat(&self) -> FsResult<StructStat>;
    fn seek(&self, offset: i64, whence: Whence) -> FsResult<u64>;
    fn read(&self, bufs: &mut [&mut [u8]], strategy: ReadWriteStrategy) -> FsResult<usize>;
    fn write(&self, bufs: &[&[u8]], strategy: ReadWriteStrategy) -> FsResult<usize>;
    fn sync(&self, metadata: bool) -> FsResult<()>;
    fn truncate(&self, length: u64) -> FsResult<()>;
    fn allocate(&self, offset: u64, length: u64) -> FsResult<()>;
    fn chmod(&self, mode: u32) -> FsResult<()>;
    fn chown(&self, owner: Option<u32>, group: Option<u32>) -> FsResult<()>;
    fn set_timestamp(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> FsResult<()>;
    fn set_fd_flags(&self, flags: Fdflags) -> FsResult<()>;
    fn add_advisory_lock(&self, lock: &Advisorylock) -> FsResult<()>;
    fn remove_advisory_lock(&self, lock: &Advisorylock) -> FsResult<()>;
    fn read_dir(&self) -> FsResult<Vec<DirEntry>>;
    fn close(&self) -> FsResult<()>;
}

/// Entry stored in the fd table.
pub enum FdEntry<P: HostPlatform> {
    File(Arc<FileFdResource<P::File>>),
    Directory(Arc<DirectoryFdResource<P>>),
    Stdio(Arc<StdioFdResource>),
}

impl<P: HostPlatform> Clone for FdEntry<P> {
    fn clone(&self) -> Self {
        match self {
            FdEntry::File(file) => FdEntry::File(Arc::clone(file)),
            FdEntry::Directory(dir) => FdEntry::Directory(Arc::clone(dir)),
            FdEntry::Stdio(stdio) => FdEntry::Stdio(Arc::clone(stdio)),
        }
    }
}

impl<P: HostPlatform> FdEntry<P> {
    pub fn resource(&self) -> &dyn FdResource {
        match self {
            FdEntry::File(file) => file.as_ref(),
            FdEntry::Directory(dir) => dir.as_ref(),
            FdEntry::Stdio(stdio) => stdio.as_ref(),
        }
    }

    /// The directory behind a path operation's base fd.
    pub fn directory(&self, context: &'static str) -> FsResult<&Arc<DirectoryFdResource<P>>> {
        match self {
            FdEntry::Directory(dir) => Ok(dir),
            _ => Err(FsError::new(FsErrorKind::NotDirectory, context)),
        }
    }
}

/// Fill `bufs` in order, stopping after the first short transfer.
///
/// `op` receives each buffer and the number of bytes already transferred.
/// An error after some bytes were moved is reported as a short count.
pub fn read_in_order(
    bufs: &mut [&mut [u8]],
    mut op: impl FnMut(&mut [u8], u64) -> FsResult<usize>,
) -> FsResult<usize> {
    let mut total = 0usize;
    for buf in bufs.iter_mut() {
        let wanted = buf.len();
        let n = match op(&mut buf[..], total as u64) {
            Ok(n) => n,
            Err(_) if total > 0 => break,
            Err(err) => return Err(err),
        };
        total += n;
        if n < wanted {
            break;
        }
    }
    Ok(total)
}

/// Write `bufs` in order, stopping after the first short transfer.
pub fn write_in_order(
    bufs: &[&[u8]],
    mut op: impl FnMut(&[u8], u64) -> FsResult<usize>,
) -> FsResult<usize> {
    let mut total = 0usize;
    for buf in bufs {
        let n = match op(&buf[..], total as u64) {
            Ok(n) => n,
            Err(_) if total > 0 => break,
            Err(err) => return Err(err),
        };
        total += n;
        if n < buf.len() {
            break;
        }
    }
    Ok(total)
}
