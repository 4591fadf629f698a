//! Seam between the platform-independent engine and native adapters.
//!
//! Every `*_at` method receives a directory handle and a single name that
//! the [`SymlinkResolver`](crate::resolver::SymlinkResolver) already
//! produced. Implementations must not follow a symlink in `name`: any
//! following the guest asked for has been done by the resolver.

use std::path::Path;

use crate::error::FsResult;
use crate::flags::{AccessMode, Fdflags, OpenFlags};
use crate::model::{AdvisoryLockKind, DirEntry, StructStat, Timespec};
use crate::path::VirtualPath;
use crate::resolver::ComponentOpener;

/// Native regular-file handle.
///
/// Positioned primitives only: the cursor lives in
/// [`FileFdResource`](crate::file::FileFdResource).
pub trait FileHandle: Send + Sync + 'static {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<usize>;
    fn write_at(&self, buf: &[u8], offset: u64) -> FsResult<usize>;
    fn stat(&self) -> FsResult<StructStat>;
    fn sync(&self, data_only: bool) -> FsResult<()>;
    fn set_len(&self, len: u64) -> FsResult<()>;
    fn allocate(&self, offset: u64, len: u64) -> FsResult<()>;
    fn chmod(&self, mode: u32) -> FsResult<()>;
    fn chown(&self, owner: Option<u32>, group: Option<u32>) -> FsResult<()>;
    fn set_times(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> FsResult<()>;
    fn set_nonblocking(&self, nonblocking: bool) -> FsResult<()>;
    /// Byte-range lock starting at absolute offset `start`; `len == 0`
    /// extends to end of file. Never blocks.
    fn lock(&self, kind: AdvisoryLockKind, start: u64, len: u64) -> FsResult<()>;
    fn unlock(&self, start: u64, len: u64) -> FsResult<()>;
    fn close(self) -> FsResult<()>
    where
        Self: Sized;
}

/// Result of opening a path: directories and files become different
/// resources.
#[derive(Debug)]
pub enum Opened<D, F> {
    Directory(D),
    File(F),
}

pub trait HostPlatform:
    ComponentOpener<Handle: Send + Sync + 'static> + Send + Sync + 'static
{
    type File: FileHandle;

    /// Open a sandbox root. Relative paths are taken relative to
    /// `relative_to` when given, otherwise to the process working directory.
    fn open_root(&self, relative_to: Option<&Self::Handle>, path: &Path)
    -> FsResult<Self::Handle>;
    fn close_dir(&self, dir: Self::Handle) -> FsResult<()>;

    fn dir_stat(&self, dir: &Self::Handle) -> FsResult<StructStat>;
    fn dir_chmod(&self, dir: &Self::Handle, mode: u32) -> FsResult<()>;
    fn dir_chown(&self, dir: &Self::Handle, owner: Option<u32>, group: Option<u32>)
    -> FsResult<()>;
    fn dir_set_times(
        &self,
        dir: &Self::Handle,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
    ) -> FsResult<()>;
    /// Entries of `dir` in host order, excluding `.` and `..`.
    fn read_dir(&self, dir: &Self::Handle) -> FsResult<Vec<DirEntry>>;

    fn open_at(
        &self,
        dir: &Self::Handle,
        name: &str,
        flags: OpenFlags,
        fdflags: Fdflags,
        mode: u32,
    ) -> FsResult<Opened<Self::Handle, Self::File>>;
    fn stat_at(&self, dir: &Self::Handle, name: &str) -> FsResult<StructStat>;
    fn mkdir_at(&self, dir: &Self::Handle, name: &str, mode: u32) -> FsResult<()>;
    fn unlink_file_at(&self, dir: &Self::Handle, name: &str) -> FsResult<()>;
    fn remove_directory_at(&self, dir: &Self::Handle, name: &str) -> FsResult<()>;
    fn rename_at(
        &self,
        old_dir: &Self::Handle,
        old_name: &str,
        new_dir: &Self::Handle,
        new_name: &str,
    ) -> FsResult<()>;
    fn hardlink_at(
        &self,
        old_dir: &Self::Handle,
        old_name: &str,
        new_dir: &Self::Handle,
        new_name: &str,
    ) -> FsResult<()>;
    fn symlink_at(&self, dir: &Self::Handle, name: &str, target: &VirtualPath) -> FsResult<()>;
    fn read_link_at(&self, dir: &Self::Handle, name: &str) -> FsResult<VirtualPath>;
    fn chmod_at(&self, dir: &Self::Handle, name: &str, mode: u32) -> FsResult<()>;
    fn chown_at(
        &self,
        dir: &Self::Handle,
        name: &str,
        owner: Option<u32>,
        group: Option<u32>,
    ) -> FsResult<()>;
    fn set_times_at(
        &self,
        dir: &Self::Handle,
        name: &str,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
    ) -> FsResult<()>;
    fn check_access_at(&self, dir: &Self::Handle, name: &str, mode: AccessMode) -> FsResult<()>;
    fn directory_is_empty_at(&self, dir: &Self::Handle, name: &str) -> FsResult<bool>;
}
