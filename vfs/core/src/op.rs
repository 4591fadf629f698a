//! The closed set of operations a [`FileSystem`](crate::fs::FileSystem)
//! executes, and their outputs.

use std::fmt;

use crate::flags::{AccessMode, Fdflags, OpenFlags};
use crate::model::{
    Advisorylock, DirEntry, Fd, FdAttributes, ReadWriteStrategy, StructStat, Timespec, Whence,
};
use crate::path::VirtualPath;
use crate::rights::FdRightsBlock;

/// Directory a path operation starts from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseDirectory {
    CurrentWorkingDirectory,
    DirectoryFd(Fd),
}

/// Owned guest buffers. `Debug` prints their sizes only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IoBuffers(pub Vec<Vec<u8>>);

impl IoBuffers {
    /// Zeroed buffers of the given sizes, for reads.
    pub fn with_sizes(sizes: &[usize]) -> Self {
        Self(sizes.iter().map(|&size| vec![0u8; size]).collect())
    }

    pub fn total_len(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    /// Concatenation of the first `len` bytes across all buffers.
    pub fn concat(&self, len: usize) -> Vec<u8> {
        self.0.iter().flatten().copied().take(len).collect()
    }
}

impl From<Vec<u8>> for IoBuffers {
    fn from(buffer: Vec<u8>) -> Self {
        Self(vec![buffer])
    }
}

impl fmt::Debug for IoBuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(Vec::len))
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum Operation {
    Open {
        base: BaseDirectory,
        path: VirtualPath,
        flags: OpenFlags,
        fdflags: Fdflags,
        mode: u32,
        /// `None` derives rights from `flags` and the base directory.
        rights: Option<FdRightsBlock>,
        follow_symlinks: bool,
    },
    Close {
        fd: Fd,
    },
    Read {
        fd: Fd,
        buffers: IoBuffers,
        strategy: ReadWriteStrategy,
    },
    Write {
        fd: Fd,
        buffers: IoBuffers,
        strategy: ReadWriteStrategy,
    },
    Seek {
        fd: Fd,
        offset: i64,
        whence: Whence,
    },
    Sync {
        fd: Fd,
        metadata: bool,
    },
    Truncate {
        fd: Fd,
        length: u64,
    },
    Allocate {
        fd: Fd,
        offset: u64,
        length: u64,
    },
    Stat {
        base: BaseDirectory,
        path: VirtualPath,
        follow_symlinks: bool,
    },
    StatFd {
        fd: Fd,
    },
    Chmod {
        base: BaseDirectory,
        path: VirtualPath,
        mode: u32,
        follow_symlinks: bool,
    },
    ChmodFd {
        fd: Fd,
        mode: u32,
    },
    Chown {
        base: BaseDirectory,
        path: VirtualPath,
        owner: Option<u32>,
        group: Option<u32>,
        follow_symlinks: bool,
    },
    ChownFd {
        fd: Fd,
        owner: Option<u32>,
        group: Option<u32>,
    },
    SetTimestamp {
        base: BaseDirectory,
        path: VirtualPath,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
        follow_symlinks: bool,
    },
    SetTimestampFd {
        fd: Fd,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
    },
    Mkdir {
        base: BaseDirectory,
        path: VirtualPath,
        mode: u32,
    },
    UnlinkFile {
        base: BaseDirectory,
        path: VirtualPath,
    },
    UnlinkDirectory {
        base: BaseDirectory,
        path: VirtualPath,
    },
    Rename {
        old_base: BaseDirectory,
        old_path: VirtualPath,
        new_base: BaseDirectory,
        new_path: VirtualPath,
    },
    Hardlink {
        old_base: BaseDirectory,
        old_path: VirtualPath,
        new_base: BaseDirectory,
        new_path: VirtualPath,
        follow_symlinks: bool,
    },
    Symlink {
        target: VirtualPath,
        base: BaseDirectory,
        path: VirtualPath,
    },
    ReadLink {
        base: BaseDirectory,
        path: VirtualPath,
    },
    ReadDir {
        fd: Fd,
    },
    CheckAccess {
        base: BaseDirectory,
        path: VirtualPath,
        mode: AccessMode,
        follow_symlinks: bool,
    },
    FdAttributes {
        fd: Fd,
    },
    SetFdFlags {
        fd: Fd,
        flags: Fdflags,
    },
    AddAdvisoryLock {
        fd: Fd,
        lock: Advisorylock,
    },
    RemoveAdvisoryLock {
        fd: Fd,
        lock: Advisorylock,
    },
    Renumber {
        from: Fd,
        to: Fd,
    },
    PrestatGet {
        fd: Fd,
    },
}

/// Discriminant of [`Operation`], usable as a map key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationTag {
    Open,
    Close,
    Read,
    Write,
    Seek,
    Sync,
    Truncate,
    Allocate,
    Stat,
    StatFd,
    Chmod,
    ChmodFd,
    Chown,
    ChownFd,
    SetTimestamp,
    SetTimestampFd,
    Mkdir,
    UnlinkFile,
    UnlinkDirectory,
    Rename,
    Hardlink,
    Symlink,
    ReadLink,
    ReadDir,
    CheckAccess,
    FdAttributes,
    SetFdFlags,
    AddAdvisoryLock,
    RemoveAdvisoryLock,
    Renumber,
    PrestatGet,
}

impl OperationTag {
    pub fn name(self) -> &'static str {
        match self {
            OperationTag::Open => "open",
            OperationTag::Close => "close",
            OperationTag::Read => "read",
            OperationTag::Write => "write",
            OperationTag::Seek => "seek",
            OperationTag::Sync => "sync",
            OperationTag::Truncate => "truncate",
            OperationTag::Allocate => "allocate",
            OperationTag::Stat => "stat",
            OperationTag::StatFd => "stat_fd",
            OperationTag::Chmod => "chmod",
            OperationTag::ChmodFd => "chmod_fd",
            OperationTag::Chown => "chown",
            OperationTag::ChownFd => "chown_fd",
            OperationTag::SetTimestamp => "set_timestamp",
            OperationTag::SetTimestampFd => "set_timestamp_fd",
            OperationTag::Mkdir => "mkdir",
            OperationTag::UnlinkFile => "unlink_file",
            OperationTag::UnlinkDirectory => "unlink_directory",
            OperationTag::Rename => "rename",
            OperationTag::Hardlink => "hardlink",
            OperationTag::Symlink => "symlink",
            OperationTag::ReadLink => "readlink",
            OperationTag::ReadDir => "readdir",
            OperationTag::CheckAccess => "check_access",
            OperationTag::FdAttributes => "fd_attributes",
            OperationTag::SetFdFlags => "set_fd_flags",
            OperationTag::AddAdvisoryLock => "add_advisory_lock",
            OperationTag::RemoveAdvisoryLock => "remove_advisory_lock",
            OperationTag::Renumber => "renumber",
            OperationTag::PrestatGet => "prestat_get",
        }
    }
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Operation {
    pub fn tag(&self) -> OperationTag {
        match self {
            Operation::Open { .. } => OperationTag::Open,
            Operation::Close { .. } => OperationTag::Close,
            Operation::Read { .. } => OperationTag::Read,
            Operation::Write { .. } => OperationTag::Write,
            Operation::Seek { .. } => OperationTag::Seek,
            Operation::Sync { .. } => OperationTag::Sync,
            Operation::Truncate { .. } => OperationTag::Truncate,
            Operation::Allocate { .. } => OperationTag::Allocate,
            Operation::Stat { .. } => OperationTag::Stat,
            Operation::StatFd { .. } => OperationTag::StatFd,
            Operation::Chmod { .. } => OperationTag::Chmod,
            Operation::ChmodFd { .. } => OperationTag::ChmodFd,
            Operation::Chown { .. } => OperationTag::Chown,
            Operation::ChownFd { .. } => OperationTag::ChownFd,
            Operation::SetTimestamp { .. } => OperationTag::SetTimestamp,
            Operation::SetTimestampFd { .. } => OperationTag::SetTimestampFd,
            Operation::Mkdir { .. } => OperationTag::Mkdir,
            Operation::UnlinkFile { .. } => OperationTag::UnlinkFile,
            Operation::UnlinkDirectory { .. } => OperationTag::UnlinkDirectory,
            Operation::Rename { .. } => OperationTag::Rename,
            Operation::Hardlink { .. } => OperationTag::Hardlink,
            Operation::Symlink { .. } => OperationTag::Symlink,
            Operation::ReadLink { .. } => OperationTag::ReadLink,
            Operation::ReadDir { .. } => OperationTag::ReadDir,
            Operation::CheckAccess { .. } => OperationTag::CheckAccess,
            Operation::FdAttributes { .. } => OperationTag::FdAttributes,
            Operation::SetFdFlags { .. } => OperationTag::SetFdFlags,
            Operation::AddAdvisoryLock { .. } => OperationTag::AddAdvisoryLock,
            Operation::RemoveAdvisoryLock { .. } => OperationTag::RemoveAdvisoryLock,
            Operation::Renumber { .. } => OperationTag::Renumber,
            Operation::PrestatGet { .. } => OperationTag::PrestatGet,
        }
    }

    /// Short description of the operands: fds and paths only.
    pub fn summary(&self) -> String {
        match self {
            Operation::Open { base, path, .. }
            | Operation::Stat { base, path, .. }
            | Operation::Chmod { base, path, .. }
            | Operation::Chown { base, path, .. }
            | Operation::SetTimestamp { base, path, .. }
            | Operation::Mkdir { base, path, .. }
            | Operation::UnlinkFile { base, path }
            | Operation::UnlinkDirectory { base, path }
            | Operation::Symlink { base, path, .. }
            | Operation::ReadLink { base, path }
            | Operation::CheckAccess { base, path, .. } => format!("{}, {path}", base_summary(base)),
            Operation::Rename {
                old_base,
                old_path,
                new_base,
                new_path,
            }
            | Operation::Hardlink {
                old_base,
                old_path,
                new_base,
                new_path,
                ..
            } => format!(
                "{}, {old_path} -> {}, {new_path}",
                base_summary(old_base),
                base_summary(new_base)
            ),
            Operation::Read { fd, buffers, .. } | Operation::Write { fd, buffers, .. } => {
                format!("fd={fd}, len={}", buffers.total_len())
            }
            Operation::Renumber { from, to } => format!("fd={from} -> fd={to}"),
            Operation::Close { fd }
            | Operation::Seek { fd, .. }
            | Operation::Sync { fd, .. }
            | Operation::Truncate { fd, .. }
            | Operation::Allocate { fd, .. }
            | Operation::StatFd { fd }
            | Operation::ChmodFd { fd, .. }
            | Operation::ChownFd { fd, .. }
            | Operation::SetTimestampFd { fd, .. }
            | Operation::ReadDir { fd }
            | Operation::FdAttributes { fd }
            | Operation::SetFdFlags { fd, .. }
            | Operation::AddAdvisoryLock { fd, .. }
            | Operation::RemoveAdvisoryLock { fd, .. }
            | Operation::PrestatGet { fd } => format!("fd={fd}"),
        }
    }
}

fn base_summary(base: &BaseDirectory) -> String {
    match base {
        BaseDirectory::CurrentWorkingDirectory => "cwd".to_owned(),
        BaseDirectory::DirectoryFd(fd) => format!("fd={fd}"),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsOutput {
    Unit,
    Fd(Fd),
    Count(usize),
    Offset(u64),
    Read { count: usize, buffers: IoBuffers },
    Stat(StructStat),
    Path(VirtualPath),
    Entries(Vec<DirEntry>),
    Attributes(FdAttributes),
}

impl FsOutput {
    pub fn fd(&self) -> Option<Fd> {
        match self {
            FsOutput::Fd(fd) => Some(*fd),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<usize> {
        match self {
            FsOutput::Count(count) | FsOutput::Read { count, .. } => Some(*count),
            _ => None,
        }
    }

    pub fn stat(&self) -> Option<&StructStat> {
        match self {
            FsOutput::Stat(stat) => Some(stat),
            _ => None,
        }
    }

    pub fn into_read(self) -> Option<(usize, IoBuffers)> {
        match self {
            FsOutput::Read { count, buffers } => Some((count, buffers)),
            _ => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            FsOutput::Unit => String::new(),
            FsOutput::Fd(fd) => format!("fd={fd}"),
            FsOutput::Count(count) | FsOutput::Read { count, .. } => format!("count={count}"),
            FsOutput::Offset(offset) => format!("offset={offset}"),
            FsOutput::Stat(stat) => format!("{:?}, size={}", stat.filetype, stat.size),
            FsOutput::Path(path) => path.to_string(),
            FsOutput::Entries(entries) => format!("entries={}", entries.len()),
            FsOutput::Attributes(attributes) => format!("{:?}", attributes.filetype),
        }
    }
}
