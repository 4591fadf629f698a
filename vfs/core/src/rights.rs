//! Per-fd capability rights.

use bitflags::bitflags;

use crate::error::{FsError, FsErrorKind, FsResult};

bitflags! {
    /// Bit positions mirror WASI Preview1 `rights`.
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
        const SOCK_ACCEPT = 1 << 29;

        /// Rights meaningful on a directory fd.
        const DIRECTORY_BASE = Self::PATH_CREATE_DIRECTORY.bits
            | Self::PATH_CREATE_FILE.bits
            | Self::PATH_LINK_SOURCE.bits
            | Self::PATH_LINK_TARGET.bits
            | Self::PATH_OPEN.bits
            | Self::FD_READDIR.bits
            | Self::PATH_READLINK.bits
            | Self::PATH_RENAME_SOURCE.bits
            | Self::PATH_RENAME_TARGET.bits
            | Self::PATH_SYMLINK.bits
            | Self::PATH_REMOVE_DIRECTORY.bits
            | Self::PATH_UNLINK_FILE.bits
            | Self::PATH_FILESTAT_GET.bits
            | Self::PATH_FILESTAT_SET_SIZE.bits
            | Self::PATH_FILESTAT_SET_TIMES.bits
            | Self::FD_FILESTAT_GET.bits
            | Self::FD_FILESTAT_SET_TIMES.bits;

        /// Rights meaningful on a regular file fd.
        const FILE_BASE = Self::FD_DATASYNC.bits
            | Self::FD_READ.bits
            | Self::FD_SEEK.bits
            | Self::FD_FDSTAT_SET_FLAGS.bits
            | Self::FD_SYNC.bits
            | Self::FD_TELL.bits
            | Self::FD_WRITE.bits
            | Self::FD_ADVISE.bits
            | Self::FD_ALLOCATE.bits
            | Self::FD_FILESTAT_GET.bits
            | Self::FD_FILESTAT_SET_SIZE.bits
            | Self::FD_FILESTAT_SET_TIMES.bits
            | Self::POLL_FD_READWRITE.bits;

        const STDIO = Self::FD_DATASYNC.bits
            | Self::FD_READ.bits
            | Self::FD_SYNC.bits
            | Self::FD_WRITE.bits
            | Self::FD_FDSTAT_SET_FLAGS.bits
            | Self::POLL_FD_READWRITE.bits;
    }
}

/// Rights that only make sense on a writable file.
const WRITE_RIGHTS: Rights = Rights::from_bits_truncate(
    Rights::FD_WRITE.bits()
        | Rights::FD_DATASYNC.bits()
        | Rights::FD_ALLOCATE.bits()
        | Rights::FD_FILESTAT_SET_SIZE.bits(),
);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FdRightsBlock {
    pub base: Rights,
    pub inheriting: Rights,
}

pub const DIRECTORY_BASE_RIGHTS_BLOCK: FdRightsBlock = FdRightsBlock {
    base: Rights::DIRECTORY_BASE,
    inheriting: Rights::from_bits_truncate(Rights::DIRECTORY_BASE.bits() | Rights::FILE_BASE.bits()),
};

pub const FILE_BASE_RIGHTS_BLOCK: FdRightsBlock = FdRightsBlock {
    base: Rights::FILE_BASE,
    inheriting: Rights::empty(),
};

pub const STDIO_RIGHTS_BLOCK: FdRightsBlock = FdRightsBlock {
    base: Rights::STDIO,
    inheriting: Rights::empty(),
};

impl FdRightsBlock {
    pub fn new(base: Rights, inheriting: Rights) -> Self {
        Self { base, inheriting }
    }

    pub fn can(&self, rights: Rights) -> bool {
        self.base.contains(rights)
    }

    /// Fails with `NotCapable` unless every bit of `rights` is held.
    pub fn require(&self, rights: Rights, context: &'static str) -> FsResult<()> {
        if self.base.contains(rights) {
            Ok(())
        } else {
            Err(FsError::new(FsErrorKind::NotCapable, context))
        }
    }

    /// Rights of a file opened beneath a directory holding `self`.
    ///
    /// Without an explicit request the file template is used, minus the
    /// write-side rights when the file is opened read-only.
    pub fn child_file_rights(&self, requested: Option<FdRightsBlock>, writable: bool) -> FdRightsBlock {
        let requested = requested.unwrap_or_else(|| {
            let mut base = Rights::FILE_BASE;
            if !writable {
                base.remove(WRITE_RIGHTS);
            }
            FdRightsBlock::new(base, Rights::empty())
        });
        FdRightsBlock {
            base: requested.base & self.inheriting,
            inheriting: requested.inheriting & self.inheriting,
        }
    }

    /// Rights of a directory opened beneath a directory holding `self`.
    pub fn child_directory_rights(&self, requested: Option<FdRightsBlock>) -> FdRightsBlock {
        let requested = requested.unwrap_or(DIRECTORY_BASE_RIGHTS_BLOCK);
        FdRightsBlock {
            base: requested.base & self.inheriting,
            inheriting: requested.inheriting & self.inheriting,
        }
    }
}
