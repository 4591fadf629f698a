//! Plain data types exchanged between the facade, resources and backends.

use crate::flags::Fdflags;
use crate::rights::FdRightsBlock;

/// Process-scoped file descriptor number.
pub type Fd = u32;

pub const STDIN_FD: Fd = 0;
pub const STDOUT_FD: Fd = 1;
pub const STDERR_FD: Fd = 2;
/// First fd handed to a preopened directory.
pub const FIRST_PREOPEN_FD: Fd = 3;

/// WASI `filetype`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Filetype {
    #[default]
    Unknown = 0,
    BlockDevice = 1,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
    SocketDgram = 5,
    SocketStream = 6,
    SymbolicLink = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

/// Where a read or write happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReadWriteStrategy {
    /// Use the fd cursor and advance it by the bytes transferred.
    #[default]
    CurrentPosition,
    /// Use an explicit offset; the cursor is left untouched.
    Position(u64),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub secs: i64,
    pub nanos: u32,
}

impl Timespec {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self {
            secs: (nanos / 1_000_000_000) as i64,
            nanos: (nanos % 1_000_000_000) as u32,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StructStat {
    pub dev: u64,
    pub ino: u64,
    pub filetype: Filetype,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

impl StructStat {
    /// Same device and inode. Backends without stable inode numbers report
    /// `ino == 0`, which never matches.
    pub fn is_same_file(&self, other: &StructStat) -> bool {
        self.ino != 0 && self.dev == other.dev && self.ino == other.ino
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FdAttributes {
    pub filetype: Filetype,
    pub flags: Fdflags,
    pub rights: FdRightsBlock,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub filetype: Filetype,
    pub inode: u64,
    /// Position of the next entry, WASI `dircookie` style.
    pub cookie: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvisoryLockKind {
    Read,
    Write,
}

/// Byte-range advisory lock request. `length == 0` extends to end of file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Advisorylock {
    pub kind: AdvisoryLockKind,
    pub whence: Whence,
    pub start: i64,
    pub length: u64,
}

impl Advisorylock {
    pub fn whole_file(kind: AdvisoryLockKind) -> Self {
        Self {
            kind,
            whence: Whence::Set,
            start: 0,
            length: 0,
        }
    }
}
