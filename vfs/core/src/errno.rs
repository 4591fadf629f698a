//! WASI Preview1 errno values and the kind → errno translation.
//!
//! [`FsErrorKind::errno`] is the single source of truth for this mapping.
//! Callers must not duplicate it elsewhere.

use crate::error::FsErrorKind;

/// WASI Preview1 `errno`, bit-compatible with the guest ABI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum Errno {
    Success = 0,
    Toobig = 1,
    Acces = 2,
    Addrinuse = 3,
    Addrnotavail = 4,
    Afnosupport = 5,
    Again = 6,
    Already = 7,
    Badf = 8,
    Badmsg = 9,
    Busy = 10,
    Canceled = 11,
    Child = 12,
    Connaborted = 13,
    Connrefused = 14,
    Connreset = 15,
    Deadlk = 16,
    Destaddrreq = 17,
    Dom = 18,
    Dquot = 19,
    Exist = 20,
    Fault = 21,
    Fbig = 22,
    Hostunreach = 23,
    Idrm = 24,
    Ilseq = 25,
    Inprogress = 26,
    Intr = 27,
    Inval = 28,
    Io = 29,
    Isconn = 30,
    Isdir = 31,
    Loop = 32,
    Mfile = 33,
    Mlink = 34,
    Msgsize = 35,
    Multihop = 36,
    Nametoolong = 37,
    Netdown = 38,
    Netreset = 39,
    Netunreach = 40,
    Nfile = 41,
    Nobufs = 42,
    Nodev = 43,
    Noent = 44,
    Noexec = 45,
    Nolck = 46,
    Nolink = 47,
    Nomem = 48,
    Nomsg = 49,
    Noprotoopt = 50,
    Nospc = 51,
    Nosys = 52,
    Notconn = 53,
    Notdir = 54,
    Notempty = 55,
    Notrecoverable = 56,
    Notsock = 57,
    Notsup = 58,
    Notty = 59,
    Nxio = 60,
    Overflow = 61,
    Ownerdead = 62,
    Perm = 63,
    Pipe = 64,
    Proto = 65,
    Protonosupport = 66,
    Prototype = 67,
    Range = 68,
    Rofs = 69,
    Spipe = 70,
    Srch = 71,
    Stale = 72,
    Timedout = 73,
    Txtbsy = 74,
    Xdev = 75,
    Notcapable = 76,
}

impl Errno {
    pub fn raw(self) -> u16 {
        self as u16
    }
}

impl FsErrorKind {
    pub fn errno(self) -> Errno {
        match self {
            FsErrorKind::BadFileDescriptor => Errno::Badf,
            FsErrorKind::NotDirectory => Errno::Notdir,
            FsErrorKind::IsDirectory => Errno::Isdir,
            FsErrorKind::NotCapable => Errno::Notcapable,
            FsErrorKind::NoEntry => Errno::Noent,
            FsErrorKind::Exists => Errno::Exist,
            FsErrorKind::NotEmpty => Errno::Notempty,
            FsErrorKind::InvalidArgument => Errno::Inval,
            FsErrorKind::IoError => Errno::Io,
            FsErrorKind::Interrupted => Errno::Intr,
            FsErrorKind::AccessDenied => Errno::Acces,
            FsErrorKind::PermissionDenied => Errno::Perm,
            FsErrorKind::NameTooLong => Errno::Nametoolong,
            FsErrorKind::TooManySymbolicLinks => Errno::Loop,
            FsErrorKind::Nfile => Errno::Nfile,
            FsErrorKind::Mfile => Errno::Mfile,
            FsErrorKind::Mlink => Errno::Mlink,
            FsErrorKind::NoSpace => Errno::Nospc,
            FsErrorKind::DiskQuota => Errno::Dquot,
            FsErrorKind::Pipe => Errno::Pipe,
            FsErrorKind::Overflow => Errno::Overflow,
            FsErrorKind::FileTooLarge => Errno::Fbig,
            FsErrorKind::NotSeekable => Errno::Spipe,
            FsErrorKind::NotSupported => Errno::Notsup,
            FsErrorKind::NoBufferSpace => Errno::Nobufs,
            FsErrorKind::ReadOnlyFileSystem => Errno::Rofs,
            FsErrorKind::Again => Errno::Again,
            FsErrorKind::TextFileBusy => Errno::Txtbsy,
            FsErrorKind::Nxio => Errno::Nxio,
            FsErrorKind::NoLock => Errno::Nolck,
            FsErrorKind::CrossDevice => Errno::Xdev,
            FsErrorKind::Busy => Errno::Busy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_abi_values() {
        assert_eq!(Errno::Success.raw(), 0);
        assert_eq!(Errno::Badf.raw(), 8);
        assert_eq!(Errno::Exist.raw(), 20);
        assert_eq!(Errno::Loop.raw(), 32);
        assert_eq!(Errno::Noent.raw(), 44);
        assert_eq!(Errno::Notdir.raw(), 54);
        assert_eq!(Errno::Rofs.raw(), 69);
        assert_eq!(Errno::Notcapable.raw(), 76);
    }

    #[test]
    fn resolver_failures_map_to_wasi_codes() {
        assert_eq!(FsErrorKind::NotCapable.errno(), Errno::Notcapable);
        assert_eq!(FsErrorKind::TooManySymbolicLinks.errno(), Errno::Loop);
        assert_eq!(FsErrorKind::NameTooLong.errno(), Errno::Nametoolong);
        assert_eq!(FsErrorKind::Nfile.errno(), Errno::Nfile);
    }
}
