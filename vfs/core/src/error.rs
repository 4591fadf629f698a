//! Canonical filesystem error taxonomy.
//!
//! Every backend translates its native error codes into [`FsErrorKind`];
//! nothing above the host adapters ever looks at errno or Win32 codes.

use std::io;

use crate::errno::Errno;

pub type FsResult<T> = Result<T, FsError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum FsErrorKind {
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("capabilities insufficient")]
    NotCapable,
    #[error("no such file or directory")]
    NoEntry,
    #[error("file exists")]
    Exists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("i/o error")]
    IoError,
    #[error("interrupted")]
    Interrupted,
    #[error("access denied")]
    AccessDenied,
    #[error("operation not permitted")]
    PermissionDenied,
    #[error("name too long")]
    NameTooLong,
    #[error("too many levels of symbolic links")]
    TooManySymbolicLinks,
    #[error("too many open files in system")]
    Nfile,
    #[error("too many open files")]
    Mfile,
    #[error("too many links")]
    Mlink,
    #[error("no space left on device")]
    NoSpace,
    #[error("disk quota exceeded")]
    DiskQuota,
    #[error("broken pipe")]
    Pipe,
    #[error("value too large")]
    Overflow,
    #[error("file too large")]
    FileTooLarge,
    #[error("illegal seek")]
    NotSeekable,
    #[error("not supported")]
    NotSupported,
    #[error("no buffer space available")]
    NoBufferSpace,
    #[error("read-only filesystem")]
    ReadOnlyFileSystem,
    #[error("resource temporarily unavailable")]
    Again,
    #[error("text file busy")]
    TextFileBusy,
    #[error("no such device or address")]
    Nxio,
    #[error("no locks available")]
    NoLock,
    #[error("cross-device link")]
    CrossDevice,
    #[error("device or resource busy")]
    Busy,
}

impl FsErrorKind {
    /// Stable lowercase name, used as a structured logging field.
    pub fn as_str(self) -> &'static str {
        match self {
            FsErrorKind::BadFileDescriptor => "bad_file_descriptor",
            FsErrorKind::NotDirectory => "not_directory",
            FsErrorKind::IsDirectory => "is_directory",
            FsErrorKind::NotCapable => "not_capable",
            FsErrorKind::NoEntry => "no_entry",
            FsErrorKind::Exists => "exists",
            FsErrorKind::NotEmpty => "not_empty",
            FsErrorKind::InvalidArgument => "invalid_argument",
            FsErrorKind::IoError => "io",
            FsErrorKind::Interrupted => "interrupted",
            FsErrorKind::AccessDenied => "access_denied",
            FsErrorKind::PermissionDenied => "permission_denied",
            FsErrorKind::NameTooLong => "name_too_long",
            FsErrorKind::TooManySymbolicLinks => "too_many_symbolic_links",
            FsErrorKind::Nfile => "nfile",
            FsErrorKind::Mfile => "mfile",
            FsErrorKind::Mlink => "mlink",
            FsErrorKind::NoSpace => "no_space",
            FsErrorKind::DiskQuota => "disk_quota",
            FsErrorKind::Pipe => "pipe",
            FsErrorKind::Overflow => "overflow",
            FsErrorKind::FileTooLarge => "file_too_large",
            FsErrorKind::NotSeekable => "not_seekable",
            FsErrorKind::NotSupported => "not_supported",
            FsErrorKind::NoBufferSpace => "no_buffer_space",
            FsErrorKind::ReadOnlyFileSystem => "read_only_file_system",
            FsErrorKind::Again => "again",
            FsErrorKind::TextFileBusy => "text_file_busy",
            FsErrorKind::Nxio => "nxio",
            FsErrorKind::NoLock => "no_lock",
            FsErrorKind::CrossDevice => "cross_device",
            FsErrorKind::Busy => "busy",
        }
    }
}

/// Error returned by every filesystem operation.
///
/// `context` is a dotted `"area.operation"` tag naming where the failure was
/// raised, e.g. `"resolver.dotdot"` or `"host.openat"`.
#[derive(Debug, thiserror::Error)]
#[error("{context}: {kind}")]
pub struct FsError {
    kind: FsErrorKind,
    context: &'static str,
    #[source]
    source: Option<io::Error>,
}

impl FsError {
    pub fn new(kind: FsErrorKind, context: &'static str) -> Self {
        Self {
            kind,
            context,
            source: None,
        }
    }

    pub fn with_source(kind: FsErrorKind, context: &'static str, source: io::Error) -> Self {
        Self {
            kind,
            context,
            source: Some(source),
        }
    }

    pub fn kind(&self) -> FsErrorKind {
        self.kind
    }

    pub fn context(&self) -> &'static str {
        self.context
    }

    pub fn errno(&self) -> Errno {
        self.kind.errno()
    }
}

impl From<FsErrorKind> for FsError {
    fn from(kind: FsErrorKind) -> Self {
        FsError::new(kind, "fs")
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn display_includes_context_and_kind() {
        let err = FsError::new(FsErrorKind::NotCapable, "resolver.dotdot");
        assert_eq!(err.to_string(), "resolver.dotdot: capabilities insufficient");
    }

    #[test]
    fn source_is_exposed() {
        let io = io::Error::from(io::ErrorKind::NotFound);
        let err = FsError::with_source(FsErrorKind::NoEntry, "host.openat", io);
        assert!(err.source().is_some());
        assert_eq!(err.kind(), FsErrorKind::NoEntry);
        assert_eq!(err.context(), "host.openat");
    }
}
