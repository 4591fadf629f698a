//! Host error code → [`FsErrorKind`] translation.
//!
//! This is the only place native error numbers are interpreted. Raw OS codes
//! win over `io::ErrorKind`, which is only consulted for errors that carry no
//! code (or one this table does not know).

use std::io;

use sandboxfs_core::FsErrorKind;

pub fn io_error_kind(err: &io::Error) -> FsErrorKind {
    if let Some(kind) = err.raw_os_error().and_then(os_error_kind) {
        return kind;
    }
    match err.kind() {
        io::ErrorKind::NotFound => FsErrorKind::NoEntry,
        io::ErrorKind::PermissionDenied => FsErrorKind::AccessDenied,
        io::ErrorKind::AlreadyExists => FsErrorKind::Exists,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => FsErrorKind::InvalidArgument,
        io::ErrorKind::Unsupported => FsErrorKind::NotSupported,
        io::ErrorKind::WouldBlock => FsErrorKind::Again,
        io::ErrorKind::Interrupted => FsErrorKind::Interrupted,
        io::ErrorKind::BrokenPipe => FsErrorKind::Pipe,
        io::ErrorKind::NotADirectory => FsErrorKind::NotDirectory,
        io::ErrorKind::IsADirectory => FsErrorKind::IsDirectory,
        io::ErrorKind::DirectoryNotEmpty => FsErrorKind::NotEmpty,
        io::ErrorKind::ReadOnlyFilesystem => FsErrorKind::ReadOnlyFileSystem,
        io::ErrorKind::StorageFull => FsErrorKind::NoSpace,
        io::ErrorKind::FileTooLarge => FsErrorKind::FileTooLarge,
        io::ErrorKind::NotSeekable => FsErrorKind::NotSeekable,
        io::ErrorKind::ResourceBusy => FsErrorKind::Busy,
        _ => FsErrorKind::IoError,
    }
}

#[cfg(unix)]
fn os_error_kind(code: i32) -> Option<FsErrorKind> {
    Some(match code {
        libc::EBADF => FsErrorKind::BadFileDescriptor,
        libc::ENOTDIR => FsErrorKind::NotDirectory,
        libc::EISDIR => FsErrorKind::IsDirectory,
        libc::ENOENT => FsErrorKind::NoEntry,
        libc::EEXIST => FsErrorKind::Exists,
        libc::ENOTEMPTY => FsErrorKind::NotEmpty,
        libc::EINVAL => FsErrorKind::InvalidArgument,
        libc::EIO => FsErrorKind::IoError,
        libc::EINTR => FsErrorKind::Interrupted,
        libc::EACCES => FsErrorKind::AccessDenied,
        libc::EPERM => FsErrorKind::PermissionDenied,
        libc::ENAMETOOLONG => FsErrorKind::NameTooLong,
        libc::ELOOP => FsErrorKind::TooManySymbolicLinks,
        libc::ENFILE => FsErrorKind::Nfile,
        libc::EMFILE => FsErrorKind::Mfile,
        libc::EMLINK => FsErrorKind::Mlink,
        libc::ENOSPC => FsErrorKind::NoSpace,
        libc::EDQUOT => FsErrorKind::DiskQuota,
        libc::EPIPE => FsErrorKind::Pipe,
        libc::EOVERFLOW => FsErrorKind::Overflow,
        libc::EFBIG => FsErrorKind::FileTooLarge,
        libc::ESPIPE => FsErrorKind::NotSeekable,
        libc::ENOTSUP => FsErrorKind::NotSupported,
        libc::ENOBUFS => FsErrorKind::NoBufferSpace,
        libc::EROFS => FsErrorKind::ReadOnlyFileSystem,
        libc::EAGAIN => FsErrorKind::Again,
        libc::ETXTBSY => FsErrorKind::TextFileBusy,
        libc::ENXIO => FsErrorKind::Nxio,
        libc::ENOLCK => FsErrorKind::NoLock,
        libc::EXDEV => FsErrorKind::CrossDevice,
        libc::EBUSY => FsErrorKind::Busy,
        // Aliases of codes above on some targets.
        code if code == libc::EOPNOTSUPP => FsErrorKind::NotSupported,
        code if code == libc::EWOULDBLOCK => FsErrorKind::Again,
        _ => return None,
    })
}

#[cfg(windows)]
fn os_error_kind(code: i32) -> Option<FsErrorKind> {
    use windows_sys::Win32::Foundation::*;

    Some(match code as u32 {
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND | ERROR_INVALID_DRIVE => FsErrorKind::NoEntry,
        ERROR_ACCESS_DENIED => FsErrorKind::AccessDenied,
        ERROR_PRIVILEGE_NOT_HELD => FsErrorKind::PermissionDenied,
        ERROR_ALREADY_EXISTS | ERROR_FILE_EXISTS => FsErrorKind::Exists,
        ERROR_DIR_NOT_EMPTY => FsErrorKind::NotEmpty,
        ERROR_DIRECTORY => FsErrorKind::NotDirectory,
        ERROR_INVALID_HANDLE => FsErrorKind::BadFileDescriptor,
        ERROR_INVALID_NAME | ERROR_INVALID_PARAMETER | ERROR_NEGATIVE_SEEK => {
            FsErrorKind::InvalidArgument
        }
        ERROR_FILENAME_EXCED_RANGE => FsErrorKind::NameTooLong,
        ERROR_CANT_RESOLVE_FILENAME => FsErrorKind::TooManySymbolicLinks,
        ERROR_TOO_MANY_OPEN_FILES => FsErrorKind::Mfile,
        ERROR_TOO_MANY_LINKS => FsErrorKind::Mlink,
        ERROR_DISK_FULL | ERROR_HANDLE_DISK_FULL => FsErrorKind::NoSpace,
        ERROR_SHARING_VIOLATION => FsErrorKind::Busy,
        ERROR_LOCK_VIOLATION => FsErrorKind::Again,
        ERROR_NOT_SAME_DEVICE => FsErrorKind::CrossDevice,
        ERROR_WRITE_PROTECT => FsErrorKind::ReadOnlyFileSystem,
        ERROR_NOT_SUPPORTED | ERROR_INVALID_FUNCTION => FsErrorKind::NotSupported,
        ERROR_BROKEN_PIPE | ERROR_NO_DATA => FsErrorKind::Pipe,
        _ => return None,
    })
}

#[cfg(not(any(unix, windows)))]
fn os_error_kind(_code: i32) -> Option<FsErrorKind> {
    None
}
