//! Platform-independent core of the sandboxed WASI filesystem.
//!
//! A [`FileSystem`] owns the fd table and the preopened sandbox roots and
//! executes [`Operation`]s against a [`HostPlatform`]. Paths are resolved
//! one component at a time by the [`SymlinkResolver`], which never lets a
//! `..` or a symlink leave the directory an operation started from.

pub mod config;
pub mod directory;
pub mod errno;
pub mod error;
pub mod fd_table;
pub mod file;
pub mod flags;
pub mod fs;
pub mod interceptor;
pub mod logging;
pub mod model;
pub mod op;
pub mod path;
pub mod platform;
pub mod preopen;
pub mod resolver;
pub mod resource;
pub mod rights;
pub mod stdio;

pub use config::{FileSystemBuilder, FileSystemConfig};
pub use directory::DirectoryFdResource;
pub use errno::Errno;
pub use error::{FsError, FsErrorKind, FsResult};
pub use fd_table::FileDescriptorTable;
pub use file::FileFdResource;
pub use flags::{AccessMode, Fdflags, OpenFlags};
pub use fs::{BuildError, FileSystem};
pub use interceptor::{Chain, FileSystemInterceptor, OperationDispatcher};
pub use logging::{LoggingFileSystemInterceptor, OperationLoggingLevel};
pub use model::*;
pub use op::{BaseDirectory, FsOutput, IoBuffers, Operation, OperationTag};
pub use path::VirtualPath;
pub use platform::{FileHandle, HostPlatform, Opened};
pub use preopen::{BatchDirectoryOpener, PreopenError, PreopenedDirectory};
pub use resolver::{Component, ComponentOpener, Resolved, Subcomponent, SymlinkResolver};
pub use resource::{FdEntry, FdResource};
pub use rights::{FdRightsBlock, Rights};
pub use stdio::{StandardInputOutput, StdioFdResource};
