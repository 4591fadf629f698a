//! Native adapters for `sandboxfs-core`.
//!
//! ```no_run
//! use sandboxfs_core::FileSystemConfig;
//!
//! let config = FileSystemConfig::builder()
//!     .preopen_dir("/srv/guest", "/")
//!     .build()?;
//! let fs = sandboxfs_host::host_filesystem(config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod errno;
pub mod platform;

pub use errno::io_error_kind;
pub use platform::{NativePlatform, PortablePlatform};

use sandboxfs_core::{BuildError, FileSystem, FileSystemConfig, FsError, FsResult};

pub type HostFileSystem = FileSystem<NativePlatform>;

/// Build a [`FileSystem`] backed by the native platform of this host.
pub fn host_filesystem(config: FileSystemConfig) -> Result<HostFileSystem, BuildError> {
    FileSystem::new(NativePlatform::default(), config)
}

pub(crate) fn map_io_error(context: &'static str, err: std::io::Error) -> FsError {
    let kind = io_error_kind(&err);
    FsError::with_source(kind, context, err)
}

pub(crate) fn io_result<T>(context: &'static str, result: std::io::Result<T>) -> FsResult<T> {
    result.map_err(|err| map_io_error(context, err))
}
