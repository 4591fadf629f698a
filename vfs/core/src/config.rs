use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{FsError, FsErrorKind, FsResult};
use crate::fd_table::DEFAULT_MAX_OPEN_FDS;
use crate::interceptor::FileSystemInterceptor;
use crate::logging::LoggingFileSystemInterceptor;
use crate::model::FIRST_PREOPEN_FD;
use crate::path::VirtualPath;
use crate::preopen::PreopenedDirectory;
use crate::resolver::SymlinkResolver;
use crate::stdio::StandardInputOutput;

#[derive(Clone)]
pub struct FileSystemConfig {
    pub preopens: Vec<PreopenedDirectory>,
    pub current_working_directory: Option<PathBuf>,
    pub stdio: StandardInputOutput,
    pub interceptors: Vec<Arc<dyn FileSystemInterceptor>>,
    pub max_open_fds: usize,
    pub resolver: SymlinkResolver,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            preopens: Vec::new(),
            current_working_directory: None,
            stdio: StandardInputOutput::default(),
            interceptors: Vec::new(),
            max_open_fds: DEFAULT_MAX_OPEN_FDS,
            resolver: SymlinkResolver::default(),
        }
    }
}

impl fmt::Debug for FileSystemConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemConfig")
            .field("preopens", &self.preopens)
            .field("current_working_directory", &self.current_working_directory)
            .field("interceptors", &self.interceptors.len())
            .field("max_open_fds", &self.max_open_fds)
            .field("resolver", &self.resolver)
            .finish()
    }
}

impl FileSystemConfig {
    pub fn builder() -> FileSystemBuilder {
        FileSystemBuilder::default()
    }

    pub fn validate(&self) -> FsResult<()> {
        let mut seen = HashSet::new();
        for preopen in &self.preopens {
            if !seen.insert(preopen.virtual_path.as_str()) {
                return Err(FsError::new(
                    FsErrorKind::Exists,
                    "config.duplicate_virtual_path",
                ));
            }
        }
        let reserved = FIRST_PREOPEN_FD as usize
            + self.preopens.len()
            + usize::from(self.current_working_directory.is_some());
        if self.max_open_fds < reserved {
            return Err(FsError::new(FsErrorKind::Nfile, "config.max_open_fds"));
        }
        if self.resolver.max_open_handles == 0 {
            return Err(FsError::new(
                FsErrorKind::InvalidArgument,
                "config.max_open_handles",
            ));
        }
        Ok(())
    }
}

/// Fluent construction of a [`FileSystemConfig`].
///
/// Virtual paths are validated in [`build`](Self::build), so the chain
/// itself never fails.
#[derive(Default)]
pub struct FileSystemBuilder {
    config: FileSystemConfig,
    preopens: Vec<(String, PathBuf)>,
}

impl FileSystemBuilder {
    /// Grant `real_path` to the guest under `virtual_path`.
    pub fn preopen_dir(mut self, real_path: impl Into<PathBuf>, virtual_path: &str) -> Self {
        self.preopens.push((virtual_path.to_owned(), real_path.into()));
        self
    }

    pub fn current_working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.current_working_directory = Some(path.into());
        self
    }

    pub fn stdio(mut self, stdio: StandardInputOutput) -> Self {
        self.config.stdio = stdio;
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn FileSystemInterceptor>) -> Self {
        self.config.interceptors.push(interceptor);
        self
    }

    /// Shorthand for a default [`LoggingFileSystemInterceptor`] at `level`.
    pub fn logging(self, level: tracing::Level) -> Self {
        self.interceptor(Arc::new(LoggingFileSystemInterceptor::new(level)))
    }

    pub fn max_open_fds(mut self, max: usize) -> Self {
        self.config.max_open_fds = max;
        self
    }

    pub fn max_symlink_expansions(mut self, max: usize) -> Self {
        self.config.resolver.max_expansions = max;
        self
    }

    pub fn build(self) -> FsResult<FileSystemConfig> {
        let mut config = self.config;
        for (virtual_path, real_path) in self.preopens {
            config.preopens.push(PreopenedDirectory::new(
                VirtualPath::new(virtual_path)?,
                real_path,
            ));
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_preopens() {
        let config = FileSystemConfig::builder()
            .preopen_dir("/tmp/a", "/sandbox")
            .preopen_dir("/tmp/b", "data")
            .max_symlink_expansions(8)
            .build()
            .unwrap();
        assert_eq!(config.preopens.len(), 2);
        assert_eq!(config.preopens[0].virtual_path.as_str(), "/sandbox");
        assert_eq!(config.resolver.max_expansions, 8);
    }

    #[test]
    fn duplicate_virtual_paths_are_rejected() {
        let err = FileSystemConfig::builder()
            .preopen_dir("/tmp/a", "/sandbox")
            .preopen_dir("/tmp/b", "/sandbox")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Exists);
    }

    #[test]
    fn fd_limit_must_fit_stdio_and_preopens() {
        let err = FileSystemConfig::builder()
            .preopen_dir("/tmp/a", "/sandbox")
            .max_open_fds(3)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Nfile);
    }

    #[test]
    fn empty_virtual_path_is_invalid() {
        let err = FileSystemConfig::builder()
            .preopen_dir("/tmp/a", "")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
    }
}
