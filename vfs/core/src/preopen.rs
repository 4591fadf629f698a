//! Startup construction of the sandbox roots.

use std::path::{Path, PathBuf};

use crate::error::FsError;
use crate::path::VirtualPath;
use crate::platform::HostPlatform;

/// A directory granted to the guest at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreopenedDirectory {
    pub virtual_path: VirtualPath,
    pub real_path: PathBuf,
}

impl PreopenedDirectory {
    pub fn new(virtual_path: VirtualPath, real_path: impl Into<PathBuf>) -> Self {
        Self {
            virtual_path,
            real_path: real_path.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot open preopened directory {} ({})", .directory.real_path.display(), .directory.virtual_path)]
pub struct PreopenError {
    pub directory: PreopenedDirectory,
    #[source]
    pub error: FsError,
}

/// Handles produced by a successful batch.
#[derive(Debug)]
pub struct PreopenedDirectories<H> {
    pub current_working_directory: Option<H>,
    pub preopens: Vec<(PreopenedDirectory, H)>,
}

/// Opens every preopen declaration once, all-or-nothing.
pub struct BatchDirectoryOpener<'a, P: HostPlatform> {
    platform: &'a P,
}

impl<'a, P: HostPlatform> BatchDirectoryOpener<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Declarations are deduplicated by real path, keeping the first. A
    /// working directory that cannot be opened is logged and left unset;
    /// any preopen failure closes everything opened so far.
    pub fn open(
        &self,
        current_working_directory: Option<&Path>,
        directories: &[PreopenedDirectory],
    ) -> Result<PreopenedDirectories<P::Handle>, PreopenError> {
        let cwd = current_working_directory.and_then(|path| {
            match self.platform.open_root(None, path) {
                Ok(handle) => Some(handle),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "preopen.cwd_unavailable");
                    None
                }
            }
        });

        let mut opened: Vec<(PreopenedDirectory, P::Handle)> = Vec::with_capacity(directories.len());
        for directory in directories {
            if opened
                .iter()
                .any(|(existing, _)| existing.real_path == directory.real_path)
            {
                tracing::debug!(
                    real_path = %directory.real_path.display(),
                    virtual_path = %directory.virtual_path,
                    "preopen.duplicate"
                );
                continue;
            }
            match self.platform.open_root(cwd.as_ref(), &directory.real_path) {
                Ok(handle) => {
                    tracing::debug!(
                        real_path = %directory.real_path.display(),
                        virtual_path = %directory.virtual_path,
                        "preopen.opened"
                    );
                    opened.push((directory.clone(), handle));
                }
                Err(error) => {
                    self.close_all(cwd, opened);
                    return Err(PreopenError {
                        directory: directory.clone(),
                        error,
                    });
                }
            }
        }

        Ok(PreopenedDirectories {
            current_working_directory: cwd,
            preopens: opened,
        })
    }

    fn close_all(&self, cwd: Option<P::Handle>, opened: Vec<(PreopenedDirectory, P::Handle)>) {
        for handle in opened.into_iter().rev().map(|(_, h)| h).chain(cwd) {
            if let Err(error) = self.platform.close_dir(handle) {
                tracing::warn!(%error, "preopen.close_failed");
            }
        }
    }
}
