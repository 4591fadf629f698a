//! Guest-visible, sandbox-relative paths.

use std::fmt;

use crate::error::{FsError, FsErrorKind, FsResult};

pub const MAX_PATH_LEN: usize = 4096;

/// Slash-separated UTF-8 path as the guest wrote it.
///
/// Guaranteed non-empty, free of NUL bytes and at most [`MAX_PATH_LEN`]
/// bytes long. A leading `/` is representable but rejected by resolution.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(String);

impl VirtualPath {
    pub fn new(path: impl Into<String>) -> FsResult<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(FsError::new(FsErrorKind::InvalidArgument, "path.empty"));
        }
        if path.len() > MAX_PATH_LEN {
            return Err(FsError::new(FsErrorKind::NameTooLong, "path.len"));
        }
        if path.as_bytes().contains(&0) {
            return Err(FsError::new(FsErrorKind::InvalidArgument, "path.nul"));
        }
        Ok(Self(path))
    }

    /// Builds a path from bytes returned by the host, e.g. a symlink target.
    pub fn from_bytes(bytes: Vec<u8>) -> FsResult<Self> {
        let path = String::from_utf8(bytes)
            .map_err(|_| FsError::new(FsErrorKind::InvalidArgument, "path.utf8"))?;
        Self::new(path)
    }

    pub fn current_directory() -> Self {
        Self(".".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// True when the last component must name a directory: the path ends
    /// in `/`, `/.` or `/..`, or is exactly `.` or `..`.
    pub fn must_be_directory(&self) -> bool {
        let last = self.0.rsplit('/').next().unwrap_or_default();
        self.0.ends_with('/') || last == "." || last == ".."
    }

    /// Non-empty, non-`.` components in order. `..` is returned as-is.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty() && *c != ".")
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl TryFrom<&str> for VirtualPath {
    type Error = FsError;

    fn try_from(value: &str) -> FsResult<Self> {
        VirtualPath::new(value)
    }
}
