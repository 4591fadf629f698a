use std::collections::BTreeMap;

use crate::error::{FsError, FsErrorKind, FsResult};
use crate::model::{FIRST_PREOPEN_FD, Fd};

pub const DEFAULT_MAX_OPEN_FDS: usize = 1024;

/// Map from fd number to resource.
///
/// Not synchronized on its own; the owning filesystem keeps it behind a
/// single mutex.
#[derive(Debug)]
pub struct FileDescriptorTable<R> {
    entries: BTreeMap<Fd, R>,
    first_fd: Fd,
    capacity: usize,
}

impl<R> FileDescriptorTable<R> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            first_fd: FIRST_PREOPEN_FD,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, fd: Fd) -> bool {
        self.entries.contains_key(&fd)
    }

    pub fn get(&self, fd: Fd) -> Option<&R> {
        self.entries.get(&fd)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Fd, &R)> {
        self.entries.iter().map(|(&fd, resource)| (fd, resource))
    }

    /// Lowest fd at or above the first preopen slot that is not in use.
    fn lowest_free(&self) -> FsResult<Fd> {
        let mut candidate = self.first_fd;
        for &fd in self.entries.range(self.first_fd..).map(|(fd, _)| fd) {
            if fd != candidate {
                break;
            }
            candidate = candidate
                .checked_add(1)
                .ok_or_else(|| FsError::new(FsErrorKind::Nfile, "fd_table.allocate"))?;
        }
        Ok(candidate)
    }

    /// Insert the resource produced by `factory` at the lowest free fd.
    ///
    /// The factory receives the fd it is being registered under. If it
    /// fails, the table is left unchanged.
    pub fn allocate(&mut self, factory: impl FnOnce(Fd) -> FsResult<R>) -> FsResult<Fd> {
        if self.entries.len() >= self.capacity {
            return Err(FsError::new(FsErrorKind::Nfile, "fd_table.allocate"));
        }
        let fd = self.lowest_free()?;
        let resource = factory(fd)?;
        self.entries.insert(fd, resource);
        Ok(fd)
    }

    /// Remove an entry. Unknown fds fail with `BadFileDescriptor`.
    pub fn release(&mut self, fd: Fd) -> FsResult<R> {
        self.entries
            .remove(&fd)
            .ok_or_else(|| FsError::new(FsErrorKind::BadFileDescriptor, "fd_table.release"))
    }

    /// Place a resource at a fixed fd, returning whatever was there.
    pub fn insert_at(&mut self, fd: Fd, resource: R) -> Option<R> {
        self.entries.insert(fd, resource)
    }

    /// Empty the table, yielding every entry in fd order.
    pub fn drain(&mut self) -> Vec<(Fd, R)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}
