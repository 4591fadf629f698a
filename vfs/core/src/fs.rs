//! The filesystem facade: one fd table, the sandbox roots, and the
//! interceptor chain every operation passes through.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::FileSystemConfig;
use crate::directory::DirectoryFdResource;
use crate::error::{FsError, FsErrorKind, FsResult};
use crate::fd_table::FileDescriptorTable;
use crate::file::FileFdResource;
use crate::flags::{Fdflags, OpenFlags};
use crate::interceptor::{Chain, FileSystemInterceptor, OperationDispatcher};
use crate::model::{Fd, Filetype, STDERR_FD, STDIN_FD, STDOUT_FD};
use crate::op::{BaseDirectory, FsOutput, Operation};
use crate::path::VirtualPath;
use crate::platform::{FileHandle, HostPlatform, Opened};
use crate::preopen::{BatchDirectoryOpener, PreopenError};
use crate::resolver::SymlinkResolver;
use crate::resource::{FdEntry, FdResource};
use crate::rights::{DIRECTORY_BASE_RIGHTS_BLOCK, FdRightsBlock, Rights};
use crate::stdio::StdioFdResource;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid filesystem configuration")]
    Config(#[source] FsError),
    #[error(transparent)]
    Preopen(#[from] PreopenError),
}

pub struct FileSystem<P: HostPlatform> {
    state: FsState<P>,
    interceptors: Vec<Arc<dyn FileSystemInterceptor>>,
}

struct FsState<P: HostPlatform> {
    platform: Arc<P>,
    table: Mutex<FileDescriptorTable<FdEntry<P>>>,
    resolver: SymlinkResolver,
    current_working_directory: Option<Arc<DirectoryFdResource<P>>>,
}

impl<P: HostPlatform> FileSystem<P> {
    /// Open the configured roots and populate fds 0, 1 and 2, then one fd
    /// per preopen starting at 3, then the working directory if any.
    pub fn new(platform: P, config: FileSystemConfig) -> Result<Self, BuildError> {
        config.validate().map_err(BuildError::Config)?;
        let platform = Arc::new(platform);
        let opened = BatchDirectoryOpener::new(platform.as_ref()).open(
            config.current_working_directory.as_deref(),
            &config.preopens,
        )?;

        let mut table = FileDescriptorTable::new(config.max_open_fds);
        table.insert_at(
            STDIN_FD,
            FdEntry::Stdio(Arc::new(StdioFdResource::stdin(config.stdio.stdin.clone()))),
        );
        table.insert_at(
            STDOUT_FD,
            FdEntry::Stdio(Arc::new(StdioFdResource::stdout(config.stdio.stdout.clone()))),
        );
        table.insert_at(
            STDERR_FD,
            FdEntry::Stdio(Arc::new(StdioFdResource::stderr(config.stdio.stderr.clone()))),
        );

        let mut state = FsState {
            platform: Arc::clone(&platform),
            table: Mutex::new(table),
            resolver: config.resolver,
            current_working_directory: None,
        };

        let mut pending = opened.preopens.into_iter();
        while let Some((directory, handle)) = pending.next() {
            let resource = Arc::new(DirectoryFdResource::preopened(
                Arc::clone(&platform),
                handle,
                DIRECTORY_BASE_RIGHTS_BLOCK,
                config.resolver,
                directory.virtual_path.clone(),
            ));
            if let Err(err) = state.install(FdEntry::Directory(resource)) {
                for (directory, handle) in pending {
                    if let Err(error) = platform.close_dir(handle) {
                        tracing::warn!(
                            real_path = %directory.real_path.display(),
                            %error,
                            "fs.preopen_close_failed"
                        );
                    }
                }
                if let Some(cwd) = opened.current_working_directory {
                    if let Err(error) = platform.close_dir(cwd) {
                        tracing::warn!(%error, "fs.cwd_close_failed");
                    }
                }
                return Err(BuildError::Config(err));
            }
        }

        if let Some(handle) = opened.current_working_directory {
            let resource = Arc::new(DirectoryFdResource::new(
                Arc::clone(&platform),
                handle,
                DIRECTORY_BASE_RIGHTS_BLOCK,
                config.resolver,
            )
            .sandbox_root());
            state
                .install(FdEntry::Directory(Arc::clone(&resource)))
                .map_err(BuildError::Config)?;
            state.current_working_directory = Some(resource);
        }

        Ok(Self {
            state,
            interceptors: config.interceptors,
        })
    }

    /// Run `operation` through the interceptors and dispatch it.
    pub fn execute(&self, operation: Operation) -> FsResult<FsOutput> {
        Chain::new(&self.interceptors, &self.state).proceed(operation)
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.state.platform
    }

    /// Preopened fds and the virtual paths they are reported under.
    pub fn preopens(&self) -> Vec<(Fd, VirtualPath)> {
        self.state
            .table
            .lock()
            .iter()
            .filter_map(|(fd, entry)| match entry {
                FdEntry::Directory(dir) => dir.preopen_path().map(|path| (fd, path.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn open_fd_count(&self) -> usize {
        self.state.table.lock().len()
    }

    /// Close every fd. Errors are logged and otherwise ignored.
    pub fn close(&self) {
        self.state.close_all();
    }
}

impl<P: HostPlatform> Drop for FsState<P> {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl<P: HostPlatform> FsState<P> {
    fn close_all(&self) {
        let drained = self.table.lock().drain();
        for (fd, entry) in drained {
            if let Err(error) = entry.resource().close() {
                tracing::debug!(fd, %error, "fs.close_on_shutdown");
            }
        }
    }

    fn entry(&self, fd: Fd) -> FsResult<FdEntry<P>> {
        self.table
            .lock()
            .get(fd)
            .cloned()
            .ok_or_else(|| FsError::new(FsErrorKind::BadFileDescriptor, "fs.lookup"))
    }

    fn base_directory(
        &self,
        base: BaseDirectory,
        context: &'static str,
    ) -> FsResult<Arc<DirectoryFdResource<P>>> {
        match base {
            BaseDirectory::CurrentWorkingDirectory => self
                .current_working_directory
                .clone()
                .ok_or_else(|| FsError::new(FsErrorKind::BadFileDescriptor, context)),
            BaseDirectory::DirectoryFd(fd) => Ok(Arc::clone(self.entry(fd)?.directory(context)?)),
        }
    }

    /// Register `entry` at the lowest free fd, closing it if the table is
    /// full.
    fn install(&self, entry: FdEntry<P>) -> FsResult<Fd> {
        let allocated = self.table.lock().allocate(|_| Ok(entry.clone()));
        match allocated {
            Ok(fd) => {
                tracing::debug!(fd, "fs.fd_allocated");
                Ok(fd)
            }
            Err(err) => {
                if let Err(error) = entry.resource().close() {
                    tracing::warn!(%error, "fs.close_unregistered");
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn open(
        &self,
        base: BaseDirectory,
        path: &VirtualPath,
        flags: OpenFlags,
        fdflags: Fdflags,
        mode: u32,
        rights: Option<FdRightsBlock>,
        follow_symlinks: bool,
    ) -> FsResult<Fd> {
        let dir = self.base_directory(base, "fs.open")?;
        let mut needed = Rights::PATH_OPEN;
        if flags.contains(OpenFlags::CREATE) {
            needed |= Rights::PATH_CREATE_FILE;
        }
        if flags.contains(OpenFlags::TRUNC) {
            needed |= Rights::PATH_FILESTAT_SET_SIZE;
        }
        dir.require(needed, "fs.open")?;

        let opened = dir.run_at(path, follow_symlinks, |platform, handle, name| {
            platform.open_at(handle, name, flags, fdflags, mode)
        })?;
        let entry = match opened {
            Opened::Directory(handle) => FdEntry::Directory(Arc::new(DirectoryFdResource::new(
                Arc::clone(&self.platform),
                handle,
                dir.rights().child_directory_rights(rights),
                self.resolver,
            ))),
            Opened::File(file) if flags.contains(OpenFlags::DIRECTORY) => {
                if let Err(error) = file.close() {
                    tracing::warn!(%error, "fs.open_close_failed");
                }
                return Err(FsError::new(FsErrorKind::NotDirectory, "fs.open"));
            }
            Opened::File(file) => FdEntry::File(Arc::new(FileFdResource::new(
                file,
                dir.rights().child_file_rights(rights, flags.is_writable()),
                fdflags,
            ))),
        };
        self.install(entry)
    }

    fn close(&self, fd: Fd) -> FsResult<()> {
        let entry = self.table.lock().release(fd)?;
        tracing::debug!(fd, "fs.fd_released");
        entry.resource().close()
    }

    fn renumber(&self, from: Fd, to: Fd) -> FsResult<()> {
        let displaced = {
            let mut table = self.table.lock();
            if !table.contains(from) || !table.contains(to) {
                return Err(FsError::new(FsErrorKind::BadFileDescriptor, "fs.renumber"));
            }
            if from == to {
                return Ok(());
            }
            let moved = table.release(from)?;
            table.insert_at(to, moved)
        };
        tracing::debug!(from, to, "fs.fd_renumbered");
        if let Some(entry) = displaced {
            if let Err(error) = entry.resource().close() {
                tracing::warn!(fd = to, %error, "fs.renumber_close_failed");
            }
        }
        Ok(())
    }

    fn prestat(&self, fd: Fd) -> FsResult<VirtualPath> {
        let entry = self.entry(fd)?;
        entry
            .directory("fs.prestat")
            .ok()
            .and_then(|dir| dir.preopen_path().cloned())
            .ok_or_else(|| FsError::new(FsErrorKind::BadFileDescriptor, "fs.prestat"))
    }
}

/// Rename with the POSIX replacement rules checked up front, so every
/// backend reports the same error for the same situation.
fn rename_checked<P: HostPlatform>(
    platform: &P,
    (old_dir, old_name): (&P::Handle, &str),
    (new_dir, new_name): (&P::Handle, &str),
) -> FsResult<()> {
    let source = platform.stat_at(old_dir, old_name)?;
    match platform.stat_at(new_dir, new_name) {
        Ok(target) => {
            if source.is_same_file(&target) {
                return Ok(());
            }
            let source_is_dir = source.filetype == Filetype::Directory;
            let target_is_dir = target.filetype == Filetype::Directory;
            if source_is_dir && !target_is_dir {
                return Err(FsError::new(FsErrorKind::NotDirectory, "fs.rename"));
            }
            if target_is_dir {
                if !platform.directory_is_empty_at(new_dir, new_name)? {
                    return Err(FsError::new(FsErrorKind::NotEmpty, "fs.rename"));
                }
                if !source_is_dir {
                    return Err(FsError::new(FsErrorKind::IsDirectory, "fs.rename"));
                }
            }
        }
        Err(err) if err.kind() == FsErrorKind::NoEntry => {}
        Err(err) => return Err(err),
    }
    platform.rename_at(old_dir, old_name, new_dir, new_name)
}

impl<P: HostPlatform> OperationDispatcher for FsState<P> {
    fn dispatch(&self, operation: Operation) -> FsResult<FsOutput> {
        match operation {
            Operation::Open {
                base,
                path,
                flags,
                fdflags,
                mode,
                rights,
                follow_symlinks,
            } => self
                .open(base, &path, flags, fdflags, mode, rights, follow_symlinks)
                .map(FsOutput::Fd),
            Operation::Close { fd } => self.close(fd).map(|()| FsOutput::Unit),
            Operation::Read {
                fd,
                mut buffers,
                strategy,
            } => {
                let entry = self.entry(fd)?;
                let count = {
                    let mut slices: Vec<&mut [u8]> =
                        buffers.0.iter_mut().map(Vec::as_mut_slice).collect();
                    entry.resource().read(&mut slices, strategy)?
                };
                Ok(FsOutput::Read { count, buffers })
            }
            Operation::Write {
                fd,
                buffers,
                strategy,
            } => {
                let entry = self.entry(fd)?;
                let slices: Vec<&[u8]> = buffers.0.iter().map(Vec::as_slice).collect();
                entry.resource().write(&slices, strategy).map(FsOutput::Count)
            }
            Operation::Seek { fd, offset, whence } => self
                .entry(fd)?
                .resource()
                .seek(offset, whence)
                .map(FsOutput::Offset),
            Operation::Sync { fd, metadata } => {
                self.entry(fd)?.resource().sync(metadata)?;
                Ok(FsOutput::Unit)
            }
            Operation::Truncate { fd, length } => {
                self.entry(fd)?.resource().truncate(length)?;
                Ok(FsOutput::Unit)
            }
            Operation::Allocate { fd, offset, length } => {
                self.entry(fd)?.resource().allocate(offset, length)?;
                Ok(FsOutput::Unit)
            }
            Operation::Stat {
                base,
                path,
                follow_symlinks,
            } => {
                let dir = self.base_directory(base, "fs.stat")?;
                dir.require(Rights::PATH_FILESTAT_GET, "fs.stat")?;
                dir.run_at(&path, follow_symlinks, |platform, handle, name| {
                    platform.stat_at(handle, name)
                })
                .map(FsOutput::Stat)
            }
            Operation::StatFd { fd } => self.entry(fd)?.resource().stat().map(FsOutput::Stat),
            Operation::Chmod {
                base,
                path,
                mode,
                follow_symlinks,
            } => {
                let dir = self.base_directory(base, "fs.chmod")?;
                dir.require(Rights::PATH_FILESTAT_SET_TIMES, "fs.chmod")?;
                dir.run_at(&path, follow_symlinks, |platform, handle, name| {
                    platform.chmod_at(handle, name, mode)
                })?;
                Ok(FsOutput::Unit)
            }
            Operation::ChmodFd { fd, mode } => {
                self.entry(fd)?.resource().chmod(mode)?;
                Ok(FsOutput::Unit)
            }
            Operation::Chown {
                base,
                path,
                owner,
                group,
                follow_symlinks,
            } => {
                let dir = self.base_directory(base, "fs.chown")?;
                dir.require(Rights::PATH_FILESTAT_SET_TIMES, "fs.chown")?;
                dir.run_at(&path, follow_symlinks, |platform, handle, name| {
                    platform.chown_at(handle, name, owner, group)
                })?;
                Ok(FsOutput::Unit)
            }
            Operation::ChownFd { fd, owner, group } => {
                self.entry(fd)?.resource().chown(owner, group)?;
                Ok(FsOutput::Unit)
            }
            Operation::SetTimestamp {
                base,
                path,
                atime,
                mtime,
                follow_symlinks,
            } => {
                let dir = self.base_directory(base, "fs.set_times")?;
                dir.require(Rights::PATH_FILESTAT_SET_TIMES, "fs.set_times")?;
                dir.run_at(&path, follow_symlinks, |platform, handle, name| {
                    platform.set_times_at(handle, name, atime, mtime)
                })?;
                Ok(FsOutput::Unit)
            }
            Operation::SetTimestampFd { fd, atime, mtime } => {
                self.entry(fd)?.resource().set_timestamp(atime, mtime)?;
                Ok(FsOutput::Unit)
            }
            Operation::Mkdir { base, path, mode } => {
                let dir = self.base_directory(base, "fs.mkdir")?;
                dir.require(Rights::PATH_CREATE_DIRECTORY, "fs.mkdir")?;
                dir.run_at(&path, false, |platform, handle, name| {
                    platform.mkdir_at(handle, name, mode)
                })?;
                Ok(FsOutput::Unit)
            }
            Operation::UnlinkFile { base, path } => {
                let dir = self.base_directory(base, "fs.unlink")?;
                dir.require(Rights::PATH_UNLINK_FILE, "fs.unlink")?;
                dir.run_at(&path, false, |platform, handle, name| {
                    platform.unlink_file_at(handle, name)
                })?;
                Ok(FsOutput::Unit)
            }
            Operation::UnlinkDirectory { base, path } => {
                let dir = self.base_directory(base, "fs.rmdir")?;
                dir.require(Rights::PATH_REMOVE_DIRECTORY, "fs.rmdir")?;
                dir.run_at(&path, false, |platform, handle, name| {
                    platform.remove_directory_at(handle, name)
                })?;
                Ok(FsOutput::Unit)
            }
            Operation::Rename {
                old_base,
                old_path,
                new_base,
                new_path,
            } => {
                let old = self.base_directory(old_base, "fs.rename")?;
                let new = self.base_directory(new_base, "fs.rename")?;
                old.require(Rights::PATH_RENAME_SOURCE, "fs.rename")?;
                new.require(Rights::PATH_RENAME_TARGET, "fs.rename")?;
                DirectoryFdResource::run_at_pair(
                    &*old,
                    &old_path,
                    false,
                    &*new,
                    &new_path,
                    rename_checked::<P>,
                )?;
                Ok(FsOutput::Unit)
            }
            Operation::Hardlink {
                old_base,
                old_path,
                new_base,
                new_path,
                follow_symlinks,
            } => {
                let old = self.base_directory(old_base, "fs.link")?;
                let new = self.base_directory(new_base, "fs.link")?;
                old.require(Rights::PATH_LINK_SOURCE, "fs.link")?;
                new.require(Rights::PATH_LINK_TARGET, "fs.link")?;
                DirectoryFdResource::run_at_pair(
                    &*old,
                    &old_path,
                    follow_symlinks,
                    &*new,
                    &new_path,
                    |platform, (old_dir, old_name), (new_dir, new_name)| {
                        platform.hardlink_at(old_dir, old_name, new_dir, new_name)
                    },
                )?;
                Ok(FsOutput::Unit)
            }
            Operation::Symlink { target, base, path } => {
                let dir = self.base_directory(base, "fs.symlink")?;
                dir.require(Rights::PATH_SYMLINK, "fs.symlink")?;
                dir.run_at(&path, false, |platform, handle, name| {
                    platform.symlink_at(handle, name, &target)
                })?;
                Ok(FsOutput::Unit)
            }
            Operation::ReadLink { base, path } => {
                let dir = self.base_directory(base, "fs.readlink")?;
                dir.require(Rights::PATH_READLINK, "fs.readlink")?;
                dir.run_at(&path, false, |platform, handle, name| {
                    platform.read_link_at(handle, name)
                })
                .map(FsOutput::Path)
            }
            Operation::ReadDir { fd } => {
                self.entry(fd)?.resource().read_dir().map(FsOutput::Entries)
            }
            Operation::CheckAccess {
                base,
                path,
                mode,
                follow_symlinks,
            } => {
                let dir = self.base_directory(base, "fs.access")?;
                dir.require(Rights::PATH_FILESTAT_GET, "fs.access")?;
                dir.run_at(&path, follow_symlinks, |platform, handle, name| {
                    platform.check_access_at(handle, name, mode)
                })?;
                Ok(FsOutput::Unit)
            }
            Operation::FdAttributes { fd } => self
                .entry(fd)?
                .resource()
                .fd_attributes()
                .map(FsOutput::Attributes),
            Operation::SetFdFlags { fd, flags } => {
                self.entry(fd)?.resource().set_fd_flags(flags)?;
                Ok(FsOutput::Unit)
            }
            Operation::AddAdvisoryLock { fd, lock } => {
                self.entry(fd)?.resource().add_advisory_lock(&lock)?;
                Ok(FsOutput::Unit)
            }
            Operation::RemoveAdvisoryLock { fd, lock } => {
                self.entry(fd)?.resource().remove_advisory_lock(&lock)?;
                Ok(FsOutput::Unit)
            }
            Operation::Renumber { from, to } => self.renumber(from, to).map(|()| FsOutput::Unit),
            Operation::PrestatGet { fd } => self.prestat(fd).map(FsOutput::Path),
        }
    }
}
