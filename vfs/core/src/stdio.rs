//! Standard input/output resources for fds 0, 1 and 2.
//!
//! Streams are produced by factories and opened on first use, so a guest
//! that never touches stdin never opens it.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{FsError, FsErrorKind, FsResult};
use crate::flags::Fdflags;
use crate::model::{
    Advisorylock, DirEntry, FdAttributes, Filetype, ReadWriteStrategy, StructStat, Timespec,
    Whence,
};
use crate::resource::{FdResource, read_in_order, write_in_order};
use crate::rights::{FdRightsBlock, Rights, STDIO_RIGHTS_BLOCK};

pub type SourceFactory = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;
pub type SinkFactory = Arc<dyn Fn() -> io::Result<Box<dyn Write + Send>> + Send + Sync>;

/// Where the guest's stdin, stdout and stderr go.
#[derive(Clone)]
pub struct StandardInputOutput {
    pub stdin: SourceFactory,
    pub stdout: SinkFactory,
    pub stderr: SinkFactory,
}

impl StandardInputOutput {
    /// Streams of the host process.
    pub fn inherit() -> Self {
        Self {
            stdin: Arc::new(|| Ok(Box::new(io::stdin()) as Box<dyn Read + Send>)),
            stdout: Arc::new(|| Ok(Box::new(io::stdout()) as Box<dyn Write + Send>)),
            stderr: Arc::new(|| Ok(Box::new(io::stderr()) as Box<dyn Write + Send>)),
        }
    }

    /// Empty input, discarded output.
    pub fn null() -> Self {
        Self {
            stdin: Arc::new(|| Ok(Box::new(io::empty()) as Box<dyn Read + Send>)),
            stdout: Arc::new(|| Ok(Box::new(io::sink()) as Box<dyn Write + Send>)),
            stderr: Arc::new(|| Ok(Box::new(io::sink()) as Box<dyn Write + Send>)),
        }
    }

    pub fn with_stdin(mut self, factory: SourceFactory) -> Self {
        self.stdin = factory;
        self
    }

    pub fn with_stdout(mut self, factory: SinkFactory) -> Self {
        self.stdout = factory;
        self
    }

    pub fn with_stderr(mut self, factory: SinkFactory) -> Self {
        self.stderr = factory;
        self
    }
}

impl Default for StandardInputOutput {
    fn default() -> Self {
        Self::inherit()
    }
}

impl fmt::Debug for StandardInputOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardInputOutput").finish_non_exhaustive()
    }
}

enum Endpoint {
    Source {
        factory: SourceFactory,
        opened: Option<Box<dyn Read + Send>>,
    },
    Sink {
        factory: SinkFactory,
        opened: Option<Box<dyn Write + Send>>,
    },
    Closed,
}

pub struct StdioFdResource {
    name: &'static str,
    endpoint: Mutex<Endpoint>,
    flags: Mutex<Fdflags>,
}

fn map_stream_error(context: &'static str, err: io::Error) -> FsError {
    let kind = match err.kind() {
        io::ErrorKind::BrokenPipe => FsErrorKind::Pipe,
        io::ErrorKind::Interrupted => FsErrorKind::Interrupted,
        io::ErrorKind::WouldBlock => FsErrorKind::Again,
        io::ErrorKind::PermissionDenied => FsErrorKind::AccessDenied,
        _ => FsErrorKind::IoError,
    };
    FsError::with_source(kind, context, err)
}

impl StdioFdResource {
    pub fn stdin(factory: SourceFactory) -> Self {
        Self::with_endpoint(
            "stdin",
            Endpoint::Source {
                factory,
                opened: None,
            },
        )
    }

    pub fn stdout(factory: SinkFactory) -> Self {
        Self::with_endpoint(
            "stdout",
            Endpoint::Sink {
                factory,
                opened: None,
            },
        )
    }

    pub fn stderr(factory: SinkFactory) -> Self {
        Self::with_endpoint(
            "stderr",
            Endpoint::Sink {
                factory,
                opened: None,
            },
        )
    }

    fn with_endpoint(name: &'static str, endpoint: Endpoint) -> Self {
        Self {
            name,
            endpoint: Mutex::new(endpoint),
            flags: Mutex::new(Fdflags::empty()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn unsupported<T>(context: &'static str) -> FsResult<T> {
        Err(FsError::new(FsErrorKind::NotSupported, context))
    }

    fn badf<T>(context: &'static str) -> FsResult<T> {
        Err(FsError::new(FsErrorKind::BadFileDescriptor, context))
    }
}

impl FdResource for StdioFdResource {
    fn fd_attributes(&self) -> FsResult<FdAttributes> {
        Ok(FdAttributes {
            filetype: Filetype::CharacterDevice,
            flags: *self.flags.lock(),
            rights: STDIO_RIGHTS_BLOCK,
        })
    }

    fn rights(&self) -> FdRightsBlock {
        STDIO_RIGHTS_BLOCK
    }

    fn stat(&self) -> FsResult<StructStat> {
        Err(FsError::new(FsErrorKind::InvalidArgument, "stdio.stat"))
    }

    fn seek(&self, _offset: i64, _whence: Whence) -> FsResult<u64> {
        Self::badf("stdio.seek")
    }

    fn read(&self, bufs: &mut [&mut [u8]], strategy: ReadWriteStrategy) -> FsResult<usize> {
        if strategy != ReadWriteStrategy::CurrentPosition {
            return Self::badf("stdio.pread");
        }
        let mut endpoint = self.endpoint.lock();
        let Endpoint::Source { factory, opened } = &mut *endpoint else {
            return Self::badf("stdio.read");
        };
        if opened.is_none() {
            *opened = Some(factory().map_err(|e| map_stream_error("stdio.open", e))?);
        }
        let Some(source) = opened.as_mut() else {
            return Self::badf("stdio.read");
        };
        read_in_order(bufs, |buf, _| {
            source
                .read(buf)
                .map_err(|e| map_stream_error("stdio.read", e))
        })
    }

    fn write(&self, bufs: &[&[u8]], strategy: ReadWriteStrategy) -> FsResult<usize> {
        if strategy != ReadWriteStrategy::CurrentPosition {
            return Self::badf("stdio.pwrite");
        }
        let mut endpoint = self.endpoint.lock();
        let Endpoint::Sink { factory, opened } = &mut *endpoint else {
            return Self::badf("stdio.write");
        };
        if opened.is_none() {
            *opened = Some(factory().map_err(|e| map_stream_error("stdio.open", e))?);
        }
        let Some(sink) = opened.as_mut() else {
            return Self::badf("stdio.write");
        };
        // Partial writes are reported to the guest as is.
        write_in_order(bufs, |buf, _| {
            sink.write(buf)
                .map_err(|e| map_stream_error("stdio.write", e))
        })
    }

    fn sync(&self, _metadata: bool) -> FsResult<()> {
        let mut endpoint = self.endpoint.lock();
        match &mut *endpoint {
            Endpoint::Sink {
                opened: Some(sink), ..
            } => sink.flush().map_err(|e| map_stream_error("stdio.sync", e)),
            Endpoint::Closed => Self::badf("stdio.sync"),
            _ => Ok(()),
        }
    }

    fn truncate(&self, _length: u64) -> FsResult<()> {
        Self::badf("stdio.truncate")
    }

    fn allocate(&self, _offset: u64, _length: u64) -> FsResult<()> {
        Self::badf("stdio.allocate")
    }

    fn chmod(&self, _mode: u32) -> FsResult<()> {
        Self::unsupported("stdio.chmod")
    }

    fn chown(&self, _owner: Option<u32>, _group: Option<u32>) -> FsResult<()> {
        Self::unsupported("stdio.chown")
    }

    fn set_timestamp(&self, _atime: Option<Timespec>, _mtime: Option<Timespec>) -> FsResult<()> {
        Self::badf("stdio.set_times")
    }

    fn set_fd_flags(&self, flags: Fdflags) -> FsResult<()> {
        STDIO_RIGHTS_BLOCK.require(Rights::FD_FDSTAT_SET_FLAGS, "stdio.set_flags")?;
        *self.flags.lock() = flags;
        Ok(())
    }

    fn add_advisory_lock(&self, _lock: &Advisorylock) -> FsResult<()> {
        Self::unsupported("stdio.lock")
    }

    fn remove_advisory_lock(&self, _lock: &Advisorylock) -> FsResult<()> {
        Self::unsupported("stdio.unlock")
    }

    fn read_dir(&self) -> FsResult<Vec<DirEntry>> {
        Err(FsError::new(FsErrorKind::NotDirectory, "stdio.read_dir"))
    }

    fn close(&self) -> FsResult<()> {
        let previous = std::mem::replace(&mut *self.endpoint.lock(), Endpoint::Closed);
        match previous {
            Endpoint::Sink {
                opened: Some(mut sink),
                ..
            } => sink.flush().map_err(|e| map_stream_error("stdio.close", e)),
            Endpoint::Closed => Self::badf("stdio.close"),
            _ => Ok(()),
        }
    }
}
