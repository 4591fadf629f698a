use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sandboxfs_core::{
    AccessMode, AdvisoryLockKind, BaseDirectory, BuildError, Chain, Component, ComponentOpener,
    DirEntry, Fd, FdRightsBlock, Fdflags, FileHandle, FileSystem, FileSystemConfig,
    FileSystemInterceptor, Filetype, FsError, FsErrorKind, FsOutput, FsResult, HostPlatform,
    IoBuffers, OpenFlags, Opened, Operation, ReadWriteStrategy, Rights, StandardInputOutput,
    StructStat, Subcomponent, Timespec, VirtualPath,
};
use tracing_test::traced_test;

enum Node {
    Dir(BTreeMap<String, usize>),
    File(Vec<u8>),
    Symlink(String),
}

#[derive(Default)]
struct State {
    nodes: Vec<Node>,
    roots: BTreeMap<PathBuf, usize>,
    open_dirs: usize,
    open_files: usize,
    /// Closes still release the handle but report an error.
    failing_closes: bool,
}

impl State {
    fn child(&self, dir: usize, name: &str) -> Option<usize> {
        let name = name.trim_end_matches('/');
        if name == "." {
            return Some(dir);
        }
        match &self.nodes[dir] {
            Node::Dir(children) => children.get(name).copied(),
            _ => None,
        }
    }

    fn insert(&mut self, dir: usize, name: &str, node: Node) -> FsResult<usize> {
        let id = self.nodes.len();
        let Node::Dir(children) = &mut self.nodes[dir] else {
            return Err(FsError::new(FsErrorKind::NotDirectory, "mock.insert"));
        };
        if children.contains_key(name) {
            return Err(FsError::new(FsErrorKind::Exists, "mock.insert"));
        }
        children.insert(name.to_owned(), id);
        self.nodes.push(node);
        Ok(id)
    }

    fn detach(&mut self, dir: usize, name: &str) -> FsResult<usize> {
        match &mut self.nodes[dir] {
            Node::Dir(children) => children
                .remove(name)
                .ok_or_else(|| FsError::new(FsErrorKind::NoEntry, "mock.detach")),
            _ => Err(FsError::new(FsErrorKind::NotDirectory, "mock.detach")),
        }
    }

    fn stat(&self, id: usize) -> StructStat {
        let (filetype, size) = match &self.nodes[id] {
            Node::Dir(children) => (Filetype::Directory, children.len() as u64),
            Node::File(data) => (Filetype::RegularFile, data.len() as u64),
            Node::Symlink(target) => (Filetype::SymbolicLink, target.len() as u64),
        };
        StructStat {
            dev: 1,
            ino: id as u64 + 1,
            filetype,
            size,
            nlink: 1,
            ..StructStat::default()
        }
    }
}

/// Directory handle; not `Clone`, so every open is counted.
#[derive(Debug)]
struct MockDir(usize);

#[derive(Clone, Default)]
struct MockPlatform {
    state: Arc<Mutex<State>>,
}

impl MockPlatform {
    /// A platform with one tree mounted at host path `/host`.
    fn new() -> Self {
        let platform = Self::default();
        {
            let mut state = platform.state.lock();
            state.nodes.push(Node::Dir(BTreeMap::new()));
            state.roots.insert(PathBuf::from("/host"), 0);
        }
        platform
    }

    fn add_root(&self, host_path: &str) {
        let mut state = self.state.lock();
        let id = state.nodes.len();
        state.nodes.push(Node::Dir(BTreeMap::new()));
        state.roots.insert(PathBuf::from(host_path), id);
    }

    fn add(&self, path: &str, node: Node) {
        let mut state = self.state.lock();
        let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
        let parent = parent
            .split('/')
            .filter(|c| !c.is_empty())
            .fold(0, |dir, c| state.child(dir, c).unwrap());
        state.insert(parent, name, node).unwrap();
    }

    fn contents(&self, path: &str) -> Vec<u8> {
        let state = self.state.lock();
        let id = path
            .split('/')
            .fold(0, |dir, c| state.child(dir, c).unwrap());
        match &state.nodes[id] {
            Node::File(data) => data.clone(),
            _ => panic!("{path} is not a file"),
        }
    }

    fn open_dirs(&self) -> usize {
        self.state.lock().open_dirs
    }

    fn open_files(&self) -> usize {
        self.state.lock().open_files
    }

    fn unsupported<T>() -> FsResult<T> {
        Err(FsError::new(FsErrorKind::NotSupported, "mock"))
    }
}

impl ComponentOpener for MockPlatform {
    type Handle = MockDir;

    fn open_component(
        &self,
        parent: &MockDir,
        component: Component<'_>,
    ) -> FsResult<Subcomponent<MockDir>> {
        let mut state = self.state.lock();
        let Some(id) = state.child(parent.0, component.name) else {
            return if component.is_basename {
                Ok(Subcomponent::Other)
            } else {
                Err(FsError::new(FsErrorKind::NoEntry, "mock.open_component"))
            };
        };
        match &state.nodes[id] {
            Node::Symlink(target) => VirtualPath::new(target.as_str()).map(Subcomponent::Symlink),
            Node::Dir(_) if !component.is_basename => {
                state.open_dirs += 1;
                Ok(Subcomponent::Directory(MockDir(id)))
            }
            _ => Ok(Subcomponent::Other),
        }
    }

    fn close_handle(&self, handle: MockDir) {
        let _ = self.close_dir(handle);
    }
}

struct MockFile {
    id: usize,
    state: Arc<Mutex<State>>,
}

impl MockFile {
    fn with_data<T>(&self, f: impl FnOnce(&mut Vec<u8>) -> T) -> FsResult<T> {
        match &mut self.state.lock().nodes[self.id] {
            Node::File(data) => Ok(f(data)),
            _ => Err(FsError::new(FsErrorKind::BadFileDescriptor, "mock.file")),
        }
    }
}

impl FileHandle for MockFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        self.with_data(|data| {
            let start = (offset as usize).min(data.len());
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
            n
        })
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> FsResult<usize> {
        self.with_data(|data| {
            let end = offset as usize + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[offset as usize..end].copy_from_slice(buf);
            buf.len()
        })
    }

    fn stat(&self) -> FsResult<StructStat> {
        Ok(self.state.lock().stat(self.id))
    }

    fn sync(&self, _data_only: bool) -> FsResult<()> {
        Ok(())
    }

    fn set_len(&self, len: u64) -> FsResult<()> {
        self.with_data(|data| data.resize(len as usize, 0))
    }

    fn allocate(&self, offset: u64, len: u64) -> FsResult<()> {
        self.with_data(|data| {
            let end = (offset + len) as usize;
            if data.len() < end {
                data.resize(end, 0);
            }
        })
    }

    fn chmod(&self, _mode: u32) -> FsResult<()> {
        MockPlatform::unsupported()
    }

    fn chown(&self, _owner: Option<u32>, _group: Option<u32>) -> FsResult<()> {
        MockPlatform::unsupported()
    }

    fn set_times(&self, _atime: Option<Timespec>, _mtime: Option<Timespec>) -> FsResult<()> {
        MockPlatform::unsupported()
    }

    fn set_nonblocking(&self, _nonblocking: bool) -> FsResult<()> {
        Ok(())
    }

    fn lock(&self, _kind: AdvisoryLockKind, _start: u64, _len: u64) -> FsResult<()> {
        Ok(())
    }

    fn unlock(&self, _start: u64, _len: u64) -> FsResult<()> {
        Ok(())
    }

    fn close(self) -> FsResult<()> {
        let mut state = self.state.lock();
        state.open_files -= 1;
        if state.failing_closes {
            return Err(FsError::new(FsErrorKind::IoError, "mock.close"));
        }
        Ok(())
    }
}

impl HostPlatform for MockPlatform {
    type File = MockFile;

    fn open_root(&self, _relative_to: Option<&MockDir>, path: &Path) -> FsResult<MockDir> {
        let mut state = self.state.lock();
        let id = *state
            .roots
            .get(path)
            .ok_or_else(|| FsError::new(FsErrorKind::NoEntry, "mock.open_root"))?;
        state.open_dirs += 1;
        Ok(MockDir(id))
    }

    fn close_dir(&self, _dir: MockDir) -> FsResult<()> {
        let mut state = self.state.lock();
        state.open_dirs -= 1;
        if state.failing_closes {
            return Err(FsError::new(FsErrorKind::IoError, "mock.close_dir"));
        }
        Ok(())
    }

    fn dir_stat(&self, dir: &MockDir) -> FsResult<StructStat> {
        Ok(self.state.lock().stat(dir.0))
    }

    fn dir_chmod(&self, _dir: &MockDir, _mode: u32) -> FsResult<()> {
        Self::unsupported()
    }

    fn dir_chown(&self, _dir: &MockDir, _owner: Option<u32>, _group: Option<u32>) -> FsResult<()> {
        Self::unsupported()
    }

    fn dir_set_times(
        &self,
        _dir: &MockDir,
        _atime: Option<Timespec>,
        _mtime: Option<Timespec>,
    ) -> FsResult<()> {
        Self::unsupported()
    }

    fn read_dir(&self, dir: &MockDir) -> FsResult<Vec<DirEntry>> {
        let state = self.state.lock();
        let Node::Dir(children) = &state.nodes[dir.0] else {
            return Err(FsError::new(FsErrorKind::NotDirectory, "mock.read_dir"));
        };
        Ok(children
            .iter()
            .map(|(name, &id)| {
                let stat = state.stat(id);
                DirEntry {
                    name: name.clone(),
                    filetype: stat.filetype,
                    inode: stat.ino,
                    cookie: 0,
                }
            })
            .collect())
    }

    fn open_at(
        &self,
        dir: &MockDir,
        name: &str,
        flags: OpenFlags,
        _fdflags: Fdflags,
        _mode: u32,
    ) -> FsResult<Opened<MockDir, MockFile>> {
        let mut state = self.state.lock();
        let id = match state.child(dir.0, name) {
            Some(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) => {
                return Err(FsError::new(FsErrorKind::Exists, "mock.open_at"));
            }
            Some(id) => id,
            None if flags.contains(OpenFlags::CREATE) => {
                state.insert(dir.0, name, Node::File(Vec::new()))?
            }
            None => return Err(FsError::new(FsErrorKind::NoEntry, "mock.open_at")),
        };
        match &mut state.nodes[id] {
            Node::Symlink(_) => Err(FsError::new(
                FsErrorKind::TooManySymbolicLinks,
                "mock.open_at",
            )),
            Node::Dir(_) => {
                state.open_dirs += 1;
                Ok(Opened::Directory(MockDir(id)))
            }
            Node::File(data) => {
                if flags.contains(OpenFlags::TRUNC) {
                    data.clear();
                }
                state.open_files += 1;
                Ok(Opened::File(MockFile {
                    id,
                    state: Arc::clone(&self.state),
                }))
            }
        }
    }

    fn stat_at(&self, dir: &MockDir, name: &str) -> FsResult<StructStat> {
        let state = self.state.lock();
        let id = state
            .child(dir.0, name)
            .ok_or_else(|| FsError::new(FsErrorKind::NoEntry, "mock.stat_at"))?;
        Ok(state.stat(id))
    }

    fn mkdir_at(&self, dir: &MockDir, name: &str, _mode: u32) -> FsResult<()> {
        let name = name.trim_end_matches('/');
        self.state
            .lock()
            .insert(dir.0, name, Node::Dir(BTreeMap::new()))
            .map(drop)
    }

    fn unlink_file_at(&self, dir: &MockDir, name: &str) -> FsResult<()> {
        let mut state = self.state.lock();
        if let Some(id) = state.child(dir.0, name) {
            if matches!(state.nodes[id], Node::Dir(_)) {
                return Err(FsError::new(FsErrorKind::IsDirectory, "mock.unlink"));
            }
        }
        state.detach(dir.0, name).map(drop)
    }

    fn remove_directory_at(&self, dir: &MockDir, name: &str) -> FsResult<()> {
        let mut state = self.state.lock();
        let name = name.trim_end_matches('/');
        match state.child(dir.0, name).map(|id| &state.nodes[id]) {
            Some(Node::Dir(children)) if !children.is_empty() => {
                Err(FsError::new(FsErrorKind::NotEmpty, "mock.rmdir"))
            }
            Some(Node::Dir(_)) => state.detach(dir.0, name).map(drop),
            Some(_) => Err(FsError::new(FsErrorKind::NotDirectory, "mock.rmdir")),
            None => Err(FsError::new(FsErrorKind::NoEntry, "mock.rmdir")),
        }
    }

    fn rename_at(
        &self,
        old_dir: &MockDir,
        old_name: &str,
        new_dir: &MockDir,
        new_name: &str,
    ) -> FsResult<()> {
        let mut state = self.state.lock();
        let id = state.detach(old_dir.0, old_name)?;
        let _ = state.detach(new_dir.0, new_name);
        match &mut state.nodes[new_dir.0] {
            Node::Dir(children) => {
                children.insert(new_name.to_owned(), id);
                Ok(())
            }
            _ => Err(FsError::new(FsErrorKind::NotDirectory, "mock.rename")),
        }
    }

    fn hardlink_at(
        &self,
        _old_dir: &MockDir,
        _old_name: &str,
        _new_dir: &MockDir,
        _new_name: &str,
    ) -> FsResult<()> {
        Self::unsupported()
    }

    fn symlink_at(&self, dir: &MockDir, name: &str, target: &VirtualPath) -> FsResult<()> {
        self.state
            .lock()
            .insert(dir.0, name, Node::Symlink(target.as_str().to_owned()))
            .map(drop)
    }

    fn read_link_at(&self, dir: &MockDir, name: &str) -> FsResult<VirtualPath> {
        let state = self.state.lock();
        match state.child(dir.0, name).map(|id| &state.nodes[id]) {
            Some(Node::Symlink(target)) => VirtualPath::new(target.as_str()),
            Some(_) => Err(FsError::new(FsErrorKind::InvalidArgument, "mock.readlink")),
            None => Err(FsError::new(FsErrorKind::NoEntry, "mock.readlink")),
        }
    }

    fn chmod_at(&self, _dir: &MockDir, _name: &str, _mode: u32) -> FsResult<()> {
        Self::unsupported()
    }

    fn chown_at(
        &self,
        _dir: &MockDir,
        _name: &str,
        _owner: Option<u32>,
        _group: Option<u32>,
    ) -> FsResult<()> {
        Self::unsupported()
    }

    fn set_times_at(
        &self,
        _dir: &MockDir,
        _name: &str,
        _atime: Option<Timespec>,
        _mtime: Option<Timespec>,
    ) -> FsResult<()> {
        Self::unsupported()
    }

    fn check_access_at(&self, dir: &MockDir, name: &str, _mode: AccessMode) -> FsResult<()> {
        self.stat_at(dir, name).map(drop)
    }

    fn directory_is_empty_at(&self, dir: &MockDir, name: &str) -> FsResult<bool> {
        let state = self.state.lock();
        match state.child(dir.0, name).map(|id| &state.nodes[id]) {
            Some(Node::Dir(children)) => Ok(children.is_empty()),
            Some(_) => Err(FsError::new(FsErrorKind::NotDirectory, "mock.is_empty")),
            None => Err(FsError::new(FsErrorKind::NoEntry, "mock.is_empty")),
        }
    }
}

const ROOT: BaseDirectory = BaseDirectory::DirectoryFd(3);

fn path(p: &str) -> VirtualPath {
    VirtualPath::new(p).unwrap()
}

fn config() -> sandboxfs_core::FileSystemBuilder {
    FileSystemConfig::builder()
        .preopen_dir("/host", "/")
        .stdio(StandardInputOutput::null())
}

fn filesystem(platform: &MockPlatform) -> FileSystem<MockPlatform> {
    FileSystem::new(platform.clone(), config().build().unwrap()).unwrap()
}

fn open_op(p: &str, flags: OpenFlags, rights: Option<FdRightsBlock>) -> Operation {
    Operation::Open {
        base: ROOT,
        path: path(p),
        flags,
        fdflags: Fdflags::empty(),
        mode: 0o644,
        rights,
        follow_symlinks: true,
    }
}

fn open(fs: &FileSystem<MockPlatform>, p: &str, flags: OpenFlags) -> FsResult<Fd> {
    fs.execute(open_op(p, flags, None))
        .map(|out| out.fd().unwrap())
}

fn write(fs: &FileSystem<MockPlatform>, fd: Fd, data: &[u8]) -> FsResult<usize> {
    fs.execute(Operation::Write {
        fd,
        buffers: IoBuffers::from(data.to_vec()),
        strategy: ReadWriteStrategy::CurrentPosition,
    })
    .map(|out| out.count().unwrap())
}

#[test]
fn fds_are_numbered_stdio_then_preopens_then_cwd() {
    let platform = MockPlatform::new();
    platform.add_root("/data");
    platform.add_root("/work");
    let config = config()
        .preopen_dir("/data", "/data")
        .current_working_directory("/work")
        .build()
        .unwrap();
    let fs = FileSystem::new(platform.clone(), config).unwrap();

    assert_eq!(fs.preopens(), vec![(3, path("/")), (4, path("/data"))]);
    assert_eq!(fs.open_fd_count(), 6);
    assert_eq!(platform.open_dirs(), 3);
    let err = fs.execute(Operation::PrestatGet { fd: 5 }).unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::BadFileDescriptor);
}

#[test]
fn failed_preopen_closes_everything_opened() {
    let platform = MockPlatform::new();
    platform.add_root("/work");
    let config = config()
        .preopen_dir("/missing", "/missing")
        .current_working_directory("/work")
        .build()
        .unwrap();

    let Err(BuildError::Preopen(err)) = FileSystem::new(platform.clone(), config) else {
        panic!("expected a preopen error");
    };
    assert_eq!(err.directory.real_path, PathBuf::from("/missing"));
    assert_eq!(platform.open_dirs(), 0);
}

#[test]
fn missing_working_directory_is_not_fatal() {
    let platform = MockPlatform::new();
    let config = config().current_working_directory("/nowhere").build().unwrap();
    let fs = FileSystem::new(platform.clone(), config).unwrap();

    assert_eq!(fs.open_fd_count(), 4);
    let err = fs
        .execute(Operation::Stat {
            base: BaseDirectory::CurrentWorkingDirectory,
            path: path("."),
            follow_symlinks: true,
        })
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::BadFileDescriptor);
}

#[test]
fn resolution_leaves_no_intermediate_handles_open() {
    let platform = MockPlatform::new();
    platform.add("a", Node::Dir(BTreeMap::new()));
    platform.add("a/b", Node::Dir(BTreeMap::new()));
    platform.add("a/b/f", Node::File(b"deep".to_vec()));
    platform.add("l", Node::Symlink("a/b".into()));
    let fs = filesystem(&platform);

    let fd = open(&fs, "l/f", OpenFlags::READ).unwrap();
    assert_eq!(platform.open_dirs(), 1);
    assert_eq!(platform.open_files(), 1);
    for (p, kind) in [
        ("a/b/f/x", FsErrorKind::NotDirectory),
        ("a/../../x", FsErrorKind::NotCapable),
        ("a/missing/x", FsErrorKind::NoEntry),
    ] {
        assert_eq!(open(&fs, p, OpenFlags::READ).unwrap_err().kind(), kind, "{p}");
    }
    assert_eq!(platform.open_dirs(), 1);

    fs.execute(Operation::Close { fd }).unwrap();
    assert_eq!(platform.open_files(), 0);
    let err = fs.execute(Operation::Close { fd }).unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::BadFileDescriptor);
}

#[test]
fn dropping_the_filesystem_closes_every_handle() {
    let platform = MockPlatform::new();
    platform.add("d", Node::Dir(BTreeMap::new()));
    platform.add("f", Node::File(Vec::new()));
    {
        let fs = filesystem(&platform);
        open(&fs, "d", OpenFlags::READ | OpenFlags::DIRECTORY).unwrap();
        open(&fs, "f", OpenFlags::READ).unwrap();
        assert_eq!((platform.open_dirs(), platform.open_files()), (2, 1));
    }
    assert_eq!((platform.open_dirs(), platform.open_files()), (0, 0));
}

#[test]
fn full_table_closes_the_native_handle() {
    let platform = MockPlatform::new();
    platform.add("f", Node::File(Vec::new()));
    let config = config().max_open_fds(4).build().unwrap();
    let fs = FileSystem::new(platform.clone(), config).unwrap();

    let err = open(&fs, "f", OpenFlags::READ).unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::Nfile);
    assert_eq!(platform.open_files(), 0);
}

#[test]
fn directory_flag_on_a_file_is_rejected() {
    let platform = MockPlatform::new();
    platform.add("f", Node::File(Vec::new()));
    let fs = filesystem(&platform);

    let err = open(&fs, "f", OpenFlags::READ | OpenFlags::DIRECTORY).unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::NotDirectory);
    assert_eq!(platform.open_files(), 0);
}

#[test]
#[traced_test]
fn failed_close_of_a_rejected_file_is_logged() {
    let platform = MockPlatform::new();
    platform.add("f", Node::File(Vec::new()));
    let fs = filesystem(&platform);
    platform.state.lock().failing_closes = true;

    let err = open(&fs, "f", OpenFlags::READ | OpenFlags::DIRECTORY).unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::NotDirectory);
    assert_eq!(platform.open_files(), 0);
    assert!(logs_contain("fs.open_close_failed"));
}

#[test]
fn root_directory_is_its_own_parent() {
    let platform = MockPlatform::new();
    platform.add("d", Node::Dir(BTreeMap::new()));
    let fs = filesystem(&platform);
    let dots = |fd: Fd| match fs.execute(Operation::ReadDir { fd }).unwrap() {
        FsOutput::Entries(entries) => (entries[0].inode, entries[1].inode),
        other => panic!("unexpected output {other:?}"),
    };

    let root = dots(3);
    assert_eq!(root.0, root.1);
    // The mock cannot stat `..`, so the parent is unknown.
    let dir = open(&fs, "d", OpenFlags::READ | OpenFlags::DIRECTORY).unwrap();
    assert_eq!(dots(dir).1, 0);
}

#[test]
fn opposite_renames_racing_closes_do_not_deadlock() {
    let platform = MockPlatform::new();
    let fs = Arc::new(filesystem(&platform));
    let (done, finished) = mpsc::channel();

    for round in 0..100 {
        let (a, b) = (format!("a{round}"), format!("b{round}"));
        platform.add(&a, Node::Dir(BTreeMap::new()));
        platform.add(&b, Node::Dir(BTreeMap::new()));
        platform.add(&format!("{a}/x"), Node::File(Vec::new()));
        platform.add(&format!("{b}/x"), Node::File(Vec::new()));
        let a = open(&fs, &a, OpenFlags::READ | OpenFlags::DIRECTORY).unwrap();
        let b = open(&fs, &b, OpenFlags::READ | OpenFlags::DIRECTORY).unwrap();
        let rename = |from: Fd, to: Fd| Operation::Rename {
            old_base: BaseDirectory::DirectoryFd(from),
            old_path: path("x"),
            new_base: BaseDirectory::DirectoryFd(to),
            new_path: path("x"),
        };

        let operations = [
            rename(a, b),
            rename(b, a),
            Operation::Close { fd: a },
            Operation::Close { fd: b },
        ];
        for operation in operations {
            let fs = Arc::clone(&fs);
            let done = done.clone();
            thread::spawn(move || {
                let _ = fs.execute(operation);
                let _ = done.send(());
            });
        }
        for _ in 0..4 {
            finished
                .recv_timeout(Duration::from_secs(10))
                .expect("directory operations stopped making progress");
        }
    }
    assert_eq!(platform.open_dirs(), 1);
}

#[test]
fn requested_rights_are_narrowed_by_the_parent() {
    let platform = MockPlatform::new();
    platform.add("d", Node::Dir(BTreeMap::new()));
    platform.add("d/f", Node::File(b"x".to_vec()));
    let fs = filesystem(&platform);

    // A directory without PATH_OPEN cannot open anything beneath it.
    let listing_only = FdRightsBlock::new(Rights::FD_READDIR, Rights::all());
    let dir = fs
        .execute(open_op("d", OpenFlags::READ | OpenFlags::DIRECTORY, Some(listing_only)))
        .unwrap()
        .fd()
        .unwrap();
    let err = fs
        .execute(Operation::Open {
            base: BaseDirectory::DirectoryFd(dir),
            path: path("f"),
            flags: OpenFlags::READ,
            fdflags: Fdflags::empty(),
            mode: 0,
            rights: None,
            follow_symlinks: true,
        })
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::NotCapable);

    // Write access asked for on a read-only open is not granted.
    let fd = open(&fs, "d/f", OpenFlags::READ).unwrap();
    assert_eq!(write(&fs, fd, b"y").unwrap_err().kind(), FsErrorKind::NotCapable);
    let FsOutput::Attributes(attributes) = fs.execute(Operation::FdAttributes { fd }).unwrap()
    else {
        panic!("expected attributes");
    };
    assert_eq!(attributes.filetype, Filetype::RegularFile);
    assert!(attributes.rights.base.contains(Rights::FD_READ));
    assert!(!attributes.rights.base.contains(Rights::FD_WRITE));
}

#[test]
fn set_fd_flags_switches_on_append() {
    let platform = MockPlatform::new();
    platform.add("log", Node::File(b"abc".to_vec()));
    let fs = filesystem(&platform);
    let fd = open(&fs, "log", OpenFlags::READ | OpenFlags::WRITE).unwrap();

    write(&fs, fd, b"X").unwrap();
    fs.execute(Operation::SetFdFlags {
        fd,
        flags: Fdflags::APPEND,
    })
    .unwrap();
    write(&fs, fd, b"Z").unwrap();
    assert_eq!(platform.contents("log"), b"XbcZ");
}

#[test]
fn renumber_closes_the_displaced_resource() {
    let platform = MockPlatform::new();
    platform.add("d", Node::Dir(BTreeMap::new()));
    platform.add("f", Node::File(Vec::new()));
    let fs = filesystem(&platform);
    let dir = open(&fs, "d", OpenFlags::READ | OpenFlags::DIRECTORY).unwrap();
    let file = open(&fs, "f", OpenFlags::READ).unwrap();
    assert_eq!(platform.open_dirs(), 2);

    fs.execute(Operation::Renumber { from: file, to: dir }).unwrap();
    assert_eq!(platform.open_dirs(), 1);
    assert_eq!(fs.open_fd_count(), 5);
    let stat = fs.execute(Operation::StatFd { fd: dir }).unwrap();
    assert_eq!(stat.stat().unwrap().filetype, Filetype::RegularFile);

    fs.execute(Operation::Renumber { from: dir, to: dir }).unwrap();
    assert_eq!(fs.open_fd_count(), 5);
}

#[test]
fn rename_over_a_non_empty_directory_fails_before_the_platform() {
    let platform = MockPlatform::new();
    platform.add("src", Node::Dir(BTreeMap::new()));
    platform.add("dst", Node::Dir(BTreeMap::new()));
    platform.add("dst/keep", Node::File(Vec::new()));
    platform.add("f", Node::File(Vec::new()));
    let fs = filesystem(&platform);
    let rename = |from: &str, to: &str| {
        fs.execute(Operation::Rename {
            old_base: ROOT,
            old_path: path(from),
            new_base: ROOT,
            new_path: path(to),
        })
    };

    assert_eq!(rename("src", "dst").unwrap_err().kind(), FsErrorKind::NotEmpty);
    assert_eq!(rename("src", "f").unwrap_err().kind(), FsErrorKind::NotDirectory);
    assert_eq!(rename("f", "f").unwrap(), FsOutput::Unit);
    rename("f", "dst/keep").unwrap();
    assert_eq!(platform.contents("dst/keep"), b"");
}

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl FileSystemInterceptor for Recorder {
    fn intercept(&self, operation: Operation, chain: Chain<'_>) -> FsResult<FsOutput> {
        self.log.lock().push(format!("{}:{}", self.name, operation.tag()));
        chain.proceed(operation)
    }
}

/// Refuses every unlink.
struct ReadOnlyGuard;

impl FileSystemInterceptor for ReadOnlyGuard {
    fn intercept(&self, operation: Operation, chain: Chain<'_>) -> FsResult<FsOutput> {
        match operation {
            Operation::UnlinkFile { .. } | Operation::UnlinkDirectory { .. } => Err(FsError::new(
                FsErrorKind::ReadOnlyFileSystem,
                "guard.unlink",
            )),
            other => chain.proceed(other),
        }
    }
}

#[test]
fn interceptors_wrap_dispatch_in_order() {
    let platform = MockPlatform::new();
    platform.add("f", Node::File(Vec::new()));
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = config()
        .interceptor(Arc::new(Recorder {
            name: "outer",
            log: Arc::clone(&log),
        }))
        .interceptor(Arc::new(ReadOnlyGuard))
        .interceptor(Arc::new(Recorder {
            name: "inner",
            log: Arc::clone(&log),
        }))
        .build()
        .unwrap();
    let fs = FileSystem::new(platform.clone(), config).unwrap();

    let err = fs
        .execute(Operation::UnlinkFile {
            base: ROOT,
            path: path("f"),
        })
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::ReadOnlyFileSystem);
    fs.execute(Operation::Stat {
        base: ROOT,
        path: path("f"),
        follow_symlinks: true,
    })
    .unwrap();

    assert_eq!(
        *log.lock(),
        ["outer:unlink_file", "outer:stat", "inner:stat"]
    );
    assert_eq!(platform.contents("f"), b"");
}
