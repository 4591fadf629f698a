use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use sandboxfs_core::{
    Component, ComponentOpener, FsError, FsErrorKind, FsResult, Subcomponent, SymlinkResolver,
    VirtualPath,
};

enum Node {
    Dir(BTreeMap<String, usize>),
    File,
    Symlink(String),
}

/// Directory handle; deliberately not `Clone` so leaks show up in the
/// open-handle count.
#[derive(Debug)]
struct TestHandle(usize);

struct TestFs {
    nodes: RefCell<Vec<Node>>,
    open: Cell<usize>,
    opened_total: Cell<usize>,
}

impl TestFs {
    fn new() -> Self {
        Self {
            nodes: RefCell::new(vec![Node::Dir(BTreeMap::new())]),
            open: Cell::new(0),
            opened_total: Cell::new(0),
        }
    }

    fn root(&self) -> TestHandle {
        TestHandle(0)
    }

    fn lookup(&self, path: &str) -> usize {
        let nodes = self.nodes.borrow();
        path.split('/')
            .filter(|c| !c.is_empty())
            .fold(0, |id, name| match &nodes[id] {
                Node::Dir(children) => children[name],
                _ => panic!("{path}: not a directory"),
            })
    }

    fn add(&self, path: &str, node: Node) {
        let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
        let parent = self.lookup(parent);
        let mut nodes = self.nodes.borrow_mut();
        let id = nodes.len();
        nodes.push(node);
        match &mut nodes[parent] {
            Node::Dir(children) => children.insert(name.to_owned(), id),
            _ => panic!("{path}: parent is not a directory"),
        };
    }

    fn dir(&self, path: &str) -> &Self {
        self.add(path, Node::Dir(BTreeMap::new()));
        self
    }

    fn file(&self, path: &str) -> &Self {
        self.add(path, Node::File);
        self
    }

    fn symlink(&self, path: &str, target: &str) -> &Self {
        self.add(path, Node::Symlink(target.to_owned()));
        self
    }
}

impl ComponentOpener for TestFs {
    type Handle = TestHandle;

    fn open_component(
        &self,
        parent: &TestHandle,
        component: Component<'_>,
    ) -> FsResult<Subcomponent<TestHandle>> {
        let nodes = self.nodes.borrow();
        let Node::Dir(children) = &nodes[parent.0] else {
            return Err(FsError::new(FsErrorKind::NotDirectory, "test"));
        };
        let Some(&id) = children.get(component.name) else {
            return if component.is_basename {
                Ok(Subcomponent::Other)
            } else {
                Err(FsError::new(FsErrorKind::NoEntry, "test"))
            };
        };
        Ok(match &nodes[id] {
            Node::Dir(_) if !component.is_basename => {
                self.open.set(self.open.get() + 1);
                self.opened_total.set(self.opened_total.get() + 1);
                Subcomponent::Directory(TestHandle(id))
            }
            Node::Symlink(target) => Subcomponent::Symlink(VirtualPath::new(target.as_str())?),
            Node::Dir(_) | Node::File => Subcomponent::Other,
        })
    }

    fn close_handle(&self, _handle: TestHandle) {
        self.open.set(self.open.get() - 1);
    }
}

fn path(p: &str) -> VirtualPath {
    VirtualPath::new(p).unwrap()
}

fn tree() -> TestFs {
    let fs = TestFs::new();
    fs.dir("a")
        .dir("a/b")
        .dir("a/b/c")
        .file("a/b/file.txt")
        .symlink("link", "a/b")
        .symlink("a/rel", "b/file.txt")
        .symlink("abs", "/a/b")
        .symlink("loop1", "loop2")
        .symlink("loop2", "loop1")
        .symlink("escape", "../outside")
        .symlink("a/up", "../../secret");
    fs
}

fn resolve_kind(fs: &TestFs, p: &str, follow: bool) -> FsErrorKind {
    let root = fs.root();
    SymlinkResolver::default()
        .resolve(fs, &root, &path(p), follow)
        .unwrap_err()
        .kind()
}

#[test]
fn nested_path_keeps_only_the_parent_open() {
    let fs = tree();
    let root = fs.root();
    {
        let resolved = SymlinkResolver::default()
            .resolve(&fs, &root, &path("a/b/file.txt"), true)
            .unwrap();
        assert_eq!(resolved.directory().0, fs.lookup("a/b"));
        assert_eq!(resolved.name(), "file.txt");
        assert!(resolved.owns_directory());
        assert_eq!(fs.open.get(), 1);
    }
    assert_eq!(fs.open.get(), 0);
}

#[test]
fn symlinked_directory_is_traversed() {
    let fs = tree();
    let root = fs.root();
    let resolved = SymlinkResolver::default()
        .resolve(&fs, &root, &path("link/file.txt"), false)
        .unwrap();
    assert_eq!(resolved.directory().0, fs.lookup("a/b"));
    assert_eq!(resolved.name(), "file.txt");
}

#[test]
fn relative_basename_symlink_is_followed_on_request() {
    let fs = tree();
    let root = fs.root();
    let resolved = SymlinkResolver::default()
        .resolve(&fs, &root, &path("a/rel"), true)
        .unwrap();
    assert_eq!(resolved.directory().0, fs.lookup("a/b"));
    assert_eq!(resolved.name(), "file.txt");
}

#[test]
fn unfollowed_basename_symlink_is_returned_as_is() {
    let fs = tree();
    let root = fs.root();
    let resolved = SymlinkResolver::default()
        .resolve(&fs, &root, &path("a/rel"), false)
        .unwrap();
    assert_eq!(resolved.directory().0, fs.lookup("a"));
    assert_eq!(resolved.name(), "rel");
}

#[test]
fn trailing_slash_forces_following() {
    let fs = tree();
    let root = fs.root();
    let resolved = SymlinkResolver::default()
        .resolve(&fs, &root, &path("link/"), false)
        .unwrap();
    assert_eq!(resolved.directory().0, fs.lookup("a"));
    assert_eq!(resolved.name(), "b/");
}

#[test]
fn absolute_symlink_target_is_rooted_at_the_base() {
    let fs = tree();
    let root = fs.root();
    {
        let resolved = SymlinkResolver::default()
            .resolve(&fs, &root, &path("a/b/c/../../../abs/file.txt"), true)
            .unwrap();
        assert_eq!(resolved.directory().0, fs.lookup("a/b"));
        assert_eq!(resolved.name(), "file.txt");
    }
    assert_eq!(fs.open.get(), 0);
}

#[test]
fn dot_resolves_to_the_base_without_opening() {
    let fs = tree();
    let root = fs.root();
    for p in [".", "./.", "a/.."] {
        let resolved = SymlinkResolver::default()
            .resolve(&fs, &root, &path(p), true)
            .unwrap();
        assert!(resolved.is_base(), "{p}");
        assert_eq!(resolved.directory().0, 0);
        assert_eq!(resolved.name(), ".");
    }
    assert_eq!(fs.open.get(), 0);
}

#[test]
fn symlink_loops_are_bounded() {
    let fs = tree();
    assert_eq!(
        resolve_kind(&fs, "loop1", true),
        FsErrorKind::TooManySymbolicLinks
    );
    assert_eq!(
        resolve_kind(&fs, "loop1/x", false),
        FsErrorKind::TooManySymbolicLinks
    );
    assert_eq!(fs.open.get(), 0);
}

#[test]
fn custom_expansion_limit() {
    let fs = tree();
    fs.symlink("hop", "link");
    let root = fs.root();
    let resolver = SymlinkResolver {
        max_expansions: 1,
        ..SymlinkResolver::default()
    };
    let err = resolver
        .resolve(&fs, &root, &path("hop/file.txt"), true)
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::TooManySymbolicLinks);
    assert!(resolver.resolve(&fs, &root, &path("link/file.txt"), true).is_ok());
}

#[test]
fn escapes_are_not_capable() {
    let fs = tree();
    for p in ["..", "../outside", "a/../../etc/passwd", "escape", "a/up", "/a/b"] {
        assert_eq!(resolve_kind(&fs, p, true), FsErrorKind::NotCapable, "{p}");
    }
    assert_eq!(fs.open.get(), 0);
}

#[test]
fn file_in_the_middle_is_not_a_directory() {
    let fs = tree();
    assert_eq!(
        resolve_kind(&fs, "a/b/file.txt/x", true),
        FsErrorKind::NotDirectory
    );
    assert_eq!(fs.open.get(), 0);
}

#[test]
fn missing_intermediate_is_no_entry() {
    let fs = tree();
    assert_eq!(resolve_kind(&fs, "a/nope/x", true), FsErrorKind::NoEntry);
    assert_eq!(fs.open.get(), 0);
}

#[test]
fn missing_basename_resolves_for_creation() {
    let fs = tree();
    let root = fs.root();
    let resolved = SymlinkResolver::default()
        .resolve(&fs, &root, &path("a/b/new.txt"), true)
        .unwrap();
    assert_eq!(resolved.directory().0, fs.lookup("a/b"));
    assert_eq!(resolved.name(), "new.txt");
}

#[test]
fn open_handle_limit_is_enforced() {
    let fs = tree();
    let root = fs.root();
    let resolver = SymlinkResolver {
        max_open_handles: 2,
        ..SymlinkResolver::default()
    };
    let err = resolver
        .resolve(&fs, &root, &path("a/b/c/x"), true)
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::NameTooLong);
    assert_eq!(fs.open.get(), 0);
    assert!(fs.opened_total.get() >= 2);
}

#[test]
fn self_referencing_symlink_is_a_loop() {
    let fs = tree();
    fs.symlink("self", "self");
    assert_eq!(
        resolve_kind(&fs, "self", true),
        FsErrorKind::TooManySymbolicLinks
    );
    assert_eq!(
        resolve_kind(&fs, "self/x", false),
        FsErrorKind::TooManySymbolicLinks
    );
    assert_eq!(fs.open.get(), 0);
}

#[test]
fn symlink_chain_resolves_to_the_final_target() {
    let fs = tree();
    fs.symlink("c1", "c2")
        .symlink("c2", "a/c3")
        .symlink("a/c3", "../c4")
        .symlink("c4", "link/file.txt");
    let root = fs.root();
    {
        let resolved = SymlinkResolver::default()
            .resolve(&fs, &root, &path("c1"), true)
            .unwrap();
        assert_eq!(resolved.directory().0, fs.lookup("a/b"));
        assert_eq!(resolved.name(), "file.txt");
        assert_eq!(fs.open.get(), 1);
    }
    assert_eq!(fs.open.get(), 0);
}

#[test]
fn nested_symlink_cannot_climb_above_the_base() {
    let fs = tree();
    fs.symlink("a/b/top", "../../..")
        .symlink("a/b/home", "../../a/b/file.txt");
    assert_eq!(resolve_kind(&fs, "a/b/top", true), FsErrorKind::NotCapable);
    assert_eq!(resolve_kind(&fs, "a/b/top/x", false), FsErrorKind::NotCapable);
    assert_eq!(fs.open.get(), 0);

    let root = fs.root();
    {
        let resolved = SymlinkResolver::default()
            .resolve(&fs, &root, &path("a/b/home"), true)
            .unwrap();
        assert_eq!(resolved.directory().0, fs.lookup("a/b"));
        assert_eq!(resolved.name(), "file.txt");
    }
    assert_eq!(fs.open.get(), 0);
}
