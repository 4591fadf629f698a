//! Sandbox-safe, symlink-aware path resolution.
//!
//! The resolver walks a [`VirtualPath`] one component at a time beneath a
//! borrowed base directory handle. Intermediate directories are opened
//! through a [`ComponentOpener`], symlinks are expanded in place, and `..`
//! pops the most recently opened directory. Popping past the base is a
//! sandbox escape and fails with `NotCapable`.
//!
//! Every handle opened during a walk is owned by an [`OpenStack`] guard, so
//! error returns unwind and close in reverse order. On success at most one
//! handle survives, owned by the returned [`Resolved`].

use std::collections::VecDeque;

use smallvec::{SmallVec, smallvec};

use crate::error::{FsError, FsErrorKind, FsResult};
use crate::path::VirtualPath;

pub const MAX_SYMLINK_EXPANSIONS: usize = 128;
pub const MAX_OPEN_DIRECTORY_HANDLES: usize = 128;

/// A single path component handed to [`ComponentOpener::open_component`].
#[derive(Clone, Copy, Debug)]
pub struct Component<'a> {
    pub name: &'a str,
    /// Last component of the fully expanded path. A basename is probed for
    /// being a symlink but never opened as a directory.
    pub is_basename: bool,
}

/// What a component turned out to be.
#[derive(Debug)]
pub enum Subcomponent<H> {
    /// An opened directory. Only returned for non-basename components.
    Directory(H),
    /// A symbolic link and its target.
    Symlink(VirtualPath),
    /// Anything else, including a missing basename.
    Other,
}

/// Host primitives the resolver is generic over.
///
/// For a non-basename component implementations open it as a directory
/// without following symlinks; if that fails because it is not a
/// directory, they report `Symlink` or `Other`. For a basename they only
/// report whether it is a symlink; a missing basename is `Other`.
pub trait ComponentOpener {
    type Handle;

    fn open_component(
        &self,
        parent: &Self::Handle,
        component: Component<'_>,
    ) -> FsResult<Subcomponent<Self::Handle>>;

    /// Close a handle produced by `open_component`. Errors are logged, not
    /// reported.
    fn close_handle(&self, handle: Self::Handle);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymlinkResolver {
    pub max_expansions: usize,
    pub max_open_handles: usize,
}

impl Default for SymlinkResolver {
    fn default() -> Self {
        Self {
            max_expansions: MAX_SYMLINK_EXPANSIONS,
            max_open_handles: MAX_OPEN_DIRECTORY_HANDLES,
        }
    }
}

#[derive(Debug)]
struct PathComponent {
    name: String,
    must_be_directory: bool,
}

impl PathComponent {
    fn terminal_name(&self) -> String {
        if self.must_be_directory {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }
}

fn split(path: &VirtualPath, must_be_directory: bool) -> VecDeque<PathComponent> {
    let mut queue: VecDeque<PathComponent> = path
        .components()
        .map(|name| PathComponent {
            name: name.to_owned(),
            must_be_directory: false,
        })
        .collect();
    if let Some(last) = queue.back_mut() {
        last.must_be_directory = must_be_directory;
    }
    queue
}

impl SymlinkResolver {
    /// Resolve `path` beneath `base`.
    ///
    /// With `follow_basename_symlink` unset a final symlink is returned as
    /// is. A trailing slash always forces the basename to be followed.
    pub fn resolve<'a, O: ComponentOpener>(
        &self,
        opener: &'a O,
        base: &'a O::Handle,
        path: &VirtualPath,
        follow_basename_symlink: bool,
    ) -> FsResult<Resolved<'a, O>> {
        if path.is_absolute() {
            return Err(FsError::new(FsErrorKind::NotCapable, "resolver.absolute"));
        }

        let mut stack = OpenStack::new(opener);
        let mut queues: SmallVec<[VecDeque<PathComponent>; 4]> =
            smallvec![split(path, path.must_be_directory())];
        let mut expansions = 0usize;

        loop {
            while queues.last().is_some_and(VecDeque::is_empty) {
                queues.pop();
            }
            let Some(component) = queues.last_mut().and_then(VecDeque::pop_front) else {
                break;
            };
            let is_basename = queues.iter().all(VecDeque::is_empty);

            if component.name == ".." {
                match stack.handles.pop() {
                    Some(handle) => opener.close_handle(handle),
                    None => {
                        return Err(FsError::new(FsErrorKind::NotCapable, "resolver.dotdot"));
                    }
                }
                continue;
            }

            if is_basename && !follow_basename_symlink && !component.must_be_directory {
                return Ok(stack.finish(base, component.terminal_name()));
            }

            let parent = stack.top().unwrap_or(base);
            let opened = opener.open_component(
                parent,
                Component {
                    name: &component.name,
                    is_basename,
                },
            )?;
            match opened {
                Subcomponent::Directory(handle) if !is_basename => {
                    tracing::trace!(component = %component.name, "resolver.enter");
                    stack.push(handle, self.max_open_handles)?;
                }
                Subcomponent::Directory(handle) => {
                    opener.close_handle(handle);
                    return Ok(stack.finish(base, component.terminal_name()));
                }
                Subcomponent::Other if is_basename => {
                    return Ok(stack.finish(base, component.terminal_name()));
                }
                Subcomponent::Other => {
                    return Err(FsError::new(
                        FsErrorKind::NotDirectory,
                        "resolver.not_directory",
                    ));
                }
                Subcomponent::Symlink(target) => {
                    expansions += 1;
                    if expansions > self.max_expansions {
                        return Err(FsError::new(
                            FsErrorKind::TooManySymbolicLinks,
                            "resolver.symlink_loop",
                        ));
                    }
                    tracing::trace!(
                        component = %component.name,
                        target = %target,
                        expansions,
                        "resolver.expand"
                    );
                    // Absolute targets are rooted at the resolution base.
                    if target.is_absolute() {
                        stack.close_all();
                    }
                    let must_be_directory =
                        component.must_be_directory || target.must_be_directory();
                    queues.push(split(&target, must_be_directory));
                }
            }
        }

        Ok(stack.finish(base, ".".to_owned()))
    }
}

/// Directories opened so far, bottom to top. Dropping closes them in
/// reverse order.
struct OpenStack<'a, O: ComponentOpener> {
    opener: &'a O,
    handles: SmallVec<[O::Handle; 8]>,
}

impl<'a, O: ComponentOpener> OpenStack<'a, O> {
    fn new(opener: &'a O) -> Self {
        Self {
            opener,
            handles: SmallVec::new(),
        }
    }

    fn top(&self) -> Option<&O::Handle> {
        self.handles.last()
    }

    fn push(&mut self, handle: O::Handle, limit: usize) -> FsResult<()> {
        if self.handles.len() >= limit {
            self.opener.close_handle(handle);
            return Err(FsError::new(FsErrorKind::NameTooLong, "resolver.depth"));
        }
        self.handles.push(handle);
        Ok(())
    }

    fn close_all(&mut self) {
        while let Some(handle) = self.handles.pop() {
            self.opener.close_handle(handle);
        }
    }

    fn finish(mut self, base: &'a O::Handle, name: String) -> Resolved<'a, O> {
        let dir = self.handles.pop();
        Resolved {
            opener: self.opener,
            base,
            dir,
            name,
        }
    }
}

impl<O: ComponentOpener> Drop for OpenStack<'_, O> {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Terminal of a resolution: a directory plus a name inside it.
///
/// The name is `"."` when the path names the directory itself, and keeps a
/// trailing `/` when the guest required a directory.
pub struct Resolved<'a, O: ComponentOpener> {
    opener: &'a O,
    base: &'a O::Handle,
    dir: Option<O::Handle>,
    name: String,
}

impl<O: ComponentOpener> Resolved<'_, O> {
    pub fn directory(&self) -> &O::Handle {
        self.dir.as_ref().unwrap_or(self.base)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The path reduced to the base directory itself.
    pub fn is_base(&self) -> bool {
        self.dir.is_none() && self.name == "."
    }

    /// Whether this resolution holds an intermediate handle of its own.
    pub fn owns_directory(&self) -> bool {
        self.dir.is_some()
    }
}

impl<O: ComponentOpener> Drop for Resolved<'_, O> {
    fn drop(&mut self) {
        if let Some(handle) = self.dir.take() {
            self.opener.close_handle(handle);
        }
    }
}

impl<O: ComponentOpener> std::fmt::Debug for Resolved<'_, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("owns_directory", &self.dir.is_some())
            .field("name", &self.name)
            .finish()
    }
}
