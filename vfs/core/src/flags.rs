use bitflags::bitflags;

bitflags! {
    /// Flags for opening a path beneath a directory fd.
    #[derive(Default)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const EXCL = 1 << 3;
        const TRUNC = 1 << 4;
        /// Fail with `NotDirectory` unless the path names a directory.
        const DIRECTORY = 1 << 5;
    }
}

impl OpenFlags {
    pub fn is_writable(self) -> bool {
        self.contains(OpenFlags::WRITE)
    }
}

bitflags! {
    /// WASI `fdflags`.
    #[derive(Default)]
    pub struct Fdflags: u16 {
        const APPEND = 1 << 0;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags! {
    /// Permission probe for `CheckAccess`. Empty means existence only.
    #[derive(Default)]
    pub struct AccessMode: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}
