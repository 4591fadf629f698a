//! Native backends.
//!
//! [`NativePlatform`] is the descriptor-based backend where the host has
//! `openat`-style syscalls and the path-based [`portable`] backend elsewhere.

pub mod portable;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))] {
        mod unix;

        pub use unix::{DirHandle, UnixFile, UnixPlatform};
        pub type NativePlatform = UnixPlatform;
    } else {
        pub type NativePlatform = portable::PortablePlatform;
    }
}

pub use portable::{PortableDir, PortableFile, PortablePlatform};
