//! Filesystem watching across virtual package layouts.
//!
//! Package managers that install dependencies into virtual directories
//! (`.../$$virtual/<package>/<depth>/...`) make one logical tree span
//! several physical locations. This crate provides:
//! - Lexical resolution of virtual paths to physical ones
//! - Enumeration of virtual packages under a root from the dependency graph
//! - A multiplexer that watches every physical location and reports events
//!   under the path the caller asked for
//! - FSEvents (macOS) and `notify` (elsewhere) event sources
//! - FSEvents flag decoding

pub mod environment;
pub mod error;
pub mod flags;
pub mod multiplexer;
pub mod native;
pub mod options;
pub mod pnp;
pub mod resolve;

#[cfg(target_os = "macos")]
pub mod fsevent;

#[cfg(not(target_os = "macos"))]
pub mod notify_source;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use environment::{
    find_virtual_paths, DependencyGraph, Environment, HostEnvironment, PackageInformation,
    PackageLocator,
};
pub use error::{ReleaseFailure, Result, WatchError};
pub use flags::{event_info, EventFlags, EventInfo, EventKind, ItemChanges, ItemType};
pub use multiplexer::{
    transpose, watch, watch_with_options, ActiveWatch, PathMap, StopCompletion, VirtualWatcher,
    Watch, WatchSession,
};
pub use native::{NativeWatcher, RawEventCallback};
pub use options::{ResolverOptions, WatchOptions};
pub use pnp::PnpEnvironment;
pub use resolve::{resolve_virtual, VirtualResolver, VirtualSegmentMatch};

#[cfg(target_os = "macos")]
pub use fsevent::{FsEventStream, FsEventsSource};

#[cfg(not(target_os = "macos"))]
pub use notify_source::NotifySource;

/// The platform's default native event source.
#[cfg(target_os = "macos")]
pub type PlatformSource = FsEventsSource;

/// The platform's default native event source.
#[cfg(not(target_os = "macos"))]
pub type PlatformSource = NotifySource;

/// FSEvents flag constants, as carried in every raw event.
pub mod constants {
    pub use crate::flags::EventFlags;
}
