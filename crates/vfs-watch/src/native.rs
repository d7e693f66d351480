//! Boundary to the OS event source.

use std::sync::Arc;

use crate::error::Result;

/// Callback invoked by a native source with the raw event path and its
/// flag bitmask. May run on any thread, concurrently with other callbacks.
pub type RawEventCallback = Arc<dyn Fn(&str, u32) + Send + Sync + 'static>;

/// An OS-level watch source.
///
/// One `start` call watches one physical path recursively. Event paths
/// handed to the callback must begin with the path passed to `start`.
pub trait NativeWatcher: Send + Sync + 'static {
    type Handle: Send + 'static;

    /// Starts watching `path`. Returns `None` when the path cannot be watched.
    fn start(&self, path: &str, callback: RawEventCallback) -> Option<Self::Handle>;

    /// Releases a handle returned by `start`. May block until the underlying
    /// stream is torn down.
    fn stop(&self, handle: Self::Handle) -> Result<()>;
}
