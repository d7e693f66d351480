//! In-memory native source for tests.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::error::{Result, WatchError};
use crate::native::{NativeWatcher, RawEventCallback};
use crate::resolve::is_within;

#[derive(Debug)]
pub struct RecordingHandle {
    id: u64,
    path: String,
}

impl RecordingHandle {
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Default)]
struct RecordingState {
    next_id: u64,
    active: Vec<(u64, String, RawEventCallback)>,
    started: Vec<String>,
    stopped: Vec<String>,
    refused: HashSet<String>,
    failing_releases: HashSet<String>,
}

/// A [`NativeWatcher`] that records every call and delivers events on
/// demand through [`RecordingSource::emit`].
#[derive(Default)]
pub struct RecordingSource {
    state: Mutex<RecordingState>,
}

impl RecordingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `start` return `None` for `path`.
    pub fn refuse(&self, path: impl Into<String>) {
        self.state.lock().refused.insert(path.into());
    }

    /// Makes `stop` fail for handles on `path`. The handle is still removed.
    pub fn fail_release(&self, path: impl Into<String>) {
        self.state.lock().failing_releases.insert(path.into());
    }

    /// Paths passed to a successful `start`, in call order.
    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }

    /// Paths whose handles were passed to `stop`, in call order.
    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().stopped.clone()
    }

    /// Paths currently being watched.
    pub fn active(&self) -> Vec<String> {
        self.state
            .lock()
            .active
            .iter()
            .map(|(_, path, _)| path.clone())
            .collect()
    }

    /// Delivers `(raw_path, flags)` to every active watch covering
    /// `raw_path`. Returns how many callbacks ran.
    pub fn emit(&self, raw_path: &str, flags: u32) -> usize {
        let callbacks: Vec<RawEventCallback> = self
            .state
            .lock()
            .active
            .iter()
            .filter(|(_, path, _)| is_within(raw_path, path))
            .map(|(_, _, callback)| callback.clone())
            .collect();
        for callback in &callbacks {
            callback(raw_path, flags);
        }
        callbacks.len()
    }
}

impl NativeWatcher for RecordingSource {
    type Handle = RecordingHandle;

    fn start(&self, path: &str, callback: RawEventCallback) -> Option<RecordingHandle> {
        let mut state = self.state.lock();
        if state.refused.contains(path) {
            return None;
        }
        state.next_id += 1;
        let id = state.next_id;
        state.active.push((id, path.to_string(), callback));
        state.started.push(path.to_string());
        Some(RecordingHandle {
            id,
            path: path.to_string(),
        })
    }

    fn stop(&self, handle: RecordingHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.active.retain(|(id, _, _)| *id != handle.id);
        state.stopped.push(handle.path.clone());
        if state.failing_releases.contains(&handle.path) {
            return Err(WatchError::Internal(format!(
                "release refused for {}",
                handle.path
            )));
        }
        Ok(())
    }
}
