//! One logical watch over a virtualized root.
//!
//! A requested root may resolve to a physical location elsewhere, and
//! virtual packages nested under it may live outside that location too.
//! [`VirtualWatcher`] opens one native watch per distinct physical location
//! and rewrites every raw event path back into the requested path space
//! before the caller sees it.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use tokio::sync::oneshot;

use crate::environment::{find_virtual_paths, Environment};
use crate::error::{ReleaseFailure, Result, WatchError};
use crate::native::{NativeWatcher, RawEventCallback};
use crate::options::ResolverOptions;
use crate::resolve::{is_within, normalize_path, VirtualResolver};

/// Ordered mapping of physical path to the requested path it stands for.
///
/// Keys are unique and the first insertion wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMap {
    entries: Vec<(String, String)>,
}

impl PathMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `resolved -> requested` unless `resolved` is already mapped.
    /// Returns whether the entry was added.
    pub fn insert(&mut self, resolved: impl Into<String>, requested: impl Into<String>) -> bool {
        let resolved = resolved.into();
        if self.get(&resolved).is_some() {
            return false;
        }
        self.entries.push((resolved, requested.into()));
        true
    }

    pub fn get(&self, resolved: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == resolved)
            .map(|(_, requested)| requested.as_str())
    }

    /// Iterates `(resolved, requested)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(resolved, requested)| (resolved.as_str(), requested.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rewrites `raw` from the `resolved` path space into the `requested` one.
///
/// `raw` is expected to start with `resolved`; the suffix past
/// `resolved.len()` bytes is appended to `requested` verbatim. When that
/// expectation does not hold the result is meaningless but never panics.
pub fn transpose(requested: &str, resolved: &str, raw: &str) -> String {
    let suffix = raw.get(resolved.len()..).unwrap_or_default();
    let mut transposed = String::with_capacity(requested.len() + suffix.len());
    transposed.push_str(requested);
    transposed.push_str(suffix);
    transposed
}

/// A native watch opened for one [`PathMap`] entry.
#[derive(Debug)]
pub struct ActiveWatch<H> {
    resolved_path: String,
    requested_path: String,
    handle: H,
}

impl<H> ActiveWatch<H> {
    /// Physical path the native watch is on.
    pub fn resolved_path(&self) -> &str {
        &self.resolved_path
    }

    /// Path events from this watch are reported under.
    pub fn requested_path(&self) -> &str {
        &self.requested_path
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}

/// State of a running watch. Exists only while every entry is being watched.
#[derive(Debug)]
pub struct WatchSession<H> {
    root: String,
    resolved_root: String,
    path_map: PathMap,
    watches: Vec<ActiveWatch<H>>,
}

impl<H> WatchSession<H> {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn resolved_root(&self) -> &str {
        &self.resolved_root
    }

    pub fn path_map(&self) -> &PathMap {
        &self.path_map
    }

    pub fn watches(&self) -> &[ActiveWatch<H>] {
        &self.watches
    }
}

/// Completion signal for [`VirtualWatcher::stop`].
///
/// Resolves once every native release has finished, successfully or not.
#[must_use = "dropping the completion does not cancel the release"]
#[derive(Debug, Default)]
pub struct StopCompletion {
    pending: Vec<(String, oneshot::Receiver<Result<()>>)>,
}

impl StopCompletion {
    fn done() -> Self {
        Self::default()
    }

    /// Number of releases this completion tracks.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Blocks until every release has finished.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async runtime; use
    /// [`StopCompletion::finished`] there.
    pub fn wait(self) -> Result<()> {
        let mut failures = Vec::new();
        for (path, receiver) in self.pending {
            record_release(path, receiver.blocking_recv(), &mut failures);
        }
        into_result(failures)
    }

    /// Waits asynchronously until every release has finished.
    pub async fn finished(self) -> Result<()> {
        let mut failures = Vec::new();
        for (path, receiver) in self.pending {
            record_release(path, receiver.await, &mut failures);
        }
        into_result(failures)
    }
}

fn record_release(
    path: String,
    outcome: std::result::Result<Result<()>, oneshot::error::RecvError>,
    failures: &mut Vec<ReleaseFailure>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(error)) => failures.push(ReleaseFailure {
            path,
            reason: error.to_string(),
        }),
        Err(_) => failures.push(ReleaseFailure {
            path,
            reason: "release did not report back".to_string(),
        }),
    }
}

fn into_result(failures: Vec<ReleaseFailure>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(WatchError::Release(failures))
    }
}

/// Watches a root across its virtual package indirections.
pub struct VirtualWatcher<N: NativeWatcher> {
    root: String,
    native: Arc<N>,
    env: Arc<dyn Environment>,
    resolver: VirtualResolver,
    session: Option<WatchSession<N::Handle>>,
}

impl<N: NativeWatcher> VirtualWatcher<N> {
    pub fn new(root: impl Into<String>, native: Arc<N>, env: Arc<dyn Environment>) -> Self {
        Self {
            root: root.into(),
            native,
            env,
            resolver: VirtualResolver::default(),
            session: None,
        }
    }

    pub fn with_resolver(mut self, resolver: VirtualResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_watching(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&WatchSession<N::Handle>> {
        self.session.as_ref()
    }

    /// Maps every physical location that belongs to the root back to the
    /// path it was requested under.
    ///
    /// The root's own entry always comes first. Virtual packages are only
    /// looked up for extension-less roots, and only kept when they resolve
    /// outside the resolved root.
    pub fn build_path_map(&self) -> PathMap {
        let mut path_map = PathMap::new();
        let resolved_root = self.resolver.resolve(&self.root);
        path_map.insert(resolved_root.clone(), self.root.clone());

        if Path::new(&self.root).extension().is_none() {
            for virtual_path in find_virtual_paths(self.env.as_ref(), &self.root) {
                let resolved_virtual = self.resolver.resolve(&virtual_path);
                if !is_within(&resolved_virtual, &resolved_root) {
                    path_map.insert(resolved_virtual, virtual_path);
                }
            }
        }
        path_map
    }

    /// Starts one native watch per [`PathMap`] entry.
    ///
    /// `handler` receives every event with its path rewritten into the
    /// requested path space. If any entry cannot be watched, the watches
    /// already opened by this call are released and the failing physical
    /// path is reported.
    pub fn watch<F>(&mut self, handler: F) -> Result<&[ActiveWatch<N::Handle>]>
    where
        F: Fn(&str, u32) + Send + Sync + 'static,
    {
        if self.session.is_some() {
            return Err(WatchError::AlreadyWatching {
                root: self.root.clone(),
            });
        }

        let path_map = self.build_path_map();
        // build_path_map always puts the root's own entry first.
        let resolved_root = match path_map.iter().next() {
            Some((resolved, _)) => resolved.to_string(),
            None => self.resolver.resolve(&self.root),
        };
        let handler: RawEventCallback = Arc::new(handler);
        let mut watches = Vec::with_capacity(path_map.len());

        for (resolved, requested) in path_map.iter() {
            let callback: RawEventCallback = {
                let handler = Arc::clone(&handler);
                let resolved = resolved.to_string();
                let requested = requested.to_string();
                Arc::new(move |raw: &str, flags: u32| {
                    handler(&transpose(&requested, &resolved, raw), flags)
                })
            };

            let Some(handle) = self.native.start(resolved, callback) else {
                tracing::warn!(
                    "could not watch {}; releasing {} watch(es) opened for {}",
                    resolved,
                    watches.len(),
                    self.root
                );
                self.roll_back(watches);
                return Err(WatchError::Unwatchable {
                    path: resolved.to_string(),
                });
            };

            tracing::debug!("watching {} as {}", resolved, requested);
            watches.push(ActiveWatch {
                resolved_path: resolved.to_string(),
                requested_path: requested.to_string(),
                handle,
            });
        }

        let session = self.session.insert(WatchSession {
            root: self.root.clone(),
            resolved_root,
            path_map,
            watches,
        });
        Ok(&session.watches)
    }

    /// Releases every native watch of the current session.
    ///
    /// The session is gone by the time this returns; releases finish in the
    /// background and are reported through the returned completion.
    pub fn stop(&mut self) -> StopCompletion {
        match self.session.take() {
            Some(session) => release_session(&self.native, session),
            None => StopCompletion::done(),
        }
    }

    fn roll_back(&self, watches: Vec<ActiveWatch<N::Handle>>) {
        for watch in watches {
            if let Err(error) = self.native.stop(watch.handle) {
                tracing::warn!(
                    "failed to release watch on {} during rollback: {}",
                    watch.resolved_path,
                    error
                );
            }
        }
    }
}

impl<N: NativeWatcher> Drop for VirtualWatcher<N> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = release_session(&self.native, session);
        }
    }
}

fn release_session<N: NativeWatcher>(
    native: &Arc<N>,
    session: WatchSession<N::Handle>,
) -> StopCompletion {
    tracing::debug!(
        "stopping {} watch(es) for {}",
        session.watches.len(),
        session.root
    );

    let mut pending = Vec::with_capacity(session.watches.len());
    for watch in session.watches {
        let ActiveWatch {
            resolved_path,
            handle,
            ..
        } = watch;
        let (sender, receiver) = oneshot::channel();
        let native = Arc::clone(native);
        let thread_path = resolved_path.clone();

        // A failed spawn drops the sender, which the completion reports.
        let spawned = thread::Builder::new()
            .name("vfs-watch-release".to_string())
            .spawn(move || {
                let result = native.stop(handle);
                if let Err(error) = &result {
                    tracing::warn!("failed to release watch on {}: {}", thread_path, error);
                }
                let _ = sender.send(result);
            });
        if let Err(error) = spawned {
            tracing::warn!(
                "failed to spawn release thread for {}: {}",
                resolved_path,
                error
            );
        }
        pending.push((resolved_path, receiver));
    }
    StopCompletion { pending }
}

/// A running watch returned by [`watch`].
pub struct Watch<N: NativeWatcher> {
    inner: VirtualWatcher<N>,
}

impl<N: NativeWatcher> Watch<N> {
    /// The absolute root being watched.
    pub fn root(&self) -> &str {
        self.inner.root()
    }

    /// Physical paths with a native watch on them, in watch order.
    pub fn watched_paths(&self) -> Vec<&str> {
        self.inner
            .session()
            .map(|session| {
                session
                    .watches()
                    .iter()
                    .map(ActiveWatch::resolved_path)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tears down every native watch opened for the root.
    pub fn stop(mut self) -> StopCompletion {
        self.inner.stop()
    }
}

/// Watches `path` and reports events under it to `handler`, resolving
/// virtual paths with the default markers and hop budget.
///
/// `path` is made absolute against the current directory and lexically
/// normalized; symlinks are not followed.
pub fn watch<N, F>(
    path: impl AsRef<Path>,
    native: Arc<N>,
    env: Arc<dyn Environment>,
    handler: F,
) -> Result<Watch<N>>
where
    N: NativeWatcher,
    F: Fn(&str, u32) + Send + Sync + 'static,
{
    watch_with_options(path, native, env, &ResolverOptions::default(), handler)
}

/// Same as [`watch`], resolving virtual paths with `options`, typically
/// the `resolver` section of a loaded [`WatchOptions`](crate::WatchOptions).
pub fn watch_with_options<N, F>(
    path: impl AsRef<Path>,
    native: Arc<N>,
    env: Arc<dyn Environment>,
    options: &ResolverOptions,
    handler: F,
) -> Result<Watch<N>>
where
    N: NativeWatcher,
    F: Fn(&str, u32) + Send + Sync + 'static,
{
    options.validate()?;
    let root = absolute_root(path.as_ref())?;
    let mut inner = VirtualWatcher::new(root, native, env)
        .with_resolver(VirtualResolver::new(options.clone()));
    inner.watch(handler)?;
    Ok(Watch { inner })
}

fn absolute_root(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)?;
    let text = absolute
        .to_str()
        .ok_or_else(|| WatchError::NonUtf8Path(absolute.clone()))?;
    let normalized = normalize_path(text);
    match normalized.trim_end_matches('/') {
        "" => Ok("/".to_string()),
        trimmed => Ok(trimmed.to_string()),
    }
}
