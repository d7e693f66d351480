//! Virtual path resolution.
//!
//! A virtual package path has the shape
//!
//! ```text
//! <base>/$$virtual/<package-key>/<depth>/<remainder>
//! ```
//!
//! where `<base>` is the real directory that holds the marker segment and
//! `<depth>` says how many directory levels to climb from `<base>` before
//! descending into `<remainder>`. The remainder may itself contain further
//! markers, so resolution repeats until the path no longer redirects.
//!
//! Everything here is lexical: no filesystem access, no symlink resolution.

use crate::options::ResolverOptions;

/// A path split around its first virtual marker segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualSegmentMatch<'a> {
    /// Path up to and including the marker segment.
    pub anchor_prefix: &'a str,
    pub package_key: Option<&'a str>,
    pub depth_token: Option<&'a str>,
    /// Everything after the consumed segments. Empty or starts with `/`.
    pub remainder: &'a str,
}

impl<'a> VirtualSegmentMatch<'a> {
    /// Matches `path` against the virtual shape using `markers`.
    ///
    /// The path must be absolute, every segment before the marker must be
    /// non-empty, and the marker must occupy a whole segment. The earliest
    /// marker segment wins.
    pub fn find(path: &'a str, markers: &[String]) -> Option<Self> {
        if !path.starts_with('/') {
            return None;
        }

        let mut offset = 1;
        loop {
            let rest = &path[offset..];
            let segment_len = rest.find('/').unwrap_or(rest.len());
            let segment = &rest[..segment_len];
            if segment.is_empty() {
                return None;
            }

            let end = offset + segment_len;
            if markers.iter().any(|marker| marker == segment) {
                let tail = &path[end..];
                let (package_key, after_key) = next_segment(tail);
                let (depth_token, remainder) = match package_key {
                    Some(_) => next_segment(after_key),
                    None => (None, tail),
                };
                return Some(Self {
                    anchor_prefix: &path[..end],
                    package_key,
                    depth_token,
                    remainder,
                });
            }

            if end == path.len() {
                return None;
            }
            offset = end + 1;
        }
    }

    /// The real directory containing the marker segment.
    pub fn base_dir(&self) -> &'a str {
        dirname(self.anchor_prefix)
    }
}

/// Splits `/<segment>` off the front of `tail`. Empty segments do not count.
fn next_segment(tail: &str) -> (Option<&str>, &str) {
    let Some(rest) = tail.strip_prefix('/') else {
        return (None, tail);
    };
    let len = rest.find('/').unwrap_or(rest.len());
    if len == 0 {
        return (None, tail);
    }
    (Some(&rest[..len]), &rest[len..])
}

/// Resolves virtual package paths to the physical paths they denote.
#[derive(Debug, Clone, Default)]
pub struct VirtualResolver {
    options: ResolverOptions,
}

enum Step {
    Done(String),
    Redirect(String),
}

impl VirtualResolver {
    pub fn new(options: ResolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Returns the physical path for `path`.
    ///
    /// Paths without a marker come back unchanged. A marker without both a
    /// package key and a depth resolves to the marker's parent directory. A
    /// non-numeric depth leaves the path untouched. Chained redirections are
    /// followed up to `max_hops` times; past that the last input is returned
    /// as-is.
    pub fn resolve(&self, path: &str) -> String {
        let mut current = path.to_string();
        let mut hops = 0;
        loop {
            match self.step(&current) {
                Step::Done(resolved) => return resolved,
                Step::Redirect(next) => {
                    if hops == self.options.max_hops {
                        tracing::warn!(
                            "virtual redirection budget of {} hops exhausted for {}",
                            self.options.max_hops,
                            path
                        );
                        return current;
                    }
                    hops += 1;
                    current = next;
                }
            }
        }
    }

    fn step(&self, path: &str) -> Step {
        let Some(found) = VirtualSegmentMatch::find(path, &self.options.markers) else {
            return Step::Done(path.to_string());
        };

        let base = found.base_dir();
        let Some(depth_token) = found.package_key.and(found.depth_token) else {
            return Step::Done(base.to_string());
        };

        if !depth_token.bytes().all(|byte| byte.is_ascii_digit()) {
            return Step::Done(path.to_string());
        }
        let Ok(depth) = depth_token.parse::<usize>() else {
            return Step::Done(path.to_string());
        };

        Step::Redirect(climb_and_join(base, depth, found.remainder))
    }
}

/// Resolves `path` with the default marker and hop budget.
pub fn resolve_virtual(path: &str) -> String {
    VirtualResolver::default().resolve(path)
}

/// Climbs `depth` levels from `base`, then appends `remainder`.
fn climb_and_join(base: &str, depth: usize, remainder: &str) -> String {
    let absolute = base.starts_with('/');
    let mut segments = Vec::new();
    push_segments(&mut segments, absolute, base);
    for _ in 0..depth {
        if !pop_segment(&mut segments, absolute) {
            break;
        }
    }
    push_segments(&mut segments, absolute, remainder);
    render(&segments, absolute, remainder.ends_with('/'))
}

/// Lexically normalizes a `/`-separated path.
///
/// Collapses `.` and `..`, drops duplicate separators and keeps a trailing
/// separator when the input has one. `..` never climbs above `/`.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments = Vec::new();
    push_segments(&mut segments, absolute, path);
    render(&segments, absolute, path.ends_with('/'))
}

fn push_segments<'a>(segments: &mut Vec<&'a str>, absolute: bool, path: &'a str) {
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if !pop_segment(segments, absolute) && !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
}

/// Pops one real segment. Returns false when there is nothing to climb out of.
fn pop_segment(segments: &mut Vec<&str>, absolute: bool) -> bool {
    match segments.last() {
        Some(&"..") if !absolute => false,
        Some(_) => {
            segments.pop();
            true
        }
        None => false,
    }
}

fn render(segments: &[&str], absolute: bool, trailing_slash: bool) -> String {
    let body = segments.join("/");
    match (absolute, body.is_empty()) {
        (true, true) => "/".to_string(),
        (false, true) => ".".to_string(),
        (true, false) if trailing_slash => format!("/{body}/"),
        (true, false) => format!("/{body}"),
        (false, false) if trailing_slash => format!("{body}/"),
        (false, false) => body,
    }
}

/// Parent directory of `path`, the way `dirname` computes it.
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(index) => &trimmed[..index],
        None if path.starts_with('/') => "/",
        None => ".",
    }
}

/// Whether `child` is `parent` or lies beneath it, comparing whole segments.
///
/// `/a/foobar` is not within `/a/foo`.
pub fn is_within(child: &str, parent: &str) -> bool {
    let parent = trim_trailing_separators(parent);
    let child = trim_trailing_separators(child);
    if parent == "/" {
        return child.starts_with('/');
    }
    match child.strip_prefix(parent) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn trim_trailing_separators(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}
