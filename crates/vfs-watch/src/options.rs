//! Watch configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchError};

/// Literal path segment that introduces a virtual package indirection.
pub const DEFAULT_VIRTUAL_MARKER: &str = "$$virtual";

/// Upper bound on chained virtual redirections followed by the resolver.
pub const DEFAULT_MAX_VIRTUAL_HOPS: usize = 32;

/// Default FSEvents coalescing latency, in seconds.
pub const DEFAULT_LATENCY_SECS: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Segment names treated as virtual markers. The first one found in a
    /// path wins.
    pub markers: Vec<String>,
    pub max_hops: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            markers: vec![DEFAULT_VIRTUAL_MARKER.to_string()],
            max_hops: DEFAULT_MAX_VIRTUAL_HOPS,
        }
    }
}

impl ResolverOptions {
    pub fn validate(&self) -> Result<()> {
        if self.markers.is_empty() {
            return Err(WatchError::Options(
                "at least one virtual marker is required".to_string(),
            ));
        }
        if let Some(marker) = self
            .markers
            .iter()
            .find(|marker| marker.is_empty() || marker.contains('/'))
        {
            return Err(WatchError::Options(format!(
                "virtual marker must be a single path segment: {marker:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    pub resolver: ResolverOptions,
    /// Latency handed to the native event source.
    pub latency_secs: f64,
    /// Event id to replay from. `None` starts from the current event.
    pub since_event_id: Option<u64>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            resolver: ResolverOptions::default(),
            latency_secs: DEFAULT_LATENCY_SECS,
            since_event_id: None,
        }
    }
}

impl WatchOptions {
    /// Parses options from JSON. Missing fields take their defaults.
    pub fn from_json(input: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(input)
            .map_err(|error| WatchError::Options(error.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        self.resolver.validate()?;
        if !self.latency_secs.is_finite() || self.latency_secs < 0.0 {
            return Err(WatchError::Options(format!(
                "latency must be a non-negative number of seconds, got {}",
                self.latency_secs
            )));
        }
        Ok(())
    }
}
