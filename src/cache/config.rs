//! Overlay configuration.
//!
//! Controls which named queries bypass the normalized store and how their
//! entries are replaced, via the `[cache]` section of `verbatim.toml`.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

const DEFAULT_EVENT_QUEUE_LIMIT: usize = 256;

/// What happens when a registered query is written again with different
/// arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Every write replaces the stored entry.
    #[default]
    Always,
    /// The first stored arguments stick; writes with other arguments go to
    /// the normalized store instead.
    FirstWriteWins,
}

impl fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Always => "always",
            Self::FirstWriteWins => "first_write_wins",
        })
    }
}

impl FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "always" => Ok(Self::Always),
            "first_write_wins" => Ok(Self::FirstWriteWins),
            other => Err(format!(
                "unknown overwrite policy `{other}` (expected `always` or `first_write_wins`)"
            )),
        }
    }
}

/// Overlay configuration, usually built from the `[cache]` settings.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Operation names whose results are kept verbatim.
    pub bypass_queries: Vec<String>,
    /// Replacement policy for stored entries.
    pub overwrite_policy: OverwritePolicy,
    /// Capacity of change-event queues handed out by the overlay.
    pub event_queue_limit: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            bypass_queries: Vec::new(),
            overwrite_policy: OverwritePolicy::default(),
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for OverlayConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            bypass_queries: settings.bypass_queries.clone(),
            overwrite_policy: settings.overwrite_policy,
            event_queue_limit: settings.event_queue_limit,
        }
    }
}

impl OverlayConfig {
    /// Configuration bypassing the given names with the default policy.
    pub fn with_names<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            bypass_queries: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite_policy = policy;
        self
    }

    /// Returns the event queue limit as NonZeroUsize, clamping to 1 if zero.
    pub fn event_queue_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.event_queue_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
