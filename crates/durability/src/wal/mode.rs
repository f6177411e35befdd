//! When WAL appends reach the disk
//!
//! The mode is named in `kipu.toml` as `"always"` or `"standard"`.

use kipu_core::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Sync policy for WAL appends
///
/// | Mode     | fsync                     | Lost on crash            |
/// |----------|---------------------------|--------------------------|
/// | Always   | before a commit returns   | nothing acknowledged     |
/// | Standard | every N appends or T ms   | the last unsynced window |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Sync before every commit returns
    #[default]
    Always,

    /// Sync once either threshold is reached; a background flusher covers
    /// idle periods
    Standard {
        /// Maximum time between syncs in milliseconds
        interval_ms: u64,
        /// Maximum appends between syncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Standard mode with 100 ms / 1000 appends thresholds
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1000,
        }
    }

    /// Name as written in configuration
    pub fn name(&self) -> &'static str {
        match self {
            DurabilityMode::Always => "always",
            DurabilityMode::Standard { .. } => "standard",
        }
    }
}

impl fmt::Display for DurabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurabilityMode::Always => f.write_str("always"),
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => write!(f, "standard({}ms/{} writes)", interval_ms, batch_size),
        }
    }
}

impl FromStr for DurabilityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "always" => Ok(DurabilityMode::Always),
            "standard" => Ok(DurabilityMode::standard_default()),
            other => Err(Error::InvalidConfig(format!(
                "Invalid durability mode '{}'. Expected \"always\" or \"standard\".",
                other
            ))),
        }
    }
}
