//! Store configuration.

use crate::DEFAULT_BUFFER_SIZE;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// When buffered appends are pushed to the backing file.
///
/// Reads, `flush`, `sync` and `close` always flush regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush after every append (smallest loss window, most syscalls).
    EveryAppend,
    /// Flush once the pending buffer holds at least this many bytes.
    /// Must be at least 1; see [`StoreConfig::validate`].
    BufferFull(usize),
    /// Only flush on reads, explicit flush/sync, and close.
    Manual,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::BufferFull(DEFAULT_BUFFER_SIZE)
    }
}

impl FlushPolicy {
    /// Returns whether a buffer holding `buffered` bytes must be flushed now.
    pub fn should_flush(&self, buffered: usize) -> bool {
        match *self {
            FlushPolicy::EveryAppend => buffered > 0,
            FlushPolicy::BufferFull(limit) => buffered >= limit,
            FlushPolicy::Manual => false,
        }
    }
}

impl FromStr for FlushPolicy {
    type Err = String;

    /// Parses `every_append`, `manual`, or `buffer_full:<bytes>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "every_append" | "everyappend" => Ok(FlushPolicy::EveryAppend),
            "manual" => Ok(FlushPolicy::Manual),
            s if s.starts_with("buffer_full:") => s["buffer_full:".len()..]
                .parse()
                .map(FlushPolicy::BufferFull)
                .map_err(|e| format!("invalid buffer size in '{}': {}", s, e)),
            other => Err(format!("unknown flush policy: {}", other)),
        }
    }
}

/// What `Store::open` does with trailing bytes that do not form a complete frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailRecovery {
    /// Cut the file back to the end of the last complete frame.
    Truncate,
    /// Refuse to open the store and leave the file untouched.
    #[default]
    Fail,
}

impl FromStr for TailRecovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "truncate" => Ok(TailRecovery::Truncate),
            "fail" => Ok(TailRecovery::Fail),
            other => Err(format!("unknown tail recovery mode: {}", other)),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Flush policy for appends.
    pub flush_policy: FlushPolicy,
    /// Handling of a torn tail found at open.
    pub tail_recovery: TailRecovery,
    /// Fsync file data when the store is closed.
    pub sync_on_close: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_policy: FlushPolicy::default(),
            tail_recovery: TailRecovery::default(),
            sync_on_close: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    pub fn with_tail_recovery(mut self, recovery: TailRecovery) -> Self {
        self.tail_recovery = recovery;
        self
    }

    pub fn with_sync_on_close(mut self, sync: bool) -> Self {
        self.sync_on_close = sync;
        self
    }

    /// Checks the configuration for values the store cannot honor.
    pub fn validate(&self) -> Result<(), String> {
        if let FlushPolicy::BufferFull(0) = self.flush_policy {
            return Err("flush_policy buffer_full must be at least 1 byte".to_string());
        }
        Ok(())
    }
}
