//! Per-queue configuration.

use crate::error::{Error, Result};
use std::time::Duration;

/// Tunables fixed at queue creation.
///
/// `max_bytes_per_file` cannot change once a queue directory has been
/// written: the roll threshold is baked into where records landed on disk,
/// and the read path uses the same threshold to decide when a file ends.
#[derive(Debug, Clone)]
pub struct Options {
    /// Byte threshold after which the write file rolls to the next number.
    ///
    /// A file may exceed this by up to one full record; the roll happens
    /// after the write that crosses it.
    pub max_bytes_per_file: i64,
    /// Smallest accepted message, in bytes.
    pub min_msg_size: i32,
    /// Largest accepted message, in bytes. Also the pooled buffer capacity.
    pub max_msg_size: i32,
    /// Number of processed operations between forced fsyncs.
    pub sync_every: i64,
    /// Idle interval after which pending writes are fsynced anyway.
    pub sync_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_bytes_per_file: 100 * 1024 * 1024,
            min_msg_size: 0,
            max_msg_size: 1024 * 1024,
            sync_every: 2500,
            sync_timeout: Duration::from_secs(2),
        }
    }
}

impl Options {
    /// Reject configurations the queue cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes_per_file <= 0 {
            return Err(Error::InvalidConfig(format!(
                "max_bytes_per_file must be positive (got {})",
                self.max_bytes_per_file
            )));
        }
        if self.min_msg_size < 0 {
            return Err(Error::InvalidConfig(format!(
                "min_msg_size must be non-negative (got {})",
                self.min_msg_size
            )));
        }
        if self.min_msg_size > self.max_msg_size {
            return Err(Error::InvalidConfig(format!(
                "min_msg_size ({}) exceeds max_msg_size ({})",
                self.min_msg_size, self.max_msg_size
            )));
        }
        if self.sync_every < 1 {
            return Err(Error::InvalidConfig(format!(
                "sync_every must be at least 1 (got {})",
                self.sync_every
            )));
        }
        if self.sync_timeout.is_zero() {
            return Err(Error::InvalidConfig("sync_timeout must be non-zero".into()));
        }
        Ok(())
    }
}
