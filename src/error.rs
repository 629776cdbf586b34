//! Error types for `diskqueue`.

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the `diskqueue` crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A write payload is outside the configured `[min_msg_size, max_msg_size]` bounds.
    ///
    /// Surfaced to the producer; the queue state is unchanged.
    #[error("invalid message write size ({size}) maxMsgSize={max}")]
    InvalidWriteSize {
        /// Length of the rejected payload.
        size: i32,
        /// Configured maximum message size.
        max: i32,
    },

    /// A length prefix read from disk is outside the configured bounds.
    ///
    /// The file is treated as corrupt from this point: there is no reasonable
    /// guarantee on where the next record begins.
    #[error("invalid message read size ({size})")]
    InvalidReadSize {
        /// The length prefix that was read.
        size: i32,
    },

    /// The queue is closing or has been closed/deleted.
    #[error("exiting")]
    Exiting,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metadata file exists but could not be parsed.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// The I/O loop terminated while a request was in flight.
    #[error("queue i/o loop terminated")]
    LoopTerminated,
}
