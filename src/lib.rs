//! `diskqueue`: a durable filesystem-backed FIFO message queue.
//!
//! Scope:
//! - length-prefixed record framing over numbered data files (`codec`)
//! - file naming, positioned opens, quarantine, atomic metadata (`store`)
//! - the serialized I/O loop owning every cursor and file handle (`worker`)
//! - bounded fast-forward over a caller predicate (`forward`)
//! - public façade and lifecycle (`queue`)
//!
//! Non-goal: brokering. This crate is the spill buffer a higher-level broker
//! drains; topics, acks, and redelivery belong above it.
//!
//! ## Contract (what you can rely on)
//!
//! - **FIFO**: records come off the read channel in exact `put` order.
//! - **Crash consistency**: only the committed read cursor is persisted. A
//!   record staged for delivery but not yet accepted when the process dies is
//!   delivered again after reopen (at-least-once at the restart boundary).
//! - **Durability is a cadence, not a per-record promise**: a successful
//!   `put` is fsynced at the next sync boundary (`sync_every` operations, the
//!   idle timer, a file roll, or `close`).
//! - **Corruption posture**: an unreadable file at the read frontier is
//!   renamed to `*.bad` and skipped, never fatal; a write failure is surfaced
//!   to the producer; inconsistent metadata at the tail is reconciled in
//!   place. The framing carries no checksums; the length bound is the only
//!   sanity check, and the filesystem is trusted for payload integrity.
//!
//! Terminology:
//! - A **cursor** is a `(file number, byte offset)` pair at a record boundary.
//! - **Depth** is the count of records between the committed read cursor and
//!   the write cursor.
//! - A **file roll** closes the current read or write file and advances to
//!   the next number; **fast-forward** advances the read cursor past a prefix
//!   of records a predicate keeps, without delivering them.
//!
//! One producer and one consumer per instance; cross-process sharing of a
//! queue directory is not supported.

pub mod codec;
pub mod config;
pub mod error;
pub mod pool;
pub mod store;

mod forward;
mod queue;
mod worker;

pub use config::Options;
pub use error::{Error, Result};
pub use queue::DiskQueue;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options() -> Options {
        Options {
            max_bytes_per_file: 64,
            min_msg_size: 1,
            max_msg_size: 16,
            sync_every: 10,
            sync_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn roundtrip_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let q = DiskQueue::with_options("smoke", tmp.path(), options()).unwrap();

        q.put(b"a").unwrap();
        q.put(b"bb").unwrap();
        q.put(b"ccc").unwrap();
        assert_eq!(q.depth(), 3);

        let rx = q.read_chan();
        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), b"a");
        assert_eq!(rx.recv_timeout(timeout).unwrap(), b"bb");
        assert_eq!(rx.recv_timeout(timeout).unwrap(), b"ccc");

        q.close().unwrap();
    }

    #[test]
    fn reopen_resumes_from_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let q = DiskQueue::with_options("smoke", tmp.path(), options()).unwrap();
            q.put(b"persisted").unwrap();
            q.close().unwrap();
        }

        let q = DiskQueue::with_options("smoke", tmp.path(), options()).unwrap();
        assert_eq!(q.depth(), 1);
        assert_eq!(
            q.read_chan().recv_timeout(Duration::from_secs(5)).unwrap(),
            b"persisted"
        );
        q.close().unwrap();
    }
}
