//! Public queue façade and lifecycle management.
//!
//! [`DiskQueue`] spawns the I/O loop on a dedicated named thread and forwards
//! every operation across zero-capacity rendezvous channels, so each call
//! blocks until the loop has fully processed it. A reader/writer lock
//! arbitrates exit: entry points take it shared and check the exit flag
//! before sending, `close`/`delete` take it exclusive, flip the flag, and
//! wait for the loop to terminate. No request can ever be submitted to a
//! terminated loop.
//!
//! The single-producer / single-consumer contract: concurrent `put` callers
//! are serialized by the rendezvous hand-off (response pairing is safe
//! because the loop completes each request/response pair before accepting
//! the next request), but fairness between them is unspecified. Multiple
//! consumers on one read channel would split the stream non-deterministically.

use crate::config::Options;
use crate::error::{Error, Result};
use crate::pool::BufferPool;
use crate::store::FileStore;
use crate::worker::{Channels, ExitMode, Predicate, Worker};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use tracing::info;

/// A durable filesystem-backed FIFO queue.
///
/// One producer calls [`put`](DiskQueue::put); one consumer receives from
/// [`read_chan`](DiskQueue::read_chan). Records survive restarts: reopening a
/// queue over the same directory resumes from the persisted cursors.
#[derive(Debug)]
pub struct DiskQueue {
    name: String,
    depth: Arc<AtomicI64>,
    pool: Arc<BufferPool>,

    read_rx: Receiver<Vec<u8>>,
    write_tx: Sender<Vec<u8>>,
    write_resp_rx: Receiver<Result<()>>,
    empty_tx: Sender<()>,
    empty_resp_rx: Receiver<Result<()>>,
    forward_tx: Sender<Predicate>,
    forward_resp_rx: Receiver<Result<()>>,

    exit: RwLock<ExitState>,
}

#[derive(Debug)]
struct ExitState {
    exiting: bool,
    exit_tx: Option<Sender<ExitMode>>,
    exit_sync_rx: Receiver<Result<()>>,
    join: Option<JoinHandle<()>>,
}

impl DiskQueue {
    /// Open (or create) a queue with default [`Options`].
    pub fn new(name: impl Into<String>, data_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(name, data_path, Options::default())
    }

    /// Open (or create) a queue, retrieving persisted metadata and starting
    /// the I/O loop thread.
    pub fn with_options(
        name: impl Into<String>,
        data_path: impl Into<PathBuf>,
        options: Options,
    ) -> Result<Self> {
        options.validate()?;
        let name = name.into();
        let data_path = data_path.into();
        std::fs::create_dir_all(&data_path)?;

        let depth = Arc::new(AtomicI64::new(0));
        let pool = Arc::new(BufferPool::new(options.max_msg_size as usize));
        let store = FileStore::new(name.clone(), data_path);

        // Built on the caller's thread so persisted depth is visible the
        // moment this constructor returns.
        let worker = Worker::new(store, options, depth.clone(), pool.clone());

        let (read_tx, read_rx) = bounded(0);
        let (write_tx, write_rx) = bounded(0);
        let (write_resp_tx, write_resp_rx) = bounded(0);
        let (empty_tx, empty_rx) = bounded(0);
        let (empty_resp_tx, empty_resp_rx) = bounded(0);
        let (forward_tx, forward_rx) = bounded(0);
        let (forward_resp_tx, forward_resp_rx) = bounded(0);
        let (exit_tx, exit_rx) = bounded(0);
        let (exit_sync_tx, exit_sync_rx) = bounded(0);

        let channels = Channels {
            read_tx,
            write_rx,
            write_resp_tx,
            empty_rx,
            empty_resp_tx,
            forward_rx,
            forward_resp_tx,
            exit_rx,
            exit_sync_tx,
        };

        let join = std::thread::Builder::new()
            .name(format!("diskqueue-{name}"))
            .spawn(move || worker.run(channels))?;

        info!(name = %name, "diskqueue initialized");

        Ok(Self {
            name,
            depth,
            pool,
            read_rx,
            write_tx,
            write_resp_rx,
            empty_tx,
            empty_resp_rx,
            forward_tx,
            forward_resp_rx,
            exit: RwLock::new(ExitState {
                exiting: false,
                exit_tx: Some(exit_tx),
                exit_sync_rx,
                join: Some(join),
            }),
        })
    }

    /// Append one record.
    ///
    /// Blocks until the loop has written it. Success does not imply
    /// durability; the record is fsynced at the next sync boundary
    /// (`sync_every` operations, the idle timer, a file roll, or `close`).
    pub fn put(&self, data: &[u8]) -> Result<()> {
        let guard = self.exit.read().map_err(|_| Error::Exiting)?;
        if guard.exiting {
            return Err(Error::Exiting);
        }

        self.write_tx
            .send(data.to_vec())
            .map_err(|_| Error::LoopTerminated)?;
        self.write_resp_rx
            .recv()
            .map_err(|_| Error::LoopTerminated)?
    }

    /// The channel records are delivered on, in `put` order.
    ///
    /// Unbuffered: the loop stages one record ahead and commits its read
    /// cursor only when the receive completes. Consumers may hand exhausted
    /// buffers back via [`buffer_pool_put`](DiskQueue::buffer_pool_put).
    pub fn read_chan(&self) -> Receiver<Vec<u8>> {
        self.read_rx.clone()
    }

    /// Instantaneous count of undelivered records.
    pub fn depth(&self) -> i64 {
        self.depth.load(Ordering::Relaxed)
    }

    /// Return a consumer-owned buffer to the read-buffer pool.
    ///
    /// Ignored unless the buffer's capacity equals the configured
    /// `max_msg_size`.
    pub fn buffer_pool_put(&self, buf: Vec<u8>) {
        self.pool.put(buf);
    }

    /// Discard all pending records and the metadata file.
    pub fn empty(&self) -> Result<()> {
        let guard = self.exit.read().map_err(|_| Error::Exiting)?;
        if guard.exiting {
            return Err(Error::Exiting);
        }

        info!(name = %self.name, "emptying");
        self.empty_tx.send(()).map_err(|_| Error::LoopTerminated)?;
        self.empty_resp_rx
            .recv()
            .map_err(|_| Error::LoopTerminated)?
    }

    /// Advance the read cursor past the prefix of records for which `f`
    /// returns `true`, without delivering them.
    ///
    /// The first record for which `f` returns `false` becomes the next
    /// record delivered. Blocks for the duration of the on-disk search.
    pub fn fast_forward<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        let guard = self.exit.read().map_err(|_| Error::Exiting)?;
        if guard.exiting {
            return Err(Error::Exiting);
        }

        self.forward_tx
            .send(Box::new(f))
            .map_err(|_| Error::LoopTerminated)?;
        self.forward_resp_rx
            .recv()
            .map_err(|_| Error::LoopTerminated)?
    }

    /// Persist metadata, fsync, and stop the I/O loop.
    pub fn close(&self) -> Result<()> {
        self.exit(ExitMode::Close)
    }

    /// Remove all data and metadata files and stop the I/O loop.
    ///
    /// No final sync is performed.
    pub fn delete(&self) -> Result<()> {
        self.exit(ExitMode::Delete)
    }

    fn exit(&self, mode: ExitMode) -> Result<()> {
        let mut guard = self.exit.write().map_err(|_| Error::Exiting)?;
        guard.exiting = true;

        match mode {
            ExitMode::Close => info!(name = %self.name, "closing"),
            ExitMode::Delete => info!(name = %self.name, "deleting"),
        }

        let Some(exit_tx) = guard.exit_tx.take() else {
            return Err(Error::Exiting);
        };
        exit_tx.send(mode).map_err(|_| Error::LoopTerminated)?;

        let result = guard
            .exit_sync_rx
            .recv()
            .map_err(|_| Error::LoopTerminated)?;

        if let Some(join) = guard.join.take() {
            let _ = join.join();
        }

        result
    }
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        // If the user never called close/delete, wake the loop so the thread
        // does not linger. No final sync on this path.
        if let Ok(mut guard) = self.exit.write() {
            guard.exiting = true;
            guard.exit_tx.take();
            if let Some(join) = guard.join.take() {
                let _ = join.join();
            }
        }
    }
}
