//! The serialized I/O loop.
//!
//! A single dedicated thread owns every piece of mutable queue state: both
//! cursors, the tentative read cursor, the open file handles, and the
//! `need_sync` flag. External callers never touch files; they hand requests
//! across rendezvous channels and block for the response. The loop stages at
//! most one record ahead of the consumer; the consumer's receive on the read
//! channel is the commit point that advances the committed read cursor.
//!
//! ## Invariants maintained here
//!
//! - `(read_file_num, read_pos) <= (write_file_num, write_pos)`
//!   lexicographically; a violation is reconciled by resetting to an empty
//!   tail (`skip_to_next_rw_file`).
//! - At the tail, `depth == 0`; any other value is corruption and is reset.
//! - A record never spans data files: the write file rolls once `write_pos`
//!   crosses `max_bytes_per_file`, and the roll forces a sync.
//! - Only the committed cursor is persisted. A record staged but not yet
//!   accepted by the consumer is re-read after a restart.

use crate::codec;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::pool::BufferPool;
use crate::store::{FileStore, Metadata};
use crossbeam::channel::{tick, Receiver, Select, Sender};
use std::fs::File;
use std::io::{BufReader, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Predicate driving a fast-forward: `true` keeps advancing, `false` stops.
pub(crate) type Predicate = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// How the loop should wind down.
pub(crate) enum ExitMode {
    /// Final sync (fsync + metadata persist), then terminate.
    Close,
    /// Remove all data and metadata files without a final sync, then terminate.
    Delete,
}

/// Channel endpoints handed to the loop at spawn time.
///
/// Every request/response pair is a zero-capacity rendezvous; the caller
/// blocks until the loop has fully processed the request.
pub(crate) struct Channels {
    pub read_tx: Sender<Vec<u8>>,
    pub write_rx: Receiver<Vec<u8>>,
    pub write_resp_tx: Sender<Result<()>>,
    pub empty_rx: Receiver<()>,
    pub empty_resp_tx: Sender<Result<()>>,
    pub forward_rx: Receiver<Predicate>,
    pub forward_resp_tx: Sender<Result<()>>,
    pub exit_rx: Receiver<ExitMode>,
    pub exit_sync_tx: Sender<Result<()>>,
}

/// Owner of all mutable queue state; lives on the loop thread.
pub(crate) struct Worker {
    pub(crate) store: FileStore,
    pub(crate) opts: Options,

    // Committed cursors (persisted).
    pub(crate) read_file_num: i64,
    pub(crate) read_pos: i64,
    pub(crate) write_file_num: i64,
    pub(crate) write_pos: i64,

    // Tentative cursor: position AFTER the staged record (not persisted).
    pub(crate) next_read_file_num: i64,
    pub(crate) next_read_pos: i64,

    /// Undelivered-record count, shared with outside observers.
    pub(crate) depth: Arc<AtomicI64>,
    pub(crate) need_sync: bool,

    pub(crate) read_file: Option<BufReader<File>>,
    pub(crate) write_file: Option<File>,
    write_buf: Vec<u8>,

    pub(crate) pool: Arc<BufferPool>,
    /// Record read from disk but not yet accepted by the consumer.
    pub(crate) staged: Option<Vec<u8>>,
}

impl Worker {
    /// Build the loop state, retrieving persisted metadata if present.
    ///
    /// A missing metadata file means a fresh queue. A metadata file that
    /// exists but cannot be read/parsed is logged and treated as fresh
    /// (cursors stay zero).
    pub(crate) fn new(
        store: FileStore,
        opts: Options,
        depth: Arc<AtomicI64>,
        pool: Arc<BufferPool>,
    ) -> Self {
        let mut w = Self {
            store,
            opts,
            read_file_num: 0,
            read_pos: 0,
            write_file_num: 0,
            write_pos: 0,
            next_read_file_num: 0,
            next_read_pos: 0,
            depth,
            need_sync: false,
            read_file: None,
            write_file: None,
            write_buf: Vec::new(),
            pool,
            staged: None,
        };

        match w.store.load_metadata() {
            Ok(Some(meta)) => {
                w.depth.store(meta.depth, Ordering::SeqCst);
                w.read_file_num = meta.read_file_num;
                w.read_pos = meta.read_pos;
                w.write_file_num = meta.write_file_num;
                w.write_pos = meta.write_pos;
                w.next_read_file_num = meta.read_file_num;
                w.next_read_pos = meta.read_pos;
            }
            Ok(None) => {}
            Err(e) => {
                error!(name = %w.store.name(), error = %e,
                    "failed to retrieve metadata, starting fresh");
            }
        }
        w
    }

    /// Whether undelivered records exist between the cursors.
    pub(crate) fn has_data(&self) -> bool {
        self.read_file_num < self.write_file_num || self.read_pos < self.write_pos
    }

    fn record_staged(&self) -> bool {
        self.next_read_file_num != self.read_file_num || self.next_read_pos != self.read_pos
    }

    /// Append one record at the write cursor, rolling the file if needed.
    pub(crate) fn write_one(&mut self, data: &[u8]) -> Result<()> {
        let size = data.len();
        if size < self.opts.min_msg_size as usize || size > self.opts.max_msg_size as usize {
            return Err(Error::InvalidWriteSize {
                size: size.min(i32::MAX as usize) as i32,
                max: self.opts.max_msg_size,
            });
        }

        if self.write_file.is_none() {
            let path = self.store.data_file_path(self.write_file_num);
            let file = self
                .store
                .open_for_write(self.write_file_num, self.write_pos)?;
            info!(name = %self.store.name(), path = %path.display(),
                "write_one opened data file");
            self.write_file = Some(file);
        }

        codec::encode_record(&mut self.write_buf, data);

        // Single write call per record.
        let file = self.write_file.as_mut().expect("write file just opened");
        if let Err(e) = file.write_all(&self.write_buf) {
            self.write_file = None;
            return Err(e.into());
        }

        self.write_pos += codec::frame_len(size);
        self.depth.fetch_add(1, Ordering::SeqCst);

        if self.write_pos > self.opts.max_bytes_per_file {
            self.write_file_num += 1;
            self.write_pos = 0;

            // Sync every time we start writing to a new file. A failure here
            // is logged, not surfaced: the payload write itself succeeded.
            if let Err(e) = self.sync() {
                error!(name = %self.store.name(), error = %e, "failed to sync");
            }

            self.write_file = None;
        }

        Ok(())
    }

    /// Read the record at the read cursor and advance the tentative cursor.
    ///
    /// Errors close the read handle; the loop routes them to
    /// [`Worker::handle_read_error`].
    pub(crate) fn read_one(&mut self) -> Result<Vec<u8>> {
        if self.read_file.is_none() {
            let path = self.store.data_file_path(self.read_file_num);
            let reader = self.store.open_for_read(self.read_file_num, self.read_pos)?;
            info!(name = %self.store.name(), path = %path.display(),
                "read_one opened data file");
            self.read_file = Some(reader);
        }

        let reader = self.read_file.as_mut().expect("read file just opened");
        let mut buf = self.pool.get();
        let msg_size = match codec::read_record(
            reader,
            &mut buf,
            self.opts.min_msg_size,
            self.opts.max_msg_size,
        ) {
            Ok(n) => n,
            Err(e) => {
                self.read_file = None;
                self.pool.put(buf);
                return Err(e);
            }
        };

        // Only the tentative cursor advances here; the committed cursor moves
        // once the consumer accepts the record.
        self.next_read_pos = self.read_pos + codec::frame_len(msg_size as usize);
        self.next_read_file_num = self.read_file_num;

        if self.next_read_pos > self.opts.max_bytes_per_file {
            self.read_file = None;
            self.next_read_file_num += 1;
            self.next_read_pos = 0;
        }

        Ok(buf)
    }

    /// Commit the tentative cursor after the consumer accepted the staged record.
    pub(crate) fn move_forward(&mut self) {
        let old_read_file_num = self.read_file_num;
        self.read_file_num = self.next_read_file_num;
        self.read_pos = self.next_read_pos;
        let depth = self.depth.fetch_sub(1, Ordering::SeqCst) - 1;

        if old_read_file_num != self.next_read_file_num {
            // Sync every time we finish reading a file, then drop it.
            self.need_sync = true;
            if let Err(e) = self.store.remove_data_file(old_read_file_num) {
                error!(name = %self.store.name(), file_num = old_read_file_num, error = %e,
                    "failed to remove data file");
            }
        }

        self.check_tail_corruption(depth);
    }

    /// Quarantine the unreadable read file and advance past it.
    pub(crate) fn handle_read_error(&mut self) {
        if self.read_file_num == self.write_file_num {
            // The active write file is unreadable; assume it is unusable for
            // appends too and skip it.
            self.write_file = None;
            self.write_file_num += 1;
            self.write_pos = 0;
        }

        match self.store.quarantine(self.read_file_num) {
            Ok(bad) => {
                warn!(name = %self.store.name(), path = %bad.display(),
                    "jump to next file, saved bad file");
            }
            Err(e) => {
                error!(name = %self.store.name(), file_num = self.read_file_num, error = %e,
                    "failed to rename bad data file");
            }
        }

        self.read_file_num += 1;
        self.read_pos = 0;
        self.next_read_file_num = self.read_file_num;
        self.next_read_pos = 0;

        // Significant state change; sync on the next iteration.
        self.need_sync = true;
    }

    /// Reconcile metadata inconsistencies once the read cursor reaches the tail.
    pub(crate) fn check_tail_corruption(&mut self, depth: i64) {
        if self.has_data() {
            return;
        }

        // We've reached the end of the queue; anything but a zero depth and
        // equal cursors means something went wrong along the way.
        if depth != 0 {
            if depth < 0 {
                error!(name = %self.store.name(), depth,
                    "negative depth at tail, metadata corruption, resetting to 0");
            } else {
                error!(name = %self.store.name(), depth,
                    "positive depth at tail, data loss, resetting to 0");
            }
            self.depth.store(0, Ordering::SeqCst);
            self.need_sync = true;
        }

        if self.read_file_num != self.write_file_num || self.read_pos != self.write_pos {
            if self.read_file_num > self.write_file_num {
                error!(name = %self.store.name(),
                    read_file_num = self.read_file_num, write_file_num = self.write_file_num,
                    "read file number ahead of write file number, corruption, skipping ahead");
            }
            if self.read_pos > self.write_pos {
                error!(name = %self.store.name(),
                    read_pos = self.read_pos, write_pos = self.write_pos,
                    "read position ahead of write position, corruption, skipping ahead");
            }
            if let Err(e) = self.skip_to_next_rw_file() {
                error!(name = %self.store.name(), error = %e,
                    "failed to remove data files while skipping ahead");
            }
            self.need_sync = true;
        }
    }

    /// Drop every live data file and restart both cursors on a fresh file number.
    pub(crate) fn skip_to_next_rw_file(&mut self) -> Result<()> {
        self.read_file = None;
        self.write_file = None;

        let res = self
            .store
            .remove_range(self.read_file_num, self.write_file_num + 1);

        self.write_file_num += 1;
        self.write_pos = 0;
        self.read_file_num = self.write_file_num;
        self.read_pos = 0;
        self.next_read_file_num = self.write_file_num;
        self.next_read_pos = 0;
        self.depth.store(0, Ordering::SeqCst);

        res
    }

    /// Discard all pending data and the metadata file.
    pub(crate) fn delete_all_files(&mut self) -> Result<()> {
        let res = self.skip_to_next_rw_file();
        self.store.remove_metadata()?;
        res
    }

    /// Fsync the write file and atomically persist metadata.
    pub(crate) fn sync(&mut self) -> Result<()> {
        if let Some(file) = self.write_file.as_ref() {
            if let Err(e) = file.sync_all() {
                self.write_file = None;
                return Err(e.into());
            }
        }

        self.persist_metadata()?;
        self.need_sync = false;
        Ok(())
    }

    pub(crate) fn persist_metadata(&self) -> Result<()> {
        self.store.persist_metadata(&Metadata {
            depth: self.depth.load(Ordering::SeqCst),
            read_file_num: self.read_file_num,
            read_pos: self.read_pos,
            write_file_num: self.write_file_num,
            write_pos: self.write_pos,
        })
    }

    /// Run the loop until an exit request (or the façade disappearing).
    ///
    /// Each iteration syncs if due, stages one record ahead when data is
    /// available, then blocks on exactly one of: read-channel delivery, a
    /// write request, an empty request, a fast-forward request, the sync
    /// ticker, or exit.
    pub(crate) fn run(mut self, ch: Channels) {
        let mut count: i64 = 0;
        let ticker = tick(self.opts.sync_timeout);

        let exit_mode = loop {
            if count == self.opts.sync_every {
                self.need_sync = true;
            }
            if self.need_sync {
                if let Err(e) = self.sync() {
                    error!(name = %self.store.name(), error = %e, "failed to sync");
                }
                count = 0;
            }

            if self.has_data() && !self.record_staged() {
                match self.read_one() {
                    Ok(data) => self.staged = Some(data),
                    Err(e) => {
                        error!(name = %self.store.name(),
                            read_pos = self.read_pos,
                            path = %self.store.data_file_path(self.read_file_num).display(),
                            error = %e,
                            "reading message failed");
                        self.handle_read_error();
                        continue;
                    }
                }
            }

            // The read channel only participates while a record is staged;
            // otherwise the consumer stays blocked.
            let mut sel = Select::new();
            let send_idx = self.has_data().then(|| sel.send(&ch.read_tx));
            let empty_idx = sel.recv(&ch.empty_rx);
            let write_idx = sel.recv(&ch.write_rx);
            let forward_idx = sel.recv(&ch.forward_rx);
            let tick_idx = sel.recv(&ticker);
            let exit_idx = sel.recv(&ch.exit_rx);

            let op = sel.select();
            let idx = op.index();

            if Some(idx) == send_idx {
                let data = self.staged.take().expect("record staged for delivery");
                match op.send(&ch.read_tx, data) {
                    Ok(()) => {
                        count += 1;
                        self.move_forward();
                    }
                    Err(e) => {
                        // Consumer side vanished; keep the record staged.
                        self.staged = Some(e.into_inner());
                        break None;
                    }
                }
            } else if idx == empty_idx {
                match op.recv(&ch.empty_rx) {
                    Ok(()) => {
                        if let Some(stale) = self.staged.take() {
                            self.pool.put(stale);
                        }
                        let res = self.delete_all_files();
                        let _ = ch.empty_resp_tx.send(res);
                        count = 0;
                    }
                    Err(_) => break None,
                }
            } else if idx == write_idx {
                match op.recv(&ch.write_rx) {
                    Ok(data) => {
                        count += 1;
                        let res = self.write_one(&data);
                        let _ = ch.write_resp_tx.send(res);
                    }
                    Err(_) => break None,
                }
            } else if idx == forward_idx {
                match op.recv(&ch.forward_rx) {
                    Ok(mut f) => {
                        let res = self.fast_forward(f.as_mut());
                        let _ = ch.forward_resp_tx.send(res);
                    }
                    Err(_) => break None,
                }
            } else if idx == tick_idx {
                let _ = op.recv(&ticker);
                if count > 0 {
                    self.need_sync = true;
                }
            } else if idx == exit_idx {
                match op.recv(&ch.exit_rx) {
                    Ok(mode) => break Some(mode),
                    Err(_) => break None,
                }
            }
        };

        info!(name = %self.store.name(), "closing ... ioLoop");

        match exit_mode {
            Some(ExitMode::Close) => {
                let res = self.sync();
                let _ = ch.exit_sync_tx.send(res);
            }
            Some(ExitMode::Delete) => {
                let res = self.delete_all_files();
                let _ = ch.exit_sync_tx.send(res);
            }
            // Channels dropped without an exit request: the façade is gone,
            // nobody is listening for a result. No final sync.
            None => {}
        }
    }
}
