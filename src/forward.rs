//! Bounded fast-forward: advance the read cursor past a prefix of records
//! satisfying a caller predicate, without delivering them.
//!
//! The search bisects over the file-number axis to find the earliest file in
//! which the predicate first reports "stop", then finalizes with a linear
//! scan inside that file. Peeking samples one record per probe, so the cost
//! is `O(log files)` probes plus one in-file scan; no record is routed
//! through the consumer and at most one record is resident at a time.
//!
//! Guarantees on return:
//! - the read cursor points at the first stop-record in the file it ends in,
//! - nothing earlier than the final cursor is ever delivered,
//! - files strictly before the final read file are removed,
//! - depth is recomputed by scanning `[final read cursor, write cursor)`.
//!
//! The bisection assumes intermediate files are well-formed (every data file
//! begins with a complete record at offset 0). A corrupt intermediate file
//! ends a probe early here and is quarantined later by the normal read path.

use crate::codec;
use crate::error::{Error, Result};
use crate::worker::Worker;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;
use std::sync::atomic::Ordering;
use tracing::error;

impl Worker {
    /// Advance the read cursor to the first record for which `f` returns `false`.
    ///
    /// Runs on the loop thread with exclusive access to all cursors. Probe
    /// errors abort the search but any progress already proven is still
    /// committed; the error is returned to the caller.
    pub(crate) fn fast_forward(&mut self, f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()> {
        if !self.has_data() {
            return Ok(());
        }

        let mut last_stop_file = self.read_file_num;
        let mut last_stop_pos = self.read_pos;
        let mut curr_file = last_stop_file;
        let mut curr_pos = last_stop_pos;
        let mut begin_file = last_stop_file;
        let mut begin_pos = last_stop_pos;
        let mut end_file = self.write_file_num;
        let mut end_pos = self.write_pos;

        let mut buf = self.pool.get();

        // Initial sample: the record already staged for delivery, or a fresh
        // peek at the committed cursor.
        let mut sample_len: i32;
        if let Some(staged) = self.staged.as_ref() {
            let n = staged.len();
            buf[..n].copy_from_slice(staged);
            buf.truncate(n);
            sample_len = n as i32;
        } else {
            match self.peek_one(&mut buf, curr_file, curr_pos) {
                Ok(n) => sample_len = n,
                Err(e) => {
                    self.pool.put(buf);
                    return Err(e);
                }
            }
        }

        // A probe can land on the write file before it exists (write cursor at
        // offset 0 right after a roll). No record ever reaches that point, so
        // the probe counts as a stop there rather than an error.
        let mut forced_stop = false;

        let mut result: Result<()> = Ok(());
        loop {
            let keep = if forced_stop {
                forced_stop = false;
                false
            } else if sample_len == 0 {
                break;
            } else {
                f(&buf[..sample_len as usize])
            };

            if !keep {
                // Stop signal at `curr`: the answer is at or before it.
                end_file = curr_file;
                end_pos = curr_pos;
                last_stop_file = curr_file;
                last_stop_pos = curr_pos;

                if begin_file < curr_file {
                    curr_file = begin_file + (curr_file - begin_file) / 2;
                    if curr_file == begin_file {
                        // Interval collapsed to the begin file: finalize linearly.
                        curr_pos = begin_pos;
                        last_stop_file = curr_file;
                        last_stop_pos = self.scan_in_file(f, &mut buf, curr_file, curr_pos);
                        break;
                    }
                    curr_pos = 0;
                    match self.peek_one(&mut buf, curr_file, curr_pos) {
                        Ok(n) => sample_len = n,
                        Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                            forced_stop = true;
                        }
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                } else {
                    // Stop at the search origin: nothing to skip.
                    break;
                }
            } else {
                // Keep signal at `curr`: the answer is strictly after it.
                begin_file = curr_file;
                begin_pos = curr_pos;

                if curr_file < end_file {
                    curr_file += (end_file - curr_file + 1) / 2;
                    curr_pos = 0;
                    match self.peek_one(&mut buf, curr_file, curr_pos) {
                        Ok(n) => sample_len = n,
                        Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                            forced_stop = true;
                        }
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                } else if curr_file == end_file && curr_pos < end_pos {
                    // Already inside the last candidate file: finalize linearly.
                    last_stop_file = curr_file;
                    last_stop_pos = self.scan_in_file(f, &mut buf, curr_file, curr_pos);
                    break;
                } else {
                    break;
                }
            }
        }

        // A linear scan that consumed a whole rolled file lands past the roll
        // threshold; normalize onto the next file's first record, exactly as
        // the read path would have.
        if last_stop_pos > self.opts.max_bytes_per_file && last_stop_file < self.write_file_num {
            last_stop_file += 1;
            last_stop_pos = 0;
        }

        if self.read_file_num != last_stop_file || self.read_pos != last_stop_pos {
            // The staged record (if any) is at or before the new cursor and
            // must never be delivered; reclaim its buffer.
            if let Some(stale) = self.staged.take() {
                self.pool.put(stale);
            }
            // The open read handle's offset no longer matches the cursor.
            self.read_file = None;

            if self.read_file_num != last_stop_file {
                if self.write_file.is_some() {
                    if let Err(e) = self.sync() {
                        error!(name = %self.store.name(), error = %e,
                            "failed to sync during fast-forward");
                    }
                }
                let _ = self.store.remove_range(self.read_file_num, last_stop_file);
            }

            let depth = self.depth_in_files(
                last_stop_file,
                last_stop_pos,
                self.write_file_num,
                self.write_pos,
            );
            self.depth.store(depth, Ordering::SeqCst);

            self.read_file_num = last_stop_file;
            self.read_pos = last_stop_pos;
            self.next_read_file_num = last_stop_file;
            self.next_read_pos = last_stop_pos;
        }

        self.pool.put(buf);
        result
    }

    /// Sample the single record at `(file_num, pos)` into `buf`.
    fn peek_one(&self, buf: &mut Vec<u8>, file_num: i64, pos: i64) -> Result<i32> {
        let mut reader = self.store.open_for_read(file_num, pos)?;
        codec::read_record(
            &mut reader,
            buf,
            self.opts.min_msg_size,
            self.opts.max_msg_size,
        )
    }

    /// Linear finalize inside one file, starting at `start_pos`.
    ///
    /// Returns the position after the last record the predicate kept; if the
    /// first record already stops (or nothing is readable), that is
    /// `start_pos` itself. `start_pos` must be a record boundary, which holds
    /// for the committed cursor and for offset 0 of any file.
    fn scan_in_file(
        &self,
        f: &mut dyn FnMut(&[u8]) -> bool,
        buf: &mut Vec<u8>,
        file_num: i64,
        start_pos: i64,
    ) -> i64 {
        let mut pos = start_pos;
        let mut last_stop = start_pos;
        let Ok(mut reader) = self.store.open_for_read(file_num, pos) else {
            return last_stop;
        };
        loop {
            match codec::read_record(
                &mut reader,
                buf,
                self.opts.min_msg_size,
                self.opts.max_msg_size,
            ) {
                Ok(n) => {
                    if n == 0 || !f(&buf[..n as usize]) {
                        return last_stop;
                    }
                    pos += codec::frame_len(n as usize);
                    last_stop = pos;
                }
                Err(_) => return last_stop,
            }
        }
    }

    /// Count records across `[from_file, end_file]`, starting at `from_pos`
    /// in the first file and bounded by `end_pos` in the last.
    pub(crate) fn depth_in_files(
        &self,
        from_file: i64,
        from_pos: i64,
        end_file: i64,
        end_pos: i64,
    ) -> i64 {
        let mut depth = 0;
        for num in from_file..=end_file {
            let start = if num == from_file { from_pos } else { 0 };
            let end = if num == end_file { Some(end_pos) } else { None };
            depth += self.depth_in_file(num, start, end);
        }
        depth
    }

    /// Count records in one file by skipping payload bytes.
    ///
    /// `end_pos` of `None` means "to end of file". Stops at EOF, at an
    /// invalid length prefix, or when fewer than a header (or the announced
    /// payload) remains before `end_pos`.
    pub(crate) fn depth_in_file(&self, num: i64, start_pos: i64, end_pos: Option<i64>) -> i64 {
        let mut depth = 0;
        let mut pos = start_pos;
        if let Some(end) = end_pos {
            if end - pos < codec::HEADER_LEN {
                return 0;
            }
        }
        let Ok(mut reader) = self.store.open_for_read(num, pos) else {
            return 0;
        };
        loop {
            let msg_size = match reader.read_i32::<BigEndian>() {
                Ok(v) => v,
                Err(_) => return depth,
            };
            pos += codec::HEADER_LEN;
            if let Some(end) = end_pos {
                if end - pos < msg_size as i64 {
                    return depth;
                }
            }
            if msg_size < self.opts.min_msg_size || msg_size > self.opts.max_msg_size {
                // Corrupt from here on; no reasonable record boundary remains.
                return depth;
            }
            let skipped = std::io::copy(
                &mut reader.by_ref().take(msg_size as u64),
                &mut std::io::sink(),
            );
            match skipped {
                Ok(n) if n == msg_size as u64 => {}
                _ => return depth,
            }
            depth += 1;
            pos += msg_size as i64;
            if let Some(end) = end_pos {
                if end - pos < codec::HEADER_LEN {
                    return depth;
                }
            }
        }
    }
}
