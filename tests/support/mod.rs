//! Shared helpers for the integration tests.
//!
//! Important: this file lives under `tests/support/` so it is **not** compiled
//! as a standalone integration test target.
#![allow(dead_code)]

use diskqueue::{DiskQueue, Options};
use std::path::Path;
use std::time::{Duration, Instant};

/// Generous receive timeout; tests fail loudly instead of hanging.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Small files and tight sync cadence so scenarios exercise rolls quickly.
pub fn small_options(max_bytes_per_file: i64) -> Options {
    Options {
        max_bytes_per_file,
        min_msg_size: 0,
        max_msg_size: 64,
        sync_every: 25,
        sync_timeout: Duration::from_millis(100),
    }
}

/// Depth updates trail the consumer's receive by one loop step; poll with a
/// deadline instead of asserting immediately.
pub fn wait_for_depth(q: &DiskQueue, expected: i64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let depth = q.depth();
        if depth == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "depth stuck at {depth}, expected {expected}"
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Poll until `path` no longer exists (file removal also trails delivery).
pub fn wait_for_removal(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while path.exists() {
        assert!(
            Instant::now() < deadline,
            "file {} was not removed",
            path.display()
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Path of a queue's numbered data file, mirroring the on-disk layout.
pub fn data_file(dir: &Path, name: &str, num: i64) -> std::path::PathBuf {
    dir.join(format!("{name}.diskqueue.{num:06}.dat"))
}

/// Path of a queue's metadata file.
pub fn metadata_file(dir: &Path, name: &str) -> std::path::PathBuf {
    dir.join(format!("{name}.diskqueue.meta.dat"))
}

/// Names of `.bad` quarantine artifacts in `dir`.
pub fn bad_files(dir: &Path) -> Vec<String> {
    let mut out: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".bad"))
        .collect();
    out.sort();
    out
}

/// Poll until at least one `.bad` artifact exists in `dir`.
pub fn wait_for_bad_file(dir: &Path) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let bad = bad_files(dir);
        if !bad.is_empty() {
            return bad;
        }
        assert!(Instant::now() < deadline, "no quarantined file appeared");
        std::thread::sleep(Duration::from_millis(2));
    }
}
