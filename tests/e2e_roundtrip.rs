//! End-to-end scenarios: roundtrip, file rolling, restart.

mod support;

use diskqueue::{DiskQueue, Options};
use std::time::Duration;
use support::{
    data_file, metadata_file, small_options, wait_for_depth, wait_for_removal, RECV_TIMEOUT,
};

#[test]
fn roundtrip_three_records_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let q = DiskQueue::with_options(
        "roundtrip",
        tmp.path(),
        Options {
            max_bytes_per_file: 64,
            min_msg_size: 1,
            max_msg_size: 16,
            ..small_options(64)
        },
    )
    .unwrap();

    q.put(b"a").unwrap();
    q.put(b"bb").unwrap();
    q.put(b"ccc").unwrap();
    assert_eq!(q.depth(), 3);

    let rx = q.read_chan();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"a");
    wait_for_depth(&q, 2);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"bb");
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"ccc");
    wait_for_depth(&q, 0);

    q.close().unwrap();
}

#[test]
fn records_roll_across_files_and_drained_files_disappear() {
    let tmp = tempfile::tempdir().unwrap();
    let q = DiskQueue::with_options("roll", tmp.path(), small_options(10)).unwrap();

    // 4-byte payloads frame to 8 bytes: the second write crosses the 10-byte
    // threshold and rolls, so the third lands in file 1.
    q.put(b"one1").unwrap();
    q.put(b"two2").unwrap();
    q.put(b"thr3").unwrap();

    assert!(data_file(tmp.path(), "roll", 0).exists());
    assert!(data_file(tmp.path(), "roll", 1).exists());

    let rx = q.read_chan();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"one1");
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"two2");
    // File 0 is removed once its last record has been delivered.
    wait_for_removal(&data_file(tmp.path(), "roll", 0));

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"thr3");
    wait_for_depth(&q, 0);

    q.close().unwrap();
}

#[test]
fn restart_preserves_depth_and_order() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let q = DiskQueue::with_options("restart", tmp.path(), small_options(1024)).unwrap();
        for b in [b"1", b"2", b"3", b"4", b"5"] {
            q.put(b).unwrap();
        }
        q.close().unwrap();
    }
    assert!(metadata_file(tmp.path(), "restart").exists());

    let q = DiskQueue::with_options("restart", tmp.path(), small_options(1024)).unwrap();
    assert_eq!(q.depth(), 5);

    let rx = q.read_chan();
    for expected in [b"1", b"2", b"3", b"4", b"5"] {
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), expected);
    }
    wait_for_depth(&q, 0);
    q.close().unwrap();
}

#[test]
fn restart_redelivers_a_staged_but_unconsumed_record() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let q = DiskQueue::with_options("staged", tmp.path(), small_options(1024)).unwrap();
        q.put(b"first").unwrap();
        q.put(b"second").unwrap();
        // The loop stages "first" ahead of any consumer; only the committed
        // cursor is persisted, so close must not lose the staged record.
        q.close().unwrap();
    }

    let q = DiskQueue::with_options("staged", tmp.path(), small_options(1024)).unwrap();
    assert_eq!(q.depth(), 2);
    let rx = q.read_chan();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"first");
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"second");
    q.close().unwrap();
}

#[test]
fn depth_accounts_puts_minus_reads() {
    let tmp = tempfile::tempdir().unwrap();
    let q = DiskQueue::with_options("depth", tmp.path(), small_options(128)).unwrap();

    for i in 0..20u8 {
        q.put(&[i]).unwrap();
    }
    assert_eq!(q.depth(), 20);

    let rx = q.read_chan();
    for _ in 0..7 {
        rx.recv_timeout(RECV_TIMEOUT).unwrap();
    }
    wait_for_depth(&q, 13);

    q.close().unwrap();
}

#[test]
fn idle_timer_persists_metadata_without_explicit_close() {
    let tmp = tempfile::tempdir().unwrap();
    let q = DiskQueue::with_options(
        "idle",
        tmp.path(),
        Options {
            sync_every: 1000, // only the idle timer can trigger the sync
            sync_timeout: Duration::from_millis(50),
            ..small_options(1024)
        },
    )
    .unwrap();

    q.put(b"pending").unwrap();
    let meta = metadata_file(tmp.path(), "idle");
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !meta.exists() {
        assert!(
            std::time::Instant::now() < deadline,
            "idle sync never persisted metadata"
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    q.close().unwrap();
}

#[test]
fn concurrent_depth_observers_see_sane_values() {
    let tmp = tempfile::tempdir().unwrap();
    let q = std::sync::Arc::new(
        DiskQueue::with_options("observed", tmp.path(), small_options(256)).unwrap(),
    );

    let observer = {
        let q = q.clone();
        std::thread::spawn(move || {
            let mut max_seen = 0i64;
            for _ in 0..2000 {
                let d = q.depth();
                assert!((0..=50).contains(&d), "impossible depth {d}");
                max_seen = max_seen.max(d);
            }
            max_seen
        })
    };

    for i in 0..50u8 {
        q.put(&[i]).unwrap();
    }
    observer.join().unwrap();
    assert_eq!(q.depth(), 50);

    q.close().unwrap();
}

#[test]
fn consumer_blocks_until_a_record_arrives() {
    let tmp = tempfile::tempdir().unwrap();
    let q = DiskQueue::with_options("blocking", tmp.path(), small_options(1024)).unwrap();

    let rx = q.read_chan();
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    q.put(b"now").unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), b"now");

    q.close().unwrap();
}
