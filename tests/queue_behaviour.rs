// tests/queue_behaviour.rs

mod common;
use crate::common::{init_tracing, with_timeout};

use std::path::PathBuf;

use tokio::time::{Duration, Instant};

use dropship::fs::mock::MockFileSystem;
use dropship::UploaderEvent;
use dropship_test_utils::{FakeTransfer, Harness, OptionsBuilder};

fn two_files() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_file("/w/a.txt", b"a".to_vec());
    fs.add_file("/w/b.txt", b"b".to_vec());
    fs
}

async fn processed_outcomes(h: &mut Harness, n: usize) -> Vec<bool> {
    let mut outcomes = Vec::new();
    while outcomes.len() < n {
        if let UploaderEvent::Processed { success, .. } = h
            .next_event(|e| matches!(e, UploaderEvent::Processed { .. }))
            .await
        {
            outcomes.push(success);
        }
    }
    outcomes
}

#[tokio::test(start_paused = true)]
async fn concurrency_one_never_overlaps_transfers() {
    init_tracing();
    let transfer = FakeTransfer::new().with_delay(Duration::from_secs(1));
    let mut h = Harness::running(
        OptionsBuilder::new().watch("/w").concurrency(1).build(),
        two_files(),
        transfer,
    )
    .unwrap();

    h.watcher.add("/w/a.txt");
    h.watcher.add("/w/b.txt");
    with_timeout(processed_outcomes(&mut h, 2)).await;

    assert_eq!(h.transfer.call_count(), 2);
    assert_eq!(h.transfer.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrency_two_permits_overlap() {
    init_tracing();
    let transfer = FakeTransfer::new().with_delay(Duration::from_secs(1));
    let mut h = Harness::running(
        OptionsBuilder::new().watch("/w").concurrency(2).build(),
        two_files(),
        transfer,
    )
    .unwrap();

    h.watcher.add("/w/a.txt");
    h.watcher.add("/w/b.txt");
    with_timeout(processed_outcomes(&mut h, 2)).await;

    assert_eq!(h.transfer.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn two_failures_then_success_uses_three_attempts() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/w/a.txt", b"a".to_vec());
    let mut h = Harness::running(
        OptionsBuilder::new().watch("/w").retries(2).build(),
        fs,
        FakeTransfer::failing(2),
    )
    .unwrap();

    h.watcher.add("/w/a.txt");
    let outcomes = with_timeout(processed_outcomes(&mut h, 1)).await;

    assert_eq!(outcomes, vec![true]);
    let attempts: Vec<u32> = h.transfer.calls().iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    // Every attempt gets the full contents.
    assert!(h.transfer.calls().iter().all(|c| c.bytes == b"a".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn single_failure_without_retries_reports_failure() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/w/a.txt", b"a".to_vec());
    let mut h = Harness::running(
        OptionsBuilder::new().watch("/w").build(),
        fs,
        FakeTransfer::failing(1),
    )
    .unwrap();

    h.watcher.add("/w/a.txt");
    let outcomes = with_timeout(processed_outcomes(&mut h, 1)).await;

    assert_eq!(outcomes, vec![false]);
    assert_eq!(h.transfer.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn paused_queue_holds_tasks_until_resume() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/w/a.txt", b"a".to_vec());
    let mut h = Harness::running(
        OptionsBuilder::new().watch("/w").build(),
        fs,
        FakeTransfer::new(),
    )
    .unwrap();

    h.uploader.pause();
    assert!(h.uploader.is_paused());
    assert!(h.uploader.is_watching());

    h.watcher.add("/w/a.txt");
    with_timeout(h.next_event(|e| matches!(e, UploaderEvent::Queue { .. }))).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.transfer.call_count(), 0);
    let pending: Vec<PathBuf> = h.uploader.tasks().into_iter().map(|t| t.path).collect();
    assert_eq!(pending, vec![PathBuf::from("/w/a.txt")]);

    h.uploader.resume().unwrap();
    with_timeout(h.next_event(|e| *e == UploaderEvent::Drain)).await;
    assert_eq!(h.transfer.call_count(), 1);
    assert!(h.uploader.tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn live_settings_are_readable_and_clamped() {
    init_tracing();
    let h = Harness::build(
        OptionsBuilder::new().throttle(4096).build(),
        MockFileSystem::new(),
        FakeTransfer::new(),
    )
    .unwrap();

    assert_eq!(h.uploader.concurrency(), 2);
    h.uploader.set_concurrency(0);
    assert_eq!(h.uploader.concurrency(), 1);

    h.uploader.set_retries(4);
    assert_eq!(h.uploader.retries(), 4);

    assert_eq!(h.uploader.throttle(), 4096);
    h.uploader.set_throttle(0);
    assert_eq!(h.uploader.throttle(), 0);

    h.uploader.set_modify_interval(Duration::from_millis(250));
    assert_eq!(h.uploader.modify_interval(), Duration::from_millis(250));
    h.uploader.set_modify_interval(Duration::ZERO);
    assert_eq!(h.uploader.modify_interval(), Duration::from_millis(250));
}

fn is_upload_of(e: &UploaderEvent, name: &str) -> bool {
    matches!(e, UploaderEvent::Upload { path, .. } if path.ends_with(name))
}

fn is_processed_of(e: &UploaderEvent, name: &str) -> bool {
    matches!(e, UploaderEvent::Processed { path, .. } if path.ends_with(name))
}

#[tokio::test(start_paused = true)]
async fn raising_retries_mid_attempt_extends_the_running_task() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/w/a.txt", b"a".to_vec());
    let transfer = FakeTransfer::failing(2).with_delay(Duration::from_secs(1));
    let mut h = Harness::running(OptionsBuilder::new().watch("/w").build(), fs, transfer).unwrap();
    assert_eq!(h.uploader.retries(), 0);

    h.watcher.add("/w/a.txt");
    with_timeout(h.next_event(|e| is_upload_of(e, "a.txt"))).await;
    h.uploader.set_retries(2);

    let outcomes = with_timeout(processed_outcomes(&mut h, 1)).await;
    assert_eq!(outcomes, vec![true]);
    let attempts: Vec<u32> = h.transfer.calls().iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn lowering_concurrency_lets_running_tasks_finish() {
    init_tracing();
    let fs = two_files();
    fs.add_file("/w/c.txt", b"c".to_vec());
    let transfer = FakeTransfer::new().with_delay(Duration::from_secs(3));
    let mut h = Harness::running(
        OptionsBuilder::new().watch("/w").concurrency(2).build(),
        fs,
        transfer,
    )
    .unwrap();

    h.watcher.add("/w/a.txt");
    with_timeout(h.next_event(|e| is_upload_of(e, "a.txt"))).await;
    h.watcher.add("/w/b.txt");
    with_timeout(h.next_event(|e| is_upload_of(e, "b.txt"))).await;
    assert_eq!(h.uploader.running(), 2);

    h.uploader.set_concurrency(1);
    h.watcher.add("/w/c.txt");
    with_timeout(h.next_event(|e| matches!(e, UploaderEvent::Queue { path, .. } if path.ends_with("c.txt"))))
        .await;
    assert_eq!(h.uploader.running(), 2);
    let pending: Vec<PathBuf> = h.uploader.tasks().into_iter().map(|t| t.path).collect();
    assert_eq!(pending, vec![PathBuf::from("/w/c.txt")]);

    // One slot freed, but b still occupies the only slot left.
    with_timeout(h.next_event(|e| is_processed_of(e, "a.txt"))).await;
    let pending: Vec<PathBuf> = h.uploader.tasks().into_iter().map(|t| t.path).collect();
    assert_eq!(pending, vec![PathBuf::from("/w/c.txt")]);

    with_timeout(h.next_event(|e| is_processed_of(e, "b.txt"))).await;
    with_timeout(h.next_event(|e| is_upload_of(e, "c.txt"))).await;
    with_timeout(h.next_event(|e| is_processed_of(e, "c.txt"))).await;

    assert_eq!(h.transfer.call_count(), 3);
    assert_eq!(h.transfer.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn throttle_limits_streaming_rate() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/w/big.bin", vec![9u8; 4096]);
    let mut h = Harness::running(
        OptionsBuilder::new().watch("/w").throttle(1024).build(),
        fs,
        FakeTransfer::new(),
    )
    .unwrap();

    h.watcher.add("/w/big.bin");
    with_timeout(h.next_event(|e| matches!(e, UploaderEvent::Upload { .. }))).await;
    let started = Instant::now();
    with_timeout(h.next_event(|e| matches!(e, UploaderEvent::Processed { .. }))).await;

    // One second of burst, then 3072 bytes at 1024 B/s.
    assert!(started.elapsed() >= Duration::from_millis(2900));
    assert_eq!(h.transfer.calls()[0].bytes.len(), 4096);
}
