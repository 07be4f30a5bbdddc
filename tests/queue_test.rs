//! Integration tests for the queue: push, worker runs, and the persisted
//! state they leave behind.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use lowq::model::EntryId;
use lowq::retry::RetryPolicy;
use lowq::storage::Storage;
use lowq::{CodecKind, QueueConfig, QueueStatus, TaskQueue, Worker, WorkerExit};
use serde::{Deserialize, Serialize};

fn scratch() -> (tempfile::TempDir, QueueConfig) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = QueueConfig::new(dir.path().join("queue.db")).log_level("silent");
    (dir, config)
}

fn pending(queue: &TaskQueue) -> Vec<String> {
    queue
        .peek::<String>(100)
        .unwrap()
        .into_iter()
        .map(|(_, item)| item)
        .collect()
}

/// Run a worker in this process that records every item and fails on `poison`.
fn drain_recording(config: &QueueConfig, poison: Option<&str>) -> (WorkerExit, Vec<String>) {
    let mut seen = Vec::new();
    let exit = Worker::<String, _>::new(config.clone(), |item: String| -> Result<(), String> {
        if poison == Some(item.as_str()) {
            return Err(format!("cannot handle {item}"));
        }
        seen.push(item);
        Ok(())
    })
    .unwrap()
    .run()
    .unwrap();
    (exit, seen)
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

#[test]
fn repeated_push_keeps_one_entry() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config).unwrap();

    let first = queue.push(["resize img/1.png"]).unwrap();
    assert_eq!(first.inserted, 1);

    for _ in 0..4 {
        let again = queue.push(["resize img/1.png"]).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.duplicates, 1);
    }

    assert_eq!(pending(&queue), vec!["resize img/1.png"]);
}

#[test]
fn duplicates_within_one_push_are_skipped() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config).unwrap();

    let report = queue.push(["a", "b", "a", "c", "b"]).unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.duplicates, 2);
    assert_eq!(pending(&queue), vec!["a", "b", "c"]);
}

#[test]
fn dedup_is_by_encoded_bytes() {
    #[derive(Serialize, Deserialize)]
    struct Job {
        id: u32,
        kind: String,
    }

    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config).unwrap();

    let job = |id| Job {
        id,
        kind: "thumb".to_string(),
    };
    let report = queue.push([job(1), job(2), job(1)]).unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.duplicates, 1);
}

#[test]
fn push_does_not_activate() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config).unwrap();
    queue.push(["a"]).unwrap();
    assert_eq!(
        queue.status().unwrap(),
        QueueStatus {
            active: false,
            pending: 1
        }
    );
}

// ---------------------------------------------------------------------------
// Draining
// ---------------------------------------------------------------------------

#[test]
fn drains_in_push_order() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue.push(["A", "B"]).unwrap();
    queue.push(["C"]).unwrap();

    let (exit, seen) = drain_recording(&config, None);

    assert_eq!(exit, WorkerExit::Drained { processed: 3 });
    assert_eq!(seen, vec!["A", "B", "C"]);
    assert_eq!(
        queue.status().unwrap(),
        QueueStatus {
            active: false,
            pending: 0
        }
    );
}

#[test]
fn empty_backlog_activates_and_releases_without_processing() {
    let (_dir, config) = scratch();

    let (exit, seen) = drain_recording(&config, None);

    assert_eq!(exit, WorkerExit::Drained { processed: 0 });
    assert!(seen.is_empty());
    let status = TaskQueue::new(config).unwrap().status().unwrap();
    assert!(!status.active);
}

#[test]
fn failure_keeps_the_failing_item_and_releases() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue.push(["A", "B", "C"]).unwrap();

    let (exit, seen) = drain_recording(&config, Some("B"));

    assert_eq!(seen, vec!["A"]);
    match exit {
        WorkerExit::Released {
            processed,
            entry,
            error,
        } => {
            assert_eq!(processed, 1);
            assert_eq!(entry, EntryId(2));
            assert_eq!(error, "cannot handle B");
        }
        other => panic!("expected Released, got {other:?}"),
    }
    assert_eq!(pending(&queue), vec!["B", "C"]);
    assert!(!queue.status().unwrap().active);
}

#[test]
fn next_worker_resumes_from_failed_item() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue.push(["A", "B", "C"]).unwrap();

    drain_recording(&config, Some("B"));
    let (exit, seen) = drain_recording(&config, None);

    assert_eq!(exit, WorkerExit::Drained { processed: 2 });
    assert_eq!(seen, vec!["B", "C"]);
}

#[test]
fn undecodable_payload_is_a_processing_failure() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue.push([42u32]).unwrap();

    // Items are u32 but the worker expects strings.
    let (exit, seen) = drain_recording(&config, None);

    assert!(matches!(exit, WorkerExit::Released { processed: 0, .. }));
    assert!(seen.is_empty());
    assert_eq!(queue.status().unwrap().pending, 1);
}

#[test]
fn bincode_queue_round_trips_structs() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Resize {
        path: String,
        width: u32,
    }

    let (_dir, config) = scratch();
    let config = config.codec(CodecKind::Bincode);
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue
        .push([
            Resize {
                path: "a.png".to_string(),
                width: 64,
            },
            Resize {
                path: "b.png".to_string(),
                width: 128,
            },
        ])
        .unwrap();

    let mut widths = Vec::new();
    let exit = Worker::<Resize, _>::new(config, |job: Resize| -> Result<(), String> {
        widths.push(job.width);
        Ok(())
    })
    .unwrap()
    .run()
    .unwrap();

    assert_eq!(exit, WorkerExit::Drained { processed: 2 });
    assert_eq!(widths, vec![64, 128]);
}

// ---------------------------------------------------------------------------
// Exclusivity
// ---------------------------------------------------------------------------

#[test]
fn second_worker_loses_the_race_while_first_is_busy() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue.push(["slow", "fast"]).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let first_config = config.clone();
    let first = thread::spawn(move || {
        let mut seen = Vec::new();
        let exit = Worker::<String, _>::new(first_config, |item: String| -> Result<(), String> {
            if item == "slow" {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            }
            seen.push(item);
            Ok(())
        })
        .unwrap()
        .run()
        .unwrap();
        (exit, seen)
    });

    started_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("first worker never started processing");
    assert!(queue.status().unwrap().active);

    // Producers keep working while the marker is held.
    queue.push(["late"]).unwrap();

    let (exit, seen) = drain_recording(&config, None);
    assert_eq!(exit, WorkerExit::LostRace);
    assert!(seen.is_empty());

    release_tx.send(()).unwrap();
    let (exit, seen) = first.join().unwrap();
    assert_eq!(exit, WorkerExit::Drained { processed: 3 });
    assert_eq!(seen, vec!["slow", "fast", "late"]);
    assert!(!queue.status().unwrap().active);
}

#[test]
fn concurrent_workers_process_each_item_once() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    let items: Vec<String> = (0..20).map(|i| format!("item-{i}")).collect();
    queue.push(&items).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let config = config.clone();
            thread::spawn(move || drain_recording(&config, None))
        })
        .collect();
    let results: Vec<(WorkerExit, Vec<String>)> =
        workers.into_iter().map(|w| w.join().unwrap()).collect();

    // A late worker may claim an already drained queue, but no two workers
    // ever process the same item.
    let mut all: Vec<String> = results.iter().flat_map(|(_, seen)| seen.clone()).collect();
    assert_eq!(all.len(), items.len());
    all.sort();
    let mut expected = items.clone();
    expected.sort();
    assert_eq!(all, expected);

    let active: Vec<_> = results
        .iter()
        .filter(|(exit, _)| exit.processed() > 0)
        .collect();
    assert_eq!(active.len(), 1, "exactly one worker drained the backlog");
    assert_eq!(active[0].1, items);
}

#[test]
fn worker_stops_when_its_marker_is_removed() {
    let (dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue.push(["A", "B", "C"]).unwrap();

    let db = dir.path().join("queue.db");
    let mut seen = Vec::new();
    let exit = Worker::<String, _>::new(config.clone(), |item: String| -> lowq::Result<()> {
        if item == "A" {
            // An operator clears the marker while the worker is busy.
            let operator = Storage::open(&db, RetryPolicy::default())?;
            operator.release_all()?;
            operator.close()?;
        }
        seen.push(item);
        Ok(())
    })
    .unwrap()
    .run()
    .unwrap();

    assert_eq!(exit, WorkerExit::MarkerLost { processed: 1 });
    assert_eq!(seen, vec!["A"]);
    assert_eq!(pending(&queue), vec!["B", "C"]);

    // The next worker claims a fresh marker and finishes the backlog.
    let (exit, seen) = drain_recording(&config, None);
    assert_eq!(exit, WorkerExit::Drained { processed: 2 });
    assert_eq!(seen, vec!["B", "C"]);
}

// ---------------------------------------------------------------------------
// Wakeups
// ---------------------------------------------------------------------------

#[test]
fn push_after_idle_release_is_drained_by_next_start() {
    let (_dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue.push(["A"]).unwrap();
    drain_recording(&config, None);

    queue.push(["B"]).unwrap();
    let status = queue.status().unwrap();
    assert!(!status.active, "new work must not be stranded behind a marker");
    assert_eq!(status.pending, 1);

    let (exit, seen) = drain_recording(&config, None);
    assert_eq!(exit, WorkerExit::Drained { processed: 1 });
    assert_eq!(seen, vec!["B"]);
}

#[test]
fn idle_release_refuses_while_work_is_pending() {
    let (dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue.push(["A"]).unwrap();

    let storage = Storage::open(dir.path().join("queue.db"), config.retry).unwrap();
    storage.ensure_status().unwrap();
    storage.claim_active().unwrap();

    // An enqueue landed before the idle check: the marker must stay.
    assert!(!storage.release_if_idle().unwrap());
    assert!(queue.status().unwrap().active);
}

#[test]
fn stale_marker_blocks_new_workers() {
    // A worker that died without releasing leaves its marker behind; new
    // workers back off until an operator clears it.
    let (dir, config) = scratch();
    let queue = TaskQueue::new(config.clone()).unwrap();
    queue.push(["A"]).unwrap();

    let storage = Storage::open(dir.path().join("queue.db"), config.retry).unwrap();
    storage.ensure_status().unwrap();
    storage.claim_active().unwrap();

    let (exit, _) = drain_recording(&config, None);
    assert_eq!(exit, WorkerExit::LostRace);

    storage.release_all().unwrap();
    let (exit, seen) = drain_recording(&config, None);
    assert_eq!(exit, WorkerExit::Drained { processed: 1 });
    assert_eq!(seen, vec!["A"]);
}

// ---------------------------------------------------------------------------
// Existing databases
// ---------------------------------------------------------------------------

#[test]
fn database_with_plain_text_schema_is_shared() {
    // Tables as created by other writers of the same on-disk layout: no
    // `id` column, TEXT payloads, rows addressed by rowid.
    let (dir, config) = scratch();
    let conn = rusqlite::Connection::open(dir.path().join("queue.db")).unwrap();
    conn.execute_batch(
        r#"CREATE TABLE backlog (work text UNIQUE);
           CREATE TABLE status (active int UNIQUE);
           INSERT INTO backlog (work) VALUES ('"a"'), ('"b"');"#,
    )
    .unwrap();
    conn.close().unwrap();

    let queue = TaskQueue::new(config.clone()).unwrap();
    let report = queue.push(["a", "c"]).unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.duplicates, 1);

    let (exit, seen) = drain_recording(&config, None);
    assert_eq!(exit, WorkerExit::Drained { processed: 3 });
    assert_eq!(seen, vec!["a", "b", "c"]);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn empty_path_is_a_configuration_error() {
    let result = TaskQueue::new(QueueConfig::new(""));
    assert!(matches!(result, Err(lowq::Error::Config(_))));

    let worker = Worker::<String, _>::new(QueueConfig::new(""), |_: String| -> Result<(), String> {
        Ok(())
    });
    assert!(matches!(worker, Err(lowq::Error::Config(_))));
}

#[test]
fn worker_command_carries_the_config() {
    let (_dir, config) = scratch();
    let config = config.codec(CodecKind::Bincode);
    let queue = TaskQueue::new(config.clone()).unwrap();

    let command = queue.worker_command().unwrap();
    assert_eq!(command.args(), &[std::ffi::OsString::from("worker")]);
    assert_eq!(command.get_env("LOWQ_DB"), Some(config.path.as_os_str()));
    assert_eq!(
        command.get_env("LOWQ_CODEC"),
        Some(std::ffi::OsStr::new("bincode"))
    );
    assert_eq!(
        command.get_env("LOWQ_MAX_RETRIES"),
        Some(std::ffi::OsStr::new("20"))
    );
    assert_eq!(
        command.get_env("LOWQ_WORKER"),
        Some(std::ffi::OsStr::new("1"))
    );
}
