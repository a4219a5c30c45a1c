use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use fileops_core::{ErrorCode, Handle, Operation, RunAs, ServiceConfig, ServiceEvent};
use fileops_service::{FileOperationsService, ServiceError};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn config(workers: usize) -> ServiceConfig {
    ServiceConfig::builder()
        .workers(workers)
        .linger_ms(60_000u64)
        .build()
        .unwrap()
}

/// Collect the events of `handle` up to and including `Finished`.
async fn events_for(rx: &mut mpsc::UnboundedReceiver<ServiceEvent>, handle: Handle) -> Vec<ServiceEvent> {
    let mut events = Vec::new();
    loop {
        let event = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        if event.handle() != Some(handle) {
            continue;
        }
        let finished = matches!(event, ServiceEvent::Finished { .. });
        events.push(event);
        if finished {
            return events;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_copy_reports_both_paths() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    fs::create_dir_all(src.join("dir")).unwrap();
    fs::write(src.join("a.txt"), "0123456789").unwrap();
    fs::write(src.join("dir/b.txt"), "b").unwrap();
    let dst = temp.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let service = FileOperationsService::new(config(2)).unwrap();
    let mut rx = service.subscribe();
    let paths = vec![src.join("a.txt"), src.join("dir")];
    let handle = service.copy(paths.clone(), &dst).unwrap();

    let events = events_for(&mut rx, handle).await;
    assert_eq!(
        events,
        vec![
            ServiceEvent::Succeeded { handle, paths },
            ServiceEvent::Finished { handle },
        ]
    );
    assert!(dst.join("a.txt").is_file());
    assert!(dst.join("dir/b.txt").is_file());

    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_request_still_finishes() {
    let service = FileOperationsService::new(config(1)).unwrap();
    let mut rx = service.subscribe();

    let handle = service.delete(vec![PathBuf::from("/tmp/bad\nname")]).unwrap();
    let events = events_for(&mut rx, handle).await;

    assert_eq!(
        events,
        vec![
            ServiceEvent::Failed {
                handle,
                paths: vec![PathBuf::from("/tmp/bad\nname")],
                error: ErrorCode::InvalidRequest,
            },
            ServiceEvent::Finished { handle },
        ]
    );
}

#[tokio::test]
async fn test_cancel_pending_request() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("keep.txt");
    fs::write(&file, "x").unwrap();

    // On the current-thread runtime no worker runs before the test yields.
    let service = FileOperationsService::new(config(1)).unwrap();
    let mut rx = service.subscribe();
    let handle = service.delete(vec![file.clone()]).unwrap();
    service.cancel(handle);

    let events = events_for(&mut rx, handle).await;
    assert_eq!(
        events,
        vec![
            ServiceEvent::Failed {
                handle,
                paths: vec![file.clone()],
                error: ErrorCode::OperationCancelled,
            },
            ServiceEvent::Finished { handle },
        ]
    );
    assert!(file.exists());

    // Cancelling a retired or unknown handle is a no-op.
    service.cancel(handle);
    service.cancel(Handle::new(999));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_worker_completes_in_fifo_order() {
    let temp = TempDir::new().unwrap();
    let service = FileOperationsService::new(config(1)).unwrap();
    let mut rx = service.subscribe();

    let handles: Vec<Handle> = (0..5)
        .map(|i| service.mkdir(format!("dir{i}"), temp.path()).unwrap())
        .collect();
    assert_eq!(handles[0], Handle::new(1));
    assert!(handles.windows(2).all(|w| w[0] < w[1]));

    let mut finished = Vec::new();
    while finished.len() < handles.len() {
        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        if let ServiceEvent::Finished { handle } = event {
            finished.push(handle);
        }
    }
    assert_eq!(finished, handles);
    assert!((0..5).all(|i| temp.path().join(format!("dir{i}")).is_dir()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_handle_finishes_exactly_once() {
    let temp = TempDir::new().unwrap();
    let service = FileOperationsService::new(config(4)).unwrap();
    let mut rx = service.subscribe();

    let mut handles = Vec::new();
    for i in 0..20 {
        let path = temp.path().join(format!("f{i}"));
        fs::write(&path, "x").unwrap();
        handles.push(service.delete(vec![path]).unwrap());
    }
    // Missing paths fail but still finish.
    handles.push(service.delete(vec![temp.path().join("missing")]).unwrap());

    let mut finished = Vec::new();
    while finished.len() < handles.len() {
        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        if let ServiceEvent::Finished { handle } = event {
            finished.push(handle);
        }
    }
    finished.sort();
    assert_eq!(finished, handles);

    // Nothing else arrives for these handles.
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    assert_eq!(service.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_service_expires() {
    let temp = TempDir::new().unwrap();
    let config = ServiceConfig::builder()
        .workers(2usize)
        .linger_ms(100u64)
        .shutdown_grace_ms(10u64)
        .build()
        .unwrap();
    let service = FileOperationsService::new(config).unwrap();
    let mut rx = service.subscribe();

    let handle = service.mkdir("made", temp.path()).unwrap();
    events_for(&mut rx, handle).await;

    timeout(WAIT, service.terminated().cancelled())
        .await
        .expect("service did not expire");

    let mut saw_expired = false;
    while let Ok(event) = rx.try_recv() {
        saw_expired |= event == ServiceEvent::Expired;
    }
    assert!(saw_expired);
    assert_eq!(
        service.mkdir("late", temp.path()),
        Err(ServiceError::ShuttingDown)
    );
}

#[tokio::test]
async fn test_shutdown_finishes_queued_requests() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("keep.txt");
    fs::write(&file, "x").unwrap();

    let service = FileOperationsService::new(config(1)).unwrap();
    let mut rx = service.subscribe();
    let first = service.delete(vec![file.clone()]).unwrap();
    let second = service.mkdir("never", temp.path()).unwrap();
    let terminated = service.terminated();

    service.shutdown().await;

    assert!(terminated.is_cancelled());
    assert!(file.exists());
    assert!(!temp.path().join("never").exists());

    let events = events_for(&mut rx, first).await;
    assert!(matches!(
        events[0],
        ServiceEvent::Failed { error: ErrorCode::OperationCancelled, .. }
    ));
    let events = events_for(&mut rx, second).await;
    assert_eq!(events.last(), Some(&ServiceEvent::Finished { handle: second }));
}

#[tokio::test]
async fn test_queue_full_rejects() {
    let temp = TempDir::new().unwrap();
    let config = ServiceConfig::builder()
        .workers(1usize)
        .queue_capacity(1usize)
        .linger_ms(60_000u64)
        .build()
        .unwrap();
    let service = FileOperationsService::new(config).unwrap();

    // Workers cannot drain the queue before the test yields.
    assert!(service.mkdir("a", temp.path()).is_ok());
    assert_eq!(service.mkdir("b", temp.path()), Err(ServiceError::QueueFull));
    // Rejected handles are not reused.
    assert_eq!(service.mkdir("c", temp.path()), Err(ServiceError::QueueFull));
    assert_eq!(service.outstanding(), 1);
}

#[tokio::test]
async fn test_cancelled_pending_request_frees_queue_slot() {
    let temp = TempDir::new().unwrap();
    let config = ServiceConfig::builder()
        .workers(1usize)
        .queue_capacity(1usize)
        .linger_ms(60_000u64)
        .build()
        .unwrap();
    let service = FileOperationsService::new(config).unwrap();
    let mut rx = service.subscribe();

    let first = service.mkdir("a", temp.path()).unwrap();
    service.cancel(first);
    let second = service.mkdir("b", temp.path()).unwrap();

    let events = events_for(&mut rx, first).await;
    assert!(matches!(
        events[0],
        ServiceEvent::Failed { error: ErrorCode::OperationCancelled, .. }
    ));
    let events = events_for(&mut rx, second).await;
    assert_eq!(
        events,
        vec![
            ServiceEvent::Succeeded {
                handle: second,
                paths: vec![PathBuf::from("b")],
            },
            ServiceEvent::Finished { handle: second },
        ]
    );
    assert!(!temp.path().join("a").exists());
    assert!(temp.path().join("b").is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_subscriber_sees_every_finished() {
    let service = FileOperationsService::new(config(4)).unwrap();
    let mut rx = service.subscribe();

    // Empty paths are rejected, so each request finishes without touching disk.
    let handles: Vec<Handle> = (0..1500)
        .map(|_| service.delete(vec![PathBuf::new()]).unwrap())
        .collect();

    timeout(WAIT, async {
        while service.outstanding() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("requests did not retire");

    let mut finished = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ServiceEvent::Finished { handle } = event {
            finished.push(handle);
        }
    }
    finished.sort();
    assert_eq!(finished, handles);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_running_request_keeps_completed_paths() {
    let temp = TempDir::new().unwrap();
    let first = temp.path().join("first.txt");
    fs::write(&first, "x").unwrap();
    let tree = temp.path().join("tree");
    for d in 0..50 {
        let dir = tree.join(format!("d{d:03}"));
        fs::create_dir_all(&dir).unwrap();
        for f in 0..100 {
            fs::write(dir.join(format!("f{f:03}")), "x").unwrap();
        }
    }
    let dst = temp.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let service = FileOperationsService::new(config(1)).unwrap();
    let mut rx = service.subscribe();
    let handle = service.copy(vec![first.clone(), tree.clone()], &dst).unwrap();

    // Cancel once the worker is past the first path.
    timeout(WAIT, async {
        while !dst.join("first.txt").exists() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("copy never started");
    service.cancel(handle);

    let events = events_for(&mut rx, handle).await;
    assert_eq!(
        events,
        vec![
            ServiceEvent::Succeeded {
                handle,
                paths: vec![first],
            },
            ServiceEvent::Failed {
                handle,
                paths: vec![tree],
                error: ErrorCode::OperationCancelled,
            },
            ServiceEvent::Finished { handle },
        ]
    );

    // Exactly one Finished for the handle.
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    service.shutdown().await;
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_user_fails_with_user_change_failed() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let file = temp.path().join("file.txt");
    fs::write(&file, "x").unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

    let service = FileOperationsService::new(config(1)).unwrap();
    let mut rx = service.subscribe();
    let handle = service
        .submit(
            Operation::set_permissions(&file, 0o600),
            Some(RunAs::user("fileops-no-such-user-7f3a")),
        )
        .unwrap();

    let events = events_for(&mut rx, handle).await;
    assert_eq!(
        events,
        vec![
            ServiceEvent::Failed {
                handle,
                paths: vec![file.clone()],
                error: ErrorCode::UserChangeFailed,
            },
            ServiceEvent::Finished { handle },
        ]
    );
    let mode = fs::metadata(&file).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644);
}
