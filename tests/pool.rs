//! End-to-end pool behavior: admission, steering, queueing, cancellation,
//! crash recovery, transfer semantics, and observability.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use poolvisor::{
    Buffer, Config, EventKind, ModuleFn, ModuleRegistry, Movable, Payload, Pool, PoolError,
    QueueCap, Submission, TaskError,
};

/// Registry with the modules the scenarios below exercise.
fn test_registry() -> Arc<ModuleRegistry> {
    let registry = Arc::new(ModuleRegistry::new());

    registry.register(
        "double",
        ModuleFn::arc(|payload: Payload, _ctx| {
            let n = payload
                .as_int()
                .ok_or_else(|| TaskError::failed("expected int"))?;
            Ok(Payload::Int(n * 2))
        }),
    );

    // Sleeps for the given number of milliseconds, in cancellation-aware
    // slices.
    registry.register(
        "sleepy",
        ModuleFn::arc(|payload: Payload, ctx| {
            let ms = payload.as_int().unwrap_or(50).max(0) as u64;
            let mut slept = 0;
            while slept < ms {
                if ctx.is_cancelled() {
                    return Err(TaskError::Canceled);
                }
                let slice = (ms - slept).min(10);
                std::thread::sleep(Duration::from_millis(slice));
                slept += slice;
            }
            Ok(payload)
        }),
    );

    registry.register(
        "block-until-cancel",
        ModuleFn::arc(|_payload: Payload, ctx| loop {
            if ctx.is_cancelled() {
                return Err(TaskError::Canceled);
            }
            std::thread::sleep(Duration::from_millis(5));
        }),
    );

    registry.register(
        "panic",
        ModuleFn::arc(|_payload: Payload, _ctx| -> Result<Payload, TaskError> {
            panic!("boom in module");
        }),
    );

    registry.register("echo", ModuleFn::arc(|payload: Payload, _ctx| Ok(payload)));

    registry
}

fn config(min: usize, max: usize) -> Config {
    Config {
        min_threads: min,
        max_threads: max,
        ..Config::default()
    }
}

/// Drains everything currently buffered on an event receiver.
fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<poolvisor::Event>) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev.kind);
    }
    kinds
}

#[tokio::test(flavor = "multi_thread")]
async fn double_task_end_to_end() {
    let mut cfg = config(1, 1);
    cfg.module_name = Some("double".to_string());
    let pool = Pool::new(cfg, test_registry()).unwrap();

    let result = pool.run(Payload::Int(2)).await.unwrap();
    assert_eq!(result.as_int(), Some(4));

    assert_eq!(pool.completed(), 1);
    assert!(pool.run_time().count >= 1);
    assert!(pool.wait_time().count >= 1);

    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn saturated_pool_queues_then_drains() {
    let mut cfg = config(2, 2);
    cfg.module_name = Some("sleepy".to_string());
    let pool = Arc::new(Pool::new(cfg, test_registry()).unwrap());
    let mut events = pool.events();

    let futures: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run(Payload::Int(300)).await })
        })
        .collect();

    // Two dispatch directly, two queue behind them.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.queue_size(), 2);

    for fut in futures {
        assert!(fut.await.unwrap().is_ok());
    }
    assert_eq!(pool.completed(), 4);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let kinds = drain_events(&mut events);
    assert!(
        kinds.iter().any(|k| *k == EventKind::Drain),
        "expected a drain event, got {kinds:?}"
    );

    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_queue_rejects_when_busy() {
    let mut cfg = config(1, 1);
    cfg.module_name = Some("sleepy".to_string());
    cfg.max_queue = QueueCap::Bounded(0);
    let pool = Arc::new(Pool::new(cfg, test_registry()).unwrap());

    let long = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run(Payload::Int(500)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = pool.run(Payload::Int(1)).await.unwrap_err();
    assert!(matches!(err, PoolError::NoQueueAvailable));

    assert!(long.await.unwrap().is_ok());
    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn bounded_queue_overflow_rejects_the_last() {
    let mut cfg = config(1, 1);
    cfg.module_name = Some("sleepy".to_string());
    cfg.max_queue = QueueCap::Bounded(1);
    let pool = Arc::new(Pool::new(cfg, test_registry()).unwrap());

    let first = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run(Payload::Int(400)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run(Payload::Int(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = pool.run(Payload::Int(1)).await.unwrap_err();
    assert!(matches!(err, PoolError::QueueAtLimit));

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_queue_admits_max_threads_squared() {
    let mut cfg = config(4, 4);
    cfg.module_name = Some("sleepy".to_string());
    cfg.max_queue = QueueCap::Auto;
    let pool = Arc::new(Pool::new(cfg, test_registry()).unwrap());

    // 4 occupy the workers, 16 fill the queue.
    let submissions: Vec<_> = (0..20)
        .map(|_| {
            let pool = Arc::clone(&pool);
            async move { pool.run(Payload::Int(500)).await }
        })
        .collect();
    let all = tokio::spawn(join_all(submissions));
    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = pool.run(Payload::Int(1)).await.unwrap_err();
    assert!(matches!(err, PoolError::QueueAtLimit));

    for res in all.await.unwrap() {
        assert!(res.is_ok());
    }
    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_of_queued_task_preserves_order() {
    let log = Arc::new(Mutex::new(Vec::<i64>::new()));
    let registry = test_registry();
    {
        let log = Arc::clone(&log);
        registry.register(
            "record",
            ModuleFn::arc(move |payload: Payload, _ctx| {
                std::thread::sleep(Duration::from_millis(50));
                log.lock().unwrap().push(payload.as_int().unwrap_or(-1));
                Ok(payload)
            }),
        );
    }

    let mut cfg = config(1, 1);
    cfg.module_name = Some("record".to_string());
    let pool = Arc::new(Pool::new(cfg, registry).unwrap());

    let abort = CancellationToken::new();
    let mut tasks = Vec::new();
    for n in 1..=4i64 {
        let pool = Arc::clone(&pool);
        let submission = if n == 3 {
            Submission::new(Payload::Int(n)).abort(abort.clone())
        } else {
            Submission::new(Payload::Int(n))
        };
        tasks.push(tokio::spawn(async move { pool.submit(submission).await }));
        // Keep submission order deterministic.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Task 3 is still queued (task 1 occupies the only worker): remove it.
    abort.cancel();

    let results = join_all(tasks).await;
    assert!(results[0].as_ref().unwrap().is_ok());
    assert!(results[1].as_ref().unwrap().is_ok());
    assert!(matches!(
        results[2].as_ref().unwrap(),
        Err(PoolError::Aborted)
    ));
    assert!(results[3].as_ref().unwrap().is_ok());

    assert_eq!(*log.lock().unwrap(), vec![1, 2, 4]);
    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_of_dispatched_task_tears_down_and_replenishes() {
    let mut cfg = config(1, 1);
    cfg.module_name = Some("block-until-cancel".to_string());
    let pool = Arc::new(Pool::new(cfg, test_registry()).unwrap());
    let mut events = pool.events();

    let abort = CancellationToken::new();
    let submission = Submission::new(Payload::Null).abort(abort.clone());
    let pending = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.submit(submission).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    abort.cancel();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Aborted));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.threads(), 1, "pool replenished to min_threads");

    let kinds = drain_events(&mut events);
    assert!(kinds.contains(&EventKind::TaskAborted));
    assert!(
        !kinds.contains(&EventKind::WorkerError),
        "abort must not surface a stray worker error, got {kinds:?}"
    );

    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_crash_forwards_error_and_replenishes() {
    let mut cfg = config(1, 1);
    cfg.module_name = Some("double".to_string());
    let pool = Pool::new(cfg, test_registry()).unwrap();

    let err = pool
        .submit(Submission::new(Payload::Null).module("panic"))
        .await
        .unwrap_err();
    match err {
        PoolError::WorkerCrashed { reason } => assert!(reason.contains("boom")),
        other => panic!("expected WorkerCrashed, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.threads(), 1, "pool replenished after crash");

    // The replacement worker serves new work.
    let result = pool.run(Payload::Int(5)).await.unwrap();
    assert_eq!(result.as_int(), Some(10));

    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn moved_buffer_detaches_and_round_trips() {
    let mut cfg = config(1, 1);
    cfg.module_name = Some("echo".to_string());
    let pool = Pool::new(cfg, test_registry()).unwrap();

    let buffer = Buffer::new(10);
    let movable = Movable::new(Payload::Buffer(buffer.clone())).unwrap();
    let result = pool.submit(Submission::moved(movable)).await.unwrap();

    assert_eq!(buffer.len(), 0, "controller-side buffer is detached");
    assert!(buffer.is_detached());
    let returned = result.as_buffer().expect("result is a buffer");
    assert_eq!(returned.len(), 10);

    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn fifo_order_through_a_single_worker() {
    let log = Arc::new(Mutex::new(Vec::<i64>::new()));
    let registry = test_registry();
    {
        let log = Arc::clone(&log);
        registry.register(
            "record",
            ModuleFn::arc(move |payload: Payload, _ctx| {
                std::thread::sleep(Duration::from_millis(20));
                log.lock().unwrap().push(payload.as_int().unwrap_or(-1));
                Ok(payload)
            }),
        );
    }

    let mut cfg = config(1, 1);
    cfg.module_name = Some("record".to_string());
    let pool = Arc::new(Pool::new(cfg, registry).unwrap());

    let submissions: Vec<_> = (1..=5i64)
        .map(|n| {
            let pool = Arc::clone(&pool);
            async move { pool.run(Payload::Int(n)).await }
        })
        .collect();
    for res in join_all(submissions).await {
        assert!(res.is_ok());
    }

    assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn steady_idle_pool_holds_min_threads() {
    let mut cfg = config(2, 4);
    cfg.module_name = Some("double".to_string());
    let pool = Pool::new(cfg, test_registry()).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.threads(), 2);

    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_timeout_retires_supernumerary_workers() {
    let mut cfg = config(1, 2);
    cfg.module_name = Some("sleepy".to_string());
    cfg.idle_timeout = Duration::from_millis(50);
    let pool = Arc::new(Pool::new(cfg, test_registry()).unwrap());

    // Two overlapping tasks force a second worker.
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run(Payload::Int(200)).await })
        })
        .collect();
    for t in tasks {
        assert!(t.await.unwrap().is_ok());
    }
    assert_eq!(pool.threads(), 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.threads(), 1, "idle worker retired down to min_threads");

    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn module_not_provided_is_rejected() {
    let pool = Pool::new(config(1, 1), test_registry()).unwrap();
    let err = pool.run(Payload::Int(1)).await.unwrap_err();
    assert!(matches!(err, PoolError::ModuleNotProvided));
    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_config_rejects_construction() {
    let cfg = config(4, 2);
    let err = Pool::new(cfg, test_registry()).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn fast_path_disabled_still_completes_work() {
    let mut cfg = config(2, 2);
    cfg.module_name = Some("double".to_string());
    cfg.use_atomics = false;
    let pool = Arc::new(Pool::new(cfg, test_registry()).unwrap());

    let submissions: Vec<_> = (0..10i64)
        .map(|n| {
            let pool = Arc::clone(&pool);
            async move { pool.run(Payload::Int(n)).await }
        })
        .collect();
    for (n, res) in join_all(submissions).await.into_iter().enumerate() {
        assert_eq!(res.unwrap().as_int(), Some(n as i64 * 2));
    }

    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_after_completion_is_a_no_op() {
    let mut cfg = config(1, 1);
    cfg.module_name = Some("double".to_string());
    let pool = Pool::new(cfg, test_registry()).unwrap();

    let abort = CancellationToken::new();
    let result = pool
        .submit(Submission::new(Payload::Int(3)).abort(abort.clone()))
        .await
        .unwrap();
    assert_eq!(result.as_int(), Some(6));

    // The subscription was released on completion; this must not disturb the
    // pool.
    abort.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let again = pool.run(Payload::Int(4)).await.unwrap();
    assert_eq!(again.as_int(), Some(8));

    pool.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn destroy_fails_queued_work_and_resolves() {
    let mut cfg = config(1, 1);
    cfg.module_name = Some("sleepy".to_string());
    let pool = Arc::new(Pool::new(cfg, test_registry()).unwrap());

    let running = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run(Payload::Int(100)).await })
    };
    let queued = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run(Payload::Int(100)).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    pool.destroy().await.unwrap();

    let queued_res = queued.await.unwrap();
    assert!(matches!(queued_res, Err(PoolError::WorkerTerminated)));
    // The in-flight task was torn down with its worker.
    assert!(matches!(
        running.await.unwrap(),
        Err(PoolError::WorkerTerminated)
    ));

    // The pool no longer accepts work.
    let err = pool.run(Payload::Int(1)).await.unwrap_err();
    assert!(matches!(err, PoolError::Closed));
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_failure_latches_instead_of_flapping() {
    let mut cfg = config(1, 2);
    cfg.module_name = Some("no-such-module".to_string());
    let pool = Pool::new(cfg, test_registry()).unwrap();
    let mut events = pool.events();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.threads(), 0, "doomed workers are not replaced");

    let kinds = drain_events(&mut events);
    assert!(
        kinds.contains(&EventKind::WorkerError),
        "bootstrap failure surfaces on the bus, got {kinds:?}"
    );
    // One spawn during the fill, no endless replacements.
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == EventKind::WorkerSpawned)
            .count(),
        1
    );

    pool.destroy().await.unwrap();
}
