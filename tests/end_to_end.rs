//! Integration tests covering cross-thread signal delivery and worker
//! lifecycle end to end.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use tsignal::worker::{Worker, WorkerBuilder};
use tsignal::{ConnectionMode, Signal};

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while !predicate() {
        if start.elapsed() > timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

#[test]
fn cross_thread_sync_handler_runs_on_receiver_thread() {
    let signal: Arc<Signal<i32>> = Arc::new(Signal::new());
    let received_thread: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));
    let received_value = Arc::new(AtomicUsize::new(0));

    let worker_signal = signal.clone();
    let thread_slot = received_thread.clone();
    let value_slot = received_value.clone();
    let worker: Worker<()> = WorkerBuilder::new(move |stop, ()| {
        let signal = worker_signal;
        let thread_slot = thread_slot;
        let value_slot = value_slot;
        async move {
            signal.connect(move |value: i32| {
                *thread_slot.lock().unwrap() = Some(std::thread::current().id());
                value_slot.store(value as usize, Ordering::SeqCst);
            });
            stop.wait().await;
        }
    })
    .name("cross-thread-sync")
    .build();

    worker.start(()).unwrap();
    // Give the loop a moment to register the connection before emitting.
    std::thread::sleep(Duration::from_millis(30));

    signal.emit(42);

    assert!(wait_until(
        || received_value.load(Ordering::SeqCst) == 42,
        Duration::from_secs(1)
    ));

    worker.stop().unwrap();
}

#[test]
fn cross_thread_async_handler_runs_on_receiver_thread() {
    let signal: Arc<Signal<i32>> = Arc::new(Signal::new());
    let received_thread: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));
    let received_value = Arc::new(AtomicUsize::new(0));

    let worker_signal = signal.clone();
    let thread_slot = received_thread.clone();
    let value_slot = received_value.clone();
    let worker: Worker<()> = WorkerBuilder::new(move |stop, ()| {
        let signal = worker_signal;
        async move {
            signal.connect_async(move |value: i32| {
                let thread_slot = thread_slot.clone();
                let value_slot = value_slot.clone();
                async move {
                    *thread_slot.lock().unwrap() = Some(std::thread::current().id());
                    value_slot.store(value as usize, Ordering::SeqCst);
                }
            });
            stop.wait().await;
        }
    })
    .name("cross-thread-async")
    .build();

    worker.start(()).unwrap();
    std::thread::sleep(Duration::from_millis(30));

    signal.emit(42);

    assert!(wait_until(
        || received_value.load(Ordering::SeqCst) == 42,
        Duration::from_secs(1)
    ));
    assert!(received_thread.lock().unwrap().is_some());

    worker.stop().unwrap();
}

#[test]
fn weak_connection_cleans_up_after_receiver_drops() {
    let signal = Signal::<i32>::new();
    let receiver = Arc::new(AtomicUsize::new(0));

    let id = signal.connect_receiver_weak(&receiver, |r, v| {
        r.fetch_add(v as usize, Ordering::SeqCst);
    });
    let _ = id;

    signal.emit(1);
    assert_eq!(receiver.load(Ordering::SeqCst), 1);

    signal.emit(1);
    assert_eq!(receiver.load(Ordering::SeqCst), 2);
    assert_eq!(signal.connection_count(), 1);

    drop(receiver);
    signal.emit(1);
    assert_eq!(signal.connection_count(), 0);
}

/// SPEC_FULL.md §8 scenario 3: `weak=true, one_shot=true`. The handler runs
/// on the first emit, not on the second, and once the receiver is dropped a
/// third emit neither crashes nor runs the handler.
#[test]
fn weak_and_one_shot_combination_fires_once_then_prunes_on_drop() {
    let signal = Signal::<i32>::new();
    let receiver = Arc::new(AtomicUsize::new(0));

    signal.connect_receiver_weak_once(&receiver, |r, v| {
        r.fetch_add(v as usize, Ordering::SeqCst);
    });

    signal.emit(1);
    assert_eq!(receiver.load(Ordering::SeqCst), 1);
    assert_eq!(signal.connection_count(), 0);

    // Already removed after its one delivery; a second emit is a no-op for it.
    signal.emit(1);
    assert_eq!(receiver.load(Ordering::SeqCst), 1);

    drop(receiver);
    signal.emit(1);
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn disconnect_does_not_cancel_an_already_posted_delivery() {
    let signal: Arc<Signal<i32>> = Arc::new(Signal::new());
    let received = Arc::new(AtomicUsize::new(0));

    let worker_signal = signal.clone();
    let received_clone = received.clone();
    let connection_id = Arc::new(Mutex::new(None));
    let connection_id_out = connection_id.clone();
    let worker: Worker<()> = WorkerBuilder::new(move |stop, ()| {
        let signal = worker_signal;
        async move {
            let id = signal.connect_with_mode(
                move |v: i32| {
                    std::thread::sleep(Duration::from_millis(20));
                    received_clone.fetch_add(v as usize, Ordering::SeqCst);
                },
                ConnectionMode::Queued,
            );
            *connection_id_out.lock().unwrap() = Some(id);
            stop.wait().await;
        }
    })
    .name("disconnect-race")
    .build();

    worker.start(()).unwrap();
    assert!(wait_until(
        || connection_id.lock().unwrap().is_some(),
        Duration::from_secs(1)
    ));

    signal.emit(5);
    // Disconnect immediately; the already-queued delivery must still run.
    let id = connection_id.lock().unwrap().take().unwrap();
    signal.disconnect(id);

    assert!(wait_until(
        || received.load(Ordering::SeqCst) == 5,
        Duration::from_secs(1)
    ));

    // A second emit after disconnect delivers nothing further.
    signal.emit(5);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(received.load(Ordering::SeqCst), 5);

    worker.stop().unwrap();
}

#[test]
fn handler_panic_is_isolated_from_other_connections() {
    let signal = Signal::<()>::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let o1 = order.clone();
    signal.connect(move |_| o1.lock().unwrap().push("first"));
    signal.connect(|_| panic!("deliberate failure"));
    let o3 = order.clone();
    signal.connect(move |_| o3.lock().unwrap().push("third"));

    signal.emit(());

    assert_eq!(*order.lock().unwrap(), vec!["first", "third"]);

    order.lock().unwrap().clear();
    signal.emit(());
    assert_eq!(*order.lock().unwrap(), vec!["first", "third"]);
}

#[test]
fn worker_lifecycle_start_queue_stop() {
    let started = Arc::new(AtomicBool::new(false));
    let started_clone = started.clone();
    let worker: Worker<usize> = WorkerBuilder::new(move |stop, thread_count| async move {
        assert_eq!(thread_count, 4);
        started_clone.store(true, Ordering::SeqCst);
        stop.wait().await;
    })
    .name("lifecycle-worker")
    .build();

    worker.start(4).unwrap();
    assert!(wait_until(|| started.load(Ordering::SeqCst), Duration::from_secs(1)));

    let task_done = Arc::new(AtomicBool::new(false));
    let task_done_clone = task_done.clone();
    worker
        .queue_task(async move {
            task_done_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

    worker.stop().unwrap();

    assert!(task_done.load(Ordering::SeqCst));
    assert!(worker.queue_task(async {}).is_err());
}

/// A panicking task must be logged and isolated, not take the worker thread
/// down with it — later tasks on the same worker still run, and `stop`
/// still joins cleanly.
#[test]
fn queue_task_panic_does_not_kill_the_worker() {
    let worker: Worker<()> = Worker::new(|stop, ()| async move {
        stop.wait().await;
    });
    worker.start(()).unwrap();

    worker.queue_task(async { panic!("deliberate task failure") }).unwrap();

    let after_done = Arc::new(AtomicBool::new(false));
    let after_done_clone = after_done.clone();
    worker
        .queue_task(async move {
            after_done_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

    assert!(wait_until(|| after_done.load(Ordering::SeqCst), Duration::from_secs(1)));
    worker.stop().unwrap();
}

/// Dropping a `Worker` without calling `stop()` must not leak its thread.
#[test]
fn dropping_a_worker_without_stop_still_joins_the_thread() {
    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = ran.clone();
    let worker: Worker<()> = Worker::new(move |stop, ()| async move {
        ran_clone.store(true, Ordering::SeqCst);
        stop.wait().await;
    });
    worker.start(()).unwrap();
    assert!(wait_until(|| ran.load(Ordering::SeqCst), Duration::from_secs(1)));

    drop(worker);
    // If `drop` leaked the thread, there is nothing further to assert from
    // here, but the `Drop` impl blocks on `join()`, so reaching this point
    // at all means the thread already came down.
}

/// Exercises the crate's `tracing` integration end to end with a real
/// subscriber installed, the way an embedding application would, covering
/// the `TSIGNAL_DEBUG`-gated debug/trace call sites as well as the
/// always-on info/warn/error ones.
#[test]
fn logging_runs_under_a_real_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();

    tsignal::logging::set_debug(true);

    let signal = Signal::<i32>::new();
    let receiver = Arc::new(AtomicUsize::new(0));
    signal.connect_receiver(&receiver, |r, v| {
        r.fetch_add(v as usize, Ordering::SeqCst);
    });
    // Same receiver connected twice: exercises the duplicate-connect warning.
    signal.connect_receiver(&receiver, |r, v| {
        r.fetch_add(v as usize, Ordering::SeqCst);
    });

    signal.emit(3);
    assert_eq!(receiver.load(Ordering::SeqCst), 6);
    assert_eq!(signal.disconnect_receiver(&receiver), 2);

    tsignal::logging::set_debug(false);
}
