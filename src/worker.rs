//! Dedicated-thread cooperative event-loop host.
//!
//! A [`Worker`] owns a private OS thread running a single-threaded
//! cooperative loop: a [`futures::executor::LocalPool`] draining a queue of
//! posted closures and scheduled futures, alongside a user-supplied `run`
//! future that is expected to await the worker's [`StopHandle`].
//!
//! # Example
//!
//! ```no_run
//! use tsignal::worker::{Worker, WorkerBuilder};
//!
//! let worker: Worker<u32> = WorkerBuilder::new(|stop, threads| async move {
//!     println!("starting with {threads} threads");
//!     stop.wait().await;
//!     println!("stopping");
//! })
//! .name("demo-worker")
//! .build();
//!
//! worker.start(4).unwrap();
//! worker.stop().unwrap();
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use event_listener::Event;
use futures::FutureExt;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use parking_lot::Mutex;

use crate::error::{Result, TSignalError};
use crate::execution::{Job, LoopHandle, PinnedFuture, bind_current_thread, unbind_current_thread};
use crate::logging::targets;
use crate::{tsignal_error, tsignal_info, tsignal_warn};

/// How often the worker's main loop wakes up when its job queue is idle, to
/// give the `LocalPool` a chance to make progress on `run`'s own timers and
/// wakeups.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A cooperative stop signal a worker's `run` future is expected to await.
///
/// Cloning is cheap; all clones observe the same underlying signal.
#[derive(Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    event: Arc<Event>,
}

impl StopHandle {
    fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            event: Arc::new(Event::new()),
        }
    }

    /// Whether `stop` has already been requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Wait until `stop` is requested.
    ///
    /// Safe to call before or after the stop signal fires: checks the flag,
    /// then registers for notification, then checks again, so a stop
    /// requested between the two checks is never missed.
    pub async fn wait(&self) {
        if self.is_stopped() {
            return;
        }
        let listener = self.event.listen();
        if self.is_stopped() {
            return;
        }
        listener.await;
    }

    fn signal(&self) {
        self.stopped.store(true, Ordering::Release);
        self.event.notify(usize::MAX);
    }
}

/// The state of a [`Worker`]'s lifecycle.
///
/// ```text
/// Created --start--> Starting --(loop ready)--> Running --stop--> Stopping --(drained)--> Stopped
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerLifecycle {
    /// Built but never started.
    Created,
    /// `start` is bringing the thread and loop up.
    Starting,
    /// The loop is live and `run` has been scheduled.
    Running,
    /// `stop` has been requested; draining outstanding work.
    Stopping,
    /// The thread has joined.
    Stopped,
}

/// Configuration for a [`Worker`]'s thread.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name given to the worker's OS thread.
    pub name: String,
    /// Stack size for the worker thread, in bytes. `None` uses the platform
    /// default.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "tsignal-worker".to_string(),
            stack_size: None,
        }
    }
}

type RunFn<Args> = dyn FnOnce(StopHandle, Args) -> PinnedFuture + Send;

/// Builds a [`Worker`] from a configuration and a `run` future factory.
pub struct WorkerBuilder<Args> {
    config: WorkerConfig,
    run: Box<RunFn<Args>>,
}

impl<Args: Send + 'static> WorkerBuilder<Args> {
    /// Start building a worker whose thread will drive `run` to completion.
    ///
    /// `run` is handed a [`StopHandle`] it must await to know when to wind
    /// down, plus the arguments later passed to [`Worker::start`].
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: FnOnce(StopHandle, Args) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            config: WorkerConfig::default(),
            run: Box::new(move |stop, args| Box::pin(run(stop, args))),
        }
    }

    /// Override the worker thread's name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Override the worker thread's stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Finish building. The worker starts in [`WorkerLifecycle::Created`].
    pub fn build(self) -> Worker<Args> {
        Worker {
            config: self.config,
            run: Mutex::new(Some(self.run)),
            state: Mutex::new(WorkerLifecycle::Created),
            thread: Mutex::new(None),
            loop_handle: Mutex::new(None),
            stop_handle: Mutex::new(None),
        }
    }
}

/// A dedicated-thread cooperative event-loop host with a lifecycle and a
/// task queue.
pub struct Worker<Args> {
    config: WorkerConfig,
    run: Mutex<Option<Box<RunFn<Args>>>>,
    state: Mutex<WorkerLifecycle>,
    thread: Mutex<Option<JoinHandle<()>>>,
    loop_handle: Mutex<Option<LoopHandle>>,
    stop_handle: Mutex<Option<StopHandle>>,
}

impl<Args: Send + 'static> Worker<Args> {
    /// Build a worker with default configuration. Equivalent to
    /// `WorkerBuilder::new(run).build()`.
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: FnOnce(StopHandle, Args) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        WorkerBuilder::new(run).build()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerLifecycle {
        *self.state.lock()
    }

    /// Bring the worker's thread and loop up, and schedule `run(stop, args)`
    /// on it.
    ///
    /// Blocks until the loop is live and `run` has been scheduled, so that
    /// [`Worker::queue_task`] and signal connections made immediately after
    /// `start` returns see a valid execution context.
    pub fn start(&self, args: Args) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                WorkerLifecycle::Created => *state = WorkerLifecycle::Starting,
                other => {
                    return Err(TSignalError::LifecycleError(format!(
                        "cannot start worker from state {other:?}"
                    )));
                }
            }
        }

        let run = self
            .run
            .lock()
            .take()
            .ok_or_else(|| TSignalError::LifecycleError("worker already started once".into()))?;

        let (job_tx, job_rx) = unbounded::<Job>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<LoopHandle>(1);
        let stop_handle = StopHandle::new();

        let mut builder = thread::Builder::new().name(self.config.name.clone());
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_stop_handle = stop_handle.clone();
        let thread_job_tx = job_tx.clone();
        let spawn_result = builder.spawn(move || {
            let loop_handle = LoopHandle::new(thread::current().id(), thread_job_tx);
            bind_current_thread(loop_handle.clone());

            let mut pool = LocalPool::new();
            let spawner = pool.spawner();
            let run_future = run(thread_stop_handle, args);
            if spawner.spawn_local(run_future).is_err() {
                tsignal_error!(target: targets::WORKER, "failed to schedule worker run future");
            }

            if ready_tx.send(loop_handle).is_err() {
                tsignal_warn!(target: targets::WORKER, "start() no longer waiting for loop readiness");
            }

            run_loop(&job_rx, &mut pool);
            unbind_current_thread();
        });

        let join_handle = match spawn_result {
            Ok(handle) => handle,
            Err(e) => {
                *self.state.lock() = WorkerLifecycle::Created;
                return Err(TSignalError::LifecycleError(format!(
                    "failed to spawn worker thread: {e}"
                )));
            }
        };

        let loop_handle = ready_rx
            .recv()
            .map_err(|_| TSignalError::LifecycleError("worker thread exited before starting".into()))?;

        *self.thread.lock() = Some(join_handle);
        *self.loop_handle.lock() = Some(loop_handle);
        *self.stop_handle.lock() = Some(stop_handle);
        *self.state.lock() = WorkerLifecycle::Running;

        tsignal_info!(target: targets::WORKER, name = %self.config.name, "worker started");
        Ok(())
    }

    /// Enqueue a future to run to completion on the worker's loop,
    /// interleaved with (but never overlapping) other queued tasks.
    pub fn queue_task(&self, task: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let loop_handle = self.loop_handle.lock().clone();
        match loop_handle {
            Some(handle) => handle.schedule_coroutine(task),
            None => Err(TSignalError::PostFault),
        }
    }

    /// Request the worker to stop, and block until its thread has joined.
    ///
    /// A no-op if the worker was never started or has already stopped;
    /// idempotent if called more than once while stopping is in progress.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                WorkerLifecycle::Created | WorkerLifecycle::Stopped => return Ok(()),
                WorkerLifecycle::Stopping => return Ok(()),
                WorkerLifecycle::Running | WorkerLifecycle::Starting => {
                    *state = WorkerLifecycle::Stopping;
                }
            }
        }

        if let Some(stop_handle) = self.stop_handle.lock().as_ref() {
            stop_handle.signal();
        }
        if let Some(loop_handle) = self.loop_handle.lock().as_ref() {
            let _ = loop_handle.send_shutdown();
        }

        if let Some(join_handle) = self.thread.lock().take()
            && join_handle.join().is_err()
        {
            tsignal_error!(target: targets::WORKER, "worker thread panicked");
        }

        *self.state.lock() = WorkerLifecycle::Stopped;
        tsignal_info!(target: targets::WORKER, name = %self.config.name, "worker stopped");
        Ok(())
    }
}

impl<Args: Send + 'static> Drop for Worker<Args> {
    /// Request shutdown and join the worker thread if it is still running,
    /// so a dropped `Worker` never leaks its background thread.
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run_loop(rx: &Receiver<Job>, pool: &mut LocalPool) {
    loop {
        match rx.recv_timeout(IDLE_POLL_INTERVAL) {
            Ok(Job::Call(f)) => run_job_catching(f),
            Ok(Job::Coroutine(fut)) => run_task_catching(fut),
            Ok(Job::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        pool.run_until_stalled();
    }

    // Drain whatever was posted right before shutdown, then let `run` and
    // any still-pending futures settle before the thread exits.
    while let Ok(job) = rx.try_recv() {
        match job {
            Job::Call(f) => run_job_catching(f),
            Job::Coroutine(fut) => run_task_catching(fut),
            Job::Shutdown => break,
        }
    }
    pool.run_until_stalled();
}

/// Run a posted closure, catching a panic the same way
/// `signal::invoke_catching` guards direct/queued signal handlers, so a
/// single bad job never unwinds out of the worker thread.
fn run_job_catching(f: Box<dyn FnOnce() + Send>) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        tsignal_error!(target: targets::WORKER, "worker task panicked");
    }
}

/// Run a queued coroutine to completion, catching a panic the same way
/// `signal::guarded_async` guards queued async signal handlers.
fn run_task_catching(fut: PinnedFuture) {
    let guarded = async move {
        if std::panic::AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            tsignal_error!(target: targets::WORKER, "worker task panicked");
        }
    };
    futures::executor::block_on(guarded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn worker_runs_and_stops() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let worker: Worker<()> = Worker::new(move |stop, ()| async move {
            ran_clone.store(true, Ordering::SeqCst);
            stop.wait().await;
        });

        worker.start(()).unwrap();
        assert_eq!(worker.state(), WorkerLifecycle::Running);
        worker.stop().unwrap();
        assert_eq!(worker.state(), WorkerLifecycle::Stopped);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn starting_twice_is_a_lifecycle_error() {
        let worker: Worker<()> = Worker::new(|stop, ()| async move {
            stop.wait().await;
        });
        worker.start(()).unwrap();
        let second = worker.start(());
        assert!(matches!(second, Err(TSignalError::LifecycleError(_))));
        worker.stop().unwrap();
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let worker: Worker<()> = Worker::new(|stop, ()| async move {
            stop.wait().await;
        });
        worker.stop().unwrap();
        assert_eq!(worker.state(), WorkerLifecycle::Created);
    }

    #[test]
    fn queue_task_runs_on_worker_thread() {
        let worker: Worker<()> = Worker::new(|stop, ()| async move {
            stop.wait().await;
        });
        worker.start(()).unwrap();

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        worker
            .queue_task(async move {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        // Give the loop a moment to drain the task before stopping.
        std::thread::sleep(Duration::from_millis(50));
        worker.stop().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_task_after_stop_fails() {
        let worker: Worker<()> = Worker::new(|stop, ()| async move {
            stop.wait().await;
        });
        worker.start(()).unwrap();
        worker.stop().unwrap();

        let result = worker.queue_task(async {});
        assert!(result.is_err());
    }
}
