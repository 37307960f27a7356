//! Thread-safe signal/slot dispatch with cooperative event loops and worker
//! threads.
//!
//! This crate provides the foundational pieces of a signal/slot event
//! system:
//!
//! - **Execution Context** ([`execution`]): binds an object to a thread and
//!   a cooperative event loop.
//! - **Signal/Slot System** ([`signal`]): type-safe, thread-aware
//!   publish/subscribe.
//! - **Worker** ([`worker`]): a dedicated-thread event-loop host with a
//!   lifecycle and a task queue.
//!
//! # Signal/Slot Example
//!
//! ```
//! use tsignal::Signal;
//!
//! let value_changed = Signal::<i32>::new();
//!
//! let conn_id = value_changed.connect(|value| {
//!     println!("value changed to: {value}");
//! });
//!
//! value_changed.emit(42);
//! value_changed.disconnect(conn_id);
//! ```
//!
//! # Cross-thread delivery
//!
//! Connections made from a [`worker::Worker`]'s thread are automatically
//! queued back onto it when the signal is emitted from elsewhere, under the
//! default [`ConnectionMode::Auto`]:
//!
//! ```no_run
//! use tsignal::Signal;
//! use tsignal::worker::{Worker, WorkerBuilder};
//! use std::sync::Arc;
//!
//! let signal: Arc<Signal<i32>> = Arc::new(Signal::new());
//! let worker: Worker<Arc<Signal<i32>>> = WorkerBuilder::new(|stop, signal| async move {
//!     signal.connect(|v| println!("received on worker thread: {v}"));
//!     stop.wait().await;
//! })
//! .build();
//!
//! worker.start(signal.clone()).unwrap();
//! signal.emit(7); // queued onto the worker's loop
//! worker.stop().unwrap();
//! ```
//!
//! # Worker Example
//!
//! ```
//! use tsignal::worker::{Worker, WorkerBuilder};
//!
//! let worker: Worker<()> = WorkerBuilder::new(|stop, ()| async move {
//!     println!("worker loop running");
//!     stop.wait().await;
//!     println!("worker loop stopping");
//! })
//! .name("example-worker")
//! .build();
//!
//! worker.start(()).unwrap();
//! worker.stop().unwrap();
//! ```

mod connection;
pub mod error;
pub mod execution;
pub mod logging;
pub mod signal;
pub mod worker;

pub use error::{Result, TSignalError};
pub use execution::{ExecutionContext, LoopHandle};
pub use logging::PerfSpan;
pub use signal::{ConnectionGuard, ConnectionId, ConnectionMode, Signal};
pub use worker::{StopHandle, Worker, WorkerBuilder, WorkerConfig, WorkerLifecycle};
