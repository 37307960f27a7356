//! Execution contexts: the (thread, loop) pairs signal receivers are bound to.
//!
//! An [`ExecutionContext`] is resolved from thread-local state. A thread that
//! has never called [`bind_current_thread`] still has a context — just an
//! unbound one, usable only for direct delivery from that same thread.

use std::cell::RefCell;
use std::fmt;
use std::pin::Pin;
use std::thread::ThreadId;

use crossbeam_channel::Sender;
use futures::future::BoxFuture;

use crate::error::{Result, TSignalError};

/// A unit of work posted to a loop.
pub(crate) enum Job {
    /// Run this closure once, synchronously, on the loop thread.
    Call(Box<dyn FnOnce() + Send>),
    /// Poll this future to completion, interleaved with other loop work.
    Coroutine(BoxFuture<'static, ()>),
    /// Sentinel telling the loop to stop draining its queue.
    Shutdown,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Job::Call(_) => "Call",
            Job::Coroutine(_) => "Coroutine",
            Job::Shutdown => "Shutdown",
        };
        f.debug_tuple("Job").field(&kind).finish()
    }
}

/// A handle to a running cooperative loop, cheap to clone and safe to send
/// across threads.
///
/// This is the concrete "post to loop" primitive the dispatcher needs: every
/// bound [`ExecutionContext`] carries one.
#[derive(Clone)]
pub struct LoopHandle {
    thread_id: ThreadId,
    tx: Sender<Job>,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

impl LoopHandle {
    pub(crate) fn new(thread_id: ThreadId, tx: Sender<Job>) -> Self {
        Self { thread_id, tx }
    }

    /// The OS thread this loop is pinned to.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Post a nullary closure to run on the loop thread.
    ///
    /// Returns immediately; ordering across multiple `post` calls from the
    /// same caller is FIFO on the target loop.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.tx
            .send(Job::Call(Box::new(job)))
            .map_err(|_| TSignalError::PostFault)
    }

    /// Schedule a future to be polled to completion on the loop thread,
    /// interleaved with posted closures and other scheduled futures.
    pub fn schedule_coroutine(
        &self,
        fut: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        self.tx
            .send(Job::Coroutine(Box::pin(fut)))
            .map_err(|_| TSignalError::PostFault)
    }

    pub(crate) fn send_shutdown(&self) -> Result<()> {
        self.tx.send(Job::Shutdown).map_err(|_| TSignalError::PostFault)
    }
}

/// The `(thread, loop)` pair a signal-capable object is bound to.
///
/// Resolved via [`ExecutionContext::current`], which always succeeds:
/// a thread that has not called [`bind_current_thread`] gets an unbound
/// context (`loop_handle: None`), usable only for direct delivery from that
/// same thread.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    thread_id: ThreadId,
    loop_handle: Option<LoopHandle>,
}

impl ExecutionContext {
    /// Resolve the calling thread's execution context.
    pub fn current() -> Self {
        CURRENT_CONTEXT.with(|cell| {
            let borrowed = cell.borrow();
            match borrowed.as_ref() {
                Some(handle) => ExecutionContext {
                    thread_id: handle.thread_id(),
                    loop_handle: Some(handle.clone()),
                },
                None => ExecutionContext {
                    thread_id: std::thread::current().id(),
                    loop_handle: None,
                },
            }
        })
    }

    /// The thread this context is pinned to.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether this context has a live loop to post/schedule onto.
    pub fn is_bound(&self) -> bool {
        self.loop_handle.is_some()
    }

    pub(crate) fn loop_handle(&self) -> Option<&LoopHandle> {
        self.loop_handle.as_ref()
    }
}

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<LoopHandle>> = const { RefCell::new(None) };
}

/// Bind the calling thread to `handle`, so subsequent [`ExecutionContext::current`]
/// calls on this thread resolve to it.
///
/// Called once by [`crate::worker::Worker`] when it brings up its loop. Not
/// normally called by application code directly.
pub fn bind_current_thread(handle: LoopHandle) {
    CURRENT_CONTEXT.with(|cell| {
        *cell.borrow_mut() = Some(handle);
    });
}

/// Unbind the calling thread's execution context, reverting it to unbound.
pub(crate) fn unbind_current_thread() {
    CURRENT_CONTEXT.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Type alias matching the boxed-future shape used across the crate for
/// coroutine-producing handlers and worker `run` futures.
pub type PinnedFuture = Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

static_assertions::assert_impl_all!(LoopHandle: Send, Sync);
static_assertions::assert_impl_all!(ExecutionContext: Send);
