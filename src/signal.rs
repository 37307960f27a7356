//! Signal/slot dispatch.
//!
//! This module provides a type-safe signal/slot mechanism for inter-object
//! communication. Signals are emitted by owners when their state changes;
//! connected handlers are invoked in response, either inline or on the
//! receiver's own execution context.
//!
//! # Key Types
//!
//! - [`Signal<Args>`] — the emission point
//! - [`ConnectionId`] — returned by `connect`, used to `disconnect`
//! - [`ConnectionMode`] — Direct, Queued, or Auto
//! - [`ConnectionGuard`] — RAII handle that disconnects on drop
//!
//! # Example
//!
//! ```
//! use tsignal::Signal;
//!
//! let text_changed = Signal::<String>::new();
//!
//! let id = text_changed.connect(|text| {
//!     println!("text changed to: {text}");
//! });
//!
//! text_changed.emit("hello".to_string());
//! text_changed.disconnect(id);
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use slotmap::SlotMap;

pub use crate::connection::{ConnectionId, ConnectionMode};
use crate::connection::{ConnectionRecord, Handler, ReceiverRef};
use crate::execution::{ExecutionContext, PinnedFuture};
use crate::logging::targets;
use crate::{tsignal_debug, tsignal_error, tsignal_info, tsignal_trace, tsignal_warn};

struct SignalState<Args> {
    records: SlotMap<ConnectionId, ConnectionRecord<Args>>,
    /// Insertion order, kept separately because `SlotMap` iteration order is
    /// not guaranteed to match insertion order.
    order: Vec<ConnectionId>,
}

impl<Args> SignalState<Args> {
    fn new() -> Self {
        Self {
            records: SlotMap::with_key(),
            order: Vec::new(),
        }
    }

    fn insert(&mut self, record: ConnectionRecord<Args>) -> ConnectionId {
        let id = self.records.insert(record);
        self.order.push(id);
        id
    }

    fn remove(&mut self, id: ConnectionId) -> bool {
        let removed = self.records.remove(id).is_some();
        if removed {
            self.order.retain(|existing| *existing != id);
        }
        removed
    }
}

/// A type-safe signal with zero or more connected handlers.
///
/// `Args` is the fixed argument payload delivered to every handler connected
/// to this signal; use `()` for signals with no data and a tuple for several
/// values.
///
/// `Signal<Args>` is `Send + Sync` and is designed to be emitted from any
/// thread concurrently; [`ConnectionMode`] governs whether a given handler
/// runs inline or is handed off to its owner's execution context.
pub struct Signal<Args> {
    state: Mutex<SignalState<Args>>,
}

impl<Args: Clone + Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// Create a new signal with no connections.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SignalState::new()),
        }
    }

    /// Connect a free-standing synchronous handler with [`ConnectionMode::Auto`].
    ///
    /// Duplicate connects are allowed and are not deduplicated: connecting
    /// the same closure twice delivers to it twice per emit.
    pub fn connect<F>(&self, handler: F) -> ConnectionId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        self.connect_with_mode(handler, ConnectionMode::Auto)
    }

    /// Connect a free-standing synchronous handler with an explicit mode.
    pub fn connect_with_mode<F>(&self, handler: F, mode: ConnectionMode) -> ConnectionId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        self.insert_record(ReceiverRef::None, Handler::Sync(Arc::new(handler)), mode, false)
    }

    /// Connect a free-standing handler that produces a future, with
    /// [`ConnectionMode::Auto`].
    ///
    /// Under `Auto`, a coroutine-producing handler always resolves to
    /// queued delivery, since running it to completion would otherwise
    /// require blocking the emitting thread.
    pub fn connect_async<F, Fut>(&self, handler: F) -> ConnectionId
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.connect_async_with_mode(handler, ConnectionMode::Auto)
    }

    /// Connect a free-standing async handler with an explicit mode.
    pub fn connect_async_with_mode<F, Fut>(&self, handler: F, mode: ConnectionMode) -> ConnectionId
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Arc<dyn Fn(Args) -> PinnedFuture + Send + Sync> =
            Arc::new(move |args| Box::pin(handler(args)));
        self.insert_record(ReceiverRef::None, Handler::Async(boxed), mode, false)
    }

    /// Connect a handler bound to a receiver object, keeping it alive for as
    /// long as the connection exists.
    pub fn connect_receiver<T, F>(&self, receiver: &Arc<T>, handler: F) -> ConnectionId
    where
        T: Send + Sync + 'static,
        F: Fn(&Arc<T>, Args) + Send + Sync + 'static,
    {
        let strong: Arc<dyn Any + Send + Sync> = receiver.clone();
        let bound = receiver.clone();
        let wrapped = move |args: Args| handler(&bound, args);
        self.insert_record(
            ReceiverRef::Strong(strong),
            Handler::Sync(Arc::new(wrapped)),
            ConnectionMode::Auto,
            false,
        )
    }

    /// Connect a handler bound to a receiver held only weakly: once the
    /// receiver is dropped, the connection is pruned lazily (on the next
    /// emit or cleanup pass) and the handler never runs again.
    pub fn connect_receiver_weak<T, F>(&self, receiver: &Arc<T>, handler: F) -> ConnectionId
    where
        T: Send + Sync + 'static,
        F: Fn(&Arc<T>, Args) + Send + Sync + 'static,
    {
        self.connect_receiver_weak_impl(receiver, handler, false)
    }

    /// Connect a handler bound to a receiver held only weakly that also runs
    /// at most once: it fires on the first emit after connecting (provided
    /// the receiver is still alive), then is removed, exactly like
    /// `connect_once` but without keeping the receiver alive.
    pub fn connect_receiver_weak_once<T, F>(&self, receiver: &Arc<T>, handler: F) -> ConnectionId
    where
        T: Send + Sync + 'static,
        F: Fn(&Arc<T>, Args) + Send + Sync + 'static,
    {
        self.connect_receiver_weak_impl(receiver, handler, true)
    }

    fn connect_receiver_weak_impl<T, F>(
        &self,
        receiver: &Arc<T>,
        handler: F,
        one_shot: bool,
    ) -> ConnectionId
    where
        T: Send + Sync + 'static,
        F: Fn(&Arc<T>, Args) + Send + Sync + 'static,
    {
        let strong: Arc<dyn Any + Send + Sync> = receiver.clone();
        let weak_any = Arc::downgrade(&strong);
        let weak_typed = Arc::downgrade(receiver);
        let wrapped = move |args: Args| {
            if let Some(recv) = weak_typed.upgrade() {
                handler(&recv, args);
            }
        };
        self.insert_record(
            ReceiverRef::Weak(weak_any),
            Handler::Sync(Arc::new(wrapped)),
            ConnectionMode::Auto,
            one_shot,
        )
    }

    /// Connect a one-shot free-standing handler: it runs at most once, then
    /// is removed automatically.
    pub fn connect_once<F>(&self, handler: F) -> ConnectionId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        self.insert_record(
            ReceiverRef::None,
            Handler::Sync(Arc::new(handler)),
            ConnectionMode::Auto,
            true,
        )
    }

    fn insert_record(
        &self,
        receiver: ReceiverRef,
        handler: Handler<Args>,
        mode: ConnectionMode,
        one_shot: bool,
    ) -> ConnectionId {
        let mut state = self.state.lock();
        let is_duplicate = !matches!(receiver, ReceiverRef::None)
            && state.order.iter().any(|id| {
                state
                    .records
                    .get(*id)
                    .is_some_and(|existing| existing.receiver.same_identity(&receiver))
            });
        if is_duplicate {
            tsignal_warn!(
                target: targets::SIGNAL,
                "duplicate connect: receiver already has a connection on this signal"
            );
        }

        let record = ConnectionRecord {
            receiver,
            handler,
            mode,
            one_shot,
            target_context: ExecutionContext::current(),
        };
        let id = state.insert(record);
        let total = state.order.len();
        drop(state);
        tsignal_info!(target: targets::SIGNAL, connection = ?id, total_connections = total, "connected");
        id
    }

    /// Disconnect one connection by id. Returns the number removed (0 or 1).
    ///
    /// Never affects an invocation that was already posted before this call
    /// returns; in-flight queued deliveries complete.
    pub fn disconnect(&self, id: ConnectionId) -> usize {
        let mut state = self.state.lock();
        let removed = state.remove(id);
        let total = state.order.len();
        drop(state);
        let count = usize::from(removed);
        tsignal_info!(target: targets::SIGNAL, removed = count, total_connections = total, "disconnect");
        count
    }

    /// Disconnect every connection whose receiver is `receiver`. Returns the
    /// count removed.
    pub fn disconnect_receiver<T>(&self, receiver: &Arc<T>) -> usize
    where
        T: Send + Sync + 'static,
    {
        let any: Arc<dyn Any + Send + Sync> = receiver.clone();
        let mut state = self.state.lock();
        let matching: Vec<ConnectionId> = state
            .order
            .iter()
            .copied()
            .filter(|id| {
                state
                    .records
                    .get(*id)
                    .is_some_and(|record| record.receiver.points_at(&any))
            })
            .collect();
        for id in &matching {
            state.remove(*id);
        }
        let count = matching.len();
        let total = state.order.len();
        drop(state);
        tsignal_info!(target: targets::SIGNAL, removed = count, total_connections = total, "disconnect_receiver");
        count
    }

    /// Disconnect every connection. Returns the count removed.
    pub fn disconnect_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.order.len();
        state.records.clear();
        state.order.clear();
        drop(state);
        tsignal_info!(target: targets::SIGNAL, removed = count, total_connections = 0, "disconnect_all");
        count
    }

    /// Number of currently live connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().order.len()
    }

    /// Emit the signal, dispatching to every connected handler.
    ///
    /// Dispatch follows a snapshot of the connection list taken at the start
    /// of this call: connects/disconnects made concurrently, including ones
    /// made from inside a handler this emit invokes, do not affect this
    /// emit, only subsequent ones.
    #[tracing::instrument(skip_all, target = "tsignal::signal", level = "trace")]
    pub fn emit(&self, args: Args) {
        let snapshot: Vec<(ConnectionId, ConnectionRecord<Args>)> = {
            let state = self.state.lock();
            state
                .order
                .iter()
                .filter_map(|id| state.records.get(*id).map(|record| (*id, record.clone())))
                .collect()
        };
        tsignal_trace!(target: targets::SIGNAL, connection_count = snapshot.len(), "emitting");

        let emitter_thread = std::thread::current().id();
        let mut to_remove = Vec::new();

        for (id, record) in snapshot {
            if !record.receiver.is_alive() {
                tsignal_debug!(target: targets::SIGNAL, connection = ?id, "receiver gone, pruning");
                to_remove.push(id);
                continue;
            }

            let direct = resolve_direct(&record, emitter_thread);
            tsignal_debug!(
                target: targets::DISPATCH,
                connection = ?id,
                mode = ?record.mode,
                dispatch = if direct { "direct" } else { "queued" },
                "dispatch decision"
            );
            let delivered = if direct {
                dispatch_direct(&record, args.clone())
            } else {
                dispatch_queued(&record, args.clone())
            };

            if delivered && record.one_shot {
                to_remove.push(id);
            }
        }

        if !to_remove.is_empty() {
            let mut state = self.state.lock();
            for id in to_remove {
                state.remove(id);
            }
        }
    }
}

// Signal is Send + Sync when Args is Send: the only interior state is the
// Mutex-guarded SlotMap of connection records.
unsafe impl<Args: Send> Send for Signal<Args> {}
unsafe impl<Args: Send> Sync for Signal<Args> {}

fn resolve_direct<Args>(record: &ConnectionRecord<Args>, emitter_thread: std::thread::ThreadId) -> bool {
    match record.mode {
        ConnectionMode::Direct => true,
        ConnectionMode::Queued => false,
        ConnectionMode::Auto => {
            if record.is_async() {
                false
            } else if !record.target_context.is_bound() {
                true
            } else {
                record.target_context.thread_id() == emitter_thread
            }
        }
    }
}

fn dispatch_direct<Args: Send + 'static>(record: &ConnectionRecord<Args>, args: Args) -> bool {
    match &record.handler {
        Handler::Sync(f) => {
            let f = f.clone();
            invoke_catching(move || f(args));
        }
        Handler::Async(f) => {
            let f = f.clone();
            futures::executor::block_on(guarded_async(f, args));
        }
    }
    true
}

fn dispatch_queued<Args: Send + 'static>(record: &ConnectionRecord<Args>, args: Args) -> bool {
    let Some(handle) = record.target_context.loop_handle() else {
        tsignal_error!(target: targets::DISPATCH, "queued delivery has no bound loop, dropping");
        return false;
    };

    match &record.handler {
        Handler::Sync(f) => {
            let f = f.clone();
            match handle.post(move || invoke_catching(move || f(args))) {
                Ok(()) => true,
                Err(_) => {
                    tsignal_warn!(target: targets::DISPATCH, "post to stopped loop, dropping delivery");
                    false
                }
            }
        }
        Handler::Async(f) => {
            let f = f.clone();
            match handle.schedule_coroutine(guarded_async(f, args)) {
                Ok(()) => true,
                Err(_) => {
                    tsignal_warn!(target: targets::DISPATCH, "schedule to stopped loop, dropping delivery");
                    false
                }
            }
        }
    }
}

fn guarded_async<Args: Send + 'static>(
    handler: Arc<dyn Fn(Args) -> PinnedFuture + Send + Sync>,
    args: Args,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let fut = handler(args);
        if let Err(payload) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            tsignal_error!(target: targets::DISPATCH, error = %panic_message(&payload), "async handler panicked");
        }
    }
}

fn invoke_catching(f: impl FnOnce() + Send) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        tsignal_error!(target: targets::DISPATCH, error = %panic_message(&payload), "handler panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// An RAII connection handle that disconnects from its signal when dropped.
///
/// Holds a strong reference to the signal (via `Arc`) for the lifetime of
/// the connection, so there is no dangling-pointer concern on drop.
pub struct ConnectionGuard<Args: Clone + Send + 'static> {
    signal: Arc<Signal<Args>>,
    id: ConnectionId,
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// Connect a handler, returning a guard that disconnects it automatically
    /// when dropped, instead of a bare [`ConnectionId`].
    ///
    /// Requires the signal to be held in an `Arc` so the guard can keep it
    /// alive.
    pub fn connect_scoped<F>(self: &Arc<Self>, handler: F) -> ConnectionGuard<Args>
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        let id = self.connect(handler);
        ConnectionGuard {
            signal: self.clone(),
            id,
        }
    }
}

impl<Args: Clone + Send + 'static> Drop for ConnectionGuard<Args> {
    fn drop(&mut self) {
        self.signal.disconnect(self.id);
    }
}
