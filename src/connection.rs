//! Connection records: the bookkeeping a [`crate::signal::Signal`] keeps per
//! connected handler.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use slotmap::new_key_type;

use crate::execution::{ExecutionContext, PinnedFuture};

new_key_type! {
    /// A unique identifier for a signal-handler connection.
    ///
    /// Returned by [`crate::signal::Signal::connect`] and friends; pass it to
    /// [`crate::signal::Signal::disconnect`] to remove that one connection.
    pub struct ConnectionId;
}

/// How a connected handler should be invoked when the signal is emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Invoke the handler immediately in the emitting thread.
    Direct,
    /// Always post the invocation to the receiver's execution context, even
    /// if that happens to be the emitting thread.
    Queued,
    /// Resolve to `Direct` or `Queued` at emit time based on handler kind and
    /// thread affinity. The default.
    #[default]
    Auto,
}

/// What a connection holds onto, if anything, to keep a receiving object
/// reachable (or not).
pub(crate) enum ReceiverRef {
    /// The connection keeps the receiver alive.
    Strong(Arc<dyn Any + Send + Sync>),
    /// The connection does not keep the receiver alive; dispatch checks
    /// [`Weak::upgrade`] each time and drops the connection once it fails.
    Weak(Weak<dyn Any + Send + Sync>),
    /// A free callable with no associated receiver object.
    None,
}

impl ReceiverRef {
    /// Whether the referent (if any) is still alive. Free callables are
    /// always considered alive.
    pub(crate) fn is_alive(&self) -> bool {
        match self {
            ReceiverRef::Strong(_) => true,
            ReceiverRef::Weak(weak) => weak.upgrade().is_some(),
            ReceiverRef::None => true,
        }
    }

    /// Identity-compares this receiver against `other`, used by
    /// `disconnect_receiver`.
    pub(crate) fn points_at(&self, other: &Arc<dyn Any + Send + Sync>) -> bool {
        match self {
            ReceiverRef::Strong(arc) => Arc::ptr_eq(arc, other),
            ReceiverRef::Weak(weak) => weak
                .upgrade()
                .is_some_and(|upgraded| Arc::ptr_eq(&upgraded, other)),
            ReceiverRef::None => false,
        }
    }

    /// Identity-compares this receiver against `other`. Two `None` receivers
    /// (free callables) never compare equal, since a fresh closure has no
    /// stable identity to detect a duplicate connect against.
    pub(crate) fn same_identity(&self, other: &ReceiverRef) -> bool {
        let resolve = |r: &ReceiverRef| match r {
            ReceiverRef::Strong(arc) => Some(arc.clone()),
            ReceiverRef::Weak(weak) => weak.upgrade(),
            ReceiverRef::None => None,
        };
        match (resolve(self), resolve(other)) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        }
    }
}

/// A handler bound to a connection: either an ordinary synchronous callable
/// or one that produces a future to be scheduled on the receiver's loop.
pub(crate) enum Handler<Args> {
    Sync(Arc<dyn Fn(Args) + Send + Sync>),
    Async(Arc<dyn Fn(Args) -> PinnedFuture + Send + Sync>),
}

impl<Args> Clone for Handler<Args> {
    fn clone(&self) -> Self {
        match self {
            Handler::Sync(f) => Handler::Sync(f.clone()),
            Handler::Async(f) => Handler::Async(f.clone()),
        }
    }
}

impl<Args> fmt::Debug for Handler<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Sync(_) => f.write_str("Handler::Sync(..)"),
            Handler::Async(_) => f.write_str("Handler::Async(..)"),
        }
    }
}

/// One entry in a signal's connection list.
pub(crate) struct ConnectionRecord<Args> {
    pub(crate) receiver: ReceiverRef,
    pub(crate) handler: Handler<Args>,
    pub(crate) mode: ConnectionMode,
    pub(crate) one_shot: bool,
    /// The execution context captured at connect time. Used as the queued
    /// delivery target. An unbound context (`target_context.is_bound() ==
    /// false`) means the connecting thread had no loop running, so only
    /// direct delivery (from that same thread) applies; a queued dispatch
    /// against it fails with `NoLoop`.
    pub(crate) target_context: ExecutionContext,
}

impl<Args> ConnectionRecord<Args> {
    pub(crate) fn is_async(&self) -> bool {
        matches!(self.handler, Handler::Async(_))
    }
}

impl<Args> Clone for ConnectionRecord<Args> {
    fn clone(&self) -> Self {
        let receiver = match &self.receiver {
            ReceiverRef::Strong(a) => ReceiverRef::Strong(a.clone()),
            ReceiverRef::Weak(w) => ReceiverRef::Weak(w.clone()),
            ReceiverRef::None => ReceiverRef::None,
        };
        Self {
            receiver,
            handler: self.handler.clone(),
            mode: self.mode,
            one_shot: self.one_shot,
            target_context: self.target_context.clone(),
        }
    }
}
