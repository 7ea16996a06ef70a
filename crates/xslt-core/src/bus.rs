//! Typed publish/subscribe with removal-safe dispatch.
//!
//! The [`EventBus`] delivers events of a closed kind enum to listeners in
//! subscription order. Each `publish` call dispatches against a snapshot of
//! the listeners registered when it started, so a listener that asks to be
//! removed neither skips nor double-invokes its neighbours.
//!
//! Listeners steer dispatch through their return value:
//!
//! | [`Flow`] | Effect |
//! |----------|--------|
//! | `Continue` | keep dispatching |
//! | `Halt` | stop dispatching for this publish call only |
//! | `Unsubscribe` | remove this listener, keep dispatching |
//!
//! # Failure escalation
//!
//! An event that carries a failure (see [`BusEvent::failure`]) is never lost:
//! with no active listener for its kind, `publish` returns the error to the
//! publisher; otherwise the error is recorded as [`EventBus::last_failure`]
//! and handed to every listener.

use crate::error::{Result, XsltError};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// An event that can travel over an [`EventBus`].
pub trait BusEvent {
    /// Closed set of event kinds listeners subscribe to.
    type Kind: Copy + Eq + Hash + fmt::Debug;

    fn kind(&self) -> Self::Kind;

    /// The error carried by this event, if it reports a failure.
    fn failure(&self) -> Option<&XsltError> {
        None
    }
}

/// Listener verdict returned after handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
    Unsubscribe,
}

/// Cancellation handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Callback<E> = Box<dyn FnMut(&E) -> Flow + Send>;

struct Listener<E> {
    id: u64,
    callback: Callback<E>,
    /// Remaining invocations; `None` means unlimited.
    remaining: Option<u32>,
}

/// Ordered publish/subscribe bus keyed by event kind.
///
/// # Examples
///
/// ```
/// use xslt_core::bus::{BusEvent, EventBus, Flow};
///
/// #[derive(Debug)]
/// struct Ping;
///
/// impl BusEvent for Ping {
///     type Kind = ();
///     fn kind(&self) {}
/// }
///
/// let mut bus = EventBus::new();
/// bus.subscribe((), |_: &Ping| Flow::Unsubscribe);
///
/// assert_eq!(bus.publish(&Ping).unwrap(), 1);
/// assert_eq!(bus.publish(&Ping).unwrap(), 0);
/// ```
pub struct EventBus<E: BusEvent> {
    listeners: HashMap<E::Kind, Vec<Listener<E>>>,
    next_id: u64,
    last_failure: Option<XsltError>,
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            next_id: 0,
            last_failure: None,
        }
    }

    /// Registers a listener that fires until it unsubscribes itself or is
    /// cancelled through the returned handle.
    pub fn subscribe<F>(&mut self, kind: E::Kind, callback: F) -> Subscription
    where
        F: FnMut(&E) -> Flow + Send + 'static,
    {
        self.register(kind, Box::new(callback), None)
    }

    /// Registers a listener that is removed after `limit` invocations.
    pub fn subscribe_limited<F>(&mut self, kind: E::Kind, limit: u32, callback: F) -> Subscription
    where
        F: FnMut(&E) -> Flow + Send + 'static,
    {
        self.register(kind, Box::new(callback), Some(limit))
    }

    fn register(
        &mut self,
        kind: E::Kind,
        callback: Callback<E>,
        remaining: Option<u32>,
    ) -> Subscription {
        self.next_id += 1;
        let id = self.next_id;
        if remaining == Some(0) {
            return Subscription(id);
        }
        self.listeners.entry(kind).or_default().push(Listener {
            id,
            callback,
            remaining,
        });
        Subscription(id)
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        for listeners in self.listeners.values_mut() {
            if let Some(index) = listeners.iter().position(|l| l.id == subscription.0) {
                listeners.remove(index);
                return true;
            }
        }
        false
    }

    /// Dispatches `event` to every listener of its kind.
    ///
    /// Returns the number of listeners invoked. A failure event published
    /// with no listener for its kind is returned as `Err` instead.
    pub fn publish(&mut self, event: &E) -> Result<usize> {
        let kind = event.kind();

        if let Some(error) = event.failure() {
            if self.listener_count(kind) == 0 {
                tracing::debug!(?kind, "unhandled failure event escalated to publisher");
                return Err(error.clone());
            }
            self.last_failure = Some(error.clone());
        }

        let Some(snapshot) = self.listeners.remove(&kind) else {
            return Ok(0);
        };

        let mut kept = Vec::with_capacity(snapshot.len());
        let mut dispatched = 0;
        let mut halted = false;

        for mut listener in snapshot {
            if halted {
                kept.push(listener);
                continue;
            }

            let flow = (listener.callback)(event);
            dispatched += 1;

            if let Some(remaining) = listener.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
            let exhausted = listener.remaining == Some(0);

            if flow != Flow::Unsubscribe && !exhausted {
                kept.push(listener);
            }
            halted = flow == Flow::Halt;
        }

        if !kept.is_empty() {
            self.listeners.insert(kind, kept);
        }

        Ok(dispatched)
    }

    /// Number of active listeners for `kind`.
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// The most recent failure handed to listeners.
    pub fn last_failure(&self) -> Option<&XsltError> {
        self.last_failure.as_ref()
    }

    /// Drops every listener.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self
            .listeners
            .iter()
            .map(|(kind, listeners)| (*kind, listeners.len()))
            .collect();
        f.debug_struct("EventBus")
            .field("listeners", &counts)
            .field("last_failure", &self.last_failure)
            .finish()
    }
}
