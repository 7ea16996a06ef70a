//! Fetch seam between documents and the outside world.
//!
//! A [`Transport`] performs one request and reports its progress through a
//! [`TransportSink`]. Reports are delivered as [`TransportMessage`]s over an
//! unbounded channel to whoever owns the documents; each message carries the
//! [`Ticket`] of the request that produced it, so the receiver can discard
//! reports that belong to an aborted or superseded load.

mod http;
mod memory;

pub use http::{DEFAULT_USER_AGENT, HttpTransport};
pub use memory::MemoryTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

/// Identifies one load of one document.
///
/// `generation` is bumped every time the document starts a new load or is
/// aborted; a report whose generation no longer matches is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub document: usize,
    pub generation: u64,
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub method: reqwest::Method,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    /// Serve from and store into the response cache.
    pub cache: bool,
}

impl FetchRequest {
    /// A plain `GET` with the given timeout and cache flag.
    pub fn get(url: Url, timeout: Duration, cache: bool) -> Self {
        Self {
            url,
            method: reqwest::Method::GET,
            headers: Vec::new(),
            timeout,
            cache,
        }
    }
}

/// Response metadata delivered before the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub content_type: Option<String>,
}

/// Progress report for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Headers(ResponseMeta),
    Complete { status: u16, body: String },
    Timeout,
    Failed(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub ticket: Ticket,
    pub event: TransportEvent,
}

/// Reporting handle given to a [`Transport`] for one request.
#[derive(Debug, Clone)]
pub struct TransportSink {
    ticket: Ticket,
    tx: UnboundedSender<TransportMessage>,
}

impl TransportSink {
    pub fn new(ticket: Ticket, tx: UnboundedSender<TransportMessage>) -> Self {
        Self { ticket, tx }
    }

    pub const fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn headers(&self, meta: ResponseMeta) {
        self.send(TransportEvent::Headers(meta));
    }

    pub fn complete(&self, status: u16, body: String) {
        self.send(TransportEvent::Complete { status, body });
    }

    pub fn timeout(&self) {
        self.send(TransportEvent::Timeout);
    }

    pub fn failed(&self, error: TransportError) {
        self.send(TransportEvent::Failed(error));
    }

    fn send(&self, event: TransportEvent) {
        let message = TransportMessage {
            ticket: self.ticket,
            event,
        };
        if self.tx.send(message).is_err() {
            tracing::debug!(ticket = ?self.ticket, "transport report dropped: receiver closed");
        }
    }
}

/// Performs fetches on behalf of documents.
///
/// Implementations must report exactly one terminal event (`complete`,
/// `timeout` or `failed`) per request, optionally preceded by `headers`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: FetchRequest, sink: TransportSink);
}
