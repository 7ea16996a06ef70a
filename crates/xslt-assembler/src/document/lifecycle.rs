use super::{Document, ReadyState};
use crate::event::DocumentEvent;
use std::time::Instant;
use url::Url;
use xslt_core::error::{Result, StateError, TransportError, XsltError};
use xslt_core::transport::{ResponseMeta, Ticket};

impl Document {
    /// Moves to `state` and publishes the change.
    pub(crate) fn transition(&mut self, state: ReadyState) -> Result<()> {
        tracing::trace!(document = %self.id, from = %self.state, to = %state, "state change");
        self.state = state;
        self.events.publish(&DocumentEvent::StateChange {
            document: self.id,
            state,
        })?;
        Ok(())
    }

    /// Rejects a new load or parse while one is already running.
    pub(crate) fn check_idle(&self, operation: &'static str) -> Result<()> {
        if self.state.is_in_flight() {
            return Err(StateError::LoadInFlight { operation }.into());
        }
        Ok(())
    }

    /// Clears content from a previous load and invalidates its ticket.
    fn reset(&mut self) {
        self.generation += 1;
        self.tree = None;
        self.source = None;
        self.status = None;
        self.loading_started_at = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Starts a new load of `url` and returns the ticket the transport
    /// reports must carry.
    pub(crate) fn begin_load(&mut self, url: Url) -> Result<Ticket> {
        self.check_idle("load")?;
        self.reset();
        tracing::debug!(document = %self.id, url = %url, "loading");
        self.url = Some(url);
        self.loading_started_at = Some(Instant::now());
        self.transition(ReadyState::Initialized)?;
        Ok(self.ticket())
    }

    /// Replaces the content with caller-supplied source text. The document
    /// walks `Initialized` and `Loading` like a fetched one, so the parse
    /// outcome always lands in a fresh terminal state.
    pub(crate) fn begin_parse(&mut self, text: &str) -> Result<()> {
        self.check_idle("parse")?;
        self.reset();
        self.transition(ReadyState::Initialized)?;
        self.source = Some(text.to_string());
        self.transition(ReadyState::Loading)
    }

    pub(crate) const fn ticket(&self) -> Ticket {
        Ticket {
            document: self.id.index(),
            generation: self.generation,
        }
    }

    /// Whether a transport report for `ticket` belongs to the current load.
    pub(crate) fn accepts(&self, ticket: Ticket) -> bool {
        ticket.generation == self.generation && self.state.is_in_flight()
    }

    pub(crate) fn on_headers(&mut self, meta: &ResponseMeta) -> Result<()> {
        self.status = Some(meta.status);
        if self.state == ReadyState::Initialized {
            self.transition(ReadyState::HeadersReceived)?;
        }
        Ok(())
    }

    pub(crate) fn on_body(&mut self, body: String) -> Result<()> {
        self.task = None;
        self.source = Some(body);
        self.transition(ReadyState::Loading)
    }

    /// Cancels the running load and returns to `Uninitialized`.
    pub(crate) fn abort(&mut self) -> Result<()> {
        if !self.state.is_in_flight() {
            return Err(StateError::NotLoading.into());
        }
        let stale = TransportError::Stale {
            url: self.location(),
        };
        tracing::debug!(document = %self.id, error = %stale, "aborted; later reports are discarded");
        self.reset();
        self.transition(ReadyState::Uninitialized)
    }

    /// Records `error`, moves to `Error` and publishes it.
    ///
    /// A document that already reached a terminal state keeps it; the error
    /// is only logged. With no `Error` listener attached the error is
    /// returned to the caller.
    pub(crate) fn fail(&mut self, error: XsltError) -> Result<()> {
        if self.state.is_terminal() {
            tracing::debug!(document = %self.id, state = %self.state, error = %error, "error after terminal state ignored");
            return Ok(());
        }
        tracing::debug!(document = %self.id, error = %error, "document failed");
        self.task = None;
        self.loading_started_at = None;
        self.errors.push(error.clone());
        self.transition(ReadyState::Error)?;
        self.events.publish(&DocumentEvent::Error {
            document: self.id,
            error,
        })?;
        Ok(())
    }

    /// Moves to `Complete` and publishes `complete`.
    pub(crate) fn complete(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if let Some(started) = self.loading_started_at.take() {
            tracing::debug!(document = %self.id, elapsed_ms = started.elapsed().as_millis() as u64, "loaded");
        }
        self.transition(ReadyState::Complete)?;
        self.events.publish(&DocumentEvent::Complete { document: self.id })?;
        Ok(())
    }
}
