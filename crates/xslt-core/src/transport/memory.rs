use super::{FetchRequest, ResponseMeta, Transport, TransportSink};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
enum Route {
    Body {
        status: u16,
        body: String,
        delay: Option<Duration>,
    },
    /// Never answers; reports a timeout once the request's timeout elapses.
    Hang,
    Fail(TransportError),
}

/// In-memory transport serving canned documents.
///
/// Used to drive the assembler deterministically in tests and offline
/// tooling. Unknown URLs answer `404`. A URL registered with
/// [`gated`](Self::gated) is held until [`release`](Self::release) is
/// called, which lets callers control completion order across siblings.
///
/// # Examples
///
/// ```
/// use xslt_core::transport::MemoryTransport;
///
/// let transport = MemoryTransport::new()
///     .with_document("mem:/main.xsl", "<xsl:stylesheet/>")
///     .with_status("mem:/gone.xsl", 410);
///
/// assert_eq!(transport.request_count("mem:/main.xsl"), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryTransport {
    routes: Mutex<HashMap<String, Route>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    requests: Mutex<Vec<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(self, url: &str, route: Route) -> Self {
        locked(&self.routes).insert(url.to_string(), route);
        self
    }

    /// Serves `body` with status 200.
    pub fn with_document(self, url: &str, body: &str) -> Self {
        self.route(
            url,
            Route::Body {
                status: 200,
                body: body.to_string(),
                delay: None,
            },
        )
    }

    /// Answers with `status` and an empty body.
    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.route(
            url,
            Route::Body {
                status,
                body: String::new(),
                delay: None,
            },
        )
    }

    /// Serves `body` after `delay`.
    pub fn with_delay(self, url: &str, body: &str, delay: Duration) -> Self {
        self.route(
            url,
            Route::Body {
                status: 200,
                body: body.to_string(),
                delay: Some(delay),
            },
        )
    }

    /// Never answers `url`; the request times out.
    pub fn with_hang(self, url: &str) -> Self {
        self.route(url, Route::Hang)
    }

    /// Fails `url` with a network error.
    pub fn with_failure(self, url: &str, message: &str) -> Self {
        self.route(url, Route::Fail(TransportError::network(url, message)))
    }

    /// Holds requests for `url` until [`release`](Self::release) is called.
    pub fn gated(self, url: &str) -> Self {
        locked(&self.gates).insert(url.to_string(), Arc::new(Notify::new()));
        self
    }

    /// Lets one held request for `url` proceed. A release issued before the
    /// request arrives is remembered.
    pub fn release(&self, url: &str) {
        if let Some(gate) = locked(&self.gates).get(url) {
            gate.notify_one();
        }
    }

    /// Every URL requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        locked(&self.requests).clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        locked(&self.requests).iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, request: FetchRequest, sink: TransportSink) {
        let url = request.url.to_string();
        locked(&self.requests).push(url.clone());

        let gate = locked(&self.gates).get(&url).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let route = locked(&self.routes).get(&url).cloned();
        match route {
            Some(Route::Body {
                status,
                body,
                delay,
            }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                sink.headers(ResponseMeta {
                    status,
                    content_type: None,
                });
                sink.complete(status, body);
            }
            Some(Route::Hang) => {
                tokio::time::sleep(request.timeout).await;
                sink.timeout();
            }
            Some(Route::Fail(error)) => sink.failed(error),
            None => {
                tracing::debug!(url, "no route registered");
                sink.headers(ResponseMeta {
                    status: 404,
                    content_type: None,
                });
                sink.complete(404, String::new());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Ticket, TransportEvent, TransportMessage};
    use tokio::sync::mpsc;
    use url::Url;

    fn request(url: &str, timeout_ms: u64) -> FetchRequest {
        FetchRequest::get(
            Url::parse(url).unwrap(),
            Duration::from_millis(timeout_ms),
            true,
        )
    }

    fn sink() -> (TransportSink, mpsc::UnboundedReceiver<TransportMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ticket = Ticket {
            document: 0,
            generation: 1,
        };
        (TransportSink::new(ticket, tx), rx)
    }

    fn last_event(rx: &mut mpsc::UnboundedReceiver<TransportMessage>) -> TransportEvent {
        let mut last = None;
        while let Ok(message) = rx.try_recv() {
            last = Some(message.event);
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn test_serves_registered_document() {
        let transport = MemoryTransport::new().with_document("mem:/a.xsl", "<a/>");
        let (sink, mut rx) = sink();
        transport.fetch(request("mem:/a.xsl", 100), sink).await;

        assert_eq!(
            last_event(&mut rx),
            TransportEvent::Complete {
                status: 200,
                body: "<a/>".into()
            }
        );
        assert_eq!(transport.requests(), vec!["mem:/a.xsl".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_url_is_not_found() {
        let transport = MemoryTransport::new();
        let (sink, mut rx) = sink();
        transport.fetch(request("mem:/nope.xsl", 100), sink).await;

        assert!(matches!(
            last_event(&mut rx),
            TransportEvent::Complete { status: 404, .. }
        ));
    }

    #[tokio::test]
    async fn test_hang_reports_timeout() {
        let transport = MemoryTransport::new().with_hang("mem:/slow.xsl");
        let (sink, mut rx) = sink();
        transport.fetch(request("mem:/slow.xsl", 10), sink).await;

        assert_eq!(last_event(&mut rx), TransportEvent::Timeout);
    }

    #[tokio::test]
    async fn test_failure_route() {
        let transport = MemoryTransport::new().with_failure("mem:/x.xsl", "connection reset");
        let (sink, mut rx) = sink();
        transport.fetch(request("mem:/x.xsl", 100), sink).await;

        assert!(matches!(
            last_event(&mut rx),
            TransportEvent::Failed(TransportError::Network { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_before_request_is_remembered() {
        let transport = MemoryTransport::new()
            .with_document("mem:/g.xsl", "<g/>")
            .gated("mem:/g.xsl");
        transport.release("mem:/g.xsl");

        let (sink, mut rx) = sink();
        transport.fetch(request("mem:/g.xsl", 100), sink).await;
        assert!(matches!(
            last_event(&mut rx),
            TransportEvent::Complete { status: 200, .. }
        ));
    }

    #[test]
    fn test_request_count() {
        let transport = MemoryTransport::new().with_document("mem:/a.xsl", "<a/>");
        for _ in 0..2 {
            let (sink, _rx) = sink();
            tokio_test::block_on(transport.fetch(request("mem:/a.xsl", 100), sink));
        }
        assert_eq!(transport.request_count("mem:/a.xsl"), 2);
        assert_eq!(transport.request_count("mem:/b.xsl"), 0);
    }
}
