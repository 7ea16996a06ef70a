//! Owner of every document and driver of transport reports.
//!
//! The [`Assembler`] is single-threaded and cooperative: transport requests
//! run as tokio tasks and report back over one channel, and
//! [`run`](Assembler::run) / [`step`](Assembler::step) handle each report to
//! completion before taking the next. Documents are addressed by
//! [`DocumentId`]; the assembler never hands out mutable references to them.

mod engine;

use crate::config::{AssemblerConfig, DocumentConfig};
use crate::document::{Busy, Document, DocumentId, ReadyState, Resource, Stylesheet, normalize_whitespace};
use crate::event::{DocumentEvent, EventKind};
use crate::resolve::{Dependency, Notice};
use crate::transform::{Parameters, TransformAdapter, TransformResult, stylesheet_href};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use url::Url;
use xslt_core::bus::{Flow, Subscription};
use xslt_core::error::{ResolutionError, Result, StateError, TransportError, XsltError};
use xslt_core::transport::{
    FetchRequest, HttpTransport, Transport, TransportEvent, TransportMessage, TransportSink,
};
use xslt_core::xml::XmlTree;

/// A document slot: plain documents are loaded as-is, stylesheets are
/// assembled from their dependencies.
enum Slot {
    Document(Document),
    Stylesheet(Stylesheet),
}

impl Slot {
    const fn document(&self) -> &Document {
        match self {
            Self::Document(document) => document,
            Self::Stylesheet(stylesheet) => &stylesheet.document,
        }
    }

    fn document_mut(&mut self) -> &mut Document {
        match self {
            Self::Document(document) => document,
            Self::Stylesheet(stylesheet) => &mut stylesheet.document,
        }
    }

    fn resource(&self) -> &dyn Resource {
        match self {
            Self::Document(document) => document,
            Self::Stylesheet(stylesheet) => stylesheet,
        }
    }

    fn check_not_busy(&self, operation: &'static str) -> Result<()> {
        match self {
            Self::Document(_) => Ok(()),
            Self::Stylesheet(stylesheet) => stylesheet.check_not_busy(operation),
        }
    }
}

type Notices = Arc<Mutex<VecDeque<Notice>>>;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loads documents and assembles stylesheets.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use xslt_assembler::{Assembler, AssemblerConfig, ReadyState};
/// use xslt_core::transport::MemoryTransport;
///
/// # tokio_test::block_on(async {
/// let transport = MemoryTransport::new()
///     .with_document(
///         "mem:/main.xsl",
///         r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
///              <xsl:include href="common.xsl"/>
///            </xsl:stylesheet>"#,
///     )
///     .with_document(
///         "mem:/common.xsl",
///         r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
///              <xsl:template name="common"/>
///            </xsl:stylesheet>"#,
///     );
///
/// let mut assembler = Assembler::new(AssemblerConfig::default(), Arc::new(transport));
/// let id = assembler.create_stylesheet();
/// assembler.load(id, "mem:/main.xsl").unwrap();
/// assembler.run().await.unwrap();
///
/// assert_eq!(assembler.document(id).unwrap().ready_state(), ReadyState::Complete);
/// let assembled = assembler.tree(id).unwrap().serialize();
/// assert!(assembled.contains(r#"<xsl:template name="common"/>"#));
/// assert!(!assembled.contains("<xsl:include"));
/// # });
/// ```
pub struct Assembler {
    config: AssemblerConfig,
    transport: Arc<dyn Transport>,
    slots: Vec<Slot>,
    tx: UnboundedSender<TransportMessage>,
    rx: UnboundedReceiver<TransportMessage>,
    notices: Notices,
}

impl Assembler {
    pub fn new(config: AssemblerConfig, transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            slots: Vec::new(),
            tx,
            rx,
            notices: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// An assembler fetching over HTTP(S) and `file://`.
    pub fn with_http(config: AssemblerConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.user_agent)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub const fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Creates a stylesheet that assembles its dependencies when loaded.
    pub fn create_stylesheet(&mut self) -> DocumentId {
        let id = self.next_id();
        let document = Document::new(id, self.config.document.clone());
        self.slots.push(Slot::Stylesheet(Stylesheet::new(document)));
        id
    }

    /// Creates a plain document, for transform input.
    pub fn create_document(&mut self) -> DocumentId {
        let id = self.next_id();
        let document = Document::new(id, self.config.document.clone());
        self.slots.push(Slot::Document(document));
        id
    }

    const fn next_id(&self) -> DocumentId {
        DocumentId::new(self.slots.len())
    }

    fn slot(&self, id: DocumentId) -> Result<&Slot> {
        self.slots
            .get(id.index())
            .ok_or_else(|| StateError::UnknownDocument(id.index()).into())
    }

    fn slot_mut(&mut self, id: DocumentId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.index())
            .ok_or_else(|| StateError::UnknownDocument(id.index()).into())
    }

    fn document_mut(&mut self, id: DocumentId) -> Result<&mut Document> {
        self.slot_mut(id).map(Slot::document_mut)
    }

    /// The stylesheet `id`, with its resolution state and parameters.
    pub fn stylesheet(&self, id: DocumentId) -> Result<&Stylesheet> {
        match self.slot(id)? {
            Slot::Stylesheet(stylesheet) => Ok(stylesheet),
            Slot::Document(_) => Err(StateError::NotStylesheet(id.index()).into()),
        }
    }

    fn stylesheet_mut(&mut self, id: DocumentId) -> Result<&mut Stylesheet> {
        match self.slot_mut(id)? {
            Slot::Stylesheet(stylesheet) => Ok(stylesheet),
            Slot::Document(_) => Err(StateError::NotStylesheet(id.index()).into()),
        }
    }

    pub fn document(&self, id: DocumentId) -> Result<&Document> {
        self.slot(id).map(Slot::document)
    }

    pub fn resource(&self, id: DocumentId) -> Result<&dyn Resource> {
        self.slot(id).map(Slot::resource)
    }

    /// The parsed (for a finished stylesheet, assembled) tree.
    pub fn tree(&self, id: DocumentId) -> Option<&XmlTree> {
        self.slot(id).ok().and_then(|slot| slot.document().tree.as_ref())
    }

    /// Dependency entries of the stylesheet's current resolution.
    pub fn dependencies(&self, id: DocumentId) -> Result<&[Dependency]> {
        Ok(self
            .stylesheet(id)?
            .resolution
            .as_ref()
            .map_or(&[], |resolution| resolution.dependencies()))
    }

    /// Dependencies of the stylesheet's current resolution that have not
    /// reached a terminal status.
    pub fn outstanding(&self, id: DocumentId) -> Result<usize> {
        Ok(self
            .stylesheet(id)?
            .resolution
            .as_ref()
            .map_or(0, |resolution| resolution.outstanding()))
    }

    /// Replaces the loading options of an idle document.
    pub fn configure(&mut self, id: DocumentId, config: DocumentConfig) -> Result<()> {
        let slot = self.slot_mut(id)?;
        slot.check_not_busy("configure")?;
        let document = slot.document_mut();
        document.check_idle("configure")?;
        document.config = config;
        Ok(())
    }

    /// Sets the URL relative references are resolved against when content
    /// is supplied through [`parse`](Self::parse).
    pub fn set_base_url(&mut self, id: DocumentId, url: &str) -> Result<()> {
        let url = parse_url(url, None)?;
        let slot = self.slot_mut(id)?;
        slot.check_not_busy("set base URL")?;
        let document = slot.document_mut();
        document.check_idle("set base URL")?;
        document.url = Some(url);
        Ok(())
    }

    pub fn subscribe<F>(&mut self, id: DocumentId, kind: EventKind, callback: F) -> Result<Subscription>
    where
        F: FnMut(&DocumentEvent) -> Flow + Send + 'static,
    {
        Ok(self.document_mut(id)?.events.subscribe(kind, callback))
    }

    pub fn subscribe_limited<F>(
        &mut self,
        id: DocumentId,
        kind: EventKind,
        limit: u32,
        callback: F,
    ) -> Result<Subscription>
    where
        F: FnMut(&DocumentEvent) -> Flow + Send + 'static,
    {
        Ok(self.document_mut(id)?.events.subscribe_limited(kind, limit, callback))
    }

    pub fn unsubscribe(&mut self, id: DocumentId, subscription: Subscription) -> Result<bool> {
        Ok(self.document_mut(id)?.events.unsubscribe(subscription))
    }

    /// Starts loading `url` into `id`.
    ///
    /// Must be called from within a tokio runtime. Progress is made by
    /// [`run`](Self::run) or [`step`](Self::step).
    pub fn load(&mut self, id: DocumentId, url: &str) -> Result<()> {
        let url = parse_url(url, None)?;
        let slot = self.slot_mut(id)?;
        slot.check_not_busy("load")?;
        slot.document().check_idle("load")?;
        if let Slot::Stylesheet(stylesheet) = slot {
            stylesheet.reset();
        }
        self.start_fetch(id, url)
    }

    /// Issues the transport request for `id`.
    fn start_fetch(&mut self, id: DocumentId, url: Url) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::network(url.as_str(), e))?;
        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();

        let document = self.document_mut(id)?;
        let ticket = document.begin_load(url.clone())?;
        let request = FetchRequest::get(url, document.config.timeout(), document.config.cache);
        let sink = TransportSink::new(ticket, tx);

        document.task = Some(runtime.spawn(async move {
            transport.fetch(request, sink).await;
        }));
        Ok(())
    }

    /// Replaces the content of `id` with `text` and parses it. A stylesheet
    /// then resolves its dependencies.
    pub fn parse(&mut self, id: DocumentId, text: &str) -> Result<()> {
        let slot = self.slot_mut(id)?;
        slot.check_not_busy("parse")?;
        slot.document_mut().begin_parse(text)?;
        if let Slot::Stylesheet(stylesheet) = slot {
            stylesheet.reset();
        }
        self.parse_loaded(id)?;
        self.drain_notices()
    }

    /// Cancels the running load of `id`. For a stylesheet that is resolving,
    /// the fetches of its pending dependencies are cancelled too.
    pub fn abort(&mut self, id: DocumentId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        slot.document_mut().abort()?;

        let mut pending = Vec::new();
        if let Slot::Stylesheet(stylesheet) = slot {
            stylesheet.busy = None;
            if let Some(resolution) = stylesheet.resolution.take() {
                pending.extend(
                    resolution
                        .dependencies
                        .iter()
                        .filter(|dep| !dep.status.is_terminal())
                        .map(|dep| dep.document),
                );
            }
        }
        for child in pending {
            let document = self.document_mut(child)?;
            if document.state.is_in_flight() {
                document.abort()?;
            }
        }
        Ok(())
    }

    /// Whether any transport report or dependency outcome is pending.
    pub fn has_pending_work(&self) -> bool {
        !locked(&self.notices).is_empty()
            || self.slots.iter().any(|slot| slot.document().task.is_some())
    }

    /// Handles transport reports until no fetch is outstanding.
    ///
    /// Returns the first error published with no listener attached; calling
    /// `run` again continues with the remaining work.
    pub async fn run(&mut self) -> Result<()> {
        while self.step().await? {}
        Ok(())
    }

    /// Handles one unit of work. Returns `false` when nothing is pending.
    pub async fn step(&mut self) -> Result<bool> {
        if locked(&self.notices).is_empty() {
            if !self.slots.iter().any(|slot| slot.document().task.is_some()) {
                return Ok(false);
            }
            let Some(message) = self.rx.recv().await else {
                return Ok(false);
            };
            self.handle_message(message)?;
        }
        self.drain_notices()?;
        Ok(true)
    }

    fn handle_message(&mut self, message: TransportMessage) -> Result<()> {
        let id = DocumentId::new(message.ticket.document);
        let document = self.document_mut(id)?;

        if !document.accepts(message.ticket) {
            let stale = TransportError::Stale {
                url: document.location(),
            };
            tracing::debug!(document = %id, error = %stale, "report discarded");
            return Ok(());
        }

        match message.event {
            TransportEvent::Headers(meta) => document.on_headers(&meta),
            TransportEvent::Complete { status, body } => {
                if (200..300).contains(&status) {
                    document.on_body(body)?;
                    self.parse_loaded(id)
                } else {
                    let error = TransportError::Status {
                        url: document.location(),
                        status,
                    };
                    document.fail(error.into())
                }
            }
            TransportEvent::Timeout => {
                let error = TransportError::Timeout {
                    url: document.location(),
                    after_ms: document.config.timeout_ms,
                };
                tracing::warn!(document = %id, error = %error, "fetch timed out");
                document.fail(error.into())
            }
            TransportEvent::Failed(error) => document.fail(error.into()),
        }
    }

    /// Parses the source of `id` and completes it, or starts resolution
    /// for a stylesheet.
    fn parse_loaded(&mut self, id: DocumentId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        let is_root = slot.resource().is_resolution_root();
        let document = slot.document_mut();
        let source = document.source.as_deref().unwrap_or_default();
        let parsed = if document.config.normalize_whitespace {
            XmlTree::parse(&normalize_whitespace(source))
        } else {
            XmlTree::parse(source)
        };

        match parsed {
            Err(error) => {
                let error = XsltError::parse(document.location(), error);
                document.fail(error)
            }
            Ok(tree) => {
                document.tree = Some(tree);
                if is_root {
                    self.begin_resolution(id)
                } else {
                    document.complete()
                }
            }
        }
    }

    fn drain_notices(&mut self) -> Result<()> {
        loop {
            let next = locked(&self.notices).pop_front();
            match next {
                Some(Notice::Resolved(context)) => self.dependency_resolved(context)?,
                Some(Notice::Failed(context, error)) => self.dependency_failed(context, error)?,
                None => return Ok(()),
            }
        }
    }

    pub fn parameters(&self, id: DocumentId) -> Result<&Parameters> {
        Ok(&self.stylesheet(id)?.parameters)
    }

    pub fn add_parameter(&mut self, id: DocumentId, name: &str, value: &str, namespace: &str) -> Result<()> {
        self.stylesheet_mut(id)?.parameters.set(name, value, namespace);
        Ok(())
    }

    /// Schedules a parameter for removal at the next transform. Returns
    /// whether it existed.
    pub fn remove_parameter(&mut self, id: DocumentId, name: &str, namespace: &str) -> Result<bool> {
        Ok(self.stylesheet_mut(id)?.parameters.remove(name, namespace))
    }

    pub fn reset_parameters(&mut self, id: DocumentId) -> Result<()> {
        self.stylesheet_mut(id)?.parameters.reset();
        Ok(())
    }

    /// Results retained by transforms run with caching enabled.
    pub fn results(&self, id: DocumentId) -> Result<&[TransformResult]> {
        Ok(self.stylesheet(id)?.results())
    }

    /// Runs the assembled stylesheet `id` over `input`.
    ///
    /// The stylesheet is compiled through `adapter` on first use after each
    /// load. Parameters scheduled for removal are dropped after the run.
    pub fn transform(
        &mut self,
        id: DocumentId,
        adapter: &dyn TransformAdapter,
        input: &XmlTree,
    ) -> Result<TransformResult> {
        let stylesheet = self.stylesheet_mut(id)?;
        stylesheet.check_not_busy("transform")?;
        if stylesheet.document.state != ReadyState::Complete {
            return Err(StateError::NotReady.into());
        }

        stylesheet.busy = Some(Busy::Executing);
        let outcome = run_processor(stylesheet, adapter, input);
        stylesheet.busy = None;
        let output = outcome?;

        stylesheet.parameters.purge_removed();
        let result = TransformResult::new(id, output);
        if stylesheet.document.config.cache {
            stylesheet.results.push(result.clone());
        }
        stylesheet
            .document
            .events
            .publish(&DocumentEvent::Transformed { document: id })?;
        Ok(result)
    }

    /// Creates and loads the stylesheet linked from `input` through an
    /// `xml-stylesheet` processing instruction, resolved against `base`.
    pub fn open_linked_stylesheet(
        &mut self,
        input: &XmlTree,
        base: Option<&str>,
    ) -> Result<Option<DocumentId>> {
        let Some(href) = stylesheet_href(input) else {
            return Ok(None);
        };
        let base = base.map(|b| parse_url(b, None)).transpose()?;
        let url = parse_url(&href, base.as_ref())?;
        let id = self.create_stylesheet();
        self.load(id, url.as_str())?;
        Ok(Some(id))
    }
}

fn run_processor(
    stylesheet: &mut Stylesheet,
    adapter: &dyn TransformAdapter,
    input: &XmlTree,
) -> Result<XmlTree> {
    if stylesheet.processor.is_none() {
        let tree = stylesheet
            .document
            .tree
            .as_ref()
            .ok_or(StateError::NotReady)?;
        stylesheet.processor = Some(adapter.compile(tree)?);
    }
    let processor = stylesheet.processor.as_mut().ok_or(StateError::NotReady)?;
    processor.run(input, &stylesheet.parameters)
}

/// Parses `href` as an absolute URL, or joins it onto `base`.
pub(crate) fn parse_url(href: &str, base: Option<&Url>) -> Result<Url> {
    let parsed = match base {
        Some(base) => base.join(href),
        None => Url::parse(href),
    };
    parsed.map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => ResolutionError::NoBaseUrl(href.to_string()).into(),
        other => ResolutionError::InvalidUrl {
            href: href.to_string(),
            message: other.to_string(),
        }
        .into(),
    })
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("config", &self.config)
            .field("documents", &self.slots.len())
            .field("pending_notices", &locked(&self.notices).len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xslt_core::transport::MemoryTransport;

    fn assembler() -> Assembler {
        Assembler::new(AssemblerConfig::default(), Arc::new(MemoryTransport::new()))
    }

    #[test]
    fn test_parse_url() {
        let base = Url::parse("http://example.com/xsl/main.xsl").unwrap();
        assert_eq!(
            parse_url("common/b.xsl", Some(&base)).unwrap().as_str(),
            "http://example.com/xsl/common/b.xsl"
        );
        assert_eq!(
            parse_url("b.xsl", None).unwrap_err(),
            ResolutionError::NoBaseUrl("b.xsl".into()).into()
        );
        assert!(matches!(
            parse_url("http://[bad", None).unwrap_err(),
            XsltError::Resolution(ResolutionError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_unknown_document() {
        let assembler = assembler();
        assert_eq!(
            assembler.document(DocumentId::new(9)).unwrap_err(),
            StateError::UnknownDocument(9).into()
        );
    }

    #[test]
    fn test_parameters_require_stylesheet() {
        let mut assembler = assembler();
        let id = assembler.create_document();
        assert_eq!(
            assembler.add_parameter(id, "a", "1", "").unwrap_err(),
            StateError::NotStylesheet(id.index()).into()
        );
    }

    #[test]
    fn test_parse_plain_document_completes() {
        let mut assembler = assembler();
        let id = assembler.create_document();
        assembler.parse(id, "<data><row/></data>").unwrap();

        let document = assembler.document(id).unwrap();
        assert_eq!(document.ready_state(), ReadyState::Complete);
        assert_eq!(document.source(), Some("<data><row/></data>"));
        assert!(!assembler.has_pending_work());
    }

    #[test]
    fn test_parse_failure_without_listener_is_returned() {
        let mut assembler = assembler();
        let id = assembler.create_document();
        let error = assembler.parse(id, "<data>").unwrap_err();
        assert!(matches!(error, XsltError::ParseError { .. }));
        assert_eq!(
            assembler.document(id).unwrap().ready_state(),
            ReadyState::Error
        );
    }

    #[test]
    fn test_load_outside_runtime_is_reported() {
        let mut assembler = assembler();
        let id = assembler.create_document();
        let error = assembler.load(id, "mem:/a.xml").unwrap_err();
        assert!(matches!(
            error,
            XsltError::Transport(TransportError::Network { .. })
        ));
        assert_eq!(
            assembler.document(id).unwrap().ready_state(),
            ReadyState::Uninitialized
        );
    }

    #[test]
    fn test_normalize_whitespace_before_parse() {
        let config = AssemblerConfig {
            document: DocumentConfig {
                normalize_whitespace: true,
                ..DocumentConfig::default()
            },
            ..AssemblerConfig::default()
        };
        let mut assembler = Assembler::new(config, Arc::new(MemoryTransport::new()));
        let id = assembler.create_document();
        assembler.parse(id, "<a>\n  <b/>\n</a>").unwrap();
        assert_eq!(assembler.tree(id).unwrap().serialize(), "<a><b/></a>");
    }

    #[test]
    fn test_abort_requires_load() {
        let mut assembler = assembler();
        let id = assembler.create_document();
        assert_eq!(
            assembler.abort(id).unwrap_err(),
            StateError::NotLoading.into()
        );
    }
}
