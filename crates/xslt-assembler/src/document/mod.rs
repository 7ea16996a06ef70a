//! Fetched XML resources and their load lifecycle.
//!
//! A [`Document`] wraps one XML resource: its URL, raw source, parsed tree,
//! [`ReadyState`], error log and event bus. A [`Stylesheet`] composes a
//! document with the state needed to assemble and run it. Both are exposed
//! read-only through the [`Resource`] trait.

mod lifecycle;
mod state;
mod stylesheet;

pub use state::{Busy, ReadyState};
pub use stylesheet::Stylesheet;

use crate::config::DocumentConfig;
use crate::event::DocumentEvent;
use crate::resolve::ResolutionContext;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::time::Instant;
use tokio::task::JoinHandle;
use url::Url;
use xslt_core::bus::EventBus;
use xslt_core::error::XsltError;
use xslt_core::xml::XmlTree;

static INTER_TAG_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">\s+<").expect("Invalid regex"));

/// Handle to a document owned by an [`Assembler`](crate::Assembler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(usize);

impl DocumentId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One XML resource and its load state.
pub struct Document {
    pub(crate) id: DocumentId,
    pub(crate) url: Option<Url>,
    pub(crate) source: Option<String>,
    pub(crate) tree: Option<XmlTree>,
    pub(crate) state: ReadyState,
    /// Resolution root this document was spawned for.
    pub(crate) parent: Option<DocumentId>,
    pub(crate) config: DocumentConfig,
    pub(crate) errors: Vec<XsltError>,
    pub(crate) events: EventBus<DocumentEvent>,
    /// Bumped on every load, parse and abort; stale transport reports carry
    /// an older value.
    pub(crate) generation: u64,
    pub(crate) status: Option<u16>,
    pub(crate) task: Option<JoinHandle<()>>,
    pub(crate) context: Option<ResolutionContext>,
    pub(crate) loading_started_at: Option<Instant>,
}

impl Document {
    pub(crate) fn new(id: DocumentId, config: DocumentConfig) -> Self {
        Self {
            id,
            url: None,
            source: None,
            tree: None,
            state: ReadyState::Uninitialized,
            parent: None,
            config,
            errors: Vec::new(),
            events: EventBus::new(),
            generation: 0,
            status: None,
            task: None,
            context: None,
            loading_started_at: None,
        }
    }

    /// A document spawned by a resolution root for one of its dependencies.
    pub(crate) fn dependency(id: DocumentId, config: DocumentConfig, context: ResolutionContext) -> Self {
        Self {
            parent: Some(context.root),
            context: Some(context),
            ..Self::new(id, config)
        }
    }

    pub const fn id(&self) -> DocumentId {
        self.id
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Raw source text as fetched or parsed.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn tree(&self) -> Option<&XmlTree> {
        self.tree.as_ref()
    }

    pub const fn ready_state(&self) -> ReadyState {
        self.state
    }

    pub const fn parent(&self) -> Option<DocumentId> {
        self.parent
    }

    pub const fn config(&self) -> &DocumentConfig {
        &self.config
    }

    /// HTTP status of the last response, if headers arrived.
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Every error this document has reported, oldest first.
    pub fn errors(&self) -> &[XsltError] {
        &self.errors
    }

    pub const fn events(&self) -> &EventBus<DocumentEvent> {
        &self.events
    }

    /// Location used in diagnostics.
    pub(crate) fn location(&self) -> String {
        self.url
            .as_ref()
            .map_or_else(|| format!("document {}", self.id), Url::to_string)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("state", &self.state)
            .field("parent", &self.parent)
            .field("generation", &self.generation)
            .field("errors", &self.errors.len())
            .field("loading_started_at", &self.loading_started_at)
            .finish_non_exhaustive()
    }
}

/// Read-only view shared by plain documents and stylesheets.
pub trait Resource {
    fn document(&self) -> &Document;

    fn busy(&self) -> Option<Busy> {
        None
    }

    /// A resolution root assembles its dependencies before completing.
    fn is_resolution_root(&self) -> bool {
        false
    }

    fn id(&self) -> DocumentId {
        self.document().id
    }

    fn url(&self) -> Option<&Url> {
        self.document().url.as_ref()
    }

    fn ready_state(&self) -> ReadyState {
        self.document().state
    }

    fn tree(&self) -> Option<&XmlTree> {
        self.document().tree.as_ref()
    }

    fn errors(&self) -> &[XsltError] {
        &self.document().errors
    }
}

impl Resource for Document {
    fn document(&self) -> &Document {
        self
    }
}

/// Drops whitespace-only text between tags.
pub(crate) fn normalize_whitespace(text: &str) -> Cow<'_, str> {
    INTER_TAG_WHITESPACE.replace_all(text.trim(), "><")
}
