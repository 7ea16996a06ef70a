use thiserror::Error;

/// Core error types for xslt-assembler.
///
/// Every failure observed while loading, parsing or assembling a stylesheet
/// is represented by this enum. Errors are `Clone` because they travel
/// through [`EventBus`](crate::bus::EventBus) events to every listener and
/// are kept in each document's error log.
///
/// # Examples
///
/// ```
/// use xslt_core::error::{TransportError, XsltError};
///
/// let error: XsltError = TransportError::Status {
///     url: "https://example.com/main.xsl".into(),
///     status: 404,
/// }
/// .into();
///
/// assert!(error.to_string().contains("HTTP 404"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XsltError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to parse {url}: {source}")]
    ParseError {
        url: String,
        #[source]
        source: XmlError,
    },

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("XML tree error: {0}")]
    Tree(#[from] XmlError),

    #[error("dependency {url} failed: {source}")]
    Dependency {
        url: String,
        #[source]
        source: Box<XsltError>,
    },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl XsltError {
    /// Helper for creating parse errors for a document location.
    pub fn parse(url: impl Into<String>, source: XmlError) -> Self {
        Self::ParseError {
            url: url.into(),
            source,
        }
    }

    /// Wraps an error raised by a dependency of a resolution root.
    pub fn dependency(url: impl Into<String>, source: Self) -> Self {
        Self::Dependency {
            url: url.into(),
            source: Box::new(source),
        }
    }

    /// Returns the innermost error, unwrapping dependency chains.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Dependency { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Failures reported by the transport layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("timed out after {after_ms}ms loading {url}")]
    Timeout { url: String, after_ms: u64 },

    #[error("request failed for {url}: {message}")]
    Network { url: String, message: String },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("stale response for {url} discarded")]
    Stale { url: String },
}

impl TransportError {
    /// Helper for creating network errors from any displayable cause.
    pub fn network(url: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: cause.to_string(),
        }
    }
}

/// API misuse: an operation invoked in a state that does not allow it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot {operation}: document is busy {marker}")]
    Busy {
        operation: &'static str,
        marker: &'static str,
    },

    #[error("cannot {operation}: a load is already in flight")]
    LoadInFlight { operation: &'static str },

    #[error("cannot abort: document is not loading")]
    NotLoading,

    #[error("stylesheet is not ready: resolution has not completed")]
    NotReady,

    #[error("unknown document: {0}")]
    UnknownDocument(usize),

    #[error("document {0} is not a stylesheet")]
    NotStylesheet(usize),
}

/// Unsupported or malformed inclusion directives and references.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("{directive} without href attribute")]
    MissingHref { directive: String },

    #[error("invalid URL '{href}': {message}")]
    InvalidUrl { href: String, message: String },

    #[error("relative reference '{0}' has no base URL")]
    NoBaseUrl(String),

    #[error("circular inclusion of {url}")]
    Cycle { url: String },

    #[error("directive is no longer attached to the stylesheet")]
    DetachedDirective,

    #[error("{url} has no root element")]
    EmptyDocument { url: String },

    #[error("{url} is referenced but was never resolved")]
    Unresolved { url: String },
}

/// Errors raised by the XML tree: malformed input or invalid mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (at byte {position})")]
pub struct XmlError {
    pub message: String,
    pub position: u64,
}

impl XmlError {
    pub fn new(message: impl Into<String>, position: u64) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }

    /// Error for a structural mutation that has no byte position.
    pub fn mutation(message: impl Into<String>) -> Self {
        Self::new(message, 0)
    }
}

/// Convenience type alias for `Result<T, XsltError>`.
///
/// # Examples
///
/// ```
/// use xslt_core::error::{Result, StateError};
///
/// fn ensure_ready(ready: bool) -> Result<()> {
///     if !ready {
///         return Err(StateError::NotReady.into());
///     }
///     Ok(())
/// }
///
/// assert!(ensure_ready(false).is_err());
/// ```
pub type Result<T> = std::result::Result<T, XsltError>;
