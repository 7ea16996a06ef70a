use serde::Deserialize;
use std::time::Duration;
use xslt_core::error::{Result, XsltError};

/// Namespace URI of XSLT 1.0 instructions.
pub const XSL_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// Namespace URI of the EXSLT common module (`exsl:node-set`).
pub const EXSL_NAMESPACE: &str = "http://exslt.org/common";

/// Root configuration for the assembler.
///
/// All fields use sensible defaults if not specified.
///
/// # Examples
///
/// ```
/// use xslt_assembler::config::AssemblerConfig;
///
/// let json = r#"{
///     "document": {
///         "timeout_ms": 5000,
///         "asynchronous": false
///     },
///     "variable_prefix": "doc-"
/// }"#;
///
/// let config = AssemblerConfig::from_json(json).unwrap();
/// assert_eq!(config.document.timeout_ms, 5000);
/// assert!(config.document.cache);
/// assert_eq!(config.variable_prefix, "doc-");
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AssemblerConfig {
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub namespaces: NamespaceConfig,
    /// Name prefix of variables synthesized for `document()` references.
    #[serde(default = "default_variable_prefix")]
    pub variable_prefix: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            document: DocumentConfig::default(),
            namespaces: NamespaceConfig::default(),
            variable_prefix: default_variable_prefix(),
            user_agent: default_user_agent(),
        }
    }
}

impl AssemblerConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| XsltError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.variable_prefix.is_empty() {
            return Err(XsltError::Config("variable_prefix must not be empty".into()));
        }
        if self.namespaces.exsl_prefix.is_empty() || self.namespaces.exsl_prefix.contains(':') {
            return Err(XsltError::Config(format!(
                "invalid exsl_prefix '{}'",
                self.namespaces.exsl_prefix
            )));
        }
        Ok(())
    }
}

/// Per-document loading options. Copied from a resolution root to every
/// dependency it spawns.
///
/// # Defaults
///
/// - `timeout_ms`: `1600`
/// - `cache`: `true`
/// - `asynchronous`: `true` (dependencies are fetched concurrently)
/// - `normalize_whitespace`: `false`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DocumentConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default = "default_true")]
    pub asynchronous: bool,
    /// Drop whitespace-only text between tags before parsing.
    #[serde(default)]
    pub normalize_whitespace: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            cache: true,
            asynchronous: true,
            normalize_whitespace: false,
        }
    }
}

impl DocumentConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Namespace URIs the assembler recognizes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NamespaceConfig {
    #[serde(default = "default_xsl")]
    pub xsl: String,
    #[serde(default = "default_exsl")]
    pub exsl: String,
    /// Prefix bound to `exsl` when rewriting `document()` references.
    #[serde(default = "default_exsl_prefix")]
    pub exsl_prefix: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            xsl: default_xsl(),
            exsl: default_exsl(),
            exsl_prefix: default_exsl_prefix(),
        }
    }
}

// Default value functions
const fn default_true() -> bool {
    true
}

const fn default_timeout_ms() -> u64 {
    1600
}

fn default_variable_prefix() -> String {
    "xslt-document-".to_string()
}

fn default_user_agent() -> String {
    xslt_core::transport::DEFAULT_USER_AGENT.to_string()
}

fn default_xsl() -> String {
    XSL_NAMESPACE.to_string()
}

fn default_exsl() -> String {
    EXSL_NAMESPACE.to_string()
}

fn default_exsl_prefix() -> String {
    "exsl".to_string()
}
