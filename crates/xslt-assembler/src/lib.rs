//! Assembles XSLT stylesheets from their dependencies.
//!
//! A root stylesheet is loaded, scanned for `xsl:include`, `xsl:import` and
//! `document('…')` references, every referenced resource is fetched
//! concurrently, and the results are merged back into the root tree at the
//! positions they were referenced from. The assembled tree can then be
//! handed to an XSLT processor through a [`TransformAdapter`].
//!
//! - [`Assembler`]: owns documents and drives transport and resolution
//! - [`document`]: load lifecycle and events of one resource
//! - [`resolve`]: dependency bookkeeping, scanning and merging
//! - [`transform`]: processor seam, parameters and results

pub mod config;
pub mod document;
pub mod event;
pub mod resolve;
pub mod transform;

mod assembler;

// Re-export commonly used types
pub use assembler::Assembler;
pub use config::{AssemblerConfig, DocumentConfig, NamespaceConfig};
pub use document::{Busy, Document, DocumentId, ReadyState, Resource, Stylesheet};
pub use event::{DocumentEvent, EventKind};
pub use resolve::{Dependency, DependencyKind, DependencyStatus, Resolution};
pub use transform::{Parameters, Processor, TransformAdapter, TransformResult};
pub use xslt_core::{Flow, Result, Subscription, XsltError};
