//! Bookkeeping for assembling one stylesheet from its dependencies.
//!
//! A resolution root owns one [`Resolution`] per load. Every inclusion
//! directive and `document()` reference discovered in the root (or in
//! content spliced into it) becomes a [`Dependency`] with its own child
//! document. The `outstanding` counter tracks dependencies that have not
//! reached a terminal status; when it drops to zero the root is finalized.
//!
//! Fragments are only scanned for further dependencies as they arrive. The
//! root tree is assembled once, at finalization, by walking it in document
//! order, so the result never depends on the order fetches complete in.
//!
//! [`scan`] finds dependencies in a tree, [`merge`] splices resolved
//! content in. The driver that ties both to documents and transport
//! lives in [`Assembler`](crate::Assembler).

pub(crate) mod merge;
pub(crate) mod scan;

use crate::document::DocumentId;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use url::Url;
use xslt_core::bus::Subscription;
use xslt_core::error::XsltError;
use xslt_core::xml::NodeId;

/// Routes a dependency's completion back to its resolution root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionContext {
    pub root: DocumentId,
    /// Generation of the root load this resolution belongs to.
    pub generation: u64,
    /// Index into the root's dependency list.
    pub dependency: usize,
}

/// Dependency outcome queued by a child's event listener.
#[derive(Debug, Clone)]
pub(crate) enum Notice {
    Resolved(ResolutionContext),
    Failed(ResolutionContext, XsltError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// `xsl:include`: splice as peer.
    Include,
    /// `xsl:import`: splice, keeping the importing side's overriding
    /// declarations.
    Import,
    /// `document('…')` inside an XPath expression.
    Document,
}

impl DependencyKind {
    /// Splice kinds share one URL namespace for deduplication.
    pub const fn is_splice(self) -> bool {
        matches!(self, Self::Include | Self::Import)
    }

    pub const fn directive(self) -> &'static str {
        match self {
            Self::Include => "xsl:include",
            Self::Import => "xsl:import",
            Self::Document => "document()",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    /// Waiting for a sequential fetch slot.
    Queued,
    Fetching,
    /// Fetched and scanned; waiting for the root to be assembled.
    Resolved,
    /// Part of the assembled root.
    Merged,
    Failed,
    /// Not fetched, or not merged, because the resolution had already
    /// failed.
    Skipped,
}

impl DependencyStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Merged | Self::Failed | Self::Skipped
        )
    }
}

/// One resolved or pending reference from a root stylesheet.
#[derive(Debug)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub url: Url,
    pub document: DocumentId,
    /// URL of the fragment the reference was found in.
    pub base: Option<Url>,
    /// URLs of the fragments that led to this one, root first, ending with
    /// this dependency's own URL.
    pub chain: Vec<Url>,
    /// Synthesized variable id, `document()` references only. Assigned when
    /// the root is assembled, in document order of the first reference.
    pub variable: Option<u32>,
    pub status: DependencyStatus,
    pub(crate) subscriptions: Vec<Subscription>,
}

/// Resolution state of one root load.
#[derive(Debug)]
pub struct Resolution {
    pub(crate) generation: u64,
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) outstanding: usize,
    pub(crate) next_variable: u32,
    /// Synthesized variables by id: (provenance comment, variable element).
    pub(crate) variables: BTreeMap<u32, (NodeId, NodeId)>,
    /// Dependencies waiting for a fetch slot in sequential mode.
    pub(crate) queue: VecDeque<usize>,
    pub(crate) finalized: bool,
}

impl Resolution {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            dependencies: Vec::new(),
            outstanding: 0,
            next_variable: 1,
            variables: BTreeMap::new(),
            queue: VecDeque::new(),
            finalized: false,
        }
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Dependencies that have not reached a terminal status.
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Number of synthesized `document()` variables.
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Index of the dependency that resolves `url` in the same dedup
    /// namespace as `kind`.
    pub(crate) fn position(&self, kind: DependencyKind, url: &Url) -> Option<usize> {
        self.dependencies
            .iter()
            .position(|dep| dep.kind.is_splice() == kind.is_splice() && dep.url == *url)
    }

    pub(crate) fn allocate_variable(&mut self) -> u32 {
        let id = self.next_variable;
        self.next_variable += 1;
        id
    }

    pub(crate) fn fetching(&self) -> usize {
        self.dependencies
            .iter()
            .filter(|dep| dep.status == DependencyStatus::Fetching)
            .count()
    }

    /// Marks `index` terminal and decrements the counter once.
    pub(crate) fn settle(&mut self, index: usize, status: DependencyStatus) -> bool {
        let Some(dep) = self.dependencies.get_mut(index) else {
            return false;
        };
        if dep.status.is_terminal() {
            return false;
        }
        dep.status = status;
        self.outstanding = self.outstanding.saturating_sub(1);
        true
    }
}
