//! Dependency discovery and assembly of resolution roots.
//!
//! Discovery runs as documents arrive: the root and every fetched fragment
//! are scanned for further dependencies, which are registered and fetched.
//! Nothing is spliced yet. Once every dependency has settled, [`finalize`]
//! assembles a copy of the root tree by expanding directives in document
//! order, so the result is the same whatever order the fetches landed in.
//!
//! While a discovery step runs, the root's [`Resolution`] is checked out of
//! its slot so that new dependencies can be registered on the assembler at
//! the same time. It is checked back in before any event reaches the
//! root's listeners.
//!
//! [`finalize`]: Assembler::finalize

use super::{Assembler, Slot, locked, parse_url};
use crate::document::{Busy, Document, DocumentId, ReadyState};
use crate::event::{DocumentEvent, EventKind};
use crate::resolve::merge;
use crate::resolve::scan::{self, Discovery};
use crate::resolve::{
    Dependency, DependencyKind, DependencyStatus, Notice, Resolution, ResolutionContext,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use url::Url;
use xslt_core::bus::Flow;
use xslt_core::error::{ResolutionError, Result, StateError, XsltError};
use xslt_core::xml::{NodeId, XmlTree};

/// Where newly discovered references live.
struct Scope<'a> {
    root: DocumentId,
    base: Option<&'a Url>,
    /// URLs of the fragments enclosing the scanned nodes, root first.
    ancestry: &'a [Url],
}

/// State of one document-order walk over the root and its fragments.
#[derive(Default)]
struct Assembly {
    /// Fragments being expanded, root first.
    stack: Vec<Url>,
    expanded: HashSet<Url>,
    /// Fragment URL of every spliced top-level node.
    origins: HashMap<NodeId, Url>,
    /// Top-level nodes that arrived through an `xsl:import`.
    imported: HashSet<NodeId>,
}

impl Assembler {
    /// Starts resolving a freshly parsed root stylesheet.
    pub(super) fn begin_resolution(&mut self, root: DocumentId) -> Result<()> {
        let stylesheet = self.stylesheet_mut(root)?;
        stylesheet.busy = Some(Busy::Resolving);
        let mut resolution = Resolution::new(stylesheet.document.generation);
        let base = stylesheet.document.url.clone();

        let ancestry: Vec<Url> = base.iter().cloned().collect();
        let scope = Scope {
            root,
            base: base.as_ref(),
            ancestry: &ancestry,
        };
        let outcome = self
            .discoveries(root)
            .and_then(|found| self.discover(&scope, &mut resolution, found));

        tracing::debug!(
            document = %root,
            dependencies = resolution.dependencies.len(),
            "resolution started"
        );
        self.checkin(root, resolution)?;
        self.conclude(root, outcome)
    }

    /// Inclusion directives and `document()` references among the top-level
    /// nodes of `id`'s tree, in document order.
    fn discoveries(&self, id: DocumentId) -> Result<Vec<Discovery>> {
        let tree = self.document(id)?.tree.as_ref().ok_or(StateError::NotReady)?;
        let nodes = tree
            .document_element()
            .map(|element| tree.children(element).to_vec())
            .unwrap_or_default();
        Ok(scan::scan(tree, &nodes, &self.config.namespaces.xsl))
    }

    /// Registers every dependency in `found` that is not registered yet.
    fn discover(
        &mut self,
        scope: &Scope<'_>,
        resolution: &mut Resolution,
        found: Vec<Discovery>,
    ) -> Result<()> {
        for discovery in found {
            match discovery {
                Discovery::Directive { kind, href, .. } => {
                    let href = href.ok_or_else(|| ResolutionError::MissingHref {
                        directive: kind.directive().to_string(),
                    })?;
                    let url = parse_url(&href, scope.base)?;
                    if scope.ancestry.contains(&url) {
                        return Err(ResolutionError::Cycle {
                            url: url.to_string(),
                        }
                        .into());
                    }
                    if resolution.position(kind, &url).is_some() {
                        tracing::debug!(url = %url, kind = %kind, "already registered");
                        continue;
                    }
                    let mut chain = scope.ancestry.to_vec();
                    chain.push(url.clone());
                    self.register(scope, resolution, kind, url, chain)?;
                }
                Discovery::Reference { hrefs, .. } => {
                    for href in hrefs {
                        let url = parse_url(&href, scope.base)?;
                        if resolution.position(DependencyKind::Document, &url).is_none() {
                            let chain = scope.ancestry.to_vec();
                            self.register(scope, resolution, DependencyKind::Document, url, chain)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Creates the child document for a new dependency and starts (or, in
    /// sequential mode, queues) its load.
    fn register(
        &mut self,
        scope: &Scope<'_>,
        resolution: &mut Resolution,
        kind: DependencyKind,
        url: Url,
        chain: Vec<Url>,
    ) -> Result<()> {
        let index = resolution.dependencies.len();
        let context = ResolutionContext {
            root: scope.root,
            generation: resolution.generation,
            dependency: index,
        };
        let child = self.next_id();
        let config = self.document(scope.root)?.config.clone();
        let sequential = !config.asynchronous;
        let mut document = Document::dependency(child, config, context);

        let notices = Arc::clone(&self.notices);
        let on_complete = document.events.subscribe(EventKind::Complete, move |_| {
            locked(&notices).push_back(Notice::Resolved(context));
            Flow::Unsubscribe
        });
        let notices = Arc::clone(&self.notices);
        let on_error = document.events.subscribe(EventKind::Error, move |event| {
            if let DocumentEvent::Error { error, .. } = event {
                locked(&notices).push_back(Notice::Failed(context, error.clone()));
            }
            Flow::Unsubscribe
        });
        self.slots.push(Slot::Document(document));

        tracing::debug!(root = %scope.root, document = %child, url = %url, kind = %kind, "dependency discovered");
        resolution.dependencies.push(Dependency {
            kind,
            url,
            document: child,
            base: scope.base.cloned(),
            chain,
            variable: None,
            status: DependencyStatus::Queued,
            subscriptions: vec![on_complete, on_error],
        });
        resolution.outstanding += 1;

        if sequential && resolution.fetching() > 0 {
            resolution.queue.push_back(index);
            return Ok(());
        }
        self.start_dependency(resolution, index)
    }

    fn start_dependency(&mut self, resolution: &mut Resolution, index: usize) -> Result<()> {
        let Some(dep) = resolution.dependencies.get_mut(index) else {
            return Ok(());
        };
        dep.status = DependencyStatus::Fetching;
        let (child, url) = (dep.document, dep.url.clone());
        if let Err(error) = self.start_fetch(child, url) {
            resolution.settle(index, DependencyStatus::Failed);
            return Err(error);
        }
        Ok(())
    }

    /// Takes the root's resolution out of its slot, unless the notice
    /// belongs to an abandoned or finished resolution.
    fn checkout(&mut self, context: ResolutionContext) -> Result<Option<Resolution>> {
        let stylesheet = self.stylesheet_mut(context.root)?;
        let current = stylesheet
            .resolution
            .as_ref()
            .is_some_and(|r| r.generation == context.generation && !r.finalized);
        if !current {
            tracing::debug!(
                document = %context.root,
                generation = context.generation,
                "outcome of an abandoned resolution discarded"
            );
            return Ok(None);
        }
        Ok(stylesheet.resolution.take())
    }

    fn checkin(&mut self, root: DocumentId, resolution: Resolution) -> Result<()> {
        self.stylesheet_mut(root)?.resolution = Some(resolution);
        Ok(())
    }

    /// Drops the engine's listeners on a settled dependency.
    fn release(&mut self, resolution: &mut Resolution, index: usize) -> Result<()> {
        let Some(dep) = resolution.dependencies.get_mut(index) else {
            return Ok(());
        };
        let child = dep.document;
        let subscriptions = std::mem::take(&mut dep.subscriptions);
        let events = &mut self.document_mut(child)?.events;
        for subscription in subscriptions {
            events.unsubscribe(subscription);
        }
        Ok(())
    }

    pub(super) fn dependency_resolved(&mut self, context: ResolutionContext) -> Result<()> {
        let root = context.root;
        let Some(mut resolution) = self.checkout(context)? else {
            return Ok(());
        };
        let outcome = self.scan_dependency(context, &mut resolution);
        self.checkin(root, resolution)?;
        self.conclude(root, outcome)
    }

    /// Registers the dependencies of a fetched fragment, settles it and
    /// hands its fetch slot to the next queued dependency.
    fn scan_dependency(&mut self, context: ResolutionContext, resolution: &mut Resolution) -> Result<()> {
        let index = context.dependency;
        self.release(resolution, index)?;

        if self.document(context.root)?.state == ReadyState::Error {
            resolution.settle(index, DependencyStatus::Skipped);
            return Ok(());
        }

        let Some(dep) = resolution.dependencies.get(index) else {
            return Ok(());
        };
        let (kind, url, child, chain) = (dep.kind, dep.url.clone(), dep.document, dep.chain.clone());

        if kind.is_splice() {
            let scope = Scope {
                root: context.root,
                base: Some(&url),
                ancestry: &chain,
            };
            let scanned = self
                .discoveries(child)
                .and_then(|found| self.discover(&scope, resolution, found));
            if let Err(error) = scanned {
                resolution.settle(index, DependencyStatus::Failed);
                return Err(XsltError::dependency(url.as_str(), error));
            }
        }
        resolution.settle(index, DependencyStatus::Resolved);
        tracing::debug!(document = %context.root, url = %url, kind = %kind, "dependency resolved");

        if resolution.fetching() == 0
            && let Some(next) = resolution.queue.pop_front()
        {
            self.start_dependency(resolution, next)?;
        }
        Ok(())
    }

    pub(super) fn dependency_failed(&mut self, context: ResolutionContext, error: XsltError) -> Result<()> {
        let root = context.root;
        let Some(mut resolution) = self.checkout(context)? else {
            return Ok(());
        };
        self.release(&mut resolution, context.dependency)?;
        let url = resolution
            .dependencies
            .get(context.dependency)
            .map(|dep| dep.url.to_string())
            .unwrap_or_default();
        resolution.settle(context.dependency, DependencyStatus::Failed);
        self.checkin(root, resolution)?;
        self.conclude(root, Err(XsltError::dependency(url, error)))
    }

    /// Escalates a failed step to the root, then finalizes it if nothing is
    /// outstanding.
    fn conclude(&mut self, root: DocumentId, outcome: Result<()>) -> Result<()> {
        let escalated = match outcome {
            Ok(()) => Ok(()),
            Err(error) => self.escalate(root, error),
        };
        let settled = self.settle_root(root);
        escalated.and(settled)
    }

    /// Moves the root to `Error`. Only the first failure is published.
    fn escalate(&mut self, root: DocumentId, error: XsltError) -> Result<()> {
        let document = self.document_mut(root)?;
        if document.state == ReadyState::Error {
            tracing::error!(document = %root, error = %error, "resolution already failed");
            return Ok(());
        }
        tracing::warn!(document = %root, error = %error, "resolution failed");
        document.fail(error)
    }

    fn settle_root(&mut self, root: DocumentId) -> Result<()> {
        let stylesheet = self.stylesheet_mut(root)?;
        let failed = stylesheet.document.state == ReadyState::Error;
        let Some(resolution) = stylesheet.resolution.as_mut() else {
            return Ok(());
        };
        if failed {
            while let Some(index) = resolution.queue.pop_front() {
                resolution.settle(index, DependencyStatus::Skipped);
            }
        }
        if resolution.outstanding > 0 || resolution.finalized {
            return Ok(());
        }
        if failed {
            stylesheet.busy = None;
            return Ok(());
        }
        self.finalize(root)
    }

    /// Assembles a resolved stylesheet, re-parses it, then publishes
    /// `included` on every merged dependency followed by `preprocessed`
    /// and `complete` on the root.
    ///
    /// Runs automatically when the last dependency settles; calling it again
    /// is a no-op. If assembly fails the root moves to `Error` and keeps
    /// its unassembled tree.
    pub fn finalize(&mut self, id: DocumentId) -> Result<()> {
        let stylesheet = self.stylesheet_mut(id)?;
        let Some(resolution) = stylesheet.resolution.as_ref() else {
            return Err(StateError::NotReady.into());
        };
        if resolution.finalized {
            tracing::debug!(document = %id, "already finalized");
            return Ok(());
        }
        if resolution.outstanding > 0 || stylesheet.document.state == ReadyState::Error {
            return Err(StateError::NotReady.into());
        }
        let mut resolution = stylesheet.resolution.take().ok_or(StateError::NotReady)?;

        let assembled = self.assemble(id, &mut resolution);
        resolution.finalized = true;
        if assembled.is_err() {
            for dep in &mut resolution.dependencies {
                if dep.status == DependencyStatus::Merged {
                    dep.status = DependencyStatus::Resolved;
                }
            }
            resolution.variables.clear();
        }
        let merged: Vec<DocumentId> = resolution
            .dependencies
            .iter()
            .filter(|dep| dep.status == DependencyStatus::Merged)
            .map(|dep| dep.document)
            .collect();
        let dependencies = resolution.dependencies.len();
        let variables = resolution.variables.len();

        let stylesheet = self.stylesheet_mut(id)?;
        stylesheet.resolution = Some(resolution);
        stylesheet.busy = None;
        let text = match assembled {
            Ok(tree) => tree.serialize(),
            Err(error) => return self.escalate(id, error),
        };

        let document = &mut self.stylesheet_mut(id)?.document;
        match XmlTree::parse(&text) {
            Ok(reparsed) => document.tree = Some(reparsed),
            Err(error) => {
                let location = document.location();
                return document.fail(XsltError::parse(location, error));
            }
        }

        for child in merged {
            self.document_mut(child)?
                .events
                .publish(&DocumentEvent::Included {
                    document: child,
                    into: id,
                })?;
        }
        let document = &mut self.stylesheet_mut(id)?.document;
        document.events.publish(&DocumentEvent::Preprocessed { document: id })?;
        document.complete()?;
        tracing::info!(document = %id, dependencies, variables, "stylesheet assembled");
        Ok(())
    }

    /// Builds the assembled tree of `root` from a copy of its own tree and
    /// the trees of its resolved dependencies.
    fn assemble(&self, root: DocumentId, resolution: &mut Resolution) -> Result<XmlTree> {
        let document = self.document(root)?;
        let mut tree = document.tree.clone().ok_or(StateError::NotReady)?;
        let base = document.url.clone();
        let namespaces = &self.config.namespaces;
        let stylesheet = tree.document_element().ok_or(StateError::NotReady)?;

        let mut assembly = Assembly {
            stack: base.iter().cloned().collect(),
            ..Assembly::default()
        };
        let nodes = tree.children(stylesheet).to_vec();
        self.expand(&mut tree, resolution, &mut assembly, &nodes, base.as_ref(), false)?;

        let overridden =
            merge::drop_overridden(&mut tree, stylesheet, &assembly.imported, &namespaces.xsl)?;
        if !overridden.is_empty() {
            tracing::debug!(document = %root, dropped = overridden.len(), "imported declarations overridden");
        }

        self.bind_documents(&mut tree, stylesheet, resolution, &assembly.origins, base.as_ref())?;

        if !resolution.variables.is_empty()
            && merge::declare_extension_namespace(
                &mut tree,
                stylesheet,
                &namespaces.exsl_prefix,
                &namespaces.exsl,
                &namespaces.xsl,
            )
        {
            tracing::debug!(document = %root, prefix = %namespaces.exsl_prefix, "extension namespace declared");
        }
        Ok(tree)
    }

    /// Replaces the directives among `nodes` with their fragments, depth
    /// first, so fragments land in document order.
    fn expand(
        &self,
        tree: &mut XmlTree,
        resolution: &mut Resolution,
        assembly: &mut Assembly,
        nodes: &[NodeId],
        base: Option<&Url>,
        imported: bool,
    ) -> Result<()> {
        for &node in nodes {
            let Some(kind) = scan::directive_kind(tree, node, &self.config.namespaces.xsl) else {
                if imported {
                    assembly.imported.insert(node);
                }
                if let Some(base) = base {
                    assembly.origins.insert(node, base.clone());
                }
                continue;
            };

            let href = tree
                .attribute(node, "href")
                .ok_or_else(|| ResolutionError::MissingHref {
                    directive: kind.directive().to_string(),
                })?;
            let url = parse_url(href, base)?;
            if assembly.stack.contains(&url) {
                return Err(ResolutionError::Cycle {
                    url: url.to_string(),
                }
                .into());
            }
            if !assembly.expanded.insert(url.clone()) {
                tracing::debug!(url = %url, kind = %kind, "already included");
                merge::drop_duplicate(tree, node, kind, &url)?;
                continue;
            }

            let index = resolution
                .position(kind, &url)
                .ok_or_else(|| ResolutionError::Unresolved {
                    url: url.to_string(),
                })?;
            let dep = &mut resolution.dependencies[index];
            let fragment = self.document(dep.document)?.tree.as_ref().ok_or(StateError::NotReady)?;
            let spliced = merge::splice(tree, node, fragment, kind, &url)
                .map_err(|error| XsltError::dependency(url.as_str(), error))?;
            dep.status = DependencyStatus::Merged;
            tracing::debug!(url = %url, kind = %kind, nodes = spliced.len(), "fragment spliced");

            assembly.stack.push(url.clone());
            let imported = imported || kind == DependencyKind::Import;
            self.expand(tree, resolution, assembly, &spliced, Some(&url), imported)?;
            assembly.stack.pop();
        }
        Ok(())
    }

    /// Rewrites every `document()` reference left in the assembled tree to
    /// a synthesized variable. Ids follow the document order of the first
    /// reference to each URL.
    fn bind_documents(
        &self,
        tree: &mut XmlTree,
        stylesheet: NodeId,
        resolution: &mut Resolution,
        origins: &HashMap<NodeId, Url>,
        base: Option<&Url>,
    ) -> Result<()> {
        let namespaces = &self.config.namespaces;
        let nodes = tree.children(stylesheet).to_vec();

        for node in nodes {
            let scope = origins.get(&node).or(base);
            for discovery in scan::scan(tree, &[node], &namespaces.xsl) {
                let Discovery::Reference {
                    node,
                    attribute,
                    hrefs,
                } = discovery
                else {
                    continue;
                };

                let mut replacements = HashMap::new();
                for href in hrefs {
                    let url = parse_url(&href, scope)?;
                    let id = self.bind_document(tree, stylesheet, resolution, &url)?;
                    replacements.insert(
                        href,
                        format!(
                            "{}:node-set(${}{id})",
                            namespaces.exsl_prefix, self.config.variable_prefix
                        ),
                    );
                }

                let Some(expression) = tree.attribute(node, &attribute) else {
                    continue;
                };
                let rewritten = scan::rewrite_expression(expression, &replacements);
                if rewritten.contains("document(") {
                    tracing::warn!(expression = %rewritten, "document() call left in expression");
                }
                tree.set_attribute(node, &attribute, &rewritten);
            }
        }
        Ok(())
    }

    /// Variable id holding the content of `url`, synthesizing the variable
    /// on first use.
    fn bind_document(
        &self,
        tree: &mut XmlTree,
        stylesheet: NodeId,
        resolution: &mut Resolution,
        url: &Url,
    ) -> Result<u32> {
        let index = resolution
            .position(DependencyKind::Document, url)
            .ok_or_else(|| ResolutionError::Unresolved {
                url: url.to_string(),
            })?;
        if let Some(id) = resolution.dependencies[index].variable {
            return Ok(id);
        }

        let id = resolution.allocate_variable();
        let child = resolution.dependencies[index].document;
        let fragment = self.document(child)?.tree.as_ref().ok_or(StateError::NotReady)?;
        let name = format!("{}{id}", self.config.variable_prefix);
        let entry = merge::synthesize_variable(
            tree,
            stylesheet,
            &resolution.variables,
            id,
            &name,
            fragment,
            url,
            &self.config.namespaces.xsl,
        )
        .map_err(|error| XsltError::dependency(url.as_str(), error))?;
        resolution.variables.insert(id, entry);

        let dep = &mut resolution.dependencies[index];
        dep.variable = Some(id);
        dep.status = DependencyStatus::Merged;
        Ok(id)
    }
}
