//! Seam to the engine that executes assembled stylesheets.
//!
//! The assembler never interprets XSLT itself. A [`TransformAdapter`]
//! compiles an assembled tree into a [`Processor`], which is then run with
//! the stylesheet's [`Parameters`]. Processors are compiled once per load.

use crate::document::DocumentId;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use xslt_core::error::{Result, XmlError, XsltError};
use xslt_core::xml::{NodeId, NodeKind, XmlTree};

static PSEUDO_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("Invalid regex")
});

/// A compiled stylesheet, ready to run.
pub trait Processor: Send {
    fn run(&mut self, input: &XmlTree, parameters: &Parameters) -> Result<XmlTree>;
}

/// Compiles assembled stylesheets.
pub trait TransformAdapter {
    fn compile(&self, stylesheet: &XmlTree) -> Result<Box<dyn Processor>>;
}

/// A stylesheet parameter. A `None` value marks a parameter that is
/// removed from the processor after the next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub namespace: String,
    pub value: Option<String>,
}

/// Ordered stylesheet parameters keyed by `(name, namespace)`.
///
/// # Examples
///
/// ```
/// use xslt_assembler::transform::Parameters;
///
/// let mut parameters = Parameters::default();
/// parameters.set("lang", "en", "");
/// parameters.set("lang", "de", "");
/// assert_eq!(parameters.get("lang", ""), Some("de"));
///
/// assert!(parameters.remove("lang", ""));
/// assert_eq!(parameters.get("lang", ""), None);
/// assert_eq!(parameters.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    list: Vec<Parameter>,
}

impl Parameters {
    /// Sets a parameter, overwriting the value of an existing one in place.
    pub fn set(&mut self, name: &str, value: &str, namespace: &str) {
        match self.position(name, namespace) {
            Some(index) => self.list[index].value = Some(value.to_string()),
            None => self.list.push(Parameter {
                name: name.to_string(),
                namespace: namespace.to_string(),
                value: Some(value.to_string()),
            }),
        }
    }

    /// Schedules a parameter for removal. Returns whether it existed.
    pub fn remove(&mut self, name: &str, namespace: &str) -> bool {
        match self.position(name, namespace) {
            Some(index) => {
                self.list[index].value = None;
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.list.clear();
    }

    pub fn get(&self, name: &str, namespace: &str) -> Option<&str> {
        self.position(name, namespace)
            .and_then(|index| self.list[index].value.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.list.iter()
    }

    /// Parameters with a value, in insertion order.
    pub fn active(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.list.iter().filter_map(|p| {
            p.value
                .as_deref()
                .map(|value| (p.name.as_str(), p.namespace.as_str(), value))
        })
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Drops parameters scheduled for removal.
    pub(crate) fn purge_removed(&mut self) {
        self.list.retain(|p| p.value.is_some());
    }

    fn position(&self, name: &str, namespace: &str) -> Option<usize> {
        self.list
            .iter()
            .position(|p| p.name == name && p.namespace == namespace)
    }
}

/// Output of one transform.
#[derive(Clone)]
pub struct TransformResult {
    pub stylesheet: DocumentId,
    pub output: XmlTree,
}

impl TransformResult {
    pub(crate) fn new(stylesheet: DocumentId, output: XmlTree) -> Self {
        Self { stylesheet, output }
    }

    fn import_into(&self, target: &mut XmlTree) -> Result<NodeId> {
        let root = self.output.document_element().ok_or_else(|| {
            XsltError::Transform("transform produced no document element".into())
        })?;
        Ok(target.import_node(&self.output, root))
    }

    /// Appends a copy of the output's root element to `element`, first
    /// removing its children when `empty` is set.
    pub fn insert_into(&self, target: &mut XmlTree, element: NodeId, empty: bool) -> Result<NodeId> {
        let copy = self.import_into(target)?;
        if empty {
            for child in target.children(element).to_vec() {
                target.remove_child(element, child)?;
            }
        }
        target.append_child(element, copy)?;
        Ok(copy)
    }

    /// Replaces `element` with a copy of the output's root element.
    pub fn replace(&self, target: &mut XmlTree, element: NodeId) -> Result<NodeId> {
        let parent = target
            .parent(element)
            .ok_or_else(|| XmlError::mutation("element to replace has no parent"))?;
        let copy = self.import_into(target)?;
        target.insert_before(parent, copy, Some(element))?;
        target.remove_child(parent, element)?;
        Ok(copy)
    }
}

impl fmt::Debug for TransformResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformResult")
            .field("stylesheet", &self.stylesheet)
            .field("output", &self.output.serialize())
            .finish()
    }
}

/// `href` of the document-level `<?xml-stylesheet type="text/xsl" …?>`
/// processing instruction, if any.
pub fn stylesheet_href(tree: &XmlTree) -> Option<String> {
    tree.children(tree.document_node())
        .iter()
        .find_map(|&node| match tree.kind(node) {
            NodeKind::ProcessingInstruction { target, data } if target == "xml-stylesheet" => {
                let mut kind = None;
                let mut href = None;
                for caps in PSEUDO_ATTRIBUTE.captures_iter(data) {
                    let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
                    match &caps[1] {
                        "type" => kind = value,
                        "href" => href = value,
                        _ => {}
                    }
                }
                (kind == Some("text/xsl")).then_some(href).flatten().map(str::to_string)
            }
            _ => None,
        })
}
