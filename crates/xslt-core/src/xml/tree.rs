use crate::error::XmlError;

/// The namespace bound to the reserved `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Index of a node inside an [`XmlTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A single attribute, stored with its qualified name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// Node payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element {
        /// Qualified name as written (`xsl:template`).
        name: String,
        /// Namespace URI the prefix resolved to when the node was created.
        namespace: Option<String>,
        attributes: Vec<Attribute>,
    },
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed mutable XML tree.
///
/// Node 0 is always the document node. Nodes created with
/// [`create_element`](Self::create_element) or
/// [`import_node`](Self::import_node) start detached and become part of the
/// document once inserted. Removed nodes stay in the arena but are no longer
/// reachable from the document node.
///
/// # Examples
///
/// ```
/// use xslt_core::xml::XmlTree;
///
/// let mut tree = XmlTree::parse("<root><a/></root>").unwrap();
/// let root = tree.document_element().unwrap();
/// let b = tree.create_element(None, "b");
/// tree.append_child(root, b).unwrap();
///
/// assert_eq!(tree.serialize(), "<root><a/><b/></root>");
/// ```
#[derive(Debug, Clone)]
pub struct XmlTree {
    nodes: Vec<Node>,
}

impl XmlTree {
    /// Creates a tree holding only the document node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub const fn document_node(&self) -> NodeId {
        NodeId(0)
    }

    /// The single top-level element, if any.
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.document_node())
            .iter()
            .copied()
            .find(|&id| self.is_element(id))
    }

    pub fn kind(&self, node: NodeId) -> &NodeKind {
        &self.nodes[node.0].kind
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    /// Element children only, in document order.
    pub fn element_children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(node)
            .iter()
            .copied()
            .filter(|&id| self.is_element(id))
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&id| id == node)?;
        siblings.get(index + 1).copied()
    }

    /// `node` and all its descendants in document (pre-)order.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Whether `node` is reachable from the document node.
    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current == self.document_node()
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(self.kind(node), NodeKind::Element { .. })
    }

    /// Qualified element name.
    pub fn name(&self, node: NodeId) -> Option<&str> {
        match self.kind(node) {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn local_name(&self, node: NodeId) -> Option<&str> {
        self.name(node)
            .map(|name| name.split_once(':').map_or(name, |(_, local)| local))
    }

    pub fn prefix(&self, node: NodeId) -> Option<&str> {
        self.name(node)
            .and_then(|name| name.split_once(':').map(|(prefix, _)| prefix))
    }

    pub fn namespace_uri(&self, node: NodeId) -> Option<&str> {
        match self.kind(node) {
            NodeKind::Element { namespace, .. } => namespace.as_deref(),
            _ => None,
        }
    }

    /// Whether `node` is the element `{namespace}local`.
    pub fn is_named(&self, node: NodeId, namespace: &str, local: &str) -> bool {
        self.namespace_uri(node) == Some(namespace) && self.local_name(node) == Some(local)
    }

    pub fn attributes(&self, node: NodeId) -> &[Attribute] {
        match self.kind(node) {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.attributes(node)
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Sets or overwrites an attribute. Ignored for non-element nodes.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[node.0].kind {
            match attributes.iter_mut().find(|a| a.name == name) {
                Some(existing) => existing.value = value.to_string(),
                None => attributes.push(Attribute {
                    name: name.to_string(),
                    value: value.to_string(),
                }),
            }
        }
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Option<String> {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[node.0].kind {
            let index = attributes.iter().position(|a| a.name == name)?;
            return Some(attributes.remove(index).value);
        }
        None
    }

    /// Resolves `prefix` (or the default namespace for `None`) in the scope
    /// of `node` by walking `xmlns` declarations up the ancestor chain.
    pub fn lookup_namespace_uri(&self, node: NodeId, prefix: Option<&str>) -> Option<String> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE.to_string());
        }
        let declaration = prefix.map_or_else(|| "xmlns".to_string(), |p| format!("xmlns:{p}"));
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(value) = self.attribute(id, &declaration) {
                return (!value.is_empty()).then(|| value.to_string());
            }
            current = self.parent(id);
        }
        None
    }

    /// Concatenated text of all descendant text and CDATA nodes.
    pub fn text_content(&self, node: NodeId) -> String {
        self.descendants(node)
            .into_iter()
            .filter_map(|id| match self.kind(id) {
                NodeKind::Text(text) | NodeKind::CData(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Creates a detached element.
    pub fn create_element(&mut self, namespace: Option<&str>, qualified_name: &str) -> NodeId {
        self.push(NodeKind::Element {
            name: qualified_name.to_string(),
            namespace: namespace.map(str::to_string),
            attributes: Vec::new(),
        })
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Comment(text.to_string()))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    pub(crate) fn set_namespace(&mut self, node: NodeId, uri: Option<String>) {
        if let NodeKind::Element { namespace, .. } = &mut self.nodes[node.0].kind {
            *namespace = uri;
        }
    }

    pub(crate) fn create_node(&mut self, kind: NodeKind) -> NodeId {
        self.push(kind)
    }

    /// Deep-copies `node` from `source` into this tree. The copy is detached.
    pub fn import_node(&mut self, source: &Self, node: NodeId) -> NodeId {
        let copy = self.push(source.kind(node).clone());
        let mut pending = vec![(node, copy)];
        while let Some((original, parent)) = pending.pop() {
            for &child in source.children(original) {
                let child_copy = self.push(source.kind(child).clone());
                self.attach(parent, child_copy, None);
                pending.push((child, child_copy));
            }
        }
        copy
    }

    /// Appends `child` as the last child of `parent`, moving it if it is
    /// already attached elsewhere.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<NodeId, XmlError> {
        self.check_insertable(parent, child)?;
        self.detach(child);
        self.attach(parent, child, None);
        Ok(child)
    }

    /// Inserts `child` before `reference`, or appends when `reference` is
    /// `None`.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<NodeId, XmlError> {
        let Some(reference) = reference else {
            return self.append_child(parent, child);
        };
        if reference == child {
            return Ok(child);
        }
        if self.parent(reference) != Some(parent) {
            return Err(XmlError::mutation("reference node is not a child of parent"));
        }
        self.check_insertable(parent, child)?;
        self.detach(child);
        let index = self.nodes[parent.0]
            .children
            .iter()
            .position(|&id| id == reference)
            .ok_or_else(|| XmlError::mutation("reference node is not a child of parent"))?;
        self.attach(parent, child, Some(index));
        Ok(child)
    }

    /// Detaches `child` from `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<NodeId, XmlError> {
        if self.parent(child) != Some(parent) {
            return Err(XmlError::mutation("node is not a child of parent"));
        }
        self.detach(child);
        Ok(child)
    }

    fn check_insertable(&self, parent: NodeId, child: NodeId) -> Result<(), XmlError> {
        if child == self.document_node() {
            return Err(XmlError::mutation("the document node cannot be inserted"));
        }
        let mut current = Some(parent);
        while let Some(id) = current {
            if id == child {
                return Err(XmlError::mutation("cannot insert a node into its own subtree"));
            }
            current = self.parent(id);
        }
        Ok(())
    }

    fn detach(&mut self, child: NodeId) {
        if let Some(parent) = self.nodes[child.0].parent.take() {
            self.nodes[parent.0].children.retain(|&id| id != child);
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) {
        self.nodes[child.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        match index {
            Some(index) => children.insert(index, child),
            None => children.push(child),
        }
    }
}

impl Default for XmlTree {
    fn default() -> Self {
        Self::new()
    }
}
