use super::tree::{Attribute, NodeId, NodeKind, XmlTree};
use crate::error::XmlError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Deepest element nesting accepted by [`XmlTree::parse`].
pub const MAX_DEPTH: usize = 2048;

impl XmlTree {
    /// Parses a complete XML document.
    ///
    /// The XML declaration and DOCTYPE are dropped. Whitespace outside the
    /// document element is ignored; any other top-level text is an error.
    /// Element namespaces are resolved against in-scope `xmlns` declarations
    /// while parsing, so an unbound prefix is reported here. Documents nested
    /// deeper than [`MAX_DEPTH`] are rejected.
    pub fn parse(text: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut tree = Self::new();
        let mut open: Vec<NodeId> = Vec::new();

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader
                .read_event()
                .map_err(|e| XmlError::new(e.to_string(), reader.buffer_position() as u64))?;

            match event {
                Event::Start(start) => {
                    check_depth(&open, position)?;
                    let parent = current(&tree, &open);
                    let element = open_element(&mut tree, parent, &start, position)?;
                    open.push(element);
                }
                Event::Empty(start) => {
                    check_depth(&open, position)?;
                    let parent = current(&tree, &open);
                    open_element(&mut tree, parent, &start, position)?;
                }
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    match open.pop() {
                        Some(element) if tree.name(element) == Some(name.as_str()) => {}
                        _ => {
                            return Err(XmlError::new(
                                format!("unexpected closing tag </{name}>"),
                                position,
                            ));
                        }
                    }
                }
                Event::Text(text) => {
                    let value = text
                        .unescape()
                        .map_err(|e| XmlError::new(e.to_string(), position))?;
                    if open.is_empty() {
                        if !value.trim().is_empty() {
                            return Err(XmlError::new(
                                "text outside the document element",
                                position,
                            ));
                        }
                        continue;
                    }
                    append(&mut tree, &open, NodeKind::Text(value.into_owned()), position)?;
                }
                Event::CData(data) => {
                    if open.is_empty() {
                        return Err(XmlError::new("CDATA outside the document element", position));
                    }
                    let value = String::from_utf8_lossy(&data).into_owned();
                    append(&mut tree, &open, NodeKind::CData(value), position)?;
                }
                Event::Comment(comment) => {
                    let value = String::from_utf8_lossy(&comment).into_owned();
                    append(&mut tree, &open, NodeKind::Comment(value), position)?;
                }
                Event::PI(pi) => {
                    let kind = NodeKind::ProcessingInstruction {
                        target: String::from_utf8_lossy(pi.target()).into_owned(),
                        data: String::from_utf8_lossy(pi.content()).trim().to_string(),
                    };
                    append(&mut tree, &open, kind, position)?;
                }
                Event::Decl(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if let Some(&unclosed) = open.last() {
            return Err(XmlError::new(
                format!("unclosed element <{}>", tree.name(unclosed).unwrap_or("?")),
                text.len() as u64,
            ));
        }
        if tree.document_element().is_none() {
            return Err(XmlError::new("document has no root element", 0));
        }

        Ok(tree)
    }
}

fn check_depth(open: &[NodeId], position: u64) -> Result<(), XmlError> {
    if open.len() >= MAX_DEPTH {
        return Err(XmlError::new(
            format!("elements nested deeper than {MAX_DEPTH} levels"),
            position,
        ));
    }
    Ok(())
}

fn current(tree: &XmlTree, open: &[NodeId]) -> NodeId {
    open.last().copied().unwrap_or(tree.document_node())
}

fn append(
    tree: &mut XmlTree,
    open: &[NodeId],
    kind: NodeKind,
    position: u64,
) -> Result<(), XmlError> {
    let parent = current(tree, open);
    let node = tree.create_node(kind);
    tree.append_child(parent, node)
        .map(|_| ())
        .map_err(|e| XmlError::new(e.message, position))
}

fn open_element(
    tree: &mut XmlTree,
    parent: NodeId,
    start: &BytesStart<'_>,
    position: u64,
) -> Result<NodeId, XmlError> {
    if parent == tree.document_node() && tree.document_element().is_some() {
        return Err(XmlError::new("multiple root elements", position));
    }

    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| XmlError::new(e.to_string(), position))?;
        let value = attribute
            .unescape_value()
            .map_err(|e| XmlError::new(e.to_string(), position))?;
        attributes.push(Attribute {
            name: String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
            value: value.into_owned(),
        });
    }

    let element = tree.create_node(NodeKind::Element {
        name,
        namespace: None,
        attributes,
    });
    tree.append_child(parent, element)
        .map_err(|e| XmlError::new(e.message, position))?;

    let prefix = tree.prefix(element).map(str::to_string);
    let namespace = tree.lookup_namespace_uri(element, prefix.as_deref());
    if let Some(prefix) = prefix
        && namespace.is_none()
    {
        return Err(XmlError::new(
            format!("unbound namespace prefix '{prefix}'"),
            position,
        ));
    }
    for attribute in tree.attributes(element) {
        if let Some((prefix, _)) = attribute.name.split_once(':')
            && prefix != "xmlns"
            && tree.lookup_namespace_uri(element, Some(prefix)).is_none()
        {
            return Err(XmlError::new(
                format!("unbound namespace prefix '{prefix}' on attribute"),
                position,
            ));
        }
    }
    tree.set_namespace(element, namespace);

    Ok(element)
}
