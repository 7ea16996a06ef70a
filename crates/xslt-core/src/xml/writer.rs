use super::tree::{NodeId, NodeKind, XmlTree};
use quick_xml::escape::{escape, partial_escape};

/// Prefix bindings visible while writing one element.
struct Scope<'a> {
    bindings: Vec<(Option<&'a str>, &'a str)>,
}

impl<'a> Scope<'a> {
    fn lookup(&self, prefix: Option<&str>) -> Option<&'a str> {
        self.bindings
            .iter()
            .rev()
            .find(|(bound, _)| *bound == prefix)
            .map(|(_, uri)| *uri)
    }
}

enum Step<'a> {
    Open(NodeId),
    /// End tag of an element whose children were written; `mark` restores
    /// the bindings visible before it.
    Close { name: &'a str, mark: usize },
}

impl XmlTree {
    /// Serializes the document without an XML declaration.
    ///
    /// Elements whose namespace is not declared in scope at their output
    /// position (for example nodes imported from another tree) get the
    /// missing `xmlns` declaration added, so the output always re-parses to
    /// the same namespaces.
    pub fn serialize(&self) -> String {
        self.serialize_node(self.document_node())
    }

    /// Serializes `node` and its subtree.
    pub fn serialize_node(&self, node: NodeId) -> String {
        let mut out = String::new();
        let mut scope = Scope {
            bindings: Vec::new(),
        };
        self.write_node(node, &mut out, &mut scope);
        out
    }

    /// Writes `node` with an explicit stack so arbitrarily deep trees do
    /// not exhaust the call stack.
    fn write_node<'a>(&'a self, node: NodeId, out: &mut String, scope: &mut Scope<'a>) {
        let mut stack = vec![Step::Open(node)];

        while let Some(step) = stack.pop() {
            let node = match step {
                Step::Close { name, mark } => {
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                    scope.bindings.truncate(mark);
                    continue;
                }
                Step::Open(node) => node,
            };

            match self.kind(node) {
                NodeKind::Document => {
                    stack.extend(self.children(node).iter().rev().map(|&child| Step::Open(child)));
                }
                NodeKind::Element {
                    name,
                    namespace,
                    attributes,
                } => {
                    let mark = scope.bindings.len();
                    for attribute in attributes {
                        if attribute.name == "xmlns" {
                            scope.bindings.push((None, &attribute.value));
                        } else if let Some(prefix) = attribute.name.strip_prefix("xmlns:") {
                            scope.bindings.push((Some(prefix), &attribute.value));
                        }
                    }

                    out.push('<');
                    out.push_str(name);
                    for attribute in attributes {
                        push_attribute(out, &attribute.name, &attribute.value);
                    }

                    let prefix = name.split_once(':').map(|(prefix, _)| prefix);
                    let in_scope = scope.lookup(prefix).filter(|uri| !uri.is_empty());
                    match (namespace.as_deref(), prefix) {
                        (Some(uri), _) if in_scope != Some(uri) => {
                            let declaration =
                                prefix.map_or_else(|| "xmlns".to_string(), |p| format!("xmlns:{p}"));
                            push_attribute(out, &declaration, uri);
                            scope.bindings.push((prefix, uri));
                        }
                        (None, None) if in_scope.is_some() => {
                            push_attribute(out, "xmlns", "");
                            scope.bindings.push((None, ""));
                        }
                        _ => {}
                    }

                    let children = self.children(node);
                    if children.is_empty() {
                        out.push_str("/>");
                        scope.bindings.truncate(mark);
                    } else {
                        out.push('>');
                        stack.push(Step::Close { name, mark });
                        stack.extend(children.iter().rev().map(|&child| Step::Open(child)));
                    }
                }
                NodeKind::Text(text) => out.push_str(&partial_escape(text.as_str())),
                NodeKind::CData(text) => {
                    out.push_str("<![CDATA[");
                    out.push_str(text);
                    out.push_str("]]>");
                }
                NodeKind::Comment(text) => {
                    out.push_str("<!--");
                    out.push_str(text);
                    out.push_str("-->");
                }
                NodeKind::ProcessingInstruction { target, data } => {
                    out.push_str("<?");
                    out.push_str(target);
                    if !data.is_empty() {
                        out.push(' ');
                        out.push_str(data);
                    }
                    out.push_str("?>");
                }
            }
        }
    }
}

fn push_attribute(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape(value));
    out.push('"');
}
