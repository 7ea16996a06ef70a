use super::DependencyKind;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use xslt_core::xml::{NodeId, XmlTree};

/// Attributes of XSL instructions that hold XPath expressions.
pub(crate) const XPATH_ATTRIBUTES: [&str; 7] =
    ["select", "test", "match", "use", "value", "count", "from"];

/// `document('…')` or `document("…")` with a single string literal argument.
/// Group 1 is the preceding character, groups 2/3 the literal.
static DOCUMENT_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(^|[^\w.:-])document\(\s*(?:'([^']*)'|"([^"]*)")\s*\)"#)
        .expect("Invalid regex")
});

/// A dependency found in a stylesheet tree, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Discovery {
    Directive {
        kind: DependencyKind,
        node: NodeId,
        href: Option<String>,
    },
    Reference {
        node: NodeId,
        attribute: String,
        hrefs: Vec<String>,
    },
}

/// Scans top-level `nodes` for inclusion directives and every XSL element
/// below them for `document()` references.
pub(crate) fn scan(tree: &XmlTree, nodes: &[NodeId], xsl: &str) -> Vec<Discovery> {
    let mut found = Vec::new();

    for &node in nodes {
        if let Some(kind) = directive_kind(tree, node, xsl) {
            found.push(Discovery::Directive {
                kind,
                node,
                href: tree.attribute(node, "href").map(str::to_string),
            });
            continue;
        }

        for element in tree.descendants(node) {
            if tree.namespace_uri(element) != Some(xsl) {
                continue;
            }
            for attribute in tree.attributes(element) {
                if !XPATH_ATTRIBUTES.contains(&attribute.name.as_str())
                    || !attribute.value.contains("document(")
                {
                    continue;
                }
                let hrefs = document_hrefs(&attribute.value);
                if hrefs.is_empty() {
                    tracing::warn!(
                        expression = %attribute.value,
                        "unsupported document() call left untouched"
                    );
                    continue;
                }
                found.push(Discovery::Reference {
                    node: element,
                    attribute: attribute.name.clone(),
                    hrefs,
                });
            }
        }
    }

    found
}

pub(crate) fn directive_kind(tree: &XmlTree, node: NodeId, xsl: &str) -> Option<DependencyKind> {
    if tree.is_named(node, xsl, "include") {
        Some(DependencyKind::Include)
    } else if tree.is_named(node, xsl, "import") {
        Some(DependencyKind::Import)
    } else {
        None
    }
}

/// Distinct non-empty string literals passed to `document()`, in order of
/// first appearance.
pub(crate) fn document_hrefs(expression: &str) -> Vec<String> {
    let mut hrefs: Vec<String> = Vec::new();
    for caps in DOCUMENT_CALL.captures_iter(expression) {
        let href = literal(&caps);
        if href.is_empty() {
            tracing::debug!(expression, "document('') refers to the stylesheet itself; skipped");
            continue;
        }
        if !hrefs.iter().any(|h| h == href) {
            hrefs.push(href.to_string());
        }
    }
    hrefs
}

/// Replaces every `document('href')` call whose href has an entry in
/// `replacements`. Other calls are kept verbatim.
pub(crate) fn rewrite_expression(expression: &str, replacements: &HashMap<String, String>) -> String {
    DOCUMENT_CALL
        .replace_all(expression, |caps: &Captures<'_>| {
            match replacements.get(literal(caps)) {
                Some(replacement) => format!("{}{}", &caps[1], replacement),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn literal<'a>(caps: &Captures<'a>) -> &'a str {
    caps.get(2)
        .or_else(|| caps.get(3))
        .map_or("", |m| m.as_str())
}
