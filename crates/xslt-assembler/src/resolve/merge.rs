use super::DependencyKind;
use std::collections::{BTreeMap, HashMap, HashSet};
use url::Url;
use xslt_core::error::{ResolutionError, Result};
use xslt_core::xml::{NodeId, XmlTree};

/// What a top-level declaration defines, for `xsl:import` precedence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Declaration {
    NamedTemplate(String),
    MatchTemplate {
        pattern: String,
        mode: Option<String>,
    },
    Global(String),
}

fn declarations(tree: &XmlTree, node: NodeId, xsl: &str) -> Vec<Declaration> {
    let mut found = Vec::new();
    if tree.is_named(node, xsl, "template") {
        if let Some(name) = tree.attribute(node, "name") {
            found.push(Declaration::NamedTemplate(name.to_string()));
        }
        if let Some(pattern) = tree.attribute(node, "match") {
            found.push(Declaration::MatchTemplate {
                pattern: pattern.to_string(),
                mode: tree.attribute(node, "mode").map(str::to_string),
            });
        }
    } else if (tree.is_named(node, xsl, "variable") || tree.is_named(node, xsl, "param"))
        && let Some(name) = tree.attribute(node, "name")
    {
        found.push(Declaration::Global(name.to_string()));
    }
    found
}

/// Replaces `directive` with a provenance comment followed by the top-level
/// children of `fragment`, in order. Returns the spliced nodes.
///
/// Namespace declarations of the fragment's root element are carried over
/// so QNames inside attribute values keep resolving.
pub(crate) fn splice(
    root: &mut XmlTree,
    directive: NodeId,
    fragment: &XmlTree,
    kind: DependencyKind,
    url: &Url,
) -> Result<Vec<NodeId>> {
    let parent = root
        .parent(directive)
        .filter(|_| root.is_attached(directive))
        .ok_or(ResolutionError::DetachedDirective)?;
    let fragment_root = fragment
        .document_element()
        .ok_or_else(|| ResolutionError::EmptyDocument {
            url: url.to_string(),
        })?;

    let comment = root.create_comment(&format!(" {kind} {url} "));
    root.insert_before(parent, comment, Some(directive))?;

    let mut local_declarations = Vec::new();
    for attribute in fragment.attributes(fragment_root) {
        let Some(prefix) = attribute.name.strip_prefix("xmlns:") else {
            continue;
        };
        match root.lookup_namespace_uri(parent, Some(prefix)) {
            Some(uri) if uri == attribute.value => {}
            None => root.set_attribute(parent, &attribute.name, &attribute.value),
            Some(_) => local_declarations.push(attribute.clone()),
        }
    }

    let mut spliced = Vec::new();
    for &child in fragment.children(fragment_root) {
        let copy = root.import_node(fragment, child);
        if root.is_element(copy) {
            for declaration in &local_declarations {
                if root.attribute(copy, &declaration.name).is_none() {
                    root.set_attribute(copy, &declaration.name, &declaration.value);
                }
            }
        }
        root.insert_before(parent, copy, Some(directive))?;
        spliced.push(copy);
    }

    root.remove_child(parent, directive)?;
    Ok(spliced)
}

/// Removes imported top-level declarations that another declaration of
/// `stylesheet` overrides. Returns the removed nodes.
///
/// Per declaration the last one not coming from an import wins; when all
/// of them were imported, the last one wins. Nothing else is removed, so
/// two conflicting declarations from the same import level both stay.
pub(crate) fn drop_overridden(
    root: &mut XmlTree,
    stylesheet: NodeId,
    imported: &HashSet<NodeId>,
    xsl: &str,
) -> Result<Vec<NodeId>> {
    let children = root.children(stylesheet).to_vec();

    let mut winners: HashMap<Declaration, NodeId> = HashMap::new();
    for &node in &children {
        let is_imported = imported.contains(&node);
        for declaration in declarations(root, node, xsl) {
            let keep_current = winners
                .get(&declaration)
                .is_some_and(|current| is_imported && !imported.contains(current));
            if !keep_current {
                winners.insert(declaration, node);
            }
        }
    }

    let mut removed = Vec::new();
    for node in children {
        if !imported.contains(&node) {
            continue;
        }
        let shadowed = declarations(root, node, xsl)
            .iter()
            .any(|declaration| winners.get(declaration) != Some(&node));
        if shadowed {
            root.remove_child(stylesheet, node)?;
            removed.push(node);
        }
    }
    Ok(removed)
}

/// Replaces a directive that duplicates an earlier one with a comment.
pub(crate) fn drop_duplicate(
    root: &mut XmlTree,
    directive: NodeId,
    kind: DependencyKind,
    url: &Url,
) -> Result<()> {
    let parent = root
        .parent(directive)
        .ok_or(ResolutionError::DetachedDirective)?;
    let comment = root.create_comment(&format!(" {kind} {url} (already included) "));
    root.insert_before(parent, comment, Some(directive))?;
    root.remove_child(parent, directive)?;
    Ok(())
}

/// Inserts `<xsl:variable name="{name}">` holding a copy of `fragment`'s
/// root element, preceded by a provenance comment.
///
/// Variables sit at the front of `stylesheet`, ordered by id, so every
/// variable precedes the template content. Returns (comment, variable).
#[allow(clippy::too_many_arguments)]
pub(crate) fn synthesize_variable(
    root: &mut XmlTree,
    stylesheet: NodeId,
    variables: &BTreeMap<u32, (NodeId, NodeId)>,
    id: u32,
    name: &str,
    fragment: &XmlTree,
    url: &Url,
    xsl: &str,
) -> Result<(NodeId, NodeId)> {
    let content = fragment
        .document_element()
        .ok_or_else(|| ResolutionError::EmptyDocument {
            url: url.to_string(),
        })?;

    let qualified_name = if root.namespace_uri(stylesheet) == Some(xsl) {
        root.prefix(stylesheet)
            .map_or_else(|| "variable".to_string(), |p| format!("{p}:variable"))
    } else {
        "xsl:variable".to_string()
    };

    let comment = root.create_comment(&format!(" document {url} "));
    let variable = root.create_element(Some(xsl), &qualified_name);
    root.set_attribute(variable, "name", name);
    let copy = root.import_node(fragment, content);
    root.append_child(variable, copy)?;

    let reference = if let Some((_, (next_comment, _))) = variables.range(id + 1..).next() {
        Some(*next_comment)
    } else if let Some((_, (_, previous))) = variables.range(..id).next_back() {
        root.next_sibling(*previous)
    } else {
        root.children(stylesheet).first().copied()
    };

    root.insert_before(stylesheet, comment, reference)?;
    root.insert_before(stylesheet, variable, reference)?;
    Ok((comment, variable))
}

/// Binds `prefix` to `uri` on `stylesheet` and lists it in
/// `exclude-result-prefixes`. Returns whether a declaration was added.
pub(crate) fn declare_extension_namespace(
    root: &mut XmlTree,
    stylesheet: NodeId,
    prefix: &str,
    uri: &str,
    xsl: &str,
) -> bool {
    let declared = root.lookup_namespace_uri(stylesheet, Some(prefix)).as_deref() != Some(uri);
    if declared {
        root.set_attribute(stylesheet, &format!("xmlns:{prefix}"), uri);
    }

    if root.namespace_uri(stylesheet) != Some(xsl) {
        tracing::debug!("literal result stylesheet; exclude-result-prefixes not updated");
        return declared;
    }

    let existing = root
        .attribute(stylesheet, "exclude-result-prefixes")
        .unwrap_or_default();
    if !existing.split_whitespace().any(|token| token == prefix) {
        let updated = if existing.trim().is_empty() {
            prefix.to_string()
        } else {
            format!("{} {}", existing.trim(), prefix)
        };
        root.set_attribute(stylesheet, "exclude-result-prefixes", &updated);
    }
    declared
}
