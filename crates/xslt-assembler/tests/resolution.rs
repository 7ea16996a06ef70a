//! Resolution of includes, imports and document() references against an
//! in-memory transport.

mod common;

use common::{Recorder, assembler, assembler_with, positions, stylesheet};
use std::sync::{Arc, Mutex};
use xslt_assembler::{
    AssemblerConfig, Busy, DependencyKind, DependencyStatus, DocumentConfig, DocumentEvent,
    DocumentId, EventKind, Flow, ReadyState, Resource, XsltError,
};
use xslt_core::{MAX_DEPTH, MemoryTransport, ResolutionError, StateError, TransportError};

fn in_order(positions: &[usize]) -> bool {
    positions.windows(2).all(|pair| pair[0] < pair[1])
}

#[tokio::test]
async fn test_include_and_document_reference_are_merged() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(
                    r#"<xsl:include href="b.xsl"/><xsl:template match="/"><xsl:value-of select="document('ext.xml')/codes/code"/></xsl:template>"#,
                ),
            )
            .with_document("mem:/xsl/b.xsl", &stylesheet(r#"<xsl:template name="b"/>"#))
            .with_document("mem:/xsl/ext.xml", "<codes><code>1</code></codes>"),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    let recorder = Recorder::attach(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();

    while assembler.dependencies(id).unwrap().is_empty() {
        assert!(assembler.step().await.unwrap());
    }
    assert_eq!(assembler.outstanding(id).unwrap(), 2);
    assert_eq!(assembler.resource(id).unwrap().busy(), Some(Busy::Resolving));
    assert_eq!(recorder.count(EventKind::Complete), 0);

    assembler.run().await.unwrap();

    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Complete
    );
    assert_eq!(assembler.outstanding(id).unwrap(), 0);
    assert!(assembler.resource(id).unwrap().busy().is_none());
    assert_eq!(recorder.count(EventKind::Complete), 1);
    assert_eq!(recorder.count(EventKind::Preprocessed), 1);
    assert_eq!(recorder.count(EventKind::Error), 0);

    let events = recorder.events();
    assert_eq!(
        &events[events.len() - 3..],
        &[
            DocumentEvent::Preprocessed { document: id },
            DocumentEvent::StateChange {
                document: id,
                state: ReadyState::Complete,
            },
            DocumentEvent::Complete { document: id },
        ]
    );

    let dependencies = assembler.dependencies(id).unwrap();
    assert_eq!(dependencies.len(), 2);
    assert_eq!(dependencies[0].kind, DependencyKind::Include);
    assert_eq!(dependencies[1].kind, DependencyKind::Document);
    assert_eq!(dependencies[1].variable, Some(1));
    for dependency in dependencies {
        assert_eq!(dependency.status, DependencyStatus::Merged);
        let child = assembler.document(dependency.document).unwrap();
        assert_eq!(child.ready_state(), ReadyState::Complete);
        assert_eq!(child.parent(), Some(id));
    }

    let output = assembler.tree(id).unwrap().serialize();
    assert_eq!(output.matches("xmlns:exsl=").count(), 1);
    assert!(output.contains(r#"xmlns:exsl="http://exslt.org/common""#));
    assert!(output.contains(r#"exclude-result-prefixes="exsl""#));
    assert!(!output.contains("document("));
    assert!(!output.contains("<xsl:include"));
    assert!(output.contains(r#"select="exsl:node-set($xslt-document-1)/codes/code""#));
    assert!(output.contains(
        r#"<xsl:variable name="xslt-document-1"><codes><code>1</code></codes></xsl:variable>"#
    ));
    assert!(in_order(&positions(
        &output,
        &[
            "<!-- document mem:/xsl/ext.xml -->",
            r#"<xsl:variable name="xslt-document-1">"#,
            "<!-- xsl:include mem:/xsl/b.xsl -->",
            r#"<xsl:template name="b"/>"#,
            r#"<xsl:template match="/">"#,
        ]
    )));
}

#[tokio::test]
async fn test_duplicate_references_fetch_once() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(
                    r#"<xsl:include href="b.xsl"/><xsl:include href="../xsl/b.xsl"/><xsl:template match="/"><xsl:if test='document("ext.xml")/a'><xsl:copy-of select="document('ext.xml')/a"/></xsl:if></xsl:template>"#,
                ),
            )
            .with_document("mem:/xsl/b.xsl", &stylesheet(r#"<xsl:template name="b"/>"#))
            .with_document("mem:/xsl/ext.xml", "<a/>"),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert_eq!(transport.request_count("mem:/xsl/b.xsl"), 1);
    assert_eq!(transport.request_count("mem:/xsl/ext.xml"), 1);
    assert_eq!(assembler.dependencies(id).unwrap().len(), 2);

    let output = assembler.tree(id).unwrap().serialize();
    assert_eq!(output.matches(r#"<xsl:template name="b"/>"#).count(), 1);
    assert!(output.contains("<!-- xsl:include mem:/xsl/b.xsl (already included) -->"));
    assert_eq!(output.matches("<xsl:variable").count(), 1);
    assert_eq!(output.matches("node-set($xslt-document-1)").count(), 2);
    assert!(!output.contains("document("));
}

#[tokio::test]
async fn test_nested_tree_merges_in_directive_order_regardless_of_arrival() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(
                    r#"<xsl:template name="main-before"/><xsl:include href="a.xsl"/><xsl:include href="b.xsl"/><xsl:template name="main-after"/>"#,
                ),
            )
            .with_document(
                "mem:/xsl/a.xsl",
                &stylesheet(
                    r#"<xsl:template name="a-before"/><xsl:include href="nested/a1.xsl"/><xsl:template name="a-after"/>"#,
                ),
            )
            .with_document(
                "mem:/xsl/nested/a1.xsl",
                &stylesheet(r#"<xsl:template name="a1"/>"#),
            )
            .with_document("mem:/xsl/b.xsl", &stylesheet(r#"<xsl:template name="b"/>"#))
            .gated("mem:/xsl/a.xsl"),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    let recorder = Recorder::attach(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();

    // b.xsl lands first while a.xsl is held back
    while !assembler
        .dependencies(id)
        .unwrap()
        .iter()
        .any(|dep| dep.url.as_str() == "mem:/xsl/b.xsl" && dep.status == DependencyStatus::Resolved)
    {
        assert!(assembler.step().await.unwrap());
    }
    assert_eq!(assembler.outstanding(id).unwrap(), 1);
    transport.release("mem:/xsl/a.xsl");
    assembler.run().await.unwrap();

    assert_eq!(recorder.count(EventKind::Complete), 1);
    assert_eq!(assembler.dependencies(id).unwrap().len(), 3);

    let nested = &assembler.dependencies(id).unwrap()[2];
    assert_eq!(nested.url.as_str(), "mem:/xsl/nested/a1.xsl");
    assert_eq!(
        nested.base.as_ref().map(|url| url.as_str()),
        Some("mem:/xsl/a.xsl")
    );
    let chain: Vec<&str> = nested.chain.iter().map(|url| url.as_str()).collect();
    assert_eq!(
        chain,
        vec!["mem:/xsl/main.xsl", "mem:/xsl/a.xsl", "mem:/xsl/nested/a1.xsl"]
    );

    let output = assembler.tree(id).unwrap().serialize();
    let names = ["main-before", "a-before", "a1", "a-after", "b", "main-after"];
    let needles: Vec<String> = names
        .iter()
        .map(|name| format!(r#"<xsl:template name="{name}"/>"#))
        .collect();
    let needles: Vec<&str> = needles.iter().map(String::as_str).collect();
    assert!(in_order(&positions(&output, &needles)));
    for needle in needles {
        assert_eq!(output.matches(needle).count(), 1);
    }
}

#[tokio::test]
async fn test_import_keeps_overriding_root_declarations() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(
                    r#"<xsl:import href="base.xsl"/><xsl:template name="shared">root</xsl:template>"#,
                ),
            )
            .with_document(
                "mem:/xsl/base.xsl",
                &stylesheet(
                    r#"<xsl:template name="shared">base</xsl:template><xsl:template name="extra"/>"#,
                ),
            ),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    let output = assembler.tree(id).unwrap().serialize();
    assert!(output.contains("<!-- xsl:import mem:/xsl/base.xsl -->"));
    assert!(output.contains(r#"<xsl:template name="shared">root</xsl:template>"#));
    assert!(!output.contains(">base<"));
    assert!(output.contains(r#"<xsl:template name="extra"/>"#));
}

#[tokio::test]
async fn test_document_reference_resolves_against_including_fragment() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:include href="sub/b.xsl"/>"#),
            )
            .with_document(
                "mem:/xsl/sub/b.xsl",
                &stylesheet(r#"<xsl:variable name="v" select="document('data.xml')/x"/>"#),
            )
            .with_document("mem:/xsl/sub/data.xml", "<x/>"),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert_eq!(transport.request_count("mem:/xsl/sub/data.xml"), 1);
    let output = assembler.tree(id).unwrap().serialize();
    assert!(in_order(&positions(
        &output,
        &[
            "<!-- document mem:/xsl/sub/data.xml -->",
            "<!-- xsl:include mem:/xsl/sub/b.xsl -->",
            r#"<xsl:variable name="v" select="exsl:node-set($xslt-document-1)/x"/>"#,
        ]
    )));
}

#[tokio::test]
async fn test_shared_dependency_is_not_a_cycle() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:include href="a.xsl"/><xsl:include href="b.xsl"/>"#),
            )
            .with_document("mem:/xsl/a.xsl", &stylesheet(r#"<xsl:include href="common.xsl"/>"#))
            .with_document("mem:/xsl/b.xsl", &stylesheet(r#"<xsl:include href="common.xsl"/>"#))
            .with_document(
                "mem:/xsl/common.xsl",
                &stylesheet(r#"<xsl:template name="common"/>"#),
            ),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Complete
    );
    assert_eq!(transport.request_count("mem:/xsl/common.xsl"), 1);
    let output = assembler.tree(id).unwrap().serialize();
    assert_eq!(output.matches(r#"<xsl:template name="common"/>"#).count(), 1);
}

/// Loads main.xsl from `sources` with `first` and `second` held back, lets
/// `first` land before `second` and returns the assembled stylesheet.
async fn assemble_in_order(sources: MemoryTransport, first: &str, second: &str) -> String {
    let transport = Arc::new(sources.gated(first).gated(second));
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();

    transport.release(first);
    while !assembler
        .dependencies(id)
        .unwrap()
        .iter()
        .any(|dep| dep.url.as_str() == first && dep.status == DependencyStatus::Resolved)
    {
        assert!(assembler.step().await.unwrap());
    }
    transport.release(second);
    assembler.run().await.unwrap();

    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Complete
    );
    assembler.tree(id).unwrap().serialize()
}

fn import_and_include_sources() -> MemoryTransport {
    MemoryTransport::new()
        .with_document(
            "mem:/xsl/main.xsl",
            &stylesheet(
                r#"<xsl:import href="a.xsl"/><xsl:include href="b.xsl"/><xsl:template name="main"/>"#,
            ),
        )
        .with_document(
            "mem:/xsl/a.xsl",
            &stylesheet(r#"<xsl:template name="x">a</xsl:template><xsl:template name="a-only"/>"#),
        )
        .with_document(
            "mem:/xsl/b.xsl",
            &stylesheet(r#"<xsl:template name="x">b</xsl:template>"#),
        )
}

#[tokio::test]
async fn test_included_declaration_overrides_import_in_either_arrival_order() {
    let import_first =
        assemble_in_order(import_and_include_sources(), "mem:/xsl/a.xsl", "mem:/xsl/b.xsl").await;
    let include_first =
        assemble_in_order(import_and_include_sources(), "mem:/xsl/b.xsl", "mem:/xsl/a.xsl").await;

    assert_eq!(import_first, include_first);
    assert!(import_first.contains(r#"<xsl:template name="x">b</xsl:template>"#));
    assert!(!import_first.contains(r#"<xsl:template name="x">a</xsl:template>"#));
    assert!(import_first.contains(r#"<xsl:template name="a-only"/>"#));
    assert!(in_order(&positions(
        &import_first,
        &[
            "<!-- xsl:import mem:/xsl/a.xsl -->",
            r#"<xsl:template name="a-only"/>"#,
            "<!-- xsl:include mem:/xsl/b.xsl -->",
            r#"<xsl:template name="main"/>"#,
        ]
    )));
}

fn two_fragment_document_sources() -> MemoryTransport {
    MemoryTransport::new()
        .with_document(
            "mem:/xsl/main.xsl",
            &stylesheet(r#"<xsl:include href="b.xsl"/><xsl:include href="c.xsl"/>"#),
        )
        .with_document(
            "mem:/xsl/b.xsl",
            &stylesheet(r#"<xsl:variable name="vb" select="document('b.xml')/r"/>"#),
        )
        .with_document(
            "mem:/xsl/c.xsl",
            &stylesheet(r#"<xsl:variable name="vc" select="document('c.xml')/r"/>"#),
        )
        .with_document("mem:/xsl/b.xml", "<r>b</r>")
        .with_document("mem:/xsl/c.xml", "<r>c</r>")
}

#[tokio::test]
async fn test_document_variables_follow_document_order_in_either_arrival_order() {
    let b_first =
        assemble_in_order(two_fragment_document_sources(), "mem:/xsl/b.xsl", "mem:/xsl/c.xsl").await;
    let c_first =
        assemble_in_order(two_fragment_document_sources(), "mem:/xsl/c.xsl", "mem:/xsl/b.xsl").await;

    assert_eq!(b_first, c_first);
    assert!(b_first.contains(r#"<xsl:variable name="xslt-document-1"><r>b</r></xsl:variable>"#));
    assert!(b_first.contains(r#"<xsl:variable name="xslt-document-2"><r>c</r></xsl:variable>"#));
    assert!(b_first.contains(r#"<xsl:variable name="vb" select="exsl:node-set($xslt-document-1)/r"/>"#));
    assert!(b_first.contains(r#"<xsl:variable name="vc" select="exsl:node-set($xslt-document-2)/r"/>"#));
    assert!(in_order(&positions(
        &b_first,
        &[
            "<!-- document mem:/xsl/b.xml -->",
            "<!-- document mem:/xsl/c.xml -->",
            "<!-- xsl:include mem:/xsl/b.xsl -->",
            "<!-- xsl:include mem:/xsl/c.xsl -->",
        ]
    )));
}

#[tokio::test]
async fn test_included_is_published_on_merged_dependencies() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(
                    r#"<xsl:include href="b.xsl"/><xsl:variable name="v" select="document('ext.xml')"/>"#,
                ),
            )
            .with_document("mem:/xsl/b.xsl", &stylesheet(r#"<xsl:template name="b"/>"#))
            .with_document("mem:/xsl/ext.xml", "<ext/>"),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    while assembler.dependencies(id).unwrap().is_empty() {
        assert!(assembler.step().await.unwrap());
    }

    let children: Vec<DocumentId> = assembler
        .dependencies(id)
        .unwrap()
        .iter()
        .map(|dep| dep.document)
        .collect();
    let recorders: Vec<Recorder> = children
        .iter()
        .map(|&child| Recorder::attach(&mut assembler, child))
        .collect();
    assembler.run().await.unwrap();

    for (child, recorder) in children.into_iter().zip(recorders) {
        assert_eq!(recorder.count(EventKind::Included), 1);
        assert!(recorder.events().contains(&DocumentEvent::Included {
            document: child,
            into: id,
        }));
    }
}

fn nested_elements(depth: usize) -> String {
    format!("{}{}", "<d>".repeat(depth), "</d>".repeat(depth))
}

#[tokio::test]
async fn test_deep_document_reference_is_assembled() {
    let depth = MAX_DEPTH - 8;
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:variable name="v" select="document('deep.xml')"/>"#),
            )
            .with_document("mem:/xsl/deep.xml", &nested_elements(depth)),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Complete
    );
    let output = assembler.tree(id).unwrap().serialize();
    assert_eq!(output.matches("<d>").count(), depth - 1);
    assert_eq!(output.matches("<d/>").count(), 1);
}

#[tokio::test]
async fn test_overly_deep_dependency_is_parse_error() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:variable name="v" select="document('deep.xml')"/>"#),
            )
            .with_document("mem:/xsl/deep.xml", &nested_elements(100_000)),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    let errors = collect_errors(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Error
    );
    assert!(matches!(
        errors.lock().unwrap()[0].root_cause(),
        XsltError::ParseError { url, .. } if url == "mem:/xsl/deep.xml"
    ));
}

/// Attaches an `Error` listener that collects published errors.
fn collect_errors(assembler: &mut xslt_assembler::Assembler, id: xslt_assembler::DocumentId) -> Arc<Mutex<Vec<XsltError>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    assembler
        .subscribe(id, EventKind::Error, move |event| {
            if let DocumentEvent::Error { error, .. } = event {
                sink.lock().unwrap().push(error.clone());
            }
            Flow::Continue
        })
        .unwrap();
    errors
}

#[tokio::test]
async fn test_leaf_failure_fails_root_and_siblings_still_settle() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:include href="b.xsl"/><xsl:include href="c.xsl"/>"#),
            )
            .with_document("mem:/xsl/b.xsl", &stylesheet(r#"<xsl:include href="missing.xsl"/>"#))
            .with_document("mem:/xsl/c.xsl", &stylesheet(r#"<xsl:template name="c"/>"#))
            .gated("mem:/xsl/c.xsl"),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    let errors = collect_errors(&mut assembler, id);
    let recorder = Recorder::attach(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();

    while assembler.document(id).unwrap().ready_state() != ReadyState::Error {
        assert!(assembler.step().await.unwrap());
    }
    // c.xsl is still in flight and keeps the root busy
    assert_eq!(assembler.resource(id).unwrap().busy(), Some(Busy::Resolving));
    assert_eq!(
        assembler.load(id, "mem:/xsl/main.xsl").unwrap_err(),
        StateError::Busy {
            operation: "load",
            marker: "resolving",
        }
        .into()
    );

    transport.release("mem:/xsl/c.xsl");
    assembler.run().await.unwrap();

    assert_eq!(assembler.outstanding(id).unwrap(), 0);
    assert!(assembler.resource(id).unwrap().busy().is_none());
    assert_eq!(recorder.count(EventKind::Complete), 0);
    assert_eq!(recorder.count(EventKind::Error), 1);

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(assembler.document(id).unwrap().errors(), errors.as_slice());
    assert_eq!(
        errors[0].root_cause(),
        &XsltError::Transport(TransportError::Status {
            url: "mem:/xsl/missing.xsl".into(),
            status: 404,
        })
    );

    let statuses: Vec<(&str, DependencyStatus)> = assembler
        .dependencies(id)
        .unwrap()
        .iter()
        .map(|dep| (dep.url.as_str(), dep.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("mem:/xsl/b.xsl", DependencyStatus::Resolved),
            ("mem:/xsl/c.xsl", DependencyStatus::Skipped),
            ("mem:/xsl/missing.xsl", DependencyStatus::Failed),
        ]
    );
    let output = assembler.tree(id).unwrap().serialize();
    assert!(!output.contains(r#"<xsl:template name="c"/>"#));
}

#[tokio::test]
async fn test_unhandled_dependency_failure_is_returned_from_run() {
    let transport = Arc::new(MemoryTransport::new().with_document(
        "mem:/xsl/main.xsl",
        &stylesheet(r#"<xsl:include href="missing.xsl"/>"#),
    ));
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();

    let error = assembler.run().await.unwrap_err();
    assert!(matches!(
        &error,
        XsltError::Dependency { url, .. } if url == "mem:/xsl/missing.xsl"
    ));
    assert!(matches!(
        error.root_cause(),
        XsltError::Transport(TransportError::Status { status: 404, .. })
    ));
    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Error
    );
}

#[tokio::test]
async fn test_dependency_timeout_fails_root() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:include href="slow.xsl"/>"#),
            )
            .with_hang("mem:/xsl/slow.xsl"),
    );
    let config = AssemblerConfig {
        document: DocumentConfig {
            timeout_ms: 20,
            ..DocumentConfig::default()
        },
        ..AssemblerConfig::default()
    };
    let mut assembler = assembler_with(&transport, config);
    let id = assembler.create_stylesheet();
    let errors = collect_errors(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Error
    );
    assert_eq!(
        errors.lock().unwrap()[0].root_cause(),
        &XsltError::Transport(TransportError::Timeout {
            url: "mem:/xsl/slow.xsl".into(),
            after_ms: 20,
        })
    );
}

#[tokio::test]
async fn test_network_failure_fails_root() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:include href="b.xsl"/>"#),
            )
            .with_failure("mem:/xsl/b.xsl", "connection reset"),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    let errors = collect_errors(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert!(matches!(
        errors.lock().unwrap()[0].root_cause(),
        XsltError::Transport(TransportError::Network { .. })
    ));
}

#[tokio::test]
async fn test_malformed_dependency_is_parse_error() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:include href="b.xsl"/>"#),
            )
            .with_document("mem:/xsl/b.xsl", "<xsl:stylesheet"),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    let errors = collect_errors(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert!(matches!(
        errors.lock().unwrap()[0].root_cause(),
        XsltError::ParseError { url, .. } if url == "mem:/xsl/b.xsl"
    ));
}

#[tokio::test]
async fn test_cyclic_inclusion_is_resolution_error() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:include href="a.xsl"/>"#),
            )
            .with_document("mem:/xsl/a.xsl", &stylesheet(r#"<xsl:include href="main.xsl"/>"#)),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    let errors = collect_errors(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert_eq!(transport.request_count("mem:/xsl/main.xsl"), 1);
    assert_eq!(
        errors.lock().unwrap()[0].root_cause(),
        &XsltError::Resolution(ResolutionError::Cycle {
            url: "mem:/xsl/main.xsl".into(),
        })
    );
}

#[tokio::test]
async fn test_self_inclusion_is_resolution_error() {
    let transport = Arc::new(MemoryTransport::new().with_document(
        "mem:/xsl/main.xsl",
        &stylesheet(r#"<xsl:include href="main.xsl"/>"#),
    ));
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    let errors = collect_errors(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert_eq!(
        errors.lock().unwrap()[0],
        XsltError::Resolution(ResolutionError::Cycle {
            url: "mem:/xsl/main.xsl".into(),
        })
    );
    assert!(assembler.dependencies(id).unwrap().is_empty());
}

#[tokio::test]
async fn test_sequential_mode_fetches_one_at_a_time() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(
                    r#"<xsl:include href="a.xsl"/><xsl:include href="b.xsl"/><xsl:include href="c.xsl"/>"#,
                ),
            )
            .with_document("mem:/xsl/a.xsl", &stylesheet(r#"<xsl:template name="a"/>"#))
            .with_document("mem:/xsl/b.xsl", &stylesheet(r#"<xsl:template name="b"/>"#))
            .with_document("mem:/xsl/c.xsl", &stylesheet(r#"<xsl:template name="c"/>"#)),
    );
    let config = AssemblerConfig {
        document: DocumentConfig {
            asynchronous: false,
            ..DocumentConfig::default()
        },
        ..AssemblerConfig::default()
    };
    let mut assembler = assembler_with(&transport, config);
    let id = assembler.create_stylesheet();
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();

    while assembler.dependencies(id).unwrap().is_empty() {
        assert!(assembler.step().await.unwrap());
    }
    let statuses: Vec<DependencyStatus> = assembler
        .dependencies(id)
        .unwrap()
        .iter()
        .map(|dep| dep.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            DependencyStatus::Fetching,
            DependencyStatus::Queued,
            DependencyStatus::Queued,
        ]
    );
    assert_eq!(assembler.outstanding(id).unwrap(), 3);

    assembler.run().await.unwrap();
    assert_eq!(
        transport.requests(),
        vec![
            "mem:/xsl/main.xsl",
            "mem:/xsl/a.xsl",
            "mem:/xsl/b.xsl",
            "mem:/xsl/c.xsl",
        ]
    );
    let output = assembler.tree(id).unwrap().serialize();
    assert!(in_order(&positions(
        &output,
        &[
            r#"<xsl:template name="a"/>"#,
            r#"<xsl:template name="b"/>"#,
            r#"<xsl:template name="c"/>"#,
        ]
    )));
}

#[tokio::test]
async fn test_sequential_mode_skips_queued_after_failure() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document(
                "mem:/xsl/main.xsl",
                &stylesheet(r#"<xsl:include href="missing.xsl"/><xsl:include href="b.xsl"/>"#),
            )
            .with_document("mem:/xsl/b.xsl", &stylesheet(r#"<xsl:template name="b"/>"#)),
    );
    let config = AssemblerConfig {
        document: DocumentConfig {
            asynchronous: false,
            ..DocumentConfig::default()
        },
        ..AssemblerConfig::default()
    };
    let mut assembler = assembler_with(&transport, config);
    let id = assembler.create_stylesheet();
    collect_errors(&mut assembler, id);
    assembler.load(id, "mem:/xsl/main.xsl").unwrap();
    assembler.run().await.unwrap();

    assert_eq!(transport.request_count("mem:/xsl/b.xsl"), 0);
    let statuses: Vec<DependencyStatus> = assembler
        .dependencies(id)
        .unwrap()
        .iter()
        .map(|dep| dep.status)
        .collect();
    assert_eq!(
        statuses,
        vec![DependencyStatus::Failed, DependencyStatus::Skipped]
    );
    assert_eq!(assembler.outstanding(id).unwrap(), 0);
    assert!(assembler.resource(id).unwrap().busy().is_none());
}

#[test]
fn test_directive_without_href_is_resolution_error() {
    let transport = Arc::new(MemoryTransport::new());
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();

    let error = assembler
        .parse(id, &stylesheet("<xsl:include/>"))
        .unwrap_err();
    assert_eq!(
        error,
        ResolutionError::MissingHref {
            directive: "xsl:include".into(),
        }
        .into()
    );
    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Error
    );
    assert!(assembler.resource(id).unwrap().busy().is_none());
}

#[test]
fn test_relative_reference_without_base_url() {
    let transport = Arc::new(MemoryTransport::new());
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();

    let error = assembler
        .parse(id, &stylesheet(r#"<xsl:import href="base.xsl"/>"#))
        .unwrap_err();
    assert_eq!(error, ResolutionError::NoBaseUrl("base.xsl".into()).into());
}

#[tokio::test]
async fn test_parsed_stylesheet_resolves_against_base_url() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_document("mem:/xsl/b.xsl", &stylesheet(r#"<xsl:template name="b"/>"#)),
    );
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    assembler.set_base_url(id, "mem:/xsl/inline.xsl").unwrap();
    assembler
        .parse(
            id,
            &stylesheet(
                r#"<xsl:include href="b.xsl"/><xsl:variable name="self" select="document('')"/>"#,
            ),
        )
        .unwrap();
    assert_eq!(assembler.outstanding(id).unwrap(), 1);

    assembler.run().await.unwrap();

    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Complete
    );
    let output = assembler.tree(id).unwrap().serialize();
    assert!(output.contains(r#"<xsl:template name="b"/>"#));
    // document('') is the stylesheet itself and stays untouched
    assert!(output.contains("document("));
    assert!(!output.contains("xmlns:exsl"));
}

#[test]
fn test_stylesheet_without_dependencies_completes_synchronously() {
    let transport = Arc::new(MemoryTransport::new());
    let mut assembler = assembler(&transport);
    let id = assembler.create_stylesheet();
    let recorder = Recorder::attach(&mut assembler, id);

    assembler
        .parse(id, &stylesheet(r#"<xsl:template match="/"/>"#))
        .unwrap();

    assert_eq!(
        assembler.document(id).unwrap().ready_state(),
        ReadyState::Complete
    );
    assert_eq!(recorder.count(EventKind::Preprocessed), 1);
    assert_eq!(recorder.count(EventKind::Complete), 1);
    assert!(
        assembler
            .resource(id)
            .unwrap()
            .is_resolution_root()
    );
    assert!(transport.requests().is_empty());
}
