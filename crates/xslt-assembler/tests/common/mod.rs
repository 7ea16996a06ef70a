//! Common test utilities for integration tests.
//!
//! Provides stylesheet builders, an in-memory assembler setup and an event
//! recorder shared by the integration tests.

#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use xslt_assembler::{
    Assembler, AssemblerConfig, DocumentEvent, DocumentId, EventKind, Flow, Parameters, Processor,
    TransformAdapter,
};
use xslt_core::{MemoryTransport, Result, XmlTree};

pub(crate) const XSL: &str = "http://www.w3.org/1999/XSL/Transform";

/// Wraps `body` in an `xsl:stylesheet` element.
pub(crate) fn stylesheet(body: &str) -> String {
    format!(r#"<xsl:stylesheet version="1.0" xmlns:xsl="{XSL}">{body}</xsl:stylesheet>"#)
}

/// Assembler over `transport` with the default configuration.
pub(crate) fn assembler(transport: &Arc<MemoryTransport>) -> Assembler {
    assembler_with(transport, AssemblerConfig::default())
}

pub(crate) fn assembler_with(transport: &Arc<MemoryTransport>, config: AssemblerConfig) -> Assembler {
    Assembler::new(config, Arc::clone(transport) as Arc<dyn xslt_core::Transport>)
}

/// Events published on one document, in order.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<DocumentEvent>>>,
}

impl Recorder {
    /// Subscribes to every event kind of `id`.
    pub(crate) fn attach(assembler: &mut Assembler, id: DocumentId) -> Self {
        let recorder = Self::default();
        for kind in [
            EventKind::StateChange,
            EventKind::Complete,
            EventKind::Error,
            EventKind::Included,
            EventKind::Preprocessed,
            EventKind::Transformed,
        ] {
            let events = Arc::clone(&recorder.events);
            assembler
                .subscribe(id, kind, move |event| {
                    events.lock().unwrap().push(event.clone());
                    Flow::Continue
                })
                .unwrap();
        }
        recorder
    }

    pub(crate) fn events(&self) -> Vec<DocumentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        use xslt_core::BusEvent;
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

/// Adapter whose processor echoes the active parameters and the input's
/// root element name.
#[derive(Default)]
pub(crate) struct EchoAdapter {
    pub(crate) compiled: Arc<AtomicUsize>,
}

impl EchoAdapter {
    pub(crate) fn compile_count(&self) -> usize {
        self.compiled.load(Ordering::SeqCst)
    }
}

struct EchoProcessor;

impl Processor for EchoProcessor {
    fn run(&mut self, input: &XmlTree, parameters: &Parameters) -> Result<XmlTree> {
        let mut output = XmlTree::new();
        let root = output.create_element(None, "result");
        let document = output.document_node();
        output.append_child(document, root)?;

        let input_name = input
            .document_element()
            .and_then(|element| input.name(element))
            .unwrap_or_default()
            .to_string();
        output.set_attribute(root, "input", &input_name);

        for (name, _, value) in parameters.active() {
            let param = output.create_element(None, "param");
            output.set_attribute(param, "name", name);
            output.set_attribute(param, "value", value);
            output.append_child(root, param)?;
        }
        Ok(output)
    }
}

impl TransformAdapter for EchoAdapter {
    fn compile(&self, stylesheet: &XmlTree) -> Result<Box<dyn Processor>> {
        assert!(stylesheet.document_element().is_some());
        self.compiled.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(EchoProcessor))
    }
}

/// Byte offsets of each needle in `haystack`, panicking if one is missing.
pub(crate) fn positions(haystack: &str, needles: &[&str]) -> Vec<usize> {
    needles
        .iter()
        .map(|needle| {
            haystack
                .find(needle)
                .unwrap_or_else(|| panic!("{needle} not found in {haystack}"))
        })
        .collect()
}
