use super::{Busy, Document, Resource};
use crate::resolve::Resolution;
use crate::transform::{Parameters, Processor, TransformResult};
use std::fmt;
use xslt_core::error::{Result, StateError};

/// A document that is assembled from its dependencies and can run
/// transforms.
///
/// The resolution state, compiled processor and parameters all belong to
/// the current load; a new `load` or `parse` drops the first two.
pub struct Stylesheet {
    pub(crate) document: Document,
    pub(crate) busy: Option<Busy>,
    pub(crate) resolution: Option<Resolution>,
    pub(crate) parameters: Parameters,
    pub(crate) processor: Option<Box<dyn Processor>>,
    pub(crate) results: Vec<TransformResult>,
}

impl Stylesheet {
    pub(crate) fn new(document: Document) -> Self {
        Self {
            document,
            busy: None,
            resolution: None,
            parameters: Parameters::default(),
            processor: None,
            results: Vec::new(),
        }
    }

    /// Rejects `operation` while resolving or executing.
    pub(crate) fn check_not_busy(&self, operation: &'static str) -> Result<()> {
        if let Some(busy) = self.busy {
            return Err(StateError::Busy {
                operation,
                marker: busy.as_str(),
            }
            .into());
        }
        Ok(())
    }

    /// Forgets everything derived from the previous content.
    pub(crate) fn reset(&mut self) {
        self.resolution = None;
        self.processor = None;
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    pub const fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Results retained by transforms run with caching enabled.
    pub fn results(&self) -> &[TransformResult] {
        &self.results
    }
}

impl Resource for Stylesheet {
    fn document(&self) -> &Document {
        &self.document
    }

    fn busy(&self) -> Option<Busy> {
        self.busy
    }

    fn is_resolution_root(&self) -> bool {
        self.document.parent.is_none()
    }
}

impl fmt::Debug for Stylesheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stylesheet")
            .field("document", &self.document)
            .field("busy", &self.busy)
            .field("resolution", &self.resolution)
            .field("parameters", &self.parameters)
            .field("compiled", &self.processor.is_some())
            .field("results", &self.results.len())
            .finish()
    }
}
