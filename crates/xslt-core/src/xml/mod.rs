//! Mutable XML tree used to hold and assemble stylesheets.
//!
//! Parsing is done with `quick-xml`'s pull reader into an arena
//! ([`XmlTree`]); serialization writes the arena back out, repairing
//! namespace declarations for nodes moved between trees.

mod parser;
mod tree;
mod writer;

pub use parser::MAX_DEPTH;
pub use tree::{Attribute, NodeId, NodeKind, XML_NAMESPACE, XmlTree};
