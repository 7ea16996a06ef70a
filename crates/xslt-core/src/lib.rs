//! Core building blocks for xslt-assembler.
//!
//! This crate provides the pieces the assembler is built from, none of which
//! know anything about XSLT semantics:
//!
//! - **Event bus**: ordered publish/subscribe with removal-safe dispatch
//!   and failure escalation ([`bus`])
//! - **XML tree**: mutable arena tree over `quick-xml` ([`xml`])
//! - **Transport**: fetch seam with HTTP, `file://` and in-memory
//!   implementations ([`transport`]) and a fetch-once response cache
//!   ([`cache`])
//! - **Error types**: unified error taxonomy ([`error`])
//!
//! # Examples
//!
//! ```
//! use xslt_core::XmlTree;
//!
//! let mut tree = XmlTree::parse("<list><item/></list>").unwrap();
//! let list = tree.document_element().unwrap();
//! let comment = tree.create_comment(" added ");
//! tree.append_child(list, comment).unwrap();
//!
//! assert_eq!(tree.serialize(), "<list><item/><!-- added --></list>");
//! ```

pub mod bus;
pub mod cache;
pub mod error;
pub mod transport;
pub mod xml;

pub use bus::{BusEvent, EventBus, Flow, Subscription};
pub use cache::{CachedBody, ResponseCache};
pub use error::{ResolutionError, Result, StateError, TransportError, XmlError, XsltError};
pub use transport::{
    FetchRequest, HttpTransport, MemoryTransport, ResponseMeta, Ticket, Transport, TransportEvent,
    TransportMessage, TransportSink,
};
pub use xml::{Attribute, MAX_DEPTH, NodeId, NodeKind, XmlTree};
