//! # raxm-client — the browser half of Raxm, without a browser
//!
//! The client keeps an in-memory [`Document`] standing in for the page, the
//! registered components with their signed memos, and a commit queue per
//! component. Embedding code feeds it DOM events and drives a
//! [`Transport`]:
//!
//! ```text
//! dispatch(event) -> CommitQueue -> ready_messages -> Transport::send
//!                 -> receive: memo, morph, emits, watchers
//! ```
//!
//! ## Module Overview
//!
//! - [`dom`] / [`html`] — arena DOM and the fragment parser/serializer
//! - [`directives`] — `axm:*` attributes and action expressions
//! - [`commit`] — per-component batching, deferred models, prefetch
//! - [`morph`] — keyed DOM patching
//! - [`registry`] — component registry and the event bus
//! - [`runtime`] — [`ClientRuntime`], the message loop

pub mod commit;
pub mod component;
pub mod debounce;
pub mod directives;
pub mod dom;
pub mod error;
pub mod html;
pub mod morph;
pub mod registry;
pub mod runtime;
pub mod transport;

pub use commit::{COMMIT_WINDOW, CommitQueue};
pub use component::Component;
pub use debounce::DebounceTimer;
pub use directives::{ActionCall, DEFAULT_MODEL_DEBOUNCE, Directive};
pub use dom::{Document, NodeId};
pub use error::{ClientError, ClientResult, DomError};
pub use morph::{MorphReport, morph};
pub use registry::ComponentRegistry;
pub use runtime::{ClientConfig, ClientRuntime, DomEvent, DriveSummary, Hooks, Navigation};
pub use transport::{OutboundMessage, Transport, TransportError};
