//! # raxm-runtime — server side of the Raxm protocol
//!
//! [`Raxm`] is the immutable context a transport holds: the component
//! registry, the checksum guard and the upload signer. Each message is
//! processed by the [`ActionDispatcher`]:
//!
//! ```text
//! Received -> ChecksumVerified -> Hydrated -> ActionApplied
//!          -> Rendered -> Dehydrated -> Responded
//! ```
//!
//! Integrity and protocol failures stop the request before any component
//! code runs.

mod children;
pub mod context;
pub mod dispatcher;
pub mod html;
pub mod registry;

pub use context::{DEFAULT_UPLOAD_TTL_SECS, Environment, Raxm, RaxmBuilder};
pub use dispatcher::{
    ACTION_RETURNED_EVENT, ActionDispatcher, Mounted, Phase, PhaseTrace, RenderRequest,
};
pub use html::{html_hash, stamp_root};
pub use registry::DefinitionRegistry;
