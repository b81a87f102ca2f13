//! # raxm-protocol — the Raxm wire contract
//!
//! Shared types exchanged between the Raxm server runtime and the client
//! runtime. The crate is dependency-light so both sides can use it as a
//! pure contract crate.
//!
//! ## Module Overview
//!
//! - [`ids`] — Typed ID wrappers (ComponentId, UpdateId)
//! - [`wire`] — Fingerprint, ServerMemo, Effects and the message envelopes
//! - [`update`] — The action batch (`syncInput`, `callMethod`, `fireEvent`)
//! - [`event`] — Component events and browser events carried in Effects
//! - [`codec`] — WireCodec: envelope decoding/encoding and checksum input
//! - [`path`] — Dotted property paths (`address.city`) over JSON data
//! - [`error`] — RaxmError, ErrorClass, RaxmResult

pub mod codec;
pub mod error;
pub mod event;
pub mod ids;
pub mod path;
pub mod update;
pub mod wire;

/// Attribute prefix of every Raxm directive (`axm:click`, `axm:model`, ...).
pub const DIRECTIVE_PREFIX: &str = "axm:";

/// Attribute carrying the component id on a component's root element.
pub const ID_ATTRIBUTE: &str = "axm:id";

/// Attribute carrying the initial `{fingerprint, serverMemo, effects}` payload.
pub const INITIAL_DATA_ATTRIBUTE: &str = "axm:initial-data";

/// Header distinguishing protocol requests from ordinary navigation.
pub const PROTOCOL_HEADER: &str = "x-raxm";

pub use codec::WireCodec;
pub use error::{ErrorClass, RaxmError, RaxmResult};
pub use event::{BrowserEvent, Event, EventScope};
pub use ids::{ComponentId, UpdateId};
pub use update::{CallMethod, FireEvent, SyncInput, Update};
pub use wire::{
    DataMap, Effects, Fingerprint, InitialData, MessageRequest, MessageResponse, ServerMemo,
    SignableMemo,
};
