//! Server-side component model.
//!
//! A component is described by an explicit [`ComponentSchema`] (declared
//! properties with kind and default, public methods, listener bindings,
//! validation rules) instead of runtime reflection. Its per-request state is
//! a [`ComponentState`], which composes the cross-cutting capabilities
//! ([`EventBag`], [`ErrorBag`], [`Navigator`]) component logic uses.

mod capability;
mod definition;
mod schema;
mod state;
mod validation;

pub use capability::{ErrorBag, EventBag, Navigator};
pub use definition::{ChildRenderer, ComponentDefinition, FnComponent, NoChildren};
pub use schema::{ComponentSchema, PropKind, PropertySpec, RESERVED_METHODS};
pub use state::{ComponentState, Dehydrated};
pub use validation::{Rule, RuleValidator, Validator};
