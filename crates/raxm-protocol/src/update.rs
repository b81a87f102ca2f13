//! Updates: the ordered action batch a client sends with a message.

use crate::ids::{ComponentId, UpdateId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One action in a batch, tagged on the wire as
/// `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Update {
    SyncInput(SyncInput),
    CallMethod(CallMethod),
    FireEvent(FireEvent),
}

impl Update {
    /// Every `type` tag the server understands.
    pub const KNOWN_TYPES: [&'static str; 3] = ["syncInput", "callMethod", "fireEvent"];

    pub fn id(&self) -> &UpdateId {
        match self {
            Self::SyncInput(update) => &update.id,
            Self::CallMethod(update) => &update.id,
            Self::FireEvent(update) => &update.id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SyncInput(_) => "syncInput",
            Self::CallMethod(_) => "callMethod",
            Self::FireEvent(_) => "fireEvent",
        }
    }

    pub fn sync_input(name: impl Into<String>, value: Value) -> Self {
        Self::SyncInput(SyncInput {
            id: UpdateId::new_random(),
            name: name.into(),
            value,
        })
    }

    pub fn call_method(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::CallMethod(CallMethod {
            id: UpdateId::new_random(),
            method: method.into(),
            params,
        })
    }

    pub fn fire_event(
        event: impl Into<String>,
        params: Vec<Value>,
        listener_id: Option<ComponentId>,
    ) -> Self {
        Self::FireEvent(FireEvent {
            id: UpdateId::new_random(),
            event: event.into(),
            params,
            listener_id,
        })
    }
}

/// Writes a (possibly dotted) property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncInput {
    #[serde(default)]
    pub id: UpdateId,
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// Invokes a public method with positional params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMethod {
    #[serde(default)]
    pub id: UpdateId,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Delivers an emitted event to the method bound to its listener name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FireEvent {
    #[serde(default)]
    pub id: UpdateId,
    pub event: String,
    #[serde(default)]
    pub params: Vec<Value>,
    /// Component that emitted the event, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener_id: Option<ComponentId>,
}
