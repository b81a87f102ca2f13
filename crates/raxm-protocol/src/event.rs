//! Component events (`emits`) and browser events (`dispatches`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event emitted by component logic and routed client-side to the
/// components listening for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ancestors_only: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub self_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Where an [`Event`] is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventScope<'a> {
    Global,
    SelfOnly,
    Ancestors,
    Component(&'a str),
}

impl Event {
    pub fn new(name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            params,
            ancestors_only: false,
            self_only: false,
            to: None,
        }
    }

    pub fn up(mut self) -> Self {
        self.ancestors_only = true;
        self
    }

    pub fn self_only(mut self) -> Self {
        self.self_only = true;
        self
    }

    pub fn to(mut self, component_name: impl Into<String>) -> Self {
        self.to = Some(component_name.into());
        self
    }

    /// Named targets win over self-only, which wins over ancestors-only.
    pub fn scope(&self) -> EventScope<'_> {
        if let Some(to) = &self.to {
            EventScope::Component(to)
        } else if self.self_only {
            EventScope::SelfOnly
        } else if self.ancestors_only {
            EventScope::Ancestors
        } else {
            EventScope::Global
        }
    }
}

/// A DOM `CustomEvent` the client dispatches on the component root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl BrowserEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}
