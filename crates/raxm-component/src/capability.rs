//! Capabilities composed into [`crate::ComponentState`].

use crate::validation::Validator;
use indexmap::IndexMap;
use raxm_protocol::{BrowserEvent, DataMap, Event};
use serde_json::Value;

/// Outgoing component events and browser events for this request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBag {
    emits: Vec<Event>,
    dispatches: Vec<BrowserEvent>,
}

impl EventBag {
    /// Delivered to every listening component.
    pub fn emit(&mut self, name: impl Into<String>, params: Vec<Value>) {
        self.emits.push(Event::new(name, params));
    }

    pub fn emit_self(&mut self, name: impl Into<String>, params: Vec<Value>) {
        self.emits.push(Event::new(name, params).self_only());
    }

    /// Delivered to the nearest listening ancestor component.
    pub fn emit_up(&mut self, name: impl Into<String>, params: Vec<Value>) {
        self.emits.push(Event::new(name, params).up());
    }

    pub fn emit_to(
        &mut self,
        component: impl Into<String>,
        name: impl Into<String>,
        params: Vec<Value>,
    ) {
        self.emits.push(Event::new(name, params).to(component));
    }

    pub fn dispatch_browser_event(&mut self, event: impl Into<String>, data: Value) {
        self.dispatches.push(BrowserEvent::new(event, data));
    }

    pub fn emits(&self) -> &[Event] {
        &self.emits
    }

    pub fn dispatches(&self) -> &[BrowserEvent] {
        &self.dispatches
    }

    pub fn take(&mut self) -> (Vec<Event>, Vec<BrowserEvent>) {
        (
            std::mem::take(&mut self.emits),
            std::mem::take(&mut self.dispatches),
        )
    }
}

/// Validation messages keyed by property path. Carried in `serverMemo.errors`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorBag {
    messages: IndexMap<String, Vec<String>>,
}

impl ErrorBag {
    pub fn from_messages(messages: IndexMap<String, Vec<String>>) -> Self {
        Self { messages }
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.messages
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn has(&self, field: &str) -> bool {
        self.messages
            .get(field)
            .is_some_and(|messages| !messages.is_empty())
    }

    pub fn first(&self, field: &str) -> Option<&str> {
        self.messages
            .get(field)
            .and_then(|messages| messages.first())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.values().all(Vec::is_empty)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn reset_field(&mut self, field: &str) {
        self.messages.shift_remove(field);
    }

    pub fn messages(&self) -> &IndexMap<String, Vec<String>> {
        &self.messages
    }

    /// Run `rules` against `data`, replacing messages for every validated
    /// field. Returns `true` when nothing failed.
    pub fn validate(
        &mut self,
        validator: &dyn Validator,
        rules: &IndexMap<String, String>,
        data: &DataMap,
    ) -> bool {
        for field in rules.keys() {
            self.messages.shift_remove(field);
        }
        let failures = validator.validate(rules, data);
        let passed = failures.is_empty();
        for (field, messages) in failures {
            self.messages.entry(field).or_default().extend(messages);
        }
        passed
    }
}

/// Redirect / in-app navigation requested by component logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Navigator {
    redirect: Option<String>,
    navigate: Option<String>,
}

impl Navigator {
    pub fn redirect(&mut self, url: impl Into<String>) {
        self.redirect = Some(url.into());
    }

    pub fn navigate(&mut self, url: impl Into<String>) {
        self.navigate = Some(url.into());
    }

    pub fn redirect_target(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    pub fn navigate_target(&self) -> Option<&str> {
        self.navigate.as_deref()
    }

    pub fn take(&mut self) -> (Option<String>, Option<String>) {
        (self.redirect.take(), self.navigate.take())
    }
}
