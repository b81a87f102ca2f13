//! The client runtime: one document, its components and the message loop.

use crate::commit::{COMMIT_WINDOW, prefetch_key};
use crate::component::Component;
use crate::directives::{self, ActionCall, DEFAULT_MODEL_DEBOUNCE, Directive, parse_action};
use crate::dom::{Document, NodeId};
use crate::error::{ClientError, ClientResult, DomError};
use crate::html::parse_fragment;
use crate::morph::{MorphReport, morph};
use crate::registry::ComponentRegistry;
use crate::transport::{OutboundMessage, Transport};
use indexmap::IndexMap;
use raxm_protocol::{
    BrowserEvent, ComponentId, Event, ID_ATTRIBUTE, MessageResponse, Update, path,
};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Rounds [`ClientRuntime::drive`] runs before yielding; responses can queue
/// follow-up messages (emitted events), this bounds the cascade.
const MAX_DRIVE_ROUNDS: usize = 16;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub commit_window: Duration,
    pub model_debounce: Duration,
    pub endpoint_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            commit_window: COMMIT_WINDOW,
            model_debounce: DEFAULT_MODEL_DEBOUNCE,
            endpoint_prefix: "/raxm/message".to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn commit_window(mut self, window: Duration) -> Self {
        self.commit_window = window;
        self
    }

    pub fn model_debounce(mut self, debounce: Duration) -> Self {
        self.model_debounce = debounce;
        self
    }

    pub fn endpoint_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.endpoint_prefix = prefix.into();
        self
    }
}

/// A user interaction on a node of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    pub kind: String,
    pub target: NodeId,
    /// New control value for `input`/`change`, `$event` for actions.
    pub value: Option<Value>,
    /// Key name for keyboard events (`Enter`, `ArrowUp`).
    pub key: Option<String>,
}

impl DomEvent {
    pub fn new(kind: impl Into<String>, target: NodeId) -> Self {
        Self {
            kind: kind.into(),
            target,
            value: None,
            key: None,
        }
    }

    pub fn click(target: NodeId) -> Self {
        Self::new("click", target)
    }

    pub fn mouseenter(target: NodeId) -> Self {
        Self::new("mouseenter", target)
    }

    pub fn input(target: NodeId, value: Value) -> Self {
        Self::new("input", target).with_value(value)
    }

    pub fn change(target: NodeId, value: Value) -> Self {
        Self::new("change", target).with_value(value)
    }

    pub fn keydown(target: NodeId, key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new("keydown", target)
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

type SentHook = Box<dyn FnMut(&OutboundMessage) + Send>;
type ReceivedHook = Box<dyn FnMut(&OutboundMessage, &MessageResponse) + Send>;
type FailedHook = Box<dyn FnMut(&OutboundMessage, &ClientError) + Send>;
type InitializedHook = Box<dyn FnMut(&Component) + Send>;
type RemovedHook = Box<dyn FnMut(&ComponentId) + Send>;

/// Lifecycle callbacks for embedding code.
#[derive(Default)]
pub struct Hooks {
    message_sent: Vec<SentHook>,
    message_received: Vec<ReceivedHook>,
    message_failed: Vec<FailedHook>,
    component_initialized: Vec<InitializedHook>,
    component_removed: Vec<RemovedHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("message_sent", &self.message_sent.len())
            .field("message_received", &self.message_received.len())
            .field("message_failed", &self.message_failed.len())
            .field("component_initialized", &self.component_initialized.len())
            .field("component_removed", &self.component_removed.len())
            .finish()
    }
}

impl Hooks {
    pub fn on_message_sent(&mut self, hook: impl FnMut(&OutboundMessage) + Send + 'static) {
        self.message_sent.push(Box::new(hook));
    }

    pub fn on_message_received(
        &mut self,
        hook: impl FnMut(&OutboundMessage, &MessageResponse) + Send + 'static,
    ) {
        self.message_received.push(Box::new(hook));
    }

    pub fn on_message_failed(
        &mut self,
        hook: impl FnMut(&OutboundMessage, &ClientError) + Send + 'static,
    ) {
        self.message_failed.push(Box::new(hook));
    }

    pub fn on_component_initialized(&mut self, hook: impl FnMut(&Component) + Send + 'static) {
        self.component_initialized.push(Box::new(hook));
    }

    pub fn on_component_removed(&mut self, hook: impl FnMut(&ComponentId) + Send + 'static) {
        self.component_removed.push(Box::new(hook));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Full page load.
    Redirect(String),
    /// Client-side navigation.
    Navigate(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveSummary {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct ClientRuntime {
    document: Document,
    registry: ComponentRegistry,
    config: ClientConfig,
    hooks: Hooks,
    prefetch_outbox: Vec<(ComponentId, ActionCall)>,
    browser_events: Vec<(ComponentId, BrowserEvent)>,
    navigation: Option<Navigation>,
    returns: IndexMap<String, Value>,
}

impl ClientRuntime {
    pub fn new(document: Document, config: ClientConfig) -> Self {
        Self {
            document,
            registry: ComponentRegistry::new(),
            config,
            hooks: Hooks::default(),
            prefetch_outbox: Vec::new(),
            browser_events: Vec::new(),
            navigation: None,
            returns: IndexMap::new(),
        }
    }

    /// Parse a page and register the components it contains.
    pub fn from_html(html: &str, config: ClientConfig) -> ClientResult<Self> {
        let mut runtime = Self::new(parse_fragment(html)?, config);
        runtime.boot()?;
        Ok(runtime)
    }

    /// Discover components not registered yet.
    pub fn boot(&mut self) -> ClientResult<Vec<ComponentId>> {
        let found = self.registry.discover(
            &mut self.document,
            Document::ROOT,
            self.config.commit_window,
        )?;
        self.initialized(&found);
        info!(components = self.registry.len(), "client booted");
        Ok(found)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn focus(&mut self, node: NodeId) {
        self.document.focus(node);
    }

    pub fn blur(&mut self) {
        self.document.blur();
    }

    /// Translate a DOM event into queued actions. Returns whether anything
    /// was queued or applied.
    #[instrument(skip(self, event), fields(kind = %event.kind))]
    pub fn dispatch(&mut self, event: &DomEvent, now: Instant) -> ClientResult<bool> {
        let Some(id) = self
            .registry
            .component_for_node(&self.document, event.target)
        else {
            debug!("event outside any component");
            return Ok(false);
        };

        let mut handled = self.handle_model(&id, event, now)?;
        if event.kind == "mouseenter" {
            handled |= self.prefetch(&id, event)?;
        }
        if let Some(directive) = self.find_binding(event, &event.kind, false) {
            handled |= self.run_action(&id, event, &directive, now)?;
        }
        Ok(handled)
    }

    fn handle_model(&mut self, id: &ComponentId, event: &DomEvent, now: Instant) -> ClientResult<bool> {
        if !matches!(event.kind.as_str(), "input" | "change") {
            return Ok(false);
        }
        let Some(model) = directives::model(&self.document, event.target) else {
            return Ok(false);
        };
        if let Some(value) = &event.value {
            self.document.set_value(event.target, value_text(value));
        }
        let value = event
            .value
            .clone()
            .or_else(|| self.document.value(event.target).map(Value::String))
            .unwrap_or(Value::Null);

        let component = self.registry.get_mut(id)?;
        let name = model.value.clone();
        if model.has_modifier("defer") {
            component.queue.defer(name, value);
        } else if event.kind == "input" {
            if model.has_modifier("lazy") {
                return Ok(false);
            }
            let delay = model.duration().unwrap_or(self.config.model_debounce);
            component.debounce_model(event.target, &name, value, now, delay);
        } else {
            component.cancel_model(event.target);
            component.flush_all_models(now);
            component.queue.enqueue(Update::sync_input(name, value), now);
        }
        Ok(true)
    }

    /// Nearest directive named `name` from the target up to its component
    /// root.
    fn find_binding(&self, event: &DomEvent, name: &str, prefetch: bool) -> Option<Directive> {
        let mut current = Some(event.target);
        while let Some(node) = current {
            let found = directives::directives(&self.document, node)
                .into_iter()
                .find(|directive| {
                    directive.name == name
                        && directive.is_event_binding()
                        && (!prefetch || directive.has_modifier("prefetch"))
                        && (!directive.has_modifier("self") || node == event.target)
                        && directive.matches_key(event.key.as_deref())
                });
            if found.is_some() {
                return found;
            }
            if self.document.has_attr(node, ID_ATTRIBUTE) {
                return None;
            }
            current = self.document.parent(node);
        }
        None
    }

    fn run_action(
        &mut self,
        id: &ComponentId,
        event: &DomEvent,
        directive: &Directive,
        now: Instant,
    ) -> ClientResult<bool> {
        let ActionCall { method, mut params } =
            parse_action(&directive.value, event.value.as_ref());
        // Values typed before the action travel ahead of it.
        let flushed = self.registry.get_mut(id)?.flush_all_models(now);
        if flushed > 0 {
            debug!(flushed, "pending model values flushed ahead of the action");
        }

        let emitted = match method.as_str() {
            "$emit" => Some(Event::new(
                event_name(&mut params, &method)?,
                std::mem::take(&mut params),
            )),
            "$emitUp" => Some(
                Event::new(event_name(&mut params, &method)?, std::mem::take(&mut params)).up(),
            ),
            "$emitSelf" => Some(
                Event::new(event_name(&mut params, &method)?, std::mem::take(&mut params))
                    .self_only(),
            ),
            "$emitTo" => {
                let target = event_name(&mut params, &method)?;
                let name = event_name(&mut params, &method)?;
                Some(Event::new(name, std::mem::take(&mut params)).to(target))
            }
            _ => None,
        };
        if let Some(emitted) = emitted {
            let targets = self
                .registry
                .emit_event(&self.document, Some(id), &emitted, now);
            debug!(event = %emitted.name, targets = targets.len(), "event emitted");
            return Ok(true);
        }

        let component = self.registry.get_mut(id)?;
        if event.kind == "click" {
            // A prefetched answer only stands in for the click when the
            // click would have been sent alone.
            if component.queue.is_idle() {
                if let Some(response) = component.queue.take_prefetched(&method, &params) {
                    debug!(%method, "prefetched response applied");
                    self.apply_response(id, &response, now)?;
                    return Ok(true);
                }
            } else {
                component
                    .queue
                    .discard_prefetch(&prefetch_key(&method, &params));
            }
        }
        component.queue.enqueue(Update::call_method(method, params), now);
        Ok(true)
    }

    fn prefetch(&mut self, id: &ComponentId, event: &DomEvent) -> ClientResult<bool> {
        let Some(directive) = self.find_binding(event, "click", true) else {
            return Ok(false);
        };
        let call = parse_action(&directive.value, None);
        if call.method.starts_with('$') {
            return Ok(false);
        }
        let component = self.registry.get_mut(id)?;
        if !component.queue.begin_prefetch(&call.method, &call.params) {
            return Ok(false);
        }
        self.prefetch_outbox.push((id.clone(), call));
        Ok(true)
    }

    /// Move elapsed model debounces into their commit queues.
    pub fn tick(&mut self, now: Instant) {
        for component in self.registry.components_mut() {
            component.flush_due_models(now);
        }
    }

    /// Messages ready to send at `now`: prefetches first, then one batch per
    /// component whose window elapsed and that has nothing in transit.
    pub fn ready_messages(&mut self, now: Instant) -> Vec<OutboundMessage> {
        self.tick(now);
        let mut messages = Vec::new();
        for (id, call) in self.prefetch_outbox.drain(..) {
            let Some(component) = self.registry.find(&id) else {
                continue;
            };
            let key = prefetch_key(&call.method, &call.params);
            messages.push(OutboundMessage {
                name: component.name().to_owned(),
                request: component.request(vec![Update::call_method(call.method, call.params)]),
                prefetch: Some(key),
                component: id,
            });
        }
        for component in self.registry.components_mut() {
            if let Some(batch) = component.queue.take_ready(now) {
                messages.push(OutboundMessage {
                    component: component.id().clone(),
                    name: component.name().to_owned(),
                    request: component.request(batch),
                    prefetch: None,
                });
            }
        }
        for message in &messages {
            for hook in &mut self.hooks.message_sent {
                hook(message);
            }
        }
        messages
    }

    /// Apply the response to `message`. Nothing is applied if the response
    /// HTML cannot be parsed; the message is failed instead.
    #[instrument(skip_all, fields(component_id = %message.component))]
    pub fn receive(
        &mut self,
        message: &OutboundMessage,
        response: MessageResponse,
        now: Instant,
    ) -> ClientResult<Option<MorphReport>> {
        if let Some(key) = &message.prefetch {
            if let Some(component) = self.registry.find_mut(&message.component) {
                component.queue.store_prefetch(key, response);
            }
            return Ok(None);
        }
        if let Some(html) = &response.effects.html
            && let Err(error) = check_html(html)
        {
            let error = ClientError::from(error);
            self.fail(message, &error, now);
            return Err(error);
        }
        let Some(component) = self.registry.find_mut(&message.component) else {
            warn!("response for a component that is gone");
            return Ok(None);
        };
        component.queue.complete(now);

        let report = self.apply_response(&message.component, &response, now)?;
        for hook in &mut self.hooks.message_received {
            hook(message, &response);
        }
        Ok(report)
    }

    fn apply_response(
        &mut self,
        id: &ComponentId,
        response: &MessageResponse,
        now: Instant,
    ) -> ClientResult<Option<MorphReport>> {
        let component = self.registry.get_mut(id)?;
        component.apply(response);
        component.queue.discard_prefetches();
        let root = component.root();
        let effects = &response.effects;

        let report = match &effects.html {
            Some(html) => Some(self.morph_component(id, root, html)?),
            None => None,
        };
        self.refresh_focused(id, &effects.dirty);

        for event in &effects.emits {
            self.registry
                .emit_event(&self.document, Some(id), event, now);
        }
        self.browser_events.extend(
            effects
                .dispatches
                .iter()
                .map(|dispatch| (id.clone(), dispatch.clone())),
        );
        if let Some(url) = &effects.redirect {
            self.navigation = Some(Navigation::Redirect(url.clone()));
        } else if let Some(url) = &effects.navigate {
            self.navigation = Some(Navigation::Navigate(url.clone()));
        }
        self.returns.extend(effects.returns.clone());

        self.registry.queue_watchers(id, &effects.dirty);
        self.registry.run_microtasks();
        Ok(report)
    }

    fn morph_component(
        &mut self,
        id: &ComponentId,
        root: NodeId,
        html: &str,
    ) -> ClientResult<MorphReport> {
        let report = morph(&mut self.document, root, html, id)?;
        if let Some(new_root) = report.root
            && new_root != root
        {
            self.registry.rebind_root(id, new_root);
        }
        for removed in &report.removed_components {
            if self.registry.remove(removed).is_some() {
                for hook in &mut self.hooks.component_removed {
                    hook(removed);
                }
            }
        }
        for node in &report.added_components {
            let found =
                self.registry
                    .discover(&mut self.document, *node, self.config.commit_window)?;
            self.initialized(&found);
        }
        Ok(report)
    }

    /// A focused model-bound control is never morphed; when the server
    /// reports its property dirty, take the value from the memo instead.
    fn refresh_focused(&mut self, id: &ComponentId, dirty: &[String]) {
        let Some(focused) = self.document.focused() else {
            return;
        };
        if self
            .registry
            .component_for_node(&self.document, focused)
            .as_ref()
            != Some(id)
        {
            return;
        }
        let Some(model) = directives::model(&self.document, focused) else {
            return;
        };
        if !dirty.iter().any(|key| key == path::root(&model.value)) {
            return;
        }
        let value = self
            .registry
            .find(id)
            .and_then(|component| component.get(&model.value))
            .map(value_text);
        if let Some(value) = value {
            self.document.set_value(focused, value);
        }
    }

    /// Record a failed message. The DOM is left untouched; deferred model
    /// values of the batch are kept for the next attempt.
    pub fn fail(&mut self, message: &OutboundMessage, error: &ClientError, now: Instant) {
        warn!(component_id = %message.component, %error, "message failed");
        if let Some(component) = self.registry.find_mut(&message.component) {
            match &message.prefetch {
                Some(key) => component.queue.discard_prefetch(key),
                None => component.queue.fail(now),
            }
        }
        for hook in &mut self.hooks.message_failed {
            hook(message, error);
        }
    }

    /// Send everything ready at `now` and apply the answers, repeating while
    /// responses queue further messages.
    pub async fn drive<T>(&mut self, transport: &T, now: Instant) -> DriveSummary
    where
        T: Transport + ?Sized,
    {
        let mut summary = DriveSummary::default();
        for _ in 0..MAX_DRIVE_ROUNDS {
            let messages = self.ready_messages(now);
            if messages.is_empty() {
                break;
            }
            for message in messages {
                summary.sent += 1;
                match transport.send(&message).await {
                    Ok(response) => {
                        if self.receive(&message, response, now).is_err() {
                            summary.failed += 1;
                        }
                    }
                    Err(error) => {
                        self.fail(&message, &ClientError::from(error), now);
                        summary.failed += 1;
                    }
                }
            }
        }
        summary
    }

    pub fn take_browser_events(&mut self) -> Vec<(ComponentId, BrowserEvent)> {
        std::mem::take(&mut self.browser_events)
    }

    pub fn take_navigation(&mut self) -> Option<Navigation> {
        self.navigation.take()
    }

    /// Method return values by update id.
    pub fn take_returns(&mut self) -> IndexMap<String, Value> {
        std::mem::take(&mut self.returns)
    }

    fn initialized(&mut self, ids: &[ComponentId]) {
        for id in ids {
            if let Some(component) = self.registry.find(id) {
                for hook in &mut self.hooks.component_initialized {
                    hook(component);
                }
            }
        }
    }
}

fn check_html(html: &str) -> Result<(), DomError> {
    parse_fragment(html)?
        .first_element_child(Document::ROOT)
        .map(|_| ())
        .ok_or(DomError::NoElement)
}

/// Take the leading name argument of a `$emit*` call.
fn event_name(params: &mut Vec<Value>, method: &str) -> ClientResult<String> {
    if matches!(params.first(), Some(Value::String(_)))
        && let Value::String(name) = params.remove(0)
    {
        return Ok(name);
    }
    Err(ClientError::Directive(format!(
        "{method} expects a name as its first argument"
    )))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
