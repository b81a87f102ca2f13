//! ActionDispatcher: verifies, hydrates, applies one ordered batch of
//! updates, renders and dehydrates a single component per request.

use crate::children::ChildScope;
use crate::html::{html_hash, stamp_root};
use crate::registry::DefinitionRegistry;
use indexmap::IndexMap;
use raxm_component::{ComponentDefinition, ComponentState};
use raxm_guard::ChecksumGuard;
use raxm_protocol::{
    CallMethod, DataMap, Effects, FireEvent, Fingerprint, ID_ATTRIBUTE, INITIAL_DATA_ATTRIBUTE,
    InitialData, MessageRequest, MessageResponse, RaxmError, RaxmResult, SyncInput, Update, path,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Self-only event emitted after a `fireEvent` update ran its listener.
pub const ACTION_RETURNED_EVENT: &str = "action-returned";

/// Request-scoped values copied into a new fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub locale: String,
    pub path: String,
    pub method: String,
}

impl RenderRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            locale: "en".to_owned(),
            path: path.into(),
            method: "GET".to_owned(),
        }
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }
}

impl From<&Fingerprint> for RenderRequest {
    fn from(fingerprint: &Fingerprint) -> Self {
        Self {
            locale: fingerprint.locale.clone(),
            path: fingerprint.path.clone(),
            method: fingerprint.method.clone(),
        }
    }
}

/// Initial render of a component: stamped HTML plus the payload embedded in
/// its `axm:initial-data` attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Mounted {
    pub html: String,
    pub initial: InitialData,
}

impl Mounted {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.initial.fingerprint
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    ChecksumVerified,
    Hydrated,
    ActionApplied,
    Rendered,
    Dehydrated,
    Responded,
    ChecksumRejected,
    ProtocolRejected,
    UnknownAction,
    ComponentNotFound,
    MethodNotFound,
    PropertyNotFound,
    ApplicationError,
}

impl Phase {
    pub fn failure(error: &RaxmError) -> Self {
        match error {
            RaxmError::ChecksumMismatch { .. } => Self::ChecksumRejected,
            RaxmError::UnknownAction(_) => Self::UnknownAction,
            RaxmError::MissingHeader(_) | RaxmError::MalformedEnvelope(_) => {
                Self::ProtocolRejected
            }
            RaxmError::ComponentNotFound(_) => Self::ComponentNotFound,
            RaxmError::MethodNotFound { .. } => Self::MethodNotFound,
            RaxmError::PropertyNotFound { .. } | RaxmError::InvalidPath(_) => {
                Self::PropertyNotFound
            }
            RaxmError::PropertyTypeMismatch { .. }
            | RaxmError::Component(_)
            | RaxmError::UploadSignature(_)
            | RaxmError::Serialization(_) => Self::ApplicationError,
        }
    }

    pub fn is_failure(self) -> bool {
        !matches!(
            self,
            Self::Received
                | Self::ChecksumVerified
                | Self::Hydrated
                | Self::ActionApplied
                | Self::Rendered
                | Self::Dehydrated
                | Self::Responded
        )
    }
}

/// Phases one request went through, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTrace {
    component: String,
    phases: Vec<Phase>,
}

impl PhaseTrace {
    fn start(component: &str) -> Self {
        debug!(component, phase = ?Phase::Received, "dispatch phase");
        Self {
            component: component.to_owned(),
            phases: vec![Phase::Received],
        }
    }

    fn advance(&mut self, phase: Phase) {
        debug!(component = %self.component, phase = ?phase, "dispatch phase");
        self.phases.push(phase);
    }

    fn fail(&mut self, error: &RaxmError) {
        let phase = Phase::failure(error);
        warn!(
            component = %self.component,
            phase = ?phase,
            class = ?error.class(),
            error = %error,
            "dispatch failed"
        );
        self.phases.push(phase);
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn reached(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn last(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Received)
    }
}

#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    registry: Arc<DefinitionRegistry>,
    guard: Arc<ChecksumGuard>,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<DefinitionRegistry>, guard: Arc<ChecksumGuard>) -> Self {
        Self { registry, guard }
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    pub fn guard(&self) -> &ChecksumGuard {
        &self.guard
    }

    pub fn handle(&self, request: MessageRequest) -> RaxmResult<MessageResponse> {
        self.handle_traced(request).0
    }

    #[instrument(
        skip_all,
        fields(
            component = %request.fingerprint.name,
            component_id = %request.fingerprint.id,
            updates = request.updates.len()
        )
    )]
    pub fn handle_traced(
        &self,
        request: MessageRequest,
    ) -> (RaxmResult<MessageResponse>, PhaseTrace) {
        let mut trace = PhaseTrace::start(&request.fingerprint.name);
        let result = self.process(request, &mut trace);
        match &result {
            Ok(_) => trace.advance(Phase::Responded),
            Err(error) => trace.fail(error),
        }
        (result, trace)
    }

    fn process(
        &self,
        request: MessageRequest,
        trace: &mut PhaseTrace,
    ) -> RaxmResult<MessageResponse> {
        let MessageRequest {
            fingerprint,
            server_memo,
            updates,
        } = request;

        self.guard.ensure_valid(&fingerprint, &server_memo)?;
        trace.advance(Phase::ChecksumVerified);

        let definition = self.registry.get(&fingerprint.name)?.clone();
        let mut state = ComponentState::hydrate(definition.schema().clone(), &server_memo);
        trace.advance(Phase::Hydrated);

        let mut returns = IndexMap::new();
        for update in &updates {
            let returned = Self::apply(definition.as_ref(), &mut state, update)?;
            if !returned.is_null() {
                returns.insert(update.id().as_str().to_owned(), returned);
            }
        }
        trace.advance(Phase::ActionApplied);

        let (html, children) = self.render(definition.as_ref(), &state, &fingerprint)?;
        state.set_children(children);
        let hash = html_hash(&html);
        let html_changed = state.previous_html_hash() != Some(hash.as_str());
        let html = if html_changed {
            Some(stamp_root(
                &html,
                &[(ID_ATTRIBUTE, fingerprint.id.as_str())],
            )?)
        } else {
            None
        };
        trace.advance(Phase::Rendered);

        let dehydrated = state.dehydrate(&self.guard, &fingerprint, hash)?;
        trace.advance(Phase::Dehydrated);

        let mut effects = Self::collect_effects(&mut state, dehydrated.dirty);
        effects.html = html;
        effects.returns = returns;
        debug!(
            dirty = ?effects.dirty,
            html_changed,
            emits = effects.emits.len(),
            "message processed"
        );
        Ok(MessageResponse {
            effects,
            server_memo: dehydrated.memo,
        })
    }

    /// First render: new fingerprint, `mount` hook, render, stamp the root
    /// with `axm:id` and `axm:initial-data`.
    #[instrument(skip(self, params, request), fields(path = %request.path))]
    pub fn mount(
        &self,
        name: &str,
        params: &DataMap,
        request: &RenderRequest,
    ) -> RaxmResult<Mounted> {
        let definition = self.registry.get(name)?.clone();
        let fingerprint = Fingerprint::new(
            name,
            request.locale.as_str(),
            request.path.as_str(),
            request.method.as_str(),
        );

        let mut state = ComponentState::mount(definition.schema().clone(), params)?;
        definition.mount(&mut state, params)?;

        let (html, children) = self.render(definition.as_ref(), &state, &fingerprint)?;
        state.set_children(children);
        // Later renders emit placeholders for these children; hash that form.
        let hash = if state.children().is_empty() {
            html_hash(&html)
        } else {
            let (settled, _) = self.render(definition.as_ref(), &state, &fingerprint)?;
            html_hash(&settled)
        };
        let dehydrated = state.dehydrate(&self.guard, &fingerprint, hash)?;
        let effects = Self::collect_effects(&mut state, Vec::new());

        let initial = InitialData {
            fingerprint,
            server_memo: dehydrated.memo,
            effects,
        };
        let payload = serde_json::to_string(&initial)
            .map_err(|error| RaxmError::Serialization(error.to_string()))?;
        let html = stamp_root(
            &html,
            &[
                (ID_ATTRIBUTE, initial.fingerprint.id.as_str()),
                (INITIAL_DATA_ATTRIBUTE, payload.as_str()),
            ],
        )?;
        info!(
            component_id = %initial.fingerprint.id,
            children = initial.server_memo.children.len(),
            "component mounted"
        );
        Ok(Mounted { html, initial })
    }

    fn render(
        &self,
        definition: &dyn ComponentDefinition,
        state: &ComponentState,
        fingerprint: &Fingerprint,
    ) -> RaxmResult<(String, IndexMap<String, Fingerprint>)> {
        let mut scope = ChildScope::new(self, fingerprint, state.children());
        let html = definition.render(state, &mut scope)?;
        Ok((html, scope.into_rendered()))
    }

    fn collect_effects(state: &mut ComponentState, dirty: Vec<String>) -> Effects {
        let (emits, dispatches) = state.events.take();
        let (redirect, navigate) = state.navigator.take();
        Effects {
            html: None,
            dirty,
            emits,
            listeners: state.schema().listeners().map(str::to_owned).collect(),
            dispatches,
            redirect,
            navigate,
            returns: IndexMap::new(),
        }
    }

    fn apply(
        definition: &dyn ComponentDefinition,
        state: &mut ComponentState,
        update: &Update,
    ) -> RaxmResult<Value> {
        match update {
            Update::SyncInput(SyncInput { name, value, .. }) => {
                Self::sync(definition, state, name, value.clone())?;
                Ok(Value::Null)
            }
            Update::CallMethod(CallMethod { method, params, .. }) => {
                Self::call(definition, state, method, params)
            }
            Update::FireEvent(FireEvent {
                event,
                params,
                listener_id,
                ..
            }) => {
                let method = state
                    .schema()
                    .listener_method(event)
                    .map(str::to_owned)
                    .ok_or_else(|| RaxmError::MethodNotFound {
                        component: state.name().to_owned(),
                        method: event.clone(),
                    })?;
                debug!(
                    event = %event,
                    method = %method,
                    emitter = ?listener_id.as_ref().map(|id| id.as_str()),
                    "event delivered to listener"
                );
                let returned = Self::call(definition, state, &method, params)?;
                state.events.emit_self(
                    ACTION_RETURNED_EVENT,
                    vec![
                        Value::String(event.clone()),
                        Value::String(method),
                        returned.clone(),
                    ],
                );
                Ok(returned)
            }
        }
    }

    fn sync(
        definition: &dyn ComponentDefinition,
        state: &mut ComponentState,
        name: &str,
        value: Value,
    ) -> RaxmResult<()> {
        path::segments(name)?;
        let root = path::root(name);
        if !state.schema().has_property(root) {
            return Err(RaxmError::PropertyNotFound {
                component: state.name().to_owned(),
                property: root.to_owned(),
            });
        }
        definition.updating(state, name, &value)?;
        state.set(name, value)?;
        definition.updated(state, name)
    }

    fn call(
        definition: &dyn ComponentDefinition,
        state: &mut ComponentState,
        method: &str,
        params: &[Value],
    ) -> RaxmResult<Value> {
        match method {
            "$refresh" => Ok(Value::Null),
            "$set" => {
                let name = property_param(method, params)?;
                let value = params.get(1).cloned().unwrap_or(Value::Null);
                Self::sync(definition, state, name, value)?;
                Ok(Value::Null)
            }
            "$toggle" => {
                let name = property_param(method, params)?;
                let current = state.get(name).and_then(Value::as_bool).unwrap_or(false);
                Self::sync(definition, state, name, Value::Bool(!current))?;
                Ok(Value::Null)
            }
            _ if state.schema().is_public_method(method) => {
                debug!(method, params = params.len(), "calling method");
                definition.call(state, method, params)
            }
            _ => Err(RaxmError::MethodNotFound {
                component: state.name().to_owned(),
                method: method.to_owned(),
            }),
        }
    }
}

fn property_param<'a>(method: &str, params: &'a [Value]) -> RaxmResult<&'a str> {
    params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RaxmError::component(format!("{method} expects a property name")))
}
