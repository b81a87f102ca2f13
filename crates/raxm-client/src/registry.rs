//! Component registry and client-side event bus.

use crate::component::Component;
use crate::dom::{Document, NodeId};
use crate::error::{ClientError, ClientResult};
use indexmap::IndexMap;
use raxm_protocol::{
    ComponentId, Event, EventScope, ID_ATTRIBUTE, INITIAL_DATA_ATTRIBUTE, InitialData, Update, path,
};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on the parent/child search depth.
pub const MAX_DISTANCE: usize = 32;

pub type HostListener = Box<dyn FnMut(&Event, Option<&ComponentId>) + Send>;
pub type Watcher = Box<dyn FnMut(&Value) + Send>;

struct WatcherEntry {
    component: ComponentId,
    property: String,
    callback: Watcher,
}

#[derive(Default)]
pub struct ComponentRegistry {
    components: IndexMap<ComponentId, Component>,
    listeners: IndexMap<String, Vec<HostListener>>,
    watchers: Vec<WatcherEntry>,
    microtasks: VecDeque<(ComponentId, String)>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .field("watchers", &self.watchers.len())
            .field("microtasks", &self.microtasks.len())
            .finish()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, component: Component) -> ComponentId {
        let id = component.id().clone();
        debug!(component = component.name(), component_id = %id, "component registered");
        self.components.insert(id.clone(), component);
        id
    }

    pub fn find(&self, id: &ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn find_mut(&mut self, id: &ComponentId) -> Option<&mut Component> {
        self.components.get_mut(id)
    }

    pub fn get_mut(&mut self, id: &ComponentId) -> ClientResult<&mut Component> {
        self.components
            .get_mut(id)
            .ok_or_else(|| ClientError::UnknownComponent(id.clone()))
    }

    pub fn by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Component> + 'a {
        self.components
            .values()
            .filter(move |component| component.name() == name)
    }

    /// Unregister a component and drop its watchers and queued callbacks.
    pub fn remove(&mut self, id: &ComponentId) -> Option<Component> {
        let removed = self.components.shift_remove(id)?;
        self.watchers.retain(|watcher| &watcher.component != id);
        self.microtasks.retain(|(component, _)| component != id);
        debug!(component_id = %id, "component removed");
        Some(removed)
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        self.components.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub(crate) fn components_mut(&mut self) -> impl Iterator<Item = &mut Component> {
        self.components.values_mut()
    }

    /// Register every element under `under` carrying initial data. The
    /// attribute is consumed; the element keeps its `axm:id`.
    pub fn discover(
        &mut self,
        document: &mut Document,
        under: NodeId,
        window: Duration,
    ) -> ClientResult<Vec<ComponentId>> {
        let roots: Vec<NodeId> = document
            .descendants(under)
            .into_iter()
            .filter(|node| document.has_attr(*node, INITIAL_DATA_ATTRIBUTE))
            .collect();
        let mut found = Vec::with_capacity(roots.len());
        for root in roots {
            let raw = document
                .attr(root, INITIAL_DATA_ATTRIBUTE)
                .unwrap_or_default();
            let initial: InitialData = serde_json::from_str(raw)
                .map_err(|error| ClientError::InitialData(error.to_string()))?;
            document.remove_attr(root, INITIAL_DATA_ATTRIBUTE);
            document.set_attr(root, ID_ATTRIBUTE, initial.fingerprint.id.as_str());
            found.push(self.add(Component::new(root, initial, window)));
        }
        if !found.is_empty() {
            info!(count = found.len(), "components discovered");
        }
        Ok(found)
    }

    /// Nearest registered component owning `node` (itself or an ancestor).
    pub fn component_for_node(&self, document: &Document, node: NodeId) -> Option<ComponentId> {
        std::iter::once(node)
            .chain(document.ancestors(node))
            .filter_map(|candidate| document.attr(candidate, ID_ATTRIBUTE))
            .map(ComponentId::from)
            .find(|id| self.components.contains_key(id))
    }

    /// Child component ids of `parent` according to its memo.
    pub fn children_of(&self, parent: &ComponentId) -> Vec<ComponentId> {
        self.components
            .get(parent)
            .map(|component| component.child_ids().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of parent/child hops from `parent` down to `child`, searched
    /// breadth first and bounded by [`MAX_DISTANCE`].
    pub fn get_distance_to_child(&self, parent: &ComponentId, child: &ComponentId) -> Option<usize> {
        let mut seen = HashSet::from([parent.clone()]);
        let mut frontier = VecDeque::from([(parent.clone(), 0_usize)]);
        while let Some((current, distance)) = frontier.pop_front() {
            if &current == child {
                return Some(distance);
            }
            if distance >= MAX_DISTANCE {
                continue;
            }
            for next in self.children_of(&current) {
                if seen.insert(next.clone()) {
                    frontier.push_back((next, distance + 1));
                }
            }
        }
        None
    }

    /// Components an event is delivered to.
    pub fn route(
        &self,
        document: &Document,
        source: Option<&ComponentId>,
        event: &Event,
    ) -> Vec<ComponentId> {
        let listening = |component: &&Component| component.listens_to(&event.name);
        match event.scope() {
            EventScope::Global => self
                .components
                .values()
                .filter(listening)
                .map(|component| component.id().clone())
                .collect(),
            EventScope::SelfOnly => source
                .and_then(|id| self.components.get(id))
                .filter(listening)
                .map(|component| vec![component.id().clone()])
                .unwrap_or_default(),
            EventScope::Component(name) => self
                .by_name(name)
                .filter(listening)
                .map(|component| component.id().clone())
                .collect(),
            EventScope::Ancestors => source
                .and_then(|id| self.nearest_listening_ancestor(document, id, &event.name))
                .into_iter()
                .collect(),
        }
    }

    /// Among the DOM-ancestor components listening for `event`, the one
    /// closest to `source`: memo distance first, DOM depth second.
    fn nearest_listening_ancestor(
        &self,
        document: &Document,
        source: &ComponentId,
        event: &str,
    ) -> Option<ComponentId> {
        let root = self.components.get(source)?.root();
        document
            .ancestors(root)
            .into_iter()
            .enumerate()
            .filter_map(|(level, node)| {
                let id = ComponentId::from(document.attr(node, ID_ATTRIBUTE)?);
                let component = self.components.get(&id)?;
                component.listens_to(event).then_some((id, level + 1))
            })
            .min_by_key(|(id, level)| {
                (
                    self.get_distance_to_child(id, source).unwrap_or(*level),
                    *level,
                )
            })
            .map(|(id, _)| id)
    }

    /// Notify host listeners and queue a `fireEvent` on every target.
    pub fn emit_event(
        &mut self,
        document: &Document,
        source: Option<&ComponentId>,
        event: &Event,
        now: Instant,
    ) -> Vec<ComponentId> {
        if let Some(listeners) = self.listeners.get_mut(&event.name) {
            for listener in listeners {
                listener(event, source);
            }
        }
        let targets = self.route(document, source, event);
        if targets.is_empty() {
            debug!(event = %event.name, "event has no listeners");
        }
        for target in &targets {
            if let Some(component) = self.components.get_mut(target) {
                component.queue.enqueue(
                    Update::fire_event(event.name.clone(), event.params.clone(), source.cloned()),
                    now,
                );
            }
        }
        targets
    }

    pub fn emit(
        &mut self,
        document: &Document,
        source: Option<&ComponentId>,
        name: &str,
        params: Vec<Value>,
        now: Instant,
    ) -> Vec<ComponentId> {
        self.emit_event(document, source, &Event::new(name, params), now)
    }

    pub fn emit_self(
        &mut self,
        document: &Document,
        source: &ComponentId,
        name: &str,
        params: Vec<Value>,
        now: Instant,
    ) -> Vec<ComponentId> {
        self.emit_event(document, Some(source), &Event::new(name, params).self_only(), now)
    }

    pub fn emit_to(
        &mut self,
        document: &Document,
        source: Option<&ComponentId>,
        component: &str,
        name: &str,
        params: Vec<Value>,
        now: Instant,
    ) -> Vec<ComponentId> {
        self.emit_event(document, source, &Event::new(name, params).to(component), now)
    }

    pub fn emit_up(
        &mut self,
        document: &Document,
        source: &ComponentId,
        name: &str,
        params: Vec<Value>,
        now: Instant,
    ) -> Vec<ComponentId> {
        self.emit_event(document, Some(source), &Event::new(name, params).up(), now)
    }

    /// Observe every emitted event named `event`.
    pub fn on(
        &mut self,
        event: impl Into<String>,
        listener: impl FnMut(&Event, Option<&ComponentId>) + Send + 'static,
    ) {
        self.listeners
            .entry(event.into())
            .or_default()
            .push(Box::new(listener));
    }

    /// Run `callback` with the new value whenever `property` of `component`
    /// comes back dirty.
    pub fn watch(
        &mut self,
        component: ComponentId,
        property: impl Into<String>,
        callback: impl FnMut(&Value) + Send + 'static,
    ) {
        self.watchers.push(WatcherEntry {
            component,
            property: property.into(),
            callback: Box::new(callback),
        });
    }

    /// Schedule the watchers affected by `dirty`. Nothing runs until
    /// [`run_microtasks`](Self::run_microtasks).
    pub fn queue_watchers(&mut self, component: &ComponentId, dirty: &[String]) {
        for watcher in &self.watchers {
            if &watcher.component != component {
                continue;
            }
            let root = path::root(&watcher.property);
            if dirty.iter().any(|key| key == root) {
                self.microtasks
                    .push_back((component.clone(), watcher.property.clone()));
            }
        }
    }

    /// Drain queued watcher callbacks. Returns how many ran.
    pub fn run_microtasks(&mut self) -> usize {
        let mut ran = 0;
        while let Some((component, property)) = self.microtasks.pop_front() {
            let value = match self.components.get(&component) {
                Some(found) => found.get(&property).cloned().unwrap_or(Value::Null),
                None => {
                    warn!(component_id = %component, "watcher for a removed component");
                    continue;
                }
            };
            for watcher in &mut self.watchers {
                if watcher.component == component && watcher.property == property {
                    (watcher.callback)(&value);
                    ran += 1;
                }
            }
        }
        ran
    }

    /// Re-point a component at a new root element after a replace.
    pub(crate) fn rebind_root(&mut self, id: &ComponentId, root: NodeId) {
        if let Some(component) = self.components.get_mut(id) {
            component.set_root(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::parse_fragment;
    use raxm_protocol::{Effects, Fingerprint, ServerMemo};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn initial(name: &str, id: &str, listeners: &[&str]) -> InitialData {
        let mut fingerprint = Fingerprint::new(name, "en", "/", "GET");
        fingerprint.id = ComponentId::from(id);
        InitialData {
            fingerprint,
            server_memo: ServerMemo::default(),
            effects: Effects {
                listeners: listeners.iter().map(|l| (*l).to_owned()).collect(),
                ..Effects::default()
            },
        }
    }

    fn attr(initial: &InitialData) -> String {
        serde_json::to_string(initial)
            .unwrap()
            .replace('&', "&amp;")
            .replace('"', "&quot;")
    }

    /// page > panel > item, page and panel both listen for `picked`.
    fn nested() -> (Document, ComponentRegistry) {
        let mut page = initial("page", "page", &["picked"]);
        let panel = initial("panel", "panel", &["picked"]);
        let item = initial("item", "item", &[]);
        page.server_memo
            .children
            .insert("panel".into(), panel.fingerprint.clone());
        let mut panel_with_child = panel.clone();
        panel_with_child
            .server_memo
            .children
            .insert("item".into(), item.fingerprint.clone());

        let html = format!(
            r#"<main axm:initial-data="{}"><section axm:initial-data="{}"><div><p axm:initial-data="{}">x</p></div></section></main>"#,
            attr(&page),
            attr(&panel_with_child),
            attr(&item),
        );
        let mut document = parse_fragment(&html).unwrap();
        let mut registry = ComponentRegistry::new();
        let found = registry
            .discover(&mut document, Document::ROOT, Duration::ZERO)
            .unwrap();
        assert_eq!(found.len(), 3);
        (document, registry)
    }

    #[test]
    fn discovery_consumes_initial_data() {
        let (document, registry) = nested();
        let main = document.first_element_child(Document::ROOT).unwrap();
        assert_eq!(document.attr(main, ID_ATTRIBUTE), Some("page"));
        assert!(!document.has_attr(main, INITIAL_DATA_ATTRIBUTE));
        assert_eq!(registry.by_name("panel").count(), 1);

        let paragraph = document.find_by_attr(main, ID_ATTRIBUTE, "item").unwrap();
        let text = document.children(paragraph)[0];
        assert_eq!(
            registry.component_for_node(&document, text),
            Some(ComponentId::from("item"))
        );
    }

    #[test]
    fn distance_follows_memo_children() {
        let (_, registry) = nested();
        let page = ComponentId::from("page");
        assert_eq!(registry.get_distance_to_child(&page, &page), Some(0));
        assert_eq!(
            registry.get_distance_to_child(&page, &ComponentId::from("item")),
            Some(2)
        );
        assert_eq!(
            registry.get_distance_to_child(&ComponentId::from("item"), &page),
            None
        );
    }

    #[test]
    fn emit_up_reaches_the_nearest_listener_only() {
        let (document, mut registry) = nested();
        let item = ComponentId::from("item");
        let targets = registry.emit_up(&document, &item, "picked", vec![json!(7)], Instant::now());
        assert_eq!(targets, vec![ComponentId::from("panel")]);

        let panel = registry.find(&ComponentId::from("panel")).unwrap();
        match panel.queue.pending() {
            [Update::FireEvent(fire)] => {
                assert_eq!(fire.event, "picked");
                assert_eq!(fire.params, vec![json!(7)]);
                assert_eq!(fire.listener_id, Some(item.clone()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(registry.find(&ComponentId::from("page")).unwrap().queue.pending().is_empty());
    }

    #[test]
    fn scopes_and_host_listeners() {
        let (document, mut registry) = nested();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.on("picked", move |event, source| {
            sink.lock()
                .unwrap()
                .push((event.name.clone(), source.cloned()));
        });

        let now = Instant::now();
        let mut global = registry.emit(&document, None, "picked", vec![], now);
        global.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(global, vec![ComponentId::from("page"), ComponentId::from("panel")]);

        let to = registry.emit_to(&document, None, "page", "picked", vec![], now);
        assert_eq!(to, vec![ComponentId::from("page")]);

        let item = ComponentId::from("item");
        assert!(registry.emit_self(&document, &item, "picked", vec![], now).is_empty());
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn watchers_run_from_the_microtask_queue() {
        let (_, mut registry) = nested();
        let id = ComponentId::from("panel");
        if let Some(panel) = registry.find_mut(&id) {
            let mut memo = panel.memo().clone();
            memo.data.insert("address".into(), json!({"city": "Quito"}));
            panel.apply(&raxm_protocol::MessageResponse {
                effects: Effects::default(),
                server_memo: memo,
            });
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.watch(id.clone(), "address.city", move |value| {
            sink.lock().unwrap().push(value.clone());
        });

        registry.queue_watchers(&id, &["title".to_owned()]);
        registry.queue_watchers(&id, &["address".to_owned()]);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(registry.run_microtasks(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![json!("Quito")]);

        registry.queue_watchers(&id, &["address".to_owned()]);
        registry.remove(&id);
        assert_eq!(registry.run_microtasks(), 0);
    }
}
