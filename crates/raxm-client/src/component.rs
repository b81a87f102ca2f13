use crate::commit::CommitQueue;
use crate::debounce::DebounceTimer;
use crate::dom::NodeId;
use raxm_protocol::{
    ComponentId, DataMap, Fingerprint, InitialData, MessageRequest, MessageResponse, ServerMemo,
    Update, path,
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A model binding waiting for its debounce to elapse.
#[derive(Debug, Clone)]
struct PendingModel {
    timer: DebounceTimer,
    name: String,
    value: Value,
}

/// Client-side view of one mounted component.
#[derive(Debug, Clone)]
pub struct Component {
    fingerprint: Fingerprint,
    memo: ServerMemo,
    listeners: Vec<String>,
    root: NodeId,
    pub queue: CommitQueue,
    models: HashMap<NodeId, PendingModel>,
}

impl Component {
    pub fn new(root: NodeId, initial: InitialData, window: Duration) -> Self {
        Self {
            fingerprint: initial.fingerprint,
            memo: initial.server_memo,
            listeners: initial.effects.listeners,
            root,
            queue: CommitQueue::new(window),
            models: HashMap::new(),
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.fingerprint.id
    }

    pub fn name(&self) -> &str {
        &self.fingerprint.name
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn memo(&self) -> &ServerMemo {
        &self.memo
    }

    pub fn data(&self) -> &DataMap {
        &self.memo.data
    }

    /// Read a (possibly dotted) property from the last known memo.
    pub fn get(&self, name: &str) -> Option<&Value> {
        path::get(&self.memo.data, name)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn listeners(&self) -> &[String] {
        &self.listeners
    }

    pub fn listens_to(&self, event: &str) -> bool {
        self.listeners.iter().any(|listener| listener == event)
    }

    /// Child fingerprints keyed by render key.
    pub fn child_ids(&self) -> impl Iterator<Item = &ComponentId> {
        self.memo.children.values().map(|child| &child.id)
    }

    /// Adopt the memo of a response. Listeners are only replaced when the
    /// response carries them.
    pub fn apply(&mut self, response: &MessageResponse) {
        self.memo = response.server_memo.clone();
        if !response.effects.listeners.is_empty() {
            self.listeners = response.effects.listeners.clone();
        }
    }

    pub fn request(&self, updates: Vec<Update>) -> MessageRequest {
        MessageRequest {
            fingerprint: self.fingerprint.clone(),
            server_memo: self.memo.clone(),
            updates,
        }
    }

    /// Hold a model value until `delay` passes without further input on
    /// `node`.
    pub fn debounce_model(
        &mut self,
        node: NodeId,
        name: &str,
        value: Value,
        now: Instant,
        delay: Duration,
    ) {
        let pending = self.models.entry(node).or_insert_with(|| PendingModel {
            timer: DebounceTimer::default(),
            name: name.to_owned(),
            value: Value::Null,
        });
        name.clone_into(&mut pending.name);
        pending.value = value;
        pending.timer.schedule(now, delay);
    }

    /// Drop a debounced value so an immediate sync can replace it.
    pub fn cancel_model(&mut self, node: NodeId) -> bool {
        self.models
            .remove(&node)
            .is_some_and(|mut pending| pending.timer.cancel_pending())
    }

    /// Enqueue every debounced model whose delay elapsed, as of its own
    /// deadline.
    pub fn flush_due_models(&mut self, now: Instant) -> usize {
        let mut due: Vec<(Instant, NodeId)> = self
            .models
            .iter_mut()
            .filter_map(|(node, pending)| {
                let deadline = pending.timer.deadline()?;
                pending.timer.fire(now).then_some((deadline, *node))
            })
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (deadline, node) in &due {
            if let Some(pending) = self.models.remove(node) {
                self.queue
                    .enqueue(Update::sync_input(pending.name, pending.value), *deadline);
            }
        }
        due.len()
    }

    /// Enqueue every debounced model now, cancelling its timer. An action
    /// about to be queued must see the values typed before it.
    pub fn flush_all_models(&mut self, now: Instant) -> usize {
        let mut pending: Vec<(Option<Instant>, PendingModel)> = self
            .models
            .drain()
            .map(|(_, mut pending)| {
                let deadline = pending.timer.deadline();
                pending.timer.cancel_pending();
                (deadline, pending)
            })
            .collect();
        pending.sort_by_key(|(deadline, _)| *deadline);
        let flushed = pending.len();
        for (_, model) in pending {
            self.queue
                .enqueue(Update::sync_input(model.name, model.value), now);
        }
        flushed
    }

    pub fn has_pending_models(&self) -> bool {
        !self.models.is_empty()
    }

    pub fn next_model_deadline(&self) -> Option<Instant> {
        self.models
            .values()
            .filter_map(|pending| pending.timer.deadline())
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use raxm_protocol::Effects;
    use serde_json::json;

    fn component() -> Component {
        let mut memo = ServerMemo::default();
        memo.data.insert("address".into(), json!({"city": "Bogota"}));
        Component::new(
            Document::ROOT,
            InitialData {
                fingerprint: Fingerprint::new("profile", "en", "/", "GET"),
                server_memo: memo,
                effects: Effects {
                    listeners: vec!["saved".into()],
                    ..Effects::default()
                },
            },
            Duration::ZERO,
        )
    }

    #[test]
    fn reads_memo_and_listeners() {
        let component = component();
        assert_eq!(component.name(), "profile");
        assert_eq!(component.get("address.city"), Some(&json!("Bogota")));
        assert!(component.listens_to("saved"));
        assert!(!component.listens_to("deleted"));
    }

    #[test]
    fn apply_keeps_listeners_when_absent() {
        let mut component = component();
        let mut memo = component.memo().clone();
        memo.data.insert("address".into(), json!({"city": "Lima"}));
        component.apply(&MessageResponse {
            effects: Effects::default(),
            server_memo: memo,
        });
        assert_eq!(component.get("address.city"), Some(&json!("Lima")));
        assert!(component.listens_to("saved"));
    }

    #[test]
    fn debounced_model_enqueues_latest_value() {
        let start = Instant::now();
        let delay = Duration::from_millis(150);
        let mut component = component();
        let node = Document::ROOT;
        component.debounce_model(node, "address.city", json!("M"), start, delay);
        component.debounce_model(
            node,
            "address.city",
            json!("Medellin"),
            start + Duration::from_millis(100),
            delay,
        );

        assert_eq!(component.flush_due_models(start + Duration::from_millis(200)), 0);
        assert_eq!(component.flush_due_models(start + Duration::from_millis(250)), 1);
        match component.queue.pending() {
            [Update::SyncInput(sync)] => assert_eq!(sync.value, json!("Medellin")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(component.next_model_deadline().is_none());
    }

    #[test]
    fn due_model_commits_one_window_after_its_deadline() {
        let start = Instant::now();
        let mut component = component();
        component.queue = CommitQueue::new(Duration::from_millis(5));
        component.debounce_model(
            Document::ROOT,
            "address.city",
            json!("Lima"),
            start,
            Duration::from_millis(150),
        );

        let late = start + Duration::from_millis(156);
        assert_eq!(component.flush_due_models(late), 1);
        assert!(component.queue.take_ready(late).is_some());
    }

    #[test]
    fn flush_all_models_cancels_timers_in_input_order() {
        let start = Instant::now();
        let delay = Duration::from_millis(150);
        let mut document = Document::default();
        let first = document.create_element("input");
        let second = document.create_element("input");
        let mut component = component();
        component.debounce_model(first, "name", json!("Ada"), start, delay);
        component.debounce_model(
            second,
            "address.city",
            json!("Lima"),
            start + Duration::from_millis(10),
            delay,
        );
        assert!(component.has_pending_models());

        assert_eq!(component.flush_all_models(start + Duration::from_millis(20)), 2);
        assert!(!component.has_pending_models());
        let names: Vec<&str> = component
            .queue
            .pending()
            .iter()
            .map(|update| match update {
                Update::SyncInput(sync) => sync.name.as_str(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, ["name", "address.city"]);
        assert_eq!(component.flush_due_models(start + Duration::from_secs(1)), 0);
    }
}
