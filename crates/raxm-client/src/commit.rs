//! Per-component commit queue.
//!
//! Actions are coalesced over a short window and sent as one batch. Only one
//! message per component is in transit; anything queued meanwhile is sent as
//! soon as the response (or failure) arrives.

use crate::debounce::DebounceTimer;
use indexmap::IndexMap;
use raxm_protocol::{MessageResponse, Update};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

pub const COMMIT_WINDOW: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq)]
struct InTransit {
    /// Deferred model values carried by the in-flight batch.
    deferred: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
enum Prefetch {
    InFlight,
    Ready(MessageResponse),
}

#[derive(Debug, Clone)]
pub struct CommitQueue {
    pending: Vec<Update>,
    deferred: IndexMap<String, Value>,
    in_transit: Option<InTransit>,
    timer: DebounceTimer,
    window: Duration,
    prefetch: IndexMap<String, Prefetch>,
}

impl Default for CommitQueue {
    fn default() -> Self {
        Self::new(COMMIT_WINDOW)
    }
}

impl CommitQueue {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: Vec::new(),
            deferred: IndexMap::new(),
            in_transit: None,
            timer: DebounceTimer::default(),
            window,
            prefetch: IndexMap::new(),
        }
    }

    /// Queue an action. While nothing is in transit the window is extended
    /// to `now + window`; it is never pulled earlier.
    pub fn enqueue(&mut self, update: Update, now: Instant) {
        debug!(kind = update.type_name(), "action queued");
        self.pending.push(update);
        if self.in_transit.is_none() {
            let deadline = now + self.window;
            if self.timer.deadline().is_none_or(|current| current < deadline) {
                self.timer.schedule(now, self.window);
            }
        }
    }

    /// Store a deferred model value; it rides along with the next batch.
    pub fn defer(&mut self, name: impl Into<String>, value: Value) {
        self.deferred.insert(name.into(), value);
    }

    pub fn deferred(&self) -> &IndexMap<String, Value> {
        &self.deferred
    }

    pub fn pending(&self) -> &[Update] {
        &self.pending
    }

    pub fn in_transit(&self) -> bool {
        self.in_transit.is_some()
    }

    /// Nothing deferred, queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.deferred.is_empty() && self.pending.is_empty() && self.in_transit.is_none()
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.in_transit.is_none() && !self.pending.is_empty() && self.timer.is_due(now)
    }

    /// Take the next batch if the window elapsed. Deferred syncs lead,
    /// followed by the queued actions in order.
    pub fn take_ready(&mut self, now: Instant) -> Option<Vec<Update>> {
        if !self.is_ready(now) {
            return None;
        }
        self.timer.cancel_pending();
        let deferred = std::mem::take(&mut self.deferred);
        let mut batch: Vec<Update> = deferred
            .iter()
            .map(|(name, value)| Update::sync_input(name.clone(), value.clone()))
            .collect();
        batch.append(&mut self.pending);
        self.in_transit = Some(InTransit { deferred });
        debug!(updates = batch.len(), "batch taken");
        Some(batch)
    }

    /// The in-flight message was answered.
    pub fn complete(&mut self, now: Instant) {
        self.in_transit = None;
        self.prefetch.clear();
        self.resume(now);
    }

    /// The in-flight message failed. Its deferred values come back (newer
    /// values typed meanwhile win) and are retried with the next action.
    pub fn fail(&mut self, now: Instant) {
        if let Some(in_transit) = self.in_transit.take() {
            let newer = std::mem::take(&mut self.deferred);
            self.deferred = in_transit.deferred;
            self.deferred.extend(newer);
        }
        self.resume(now);
    }

    fn resume(&mut self, now: Instant) {
        if !self.pending.is_empty() {
            self.timer.schedule(now, Duration::ZERO);
        }
    }

    /// Register a speculative call. Returns `false` if one with the same
    /// key is already known.
    pub fn begin_prefetch(&mut self, method: &str, params: &[Value]) -> bool {
        let key = prefetch_key(method, params);
        if self.prefetch.contains_key(&key) {
            return false;
        }
        self.prefetch.insert(key, Prefetch::InFlight);
        true
    }

    pub fn store_prefetch(&mut self, key: &str, response: MessageResponse) {
        if let Some(slot) = self.prefetch.get_mut(key) {
            *slot = Prefetch::Ready(response);
        }
    }

    /// Consume a prefetched response for this call, if it arrived.
    pub fn take_prefetched(&mut self, method: &str, params: &[Value]) -> Option<MessageResponse> {
        let key = prefetch_key(method, params);
        match self.prefetch.shift_remove(&key)? {
            Prefetch::Ready(response) => Some(response),
            Prefetch::InFlight => {
                self.prefetch.insert(key, Prefetch::InFlight);
                None
            }
        }
    }

    pub fn discard_prefetch(&mut self, key: &str) {
        self.prefetch.shift_remove(key);
    }

    pub fn discard_prefetches(&mut self) {
        self.prefetch.clear();
    }
}

pub fn prefetch_key(method: &str, params: &[Value]) -> String {
    format!("{method}({})", Value::Array(params.to_vec()))
}
