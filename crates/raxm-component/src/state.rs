use crate::capability::{ErrorBag, EventBag, Navigator};
use crate::schema::ComponentSchema;
use indexmap::IndexMap;
use raxm_guard::ChecksumGuard;
use raxm_protocol::{DataMap, Fingerprint, RaxmError, RaxmResult, ServerMemo, path};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Result of [`ComponentState::dehydrate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dehydrated {
    pub memo: ServerMemo,
    /// Every top-level key whose value differs from the hydrated snapshot.
    pub dirty: Vec<String>,
}

/// Per-request state of one component instance.
///
/// Only declared properties ever enter `data`. The snapshot taken at
/// hydration is kept to compute the dirty set on dehydration.
#[derive(Debug, Clone)]
pub struct ComponentState {
    schema: Arc<ComponentSchema>,
    data: DataMap,
    children: IndexMap<String, Fingerprint>,
    data_meta: DataMap,
    previous_data: DataMap,
    previous_html_hash: Option<String>,
    pub events: EventBag,
    pub errors: ErrorBag,
    pub navigator: Navigator,
}

impl ComponentState {
    fn empty(schema: Arc<ComponentSchema>) -> Self {
        Self {
            schema,
            data: DataMap::new(),
            children: IndexMap::new(),
            data_meta: DataMap::new(),
            previous_data: DataMap::new(),
            previous_html_hash: None,
            events: EventBag::default(),
            errors: ErrorBag::default(),
            navigator: Navigator::default(),
        }
    }

    /// Defaults for every declared property, overridden by the declared keys
    /// of `initial`. Unknown keys are skipped.
    pub fn mount(schema: Arc<ComponentSchema>, initial: &DataMap) -> RaxmResult<Self> {
        let mut state = Self::empty(schema.clone());
        state.data = schema.defaults();
        for (key, value) in initial {
            match schema.property(key) {
                Some(spec) => {
                    let value = spec.kind.coerce(key, value.clone())?;
                    state.data.insert(key.clone(), value);
                }
                None => debug!(
                    component = schema.name(),
                    property = %key,
                    "undeclared mount property skipped"
                ),
            }
        }
        Ok(state)
    }

    /// Restore state from a verified memo. Key order of the memo is kept;
    /// declared properties missing from it fall back to their default.
    pub fn hydrate(schema: Arc<ComponentSchema>, memo: &ServerMemo) -> Self {
        let mut state = Self::empty(schema.clone());
        for (key, value) in &memo.data {
            if schema.has_property(key) {
                state.data.insert(key.clone(), value.clone());
            } else {
                debug!(
                    component = schema.name(),
                    property = %key,
                    "undeclared memo property dropped"
                );
            }
        }
        for spec in schema.properties() {
            if !state.data.contains_key(&spec.name) {
                state.data.insert(spec.name.clone(), spec.default.clone());
            }
        }
        state.children = memo.children.clone();
        state.data_meta = memo.data_meta.clone();
        state.errors = ErrorBag::from_messages(memo.errors.clone());
        state.previous_data = memo.data.clone();
        state.previous_html_hash = Some(memo.html_hash.clone()).filter(|hash| !hash.is_empty());
        state
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<ComponentSchema> {
        &self.schema
    }

    pub fn data(&self) -> &DataMap {
        &self.data
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        path::get(&self.data, path)
    }

    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> RaxmResult<T> {
        let value = self
            .get(path)
            .cloned()
            .ok_or_else(|| self.property_not_found(path))?;
        serde_json::from_value(value).map_err(|error| {
            RaxmError::component(format!("property {path} has an unexpected shape: {error}"))
        })
    }

    /// Write a property. A top-level write is coerced to the declared kind;
    /// a dotted write merges into the existing nested value.
    pub fn set(&mut self, path: &str, value: Value) -> RaxmResult<()> {
        let root = path::root(path);
        let spec = self
            .schema
            .property(root)
            .ok_or_else(|| self.property_not_found(root))?;
        if root == path {
            let value = spec.kind.coerce(path, value)?;
            self.data.insert(root.to_owned(), value);
            Ok(())
        } else {
            path::set(&mut self.data, path, value)
        }
    }

    /// Flip a boolean property and return its new value.
    pub fn toggle(&mut self, path: &str) -> RaxmResult<bool> {
        let current = self
            .get(path)
            .map(|value| value.as_bool().unwrap_or(!value.is_null()))
            .unwrap_or(false);
        self.set(path, Value::Bool(!current))?;
        Ok(!current)
    }

    /// Restore properties to their declared defaults.
    pub fn reset(&mut self, properties: &[&str]) -> RaxmResult<()> {
        for name in properties {
            let spec = self
                .schema
                .property(name)
                .ok_or_else(|| self.property_not_found(name))?;
            self.data.insert(spec.name.clone(), spec.default.clone());
        }
        Ok(())
    }

    pub fn children(&self) -> &IndexMap<String, Fingerprint> {
        &self.children
    }

    pub fn set_children(&mut self, children: IndexMap<String, Fingerprint>) {
        self.children = children;
    }

    pub fn previous_html_hash(&self) -> Option<&str> {
        self.previous_html_hash.as_deref()
    }

    pub fn dirty_keys(&self) -> Vec<String> {
        self.data
            .iter()
            .filter(|(key, value)| self.previous_data.get(key.as_str()) != Some(*value))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Capture the current state as a signed memo plus the dirty set.
    pub fn dehydrate(
        &self,
        guard: &ChecksumGuard,
        fingerprint: &Fingerprint,
        html_hash: impl Into<String>,
    ) -> RaxmResult<Dehydrated> {
        let mut memo = ServerMemo {
            data: self.data.clone(),
            children: self.children.clone(),
            errors: self.errors.messages().clone(),
            html_hash: html_hash.into(),
            data_meta: self.data_meta.clone(),
            checksum: String::new(),
        };
        memo.checksum = guard.generate(fingerprint, &memo)?;
        Ok(Dehydrated {
            memo,
            dirty: self.dirty_keys(),
        })
    }

    fn property_not_found(&self, property: &str) -> RaxmError {
        RaxmError::PropertyNotFound {
            component: self.schema.name().to_owned(),
            property: property.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropKind;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn schema() -> Arc<ComponentSchema> {
        Arc::new(
            ComponentSchema::new("profile")
                .with_property("count", PropKind::Integer, json!(0))
                .with_property("title", PropKind::String, json!(""))
                .with_property(
                    "address",
                    PropKind::Object,
                    json!({"city": "Bogota", "zip": "000"}),
                )
                .with_property("active", PropKind::Boolean, json!(false)),
        )
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint {
            id: "p1".into(),
            name: "profile".into(),
            locale: "en".into(),
            path: "/profile".into(),
            method: "GET".into(),
        }
    }

    fn data(value: Value) -> DataMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn mount_uses_declared_keys_only() {
        let state =
            ComponentState::mount(schema(), &data(json!({"count": "5", "isAdmin": true})))
                .unwrap();
        assert_eq!(state.get("count"), Some(&json!(5)));
        assert_eq!(state.get("title"), Some(&json!("")));
        assert!(state.get("isAdmin").is_none());
        let keys: Vec<_> = state.data().keys().cloned().collect();
        assert_eq!(keys, vec!["count", "title", "address", "active"]);
    }

    #[test]
    fn mount_rejects_incoercible_values() {
        let error = ComponentState::mount(schema(), &data(json!({"count": "many"}))).unwrap_err();
        assert!(matches!(error, RaxmError::PropertyTypeMismatch { .. }));
    }

    #[test]
    fn hydrate_dehydrate_is_idempotent() {
        let guard = ChecksumGuard::new("key");
        let mounted = ComponentState::mount(schema(), &DataMap::new()).unwrap();
        let first = mounted.dehydrate(&guard, &fingerprint(), "aaaa").unwrap();

        let hydrated = ComponentState::hydrate(schema(), &first.memo);
        let second = hydrated.dehydrate(&guard, &fingerprint(), "aaaa").unwrap();
        assert_eq!(second.memo.data, first.memo.data);
        assert_eq!(second.memo.checksum, first.memo.checksum);
        assert!(second.dirty.is_empty());
    }

    #[test]
    fn dirty_set_reports_every_changed_key() {
        let guard = ChecksumGuard::new("key");
        let memo = ComponentState::mount(schema(), &DataMap::new())
            .unwrap()
            .dehydrate(&guard, &fingerprint(), "")
            .unwrap()
            .memo;

        let mut state = ComponentState::hydrate(schema(), &memo);
        state.set("count", json!(1)).unwrap();
        assert_eq!(state.dirty_keys(), vec!["count"]);

        state.set("title", json!("Hi")).unwrap();
        state.toggle("active").unwrap();
        let dirty: BTreeSet<_> = state
            .dehydrate(&guard, &fingerprint(), "")
            .unwrap()
            .dirty
            .into_iter()
            .collect();
        assert_eq!(
            dirty,
            ["active", "count", "title"]
                .into_iter()
                .map(String::from)
                .collect()
        );
    }

    #[test]
    fn writing_the_same_value_is_not_dirty() {
        let guard = ChecksumGuard::new("key");
        let memo = ComponentState::mount(schema(), &DataMap::new())
            .unwrap()
            .dehydrate(&guard, &fingerprint(), "")
            .unwrap()
            .memo;
        let mut state = ComponentState::hydrate(schema(), &memo);
        state.set("count", json!("0")).unwrap();
        assert!(state.dirty_keys().is_empty());
    }

    #[test]
    fn dotted_write_preserves_siblings() {
        let mut state = ComponentState::mount(schema(), &DataMap::new()).unwrap();
        state.set("address.city", json!("Lima")).unwrap();
        assert_eq!(
            state.get("address"),
            Some(&json!({"city": "Lima", "zip": "000"}))
        );
        assert_eq!(state.get_as::<String>("address.zip").unwrap(), "000");
    }

    #[test]
    fn undeclared_writes_are_rejected() {
        let mut state = ComponentState::mount(schema(), &DataMap::new()).unwrap();
        let error = state.set("isAdmin", json!(true)).unwrap_err();
        assert_eq!(
            error,
            RaxmError::PropertyNotFound {
                component: "profile".into(),
                property: "isAdmin".into()
            }
        );
        assert!(state.set("secret.key", json!(1)).is_err());
    }

    #[test]
    fn hydrate_drops_undeclared_and_fills_missing() {
        let memo = ServerMemo {
            data: data(json!({"title": "x", "ghost": 1})),
            html_hash: "beef".into(),
            ..ServerMemo::default()
        };
        let state = ComponentState::hydrate(schema(), &memo);
        assert!(state.get("ghost").is_none());
        assert_eq!(state.get("count"), Some(&json!(0)));
        assert_eq!(state.previous_html_hash(), Some("beef"));
        assert_eq!(state.data().keys().next().map(String::as_str), Some("title"));
    }

    #[test]
    fn reset_restores_defaults() {
        let mut state = ComponentState::mount(schema(), &data(json!({"count": 9}))).unwrap();
        state.reset(&["count"]).unwrap();
        assert_eq!(state.get("count"), Some(&json!(0)));
    }
}
