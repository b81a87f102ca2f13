//! Wire types: the Fingerprint/ServerMemo/Effects envelope.

use crate::error::{RaxmError, RaxmResult};
use crate::event::{BrowserEvent, Event};
use crate::ids::ComponentId;
use crate::update::Update;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered JSON object. Key order is insertion order, which the checksum
/// depends on.
pub type DataMap = serde_json::Map<String, Value>;

/// Immutable identity of one component instance.
///
/// Created once when the component is first rendered and re-sent verbatim
/// with every action so the server can reconstruct the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub id: ComponentId,
    pub name: String,
    pub locale: String,
    pub path: String,
    pub method: String,
}

impl Fingerprint {
    pub fn new(
        name: impl Into<String>,
        locale: impl Into<String>,
        path: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            id: ComponentId::new_random(),
            name: name.into(),
            locale: locale.into(),
            path: path.into(),
            method: method.into(),
        }
    }

    pub fn validate(&self) -> RaxmResult<()> {
        if self.id.is_empty() {
            return Err(RaxmError::MalformedEnvelope(
                "fingerprint.id is empty".to_owned(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(RaxmError::MalformedEnvelope(
                "fingerprint.name is empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// The authoritative, signed state snapshot of a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMemo {
    #[serde(default)]
    pub data: DataMap,
    /// Keyed child components rendered by this component. Excluded from the
    /// checksum so independent child updates keep it stable.
    #[serde(default)]
    pub children: IndexMap<String, Fingerprint>,
    #[serde(default)]
    pub errors: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub html_hash: String,
    #[serde(default)]
    pub data_meta: DataMap,
    #[serde(default)]
    pub checksum: String,
}

impl ServerMemo {
    /// The part of the memo covered by the checksum.
    pub fn signable(&self) -> SignableMemo<'_> {
        SignableMemo {
            data: &self.data,
            errors: &self.errors,
            html_hash: &self.html_hash,
            data_meta: &self.data_meta,
        }
    }
}

/// Borrowed view of a [`ServerMemo`] without `children` and `checksum`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignableMemo<'a> {
    pub data: &'a DataMap,
    pub errors: &'a IndexMap<String, Vec<String>>,
    pub html_hash: &'a str,
    pub data_meta: &'a DataMap,
}

/// Diff-oriented result of processing a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effects {
    /// Omitted when the rendered HTML hash did not change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Top-level data keys whose value changed since the incoming memo.
    #[serde(default)]
    pub dirty: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emits: Vec<Event>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dispatches: Vec<BrowserEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigate: Option<String>,
    /// Non-null method return values keyed by update id.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub returns: IndexMap<String, Value>,
}

/// Request envelope: one component, one ordered batch of updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub fingerprint: Fingerprint,
    pub server_memo: ServerMemo,
    #[serde(default)]
    pub updates: Vec<Update>,
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub effects: Effects,
    pub server_memo: ServerMemo,
}

/// Payload embedded in the `axm:initial-data` attribute of a freshly
/// mounted component's root element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialData {
    pub fingerprint: Fingerprint,
    pub server_memo: ServerMemo,
    #[serde(default)]
    pub effects: Effects,
}
