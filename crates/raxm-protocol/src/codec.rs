//! WireCodec: request/response envelope codec and the checksum input.
//!
//! Decoding validates the update `type` tags before deserializing so an
//! unknown action is reported as [`RaxmError::UnknownAction`] rather than a
//! generic malformed envelope.

use crate::error::{RaxmError, RaxmResult};
use crate::update::Update;
use crate::wire::{Fingerprint, MessageRequest, MessageResponse, ServerMemo, SignableMemo};
use serde::Serialize;
use serde_json::{Number, Value};

/// Stateless encoder/decoder for the Raxm envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

#[derive(Serialize)]
struct ChecksumInput<'a> {
    fingerprint: &'a Fingerprint,
    memo: SignableMemo<'a>,
}

impl WireCodec {
    pub fn decode_request(bytes: &[u8]) -> RaxmResult<MessageRequest> {
        let raw: Value = serde_json::from_slice(bytes).map_err(RaxmError::malformed)?;
        Self::check_update_types(&raw)?;
        let request: MessageRequest = serde_json::from_value(raw).map_err(RaxmError::malformed)?;
        request.fingerprint.validate()?;
        Ok(request)
    }

    pub fn encode_request(request: &MessageRequest) -> RaxmResult<Vec<u8>> {
        serde_json::to_vec(request).map_err(|error| RaxmError::Serialization(error.to_string()))
    }

    pub fn encode_response(response: &MessageResponse) -> RaxmResult<Vec<u8>> {
        serde_json::to_vec(response).map_err(|error| RaxmError::Serialization(error.to_string()))
    }

    pub fn decode_response(bytes: &[u8]) -> RaxmResult<MessageResponse> {
        serde_json::from_slice(bytes).map_err(RaxmError::malformed)
    }

    /// Canonical bytes over `{fingerprint, memo}` with children and checksum
    /// stripped. Object key order is kept as-is; integral floats are written
    /// as integers so a value that lost its `.0` in a client round trip
    /// still hashes the same.
    pub fn canonical_bytes(fingerprint: &Fingerprint, memo: &ServerMemo) -> RaxmResult<Vec<u8>> {
        let input = ChecksumInput {
            fingerprint,
            memo: memo.signable(),
        };
        let mut value = serde_json::to_value(&input)
            .map_err(|error| RaxmError::Serialization(error.to_string()))?;
        normalize_numbers(&mut value);
        serde_json::to_vec(&value).map_err(|error| RaxmError::Serialization(error.to_string()))
    }

    fn check_update_types(raw: &Value) -> RaxmResult<()> {
        let Some(object) = raw.as_object() else {
            return Err(RaxmError::MalformedEnvelope(
                "envelope is not an object".to_owned(),
            ));
        };
        for required in ["fingerprint", "serverMemo"] {
            if !object.contains_key(required) {
                return Err(RaxmError::MalformedEnvelope(format!(
                    "missing field `{required}`"
                )));
            }
        }
        let Some(updates) = object.get("updates") else {
            return Ok(());
        };
        let updates = updates.as_array().ok_or_else(|| {
            RaxmError::MalformedEnvelope("`updates` is not an array".to_owned())
        })?;
        for update in updates {
            let kind = update
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| RaxmError::MalformedEnvelope("update without `type`".to_owned()))?;
            if !Update::KNOWN_TYPES.contains(&kind) {
                return Err(RaxmError::UnknownAction(kind.to_owned()));
            }
        }
        Ok(())
    }
}

fn normalize_numbers(value: &mut Value) {
    match value {
        Value::Number(number) => {
            if let Some(float) = number.as_f64()
                && !number.is_i64()
                && !number.is_u64()
                && float.fract() == 0.0
                && float.abs() < 9_007_199_254_740_992.0
            {
                *number = Number::from(float as i64);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_numbers),
        Value::Object(map) => map.values_mut().for_each(normalize_numbers),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_json(updates: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "fingerprint": {"id": "c1", "name": "counter", "locale": "en", "path": "/", "method": "GET"},
            "serverMemo": {"data": {"count": 0}, "checksum": "x"},
            "updates": updates,
        }))
        .unwrap()
    }

    #[test]
    fn decodes_ordered_updates() {
        let bytes = request_json(json!([
            {"type": "syncInput", "payload": {"id": "a", "name": "count", "value": 3}},
            {"type": "callMethod", "payload": {"id": "b", "method": "increment", "params": []}}
        ]));
        let request = WireCodec::decode_request(&bytes).unwrap();
        assert_eq!(request.fingerprint.name, "counter");
        assert_eq!(request.updates.len(), 2);
        assert_eq!(request.updates[0].type_name(), "syncInput");
        assert_eq!(request.updates[1].type_name(), "callMethod");
    }

    #[test]
    fn unknown_update_type_is_reported() {
        let bytes = request_json(json!([{"type": "teleport", "payload": {}}]));
        let error = WireCodec::decode_request(&bytes).unwrap_err();
        assert_eq!(error, RaxmError::UnknownAction("teleport".into()));
    }

    #[test]
    fn garbage_is_malformed() {
        let error = WireCodec::decode_request(b"{not json").unwrap_err();
        assert!(matches!(error, RaxmError::MalformedEnvelope(_)));

        let error = WireCodec::decode_request(br#"{"serverMemo": {}}"#).unwrap_err();
        assert!(matches!(error, RaxmError::MalformedEnvelope(_)));
    }

    #[test]
    fn canonical_bytes_keep_key_order_and_skip_children() {
        let fingerprint = Fingerprint {
            id: "c1".into(),
            name: "form".into(),
            locale: "en".into(),
            path: "/".into(),
            method: "GET".into(),
        };
        let mut memo = ServerMemo::default();
        memo.data.insert("zeta".into(), json!(1));
        memo.data.insert("alpha".into(), json!(2));
        memo.children
            .insert("k".into(), Fingerprint::new("child", "en", "/", "GET"));
        memo.checksum = "ignored".into();

        let bytes = WireCodec::canonical_bytes(&fingerprint, &memo).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
        assert!(!text.contains("children"));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn integral_floats_hash_like_integers() {
        let fingerprint = Fingerprint::new("price", "en", "/", "GET");
        let mut with_float = ServerMemo::default();
        with_float.data.insert("amount".into(), json!(10.0));
        let mut with_int = ServerMemo::default();
        with_int.data.insert("amount".into(), json!(10));
        assert_eq!(
            WireCodec::canonical_bytes(&fingerprint, &with_float).unwrap(),
            WireCodec::canonical_bytes(&fingerprint, &with_int).unwrap()
        );
    }
}
