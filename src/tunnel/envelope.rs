//! Tunnel envelope codec.
//!
//! The first payload on every channel is a JSON object naming the route to
//! dispatch to:
//!
//! ```text
//! {"Value": "/status", ...any other fields...}
//! ```
//!
//! Only the routing key is decoded. The whole payload, extra fields and all,
//! travels on unchanged as the request body.
//!
//! The key name matches case-insensitively (`Value`, `value`, `VALUE`) and
//! when it appears more than once the last occurrence wins. A `null` key
//! leaves the route as it was.

use std::fmt;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Name of the routing key field on the wire.
pub const ROUTE_FIELD: &str = "Value";

/// Envelope decode failure.
#[derive(Debug, Error)]
#[error("invalid tunnel envelope: {0}")]
pub struct EnvelopeError(#[from] serde_json::Error);

/// Decoded tunnel envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Envelope {
    #[serde(rename = "Value")]
    route: String,
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(EnvelopeVisitor)
    }
}

struct EnvelopeVisitor;

impl<'de> Visitor<'de> for EnvelopeVisitor {
    type Value = Envelope;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object with a string `Value` field")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Envelope, A::Error> {
        let mut envelope = Envelope::default();
        while let Some(key) = map.next_key::<String>()? {
            if key.eq_ignore_ascii_case(ROUTE_FIELD) {
                if let Some(route) = map.next_value::<Option<String>>()? {
                    envelope.route = route;
                }
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(envelope)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Envelope, E> {
        Ok(Envelope::default())
    }
}

impl Envelope {
    pub fn new(route: impl Into<String>) -> Self {
        Self { route: route.into() }
    }

    /// Decode the routing key from a raw channel payload.
    ///
    /// A missing routing key decodes to an empty one; anything that is not a
    /// single JSON object with a string key is an error.
    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// The routing key. Empty when the envelope did not name one.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Build an outbound payload carrying `fields` plus the routing key.
    ///
    /// Used by clients; the server never re-envelopes responses.
    pub fn encode_with(&self, mut fields: Map<String, Value>) -> Vec<u8> {
        fields.insert(ROUTE_FIELD.to_string(), Value::String(self.route.clone()));
        Value::Object(fields).to_string().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_route() {
        let envelope = Envelope::decode(br#"{"Value":"/status"}"#).unwrap();
        assert_eq!(envelope.route(), "/status");
    }

    #[test]
    fn ignores_extra_fields() {
        let envelope = Envelope::decode(br#"{"Value":"/users","name":"ada","n":3}"#).unwrap();
        assert_eq!(envelope.route(), "/users");
    }

    #[test]
    fn accepts_lowercase_key() {
        let envelope = Envelope::decode(br#"{"value":"/echo"}"#).unwrap();
        assert_eq!(envelope.route(), "/echo");
    }

    #[test]
    fn key_name_ignores_case() {
        let envelope = Envelope::decode(br#"{"VALUE":"/status"}"#).unwrap();
        assert_eq!(envelope.route(), "/status");

        let envelope = Envelope::decode(br#"{"vAlUe":"/echo"}"#).unwrap();
        assert_eq!(envelope.route(), "/echo");
    }

    #[test]
    fn last_duplicate_key_wins() {
        let envelope = Envelope::decode(br#"{"Value":"/a","value":"/status"}"#).unwrap();
        assert_eq!(envelope.route(), "/status");

        let envelope = Envelope::decode(br#"{"value":"/status","Value":"/a"}"#).unwrap();
        assert_eq!(envelope.route(), "/a");
    }

    #[test]
    fn null_key_keeps_earlier_route() {
        let envelope = Envelope::decode(br#"{"Value":"/status","value":null}"#).unwrap();
        assert_eq!(envelope.route(), "/status");

        assert_eq!(Envelope::decode(b"null").unwrap(), Envelope::default());
    }

    #[test]
    fn missing_key_is_empty_route() {
        let envelope = Envelope::decode(br#"{"other":1}"#).unwrap();
        assert_eq!(envelope, Envelope::default());
        assert_eq!(envelope.route(), "");
    }

    #[test]
    fn malformed_payloads_fail() {
        for payload in [
            &b"not json"[..],
            br#"{"Value":"/status""#,
            br#"{"Value":42}"#,
            br#"{"value":"/a","VALUE":["/b"]}"#,
            br#"["/status"]"#,
            br#"{"Value":"/a"} trailing"#,
            b"",
        ] {
            assert!(Envelope::decode(payload).is_err(), "{payload:?} should not decode");
        }
    }

    #[test]
    fn encode_adds_route_to_fields() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("ada"));

        let payload = Envelope::new("/greet").encode_with(fields);
        let value: Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value, json!({"Value": "/greet", "name": "ada"}));
        assert_eq!(Envelope::decode(&payload).unwrap().route(), "/greet");
    }
}
