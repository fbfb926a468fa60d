//! The normalized event representation.
//!
//! An [`Envelope`] looks the same whether it arrived over the pull stream, a
//! native broker push, or a manual/test push. Processors only ever see
//! envelopes, so business logic never needs to know which transport was used.
//!
//! # Construction
//!
//! | Input | Identity | Extensions | Payload |
//! |---|---|---|---|
//! | Pull message | broker message id | attributes, keys lowercased | message body |
//! | Native push | `message.messageId` | `message.attributes`, keys lowercased | decoded `message.data` |
//! | Manual push | empty (or `ce-id`) | every header, lowercased, values comma-joined | raw body |
//!
//! Construction never fails; only decoding a native push body can
//! (see [`PushBody::decode`](crate::push::PushBody::decode)).

use crate::message::BrokerMessage;
use crate::push::PushBody;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use thiserror::Error;

/// Attribute carrying the declared event type.
pub const EVENT_TYPE_KEY: &str = "eventtype";

/// CloudEvents binary-mode identity header.
const CE_ID: &str = "ce-id";
/// CloudEvents binary-mode type header.
const CE_TYPE: &str = "ce-type";

/// Errors raised while decoding transport input or envelope payloads.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The push body was not valid JSON of the expected shape.
    #[error("Malformed push body: {0}")]
    MalformedPush(String),

    /// The push message data was not valid base64.
    #[error("Invalid push message data: {0}")]
    InvalidData(String),

    /// The payload could not be decoded into the requested type.
    #[error("Failed to decode payload: {0}")]
    Payload(String),
}

/// One event, normalized from whichever transport delivered it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Message identity. Empty for manually constructed pushes.
    pub id: String,
    /// Declared event type (the `eventType` attribute), empty if absent.
    pub event_type: String,
    /// Where the envelope came from, `"<broker>/<subscription>"`.
    pub source: String,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
    /// Transport attributes or headers, keys lowercased.
    pub extensions: HashMap<String, String>,
}

impl Envelope {
    /// Normalize a pull-mode broker message.
    #[must_use]
    pub fn from_message(message: &BrokerMessage, source: impl Into<String>) -> Self {
        Self::from_parts(
            message.id.clone(),
            &message.attributes,
            message.data.clone(),
            source.into(),
        )
    }

    /// Normalize a decoded native push body.
    ///
    /// The result is identical in shape to [`Envelope::from_message`] for a
    /// message with the same id, data and attributes.
    #[must_use]
    pub fn from_push(body: PushBody, source: impl Into<String>) -> Self {
        let message = body.message;
        Self::from_parts(message.message_id, &message.attributes, message.data, source.into())
    }

    /// Normalize a manual/test push.
    ///
    /// Every header becomes an extension; repeated headers are joined with `,`
    /// in the order given.
    #[must_use]
    pub fn from_manual<'a, I>(headers: I, body: Vec<u8>, source: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut extensions: HashMap<String, String> = HashMap::new();
        for (name, value) in headers {
            extensions
                .entry(name.to_ascii_lowercase())
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let id = extensions.get(CE_ID).cloned().unwrap_or_default();
        let event_type = extensions
            .get(EVENT_TYPE_KEY)
            .or_else(|| extensions.get(CE_TYPE))
            .cloned()
            .unwrap_or_default();

        Self {
            id,
            event_type,
            source: source.into(),
            data: body,
            extensions,
        }
    }

    fn from_parts(
        id: String,
        attributes: &HashMap<String, String>,
        data: Vec<u8>,
        source: String,
    ) -> Self {
        let extensions: HashMap<String, String> = attributes
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        let event_type = extensions.get(EVENT_TYPE_KEY).cloned().unwrap_or_default();

        Self {
            id,
            event_type,
            source,
            data,
            extensions,
        }
    }

    /// Look up an extension, ignoring the case of `key`.
    #[must_use]
    pub fn extension(&self, key: &str) -> Option<&str> {
        self.extensions
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Payload`] if the payload is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        serde_json::from_slice(&self.data).map_err(|e| EnvelopeError::Payload(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::push::PushMessage;
    use serde::Deserialize;

    fn attributes() -> HashMap<String, String> {
        HashMap::from([
            ("eventType".to_string(), "orderSubmitted".to_string()),
            ("referenceID".to_string(), "A1".to_string()),
        ])
    }

    #[test]
    fn pull_message_keys_are_lowercased() {
        let message = BrokerMessage::new("m-1", attributes(), b"{}".to_vec());
        let envelope = Envelope::from_message(&message, "redpanda/orders");

        assert_eq!(envelope.id, "m-1");
        assert_eq!(envelope.source, "redpanda/orders");
        assert_eq!(envelope.event_type, "orderSubmitted");
        assert_eq!(envelope.extensions.get("eventtype").unwrap(), "orderSubmitted");
        assert_eq!(envelope.extensions.get("referenceid").unwrap(), "A1");
        assert!(!envelope.extensions.contains_key("eventType"));
    }

    #[test]
    fn extension_lookup_ignores_case() {
        let message = BrokerMessage::new("m-1", attributes(), Vec::new());
        let envelope = Envelope::from_message(&message, "memory/orders");

        assert_eq!(envelope.extension("eventType"), Some("orderSubmitted"));
        assert_eq!(envelope.extension("EVENTTYPE"), Some("orderSubmitted"));
        assert_eq!(envelope.extension("missing"), None);
    }

    #[test]
    fn missing_event_type_is_empty() {
        let message = BrokerMessage::new("m-2", HashMap::new(), Vec::new());
        let envelope = Envelope::from_message(&message, "memory/orders");
        assert_eq!(envelope.event_type, "");
        assert!(envelope.extensions.is_empty());
    }

    #[test]
    fn push_and_pull_produce_the_same_envelope() {
        let data = br#"{"referenceID":"A1"}"#.to_vec();
        let pulled = Envelope::from_message(
            &BrokerMessage::new("m-3", attributes(), data.clone()),
            "memory/orders",
        );
        let pushed = Envelope::from_push(
            PushBody {
                message: PushMessage {
                    message_id: "m-3".to_string(),
                    data,
                    attributes: attributes(),
                    publish_time: None,
                },
                subscription: None,
                delivery_attempt: None,
            },
            "memory/orders",
        );

        assert_eq!(pulled, pushed);
    }

    #[test]
    fn manual_push_folds_headers() {
        let headers = vec![
            ("Content-Type", "application/json"),
            ("X-Tag", "a"),
            ("x-tag", "b"),
            ("eventType", "orderSubmitted"),
        ];
        let envelope = Envelope::from_manual(headers, b"raw".to_vec(), "http/orders");

        assert_eq!(envelope.id, "");
        assert_eq!(envelope.data, b"raw");
        assert_eq!(envelope.event_type, "orderSubmitted");
        assert_eq!(envelope.extension("x-tag"), Some("a,b"));
        assert_eq!(envelope.extension("content-type"), Some("application/json"));
    }

    #[test]
    fn manual_push_reads_cloudevents_headers() {
        let headers = vec![
            ("ce-id", "evt-9"),
            ("ce-type", "planCreated"),
            ("ce-source", "planner"),
        ];
        let envelope = Envelope::from_manual(headers, Vec::new(), "http/plans");

        assert_eq!(envelope.id, "evt-9");
        assert_eq!(envelope.event_type, "planCreated");
    }

    #[test]
    fn json_payload_decodes() {
        #[derive(Deserialize)]
        struct Submitted {
            #[serde(rename = "referenceID")]
            reference_id: String,
        }

        let message = BrokerMessage::new("m-4", HashMap::new(), br#"{"referenceID":"A1"}"#.to_vec());
        let envelope = Envelope::from_message(&message, "memory/orders");
        let payload: Submitted = envelope.json().unwrap();
        assert_eq!(payload.reference_id, "A1");

        let bad = Envelope {
            data: b"not json".to_vec(),
            ..Envelope::default()
        };
        assert!(matches!(bad.json::<Submitted>(), Err(EnvelopeError::Payload(_))));
    }
}
