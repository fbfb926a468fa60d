//! Wire types for native broker push deliveries.
//!
//! A native push is a JSON body of the shape:
//!
//! ```json
//! {
//!   "message": {
//!     "messageId": "136969346945",
//!     "data": "eyJyZWZlcmVuY2VJRCI6IkExIn0=",
//!     "attributes": { "eventType": "orderSubmitted" }
//!   },
//!   "subscription": "orders",
//!   "deliveryAttempt": 1
//! }
//! ```
//!
//! `data` is base64 (standard alphabet). Missing `data` or `attributes` decode
//! as empty; anything else that does not parse is a decode error.

use crate::envelope::EnvelopeError;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A decoded native push body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushBody {
    /// The pushed message.
    pub message: PushMessage,
    /// Subscription name reported by the broker, if any.
    pub subscription: Option<String>,
    /// Delivery attempt reported by the broker, if any.
    pub delivery_attempt: Option<u32>,
}

/// The `message` object of a native push body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushMessage {
    /// Broker-assigned message id.
    pub message_id: String,
    /// Decoded payload bytes.
    pub data: Vec<u8>,
    /// Message attributes, keys as published.
    pub attributes: HashMap<String, String>,
    /// Publish timestamp as reported by the broker.
    pub publish_time: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBody {
    message: WireMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subscription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivery_attempt: Option<u32>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    attributes: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publish_time: Option<String>,
}

impl PushBody {
    /// Decode a native push request body.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::MalformedPush`] if the body is not JSON of the push shape
    /// - [`EnvelopeError::InvalidData`] if `message.data` is not valid base64
    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireBody =
            serde_json::from_slice(body).map_err(|e| EnvelopeError::MalformedPush(e.to_string()))?;

        let data = match wire.message.data.as_deref() {
            None | Some("") => Vec::new(),
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| EnvelopeError::InvalidData(e.to_string()))?,
        };

        Ok(Self {
            message: PushMessage {
                message_id: wire.message.message_id,
                data,
                attributes: wire.message.attributes.unwrap_or_default(),
                publish_time: wire.message.publish_time,
            },
            subscription: wire.subscription,
            delivery_attempt: wire.delivery_attempt,
        })
    }

    /// Encode this body in the native push wire format.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let wire = WireBody {
            message: WireMessage {
                message_id: self.message.message_id.clone(),
                data: Some(STANDARD.encode(&self.message.data)),
                attributes: Some(self.message.attributes.clone()),
                publish_time: self.message.publish_time.clone(),
            },
            subscription: self.subscription.clone(),
            delivery_attempt: self.delivery_attempt,
        };
        // A struct of strings and maps always serializes.
        serde_json::to_vec(&wire).unwrap_or_default()
    }
}
