//! Request extractor for the push route.
//!
//! [`PushDelivery`] classifies an inbound push by the marker header configured
//! in [`PushState`] and decodes it:
//! - marker present: native broker push, JSON `{message:{messageId,data,attributes}}`
//! - marker absent: manual push, headers become extensions and the raw body
//!   is the payload
//!
//! ```ignore
//! async fn handler(
//!     State(state): State<PushState>,
//!     delivery: Result<PushDelivery, AppError>,
//! ) -> Result<StatusCode, AppError> {
//!     let envelope = delivery?.into_envelope(state.source("orders"));
//!     // ...
//! }
//! ```

use crate::error::AppError;
use crate::state::PushState;
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::HeaderMap,
};
use courier_core::envelope::Envelope;
use courier_core::push::PushBody;

/// One decoded push request.
#[derive(Debug, Clone)]
pub enum PushDelivery {
    /// Native broker push.
    Native(PushBody),
    /// Manual or test push.
    Manual {
        /// Request headers, folded into extensions
        headers: HeaderMap,
        /// Raw request body
        body: Bytes,
    },
}

impl PushDelivery {
    /// Whether the request carried the native push marker.
    #[must_use]
    pub const fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }

    /// Delivery attempt reported by the broker, if any.
    #[must_use]
    pub const fn delivery_attempt(&self) -> Option<u32> {
        match self {
            Self::Native(body) => body.delivery_attempt,
            Self::Manual { .. } => None,
        }
    }

    /// Normalize into an [`Envelope`].
    ///
    /// Header values are decoded as UTF-8; invalid sequences become U+FFFD.
    #[must_use]
    pub fn into_envelope(self, source: String) -> Envelope {
        match self {
            Self::Native(body) => Envelope::from_push(body, source),
            Self::Manual { headers, body } => {
                let decoded: Vec<(&str, String)> = headers
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.as_str(),
                            String::from_utf8_lossy(value.as_bytes()).into_owned(),
                        )
                    })
                    .collect();
                Envelope::from_manual(
                    decoded.iter().map(|(name, value)| (*name, value.as_str())),
                    body.to_vec(),
                    source,
                )
            }
        }
    }
}

#[async_trait]
impl FromRequest<PushState> for PushDelivery {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &PushState) -> Result<Self, Self::Rejection> {
        let native = req.headers().contains_key(state.marker_header());
        let headers = if native {
            HeaderMap::new()
        } else {
            req.headers().clone()
        };

        let body = Bytes::from_request(req, state).await.map_err(|rejection| {
            AppError::new(
                rejection.status(),
                rejection.body_text(),
                "BAD_REQUEST".to_string(),
            )
        })?;

        if native {
            PushBody::decode(&body)
                .map(Self::Native)
                .map_err(|e| AppError::bad_request(e.to_string()))
        } else {
            Ok(Self::Manual { headers, body })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use courier_runtime::SubscriptionRegistry;

    fn state() -> PushState {
        PushState::new(SubscriptionRegistry::new().freeze(), "x-push-channel-id", "redpanda")
            .unwrap()
    }

    #[tokio::test]
    async fn marker_selects_native_decoding() {
        let req = Request::builder()
            .header("x-push-channel-id", "ch-1")
            .header("eventType", "ignored")
            .body(Body::from(
                r#"{"message":{"messageId":"m-1","data":"e30=","attributes":{"eventType":"planCreated"}},"deliveryAttempt":3}"#,
            ))
            .unwrap();

        let delivery = PushDelivery::from_request(req, &state()).await.unwrap();
        assert!(delivery.is_native());
        assert_eq!(delivery.delivery_attempt(), Some(3));

        let envelope = delivery.into_envelope("redpanda/plans".to_string());
        assert_eq!(envelope.id, "m-1");
        assert_eq!(envelope.event_type, "planCreated");
        assert_eq!(envelope.data, b"{}");
        assert_eq!(envelope.extension("x-push-channel-id"), None);
    }

    #[tokio::test]
    async fn malformed_native_body_is_rejected() {
        let req = Request::builder()
            .header("x-push-channel-id", "ch-1")
            .body(Body::from("{not json"))
            .unwrap();

        let err = PushDelivery::from_request(req, &state()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn manual_push_folds_repeated_headers() {
        let req = Request::builder()
            .header("X-Tenant", "cl")
            .header("x-tenant", "pe")
            .header("eventType", "orderSubmitted")
            .body(Body::from("raw bytes"))
            .unwrap();

        let delivery = PushDelivery::from_request(req, &state()).await.unwrap();
        assert!(!delivery.is_native());
        assert_eq!(delivery.delivery_attempt(), None);

        let envelope = delivery.into_envelope("redpanda/orders".to_string());
        assert_eq!(envelope.id, "");
        assert_eq!(envelope.event_type, "orderSubmitted");
        assert_eq!(envelope.extension("x-tenant"), Some("cl,pe"));
        assert_eq!(envelope.data, b"raw bytes");
    }

    #[tokio::test]
    async fn manual_push_keeps_non_ascii_header_values() {
        let req = Request::builder()
            .header("x-city", HeaderValue::from_bytes("Valparaíso".as_bytes()).unwrap())
            .header("x-raw", HeaderValue::from_bytes(b"caf\xe9").unwrap())
            .header("eventType", "orderSubmitted")
            .body(Body::empty())
            .unwrap();

        let envelope = PushDelivery::from_request(req, &state())
            .await
            .unwrap()
            .into_envelope("redpanda/orders".to_string());

        assert_eq!(envelope.extension("x-city"), Some("Valparaíso"));
        assert_eq!(envelope.extension("x-raw"), Some("caf\u{fffd}"));
        assert_eq!(envelope.event_type, "orderSubmitted");
    }
}
