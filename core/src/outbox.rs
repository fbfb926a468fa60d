//! Outbox records: the application-level unit published to the broker.
//!
//! An HTTP handler assembles an [`OutboxRecord`] (payload plus a fixed
//! attribute set) at request time and hands it to the outbox publisher, which
//! performs one confirmed publish. Subscribers route and filter on the
//! attribute keys in [`keys`], so they are emitted verbatim.
//!
//! Records are not staged locally: if the confirmed publish fails the caller
//! sees the error and the event is lost unless the caller retries.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute keys carried by every outbox publish.
pub mod keys {
    /// Kind of entity the event is about (`order`, `vehicle`, `plan`, ...).
    pub const ENTITY_TYPE: &str = "entityType";
    /// Declared event type, used by the event-type filter.
    pub const EVENT_TYPE: &str = "eventType";
    /// Tenant country.
    pub const COUNTRY: &str = "country";
    /// Tenant organization.
    pub const ORGANIZATION: &str = "organization";
    /// Organization scoped to a country.
    pub const ORGANIZATION_COUNTRY_ID: &str = "organizationCountryID";
    /// Business channel.
    pub const COMMERCE: &str = "commerce";
    /// Downstream consumer the event is meant for.
    pub const CONSUMER: &str = "consumer";
    /// Business reference id.
    pub const REFERENCE_ID: &str = "referenceID";
    /// Creation timestamp.
    pub const CREATED_AT: &str = "createdAt";
    /// Last update timestamp.
    pub const UPDATED_AT: &str = "updatedAt";
}

/// The fixed attribute set of an outbox record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxAttributes {
    /// `entityType`
    #[serde(default)]
    pub entity_type: String,
    /// `eventType`
    #[serde(default)]
    pub event_type: String,
    /// `country`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// `organization`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// `organizationCountryID`
    #[serde(
        default,
        rename = "organizationCountryID",
        skip_serializing_if = "Option::is_none"
    )]
    pub organization_country_id: Option<String>,
    /// `commerce`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commerce: Option<String>,
    /// `consumer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    /// `referenceID`
    #[serde(default, rename = "referenceID", skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// `createdAt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// `updatedAt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl OutboxAttributes {
    /// Attributes for an entity/event type pair.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    /// Set `country`.
    #[must_use]
    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Set `organization`.
    #[must_use]
    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Set `organizationCountryID`.
    #[must_use]
    pub fn organization_country_id(mut self, id: impl Into<String>) -> Self {
        self.organization_country_id = Some(id.into());
        self
    }

    /// Set `commerce`.
    #[must_use]
    pub fn commerce(mut self, commerce: impl Into<String>) -> Self {
        self.commerce = Some(commerce.into());
        self
    }

    /// Set `consumer`.
    #[must_use]
    pub fn consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = Some(consumer.into());
        self
    }

    /// Set `referenceID`.
    #[must_use]
    pub fn reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Set `createdAt`.
    #[must_use]
    pub fn created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = Some(created_at.into());
        self
    }

    /// Set `updatedAt`.
    #[must_use]
    pub fn updated_at(mut self, updated_at: impl Into<String>) -> Self {
        self.updated_at = Some(updated_at.into());
        self
    }

    /// Flatten into the broker attribute map, using the wire key names.
    ///
    /// `entityType` and `eventType` are always present; unset optional
    /// attributes are omitted.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attributes = HashMap::from([
            (keys::ENTITY_TYPE.to_string(), self.entity_type.clone()),
            (keys::EVENT_TYPE.to_string(), self.event_type.clone()),
        ]);

        let optional = [
            (keys::COUNTRY, &self.country),
            (keys::ORGANIZATION, &self.organization),
            (keys::ORGANIZATION_COUNTRY_ID, &self.organization_country_id),
            (keys::COMMERCE, &self.commerce),
            (keys::CONSUMER, &self.consumer),
            (keys::REFERENCE_ID, &self.reference_id),
            (keys::CREATED_AT, &self.created_at),
            (keys::UPDATED_AT, &self.updated_at),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                attributes.insert(key.to_string(), value.clone());
            }
        }

        attributes
    }
}

/// Lifecycle of an outbox record. Only `Pending` is ever assigned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    /// Created, not yet confirmed by the broker.
    #[default]
    Pending,
}

/// A payload plus its attribute set, ready to publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxRecord {
    /// Opaque payload bytes, typically a JSON business event.
    pub payload: Vec<u8>,
    /// Routing attributes.
    pub attributes: OutboxAttributes,
    /// Always [`OutboxStatus::Pending`] at creation.
    pub status: OutboxStatus,
}

impl OutboxRecord {
    /// Create a pending record from raw payload bytes.
    #[must_use]
    pub fn new(payload: Vec<u8>, attributes: OutboxAttributes) -> Self {
        Self {
            payload,
            attributes,
            status: OutboxStatus::Pending,
        }
    }

    /// Create a pending record with a JSON payload.
    ///
    /// `createdAt` and `updatedAt` default to the current time (RFC 3339)
    /// when the caller left them unset.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` cannot be serialized to JSON.
    pub fn json<T: Serialize>(
        payload: &T,
        mut attributes: OutboxAttributes,
    ) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(payload)?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if attributes.created_at.is_none() {
            attributes.created_at = Some(now.clone());
        }
        if attributes.updated_at.is_none() {
            attributes.updated_at = Some(now);
        }
        Ok(Self::new(bytes, attributes))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn attributes_use_wire_keys() {
        let attributes = OutboxAttributes::new("order", "orderSubmitted")
            .country("CL")
            .organization("acme")
            .organization_country_id("acme-CL")
            .commerce("retail")
            .consumer("planner")
            .reference_id("A1")
            .created_at("2025-01-01T00:00:00Z")
            .updated_at("2025-01-01T00:00:01Z")
            .to_attributes();

        assert_eq!(attributes.len(), 10);
        assert_eq!(attributes[keys::ENTITY_TYPE], "order");
        assert_eq!(attributes[keys::EVENT_TYPE], "orderSubmitted");
        assert_eq!(attributes["organizationCountryID"], "acme-CL");
        assert_eq!(attributes["referenceID"], "A1");
        assert_eq!(attributes["updatedAt"], "2025-01-01T00:00:01Z");
    }

    #[test]
    fn unset_attributes_are_omitted() {
        let attributes = OutboxAttributes::new("vehicle", "vehicleUpdated").to_attributes();
        assert_eq!(attributes.len(), 2);
        assert!(!attributes.contains_key(keys::COUNTRY));
    }

    #[test]
    fn attributes_deserialize_from_camel_case() {
        let attributes: OutboxAttributes = serde_json::from_str(
            r#"{"entityType":"order","eventType":"orderSubmitted","organizationCountryID":"x","referenceID":"A1"}"#,
        )
        .unwrap();
        assert_eq!(attributes.organization_country_id.as_deref(), Some("x"));
        assert_eq!(attributes.reference_id.as_deref(), Some("A1"));
    }

    #[test]
    fn json_record_is_pending_and_timestamped() {
        let record = OutboxRecord::json(
            &serde_json::json!({"referenceID": "A1"}),
            OutboxAttributes::new("order", "orderSubmitted"),
        )
        .unwrap();

        assert_eq!(record.status, OutboxStatus::Pending);
        assert!(record.attributes.created_at.is_some());
        assert!(record.attributes.updated_at.is_some());
        assert_eq!(record.payload, br#"{"referenceID":"A1"}"#);
    }

    #[test]
    fn json_record_keeps_caller_timestamps() {
        let record = OutboxRecord::json(
            &1,
            OutboxAttributes::new("order", "orderSubmitted").created_at("then"),
        )
        .unwrap();
        assert_eq!(record.attributes.created_at.as_deref(), Some("then"));
    }
}
