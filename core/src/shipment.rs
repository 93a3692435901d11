//! Transport payloads: shipments and financial transactions.
//!
//! Both travel as JSON with `snake_case` field names. Every field is optional
//! on the wire so that a missing required field surfaces as a validation
//! failure rather than a deserialization failure, and unknown fields are
//! ignored.

use crate::status::ShipmentStatus;
use crate::validation::{Constraint, FieldValue, Schema, Validated};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// A shipment as published to and consumed from the broker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Shipment {
    /// Natural identifier, assigned before the first publish.
    pub id: Option<String>,
    /// Lifecycle status.
    pub status: Option<ShipmentStatus>,
    /// Product being shipped.
    pub product_id: Option<String>,
    /// Total units.
    pub quantity: Option<i64>,
    /// Origin warehouse or address.
    pub origin: Option<String>,
    /// Destination warehouse or address.
    pub destination: Option<String>,
    /// Individual lines of the shipment.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<ShipmentLine>,
    /// Free-form attributes. Null values are allowed.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Option<String>>,
    /// Last modification time as reported by the producer.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Shipment {
    /// A shipment with only its id and status set.
    #[must_use]
    pub fn new(id: impl Into<String>, status: ShipmentStatus) -> Self {
        Self {
            id: Some(id.into()),
            status: Some(status),
            ..Self::default()
        }
    }

    /// Overlay the present fields of `incoming` on `self`.
    ///
    /// Scalars present in `incoming` replace the current value; absent ones
    /// keep it. Non-empty `lines` replace the current lines; `attributes` are
    /// merged key by key.
    pub fn apply(&mut self, incoming: Self) {
        let Self {
            id,
            status,
            product_id,
            quantity,
            origin,
            destination,
            lines,
            attributes,
            updated_at,
        } = incoming;

        self.id = id.or_else(|| self.id.take());
        self.status = status.or(self.status);
        self.product_id = product_id.or_else(|| self.product_id.take());
        self.quantity = quantity.or(self.quantity);
        self.origin = origin.or_else(|| self.origin.take());
        self.destination = destination.or_else(|| self.destination.take());
        if !lines.is_empty() {
            self.lines = lines;
        }
        self.attributes.extend(attributes);
        self.updated_at = updated_at.or(self.updated_at);
    }
}

impl fmt::Display for Shipment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Shipment {{ id: {}, status: {} }}",
            self.id.as_deref().unwrap_or("<none>"),
            self.status.map_or("<none>", ShipmentStatus::as_str)
        )
    }
}

/// One line of a shipment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipmentLine {
    /// Stock keeping unit.
    pub sku: Option<String>,
    /// Units of this SKU.
    pub quantity: Option<i64>,
}

impl ShipmentLine {
    /// Create a line.
    #[must_use]
    pub fn new(sku: impl Into<String>, quantity: i64) -> Self {
        Self {
            sku: Some(sku.into()),
            quantity: Some(quantity),
        }
    }
}

/// Direction of money movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionFlow {
    /// Money received.
    Inbound,
    /// Money paid out.
    Outbound,
}

impl TransactionFlow {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "INBOUND",
            Self::Outbound => "OUTBOUND",
        }
    }
}

/// An append-only financial transaction record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transaction {
    /// Identifier, if the caller has one. Not used for keying.
    pub id: Option<String>,
    /// What the money is for.
    pub purpose: Option<String>,
    /// Direction.
    pub flow: Option<TransactionFlow>,
    /// Amount in minor currency units.
    pub amount: Option<i64>,
    /// ISO 4217 currency code.
    pub currency: Option<String>,
    /// Receiving party.
    pub beneficiary: Option<String>,
    /// Payment provider that executed the transaction.
    pub provider: Option<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

static SHIPMENT_SCHEMA: LazyLock<Schema<Shipment>> = LazyLock::new(|| {
    Schema::<Shipment>::builder("shipment")
        .field(
            "id",
            |s| FieldValue::from(s.id.as_deref()),
            &[Constraint::NotBlank, Constraint::MaxLength(64)],
        )
        .field(
            "status",
            |s| FieldValue::from(s.status.map(ShipmentStatus::as_str)),
            &[],
        )
        .field(
            "product_id",
            |s| FieldValue::from(s.product_id.as_deref()),
            &[Constraint::NotBlank],
        )
        .field("quantity", |s| FieldValue::from(s.quantity), &[Constraint::Positive])
        .field(
            "origin",
            |s| FieldValue::from(s.origin.as_deref()),
            &[Constraint::NotBlank],
        )
        .field(
            "destination",
            |s| FieldValue::from(s.destination.as_deref()),
            &[Constraint::NotBlank],
        )
        .collection("lines", |s| FieldValue::objects(&s.lines), &[], &[])
        .collection(
            "attributes",
            |s| FieldValue::text_map(&s.attributes),
            &[],
            &[Constraint::NotBlank, Constraint::MaxLength(256)],
        )
        .build()
});

static SHIPMENT_LINE_SCHEMA: LazyLock<Schema<ShipmentLine>> = LazyLock::new(|| {
    Schema::<ShipmentLine>::builder("shipment_line")
        .field(
            "sku",
            |l| FieldValue::from(l.sku.as_deref()),
            &[Constraint::Required, Constraint::NotBlank],
        )
        .field(
            "quantity",
            |l| FieldValue::from(l.quantity),
            &[Constraint::Required, Constraint::Positive],
        )
        .build()
});

static TRANSACTION_SCHEMA: LazyLock<Schema<Transaction>> = LazyLock::new(|| {
    Schema::<Transaction>::builder("transaction")
        .field(
            "id",
            |t| FieldValue::from(t.id.as_deref()),
            &[Constraint::NotBlank],
        )
        .field(
            "purpose",
            |t| FieldValue::from(t.purpose.as_deref()),
            &[Constraint::NotBlank, Constraint::MaxLength(255)],
        )
        .field(
            "flow",
            |t| FieldValue::from(t.flow.map(TransactionFlow::as_str)),
            &[],
        )
        .field("amount", |t| FieldValue::from(t.amount), &[Constraint::Positive])
        .field(
            "currency",
            |t| FieldValue::from(t.currency.as_deref()),
            &[Constraint::Length { min: 3, max: 3 }, Constraint::Uppercase],
        )
        .field(
            "beneficiary",
            |t| FieldValue::from(t.beneficiary.as_deref()),
            &[Constraint::NotBlank],
        )
        .field(
            "provider",
            |t| FieldValue::from(t.provider.as_deref()),
            &[Constraint::NotBlank],
        )
        .build()
});

impl Validated for Shipment {
    fn schema() -> &'static Schema<Self> {
        &SHIPMENT_SCHEMA
    }
}

impl Validated for ShipmentLine {
    fn schema() -> &'static Schema<Self> {
        &SHIPMENT_LINE_SCHEMA
    }
}

impl Validated for Transaction {
    fn schema() -> &'static Schema<Self> {
        &TRANSACTION_SCHEMA
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{FieldCheckError, FieldValidator, ValidationError};

    #[test]
    fn unknown_fields_are_ignored_on_deserialize() {
        let json = r#"{"id":"S-1","status":"SENT","carrier":"ACME","extra":{"a":1}}"#;
        let shipment: Result<Shipment, _> = serde_json::from_str(json);
        assert!(matches!(shipment, Ok(ref s) if s.id.as_deref() == Some("S-1")
            && s.status == Some(ShipmentStatus::Sent)));
    }

    #[test]
    fn missing_fields_deserialize_as_absent() {
        let shipment: Result<Shipment, _> = serde_json::from_str("{}");
        assert!(matches!(shipment, Ok(ref s) if *s == Shipment::default()));
    }

    #[test]
    fn invalid_line_is_folded_into_lines_message() {
        let shipment = Shipment {
            lines: vec![ShipmentLine::new("SKU-1", 2), ShipmentLine::new("SKU-2", -1)],
            ..Shipment::new("S-1", ShipmentStatus::Planned)
        };
        assert_eq!(
            FieldValidator::validate_required(&shipment, "lines", false),
            Err(FieldCheckError::Invalid(ValidationError::new(
                "lines",
                "[1] quantity must be greater than 0"
            )))
        );
    }

    #[test]
    fn line_without_sku_is_reported_as_required() {
        let shipment = Shipment {
            lines: vec![ShipmentLine {
                sku: None,
                quantity: Some(1),
            }],
            ..Shipment::new("S-1", ShipmentStatus::Planned)
        };
        let err = FieldValidator::validate_declared(&shipment);
        assert_eq!(
            err,
            Err(FieldCheckError::Invalid(ValidationError::new("lines", "[0] sku is required")))
        );
    }

    #[test]
    fn transaction_required_fields() {
        let tx = Transaction {
            purpose: Some("freight".to_string()),
            flow: Some(TransactionFlow::Outbound),
            amount: Some(12_500),
            currency: Some("eur".to_string()),
            beneficiary: Some("Carrier Ltd".to_string()),
            provider: None,
            ..Transaction::default()
        };
        let err = FieldValidator::validate_required_many(
            &tx,
            true,
            &["purpose", "flow", "amount", "currency", "beneficiary", "provider"],
        );
        assert_eq!(
            err,
            Err(FieldCheckError::Invalid(ValidationError::new("currency", "must be uppercase")))
        );
    }

    #[test]
    fn apply_overlays_present_fields() {
        let mut current = Shipment {
            origin: Some("WH-1".to_string()),
            quantity: Some(10),
            ..Shipment::new("S-1", ShipmentStatus::Planned)
        };
        current.attributes.insert("dock".to_string(), Some("4".to_string()));

        let mut incoming = Shipment {
            destination: Some("Store 9".to_string()),
            ..Shipment::new("S-1", ShipmentStatus::Sent)
        };
        incoming.attributes.insert("seal".to_string(), Some("X1".to_string()));

        current.apply(incoming);

        assert_eq!(current.status, Some(ShipmentStatus::Sent));
        assert_eq!(current.origin.as_deref(), Some("WH-1"));
        assert_eq!(current.destination.as_deref(), Some("Store 9"));
        assert_eq!(current.quantity, Some(10));
        assert_eq!(current.attributes.len(), 2);
    }

    #[test]
    fn display_shows_id_and_status() {
        let shown = Shipment::new("S-9", ShipmentStatus::Delivered).to_string();
        assert_eq!(shown, "Shipment { id: S-9, status: DELIVERED }");
        assert_eq!(
            Shipment::default().to_string(),
            "Shipment { id: <none>, status: <none> }"
        );
    }
}
