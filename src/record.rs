// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transaction records and replication events.
//!
//! A [`TransactionRecord`] is what a point-of-sale appends to its store's log.
//! It has two encodings:
//!
//! - **Log entry**: flat string fields on a stream entry
//!   (`transaction_id`, `store_id`, `type`, `amount`, ...)
//! - **Key/value document**: JSON under `transaction:{id}` using the
//!   POS document shape (`transaction_type` instead of `type`)
//!
//! Both decode into the same tagged type. Required fields are checked at
//! parse time; a RETURN without an original id still parses (the correlation
//! engine scores it, it is not a parse failure).

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Transaction type, carrying the link that only RETURNs have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    /// A sale.
    Purchase,
    /// A refund against an earlier purchase.
    ///
    /// `None` means the POS sent no original id at all.
    Return {
        original_transaction_id: Option<String>,
    },
}

impl TransactionKind {
    /// Wire name (`PURCHASE` / `RETURN`).
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "PURCHASE",
            TransactionKind::Return { .. } => "RETURN",
        }
    }
}

/// One transaction as appended to a store's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RecordDocument", try_from = "RecordDocument")]
pub struct TransactionRecord {
    pub id: String,
    pub store_id: String,
    pub customer_id: String,
    pub kind: TransactionKind,
    /// Signed amount. Negative for returns.
    pub amount: f64,
    pub has_photo: bool,
    /// Unix seconds.
    pub timestamp: i64,
    pub product_sku: Option<String>,
    /// Store-side annotation (e.g. "returned"). Never used for scoring.
    pub status: Option<String>,
}

impl TransactionRecord {
    /// Build a purchase record.
    pub fn purchase(
        id: impl Into<String>,
        store_id: impl Into<String>,
        customer_id: impl Into<String>,
        amount: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            store_id: store_id.into(),
            customer_id: customer_id.into(),
            kind: TransactionKind::Purchase,
            amount: amount.abs(),
            has_photo: true,
            timestamp,
            product_sku: None,
            status: None,
        }
    }

    /// Build a return record against `original_transaction_id`.
    ///
    /// The amount is stored negative regardless of the sign passed in.
    pub fn refund(
        id: impl Into<String>,
        store_id: impl Into<String>,
        customer_id: impl Into<String>,
        original_transaction_id: Option<String>,
        amount: f64,
        has_photo: bool,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            store_id: store_id.into(),
            customer_id: customer_id.into(),
            kind: TransactionKind::Return {
                original_transaction_id,
            },
            amount: -amount.abs(),
            has_photo,
            timestamp,
            product_sku: None,
            status: None,
        }
    }

    /// Attach a product SKU.
    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.product_sku = Some(sku.into());
        self
    }

    pub fn is_return(&self) -> bool {
        matches!(self.kind, TransactionKind::Return { .. })
    }

    pub fn is_purchase(&self) -> bool {
        matches!(self.kind, TransactionKind::Purchase)
    }

    /// Original transaction id for returns, if one was supplied.
    pub fn original_transaction_id(&self) -> Option<&str> {
        match &self.kind {
            TransactionKind::Return {
                original_transaction_id,
            } => original_transaction_id.as_deref(),
            TransactionKind::Purchase => None,
        }
    }

    /// Encode as log entry fields, in a stable order.
    pub fn to_stream_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("transaction_id", self.id.clone()),
            ("store_id", self.store_id.clone()),
            ("customer_id", self.customer_id.clone()),
            ("type", self.kind.as_str().to_string()),
            ("amount", format_amount(self.amount)),
            (
                "original_transaction_id",
                self.original_transaction_id().unwrap_or_default().to_string(),
            ),
            ("has_photo", self.has_photo.to_string()),
            ("timestamp", self.timestamp.to_string()),
        ];
        if let Some(sku) = &self.product_sku {
            fields.push(("product_sku", sku.clone()));
        }
        fields
    }

    /// Size of the log entry payload (sum of field name and value lengths).
    pub fn stream_payload_size(&self) -> usize {
        self.to_stream_fields()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    /// Decode from log entry fields.
    pub fn from_stream_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let id = required(fields, "transaction_id")?;
        let store_id = required(fields, "store_id")?;
        let kind_str = required(fields, "type")?;
        let original = optional(fields, "original_transaction_id");
        let kind = parse_kind(&kind_str, original)?;

        let amount = match fields.get("amount") {
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| {
                ReplicationError::StreamParse(format!("Invalid amount for {}: {:?}", id, raw))
            })?,
            None => 0.0,
        };
        if !amount.is_finite() {
            return Err(ReplicationError::StreamParse(format!(
                "Non-finite amount for {}",
                id
            )));
        }

        let timestamp = match fields.get("timestamp") {
            Some(raw) => parse_timestamp(raw).ok_or_else(|| {
                ReplicationError::StreamParse(format!("Invalid timestamp for {}: {:?}", id, raw))
            })?,
            None => {
                return Err(ReplicationError::StreamParse(format!(
                    "Missing field: timestamp ({})",
                    id
                )))
            }
        };

        Ok(Self {
            id,
            store_id,
            customer_id: fields.get("customer_id").cloned().unwrap_or_default(),
            kind,
            amount,
            has_photo: fields.get("has_photo").map(|v| parse_bool(v)).unwrap_or(false),
            timestamp,
            product_sku: optional(fields, "product_sku"),
            status: optional(fields, "status"),
        })
    }

    /// Encode as the key/value JSON document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a key/value JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Flat document shape stored under `transaction:{id}`.
///
/// Unknown fields written by the POS (product details, payment method, ...)
/// are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordDocument {
    transaction_id: String,
    store_id: String,
    #[serde(default)]
    customer_id: String,
    transaction_type: String,
    #[serde(default)]
    amount: f64,
    #[serde(default)]
    original_transaction_id: Option<String>,
    #[serde(default)]
    has_photo: bool,
    timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    product_sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

impl From<TransactionRecord> for RecordDocument {
    fn from(record: TransactionRecord) -> Self {
        let transaction_type = record.kind.as_str().to_string();
        let original_transaction_id = match record.kind {
            TransactionKind::Return {
                original_transaction_id,
            } => original_transaction_id,
            TransactionKind::Purchase => None,
        };
        Self {
            transaction_id: record.id,
            store_id: record.store_id,
            customer_id: record.customer_id,
            transaction_type,
            amount: record.amount,
            original_transaction_id,
            has_photo: record.has_photo,
            timestamp: record.timestamp,
            product_sku: record.product_sku,
            status: record.status,
        }
    }
}

impl TryFrom<RecordDocument> for TransactionRecord {
    type Error = ReplicationError;

    fn try_from(doc: RecordDocument) -> Result<Self> {
        let original = doc.original_transaction_id.filter(|s| !is_null_marker(s));
        let kind = parse_kind(&doc.transaction_type, original)?;
        Ok(Self {
            id: doc.transaction_id,
            store_id: doc.store_id,
            customer_id: doc.customer_id,
            kind,
            amount: doc.amount,
            has_photo: doc.has_photo,
            timestamp: doc.timestamp,
            product_sku: doc.product_sku,
            status: doc.status,
        })
    }
}

fn parse_kind(raw: &str, original: Option<String>) -> Result<TransactionKind> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "PURCHASE" => Ok(TransactionKind::Purchase),
        "RETURN" => Ok(TransactionKind::Return {
            original_transaction_id: original,
        }),
        other => Err(ReplicationError::StreamParse(format!(
            "Unknown transaction type: {}",
            other
        ))),
    }
}

fn required(fields: &HashMap<String, String>, name: &str) -> Result<String> {
    match fields.get(name) {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(ReplicationError::StreamParse(format!("Missing field: {}", name))),
    }
}

fn optional(fields: &HashMap<String, String>, name: &str) -> Option<String> {
    fields
        .get(name)
        .filter(|v| !is_null_marker(v))
        .cloned()
}

/// POS clients write missing links as empty, "None" or "null".
fn is_null_marker(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("none") || v.eq_ignore_ascii_case("null")
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Accepts integer or fractional unix seconds.
fn parse_timestamp(value: &str) -> Option<i64> {
    let v = value.trim();
    if let Ok(ts) = v.parse::<i64>() {
        return Some(ts);
    }
    v.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
        .map(|f| f.trunc() as i64)
}

fn format_amount(amount: f64) -> String {
    format!("{:.2}", amount)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationEvent
// ═══════════════════════════════════════════════════════════════════════════════

/// Unit of data replicated per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitKind {
    /// Log entry appended to the target log.
    Stream,
    /// Key/value record document.
    Record,
    /// Opaque photo blob.
    Photo,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Stream => "STREAM",
            UnitKind::Record => "RECORD",
            UnitKind::Photo => "PHOTO",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replicated unit. Created once, consumed by metrics and subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub source_store: String,
    pub target_store: String,
    pub record_id: String,
    pub kind: UnitKind,
    pub payload_size_bytes: usize,
    pub latency_ms: f64,
    /// Unix seconds when the unit was written.
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_refund_amount_is_negative() {
        let r = TransactionRecord::refund("R1", "STORE_A", "C1", Some("T1".into()), 99.99, true, 1000);
        assert!(r.amount < 0.0);
        assert_eq!(r.original_transaction_id(), Some("T1"));
        assert!(r.is_return());
    }

    #[test]
    fn test_purchase_has_no_original() {
        let p = TransactionRecord::purchase("T1", "STORE_A", "C1", -10.0, 1000);
        assert_eq!(p.amount, 10.0);
        assert!(p.original_transaction_id().is_none());
        assert!(p.is_purchase());
    }

    #[test]
    fn test_stream_fields_parse_return() {
        let f = fields(&[
            ("transaction_id", "R2"),
            ("store_id", "STORE_B"),
            ("customer_id", "FRAUDSTER"),
            ("type", "RETURN"),
            ("amount", "-100.00"),
            ("original_transaction_id", "T1"),
            ("has_photo", "false"),
            ("timestamp", "1030"),
        ]);
        let r = TransactionRecord::from_stream_fields(&f).unwrap();
        assert_eq!(r.id, "R2");
        assert_eq!(r.original_transaction_id(), Some("T1"));
        assert!(!r.has_photo);
        assert_eq!(r.timestamp, 1030);
        assert_eq!(r.amount, -100.0);
    }

    #[test]
    fn test_stream_fields_encode_matches_decode() {
        let r = TransactionRecord::refund("R1", "STORE_A", "C1", Some("T1".into()), 25.5, true, 1000)
            .with_sku("SKU-9");
        let encoded: HashMap<String, String> = r
            .to_stream_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(encoded.get("has_photo").map(String::as_str), Some("true"));
        assert_eq!(TransactionRecord::from_stream_fields(&encoded).unwrap(), r);
    }

    #[test]
    fn test_return_with_empty_original_still_parses() {
        for marker in ["", "None", "null"] {
            let f = fields(&[
                ("transaction_id", "R9"),
                ("store_id", "STORE_B"),
                ("type", "RETURN"),
                ("original_transaction_id", marker),
                ("timestamp", "1"),
            ]);
            let r = TransactionRecord::from_stream_fields(&f).unwrap();
            assert!(r.is_return());
            assert_eq!(r.original_transaction_id(), None, "marker {:?}", marker);
        }
    }

    #[test]
    fn test_missing_id_is_parse_error() {
        let f = fields(&[("store_id", "STORE_A"), ("type", "PURCHASE"), ("timestamp", "1")]);
        let err = TransactionRecord::from_stream_fields(&f).unwrap_err();
        assert!(matches!(err, ReplicationError::StreamParse(_)));
        assert!(err.to_string().contains("transaction_id"));
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let f = fields(&[
            ("transaction_id", "X1"),
            ("store_id", "STORE_A"),
            ("type", "EXCHANGE"),
            ("timestamp", "1"),
        ]);
        assert!(TransactionRecord::from_stream_fields(&f).is_err());
    }

    #[test]
    fn test_bad_amount_is_parse_error() {
        let f = fields(&[
            ("transaction_id", "X1"),
            ("store_id", "STORE_A"),
            ("type", "PURCHASE"),
            ("amount", "lots"),
            ("timestamp", "1"),
        ]);
        assert!(TransactionRecord::from_stream_fields(&f).is_err());
    }

    #[test]
    fn test_fractional_timestamp_truncates() {
        let f = fields(&[
            ("transaction_id", "T1"),
            ("store_id", "STORE_A"),
            ("type", "purchase"),
            ("timestamp", "1700000000.75"),
        ]);
        let r = TransactionRecord::from_stream_fields(&f).unwrap();
        assert_eq!(r.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_json_document_uses_pos_shape() {
        let r = TransactionRecord::refund("R1", "STORE_A", "C1", Some("T1".into()), 10.0, false, 5);
        let json = r.to_json().unwrap();
        assert!(json.contains("\"transaction_type\":\"RETURN\""));
        assert!(json.contains("\"transaction_id\":\"R1\""));
        assert_eq!(TransactionRecord::from_json(&json).unwrap(), r);
    }

    #[test]
    fn test_json_document_from_pos_ignores_extra_fields() {
        let raw = r#"{
            "transaction_id": "TXN_STORE_A_1",
            "store_id": "STORE_A",
            "customer_id": "CUST_001",
            "transaction_type": "PURCHASE",
            "product": {"name": "Headphones", "price": 199.99},
            "amount": 199.99,
            "original_transaction_id": null,
            "payment_method": "credit_card",
            "timestamp": 1700000000,
            "has_photo": true,
            "status": "COMPLETED"
        }"#;
        let r = TransactionRecord::from_json(raw).unwrap();
        assert!(r.is_purchase());
        assert_eq!(r.status.as_deref(), Some("COMPLETED"));
    }

    #[test]
    fn test_stream_payload_size() {
        let r = TransactionRecord::purchase("T1", "A", "C", 1.0, 7);
        let expected: usize = r.to_stream_fields().iter().map(|(k, v)| k.len() + v.len()).sum();
        assert_eq!(r.stream_payload_size(), expected);
        assert!(expected > 0);
    }

    #[test]
    fn test_unit_kind_display() {
        assert_eq!(UnitKind::Stream.to_string(), "STREAM");
        assert_eq!(UnitKind::Record.to_string(), "RECORD");
        assert_eq!(UnitKind::Photo.to_string(), "PHOTO");
    }
}
