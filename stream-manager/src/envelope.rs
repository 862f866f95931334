//! The envelope fanned out to subscribers.
//!
//! Each inbound transport message is a JSON object with optional `type`, `data` and
//! `timestamp` fields. Parsing never fails: malformed payloads become a
//! `parse_error` envelope carrying the raw text and the parser's complaint.

use chrono::{DateTime, TimeZone, Utc};
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Discriminator used when the payload carries no `type`.
pub const MESSAGE_TYPE: &str = "message";
/// Discriminator of synthesized envelopes for unparseable payloads.
pub const PARSE_ERROR_TYPE: &str = "parse_error";

/// Payload of an [`Envelope`], keyed by its wire `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeKind {
    /// `type` absent or `"message"`
    Message(Value),
    /// Any other `type`; the payload is passed through untouched
    Custom { event_type: String, data: Value },
    /// The payload could not be parsed
    ParseError { raw: String, error: String },
}

/// One parsed unit of stream data.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// Envelope-supplied time, or the receive time when absent or unreadable
    pub timestamp: DateTime<Utc>,
    /// Transport-level event id, for display and debugging only
    pub id: Option<String>,
}

impl Envelope {
    /// Parse a raw transport payload received at `received_at`.
    pub fn parse(raw: &str, id: Option<String>, received_at: DateTime<Utc>) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => return Self::parse_error(raw, e.to_string(), id, received_at),
        };

        let mut fields = match value {
            Value::Object(fields) => fields,
            // Bare JSON values are treated as untyped message data.
            other => {
                return Self {
                    kind: EnvelopeKind::Message(other),
                    timestamp: received_at,
                    id,
                }
            }
        };

        let event_type = match fields.remove("type") {
            Some(Value::String(t)) => t,
            _ => MESSAGE_TYPE.to_string(),
        };
        let timestamp = fields
            .remove("timestamp")
            .and_then(|ts| parse_timestamp(&ts))
            .unwrap_or(received_at);
        let data = fields
            .remove("data")
            .unwrap_or_else(|| remaining_or_null(fields));

        let kind = if event_type == MESSAGE_TYPE {
            EnvelopeKind::Message(data)
        } else {
            EnvelopeKind::Custom { event_type, data }
        };

        Self { kind, timestamp, id }
    }

    /// Synthesize a `parse_error` envelope.
    pub fn parse_error(
        raw: impl Into<String>,
        error: impl Into<String>,
        id: Option<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::ParseError {
                raw: raw.into(),
                error: error.into(),
            },
            timestamp: received_at,
            id,
        }
    }

    /// The wire discriminator: `"message"`, `"parse_error"`, or the custom tag.
    pub fn event_type(&self) -> &str {
        match &self.kind {
            EnvelopeKind::Message(_) => MESSAGE_TYPE,
            EnvelopeKind::Custom { event_type, .. } => event_type,
            EnvelopeKind::ParseError { .. } => PARSE_ERROR_TYPE,
        }
    }

    /// The payload as JSON. Parse errors render as `{"raw": .., "error": ..}`.
    pub fn data(&self) -> Value {
        match &self.kind {
            EnvelopeKind::Message(data) | EnvelopeKind::Custom { data, .. } => data.clone(),
            EnvelopeKind::ParseError { raw, error } => {
                serde_json::json!({ "raw": raw, "error": error })
            }
        }
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self.kind, EnvelopeKind::ParseError { .. })
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(serde::Serialize)]
        struct Wire<'a> {
            #[serde(rename = "type")]
            event_type: &'a str,
            data: Value,
            timestamp: &'a DateTime<Utc>,
            #[serde(skip_serializing_if = "Option::is_none")]
            id: Option<&'a str>,
        }

        Wire {
            event_type: self.event_type(),
            data: self.data(),
            timestamp: &self.timestamp,
            id: self.id.as_deref(),
        }
        .serialize(serializer)
    }
}

/// RFC 3339 strings or integer epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Without a `data` field the rest of the object is the payload.
fn remaining_or_null(fields: Map<String, Value>) -> Value {
    if fields.is_empty() {
        Value::Null
    } else {
        Value::Object(fields)
    }
}
