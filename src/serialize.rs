//! NDJSON wire schema: one JSON object per emitted line, on stdout and per pipe
//! subscriber.

use crate::event::{Attribute, Event};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Serializable form of [`Event`]. Optional fields are omitted, not serialized as null.
#[derive(Debug, Serialize)]
pub struct NdjsonEvent {
    pub usn: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "fileReferenceNumber")]
    pub file_reference_number: String,
    #[serde(rename = "parentReferenceNumber")]
    pub parent_reference_number: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fullPath", skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    #[serde(rename = "oldPath", skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(rename = "newPath", skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
    pub reason: Vec<&'static str>,
    #[serde(rename = "reasonRaw")]
    pub reason_raw: u32,
    #[serde(rename = "isDirectory")]
    pub is_directory: bool,
    pub attributes: Vec<&'static str>,
}

impl From<&Event> for NdjsonEvent {
    fn from(event: &Event) -> Self {
        NdjsonEvent {
            usn: event.usn,
            timestamp: event.timestamp,
            file_reference_number: frn_hex(event.frn),
            parent_reference_number: frn_hex(event.parent_frn),
            file_name: event.file_name.clone(),
            full_path: event.full_path.clone(),
            old_path: event.old_path.clone(),
            new_path: event.new_path.clone(),
            reason: event.reason.iter().map(|token| token.as_str()).collect(),
            reason_raw: event.reason_raw,
            is_directory: event.is_directory,
            attributes: Attribute::decode(event.attributes)
                .iter()
                .map(|attr| attr.as_str())
                .collect(),
        }
    }
}

fn frn_hex(frn: u64) -> String {
    format!("0x{frn:016x}")
}

/// `GAP`/`CURSOR_RESET` control lines, interleaved with events on the same NDJSON stream.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "GAP")]
    Gap {
        reason: &'static str,
        from: i64,
        to: i64,
    },
    #[serde(rename = "CURSOR_RESET")]
    CursorReset { reason: &'static str },
}

impl ControlMessage {
    pub fn journal_wrapped(from: i64, to: i64) -> Self {
        ControlMessage::Gap {
            reason: "journal_wrapped",
            from,
            to,
        }
    }

    pub fn journal_recreated() -> Self {
        ControlMessage::CursorReset {
            reason: "journal_recreated",
        }
    }
}

/// Serializes `event` to a single NDJSON line (no trailing newline).
pub fn event_to_line(event: &Event) -> serde_json::Result<String> {
    serde_json::to_string(&NdjsonEvent::from(event))
}

/// Serializes a control message to a single NDJSON line (no trailing newline).
pub fn control_to_line(message: &ControlMessage) -> serde_json::Result<String> {
    serde_json::to_string(message)
}
