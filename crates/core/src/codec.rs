//! Snapshot serialization and integrity verification.
//!
//! Verification runs on the untyped JSON document so a file with missing or
//! null fields is reported as invalid instead of failing to parse.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{BackupError, BackupResult};
use crate::hash::{records_checksum, value_checksum};
use crate::record::Record;
use crate::snapshot::{BackupInfo, DateRange, Snapshot, SnapshotMetadata, FORMAT_VERSION};

const REQUIRED_RECORD_FIELDS: [&str; 4] = ["id", "amount", "details", "date"];

/// Builds a snapshot from the current records and settings blob.
pub fn serialize(records: Vec<Record>, settings: Option<Value>, created_at: DateTime<Utc>) -> Snapshot {
    let metadata = compute_metadata(&records);
    let checksum = Some(records_checksum(&records));
    Snapshot {
        version: FORMAT_VERSION.to_owned(),
        timestamp: format_timestamp(created_at),
        records,
        settings,
        metadata,
        checksum,
    }
}

pub fn compute_metadata(records: &[Record]) -> SnapshotMetadata {
    let mut total_amount = 0.0;
    let mut earliest: Option<&str> = None;
    let mut latest: Option<&str> = None;
    for record in records {
        total_amount += record.amount;
        let date = record.date.as_str();
        if earliest.map_or(true, |e| date < e) {
            earliest = Some(date);
        }
        if latest.map_or(true, |l| date > l) {
            latest = Some(date);
        }
    }
    SnapshotMetadata {
        total_records: records.len(),
        date_range: DateRange {
            earliest: earliest.unwrap_or_default().to_owned(),
            latest: latest.unwrap_or_default().to_owned(),
        },
        total_amount,
    }
}

pub fn to_json(snapshot: &Snapshot) -> BackupResult<String> {
    serde_json::to_string_pretty(snapshot)
        .map_err(|e| BackupError::InvalidBackup(format!("serialize snapshot: {e}")))
}

/// Parses snapshot text into an untyped document.
pub fn decode(text: &str) -> BackupResult<Value> {
    serde_json::from_str(text).map_err(|e| BackupError::CorruptBackup(e.to_string()))
}

/// Structural integrity check of a decoded snapshot document.
pub fn verify(doc: &Value) -> bool {
    match verification_failure(doc) {
        None => true,
        Some(reason) => {
            debug!(reason = %reason, "snapshot failed verification");
            false
        }
    }
}

/// Like [`verify`], but reports why the document was rejected.
pub fn verification_failure(doc: &Value) -> Option<String> {
    let Some(version) = doc.get("version").and_then(Value::as_str) else {
        return Some("missing version".into());
    };
    if doc.get("timestamp").and_then(Value::as_str).is_none() {
        return Some("missing timestamp".into());
    }
    let Some(records) = doc.get("records").and_then(Value::as_array) else {
        return Some("records is not an array".into());
    };
    for (index, record) in records.iter().enumerate() {
        for field in REQUIRED_RECORD_FIELDS {
            if record.get(field).map_or(true, Value::is_null) {
                return Some(format!("record {index} is missing {field}"));
            }
        }
    }
    if let Some(expected) = doc.get("checksum").and_then(Value::as_str) {
        let actual = value_checksum(&doc["records"]);
        if actual != expected {
            return Some("checksum mismatch".into());
        }
    }
    if version != FORMAT_VERSION {
        warn!(version, expected = FORMAT_VERSION, "snapshot format version differs, restoring best effort");
    }
    None
}

/// Converts a decoded document into a typed snapshot.
pub fn into_snapshot(doc: Value) -> BackupResult<Snapshot> {
    serde_json::from_value(doc).map_err(|e| BackupError::InvalidBackup(e.to_string()))
}

pub fn deserialize(text: &str) -> BackupResult<Snapshot> {
    into_snapshot(decode(text)?)
}

/// Derives the listing summary of a stored document.
///
/// Counts and totals come from the records themselves so a file with stale
/// metadata still reports what a restore would produce.
pub fn summarize(id: String, filename: String, size_bytes: u64, doc: &Value) -> BackupInfo {
    let records = doc.get("records").and_then(Value::as_array);
    let record_count = records.map_or(0, Vec::len);
    let total_amount = records
        .map(|rs| rs.iter().filter_map(|r| r.get("amount").and_then(Value::as_f64)).sum::<f64>())
        .unwrap_or(0.0);
    BackupInfo {
        id,
        filename,
        timestamp: doc
            .get("timestamp")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        size_bytes,
        record_count,
        total_amount,
        is_verified: verify(doc),
    }
}

/// Canonical snapshot timestamp: RFC 3339, UTC, millisecond precision.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Path-safe form of a timestamp, used as the snapshot id.
pub fn sanitize_timestamp(timestamp: &str) -> String {
    timestamp.replace([':', '.'], "-")
}
