use serde::{Deserialize, Serialize};

use crate::record::Record;

pub const FORMAT_VERSION: &str = "1.0.0";

/// Full on-disk backup document. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub version: String,
    pub timestamp: String,
    pub records: Vec<Record>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub total_records: usize,
    pub date_range: DateRange,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DateRange {
    pub earliest: String,
    pub latest: String,
}

/// Summary of a stored snapshot, derived when listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub id: String,
    pub filename: String,
    pub timestamp: String,
    pub size_bytes: u64,
    pub record_count: usize,
    pub total_amount: f64,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_size: u64,
    pub oldest_timestamp: Option<String>,
    pub newest_timestamp: Option<String>,
}

impl BackupStats {
    /// Aggregates listed backups; order of `backups` does not matter.
    pub fn from_backups(backups: &[BackupInfo]) -> Self {
        Self {
            total_backups: backups.len(),
            total_size: backups.iter().map(|b| b.size_bytes).sum(),
            oldest_timestamp: backups.iter().map(|b| b.timestamp.clone()).min(),
            newest_timestamp: backups.iter().map(|b| b.timestamp.clone()).max(),
        }
    }
}
