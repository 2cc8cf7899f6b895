use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const MAX_DETAILS_LEN: usize = 200;

/// A single spending entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: i64,
    pub amount: f64,
    pub details: String,
    pub date: String,
}

/// Validated input for creating or updating a record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub amount: f64,
    pub details: String,
    pub date: String,
}

impl NewRecord {
    /// Validates the raw fields and sanitizes `details`.
    pub fn new(amount: f64, details: &str, date: &str) -> Result<Self, StoreError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(StoreError::InvalidRecord(format!(
                "amount must be a positive number, got {amount}"
            )));
        }
        let details = sanitize_details(details)?;
        let date = date.trim();
        if !is_iso_date(date) {
            return Err(StoreError::InvalidRecord(format!(
                "date must be ISO-8601, got {date:?}"
            )));
        }
        Ok(Self {
            amount,
            details,
            date: date.to_owned(),
        })
    }

    pub fn with_id(self, id: i64) -> Record {
        Record {
            id,
            amount: self.amount,
            details: self.details,
            date: self.date,
        }
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn is_iso_date(raw: &str) -> bool {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(raw).is_ok()
}

/// Strips markup and script-injection patterns from free text.
///
/// Returns an error when nothing meaningful is left. The result is truncated to
/// [`MAX_DETAILS_LEN`] characters.
pub fn sanitize_details(raw: &str) -> Result<String, StoreError> {
    let mut text = strip_script_blocks(raw);
    text.retain(|c| c != '<' && c != '>');
    let text = strip_case_insensitive(&text, "javascript:");
    let text = strip_inline_handlers(&text);

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidRecord("details must not be empty".into()));
    }
    Ok(trimmed.chars().take(MAX_DETAILS_LEN).collect())
}

fn strip_script_blocks(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    let mut out = String::with_capacity(raw.len());
    let mut cursor = 0;
    while let Some(start) = lower[cursor..].find("<script") {
        let start = cursor + start;
        out.push_str(&raw[cursor..start]);
        cursor = match lower[start..].find("</script>") {
            Some(end) => start + end + "</script>".len(),
            None => raw.len(),
        };
    }
    out.push_str(&raw[cursor..]);
    out
}

fn strip_case_insensitive(text: &str, needle: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(pos) = lower[cursor..].find(needle) {
        out.push_str(&text[cursor..cursor + pos]);
        cursor += pos + needle.len();
    }
    out.push_str(&text[cursor..]);
    out
}

// Drops `onclick=`-style handler attributes: an `on` word followed by letters and `=`.
fn strip_inline_handlers(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let at_word_start = i == 0 || !chars[i - 1].is_ascii_alphanumeric();
        if at_word_start
            && i + 2 < chars.len()
            && chars[i].eq_ignore_ascii_case(&'o')
            && chars[i + 1].eq_ignore_ascii_case(&'n')
        {
            let mut j = i + 2;
            while j < chars.len() && chars[j].is_ascii_alphabetic() {
                j += 1;
            }
            let mut k = j;
            while k < chars.len() && chars[k] == ' ' {
                k += 1;
            }
            if j > i + 2 && k < chars.len() && chars[k] == '=' {
                i = k + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}
