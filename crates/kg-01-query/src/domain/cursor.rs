//! Pagination cursor codec.
//!
//! Wire format: URL-safe base64 of
//! `{"last_evaluated_key": <resume key>, "timestamp": <unix seconds>}`.
//! The empty string means "start of the result set" on input and
//! "no further pages" on output.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{RepositoryError, RepositoryResult};
use std::collections::BTreeMap;

/// Storage-native resume position.
pub type ResumeKey = BTreeMap<String, serde_json::Value>;

/// Decoded cursor envelope. The timestamp is informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationCursor {
    pub last_evaluated_key: ResumeKey,
    pub timestamp: i64,
}

impl PaginationCursor {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single()
    }
}

/// Encode a resume key; an empty key encodes to `""`.
pub fn encode_cursor(resume_key: &ResumeKey) -> RepositoryResult<String> {
    if resume_key.is_empty() {
        return Ok(String::new());
    }
    let envelope = PaginationCursor {
        last_evaluated_key: resume_key.clone(),
        timestamp: Utc::now().timestamp(),
    };
    let json = serde_json::to_vec(&envelope)?;
    Ok(URL_SAFE.encode(json))
}

/// Decode a token into its resume key. `""` decodes to `None`.
pub fn decode_cursor(token: &str) -> RepositoryResult<Option<ResumeKey>> {
    Ok(decode_envelope(token)?.map(|cursor| cursor.last_evaluated_key))
}

/// Decode a token into the full envelope.
pub fn decode_envelope(token: &str) -> RepositoryResult<Option<PaginationCursor>> {
    if token.is_empty() {
        return Ok(None);
    }
    let bytes = URL_SAFE
        .decode(token)
        .map_err(|e| RepositoryError::validation("cursor", format!("invalid cursor encoding: {e}")))?;
    let cursor: PaginationCursor = serde_json::from_slice(&bytes)
        .map_err(|e| RepositoryError::validation("cursor", format!("invalid cursor payload: {e}")))?;
    if cursor.last_evaluated_key.is_empty() {
        return Err(RepositoryError::validation(
            "cursor",
            "cursor carries no resume key",
        ));
    }
    Ok(Some(cursor))
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Empty when there are no further pages.
    pub next_cursor: String,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: String) -> Self {
        let has_more = !next_cursor.is_empty();
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), String::new())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
            has_more: self.has_more,
        }
    }
}
