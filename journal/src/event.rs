use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::journal::JournalError;

/// A journal record. Partition and sort keys are derived deterministically
/// from the other fields when not pre-filled; the id is immutable after the
/// first write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableEvent {
    #[serde(default)]
    pub id: String,
    pub event_type: String,
    pub tenant_id: String,
    #[serde(default)]
    pub source_id: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// TTL attribute in Unix seconds; zero means no expiry.
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub partition_key: String,
    #[serde(default)]
    pub sort_key: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub ttl_seconds: i64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub schema_version: u32,
}

impl DurableEvent {
    pub fn new(event_type: &str, tenant_id: &str, published_at: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            event_type: event_type.to_string(),
            tenant_id: tenant_id.to_string(),
            source_id: String::new(),
            published_at,
            created_at: published_at,
            expires_at: 0,
            partition_key: String::new(),
            sort_key: String::new(),
            payload: Vec::new(),
            correlation_id: String::new(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            ttl_seconds: 0,
            retry_count: 0,
            schema_version: 1,
        }
    }

    pub fn published_at_nanos(&self) -> i64 {
        self.published_at.timestamp_nanos_opt().unwrap_or_default()
    }

    /// Fills partition/sort keys and the TTL attribute where absent.
    pub fn derive_keys(&mut self) {
        if self.partition_key.is_empty() {
            self.partition_key = format!("{}#{}", self.tenant_id, self.event_type);
        }
        if self.sort_key.is_empty() {
            self.sort_key = format!("{}#{}", self.published_at_nanos(), self.id);
        }
        if self.expires_at == 0 && self.ttl_seconds > 0 {
            self.expires_at = self.published_at.timestamp() + self.ttl_seconds;
        }
    }

    pub fn validate(&self) -> Result<(), JournalError> {
        if self.event_type.is_empty() {
            return Err(JournalError::Validation("event type is required".into()));
        }
        if self.tenant_id.is_empty() {
            return Err(JournalError::Validation("tenant id is required".into()));
        }
        if self.expires_at > 0 && self.published_at.timestamp() > self.expires_at {
            return Err(JournalError::Validation(
                "event expires before it is published".into(),
            ));
        }
        Ok(())
    }
}
