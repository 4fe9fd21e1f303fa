//! Minimal key-value table interface for durable session records and other
//! small documents. The TTL attribute is provider-managed Unix seconds.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::store::StoreError;

#[async_trait]
pub trait KeyValueTable: Send + Sync {
    async fn get_item(&self, table: &str, key: &str) -> Result<Value, StoreError>;
    async fn put_item(
        &self,
        table: &str,
        key: &str,
        item: Value,
        expires_at: Option<i64>,
    ) -> Result<(), StoreError>;
    async fn delete_item(&self, table: &str, key: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryKeyValueTable {
    items: Mutex<HashMap<(String, String), (Value, Option<i64>)>>,
}

impl MemoryKeyValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored TTL attribute, for assertions.
    pub fn expires_at(&self, table: &str, key: &str) -> Option<i64> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items
            .get(&(table.to_string(), key.to_string()))
            .and_then(|(_, expires)| *expires)
    }
}

#[async_trait]
impl KeyValueTable for MemoryKeyValueTable {
    async fn get_item(&self, table: &str, key: &str) -> Result<Value, StoreError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items
            .get(&(table.to_string(), key.to_string()))
            .map(|(value, _)| value.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn put_item(
        &self,
        table: &str,
        key: &str,
        item: Value,
        expires_at: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert((table.to_string(), key.to_string()), (item, expires_at));
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.remove(&(table.to_string(), key.to_string()));
        Ok(())
    }
}
