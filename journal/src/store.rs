//! Storage interface for the journal: conditional insert, ranged descending
//! queries over two access paths, id lookup, and delete. The in-memory
//! implementation backs tests and local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::event::DurableEvent;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conditional write failed")]
    ConditionFailed,
    #[error("item not found")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

/// Parameters shared by both query access paths. `start_after` is the
/// store-level continuation token from the previous page.
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub from_nanos: Option<i64>,
    pub to_nanos: Option<i64>,
    pub tags: Vec<String>,
    pub limit: usize,
    pub start_after: Option<String>,
}

#[derive(Debug, Default)]
pub struct Page {
    pub events: Vec<DurableEvent>,
    /// Continuation token when more results exist.
    pub last_key: Option<String>,
}

#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Inserts with a unique-id precondition; a duplicate id fails with
    /// [`StoreError::ConditionFailed`].
    async fn insert_unique(&self, event: &DurableEvent) -> Result<(), StoreError>;

    /// Primary access path: one `tenantId#eventType` partition, ordered by
    /// sort key descending.
    async fn query_by_type(
        &self,
        partition_key: &str,
        query: &StoreQuery,
    ) -> Result<Page, StoreError>;

    /// Secondary access path: all of a tenant's events ordered by publish
    /// instant descending.
    async fn query_by_tenant(
        &self,
        tenant_id: &str,
        query: &StoreQuery,
    ) -> Result<Page, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<DurableEvent, StoreError>;

    async fn delete(&self, partition_key: &str, sort_key: &str) -> Result<(), StoreError>;
}

fn continuation(event: &DurableEvent) -> String {
    format!("{}#{}", event.published_at_nanos(), event.id)
}

fn parse_continuation(token: &str) -> Option<(i64, String)> {
    let (nanos, id) = token.split_once('#')?;
    Some((nanos.parse().ok()?, id.to_string()))
}

#[derive(Default)]
struct MemoryInner {
    items: BTreeMap<(String, String), DurableEvent>,
    by_id: HashMap<String, (String, String)>,
}

/// Mutex-guarded map store.
#[derive(Default)]
pub struct MemoryJournalStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn select<F>(&self, filter: F, query: &StoreQuery) -> Page
    where
        F: Fn(&DurableEvent) -> bool,
    {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let start_after = query.start_after.as_deref().and_then(parse_continuation);

        let mut matches: Vec<&DurableEvent> = inner
            .items
            .values()
            .filter(|event| filter(event))
            .filter(|event| {
                let nanos = event.published_at_nanos();
                query.from_nanos.is_none_or(|from| nanos >= from)
                    && query.to_nanos.is_none_or(|to| nanos < to)
                    && query
                        .tags
                        .iter()
                        .all(|tag| event.tags.iter().any(|t| t == tag))
            })
            .collect();
        matches.sort_by(|a, b| {
            (b.published_at_nanos(), b.id.as_str()).cmp(&(a.published_at_nanos(), a.id.as_str()))
        });

        if let Some((nanos, id)) = &start_after {
            matches.retain(|event| {
                (event.published_at_nanos(), event.id.as_str()) < (*nanos, id.as_str())
            });
        }

        let more = matches.len() > query.limit;
        matches.truncate(query.limit);
        let last_key = if more {
            matches.last().map(|event| continuation(event))
        } else {
            None
        };
        Page {
            events: matches.into_iter().cloned().collect(),
            last_key,
        }
    }
}

#[async_trait]
impl JournalStore for MemoryJournalStore {
    async fn insert_unique(&self, event: &DurableEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.by_id.contains_key(&event.id) {
            return Err(StoreError::ConditionFailed);
        }
        let keys = (event.partition_key.clone(), event.sort_key.clone());
        inner.by_id.insert(event.id.clone(), keys.clone());
        inner.items.insert(keys, event.clone());
        Ok(())
    }

    async fn query_by_type(
        &self,
        partition_key: &str,
        query: &StoreQuery,
    ) -> Result<Page, StoreError> {
        Ok(self.select(|event| event.partition_key == partition_key, query))
    }

    async fn query_by_tenant(
        &self,
        tenant_id: &str,
        query: &StoreQuery,
    ) -> Result<Page, StoreError> {
        Ok(self.select(|event| event.tenant_id == tenant_id, query))
    }

    async fn get_by_id(&self, id: &str) -> Result<DurableEvent, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .by_id
            .get(id)
            .and_then(|keys| inner.items.get(keys))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, partition_key: &str, sort_key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let keys = (partition_key.to_string(), sort_key.to_string());
        match inner.items.remove(&keys) {
            Some(event) => {
                inner.by_id.remove(&event.id);
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_event(id: &str, minute: u32, tags: &[&str]) -> DurableEvent {
        let at = format!("2026-03-01T12:{minute:02}:00Z").parse().unwrap();
        let mut event = DurableEvent::new("order.created", "t-1", at);
        event.id = id.to_string();
        event.tags = tags.iter().map(|t| t.to_string()).collect();
        event.derive_keys();
        event
    }

    async fn seeded() -> MemoryJournalStore {
        let store = MemoryJournalStore::new();
        for (id, minute, tags) in [
            ("e-1", 1, vec!["prio"]),
            ("e-2", 2, vec![]),
            ("e-3", 3, vec!["prio", "eu"]),
        ] {
            store
                .insert_unique(&stored_event(id, minute, &tags))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn duplicate_id_fails_the_condition() {
        let store = seeded().await;
        let result = store.insert_unique(&stored_event("e-1", 9, &[])).await;
        assert!(matches!(result, Err(StoreError::ConditionFailed)));
    }

    #[tokio::test]
    async fn type_query_is_descending_by_publish_instant() {
        let store = seeded().await;
        let page = store
            .query_by_type(
                "t-1#order.created",
                &StoreQuery {
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = page.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["e-3", "e-2", "e-1"]);
        assert!(page.last_key.is_none());
    }

    #[tokio::test]
    async fn pagination_continues_after_the_last_key() {
        let store = seeded().await;
        let query = StoreQuery {
            limit: 2,
            ..Default::default()
        };
        let first = store.query_by_tenant("t-1", &query).await.unwrap();
        assert_eq!(first.events.len(), 2);
        let token = first.last_key.unwrap();

        let rest = store
            .query_by_tenant(
                "t-1",
                &StoreQuery {
                    limit: 2,
                    start_after: Some(token),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = rest.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["e-1"]);
        assert!(rest.last_key.is_none());
    }

    #[tokio::test]
    async fn tag_filters_require_every_tag() {
        let store = seeded().await;
        let page = store
            .query_by_tenant(
                "t-1",
                &StoreQuery {
                    tags: vec!["prio".to_string(), "eu".to_string()],
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = page.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["e-3"]);
    }

    #[tokio::test]
    async fn time_range_is_inclusive_from_exclusive_to() {
        let store = seeded().await;
        let from = stored_event("x", 2, &[]).published_at_nanos();
        let to = stored_event("x", 3, &[]).published_at_nanos();
        let page = store
            .query_by_tenant(
                "t-1",
                &StoreQuery {
                    from_nanos: Some(from),
                    to_nanos: Some(to),
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = page.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["e-2"]);
    }

    #[tokio::test]
    async fn delete_removes_both_indexes() {
        let store = seeded().await;
        let event = store.get_by_id("e-2").await.unwrap();
        store
            .delete(&event.partition_key, &event.sort_key)
            .await
            .unwrap();
        assert!(matches!(
            store.get_by_id("e-2").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.delete(&event.partition_key, &event.sort_key).await,
            Err(StoreError::NotFound)
        ));
    }
}
