//! Publish/query/get/delete over a [`JournalStore`], with idempotent insert,
//! transient-error retry, and opaque cursor pagination.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};

use strato_core::id::IdGenerator;

use crate::event::DurableEvent;
use crate::store::{JournalStore, StoreError, StoreQuery};

const LIMIT_DEFAULT: i64 = 100;
const LIMIT_MAX: i64 = 1000;
const BACKOFF_EXPONENT_CAP: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("{0}")]
    Validation(String),
    #[error("event not found")]
    NotFound,
    #[error("journal store failed: {0}")]
    Store(String),
}

impl From<StoreError> for JournalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => JournalError::NotFound,
            other => JournalError::Store(other.to_string()),
        }
    }
}

/// Decides whether a store failure is worth retrying.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, error: &StoreError) -> bool;
}

/// Default classifier: matches transient infrastructure failures by message
/// substring.
pub struct SubstringClassifier {
    needles: Vec<&'static str>,
}

impl Default for SubstringClassifier {
    fn default() -> Self {
        Self {
            needles: vec![
                "provisioned-throughput",
                "throttling",
                "service-unavailable",
                "request-limit",
                "internal-server",
                "request-throttled",
            ],
        }
    }
}

impl RetryClassifier for SubstringClassifier {
    fn is_retryable(&self, error: &StoreError) -> bool {
        let StoreError::Other(message) = error else {
            return false;
        };
        let message = message.to_ascii_lowercase();
        self.needles.iter().any(|needle| message.contains(needle))
    }
}

/// Counter sink for journal operations.
pub trait MetricsHook: Send + Sync {
    fn increment(&self, name: &str);
}

/// Default sink: one structured log line per counter.
pub struct TracingMetrics;

impl MetricsHook for TracingMetrics {
    fn increment(&self, name: &str) {
        tracing::info!(metric = name, value = 1, "counter");
    }
}

/// Caller-facing query. `next_key` is populated by the mutator when more
/// results exist; feeding its cursor back in continues the scan.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub tenant_id: String,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub next_key: Option<BTreeMap<String, String>>,
}

pub struct Journal {
    store: Arc<dyn JournalStore>,
    ids: Arc<dyn IdGenerator>,
    metrics: Arc<dyn MetricsHook>,
    classifier: Arc<dyn RetryClassifier>,
    base_delay: Duration,
    max_attempts: u32,
}

impl Journal {
    pub fn new(store: Arc<dyn JournalStore>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            store,
            ids,
            metrics: Arc::new(TracingMetrics),
            classifier: Arc::new(SubstringClassifier::default()),
            base_delay: Duration::from_millis(50),
            max_attempts: 5,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsHook>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_retry(mut self, base_delay: Duration, max_attempts: u32) -> Self {
        self.base_delay = base_delay;
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Publishes an event, returning its id. A duplicate id is a successful
    /// dedupe: the same id comes back and `PublishDeduped` is counted.
    pub async fn publish(&self, mut event: DurableEvent) -> Result<String, JournalError> {
        event.validate()?;
        if event.id.is_empty() {
            event.id = self.ids.new_id();
        }
        event.derive_keys();

        let mut attempt: u32 = 0;
        loop {
            match self.store.insert_unique(&event).await {
                Ok(()) => return Ok(event.id),
                Err(StoreError::ConditionFailed) => {
                    self.metrics.increment("PublishDeduped");
                    tracing::info!(event_id = %event.id, "duplicate publish deduped");
                    return Ok(event.id);
                }
                Err(err) if self.classifier.is_retryable(&err) && attempt + 1 < self.max_attempts => {
                    let exponent = attempt.min(BACKOFF_EXPONENT_CAP);
                    let delay = self.base_delay * 2u32.pow(exponent);
                    tracing::warn!(event_id = %event.id, attempt, %err, "transient publish failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.metrics.increment("PublishError");
                    return Err(err.into());
                }
            }
        }
    }

    /// Runs a query and sets `query.next_key` when a further page exists.
    pub async fn query(
        &self,
        query: &mut EventQuery,
    ) -> Result<Vec<DurableEvent>, JournalError> {
        if query.tenant_id.is_empty() {
            return Err(JournalError::Validation("tenant id is required".into()));
        }

        let limit = query.limit.unwrap_or(LIMIT_DEFAULT).clamp(1, LIMIT_MAX) as usize;
        let start_after = match &query.cursor {
            Some(cursor) => Some(decode_cursor(cursor)?),
            None => None,
        };

        let store_query = StoreQuery {
            from_nanos: query.from.map(|t| t.timestamp_nanos_opt().unwrap_or_default()),
            to_nanos: query.to.map(|t| t.timestamp_nanos_opt().unwrap_or_default()),
            tags: query
                .tags
                .iter()
                .filter(|tag| !tag.is_empty())
                .cloned()
                .collect(),
            limit,
            start_after,
        };

        let page = match &query.event_type {
            Some(event_type) => {
                let partition_key = format!("{}#{}", query.tenant_id, event_type);
                self.store.query_by_type(&partition_key, &store_query).await?
            }
            None => {
                self.store
                    .query_by_tenant(&query.tenant_id, &store_query)
                    .await?
            }
        };

        query.next_key = page.last_key.map(|key| {
            let mut next = BTreeMap::new();
            next.insert("cursor".to_string(), URL_SAFE_NO_PAD.encode(key));
            next
        });
        Ok(page.events)
    }

    pub async fn get(&self, id: &str) -> Result<DurableEvent, JournalError> {
        Ok(self.store.get_by_id(id).await?)
    }

    /// Deletes by id: resolves the partition/sort keys first, then removes.
    pub async fn delete(&self, id: &str) -> Result<(), JournalError> {
        let event = self.store.get_by_id(id).await?;
        match self
            .store
            .delete(&event.partition_key, &event.sort_key)
            .await
        {
            Ok(()) => {
                self.metrics.increment("DeleteSuccess");
                Ok(())
            }
            Err(err) => {
                self.metrics.increment("DeleteError");
                Err(err.into())
            }
        }
    }
}

fn decode_cursor(cursor: &str) -> Result<String, JournalError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| JournalError::Validation("invalid cursor".into()))?;
    String::from_utf8(bytes).map_err(|_| JournalError::Validation("invalid cursor".into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use strato_core::id::SequenceIds;

    use crate::store::{MemoryJournalStore, Page};

    use super::*;

    #[derive(Default)]
    struct RecordingMetrics(Mutex<Vec<String>>);

    impl MetricsHook for RecordingMetrics {
        fn increment(&self, name: &str) {
            self.0.lock().unwrap().push(name.to_string());
        }
    }

    fn journal_over(store: Arc<dyn JournalStore>) -> (Journal, Arc<RecordingMetrics>) {
        let metrics = Arc::new(RecordingMetrics::default());
        let journal = Journal::new(store, Arc::new(SequenceIds::new()))
            .with_metrics(metrics.clone())
            .with_retry(Duration::from_millis(1), 4);
        (journal, metrics)
    }

    fn draft(event_type: &str, minute: u32) -> DurableEvent {
        let at = format!("2026-03-01T09:{minute:02}:00Z").parse().unwrap();
        DurableEvent::new(event_type, "t-1", at)
    }

    #[tokio::test]
    async fn publish_fills_id_and_keys() {
        let store = Arc::new(MemoryJournalStore::new());
        let (journal, _) = journal_over(store.clone());

        let id = journal.publish(draft("order.created", 0)).await.unwrap();
        assert_eq!(id, "id-1");
        let stored = store.get_by_id("id-1").await.unwrap();
        assert_eq!(stored.partition_key, "t-1#order.created");
        assert!(stored.sort_key.ends_with("#id-1"));
    }

    #[tokio::test]
    async fn publish_keeps_an_epoch_created_at() {
        let store = Arc::new(MemoryJournalStore::new());
        let (journal, _) = journal_over(store.clone());

        let mut event = draft("order.created", 0);
        event.created_at = DateTime::UNIX_EPOCH;
        journal.publish(event).await.unwrap();
        let stored = store.get_by_id("id-1").await.unwrap();
        assert_eq!(stored.created_at, DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn duplicate_publish_dedupes_with_the_same_id() {
        let store = Arc::new(MemoryJournalStore::new());
        let (journal, metrics) = journal_over(store);

        let mut event = draft("order.created", 0);
        event.id = "e-dup".to_string();
        assert_eq!(journal.publish(event.clone()).await.unwrap(), "e-dup");
        assert_eq!(journal.publish(event).await.unwrap(), "e-dup");
        assert_eq!(*metrics.0.lock().unwrap(), ["PublishDeduped"]);
    }

    #[tokio::test]
    async fn publish_rejects_missing_tenant() {
        let (journal, _) = journal_over(Arc::new(MemoryJournalStore::new()));
        let mut event = draft("order.created", 0);
        event.tenant_id.clear();
        assert!(matches!(
            journal.publish(event).await,
            Err(JournalError::Validation(_))
        ));
    }

    struct FlakyStore {
        inner: MemoryJournalStore,
        failures: AtomicU32,
        message: &'static str,
    }

    #[async_trait]
    impl JournalStore for FlakyStore {
        async fn insert_unique(&self, event: &DurableEvent) -> Result<(), StoreError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
            {
                return Err(StoreError::Other(self.message.to_string()));
            }
            self.inner.insert_unique(event).await
        }
        async fn query_by_type(&self, pk: &str, q: &StoreQuery) -> Result<Page, StoreError> {
            self.inner.query_by_type(pk, q).await
        }
        async fn query_by_tenant(&self, t: &str, q: &StoreQuery) -> Result<Page, StoreError> {
            self.inner.query_by_tenant(t, q).await
        }
        async fn get_by_id(&self, id: &str) -> Result<DurableEvent, StoreError> {
            self.inner.get_by_id(id).await
        }
        async fn delete(&self, pk: &str, sk: &str) -> Result<(), StoreError> {
            self.inner.delete(pk, sk).await
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = Arc::new(FlakyStore {
            inner: MemoryJournalStore::new(),
            failures: AtomicU32::new(2),
            message: "throttling: slow down",
        });
        let (journal, metrics) = journal_over(store);
        journal.publish(draft("order.created", 0)).await.unwrap();
        assert!(metrics.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_retryable_failures_surface_immediately() {
        let store = Arc::new(FlakyStore {
            inner: MemoryJournalStore::new(),
            failures: AtomicU32::new(1),
            message: "access denied",
        });
        let (journal, metrics) = journal_over(store);
        let result = journal.publish(draft("order.created", 0)).await;
        assert!(matches!(result, Err(JournalError::Store(_))));
        assert_eq!(*metrics.0.lock().unwrap(), ["PublishError"]);
    }

    #[tokio::test]
    async fn query_clamps_limit_and_paginates_via_cursor() {
        let store = Arc::new(MemoryJournalStore::new());
        let (journal, _) = journal_over(store);
        for minute in 0..3 {
            journal.publish(draft("order.created", minute)).await.unwrap();
        }

        let mut query = EventQuery {
            tenant_id: "t-1".to_string(),
            event_type: Some("order.created".to_string()),
            limit: Some(2),
            ..Default::default()
        };
        let first = journal.query(&mut query).await.unwrap();
        assert_eq!(first.len(), 2);
        let next = query.next_key.clone().unwrap();

        query.cursor = next.get("cursor").cloned();
        let second = journal.query(&mut query).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(query.next_key.is_none());
    }

    #[tokio::test]
    async fn query_requires_a_tenant_and_a_valid_cursor() {
        let (journal, _) = journal_over(Arc::new(MemoryJournalStore::new()));

        let mut missing_tenant = EventQuery::default();
        assert!(matches!(
            journal.query(&mut missing_tenant).await,
            Err(JournalError::Validation(_))
        ));

        let mut bad_cursor = EventQuery {
            tenant_id: "t-1".to_string(),
            cursor: Some("%%%".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            journal.query(&mut bad_cursor).await,
            Err(JournalError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn delete_emits_a_metric_and_removes_the_event() {
        let store = Arc::new(MemoryJournalStore::new());
        let (journal, metrics) = journal_over(store);
        let id = journal.publish(draft("order.created", 0)).await.unwrap();

        journal.delete(&id).await.unwrap();
        assert_eq!(*metrics.0.lock().unwrap(), ["DeleteSuccess"]);
        assert!(matches!(journal.get(&id).await, Err(JournalError::NotFound)));
    }
}
