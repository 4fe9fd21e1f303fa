//! MCP session state. Stores expose absolute-expiry semantics only; the
//! sliding refresh happens at the server layer so stores stay dumb.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use strato_core::time::Clock;
use strato_journal::kv::KeyValueTable;
use strato_journal::store::StoreError;

pub const SESSION_TTL_ENV: &str = "MCP_SESSION_TTL_MINUTES";
pub const SESSION_TABLE_ENV: &str = "MCP_SESSION_TABLE";
pub const DEFAULT_SESSION_TABLE: &str = "mcp-sessions";

const TTL_MINUTES_DEFAULT: u64 = 60;
const TTL_MINUTES_MIN: u64 = 1;
const TTL_MINUTES_MAX: u64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub bag: BTreeMap<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session store failed: {0}")]
    Store(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Session, SessionError>;
    async fn put(&self, session: &Session) -> Result<(), SessionError>;
    async fn delete(&self, id: &str) -> Result<(), SessionError>;
}

fn parse_env_u64_with_bounds(raw: Option<String>, min: u64, max: u64, default: u64) -> (u64, bool) {
    match raw.and_then(|value| value.parse::<u64>().ok()) {
        Some(parsed) => (parsed.clamp(min, max), true),
        None => (default, false),
    }
}

/// Session TTL from the environment, default 60 minutes.
pub fn session_ttl() -> Duration {
    let (minutes, _) = parse_env_u64_with_bounds(
        std::env::var(SESSION_TTL_ENV).ok(),
        TTL_MINUTES_MIN,
        TTL_MINUTES_MAX,
        TTL_MINUTES_DEFAULT,
    );
    Duration::minutes(minutes as i64)
}

pub fn session_table() -> String {
    std::env::var(SESSION_TABLE_ENV).unwrap_or_else(|_| DEFAULT_SESSION_TABLE.to_string())
}

/// Mutex-guarded map store. `get` hands out copies and lazily deletes
/// entries it observes past their expiry.
pub struct MemorySessionStore {
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = sessions.get(id) else {
            return Err(SessionError::NotFound);
        };
        if session.expires_at <= self.clock.now() {
            sessions.remove(id);
            return Err(SessionError::NotFound);
        }
        Ok(session.clone())
    }

    async fn put(&self, session: &Session) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(id);
        Ok(())
    }
}

/// Durable-table store. The record carries the session fields plus a
/// provider-managed TTL attribute in Unix seconds; the provider's expiry
/// sweep lags, so `get` re-checks `expires_at` itself.
pub struct KvSessionStore {
    kv: Arc<dyn KeyValueTable>,
    table: String,
    clock: Arc<dyn Clock>,
}

impl KvSessionStore {
    pub fn new(kv: Arc<dyn KeyValueTable>, table: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            table: table.to_string(),
            clock,
        }
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    async fn get(&self, id: &str) -> Result<Session, SessionError> {
        let item = self.kv.get_item(&self.table, id).await.map_err(|err| match err {
            StoreError::NotFound => SessionError::NotFound,
            other => SessionError::Store(other.to_string()),
        })?;
        let session: Session =
            serde_json::from_value(item).map_err(|e| SessionError::Store(e.to_string()))?;
        if session.expires_at <= self.clock.now() {
            self.delete(id).await?;
            return Err(SessionError::NotFound);
        }
        Ok(session)
    }

    async fn put(&self, session: &Session) -> Result<(), SessionError> {
        let item = serde_json::to_value(session).map_err(|e| SessionError::Store(e.to_string()))?;
        self.kv
            .put_item(
                &self.table,
                &session.id,
                item,
                Some(session.expires_at.timestamp()),
            )
            .await
            .map_err(|e| SessionError::Store(e.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.kv
            .delete_item(&self.table, id)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))
    }
}
