//! Journal table-name resolution: an in-process write-once override, then
//! environment variables, then the default.

use std::sync::{LazyLock, Mutex};

pub const TABLE_ENV: &str = "STRATO_EVENTBUS_TABLE_NAME";
pub const LEGACY_TABLE_ENV: &str = "EVENTBUS_TABLE_NAME";
pub const DEFAULT_TABLE: &str = "strato-events";

static TABLE_OVERRIDE: LazyLock<Mutex<Option<String>>> = LazyLock::new(|| Mutex::new(None));

#[derive(Debug, thiserror::Error)]
#[error("journal table name already set to {0}")]
pub struct TableAlreadySet(pub String);

/// Sets the in-process override. A second call fails so configuration
/// cannot silently change mid-run.
pub fn set_table_name(name: &str) -> Result<(), TableAlreadySet> {
    let mut current = TABLE_OVERRIDE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = current.as_ref() {
        return Err(TableAlreadySet(existing.clone()));
    }
    *current = Some(name.to_string());
    Ok(())
}

pub fn table_name() -> String {
    let current = TABLE_OVERRIDE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(name) = current.as_ref() {
        return name.clone();
    }
    std::env::var(TABLE_ENV)
        .or_else(|_| std::env::var(LEGACY_TABLE_ENV))
        .unwrap_or_else(|_| DEFAULT_TABLE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns the process-wide override to keep ordering
    // deterministic.
    #[test]
    fn override_is_write_once_and_wins_over_default() {
        assert_eq!(table_name(), DEFAULT_TABLE);
        set_table_name("events-primary").unwrap();
        assert_eq!(table_name(), "events-primary");
        let err = set_table_name("events-secondary").unwrap_err();
        assert!(err.to_string().contains("events-primary"));
        assert_eq!(table_name(), "events-primary");
    }
}
