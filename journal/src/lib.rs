pub mod event;
pub mod journal;
pub mod kv;
pub mod store;
pub mod table;

pub use event::DurableEvent;
pub use journal::{EventQuery, Journal, JournalError, MetricsHook, RetryClassifier};
pub use kv::{KeyValueTable, MemoryKeyValueTable};
pub use store::{JournalStore, MemoryJournalStore, StoreError, StoreQuery};
pub use table::{set_table_name, table_name};
