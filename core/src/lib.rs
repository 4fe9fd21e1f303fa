pub mod error;
pub mod http;
pub mod id;
pub mod sanitize;
pub mod time;
