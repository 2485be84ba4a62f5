//! Persistence layer: libSQL-backed storage for SMS, rules, settings and tokens.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, MessageCounts};
