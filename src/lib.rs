//! SMS to Mail: keyword-filtered SMS forwarding over Gmail or SMTP.

pub mod auth;
pub mod config;
pub mod error;
pub mod ingest;
pub mod mail;
pub mod pipeline;
pub mod routes;
pub mod store;
