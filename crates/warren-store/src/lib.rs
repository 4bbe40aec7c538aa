//! # warren-store
//!
//! SQLite persistence shared by every warren subsystem. One database file
//! holds the filesystem tables, the JSON key-value store, and the tool-call
//! log; [`Database`] owns the connection and bootstraps the schema.

pub mod db;
pub mod error;
pub mod kv;
pub mod tool_log;

pub use db::{unix_now, Database, DEFAULT_CHUNK_SIZE};
pub use error::{Result, StoreError};
pub use kv::KvStore;
pub use tool_log::{ToolCallLog, ToolCallRecord, ToolCallStatus};
