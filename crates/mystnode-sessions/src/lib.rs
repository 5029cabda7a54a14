//! # mystnode-sessions
//!
//! Session history for the VPN node: the persisted record model, the SQLite
//! store, and the single-pass query engine that filters records and derives
//! session lists and aggregate [`Stats`] from them.

pub mod error;
pub mod parser;
pub mod query;
pub mod store;
pub mod types;

pub use error::{QueryError, StoreError};
pub use parser::{parse_history, parse_history_file, ParsedHistory};
pub use query::{Filter, Query, QueryResults};
pub use store::{Database, SessionStorage, Sessions};
pub use types::{Direction, Identity, SessionHistory, Stats};
