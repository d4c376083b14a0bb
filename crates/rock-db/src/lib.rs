//! # Rock DB
//!
//! Database access layer for Rock.
//!
//! ## Features
//!
//! - **Connections**: lazily opened [`Connection`] with master failover and
//!   read routing to slaves
//! - **Server pools**: unreachable servers are remembered in a shared
//!   status cache and skipped for a retry interval
//! - **Nested transactions**: inner levels are emulated with savepoints
//! - **Schema cache**: table metadata cached per connection identity and
//!   invalidated as a group through cache tags
//! - **Query building**: [`Query`](query::Query), condition compilation and
//!   the `filter_where` emptiness pass, aliased select lists
//! - **Dialects**: MySQL, PostgreSQL, SQLite, SQL Server, Oracle and CUBRID
//!
//! ## Quick Start
//!
//! ```rust
//! use rock_db::{Connection, ConnectionConfig, ServerConfig};
//! use rock_db::query::{Condition, Query};
//! use rock_db::testing::MockDriver;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> rock_db::Result<()> {
//! let driver = MockDriver::new();
//! driver.refuse("mysql:host=primary");
//!
//! let config = ConnectionConfig::new("")
//!     .with_masters(vec![
//!         ServerConfig::new().with_dsn("mysql:host=primary"),
//!         ServerConfig::new().with_dsn("mysql:host=standby"),
//!     ]);
//! let db = Connection::builder(config)
//!     .with_driver(Arc::new(driver.clone()))
//!     .with_server_shuffle(false)
//!     .build();
//!
//! let condition = Condition::from_json(json!({"status": 1}))?;
//! let rows = Query::new().from(["user"]).where_(condition).all(&db).await?;
//!
//! assert!(rows.is_empty());
//! assert_eq!(driver.connect_attempts(), vec!["mysql:host=primary", "mysql:host=standby"]);
//! # Ok(())
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(example()).unwrap();
//! ```

pub mod command;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod events;
pub mod pool;
pub mod query;
pub mod schema;
pub mod testing;
pub mod transaction;
pub mod types;

pub use command::Command;
pub use config::{ConnectionConfig, ServerConfig};
pub use connection::{Connection, ConnectionBuilder};
pub use dialect::{Dialect, dialect_for};
pub use driver::{DriverName, QueryResult};
pub use error::{DbError, Result};
pub use events::{ConnectionEvent, ConnectionEventKind, ConnectionEventListener};
pub use query::{Condition, Expression, Query};
pub use schema::{Schema, SchemaCache, TableSchema};
pub use transaction::Transaction;
pub use types::{IsolationLevel, Params, QueryValue, Row, Savepoint};
