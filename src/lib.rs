//! # Rock
//!
//! Database access layer of the Rock framework.
//!
//! ## Feature Flags
//!
//! - `full` (default) - Everything below
//! - `database` - Connections, transactions, schema cache and query building
//!   (via `rock-db`)
//! - `cache` - Key/value cache with tag invalidation (via `rock-cache`)
//!
//! ## Quick Example
//!
//! ```rust
//! use rock::db::{Connection, ConnectionConfig};
//! use rock::db::query::{Condition, Query};
//! use rock::db::testing::MockDriver;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> rock::db::Result<()> {
//! let driver = MockDriver::new();
//! let db = Connection::builder(ConnectionConfig::new("sqlite::memory:"))
//!     .with_driver(Arc::new(driver.clone()))
//!     .build();
//!
//! let condition = Condition::from_json(json!(["in", "id", [1, 2, 3]]))?;
//! Query::new().from(["post"]).where_(condition).all(&db).await?;
//!
//! assert_eq!(driver.sql_log(), vec!["SELECT * FROM `post` WHERE `id` IN (?, ?, ?)"]);
//! # Ok(())
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(example()).unwrap();
//! ```

#[cfg(feature = "cache")]
pub use rock_cache as cache;

#[cfg(feature = "database")]
pub use rock_db as db;

#[cfg(feature = "database")]
pub mod prelude {
	pub use rock_db::query::{Condition, Expression, Query, SelectBuilder, SelectSpec};
	pub use rock_db::{
		Command, Connection, ConnectionConfig, DbError, IsolationLevel, Params, QueryValue, Row,
		ServerConfig, Transaction,
	};
}
