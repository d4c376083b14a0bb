//! Nested transactions
//!
//! A [`Transaction`] tracks a nesting level. Level 1 is a real database
//! transaction; every deeper level is emulated with a savepoint named after
//! the level it guards (`LEVEL1`, `LEVEL2`, ...).
//!
//! On dialects without savepoint support nested `begin` and `commit` only
//! move the counter and log a warning, while a nested `roll_back` fails with
//! [`DbError::UnsupportedOperation`] because the outer transaction could not
//! be kept consistent.
//!
//! ```text
//! begin()     BEGIN                              level 0 -> 1
//! begin()     SAVEPOINT LEVEL1                   level 1 -> 2
//! roll_back() ROLLBACK TO SAVEPOINT LEVEL1       level 2 -> 1
//! commit()    COMMIT                             level 1 -> 0
//! ```

use crate::connection::{Connection, ConnectionInner};
use crate::error::{DbError, Result};
use crate::events::ConnectionEvent;
use crate::types::{IsolationLevel, Savepoint};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

pub(crate) struct TransactionInner {
	connection: Weak<ConnectionInner>,
	level: AtomicUsize,
}

impl TransactionInner {
	pub(crate) fn is_active(&self) -> bool {
		self.level.load(Ordering::SeqCst) > 0
	}

	/// Forget the nesting level after the connection was closed
	pub(crate) fn reset(&self) {
		self.level.store(0, Ordering::SeqCst);
	}
}

impl Drop for TransactionInner {
	fn drop(&mut self) {
		let level = *self.level.get_mut();
		if level > 0 {
			tracing::warn!(level, "Connection dropped with an active transaction");
		}
	}
}

/// Transaction of one [`Connection`]
///
/// Obtained from [`Connection::begin_transaction`]. Clones refer to the same
/// transaction, and the connection holds it until it is committed, rolled
/// back or the connection is closed. Dropping every handle leaves the
/// database transaction open: [`Connection::get_transaction`] still returns
/// it and the next `begin_transaction` nests into it.
///
/// # Examples
///
/// ```
/// use rock_db::{Connection, ConnectionConfig};
/// use rock_db::testing::MockDriver;
/// use std::sync::Arc;
///
/// # async fn example() -> rock_db::Result<()> {
/// let driver = MockDriver::new();
/// let db = Connection::builder(ConnectionConfig::new("mysql:host=localhost"))
///     .with_driver(Arc::new(driver.clone()))
///     .build();
///
/// let outer = db.begin_transaction(None).await?;
/// let inner = db.begin_transaction(None).await?;
/// assert_eq!(inner.level(), 2);
///
/// inner.roll_back().await?;
/// outer.commit().await?;
///
/// assert_eq!(
///     driver.sql_log(),
///     vec!["BEGIN", "SAVEPOINT LEVEL1", "ROLLBACK TO SAVEPOINT LEVEL1", "COMMIT"]
/// );
/// # Ok(())
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(example()).unwrap();
/// ```
#[derive(Clone)]
pub struct Transaction {
	inner: Arc<TransactionInner>,
}

impl std::fmt::Debug for Transaction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Transaction")
			.field("level", &self.level())
			.finish()
	}
}

impl Transaction {
	pub(crate) fn new(connection: Weak<ConnectionInner>) -> Self {
		Self {
			inner: Arc::new(TransactionInner {
				connection,
				level: AtomicUsize::new(0),
			}),
		}
	}

	pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
		Self { inner }
	}

	pub(crate) fn shared(&self) -> Arc<TransactionInner> {
		Arc::clone(&self.inner)
	}

	/// Whether a real transaction is open
	pub fn is_active(&self) -> bool {
		self.inner.is_active()
	}

	/// Current nesting level, 0 when inactive
	pub fn level(&self) -> usize {
		self.inner.level.load(Ordering::SeqCst)
	}

	fn connection(&self) -> Result<Connection> {
		self.inner
			.connection
			.upgrade()
			.map(Connection::from_inner)
			.ok_or_else(|| {
				DbError::TransactionState("Transaction::connection is no longer available".to_string())
			})
	}

	/// Begin the transaction or one more nested level
	///
	/// `isolation_level` only applies when a real transaction is started.
	pub async fn begin(&self, isolation_level: Option<IsolationLevel>) -> Result<()> {
		let db = self.connection()?;
		db.open().await?;
		let dialect = db.dialect()?;
		let level = self.level();

		if level == 0 {
			db.emit_event(ConnectionEvent::before_begin_transaction(db.masked_dsn()))
				.await;
			tracing::debug!(isolation_level = ?isolation_level, "Begin transaction");

			let isolation_sql = isolation_level
				.map(|level| dialect.set_isolation_level_sql(level))
				.transpose()?;
			if dialect.sets_isolation_before_begin()
				&& let Some(sql) = &isolation_sql
			{
				db.execute_sql(sql, &[]).await?;
			}
			if let Some(sql) = dialect.begin_transaction_sql() {
				db.execute_sql(sql, &[]).await?;
			}
			if !dialect.sets_isolation_before_begin()
				&& let Some(sql) = &isolation_sql
			{
				db.execute_sql(sql, &[]).await?;
			}
			self.inner.level.store(1, Ordering::SeqCst);
			return Ok(());
		}

		if dialect.supports_savepoint() && db.config().enable_savepoint {
			tracing::debug!(level, "Set savepoint");
			let sql = dialect.create_savepoint_sql(&Savepoint::for_level(level));
			db.execute_sql(&sql, &[]).await?;
		} else {
			tracing::warn!(
				level,
				"Transaction not started: nested transaction not supported"
			);
		}
		self.inner.level.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	/// Commit the innermost level
	///
	/// Issues COMMIT when the outermost level is left and releases the
	/// level's savepoint otherwise.
	pub async fn commit(&self) -> Result<()> {
		if !self.is_active() {
			return Err(DbError::TransactionState(
				"Failed to commit transaction: transaction was inactive".to_string(),
			));
		}
		let db = self.connection()?;
		let dialect = db.dialect()?;
		let level = self.inner.level.fetch_sub(1, Ordering::SeqCst) - 1;

		if level == 0 {
			tracing::debug!("Commit transaction");
			db.execute_sql(dialect.commit_sql(), &[]).await?;
			db.emit_event(ConnectionEvent::after_commit(db.masked_dsn()))
				.await;
			return Ok(());
		}

		if dialect.supports_savepoint() && db.config().enable_savepoint {
			tracing::debug!(level, "Release savepoint");
			if let Some(sql) = dialect.release_savepoint_sql(&Savepoint::for_level(level)) {
				db.execute_sql(&sql, &[]).await?;
			}
		} else {
			tracing::warn!(
				level,
				"Transaction not committed: nested transaction not supported"
			);
		}
		Ok(())
	}

	/// Roll back the innermost level
	///
	/// Does nothing when the transaction is inactive, so it is safe to call
	/// from error paths after a failed commit.
	pub async fn roll_back(&self) -> Result<()> {
		if !self.is_active() {
			return Ok(());
		}
		let db = self.connection()?;
		let dialect = db.dialect()?;
		let level = self.inner.level.fetch_sub(1, Ordering::SeqCst) - 1;

		if level == 0 {
			tracing::debug!("Roll back transaction");
			db.execute_sql(dialect.rollback_sql(), &[]).await?;
			db.emit_event(ConnectionEvent::after_rollback(db.masked_dsn()))
				.await;
			return Ok(());
		}

		if dialect.supports_savepoint() && db.config().enable_savepoint {
			tracing::debug!(level, "Roll back to savepoint");
			let sql = dialect.rollback_savepoint_sql(&Savepoint::for_level(level));
			db.execute_sql(&sql, &[]).await?;
			Ok(())
		} else {
			Err(DbError::UnsupportedOperation(
				"Roll back failed: nested transaction not supported".to_string(),
			))
		}
	}

	/// Change the isolation level of the running transaction
	pub async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
		if !self.is_active() {
			return Err(DbError::TransactionState(
				"Failed to set isolation level: transaction was inactive".to_string(),
			));
		}
		let db = self.connection()?;
		let sql = db.dialect()?.set_isolation_level_sql(level)?;
		tracing::debug!(isolation_level = ?level, "Setting transaction isolation level");
		db.execute_sql(&sql, &[]).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::ConnectionConfig;
	use crate::testing::MockDriver;
	use rstest::rstest;

	fn connection(driver: &MockDriver, dsn: &str) -> Connection {
		Connection::builder(ConnectionConfig::new(dsn))
			.with_driver(Arc::new(driver.clone()))
			.build()
	}

	#[rstest]
	#[tokio::test]
	async fn test_commit_inactive_is_error() {
		// Arrange
		let driver = MockDriver::new();
		let db = connection(&driver, "mysql:host=a");
		let transaction = Transaction::new(db.downgrade());

		// Act
		let result = transaction.commit().await;

		// Assert
		assert!(matches!(result, Err(DbError::TransactionState(_))));
	}

	#[rstest]
	#[tokio::test]
	async fn test_roll_back_inactive_is_noop() {
		// Arrange
		let driver = MockDriver::new();
		let db = connection(&driver, "mysql:host=a");
		let transaction = Transaction::new(db.downgrade());

		// Act
		let result = transaction.roll_back().await;

		// Assert
		assert!(result.is_ok());
		assert!(driver.sql_log().is_empty());
	}

	#[rstest]
	#[tokio::test]
	async fn test_set_isolation_level_inactive_is_error() {
		// Arrange
		let driver = MockDriver::new();
		let db = connection(&driver, "mysql:host=a");
		let transaction = Transaction::new(db.downgrade());

		// Act
		let result = transaction
			.set_isolation_level(IsolationLevel::Serializable)
			.await;

		// Assert
		assert!(matches!(result, Err(DbError::TransactionState(_))));
	}

	#[rstest]
	#[tokio::test]
	async fn test_begin_without_connection_is_error() {
		// Arrange
		let transaction = Transaction::new(Weak::new());

		// Act
		let result = transaction.begin(None).await;

		// Assert
		assert!(matches!(result, Err(DbError::TransactionState(_))));
	}

	#[rstest]
	#[case("mysql:host=a", vec!["SET TRANSACTION ISOLATION LEVEL SERIALIZABLE", "BEGIN"])]
	#[case("pgsql:host=a", vec!["BEGIN", "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"])]
	#[tokio::test]
	async fn test_isolation_level_placement(#[case] dsn: &str, #[case] expected: Vec<&str>) {
		// Arrange
		let driver = MockDriver::new();
		let db = connection(&driver, dsn);

		// Act
		db.begin_transaction(Some(IsolationLevel::Serializable))
			.await
			.unwrap();

		// Assert
		assert_eq!(driver.sql_log(), expected);
	}

	#[rstest]
	#[tokio::test]
	async fn test_disabled_savepoints_degrade_nested_commit() {
		// Arrange
		let driver = MockDriver::new();
		let db = Connection::builder(ConnectionConfig::new("mysql:host=a").with_enable_savepoint(false))
			.with_driver(Arc::new(driver.clone()))
			.build();
		let transaction = db.begin_transaction(None).await.unwrap();
		db.begin_transaction(None).await.unwrap();

		// Act
		transaction.commit().await.unwrap();
		let level_after_inner = transaction.level();
		transaction.commit().await.unwrap();

		// Assert
		assert_eq!(level_after_inner, 1);
		assert_eq!(transaction.level(), 0);
		assert_eq!(driver.sql_log(), vec!["BEGIN", "COMMIT"]);
	}
}
