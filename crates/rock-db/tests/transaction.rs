//! Integration tests for nested transactions
//!
//! ## Test Coverage
//!
//! - Savepoint statements issued per nesting level
//! - `Connection::transaction` commit and rollback paths, including nesting
//! - Transaction events and their ordering
//! - Degraded nesting when savepoints are disabled or unsupported
//! - Transaction state after the connection is closed
//! - Transactions outliving the handles returned to the caller

use async_trait::async_trait;
use parking_lot::Mutex;
use rock_db::testing::MockDriver;
use rock_db::{
	Connection, ConnectionConfig, ConnectionEvent, ConnectionEventKind, ConnectionEventListener,
	DbError, Dialect, DriverName, IsolationLevel, Params, TableSchema,
};
use rstest::*;
use std::sync::Arc;

// ========================================
// Test Fixtures
// ========================================

#[derive(Default)]
struct EventRecorder {
	kinds: Mutex<Vec<ConnectionEventKind>>,
}

#[async_trait]
impl ConnectionEventListener for EventRecorder {
	async fn on_event(&self, event: ConnectionEvent) {
		self.kinds.lock().push(event.kind);
	}
}

/// MySQL flavoured dialect reporting no savepoint support
struct FlatDialect;

#[async_trait]
impl Dialect for FlatDialect {
	fn driver_name(&self) -> DriverName {
		DriverName::Mysql
	}

	fn supports_savepoint(&self) -> bool {
		false
	}

	async fn load_table_schema(&self, _db: &Connection, _name: &str) -> rock_db::Result<Option<TableSchema>> {
		Ok(None)
	}

	async fn find_table_names(&self, _db: &Connection, _schema: &str) -> rock_db::Result<Vec<String>> {
		Ok(Vec::new())
	}
}

#[fixture]
fn driver() -> MockDriver {
	MockDriver::new()
}

fn connect(driver: &MockDriver, dsn: &str) -> Connection {
	Connection::builder(ConnectionConfig::new(dsn))
		.with_driver(Arc::new(driver.clone()))
		.build()
}

async fn execute(db: &Connection, sql: &str) -> rock_db::Result<u64> {
	db.create_command(sql, Params::new())?.execute().await
}

// ========================================
// Savepoints
// ========================================

#[rstest]
#[tokio::test]
async fn test_three_levels_commit(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");

	// Act
	let transaction = db.begin_transaction(None).await.unwrap();
	db.begin_transaction(None).await.unwrap();
	db.begin_transaction(None).await.unwrap();
	let deepest = transaction.level();
	transaction.commit().await.unwrap();
	transaction.commit().await.unwrap();
	transaction.commit().await.unwrap();

	// Assert
	assert_eq!(deepest, 3);
	assert_eq!(
		driver.sql_log(),
		vec![
			"BEGIN",
			"SAVEPOINT LEVEL1",
			"SAVEPOINT LEVEL2",
			"RELEASE SAVEPOINT LEVEL2",
			"RELEASE SAVEPOINT LEVEL1",
			"COMMIT",
		]
	);
	assert!(db.get_transaction().is_none());
}

#[rstest]
#[tokio::test]
async fn test_sql_server_savepoints_are_not_released(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "sqlsrv:Server=localhost;Database=app");

	// Act
	let transaction = db.begin_transaction(None).await.unwrap();
	db.begin_transaction(None).await.unwrap();
	transaction.commit().await.unwrap();
	transaction.commit().await.unwrap();

	// Assert
	assert_eq!(
		driver.sql_log(),
		vec!["BEGIN TRANSACTION", "SAVE TRANSACTION LEVEL1", "COMMIT TRANSACTION"]
	);
}

#[rstest]
#[tokio::test]
async fn test_begin_reuses_active_transaction(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");
	let outer = db.begin_transaction(None).await.unwrap();

	// Act
	let inner = db.begin_transaction(None).await.unwrap();

	// Assert
	assert_eq!(outer.level(), 2);
	assert_eq!(inner.level(), 2);
	assert_eq!(db.get_transaction().map(|t| t.level()), Some(2));
}

#[rstest]
#[tokio::test]
async fn test_isolation_level_only_applies_to_outer_begin(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");

	// Act
	let transaction = db
		.begin_transaction(Some(IsolationLevel::Serializable))
		.await
		.unwrap();
	db.begin_transaction(Some(IsolationLevel::ReadCommitted))
		.await
		.unwrap();
	transaction.roll_back().await.unwrap();
	transaction.roll_back().await.unwrap();

	// Assert
	assert_eq!(
		driver.sql_log(),
		vec![
			"SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
			"BEGIN",
			"SAVEPOINT LEVEL1",
			"ROLLBACK TO SAVEPOINT LEVEL1",
			"ROLLBACK",
		]
	);
}

#[rstest]
#[tokio::test]
async fn test_disabled_savepoints_refuse_nested_rollback(driver: MockDriver) {
	// Arrange
	let db = Connection::builder(ConnectionConfig::new("mysql:host=a").with_enable_savepoint(false))
		.with_driver(Arc::new(driver.clone()))
		.build();
	let transaction = db.begin_transaction(None).await.unwrap();
	db.begin_transaction(None).await.unwrap();

	// Act
	let result = transaction.roll_back().await;

	// Assert
	assert!(matches!(result, Err(DbError::UnsupportedOperation(_))));
	assert_eq!(transaction.level(), 1);
	assert_eq!(driver.sql_log(), vec!["BEGIN"]);
}

#[rstest]
#[tokio::test]
async fn test_dialect_without_savepoints_only_counts_levels(driver: MockDriver) {
	// Arrange
	let db = Connection::builder(ConnectionConfig::new("mysql:host=a"))
		.with_driver(Arc::new(driver.clone()))
		.with_dialect(Arc::new(FlatDialect))
		.build();

	// Act
	let transaction = db.begin_transaction(None).await.unwrap();
	db.begin_transaction(None).await.unwrap();
	let nested = transaction.level();
	transaction.commit().await.unwrap();
	transaction.commit().await.unwrap();

	// Assert
	assert_eq!(nested, 2);
	assert_eq!(driver.sql_log(), vec!["BEGIN", "COMMIT"]);
}

// ========================================
// Callback transactions
// ========================================

#[rstest]
#[tokio::test]
async fn test_callback_error_rolls_back_and_is_returned(driver: MockDriver) {
	// Arrange
	driver.fail_statement("INSERT");
	let db = connect(&driver, "mysql:host=a");

	// Act
	let result = db
		.transaction(
			|db| async move { execute(&db, "INSERT INTO t VALUES (1)").await },
			None,
		)
		.await;

	// Assert
	assert!(matches!(result, Err(DbError::Driver { .. })));
	assert_eq!(
		driver.sql_log(),
		vec!["BEGIN", "INSERT INTO t VALUES (1)", "ROLLBACK"]
	);
	assert!(db.get_transaction().is_none());
}

#[rstest]
#[tokio::test]
async fn test_nested_callback_failure_only_undoes_inner_level(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");

	// Act
	let result = db
		.transaction(
			|db| async move {
				execute(&db, "UPDATE a SET x = 1").await?;
				let inner = db
					.transaction(
						|db| async move {
							execute(&db, "UPDATE b SET y = 2").await?;
							Err::<(), _>(DbError::InvalidCondition("rejected".to_string()))
						},
						None,
					)
					.await;
				assert!(inner.is_err());
				Ok(())
			},
			None,
		)
		.await;

	// Assert
	assert!(result.is_ok());
	assert_eq!(
		driver.sql_log(),
		vec![
			"BEGIN",
			"UPDATE a SET x = 1",
			"SAVEPOINT LEVEL1",
			"UPDATE b SET y = 2",
			"ROLLBACK TO SAVEPOINT LEVEL1",
			"COMMIT",
		]
	);
}

#[rstest]
#[tokio::test]
async fn test_callback_that_commits_itself_is_not_committed_twice(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");

	// Act
	let result = db
		.transaction(
			|db| async move {
				match db.get_transaction() {
					Some(transaction) => transaction.commit().await,
					None => Ok(()),
				}
			},
			None,
		)
		.await;

	// Assert
	assert!(result.is_ok());
	assert_eq!(driver.count_statements("COMMIT"), 1);
}

#[rstest]
#[tokio::test]
async fn test_failed_begin_does_not_run_callback(driver: MockDriver) {
	// Arrange
	driver.fail_statement("BEGIN");
	let db = connect(&driver, "mysql:host=a");
	let ran = Arc::new(Mutex::new(false));
	let flag = Arc::clone(&ran);

	// Act
	let result = db
		.transaction(
			|_db| async move {
				*flag.lock() = true;
				Ok(())
			},
			None,
		)
		.await;

	// Assert
	assert!(result.is_err());
	assert!(!*ran.lock());
}

// ========================================
// Events and lifecycle
// ========================================

#[rstest]
#[tokio::test]
async fn test_events_fire_for_outer_level_only(driver: MockDriver) {
	// Arrange
	let recorder = Arc::new(EventRecorder::default());
	let db = Connection::builder(ConnectionConfig::new("mysql:host=a"))
		.with_driver(Arc::new(driver.clone()))
		.with_event_listener(recorder.clone())
		.build();

	// Act
	let transaction = db.begin_transaction(None).await.unwrap();
	db.begin_transaction(None).await.unwrap();
	transaction.commit().await.unwrap();
	transaction.commit().await.unwrap();
	let next = db.begin_transaction(None).await.unwrap();
	next.roll_back().await.unwrap();

	// Assert
	assert_eq!(
		*recorder.kinds.lock(),
		vec![
			ConnectionEventKind::AfterOpen,
			ConnectionEventKind::BeforeBeginTransaction,
			ConnectionEventKind::AfterCommit,
			ConnectionEventKind::BeforeBeginTransaction,
			ConnectionEventKind::AfterRollback,
		]
	);
}

#[rstest]
#[tokio::test]
async fn test_close_deactivates_transaction(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");
	let transaction = db.begin_transaction(None).await.unwrap();

	// Act
	db.close().await.unwrap();

	// Assert
	assert!(!transaction.is_active());
	assert!(db.get_transaction().is_none());
	assert!(matches!(
		transaction.commit().await,
		Err(DbError::TransactionState(_))
	));
}

#[rstest]
#[tokio::test]
async fn test_finished_transaction_is_replaced(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");
	let transaction = db.begin_transaction(None).await.unwrap();
	transaction.commit().await.unwrap();

	// Act
	drop(transaction);
	let next = db.begin_transaction(None).await.unwrap();

	// Assert
	assert_eq!(next.level(), 1);
	assert_eq!(driver.count_statements("BEGIN"), 2);
}

#[rstest]
#[tokio::test]
async fn test_dropped_handle_keeps_transaction_open(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");
	drop(db.begin_transaction(None).await.unwrap());

	// Act
	let active = db.get_transaction();
	let nested = db.begin_transaction(None).await.unwrap();

	// Assert
	assert_eq!(active.map(|t| t.level()), Some(2));
	assert_eq!(nested.level(), 2);
	assert_eq!(driver.sql_log(), vec!["BEGIN", "SAVEPOINT LEVEL1"]);
}
