//! Test doubles for the driver layer
//!
//! [`MockDriver`] records every connect attempt and statement, can be told
//! to refuse specific DSNs or fail specific statements, and serves scripted
//! result sets for queries. Clones share state, so a test keeps one clone
//! as a spy while the connection under test owns another.

use crate::driver::{ConnectOptions, Driver, DriverHandle, QueryResult};
use crate::error::{DbError, Result};
use crate::types::{QueryValue, Row};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// One statement seen by a mock handle
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
	pub dsn: String,
	pub sql: String,
	pub params: Vec<QueryValue>,
}

#[derive(Default)]
struct MockState {
	connect_attempts: Vec<String>,
	refused_dsns: HashSet<String>,
	statements: Vec<ExecutedStatement>,
	failing_statements: Vec<String>,
	scripted_rows: Vec<(String, Vec<Row>)>,
	rows_affected: u64,
	last_insert_id: Option<i64>,
	closed_handles: usize,
}

/// Recording driver for tests
///
/// # Examples
///
/// ```
/// use rock_db::testing::MockDriver;
/// use rock_db::driver::{ConnectOptions, Driver};
///
/// # async fn example() {
/// let driver = MockDriver::new();
/// driver.refuse("mysql:host=down");
///
/// assert!(driver.connect(&ConnectOptions::new("mysql:host=down")).await.is_err());
/// assert!(driver.connect(&ConnectOptions::new("mysql:host=up")).await.is_ok());
/// assert_eq!(driver.connect_count(), 2);
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(example());
/// ```
#[derive(Clone, Default)]
pub struct MockDriver {
	state: Arc<Mutex<MockState>>,
}

impl MockDriver {
	pub fn new() -> Self {
		let driver = Self::default();
		driver.state.lock().rows_affected = 1;
		driver
	}

	/// Make every connect attempt to `dsn` fail
	pub fn refuse(&self, dsn: impl Into<String>) {
		self.state.lock().refused_dsns.insert(dsn.into());
	}

	/// Accept `dsn` again
	pub fn accept(&self, dsn: &str) {
		self.state.lock().refused_dsns.remove(dsn);
	}

	/// Fail every statement containing `pattern`
	pub fn fail_statement(&self, pattern: impl Into<String>) {
		self.state.lock().failing_statements.push(pattern.into());
	}

	/// Serve `rows` for queries containing `pattern`; the first matching
	/// registration wins
	pub fn on_query(&self, pattern: impl Into<String>, rows: Vec<Row>) {
		self.state.lock().scripted_rows.push((pattern.into(), rows));
	}

	pub fn set_rows_affected(&self, rows: u64) {
		self.state.lock().rows_affected = rows;
	}

	pub fn set_last_insert_id(&self, id: i64) {
		self.state.lock().last_insert_id = Some(id);
	}

	/// Total connect attempts, successful or not
	pub fn connect_count(&self) -> usize {
		self.state.lock().connect_attempts.len()
	}

	/// Connect attempts for one DSN
	pub fn connect_count_for(&self, dsn: &str) -> usize {
		self.state
			.lock()
			.connect_attempts
			.iter()
			.filter(|attempt| attempt.as_str() == dsn)
			.count()
	}

	/// DSNs in connect order
	pub fn connect_attempts(&self) -> Vec<String> {
		self.state.lock().connect_attempts.clone()
	}

	pub fn statements(&self) -> Vec<ExecutedStatement> {
		self.state.lock().statements.clone()
	}

	/// SQL text of every statement in execution order
	pub fn sql_log(&self) -> Vec<String> {
		self.state
			.lock()
			.statements
			.iter()
			.map(|statement| statement.sql.clone())
			.collect()
	}

	/// Number of statements containing `pattern`
	pub fn count_statements(&self, pattern: &str) -> usize {
		self.state
			.lock()
			.statements
			.iter()
			.filter(|statement| statement.sql.contains(pattern))
			.count()
	}

	pub fn clear_log(&self) {
		self.state.lock().statements.clear();
	}

	pub fn closed_handles(&self) -> usize {
		self.state.lock().closed_handles
	}
}

#[async_trait]
impl Driver for MockDriver {
	async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn DriverHandle>> {
		let mut state = self.state.lock();
		state.connect_attempts.push(options.dsn.clone());
		if state.refused_dsns.contains(&options.dsn) {
			return Err(DbError::Connection {
				dsn: options.masked_dsn(),
				source: Box::new(std::io::Error::new(
					std::io::ErrorKind::ConnectionRefused,
					"connection refused",
				)),
			});
		}
		Ok(Box::new(MockHandle {
			dsn: options.dsn.clone(),
			state: Arc::clone(&self.state),
			last_error: None,
		}))
	}
}

struct MockHandle {
	dsn: String,
	state: Arc<Mutex<MockState>>,
	last_error: Option<String>,
}

impl MockHandle {
	fn record(&mut self, sql: &str, params: &[QueryValue]) -> Result<()> {
		let mut state = self.state.lock();
		state.statements.push(ExecutedStatement {
			dsn: self.dsn.clone(),
			sql: sql.to_string(),
			params: params.to_vec(),
		});
		if state
			.failing_statements
			.iter()
			.any(|pattern| sql.contains(pattern.as_str()))
		{
			let message = format!("scripted failure for: {}", sql);
			self.last_error = Some(message.clone());
			return Err(DbError::driver_message(message));
		}
		Ok(())
	}
}

#[async_trait]
impl DriverHandle for MockHandle {
	async fn execute(&mut self, sql: &str, params: &[QueryValue]) -> Result<QueryResult> {
		self.record(sql, params)?;
		Ok(QueryResult {
			rows_affected: self.state.lock().rows_affected,
		})
	}

	async fn fetch_all(&mut self, sql: &str, params: &[QueryValue]) -> Result<Vec<Row>> {
		self.record(sql, params)?;
		let state = self.state.lock();
		Ok(state
			.scripted_rows
			.iter()
			.find(|(pattern, _)| sql.contains(pattern.as_str()))
			.map(|(_, rows)| rows.clone())
			.unwrap_or_default())
	}

	fn last_insert_id(&self) -> Option<i64> {
		self.state.lock().last_insert_id
	}

	fn last_error(&self) -> Option<String> {
		self.last_error.clone()
	}

	async fn close(self: Box<Self>) -> Result<()> {
		self.state.lock().closed_handles += 1;
		Ok(())
	}
}

/// Build a [`Row`] from `(column, value)` pairs
///
/// # Examples
///
/// ```
/// use rock_db::testing::row;
/// use rock_db::QueryValue;
///
/// let r = row(&[("id", QueryValue::Int(1)), ("name", "alice".into())]);
/// assert_eq!(r.get::<i64>("id").unwrap(), 1);
/// ```
pub fn row(columns: &[(&str, QueryValue)]) -> Row {
	columns
		.iter()
		.map(|(name, value)| (name.to_string(), value.clone()))
		.collect()
}
