//! sqlx backed native driver for MySQL, PostgreSQL and SQLite
//!
//! Each handle wraps exactly one dedicated sqlx connection, so session state
//! such as an open transaction or savepoints stays on the same physical
//! connection for the handle's lifetime.

use super::{ConnectOptions, Driver, DriverHandle, DriverName, QueryResult};
use crate::error::{DbError, Result};
use crate::types::{QueryValue, Row};
use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection as _, Executor, MySql, Postgres, Row as SqlxRow, Sqlite, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::str::FromStr;

/// Driver opening one sqlx connection per handle
///
/// Accepts PDO style DSNs (`mysql:host=localhost;port=3306;dbname=app`,
/// `pgsql:host=localhost;dbname=app`, `sqlite:/path/app.db`,
/// `sqlite::memory:`) as well as sqlx URLs (`postgres://...`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxDriver;

impl SqlxDriver {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl Driver for SqlxDriver {
	async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn DriverHandle>> {
		if options.emulate_prepare.is_some() {
			tracing::debug!(
				dsn = %options.masked_dsn(),
				"Prepare emulation is not configurable for sqlx connections, ignoring"
			);
		}

		let conn = match DriverName::from_dsn(&options.dsn)? {
			DriverName::Mysql => {
				let connect_options = mysql_options(options)?;
				let conn = MySqlConnection::connect_with(&connect_options)
					.await
					.map_err(|e| connect_error(options, e))?;
				NativeConnection::Mysql(conn)
			}
			DriverName::Postgres => {
				let connect_options = postgres_options(options)?;
				let conn = PgConnection::connect_with(&connect_options)
					.await
					.map_err(|e| connect_error(options, e))?;
				NativeConnection::Postgres(conn)
			}
			DriverName::Sqlite => {
				let connect_options = SqliteConnectOptions::from_str(&options.dsn)
					.map_err(|e| connect_error(options, e))?
					.create_if_missing(true);
				let conn = SqliteConnection::connect_with(&connect_options)
					.await
					.map_err(|e| connect_error(options, e))?;
				NativeConnection::Sqlite(conn)
			}
			other => {
				return Err(DbError::NotSupported(format!(
					"No sqlx driver is available for '{}'",
					other
				)));
			}
		};

		Ok(Box::new(SqlxHandle {
			conn,
			last_insert_id: None,
			last_error: None,
		}))
	}
}

fn connect_error(options: &ConnectOptions, err: sqlx::Error) -> DbError {
	DbError::Connection {
		dsn: options.masked_dsn(),
		source: Box::new(err),
	}
}

/// `key=value` pairs after the scheme of a PDO style DSN
fn pdo_params(dsn: &str) -> HashMap<String, String> {
	dsn.split_once(':')
		.map(|(_, rest)| rest)
		.unwrap_or_default()
		.split(';')
		.filter_map(|pair| pair.split_once('='))
		.map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
		.collect()
}

fn parse_port(options: &ConnectOptions, port: &str) -> Result<u16> {
	port.parse().map_err(|_| {
		DbError::Config(format!(
			"Invalid port '{}' in DSN {}",
			port,
			options.masked_dsn()
		))
	})
}

fn mysql_options(options: &ConnectOptions) -> Result<MySqlConnectOptions> {
	let mut connect_options = if options.dsn.contains("://") {
		MySqlConnectOptions::from_str(&options.dsn).map_err(|e| connect_error(options, e))?
	} else {
		let params = pdo_params(&options.dsn);
		let mut connect_options = MySqlConnectOptions::new();
		if let Some(host) = params.get("host") {
			connect_options = connect_options.host(host);
		}
		if let Some(port) = params.get("port") {
			connect_options = connect_options.port(parse_port(options, port)?);
		}
		if let Some(socket) = params.get("unix_socket") {
			connect_options = connect_options.socket(socket);
		}
		if let Some(database) = params.get("dbname") {
			connect_options = connect_options.database(database);
		}
		if let Some(charset) = params.get("charset") {
			connect_options = connect_options.charset(charset);
		}
		connect_options
	};

	if let Some(username) = &options.username {
		connect_options = connect_options.username(username);
	}
	if let Some(password) = &options.password {
		connect_options = connect_options.password(password);
	}
	if let Some(charset) = &options.charset {
		connect_options = connect_options.charset(charset);
	}
	Ok(connect_options)
}

fn postgres_options(options: &ConnectOptions) -> Result<PgConnectOptions> {
	let mut connect_options = if options.dsn.contains("://") {
		PgConnectOptions::from_str(&options.dsn).map_err(|e| connect_error(options, e))?
	} else {
		let params = pdo_params(&options.dsn);
		let mut connect_options = PgConnectOptions::new();
		if let Some(host) = params.get("host") {
			connect_options = connect_options.host(host);
		}
		if let Some(port) = params.get("port") {
			connect_options = connect_options.port(parse_port(options, port)?);
		}
		if let Some(database) = params.get("dbname") {
			connect_options = connect_options.database(database);
		}
		connect_options
	};

	if let Some(username) = &options.username {
		connect_options = connect_options.username(username);
	}
	if let Some(password) = &options.password {
		connect_options = connect_options.password(password);
	}
	Ok(connect_options)
}

enum NativeConnection {
	Mysql(MySqlConnection),
	Postgres(PgConnection),
	Sqlite(SqliteConnection),
}

/// Handle over one sqlx connection
pub struct SqlxHandle {
	conn: NativeConnection,
	last_insert_id: Option<i64>,
	last_error: Option<String>,
}

impl SqlxHandle {
	fn record<T>(&mut self, result: std::result::Result<T, sqlx::Error>) -> Result<T> {
		result.map_err(|e| {
			self.last_error = Some(e.to_string());
			DbError::from(e)
		})
	}
}

#[async_trait]
impl DriverHandle for SqlxHandle {
	async fn execute(&mut self, sql: &str, params: &[QueryValue]) -> Result<QueryResult> {
		// Statements without parameters go through the text protocol, which
		// also accepts transaction control statements on every engine.
		let (rows_affected, insert_id) = match &mut self.conn {
			NativeConnection::Mysql(conn) => {
				let result = if params.is_empty() {
					(&mut *conn).execute(sql).await
				} else {
					bind_mysql(sqlx::query(sql), params).execute(&mut *conn).await
				};
				let done = self.record(result)?;
				let insert_id = i64::try_from(done.last_insert_id()).map_err(|_| {
					DbError::TypeError(format!(
						"Insert id {} exceeds the signed 64-bit range",
						done.last_insert_id()
					))
				})?;
				(done.rows_affected(), Some(insert_id))
			}
			NativeConnection::Postgres(conn) => {
				let result = if params.is_empty() {
					(&mut *conn).execute(sql).await
				} else {
					bind_postgres(sqlx::query(sql), params)
						.execute(&mut *conn)
						.await
				};
				(self.record(result)?.rows_affected(), None)
			}
			NativeConnection::Sqlite(conn) => {
				let result = if params.is_empty() {
					(&mut *conn).execute(sql).await
				} else {
					bind_sqlite(sqlx::query(sql), params)
						.execute(&mut *conn)
						.await
				};
				let done = self.record(result)?;
				(done.rows_affected(), Some(done.last_insert_rowid()))
			}
		};

		if let Some(id) = insert_id.filter(|id| *id != 0) {
			self.last_insert_id = Some(id);
		}
		Ok(QueryResult { rows_affected })
	}

	async fn fetch_all(&mut self, sql: &str, params: &[QueryValue]) -> Result<Vec<Row>> {
		match &mut self.conn {
			NativeConnection::Mysql(conn) => {
				let rows = bind_mysql(sqlx::query(sql), params).fetch_all(&mut *conn).await;
				let rows = self.record(rows)?;
				rows.iter().map(convert_mysql_row).collect()
			}
			NativeConnection::Postgres(conn) => {
				let rows = bind_postgres(sqlx::query(sql), params)
					.fetch_all(&mut *conn)
					.await;
				let rows = self.record(rows)?;
				rows.iter().map(convert_postgres_row).collect()
			}
			NativeConnection::Sqlite(conn) => {
				let rows = bind_sqlite(sqlx::query(sql), params)
					.fetch_all(&mut *conn)
					.await;
				let rows = self.record(rows)?;
				rows.iter().map(convert_sqlite_row).collect()
			}
		}
	}

	fn last_insert_id(&self) -> Option<i64> {
		self.last_insert_id
	}

	fn last_error(&self) -> Option<String> {
		self.last_error.clone()
	}

	async fn close(self: Box<Self>) -> Result<()> {
		match self.conn {
			NativeConnection::Mysql(conn) => conn.close().await?,
			NativeConnection::Postgres(conn) => conn.close().await?,
			NativeConnection::Sqlite(conn) => conn.close().await?,
		}
		Ok(())
	}
}

fn bind_mysql<'q>(
	mut query: sqlx::query::Query<'q, MySql, MySqlArguments>,
	params: &'q [QueryValue],
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
	for value in params {
		query = match value {
			QueryValue::Null => query.bind(None::<i32>),
			QueryValue::Bool(b) => query.bind(b),
			QueryValue::Int(i) => query.bind(i),
			QueryValue::Float(f) => query.bind(f),
			QueryValue::String(s) => query.bind(s),
			QueryValue::Bytes(b) => query.bind(b),
			QueryValue::Timestamp(dt) => query.bind(dt),
			// MySQL stores UUIDs as CHAR(36) or BINARY(16); bind as string
			QueryValue::Uuid(u) => query.bind(u.to_string()),
		};
	}
	query
}

fn bind_postgres<'q>(
	mut query: sqlx::query::Query<'q, Postgres, PgArguments>,
	params: &'q [QueryValue],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
	for value in params {
		query = match value {
			QueryValue::Null => query.bind(None::<i32>),
			QueryValue::Bool(b) => query.bind(b),
			QueryValue::Int(i) => query.bind(i),
			QueryValue::Float(f) => query.bind(f),
			QueryValue::String(s) => query.bind(s),
			QueryValue::Bytes(b) => query.bind(b),
			QueryValue::Timestamp(dt) => query.bind(dt),
			QueryValue::Uuid(u) => query.bind(u),
		};
	}
	query
}

fn bind_sqlite<'q>(
	mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
	params: &'q [QueryValue],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
	for value in params {
		query = match value {
			QueryValue::Null => query.bind(None::<i32>),
			QueryValue::Bool(b) => query.bind(b),
			QueryValue::Int(i) => query.bind(i),
			QueryValue::Float(f) => query.bind(f),
			QueryValue::String(s) => query.bind(s),
			QueryValue::Bytes(b) => query.bind(b),
			QueryValue::Timestamp(dt) => query.bind(dt),
			QueryValue::Uuid(u) => query.bind(u.to_string()),
		};
	}
	query
}

fn unsupported_column(name: &str, type_name: &str) -> DbError {
	DbError::TypeError(format!(
		"Cannot decode column '{}' of type {}",
		name, type_name
	))
}

/// `BIGINT UNSIGNED` values past `i64::MAX` are kept as their decimal text
fn unsigned_value(value: u64) -> QueryValue {
	match i64::try_from(value) {
		Ok(value) => QueryValue::Int(value),
		Err(_) => QueryValue::String(value.to_string()),
	}
}

fn convert_mysql_row(mysql_row: &MySqlRow) -> Result<Row> {
	let mut row = Row::new();
	for column in mysql_row.columns() {
		let column_name = column.name();
		if mysql_row.try_get_raw(column.ordinal())?.is_null() {
			row.insert(column_name, QueryValue::Null);
		} else if let Ok(value) = mysql_row.try_get::<bool, _>(column_name) {
			row.insert(column_name, QueryValue::Bool(value));
		} else if let Ok(value) = mysql_row.try_get::<i64, _>(column_name) {
			row.insert(column_name, QueryValue::Int(value));
		} else if let Ok(value) = mysql_row.try_get::<u64, _>(column_name) {
			row.insert(column_name, unsigned_value(value));
		} else if let Ok(value) = mysql_row.try_get::<f64, _>(column_name) {
			row.insert(column_name, QueryValue::Float(value));
		} else if let Ok(value) = mysql_row.try_get::<String, _>(column_name) {
			row.insert(column_name, QueryValue::String(value));
		} else if let Ok(value) = mysql_row.try_get::<Vec<u8>, _>(column_name) {
			// information_schema reports binary collation columns as blobs
			match String::from_utf8(value) {
				Ok(s) => row.insert(column_name, QueryValue::String(s)),
				Err(e) => row.insert(column_name, QueryValue::Bytes(e.into_bytes())),
			}
		} else if let Ok(value) = mysql_row.try_get::<chrono::NaiveDateTime, _>(column_name) {
			row.insert(
				column_name,
				QueryValue::Timestamp(chrono::DateTime::from_naive_utc_and_offset(
					value,
					chrono::Utc,
				)),
			);
		} else if let Ok(value) = mysql_row.try_get::<chrono::DateTime<chrono::Utc>, _>(column_name)
		{
			row.insert(column_name, QueryValue::Timestamp(value));
		} else {
			return Err(unsupported_column(column_name, column.type_info().name()));
		}
	}
	Ok(row)
}

fn convert_postgres_row(pg_row: &PgRow) -> Result<Row> {
	let mut row = Row::new();
	for column in pg_row.columns() {
		let column_name = column.name();
		if pg_row.try_get_raw(column.ordinal())?.is_null() {
			row.insert(column_name, QueryValue::Null);
		} else if let Ok(value) = pg_row.try_get::<uuid::Uuid, _>(column_name) {
			row.insert(column_name, QueryValue::Uuid(value));
		} else if let Ok(value) = pg_row.try_get::<bool, _>(column_name) {
			row.insert(column_name, QueryValue::Bool(value));
		} else if let Ok(value) = pg_row.try_get::<i64, _>(column_name) {
			row.insert(column_name, QueryValue::Int(value));
		} else if let Ok(value) = pg_row.try_get::<i32, _>(column_name) {
			row.insert(column_name, QueryValue::Int(i64::from(value)));
		} else if let Ok(value) = pg_row.try_get::<i16, _>(column_name) {
			row.insert(column_name, QueryValue::Int(i64::from(value)));
		} else if let Ok(value) = pg_row.try_get::<f64, _>(column_name) {
			row.insert(column_name, QueryValue::Float(value));
		} else if let Ok(value) = pg_row.try_get::<f32, _>(column_name) {
			row.insert(column_name, QueryValue::Float(value as f64));
		} else if let Ok(value) = pg_row.try_get::<String, _>(column_name) {
			row.insert(column_name, QueryValue::String(value));
		} else if let Ok(value) = pg_row.try_get::<Vec<u8>, _>(column_name) {
			row.insert(column_name, QueryValue::Bytes(value));
		} else if let Ok(value) = pg_row.try_get::<chrono::NaiveDateTime, _>(column_name) {
			row.insert(
				column_name,
				QueryValue::Timestamp(chrono::DateTime::from_naive_utc_and_offset(
					value,
					chrono::Utc,
				)),
			);
		} else if let Ok(value) = pg_row.try_get::<chrono::DateTime<chrono::Utc>, _>(column_name) {
			row.insert(column_name, QueryValue::Timestamp(value));
		} else {
			return Err(unsupported_column(column_name, column.type_info().name()));
		}
	}
	Ok(row)
}

fn convert_sqlite_row(sqlite_row: &SqliteRow) -> Result<Row> {
	let mut row = Row::new();
	for column in sqlite_row.columns() {
		let column_name = column.name();
		let ordinal = column.ordinal();
		let storage = {
			let raw = sqlite_row.try_get_raw(ordinal)?;
			if raw.is_null() {
				row.insert(column_name, QueryValue::Null);
				continue;
			}
			raw.type_info().name().to_ascii_uppercase()
		};

		// SQLite stores booleans as integers, the declared type tells them apart
		let declared = column.type_info().name().to_ascii_uppercase();
		let value = if declared.contains("BOOL") {
			QueryValue::Bool(sqlite_row.try_get::<bool, _>(ordinal)?)
		} else {
			match storage.as_str() {
				"INTEGER" => QueryValue::Int(sqlite_row.try_get::<i64, _>(ordinal)?),
				"REAL" => QueryValue::Float(sqlite_row.try_get::<f64, _>(ordinal)?),
				"BLOB" => QueryValue::Bytes(sqlite_row.try_get::<Vec<u8>, _>(ordinal)?),
				_ => QueryValue::String(sqlite_row.try_get::<String, _>(ordinal)?),
			}
		};
		row.insert(column_name, value);
	}
	Ok(row)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_pdo_params() {
		// Arrange & Act
		let params = pdo_params("mysql:host=db1; port=3307;dbname=app;");

		// Assert
		assert_eq!(params.get("host").map(String::as_str), Some("db1"));
		assert_eq!(params.get("port").map(String::as_str), Some("3307"));
		assert_eq!(params.get("dbname").map(String::as_str), Some("app"));
		assert_eq!(params.len(), 3);
	}

	#[rstest]
	#[case(42, QueryValue::Int(42))]
	#[case(i64::MAX as u64, QueryValue::Int(i64::MAX))]
	#[case(u64::MAX, QueryValue::String("18446744073709551615".to_string()))]
	fn test_unsigned_value_never_wraps(#[case] value: u64, #[case] expected: QueryValue) {
		// Act
		let converted = unsigned_value(value);

		// Assert
		assert_eq!(converted, expected);
	}

	#[rstest]
	fn test_invalid_port_is_config_error() {
		// Arrange
		let options = ConnectOptions::new("mysql:host=db1;port=abc");

		// Act
		let result = mysql_options(&options);

		// Assert
		assert!(matches!(result, Err(DbError::Config(_))));
	}

	#[rstest]
	#[tokio::test]
	async fn test_connect_unsupported_engine() {
		// Arrange
		let driver = SqlxDriver::new();
		let options = ConnectOptions::new("oci:dbname=//localhost:1521/xe");

		// Act
		let result = driver.connect(&options).await;

		// Assert
		assert!(matches!(result, Err(DbError::NotSupported(_))));
	}

	#[rstest]
	#[tokio::test]
	async fn test_sqlite_memory_roundtrip() {
		// Arrange
		let driver = SqlxDriver::new();
		let mut handle = driver
			.connect(&ConnectOptions::new("sqlite::memory:"))
			.await
			.unwrap();
		handle
			.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, active BOOLEAN)", &[])
			.await
			.unwrap();

		// Act
		let result = handle
			.execute(
				"INSERT INTO t (name, active) VALUES (?, ?)",
				&[QueryValue::from("alice"), QueryValue::Bool(true)],
			)
			.await
			.unwrap();
		let rows = handle.fetch_all("SELECT * FROM t", &[]).await.unwrap();

		// Assert
		assert_eq!(result.rows_affected, 1);
		assert_eq!(handle.last_insert_id(), Some(1));
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].get::<String>("name").unwrap(), "alice");
		assert_eq!(rows[0].value("active"), Some(&QueryValue::Bool(true)));
	}

	#[rstest]
	#[tokio::test]
	async fn test_sqlite_transaction_control_without_params() {
		// Arrange
		let mut handle = SqlxDriver::new()
			.connect(&ConnectOptions::new("sqlite::memory:"))
			.await
			.unwrap();
		handle.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[]).await.unwrap();

		// Act
		for sql in [
			"BEGIN",
			"INSERT INTO t (id) VALUES (1)",
			"SAVEPOINT LEVEL1",
			"INSERT INTO t (id) VALUES (2)",
			"ROLLBACK TO SAVEPOINT LEVEL1",
			"RELEASE SAVEPOINT LEVEL1",
			"COMMIT",
		] {
			handle.execute(sql, &[]).await.unwrap();
		}
		let rows = handle.fetch_all("SELECT id FROM t", &[]).await.unwrap();

		// Assert
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].get::<i64>("id").unwrap(), 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_sqlite_error_is_recorded() {
		// Arrange
		let mut handle = SqlxDriver::new()
			.connect(&ConnectOptions::new("sqlite::memory:"))
			.await
			.unwrap();

		// Act
		let result = handle.fetch_all("SELECT * FROM missing_table", &[]).await;

		// Assert
		assert!(matches!(result, Err(DbError::Driver { .. })));
		assert!(handle.last_error().unwrap().contains("missing_table"));
	}
}
