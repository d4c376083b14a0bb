//! DBMS dialects
//!
//! A [`Dialect`] bundles everything that differs between database engines:
//! identifier quoting, transaction and savepoint statements, isolation level
//! syntax, limit syntax and the metadata queries behind
//! [`load_table_schema`](Dialect::load_table_schema) and
//! [`find_table_names`](Dialect::find_table_names).
//!
//! [`dialect_for`] maps a [`DriverName`] to its implementation.

pub mod cubrid;
pub mod mssql;
pub mod mysql;
pub mod oracle;
pub mod postgres;
pub mod sqlite;

use crate::connection::Connection;
use crate::driver::DriverName;
use crate::error::{DbError, Result};
use crate::schema::TableSchema;
use crate::types::{IsolationLevel, QueryValue, Row, Savepoint};
use async_trait::async_trait;
use std::sync::Arc;

pub use cubrid::CubridDialect;
pub use mssql::MssqlDialect;
pub use mysql::MySqlDialect;
pub use oracle::OracleDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// Engine specific SQL generation and metadata loading
#[async_trait]
pub trait Dialect: Send + Sync {
	fn driver_name(&self) -> DriverName;

	/// Opening and closing identifier quote characters
	fn identifier_quotes(&self) -> (char, char) {
		('"', '"')
	}

	/// Quote a table name without schema prefix
	fn quote_simple_table_name(&self, name: &str) -> String {
		let (open, close) = self.identifier_quotes();
		if name.starts_with(open) {
			return name.to_string();
		}
		format!("{}{}{}", open, name, close)
	}

	/// Quote a column name without table prefix; `*` is left alone
	fn quote_simple_column_name(&self, name: &str) -> String {
		let (open, close) = self.identifier_quotes();
		if name == "*" || name.starts_with(open) {
			return name.to_string();
		}
		format!("{}{}{}", open, name, close)
	}

	/// Quote a possibly schema qualified table name
	///
	/// Names containing `(` or `{{` are treated as expressions and returned
	/// unchanged.
	fn quote_table_name(&self, name: &str) -> String {
		if name.contains('(') || name.contains("{{") {
			return name.to_string();
		}
		name.split('.')
			.map(|part| self.quote_simple_table_name(part))
			.collect::<Vec<_>>()
			.join(".")
	}

	/// Quote a possibly table qualified column name
	///
	/// Names containing `(`, `[[` or `{{` are treated as expressions and
	/// returned unchanged.
	fn quote_column_name(&self, name: &str) -> String {
		if name.contains('(') || name.contains("[[") || name.contains("{{") {
			return name.to_string();
		}
		match name.rfind('.') {
			Some(pos) => format!(
				"{}.{}",
				self.quote_table_name(&name[..pos]),
				self.quote_simple_column_name(&name[pos + 1..])
			),
			None => self.quote_simple_column_name(name),
		}
	}

	/// Quote a string literal
	fn quote_value(&self, value: &str) -> String {
		format!("'{}'", value.replace('\'', "''"))
	}

	/// Positional placeholder for the 1-based parameter `index`
	fn placeholder(&self, index: usize) -> String {
		let _ = index;
		"?".to_string()
	}

	/// Every built-in dialect supports savepoints; a custom dialect may
	/// opt out, and `enable_savepoint = false` turns them off per connection
	fn supports_savepoint(&self) -> bool {
		true
	}

	/// Statement starting a transaction; `None` when transactions start
	/// implicitly
	fn begin_transaction_sql(&self) -> Option<&'static str> {
		Some("BEGIN")
	}

	fn commit_sql(&self) -> &'static str {
		"COMMIT"
	}

	fn rollback_sql(&self) -> &'static str {
		"ROLLBACK"
	}

	fn create_savepoint_sql(&self, savepoint: &Savepoint) -> String {
		savepoint.to_sql()
	}

	/// `None` when the engine has no way to release a savepoint; the
	/// savepoint then simply stays until the transaction ends
	fn release_savepoint_sql(&self, savepoint: &Savepoint) -> Option<String> {
		Some(savepoint.release_sql())
	}

	fn rollback_savepoint_sql(&self, savepoint: &Savepoint) -> String {
		savepoint.rollback_sql()
	}

	fn set_isolation_level_sql(&self, level: IsolationLevel) -> Result<String> {
		Ok(format!("SET TRANSACTION ISOLATION LEVEL {}", level.to_sql()))
	}

	/// Whether the isolation level of a new transaction is set before
	/// BEGIN (true) or as the first statement inside it (false)
	fn sets_isolation_before_begin(&self) -> bool {
		true
	}

	/// Statement selecting the connection character set, if the engine has one
	fn charset_sql(&self, charset: &str) -> Option<String> {
		let _ = charset;
		None
	}

	/// Query returning the last generated id; `None` when the native
	/// handle reports it directly
	fn last_insert_id_sql(&self, sequence: Option<&str>) -> Option<String> {
		let _ = sequence;
		None
	}

	/// Character prefixed to LIKE wildcards in escaped values
	fn like_escape_char(&self) -> char {
		'\\'
	}

	/// ESCAPE clause appended to LIKE conditions whose value was escaped,
	/// for engines without a default escape character
	fn like_escape_sql(&self) -> Option<&'static str> {
		None
	}

	/// Schema used when a table name carries none
	fn default_schema(&self) -> Option<&'static str> {
		None
	}

	/// LIMIT/OFFSET clause, empty when neither is set
	fn build_limit(&self, limit: Option<u64>, offset: Option<u64>) -> String {
		let mut clause = Vec::new();
		if let Some(limit) = limit {
			clause.push(format!("LIMIT {}", limit));
		}
		if let Some(offset) = offset.filter(|offset| *offset > 0) {
			clause.push(format!("OFFSET {}", offset));
		}
		clause.join(" ")
	}

	/// Append ORDER BY and paging to a compiled SELECT
	fn build_order_by_and_limit(
		&self,
		sql: String,
		order_by: &str,
		limit: Option<u64>,
		offset: Option<u64>,
	) -> String {
		let mut sql = sql;
		if !order_by.is_empty() {
			sql.push(' ');
			sql.push_str(order_by);
		}
		let limit = self.build_limit(limit, offset);
		if !limit.is_empty() {
			sql.push(' ');
			sql.push_str(&limit);
		}
		sql
	}

	/// Load metadata of `name`, `None` when the table does not exist
	async fn load_table_schema(&self, db: &Connection, name: &str) -> Result<Option<TableSchema>>;

	/// Names of all tables in `schema`; empty means the default schema
	async fn find_table_names(&self, db: &Connection, schema: &str) -> Result<Vec<String>>;
}

/// Dialect registered for `driver`
///
/// # Examples
///
/// ```
/// use rock_db::DriverName;
/// use rock_db::dialect::dialect_for;
///
/// let mysql = dialect_for(DriverName::Mysql);
/// assert_eq!(mysql.quote_column_name("user.id"), "`user`.`id`");
///
/// let mssql = dialect_for(DriverName::Mssql);
/// assert_eq!(mssql.quote_table_name("dbo.users"), "[dbo].[users]");
/// ```
pub fn dialect_for(driver: DriverName) -> Arc<dyn Dialect> {
	match driver {
		DriverName::Mysql => Arc::new(MySqlDialect),
		DriverName::Postgres => Arc::new(PostgresDialect),
		DriverName::Sqlite => Arc::new(SqliteDialect),
		DriverName::Mssql => Arc::new(MssqlDialect),
		DriverName::Oracle => Arc::new(OracleDialect),
		DriverName::Cubrid => Arc::new(CubridDialect),
	}
}

/// Split `schema.table` into its parts
pub(crate) fn split_table_name(name: &str) -> (Option<&str>, &str) {
	match name.rsplit_once('.') {
		Some((schema, table)) => (Some(schema), table),
		None => (None, name),
	}
}

/// Column of a metadata row, matched case-insensitively since engines
/// disagree on the case of information schema column names
pub(crate) fn field<'r>(row: &'r Row, name: &str) -> Option<&'r QueryValue> {
	row.value(name).or_else(|| {
		row.data
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value)
	})
}

pub(crate) fn field_string(row: &Row, name: &str) -> Option<String> {
	match field(row, name)? {
		QueryValue::Null => None,
		QueryValue::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
		value => String::try_from(value.clone()).ok(),
	}
}

pub(crate) fn field_u32(row: &Row, name: &str) -> Option<u32> {
	match field(row, name)? {
		QueryValue::Null => None,
		value => i64::try_from(value.clone())
			.ok()
			.and_then(|i| u32::try_from(i).ok()),
	}
}

/// Truthy metadata flag: `YES`, `Y`, `1`, `true`
pub(crate) fn field_flag(row: &Row, name: &str) -> bool {
	match field(row, name) {
		Some(QueryValue::Bool(b)) => *b,
		Some(QueryValue::Int(i)) => *i != 0,
		Some(QueryValue::String(s)) => {
			matches!(s.to_ascii_uppercase().as_str(), "YES" | "Y" | "1" | "TRUE" | "T")
		}
		_ => false,
	}
}

/// First column of every row as a string
pub(crate) fn first_column_strings(rows: &[Row]) -> Vec<String> {
	rows.iter()
		.filter_map(|row| row.first_value().cloned())
		.filter_map(|value| String::try_from(value).ok())
		.collect()
}

/// Base type of a column definition, `varchar(255) unsigned` -> `varchar`
pub(crate) fn base_type(db_type: &str) -> String {
	db_type
		.split(['(', ' '])
		.next()
		.unwrap_or_default()
		.trim()
		.to_ascii_lowercase()
}

/// Treat a driver failure while reading metadata as "table does not exist"
pub(crate) fn missing_table_on_driver_error<T>(
	result: Result<T>,
	table: &str,
) -> Result<Option<T>> {
	match result {
		Ok(value) => Ok(Some(value)),
		Err(DbError::Driver { message, .. }) => {
			tracing::debug!(table, error = %message, "Table metadata unavailable");
			Ok(None)
		}
		Err(e) => Err(e),
	}
}
