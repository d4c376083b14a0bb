//! SQL commands
//!
//! A [`Command`] is SQL text plus named parameters, bound to the
//! [`Connection`] that created it. Parameters are written as `:name` in the
//! SQL and rewritten to the dialect's positional placeholders right before
//! execution. Text inside quotes and `::` casts is never treated as a
//! placeholder.

use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::{DbError, Result};
use crate::types::{Params, QueryValue, Row};

/// Normalized parameter name, always with a leading `:`
pub(crate) fn param_name(name: &str) -> String {
	if name.starts_with(':') {
		name.to_string()
	} else {
		format!(":{}", name)
	}
}

/// Walk `sql` and replace every `:name` placeholder outside quoted text
/// with the output of `replace`
fn rewrite_placeholders<F>(sql: &str, mut replace: F) -> Result<String>
where
	F: FnMut(&str) -> Result<String>,
{
	let chars: Vec<char> = sql.chars().collect();
	let mut out = String::with_capacity(sql.len());
	let mut i = 0;
	while i < chars.len() {
		let c = chars[i];
		match c {
			'\'' | '"' | '`' => {
				out.push(c);
				i += 1;
				while i < chars.len() {
					let inner = chars[i];
					out.push(inner);
					i += 1;
					if inner == '\\' && i < chars.len() {
						out.push(chars[i]);
						i += 1;
					} else if inner == c {
						break;
					}
				}
			}
			':' if chars.get(i + 1) == Some(&':') => {
				out.push_str("::");
				i += 2;
			}
			':' if chars
				.get(i + 1)
				.is_some_and(|next| next.is_ascii_alphabetic() || *next == '_') =>
			{
				let start = i;
				i += 1;
				while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
					i += 1;
				}
				let name: String = chars[start..i].iter().collect();
				out.push_str(&replace(&name)?);
			}
			_ => {
				out.push(c);
				i += 1;
			}
		}
	}
	Ok(out)
}

/// SQL statement with bound parameters
///
/// # Examples
///
/// ```
/// use rock_db::{Connection, ConnectionConfig, Params};
///
/// let db = Connection::new(ConnectionConfig::new("mysql:host=localhost"));
/// let command = db
///     .create_command("SELECT * FROM user WHERE name = :name AND age > :age", Params::new())
///     .unwrap()
///     .bind_value(":name", "O'Hara")
///     .bind_value("age", 30);
///
/// assert_eq!(
///     command.raw_sql().unwrap(),
///     "SELECT * FROM user WHERE name = 'O''Hara' AND age > 30"
/// );
/// ```
#[derive(Clone)]
pub struct Command {
	db: Connection,
	sql: String,
	params: Params,
}

impl std::fmt::Debug for Command {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Command")
			.field("sql", &self.sql)
			.field("params", &self.params)
			.finish()
	}
}

impl Command {
	pub(crate) fn new(db: Connection, sql: String, params: Params) -> Self {
		let params = params
			.into_iter()
			.map(|(name, value)| (param_name(&name), value))
			.collect();
		Self { db, sql, params }
	}

	/// Bind one value; the leading `:` of `name` is optional
	pub fn bind_value(mut self, name: &str, value: impl Into<QueryValue>) -> Self {
		self.params.insert(param_name(name), value.into());
		self
	}

	/// Bind several values, replacing values bound under the same names
	pub fn bind_values(mut self, params: Params) -> Self {
		for (name, value) in params {
			self.params.insert(param_name(&name), value);
		}
		self
	}

	pub fn sql(&self) -> &str {
		&self.sql
	}

	pub fn params(&self) -> &Params {
		&self.params
	}

	pub fn connection(&self) -> &Connection {
		&self.db
	}

	/// SQL with every parameter rendered inline, for logging only
	pub fn raw_sql(&self) -> Result<String> {
		rewrite_placeholders(&self.sql, |name| {
			Ok(match self.params.get(name) {
				Some(value) => value.to_sql_literal(),
				None => name.to_string(),
			})
		})
	}

	/// Positional SQL and values for `dialect`
	pub(crate) fn prepare(&self, dialect: &dyn Dialect) -> Result<(String, Vec<QueryValue>)> {
		let mut values = Vec::new();
		let sql = rewrite_placeholders(&self.sql, |name| {
			let value = self
				.params
				.get(name)
				.ok_or_else(|| DbError::UnboundParameter(name.to_string()))?;
			values.push(value.clone());
			Ok(dialect.placeholder(values.len()))
		})?;
		Ok((sql, values))
	}

	/// Run a statement on the master and return the affected row count
	pub async fn execute(&self) -> Result<u64> {
		let (sql, values) = self.prepare(self.db.dialect()?.as_ref())?;
		let result = self.db.execute_sql(&sql, &values).await?;
		Ok(result.rows_affected)
	}

	/// All rows of a query
	pub async fn query_all(&self) -> Result<Vec<Row>> {
		let target = self.db.read_target().await?;
		let (sql, values) = self.prepare(target.dialect()?.as_ref())?;
		target.fetch_all_sql(&sql, &values).await
	}

	/// First row of a query, `None` when there is none
	pub async fn query_one(&self) -> Result<Option<Row>> {
		let target = self.db.read_target().await?;
		let (sql, values) = self.prepare(target.dialect()?.as_ref())?;
		target.fetch_optional_sql(&sql, &values).await
	}

	/// First column of the first row
	pub async fn query_scalar(&self) -> Result<Option<QueryValue>> {
		Ok(self
			.query_one()
			.await?
			.and_then(|row| row.first_value().cloned()))
	}

	/// First column of every row
	pub async fn query_column(&self) -> Result<Vec<QueryValue>> {
		Ok(self
			.query_all()
			.await?
			.iter()
			.filter_map(|row| row.first_value().cloned())
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::ConnectionConfig;
	use crate::dialect::{MySqlDialect, OracleDialect, PostgresDialect};
	use crate::testing::{MockDriver, row};
	use rstest::rstest;
	use std::sync::Arc;

	fn command(sql: &str) -> Command {
		let db = Connection::new(ConnectionConfig::new("mysql:host=localhost"));
		Command::new(db, sql.to_string(), Params::new())
	}

	#[rstest]
	fn test_prepare_positional_per_dialect() {
		// Arrange
		let command = command("SELECT * FROM t WHERE a = :a AND b = :b").bind_value("a", 1).bind_value("b", 2);

		// Act
		let (mysql, values) = command.prepare(&MySqlDialect).unwrap();
		let (pgsql, _) = command.prepare(&PostgresDialect).unwrap();
		let (oracle, _) = command.prepare(&OracleDialect).unwrap();

		// Assert
		assert_eq!(mysql, "SELECT * FROM t WHERE a = ? AND b = ?");
		assert_eq!(pgsql, "SELECT * FROM t WHERE a = $1 AND b = $2");
		assert_eq!(oracle, "SELECT * FROM t WHERE a = :1 AND b = :2");
		assert_eq!(values, vec![QueryValue::Int(1), QueryValue::Int(2)]);
	}

	#[rstest]
	fn test_prepare_skips_quotes_and_casts() {
		// Arrange
		let command = command("SELECT ':skip', 'it\\'s :x', d::text FROM t WHERE a = :a").bind_value("a", "v");

		// Act
		let (sql, values) = command.prepare(&PostgresDialect).unwrap();

		// Assert
		assert_eq!(sql, "SELECT ':skip', 'it\\'s :x', d::text FROM t WHERE a = $1");
		assert_eq!(values, vec![QueryValue::from("v")]);
	}

	#[rstest]
	fn test_prepare_repeated_name() {
		// Arrange
		let command = command("SELECT :a, :a").bind_value("a", 7);

		// Act
		let (sql, values) = command.prepare(&PostgresDialect).unwrap();

		// Assert
		assert_eq!(sql, "SELECT $1, $2");
		assert_eq!(values.len(), 2);
	}

	#[rstest]
	fn test_prepare_unbound_parameter() {
		// Arrange
		let command = command("SELECT :missing");

		// Act
		let result = command.prepare(&MySqlDialect);

		// Assert
		assert!(matches!(result, Err(DbError::UnboundParameter(name)) if name == ":missing"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_query_scalar_and_column() {
		// Arrange
		let driver = MockDriver::new();
		driver.on_query(
			"FROM user",
			vec![
				row(&[("id", QueryValue::Int(1)), ("name", "a".into())]),
				row(&[("id", QueryValue::Int(2)), ("name", "b".into())]),
			],
		);
		let db = Connection::builder(ConnectionConfig::new("mysql:host=a"))
			.with_driver(Arc::new(driver.clone()))
			.build();
		let command = db.create_command("SELECT id, name FROM user", Params::new()).unwrap();

		// Act
		let scalar = command.query_scalar().await.unwrap();
		let column = command.query_column().await.unwrap();

		// Assert
		assert_eq!(scalar, Some(QueryValue::Int(1)));
		assert_eq!(column, vec![QueryValue::Int(1), QueryValue::Int(2)]);
	}
}
