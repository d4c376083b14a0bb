//! Common type definitions shared by the connection, transaction and query layers

use crate::error::{DbError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	Bytes(Vec<u8>),
	Timestamp(chrono::DateTime<chrono::Utc>),
	Uuid(Uuid),
}

impl QueryValue {
	pub fn is_null(&self) -> bool {
		matches!(self, QueryValue::Null)
	}

	/// Render the value as an SQL literal
	///
	/// Only used for logging and [`Command::raw_sql`](crate::command::Command::raw_sql);
	/// statements sent to a driver always bind values.
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::QueryValue;
	///
	/// assert_eq!(QueryValue::from("O'Hara").to_sql_literal(), "'O''Hara'");
	/// assert_eq!(QueryValue::Null.to_sql_literal(), "NULL");
	/// assert_eq!(QueryValue::from(true).to_sql_literal(), "1");
	/// ```
	pub fn to_sql_literal(&self) -> String {
		match self {
			QueryValue::Null => "NULL".to_string(),
			QueryValue::Bool(true) => "1".to_string(),
			QueryValue::Bool(false) => "0".to_string(),
			QueryValue::Int(i) => i.to_string(),
			QueryValue::Float(f) => f.to_string(),
			QueryValue::String(s) => format!("'{}'", s.replace('\'', "''")),
			QueryValue::Bytes(b) => {
				let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
				format!("X'{}'", hex)
			}
			QueryValue::Timestamp(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
			QueryValue::Uuid(u) => format!("'{}'", u),
		}
	}
}

impl From<&str> for QueryValue {
	fn from(s: &str) -> Self {
		QueryValue::String(s.to_string())
	}
}

impl From<String> for QueryValue {
	fn from(s: String) -> Self {
		QueryValue::String(s)
	}
}

impl From<i64> for QueryValue {
	fn from(i: i64) -> Self {
		QueryValue::Int(i)
	}
}

impl From<i32> for QueryValue {
	fn from(i: i32) -> Self {
		QueryValue::Int(i as i64)
	}
}

impl From<f64> for QueryValue {
	fn from(f: f64) -> Self {
		QueryValue::Float(f)
	}
}

impl From<bool> for QueryValue {
	fn from(b: bool) -> Self {
		QueryValue::Bool(b)
	}
}

impl From<Vec<u8>> for QueryValue {
	fn from(b: Vec<u8>) -> Self {
		QueryValue::Bytes(b)
	}
}

impl From<chrono::DateTime<chrono::Utc>> for QueryValue {
	fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
		QueryValue::Timestamp(dt)
	}
}

impl From<Uuid> for QueryValue {
	fn from(u: Uuid) -> Self {
		QueryValue::Uuid(u)
	}
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
	fn from(value: Option<T>) -> Self {
		value.map_or(QueryValue::Null, Into::into)
	}
}

/// Named statement parameters, `:name` to value, in binding order
pub type Params = IndexMap<String, QueryValue>;

/// Row from query result
///
/// Columns keep the order the driver returned them in, so positional
/// access (`query_scalar`, `query_column`) reads the first column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
	pub data: IndexMap<String, QueryValue>,
}

impl Row {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, key: impl Into<String>, value: QueryValue) {
		self.data.insert(key.into(), value);
	}

	pub fn get<T>(&self, key: &str) -> Result<T>
	where
		T: TryFrom<QueryValue, Error = DbError>,
	{
		self.data
			.get(key)
			.cloned()
			.ok_or_else(|| DbError::ColumnNotFound(key.to_string()))
			.and_then(T::try_from)
	}

	/// Like [`get`](Self::get) but maps SQL NULL to `None`
	pub fn get_opt<T>(&self, key: &str) -> Result<Option<T>>
	where
		T: TryFrom<QueryValue, Error = DbError>,
	{
		match self.data.get(key) {
			None => Err(DbError::ColumnNotFound(key.to_string())),
			Some(QueryValue::Null) => Ok(None),
			Some(value) => T::try_from(value.clone()).map(Some),
		}
	}

	pub fn value(&self, key: &str) -> Option<&QueryValue> {
		self.data.get(key)
	}

	/// Value of the first column
	pub fn first_value(&self) -> Option<&QueryValue> {
		self.data.values().next()
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}
}

impl FromIterator<(String, QueryValue)> for Row {
	fn from_iter<I: IntoIterator<Item = (String, QueryValue)>>(iter: I) -> Self {
		Self {
			data: iter.into_iter().collect(),
		}
	}
}

// Type conversions for QueryValue
impl TryFrom<QueryValue> for i64 {
	type Error = DbError;

	fn try_from(value: QueryValue) -> Result<Self> {
		match value {
			QueryValue::Int(i) => Ok(i),
			QueryValue::Bool(b) => Ok(b as i64),
			QueryValue::String(ref s) => s
				.trim()
				.parse()
				.map_err(|_| DbError::TypeError(format!("Cannot convert {:?} to i64", value))),
			_ => Err(DbError::TypeError(format!(
				"Cannot convert {:?} to i64",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for i32 {
	type Error = DbError;

	fn try_from(value: QueryValue) -> Result<Self> {
		let i = i64::try_from(value)?;
		i32::try_from(i).map_err(|_| DbError::TypeError(format!("Value {} out of range for i32", i)))
	}
}

impl TryFrom<QueryValue> for u64 {
	type Error = DbError;

	fn try_from(value: QueryValue) -> Result<Self> {
		let i = i64::try_from(value)?;
		u64::try_from(i).map_err(|_| DbError::TypeError(format!("Value {} out of range for u64", i)))
	}
}

impl TryFrom<QueryValue> for String {
	type Error = DbError;

	fn try_from(value: QueryValue) -> Result<Self> {
		match value {
			QueryValue::String(s) => Ok(s),
			QueryValue::Int(i) => Ok(i.to_string()),
			QueryValue::Float(f) => Ok(f.to_string()),
			QueryValue::Uuid(u) => Ok(u.to_string()),
			_ => Err(DbError::TypeError(format!(
				"Cannot convert {:?} to String",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for bool {
	type Error = DbError;

	fn try_from(value: QueryValue) -> Result<Self> {
		match value {
			QueryValue::Bool(b) => Ok(b),
			QueryValue::Int(i) => Ok(i != 0),
			_ => Err(DbError::TypeError(format!(
				"Cannot convert {:?} to bool",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for f64 {
	type Error = DbError;

	fn try_from(value: QueryValue) -> Result<Self> {
		match value {
			QueryValue::Float(f) => Ok(f),
			QueryValue::Int(i) => Ok(i as f64),
			_ => Err(DbError::TypeError(format!(
				"Cannot convert {:?} to f64",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for chrono::DateTime<chrono::Utc> {
	type Error = DbError;

	fn try_from(value: QueryValue) -> Result<Self> {
		match value {
			QueryValue::Timestamp(dt) => Ok(dt),
			_ => Err(DbError::TypeError(format!(
				"Cannot convert {:?} to DateTime<Utc>",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for Uuid {
	type Error = DbError;

	fn try_from(value: QueryValue) -> Result<Self> {
		match value {
			QueryValue::Uuid(u) => Ok(u),
			QueryValue::String(s) => Uuid::parse_str(&s)
				.map_err(|_| DbError::TypeError(format!("Invalid UUID string: {}", s))),
			_ => Err(DbError::TypeError(format!(
				"Cannot convert {:?} to Uuid",
				value
			))),
		}
	}
}

/// Transaction isolation levels
///
/// The SET statement issued for a level is dialect specific, see
/// [`Dialect::set_isolation_level_sql`](crate::dialect::Dialect::set_isolation_level_sql).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
	ReadUncommitted,
	ReadCommitted,
	RepeatableRead,
	Serializable,
}

impl IsolationLevel {
	/// Standard SQL spelling of the level
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::IsolationLevel;
	///
	/// assert_eq!(IsolationLevel::RepeatableRead.to_sql(), "REPEATABLE READ");
	/// ```
	pub fn to_sql(&self) -> &'static str {
		match self {
			IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
			IsolationLevel::ReadCommitted => "READ COMMITTED",
			IsolationLevel::RepeatableRead => "REPEATABLE READ",
			IsolationLevel::Serializable => "SERIALIZABLE",
		}
	}
}

/// Savepoint marking one nesting level of a transaction
///
/// # Examples
///
/// ```
/// use rock_db::Savepoint;
///
/// let sp = Savepoint::for_level(1);
/// assert_eq!(sp.to_sql(), "SAVEPOINT LEVEL1");
/// assert_eq!(sp.release_sql(), "RELEASE SAVEPOINT LEVEL1");
/// assert_eq!(sp.rollback_sql(), "ROLLBACK TO SAVEPOINT LEVEL1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
	name: String,
}

impl Savepoint {
	/// Create a savepoint with a caller supplied name.
	///
	/// Only alphanumeric characters and underscores are allowed and the
	/// name must not start with a digit, since it is spliced into SQL.
	pub fn new(name: impl Into<String>) -> Result<Self> {
		let name = name.into();
		validate_savepoint_name(&name).map_err(DbError::TransactionState)?;
		Ok(Self { name })
	}

	/// Savepoint guarding nesting level `level`
	pub fn for_level(level: usize) -> Self {
		Self {
			name: format!("LEVEL{}", level),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn to_sql(&self) -> String {
		format!("SAVEPOINT {}", self.name)
	}

	pub fn release_sql(&self) -> String {
		format!("RELEASE SAVEPOINT {}", self.name)
	}

	pub fn rollback_sql(&self) -> String {
		format!("ROLLBACK TO SAVEPOINT {}", self.name)
	}
}

fn validate_savepoint_name(name: &str) -> std::result::Result<(), String> {
	if name.is_empty() {
		return Err("Savepoint name cannot be empty".to_string());
	}

	if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
		return Err(format!(
			"Savepoint name '{}' contains invalid characters. Only alphanumeric characters and underscores are allowed",
			name
		));
	}

	if let Some(first_char) = name.chars().next()
		&& first_char.is_ascii_digit()
	{
		return Err(format!(
			"Savepoint name '{}' cannot start with a number",
			name
		));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_savepoint_for_level() {
		// Arrange & Act
		let sp = Savepoint::for_level(3);

		// Assert
		assert_eq!(sp.name(), "LEVEL3");
		assert_eq!(sp.to_sql(), "SAVEPOINT LEVEL3");
	}

	#[rstest]
	#[case("sp1")]
	#[case("my_savepoint_1")]
	#[case("_internal")]
	fn test_savepoint_accepts_valid_name(#[case] name: &str) {
		// Arrange & Act
		let sp = Savepoint::new(name).unwrap();

		// Assert
		assert_eq!(sp.name(), name);
	}

	#[rstest]
	#[case("")]
	#[case("1invalid")]
	#[case("sp 1")]
	#[case("sp1; DROP TABLE users; --")]
	#[case("sp' OR '1'='1")]
	fn test_savepoint_rejects_invalid_name(#[case] name: &str) {
		// Arrange & Act
		let result = Savepoint::new(name);

		// Assert
		assert!(matches!(result, Err(DbError::TransactionState(_))));
	}

	#[rstest]
	fn test_row_preserves_column_order() {
		// Arrange
		let mut row = Row::new();
		row.insert("z", QueryValue::Int(1));
		row.insert("a", QueryValue::Int(2));

		// Act
		let first = row.first_value();

		// Assert
		assert_eq!(first, Some(&QueryValue::Int(1)));
		assert_eq!(row.get::<i64>("a").unwrap(), 2);
	}

	#[rstest]
	fn test_row_get_missing_column() {
		// Arrange
		let row = Row::new();

		// Act
		let result = row.get::<i64>("missing");

		// Assert
		assert!(matches!(result, Err(DbError::ColumnNotFound(name)) if name == "missing"));
	}

	#[rstest]
	fn test_row_get_opt_null() {
		// Arrange
		let mut row = Row::new();
		row.insert("name", QueryValue::Null);

		// Act & Assert
		assert_eq!(row.get_opt::<String>("name").unwrap(), None);
	}

	#[rstest]
	#[case(QueryValue::Int(7), 7)]
	#[case(QueryValue::String(" 42 ".to_string()), 42)]
	#[case(QueryValue::Bool(true), 1)]
	fn test_i64_conversion(#[case] value: QueryValue, #[case] expected: i64) {
		assert_eq!(i64::try_from(value).unwrap(), expected);
	}

	#[rstest]
	fn test_bytes_literal() {
		assert_eq!(QueryValue::Bytes(vec![0xAB, 0x01]).to_sql_literal(), "X'AB01'");
	}
}
