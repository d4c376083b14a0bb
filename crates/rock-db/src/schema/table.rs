//! Table and column metadata

use crate::types::QueryValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Abstract column type shared by every dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
	Pk,
	BigPk,
	Char,
	String,
	Text,
	SmallInt,
	Integer,
	BigInt,
	Float,
	Double,
	Decimal,
	DateTime,
	Timestamp,
	Time,
	Date,
	Binary,
	Boolean,
	Money,
}

/// Type raw driver values are converted to by [`ColumnSchema::typecast`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeType {
	Integer,
	Double,
	Boolean,
	String,
	Bytes,
}

/// Metadata of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
	pub name: String,
	pub allow_null: bool,
	/// Abstract type
	pub column_type: ColumnType,
	/// Type values are typecast to
	pub native_type: NativeType,
	/// Type as reported by the database, e.g. `varchar(255)`
	pub db_type: String,
	pub default_value: Option<QueryValue>,
	pub enum_values: Vec<String>,
	pub size: Option<u32>,
	pub precision: Option<u32>,
	pub scale: Option<u32>,
	pub is_primary_key: bool,
	pub auto_increment: bool,
	pub unsigned: bool,
	pub comment: Option<String>,
}

impl ColumnSchema {
	/// Column with the given name and database type, everything else defaulted
	pub fn new(name: impl Into<String>, db_type: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			allow_null: true,
			column_type: ColumnType::String,
			native_type: NativeType::String,
			db_type: db_type.into(),
			default_value: None,
			enum_values: Vec::new(),
			size: None,
			precision: None,
			scale: None,
			is_primary_key: false,
			auto_increment: false,
			unsigned: false,
			comment: None,
		}
	}

	/// Set the abstract type and derive the native type from it
	pub fn with_type(mut self, column_type: ColumnType) -> Self {
		self.column_type = column_type;
		self.native_type = native_type_for(column_type, self.unsigned);
		self
	}

	/// Re-derive the native type after `column_type` or `unsigned` changed
	pub fn refresh_native_type(&mut self) {
		self.native_type = native_type_for(self.column_type, self.unsigned);
	}

	/// Convert a raw driver value to this column's native type
	///
	/// Empty strings become NULL for every column that is not a string,
	/// text or binary column. Values that cannot be converted are returned
	/// unchanged.
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::schema::{ColumnSchema, ColumnType};
	/// use rock_db::QueryValue;
	///
	/// let id = ColumnSchema::new("id", "int(11)").with_type(ColumnType::Integer);
	/// assert_eq!(id.typecast(QueryValue::from("42")), QueryValue::Int(42));
	/// assert_eq!(id.typecast(QueryValue::from("")), QueryValue::Null);
	///
	/// let name = ColumnSchema::new("name", "varchar(64)").with_type(ColumnType::String);
	/// assert_eq!(name.typecast(QueryValue::Int(5)), QueryValue::from("5"));
	/// assert_eq!(name.typecast(QueryValue::from("")), QueryValue::from(""));
	/// ```
	pub fn typecast(&self, value: QueryValue) -> QueryValue {
		if let QueryValue::String(s) = &value
			&& s.is_empty()
			&& !matches!(
				self.column_type,
				ColumnType::Text | ColumnType::String | ColumnType::Char | ColumnType::Binary
			) {
			return QueryValue::Null;
		}

		match (self.native_type, value) {
			(_, QueryValue::Null) => QueryValue::Null,
			(NativeType::String, QueryValue::Int(i)) => QueryValue::String(i.to_string()),
			(NativeType::String, QueryValue::Float(f)) => QueryValue::String(f.to_string()),
			(NativeType::String, QueryValue::Bool(b)) => {
				QueryValue::String(if b { "1" } else { "0" }.to_string())
			}
			(NativeType::Integer, QueryValue::String(s)) => match s.trim().parse::<i64>() {
				Ok(i) => QueryValue::Int(i),
				Err(_) => QueryValue::String(s),
			},
			(NativeType::Integer, QueryValue::Bool(b)) => QueryValue::Int(b as i64),
			(NativeType::Integer, QueryValue::Float(f)) => QueryValue::Int(f as i64),
			(NativeType::Double, QueryValue::String(s)) => match s.trim().parse::<f64>() {
				Ok(f) => QueryValue::Float(f),
				Err(_) => QueryValue::String(s),
			},
			(NativeType::Double, QueryValue::Int(i)) => QueryValue::Float(i as f64),
			(NativeType::Boolean, QueryValue::Int(i)) => QueryValue::Bool(i != 0),
			(NativeType::Boolean, QueryValue::String(s)) => {
				match s.trim().to_ascii_lowercase().as_str() {
					"1" | "t" | "true" | "y" | "yes" | "on" => QueryValue::Bool(true),
					"0" | "f" | "false" | "n" | "no" | "off" | "" => QueryValue::Bool(false),
					_ => QueryValue::String(s),
				}
			}
			(NativeType::Bytes, QueryValue::String(s)) => QueryValue::Bytes(s.into_bytes()),
			(_, other) => other,
		}
	}
}

fn native_type_for(column_type: ColumnType, unsigned: bool) -> NativeType {
	match column_type {
		ColumnType::SmallInt | ColumnType::Integer | ColumnType::Pk => NativeType::Integer,
		// unsigned 64 bit values do not fit into i64
		ColumnType::BigInt | ColumnType::BigPk if unsigned => NativeType::String,
		ColumnType::BigInt | ColumnType::BigPk => NativeType::Integer,
		ColumnType::Boolean => NativeType::Boolean,
		ColumnType::Float | ColumnType::Double | ColumnType::Decimal | ColumnType::Money => {
			NativeType::Double
		}
		ColumnType::Binary => NativeType::Bytes,
		_ => NativeType::String,
	}
}

/// Foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
	pub name: Option<String>,
	pub foreign_table: String,
	/// Local column to referenced column
	pub columns: IndexMap<String, String>,
}

/// Metadata of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
	pub schema_name: Option<String>,
	pub name: String,
	/// Name including the schema when it is not the default one
	pub full_name: String,
	pub primary_key: Vec<String>,
	pub sequence_name: Option<String>,
	pub foreign_keys: Vec<ForeignKey>,
	pub columns: IndexMap<String, ColumnSchema>,
}

impl TableSchema {
	pub fn new(name: impl Into<String>) -> Self {
		let name = name.into();
		Self {
			schema_name: None,
			full_name: name.clone(),
			name,
			primary_key: Vec::new(),
			sequence_name: None,
			foreign_keys: Vec::new(),
			columns: IndexMap::new(),
		}
	}

	pub fn with_schema_name(mut self, schema: impl Into<String>) -> Self {
		let schema = schema.into();
		self.full_name = format!("{}.{}", schema, self.name);
		self.schema_name = Some(schema);
		self
	}

	/// Add a column, registering it as primary key when flagged
	pub fn add_column(&mut self, column: ColumnSchema) {
		if column.is_primary_key && !self.primary_key.contains(&column.name) {
			self.primary_key.push(column.name.clone());
		}
		self.columns.insert(column.name.clone(), column);
	}

	pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
		self.columns.get(name)
	}

	pub fn column_names(&self) -> Vec<&str> {
		self.columns.keys().map(String::as_str).collect()
	}

	/// Mark `names` as the primary key
	pub fn fix_primary_key(&mut self, names: &[String]) {
		self.primary_key = names.to_vec();
		for column in self.columns.values_mut() {
			column.is_primary_key = names.contains(&column.name);
		}
	}
}

/// Parse `size`, `precision` and `scale` from a database type like
/// `decimal(10,2)` or `varchar(255)`, and enum values from `enum('a','b')`
pub(crate) fn apply_db_type_details(column: &mut ColumnSchema) {
	let db_type = column.db_type.clone();
	let Some(open) = db_type.find('(') else {
		return;
	};
	let Some(close) = db_type.rfind(')') else {
		return;
	};
	if close <= open {
		return;
	}
	let inner = &db_type[open + 1..close];
	let base = db_type[..open].trim().to_ascii_lowercase();

	if base == "enum" || base == "set" {
		column.enum_values = inner
			.split(',')
			.map(|value| value.trim().trim_matches('\'').replace("''", "'"))
			.collect();
		return;
	}

	let mut parts = inner.split(',').map(|part| part.trim().parse::<u32>().ok());
	let size = parts.next().flatten();
	let scale = parts.next().flatten();
	column.size = size;
	column.precision = size;
	column.scale = scale;
	if column.column_type == ColumnType::Boolean || base == "bit" {
		return;
	}
	// tinyint(1) is the conventional MySQL boolean
	if base == "tinyint" && size == Some(1) {
		column.column_type = ColumnType::Boolean;
		column.refresh_native_type();
	}
}
