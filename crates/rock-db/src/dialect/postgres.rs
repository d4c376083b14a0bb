//! PostgreSQL

use super::{
	Dialect, field_flag, field_string, field_u32, first_column_strings, split_table_name,
};
use crate::connection::Connection;
use crate::driver::DriverName;
use crate::error::Result;
use crate::schema::{ColumnSchema, ColumnType, ForeignKey, TableSchema};
use crate::types::{QueryValue, Row};
use async_trait::async_trait;
use indexmap::IndexMap;

const DEFAULT_SCHEMA: &str = "public";

// information_schema exposes domain types (cardinal_number, yes_or_no,
// sql_identifier) which are cast to plain types here
const COLUMNS_SQL: &str = "SELECT c.column_name::text AS column_name, \
	c.udt_name::text AS udt_name, \
	c.is_nullable::text AS is_nullable, \
	c.column_default::text AS column_default, \
	c.character_maximum_length::integer AS size, \
	c.numeric_precision::integer AS numeric_precision, \
	c.numeric_scale::integer AS numeric_scale, \
	col_description((quote_ident(c.table_schema) || '.' || quote_ident(c.table_name))::regclass, c.ordinal_position::integer) AS column_comment, \
	EXISTS (SELECT 1 FROM information_schema.table_constraints tc \
		JOIN information_schema.key_column_usage kcu \
		ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
		WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = c.table_schema \
		AND tc.table_name = c.table_name AND kcu.column_name = c.column_name) AS is_pkey \
	FROM information_schema.columns c \
	WHERE c.table_schema = :schema AND c.table_name = :table \
	ORDER BY c.ordinal_position";

const FOREIGN_KEYS_SQL: &str = "SELECT tc.constraint_name::text AS constraint_name, \
	kcu.column_name::text AS column_name, \
	ccu.table_schema::text AS foreign_table_schema, \
	ccu.table_name::text AS foreign_table_name, \
	ccu.column_name::text AS foreign_column_name \
	FROM information_schema.table_constraints tc \
	JOIN information_schema.key_column_usage kcu \
	ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
	JOIN information_schema.constraint_column_usage ccu \
	ON ccu.constraint_name = tc.constraint_name AND ccu.constraint_schema = tc.table_schema \
	WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = :schema AND tc.table_name = :table \
	ORDER BY tc.constraint_name, kcu.ordinal_position";

const TABLE_NAMES_SQL: &str = "SELECT table_name::text AS table_name \
	FROM information_schema.tables \
	WHERE table_schema = :schema AND table_type = 'BASE TABLE' \
	ORDER BY table_name";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

#[async_trait]
impl Dialect for PostgresDialect {
	fn driver_name(&self) -> DriverName {
		DriverName::Postgres
	}

	fn placeholder(&self, index: usize) -> String {
		format!("${}", index)
	}

	// SET TRANSACTION only affects the transaction it runs in
	fn sets_isolation_before_begin(&self) -> bool {
		false
	}

	fn charset_sql(&self, charset: &str) -> Option<String> {
		Some(format!("SET NAMES {}", self.quote_value(charset)))
	}

	fn last_insert_id_sql(&self, sequence: Option<&str>) -> Option<String> {
		Some(match sequence {
			Some(sequence) => format!("SELECT currval({})", self.quote_value(sequence)),
			None => "SELECT lastval()".to_string(),
		})
	}

	fn default_schema(&self) -> Option<&'static str> {
		Some(DEFAULT_SCHEMA)
	}

	async fn load_table_schema(&self, db: &Connection, name: &str) -> Result<Option<TableSchema>> {
		let (schema, table_name) = split_table_name(name);
		let schema = schema.unwrap_or(DEFAULT_SCHEMA);
		let mut table = if schema == DEFAULT_SCHEMA {
			let mut table = TableSchema::new(table_name);
			table.schema_name = Some(DEFAULT_SCHEMA.to_string());
			table
		} else {
			TableSchema::new(table_name).with_schema_name(schema)
		};

		let rows = db
			.create_command(COLUMNS_SQL, Default::default())?
			.bind_value(":schema", schema)
			.bind_value(":table", table_name)
			.query_all()
			.await?;
		if rows.is_empty() {
			return Ok(None);
		}
		for row in &rows {
			let column = column_from_row(row);
			if column.is_primary_key
				&& let Some(sequence) = column.default_value.as_ref().and_then(sequence_from_default)
			{
				table.sequence_name = Some(sequence);
			}
			table.add_column(column);
		}
		// nextval() defaults are not values; drop them once the sequence is known
		for column in table.columns.values_mut() {
			if column.default_value.as_ref().and_then(sequence_from_default).is_some() {
				column.default_value = None;
				column.auto_increment = true;
			}
		}

		let rows = db
			.create_command(FOREIGN_KEYS_SQL, Default::default())?
			.bind_value(":schema", schema)
			.bind_value(":table", table_name)
			.query_all()
			.await?;
		table.foreign_keys = group_foreign_keys(&rows);

		Ok(Some(table))
	}

	async fn find_table_names(&self, db: &Connection, schema: &str) -> Result<Vec<String>> {
		let schema = if schema.is_empty() { DEFAULT_SCHEMA } else { schema };
		let rows = db
			.create_command(TABLE_NAMES_SQL, Default::default())?
			.bind_value(":schema", schema)
			.query_all()
			.await?;
		Ok(first_column_strings(&rows))
	}
}

fn postgres_column_type(udt_name: &str) -> ColumnType {
	match udt_name {
		"bit" | "varbit" => ColumnType::Integer,
		"bool" | "boolean" => ColumnType::Boolean,
		"int2" | "smallint" => ColumnType::SmallInt,
		"int4" | "int" | "integer" | "serial" => ColumnType::Integer,
		"int8" | "bigint" | "bigserial" => ColumnType::BigInt,
		"float4" | "real" => ColumnType::Float,
		"float8" | "double precision" => ColumnType::Double,
		"numeric" | "decimal" => ColumnType::Decimal,
		"money" => ColumnType::Money,
		"bpchar" | "char" | "character" => ColumnType::Char,
		"text" => ColumnType::Text,
		"bytea" => ColumnType::Binary,
		"timestamp" | "timestamptz" => ColumnType::Timestamp,
		"date" => ColumnType::Date,
		"time" | "timetz" => ColumnType::Time,
		_ => ColumnType::String,
	}
}

fn column_from_row(row: &Row) -> ColumnSchema {
	let name = field_string(row, "column_name").unwrap_or_default();
	let udt_name = field_string(row, "udt_name").unwrap_or_default();

	let mut column = ColumnSchema::new(name, udt_name.clone()).with_type(postgres_column_type(&udt_name));
	column.allow_null = field_flag(row, "is_nullable");
	column.is_primary_key = field_flag(row, "is_pkey");
	column.size = field_u32(row, "size");
	column.precision = field_u32(row, "numeric_precision").or(column.size);
	column.scale = field_u32(row, "numeric_scale");
	column.comment = field_string(row, "column_comment");
	column.default_value = field_string(row, "column_default").and_then(|raw| parse_default(&column, &raw));
	column
}

/// Interpret a `column_default` expression such as `'abc'::character varying`,
/// `42` or `nextval('users_id_seq'::regclass)`
fn parse_default(column: &ColumnSchema, raw: &str) -> Option<QueryValue> {
	let raw = raw.trim();
	if raw.is_empty() || raw.eq_ignore_ascii_case("null") || raw.starts_with("NULL::") {
		return None;
	}
	if raw.to_ascii_lowercase().starts_with("nextval(") {
		return Some(QueryValue::String(raw.to_string()));
	}
	if column.column_type == ColumnType::Timestamp && raw.eq_ignore_ascii_case("now()") {
		return Some(QueryValue::String("CURRENT_TIMESTAMP".to_string()));
	}
	if let Some(rest) = raw.strip_prefix('\'')
		&& let Some(end) = rest.find("'::")
	{
		return Some(column.typecast(QueryValue::String(rest[..end].replace("''", "'"))));
	}
	let literal = raw.split("::").next().unwrap_or(raw).trim_matches(|c| c == '(' || c == ')');
	Some(column.typecast(QueryValue::String(literal.to_string())))
}

fn sequence_from_default(default: &QueryValue) -> Option<String> {
	let QueryValue::String(raw) = default else {
		return None;
	};
	let inner = raw.strip_prefix("nextval(")?;
	let name = inner
		.trim_end_matches(')')
		.trim_end_matches("::regclass")
		.trim_matches('\'');
	Some(name.to_string())
}

fn group_foreign_keys(rows: &[Row]) -> Vec<ForeignKey> {
	let mut keys: IndexMap<String, ForeignKey> = IndexMap::new();
	for row in rows {
		let (Some(name), Some(column), Some(foreign_table), Some(foreign_column)) = (
			field_string(row, "constraint_name"),
			field_string(row, "column_name"),
			field_string(row, "foreign_table_name"),
			field_string(row, "foreign_column_name"),
		) else {
			continue;
		};
		let foreign_table = match field_string(row, "foreign_table_schema") {
			Some(schema) if schema != DEFAULT_SCHEMA => format!("{}.{}", schema, foreign_table),
			_ => foreign_table,
		};
		keys.entry(name.clone())
			.or_insert_with(|| ForeignKey {
				name: Some(name),
				foreign_table,
				columns: IndexMap::new(),
			})
			.columns
			.insert(column, foreign_column);
	}
	keys.into_values().collect()
}
