//! MySQL and MariaDB

use super::{
	Dialect, base_type, field, field_flag, field_string, first_column_strings,
	missing_table_on_driver_error, split_table_name,
};
use crate::connection::Connection;
use crate::driver::DriverName;
use crate::error::Result;
use crate::schema::table::apply_db_type_details;
use crate::schema::{ColumnSchema, ColumnType, ForeignKey, TableSchema};
use crate::types::{QueryValue, Row};
use async_trait::async_trait;
use indexmap::IndexMap;

/// Largest value MySQL accepts for LIMIT, used for offset-only paging
pub(crate) const MAX_LIMIT: &str = "18446744073709551615";

const FOREIGN_KEYS_SQL: &str = "SELECT kcu.constraint_name AS constraint_name, \
	kcu.column_name AS column_name, \
	kcu.referenced_table_name AS referenced_table_name, \
	kcu.referenced_column_name AS referenced_column_name \
	FROM information_schema.key_column_usage kcu \
	WHERE kcu.table_schema = COALESCE(:schema, DATABASE()) \
	AND kcu.table_name = :table \
	AND kcu.referenced_table_name IS NOT NULL \
	ORDER BY kcu.constraint_name, kcu.ordinal_position";

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

#[async_trait]
impl Dialect for MySqlDialect {
	fn driver_name(&self) -> DriverName {
		DriverName::Mysql
	}

	fn identifier_quotes(&self) -> (char, char) {
		('`', '`')
	}

	fn quote_value(&self, value: &str) -> String {
		format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
	}

	fn charset_sql(&self, charset: &str) -> Option<String> {
		Some(format!("SET NAMES {}", self.quote_value(charset)))
	}

	fn build_limit(&self, limit: Option<u64>, offset: Option<u64>) -> String {
		let offset = offset.filter(|offset| *offset > 0);
		match (limit, offset) {
			(Some(limit), Some(offset)) => format!("LIMIT {} OFFSET {}", limit, offset),
			(Some(limit), None) => format!("LIMIT {}", limit),
			(None, Some(offset)) => format!("LIMIT {} OFFSET {}", MAX_LIMIT, offset),
			(None, None) => String::new(),
		}
	}

	async fn load_table_schema(&self, db: &Connection, name: &str) -> Result<Option<TableSchema>> {
		let (schema, table_name) = split_table_name(name);
		let mut table = match schema {
			Some(schema) => TableSchema::new(table_name).with_schema_name(schema),
			None => TableSchema::new(table_name),
		};

		let sql = format!("SHOW FULL COLUMNS FROM {}", self.quote_table_name(&table.full_name));
		let rows = db.create_command(sql, Default::default())?.query_all().await;
		let Some(rows) = missing_table_on_driver_error(rows, name)? else {
			return Ok(None);
		};
		if rows.is_empty() {
			return Ok(None);
		}
		for row in &rows {
			table.add_column(column_from_show_columns(row, mysql_column_type));
		}

		let rows = db
			.create_command(FOREIGN_KEYS_SQL, Default::default())?
			.bind_value(":schema", schema.map(str::to_string))
			.bind_value(":table", table_name)
			.query_all()
			.await?;
		table.foreign_keys = group_foreign_keys(&rows);

		Ok(Some(table))
	}

	async fn find_table_names(&self, db: &Connection, schema: &str) -> Result<Vec<String>> {
		let sql = if schema.is_empty() {
			"SHOW TABLES".to_string()
		} else {
			format!("SHOW TABLES FROM {}", self.quote_simple_table_name(schema))
		};
		let rows = db.create_command(sql, Default::default())?.query_all().await?;
		Ok(first_column_strings(&rows))
	}
}

fn mysql_column_type(base: &str) -> ColumnType {
	match base {
		"tinyint" | "smallint" => ColumnType::SmallInt,
		"bit" | "mediumint" | "int" | "integer" => ColumnType::Integer,
		"bigint" => ColumnType::BigInt,
		"float" | "real" => ColumnType::Float,
		"double" => ColumnType::Double,
		"decimal" | "numeric" => ColumnType::Decimal,
		"bool" | "boolean" => ColumnType::Boolean,
		"tinytext" | "mediumtext" | "longtext" | "text" => ColumnType::Text,
		"char" => ColumnType::Char,
		"datetime" => ColumnType::DateTime,
		"year" | "date" => ColumnType::Date,
		"time" => ColumnType::Time,
		"timestamp" => ColumnType::Timestamp,
		"binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
			ColumnType::Binary
		}
		_ => ColumnType::String,
	}
}

/// Column from one row of `SHOW FULL COLUMNS`
///
/// Shared with CUBRID, which reports columns in the same shape.
pub(crate) fn column_from_show_columns(row: &Row, column_type: fn(&str) -> ColumnType) -> ColumnSchema {
	let name = field_string(row, "Field").unwrap_or_default();
	let db_type = field_string(row, "Type").unwrap_or_default();
	let key = field_string(row, "Key").unwrap_or_default();
	let extra = field_string(row, "Extra").unwrap_or_default();

	let mut column = ColumnSchema::new(name, db_type.clone());
	column.allow_null = field_flag(row, "Null");
	column.is_primary_key = key.contains("PRI");
	column.auto_increment = extra.to_ascii_lowercase().contains("auto_increment");
	column.unsigned = db_type.to_ascii_lowercase().contains("unsigned");
	column.comment = field_string(row, "Comment").filter(|comment| !comment.is_empty());

	let base = base_type(&db_type);
	let mut column = column.with_type(column_type(&base));
	apply_db_type_details(&mut column);
	if base == "bit" {
		match column.size {
			Some(1) => column.column_type = ColumnType::Boolean,
			Some(size) if size > 32 => column.column_type = ColumnType::BigInt,
			_ => {}
		}
		column.refresh_native_type();
	}

	if !column.is_primary_key {
		column.default_value = match field(row, "Default") {
			None | Some(QueryValue::Null) => None,
			Some(QueryValue::String(raw))
				if column.column_type == ColumnType::Timestamp && raw == "CURRENT_TIMESTAMP" =>
			{
				Some(QueryValue::String(raw.clone()))
			}
			Some(raw) => Some(column.typecast(raw.clone())),
		};
	}
	column
}

/// Fold rows of (constraint_name, column_name, referenced_table_name,
/// referenced_column_name) into one [`ForeignKey`] per constraint
pub(crate) fn group_foreign_keys(rows: &[Row]) -> Vec<ForeignKey> {
	let mut keys: IndexMap<String, ForeignKey> = IndexMap::new();
	for row in rows {
		let (Some(column), Some(foreign_table), Some(foreign_column)) = (
			field_string(row, "column_name"),
			field_string(row, "referenced_table_name"),
			field_string(row, "referenced_column_name"),
		) else {
			continue;
		};
		let name = field_string(row, "constraint_name");
		let key = keys
			.entry(name.clone().unwrap_or_else(|| foreign_table.clone()))
			.or_insert_with(|| ForeignKey {
				name,
				foreign_table,
				columns: IndexMap::new(),
			});
		key.columns.insert(column, foreign_column);
	}
	keys.into_values().collect()
}
