//! SQLite

use super::{Dialect, base_type, field, field_string, field_u32, first_column_strings};
use crate::connection::Connection;
use crate::driver::DriverName;
use crate::error::{DbError, Result};
use crate::schema::table::apply_db_type_details;
use crate::schema::{ColumnSchema, ColumnType, ForeignKey, TableSchema};
use crate::types::{IsolationLevel, QueryValue, Row};
use async_trait::async_trait;
use indexmap::IndexMap;

const TABLE_NAMES_SQL: &str =
	"SELECT DISTINCT tbl_name FROM sqlite_master WHERE tbl_name<>'sqlite_sequence' ORDER BY tbl_name";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

#[async_trait]
impl Dialect for SqliteDialect {
	fn driver_name(&self) -> DriverName {
		DriverName::Sqlite
	}

	fn identifier_quotes(&self) -> (char, char) {
		('`', '`')
	}

	/// SQLite only distinguishes dirty reads from serializable ones
	fn set_isolation_level_sql(&self, level: IsolationLevel) -> Result<String> {
		match level {
			IsolationLevel::Serializable => Ok("PRAGMA read_uncommitted = 0".to_string()),
			IsolationLevel::ReadUncommitted => Ok("PRAGMA read_uncommitted = 1".to_string()),
			other => Err(DbError::NotSupported(format!(
				"sqlite only supports transaction isolation levels READ UNCOMMITTED and SERIALIZABLE, got {}",
				other.to_sql()
			))),
		}
	}

	fn like_escape_char(&self) -> char {
		'!'
	}

	fn like_escape_sql(&self) -> Option<&'static str> {
		Some("ESCAPE '!'")
	}

	fn build_limit(&self, limit: Option<u64>, offset: Option<u64>) -> String {
		let offset = offset.filter(|offset| *offset > 0);
		match (limit, offset) {
			(Some(limit), Some(offset)) => format!("LIMIT {} OFFSET {}", limit, offset),
			(Some(limit), None) => format!("LIMIT {}", limit),
			(None, Some(offset)) => format!("LIMIT -1 OFFSET {}", offset),
			(None, None) => String::new(),
		}
	}

	async fn load_table_schema(&self, db: &Connection, name: &str) -> Result<Option<TableSchema>> {
		let mut table = TableSchema::new(name);

		let sql = format!("PRAGMA table_info({})", self.quote_simple_table_name(name));
		let rows = db.create_command(sql, Default::default())?.query_all().await?;
		if rows.is_empty() {
			return Ok(None);
		}
		for row in &rows {
			table.add_column(column_from_table_info(row));
		}
		// a single integer primary key is an alias of the rowid
		if let [pk] = table.primary_key.as_slice()
			&& let Some(column) = table.columns.get_mut(pk)
			&& column.db_type.starts_with("int")
		{
			column.auto_increment = true;
		}

		let sql = format!("PRAGMA foreign_key_list({})", self.quote_simple_table_name(name));
		let rows = db.create_command(sql, Default::default())?.query_all().await?;
		table.foreign_keys = group_foreign_keys(&rows);

		Ok(Some(table))
	}

	async fn find_table_names(&self, db: &Connection, _schema: &str) -> Result<Vec<String>> {
		let rows = db.create_command(TABLE_NAMES_SQL, Default::default())?.query_all().await?;
		Ok(first_column_strings(&rows))
	}
}

fn sqlite_column_type(base: &str) -> ColumnType {
	match base {
		"tinyint" | "smallint" => ColumnType::SmallInt,
		"bit" | "bool" | "boolean" => ColumnType::Boolean,
		"mediumint" | "int" | "integer" => ColumnType::Integer,
		"bigint" => ColumnType::BigInt,
		"float" | "real" => ColumnType::Float,
		"double" => ColumnType::Double,
		"decimal" | "numeric" => ColumnType::Decimal,
		"tinytext" | "mediumtext" | "longtext" | "text" => ColumnType::Text,
		"char" => ColumnType::Char,
		"blob" => ColumnType::Binary,
		"datetime" => ColumnType::DateTime,
		"year" | "date" => ColumnType::Date,
		"time" => ColumnType::Time,
		"timestamp" => ColumnType::Timestamp,
		_ => ColumnType::String,
	}
}

fn column_from_table_info(row: &Row) -> ColumnSchema {
	let name = field_string(row, "name").unwrap_or_default();
	let db_type = field_string(row, "type").unwrap_or_default().to_ascii_lowercase();

	let mut column = ColumnSchema::new(name, db_type.clone());
	column.allow_null = field_u32(row, "notnull").unwrap_or(0) == 0;
	column.is_primary_key = field_u32(row, "pk").unwrap_or(0) != 0;
	column.unsigned = db_type.contains("unsigned");
	let mut column = column.with_type(sqlite_column_type(&base_type(&db_type)));
	apply_db_type_details(&mut column);

	if !column.is_primary_key {
		column.default_value = match field(row, "dflt_value") {
			None | Some(QueryValue::Null) => None,
			Some(QueryValue::String(raw)) if raw.is_empty() || raw.eq_ignore_ascii_case("null") => None,
			Some(QueryValue::String(raw))
				if column.column_type == ColumnType::Timestamp && raw == "CURRENT_TIMESTAMP" =>
			{
				Some(QueryValue::String(raw.clone()))
			}
			Some(QueryValue::String(raw)) => {
				Some(column.typecast(QueryValue::String(raw.trim_matches(['\'', '"']).to_string())))
			}
			Some(other) => Some(column.typecast(other.clone())),
		};
	}
	column
}

/// Rows of `PRAGMA foreign_key_list` grouped by constraint id
fn group_foreign_keys(rows: &[Row]) -> Vec<ForeignKey> {
	let mut keys: IndexMap<i64, ForeignKey> = IndexMap::new();
	for row in rows {
		let (Some(QueryValue::Int(id)), Some(table), Some(from), Some(to)) = (
			field(row, "id"),
			field_string(row, "table"),
			field_string(row, "from"),
			field_string(row, "to"),
		) else {
			continue;
		};
		keys.entry(*id)
			.or_insert_with(|| ForeignKey {
				name: None,
				foreign_table: table,
				columns: IndexMap::new(),
			})
			.columns
			.insert(from, to);
	}
	keys.into_values().collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::row;
	use rstest::rstest;

	#[rstest]
	#[case(IsolationLevel::Serializable, "PRAGMA read_uncommitted = 0")]
	#[case(IsolationLevel::ReadUncommitted, "PRAGMA read_uncommitted = 1")]
	fn test_supported_isolation_levels(#[case] level: IsolationLevel, #[case] expected: &str) {
		assert_eq!(SqliteDialect.set_isolation_level_sql(level).unwrap(), expected);
	}

	#[rstest]
	#[case(IsolationLevel::ReadCommitted)]
	#[case(IsolationLevel::RepeatableRead)]
	fn test_unsupported_isolation_levels(#[case] level: IsolationLevel) {
		// Act
		let result = SqliteDialect.set_isolation_level_sql(level);

		// Assert
		assert!(matches!(result, Err(DbError::NotSupported(_))));
	}

	#[rstest]
	fn test_like_escape_clause() {
		assert_eq!(SqliteDialect.like_escape_sql(), Some("ESCAPE '!'"));
	}

	#[rstest]
	fn test_offset_without_limit() {
		assert_eq!(SqliteDialect.build_limit(None, Some(3)), "LIMIT -1 OFFSET 3");
	}

	#[rstest]
	fn test_column_from_table_info() {
		// Arrange
		let info = row(&[
			("cid", QueryValue::Int(1)),
			("name", "status".into()),
			("type", "VARCHAR(16)".into()),
			("notnull", QueryValue::Int(1)),
			("dflt_value", "'draft'".into()),
			("pk", QueryValue::Int(0)),
		]);

		// Act
		let column = column_from_table_info(&info);

		// Assert
		assert_eq!(column.db_type, "varchar(16)");
		assert_eq!(column.size, Some(16));
		assert!(!column.allow_null);
		assert_eq!(column.default_value, Some(QueryValue::from("draft")));
	}

	#[rstest]
	fn test_group_foreign_keys_by_id() {
		// Arrange
		let rows = vec![
			row(&[
				("id", QueryValue::Int(0)),
				("seq", QueryValue::Int(0)),
				("table", "customer".into()),
				("from", "customer_id".into()),
				("to", "id".into()),
			]),
			row(&[
				("id", QueryValue::Int(1)),
				("seq", QueryValue::Int(0)),
				("table", "item".into()),
				("from", "item_id".into()),
				("to", "id".into()),
			]),
		];

		// Act
		let keys = group_foreign_keys(&rows);

		// Assert
		assert_eq!(keys.len(), 2);
		assert_eq!(keys[0].foreign_table, "customer");
	}
}
