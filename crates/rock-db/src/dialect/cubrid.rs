//! CUBRID

use super::mysql::{MAX_LIMIT, column_from_show_columns};
use super::{Dialect, first_column_strings, missing_table_on_driver_error};
use crate::connection::Connection;
use crate::driver::DriverName;
use crate::error::Result;
use crate::schema::{ColumnType, TableSchema};
use crate::types::{IsolationLevel, Savepoint};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct CubridDialect;

#[async_trait]
impl Dialect for CubridDialect {
	fn driver_name(&self) -> DriverName {
		DriverName::Cubrid
	}

	fn release_savepoint_sql(&self, _savepoint: &Savepoint) -> Option<String> {
		None
	}

	/// CUBRID names isolation levels by number
	fn set_isolation_level_sql(&self, level: IsolationLevel) -> Result<String> {
		let level = match level {
			IsolationLevel::Serializable => 6,
			IsolationLevel::RepeatableRead => 5,
			IsolationLevel::ReadCommitted => 4,
			IsolationLevel::ReadUncommitted => 3,
		};
		Ok(format!("SET TRANSACTION ISOLATION LEVEL {}", level))
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
		let mut table = TableSchema::new(name);
		let sql = format!("SHOW FULL COLUMNS FROM {}", self.quote_table_name(name));
		let rows = db.create_command(sql, Default::default())?.query_all().await;
		let Some(rows) = missing_table_on_driver_error(rows, name)? else {
			return Ok(None);
		};
		if rows.is_empty() {
			return Ok(None);
		}
		for row in &rows {
			table.add_column(column_from_show_columns(row, cubrid_column_type));
		}
		Ok(Some(table))
	}

	async fn find_table_names(&self, db: &Connection, _schema: &str) -> Result<Vec<String>> {
		let rows = db
			.create_command(
				"SELECT class_name FROM db_class WHERE is_system_class = 'NO' AND class_type = 'CLASS' ORDER BY class_name",
				Default::default(),
			)?
			.query_all()
			.await?;
		Ok(first_column_strings(&rows))
	}
}

fn cubrid_column_type(base: &str) -> ColumnType {
	match base {
		"short" | "smallint" => ColumnType::SmallInt,
		"int" | "integer" => ColumnType::Integer,
		"bigint" => ColumnType::BigInt,
		"numeric" | "decimal" => ColumnType::Decimal,
		"float" | "real" => ColumnType::Float,
		"double" => ColumnType::Double,
		"monetary" => ColumnType::Money,
		"date" => ColumnType::Date,
		"time" => ColumnType::Time,
		"timestamp" => ColumnType::Timestamp,
		"datetime" => ColumnType::DateTime,
		"char" | "nchar" => ColumnType::Char,
		"bit" | "blob" => ColumnType::Binary,
		"clob" => ColumnType::Text,
		_ => ColumnType::String,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(IsolationLevel::Serializable, "SET TRANSACTION ISOLATION LEVEL 6")]
	#[case(IsolationLevel::ReadUncommitted, "SET TRANSACTION ISOLATION LEVEL 3")]
	fn test_numbered_isolation_levels(#[case] level: IsolationLevel, #[case] expected: &str) {
		assert_eq!(CubridDialect.set_isolation_level_sql(level).unwrap(), expected);
	}

	#[rstest]
	fn test_quotes_and_savepoints() {
		assert_eq!(CubridDialect.quote_table_name("t"), "\"t\"");
		assert_eq!(CubridDialect.release_savepoint_sql(&Savepoint::for_level(1)), None);
	}

	#[rstest]
	#[case("varchar", ColumnType::String)]
	#[case("clob", ColumnType::Text)]
	#[case("short", ColumnType::SmallInt)]
	fn test_column_types(#[case] base: &str, #[case] expected: ColumnType) {
		assert_eq!(cubrid_column_type(base), expected);
	}
}
