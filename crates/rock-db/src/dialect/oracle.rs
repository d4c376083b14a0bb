//! Oracle

use super::{Dialect, field_string, field_u32, first_column_strings, split_table_name};
use crate::connection::Connection;
use crate::driver::DriverName;
use crate::error::{DbError, Result};
use crate::schema::{ColumnSchema, ColumnType, ForeignKey, TableSchema};
use crate::types::{IsolationLevel, QueryValue, Row, Savepoint};
use async_trait::async_trait;
use indexmap::IndexMap;

const USER_COLUMNS_SQL: &str = "SELECT a.column_name, a.data_type, a.data_precision, a.data_scale, \
	a.data_length, a.nullable, a.data_default, \
	(SELECT d.constraint_type FROM user_cons_columns c \
		INNER JOIN user_constraints d ON d.constraint_name = c.constraint_name \
		WHERE c.table_name = a.table_name AND c.column_name = a.column_name AND d.constraint_type = 'P') AS key_type, \
	com.comments AS column_comment \
	FROM user_tab_columns a \
	LEFT JOIN user_col_comments com ON a.table_name = com.table_name AND a.column_name = com.column_name \
	WHERE a.table_name = :table \
	ORDER BY a.column_id";

const ALL_COLUMNS_SQL: &str = "SELECT a.column_name, a.data_type, a.data_precision, a.data_scale, \
	a.data_length, a.nullable, a.data_default, \
	(SELECT d.constraint_type FROM all_cons_columns c \
		INNER JOIN all_constraints d ON d.owner = c.owner AND d.constraint_name = c.constraint_name \
		WHERE c.owner = a.owner AND c.table_name = a.table_name AND c.column_name = a.column_name \
		AND d.constraint_type = 'P') AS key_type, \
	com.comments AS column_comment \
	FROM all_tab_columns a \
	LEFT JOIN all_col_comments com ON a.owner = com.owner AND a.table_name = com.table_name AND a.column_name = com.column_name \
	WHERE a.owner = :schema AND a.table_name = :table \
	ORDER BY a.column_id";

const SEQUENCE_SQL: &str = "SELECT ud.referenced_name AS sequence_name \
	FROM user_dependencies ud \
	JOIN user_triggers ut ON ut.trigger_name = ud.name \
	WHERE ut.table_name = :table AND ud.type = 'TRIGGER' AND ud.referenced_type = 'SEQUENCE'";

#[derive(Debug, Clone, Copy, Default)]
pub struct OracleDialect;

#[async_trait]
impl Dialect for OracleDialect {
	fn driver_name(&self) -> DriverName {
		DriverName::Oracle
	}

	fn placeholder(&self, index: usize) -> String {
		format!(":{}", index)
	}

	// transactions start implicitly with the first statement
	fn begin_transaction_sql(&self) -> Option<&'static str> {
		None
	}

	fn release_savepoint_sql(&self, _savepoint: &Savepoint) -> Option<String> {
		None
	}

	fn set_isolation_level_sql(&self, level: IsolationLevel) -> Result<String> {
		match level {
			IsolationLevel::ReadCommitted | IsolationLevel::Serializable => {
				Ok(format!("SET TRANSACTION ISOLATION LEVEL {}", level.to_sql()))
			}
			other => Err(DbError::NotSupported(format!(
				"oracle only supports transaction isolation levels READ COMMITTED and SERIALIZABLE, got {}",
				other.to_sql()
			))),
		}
	}

	fn last_insert_id_sql(&self, sequence: Option<&str>) -> Option<String> {
		sequence.map(|sequence| {
			format!(
				"SELECT {}.CURRVAL FROM DUAL",
				self.quote_simple_table_name(sequence)
			)
		})
	}

	/// Paging through a ROWNUM filter over the ordered query
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
		let mut filters = Vec::new();
		if let Some(offset) = offset.filter(|offset| *offset > 0) {
			filters.push(format!("rowNumId > {}", offset));
		}
		if let Some(limit) = limit {
			filters.push(format!("rownum <= {}", limit));
		}
		if filters.is_empty() {
			return sql;
		}
		format!(
			"WITH USER_SQL AS ({}),\n\tPAGINATION AS (SELECT USER_SQL.*, rownum as rowNumId FROM USER_SQL)\nSELECT *\nFROM PAGINATION\nWHERE {}",
			sql,
			filters.join(" AND ")
		)
	}

	async fn load_table_schema(&self, db: &Connection, name: &str) -> Result<Option<TableSchema>> {
		let (schema, table_name) = split_table_name(name);
		let mut table = match schema {
			Some(schema) => TableSchema::new(table_name).with_schema_name(schema),
			None => TableSchema::new(table_name),
		};

		let command = match schema {
			Some(schema) => db
				.create_command(ALL_COLUMNS_SQL, Default::default())?
				.bind_value(":schema", schema),
			None => db.create_command(USER_COLUMNS_SQL, Default::default())?,
		};
		let rows = command.bind_value(":table", table_name).query_all().await?;
		if rows.is_empty() {
			return Ok(None);
		}
		for row in &rows {
			table.add_column(column_from_row(row));
		}

		if schema.is_none() {
			let sequence = db
				.create_command(SEQUENCE_SQL, Default::default())?
				.bind_value(":table", table_name)
				.query_scalar()
				.await?;
			table.sequence_name = sequence.and_then(|value| String::try_from(value).ok());
		}

		let owner = if schema.is_some() { ":schema" } else { "USER" };
		let sql = format!(
			"SELECT c.constraint_name, cc.column_name, r.table_name AS foreign_table, rc.column_name AS foreign_column \
			FROM all_constraints c \
			JOIN all_cons_columns cc ON cc.owner = c.owner AND cc.constraint_name = c.constraint_name \
			JOIN all_constraints r ON r.owner = c.r_owner AND r.constraint_name = c.r_constraint_name \
			JOIN all_cons_columns rc ON rc.owner = r.owner AND rc.constraint_name = r.constraint_name AND rc.position = cc.position \
			WHERE c.constraint_type = 'R' AND c.owner = {} AND c.table_name = :table \
			ORDER BY c.constraint_name, cc.position",
			owner
		);
		let mut command = db.create_command(sql, Default::default())?.bind_value(":table", table_name);
		if let Some(schema) = schema {
			command = command.bind_value(":schema", schema);
		}
		table.foreign_keys = group_foreign_keys(&command.query_all().await?);

		Ok(Some(table))
	}

	async fn find_table_names(&self, db: &Connection, schema: &str) -> Result<Vec<String>> {
		let rows = if schema.is_empty() {
			db.create_command(
				"SELECT table_name FROM user_tables \
				UNION ALL SELECT view_name AS table_name FROM user_views \
				ORDER BY table_name",
				Default::default(),
			)?
			.query_all()
			.await?
		} else {
			db.create_command(
				"SELECT object_name AS table_name FROM all_objects \
				WHERE object_type IN ('TABLE', 'VIEW') AND owner = :schema \
				ORDER BY object_name",
				Default::default(),
			)?
			.bind_value(":schema", schema)
			.query_all()
			.await?
		};
		Ok(first_column_strings(&rows))
	}
}

fn oracle_column_type(data_type: &str, scale: Option<u32>) -> ColumnType {
	let data_type = data_type.to_ascii_uppercase();
	if data_type.contains("FLOAT") || data_type.contains("DOUBLE") {
		ColumnType::Double
	} else if data_type.contains("NUMBER") {
		match scale {
			Some(0) => ColumnType::Integer,
			_ => ColumnType::Decimal,
		}
	} else if data_type.contains("INTEGER") {
		ColumnType::Integer
	} else if data_type.contains("BLOB") {
		ColumnType::Binary
	} else if data_type.contains("CLOB") {
		ColumnType::Text
	} else if data_type.contains("TIMESTAMP") {
		ColumnType::Timestamp
	} else {
		ColumnType::String
	}
}

fn column_from_row(row: &Row) -> ColumnSchema {
	let name = field_string(row, "column_name").unwrap_or_default();
	let data_type = field_string(row, "data_type").unwrap_or_default();
	let scale = field_u32(row, "data_scale");

	let mut column = ColumnSchema::new(name, data_type.clone()).with_type(oracle_column_type(&data_type, scale));
	column.allow_null = field_string(row, "nullable").as_deref() == Some("Y");
	column.is_primary_key = field_string(row, "key_type").as_deref() == Some("P");
	column.size = field_u32(row, "data_length");
	column.precision = field_u32(row, "data_precision");
	column.scale = scale;
	column.comment = field_string(row, "column_comment");

	if !data_type.to_ascii_uppercase().contains("TIMESTAMP") {
		column.default_value = field_string(row, "data_default").and_then(|raw| {
			let raw = raw.trim();
			if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
				return None;
			}
			let literal = if raw.len() > 2 && raw.starts_with('\'') && raw.ends_with('\'') {
				&raw[1..raw.len() - 1]
			} else {
				raw
			};
			Some(column.typecast(QueryValue::String(literal.to_string())))
		});
	}
	column
}

fn group_foreign_keys(rows: &[Row]) -> Vec<ForeignKey> {
	let mut keys: IndexMap<String, ForeignKey> = IndexMap::new();
	for row in rows {
		let (Some(name), Some(column), Some(foreign_table), Some(foreign_column)) = (
			field_string(row, "constraint_name"),
			field_string(row, "column_name"),
			field_string(row, "foreign_table"),
			field_string(row, "foreign_column"),
		) else {
			continue;
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

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::row;
	use rstest::rstest;

	#[rstest]
	fn test_transactions_start_implicitly() {
		assert_eq!(OracleDialect.begin_transaction_sql(), None);
		assert_eq!(OracleDialect.release_savepoint_sql(&Savepoint::for_level(1)), None);
	}

	#[rstest]
	#[case(IsolationLevel::ReadCommitted, true)]
	#[case(IsolationLevel::Serializable, true)]
	#[case(IsolationLevel::ReadUncommitted, false)]
	#[case(IsolationLevel::RepeatableRead, false)]
	fn test_isolation_levels(#[case] level: IsolationLevel, #[case] supported: bool) {
		assert_eq!(OracleDialect.set_isolation_level_sql(level).is_ok(), supported);
	}

	#[rstest]
	fn test_rownum_paging() {
		// Act
		let sql = OracleDialect.build_order_by_and_limit(
			"SELECT * FROM \"T\"".to_string(),
			"ORDER BY \"ID\"",
			Some(10),
			Some(20),
		);

		// Assert
		assert!(sql.starts_with("WITH USER_SQL AS (SELECT * FROM \"T\" ORDER BY \"ID\")"));
		assert!(sql.ends_with("WHERE rowNumId > 20 AND rownum <= 10"));
	}

	#[rstest]
	fn test_no_paging_leaves_sql_alone() {
		assert_eq!(
			OracleDialect.build_order_by_and_limit("SELECT 1 FROM DUAL".to_string(), "", None, Some(0)),
			"SELECT 1 FROM DUAL"
		);
	}

	#[rstest]
	fn test_sequence_currval() {
		assert_eq!(
			OracleDialect.last_insert_id_sql(Some("USER_SEQ")).as_deref(),
			Some("SELECT \"USER_SEQ\".CURRVAL FROM DUAL")
		);
		assert_eq!(OracleDialect.last_insert_id_sql(None), None);
	}

	#[rstest]
	fn test_column_from_row() {
		// Arrange
		let info = row(&[
			("COLUMN_NAME", "ID".into()),
			("DATA_TYPE", "NUMBER".into()),
			("DATA_PRECISION", QueryValue::Int(10)),
			("DATA_SCALE", QueryValue::Int(0)),
			("DATA_LENGTH", QueryValue::Int(22)),
			("NULLABLE", "N".into()),
			("DATA_DEFAULT", QueryValue::Null),
			("KEY_TYPE", "P".into()),
			("COLUMN_COMMENT", QueryValue::Null),
		]);

		// Act
		let column = column_from_row(&info);

		// Assert
		assert_eq!(column.name, "ID");
		assert_eq!(column.column_type, ColumnType::Integer);
		assert!(column.is_primary_key);
		assert!(!column.allow_null);
	}
}
