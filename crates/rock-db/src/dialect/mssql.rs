//! Microsoft SQL Server

use super::{
	Dialect, base_type, field_flag, field_string, field_u32, first_column_strings, split_table_name,
};
use crate::connection::Connection;
use crate::driver::DriverName;
use crate::error::Result;
use crate::schema::{ColumnSchema, ColumnType, ForeignKey, TableSchema};
use crate::types::{QueryValue, Row, Savepoint};
use async_trait::async_trait;
use indexmap::IndexMap;

const DEFAULT_SCHEMA: &str = "dbo";

const COLUMNS_SQL: &str = "SELECT [t1].[column_name], [t1].[is_nullable], [t1].[data_type], \
	[t1].[column_default], [t1].[character_maximum_length], [t1].[numeric_precision], \
	[t1].[numeric_scale], \
	COLUMNPROPERTY(OBJECT_ID([t1].[table_schema] + '.' + [t1].[table_name]), [t1].[column_name], 'IsIdentity') AS is_identity \
	FROM [INFORMATION_SCHEMA].[COLUMNS] AS [t1] \
	WHERE [t1].[table_name] = :table AND [t1].[table_schema] = :schema \
	ORDER BY [t1].[ordinal_position]";

const PRIMARY_KEY_SQL: &str = "SELECT [kcu].[column_name] AS [field_name] \
	FROM [INFORMATION_SCHEMA].[KEY_COLUMN_USAGE] AS [kcu] \
	LEFT JOIN [INFORMATION_SCHEMA].[TABLE_CONSTRAINTS] AS [tc] \
	ON [kcu].[table_schema] = [tc].[table_schema] AND [kcu].[table_name] = [tc].[table_name] \
	AND [kcu].[constraint_name] = [tc].[constraint_name] \
	WHERE [tc].[constraint_type] = 'PRIMARY KEY' AND [kcu].[table_name] = :table AND [kcu].[table_schema] = :schema \
	ORDER BY [kcu].[ordinal_position]";

const FOREIGN_KEYS_SQL: &str = "SELECT [rc].[constraint_name] AS [fk_name], \
	[kcu1].[column_name] AS [fk_column_name], \
	[kcu2].[table_name] AS [uq_table_name], \
	[kcu2].[column_name] AS [uq_column_name] \
	FROM [INFORMATION_SCHEMA].[REFERENTIAL_CONSTRAINTS] AS [rc] \
	JOIN [INFORMATION_SCHEMA].[KEY_COLUMN_USAGE] AS [kcu1] \
	ON [kcu1].[constraint_catalog] = [rc].[constraint_catalog] AND [kcu1].[constraint_schema] = [rc].[constraint_schema] \
	AND [kcu1].[constraint_name] = [rc].[constraint_name] \
	JOIN [INFORMATION_SCHEMA].[KEY_COLUMN_USAGE] AS [kcu2] \
	ON [kcu2].[constraint_catalog] = [rc].[constraint_catalog] AND [kcu2].[constraint_schema] = [rc].[constraint_schema] \
	AND [kcu2].[constraint_name] = [rc].[unique_constraint_name] AND [kcu2].[ordinal_position] = [kcu1].[ordinal_position] \
	WHERE [kcu1].[table_name] = :table AND [kcu1].[table_schema] = :schema";

const TABLE_NAMES_SQL: &str = "SELECT [t].[table_name] FROM [INFORMATION_SCHEMA].[TABLES] AS [t] \
	WHERE [t].[table_schema] = :schema AND [t].[table_type] = 'BASE TABLE' \
	ORDER BY [t].[table_name]";

#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

#[async_trait]
impl Dialect for MssqlDialect {
	fn driver_name(&self) -> DriverName {
		DriverName::Mssql
	}

	fn identifier_quotes(&self) -> (char, char) {
		('[', ']')
	}

	fn begin_transaction_sql(&self) -> Option<&'static str> {
		Some("BEGIN TRANSACTION")
	}

	fn commit_sql(&self) -> &'static str {
		"COMMIT TRANSACTION"
	}

	fn rollback_sql(&self) -> &'static str {
		"ROLLBACK TRANSACTION"
	}

	fn create_savepoint_sql(&self, savepoint: &Savepoint) -> String {
		format!("SAVE TRANSACTION {}", savepoint.name())
	}

	fn release_savepoint_sql(&self, _savepoint: &Savepoint) -> Option<String> {
		None
	}

	fn rollback_savepoint_sql(&self, savepoint: &Savepoint) -> String {
		format!("ROLLBACK TRANSACTION {}", savepoint.name())
	}

	fn last_insert_id_sql(&self, _sequence: Option<&str>) -> Option<String> {
		Some("SELECT CAST(COALESCE(SCOPE_IDENTITY(), @@IDENTITY) AS bigint)".to_string())
	}

	fn default_schema(&self) -> Option<&'static str> {
		Some(DEFAULT_SCHEMA)
	}

	fn build_limit(&self, limit: Option<u64>, offset: Option<u64>) -> String {
		if limit.is_none() && offset.filter(|offset| *offset > 0).is_none() {
			return String::new();
		}
		let mut clause = format!("OFFSET {} ROWS", offset.unwrap_or(0));
		if let Some(limit) = limit {
			clause.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
		}
		clause
	}

	/// OFFSET/FETCH requires an ORDER BY clause
	fn build_order_by_and_limit(
		&self,
		sql: String,
		order_by: &str,
		limit: Option<u64>,
		offset: Option<u64>,
	) -> String {
		let paging = self.build_limit(limit, offset);
		let order_by = if order_by.is_empty() && !paging.is_empty() {
			"ORDER BY (SELECT NULL)"
		} else {
			order_by
		};
		[sql.as_str(), order_by, paging.as_str()]
			.into_iter()
			.filter(|part| !part.is_empty())
			.collect::<Vec<_>>()
			.join(" ")
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
			table.add_column(column_from_row(row));
		}

		let primary_key = db
			.create_command(PRIMARY_KEY_SQL, Default::default())?
			.bind_value(":schema", schema)
			.bind_value(":table", table_name)
			.query_column()
			.await?
			.into_iter()
			.filter_map(|value| String::try_from(value).ok())
			.collect::<Vec<_>>();
		table.fix_primary_key(&primary_key);
		for pk in &table.primary_key {
			if let Some(column) = table.columns.get_mut(pk) {
				column.default_value = None;
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

fn mssql_column_type(base: &str) -> ColumnType {
	match base {
		"bigint" => ColumnType::BigInt,
		"int" => ColumnType::Integer,
		"smallint" | "tinyint" => ColumnType::SmallInt,
		"bit" => ColumnType::Boolean,
		"decimal" | "numeric" => ColumnType::Decimal,
		"money" | "smallmoney" => ColumnType::Money,
		"float" | "real" => ColumnType::Float,
		"date" => ColumnType::Date,
		"datetimeoffset" | "datetime2" | "datetime" | "smalldatetime" => ColumnType::DateTime,
		"time" => ColumnType::Time,
		"char" | "nchar" => ColumnType::Char,
		"text" | "ntext" => ColumnType::Text,
		"binary" | "varbinary" | "image" => ColumnType::Binary,
		"timestamp" => ColumnType::Timestamp,
		_ => ColumnType::String,
	}
}

fn column_from_row(row: &Row) -> ColumnSchema {
	let name = field_string(row, "column_name").unwrap_or_default();
	let data_type = field_string(row, "data_type").unwrap_or_default();

	let mut column = ColumnSchema::new(name, data_type.clone()).with_type(mssql_column_type(&base_type(&data_type)));
	column.allow_null = field_flag(row, "is_nullable");
	column.auto_increment = field_flag(row, "is_identity");
	// -1 marks MAX columns and does not fit into u32
	column.size = field_u32(row, "character_maximum_length");
	column.precision = field_u32(row, "numeric_precision").or(column.size);
	column.scale = field_u32(row, "numeric_scale");
	column.default_value = field_string(row, "column_default").and_then(|raw| {
		// defaults are reported as ((0)) or ('text')
		let literal = raw.trim_matches(|c| c == '(' || c == ')');
		if literal.eq_ignore_ascii_case("null") {
			return None;
		}
		if column.column_type == ColumnType::Timestamp || literal.eq_ignore_ascii_case("getdate") {
			return Some(QueryValue::String(literal.to_string()));
		}
		let literal = literal.strip_prefix('N').unwrap_or(literal).trim_matches('\'');
		Some(column.typecast(QueryValue::String(literal.to_string())))
	});
	column
}

fn group_foreign_keys(rows: &[Row]) -> Vec<ForeignKey> {
	let mut keys: IndexMap<String, ForeignKey> = IndexMap::new();
	for row in rows {
		let (Some(name), Some(column), Some(foreign_table), Some(foreign_column)) = (
			field_string(row, "fk_name"),
			field_string(row, "fk_column_name"),
			field_string(row, "uq_table_name"),
			field_string(row, "uq_column_name"),
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
