//! SQL generation for [`Query`] and the DML helpers

use super::compiler::{ConditionCompiler, bind_param};
use super::condition::Condition;
use super::{FromItem, OrderItem, Query, SelectItem};
use crate::dialect::Dialect;
use crate::error::Result;
use crate::types::{Params, QueryValue};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// `column alias` or `column AS alias`
pub(crate) static COLUMN_ALIAS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^(.*?)(?i:\s+as\s+|\s+)([\w\-_\.]+)$").expect("column alias pattern is a valid regex")
});

/// `table alias` or `table AS alias`
pub(crate) static TABLE_ALIAS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^(.*?)(?i:\s+as|)\s+([^ ]+)$").expect("table alias pattern is a valid regex")
});

/// Alias of a FROM entry when it carries one, otherwise the name itself
pub(crate) fn table_identifier(name: &str) -> String {
	match TABLE_ALIAS_PATTERN.captures(name) {
		Some(caps) if !name.contains('(') => caps[2].to_string(),
		_ => name.to_string(),
	}
}

/// Dialect bound SQL builder
///
/// # Examples
///
/// ```
/// use rock_db::DriverName;
/// use rock_db::dialect::dialect_for;
/// use rock_db::query::{Condition, Query, QueryBuilder};
///
/// let builder = QueryBuilder::new(dialect_for(DriverName::Mssql), "__");
/// let query = Query::new()
///     .select(["id", "name AS title"])
///     .from(["dbo.post p"])
///     .where_(Condition::hash([("status", 1)]))
///     .limit(10)
///     .offset(20);
///
/// let (sql, params) = builder.build(&query).unwrap();
/// assert_eq!(
///     sql,
///     "SELECT [id], [name] AS [title] FROM [dbo].[post] [p] WHERE [status]=:qp0 \
///      ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
/// );
/// assert_eq!(params.len(), 1);
/// ```
#[derive(Clone)]
pub struct QueryBuilder {
	dialect: Arc<dyn Dialect>,
	alias_separator: String,
}

impl std::fmt::Debug for QueryBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("QueryBuilder")
			.field("driver", &self.dialect.driver_name())
			.field("alias_separator", &self.alias_separator)
			.finish()
	}
}

impl QueryBuilder {
	pub fn new(dialect: Arc<dyn Dialect>, alias_separator: impl Into<String>) -> Self {
		Self {
			dialect,
			alias_separator: alias_separator.into(),
		}
	}

	pub fn dialect(&self) -> &Arc<dyn Dialect> {
		&self.dialect
	}

	pub fn alias_separator(&self) -> &str {
		&self.alias_separator
	}

	/// SQL and parameters of `query`
	pub fn build(&self, query: &Query) -> Result<(String, Params)> {
		let mut params = Params::new();
		let sql = self.build_with_params(query, &mut params)?;
		Ok((sql, params))
	}

	/// SQL of `query`, adding its parameters to `params`
	///
	/// Used for sub-queries so that the outer and inner statement share one
	/// parameter set.
	pub fn build_with_params(&self, query: &Query, params: &mut Params) -> Result<String> {
		for (name, value) in &query.params {
			params.insert(name.clone(), value.clone());
		}
		let clauses = [
			self.build_select(&query.select, query.distinct, params)?,
			self.build_from(&query.from, params)?,
			self.build_where(query.where_.as_ref(), params)?,
		];
		let sql = clauses
			.into_iter()
			.filter(|clause| !clause.is_empty())
			.collect::<Vec<_>>()
			.join(" ");
		let order_by = self.build_order_by(&query.order_by, params);
		Ok(self
			.dialect
			.build_order_by_and_limit(sql, &order_by, query.limit, query.offset))
	}

	pub fn build_select(&self, columns: &[SelectItem], distinct: bool, params: &mut Params) -> Result<String> {
		let keyword = if distinct { "SELECT DISTINCT" } else { "SELECT" };
		if columns.is_empty() {
			return Ok(format!("{} *", keyword));
		}
		let mut fragments = Vec::with_capacity(columns.len());
		for column in columns {
			let fragment = match column {
				SelectItem::Expression(expression) => expression.merge_into(params),
				SelectItem::Builder(select) => select.build(self, params)?,
				SelectItem::Column(column) if column.contains('(') => column.clone(),
				SelectItem::Column(column) => match COLUMN_ALIAS_PATTERN.captures(column) {
					Some(caps) => format!(
						"{} AS {}",
						self.dialect.quote_column_name(&caps[1]),
						self.dialect.quote_column_name(&caps[2])
					),
					None => self.dialect.quote_column_name(column),
				},
			};
			if !fragment.is_empty() {
				fragments.push(fragment);
			}
		}
		Ok(format!("{} {}", keyword, fragments.join(", ")))
	}

	pub fn build_from(&self, tables: &[FromItem], params: &mut Params) -> Result<String> {
		if tables.is_empty() {
			return Ok(String::new());
		}
		let mut fragments = Vec::with_capacity(tables.len());
		for table in tables {
			let fragment = match table {
				FromItem::Query { query, alias } => format!(
					"({}) {}",
					self.build_with_params(query, params)?,
					self.dialect.quote_table_name(alias)
				),
				FromItem::Table(name) if name.contains('(') => name.clone(),
				FromItem::Table(name) => match TABLE_ALIAS_PATTERN.captures(name) {
					Some(caps) => format!(
						"{} {}",
						self.dialect.quote_table_name(&caps[1]),
						self.dialect.quote_table_name(&caps[2])
					),
					None => self.dialect.quote_table_name(name),
				},
			};
			fragments.push(fragment);
		}
		Ok(format!("FROM {}", fragments.join(", ")))
	}

	pub fn build_where(&self, condition: Option<&Condition>, params: &mut Params) -> Result<String> {
		let Some(condition) = condition else {
			return Ok(String::new());
		};
		let sql = self.build_condition(condition, params)?;
		Ok(if sql.is_empty() {
			sql
		} else {
			format!("WHERE {}", sql)
		})
	}

	/// Compile a condition through this builder's [`ConditionCompiler`]
	pub fn build_condition(&self, condition: &Condition, params: &mut Params) -> Result<String> {
		ConditionCompiler::new(self).compile(condition, params)
	}

	pub fn build_order_by(&self, columns: &[OrderItem], params: &mut Params) -> String {
		if columns.is_empty() {
			return String::new();
		}
		let fragments = columns
			.iter()
			.map(|column| match column {
				OrderItem::Expression(expression) => expression.merge_into(params),
				OrderItem::Column { name, descending } => format!(
					"{}{}",
					self.dialect.quote_column_name(name),
					if *descending { " DESC" } else { "" }
				),
			})
			.collect::<Vec<_>>();
		format!("ORDER BY {}", fragments.join(", "))
	}

	/// `INSERT INTO table (columns) VALUES (placeholders)`
	///
	/// # Examples
	///
	/// ```
	/// use indexmap::IndexMap;
	/// use rock_db::DriverName;
	/// use rock_db::dialect::dialect_for;
	/// use rock_db::query::QueryBuilder;
	/// use rock_db::types::{Params, QueryValue};
	///
	/// let builder = QueryBuilder::new(dialect_for(DriverName::Sqlite), "__");
	/// let mut columns = IndexMap::new();
	/// columns.insert("name".to_string(), QueryValue::from("alice"));
	/// columns.insert("age".to_string(), QueryValue::from(30));
	///
	/// let mut params = Params::new();
	/// let sql = builder.insert("user", &columns, &mut params);
	/// assert_eq!(sql, "INSERT INTO `user` (`name`, `age`) VALUES (:qp0, :qp1)");
	/// ```
	pub fn insert(&self, table: &str, columns: &IndexMap<String, QueryValue>, params: &mut Params) -> String {
		let names = columns
			.keys()
			.map(|name| self.dialect.quote_column_name(name))
			.collect::<Vec<_>>();
		let placeholders = columns
			.values()
			.map(|value| bind_param(value.clone(), params))
			.collect::<Vec<_>>();
		format!(
			"INSERT INTO {} ({}) VALUES ({})",
			self.dialect.quote_table_name(table),
			names.join(", "),
			placeholders.join(", ")
		)
	}

	/// `UPDATE table SET ... [WHERE ...]`
	pub fn update(
		&self,
		table: &str,
		columns: &IndexMap<String, QueryValue>,
		condition: &Condition,
		params: &mut Params,
	) -> Result<String> {
		let assignments = columns
			.iter()
			.map(|(name, value)| {
				format!(
					"{}={}",
					self.dialect.quote_column_name(name),
					bind_param(value.clone(), params)
				)
			})
			.collect::<Vec<_>>();
		let sql = format!(
			"UPDATE {} SET {}",
			self.dialect.quote_table_name(table),
			assignments.join(", ")
		);
		let filter = self.build_where(Some(condition), params)?;
		Ok(join_clause(sql, filter))
	}

	/// `DELETE FROM table [WHERE ...]`
	pub fn delete(&self, table: &str, condition: &Condition, params: &mut Params) -> Result<String> {
		let sql = format!("DELETE FROM {}", self.dialect.quote_table_name(table));
		let filter = self.build_where(Some(condition), params)?;
		Ok(join_clause(sql, filter))
	}
}

fn join_clause(sql: String, clause: String) -> String {
	if clause.is_empty() {
		sql
	} else {
		format!("{} {}", sql, clause)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dialect::dialect_for;
	use crate::driver::DriverName;
	use crate::query::{Expression, SelectBuilder, SelectSpec};
	use rstest::rstest;

	fn builder(driver: DriverName) -> QueryBuilder {
		QueryBuilder::new(dialect_for(driver), "__")
	}

	#[rstest]
	fn test_select_star_when_empty() {
		// Act
		let (sql, _) = builder(DriverName::Mysql)
			.build(&Query::new().from(["user"]))
			.unwrap();

		// Assert
		assert_eq!(sql, "SELECT * FROM `user`");
	}

	#[rstest]
	#[case(DriverName::Mysql, "SELECT * FROM `t` LIMIT 5 OFFSET 10")]
	#[case(DriverName::Postgres, r#"SELECT * FROM "t" LIMIT 5 OFFSET 10"#)]
	#[case(DriverName::Mssql, "SELECT * FROM [t] ORDER BY (SELECT NULL) OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY")]
	fn test_paging_per_dialect(#[case] driver: DriverName, #[case] expected: &str) {
		// Arrange
		let query = Query::new().from(["t"]).limit(5).offset(10);

		// Act
		let (sql, _) = builder(driver).build(&query).unwrap();

		// Assert
		assert_eq!(sql, expected);
	}

	#[rstest]
	fn test_offset_only_sqlite() {
		// Act
		let (sql, _) = builder(DriverName::Sqlite)
			.build(&Query::new().from(["t"]).offset(3))
			.unwrap();

		// Assert
		assert_eq!(sql, "SELECT * FROM `t` LIMIT -1 OFFSET 3");
	}

	#[rstest]
	fn test_order_by_and_distinct() {
		// Arrange
		let query = Query::new()
			.select(["u.id", "COUNT(*) AS total"])
			.distinct(true)
			.from(["user u"])
			.order_by("total DESC, u.id")
			.add_order_by_expression(Expression::new("FIELD(u.id, 3, 1)"));

		// Act
		let (sql, _) = builder(DriverName::Mysql).build(&query).unwrap();

		// Assert
		assert_eq!(
			sql,
			"SELECT DISTINCT `u`.`id`, COUNT(*) AS total FROM `user` `u` ORDER BY `total` DESC, `u`.`id`, FIELD(u.id, 3, 1)"
		);
	}

	#[rstest]
	fn test_sub_query_in_from_shares_params() {
		// Arrange
		let inner = Query::new().from(["post"]).where_(Condition::hash([("author", 7)]));
		let query = Query::new()
			.from_query(inner, "p")
			.where_(Condition::hash([("p.status", 1)]));

		// Act
		let (sql, params) = builder(DriverName::Postgres).build(&query).unwrap();

		// Assert
		assert_eq!(
			sql,
			r#"SELECT * FROM (SELECT * FROM "post" WHERE "author"=:qp0) "p" WHERE "p"."status"=:qp1"#
		);
		assert_eq!(params.len(), 2);
	}

	#[rstest]
	fn test_select_builder_in_select() {
		// Arrange
		let query = Query::new()
			.select_builder(SelectBuilder::selects([
				SelectSpec::table("articles", ["id"]).with_alias(true),
				SelectSpec::table("users", ["id"]).with_alias(true),
			]))
			.from(["articles", "users"]);

		// Act
		let (sql, _) = builder(DriverName::Postgres).build(&query).unwrap();

		// Assert
		assert_eq!(
			sql,
			r#"SELECT "articles"."id" AS "articles__id", "users"."id" AS "users__id" FROM "articles", "users""#
		);
	}

	#[rstest]
	fn test_update_and_delete() {
		// Arrange
		let builder = builder(DriverName::Mysql);
		let mut columns = IndexMap::new();
		columns.insert("status".to_string(), QueryValue::Int(2));
		let mut params = Params::new();

		// Act
		let update = builder
			.update("user", &columns, &Condition::hash([("id", 5)]), &mut params)
			.unwrap();
		let delete = builder
			.delete("user", &Condition::raw(""), &mut params)
			.unwrap();

		// Assert
		assert_eq!(update, "UPDATE `user` SET `status`=:qp0 WHERE `id`=:qp1");
		assert_eq!(delete, "DELETE FROM `user`");
		assert_eq!(params.len(), 2);
	}
}
