//! Query building
//!
//! [`Query`] collects the parts of a SELECT statement with a consuming
//! builder API. [`QueryBuilder`] turns it into dialect specific SQL,
//! compiling the WHERE part through the [`ConditionCompiler`] and select
//! lists through the [`SelectBuilder`].
//!
//! # Examples
//!
//! ```
//! use rock_db::{Connection, ConnectionConfig};
//! use rock_db::query::{Condition, Query};
//! use serde_json::json;
//!
//! # fn example() -> rock_db::Result<()> {
//! let db = Connection::new(ConnectionConfig::new("pgsql:host=localhost;dbname=app"));
//!
//! let search_name = "";
//! let query = Query::new()
//!     .select(["id", "name"])
//!     .from(["{{%user}}"])
//!     .where_(Condition::from_json(json!({"status": 1}))?)
//!     .and_filter_where(Condition::from_json(json!(["like", "name", search_name]))?)
//!     .order_by("id DESC")
//!     .limit(10);
//!
//! let (sql, params) = query.build(&db)?;
//! assert_eq!(sql, r#"SELECT "id", "name" FROM {{%user}} WHERE "status"=:qp0 ORDER BY "id" DESC LIMIT 10"#);
//! assert_eq!(params.len(), 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod builder;
pub mod compiler;
pub mod condition;
pub mod expression;
pub mod filter;
pub mod select;

pub use builder::QueryBuilder;
pub use compiler::ConditionCompiler;
pub use condition::{Condition, Operand};
pub use expression::Expression;
pub use filter::{filter_condition, is_empty_operand};
pub use select::{SelectBuilder, SelectColumn, SelectSpec, SelectTable};

use crate::command::{Command, param_name};
use crate::connection::Connection;
use crate::error::Result;
use crate::types::{Params, QueryValue, Row};
use builder::table_identifier;
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

static ORDER_DIRECTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)^(.*?)\s+(asc|desc)$").expect("order direction pattern is a valid regex")
});

/// Entry of a SELECT list
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
	/// Column name, `column AS alias` or raw text containing `(`
	Column(String),
	Expression(Expression),
	Builder(SelectBuilder),
}

impl From<&str> for SelectItem {
	fn from(column: &str) -> Self {
		SelectItem::Column(column.to_string())
	}
}

impl From<String> for SelectItem {
	fn from(column: String) -> Self {
		SelectItem::Column(column)
	}
}

impl From<Expression> for SelectItem {
	fn from(expression: Expression) -> Self {
		SelectItem::Expression(expression)
	}
}

impl From<SelectBuilder> for SelectItem {
	fn from(select: SelectBuilder) -> Self {
		SelectItem::Builder(select)
	}
}

/// Entry of a FROM list
#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
	/// Table name, optionally followed by an alias
	Table(String),
	Query { query: Box<Query>, alias: String },
}

impl FromItem {
	/// Name the entry is referred to by in the rest of the statement
	pub(crate) fn identifier(&self) -> String {
		match self {
			FromItem::Table(name) => table_identifier(name),
			FromItem::Query { alias, .. } => alias.clone(),
		}
	}
}

/// Entry of an ORDER BY list
#[derive(Debug, Clone, PartialEq)]
pub enum OrderItem {
	Column { name: String, descending: bool },
	Expression(Expression),
}

/// SELECT statement under construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
	pub(crate) select: Vec<SelectItem>,
	pub(crate) distinct: bool,
	pub(crate) from: Vec<FromItem>,
	pub(crate) where_: Option<Condition>,
	pub(crate) order_by: Vec<OrderItem>,
	pub(crate) limit: Option<u64>,
	pub(crate) offset: Option<u64>,
	pub(crate) params: Params,
	pub(crate) index_by: Option<String>,
}

impl Query {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace the select list
	pub fn select<I, T>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = T>,
		T: Into<SelectItem>,
	{
		self.select = columns.into_iter().map(Into::into).collect();
		self
	}

	pub fn add_select<I, T>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = T>,
		T: Into<SelectItem>,
	{
		self.select.extend(columns.into_iter().map(Into::into));
		self
	}

	/// Append the columns produced by `select`
	pub fn select_builder(mut self, select: SelectBuilder) -> Self {
		self.select.push(SelectItem::Builder(select));
		self
	}

	pub fn distinct(mut self, distinct: bool) -> Self {
		self.distinct = distinct;
		self
	}

	/// Replace the FROM list; entries may carry an alias (`user u`)
	pub fn from<I, T>(mut self, tables: I) -> Self
	where
		I: IntoIterator<Item = T>,
		T: Into<String>,
	{
		self.from = tables.into_iter().map(|table| FromItem::Table(table.into())).collect();
		self
	}

	/// Add a sub-query to the FROM list
	pub fn from_query(mut self, query: Query, alias: impl Into<String>) -> Self {
		self.from.push(FromItem::Query {
			query: Box::new(query),
			alias: alias.into(),
		});
		self
	}

	/// Replace the WHERE condition
	pub fn where_(mut self, condition: impl Into<Condition>) -> Self {
		self.where_ = Some(condition.into());
		self
	}

	pub fn and_where(mut self, condition: impl Into<Condition>) -> Self {
		let condition = condition.into();
		self.where_ = Some(match self.where_.take() {
			Some(existing) => Condition::and([existing, condition]),
			None => condition,
		});
		self
	}

	pub fn or_where(mut self, condition: impl Into<Condition>) -> Self {
		let condition = condition.into();
		self.where_ = Some(match self.where_.take() {
			Some(existing) => Condition::or([existing, condition]),
			None => condition,
		});
		self
	}

	/// [`where_`](Self::where_) after dropping empty values, see
	/// [`filter_condition`]; leaves the query alone when nothing remains
	pub fn filter_where(self, condition: impl Into<Condition>) -> Self {
		match filter_condition(condition.into()) {
			Some(condition) => self.where_(condition),
			None => self,
		}
	}

	pub fn and_filter_where(self, condition: impl Into<Condition>) -> Self {
		match filter_condition(condition.into()) {
			Some(condition) => self.and_where(condition),
			None => self,
		}
	}

	pub fn or_filter_where(self, condition: impl Into<Condition>) -> Self {
		match filter_condition(condition.into()) {
			Some(condition) => self.or_where(condition),
			None => self,
		}
	}

	/// Replace the ORDER BY list from text like `"created_at DESC, id"`
	pub fn order_by(mut self, columns: &str) -> Self {
		self.order_by = parse_order_by(columns);
		self
	}

	pub fn add_order_by(mut self, columns: &str) -> Self {
		self.order_by.extend(parse_order_by(columns));
		self
	}

	pub fn order_by_column(mut self, name: impl Into<String>, descending: bool) -> Self {
		self.order_by.push(OrderItem::Column {
			name: name.into(),
			descending,
		});
		self
	}

	pub fn add_order_by_expression(mut self, expression: Expression) -> Self {
		self.order_by.push(OrderItem::Expression(expression));
		self
	}

	pub fn limit(mut self, limit: u64) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn offset(mut self, offset: u64) -> Self {
		self.offset = Some(offset);
		self
	}

	/// Bind extra parameters used by raw condition text
	pub fn add_params(mut self, params: Params) -> Self {
		for (name, value) in params {
			self.params.insert(param_name(&name), value);
		}
		self
	}

	/// Key rows returned by [`all_indexed`](Self::all_indexed) by `column`
	pub fn index_by(mut self, column: impl Into<String>) -> Self {
		self.index_by = Some(column.into());
		self
	}

	/// SQL and parameters for `db`'s dialect
	pub fn build(&self, db: &Connection) -> Result<(String, Params)> {
		db.get_schema()?.create_query_builder().build(self)
	}

	pub fn create_command(&self, db: &Connection) -> Result<Command> {
		let (sql, params) = self.build(db)?;
		db.create_command(sql, params)
	}

	pub async fn all(&self, db: &Connection) -> Result<Vec<Row>> {
		self.create_command(db)?.query_all().await
	}

	/// Rows keyed by the [`index_by`](Self::index_by) column, or by
	/// position when none is set
	pub async fn all_indexed(&self, db: &Connection) -> Result<IndexMap<String, Row>> {
		let rows = self.all(db).await?;
		Ok(rows
			.into_iter()
			.enumerate()
			.map(|(position, row)| {
				let key = match &self.index_by {
					Some(column) => row.value(column).map(index_key).unwrap_or_default(),
					None => position.to_string(),
				};
				(key, row)
			})
			.collect())
	}

	pub async fn one(&self, db: &Connection) -> Result<Option<Row>> {
		self.create_command(db)?.query_one().await
	}

	pub async fn scalar(&self, db: &Connection) -> Result<Option<QueryValue>> {
		self.create_command(db)?.query_scalar().await
	}

	pub async fn column(&self, db: &Connection) -> Result<Vec<QueryValue>> {
		self.create_command(db)?.query_column().await
	}

	/// Number of rows the query matches, ignoring order and paging
	pub async fn count(&self, db: &Connection) -> Result<i64> {
		let mut query = self.clone();
		query.select = vec![SelectItem::Column("COUNT(*)".to_string())];
		query.order_by.clear();
		query.limit = None;
		query.offset = None;
		match query.scalar(db).await? {
			Some(value) if !value.is_null() => i64::try_from(value),
			_ => Ok(0),
		}
	}

	/// Whether the query matches at least one row
	pub async fn exists(&self, db: &Connection) -> Result<bool> {
		let mut query = self.clone();
		query.select = vec![SelectItem::Expression(Expression::new("1"))];
		query.order_by.clear();
		query.limit = Some(1);
		query.offset = None;
		Ok(query.one(db).await?.is_some())
	}
}

fn parse_order_by(columns: &str) -> Vec<OrderItem> {
	columns
		.split(',')
		.map(str::trim)
		.filter(|column| !column.is_empty())
		.map(|column| match ORDER_DIRECTION_PATTERN.captures(column) {
			Some(caps) => OrderItem::Column {
				name: caps[1].to_string(),
				descending: caps[2].eq_ignore_ascii_case("desc"),
			},
			None => OrderItem::Column {
				name: column.to_string(),
				descending: false,
			},
		})
		.collect()
}

fn index_key(value: &QueryValue) -> String {
	match value {
		QueryValue::String(s) => s.clone(),
		other => other.to_sql_literal(),
	}
}
