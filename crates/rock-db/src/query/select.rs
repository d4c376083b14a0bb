//! Aliased multi-table select lists
//!
//! [`SelectBuilder`] expands per-table column lists into one qualified
//! SELECT list. With aliasing enabled every column gets the alias
//! `table + separator + column`, which keeps same-named columns of joined
//! tables apart:
//!
//! ```text
//! [{"articles": ["id", "name"]}, true, "__"]
//!   -> `articles`.`id` AS `articles__id`, `articles`.`name` AS `articles__name`
//! ```

use super::Query;
use super::builder::{COLUMN_ALIAS_PATTERN, QueryBuilder, table_identifier};
use super::expression::Expression;
use super::SelectItem;
use crate::error::{DbError, Result};
use crate::types::Params;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static EXPLICIT_ALIAS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)^(.*?)\s+as\s+([\w\-\.]+)$").expect("explicit alias pattern is a valid regex")
});

/// Table a [`SelectSpec`] selects from
#[derive(Debug, Clone, PartialEq)]
pub enum SelectTable {
	Name(String),
	/// Sub-query whose first FROM entry names the table and whose select
	/// list supplies the columns
	Query(Box<Query>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
	/// `column`, `column AS alias`, `*` or an aggregate like `COUNT(id)`
	Column(String),
	Expression(Expression),
}

impl From<&str> for SelectColumn {
	fn from(column: &str) -> Self {
		SelectColumn::Column(column.to_string())
	}
}

impl From<String> for SelectColumn {
	fn from(column: String) -> Self {
		SelectColumn::Column(column)
	}
}

impl From<Expression> for SelectColumn {
	fn from(expression: Expression) -> Self {
		SelectColumn::Expression(expression)
	}
}

/// Columns of one table
#[derive(Debug, Clone, PartialEq)]
pub struct SelectSpec {
	pub table: SelectTable,
	pub columns: Vec<SelectColumn>,
	pub alias: bool,
	/// Alias separator, the connection's `alias_separator` when unset
	pub separator: Option<String>,
}

impl SelectSpec {
	pub fn table<I, C>(name: impl Into<String>, columns: I) -> Self
	where
		I: IntoIterator<Item = C>,
		C: Into<SelectColumn>,
	{
		Self {
			table: SelectTable::Name(name.into()),
			columns: columns.into_iter().map(Into::into).collect(),
			alias: false,
			separator: None,
		}
	}

	/// Spec taking its table name and columns from `query`
	pub fn query(query: Query) -> Self {
		Self {
			table: SelectTable::Query(Box::new(query)),
			columns: Vec::new(),
			alias: false,
			separator: None,
		}
	}

	pub fn with_alias(mut self, alias: bool) -> Self {
		self.alias = alias;
		self
	}

	pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
		self.separator = Some(separator.into());
		self
	}
}

/// Builder for a qualified, optionally aliased select list
///
/// # Examples
///
/// ```
/// use rock_db::DriverName;
/// use rock_db::dialect::dialect_for;
/// use rock_db::query::{QueryBuilder, SelectBuilder, SelectSpec};
/// use rock_db::types::Params;
///
/// let builder = QueryBuilder::new(dialect_for(DriverName::Mysql), "__");
/// let select = SelectBuilder::selects([
///     SelectSpec::table("articles", ["id", "name"]).with_alias(true),
///     SelectSpec::table("users", ["name AS author"]),
/// ]);
///
/// let sql = select.build(&builder, &mut Params::new()).unwrap();
/// assert_eq!(
///     sql,
///     "`articles`.`id` AS `articles__id`, `articles`.`name` AS `articles__name`, `users`.`name` AS `author`"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectBuilder {
	specs: Vec<SelectSpec>,
}

impl SelectBuilder {
	pub fn selects(specs: impl IntoIterator<Item = SelectSpec>) -> Self {
		Self {
			specs: specs.into_iter().collect(),
		}
	}

	/// Parse specs from JSON
	///
	/// Each element is `{"table": [columns]}`, `[{"table": [columns]},
	/// alias, separator]` or `["table", [columns], alias, separator]`.
	/// Anything else is rejected with [`DbError::InvalidSelectSpec`]
	/// naming the element.
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::query::SelectBuilder;
	/// use serde_json::json;
	///
	/// let select = SelectBuilder::from_json(json!([[{"articles": ["id", "name"]}, true, "__"]])).unwrap();
	/// assert_eq!(select.specs().len(), 1);
	/// assert!(select.specs()[0].alias);
	///
	/// assert!(SelectBuilder::from_json(json!([42])).is_err());
	/// ```
	pub fn from_json(value: Value) -> Result<Self> {
		let elements = match value {
			Value::Array(elements) => elements,
			object @ Value::Object(_) => vec![object],
			other => return Err(DbError::InvalidSelectSpec(other.to_string())),
		};
		let mut specs = Vec::new();
		for element in elements {
			specs.extend(parse_element(&element)?);
		}
		Ok(Self { specs })
	}

	pub fn specs(&self) -> &[SelectSpec] {
		&self.specs
	}

	/// Comma separated select list; expression parameters go to `params`
	pub fn build(&self, builder: &QueryBuilder, params: &mut Params) -> Result<String> {
		let mut fragments = Vec::new();
		for spec in &self.specs {
			fragments.extend(self.build_spec(spec, builder, params)?);
		}
		Ok(fragments.join(", "))
	}

	fn build_spec(&self, spec: &SelectSpec, builder: &QueryBuilder, params: &mut Params) -> Result<Vec<String>> {
		let dialect = builder.dialect();
		let (table, inherited) = match &spec.table {
			SelectTable::Name(name) => (table_identifier(name), Vec::new()),
			SelectTable::Query(query) => {
				let table = query.from.first().map(|from| from.identifier()).ok_or_else(|| {
					DbError::InvalidSelectSpec(format!("sub-query without FROM: {:?}", query))
				})?;
				let columns = query
					.select
					.iter()
					.filter_map(|item| match item {
						SelectItem::Column(column) => Some(SelectColumn::Column(column.clone())),
						SelectItem::Expression(expression) => Some(SelectColumn::Expression(expression.clone())),
						SelectItem::Builder(_) => None,
					})
					.collect::<Vec<_>>();
				(table, columns)
			}
		};
		let columns = if spec.columns.is_empty() { &inherited } else { &spec.columns };
		let quoted_table = dialect.quote_table_name(&table);
		if columns.is_empty() {
			return Ok(vec![format!("{}.*", quoted_table)]);
		}

		let separator = spec
			.separator
			.clone()
			.unwrap_or_else(|| builder.alias_separator().to_string());
		let alias_base = table.replace("{{", "").replace("}}", "").replace('%', "");
		let synthesized = |column: &str| {
			let column = column.rsplit('.').next().unwrap_or(column);
			dialect.quote_simple_column_name(&format!("{}{}{}", alias_base, separator, column))
		};

		let mut fragments = Vec::with_capacity(columns.len());
		for column in columns {
			let column = match column {
				SelectColumn::Expression(expression) => {
					fragments.push(expression.merge_into(params));
					continue;
				}
				SelectColumn::Column(column) => column.trim(),
			};

			if column == "*" {
				fragments.push(format!("{}.*", quoted_table));
				continue;
			}

			if column.contains('(') {
				let fragment = match EXPLICIT_ALIAS_PATTERN.captures(column) {
					Some(caps) if spec.alias => format!("{} AS {}", &caps[1], synthesized(&caps[2])),
					_ => column.to_string(),
				};
				fragments.push(fragment);
				continue;
			}

			let (name, literal_alias) = match COLUMN_ALIAS_PATTERN.captures(column) {
				Some(caps) => (caps[1].to_string(), Some(caps[2].to_string())),
				None => (column.to_string(), None),
			};
			let qualified = if name.contains('.') {
				dialect.quote_column_name(&name)
			} else {
				format!("{}.{}", quoted_table, dialect.quote_simple_column_name(&name))
			};
			let fragment = match (spec.alias, literal_alias) {
				(true, _) => format!("{} AS {}", qualified, synthesized(&name)),
				(false, Some(alias)) => format!("{} AS {}", qualified, dialect.quote_simple_column_name(&alias)),
				(false, None) => qualified,
			};
			fragments.push(fragment);
		}
		Ok(fragments)
	}
}

fn parse_element(element: &Value) -> Result<Vec<SelectSpec>> {
	let invalid = || DbError::InvalidSelectSpec(element.to_string());
	match element {
		Value::Object(map) => map
			.iter()
			.map(|(table, columns)| Ok(SelectSpec::table(table.as_str(), parse_columns(columns).ok_or_else(invalid)?)))
			.collect(),
		Value::Array(parts) => {
			let (specs, flags) = match parts.first() {
				Some(Value::Object(_)) => (parse_element(&parts[0])?, &parts[1..]),
				Some(Value::String(table)) => {
					let columns = parts.get(1).and_then(parse_columns).ok_or_else(invalid)?;
					let offset = parts.len().min(2);
					(vec![SelectSpec::table(table.as_str(), columns)], &parts[offset..])
				}
				_ => return Err(invalid()),
			};
			let alias = match flags.first() {
				None | Some(Value::Null) => false,
				Some(Value::Bool(alias)) => *alias,
				Some(_) => return Err(invalid()),
			};
			let separator = match flags.get(1) {
				None | Some(Value::Null) => None,
				Some(Value::String(separator)) => Some(separator.clone()),
				Some(_) => return Err(invalid()),
			};
			Ok(specs
				.into_iter()
				.map(|mut spec| {
					spec.alias = alias;
					spec.separator = separator.clone();
					spec
				})
				.collect())
		}
		_ => Err(invalid()),
	}
}

fn parse_columns(value: &Value) -> Option<Vec<String>> {
	match value {
		Value::String(columns) => Some(
			columns
				.split(',')
				.map(str::trim)
				.filter(|column| !column.is_empty())
				.map(str::to_string)
				.collect(),
		),
		Value::Array(columns) => columns
			.iter()
			.map(|column| column.as_str().map(str::to_string))
			.collect(),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dialect::dialect_for;
	use crate::driver::DriverName;
	use rstest::{fixture, rstest};
	use serde_json::json;

	#[fixture]
	fn builder() -> QueryBuilder {
		QueryBuilder::new(dialect_for(DriverName::Postgres), "__")
	}

	fn build(builder: &QueryBuilder, value: Value) -> Result<String> {
		SelectBuilder::from_json(value)?.build(builder, &mut Params::new())
	}

	#[rstest]
	#[case(
		json!([[{"articles": ["id", "name"]}, true, "__"]]),
		r#""articles"."id" AS "articles__id", "articles"."name" AS "articles__name""#
	)]
	#[case(
		json!([{"articles": ["id", "name AS title"]}]),
		r#""articles"."id", "articles"."name" AS "title""#
	)]
	#[case(
		json!([["articles", ["id AS ident"], true, "_"]]),
		r#""articles"."id" AS "articles_id""#
	)]
	#[case(json!([{"articles": ["*"]}]), r#""articles".*"#)]
	#[case(
		json!([[{"articles": ["COUNT(id) AS cnt", "MAX(id)"]}, true]]),
		r#"COUNT(id) AS "articles__cnt", MAX(id)"#
	)]
	#[case(
		json!([{"articles a": ["id"]}, {"users": "id, name"}]),
		r#""a"."id", "users"."id", "users"."name""#
	)]
	fn test_selects(builder: QueryBuilder, #[case] input: Value, #[case] expected: &str) {
		assert_eq!(build(&builder, input).unwrap(), expected);
	}

	#[rstest]
	#[case(json!([42]))]
	#[case(json!([[true, ["id"]]]))]
	#[case(json!([{"articles": 5}]))]
	#[case(json!("articles"))]
	fn test_wrong_spec_names_value(builder: QueryBuilder, #[case] input: Value) {
		// Act
		let result = build(&builder, input.clone());

		// Assert
		let Err(DbError::InvalidSelectSpec(message)) = result else {
			panic!("expected an invalid select spec error");
		};
		assert!(!message.is_empty());
	}

	#[rstest]
	fn test_sub_query_supplies_table_and_columns(builder: QueryBuilder) {
		// Arrange
		let query = Query::new().select(["id", "title"]).from(["posts p"]);
		let select = SelectBuilder::selects([SelectSpec::query(query).with_alias(true)]);

		// Act
		let sql = select.build(&builder, &mut Params::new()).unwrap();

		// Assert
		assert_eq!(sql, r#""p"."id" AS "p__id", "p"."title" AS "p__title""#);
	}

	#[rstest]
	fn test_expression_params_are_merged(builder: QueryBuilder) {
		// Arrange
		let select = SelectBuilder::selects([SelectSpec::table(
			"users",
			[SelectColumn::Expression(Expression::new("age > :min AS adult").bind("min", 17))],
		)]);
		let mut params = Params::new();

		// Act
		let sql = select.build(&builder, &mut params).unwrap();

		// Assert
		assert_eq!(sql, "age > :min AS adult");
		assert_eq!(params.len(), 1);
	}
}
