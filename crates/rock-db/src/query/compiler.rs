//! Condition compiler
//!
//! Turns a [`Condition`] into an SQL fragment, binding every value as a
//! named parameter (`:qp0`, `:qp1`, ...). Values are never inlined.

use super::builder::QueryBuilder;
use super::condition::{Condition, Operand};
use crate::error::{DbError, Result};
use crate::types::{Params, QueryValue};
use indexmap::IndexMap;

/// Bind `value` under the next free `:qpN` name and return the name
pub(crate) fn bind_param(value: QueryValue, params: &mut Params) -> String {
	let mut index = params.len();
	loop {
		let name = format!(":qp{}", index);
		if !params.contains_key(&name) {
			params.insert(name.clone(), value);
			return name;
		}
		index += 1;
	}
}

/// Compiles conditions for one [`QueryBuilder`]
pub struct ConditionCompiler<'a> {
	builder: &'a QueryBuilder,
}

impl<'a> ConditionCompiler<'a> {
	pub fn new(builder: &'a QueryBuilder) -> Self {
		Self { builder }
	}

	/// Compile `condition`, adding its values to `params`
	///
	/// An empty string means the condition compiled to nothing.
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::DriverName;
	/// use rock_db::dialect::dialect_for;
	/// use rock_db::query::{Condition, ConditionCompiler, QueryBuilder};
	/// use rock_db::types::Params;
	/// use serde_json::json;
	///
	/// let builder = QueryBuilder::new(dialect_for(DriverName::Mysql), "__");
	/// let condition = Condition::from_json(json!({"id": [1, 2, 3], "status": null})).unwrap();
	///
	/// let mut params = Params::new();
	/// let sql = ConditionCompiler::new(&builder).compile(&condition, &mut params).unwrap();
	///
	/// assert_eq!(sql, "(`id` IN (:qp0, :qp1, :qp2)) AND (`status` IS NULL)");
	/// assert_eq!(params.len(), 3);
	/// ```
	pub fn compile(&self, condition: &Condition, params: &mut Params) -> Result<String> {
		match condition {
			Condition::Hash(map) => self.hash_condition(map, params),
			Condition::Raw(sql) => Ok(sql.clone()),
			Condition::Expression(expression) => Ok(expression.merge_into(params)),
			Condition::Operator { operator, operands } => {
				let upper = operator.to_uppercase();
				match upper.as_str() {
					"AND" | "OR" => self.and_condition(&upper, operands, params),
					"NOT" => self.not_condition(operands, params),
					"BETWEEN" | "NOT BETWEEN" => self.between_condition(&upper, operands, params),
					"IN" | "NOT IN" => self.in_condition(&upper, operands, params),
					"LIKE" | "NOT LIKE" | "OR LIKE" | "OR NOT LIKE" => {
						self.like_condition(&upper, operands, params)
					}
					"EXISTS" | "NOT EXISTS" => self.exists_condition(&upper, operands, params),
					_ => Err(DbError::UnknownOperator(operator.clone())),
				}
			}
		}
	}

	fn quote_column(&self, column: &str) -> String {
		self.builder.dialect().quote_column_name(column)
	}

	/// Column operand as quoted SQL
	fn column(&self, operator: &str, operand: Option<&Operand>, params: &mut Params) -> Result<String> {
		match operand {
			Some(Operand::Value(QueryValue::String(column))) => Ok(self.quote_column(column)),
			Some(Operand::Expression(expression)) => Ok(expression.merge_into(params)),
			_ => Err(DbError::InvalidCondition(format!(
				"Operator '{}' requires a column name as its first operand",
				operator
			))),
		}
	}

	/// Value operand as a placeholder or inlined expression
	fn value(&self, operator: &str, operand: &Operand, params: &mut Params) -> Result<String> {
		match operand {
			Operand::Value(value) => Ok(bind_param(value.clone(), params)),
			Operand::Expression(expression) => Ok(expression.merge_into(params)),
			_ => Err(DbError::InvalidCondition(format!(
				"Operator '{}' requires scalar operands",
				operator
			))),
		}
	}

	fn hash_condition(&self, map: &IndexMap<String, Operand>, params: &mut Params) -> Result<String> {
		let mut parts = Vec::with_capacity(map.len());
		for (column, value) in map {
			let part = match value {
				Operand::Value(QueryValue::Null) => format!("{} IS NULL", self.quote_column(column)),
				Operand::Value(value) => {
					let placeholder = bind_param(value.clone(), params);
					format!("{}={}", self.quote_column(column), placeholder)
				}
				Operand::List(_) | Operand::Query(_) => {
					let operands = [Operand::from(column.as_str()), value.clone()];
					self.in_condition("IN", &operands, params)?
				}
				Operand::Expression(expression) => {
					format!("{}={}", self.quote_column(column), expression.merge_into(params))
				}
				Operand::Condition(_) => {
					return Err(DbError::InvalidCondition(format!(
						"Column '{}' cannot be compared with a nested condition",
						column
					)));
				}
			};
			if !part.is_empty() {
				parts.push(part);
			}
		}
		Ok(match parts.len() {
			0 => String::new(),
			1 => parts.remove(0),
			_ => format!("({})", parts.join(") AND (")),
		})
	}

	fn and_condition(&self, operator: &str, operands: &[Operand], params: &mut Params) -> Result<String> {
		let mut parts = Vec::with_capacity(operands.len());
		for operand in operands {
			let part = match operand {
				Operand::Condition(condition) => self.compile(condition, params)?,
				Operand::Value(QueryValue::String(sql)) => sql.clone(),
				Operand::Expression(expression) => expression.merge_into(params),
				_ => {
					return Err(DbError::InvalidCondition(format!(
						"Operator '{}' requires conditions as operands",
						operator
					)));
				}
			};
			if !part.is_empty() {
				parts.push(part);
			}
		}
		if parts.is_empty() {
			return Ok(String::new());
		}
		Ok(format!("({})", parts.join(&format!(") {} (", operator))))
	}

	fn not_condition(&self, operands: &[Operand], params: &mut Params) -> Result<String> {
		let [operand] = operands else {
			return Err(DbError::InvalidCondition(
				"Operator 'NOT' requires exactly one operand".to_string(),
			));
		};
		let inner = match operand {
			Operand::Condition(condition) => self.compile(condition, params)?,
			Operand::Value(QueryValue::String(sql)) => sql.clone(),
			Operand::Expression(expression) => expression.merge_into(params),
			_ => {
				return Err(DbError::InvalidCondition(
					"Operator 'NOT' requires a condition as its operand".to_string(),
				));
			}
		};
		if inner.is_empty() {
			return Ok(String::new());
		}
		Ok(format!("NOT ({})", inner))
	}

	fn between_condition(&self, operator: &str, operands: &[Operand], params: &mut Params) -> Result<String> {
		let [column, low, high] = operands else {
			return Err(DbError::InvalidCondition(format!(
				"Operator '{}' requires three operands",
				operator
			)));
		};
		let column = self.column(operator, Some(column), params)?;
		let low = self.value(operator, low, params)?;
		let high = self.value(operator, high, params)?;
		Ok(format!("{} {} {} AND {}", column, operator, low, high))
	}

	fn in_condition(&self, operator: &str, operands: &[Operand], params: &mut Params) -> Result<String> {
		let [column, values] = operands else {
			return Err(DbError::InvalidCondition(format!(
				"Operator '{}' requires two operands",
				operator
			)));
		};
		let negated = operator == "NOT IN";

		if let Operand::Query(query) = values {
			let sql = self.builder.build_with_params(query, params)?;
			let column = match column {
				Operand::List(columns) => self.composite_columns(operator, columns)?,
				other => self.column(operator, Some(other), params)?,
			};
			return Ok(format!("{} {} ({})", column, operator, sql));
		}

		let values: Vec<Operand> = match values {
			Operand::List(items) => items.clone(),
			other => vec![other.clone()],
		};
		if values.is_empty() {
			return Ok(if negated { String::new() } else { "0=1".to_string() });
		}

		if let Operand::List(columns) = column {
			return self.composite_in_condition(operator, columns, &values, params);
		}
		let column = self.column(operator, Some(column), params)?;

		let mut placeholders = Vec::with_capacity(values.len());
		let mut has_null = false;
		for value in &values {
			match value {
				Operand::Value(QueryValue::Null) => has_null = true,
				other => placeholders.push(self.value(operator, other, params)?),
			}
		}

		let null_check = if negated {
			format!("{} IS NOT NULL", column)
		} else {
			format!("{} IS NULL", column)
		};
		match placeholders.len() {
			0 => Ok(null_check),
			1 => {
				let comparison = format!("{}{}{}", column, if negated { "<>" } else { "=" }, placeholders[0]);
				Ok(join_null_check(comparison, has_null, negated, null_check))
			}
			_ => {
				let comparison = format!("{} {} ({})", column, operator, placeholders.join(", "));
				Ok(join_null_check(comparison, has_null, negated, null_check))
			}
		}
	}

	fn composite_columns(&self, operator: &str, columns: &[Operand]) -> Result<String> {
		let names = columns
			.iter()
			.map(|column| {
				column.as_str().map(|name| self.quote_column(name)).ok_or_else(|| {
					DbError::InvalidCondition(format!(
						"Operator '{}' requires column names in a composite column list",
						operator
					))
				})
			})
			.collect::<Result<Vec<_>>>()?;
		Ok(format!("({})", names.join(", ")))
	}

	/// `(a, b) IN ((:qp0, :qp1), ...)` for rows given as column maps
	fn composite_in_condition(
		&self,
		operator: &str,
		columns: &[Operand],
		rows: &[Operand],
		params: &mut Params,
	) -> Result<String> {
		let column_list = self.composite_columns(operator, columns)?;
		let mut tuples = Vec::with_capacity(rows.len());
		for row in rows {
			let Operand::Condition(condition) = row else {
				return Err(DbError::InvalidCondition(format!(
					"Operator '{}' with composite columns requires rows of column values",
					operator
				)));
			};
			let Condition::Hash(map) = condition.as_ref() else {
				return Err(DbError::InvalidCondition(format!(
					"Operator '{}' with composite columns requires rows of column values",
					operator
				)));
			};
			let mut values = Vec::with_capacity(columns.len());
			for column in columns {
				let name = column.as_str().unwrap_or_default();
				match map.get(name) {
					Some(Operand::Value(QueryValue::Null)) | None => values.push("NULL".to_string()),
					Some(value) => values.push(self.value(operator, value, params)?),
				}
			}
			tuples.push(format!("({})", values.join(", ")));
		}
		Ok(format!("{} {} ({})", column_list, operator, tuples.join(", ")))
	}

	fn like_condition(&self, operator: &str, operands: &[Operand], params: &mut Params) -> Result<String> {
		let (column, values, escape) = match operands {
			[column, values] => (column, values, true),
			[column, values, Operand::Value(QueryValue::Bool(escape))] => (column, values, *escape),
			[_, _, _] => (&operands[0], &operands[1], true),
			_ => {
				return Err(DbError::InvalidCondition(format!(
					"Operator '{}' requires two operands",
					operator
				)));
			}
		};
		let (and_or, like) = match operator {
			"OR LIKE" => (" OR ", "LIKE"),
			"OR NOT LIKE" => (" OR ", "NOT LIKE"),
			"NOT LIKE" => (" AND ", "NOT LIKE"),
			_ => (" AND ", "LIKE"),
		};
		let negated = like == "NOT LIKE";

		let values: Vec<Operand> = match values {
			Operand::List(items) => items.clone(),
			other => vec![other.clone()],
		};
		if values.is_empty() {
			return Ok(if negated { String::new() } else { "0=1".to_string() });
		}

		let column = self.column(operator, Some(column), params)?;
		let mut parts = Vec::with_capacity(values.len());
		for value in &values {
			let mut placeholder = match value {
				Operand::Value(QueryValue::String(text)) if escape => {
					let escaped = escape_like(text, self.builder.dialect().like_escape_char());
					bind_param(QueryValue::String(format!("%{}%", escaped)), params)
				}
				other => self.value(operator, other, params)?,
			};
			if escape && let Some(clause) = self.builder.dialect().like_escape_sql() {
				placeholder = format!("{} {}", placeholder, clause);
			}
			parts.push(format!("{} {} {}", column, like, placeholder));
		}
		Ok(parts.join(and_or))
	}

	fn exists_condition(&self, operator: &str, operands: &[Operand], params: &mut Params) -> Result<String> {
		let [Operand::Query(query)] = operands else {
			return Err(DbError::InvalidCondition(format!(
				"Operator '{}' requires one sub-query operand",
				operator
			)));
		};
		let sql = self.builder.build_with_params(query, params)?;
		Ok(format!("{} ({})", operator, sql))
	}
}

fn join_null_check(comparison: String, has_null: bool, negated: bool, null_check: String) -> String {
	if !has_null {
		return comparison;
	}
	if negated {
		format!("({} AND {})", comparison, null_check)
	} else {
		format!("({} OR {})", comparison, null_check)
	}
}

/// Escape LIKE wildcards so the value matches literally
fn escape_like(value: &str, escape: char) -> String {
	let mut escaped = String::with_capacity(value.len());
	for c in value.chars() {
		if c == '%' || c == '_' || c == escape {
			escaped.push(escape);
		}
		escaped.push(c);
	}
	escaped
}
