//! Condition AST
//!
//! A [`Condition`] is either a column map (`{"id": 1, "status": null}`),
//! an operator form (`["in", "id", [1, 2, 3]]`), raw SQL text or an
//! [`Expression`]. The JSON shapes above are accepted by
//! [`Condition::from_json`].

use super::Query;
use super::expression::Expression;
use crate::error::{DbError, Result};
use crate::types::QueryValue;
use indexmap::IndexMap;
use serde_json::Value;

/// WHERE clause specification
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
	/// Column to value map; pairs are ANDed
	Hash(IndexMap<String, Operand>),
	/// Operator applied to operands, for example `IN` or `AND`
	Operator {
		operator: String,
		operands: Vec<Operand>,
	},
	/// SQL text used verbatim
	Raw(String),
	Expression(Expression),
}

/// Operand of a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
	Value(QueryValue),
	List(Vec<Operand>),
	Condition(Box<Condition>),
	Query(Box<Query>),
	Expression(Expression),
}

/// Operators whose operands are themselves conditions
fn is_logical(operator: &str) -> bool {
	matches!(operator.to_uppercase().as_str(), "AND" | "OR" | "NOT")
}

impl Condition {
	/// Column map condition
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::query::{Condition, Operand};
	///
	/// let condition = Condition::hash([
	///     ("id", Operand::from(vec![1, 2, 3])),
	///     ("status", Operand::null()),
	/// ]);
	/// assert!(matches!(condition, Condition::Hash(map) if map.len() == 2));
	/// ```
	pub fn hash<K, V, I>(pairs: I) -> Self
	where
		K: Into<String>,
		V: Into<Operand>,
		I: IntoIterator<Item = (K, V)>,
	{
		Condition::Hash(
			pairs
				.into_iter()
				.map(|(key, value)| (key.into(), value.into()))
				.collect(),
		)
	}

	/// Operator condition; `operator` is stored upper-cased, so conditions
	/// compare equal whatever case they were written in
	pub fn op(operator: impl Into<String>, operands: Vec<Operand>) -> Self {
		Condition::Operator {
			operator: operator.into().to_uppercase(),
			operands,
		}
	}

	pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
		Self::op("AND", conditions.into_iter().map(Operand::from).collect())
	}

	pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Self {
		Self::op("OR", conditions.into_iter().map(Operand::from).collect())
	}

	#[allow(clippy::should_implement_trait)]
	pub fn not(condition: Condition) -> Self {
		Self::op("NOT", vec![condition.into()])
	}

	pub fn raw(sql: impl Into<String>) -> Self {
		Condition::Raw(sql.into())
	}

	/// Parse the JSON form of a condition
	///
	/// Objects become column maps, arrays starting with a string become
	/// operator forms and strings become raw SQL. Operands of `AND`, `OR`
	/// and `NOT` are parsed as conditions, all other operands as values.
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::query::Condition;
	/// use serde_json::json;
	///
	/// let condition = Condition::from_json(json!(["and", {"a": 1}, ["in", "b", [1, 2]]])).unwrap();
	/// assert!(matches!(condition, Condition::Operator { ref operator, .. } if operator == "AND"));
	///
	/// assert!(Condition::from_json(json!(42)).is_err());
	/// ```
	pub fn from_json(value: Value) -> Result<Self> {
		match value {
			Value::Object(map) => Ok(Condition::Hash(
				map.into_iter()
					.map(|(key, value)| (key, Operand::from_json_value(value)))
					.collect(),
			)),
			Value::String(sql) => Ok(Condition::Raw(sql)),
			Value::Array(items) => {
				let mut items = items.into_iter();
				let operator = match items.next() {
					Some(Value::String(operator)) => operator,
					other => {
						return Err(DbError::InvalidCondition(format!(
							"operator form must start with an operator name, got {}",
							other.map(|value| value.to_string()).unwrap_or_default()
						)));
					}
				};
				let operands = if is_logical(&operator) {
					items
						.map(|item| Ok(Operand::Condition(Box::new(Condition::from_json(item)?))))
						.collect::<Result<Vec<_>>>()?
				} else {
					items.map(Operand::from_json_value).collect()
				};
				Ok(Condition::op(operator, operands))
			}
			other => Err(DbError::InvalidCondition(format!(
				"cannot build a condition from {}",
				other
			))),
		}
	}

	/// Whether the condition carries nothing to compile
	pub fn is_empty(&self) -> bool {
		match self {
			Condition::Hash(map) => map.is_empty(),
			Condition::Operator { operands, .. } => operands.is_empty(),
			Condition::Raw(sql) => sql.trim().is_empty(),
			Condition::Expression(_) => false,
		}
	}
}

impl TryFrom<Value> for Condition {
	type Error = DbError;

	fn try_from(value: Value) -> Result<Self> {
		Condition::from_json(value)
	}
}

impl From<&str> for Condition {
	fn from(sql: &str) -> Self {
		Condition::Raw(sql.to_string())
	}
}

impl From<String> for Condition {
	fn from(sql: String) -> Self {
		Condition::Raw(sql)
	}
}

impl From<Expression> for Condition {
	fn from(expression: Expression) -> Self {
		Condition::Expression(expression)
	}
}

impl From<IndexMap<String, Operand>> for Condition {
	fn from(map: IndexMap<String, Operand>) -> Self {
		Condition::Hash(map)
	}
}

impl Operand {
	pub fn null() -> Self {
		Operand::Value(QueryValue::Null)
	}

	/// Operand parsed in value position: arrays become lists and objects
	/// become column maps
	fn from_json_value(value: Value) -> Self {
		match value {
			Value::Null => Operand::Value(QueryValue::Null),
			Value::Bool(b) => Operand::Value(QueryValue::Bool(b)),
			Value::Number(n) => match n.as_i64() {
				Some(i) => Operand::Value(QueryValue::Int(i)),
				None => Operand::Value(QueryValue::Float(n.as_f64().unwrap_or_default())),
			},
			Value::String(s) => Operand::Value(QueryValue::String(s)),
			Value::Array(items) => {
				Operand::List(items.into_iter().map(Operand::from_json_value).collect())
			}
			Value::Object(map) => Operand::Condition(Box::new(Condition::Hash(
				map.into_iter()
					.map(|(key, value)| (key, Operand::from_json_value(value)))
					.collect(),
			))),
		}
	}

	/// String value of the operand, if it is one
	pub(crate) fn as_str(&self) -> Option<&str> {
		match self {
			Operand::Value(QueryValue::String(s)) => Some(s),
			_ => None,
		}
	}
}

macro_rules! operand_from_value {
	($($ty:ty),*) => {
		$(
			impl From<$ty> for Operand {
				fn from(value: $ty) -> Self {
					Operand::Value(value.into())
				}
			}
		)*
	};
}

operand_from_value!(
	&str,
	String,
	i64,
	i32,
	f64,
	bool,
	QueryValue,
	chrono::DateTime<chrono::Utc>,
	uuid::Uuid
);

impl<T: Into<Operand>> From<Vec<T>> for Operand {
	fn from(items: Vec<T>) -> Self {
		Operand::List(items.into_iter().map(Into::into).collect())
	}
}

impl From<Condition> for Operand {
	fn from(condition: Condition) -> Self {
		Operand::Condition(Box::new(condition))
	}
}

impl From<Query> for Operand {
	fn from(query: Query) -> Self {
		Operand::Query(Box::new(query))
	}
}

impl From<Expression> for Operand {
	fn from(expression: Expression) -> Self {
		Operand::Expression(expression)
	}
}
