//! Literal SQL fragments

use crate::command::param_name;
use crate::types::{Params, QueryValue};
use std::fmt;

/// SQL fragment that is spliced into generated SQL without quoting
///
/// Usable as a condition, a condition operand, a select column or an order
/// column. Its parameters are merged into the parameters of the statement
/// it ends up in.
///
/// # Examples
///
/// ```
/// use rock_db::query::Expression;
///
/// let expr = Expression::new("NOW() - INTERVAL :days DAY").bind("days", 7);
/// assert_eq!(expr.sql(), "NOW() - INTERVAL :days DAY");
/// assert_eq!(expr.params().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
	sql: String,
	params: Params,
}

impl Expression {
	pub fn new(sql: impl Into<String>) -> Self {
		Self {
			sql: sql.into(),
			params: Params::new(),
		}
	}

	pub fn with_params(sql: impl Into<String>, params: Params) -> Self {
		Self {
			sql: sql.into(),
			params: params
				.into_iter()
				.map(|(name, value)| (param_name(&name), value))
				.collect(),
		}
	}

	/// Bind one parameter used by the fragment
	pub fn bind(mut self, name: &str, value: impl Into<QueryValue>) -> Self {
		self.params.insert(param_name(name), value.into());
		self
	}

	pub fn sql(&self) -> &str {
		&self.sql
	}

	pub fn params(&self) -> &Params {
		&self.params
	}

	/// Copy the fragment's parameters into `params` and return its SQL
	pub(crate) fn merge_into(&self, params: &mut Params) -> String {
		for (name, value) in &self.params {
			params.insert(name.clone(), value.clone());
		}
		self.sql.clone()
	}
}

impl fmt::Display for Expression {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.sql)
	}
}
