//! Emptiness filter behind `filter_where`
//!
//! Drops the parts of a condition whose values are empty so that optional
//! search inputs can be passed straight into a query. A value is empty when
//! it is null, an empty or whitespace-only string, or an empty list. `0`
//! and `false` are values like any other.

use super::condition::{Condition, Operand};
use crate::types::QueryValue;

/// Whether `operand` counts as an absent input
pub fn is_empty_operand(operand: &Operand) -> bool {
	match operand {
		Operand::Value(QueryValue::Null) => true,
		Operand::Value(QueryValue::String(s)) => s.trim().is_empty(),
		Operand::Value(_) => false,
		Operand::List(items) => items.is_empty(),
		Operand::Condition(condition) => match condition.as_ref() {
			Condition::Hash(map) => map.is_empty(),
			Condition::Raw(sql) => sql.trim().is_empty(),
			_ => false,
		},
		Operand::Query(_) | Operand::Expression(_) => false,
	}
}

/// Remove empty parts of `condition`, `None` when nothing is left
///
/// - column maps lose the entries whose value is empty
/// - `AND`, `OR` and `NOT` filter each operand and disappear when no
///   operand is left
/// - `BETWEEN` and `NOT BETWEEN` disappear when either bound is empty
/// - every other operator disappears when its value operand is empty
///
/// Applying the filter to its own output changes nothing.
///
/// # Examples
///
/// ```
/// use rock_db::query::{Condition, filter_condition};
/// use serde_json::json;
///
/// let condition = Condition::from_json(json!({"name": "", "status": 0})).unwrap();
/// let filtered = filter_condition(condition).unwrap();
/// assert_eq!(filtered, Condition::from_json(json!({"status": 0})).unwrap());
///
/// let between = Condition::from_json(json!(["between", "age", null, 5])).unwrap();
/// assert_eq!(filter_condition(between), None);
/// ```
pub fn filter_condition(condition: Condition) -> Option<Condition> {
	match condition {
		Condition::Hash(map) => {
			let map: indexmap::IndexMap<_, _> = map
				.into_iter()
				.filter(|(_, value)| !is_empty_operand(value))
				.collect();
			(!map.is_empty()).then_some(Condition::Hash(map))
		}
		Condition::Raw(sql) => (!sql.trim().is_empty()).then_some(Condition::Raw(sql)),
		Condition::Expression(expression) => Some(Condition::Expression(expression)),
		Condition::Operator { operator, operands } => {
			match operator.to_uppercase().as_str() {
				"AND" | "OR" | "NOT" => {
					let operands: Vec<Operand> = operands
						.into_iter()
						.filter_map(|operand| match operand {
							Operand::Condition(inner) => filter_condition(*inner).map(Operand::from),
							other if is_empty_operand(&other) => None,
							other => Some(other),
						})
						.collect();
					if operands.is_empty() {
						return None;
					}
					Some(Condition::Operator { operator, operands })
				}
				"BETWEEN" | "NOT BETWEEN" => {
					if let (Some(low), Some(high)) = (operands.get(1), operands.get(2))
						&& (is_empty_operand(low) || is_empty_operand(high))
					{
						return None;
					}
					Some(Condition::Operator { operator, operands })
				}
				_ => {
					if operands.get(1).is_some_and(is_empty_operand) {
						return None;
					}
					Some(Condition::Operator { operator, operands })
				}
			}
		}
	}
}

impl Condition {
	/// Shorthand for [`filter_condition`]
	pub fn filtered(self) -> Option<Condition> {
		filter_condition(self)
	}
}
