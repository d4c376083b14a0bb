//! Database error types
//!
//! Errors are split by how the caller is expected to react:
//!
//! - configuration problems ([`DbError::Config`], [`DbError::UnsupportedDriver`])
//!   are programmer errors and are never retried
//! - [`DbError::Connection`] wraps a native connect failure and keeps the cause
//! - [`DbError::NoServersAvailable`] is raised once a whole server pool is exhausted
//! - transaction misuse ([`DbError::TransactionState`]) and nested rollback
//!   without savepoint support ([`DbError::UnsupportedOperation`]) are fatal
//! - compiler errors ([`DbError::UnknownOperator`], [`DbError::InvalidSelectSpec`],
//!   [`DbError::InvalidCondition`]) name the offending input

use thiserror::Error;

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DbError>;

/// Unified error type for the database layer
#[derive(Debug, Error)]
pub enum DbError {
	/// Invalid or incomplete configuration
	#[error("Configuration error: {0}")]
	Config(String),

	/// No dialect is registered for the driver name
	#[error("Connection does not support reading schema information for '{0}' DBMS")]
	UnsupportedDriver(String),

	/// The native driver failed to connect
	#[error("Failed to open DB connection to {dsn}: {source}")]
	Connection {
		dsn: String,
		#[source]
		source: Box<dyn std::error::Error + Send + Sync>,
	},

	/// Every server of a master or slave pool failed
	#[error("None of the {0} servers is available")]
	NoServersAvailable(String),

	/// Transaction used in a state that does not allow the operation
	#[error("Transaction state error: {0}")]
	TransactionState(String),

	/// The dialect cannot honor an operation whose silent degradation
	/// would corrupt the caller's assumptions
	#[error("Unsupported operation: {0}")]
	UnsupportedOperation(String),

	/// Feature not implemented by this dialect or driver
	#[error("Not supported: {0}")]
	NotSupported(String),

	/// Condition operator token not recognized by the compiler
	#[error("Found unknown operator in query: {0}")]
	UnknownOperator(String),

	/// Condition operands do not match what the operator expects
	#[error("Invalid condition: {0}")]
	InvalidCondition(String),

	/// A named placeholder in the SQL has no bound value
	#[error("No value bound for parameter {0}")]
	UnboundParameter(String),

	/// A select spec could not be interpreted
	#[error("Wrong type of select spec: {0}")]
	InvalidSelectSpec(String),

	/// Error reported by the native driver while executing a statement
	#[error("Driver error: {message}")]
	Driver {
		message: String,
		#[source]
		source: Option<Box<dyn std::error::Error + Send + Sync>>,
	},

	/// Value conversion failure
	#[error("Type error: {0}")]
	TypeError(String),

	/// Requested column does not exist in a row
	#[error("Column not found: {0}")]
	ColumnNotFound(String),

	/// Query returned no row where one was required
	#[error("Query returned no rows")]
	RowNotFound,

	/// Backing cache failure
	#[error("Cache error: {0}")]
	Cache(#[from] rock_cache::CacheError),

	/// Configuration file could not be parsed
	#[error("Failed to parse configuration: {0}")]
	ConfigParse(#[from] toml::de::Error),
}

impl DbError {
	/// Wrap a native driver error raised while executing a statement
	pub fn driver<E>(err: E) -> Self
	where
		E: std::error::Error + Send + Sync + 'static,
	{
		DbError::Driver {
			message: err.to_string(),
			source: Some(Box::new(err)),
		}
	}

	/// Driver error without an underlying cause
	pub fn driver_message(message: impl Into<String>) -> Self {
		DbError::Driver {
			message: message.into(),
			source: None,
		}
	}

	/// Whether the error is a failure to reach a server
	pub fn is_connection_error(&self) -> bool {
		matches!(
			self,
			DbError::Connection { .. } | DbError::NoServersAvailable(_)
		)
	}
}

impl From<sqlx::Error> for DbError {
	fn from(err: sqlx::Error) -> Self {
		match err {
			sqlx::Error::RowNotFound => DbError::RowNotFound,
			sqlx::Error::ColumnNotFound(name) => DbError::ColumnNotFound(name),
			other => DbError::driver(other),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use std::error::Error as _;

	#[rstest]
	fn test_connection_error_preserves_cause() {
		// Arrange
		let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");

		// Act
		let err = DbError::Connection {
			dsn: "mysql://localhost/app".to_string(),
			source: Box::new(cause),
		};

		// Assert
		assert!(err.is_connection_error());
		assert!(err.to_string().contains("mysql://localhost/app"));
		assert_eq!(err.source().unwrap().to_string(), "refused");
	}

	#[rstest]
	fn test_unknown_operator_names_token() {
		// Arrange & Act
		let err = DbError::UnknownOperator("FOO".to_string());

		// Assert
		assert_eq!(err.to_string(), "Found unknown operator in query: FOO");
	}

	#[rstest]
	fn test_row_not_found_from_sqlx() {
		// Arrange & Act
		let err: DbError = sqlx::Error::RowNotFound.into();

		// Assert
		assert!(matches!(err, DbError::RowNotFound));
	}
}
