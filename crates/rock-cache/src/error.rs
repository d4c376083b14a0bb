//! Cache error types

use thiserror::Error;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised by cache backends
#[derive(Debug, Error)]
pub enum CacheError {
	/// Value could not be encoded or decoded
	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Backend-specific failure (network, storage, ...)
	#[error("Cache backend error: {0}")]
	Backend(String),
}
