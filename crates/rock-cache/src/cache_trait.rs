//! Base cache trait

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Byte-level cache backend
///
/// The trait is object safe so backends can be shared as `Arc<dyn Cache>`
/// between connections. Typed access goes through [`CacheExt`].
///
/// Implementations must tolerate concurrent writers to the same key;
/// the last write wins.
#[async_trait]
pub trait Cache: Send + Sync {
	/// Fetch the raw bytes stored under `key`, `None` on miss or expiry
	async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

	/// Store raw bytes under `key`; `None` ttl means no expiry
	async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

	/// Remove `key`; removing a missing key is not an error
	async fn delete(&self, key: &str) -> Result<()>;

	/// Whether a live (non-expired) entry exists for `key`
	async fn has_key(&self, key: &str) -> Result<bool>;

	/// Drop every entry
	async fn clear(&self) -> Result<()>;
}

/// Typed JSON helpers available on every [`Cache`]
///
/// # Examples
///
/// ```
/// use rock_cache::{CacheExt, InMemoryCache};
/// use std::time::Duration;
///
/// # async fn example() -> rock_cache::Result<()> {
/// let cache = InMemoryCache::new();
/// cache.set("answer", &42_i64, Some(Duration::from_secs(60))).await?;
///
/// let value: Option<i64> = cache.get("answer").await?;
/// assert_eq!(value, Some(42));
/// # Ok(())
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(example()).unwrap();
/// ```
#[async_trait]
pub trait CacheExt: Cache {
	/// Fetch and decode a JSON value
	async fn get<T>(&self, key: &str) -> Result<Option<T>>
	where
		T: DeserializeOwned + Send,
	{
		match self.get_bytes(key).await? {
			Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			None => Ok(None),
		}
	}

	/// Encode a value as JSON and store it
	async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
	where
		T: Serialize + Send + Sync + ?Sized,
	{
		let bytes = serde_json::to_vec(value)?;
		self.set_bytes(key, bytes, ttl).await
	}
}

impl<C: Cache + ?Sized> CacheExt for C {}
