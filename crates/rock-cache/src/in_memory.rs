//! In-memory cache implementation

use crate::cache_trait::Cache;
use crate::entry::CacheEntry;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Hit/miss counters of an [`InMemoryCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
	pub hits: u64,
	pub misses: u64,
	pub entry_count: u64,
}

/// In-memory cache backend
///
/// Clones share the same store, so one instance can serve as the
/// process-wide server-status cache for every connection.
#[derive(Clone, Default)]
pub struct InMemoryCache {
	store: Arc<RwLock<HashMap<String, CacheEntry>>>,
	default_ttl: Option<Duration>,
	hits: Arc<AtomicU64>,
	misses: Arc<AtomicU64>,
}

impl InMemoryCache {
	/// Create a new in-memory cache with no default TTL
	pub fn new() -> Self {
		Self::default()
	}

	/// Set a default TTL applied when `set` is called without one
	///
	/// # Examples
	///
	/// ```
	/// use rock_cache::{CacheExt, InMemoryCache};
	/// use std::time::Duration;
	///
	/// # async fn example() {
	/// let cache = InMemoryCache::new().with_default_ttl(Duration::from_millis(10));
	/// cache.set("key", &"value", None).await.unwrap();
	///
	/// tokio::time::sleep(Duration::from_millis(20)).await;
	///
	/// let value: Option<String> = cache.get("key").await.unwrap();
	/// assert_eq!(value, None);
	/// # }
	/// # tokio::runtime::Runtime::new().unwrap().block_on(example());
	/// ```
	pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
		self.default_ttl = Some(ttl);
		self
	}

	/// Remove expired entries from the store
	pub async fn cleanup_expired(&self) {
		let mut store = self.store.write().await;
		store.retain(|_, entry| !entry.is_expired());
	}

	/// Number of stored entries, including expired ones not yet cleaned up
	pub async fn len(&self) -> usize {
		self.store.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.store.read().await.is_empty()
	}

	/// Get cache statistics
	pub async fn statistics(&self) -> CacheStatistics {
		let store = self.store.read().await;
		CacheStatistics {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			entry_count: store.len() as u64,
		}
	}
}

#[async_trait]
impl Cache for InMemoryCache {
	async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
		let store = self.store.read().await;

		match store.get(key) {
			Some(entry) if !entry.is_expired() => {
				self.hits.fetch_add(1, Ordering::Relaxed);
				Ok(Some(entry.value.clone()))
			}
			_ => {
				self.misses.fetch_add(1, Ordering::Relaxed);
				Ok(None)
			}
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
		let entry = CacheEntry::new(value, ttl.or(self.default_ttl));
		let mut store = self.store.write().await;
		store.insert(key.to_string(), entry);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<()> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn has_key(&self, key: &str) -> Result<bool> {
		let store = self.store.read().await;
		Ok(store.get(key).is_some_and(|entry| !entry.is_expired()))
	}

	async fn clear(&self) -> Result<()> {
		let mut store = self.store.write().await;
		store.clear();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cache_trait::CacheExt;
	use rstest::rstest;

	#[rstest]
	#[tokio::test]
	async fn test_in_memory_cache_basic() {
		// Arrange
		let cache = InMemoryCache::new();

		// Act
		cache.set("key1", &"value1", None).await.unwrap();
		let value: Option<String> = cache.get("key1").await.unwrap();

		// Assert
		assert_eq!(value, Some("value1".to_string()));
		assert!(cache.has_key("key1").await.unwrap());
		assert!(!cache.has_key("key2").await.unwrap());

		cache.delete("key1").await.unwrap();
		let value: Option<String> = cache.get("key1").await.unwrap();
		assert_eq!(value, None);
	}

	#[rstest]
	#[tokio::test]
	async fn test_in_memory_cache_ttl() {
		// Arrange
		let cache = InMemoryCache::new();
		cache
			.set("key1", &"value1", Some(Duration::from_millis(50)))
			.await
			.unwrap();

		// Act
		let before: Option<String> = cache.get("key1").await.unwrap();
		tokio::time::sleep(Duration::from_millis(80)).await;
		let after: Option<String> = cache.get("key1").await.unwrap();

		// Assert
		assert_eq!(before, Some("value1".to_string()));
		assert_eq!(after, None);
		assert!(!cache.has_key("key1").await.unwrap());
	}

	#[rstest]
	#[tokio::test]
	async fn test_clones_share_store() {
		// Arrange
		let cache = InMemoryCache::new();
		let other = cache.clone();

		// Act
		cache.set("shared", &true, None).await.unwrap();

		// Assert
		let value: Option<bool> = other.get("shared").await.unwrap();
		assert_eq!(value, Some(true));
	}

	#[rstest]
	#[tokio::test]
	async fn test_last_writer_wins() {
		// Arrange
		let cache = InMemoryCache::new();

		// Act
		cache.set("k", &1_i64, None).await.unwrap();
		cache.set("k", &2_i64, None).await.unwrap();

		// Assert
		let value: Option<i64> = cache.get("k").await.unwrap();
		assert_eq!(value, Some(2));
	}

	#[rstest]
	#[tokio::test]
	async fn test_statistics_and_cleanup() {
		// Arrange
		let cache = InMemoryCache::new();
		cache.set("a", &"x", None).await.unwrap();
		cache
			.set("b", &"y", Some(Duration::ZERO))
			.await
			.unwrap();

		// Act
		let _: Option<String> = cache.get("a").await.unwrap();
		let _: Option<String> = cache.get("b").await.unwrap();
		cache.cleanup_expired().await;
		let stats = cache.statistics().await;

		// Assert
		assert_eq!(stats.hits, 1);
		assert_eq!(stats.misses, 1);
		assert_eq!(stats.entry_count, 1);
		assert_eq!(cache.len().await, 1);
	}
}
