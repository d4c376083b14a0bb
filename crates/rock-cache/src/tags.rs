//! Cache tags functionality

use crate::cache_trait::Cache;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Tagged cache trait
///
/// Extends the base cache interface with tag-based invalidation: every entry
/// may carry several tags, and [`invalidate_tag`](TaggedCache::invalidate_tag)
/// drops all entries carrying a tag in one call.
#[async_trait]
pub trait TaggedCache: Cache {
	/// Store raw bytes and associate them with `tags`
	async fn set_bytes_with_tags(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
		tags: &[&str],
	) -> Result<()>;

	/// Tags associated with a key
	async fn get_tags(&self, key: &str) -> Result<Vec<String>>;

	/// Invalidate all entries with a specific tag
	async fn invalidate_tag(&self, tag: &str) -> Result<()>;

	/// Invalidate all entries with any of the specified tags
	async fn invalidate_tags(&self, tags: &[&str]) -> Result<()> {
		for tag in tags {
			self.invalidate_tag(tag).await?;
		}
		Ok(())
	}

	/// Keys associated with a tag
	async fn get_keys_for_tag(&self, tag: &str) -> Result<Vec<String>>;
}

/// Typed JSON helper for tagged writes
#[async_trait]
pub trait TaggedCacheExt: TaggedCache {
	async fn set_with_tags<T>(
		&self,
		key: &str,
		value: &T,
		ttl: Option<Duration>,
		tags: &[&str],
	) -> Result<()>
	where
		T: Serialize + Send + Sync + ?Sized,
	{
		let bytes = serde_json::to_vec(value)?;
		self.set_bytes_with_tags(key, bytes, ttl, tags).await
	}
}

impl<C: TaggedCache + ?Sized> TaggedCacheExt for C {}

/// Tagged cache wrapper
///
/// Wraps a standard cache implementation and adds tag-based invalidation.
/// The tag index lives next to the wrapped cache in process memory.
///
/// # Examples
///
/// ```
/// use rock_cache::{CacheExt, InMemoryCache, TaggedCache, TaggedCacheExt, TaggedCacheWrapper};
/// use std::sync::Arc;
///
/// # async fn example() -> rock_cache::Result<()> {
/// let tagged = TaggedCacheWrapper::new(Arc::new(InMemoryCache::new()));
///
/// tagged.set_with_tags("product:1", &"Laptop", None, &["products", "electronics"]).await?;
/// tagged.set_with_tags("product:3", &"Book", None, &["products", "books"]).await?;
///
/// tagged.invalidate_tag("electronics").await?;
///
/// let laptop: Option<String> = tagged.get("product:1").await?;
/// let book: Option<String> = tagged.get("product:3").await?;
/// assert_eq!(laptop, None);
/// assert_eq!(book, Some("Book".to_string()));
/// # Ok(())
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(example()).unwrap();
/// ```
pub struct TaggedCacheWrapper<C: Cache + ?Sized> {
	cache: Arc<C>,
	tag_index: Arc<RwLock<TagIndex>>,
}

#[derive(Default)]
struct TagIndex {
	// tag -> set of keys
	tag_to_keys: HashMap<String, HashSet<String>>,
	// key -> set of tags
	key_to_tags: HashMap<String, HashSet<String>>,
}

impl TagIndex {
	fn remove_key(&mut self, key: &str) {
		if let Some(tags) = self.key_to_tags.remove(key) {
			for tag in tags {
				if let Some(keys) = self.tag_to_keys.get_mut(&tag) {
					keys.remove(key);
					if keys.is_empty() {
						self.tag_to_keys.remove(&tag);
					}
				}
			}
		}
	}
}

impl<C: Cache + ?Sized> TaggedCacheWrapper<C> {
	/// Create a new tagged cache wrapper
	pub fn new(cache: Arc<C>) -> Self {
		Self {
			cache,
			tag_index: Arc::new(RwLock::new(TagIndex::default())),
		}
	}

	/// The wrapped cache
	pub fn inner(&self) -> &Arc<C> {
		&self.cache
	}

	async fn add_tags(&self, key: &str, tags: &[&str]) {
		let mut index = self.tag_index.write().await;

		for tag in tags {
			index
				.tag_to_keys
				.entry(tag.to_string())
				.or_default()
				.insert(key.to_string());

			index
				.key_to_tags
				.entry(key.to_string())
				.or_default()
				.insert(tag.to_string());
		}
	}
}

impl<C: Cache + ?Sized> Clone for TaggedCacheWrapper<C> {
	fn clone(&self) -> Self {
		Self {
			cache: Arc::clone(&self.cache),
			tag_index: Arc::clone(&self.tag_index),
		}
	}
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for TaggedCacheWrapper<C> {
	async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
		self.cache.get_bytes(key).await
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
		self.cache.set_bytes(key, value, ttl).await
	}

	async fn delete(&self, key: &str) -> Result<()> {
		self.cache.delete(key).await?;
		self.tag_index.write().await.remove_key(key);
		Ok(())
	}

	async fn has_key(&self, key: &str) -> Result<bool> {
		self.cache.has_key(key).await
	}

	async fn clear(&self) -> Result<()> {
		self.cache.clear().await?;
		let mut index = self.tag_index.write().await;
		index.tag_to_keys.clear();
		index.key_to_tags.clear();
		Ok(())
	}
}

#[async_trait]
impl<C: Cache + ?Sized> TaggedCache for TaggedCacheWrapper<C> {
	async fn set_bytes_with_tags(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
		tags: &[&str],
	) -> Result<()> {
		self.cache.set_bytes(key, value, ttl).await?;
		self.add_tags(key, tags).await;
		Ok(())
	}

	async fn get_tags(&self, key: &str) -> Result<Vec<String>> {
		let index = self.tag_index.read().await;
		Ok(index
			.key_to_tags
			.get(key)
			.map(|tags| tags.iter().cloned().collect())
			.unwrap_or_default())
	}

	async fn invalidate_tag(&self, tag: &str) -> Result<()> {
		let keys: Vec<String> = {
			let index = self.tag_index.read().await;
			index
				.tag_to_keys
				.get(tag)
				.map(|keys| keys.iter().cloned().collect())
				.unwrap_or_default()
		};

		for key in &keys {
			self.cache.delete(key).await?;
		}

		let mut index = self.tag_index.write().await;
		for key in &keys {
			index.remove_key(key);
		}
		index.tag_to_keys.remove(tag);

		tracing::debug!(tag, invalidated = keys.len(), "Invalidated cache tag");
		Ok(())
	}

	async fn get_keys_for_tag(&self, tag: &str) -> Result<Vec<String>> {
		let index = self.tag_index.read().await;
		Ok(index
			.tag_to_keys
			.get(tag)
			.map(|keys| keys.iter().cloned().collect())
			.unwrap_or_default())
	}
}
