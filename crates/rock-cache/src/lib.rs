//! # Rock Cache
//!
//! Key/value cache contract consumed by the Rock database layer.
//!
//! The database layer only needs a small surface from its cache:
//!
//! - `get` / `set` with an optional time-to-live
//! - `delete`
//! - tag-tracked writes and bulk invalidation by tag
//!
//! [`Cache`] is the object-safe byte-level trait, [`CacheExt`] adds typed
//! JSON helpers on top of it, and [`TaggedCache`] extends it with tag
//! invalidation. [`InMemoryCache`] is the default backend and
//! [`TaggedCacheWrapper`] turns any [`Cache`] into a [`TaggedCache`].
//!
//! ## Quick Start
//!
//! ```rust
//! use rock_cache::{CacheExt, InMemoryCache, TaggedCache, TaggedCacheExt, TaggedCacheWrapper};
//! use std::sync::Arc;
//!
//! # async fn example() -> rock_cache::Result<()> {
//! let cache = TaggedCacheWrapper::new(Arc::new(InMemoryCache::new()));
//!
//! cache.set_with_tags("schema:users", &"metadata", None, &["db:main"]).await?;
//! cache.invalidate_tag("db:main").await?;
//!
//! let value: Option<String> = cache.get("schema:users").await?;
//! assert_eq!(value, None);
//! # Ok(())
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(example()).unwrap();
//! ```

pub mod cache_trait;
mod entry;
pub mod error;
pub mod in_memory;
pub mod tags;

pub use cache_trait::{Cache, CacheExt};
pub use error::{CacheError, Result};
pub use in_memory::{CacheStatistics, InMemoryCache};
pub use tags::{TaggedCache, TaggedCacheExt, TaggedCacheWrapper};
