//! Master/slave server selection with dead-server back-off
//!
//! [`ServerPool::open_from_pool`] walks a shuffled list of candidate servers
//! and returns the first one that opens. Servers that fail are recorded as
//! dead in a shared status cache for the retry interval, so concurrent
//! callers sharing the cache skip them too.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::driver::mask_dsn_password;
use crate::error::{DbError, Result};
use rand::seq::SliceRandom;
use rock_cache::{Cache, CacheExt, InMemoryCache};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const STATUS_KEY_METHOD: &str = "rock_db::pool::open_from_pool";

/// Status cache shared by every connection that was not given its own
pub(crate) fn default_status_cache() -> Arc<dyn Cache> {
	static CACHE: OnceLock<Arc<InMemoryCache>> = OnceLock::new();
	let cache = CACHE.get_or_init(|| Arc::new(InMemoryCache::new()));
	Arc::clone(cache) as Arc<dyn Cache>
}

/// Failover selector over a list of candidate servers
#[derive(Clone)]
pub struct ServerPool {
	status_cache: Arc<dyn Cache>,
	retry_interval: Duration,
	shuffle: bool,
}

impl std::fmt::Debug for ServerPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerPool")
			.field("retry_interval", &self.retry_interval)
			.field("shuffle", &self.shuffle)
			.finish_non_exhaustive()
	}
}

impl ServerPool {
	pub fn new(status_cache: Arc<dyn Cache>, retry_interval: Duration) -> Self {
		Self {
			status_cache,
			retry_interval,
			shuffle: true,
		}
	}

	/// Try candidates in the configured order instead of a random one
	pub fn with_shuffle(mut self, shuffle: bool) -> Self {
		self.shuffle = shuffle;
		self
	}

	pub fn retry_interval(&self) -> Duration {
		self.retry_interval
	}

	pub fn status_cache(&self) -> &Arc<dyn Cache> {
		&self.status_cache
	}

	/// Status cache key of one server
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::pool::ServerPool;
	///
	/// let key = ServerPool::status_key("mysql:host=db1");
	/// assert_eq!(key, r#"["rock_db::pool::open_from_pool","mysql:host=db1"]"#);
	/// ```
	pub fn status_key(dsn: &str) -> String {
		serde_json::json!([STATUS_KEY_METHOD, dsn]).to_string()
	}

	/// Whether `dsn` failed within the retry interval
	///
	/// Status cache failures are logged and read as "alive".
	pub async fn is_dead(&self, dsn: &str) -> bool {
		match self.status_cache.get::<bool>(&Self::status_key(dsn)).await {
			Ok(flag) => flag.unwrap_or(false),
			Err(e) => {
				tracing::warn!(dsn = %mask_dsn_password(dsn), error = %e, "Failed to read server status");
				false
			}
		}
	}

	/// Record `dsn` as dead for the retry interval
	pub async fn mark_dead(&self, dsn: &str) {
		let result = self
			.status_cache
			.set(&Self::status_key(dsn), &true, Some(self.retry_interval))
			.await;
		if let Err(e) = result {
			tracing::warn!(dsn = %mask_dsn_password(dsn), error = %e, "Failed to record server status");
		}
	}

	/// Open the first reachable server among `candidates`
	///
	/// Each candidate is merged over `shared` and turned into a connection
	/// by `factory`. Returns `Ok(None)` when the list is empty or every
	/// candidate is dead or failed to open; the caller decides whether that
	/// is fatal. A candidate without a DSN is a configuration error.
	pub async fn open_from_pool<F>(
		&self,
		candidates: &[ServerConfig],
		shared: &ServerConfig,
		factory: F,
	) -> Result<Option<Connection>>
	where
		F: Fn(&ServerConfig) -> Connection,
	{
		if candidates.is_empty() {
			return Ok(None);
		}

		let mut merged: Vec<ServerConfig> = candidates
			.iter()
			.map(|candidate| candidate.merged_over(shared))
			.collect();
		if self.shuffle {
			merged.shuffle(&mut rand::thread_rng());
		}

		for config in &merged {
			let dsn = match config.dsn.as_deref() {
				Some(dsn) if !dsn.trim().is_empty() => dsn,
				_ => {
					return Err(DbError::Config(
						"The 'dsn' option must be specified for every pool server".to_string(),
					));
				}
			};
			let masked = mask_dsn_password(dsn);

			if self.is_dead(dsn).await {
				tracing::debug!(dsn = %masked, "Skipping server marked as dead");
				continue;
			}

			let connection = factory(config);
			tracing::info!(dsn = %masked, "Opening DB connection from pool");
			// Connection::open recurses into this pool
			match Box::pin(connection.open()).await {
				Ok(()) => return Ok(Some(connection)),
				Err(e @ (DbError::Config(_) | DbError::UnsupportedDriver(_))) => return Err(e),
				Err(e) => {
					tracing::warn!(
						dsn = %masked,
						error = %e,
						retry_in_secs = self.retry_interval.as_secs(),
						"Connection to pool server failed, marking it dead"
					);
					self.mark_dead(dsn).await;
				}
			}
		}

		Ok(None)
	}
}
