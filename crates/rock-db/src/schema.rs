//! Schema introspection and SQL quoting
//!
//! [`Schema`] is created lazily by [`Connection::get_schema`] and wraps the
//! connection's [`Dialect`]. It quotes identifiers, expands the `{{table}}`
//! and `[[column]]` placeholders of raw SQL, and loads [`TableSchema`]
//! metadata through the shared [`SchemaCache`].

pub mod cache;
pub mod table;

pub use cache::{SchemaCache, SchemaIdentity};
pub use table::{ColumnSchema, ColumnType, ForeignKey, NativeType, TableSchema};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionInner};
use crate::dialect::Dialect;
use crate::error::{DbError, Result};
use crate::query::QueryBuilder;
use cache::CachedTable;
use regex::{Captures, Regex};
use rock_cache::{CacheExt, TaggedCacheExt};
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

static PLACEHOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(\{\{(%?[\w\-\. ]+%?)\}\}|\[\[([\w\-\. ]+)\]\])")
		.expect("placeholder pattern is a valid regex")
});

static PREFIXED_TABLE_PATTERN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("table pattern is a valid regex"));

/// Dialect bound view of one connection's database
pub struct Schema {
	dialect: Arc<dyn Dialect>,
	identity: SchemaIdentity,
	cache: Arc<SchemaCache>,
	table_prefix: String,
	alias_separator: String,
	enable_cache: bool,
	cache_expire: Option<Duration>,
	cache_exclude: Vec<String>,
	connection: Weak<ConnectionInner>,
}

impl std::fmt::Debug for Schema {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Schema")
			.field("driver", &self.identity.driver)
			.field("table_prefix", &self.table_prefix)
			.field("enable_cache", &self.enable_cache)
			.finish_non_exhaustive()
	}
}

impl Schema {
	pub(crate) fn new(
		connection: Weak<ConnectionInner>,
		config: &ConnectionConfig,
		dialect: Arc<dyn Dialect>,
		identity: SchemaIdentity,
		cache: Arc<SchemaCache>,
	) -> Self {
		Self {
			dialect,
			identity,
			cache,
			table_prefix: config.table_prefix.clone(),
			alias_separator: config.alias_separator.clone(),
			enable_cache: config.enable_schema_cache,
			cache_expire: config.schema_cache_expire(),
			cache_exclude: config.schema_cache_exclude.clone(),
			connection,
		}
	}

	pub fn dialect(&self) -> &Arc<dyn Dialect> {
		&self.dialect
	}

	pub fn identity(&self) -> &SchemaIdentity {
		&self.identity
	}

	pub fn cache(&self) -> &Arc<SchemaCache> {
		&self.cache
	}

	pub fn table_prefix(&self) -> &str {
		&self.table_prefix
	}

	pub fn quote_table_name(&self, name: &str) -> String {
		self.dialect.quote_table_name(name)
	}

	pub fn quote_simple_table_name(&self, name: &str) -> String {
		self.dialect.quote_simple_table_name(name)
	}

	pub fn quote_column_name(&self, name: &str) -> String {
		self.dialect.quote_column_name(name)
	}

	pub fn quote_simple_column_name(&self, name: &str) -> String {
		self.dialect.quote_simple_column_name(name)
	}

	pub fn quote_value(&self, value: &str) -> String {
		self.dialect.quote_value(value)
	}

	/// Expand `{{table}}` and `[[column]]` placeholders
	///
	/// A `%` inside `{{...}}` is replaced with the table prefix after the
	/// name has been quoted.
	pub fn quote_sql(&self, sql: &str) -> String {
		PLACEHOLDER_PATTERN
			.replace_all(sql, |caps: &Captures<'_>| {
				if let Some(column) = caps.get(3) {
					return self.quote_column_name(column.as_str());
				}
				let table = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
				self.quote_table_name(table).replace('%', &self.table_prefix)
			})
			.into_owned()
	}

	/// Table name with `{{...}}` removed and `%` replaced by the prefix
	pub fn get_raw_table_name(&self, name: &str) -> String {
		if !name.contains("{{") {
			return name.to_string();
		}
		PREFIXED_TABLE_PATTERN
			.replace_all(name, "$1")
			.replace('%', &self.table_prefix)
	}

	/// Group tag shared by every backing cache entry of this connection
	pub fn cache_group_tag(&self) -> String {
		self.identity.group_tag()
	}

	/// Query builder for this dialect
	pub fn create_query_builder(&self) -> QueryBuilder {
		QueryBuilder::new(Arc::clone(&self.dialect), self.alias_separator.clone())
	}

	fn connection(&self) -> Result<Connection> {
		self.connection
			.upgrade()
			.map(Connection::from_inner)
			.ok_or_else(|| DbError::Config("The connection owning this schema was dropped".to_string()))
	}

	fn uses_backing_cache(&self, name: &str, raw_name: &str) -> bool {
		self.enable_cache
			&& !self
				.cache_exclude
				.iter()
				.any(|excluded| excluded == name || excluded == raw_name)
	}

	/// Metadata of one table, `None` when it does not exist
	///
	/// Anything after the first whitespace is treated as a table alias and
	/// ignored. Results, including "does not exist", are cached in process;
	/// `refresh` bypasses both cache layers.
	pub async fn get_table_schema(&self, name: &str, refresh: bool) -> Result<Option<Arc<TableSchema>>> {
		let name = name.split_whitespace().next().unwrap_or_default();
		if !refresh && let Some(cached) = self.cache.cached_table(&self.identity, name) {
			return Ok(cached);
		}

		let raw_name = self.get_raw_table_name(name);
		if !self.uses_backing_cache(name, &raw_name) {
			let table = self.load_table(&raw_name).await?;
			self.cache.store_table(&self.identity, name, table.clone());
			return Ok(table);
		}

		let key = self.identity.table_key(&raw_name);
		let backing = self.cache.backing();
		if !refresh && let Some(entry) = backing.get::<CachedTable>(&key).await? {
			let table = entry.table.map(Arc::new);
			self.cache.store_table(&self.identity, name, table.clone());
			return Ok(table);
		}

		let table = self.load_table(&raw_name).await?;
		let entry = CachedTable {
			table: table.as_deref().cloned(),
		};
		backing
			.set_with_tags(&key, &entry, self.cache_expire, &[self.cache_group_tag().as_str()])
			.await?;
		self.cache.store_table(&self.identity, name, table.clone());
		Ok(table)
	}

	async fn load_table(&self, raw_name: &str) -> Result<Option<Arc<TableSchema>>> {
		let connection = self.connection()?;
		tracing::debug!(table = raw_name, driver = %self.identity.driver, "Loading table schema");
		Ok(self
			.dialect
			.load_table_schema(&connection, raw_name)
			.await?
			.map(Arc::new))
	}

	/// Metadata of every table in `schema`; empty means the default schema
	pub async fn get_table_schemas(&self, schema: &str, refresh: bool) -> Result<Vec<Arc<TableSchema>>> {
		let mut tables = Vec::new();
		for name in self.get_table_names(schema, refresh).await? {
			let name = if schema.is_empty() {
				name
			} else {
				format!("{}.{}", schema, name)
			};
			if let Some(table) = self.get_table_schema(&name, refresh).await? {
				tables.push(table);
			}
		}
		Ok(tables)
	}

	/// Names of all tables in `schema`, cached in process
	pub async fn get_table_names(&self, schema: &str, refresh: bool) -> Result<Vec<String>> {
		if !refresh && let Some(names) = self.cache.cached_table_names(&self.identity, schema) {
			return Ok(names);
		}
		let connection = self.connection()?;
		let names = self.dialect.find_table_names(&connection, schema).await?;
		self.cache
			.store_table_names(&self.identity, schema, names.clone());
		Ok(names)
	}

	/// Drop all cached metadata of this connection
	///
	/// Clears the in-process entries and invalidates every backing cache
	/// entry carrying [`cache_group_tag`](Self::cache_group_tag).
	pub async fn refresh(&self) -> Result<()> {
		self.cache.clear(&self.identity);
		self.cache
			.backing()
			.invalidate_tag(&self.cache_group_tag())
			.await?;
		tracing::debug!(driver = %self.identity.driver, "Schema cache refreshed");
		Ok(())
	}

	/// Drop the cached metadata of one table
	pub async fn refresh_table_schema(&self, name: &str) -> Result<()> {
		let name = name.split_whitespace().next().unwrap_or_default();
		self.cache.forget_table(&self.identity, name);
		let raw_name = self.get_raw_table_name(name);
		if self.uses_backing_cache(name, &raw_name) {
			self.cache
				.backing()
				.delete(&self.identity.table_key(&raw_name))
				.await?;
		}
		Ok(())
	}
}
