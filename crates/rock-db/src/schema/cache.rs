//! Process-wide table metadata cache

use super::table::TableSchema;
use crate::driver::DriverName;
use parking_lot::RwLock;
use rock_cache::{InMemoryCache, TaggedCache, TaggedCacheWrapper};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Connection identity table metadata is cached under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SchemaIdentity {
	pub driver: DriverName,
	pub dsn: String,
	pub username: String,
}

impl SchemaIdentity {
	pub fn new(driver: DriverName, dsn: impl Into<String>, username: impl Into<String>) -> Self {
		Self {
			driver,
			dsn: dsn.into(),
			username: username.into(),
		}
	}

	fn schema_class(&self) -> String {
		format!("rock_db::schema::{}", self.driver)
	}

	/// Backing cache key of one table
	pub fn table_key(&self, table: &str) -> String {
		serde_json::json!([self.schema_class(), self.dsn, self.username, table]).to_string()
	}

	/// Tag shared by every table cached for this identity
	pub fn group_tag(&self) -> String {
		serde_json::json!([self.schema_class(), self.dsn, self.username]).to_string()
	}
}

/// Backing cache payload; keeps "known not to exist" apart from a miss
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CachedTable {
	pub(crate) table: Option<TableSchema>,
}

type TableKey = (SchemaIdentity, String);

/// Table metadata cache shared by the connections that hold it
///
/// Two layers are kept:
///
/// - an in-process map from (identity, table name) to the loaded metadata,
///   including a cached `None` for tables known not to exist
/// - a [`TaggedCache`] backing store used when schema caching is enabled on
///   the connection; every entry is tagged with the identity's group tag
///
/// Both layers live until [`Schema::refresh`](super::Schema::refresh) clears
/// them; the in-process layer never expires on its own.
pub struct SchemaCache {
	tables: RwLock<HashMap<TableKey, Option<Arc<TableSchema>>>>,
	table_names: RwLock<HashMap<TableKey, Vec<String>>>,
	backing: Arc<dyn TaggedCache>,
}

impl Default for SchemaCache {
	fn default() -> Self {
		Self::new()
	}
}

impl SchemaCache {
	/// Cache backed by a fresh in-memory store
	pub fn new() -> Self {
		Self::with_backing(Arc::new(TaggedCacheWrapper::new(Arc::new(
			InMemoryCache::new(),
		))))
	}

	pub fn with_backing(backing: Arc<dyn TaggedCache>) -> Self {
		Self {
			tables: RwLock::new(HashMap::new()),
			table_names: RwLock::new(HashMap::new()),
			backing,
		}
	}

	pub fn backing(&self) -> &Arc<dyn TaggedCache> {
		&self.backing
	}

	/// `None` when the table was never looked up, `Some(None)` when it is
	/// known not to exist
	pub fn cached_table(
		&self,
		identity: &SchemaIdentity,
		name: &str,
	) -> Option<Option<Arc<TableSchema>>> {
		self.tables
			.read()
			.get(&(identity.clone(), name.to_string()))
			.cloned()
	}

	pub fn store_table(
		&self,
		identity: &SchemaIdentity,
		name: &str,
		table: Option<Arc<TableSchema>>,
	) {
		self.tables
			.write()
			.insert((identity.clone(), name.to_string()), table);
	}

	pub fn cached_table_names(&self, identity: &SchemaIdentity, schema: &str) -> Option<Vec<String>> {
		self.table_names
			.read()
			.get(&(identity.clone(), schema.to_string()))
			.cloned()
	}

	pub fn store_table_names(&self, identity: &SchemaIdentity, schema: &str, names: Vec<String>) {
		self.table_names
			.write()
			.insert((identity.clone(), schema.to_string()), names);
	}

	/// Drop the in-process entries of one identity
	pub fn clear(&self, identity: &SchemaIdentity) {
		self.tables.write().retain(|(owner, _), _| owner != identity);
		self.table_names
			.write()
			.retain(|(owner, _), _| owner != identity);
	}

	/// Drop one in-process table entry
	pub fn forget_table(&self, identity: &SchemaIdentity, name: &str) {
		self.tables
			.write()
			.remove(&(identity.clone(), name.to_string()));
	}

	/// Number of in-process table entries across all identities
	pub fn len(&self) -> usize {
		self.tables.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.tables.read().is_empty()
	}
}
