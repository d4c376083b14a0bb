//! Database connection
//!
//! A [`Connection`] owns at most one live driver handle, opened lazily on
//! first use. With a `masters` list the handle is taken from the first
//! reachable master; with `slaves` read queries are routed to one slave
//! resolved once per connection lifetime. Clones share the same handle and
//! state.
//!
//! A connection is a single logical conversation with the database: clones
//! serialize their statements on the one handle, and concurrent units of
//! work should each build their own connection.

use crate::command::Command;
use crate::config::{ConnectionConfig, ServerConfig};
use crate::dialect::{Dialect, dialect_for};
use crate::driver::{ConnectOptions, Driver, DriverHandle, DriverName, QueryResult, SqlxDriver, mask_dsn_password};
use crate::error::{DbError, Result};
use crate::events::{ConnectionEvent, ConnectionEventListener};
use crate::pool::{ServerPool, default_status_cache};
use crate::query::Condition;
use crate::schema::{Schema, SchemaCache, SchemaIdentity, TableSchema};
use crate::transaction::{Transaction, TransactionInner};
use crate::types::{IsolationLevel, Params, QueryValue, Row};
use indexmap::IndexMap;
use rock_cache::Cache;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{Mutex, RwLock};

/// Process-wide schema cache used when none is given to the builder
fn default_schema_cache() -> Arc<SchemaCache> {
	static CACHE: OnceLock<Arc<SchemaCache>> = OnceLock::new();
	Arc::clone(CACHE.get_or_init(|| Arc::new(SchemaCache::new())))
}

#[derive(Default)]
struct ConnectionState {
	handle: Option<Box<dyn DriverHandle>>,
}

pub(crate) struct ConnectionInner {
	config: ConnectionConfig,
	driver: Arc<dyn Driver>,
	dialect: Option<Arc<dyn Dialect>>,
	schema_cache: Arc<SchemaCache>,
	pool: ServerPool,
	listeners: Arc<RwLock<Vec<Arc<dyn ConnectionEventListener>>>>,
	state: Mutex<ConnectionState>,
	active_dsn: parking_lot::Mutex<Option<String>>,
	schema: parking_lot::Mutex<Option<Arc<Schema>>>,
	/// Kept until it ends, even when the caller drops every handle
	transaction: parking_lot::Mutex<Option<Arc<TransactionInner>>>,
	enable_slaves: AtomicBool,
	/// `None` until resolved, then the chosen slave if any
	slave: Mutex<Option<Option<Connection>>>,
}

/// Builder for [`Connection`]
///
/// # Examples
///
/// ```
/// use rock_db::{Connection, ConnectionConfig};
/// use rock_db::testing::MockDriver;
/// use std::sync::Arc;
///
/// let driver = MockDriver::new();
/// let db = Connection::builder(ConnectionConfig::new("mysql:host=localhost;dbname=app"))
///     .with_driver(Arc::new(driver.clone()))
///     .build();
///
/// assert_eq!(db.driver_name().unwrap().as_str(), "mysql");
/// ```
pub struct ConnectionBuilder {
	config: ConnectionConfig,
	driver: Option<Arc<dyn Driver>>,
	dialect: Option<Arc<dyn Dialect>>,
	schema_cache: Option<Arc<SchemaCache>>,
	status_cache: Option<Arc<dyn Cache>>,
	listeners: Vec<Arc<dyn ConnectionEventListener>>,
	shuffle_servers: bool,
}

impl ConnectionBuilder {
	/// Driver opening native handles, [`SqlxDriver`] by default
	pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
		self.driver = Some(driver);
		self
	}

	/// Use `dialect` instead of the one derived from the DSN
	pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
		self.dialect = Some(dialect);
		self
	}

	/// Table metadata cache, shared process-wide by default
	pub fn with_schema_cache(mut self, cache: Arc<SchemaCache>) -> Self {
		self.schema_cache = Some(cache);
		self
	}

	/// Cache recording dead pool servers, shared process-wide by default
	pub fn with_server_status_cache(mut self, cache: Arc<dyn Cache>) -> Self {
		self.status_cache = Some(cache);
		self
	}

	pub fn with_event_listener(mut self, listener: Arc<dyn ConnectionEventListener>) -> Self {
		self.listeners.push(listener);
		self
	}

	/// Try pool servers in configured order instead of shuffling them
	pub fn with_server_shuffle(mut self, shuffle: bool) -> Self {
		self.shuffle_servers = shuffle;
		self
	}

	pub fn build(self) -> Connection {
		let pool = ServerPool::new(
			self.status_cache.unwrap_or_else(default_status_cache),
			self.config.server_retry_interval(),
		)
		.with_shuffle(self.shuffle_servers);
		Connection::from_parts(
			self.config,
			self.driver.unwrap_or_else(|| Arc::new(SqlxDriver)),
			self.dialect,
			self.schema_cache.unwrap_or_else(default_schema_cache),
			pool,
			Arc::new(RwLock::new(self.listeners)),
		)
	}
}

/// Connection to one database, possibly backed by master and slave pools
#[derive(Clone)]
pub struct Connection {
	inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("dsn", &self.masked_dsn())
			.finish_non_exhaustive()
	}
}

/// Restores the slave routing flag when dropped
struct SlaveRoutingGuard<'a> {
	flag: &'a AtomicBool,
	previous: bool,
}

impl<'a> SlaveRoutingGuard<'a> {
	fn disable(flag: &'a AtomicBool) -> Self {
		let previous = flag.swap(false, Ordering::SeqCst);
		Self { flag, previous }
	}
}

impl Drop for SlaveRoutingGuard<'_> {
	fn drop(&mut self) {
		self.flag.store(self.previous, Ordering::SeqCst);
	}
}

impl Connection {
	/// Connection using the default sqlx driver and shared caches
	pub fn new(config: ConnectionConfig) -> Self {
		Self::builder(config).build()
	}

	pub fn builder(config: ConnectionConfig) -> ConnectionBuilder {
		ConnectionBuilder {
			config,
			driver: None,
			dialect: None,
			schema_cache: None,
			status_cache: None,
			listeners: Vec::new(),
			shuffle_servers: true,
		}
	}

	fn from_parts(
		config: ConnectionConfig,
		driver: Arc<dyn Driver>,
		dialect: Option<Arc<dyn Dialect>>,
		schema_cache: Arc<SchemaCache>,
		pool: ServerPool,
		listeners: Arc<RwLock<Vec<Arc<dyn ConnectionEventListener>>>>,
	) -> Self {
		let enable_slaves = config.enable_slaves;
		Self {
			inner: Arc::new(ConnectionInner {
				config,
				driver,
				dialect,
				schema_cache,
				pool,
				listeners,
				state: Mutex::new(ConnectionState::default()),
				active_dsn: parking_lot::Mutex::new(None),
				schema: parking_lot::Mutex::new(None),
				transaction: parking_lot::Mutex::new(None),
				enable_slaves: AtomicBool::new(enable_slaves),
				slave: Mutex::new(None),
			}),
		}
	}

	pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
		Self { inner }
	}

	pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
		Arc::downgrade(&self.inner)
	}

	/// Member of a master or slave pool sharing this connection's driver,
	/// caches and listeners
	fn pool_member(&self, server: &ServerConfig) -> Connection {
		Self::from_parts(
			self.inner.config.for_server(server),
			Arc::clone(&self.inner.driver),
			self.inner.dialect.clone(),
			Arc::clone(&self.inner.schema_cache),
			self.inner.pool.clone(),
			Arc::clone(&self.inner.listeners),
		)
	}

	pub fn config(&self) -> &ConnectionConfig {
		&self.inner.config
	}

	/// Register a listener for connection events
	pub async fn add_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
		let mut listeners = self.inner.listeners.write().await;
		listeners.push(listener);
	}

	pub(crate) async fn emit_event(&self, event: ConnectionEvent) {
		let listeners = self.inner.listeners.read().await;
		for listener in listeners.iter() {
			listener.on_event(event.clone()).await;
		}
	}

	/// DSN of the open handle, or the configured one, with the password masked
	pub fn masked_dsn(&self) -> String {
		let active = self.inner.active_dsn.lock().clone();
		mask_dsn_password(active.as_deref().unwrap_or(&self.inner.config.dsn))
	}

	/// Whether a live handle is held
	pub async fn is_active(&self) -> bool {
		self.inner.state.lock().await.handle.is_some()
	}

	/// Open the connection; a no-op when it is already open
	///
	/// With a non-empty `masters` list one master is picked through the
	/// server pool and [`DbError::NoServersAvailable`] is returned when none
	/// can be reached.
	pub async fn open(&self) -> Result<()> {
		let opened = {
			let mut state = self.inner.state.lock().await;
			if state.handle.is_some() {
				return Ok(());
			}
			self.open_locked(&mut state).await?
		};
		if let Some(dsn) = opened {
			self.emit_event(ConnectionEvent::after_open(dsn)).await;
		}
		Ok(())
	}

	/// Returns the masked DSN when this connection opened its own handle
	/// and must announce it
	async fn open_locked(&self, state: &mut ConnectionState) -> Result<Option<String>> {
		let config = &self.inner.config;
		if !config.masters.is_empty() {
			let master = self
				.inner
				.pool
				.open_from_pool(&config.masters, &config.master_config, |server| {
					self.pool_member(server)
				})
				.await?
				.ok_or_else(|| DbError::NoServersAvailable("master".to_string()))?;
			let (handle, dsn) = master.take_handle().await;
			state.handle = handle;
			*self.inner.active_dsn.lock() = dsn;
			return Ok(None);
		}

		if config.dsn.trim().is_empty() {
			return Err(DbError::Config("Connection::dsn cannot be empty".to_string()));
		}

		let options = ConnectOptions {
			dsn: config.dsn.clone(),
			username: config.username.clone(),
			password: config.password.clone(),
			charset: config.charset.clone(),
			emulate_prepare: config.emulate_prepare,
		};
		let masked = options.masked_dsn();
		tracing::info!(dsn = %masked, "Opening DB connection");

		let mut handle = self
			.inner
			.driver
			.connect(&options)
			.await
			.map_err(|e| match e {
				DbError::Connection { .. } => e,
				other => DbError::Connection {
					dsn: masked.clone(),
					source: Box::new(other),
				},
			})?;

		if let Some(charset) = &config.charset
			&& let Some(sql) = self.dialect()?.charset_sql(charset)
			&& let Err(e) = handle.execute(&sql, &[]).await
		{
			if let Err(close_error) = handle.close().await {
				tracing::warn!(dsn = %masked, error = %close_error, "Closing DB connection after failed charset setup failed");
			}
			return Err(e);
		}

		state.handle = Some(handle);
		*self.inner.active_dsn.lock() = Some(config.dsn.clone());
		Ok(Some(masked))
	}

	/// Move the live handle out of this connection, leaving it closed
	async fn take_handle(&self) -> (Option<Box<dyn DriverHandle>>, Option<String>) {
		let handle = self.inner.state.lock().await.handle.take();
		let dsn = self.inner.active_dsn.lock().take();
		(handle, dsn)
	}

	/// Close the connection; a no-op when it is already closed
	///
	/// Also closes the resolved slave, drops the cached schema and
	/// deactivates the current transaction.
	pub async fn close(&self) -> Result<()> {
		let slave = self.inner.slave.lock().await.take().flatten();
		if let Some(slave) = slave {
			Box::pin(slave.close()).await?;
		}

		let (handle, dsn) = self.take_handle().await;
		if let Some(handle) = handle {
			tracing::info!(dsn = %mask_dsn_password(dsn.as_deref().unwrap_or_default()), "Closing DB connection");
			handle.close().await?;
		}

		*self.inner.schema.lock() = None;
		let transaction = self.inner.transaction.lock().take();
		if let Some(transaction) = transaction {
			transaction.reset();
		}
		Ok(())
	}

	/// Driver name derived from the DSN, or from the first master's DSN
	pub fn driver_name(&self) -> Result<DriverName> {
		if let Some(dialect) = &self.inner.dialect {
			return Ok(dialect.driver_name());
		}
		let config = &self.inner.config;
		match config.masters.first() {
			Some(master) => {
				let merged = master.merged_over(&config.master_config);
				DriverName::from_dsn(merged.dsn.as_deref().unwrap_or_default())
			}
			None => DriverName::from_dsn(&config.dsn),
		}
	}

	pub fn dialect(&self) -> Result<Arc<dyn Dialect>> {
		match &self.inner.dialect {
			Some(dialect) => Ok(Arc::clone(dialect)),
			None => Ok(dialect_for(self.driver_name()?)),
		}
	}

	/// Schema of this connection, created on first use
	pub fn get_schema(&self) -> Result<Arc<Schema>> {
		let mut slot = self.inner.schema.lock();
		if let Some(schema) = slot.as_ref() {
			return Ok(Arc::clone(schema));
		}
		let dialect = self.dialect()?;
		let config = &self.inner.config;
		let identity = schema_identity(config, dialect.driver_name());
		let schema = Arc::new(Schema::new(
			self.downgrade(),
			config,
			dialect,
			identity,
			Arc::clone(&self.inner.schema_cache),
		));
		*slot = Some(Arc::clone(&schema));
		Ok(schema)
	}

	/// Metadata of one table, `None` when it does not exist
	pub async fn get_table_schema(&self, name: &str, refresh: bool) -> Result<Option<Arc<TableSchema>>> {
		self.get_schema()?.get_table_schema(name, refresh).await
	}

	/// Command for `sql` with `params` bound; the connection is not opened
	/// until the command runs
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::{Connection, ConnectionConfig, Params};
	///
	/// let db = Connection::new(ConnectionConfig::new("mysql:host=localhost").with_table_prefix("tbl_"));
	/// let command = db.create_command("SELECT [[id]] FROM {{%user}}", Params::new()).unwrap();
	/// assert_eq!(command.sql(), "SELECT `id` FROM `tbl_user`");
	/// ```
	pub fn create_command(&self, sql: impl Into<String>, params: Params) -> Result<Command> {
		let sql = self.quote_sql(&sql.into())?;
		Ok(Command::new(self.clone(), sql, params))
	}

	/// INSERT command for one row
	pub fn insert(&self, table: &str, columns: IndexMap<String, QueryValue>) -> Result<Command> {
		let mut params = Params::new();
		let sql = self
			.get_schema()?
			.create_query_builder()
			.insert(table, &columns, &mut params);
		self.create_command(sql, params)
	}

	/// UPDATE command; `params` are bound alongside the generated ones
	pub fn update(
		&self,
		table: &str,
		columns: IndexMap<String, QueryValue>,
		condition: impl Into<Condition>,
		params: Params,
	) -> Result<Command> {
		let mut params = params;
		let sql = self.get_schema()?.create_query_builder().update(
			table,
			&columns,
			&condition.into(),
			&mut params,
		)?;
		self.create_command(sql, params)
	}

	/// DELETE command; `params` are bound alongside the generated ones
	pub fn delete(&self, table: &str, condition: impl Into<Condition>, params: Params) -> Result<Command> {
		let mut params = params;
		let sql = self
			.get_schema()?
			.create_query_builder()
			.delete(table, &condition.into(), &mut params)?;
		self.create_command(sql, params)
	}

	/// Active transaction, if any
	pub fn get_transaction(&self) -> Option<Transaction> {
		self.inner
			.transaction
			.lock()
			.clone()
			.filter(|transaction| transaction.is_active())
			.map(Transaction::from_inner)
	}

	/// Begin a transaction, nesting into the active one if there is one
	pub async fn begin_transaction(&self, isolation_level: Option<IsolationLevel>) -> Result<Transaction> {
		self.open().await?;
		let transaction = self.get_transaction().unwrap_or_else(|| {
			let transaction = Transaction::new(self.downgrade());
			*self.inner.transaction.lock() = Some(transaction.shared());
			transaction
		});
		transaction.begin(isolation_level).await?;
		Ok(transaction)
	}

	/// Run `callback` inside a transaction
	///
	/// Commits when the callback succeeds and rolls back when it fails, in
	/// both cases only if the callback left the nesting level unchanged.
	/// The callback's error is returned as is.
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::{Connection, ConnectionConfig, Params};
	/// use rock_db::testing::MockDriver;
	/// use std::sync::Arc;
	///
	/// # async fn example() -> rock_db::Result<()> {
	/// let driver = MockDriver::new();
	/// let db = Connection::builder(ConnectionConfig::new("mysql:host=localhost"))
	///     .with_driver(Arc::new(driver.clone()))
	///     .build();
	///
	/// db.transaction(|db| async move {
	///     db.create_command("UPDATE t SET a = 1", Params::new())?.execute().await
	/// }, None).await?;
	///
	/// assert_eq!(driver.sql_log(), vec!["BEGIN", "UPDATE t SET a = 1", "COMMIT"]);
	/// # Ok(())
	/// # }
	/// # tokio::runtime::Runtime::new().unwrap().block_on(example()).unwrap();
	/// ```
	pub async fn transaction<F, Fut, T>(&self, callback: F, isolation_level: Option<IsolationLevel>) -> Result<T>
	where
		F: FnOnce(Connection) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let transaction = self.begin_transaction(isolation_level).await?;
		let level = transaction.level();
		match callback(self.clone()).await {
			Ok(value) => {
				if transaction.is_active() && transaction.level() == level {
					transaction.commit().await?;
				}
				Ok(value)
			}
			Err(e) => {
				if transaction.is_active() && transaction.level() == level
					&& let Err(rollback_error) = transaction.roll_back().await
				{
					tracing::error!(error = %rollback_error, "Rollback after failed transaction callback failed");
				}
				Err(e)
			}
		}
	}

	/// Slave connection for read queries
	///
	/// Resolved through the slave pool on first call and memoized until
	/// [`close`](Self::close). Returns this connection when slaves are
	/// disabled or unavailable and `fallback_to_master` is set.
	pub async fn get_slave(&self, fallback_to_master: bool) -> Result<Option<Connection>> {
		if !self.inner.enable_slaves.load(Ordering::SeqCst) {
			return Ok(fallback_to_master.then(|| self.clone()));
		}
		let mut memo = self.inner.slave.lock().await;
		if memo.is_none() {
			let config = &self.inner.config;
			let slave = self
				.inner
				.pool
				.open_from_pool(&config.slaves, &config.slave_config, |server| {
					self.pool_member(server)
				})
				.await?;
			*memo = Some(slave);
		}
		match memo.clone().flatten() {
			Some(slave) => Ok(Some(slave)),
			None => Ok(fallback_to_master.then(|| self.clone())),
		}
	}

	/// Opened connection for read queries, this one if no slave is available
	pub async fn slave(&self) -> Result<Connection> {
		let target = self.get_slave(true).await?.unwrap_or_else(|| self.clone());
		target.open().await?;
		Ok(target)
	}

	/// Opened connection for writes
	pub async fn master(&self) -> Result<Connection> {
		self.open().await?;
		Ok(self.clone())
	}

	/// Run `callback` with slave routing disabled
	///
	/// The previous routing flag is restored when the callback finishes,
	/// fails or is cancelled.
	pub async fn use_master<F, Fut, T>(&self, callback: F) -> T
	where
		F: FnOnce(Connection) -> Fut,
		Fut: Future<Output = T>,
	{
		let _guard = SlaveRoutingGuard::disable(&self.inner.enable_slaves);
		callback(self.clone()).await
	}

	/// Whether read queries may go to a slave
	pub fn slaves_enabled(&self) -> bool {
		self.inner.enable_slaves.load(Ordering::SeqCst)
	}

	/// Connection read queries run on: the master inside a transaction,
	/// otherwise the slave when one is available
	pub(crate) async fn read_target(&self) -> Result<Connection> {
		if self.get_transaction().is_some() {
			return Ok(self.clone());
		}
		Ok(self.get_slave(true).await?.unwrap_or_else(|| self.clone()))
	}

	pub fn quote_table_name(&self, name: &str) -> Result<String> {
		Ok(self.get_schema()?.quote_table_name(name))
	}

	pub fn quote_column_name(&self, name: &str) -> Result<String> {
		Ok(self.get_schema()?.quote_column_name(name))
	}

	pub fn quote_value(&self, value: &str) -> Result<String> {
		Ok(self.get_schema()?.quote_value(value))
	}

	/// Expand `{{table}}` and `[[column]]` placeholders in `sql`
	pub fn quote_sql(&self, sql: &str) -> Result<String> {
		Ok(self.get_schema()?.quote_sql(sql))
	}

	/// Id generated by the last INSERT, read from `sequence` where the
	/// dialect needs one
	pub async fn last_insert_id(&self, sequence: Option<&str>) -> Result<Option<i64>> {
		match self.dialect()?.last_insert_id_sql(sequence) {
			Some(sql) => {
				let rows = self.fetch_all_sql(&sql, &[]).await?;
				rows.first()
					.and_then(Row::first_value)
					.filter(|value| !value.is_null())
					.map(|value| i64::try_from(value.clone()))
					.transpose()
			}
			None => {
				self.open().await?;
				let state = self.inner.state.lock().await;
				Ok(state.handle.as_ref().and_then(|handle| handle.last_insert_id()))
			}
		}
	}

	/// Last error reported by the driver handle
	pub async fn last_error(&self) -> Option<String> {
		let state = self.inner.state.lock().await;
		state.handle.as_ref().and_then(|handle| handle.last_error())
	}

	pub(crate) async fn execute_sql(&self, sql: &str, params: &[QueryValue]) -> Result<QueryResult> {
		self.open().await?;
		let mut state = self.inner.state.lock().await;
		let handle = state.handle.as_mut().ok_or_else(closed_during_operation)?;
		tracing::debug!(sql, "Executing SQL");
		handle.execute(sql, params).await
	}

	pub(crate) async fn fetch_all_sql(&self, sql: &str, params: &[QueryValue]) -> Result<Vec<Row>> {
		self.open().await?;
		let mut state = self.inner.state.lock().await;
		let handle = state.handle.as_mut().ok_or_else(closed_during_operation)?;
		tracing::debug!(sql, "Querying SQL");
		handle.fetch_all(sql, params).await
	}

	pub(crate) async fn fetch_optional_sql(&self, sql: &str, params: &[QueryValue]) -> Result<Option<Row>> {
		self.open().await?;
		let mut state = self.inner.state.lock().await;
		let handle = state.handle.as_mut().ok_or_else(closed_during_operation)?;
		tracing::debug!(sql, "Querying SQL");
		handle.fetch_optional(sql, params).await
	}
}

/// Identity table metadata is cached under; a master pool is identified by
/// every member's merged DSN and username, whichever member is opened
fn schema_identity(config: &ConnectionConfig, driver: DriverName) -> SchemaIdentity {
	if config.masters.is_empty() {
		return SchemaIdentity::new(driver, config.dsn.clone(), config.username.clone().unwrap_or_default());
	}
	let (dsns, usernames): (Vec<String>, Vec<String>) = config
		.masters
		.iter()
		.map(|master| {
			let merged = master.merged_over(&config.master_config);
			(merged.dsn.unwrap_or_default(), merged.username.unwrap_or_default())
		})
		.unzip();
	SchemaIdentity::new(driver, dsns.join(","), usernames.join(","))
}

fn closed_during_operation() -> DbError {
	DbError::driver_message("The DB connection was closed during the operation")
}
