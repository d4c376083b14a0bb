//! Connection configuration

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-server settings of a master or slave pool entry
///
/// Entries are merged with the pool's shared config before use: fields set
/// on the entry win, unset fields fall back to the shared value.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	pub dsn: Option<String>,
	pub username: Option<String>,
	pub password: Option<String>,
	pub charset: Option<String>,
	pub emulate_prepare: Option<bool>,
}

impl ServerConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
		self.dsn = Some(dsn.into());
		self
	}

	pub fn with_username(mut self, username: impl Into<String>) -> Self {
		self.username = Some(username.into());
		self
	}

	pub fn with_password(mut self, password: impl Into<String>) -> Self {
		self.password = Some(password.into());
		self
	}

	pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
		self.charset = Some(charset.into());
		self
	}

	/// Merge `shared` under this entry
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::ServerConfig;
	///
	/// let shared = ServerConfig::new().with_username("app").with_password("secret");
	/// let entry = ServerConfig::new().with_dsn("mysql:host=db1;dbname=app").with_username("ro");
	///
	/// let merged = entry.merged_over(&shared);
	/// assert_eq!(merged.username.as_deref(), Some("ro"));
	/// assert_eq!(merged.password.as_deref(), Some("secret"));
	/// ```
	pub fn merged_over(&self, shared: &ServerConfig) -> ServerConfig {
		ServerConfig {
			dsn: self.dsn.clone().or_else(|| shared.dsn.clone()),
			username: self.username.clone().or_else(|| shared.username.clone()),
			password: self.password.clone().or_else(|| shared.password.clone()),
			charset: self.charset.clone().or_else(|| shared.charset.clone()),
			emulate_prepare: self.emulate_prepare.or(shared.emulate_prepare),
		}
	}
}

/// Connection configuration
///
/// Either `dsn` or a non-empty `masters` list decides how the primary handle
/// is acquired. When `masters` is set, `dsn`, `username` and `password` of
/// this config are ignored.
///
/// # Examples
///
/// ```
/// use rock_db::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::new("sqlite::memory:")
///     .with_table_prefix("tbl_")
///     .with_server_retry_interval(Duration::from_secs(30));
///
/// assert_eq!(config.table_prefix, "tbl_");
/// assert_eq!(config.server_retry_interval(), Duration::from_secs(30));
/// assert!(config.validate().is_ok());
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	pub dsn: String,
	pub username: Option<String>,
	pub password: Option<String>,
	pub charset: Option<String>,
	/// Replaces `%` in `{{%table}}` placeholders
	pub table_prefix: String,
	/// Joins table and column into an alias when a select spec asks for aliasing
	pub alias_separator: String,
	pub enable_slaves: bool,
	pub slaves: Vec<ServerConfig>,
	pub slave_config: ServerConfig,
	pub masters: Vec<ServerConfig>,
	pub master_config: ServerConfig,
	pub enable_schema_cache: bool,
	pub schema_cache_expire_secs: u64,
	pub schema_cache_exclude: Vec<String>,
	pub server_retry_interval_secs: u64,
	pub enable_savepoint: bool,
	pub emulate_prepare: Option<bool>,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self {
			dsn: String::new(),
			username: None,
			password: None,
			charset: None,
			table_prefix: String::new(),
			alias_separator: "__".to_string(),
			enable_slaves: true,
			slaves: Vec::new(),
			slave_config: ServerConfig::default(),
			masters: Vec::new(),
			master_config: ServerConfig::default(),
			enable_schema_cache: false,
			schema_cache_expire_secs: 3600,
			schema_cache_exclude: Vec::new(),
			server_retry_interval_secs: 600,
			enable_savepoint: true,
			emulate_prepare: None,
		}
	}
}

impl ConnectionConfig {
	pub fn new(dsn: impl Into<String>) -> Self {
		Self {
			dsn: dsn.into(),
			..Self::default()
		}
	}

	/// Parse a configuration from TOML
	///
	/// # Examples
	///
	/// ```
	/// use rock_db::ConnectionConfig;
	///
	/// let config = ConnectionConfig::from_toml_str(r#"
	///     username = "app"
	///     enable_schema_cache = true
	///
	///     [[masters]]
	///     dsn = "mysql:host=db1;dbname=app"
	///
	///     [[masters]]
	///     dsn = "mysql:host=db2;dbname=app"
	/// "#).unwrap();
	///
	/// assert_eq!(config.masters.len(), 2);
	/// assert!(config.enable_schema_cache);
	/// ```
	pub fn from_toml_str(source: &str) -> Result<Self> {
		Ok(toml::from_str(source)?)
	}

	pub fn with_credentials(
		mut self,
		username: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		self.username = Some(username.into());
		self.password = Some(password.into());
		self
	}

	pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
		self.charset = Some(charset.into());
		self
	}

	pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.table_prefix = prefix.into();
		self
	}

	pub fn with_alias_separator(mut self, separator: impl Into<String>) -> Self {
		self.alias_separator = separator.into();
		self
	}

	pub fn with_enable_slaves(mut self, enable: bool) -> Self {
		self.enable_slaves = enable;
		self
	}

	pub fn with_slaves(mut self, slaves: Vec<ServerConfig>) -> Self {
		self.slaves = slaves;
		self
	}

	pub fn with_slave_config(mut self, config: ServerConfig) -> Self {
		self.slave_config = config;
		self
	}

	pub fn with_masters(mut self, masters: Vec<ServerConfig>) -> Self {
		self.masters = masters;
		self
	}

	pub fn with_master_config(mut self, config: ServerConfig) -> Self {
		self.master_config = config;
		self
	}

	pub fn with_schema_cache(mut self, enable: bool) -> Self {
		self.enable_schema_cache = enable;
		self
	}

	pub fn with_schema_cache_expire(mut self, expire: Duration) -> Self {
		self.schema_cache_expire_secs = expire.as_secs();
		self
	}

	pub fn with_schema_cache_exclude(mut self, tables: Vec<String>) -> Self {
		self.schema_cache_exclude = tables;
		self
	}

	pub fn with_server_retry_interval(mut self, interval: Duration) -> Self {
		self.server_retry_interval_secs = interval.as_secs();
		self
	}

	pub fn with_enable_savepoint(mut self, enable: bool) -> Self {
		self.enable_savepoint = enable;
		self
	}

	pub fn with_emulate_prepare(mut self, emulate: bool) -> Self {
		self.emulate_prepare = Some(emulate);
		self
	}

	/// Lifetime of table metadata in the backing cache; zero means no expiry
	pub fn schema_cache_expire(&self) -> Option<Duration> {
		match self.schema_cache_expire_secs {
			0 => None,
			secs => Some(Duration::from_secs(secs)),
		}
	}

	/// How long a server that failed to connect is skipped
	pub fn server_retry_interval(&self) -> Duration {
		Duration::from_secs(self.server_retry_interval_secs)
	}

	/// Config of one pool member: this config's non-topology settings with
	/// the merged server entry on top. Members never own pools themselves.
	pub(crate) fn for_server(&self, server: &ServerConfig) -> ConnectionConfig {
		ConnectionConfig {
			dsn: server.dsn.clone().unwrap_or_default(),
			username: server.username.clone(),
			password: server.password.clone(),
			charset: server.charset.clone().or_else(|| self.charset.clone()),
			enable_slaves: false,
			slaves: Vec::new(),
			slave_config: ServerConfig::default(),
			masters: Vec::new(),
			master_config: ServerConfig::default(),
			emulate_prepare: server.emulate_prepare.or(self.emulate_prepare),
			..self.clone()
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.masters.is_empty() && self.dsn.trim().is_empty() {
			return Err(DbError::Config("Connection::dsn cannot be empty".to_string()));
		}
		if self.alias_separator.is_empty() {
			return Err(DbError::Config(
				"alias_separator cannot be empty".to_string(),
			));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_default_values() {
		// Arrange & Act
		let config = ConnectionConfig::default();

		// Assert
		assert!(config.enable_slaves);
		assert!(config.enable_savepoint);
		assert!(!config.enable_schema_cache);
		assert_eq!(config.alias_separator, "__");
		assert_eq!(config.server_retry_interval(), Duration::from_secs(600));
		assert_eq!(config.schema_cache_expire(), Some(Duration::from_secs(3600)));
	}

	#[rstest]
	fn test_validate_requires_dsn_or_masters() {
		// Arrange
		let empty = ConnectionConfig::default();
		let with_masters = ConnectionConfig::default()
			.with_masters(vec![ServerConfig::new().with_dsn("sqlite::memory:")]);

		// Act & Assert
		assert!(matches!(empty.validate(), Err(DbError::Config(_))));
		assert!(with_masters.validate().is_ok());
	}

	#[rstest]
	fn test_for_server_strips_topology() {
		// Arrange
		let config = ConnectionConfig::new("mysql:host=primary")
			.with_table_prefix("app_")
			.with_charset("utf8")
			.with_slaves(vec![ServerConfig::new().with_dsn("mysql:host=replica")]);
		let server = ServerConfig::new()
			.with_dsn("mysql:host=replica")
			.with_username("reader");

		// Act
		let member = config.for_server(&server);

		// Assert
		assert_eq!(member.dsn, "mysql:host=replica");
		assert_eq!(member.username.as_deref(), Some("reader"));
		assert_eq!(member.password, None);
		assert_eq!(member.charset.as_deref(), Some("utf8"));
		assert_eq!(member.table_prefix, "app_");
		assert!(member.slaves.is_empty());
		assert!(!member.enable_slaves);
	}

	#[rstest]
	fn test_from_toml_str_with_durations() {
		// Arrange
		let source = r#"
			dsn = "pgsql:host=localhost;dbname=app"
			server_retry_interval_secs = 5
			schema_cache_expire_secs = 0
			schema_cache_exclude = ["sessions"]

			[slave_config]
			username = "reader"
		"#;

		// Act
		let config = ConnectionConfig::from_toml_str(source).unwrap();

		// Assert
		assert_eq!(config.server_retry_interval(), Duration::from_secs(5));
		assert_eq!(config.schema_cache_expire(), None);
		assert_eq!(config.schema_cache_exclude, vec!["sessions".to_string()]);
		assert_eq!(config.slave_config.username.as_deref(), Some("reader"));
	}

	#[rstest]
	fn test_from_toml_str_rejects_bad_types() {
		// Arrange & Act
		let result = ConnectionConfig::from_toml_str("enable_slaves = \"yes\"");

		// Assert
		assert!(matches!(result, Err(DbError::ConfigParse(_))));
	}
}
