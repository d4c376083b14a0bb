//! End-to-end tests against an in-memory SQLite database
//!
//! These tests run the real sqlx driver, so they exercise placeholder
//! rewriting, value decoding, savepoints and schema introspection on an
//! actual engine.

use indexmap::IndexMap;
use rock_db::query::{Condition, Query};
use rock_db::schema::{ColumnType, SchemaCache};
use rock_db::{Connection, ConnectionConfig, DbError, Params, QueryValue};
use rstest::*;
use serde_json::json;
use std::sync::Arc;

// ========================================
// Test Fixtures
// ========================================

async fn database() -> Connection {
	let db = Connection::builder(ConnectionConfig::new("sqlite::memory:"))
		.with_schema_cache(Arc::new(SchemaCache::new()))
		.build();
	db.create_command(
		"CREATE TABLE post (id INTEGER PRIMARY KEY, title VARCHAR(64) NOT NULL, views INTEGER DEFAULT 0, author TEXT)",
		Params::new(),
	)
	.unwrap()
	.execute()
	.await
	.unwrap();
	db
}

async fn insert_post(db: &Connection, title: &str, views: i64, author: Option<&str>) -> i64 {
	let mut columns = IndexMap::new();
	columns.insert("title".to_string(), QueryValue::from(title));
	columns.insert("views".to_string(), QueryValue::from(views));
	columns.insert("author".to_string(), author.map_or(QueryValue::Null, QueryValue::from));
	db.insert("post", columns).unwrap().execute().await.unwrap();
	db.last_insert_id(None).await.unwrap().unwrap()
}

async fn titles(db: &Connection) -> Vec<String> {
	Query::new()
		.select(["title"])
		.from(["post"])
		.order_by("id")
		.column(db)
		.await
		.unwrap()
		.into_iter()
		.map(|value| String::try_from(value).unwrap())
		.collect()
}

// ========================================
// Queries
// ========================================

#[rstest]
#[tokio::test]
async fn test_insert_and_query() {
	// Arrange
	let db = database().await;

	// Act
	let first = insert_post(&db, "hello", 3, Some("ann")).await;
	let second = insert_post(&db, "world", 10, None).await;
	let row = Query::new()
		.from(["post"])
		.where_(Condition::hash([("id", second)]))
		.one(&db)
		.await
		.unwrap()
		.unwrap();

	// Assert
	assert_eq!((first, second), (1, 2));
	assert_eq!(row.get::<String>("title").unwrap(), "world");
	assert_eq!(row.get::<i64>("views").unwrap(), 10);
	assert_eq!(row.value("author"), Some(&QueryValue::Null));
}

#[rstest]
#[tokio::test]
async fn test_filtered_search_count_and_paging() {
	// Arrange
	let db = database().await;
	for (title, views) in [("a", 1), ("b", 5), ("c", 7), ("d", 9)] {
		insert_post(&db, title, views, Some("ann")).await;
	}
	let query = Query::new()
		.from(["post"])
		.where_(Condition::from_json(json!(["between", "views", 2, 9])).unwrap())
		.and_filter_where(Condition::from_json(json!({"author": "ann", "title": ""})).unwrap())
		.order_by("views DESC");

	// Act
	let count = query.count(&db).await.unwrap();
	let page = query.clone().limit(1).offset(1).all(&db).await.unwrap();
	let exists = query.exists(&db).await.unwrap();

	// Assert
	assert_eq!(count, 3);
	assert_eq!(page.len(), 1);
	assert_eq!(page[0].get::<String>("title").unwrap(), "c");
	assert!(exists);
}

#[rstest]
#[tokio::test]
async fn test_like_matches_wildcards_literally() {
	// Arrange
	let db = database().await;
	insert_post(&db, "100% done", 0, None).await;
	insert_post(&db, "1000 done", 0, None).await;

	// Act
	let rows = Query::new()
		.from(["post"])
		.where_(Condition::from_json(json!(["like", "title", "100%"])).unwrap())
		.all(&db)
		.await
		.unwrap();

	// Assert
	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0].get::<String>("title").unwrap(), "100% done");
}

#[rstest]
#[tokio::test]
async fn test_update_and_delete() {
	// Arrange
	let db = database().await;
	insert_post(&db, "a", 1, None).await;
	insert_post(&db, "b", 2, None).await;
	let mut columns = IndexMap::new();
	columns.insert("views".to_string(), QueryValue::Int(100));

	// Act
	let updated = db
		.update("post", columns, Condition::hash([("title", "a")]), Params::new())
		.unwrap()
		.execute()
		.await
		.unwrap();
	let deleted = db
		.delete("post", "views < :max", Params::from([("max".to_string(), QueryValue::Int(50))]))
		.unwrap()
		.execute()
		.await
		.unwrap();

	// Assert
	assert_eq!((updated, deleted), (1, 1));
	assert_eq!(titles(&db).await, vec!["a"]);
}

// ========================================
// Transactions
// ========================================

#[rstest]
#[tokio::test]
async fn test_savepoint_rollback_keeps_outer_work() {
	// Arrange
	let db = database().await;

	// Act
	let transaction = db.begin_transaction(None).await.unwrap();
	insert_post(&db, "kept", 0, None).await;
	db.begin_transaction(None).await.unwrap();
	insert_post(&db, "discarded", 0, None).await;
	transaction.roll_back().await.unwrap();
	transaction.commit().await.unwrap();

	// Assert
	assert_eq!(titles(&db).await, vec!["kept"]);
}

#[rstest]
#[tokio::test]
async fn test_failed_callback_rolls_back() {
	// Arrange
	let db = database().await;

	// Act
	let result = db
		.transaction(
			|db| async move {
				insert_post(&db, "lost", 0, None).await;
				db.create_command("INSERT INTO missing (x) VALUES (1)", Params::new())?
					.execute()
					.await
			},
			None,
		)
		.await;

	// Assert
	assert!(matches!(result, Err(DbError::Driver { .. })));
	assert!(db.last_error().await.unwrap().contains("missing"));
	assert!(titles(&db).await.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_unsupported_isolation_level_fails_before_begin() {
	// Arrange
	let db = database().await;

	// Act
	let result = db
		.begin_transaction(Some(rock_db::IsolationLevel::RepeatableRead))
		.await;

	// Assert
	assert!(matches!(result, Err(DbError::NotSupported(_))));
	assert!(db.get_transaction().is_none());
}

// ========================================
// Schema
// ========================================

#[rstest]
#[tokio::test]
async fn test_table_schema_introspection() {
	// Arrange
	let db = database().await;

	// Act
	let table = db.get_table_schema("post", false).await.unwrap().unwrap();
	let missing = db.get_table_schema("ghost", false).await.unwrap();
	let names = db.get_schema().unwrap().get_table_names("", false).await.unwrap();

	// Assert
	assert_eq!(table.primary_key, vec!["id"]);
	assert!(table.column("id").unwrap().auto_increment);
	let title = table.column("title").unwrap();
	assert_eq!(title.column_type, ColumnType::String);
	assert_eq!(title.size, Some(64));
	assert!(!title.allow_null);
	assert_eq!(table.column("views").unwrap().default_value, Some(QueryValue::Int(0)));
	assert!(missing.is_none());
	assert_eq!(names, vec!["post"]);
}
