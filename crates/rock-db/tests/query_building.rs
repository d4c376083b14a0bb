//! Integration tests for query building through a connection
//!
//! ## Test Coverage
//!
//! - Search forms built with `filter_where` and optional inputs
//! - Positional placeholders and bound values per dialect
//! - Sub-queries in IN and EXISTS conditions sharing one parameter set
//! - Aliased select lists over joined tables
//! - Paging syntax per dialect
//! - INSERT, UPDATE and DELETE helpers

use indexmap::IndexMap;
use rock_db::query::{Condition, Expression, Query, SelectBuilder, SelectSpec};
use rock_db::testing::{MockDriver, row};
use rock_db::{Connection, ConnectionConfig, DbError, Params, QueryValue};
use rstest::*;
use serde_json::{Value, json};
use std::sync::Arc;

// ========================================
// Test Fixtures
// ========================================

#[fixture]
fn driver() -> MockDriver {
	MockDriver::new()
}

fn connect(driver: &MockDriver, dsn: &str) -> Connection {
	Connection::builder(ConnectionConfig::new(dsn).with_table_prefix("tbl_"))
		.with_driver(Arc::new(driver.clone()))
		.build()
}

fn condition(value: Value) -> Condition {
	Condition::from_json(value).unwrap()
}

/// Query a search form with optional fields would produce
fn search(name: &str, status: Value, tags: Value) -> Query {
	Query::new()
		.from(["{{%post}}"])
		.where_(condition(json!({"deleted": 0})))
		.and_filter_where(condition(json!(["like", "title", name])))
		.and_filter_where(condition(json!({"status": status})))
		.and_filter_where(condition(json!(["in", "tag", tags])))
}

// ========================================
// filter_where
// ========================================

#[rstest]
#[tokio::test]
async fn test_empty_search_inputs_are_dropped(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");

	// Act
	search("", Value::Null, json!([])).all(&db).await.unwrap();

	// Assert
	let statements = driver.statements();
	assert_eq!(statements[0].sql, "SELECT * FROM `tbl_post` WHERE `deleted`=?");
	assert_eq!(statements[0].params, vec![QueryValue::Int(0)]);
}

#[rstest]
#[tokio::test]
async fn test_filled_search_inputs_are_bound(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "pgsql:host=a");

	// Act
	search("rust", json!(0), json!(["db", "sql"]))
		.all(&db)
		.await
		.unwrap();

	// Assert
	let statements = driver.statements();
	assert_eq!(
		statements[0].sql,
		r#"SELECT * FROM "tbl_post" WHERE ((("deleted"=$1) AND ("title" LIKE $2)) AND ("status"=$3)) AND ("tag" IN ($4, $5))"#
	);
	assert_eq!(
		statements[0].params,
		vec![
			QueryValue::Int(0),
			QueryValue::from("%rust%"),
			QueryValue::Int(0),
			QueryValue::from("db"),
			QueryValue::from("sql"),
		]
	);
}

#[rstest]
#[tokio::test]
async fn test_filter_where_on_blank_query_adds_nothing(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "sqlite::memory:");

	// Act
	Query::new()
		.from(["post"])
		.filter_where(condition(json!({"author": "  ", "category": null})))
		.or_filter_where(condition(json!(["between", "created", "", "2024-01-01"])))
		.all(&db)
		.await
		.unwrap();

	// Assert
	assert_eq!(driver.sql_log(), vec!["SELECT * FROM `post`"]);
}

// ========================================
// Sub-queries
// ========================================

#[rstest]
#[tokio::test]
async fn test_in_sub_query_shares_parameters(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "pgsql:host=a");
	let banned = Query::new()
		.select(["user_id"])
		.from(["ban"])
		.where_(Condition::hash([("active", true)]));
	let query = Query::new()
		.from(["comment"])
		.where_(Condition::hash([("post_id", 7)]))
		.and_where(Condition::op("not in", vec!["user_id".into(), banned.into()]));

	// Act
	query.all(&db).await.unwrap();

	// Assert
	let statements = driver.statements();
	assert_eq!(
		statements[0].sql,
		r#"SELECT * FROM "comment" WHERE ("post_id"=$1) AND ("user_id" NOT IN (SELECT "user_id" FROM "ban" WHERE "active"=$2))"#
	);
	assert_eq!(
		statements[0].params,
		vec![QueryValue::Int(7), QueryValue::Bool(true)]
	);
}

#[rstest]
#[tokio::test]
async fn test_exists_sub_query(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");
	let orders = Query::new()
		.select([Expression::new("1")])
		.from(["order o"])
		.where_("o.customer_id = c.id");
	let query = Query::new()
		.from(["customer c"])
		.where_(Condition::op("exists", vec![orders.into()]));

	// Act
	query.all(&db).await.unwrap();

	// Assert
	assert_eq!(
		driver.sql_log(),
		vec!["SELECT * FROM `customer` `c` WHERE EXISTS (SELECT 1 FROM `order` `o` WHERE o.customer_id = c.id)"]
	);
}

#[rstest]
#[tokio::test]
async fn test_from_sub_query_with_raw_params(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");
	let recent = Query::new()
		.from(["post"])
		.where_("created_at > :since")
		.add_params(Params::from([("since".to_string(), QueryValue::from("2024-01-01"))]));
	let query = Query::new().select(["p.id"]).from_query(recent, "p").limit(3);

	// Act
	query.all(&db).await.unwrap();

	// Assert
	let statements = driver.statements();
	assert_eq!(
		statements[0].sql,
		"SELECT `p`.`id` FROM (SELECT * FROM `post` WHERE created_at > ?) `p` LIMIT 3"
	);
	assert_eq!(statements[0].params, vec![QueryValue::from("2024-01-01")]);
}

// ========================================
// Select lists
// ========================================

#[rstest]
#[tokio::test]
async fn test_aliased_select_over_join(driver: MockDriver) {
	// Arrange
	driver.on_query(
		"FROM `article`",
		vec![row(&[
			("article__id", QueryValue::Int(1)),
			("author__id", QueryValue::Int(9)),
		])],
	);
	let db = connect(&driver, "mysql:host=a");
	let select = SelectBuilder::selects([
		SelectSpec::table("article", ["id", "title"]).with_alias(true),
		SelectSpec::table("author", ["id"]).with_alias(true),
	]);

	// Act
	let rows = Query::new()
		.select_builder(select)
		.from(["article", "author"])
		.where_("article.author_id = author.id")
		.all(&db)
		.await
		.unwrap();

	// Assert
	assert_eq!(
		driver.sql_log()[0],
		concat!(
			"SELECT `article`.`id` AS `article__id`, `article`.`title` AS `article__title`, ",
			"`author`.`id` AS `author__id` FROM `article`, `author` WHERE article.author_id = author.id"
		)
	);
	assert_eq!(rows[0].get::<i64>("author__id").unwrap(), 9);
}

#[rstest]
#[tokio::test]
async fn test_select_builder_uses_connection_separator(driver: MockDriver) {
	// Arrange
	let db = Connection::builder(ConnectionConfig::new("mysql:host=a").with_alias_separator("_"))
		.with_driver(Arc::new(driver.clone()))
		.build();
	let select = SelectBuilder::from_json(json!([[{"user": ["id"]}, true]])).unwrap();

	// Act
	Query::new()
		.select_builder(select)
		.from(["user"])
		.all(&db)
		.await
		.unwrap();

	// Assert
	assert_eq!(driver.sql_log()[0], "SELECT `user`.`id` AS `user_id` FROM `user`");
}

// ========================================
// Paging
// ========================================

#[rstest]
#[case("mysql:host=a", "SELECT * FROM `t` ORDER BY `id` DESC LIMIT 10 OFFSET 20")]
#[case("pgsql:host=a", r#"SELECT * FROM "t" ORDER BY "id" DESC LIMIT 10 OFFSET 20"#)]
#[case("sqlite::memory:", "SELECT * FROM `t` ORDER BY `id` DESC LIMIT 10 OFFSET 20")]
#[case(
	"sqlsrv:Server=a",
	"SELECT * FROM [t] ORDER BY [id] DESC OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
)]
#[tokio::test]
async fn test_paging_per_dialect(driver: MockDriver, #[case] dsn: &str, #[case] expected: &str) {
	// Arrange
	let db = connect(&driver, dsn);

	// Act
	Query::new()
		.from(["t"])
		.order_by("id DESC")
		.limit(10)
		.offset(20)
		.all(&db)
		.await
		.unwrap();

	// Assert
	assert_eq!(driver.sql_log(), vec![expected]);
}

#[rstest]
#[tokio::test]
async fn test_count_and_column(driver: MockDriver) {
	// Arrange
	driver.on_query("COUNT(*)", vec![row(&[("COUNT(*)", QueryValue::Int(2))])]);
	driver.on_query(
		"SELECT `email`",
		vec![
			row(&[("email", "a@example.com".into())]),
			row(&[("email", "b@example.com".into())]),
		],
	);
	let db = connect(&driver, "mysql:host=a");
	let query = Query::new().select(["email"]).from(["user"]).limit(1);

	// Act
	let count = query.count(&db).await.unwrap();
	let emails = query.column(&db).await.unwrap();

	// Assert
	assert_eq!(count, 2);
	assert_eq!(emails.len(), 2);
	assert_eq!(driver.sql_log()[0], "SELECT COUNT(*) FROM `user`");
}

// ========================================
// DML helpers
// ========================================

#[rstest]
#[tokio::test]
async fn test_insert_update_delete(driver: MockDriver) {
	// Arrange
	driver.set_rows_affected(3);
	let db = connect(&driver, "pgsql:host=a");
	let mut columns = IndexMap::new();
	columns.insert("name".to_string(), QueryValue::from("alice"));
	columns.insert("active".to_string(), QueryValue::Bool(true));

	// Act
	db.insert("{{%user}}", columns.clone()).unwrap().execute().await.unwrap();
	let updated = db
		.update(
			"{{%user}}",
			columns,
			"id > :min",
			Params::from([("min".to_string(), QueryValue::Int(10))]),
		)
		.unwrap()
		.execute()
		.await
		.unwrap();
	db.delete("{{%user}}", condition(json!({"id": [1, 2]})), Params::new())
		.unwrap()
		.execute()
		.await
		.unwrap();

	// Assert
	assert_eq!(updated, 3);
	let statements = driver.statements();
	assert_eq!(
		statements[0].sql,
		r#"INSERT INTO "tbl_user" ("name", "active") VALUES ($1, $2)"#
	);
	assert_eq!(
		statements[1].sql,
		r#"UPDATE "tbl_user" SET "name"=$1, "active"=$2 WHERE id > $3"#
	);
	assert_eq!(
		statements[1].params,
		vec![QueryValue::from("alice"), QueryValue::Bool(true), QueryValue::Int(10)]
	);
	assert_eq!(statements[2].sql, r#"DELETE FROM "tbl_user" WHERE "id" IN ($1, $2)"#);
}

#[rstest]
#[tokio::test]
async fn test_unbound_parameter_is_reported_before_execution(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");

	// Act
	let result = Query::new()
		.from(["user"])
		.where_("name = :name")
		.all(&db)
		.await;

	// Assert
	assert!(matches!(result, Err(DbError::UnboundParameter(name)) if name == ":name"));
	assert!(driver.statements().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_unknown_operator_is_reported(driver: MockDriver) {
	// Arrange
	let db = connect(&driver, "mysql:host=a");

	// Act
	let result = Query::new()
		.from(["user"])
		.where_(condition(json!(["regexp", "name", "^a"])))
		.all(&db)
		.await;

	// Assert
	assert!(matches!(result, Err(DbError::UnknownOperator(_))));
}
