use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::path::{Path, PathBuf};
use tabletalk::config::{ProviderConfig, SqliteConfig};
use tabletalk::provider::ClientHandle;
use tabletalk::{DatabaseProvider, ProviderError};
use tempfile::TempDir;

async fn create_db(path: &Path, sql: &str) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();
    sqlx::raw_sql(sql).execute(&mut conn).await.unwrap();
    conn.close().await.unwrap();
}

async fn shop_db(dir: &Path) -> PathBuf {
    let path = dir.join("shop.db");
    create_db(
        &path,
        r#"
        CREATE TABLE users (id INTEGER, name TEXT, age INTEGER);
        CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total REAL, placed_at DATETIME, note);
        CREATE VIEW adult_users AS SELECT id, name FROM users WHERE age >= 18;
        INSERT INTO users VALUES (1, 'ada', 36), (2, 'kid', 9);
        "#,
    )
    .await;
    path
}

async fn connect(path: &Path) -> DatabaseProvider {
    DatabaseProvider::connect(&ProviderConfig::Sqlite(SqliteConfig {
        database_path: path.to_path_buf(),
    }))
    .await
    .unwrap()
}

fn fields(table: &tabletalk::models::CompactTable) -> Vec<(String, String)> {
    table
        .fields
        .iter()
        .map(|f| (f.name.clone(), f.type_code.clone()))
        .collect()
}

#[tokio::test]
async fn test_discovers_tables_and_views() {
    let tmp = TempDir::new().unwrap();
    let db = shop_db(tmp.path()).await;
    let mut provider = connect(&db).await;

    let tables = provider.get_compact_tables("main", None).await.unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["users", "orders", "adult_users"]);

    assert_eq!(
        fields(&tables[0]),
        vec![
            ("id".to_string(), "I".to_string()),
            ("name".to_string(), "S".to_string()),
            ("age".to_string(), "I".to_string()),
        ]
    );
    // untyped column defaults to TEXT
    let orders = fields(&tables[1]);
    assert_eq!(orders[2], ("total".to_string(), "F".to_string()));
    assert_eq!(orders[4], ("note".to_string(), "S".to_string()));
    assert!(tables.iter().all(|t| t.description.is_empty()));

    provider.close().await;
}

#[tokio::test]
async fn test_explicit_subset_keeps_order() {
    let tmp = TempDir::new().unwrap();
    let db = shop_db(tmp.path()).await;
    let mut provider = connect(&db).await;

    let wanted = vec!["adult_users".to_string(), "users".to_string()];
    let tables = provider
        .get_compact_tables("main", Some(&wanted))
        .await
        .unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].qualified_name, "adult_users");
    assert_eq!(tables[1].qualified_name, "users");
}

#[tokio::test]
async fn test_missing_table_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let db = shop_db(tmp.path()).await;
    let mut provider = connect(&db).await;

    let wanted = vec!["ghosts".to_string()];
    let err = provider
        .get_compact_tables("main", Some(&wanted))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{}", err);
}

#[tokio::test]
async fn test_empty_database_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("empty.db");
    create_db(&db, "PRAGMA user_version = 1;").await;
    let mut provider = connect(&db).await;

    let err = provider.get_compact_tables("main", None).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)), "{}", err);
}

#[tokio::test]
async fn test_missing_file_is_connection_error() {
    let tmp = TempDir::new().unwrap();
    let err = DatabaseProvider::connect(&ProviderConfig::Sqlite(SqliteConfig {
        database_path: tmp.path().join("nope.db"),
    }))
    .await
    .unwrap_err();
    assert!(matches!(err, ProviderError::Connection(_)), "{}", err);
    assert!(!tmp.path().join("nope.db").exists());
}

#[tokio::test]
async fn test_execute_query_returns_rows_in_column_order() {
    let tmp = TempDir::new().unwrap();
    let db = shop_db(tmp.path()).await;
    let mut provider = connect(&db).await;

    let rows = provider
        .execute_query("SELECT name, age, id FROM users ORDER BY id")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let keys: Vec<&String> = rows[0].keys().collect();
    assert_eq!(keys, vec!["name", "age", "id"]);
    assert_eq!(rows[0]["name"], "ada");
    assert_eq!(rows[0]["age"], 36);
    assert_eq!(rows[1]["id"], 2);

    let empty = provider
        .execute_query("SELECT * FROM users WHERE id = 99")
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_execute_query_error_propagates() {
    let tmp = TempDir::new().unwrap();
    let db = shop_db(tmp.path()).await;
    let mut provider = connect(&db).await;

    assert!(provider.execute_query("SELECT * FROM nowhere").await.is_err());
}

#[tokio::test]
async fn test_in_memory_and_client_handle() {
    let mut provider = DatabaseProvider::connect(&ProviderConfig::Sqlite(SqliteConfig {
        database_path: PathBuf::from(":memory:"),
    }))
    .await
    .unwrap();

    match provider.get_client() {
        ClientHandle::Sqlite(conn) => {
            sqlx::query("CREATE TABLE t (x BLOB, y NUMERIC)")
                .execute(conn)
                .await
                .unwrap();
        }
        _ => panic!("expected a sqlite handle"),
    }

    let tables = provider.get_compact_tables("", None).await.unwrap();
    assert_eq!(
        fields(&tables[0]),
        vec![
            ("x".to_string(), "BY".to_string()),
            ("y".to_string(), "N".to_string()),
        ]
    );
    assert_eq!(provider.get_database_type_map().code_for("varchar(20)"), "S");
}
