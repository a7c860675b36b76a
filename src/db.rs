//! Multi-connection pool registry.
//!
//! One lazily-connecting pool per configured named connection. Pool sizing and
//! the acquire timeout are shared across all entries; requests beyond the pool
//! cap wait on the pool itself. The registry talks to the database through the
//! `SqlExecutor` seam so the dispatcher can be exercised against canned rows.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{json, Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, MySql, Pool, Row, TypeInfo};
use std::time::Duration;

use crate::config::{ConnectionSettings, DatabaseSettings};
use crate::error::ServerError;
use crate::validators::is_valid_identifier;

/// Executes statements against one named connection.
#[async_trait]
pub trait SqlExecutor: Send + Sync + std::fmt::Debug {
    /// Run a parameterized statement, returning rows as JSON objects.
    async fn fetch_rows(&self, sql: &str, params: &[String]) -> Result<Vec<Value>, ServerError>;

    /// Run a statement and return the first column of every row.
    async fn fetch_first_column(&self, sql: &str) -> Result<Vec<String>, ServerError>;

    async fn close(&self);
}

/// Production executor backed by a sqlx MySQL pool.
#[derive(Debug)]
struct PoolExecutor {
    pool: Pool<MySql>,
}

impl PoolExecutor {
    fn new(conn: &ConnectionSettings, connection_limit: u32, timeout_ms: u64) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&conn.host)
            .port(conn.port)
            .username(&conn.user)
            .password(&conn.password)
            .database(&conn.database)
            .ssl_mode(if conn.ssl {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Disabled
            });

        let pool = MySqlPoolOptions::new()
            .max_connections(connection_limit)
            .acquire_timeout(Duration::from_millis(timeout_ms))
            .connect_lazy_with(options);

        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PoolExecutor {
    async fn fetch_rows(&self, sql: &str, params: &[String]) -> Result<Vec<Value>, ServerError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(param.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn fetch_first_column(&self, sql: &str) -> Result<Vec<String>, ServerError> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            values.push(row.try_get::<String, _>(0)?);
        }
        Ok(values)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct DatabaseManager {
    executors: Vec<(String, Box<dyn SqlExecutor>)>,
    settings: DatabaseSettings,
}

impl DatabaseManager {
    pub fn new(settings: DatabaseSettings) -> Self {
        let executors = settings
            .connections
            .iter()
            .map(|(name, conn)| {
                info!(
                    "Registered connection '{name}' ({}:{}/{})",
                    conn.host, conn.port, conn.database
                );
                let executor = PoolExecutor::new(conn, settings.connection_limit, settings.timeout_ms);
                (name.clone(), Box::new(executor) as Box<dyn SqlExecutor>)
            })
            .collect();

        Self { executors, settings }
    }

    /// Registry over caller-supplied executors; pairs must match the settings'
    /// connection names.
    pub(crate) fn with_executors(
        settings: DatabaseSettings,
        executors: Vec<(String, Box<dyn SqlExecutor>)>,
    ) -> Self {
        Self { executors, settings }
    }

    fn executor(&self, connection: Option<&str>) -> Result<&dyn SqlExecutor, ServerError> {
        let name = self.resolve_name(connection);
        self.executors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.as_ref())
            .ok_or_else(|| ServerError::ConnectionNotFound {
                name: name.to_string(),
                available: self.available_connections(),
            })
    }

    /// The connection name a request will hit, before existence is checked.
    pub fn resolve_name<'a>(&'a self, connection: Option<&'a str>) -> &'a str {
        connection.unwrap_or(&self.settings.default_connection)
    }

    pub fn available_connections(&self) -> Vec<String> {
        self.executors.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn default_connection(&self) -> &str {
        &self.settings.default_connection
    }

    /// Execute a parameterized statement. Parameters are always bound
    /// positionally, never interpolated into the SQL text.
    pub async fn query(
        &self,
        sql: &str,
        params: &[String],
        connection: Option<&str>,
    ) -> Result<Vec<Value>, ServerError> {
        let executor = self.executor(connection)?;
        debug!(
            "Executing query on '{}': {sql}",
            self.resolve_name(connection)
        );
        executor.fetch_rows(sql, params).await
    }

    /// DESCRIBE the given table. The identifier grammar is re-checked here
    /// even though the validator ran already, since the name gets quoted into
    /// the statement text (DESCRIBE cannot take a bind parameter).
    pub async fn table_schema(
        &self,
        table_name: &str,
        connection: Option<&str>,
    ) -> Result<Vec<Value>, ServerError> {
        if !is_valid_identifier(table_name) {
            return Err(ServerError::InvalidIdentifier(table_name.to_string()));
        }
        let sql = format!("DESCRIBE `{table_name}`");
        self.query(&sql, &[], connection).await
    }

    pub async fn list_tables(&self, connection: Option<&str>) -> Result<Vec<String>, ServerError> {
        // SHOW TABLES yields one column whose name depends on the database,
        // so the executor reads the first column positionally.
        self.executor(connection)?
            .fetch_first_column("SHOW TABLES")
            .await
    }

    /// Liveness probe. Converts every failure into `false`; this never
    /// propagates an error outward.
    pub async fn test_connection(&self, connection: Option<&str>) -> bool {
        match self.query("SELECT 1", &[], connection).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "Connection test failed ({}): {e}",
                    self.resolve_name(connection)
                );
                false
            }
        }
    }

    /// Probe every registered connection; all are attempted regardless of
    /// earlier failures.
    pub async fn test_all_connections(&self) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(self.executors.len());
        for name in self.available_connections() {
            let ok = self.test_connection(Some(&name)).await;
            results.push((name, ok));
        }
        results
    }

    /// Connection descriptor with the credential masked. Never exposes the
    /// real password.
    pub fn connection_info(&self, connection: Option<&str>) -> Result<Value, ServerError> {
        let name = self.resolve_name(connection);
        let conn = self
            .settings
            .get(name)
            .ok_or_else(|| ServerError::ConnectionNotFound {
                name: name.to_string(),
                available: self.available_connections(),
            })?;

        Ok(json!({
            "host": conn.host,
            "port": conn.port,
            "user": conn.user,
            "password": "[hidden]",
            "database": conn.database,
            "ssl": conn.ssl,
        }))
    }

    pub async fn close(&self) {
        for (name, executor) in &self.executors {
            debug!("Closing connection pool '{name}'");
            executor.close().await;
        }
        info!("All connection pools closed");
    }
}

#[derive(Debug, PartialEq)]
enum ColumnKind {
    Bool,
    Int,
    Float,
    Decimal,
    Temporal,
    Text,
}

fn column_kind(type_name: &str) -> ColumnKind {
    match type_name {
        "BOOLEAN" | "TINYINT" => ColumnKind::Bool,
        "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => ColumnKind::Int,
        "FLOAT" | "DOUBLE" | "REAL" => ColumnKind::Float,
        "DECIMAL" | "NUMERIC" => ColumnKind::Decimal,
        "DATE" | "TIME" | "DATETIME" | "TIMESTAMP" => ColumnKind::Temporal,
        // VARCHAR, TEXT, BLOB, JSON and everything else as string
        _ => ColumnKind::Text,
    }
}

/// Convert a MySQL row into a JSON object, mapping column types so numbers
/// stay numbers and DECIMAL keeps its precision as a string.
fn row_to_json(row: &MySqlRow) -> Value {
    let mut data = Map::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column_kind(column.type_info().name()) {
            ColumnKind::Bool => {
                // tinyint(1) maps to bool when possible, plain tinyint to int
                if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
                    json!(v)
                } else {
                    json!(row.try_get::<Option<i64>, _>(i).unwrap_or(None))
                }
            }
            ColumnKind::Int => json!(row.try_get::<Option<i64>, _>(i).unwrap_or(None)),
            ColumnKind::Float => json!(row.try_get::<Option<f64>, _>(i).unwrap_or(None)),
            ColumnKind::Decimal => {
                if let Ok(v) = row.try_get::<Option<sqlx::types::BigDecimal>, _>(i) {
                    json!(v.map(|d| d.to_string()))
                } else {
                    json!(null)
                }
            }
            ColumnKind::Temporal | ColumnKind::Text => {
                json!(row.try_get::<Option<String>, _>(i).unwrap_or(None))
            }
        };

        data.insert(column.name().to_string(), value);
    }

    Value::Object(data)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    pub(crate) type CallLog = Arc<Mutex<Vec<(String, Vec<String>)>>>;

    /// Scripted executor recording every statement it receives.
    #[derive(Debug)]
    pub(crate) struct MockExecutor {
        calls: CallLog,
        rows: Vec<Value>,
        tables: Vec<String>,
        fail: bool,
    }

    impl MockExecutor {
        pub(crate) fn with_rows(rows: Vec<Value>) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                rows,
                tables: Vec::new(),
                fail: false,
            }
        }

        pub(crate) fn with_tables(tables: Vec<String>) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                rows: Vec::new(),
                tables,
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                rows: Vec::new(),
                tables: Vec::new(),
                fail: true,
            }
        }

        pub(crate) fn call_log(&self) -> CallLog {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait]
    impl SqlExecutor for MockExecutor {
        async fn fetch_rows(&self, sql: &str, params: &[String]) -> Result<Vec<Value>, ServerError> {
            self.calls
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            if self.fail {
                return Err(ServerError::Query(sqlx::Error::PoolClosed));
            }
            Ok(self.rows.clone())
        }

        async fn fetch_first_column(&self, sql: &str) -> Result<Vec<String>, ServerError> {
            self.calls
                .lock()
                .unwrap()
                .push((sql.to_string(), Vec::new()));
            if self.fail {
                return Err(ServerError::Query(sqlx::Error::PoolClosed));
            }
            Ok(self.tables.clone())
        }

        async fn close(&self) {}
    }

    pub(crate) fn settings(names: &[&str], default: &str) -> DatabaseSettings {
        DatabaseSettings {
            connections: names
                .iter()
                .map(|n| {
                    (
                        (*n).to_string(),
                        ConnectionSettings {
                            host: "127.0.0.1".to_string(),
                            port: 3306,
                            user: "testuser".to_string(),
                            password: "testpass".to_string(),
                            database: "testdb".to_string(),
                            ssl: false,
                        },
                    )
                })
                .collect(),
            default_connection: default.to_string(),
            connection_limit: 2,
            timeout_ms: 1000,
        }
    }

    pub(crate) fn manager(
        names: &[&str],
        default: &str,
        executors: Vec<MockExecutor>,
    ) -> DatabaseManager {
        let executors = names
            .iter()
            .zip(executors)
            .map(|(n, e)| ((*n).to_string(), Box::new(e) as Box<dyn SqlExecutor>))
            .collect();
        DatabaseManager::with_executors(settings(names, default), executors)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockExecutor;
    use super::*;

    fn dead_endpoint_settings() -> DatabaseSettings {
        // Port 9 (discard) so that nothing ever answers; pools are lazy and
        // only the liveness tests touch the network.
        let mut settings = testing::settings(&["main", "logs"], "main");
        for (_, conn) in &mut settings.connections {
            conn.port = 9;
        }
        settings
    }

    #[test]
    fn resolves_default_and_named_connections() {
        let db = testing::manager(
            &["main", "logs"],
            "main",
            vec![MockExecutor::with_rows(vec![]), MockExecutor::with_rows(vec![])],
        );
        assert_eq!(db.resolve_name(None), "main");
        assert_eq!(db.resolve_name(Some("logs")), "logs");
        assert_eq!(db.available_connections(), vec!["main", "logs"]);
        assert!(db.executor(Some("logs")).is_ok());
    }

    #[test]
    fn unknown_connection_enumerates_available_names() {
        let db = testing::manager(
            &["main", "logs"],
            "main",
            vec![MockExecutor::with_rows(vec![]), MockExecutor::with_rows(vec![])],
        );
        let err = db.executor(Some("nope")).unwrap_err().to_string();
        assert!(err.contains("'nope'"), "unexpected message: {err}");
        assert!(err.contains("main, logs"), "unexpected message: {err}");
    }

    #[test]
    fn connection_info_masks_password() {
        let db = testing::manager(&["main"], "main", vec![MockExecutor::with_rows(vec![])]);
        let info = db.connection_info(None).unwrap();
        assert_eq!(info["user"], "testuser");
        assert_eq!(info["password"], "[hidden]");
        assert_eq!(info["database"], "testdb");

        assert!(db.connection_info(Some("nope")).is_err());
    }

    #[tokio::test]
    async fn query_routes_to_the_named_connection() {
        let main = MockExecutor::with_rows(vec![json!({"id": 1})]);
        let logs = MockExecutor::with_rows(vec![json!({"id": 2})]);
        let main_calls = main.call_log();
        let logs_calls = logs.call_log();
        let db = testing::manager(&["main", "logs"], "main", vec![main, logs]);

        let rows = db.query("SELECT * FROM events", &[], Some("logs")).await.unwrap();
        assert_eq!(rows, vec![json!({"id": 2})]);
        assert!(main_calls.lock().unwrap().is_empty());
        assert_eq!(
            logs_calls.lock().unwrap().as_slice(),
            &[("SELECT * FROM events".to_string(), vec![])]
        );
    }

    #[tokio::test]
    async fn query_binds_params_positionally() {
        let executor = MockExecutor::with_rows(vec![json!({"id": 1, "name": "test"})]);
        let calls = executor.call_log();
        let db = testing::manager(&["default"], "default", vec![executor]);

        db.query("SELECT * FROM users WHERE id = ?", &["123".to_string()], None)
            .await
            .unwrap();
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[(
                "SELECT * FROM users WHERE id = ?".to_string(),
                vec!["123".to_string()]
            )]
        );
    }

    #[tokio::test]
    async fn table_schema_quotes_the_validated_identifier() {
        let executor = MockExecutor::with_rows(vec![json!({"Field": "id", "Type": "int"})]);
        let calls = executor.call_log();
        let db = testing::manager(&["default"], "default", vec![executor]);

        let schema = db.table_schema("users", None).await.unwrap();
        assert_eq!(schema[0]["Field"], "id");
        assert_eq!(calls.lock().unwrap()[0].0, "DESCRIBE `users`");
    }

    #[tokio::test]
    async fn table_schema_revalidates_identifier() {
        let executor = MockExecutor::with_rows(vec![]);
        let calls = executor.call_log();
        let db = testing::manager(&["default"], "default", vec![executor]);

        let err = db
            .table_schema("users; DROP TABLE users", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidIdentifier(_)));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_tables_empty_result_is_not_an_error() {
        let db = testing::manager(
            &["default"],
            "default",
            vec![MockExecutor::with_tables(vec![])],
        );
        assert_eq!(db.list_tables(None).await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_connection_reports_false_on_failure() {
        let db = testing::manager(&["default"], "default", vec![MockExecutor::failing()]);
        assert!(!db.test_connection(None).await);
        assert!(!db.test_connection(Some("missing")).await);
    }

    #[tokio::test]
    async fn test_connection_never_errors_outward() {
        // Real lazy pools against a dead endpoint: the probe must report
        // false instead of propagating the connect error.
        let db = DatabaseManager::new(dead_endpoint_settings());
        assert!(!db.test_connection(None).await);
    }

    #[tokio::test]
    async fn test_all_connections_attempts_every_entry() {
        let db = testing::manager(
            &["main", "logs"],
            "main",
            vec![MockExecutor::failing(), MockExecutor::with_rows(vec![json!({"1": 1})])],
        );
        let results = db.test_all_connections().await;
        assert_eq!(results, vec![("main".to_string(), false), ("logs".to_string(), true)]);
    }

    #[test]
    fn column_kinds_cover_the_mysql_type_names() {
        assert_eq!(column_kind("TINYINT"), ColumnKind::Bool);
        assert_eq!(column_kind("BOOLEAN"), ColumnKind::Bool);
        assert_eq!(column_kind("INT"), ColumnKind::Int);
        assert_eq!(column_kind("BIGINT"), ColumnKind::Int);
        assert_eq!(column_kind("SMALLINT"), ColumnKind::Int);
        assert_eq!(column_kind("DOUBLE"), ColumnKind::Float);
        assert_eq!(column_kind("FLOAT"), ColumnKind::Float);
        assert_eq!(column_kind("DECIMAL"), ColumnKind::Decimal);
        assert_eq!(column_kind("NUMERIC"), ColumnKind::Decimal);
        assert_eq!(column_kind("DATETIME"), ColumnKind::Temporal);
        assert_eq!(column_kind("TIMESTAMP"), ColumnKind::Temporal);
        assert_eq!(column_kind("VARCHAR"), ColumnKind::Text);
        assert_eq!(column_kind("TEXT"), ColumnKind::Text);
        assert_eq!(column_kind("JSON"), ColumnKind::Text);
    }
}
