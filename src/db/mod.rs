pub mod rows;

use async_trait::async_trait;
use duckdb::Connection;
use r2d2::{ManageConnection, Pool};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use tracing::debug;

#[derive(Debug)]
pub enum DbError {
    ConnectionError(String),
    QueryError(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::ConnectionError(msg) => write!(f, "database connection error: {}", msg),
            DbError::QueryError(msg) => write!(f, "database query error: {}", msg),
        }
    }
}

impl Error for DbError {}

/// Executed-query output, ready for the wire. Rows are JSON objects keyed by
/// column name with values serialized per [`rows`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
}

/// The execution collaborator: run a SQL string, get rows back or a
/// descriptive error. Connectivity, syntax, and permission failures are
/// indistinguishable at this layer.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult, DbError>;
}

pub struct DuckDbConnectionManager {
    connection_string: String,
}

impl DuckDbConnectionManager {
    pub fn new(connection_string: String) -> Self {
        Self { connection_string }
    }
}

impl ManageConnection for DuckDbConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        Connection::open(&self.connection_string)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Production executor over an embedded DuckDB pool. Queries run on a
/// blocking task so the async runtime is never pinned by the database.
pub struct DuckDbExecutor {
    pool: Pool<DuckDbConnectionManager>,
}

impl DuckDbExecutor {
    pub fn new(pool: Pool<DuckDbConnectionManager>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for DuckDbExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, DbError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();

        debug!("Executing SQL: {}", sql);

        let result = tokio::task::spawn_blocking(move || -> Result<QueryResult, DbError> {
            let conn = pool
                .get()
                .map_err(|e| DbError::ConnectionError(e.to_string()))?;

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| DbError::QueryError(e.to_string()))?;

            let column_count = stmt.column_count();
            let mut columns = Vec::with_capacity(column_count);
            for index in 0..column_count {
                match stmt.column_name(index) {
                    Ok(name) => columns.push(name.to_string()),
                    Err(e) => return Err(DbError::QueryError(e.to_string())),
                }
            }

            let mut result_rows = stmt
                .query([])
                .map_err(|e| DbError::QueryError(e.to_string()))?;

            let mut out = Vec::new();
            while let Some(row) = result_rows
                .next()
                .map_err(|e| DbError::QueryError(e.to_string()))?
            {
                let mut values = Vec::with_capacity(columns.len());
                for index in 0..columns.len() {
                    let value: duckdb::types::Value = row
                        .get(index)
                        .map_err(|e| DbError::QueryError(e.to_string()))?;
                    values.push(value);
                }
                out.push(rows::row_object(&columns, &values));
            }

            // Column list follows the rows: an empty result reports no columns.
            if out.is_empty() {
                columns.clear();
            }

            let row_count = out.len();
            Ok(QueryResult {
                columns,
                rows: out,
                row_count,
            })
        })
        .await
        .map_err(|e| DbError::QueryError(format!("database task failed: {}", e)))??;

        Ok(result)
    }
}
