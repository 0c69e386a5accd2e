// mysql-helper/src/utils/database.rs
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor};
use tracing::debug;

use crate::errors::{AppError, Result};
use crate::profiles::is_safe_database_name;
use crate::profiles::resolver::ConnectionParams;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Queries and schema changes against a resolved local connection.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn test_connection(&self, params: &ConnectionParams) -> Result<()>;

    async fn list_databases(&self, params: &ConnectionParams) -> Result<Vec<String>>;

    async fn database_exists(&self, params: &ConnectionParams, database: &str) -> Result<bool>;

    /// Data plus index length of every table in `database`, in MiB.
    async fn database_size_mb(&self, params: &ConnectionParams, database: &str) -> Result<f64>;

    /// Drops `database` if present and creates it again with the connection's
    /// charset and collation.
    async fn recreate_database(&self, params: &ConnectionParams, database: &str) -> Result<()>;
}

/// [`DatabaseClient`] backed by a fresh sqlx connection per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlClient;

impl MySqlClient {
    async fn connect(params: &ConnectionParams) -> Result<MySqlConnection> {
        let options = MySqlConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.username)
            .password(&params.password)
            .charset(&params.charset);

        debug!(connection = %params.name, host = %params.host, port = params.port, "Connecting to MySQL");
        MySqlConnection::connect_with(&options).await.map_err(|e| {
            AppError::external(
                format!("Failed to connect to {} ({}:{})", params.name, params.host, params.port),
                e,
            )
        })
    }
}

fn decode_name(raw: Vec<u8>) -> String {
    String::from_utf8_lossy(&raw).into_owned()
}

fn is_safe_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// DDL for [`DatabaseClient::recreate_database`]. Every interpolated value is
/// validated first since DDL cannot take bound parameters.
pub fn recreate_statements(params: &ConnectionParams, database: &str) -> Result<[String; 2]> {
    if !is_safe_database_name(database) {
        return Err(AppError::invalid(format!("Database name {:?} contains unsupported characters", database)));
    }
    if !is_safe_identifier(&params.charset) || !is_safe_identifier(&params.collation) {
        return Err(AppError::invalid(format!(
            "Connection {} has an invalid charset {:?} or collation {:?}",
            params.name, params.charset, params.collation
        )));
    }

    Ok([
        format!("DROP DATABASE IF EXISTS `{}`", database),
        format!(
            "CREATE DATABASE `{}` CHARACTER SET {} COLLATE {}",
            database, params.charset, params.collation
        ),
    ])
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    async fn test_connection(&self, params: &ConnectionParams) -> Result<()> {
        let mut conn = Self::connect(params).await?;
        conn.ping()
            .await
            .map_err(|e| AppError::external(format!("Connection {} did not answer", params.name), e))?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn list_databases(&self, params: &ConnectionParams) -> Result<Vec<String>> {
        let mut conn = Self::connect(params).await?;
        let rows = sqlx::query_scalar::<_, Vec<u8>>("SHOW DATABASES")
            .fetch_all(&mut conn)
            .await
            .map_err(|e| AppError::external(format!("Failed to list databases on {}", params.name), e))?;
        let _ = conn.close().await;

        let mut databases: Vec<String> = rows.into_iter().map(decode_name).collect();
        databases.sort();
        Ok(databases)
    }

    async fn database_exists(&self, params: &ConnectionParams, database: &str) -> Result<bool> {
        let mut conn = Self::connect(params).await?;
        let found = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
        )
        .bind(database)
        .fetch_optional(&mut conn)
        .await
        .map_err(|e| AppError::external(format!("Failed to look up database {}", database), e))?;
        let _ = conn.close().await;
        Ok(found.is_some())
    }

    async fn database_size_mb(&self, params: &ConnectionParams, database: &str) -> Result<f64> {
        let mut conn = Self::connect(params).await?;
        let bytes = sqlx::query_scalar::<_, u64>(
            "SELECT CAST(COALESCE(SUM(data_length + index_length), 0) AS UNSIGNED) \
             FROM information_schema.TABLES WHERE table_schema = ?",
        )
        .bind(database)
        .fetch_one(&mut conn)
        .await
        .map_err(|e| AppError::external(format!("Failed to estimate the size of {}", database), e))?;
        let _ = conn.close().await;
        Ok(bytes as f64 / BYTES_PER_MB)
    }

    async fn recreate_database(&self, params: &ConnectionParams, database: &str) -> Result<()> {
        let statements = recreate_statements(params, database)?;
        let mut conn = Self::connect(params).await?;
        for statement in &statements {
            debug!(%statement, "Executing DDL");
            conn.execute(statement.as_str())
                .await
                .map_err(|e| AppError::external(format!("Failed to recreate database {}", database), e))?;
        }
        let _ = conn.close().await;
        Ok(())
    }
}
