use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

use crate::error::ConfigError;
use crate::log_entry::LogEntry;
use crate::sink::{Sink, SinkError};
use crate::tag::Tag;

fn default_table_name() -> String {
    "logs".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_password() -> String {
    "changeme".to_string()
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl PostgresConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database,
        )
    }
}

/// Stores each entry as a JSONB row keyed by its tag.
pub struct PostgresSink {
    config: PostgresConfig,
    pool: PgPool,
}

impl PostgresSink {
    pub async fn from_config(config: PostgresConfig) -> Result<Self, ConfigError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url())
            .await
            .map_err(|e| ConfigError::Sink(format!("failed to connect to postgres: {e}")))?;

        let create_table = format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                tag TEXT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                entry JSONB NOT NULL
            )"#,
            config.table_name,
        );
        sqlx::query(&create_table)
            .execute(&pool)
            .await
            .map_err(|e| ConfigError::Sink(format!("failed to create table: {e}")))?;

        let create_index = format!(
            r#"CREATE INDEX IF NOT EXISTS {table}_tag_idx ON {table} (tag)"#,
            table = config.table_name,
        );
        sqlx::query(&create_index)
            .execute(&pool)
            .await
            .map_err(|e| ConfigError::Sink(format!("failed to create tag index: {e}")))?;

        Ok(Self { config, pool })
    }
}

#[async_trait]
impl Sink for PostgresSink {
    async fn write(&self, tag: &Tag, batch: &[LogEntry]) -> Result<(), SinkError> {
        let received_at = Utc::now();
        // build a batch insert using UNNEST
        let mut tags = Vec::with_capacity(batch.len());
        let mut times: Vec<DateTime<Utc>> = Vec::with_capacity(batch.len());
        let mut entries = Vec::with_capacity(batch.len());

        for entry in batch {
            tags.push(tag.to_string());
            times.push(received_at);
            entries.push(entry.to_json());
        }

        let query = format!(
            r#"INSERT INTO {} (tag, received_at, entry)
               SELECT * FROM UNNEST($1::text[], $2::timestamptz[], $3::jsonb[])"#,
            self.config.table_name,
        );

        sqlx::query(&query)
            .bind(&tags)
            .bind(&times)
            .bind(&entries)
            .execute(&self.pool)
            .await?;

        debug!("Inserted {} rows for {}", batch.len(), tag);
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
