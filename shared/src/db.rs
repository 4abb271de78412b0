//! Database connection management.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::secrets::get_database_credentials;
use crate::{Config, Error, Result};

/// Resolve the Postgres URL, fetching credentials from Secrets Manager when needed.
pub async fn database_url(config: &Config) -> Result<String> {
    if let Some(url) = &config.database_url {
        return Ok(url.clone());
    }

    let secret_arn = config
        .db_secret_arn
        .as_deref()
        .ok_or_else(|| Error::Config("DATABASE_URL or DB_SECRET_ARN must be set".to_string()))?;

    let creds = get_database_credentials(secret_arn).await?;

    let host = config
        .db_host
        .clone()
        .or(creds.host)
        .ok_or_else(|| Error::Config("DB_HOST not set".to_string()))?;
    let name = creds.dbname.unwrap_or_else(|| config.db_name.clone());

    Ok(format!(
        "postgres://{}:{}@{}:{}/{}",
        urlencoding::encode(&creds.username),
        urlencoding::encode(&creds.password),
        host,
        creds.port.unwrap_or(5432),
        name
    ))
}

/// Create a database connection pool.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let url = database_url(config).await?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&url)
        .await
        .map_err(Error::Database)?;

    Ok(pool)
}
