//! Secrets Manager access for database and Google credentials.
//!
//! Values are fetched once per container and kept for its lifetime; both the
//! database URL and the service-account key are read at cold start only.

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::{OnceCell, RwLock};
use tracing::info;

use crate::{Error, Result};

static CLIENT: OnceCell<SecretsClient> = OnceCell::const_new();
static SECRET_VALUES: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn secret_values() -> &'static RwLock<HashMap<String, String>> {
    SECRET_VALUES.get_or_init(|| RwLock::new(HashMap::new()))
}

async fn client() -> &'static SecretsClient {
    CLIENT
        .get_or_init(|| async {
            let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            SecretsClient::new(&config)
        })
        .await
}

/// Database credentials stored by RDS.
#[derive(Debug, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
}

/// Raw string value of `secret_arn`.
pub async fn get_secret(secret_arn: &str) -> Result<String> {
    if let Some(value) = secret_values().read().await.get(secret_arn) {
        return Ok(value.clone());
    }

    let response = client()
        .await
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret {}: {}", secret_arn, e)))?;

    let value = response
        .secret_string()
        .ok_or_else(|| Error::Aws(format!("Secret {} has no string value", secret_arn)))?
        .to_string();

    info!(secret_arn, "Loaded secret");
    secret_values()
        .write()
        .await
        .insert(secret_arn.to_string(), value.clone());

    Ok(value)
}

/// Secret value decoded as JSON into `T`. `what` names the secret in errors.
pub async fn get_json_secret<T: DeserializeOwned>(secret_arn: &str, what: &str) -> Result<T> {
    let raw = get_secret(secret_arn).await?;
    parse_json_secret(&raw, what)
}

fn parse_json_secret<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::Config(format!("Invalid {} secret: {}", what, e)))
}

pub async fn get_database_credentials(secret_arn: &str) -> Result<DatabaseCredentials> {
    get_json_secret(secret_arn, "database credentials").await
}
