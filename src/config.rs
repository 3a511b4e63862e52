use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::db::{RetryPolicy, DEFAULT_MAX_POOL_SIZE};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub environment: String,
    pub server_host: String,
    pub server_port: u16,
    pub route_prefix: String,
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub database_retry: RetryPolicy,
    pub upload_dir: PathBuf,
    pub cors_allowed_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let environment = env::var("NODE_ENV").unwrap_or_else(|_| "dev".to_string());
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;
        let route_prefix = env::var("PREFIX").unwrap_or_else(|_| "api".to_string());

        let database_url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => database_url_from_env()?,
        };
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);

        let defaults = RetryPolicy::default();
        let attempts = match env::var("DATABASE_CONNECT_ATTEMPTS") {
            Ok(value) => value
                .parse()
                .context("DATABASE_CONNECT_ATTEMPTS must be an integer")?,
            Err(_) => defaults.attempts,
        };
        let delay = match env::var("DATABASE_CONNECT_RETRY_DELAY_MS") {
            Ok(value) => Duration::from_millis(
                value
                    .parse()
                    .context("DATABASE_CONNECT_RETRY_DELAY_MS must be an integer")?,
            ),
            Err(_) => defaults.delay,
        };

        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("uploads"));
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();

        Ok(Self {
            environment,
            server_host,
            server_port,
            route_prefix,
            database_url,
            database_max_pool_size,
            database_retry: RetryPolicy { attempts, delay },
            upload_dir,
            cors_allowed_origin,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn database_url_from_env() -> Result<String> {
    let host = env::var("POSTGRES_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port: u16 = env::var("POSTGRES_PORT")
        .unwrap_or_else(|_| "5432".to_string())
        .parse()
        .context("POSTGRES_PORT must be a valid u16")?;
    let user = env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .context("POSTGRES_PASSWORD must be set when DATABASE_URL is not")?;
    let database =
        env::var("POSTGRES_DB").context("POSTGRES_DB must be set when DATABASE_URL is not")?;

    compose_database_url(&host, port, &user, &password, &database)
}

/// Builds a `postgres://` URL, percent-encoding credentials as needed.
pub fn compose_database_url(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    database: &str,
) -> Result<String> {
    let mut url = Url::parse(&format!("postgres://{host}"))
        .with_context(|| format!("invalid database host: {host}"))?;
    url.set_port(Some(port))
        .map_err(|_| anyhow::anyhow!("cannot set port on database URL"))?;
    url.set_username(user)
        .map_err(|_| anyhow::anyhow!("cannot set user on database URL"))?;
    url.set_password(Some(password))
        .map_err(|_| anyhow::anyhow!("cannot set password on database URL"))?;
    url.set_path(&format!("/{database}"));
    Ok(url.to_string())
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
