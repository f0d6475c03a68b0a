use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::url_canon::DEFAULT_PROXY_PREFIX;

/// Runtime settings read from the environment (and `.env`, if present).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub public_dir: PathBuf,
    pub file_base_url: String,
    pub proxy_prefix: String,
    pub bind_addr: String,
    pub max_upload_file_size: usize,
    pub max_upload_files: usize,
    pub catalog_query_timeout: Duration,
    pub sentry_url: Option<String>,
    pub db_pool_max_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        Ok(Self {
            database_url,
            public_dir: PathBuf::from(var_or("PUBLIC_DIR", "./public")),
            file_base_url: var_or("FILE_BASE_URL", "http://localhost:3000"),
            proxy_prefix: var_or("PROXY_PREFIX", DEFAULT_PROXY_PREFIX),
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:3000"),
            max_upload_file_size: parsed_or("MAX_UPLOAD_FILE_SIZE", 10 * 1024 * 1024),
            max_upload_files: parsed_or("MAX_UPLOAD_FILES", 10),
            catalog_query_timeout: Duration::from_secs(parsed_or(
                "CATALOG_QUERY_TIMEOUT_SECS",
                30,
            )),
            sentry_url: env::var("SENTRY_URL").ok().filter(|v| !v.trim().is_empty()),
            db_pool_max_size: parsed_or("DB_POOL_MAX_SIZE", 15),
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
