use anyhow::{anyhow, Result};
use std::env;

/// Service configuration, read from the environment.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    /// Optional: without Redis the service falls back to an in-process cache.
    pub redis_url: Option<String>,
    pub provider_base_url: String,
    pub port: u16,
}

const DEFAULT_PROVIDER_BASE_URL: &str = "https://site.api.espn.com";

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = match env::var("DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("DATABASE_URL is set but empty")),
            Err(_) => return Err(anyhow!("DATABASE_URL must be set")),
        };

        let redis_url = match env::var("REDIS_URL") {
            Ok(v) if !v.trim().is_empty() => Some(v),
            _ => None,
        };

        let provider_base_url = env::var("PROVIDER_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string());

        Ok(Self {
            database_url,
            redis_url,
            provider_base_url,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
        })
    }
}
