use std::{env, time::Duration};

use anyhow::{Context, Result, anyhow};

use crate::compression::CompressionOptions;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_CACHE_TTL_SECS: u64 = 30;

/// Runtime configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub backend_url: String,
    pub anon_key: String,
    pub service_key: Option<String>,
    pub port: u16,
    pub http_timeout: Duration,
    pub max_connections: u32,
    pub cache_ttl: Duration,
    pub compression: CompressionOptions,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow!("{key} env var is missing"))
        };

        let database_url = required("DATABASE_URL")?;
        let backend_url = required("BACKEND_URL")?.trim_end_matches('/').to_string();
        let anon_key = required("BACKEND_ANON_KEY")?;
        let service_key = lookup("BACKEND_SERVICE_KEY").filter(|value| !value.trim().is_empty());

        let port = parse_or("PORT", &lookup, DEFAULT_PORT)?;
        let timeout_secs = parse_or("HTTP_TIMEOUT_SECS", &lookup, DEFAULT_HTTP_TIMEOUT_SECS)?;
        let max_connections = parse_or("DATABASE_MAX_CONNECTIONS", &lookup, DEFAULT_MAX_CONNECTIONS)?;
        let cache_ttl_secs = parse_or("CACHE_TTL_SECS", &lookup, DEFAULT_CACHE_TTL_SECS)?;

        let defaults = CompressionOptions::default();
        let compression = CompressionOptions {
            max_size_mb: parse_or("COMPRESS_MAX_SIZE_MB", &lookup, defaults.max_size_mb)?,
            max_edge_px: parse_or("COMPRESS_MAX_EDGE_PX", &lookup, defaults.max_edge_px)?,
            quality: parse_or("COMPRESS_QUALITY", &lookup, defaults.quality)?,
        };

        Ok(Self {
            database_url,
            backend_url,
            anon_key,
            service_key,
            port,
            http_timeout: Duration::from_secs(timeout_secs),
            max_connections,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            compression,
        })
    }
}

fn parse_or<T>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value `{raw}`")),
        _ => Ok(default),
    }
}
