pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides for infrastructure settings. When the file does not
    /// exist, built-in defaults are used — allowing the gateway to start with
    /// zero configuration for local development.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            GatewayConfig::default()
        };

        // Environment variable overrides for infrastructure settings.
        config.apply_env_overrides();

        config.validate()?;
        tracing::info!("loaded gateway configuration");
        Ok(config)
    }

    /// Apply environment variable overrides for connection/infra settings.
    /// Business config (limits, key records) is managed exclusively via the
    /// store — never from local files or env vars.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RELAY_STORE_URL") {
            self.store.url = v;
        }
        if let Ok(v) = std::env::var("RELAY_JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("RELAY_LEASE_TTL_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.lease_ttl_ms = n;
            }
        }
        if let Ok(v) = std::env::var("RELAY_QUEUE_POLL_INTERVAL_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.queue_poll_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("RELAY_ENV") {
            match v.as_str() {
                "production" => self.env = Env::Production,
                "development" => self.env = Env::Development,
                other => tracing::warn!("config: ignoring unknown RELAY_ENV value: {}", other),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.trim().is_empty() {
            anyhow::bail!("jwt_secret must be set and non-blank");
        }
        if self.store.url.trim().is_empty() {
            anyhow::bail!("store.url cannot be empty");
        }
        if self.lease_ttl_ms == 0 {
            anyhow::bail!("lease_ttl_ms must be positive");
        }
        Ok(())
    }
}
