pub mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::{Config as ConfigLoader, Environment, File, FileFormat};
use std::collections::HashSet;
use std::path::Path;

const ENV_PREFIX: &str = "TETHER";

impl TetherConfig {
    /// Load configuration from file with optional environment variable overrides
    ///
    /// Missing keys fall back to defaults; `TETHER__SECTION__KEY` variables
    /// override the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();
        let builder = ConfigLoader::builder().add_source(File::from(config_path));
        Self::finish(builder)
            .with_context(|| format!("Failed to load configuration from {}", config_path.display()))
    }

    /// Defaults plus environment overrides only
    pub fn from_env() -> Result<Self> {
        Self::finish(ConfigLoader::builder())
    }

    /// Parse an inline TOML document (environment overrides still apply)
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::finish(ConfigLoader::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config = builder
            // Override with environment variables (TETHER__)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let cfg: TetherConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.retry.validate().context("Invalid default retry policy")?;

        let reconnect = &self.reconnect;
        if reconnect.max_attempts == 0 {
            anyhow::bail!("reconnect.max_attempts must be at least 1");
        }
        if reconnect.base_delay.is_zero() {
            anyhow::bail!("reconnect.base_delay_ms must be greater than zero");
        }
        if reconnect.max_delay < reconnect.base_delay {
            anyhow::bail!("reconnect.max_delay_ms cannot be below reconnect.base_delay_ms");
        }
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            anyhow::bail!("reconnect.jitter must be between 0.0 and 1.0, got {}", reconnect.jitter);
        }

        if let Some(url) = &self.channel.url {
            crate::channel::WsConnector::new(url).context("Invalid channel.url")?;
        }
        if self.channel.name.trim().is_empty() {
            anyhow::bail!("channel.name cannot be empty");
        }

        let mut codes = HashSet::new();
        for strategy in &self.strategies {
            if strategy.code.trim().is_empty() {
                anyhow::bail!("strategy code cannot be empty");
            }
            if !codes.insert(strategy.code.as_str()) {
                anyhow::bail!("duplicate strategy for code '{}'", strategy.code);
            }
            if let Some(policy) = &strategy.retry {
                policy
                    .validate()
                    .with_context(|| format!("Invalid retry policy for '{}'", strategy.code))?;
            }
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}', must be one of: {:?}",
                self.logging.level,
                valid_log_levels
            );
        }

        Ok(())
    }
}
