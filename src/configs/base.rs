use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

/// Environment variable that overrides `bot.token`.
pub const TOKEN_ENV: &str = "DISCORD_TOKEN";

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub chime: ChimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load() -> AnyResult<Self> {
        let config_path = if std::path::Path::new("config.toml").exists() {
            "config.toml"
        } else if std::path::Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Err("config.toml or config.default.toml not found".into());
        };

        crate::log_println!("Loading configuration from: {}", config_path);

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.trim().is_empty() {
            return Err(format!("{} is empty", config_path).into());
        }

        let mut config = Self::parse(&config_str)?;
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.bot.token = token;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> AnyResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> AnyResult<()> {
        if self.bot.token.trim().is_empty() {
            return Err(format!("bot.token is empty and {} is not set", TOKEN_ENV).into());
        }
        if self.chime.extension.trim().is_empty() {
            return Err("chime.extension must not be empty".into());
        }
        self.chime.offset()?;
        self.chime.tolerance()?;
        Ok(())
    }
}
