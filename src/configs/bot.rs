use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct BotConfig {
    #[serde(default)]
    pub token: String,
    /// Prefix for text commands. Slash commands work regardless.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub invite_link: Option<String>,
}
