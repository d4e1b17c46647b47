//! Environment-driven configuration

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_APP_NAME: &str = "Disappearo";
pub const DEFAULT_TEXT_MODEL: &str = "unitary/unbiased-toxic-roberta";
pub const DEFAULT_IMAGE_MODEL: &str = "Falconsai/nsfw_image_detection";
const DEFAULT_SWEEP_SECS: u64 = 30;
const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;

/// Moderation settings
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Hugging Face inference token; without it only the local word list runs
    pub api_token: Option<String>,
    pub text_model: String,
    pub image_model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub port: u16,
    pub app_name: String,
    pub sweep_interval: Duration,
    /// Lifetime of a chat session, counted from acceptance
    pub session_ttl: Duration,
    pub moderation: ModerationConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = var("DISAPPEARO_DB_PATH").unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.disappearo/disappearo.db")
        });

        let port = var("DISAPPEARO_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let sweep_secs = var("DISAPPEARO_SWEEP_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|s: &u64| *s > 0)
            .unwrap_or(DEFAULT_SWEEP_SECS);

        let session_ttl_secs = var("DISAPPEARO_SESSION_TTL_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|s: &u64| *s > 0)
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);

        Self {
            db_path,
            port,
            app_name: var("DISAPPEARO_APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
            sweep_interval: Duration::from_secs(sweep_secs),
            session_ttl: Duration::from_secs(session_ttl_secs),
            moderation: ModerationConfig {
                api_token: var("HUGGINGFACE_API_TOKEN").filter(|t| !t.trim().is_empty()),
                text_model: var("DISAPPEARO_TEXT_MODEL")
                    .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
                image_model: var("DISAPPEARO_IMAGE_MODEL")
                    .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            },
        }
    }
}
