use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use persona_chat::accumulator::AccumulatorConfig;
use persona_chat::presence::PresenceConfig;
use persona_chat::reply::GeminiConfig;
use persona_chat::{Contact, SessionConfig};

const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContactConfig {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub persona: String,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub user_name: String,
    /// Base64-encoded, like the rest of the locally cached secrets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub api_base_url: String,
    pub debounce_ms: u64,
    pub think_time_min_ms: u64,
    pub think_time_max_ms: u64,
    pub history_limit: usize,
    pub max_image_width: u32,
    pub fallback_reply: String,
    pub contacts: Vec<ContactConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let accumulator = AccumulatorConfig::default();
        let gemini = GeminiConfig::default();
        AppConfig {
            user_name: "You".to_string(),
            api_key: None,
            model: gemini.model,
            api_base_url: gemini.base_url,
            debounce_ms: millis(accumulator.debounce),
            think_time_min_ms: millis(accumulator.think_time_min),
            think_time_max_ms: millis(accumulator.think_time_max),
            history_limit: accumulator.history_limit,
            max_image_width: persona_chat::media::MAX_IMAGE_WIDTH,
            fallback_reply: accumulator.fallback_reply,
            contacts: vec![ContactConfig {
                id: "1".to_string(),
                name: "Patricia".to_string(),
                avatar: None,
                persona: "You are Patricia, 24, chatting casually with a friend. \
                          Keep it short, warm and informal."
                    .to_string(),
            }],
        }
    }
}

impl AppConfig {
    pub fn set_api_key(&mut self, api_key: &str) {
        self.api_key = Some(BASE64.encode(api_key));
    }

    /// Environment variables win over the stored key
    pub fn resolve_api_key(&self) -> Option<String> {
        for var in API_KEY_VARS {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    return Some(value);
                }
            }
        }
        self.api_key.as_ref().and_then(|encoded| {
            BASE64
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts
            .iter()
            .map(|c| {
                let mut contact = Contact::new(&c.id, &c.name, &c.persona);
                contact.avatar = c.avatar.clone();
                contact
            })
            .collect()
    }

    pub fn session_config(&self) -> SessionConfig {
        let accumulator = AccumulatorConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            think_time_min: Duration::from_millis(self.think_time_min_ms),
            think_time_max: Duration::from_millis(self.think_time_max_ms.max(self.think_time_min_ms)),
            history_limit: self.history_limit,
            fallback_reply: self.fallback_reply.clone(),
            ..AccumulatorConfig::default()
        };
        SessionConfig {
            user_name: self.user_name.clone(),
            max_image_width: self.max_image_width,
            accumulator,
            presence: PresenceConfig::default(),
        }
    }

    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: self.resolve_api_key(),
            model: self.model.clone(),
            base_url: self.api_base_url.clone(),
            ..GeminiConfig::default()
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

pub fn set_config_path_override(path: PathBuf) {
    let _ = CONFIG_PATH_OVERRIDE.set(path);
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("persona-chat");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    let config_path = get_config_path()?;
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(&config_path)?;
    serde_json::to_writer_pretty(file, config)?;

    info!("Config saved to {}", config_path.display());
    Ok(())
}

/// Load the config file, writing the defaults on first run
pub fn load_config() -> Result<AppConfig> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        let config = AppConfig::default();
        save_config(&config)?;
        return Ok(config);
    }

    let mut file = File::open(&config_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let config: AppConfig = serde_json::from_str(&contents)
        .map_err(|e| anyhow!("Invalid config {}: {}", config_path.display(), e))?;
    if config.contacts.is_empty() {
        return Err(anyhow!("Config {} defines no contacts", config_path.display()));
    }
    info!("Loaded config for {} from {}", config.user_name, config_path.display());

    Ok(config)
}
