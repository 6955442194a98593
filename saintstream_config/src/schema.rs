use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use saintstream_conversation::{ConversationConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_KEY_PREFIX};
use saintstream_core::{GenerationOptions, Identity};

pub const CONFIG_DIR_NAME: &str = "saintstream";
pub const CONFIG_FILE_NAME: &str = "config.json";

const DATABASE_FILE_NAME: &str = "history.db";
const API_KEY_PLACEHOLDER: &str = "your-api-key-here";

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub user: UserConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Prior messages sent with each request
    pub history_limit: usize,
    pub key_prefix: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        let generation = GenerationOptions::default();
        Self {
            model: generation.model,
            max_tokens: generation.max_tokens,
            temperature: generation.temperature,
            history_limit: DEFAULT_HISTORY_LIMIT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            timeout_secs: None,
        }
    }
}

impl ProviderConfig {
    /// The API key, unless it is missing or still the template placeholder.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty() && key != API_KEY_PLACEHOLDER).then_some(key)
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; defaults to `history.db` in the config directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct UserConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserConfig {
    /// Identity the CLI starts with: signed in if a default user is set.
    #[must_use]
    pub fn identity(&self) -> Identity {
        match self.default_user_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Identity::signed_in(id, self.display_name.clone()),
            _ => Identity::guest(),
        }
    }
}

impl Config {
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join(CONFIG_DIR_NAME))
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'saintstream init' to create config.",
                config_path.display()
            );
        }

        Self::load_from(&config_path)
    }

    /// Load the config file if present, otherwise defaults.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config at {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    /// Database file for persisted history.
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::ensure_config_dir()?.join(DATABASE_FILE_NAME)),
        }
    }

    #[must_use]
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.assistant.model.clone(),
            max_tokens: self.assistant.max_tokens,
            temperature: self.assistant.temperature,
        }
    }

    #[must_use]
    pub fn conversation_config(&self) -> ConversationConfig {
        ConversationConfig {
            generation: self.generation_options(),
            ..ConversationConfig::default()
        }
        .with_history_limit(self.assistant.history_limit)
        .with_key_prefix(self.assistant.key_prefix.clone())
    }

    pub fn create_config() -> anyhow::Result<PathBuf> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        Self::write_template(&config_path)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Edit the config file and add your API key");
        println!("   2. Run 'saintstream chat' to talk to the movie assistant");
        println!();
        println!("🔧 Configuration options:");
        println!("   - assistant.model: model to use (glm-4-flash, glm-4-plus, etc.)");
        println!("   - assistant.history_limit: prior messages sent with each request");
        println!("   - user.default_user_id: sign in as this user on startup");
        println!();
        Ok(config_path)
    }

    /// Write the config template to `path`, refusing to overwrite.
    pub fn write_template(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                path.display()
            );
        }

        let config_template = r#"{
  "assistant": {
    "model": "glm-4-flash",
    "max_tokens": 1024,
    "temperature": 0.7,
    "history_limit": 12,
    "key_prefix": "moviebot"
  },
  "provider": {
    "api_key": "your-api-key-here",
    "base_url": "https://open.bigmodel.cn/api/paas/v4"
  },
  "storage": {},
  "user": {}
}"#;

        std::fs::write(path, config_template)?;
        Ok(())
    }
}
