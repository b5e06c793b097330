use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_DIR: &str = "turnstile";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// Database file for the sqlite store. Defaults to `~/turnstile/state.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the database path, expanding a leading `~/`.
    pub fn resolved_path(&self) -> anyhow::Result<PathBuf> {
        match &self.path {
            Some(path) => expand_home(path),
            None => Ok(Config::config_dir()?.join("state.db")),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Delete a conversation's state after an unhandled turn error.
    #[serde(default = "GateConfig::default_reset_on_error")]
    pub reset_on_error: bool,
    /// Reply sent to the user when a turn fails.
    #[serde(default = "GateConfig::default_fault_message")]
    pub fault_message: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            reset_on_error: Self::default_reset_on_error(),
            fault_message: Self::default_fault_message(),
        }
    }
}

impl GateConfig {
    const fn default_reset_on_error() -> bool {
        true
    }

    fn default_fault_message() -> String {
        "Sorry, something went wrong. Let's start over.".to_string()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

fn expand_home(path: &Path) -> anyhow::Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

impl Config {
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join(CONFIG_DIR))
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'turnstile init' to create config.",
                config_path.display()
            );
        }

        Self::from_file(&config_path)
    }

    /// Load the config file if present, otherwise fall back to defaults.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::from_file(&config_path)
        } else {
            info!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        let config_template = r#"{
  "store": {
    "kind": "sqlite",
    "path": "~/turnstile/state.db"
  },
  "gate": {
    "reset_on_error": true,
    "fault_message": "Sorry, something went wrong. Let's start over."
  },
  "logging": {
    "level": "info"
  }
}"#;

        std::fs::write(&config_path, config_template)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("🔧 Configuration options:");
        println!("   - store.kind: \"sqlite\" (persistent) or \"memory\" (per process)");
        println!("   - store.path: SQLite database file");
        println!("   - gate.reset_on_error: Clear conversation state after a failed turn");
        println!("   - gate.fault_message: Reply sent when a turn fails");
        println!("   - logging.level: Log filter used when RUST_LOG is unset");
        println!();
        Ok(())
    }
}
