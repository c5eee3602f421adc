use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where pinned items sit relative to the recency block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinPosition {
    #[default]
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub max_entries: usize,
    pub dedup: bool,
    pub pin_position: PinPosition,
    pub poll_interval_ms: u64,
    pub enabled_types: Vec<String>,
    pub ignored_applications: Vec<String>,
    pub confidential_types: Vec<String>,
    pub max_clipboard_size: usize,
    pub compress_threshold: usize,
    pub max_display_length: usize,
    pub max_print_entries: usize,
    pub navigation_wrap: bool,
    pub clear_on_quit: bool,
    pub rewrite: RewriteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// argv of the program that receives the prompt and text on stdin.
    pub command: Vec<String>,
    pub prompts: Vec<String>,
    pub define_prompt: String,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            prompts: vec![
                "Fix grammar and spelling. Reply with the corrected text only.".to_string(),
                "Rewrite this to be more concise. Reply with the rewritten text only.".to_string(),
                "Rewrite this in a friendly, professional tone. Reply with the rewritten text only."
                    .to_string(),
            ],
            define_prompt: "Define the following word or phrase briefly.".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("clipstack");

        Self {
            data_dir,
            max_entries: 200,
            dedup: true,
            pin_position: PinPosition::Top,
            poll_interval_ms: 500,
            enabled_types: [
                "public.utf8-plain-text",
                "public.rtf",
                "public.html",
                "public.png",
                "public.file-url",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignored_applications: Vec::new(),
            confidential_types: [
                "org.nspasteboard.ConcealedType",
                "org.nspasteboard.TransientType",
                "org.nspasteboard.AutoGeneratedType",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_clipboard_size: 100 * 1024 * 1024,
            compress_threshold: 4096,
            max_display_length: 200,
            max_print_entries: 1000,
            navigation_wrap: false,
            clear_on_quit: false,
            rewrite: RewriteConfig::default(),
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join("clipstack")
            .join("config.toml")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Reads `path`, or writes the defaults there when it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, toml::to_string_pretty(&config)?)?;
            config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            bail!("max_entries must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be at least 1");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }
}
