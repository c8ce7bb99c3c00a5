use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::parser::PatternConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MPlayerConfig {
    pub path: String,
    pub additional_args: Vec<String>,
    pub cache_size_kb: u32,
    pub always_build_index: bool,
    pub patterns: PatternConfig,
}

impl Default for MPlayerConfig {
    fn default() -> Self {
        Self {
            path: "mplayer".to_string(),
            additional_args: Vec::new(),
            cache_size_kb: 384,
            always_build_index: false,
            patterns: PatternConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    pub path: String,
    pub callback_address: String,
    pub args: Vec<String>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            path: "playback-host".to_string(),
            callback_address: format!("playback-host-{}", std::process::id()),
            args: Vec::new(),
        }
    }
}

/// Recording tools. The dumpstream recorder runs `mplayer.path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub mencoder_path: String,
    pub mencoder_args: Vec<String>,
    /// Copy audio and video as they are instead of using `mencoder_args`
    pub record_copy: bool,
    pub ffmpeg_path: String,
    pub ffmpeg_args: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        let args = |line: &str| -> Vec<String> { line.split_whitespace().map(String::from).collect() };
        Self {
            mencoder_path: "mencoder".to_string(),
            mencoder_args: args("-oac mp3lame -ovc lavc"),
            record_copy: true,
            ffmpeg_path: "ffmpeg".to_string(),
            ffmpeg_args: args("-f avi -acodec mp3 -vcodec mpeg4"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub auto_adjust: bool,
    pub contrast: i32,
    pub brightness: i32,
    pub hue: i32,
    pub saturation: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub no_proxy: Vec<String>, // host suffixes, "localhost", ".lan", etc.
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mplayer: MPlayerConfig,
    pub helper: HelperConfig,
    pub recorder: RecorderConfig,
    pub video_driver: Option<String>,
    pub audio_driver: Option<String>,
    pub framedrop: bool,
    pub keep_size_ratio: bool,
    pub loop_playback: bool,
    pub post_processing: Option<String>,
    pub colors: ColorConfig,
    pub proxy: ProxyConfig,
    pub quit_timeout_ms: u64,
    pub grab_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mplayer: MPlayerConfig::default(),
            helper: HelperConfig::default(),
            recorder: RecorderConfig::default(),
            video_driver: Some("xv".to_string()),
            audio_driver: None,
            framedrop: true,
            keep_size_ratio: true,
            loop_playback: false,
            post_processing: None,
            colors: ColorConfig::default(),
            proxy: ProxyConfig::default(),
            quit_timeout_ms: 2000,
            grab_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to read config file at {}: {}", config_path.display(), e))?;

            match serde_json::from_str::<Self>(&content) {
                Ok(config) => {
                    log::info!("Loaded existing config from {}", config_path.display());
                    Ok(config)
                }
                Err(e) => {
                    log::warn!("Config file exists but has issues ({}), creating new one with defaults", e);
                    let new_config = Self::default();
                    new_config.save_to(config_path)
                        .map_err(|save_err| anyhow::anyhow!("Failed to save new config: {}", save_err))?;
                    Ok(new_config)
                }
            }
        } else {
            log::info!("No config file found, creating default config");
            let config = Self::default();
            config.save_to(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to save default config: {}", e))?;
            log::info!("Created new config file at {}", config_path.display());
            Ok(config)
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playback-host")
            .join("config.json")
    }

    pub fn quit_timeout(&self) -> Duration {
        Duration::from_millis(self.quit_timeout_ms)
    }

    pub fn grab_timeout(&self) -> Duration {
        Duration::from_millis(self.grab_timeout_ms)
    }
}
