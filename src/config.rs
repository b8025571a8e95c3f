use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // LLM configuration (Ollama-style API: /api/chat, /api/generate, /api/embeddings)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub chat_timeout_secs: u64,
    #[serde(default = "default_background_timeout_secs")]
    pub background_timeout_secs: u64,

    // Server
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,
    #[serde(default = "default_image_dir")]
    pub image_dir: String,

    // Persisted state
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_memory_db_path")]
    pub memory_db_path: String,

    // Environment lookups
    #[serde(default = "default_weather_api_url")]
    pub weather_api_url: String,
    #[serde(default = "default_weather_latitude")]
    pub weather_latitude: f64,
    #[serde(default = "default_weather_longitude")]
    pub weather_longitude: f64,
    #[serde(default)]
    pub search_api_url: Option<String>,
    #[serde(default = "default_trending_query")]
    pub trending_query: String,

    // Voice synthesis (opt-in; when disabled the model is told never to emit [VOICE])
    #[serde(default)]
    pub enable_voice_replies: bool,
    #[serde(default)]
    pub tts_api_url: Option<String>,

    // Autonomous behavior
    #[serde(default = "default_checkin_morning_hour")]
    pub checkin_morning_hour: u32,
    #[serde(default = "default_checkin_night_hour")]
    pub checkin_night_hour: u32,
    #[serde(default = "default_flashback_hour")]
    pub flashback_hour: u32,
    #[serde(default = "default_checkin_gap_hours")]
    pub checkin_gap_hours: i64,
    #[serde(default = "default_story_min_delay_secs")]
    pub story_min_delay_secs: u64,
    #[serde(default = "default_story_max_delay_secs")]
    pub story_max_delay_secs: u64,

    // Prompt flavor
    #[serde(default = "default_event_probability")]
    pub event_probability: f64,
    #[serde(default = "default_memory_search_k")]
    pub memory_search_k: usize,
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "gemma2:27b".to_string()
}

fn default_chat_timeout_secs() -> u64 {
    120
}

fn default_background_timeout_secs() -> u64 {
    30
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_static_dir() -> String {
    "build/web".to_string()
}

fn default_audio_dir() -> String {
    "build/web/audio".to_string()
}

fn default_image_dir() -> String {
    "build/web/images".to_string()
}

fn default_data_dir() -> String {
    ".".to_string()
}

fn default_memory_db_path() -> String {
    "confidant_memory.db".to_string()
}

fn default_weather_api_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

fn default_weather_latitude() -> f64 {
    54.68
}

fn default_weather_longitude() -> f64 {
    25.27
}

fn default_trending_query() -> String {
    "gaming technology news".to_string()
}

fn default_checkin_morning_hour() -> u32 {
    9
}

fn default_checkin_night_hour() -> u32 {
    23
}

fn default_flashback_hour() -> u32 {
    10
}

fn default_checkin_gap_hours() -> i64 {
    4
}

fn default_story_min_delay_secs() -> u64 {
    10_800
}

fn default_story_max_delay_secs() -> u64 {
    18_000
}

fn default_event_probability() -> f64 {
    0.05
}

fn default_memory_search_k() -> usize {
    3
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            chat_timeout_secs: default_chat_timeout_secs(),
            background_timeout_secs: default_background_timeout_secs(),
            bind_addr: default_bind_addr(),
            static_dir: default_static_dir(),
            audio_dir: default_audio_dir(),
            image_dir: default_image_dir(),
            data_dir: default_data_dir(),
            memory_db_path: default_memory_db_path(),
            weather_api_url: default_weather_api_url(),
            weather_latitude: default_weather_latitude(),
            weather_longitude: default_weather_longitude(),
            search_api_url: None,
            trending_query: default_trending_query(),
            enable_voice_replies: false,
            tts_api_url: None,
            checkin_morning_hour: default_checkin_morning_hour(),
            checkin_night_hour: default_checkin_night_hour(),
            flashback_hour: default_flashback_hour(),
            checkin_gap_hours: default_checkin_gap_hours(),
            story_min_delay_secs: default_story_min_delay_secs(),
            story_max_delay_secs: default_story_max_delay_secs(),
            event_probability: default_event_probability(),
            memory_search_k: default_memory_search_k(),
        }
    }
}

impl AppConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("confidant_config.toml")
    }

    /// Load config from confidant_config.toml next to the executable
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("LLM_API_URL") {
            config.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm_model = model;
        }

        if let Ok(addr) = env::var("CONFIDANT_BIND") {
            config.bind_addr = addr;
        }

        if let Ok(dir) = env::var("CONFIDANT_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = dir;
            }
        }

        if let Ok(url) = env::var("CONFIDANT_SEARCH_API_URL") {
            if !url.trim().is_empty() {
                config.search_api_url = Some(url);
            }
        }

        if let Ok(url) = env::var("CONFIDANT_TTS_API_URL") {
            if !url.trim().is_empty() {
                config.tts_api_url = Some(url);
            }
        }

        if let Ok(enabled) = env::var("CONFIDANT_ENABLE_VOICE_REPLIES") {
            let enabled = enabled.eq_ignore_ascii_case("1")
                || enabled.eq_ignore_ascii_case("true")
                || enabled.eq_ignore_ascii_case("yes");
            config.enable_voice_replies = enabled;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_constants() {
        let config = AppConfig::default();
        assert_eq!(config.llm_api_url, "http://localhost:11434");
        assert_eq!(config.checkin_morning_hour, 9);
        assert_eq!(config.checkin_night_hour, 23);
        assert_eq!(config.flashback_hour, 10);
        assert_eq!(config.story_min_delay_secs, 10_800);
        assert_eq!(config.story_max_delay_secs, 18_000);
        assert!(!config.enable_voice_replies);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: AppConfig = toml::from_str("llm_model = \"llama3.2\"").unwrap();
        assert_eq!(config.llm_model, "llama3.2");
        assert_eq!(config.chat_timeout_secs, 120);
        assert_eq!(config.event_probability, 0.05);
    }
}
