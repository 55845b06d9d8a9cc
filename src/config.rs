// src/config.rs
use std::{env, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::tokenize::SplitMode;

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_concurrent_tasks() -> usize {
    5
}

/// Engine settings, loadable from environment/.env or a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// "ENV" means: read from OPENAI_API_KEY.
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default)]
    pub split_mode: SplitMode,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            split_mode: SplitMode::default(),
        }
    }
}

impl AppSettings {
    /// Load from process environment, reading `.env` first if present.
    /// Recognized variables: OPENAI_API_KEY, SURVEY_MODEL,
    /// MAX_CONCURRENT_TASKS, SPLIT_MODE.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut cfg = AppSettings {
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            ..AppSettings::default()
        };
        if let Ok(model) = env::var("SURVEY_MODEL") {
            if !model.trim().is_empty() {
                cfg.model = model;
            }
        }
        if let Ok(raw) = env::var("MAX_CONCURRENT_TASKS") {
            if let Ok(n) = raw.trim().parse::<usize>() {
                cfg.max_concurrent_tasks = n;
            }
        }
        if let Ok(raw) = env::var("SPLIT_MODE") {
            if let Some(mode) = SplitMode::parse(&raw) {
                cfg.split_mode = mode;
            }
        }
        cfg
    }

    /// Load from a JSON file. `api_key = "ENV"` defers to OPENAI_API_KEY.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: AppSettings = serde_json::from_str(&data)?;

        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?;
        }

        Ok(cfg)
    }
}
