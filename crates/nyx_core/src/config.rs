use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level engine configuration, loaded from TOML with environment
/// variable overrides applied on top (mirrors the shape of a conventional
/// config-file + env-override layer: file values are defaults, env wins).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub data: DataConfig,
    pub debounce: DebounceConfig,
    pub proactive: ProactiveConfig,
    pub dream: DreamConfig,
    pub tools: ToolsConfig,
    pub onebot: Option<OneBotConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            data: DataConfig::default(),
            debounce: DebounceConfig::default(),
            proactive: ProactiveConfig::default(),
            dream: DreamConfig::default(),
            tools: ToolsConfig::default(),
            onebot: None,
        }
    }
}

impl EngineConfig {
    /// Load config from a TOML file, falling back to defaults for missing
    /// fields. After loading, environment variables are applied on top.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        let mut config: EngineConfig =
            toml::from_str(&content).context("failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from `path`; if the file doesn't exist or fails to parse,
    /// fall back to defaults (still with env overrides applied).
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("config file not found or invalid ({e}), using defaults");
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_MAX_CONCURRENT") {
            if let Ok(n) = v.parse() {
                self.llm.max_concurrent = n;
            }
        }
        if let Ok(v) = std::env::var("NYX_DATA_DIR") {
            self.data.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("NYX_LOG_DIR") {
            self.data.log_dir = PathBuf::from(v);
        }
        if let Ok(url) = std::env::var("ONEBOT_WS_URL") {
            let token = std::env::var("ONEBOT_ACCESS_TOKEN").ok();
            let self_id = std::env::var("ONEBOT_SELF_ID").ok().and_then(|v| v.parse().ok()).unwrap_or(0);
            self.onebot = Some(OneBotConfig { ws_url: url, access_token: token, self_id });
        } else if let Some(ob) = self.onebot.as_mut() {
            if let Ok(v) = std::env::var("ONEBOT_ACCESS_TOKEN") {
                ob.access_token = Some(v);
            }
            if let Ok(v) = std::env::var("ONEBOT_SELF_ID") {
                if let Ok(n) = v.parse() {
                    ob.self_id = n;
                }
            }
        }
        if let Ok(v) = std::env::var("TOOLS_WEB_SEARCH_ENDPOINT") {
            self.tools.web_search_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("TOOLS_WEB_SEARCH_API_KEY") {
            self.tools.web_search_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("TOOLS_IMAGE_GEN_ENDPOINT") {
            self.tools.image_gen_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("TOOLS_IMAGE_GEN_API_KEY") {
            self.tools.image_gen_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("TOOLS_PYTHON_ENDPOINT") {
            self.tools.python_endpoint = Some(v);
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub max_concurrent: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub cache_max_size: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: None,
            api_key: None,
            max_concurrent: 15,
            request_timeout_secs: 60,
            max_retries: 2,
            cache_max_size: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            log_dir: PathBuf::from("./logs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub wait_time_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { wait_time_ms: 1500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProactiveConfig {
    pub tick_secs: u64,
    pub active_session_window_hours: i64,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self { tick_secs: 60, active_session_window_hours: 12 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DreamConfig {
    pub interval_secs: u64,
    pub min_idle_secs: i64,
}

impl Default for DreamConfig {
    fn default() -> Self {
        Self { interval_secs: 1800, min_idle_secs: 300 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OneBotConfig {
    pub ws_url: String,
    pub access_token: Option<String>,
    /// The bot's own numeric QQ id, used to detect `@`-mentions (§6).
    pub self_id: i64,
}

impl Default for OneBotConfig {
    fn default() -> Self {
        Self { ws_url: String::new(), access_token: None, self_id: 0 }
    }
}

/// Tool Executor endpoints (§4.10). Each tool is only registered if its
/// endpoint is configured, so an unconfigured tool simply never appears in
/// the agent's tool list rather than failing at call time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub web_search_endpoint: Option<String>,
    pub web_search_api_key: Option<String>,
    pub image_gen_endpoint: Option<String>,
    pub image_gen_api_key: Option<String>,
    pub python_endpoint: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            web_search_endpoint: None,
            web_search_api_key: None,
            image_gen_endpoint: None,
            image_gen_api_key: None,
            python_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.llm.max_concurrent, 15);
        assert_eq!(cfg.debounce.wait_time_ms, 1500);
        assert_eq!(cfg.dream.interval_secs, 1800);
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let cfg = EngineConfig::load_or_default("/nonexistent/path/engine.toml");
        assert_eq!(cfg.llm.provider, "anthropic");
    }

    #[test]
    fn load_parses_toml_overrides() {
        let dir = tempfile_dir();
        let path = dir.join("engine.toml");
        std::fs::write(&path, "[llm]\nprovider = \"openai\"\nmax_concurrent = 4\n").unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.max_concurrent, 4);
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nyx_core_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
