use anyhow::Context;
use directories::BaseDirs;
use relay_core::{CompletionParams, ParamOverrides, ProviderId};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProviderFileConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    #[serde(default)]
    pub defaults: ParamOverrides,
}

/// The part of the relay config file this crate reads. Other sections are
/// ignored here.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProvidersFileConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderFileConfig>,
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub id: ProviderId,
    /// `None` when no credential was supplied; the provider is then
    /// registered as unavailable.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub defaults: CompletionParams,
    pub timeout: Duration,
    pub stream_idle_timeout: Option<Duration>,
    pub proxy: Option<String>,
}

impl ProviderConfig {
    /// Built-in endpoint and model for each provider.
    pub fn builtin(id: ProviderId) -> Self {
        let (base_url, model) = match id {
            ProviderId::DeepSeek => ("https://api.deepseek.com", "deepseek-chat"),
            ProviderId::DeepInfra => (
                "https://api.deepinfra.com/v1/openai",
                "meta-llama/Meta-Llama-3-70B-Instruct",
            ),
        };
        Self {
            id,
            api_key: None,
            base_url: base_url.to_string(),
            model: model.to_string(),
            defaults: CompletionParams::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            stream_idle_timeout: None,
            proxy: None,
        }
    }

    fn env_prefix(id: ProviderId) -> &'static str {
        match id {
            ProviderId::DeepSeek => "DEEPSEEK",
            ProviderId::DeepInfra => "DEEPINFRA",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub providers: Vec<ProviderConfig>,
}

impl RelayConfig {
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let file = match Self::config_path() {
            Some(path) if path.exists() => match Self::read_file(&path) {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!(target: "providers::config", "ignoring config file {}: {:#}", path.display(), e);
                    None
                }
            },
            _ => None,
        };
        Ok(Self::from_sources(|k| env::var(k).ok(), file))
    }

    fn read_file(path: &Path) -> anyhow::Result<ProvidersFileConfig> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config file: {}", path.display()))
    }

    /// Builds the config from an env lookup and an optional parsed file.
    /// Env wins over the file, the file wins over built-ins.
    pub fn from_sources<F>(env: F, file: Option<ProvidersFileConfig>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();
        let proxy = env("HTTPS_PROXY").or_else(|| env("HTTP_PROXY"));
        let providers = ProviderId::ALL
            .iter()
            .map(|&id| {
                let mut cfg = ProviderConfig::builtin(id);
                cfg.proxy = proxy.clone();
                if let Some(f) = file.providers.get(id.as_str()) {
                    if let Some(k) = &f.api_key {
                        cfg.api_key = Some(k.clone());
                    }
                    if let Some(u) = &f.base_url {
                        cfg.base_url = u.clone();
                    }
                    if let Some(m) = &f.model {
                        cfg.model = m.clone();
                    }
                    if let Some(t) = f.timeout_ms {
                        cfg.timeout = Duration::from_millis(t);
                    }
                    cfg.stream_idle_timeout = f
                        .stream_idle_timeout_ms
                        .filter(|ms| *ms > 0)
                        .map(Duration::from_millis);
                    cfg.defaults = cfg.defaults.with_overrides(&f.defaults);
                }
                let prefix = ProviderConfig::env_prefix(id);
                if let Some(k) = env(&format!("{}_API_KEY", prefix)).filter(|k| !k.trim().is_empty()) {
                    cfg.api_key = Some(k);
                }
                if let Some(u) = env(&format!("{}_BASE_URL", prefix)) {
                    cfg.base_url = u;
                }
                if let Some(m) = env(&format!("{}_MODEL", prefix)) {
                    cfg.model = m;
                }
                cfg
            })
            .collect();
        Self { providers }
    }

    pub fn provider(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn config_path() -> Option<PathBuf> {
        if let Ok(p) = env::var("RELAY_CONFIG") {
            return Some(PathBuf::from(p));
        }
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("llm-relay").join("config.toml"))
    }
}
