use anyhow::Context;
use providers::RelayConfig;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::warn;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: ServerFileConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_dir: None,
        }
    }
}

impl ServerConfig {
    /// Reads the `[server]` section of the shared config file, then applies
    /// `HOST`, `PORT` and `RELAY_LOG_DIR`.
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let file = match RelayConfig::config_path() {
            Some(path) if path.exists() => match Self::read_file(&path) {
                Ok(f) => Some(f.server),
                Err(e) => {
                    warn!(target: "server::config", "ignoring [server] in {}: {:#}", path.display(), e);
                    None
                }
            },
            _ => None,
        };
        Self::from_sources(|k| env::var(k).ok(), file)
    }

    fn read_file(path: &Path) -> anyhow::Result<FileConfig> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config file: {}", path.display()))
    }

    pub fn from_sources<F>(env: F, file: Option<ServerFileConfig>) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(f) = file {
            if let Some(h) = f.host {
                cfg.host = h;
            }
            if let Some(p) = f.port {
                cfg.port = p;
            }
            cfg.log_dir = f.log_dir;
        }
        if let Some(h) = env("HOST") {
            cfg.host = h;
        }
        if let Some(p) = env("PORT") {
            cfg.port = p
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port: {:?}", p))?;
        }
        if let Some(d) = env("RELAY_LOG_DIR") {
            cfg.log_dir = Some(PathBuf::from(d));
        }
        Ok(cfg)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
