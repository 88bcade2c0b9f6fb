use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_DATASET_REPO_ID: &str = "nielsgl/colbert-wiki2017";
pub const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_CACHE_SIZE: usize = 1_000_000;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Embedding model used to encode queries. Falls back to the model
    /// recorded in the index manifest when unset.
    #[serde(default)]
    pub checkpoint: Option<String>,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_repo_id")]
    pub repo_id: String,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub hf_token: Option<String>,
    #[serde(default = "default_hf_endpoint")]
    pub hf_endpoint: String,
    #[serde(default)]
    pub hf_home: Option<String>,
    #[serde(default)]
    pub hf_hub_cache: Option<String>,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_http_port() -> u16 {
    8893
}

const fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_repo_id() -> String {
    DEFAULT_DATASET_REPO_ID.to_string()
}

fn default_hf_endpoint() -> String {
    DEFAULT_HF_ENDPOINT.to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            checkpoint: None,
            cache_size: default_cache_size(),
            repo_id: default_repo_id(),
            revision: None,
            hf_token: None,
            hf_endpoint: default_hf_endpoint(),
            hf_home: None,
            hf_hub_cache: None,
            fastembed_cache_dir: None,
            data_dir: default_data_dir(),
        }
    }
}

impl AppConfig {
    /// Directory holding `datasets--{owner}--{name}` snapshot folders.
    ///
    /// Resolution order: `HF_HUB_CACHE`, `HF_HOME/hub`,
    /// `XDG_CACHE_HOME/huggingface/hub`, `~/.cache/huggingface/hub`.
    pub fn hub_cache_dir(&self) -> PathBuf {
        resolve_hub_cache_dir(
            self.hf_hub_cache.as_deref(),
            self.hf_home.as_deref(),
            std::env::var_os("XDG_CACHE_HOME").map(PathBuf::from),
            std::env::var_os("HOME").map(PathBuf::from),
        )
    }

    pub fn fastembed_cache_dir(&self) -> PathBuf {
        self.fastembed_cache_dir.as_ref().map_or_else(
            || PathBuf::from(&self.data_dir).join("fastembed"),
            PathBuf::from,
        )
    }
}

fn resolve_hub_cache_dir(
    hub_cache: Option<&str>,
    hf_home: Option<&str>,
    xdg_cache_home: Option<PathBuf>,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(dir) = hub_cache {
        return PathBuf::from(dir);
    }
    if let Some(dir) = hf_home {
        return PathBuf::from(dir).join("hub");
    }
    let cache_base = xdg_cache_home
        .or_else(|| home.map(|home| home.join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"));
    cache_base.join("huggingface").join("hub")
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().try_parsing(true))
        .build()?;

    config.try_deserialize()
}
