// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_CONFIG_PATH: &str = "TRACKER_CONFIG_PATH";
const ENV_API_KEY: &str = "STEAM_API_KEY";

const DEFAULT_USER_AGENT: &str = "schema-tracker";

/// One tracked game: display name plus Steam application id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub app_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub sources: Vec<SourceConfig>,

    /// Steam Web API key; `STEAM_API_KEY` overrides the file value.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_language")]
    pub language: String,

    /// Connect timeout per request, seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Total per-request timeout, seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Seconds to sleep between polling cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-call wait when draining worker results, seconds.
    #[serde(default = "default_collect_timeout")]
    pub collect_timeout_secs: u64,

    /// Consecutive empty result polls tolerated before the cycle is declared
    /// partial and moves on.
    #[serde(default = "default_empty_poll_budget")]
    pub empty_poll_budget: u32,

    /// Working tree for the tracked schemas.
    #[serde(default = "default_tracker_dir")]
    pub tracker_dir: PathBuf,

    /// Mirror push target; empty or absent disables pushing.
    #[serde(default)]
    pub push_url: Option<String>,

    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_language() -> String {
    "en_US".into()
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_request_timeout() -> u64 {
    240
}
fn default_poll_interval() -> u64 {
    10
}
fn default_collect_timeout() -> u64 {
    2
}
fn default_empty_poll_budget() -> u32 {
    5
}
fn default_tracker_dir() -> PathBuf {
    PathBuf::from("schema-tracking")
}
fn default_author_name() -> String {
    "schema-tracker".into()
}
fn default_author_email() -> String {
    "noreply@localhost".into()
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

impl TrackerConfig {
    /// Load from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading tracker config from {}", path.display()))?;
        let mut cfg: TrackerConfig = toml::from_str(&content)
            .with_context(|| format!("parsing tracker config {}", path.display()))?;
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            if !key.trim().is_empty() {
                cfg.api_key = Some(key.trim().to_string());
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load using env var + fallback:
    /// 1) $TRACKER_CONFIG_PATH
    /// 2) config/tracker.toml
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("TRACKER_CONFIG_PATH points to non-existent path"));
        }
        Self::load_from(Path::new("config/tracker.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(anyhow!("tracker config lists no sources"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for s in &self.sources {
            let name = s.name.trim();
            if name.is_empty() {
                return Err(anyhow!("source with empty name (app_id {})", s.app_id));
            }
            if !seen.insert(name.to_string()) {
                return Err(anyhow!("duplicate source name: {name}"));
            }
        }
        Ok(())
    }

    /// Schema endpoint for one source. The client schema URL is not built
    /// here; it arrives embedded in the API schema response.
    pub fn api_schema_url(&self, source: &SourceConfig) -> String {
        format!(
            "https://api.steampowered.com/IEconItems_{}/GetSchema/v0001/?key={}&language={}",
            source.app_id,
            self.api_key.as_deref().unwrap_or_default(),
            self.language
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.collect_timeout_secs)
    }

    /// Worker count: one per source, bounding concurrent connections.
    pub fn pool_size(&self) -> usize {
        self.sources.len().max(1)
    }
}
