// src/config/mod.rs
//! Aggregator configuration: timeouts, caps, endpoint overrides, status pages.
//!
//! Lookup order:
//! 1) $AGGREGATOR_CONFIG_PATH
//! 2) config/aggregator.toml
//! 3) config/aggregator.json
//! 4) built-in defaults
//!
//! Credentials never live in the file; see [`credentials`].

pub mod credentials;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assemble::Limits;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub fetch: FetchConfig,
    pub limits: Limits,
    pub cache: CacheConfig,
    pub sources: SourcesConfig,
    pub opensky: OpenSkyConfig,
    #[serde(default = "default_statuspages")]
    pub statuspages: Vec<StatusPageConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Deadline per provider call.
    pub timeout_ms: u64,
    /// Deadline for the OAuth2 token exchange; kept shorter than `timeout_ms`.
    pub token_timeout_ms: u64,
    /// Outer bound for one adapter including all of its sub-calls.
    pub adapter_budget_ms: u64,
    pub connect_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            token_timeout_ms: 5_000,
            adapter_budget_ms: 25_000,
            connect_timeout_ms: 4_000,
            user_agent: crate::fetch::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
    pub fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms.max(1))
    }
    pub fn adapter_budget(&self) -> Duration {
        Duration::from_millis(self.adapter_budget_ms.max(1))
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Source ids to skip entirely (case-insensitive).
    pub disabled: Vec<String>,
    /// Endpoint overrides keyed by source id.
    pub endpoints: BTreeMap<String, String>,
}

impl SourcesConfig {
    pub fn is_enabled(&self, id: &str) -> bool {
        !self.disabled.iter().any(|d| d.trim().eq_ignore_ascii_case(id))
    }

    pub fn endpoint_for(&self, id: &str, default: &str) -> String {
        self.endpoints
            .get(id)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSkyConfig {
    pub token_endpoint: String,
    /// Optional bounding box `[lamin, lomin, lamax, lomax]`.
    pub bbox: Option<[f64; 4]>,
}

impl Default for OpenSkyConfig {
    fn default() -> Self {
        Self {
            token_endpoint: crate::ingest::providers::opensky::DEFAULT_TOKEN_ENDPOINT.to_string(),
            bbox: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPageConfig {
    /// Short id; the adapter id becomes `status:<id>`.
    pub id: String,
    pub name: String,
    /// Statuspage `summary.json` URL.
    pub url: String,
}

fn default_statuspages() -> Vec<StatusPageConfig> {
    [
        ("github", "GitHub", "https://www.githubstatus.com/api/v2/summary.json"),
        ("cloudflare", "Cloudflare", "https://www.cloudflarestatus.com/api/v2/summary.json"),
        ("openai", "OpenAI", "https://status.openai.com/api/v2/summary.json"),
    ]
    .into_iter()
    .map(|(id, name, url)| StatusPageConfig {
        id: id.to_string(),
        name: name.to_string(),
        url: url.to_string(),
    })
    .collect()
}

impl AggregatorConfig {
    /// Defaults with the built-in status pages.
    pub fn builtin() -> Self {
        Self {
            statuspages: default_statuspages(),
            ..Self::default()
        }
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<AggregatorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading aggregator config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing aggregator config {}", path.display()))
}

/// Load config using env var + fallbacks (see module docs).
pub fn load_default() -> Result<AggregatorConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/aggregator.toml");
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from("config/aggregator.json");
    if json_p.exists() {
        return load_from(&json_p);
    }
    Ok(AggregatorConfig::builtin())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AggregatorConfig> {
    let cfg: AggregatorConfig = match hint_ext {
        "json" => serde_json::from_str(s)?,
        "toml" => toml::from_str(s)?,
        _ => match toml::from_str(s) {
            Ok(c) => c,
            Err(_) => serde_json::from_str(s)
                .map_err(|_| anyhow!("unsupported aggregator config format"))?,
        },
    };
    Ok(sanitize(cfg))
}

/// Keep the token deadline below the data deadline, and caps above zero.
fn sanitize(mut cfg: AggregatorConfig) -> AggregatorConfig {
    if cfg.fetch.token_timeout_ms >= cfg.fetch.timeout_ms {
        cfg.fetch.token_timeout_ms = (cfg.fetch.timeout_ms / 2).max(1);
    }
    if cfg.fetch.adapter_budget_ms < cfg.fetch.timeout_ms {
        cfg.fetch.adapter_budget_ms = cfg.fetch.timeout_ms.saturating_mul(2);
    }
    if cfg.fetch.user_agent.trim().is_empty() {
        cfg.fetch.user_agent = crate::fetch::DEFAULT_USER_AGENT.to_string();
    }
    cfg.limits = cfg.limits.sanitized();
    cfg.statuspages
        .retain(|p| !p.id.trim().is_empty() && !p.url.trim().is_empty());
    cfg
}
