// src/config/credentials.rs
//! Provider credentials, resolved from the environment only.
//! A missing credential disables the adapter that needs it, nothing else.

use crate::token_cache::ClientCredentials;

pub const ENV_OPENSKY_CLIENT_ID: &str = "OPENSKY_CLIENT_ID";
pub const ENV_OPENSKY_CLIENT_SECRET: &str = "OPENSKY_CLIENT_SECRET";
pub const ENV_ABUSE_CH_AUTH_KEY: &str = "ABUSE_CH_AUTH_KEY";
pub const ENV_NASA_API_KEY: &str = "NASA_API_KEY";

/// NASA's shared rate-limited key; works without registration.
pub const NASA_DEMO_KEY: &str = "DEMO_KEY";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub opensky: Option<ClientCredentials>,
    pub abuse_ch_key: Option<String>,
    pub nasa_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let c = Self {
            opensky: ClientCredentials::from_env(ENV_OPENSKY_CLIENT_ID, ENV_OPENSKY_CLIENT_SECRET),
            abuse_ch_key: non_blank_env(ENV_ABUSE_CH_AUTH_KEY),
            nasa_api_key: non_blank_env(ENV_NASA_API_KEY),
        };
        tracing::info!(
            opensky = c.opensky.is_some(),
            abuse_ch = c.abuse_ch_key.is_some(),
            nasa = c.nasa_api_key.is_some(),
            "provider credentials resolved"
        );
        c
    }

    pub fn nasa_key(&self) -> &str {
        self.nasa_api_key.as_deref().unwrap_or(NASA_DEMO_KEY)
    }
}

fn non_blank_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
