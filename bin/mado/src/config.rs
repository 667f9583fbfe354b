use std::path::Path;

use mado::ValidatorConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub validator: ValidatorConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// `Set-Cookie` style cookies, scoped to the manifest URL.
    pub cookies: Vec<String>,
    /// Extra request headers, eg. "Referer: https://example.com".
    pub headers: Vec<String>,
    pub user_agent: Option<String>,
}

impl Config {
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let Some(file) = file else {
            return Ok(Self::default());
        };

        let data = std::fs::read_to_string(file)?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }
}
