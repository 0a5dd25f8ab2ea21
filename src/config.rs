use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const PROD_ASSISTANT_URL: &str = "https://spacecat.experiencecloud.live/api/v1";
const DEV_ASSISTANT_URL: &str = "https://spacecat.experiencecloud.live/api/ci";
const GITHUB_URL: &str = "https://api.github.com";

/// Backend endpoint set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    #[default]
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "stage" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("unknown environment '{}' (expected dev or prod)", other)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Dev => f.write_str("dev"),
            Environment::Prod => f.write_str("prod"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub assistant_url: String,
    pub github_url: String,
}

impl Environment {
    pub fn endpoints(self) -> EndpointConfig {
        let assistant_url = match self {
            Environment::Dev => DEV_ASSISTANT_URL,
            Environment::Prod => PROD_ASSISTANT_URL,
        };
        EndpointConfig {
            assistant_url: assistant_url.to_string(),
            github_url: GITHUB_URL.to_string(),
        }
    }
}

/// Settings shared by the gateway and the template store.
///
/// Built once when the factory is created and handed out behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderConfig {
    pub api_key: String,
    /// Where templates are fetched from when the remote source is used.
    pub base_url: String,
    pub environment: Environment,
}

/// Partial update for [`BuilderConfig`]. `None` keeps the prior value.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub environment: Option<Environment>,
}

impl BuilderConfig {
    pub fn merge(mut self, patch: ConfigPatch) -> Self {
        if let Some(api_key) = patch.api_key {
            self.api_key = api_key;
        }
        if let Some(base_url) = patch.base_url {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(environment) = patch.environment {
            self.environment = environment;
        }
        self
    }

    pub fn endpoints(&self) -> EndpointConfig {
        self.environment.endpoints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_prod_with_empty_credentials() {
        let config = BuilderConfig::default();
        assert_eq!(config.api_key, "");
        assert_eq!(config.base_url, "");
        assert_eq!(config.environment, Environment::Prod);
        assert_eq!(config.endpoints().assistant_url, PROD_ASSISTANT_URL);
        assert_eq!(config.endpoints().github_url, "https://api.github.com");
    }

    #[test]
    fn dev_environment_switches_assistant_url() {
        let config = BuilderConfig::default().merge(ConfigPatch {
            environment: Some(Environment::Dev),
            ..Default::default()
        });
        assert_eq!(config.endpoints().assistant_url, DEV_ASSISTANT_URL);
    }

    #[test]
    fn merge_keeps_omitted_keys() {
        let config = BuilderConfig::default()
            .merge(ConfigPatch {
                api_key: Some("test-api-key".into()),
                base_url: Some("http://localhost:3001/".into()),
                environment: None,
            })
            .merge(ConfigPatch {
                environment: Some(Environment::Dev),
                ..Default::default()
            });
        assert_eq!(config.api_key, "test-api-key");
        assert_eq!(config.base_url, "http://localhost:3001");
        assert_eq!(config.environment, Environment::Dev);
    }

    #[test]
    fn parse_environment() {
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("DEV".parse::<Environment>(), Ok(Environment::Dev));
        assert_eq!("stage".parse::<Environment>(), Ok(Environment::Dev));
        assert!("qa".parse::<Environment>().is_err());
    }
}
