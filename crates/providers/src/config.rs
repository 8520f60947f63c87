use std::time::Duration;

use genq_core::config::{env_flag, env_opt, env_or};
use genq_core::ConfigError;

use crate::{fal, minimax, runway};

/// Provider credentials and endpoints loaded from environment variables.
///
/// Missing credentials are not an error here: the affected adapter
/// reports [`ProviderError::NotConfigured`](crate::ProviderError) when a
/// job is submitted to it.
#[derive(Clone)]
pub struct ProviderConfig {
    pub fal_key: Option<String>,
    pub fal_queue_url: String,
    pub minimax_api_key: Option<String>,
    pub minimax_group_id: Option<String>,
    pub minimax_base_url: String,
    pub runway_api_key: Option<String>,
    pub runway_base_url: String,
    /// Run every provider against its deterministic simulation.
    pub simulate: bool,
    /// Polls until a simulated task finishes.
    pub simulate_polls: u32,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                        |
    /// |---------------------------------|--------------------------------|
    /// | `FAL_KEY`                       | unset                          |
    /// | `FAL_QUEUE_URL`                 | `https://queue.fal.run`        |
    /// | `MINIMAX_API_KEY`               | unset                          |
    /// | `MINIMAX_GROUP_ID`              | unset                          |
    /// | `MINIMAX_BASE_URL`              | `https://api.minimax.io/v1`    |
    /// | `RUNWAY_API_KEY`                | unset                          |
    /// | `RUNWAY_BASE_URL`               | `https://api.dev.runwayml.com` |
    /// | `GENQ_SIMULATE`                 | `false`                        |
    /// | `GENQ_SIMULATE_POLLS`           | `3`                            |
    /// | `PROVIDER_REQUEST_TIMEOUT_SECS` | `30`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            fal_key: env_opt("FAL_KEY"),
            fal_queue_url: env_opt("FAL_QUEUE_URL").unwrap_or_else(|| fal::DEFAULT_QUEUE_URL.into()),
            minimax_api_key: env_opt("MINIMAX_API_KEY"),
            minimax_group_id: env_opt("MINIMAX_GROUP_ID"),
            minimax_base_url: env_opt("MINIMAX_BASE_URL")
                .unwrap_or_else(|| minimax::DEFAULT_BASE_URL.into()),
            runway_api_key: env_opt("RUNWAY_API_KEY"),
            runway_base_url: env_opt("RUNWAY_BASE_URL")
                .unwrap_or_else(|| runway::DEFAULT_BASE_URL.into()),
            simulate: env_flag("GENQ_SIMULATE")?,
            simulate_polls: env_or("GENQ_SIMULATE_POLLS", 3)?,
            request_timeout: Duration::from_secs(env_or("PROVIDER_REQUEST_TIMEOUT_SECS", 30)?),
        })
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            fal_key: None,
            fal_queue_url: fal::DEFAULT_QUEUE_URL.into(),
            minimax_api_key: None,
            minimax_group_id: None,
            minimax_base_url: minimax::DEFAULT_BASE_URL.into(),
            runway_api_key: None,
            runway_base_url: runway::DEFAULT_BASE_URL.into(),
            simulate: false,
            simulate_polls: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

// Keys must never reach logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("ProviderConfig")
            .field("fal_key", &redact(&self.fal_key))
            .field("fal_queue_url", &self.fal_queue_url)
            .field("minimax_api_key", &redact(&self.minimax_api_key))
            .field("minimax_group_id", &self.minimax_group_id)
            .field("minimax_base_url", &self.minimax_base_url)
            .field("runway_api_key", &redact(&self.runway_api_key))
            .field("runway_base_url", &self.runway_base_url)
            .field("simulate", &self.simulate)
            .field("simulate_polls", &self.simulate_polls)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let config = ProviderConfig {
            fal_key: Some("super-secret".into()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<set>"));
    }
}
