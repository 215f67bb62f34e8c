use std::env;
use std::time::Duration;

use crate::models::tier::Tier;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub poll_interval: Duration,
    pub completion_delay: Duration,
    pub free_retention_days: i64,
    pub support_contact: String,
    pub preselected_tier: Option<Tier>,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            api_url: env::var("NULLSCAN_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            poll_interval: Duration::from_millis(
                env::var("NULLSCAN_POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .unwrap_or(5000),
            ),
            completion_delay: Duration::from_millis(
                env::var("NULLSCAN_COMPLETION_DELAY_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .unwrap_or(2000),
            ),
            free_retention_days: env::var("NULLSCAN_FREE_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            support_contact: env::var("NULLSCAN_SUPPORT_CONTACT")
                .unwrap_or_else(|_| "support@nullscan.io".to_string()),
            preselected_tier: env::var("NULLSCAN_PRESELECTED_TIER")
                .ok()
                .and_then(|raw| raw.parse::<Tier>().ok())
                .filter(|tier| tier.is_paid()),
        })
    }

    /// Configuration pointing at `api_url` with default timings.
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(5000),
            completion_delay: Duration::from_millis(2000),
            free_retention_days: 30,
            support_contact: "support@nullscan.io".to_string(),
            preselected_tier: None,
        }
    }
}
