//! Exchange scheduling and protocol configuration (§4.5).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Regular exchange period (§4.5).
pub const DEFAULT_EXCHANGE_INTERVAL: Duration = Duration::from_secs(900);
/// Exchange period while "urgent" mode is set.
pub const DEFAULT_URGENT_EXCHANGE_INTERVAL: Duration = Duration::from_secs(60);
/// Cap on messages per outbound payload.
pub const DEFAULT_MAX_MESSAGES: usize = 100;
/// Lead time before an exchange for the `impending-exchange` event.
pub const DEFAULT_PRE_EXCHANGE_LEAD_TIME: Duration = Duration::from_secs(10);
/// The agent's own protocol version, stamped onto every outbound message
/// and sent as `client-api` (§6.1). Configuration injected at
/// construction rather than a global constant, so tests and embedders
/// can pin a different version without touching this default.
pub const DEFAULT_CLIENT_API: &str = "3.3";

/// Tuning for one [`super::MessageExchange`] (§4.5).
///
/// # Examples
///
/// ```
/// use exchange_core::exchange::ExchangeConfig;
///
/// let config = ExchangeConfig::default();
/// assert_eq!(config.max_messages, 100);
///
/// let config = ExchangeConfig::builder().with_max_messages(10).build().unwrap();
/// assert_eq!(config.max_messages, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub exchange_interval: Duration,
    pub urgent_exchange_interval: Duration,
    pub max_messages: usize,
    pub pre_exchange_lead_time: Duration,
    pub client_api: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            exchange_interval: DEFAULT_EXCHANGE_INTERVAL,
            urgent_exchange_interval: DEFAULT_URGENT_EXCHANGE_INTERVAL,
            max_messages: DEFAULT_MAX_MESSAGES,
            pre_exchange_lead_time: DEFAULT_PRE_EXCHANGE_LEAD_TIME,
            client_api: DEFAULT_CLIENT_API.to_string(),
        }
    }
}

impl ExchangeConfig {
    pub fn builder() -> ExchangeConfigBuilder {
        ExchangeConfigBuilder::default()
    }

    /// Reject non-sensical tuning before it reaches a running exchange.
    pub fn validate(&self) -> Result<(), String> {
        if self.exchange_interval.is_zero() {
            return Err("exchange_interval must be > 0".to_string());
        }
        if self.urgent_exchange_interval.is_zero() {
            return Err("urgent_exchange_interval must be > 0".to_string());
        }
        if self.max_messages == 0 {
            return Err("max_messages must be > 0".to_string());
        }
        if self.pre_exchange_lead_time >= self.urgent_exchange_interval {
            return Err("pre_exchange_lead_time must be < urgent_exchange_interval".to_string());
        }
        if self.pre_exchange_lead_time >= self.exchange_interval {
            return Err("pre_exchange_lead_time must be < exchange_interval".to_string());
        }
        Ok(())
    }
}

/// Fluent builder for [`ExchangeConfig`].
#[derive(Debug, Default)]
pub struct ExchangeConfigBuilder {
    config: ExchangeConfig,
}

impl ExchangeConfigBuilder {
    pub fn with_exchange_interval(mut self, interval: Duration) -> Self {
        self.config.exchange_interval = interval;
        self
    }

    pub fn with_urgent_exchange_interval(mut self, interval: Duration) -> Self {
        self.config.urgent_exchange_interval = interval;
        self
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.config.max_messages = max;
        self
    }

    pub fn with_pre_exchange_lead_time(mut self, lead_time: Duration) -> Self {
        self.config.pre_exchange_lead_time = lead_time;
        self
    }

    pub fn with_client_api(mut self, client_api: impl Into<String>) -> Self {
        self.config.client_api = client_api.into();
        self
    }

    pub fn build(self) -> Result<ExchangeConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = ExchangeConfig::default();
        assert_eq!(config.exchange_interval, Duration::from_secs(900));
        assert_eq!(config.urgent_exchange_interval, Duration::from_secs(60));
        assert_eq!(config.max_messages, 100);
        assert_eq!(config.pre_exchange_lead_time, Duration::from_secs(10));
    }

    #[test]
    fn validate_rejects_lead_time_past_urgent_interval() {
        let config = ExchangeConfig::builder()
            .with_urgent_exchange_interval(Duration::from_secs(5))
            .with_pre_exchange_lead_time(Duration::from_secs(10))
            .build();
        assert!(config.is_err());
    }
}
