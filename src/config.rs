use crate::{
    allocation::AllocationStrategy,
    discovery::DiscoveryPolicy,
    error::{MarketError, Result},
    simulation::Scenario,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub negotiation: NegotiationConfig,
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
    pub scenario: Scenario,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub stock_query_timeout_ms: u64,
    pub bidding_timeout_ms: u64,
    pub decision_timeout_ms: u64,
    pub purchase_timeout_ms: u64,
    pub fulfillment_timeout_ms: u64,
    pub allocation: AllocationStrategy,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub recheck_delay_ms: Option<u64>,
    pub expected_markets: Option<usize>,
    pub expected_deliveries: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            stock_query_timeout_ms: 1500,
            bidding_timeout_ms: 3000,
            decision_timeout_ms: 10_000,
            purchase_timeout_ms: 3000,
            fulfillment_timeout_ms: 10_000,
            allocation: AllocationStrategy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Some("pretty".to_string()),
        }
    }
}

impl NegotiationConfig {
    pub fn stock_query_timeout(&self) -> Duration {
        Duration::from_millis(self.stock_query_timeout_ms)
    }

    pub fn bidding_timeout(&self) -> Duration {
        Duration::from_millis(self.bidding_timeout_ms)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    pub fn purchase_timeout(&self) -> Duration {
        Duration::from_millis(self.purchase_timeout_ms)
    }

    pub fn fulfillment_timeout(&self) -> Duration {
        Duration::from_millis(self.fulfillment_timeout_ms)
    }
}

impl DiscoveryConfig {
    pub fn market_policy(&self) -> DiscoveryPolicy {
        DiscoveryPolicy {
            recheck_delay: self.recheck_delay_ms.map(Duration::from_millis),
            expected: self.expected_markets,
        }
    }

    pub fn delivery_policy(&self) -> DiscoveryPolicy {
        DiscoveryPolicy {
            recheck_delay: self.recheck_delay_ms.map(Duration::from_millis),
            expected: self.expected_deliveries,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| MarketError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = toml::from_str(&config_str)?;

        Ok(config)
    }

    /// File first, then `MARKETPLACE_*` variables (`__` separates sections,
    /// e.g. `MARKETPLACE_NEGOTIATION__BIDDING_TIMEOUT_MS`).
    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("MARKETPLACE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let negotiation = &self.negotiation;
        let timeouts = [
            ("stock_query_timeout_ms", negotiation.stock_query_timeout_ms),
            ("bidding_timeout_ms", negotiation.bidding_timeout_ms),
            ("decision_timeout_ms", negotiation.decision_timeout_ms),
            ("purchase_timeout_ms", negotiation.purchase_timeout_ms),
            ("fulfillment_timeout_ms", negotiation.fulfillment_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(MarketError::Config(format!("{} cannot be 0", name)));
        }

        if negotiation.bidding_timeout_ms <= negotiation.stock_query_timeout_ms {
            return Err(MarketError::Config(
                "bidding_timeout_ms must exceed stock_query_timeout_ms".to_string(),
            ));
        }

        if self.discovery.recheck_delay_ms == Some(0) {
            return Err(MarketError::Config("recheck_delay_ms cannot be 0".to_string()));
        }

        if self.logging.level.is_empty() {
            return Err(MarketError::Config("Logging level cannot be empty".to_string()));
        }

        self.scenario.validate()
    }
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let default_config = AppConfig {
        scenario: Scenario::grocery(),
        ..AppConfig::default()
    };
    let toml_str = toml::to_string_pretty(&default_config)?;

    std::fs::write(path, toml_str)
        .map_err(|e| MarketError::Config(format!("Failed to write default config file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.negotiation.bidding_timeout_ms, 3000);
        assert_eq!(config.negotiation.allocation, AllocationStrategy::GreedyCoverRefined);
        assert_eq!(config.logging.level, "info");
        assert!(config.discovery.recheck_delay_ms.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.negotiation.purchase_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.negotiation.bidding_timeout_ms = config.negotiation.stock_query_timeout_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_creation() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        create_default_config_file(path).unwrap();
        assert!(path.exists());

        let loaded_config = AppConfig::load(path).unwrap();
        assert_eq!(loaded_config.negotiation.stock_query_timeout_ms, 1500);
        assert_eq!(loaded_config.scenario.markets.len(), 3);
        assert!(loaded_config.validate().is_ok());
    }

    #[test]
    fn test_unparsable_config_is_a_config_error() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[negotiation\nbidding_timeout_ms = ").unwrap();

        let result = AppConfig::load(temp_file.path());
        assert!(matches!(result, Err(MarketError::Config(_))));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            r#"
[negotiation]
bidding_timeout_ms = 5000
allocation = "greedy_cover"

[discovery]
recheck_delay_ms = 250
expected_markets = 3
"#,
        )
        .unwrap();

        let config = AppConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.negotiation.bidding_timeout_ms, 5000);
        assert_eq!(config.negotiation.decision_timeout_ms, 10_000);
        assert_eq!(config.negotiation.allocation, AllocationStrategy::GreedyCover);
        assert_eq!(
            config.discovery.market_policy().recheck_delay,
            Some(Duration::from_millis(250))
        );
        assert!(config.discovery.delivery_policy().expected.is_none());
    }
}
