//! Station layout and simulation workload, loaded from `gas-station.toml`.

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::models::FuelType;
use crate::station::AllocationPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "gas-station.toml";

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StationConfig {
    #[serde(default)]
    pub policy: AllocationPolicy,
    #[serde(default = "default_prices")]
    pub prices: Vec<PriceConfig>,
    #[serde(default = "default_pumps")]
    pub pumps: Vec<PumpConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PriceConfig {
    pub category: FuelType,
    pub price: f64,
}

/// `count` identical pumps of one category.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PumpConfig {
    pub category: FuelType,
    pub capacity: f64,
    #[serde(default = "default_pump_count")]
    pub count: usize,
}

fn default_prices() -> Vec<PriceConfig> {
    vec![
        PriceConfig {
            category: FuelType::Diesel,
            price: 1.11,
        },
        PriceConfig {
            category: FuelType::Super,
            price: 1.25,
        },
        PriceConfig {
            category: FuelType::Regular,
            price: 1.31,
        },
    ]
}

fn default_pumps() -> Vec<PumpConfig> {
    vec![
        PumpConfig {
            category: FuelType::Diesel,
            capacity: 50.0,
            count: 3,
        },
        PumpConfig {
            category: FuelType::Regular,
            capacity: 50.0,
            count: 2,
        },
        PumpConfig {
            category: FuelType::Super,
            capacity: 50.0,
            count: 3,
        },
    ]
}

fn default_pump_count() -> usize {
    1
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            policy: AllocationPolicy::default(),
            prices: default_prices(),
            pumps: default_pumps(),
        }
    }
}

/// Randomized client workload for `gas-station simulate`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimulationConfig {
    #[serde(default = "default_clients")]
    pub clients: usize,
    #[serde(default = "default_min_amount")]
    pub min_amount: f64,
    #[serde(default = "default_max_amount")]
    pub max_amount: f64,
    /// Lower bound of the price a client is willing to pay per litre.
    #[serde(default = "default_min_budget")]
    pub min_budget: f64,
    #[serde(default = "default_max_budget")]
    pub max_budget: f64,
    /// Bound on waiting for a busy pump; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_ms: Option<u64>,
    /// Size of the blocking worker pool; defaults to the available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_clients() -> usize {
    10
}
fn default_min_amount() -> f64 {
    20.0
}
fn default_max_amount() -> f64 {
    30.0
}
fn default_min_budget() -> f64 {
    1.05
}
fn default_max_budget() -> f64 {
    1.15
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            min_budget: default_min_budget(),
            max_budget: default_max_budget(),
            wait_timeout_ms: None,
            worker_threads: None,
            seed: None,
        }
    }
}

impl AppConfig {
    /// Reject layouts the station or the load generator cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        for price in &self.station.prices {
            if !price.price.is_finite() || price.price < 0.0 {
                bail!("price for {} must be finite and >= 0", price.category);
            }
        }
        for pump in &self.station.pumps {
            if !pump.capacity.is_finite() || pump.capacity < 0.0 {
                bail!("pump capacity for {} must be finite and >= 0", pump.category);
            }
        }

        let sim = &self.simulation;
        if !(sim.min_amount > 0.0 && sim.min_amount <= sim.max_amount && sim.max_amount.is_finite()) {
            bail!(
                "simulation amounts must satisfy 0 < min_amount <= max_amount (got {}..{})",
                sim.min_amount,
                sim.max_amount
            );
        }
        if !(sim.min_budget >= 0.0 && sim.min_budget <= sim.max_budget && sim.max_budget.is_finite()) {
            bail!(
                "simulation budgets must satisfy 0 <= min_budget <= max_budget (got {}..{})",
                sim.min_budget,
                sim.max_budget
            );
        }
        if sim.worker_threads == Some(0) {
            bail!("worker_threads must be > 0");
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// Load configuration from `path`, falling back to defaults when the file is
/// missing or unreadable.
pub fn load_config(path: &Path) -> AppConfig {
    if !path.exists() {
        return AppConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            AppConfig::default()
        }),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

/// Load configuration from an explicitly requested file; any problem is an error.
pub fn load_config_strict(path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_describe_reference_layout() {
        let config = AppConfig::default();
        let pumps: usize = config.station.pumps.iter().map(|p| p.count).sum();
        assert_eq!(pumps, 8);
        assert_eq!(config.station.prices.len(), 3);
        assert_eq!(config.station.policy, AllocationPolicy::WaitForBusy);
        assert_eq!(config.simulation.clients, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join("absent.toml"));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_malformed_file_falls_back_but_strict_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "station = [not toml").unwrap();

        assert_eq!(load_config(&path), AppConfig::default());
        assert!(load_config_strict(&path).is_err());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
[station]
policy = "never-wait"

[[station.pumps]]
category = "SUPER"
capacity = 150
count = 2

[simulation]
clients = 5
wait_timeout_ms = 250
"#,
        )
        .unwrap();

        let config = load_config_strict(&path).unwrap();
        assert_eq!(config.station.policy, AllocationPolicy::NeverWait);
        assert_eq!(
            config.station.pumps,
            vec![PumpConfig {
                category: FuelType::Super,
                capacity: 150.0,
                count: 2,
            }]
        );
        assert_eq!(config.station.prices, default_prices());
        assert_eq!(config.simulation.clients, 5);
        assert_eq!(config.simulation.wait_timeout_ms, Some(250));
        assert_eq!(config.simulation.min_amount, 20.0);
    }

    #[test]
    fn test_written_config_loads_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        let mut config = AppConfig::default();
        config.simulation.seed = Some(42);
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(load_config_strict(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_inverted_ranges() {
        let mut config = AppConfig::default();
        config.simulation.min_amount = 40.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.station.prices[0].price = -1.0;
        assert!(config.validate().is_err());
    }
}
