//! Gas station: pumps grouped by fuel type, a price table, and the
//! concurrent `buy_gas` allocation engine.

pub mod metrics;
mod pool;
pub mod pump;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::config::StationConfig;
use crate::error::{Result, StationError};
use crate::models::FuelType;

pub use metrics::{MetricsSnapshot, StationMetrics};
pub use pool::AllocationPolicy;
pub use pump::{Pump, PumpId, PumpSnapshot, PumpState};

use pool::{CategoryPool, Unavailable};

/// A station shared by any number of buyer threads (wrap in `Arc`).
#[derive(Debug)]
pub struct Station {
    pools: RwLock<BTreeMap<FuelType, Arc<CategoryPool>>>,
    prices: RwLock<HashMap<FuelType, f64>>,
    metrics: StationMetrics,
    policy: AllocationPolicy,
    next_pump_id: AtomicU32,
}

impl Default for Station {
    fn default() -> Self {
        Self::new()
    }
}

impl Station {
    pub fn new() -> Self {
        Self::with_policy(AllocationPolicy::default())
    }

    pub fn with_policy(policy: AllocationPolicy) -> Self {
        Self {
            pools: RwLock::new(BTreeMap::new()),
            prices: RwLock::new(HashMap::new()),
            metrics: StationMetrics::new(),
            policy,
            next_pump_id: AtomicU32::new(0),
        }
    }

    /// Build a station with the pumps and prices described by `config`.
    pub fn from_config(config: &StationConfig) -> Result<Self> {
        let station = Self::with_policy(config.policy);
        for price in &config.prices {
            station.set_price(price.category, price.price)?;
        }
        for pump in &config.pumps {
            for _ in 0..pump.count {
                station.add_gas_pump(pump.category, pump.capacity)?;
            }
        }
        tracing::info!(
            "Station ready: {} pumps, {} priced categories, policy={:?}",
            station.pump_count(),
            config.prices.len(),
            station.policy
        );
        Ok(station)
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Register a new pump holding `capacity` litres.
    pub fn add_gas_pump(&self, category: FuelType, capacity: f64) -> Result<PumpId> {
        if !capacity.is_finite() || capacity < 0.0 {
            return Err(StationError::InvalidCapacity(capacity));
        }
        let id = PumpId(self.next_pump_id.fetch_add(1, Ordering::Relaxed));
        let pool = {
            let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                pools
                    .entry(category)
                    .or_insert_with(|| Arc::new(CategoryPool::new(category))),
            )
        };
        pool.add(Pump::new(id, category, capacity));
        tracing::debug!("Added {} ({}, {} litres)", id, category, capacity);
        Ok(id)
    }

    fn pool(&self, category: FuelType) -> Option<Arc<CategoryPool>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .cloned()
    }

    /// Snapshot of every pump, free and busy, ordered by category then id.
    pub fn gas_pumps(&self) -> Vec<PumpSnapshot> {
        let pools: Vec<Arc<CategoryPool>> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        pools.iter().flat_map(|pool| pool.snapshot()).collect()
    }

    pub fn pump_count(&self) -> usize {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|pool| pool.len())
            .sum()
    }

    pub fn price(&self, category: FuelType) -> Result<f64> {
        self.prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .copied()
            .ok_or(StationError::UnknownPrice(category))
    }

    pub fn set_price(&self, category: FuelType, price: f64) -> Result<()> {
        if !price.is_finite() || price < 0.0 {
            return Err(StationError::InvalidPrice(price));
        }
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(category, price);
        tracing::info!("Price for {} set to {:.3}", category, price);
        Ok(())
    }

    /// Buy `amount` litres at no more than `max_price_per_litre`, returning
    /// the amount paid.
    ///
    /// May block while the only pump able to serve the request is busy
    /// (see [`AllocationPolicy`]); never blocks when no pump can ever serve it.
    pub fn buy_gas(&self, category: FuelType, amount: f64, max_price_per_litre: f64) -> Result<f64> {
        self.buy(category, amount, max_price_per_litre, None)
    }

    /// Like [`Station::buy_gas`], but gives up with
    /// [`StationError::WaitTimedOut`] if waiting for a busy pump takes
    /// longer than `timeout`.
    pub fn buy_gas_with_timeout(
        &self,
        category: FuelType,
        amount: f64,
        max_price_per_litre: f64,
        timeout: Duration,
    ) -> Result<f64> {
        self.buy(category, amount, max_price_per_litre, Some(timeout))
    }

    fn buy(
        &self,
        category: FuelType,
        amount: f64,
        max_price: f64,
        timeout: Option<Duration>,
    ) -> Result<f64> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(StationError::InvalidAmount(amount));
        }
        if !max_price.is_finite() || max_price < 0.0 {
            return Err(StationError::InvalidPrice(max_price));
        }

        // Billing uses the price seen here, even if it changes mid-withdrawal.
        let price = self.price(category)?;
        if price > max_price {
            self.metrics.record_too_expensive();
            tracing::debug!(
                "{} at {:.3} rejected: client pays at most {:.3}",
                category,
                price,
                max_price
            );
            return Err(StationError::GasTooExpensive {
                category,
                price,
                max_price,
            });
        }

        let Some(pool) = self.pool(category) else {
            self.metrics.record_no_gas();
            tracing::warn!("No pumps registered for {}", category);
            return Err(StationError::NoPumps(category));
        };

        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let mut reservation = match pool.reserve(amount, self.policy, deadline) {
            Ok(reservation) => reservation,
            Err(Unavailable::NoCapacity) => {
                self.metrics.record_no_gas();
                tracing::debug!("No {} pump holds {} litres", category, amount);
                return Err(StationError::NotEnoughGas {
                    category,
                    requested: amount,
                });
            }
            Err(Unavailable::TimedOut) => {
                self.metrics.record_timeout();
                let waited = started.elapsed();
                tracing::debug!("Gave up on {} after {:?}", category, waited);
                return Err(StationError::WaitTimedOut { category, waited });
            }
        };

        // No station lock is held here; other pumps keep serving.
        if let Err(e) = reservation.withdraw(amount) {
            tracing::error!("{}", e);
            return Err(e);
        }

        let paid = amount * price;
        reservation.complete(|pump| {
            self.metrics.record_sale(amount, paid);
            tracing::info!(
                "Sold {} litres of {} from {} for {:.2}",
                amount,
                category,
                pump.id(),
                paid
            );
        });
        Ok(paid)
    }

    pub fn revenue(&self) -> f64 {
        self.metrics.revenue()
    }

    pub fn number_of_sales(&self) -> u64 {
        self.metrics.sales()
    }

    /// Litres dispensed over completed sales.
    pub fn litres_sold(&self) -> f64 {
        self.metrics.litres_sold()
    }

    pub fn number_of_cancellations_no_gas(&self) -> u64 {
        self.metrics.cancellations_no_gas()
    }

    pub fn number_of_cancellations_too_expensive(&self) -> u64 {
        self.metrics.cancellations_too_expensive()
    }

    pub fn number_of_cancellations_timeout(&self) -> u64 {
        self.metrics.cancellations_timeout()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn to_prometheus(&self) -> String {
        self.metrics.to_prometheus()
    }
}
