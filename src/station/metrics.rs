//! Station statistics: a locked sales ledger plus lock-free rejection counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Revenue, sales and volume move together, so they share one lock.
#[derive(Debug, Default, Clone, Copy)]
struct SalesLedger {
    revenue: f64,
    sales: u64,
    litres: f64,
}

/// Runtime statistics for one station.
#[derive(Debug, Default)]
pub struct StationMetrics {
    ledger: Mutex<SalesLedger>,
    cancellations_no_gas: AtomicU64,
    cancellations_too_expensive: AtomicU64,
    cancellations_timeout: AtomicU64,
}

/// Point-in-time copy of [`StationMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub revenue: f64,
    pub sales: u64,
    pub litres_sold: f64,
    pub cancellations_no_gas: u64,
    pub cancellations_too_expensive: u64,
    pub cancellations_timeout: u64,
}

impl StationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger updates never leave it half-written, so a poisoned lock still
    /// holds consistent totals.
    fn ledger(&self) -> MutexGuard<'_, SalesLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_sale(&self, litres: f64, paid: f64) {
        let mut ledger = self.ledger();
        ledger.revenue += paid;
        ledger.sales += 1;
        ledger.litres += litres;
    }

    pub fn record_no_gas(&self) {
        self.cancellations_no_gas.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_too_expensive(&self) {
        self.cancellations_too_expensive
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.cancellations_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn revenue(&self) -> f64 {
        self.ledger().revenue
    }

    pub fn sales(&self) -> u64 {
        self.ledger().sales
    }

    pub fn litres_sold(&self) -> f64 {
        self.ledger().litres
    }

    pub fn cancellations_no_gas(&self) -> u64 {
        self.cancellations_no_gas.load(Ordering::Relaxed)
    }

    pub fn cancellations_too_expensive(&self) -> u64 {
        self.cancellations_too_expensive.load(Ordering::Relaxed)
    }

    pub fn cancellations_timeout(&self) -> u64 {
        self.cancellations_timeout.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let ledger = *self.ledger();
        MetricsSnapshot {
            revenue: ledger.revenue,
            sales: ledger.sales,
            litres_sold: ledger.litres,
            cancellations_no_gas: self.cancellations_no_gas(),
            cancellations_too_expensive: self.cancellations_too_expensive(),
            cancellations_timeout: self.cancellations_timeout(),
        }
    }

    /// Export metrics in Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let snap = self.snapshot();
        format!(
            "# HELP gas_station_revenue_total Total revenue over completed sales.\n\
             # TYPE gas_station_revenue_total counter\n\
             gas_station_revenue_total {}\n\
             # HELP gas_station_sales_total Completed sales.\n\
             # TYPE gas_station_sales_total counter\n\
             gas_station_sales_total {}\n\
             # HELP gas_station_litres_sold_total Litres dispensed over completed sales.\n\
             # TYPE gas_station_litres_sold_total counter\n\
             gas_station_litres_sold_total {}\n\
             # HELP gas_station_cancellations_total Rejected purchases by reason.\n\
             # TYPE gas_station_cancellations_total counter\n\
             gas_station_cancellations_total{{reason=\"no_gas\"}} {}\n\
             gas_station_cancellations_total{{reason=\"too_expensive\"}} {}\n\
             gas_station_cancellations_total{{reason=\"timeout\"}} {}\n",
            snap.revenue,
            snap.sales,
            snap.litres_sold,
            snap.cancellations_no_gas,
            snap.cancellations_too_expensive,
            snap.cancellations_timeout,
        )
    }
}
