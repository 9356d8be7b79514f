//! Concurrent gas station: pumps of several fuel types shared by many buyers.
//!
//! [`Station::buy_gas`] reserves a pump that holds enough fuel, withdraws
//! from it outside any station-wide lock, and releases it while updating
//! revenue and sales counters. Requests are rejected when the price exceeds
//! the client's budget or when no pump can ever hold enough fuel; when the
//! only suitable pump is busy, the buyer waits for it.

pub mod config;
pub mod error;
pub mod metrics_http;
pub mod models;
pub mod simulation;
pub mod station;

pub use error::{Result, StationError};
pub use models::FuelType;
pub use station::{AllocationPolicy, MetricsSnapshot, PumpId, PumpSnapshot, PumpState, Station};
