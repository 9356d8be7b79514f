//! A single pump: finite, non-replenishing capacity of one fuel type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StationError};
use crate::models::FuelType;

/// Station-unique pump identifier, assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PumpId(pub u32);

impl fmt::Display for PumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pump#{}", self.0)
    }
}

/// Pump state as seen by the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpState {
    Free,
    Busy,
}

/// Read-only view of a pump handed out to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpSnapshot {
    pub id: PumpId,
    pub category: FuelType,
    pub remaining: f64,
    pub dispensed: f64,
    pub state: PumpState,
}

/// Owned by the station; mutated only while reserved, so no internal locking.
#[derive(Debug)]
pub struct Pump {
    id: PumpId,
    category: FuelType,
    remaining: f64,
    dispensed: f64,
}

impl Pump {
    pub(crate) fn new(id: PumpId, category: FuelType, capacity: f64) -> Self {
        Self {
            id,
            category,
            remaining: capacity,
            dispensed: 0.0,
        }
    }

    pub fn id(&self) -> PumpId {
        self.id
    }

    pub fn category(&self) -> FuelType {
        self.category
    }

    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    pub fn dispensed(&self) -> f64 {
        self.dispensed
    }

    pub fn can_serve(&self, amount: f64) -> bool {
        self.remaining >= amount
    }

    /// Debit `amount` litres.
    ///
    /// Selection guarantees the precondition, so a failure here is an
    /// internal bug; the pump is left untouched.
    pub fn withdraw(&mut self, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount < 0.0 || amount > self.remaining {
            return Err(StationError::InvariantViolation(format!(
                "{} asked for {} litres with {} remaining",
                self.id, amount, self.remaining
            )));
        }
        self.remaining -= amount;
        self.dispensed += amount;
        Ok(())
    }

    pub fn snapshot(&self, state: PumpState) -> PumpSnapshot {
        PumpSnapshot {
            id: self.id,
            category: self.category,
            remaining: self.remaining,
            dispensed: self.dispensed,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pump(capacity: f64) -> Pump {
        Pump::new(PumpId(1), FuelType::Diesel, capacity)
    }

    #[test]
    fn test_withdraw_moves_capacity_to_dispensed() {
        let mut p = pump(100.0);
        p.withdraw(40.0).unwrap();
        p.withdraw(60.0).unwrap();
        assert_eq!(p.remaining(), 0.0);
        assert_eq!(p.dispensed(), 100.0);
    }

    #[test]
    fn test_withdraw_over_capacity_is_rejected_untouched() {
        let mut p = pump(10.0);
        let err = p.withdraw(10.5).unwrap_err();
        assert!(matches!(err, StationError::InvariantViolation(_)));
        assert_eq!(p.remaining(), 10.0);
        assert_eq!(p.dispensed(), 0.0);
    }

    #[test]
    fn test_withdraw_rejects_negative_and_nan() {
        let mut p = pump(10.0);
        assert!(p.withdraw(-1.0).is_err());
        assert!(p.withdraw(f64::NAN).is_err());
        assert_eq!(p.remaining(), 10.0);
    }

    #[test]
    fn test_snapshot_serializes_state() {
        let p = pump(50.0);
        let snap = p.snapshot(PumpState::Busy);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["category"], "DIESEL");
        assert_eq!(json["state"], "busy");
    }
}
