//! Unified error type for the station engine: business rejections, caller
//! and configuration errors, and internal invariant violations.

use std::time::Duration;

use thiserror::Error;

use crate::models::FuelType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StationError {
    /// Current price is above what the client is willing to pay.
    #[error("Gas too expensive: {category} costs {price:.3}, client pays at most {max_price:.3}")]
    GasTooExpensive {
        category: FuelType,
        price: f64,
        max_price: f64,
    },

    /// No pump of the category (free or busy) holds the requested amount.
    #[error("Not enough gas: no {category} pump holds {requested} litres")]
    NotEnoughGas { category: FuelType, requested: f64 },

    /// No pump was ever registered for the category.
    #[error("No pumps registered for {0}")]
    NoPumps(FuelType),

    /// Category was never priced.
    #[error("Price for gas type {0} is unknown")]
    UnknownPrice(FuelType),

    #[error("Invalid amount: {0} (must be finite and > 0)")]
    InvalidAmount(f64),

    #[error("Invalid price: {0} (must be finite and >= 0)")]
    InvalidPrice(f64),

    #[error("Invalid pump capacity: {0} (must be finite and >= 0)")]
    InvalidCapacity(f64),

    /// Bounded wait for a busy pump expired.
    #[error("Gave up waiting for a {category} pump after {waited:?}")]
    WaitTimedOut { category: FuelType, waited: Duration },

    /// Internal bug: must never happen in correct operation.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, StationError>;

impl StationError {
    /// Expected, counted outcomes a client should treat as "try elsewhere or later".
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            Self::GasTooExpensive { .. }
                | Self::NotEnoughGas { .. }
                | Self::NoPumps(_)
                | Self::WaitTimedOut { .. }
        )
    }

    /// Stable short label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GasTooExpensive { .. } => "too_expensive",
            Self::NotEnoughGas { .. } | Self::NoPumps(_) => "no_gas",
            Self::UnknownPrice(_) => "unknown_price",
            Self::InvalidAmount(_) | Self::InvalidPrice(_) | Self::InvalidCapacity(_) => {
                "invalid_request"
            }
            Self::WaitTimedOut { .. } => "timeout",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rejections() {
        let too_expensive = StationError::GasTooExpensive {
            category: FuelType::Diesel,
            price: 1.11,
            max_price: 0.5,
        };
        assert!(too_expensive.is_business_rejection());
        assert_eq!(too_expensive.kind(), "too_expensive");

        assert!(StationError::NoPumps(FuelType::Super).is_business_rejection());
        assert_eq!(StationError::NoPumps(FuelType::Super).kind(), "no_gas");

        assert!(!StationError::UnknownPrice(FuelType::Regular).is_business_rejection());
        assert!(!StationError::InvariantViolation("x".into()).is_business_rejection());
    }

    #[test]
    fn test_messages_name_the_category() {
        let err = StationError::UnknownPrice(FuelType::Diesel);
        assert_eq!(err.to_string(), "Price for gas type DIESEL is unknown");

        let err = StationError::NotEnoughGas {
            category: FuelType::Super,
            requested: 150.0,
        };
        assert!(err.to_string().contains("SUPER"));
    }
}
