//! Fuel categories that partition the pump pool.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fuel type sold by a pump. The engine treats it as an opaque key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FuelType {
    Regular,
    Super,
    Diesel,
}

impl FuelType {
    pub const ALL: [FuelType; 3] = [FuelType::Regular, FuelType::Super, FuelType::Diesel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "REGULAR",
            Self::Super => "SUPER",
            Self::Diesel => "DIESEL",
        }
    }

    /// Pick a category uniformly at random (load generation).
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown fuel type: {0} (expected REGULAR, SUPER or DIESEL)")]
pub struct ParseFuelTypeError(String);

impl FromStr for FuelType {
    type Err = ParseFuelTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REGULAR" => Ok(Self::Regular),
            "SUPER" => Ok(Self::Super),
            "DIESEL" => Ok(Self::Diesel),
            _ => Err(ParseFuelTypeError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("diesel".parse::<FuelType>().unwrap(), FuelType::Diesel);
        assert_eq!(" Super ".parse::<FuelType>().unwrap(), FuelType::Super);
        assert!("kerosene".parse::<FuelType>().is_err());
    }

    #[test]
    fn test_display_matches_serde() {
        for fuel in FuelType::ALL {
            let json = serde_json::to_string(&fuel).unwrap();
            assert_eq!(json, format!("\"{}\"", fuel));
        }
    }

    #[test]
    fn test_random_covers_all_categories() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(FuelType::random(&mut rng));
        }
        assert_eq!(seen.len(), FuelType::ALL.len());
    }
}
