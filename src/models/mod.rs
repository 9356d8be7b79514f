pub mod fuel;

pub use fuel::{FuelType, ParseFuelTypeError};
