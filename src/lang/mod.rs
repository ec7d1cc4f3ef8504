pub mod value;

pub use value::{ValueData, ValueKind, ValueType};
