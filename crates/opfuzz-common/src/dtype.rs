//! Element types understood by generated graphs and backends.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tensor element type.
///
/// The discriminant doubles as the integer code used when a dtype appears as a
/// variable inside a validity formula, so the order must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DType {
    Float32 = 0,
    Float64 = 1,
    Int32 = 2,
    Int64 = 3,
}

impl DType {
    /// Every dtype, in code order.
    pub const fn all() -> &'static [DType] {
        &[DType::Float32, DType::Float64, DType::Int32, DType::Int64]
    }

    pub const fn floats() -> &'static [DType] {
        &[DType::Float32, DType::Float64]
    }

    pub const fn ints() -> &'static [DType] {
        &[DType::Int32, DType::Int64]
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    pub const fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        DType::all().iter().copied().find(|dtype| dtype.code() == code)
    }

    pub const fn name(self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
        }
    }

    /// Parse a dtype name; accepts the short `f32`/`i64` spellings too.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "float32" | "f32" => Some(DType::Float32),
            "float64" | "f64" => Some(DType::Float64),
            "int32" | "i32" => Some(DType::Int32),
            "int64" | "i64" => Some(DType::Int64),
            _ => None,
        }
    }

    /// Round a value to what this dtype can represent.
    ///
    /// Integer casts saturate and map NaN to zero, matching `as` semantics.
    pub fn quantize(self, value: f64) -> f64 {
        match self {
            DType::Float32 => value as f32 as f64,
            DType::Float64 => value,
            DType::Int32 => value.trunc() as i32 as f64,
            DType::Int64 => value.trunc() as i64 as f64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for dtype in DType::all() {
            assert_eq!(DType::from_code(dtype.code()), Some(*dtype));
        }
        assert_eq!(DType::from_code(17), None);
    }

    #[test]
    fn names_accept_short_forms() {
        assert_eq!(DType::from_name("f32"), Some(DType::Float32));
        assert_eq!(DType::from_name("INT64"), Some(DType::Int64));
        assert_eq!(DType::from_name("bfloat16"), None);
    }

    #[test]
    fn quantize_saturates_integers() {
        assert_eq!(DType::Int32.quantize(1e12), i32::MAX as f64);
        assert_eq!(DType::Int32.quantize(f64::NAN), 0.0);
        assert_eq!(DType::Int64.quantize(-2.7), -2.0);
        assert!(DType::Float64.quantize(f64::NAN).is_nan());
    }

    proptest::proptest! {
        #[test]
        fn quantize_is_idempotent(value in proptest::num::f64::ANY, index in 0usize..4) {
            let dtype = DType::all()[index];
            let once = dtype.quantize(value);
            let twice = dtype.quantize(once);
            proptest::prop_assert!(once.to_bits() == twice.to_bits() || (once.is_nan() && twice.is_nan()));
            if !dtype.is_float() {
                proptest::prop_assert_eq!(once.fract(), 0.0);
            }
        }
    }
}
