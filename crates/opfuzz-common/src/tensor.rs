//! Concrete tensor specifications and values

use crate::DType;
use crate::error::{OpFuzzError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete rank, per-dimension size and dtype of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorSpec {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl TensorSpec {
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        Self { shape: shape.into(), dtype }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements; saturates instead of overflowing.
    pub fn numel(&self) -> usize {
        self.shape.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
    }

    /// Same rank and dtype, dimension sizes ignored.
    pub fn same_kind(&self, other: &TensorSpec) -> bool {
        self.rank() == other.rank() && self.dtype == other.dtype
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, d) in self.shape.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

/// Parses the [`Display`](fmt::Display) form, e.g. `float32[1,3,8,8]` or
/// `i64[]`.
impl std::str::FromStr for TensorSpec {
    type Err = OpFuzzError;

    fn from_str(text: &str) -> Result<Self> {
        let invalid = || OpFuzzError::Validation(format!("bad tensor spec `{text}`, expected e.g. float32[2,3]"));
        let (dtype, rest) = text.trim().split_once('[').ok_or_else(invalid)?;
        let dims = rest.strip_suffix(']').ok_or_else(invalid)?;
        let dtype = DType::from_name(dtype.trim()).ok_or_else(invalid)?;
        let shape = if dims.trim().is_empty() {
            Vec::new()
        } else {
            dims.split(',').map(|d| d.trim().parse::<usize>().map_err(|_| invalid())).collect::<Result<_>>()?
        };
        Ok(TensorSpec::new(shape, dtype))
    }
}

/// A tensor value: spec plus row-major element values.
///
/// Values are stored as `f64` regardless of dtype; integer tensors hold
/// integral values. Non-finite values survive JSON encoding as the strings
/// `"nan"`, `"inf"` and `"-inf"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub spec: TensorSpec,
    #[serde(with = "nonfinite")]
    pub values: Vec<f64>,
}

impl TensorData {
    pub fn new(spec: TensorSpec, values: Vec<f64>) -> Result<Self> {
        if values.len() != spec.numel() {
            return Err(OpFuzzError::Validation(format!(
                "tensor {spec} expects {} values, got {}",
                spec.numel(),
                values.len()
            )));
        }
        Ok(Self { spec, values })
    }

    pub fn zeros(spec: TensorSpec) -> Self {
        let values = vec![0.0; spec.numel()];
        Self { spec, values }
    }

    pub fn has_nan(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    pub fn has_inf(&self) -> bool {
        self.values.iter().any(|v| v.is_infinite())
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

mod nonfinite {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Num(f64),
        Tag(String),
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        values
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    Encoded::Num(v)
                } else if v.is_nan() {
                    Encoded::Tag("nan".to_string())
                } else if v > 0.0 {
                    Encoded::Tag("inf".to_string())
                } else {
                    Encoded::Tag("-inf".to_string())
                }
            })
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Encoded>::deserialize(deserializer)?
            .into_iter()
            .map(|e| match e {
                Encoded::Num(v) => Ok(v),
                Encoded::Tag(tag) => match tag.as_str() {
                    "nan" => Ok(f64::NAN),
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    other => Err(D::Error::custom(format!("invalid tensor value `{other}`"))),
                },
            })
            .collect()
    }
}
