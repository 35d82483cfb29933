//! Cross-backend output comparison.

use opfuzz_common::{CompareConfig, TensorData, TensorSpec};
use serde::{Deserialize, Serialize};

/// `|actual - expected| <= atol + rtol * |expected|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub atol: f64,
    pub rtol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::from(&CompareConfig::default())
    }
}

impl From<&CompareConfig> for Tolerance {
    fn from(config: &CompareConfig) -> Self {
        Self { atol: config.atol, rtol: config.rtol }
    }
}

impl Tolerance {
    /// Non-finite values match only an identical non-finite value.
    pub fn close(&self, expected: f64, actual: f64) -> bool {
        if expected.is_nan() || actual.is_nan() {
            return expected.is_nan() && actual.is_nan();
        }
        if expected.is_infinite() || actual.is_infinite() {
            return expected == actual;
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// First disagreement between two output lists.
///
/// Only serialized (into verdicts and logs); non-finite values render as
/// `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mismatch {
    OutputCount {
        expected: usize,
        actual: usize,
    },
    Spec {
        output: usize,
        expected: TensorSpec,
        actual: TensorSpec,
    },
    Value {
        output: usize,
        index: usize,
        expected: f64,
        actual: f64,
        /// Largest finite absolute difference in this output.
        max_abs_diff: f64,
    },
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::OutputCount { expected, actual } => write!(f, "{actual} outputs, expected {expected}"),
            Mismatch::Spec { output, expected, actual } => write!(f, "output {output} is {actual}, expected {expected}"),
            Mismatch::Value { output, index, expected, actual, max_abs_diff } => write!(
                f,
                "output {output}[{index}] = {actual}, expected {expected} (max abs diff {max_abs_diff:.3e})"
            ),
        }
    }
}

/// Check `actual` against the specs a graph declares.
pub fn check_declared(declared: &[&TensorSpec], actual: &[TensorData]) -> Option<Mismatch> {
    if declared.len() != actual.len() {
        return Some(Mismatch::OutputCount { expected: declared.len(), actual: actual.len() });
    }
    declared.iter().zip(actual).enumerate().find_map(|(output, (spec, tensor))| {
        (**spec != tensor.spec).then(|| Mismatch::Spec {
            output,
            expected: (*spec).clone(),
            actual: tensor.spec.clone(),
        })
    })
}

/// Compare `actual` against `expected` element-wise.
pub fn compare_outputs(expected: &[TensorData], actual: &[TensorData], tolerance: Tolerance) -> Option<Mismatch> {
    if expected.len() != actual.len() {
        return Some(Mismatch::OutputCount { expected: expected.len(), actual: actual.len() });
    }
    for (output, (e, a)) in expected.iter().zip(actual).enumerate() {
        if e.spec != a.spec {
            return Some(Mismatch::Spec { output, expected: e.spec.clone(), actual: a.spec.clone() });
        }
        let first_bad = e.values.iter().zip(&a.values).position(|(&x, &y)| !tolerance.close(x, y));
        if let Some(index) = first_bad {
            let max_abs_diff = e
                .values
                .iter()
                .zip(&a.values)
                .map(|(x, y)| (x - y).abs())
                .filter(|d| d.is_finite())
                .fold(0.0, f64::max);
            return Some(Mismatch::Value {
                output,
                index,
                expected: e.values[index],
                actual: a.values[index],
                max_abs_diff,
            });
        }
    }
    None
}
