//! Row-major tensor kernels for the reference interpreter.
//!
//! Values are held as `f64`. Every kernel result is rounded to the output
//! dtype, and under [`Precision::F32`] every intermediate arithmetic result
//! is rounded to `f32` as well, which is what makes the two reference
//! backends disagree slightly on long reductions.

use crate::error::ExecutionError;
use opfuzz_common::{DType, TensorData, TensorSpec};

type KernelResult = Result<TensorData, ExecutionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    F64,
    F32,
}

impl Precision {
    #[inline]
    fn round(self, x: f64) -> f64 {
        match self {
            Precision::F64 => x,
            Precision::F32 => x as f32 as f64,
        }
    }
}

fn reject(reason: impl Into<String>) -> ExecutionError {
    ExecutionError::rejected(reason)
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn unravel(mut flat: usize, shape: &[usize], out: &mut [usize]) {
    for axis in (0..shape.len()).rev() {
        out[axis] = flat % shape[axis];
        flat /= shape[axis];
    }
}

fn finish(shape: Vec<usize>, dtype: DType, values: Vec<f64>, p: Precision) -> KernelResult {
    let values = values.into_iter().map(|v| dtype.quantize(p.round(v))).collect();
    TensorData::new(TensorSpec::new(shape, dtype), values).map_err(|e| reject(e.to_string()))
}

pub fn require_nonempty(op: &str, tensors: &[&TensorData]) -> Result<(), ExecutionError> {
    for t in tensors {
        if t.spec.shape.contains(&0) {
            return Err(reject(format!("{op}: empty tensor {} is not supported", t.spec)));
        }
    }
    Ok(())
}

fn require_same_dtype(op: &str, a: &TensorData, b: &TensorData) -> Result<(), ExecutionError> {
    if a.spec.dtype != b.spec.dtype {
        return Err(reject(format!("{op}: dtype mismatch {} vs {}", a.spec.dtype, b.spec.dtype)));
    }
    Ok(())
}

fn checked_axis(op: &str, axis: i64, rank: usize) -> Result<usize, ExecutionError> {
    usize::try_from(axis)
        .ok()
        .filter(|&a| a < rank)
        .ok_or_else(|| reject(format!("{op}: axis {axis} out of range for rank {rank}")))
}

pub fn unary(op: &str, x: &TensorData, p: Precision) -> KernelResult {
    let float_only = matches!(op, "sigmoid" | "tanh" | "exp" | "log" | "sqrt");
    if float_only && !x.spec.dtype.is_float() {
        return Err(reject(format!("{op}: expected a float tensor, got {}", x.spec.dtype)));
    }
    let f: fn(f64) -> f64 = match op {
        "relu" => |v| v.max(0.0),
        "abs" => f64::abs,
        "neg" => |v| -v,
        "sigmoid" => |v| 1.0 / (1.0 + (-v).exp()),
        "tanh" => f64::tanh,
        "exp" => f64::exp,
        "log" => f64::ln,
        "sqrt" => f64::sqrt,
        other => return Err(reject(format!("unsupported unary operator `{other}`"))),
    };
    let values = x.values.iter().map(|&v| f(p.round(v))).collect();
    finish(x.spec.shape.clone(), x.spec.dtype, values, p)
}

/// Numpy broadcasting of two shapes.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for k in 0..rank {
        let da = (k + a.len()).checked_sub(rank).map_or(1, |i| a[i]);
        let db = (k + b.len()).checked_sub(rank).map_or(1, |i| b[i]);
        out[k] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

pub fn binary(op: &str, a: &TensorData, b: &TensorData, p: Precision) -> KernelResult {
    require_same_dtype(op, a, b)?;
    let dtype = a.spec.dtype;
    let shape = broadcast_shape(&a.spec.shape, &b.spec.shape)
        .ok_or_else(|| reject(format!("{op}: cannot broadcast {} with {}", a.spec, b.spec)))?;
    let is_int = !dtype.is_float();
    let rank = shape.len();
    let (sa, sb) = (strides(&a.spec.shape), strides(&b.spec.shape));
    let numel: usize = shape.iter().product();
    let mut coords = vec![0; rank];
    let mut values = Vec::with_capacity(numel);
    for flat in 0..numel {
        unravel(flat, &shape, &mut coords);
        let index = |dims: &[usize], st: &[usize]| {
            let offset = rank - dims.len();
            dims.iter().enumerate().map(|(i, &d)| if d == 1 { 0 } else { coords[i + offset] * st[i] }).sum::<usize>()
        };
        let x = p.round(a.values[index(&a.spec.shape, &sa)]);
        let y = p.round(b.values[index(&b.spec.shape, &sb)]);
        let v = match op {
            "add" => x + y,
            "sub" => x - y,
            "mul" => x * y,
            // Integer division by zero yields zero.
            "div" if is_int => {
                if y == 0.0 { 0.0 } else { (x / y).trunc() }
            }
            "div" => x / y,
            "maximum" => x.max(y),
            "minimum" => x.min(y),
            other => return Err(reject(format!("unsupported binary operator `{other}`"))),
        };
        values.push(v);
    }
    finish(shape, dtype, values, p)
}

pub fn reduce(op: &str, x: &TensorData, axis: i64, keepdim: bool, p: Precision) -> KernelResult {
    let shape = &x.spec.shape;
    let axis = checked_axis(op, axis, shape.len())?;
    let outer: usize = shape[..axis].iter().product();
    let len = shape[axis];
    let inner: usize = shape[axis + 1..].iter().product();
    let mut values = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let lane = (0..len).map(|k| x.values[(o * len + k) * inner + i]);
            let v = match op {
                "reduce_sum" => lane.fold(0.0, |acc, v| p.round(acc + v)),
                "reduce_mean" => {
                    let sum = lane.fold(0.0, |acc, v| p.round(acc + v));
                    let mean = sum / len as f64;
                    if x.spec.dtype.is_float() { mean } else { mean.trunc() }
                }
                "reduce_max" => lane.fold(f64::NEG_INFINITY, f64::max),
                other => return Err(reject(format!("unsupported reduction `{other}`"))),
            };
            values.push(v);
        }
    }
    let mut out_shape = shape.clone();
    if keepdim {
        out_shape[axis] = 1;
    } else {
        out_shape.remove(axis);
    }
    finish(out_shape, x.spec.dtype, values, p)
}

pub fn softmax(x: &TensorData, axis: i64, p: Precision) -> KernelResult {
    if !x.spec.dtype.is_float() {
        return Err(reject(format!("softmax: expected a float tensor, got {}", x.spec.dtype)));
    }
    let shape = &x.spec.shape;
    let axis = checked_axis("softmax", axis, shape.len())?;
    let outer: usize = shape[..axis].iter().product();
    let len = shape[axis];
    let inner: usize = shape[axis + 1..].iter().product();
    let mut values = x.values.clone();
    for o in 0..outer {
        for i in 0..inner {
            let at = |k: usize| (o * len + k) * inner + i;
            let max = (0..len).map(|k| x.values[at(k)]).fold(f64::NEG_INFINITY, f64::max);
            let mut sum = 0.0;
            for k in 0..len {
                let e = p.round((x.values[at(k)] - max).exp());
                values[at(k)] = e;
                sum = p.round(sum + e);
            }
            for k in 0..len {
                values[at(k)] /= sum;
            }
        }
    }
    finish(shape.clone(), x.spec.dtype, values, p)
}

pub fn matmul(a: &TensorData, b: &TensorData, p: Precision) -> KernelResult {
    require_same_dtype("matmul", a, b)?;
    let (sa, sb) = (&a.spec.shape, &b.spec.shape);
    let r = sa.len();
    if r < 2 || sb.len() != r {
        return Err(reject(format!("matmul: unsupported ranks {} and {}", r, sb.len())));
    }
    if sa[..r - 2] != sb[..r - 2] || sa[r - 1] != sb[r - 2] {
        return Err(reject(format!("matmul: incompatible shapes {} and {}", a.spec, b.spec)));
    }
    let batch: usize = sa[..r - 2].iter().product();
    let (m, k, n) = (sa[r - 2], sa[r - 1], sb[r - 1]);
    let mut values = Vec::with_capacity(batch * m * n);
    for bt in 0..batch {
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0;
                for t in 0..k {
                    let prod = p.round(a.values[(bt * m + i) * k + t] * b.values[(bt * k + t) * n + j]);
                    acc = p.round(acc + prod);
                }
                values.push(acc);
            }
        }
    }
    let mut shape = sa[..r - 2].to_vec();
    shape.extend([m, n]);
    finish(shape, a.spec.dtype, values, p)
}

pub fn concat(a: &TensorData, b: &TensorData, axis: i64) -> KernelResult {
    require_same_dtype("concat", a, b)?;
    let (sa, sb) = (&a.spec.shape, &b.spec.shape);
    if sa.len() != sb.len() {
        return Err(reject(format!("concat: rank mismatch {} vs {}", a.spec, b.spec)));
    }
    let axis = checked_axis("concat", axis, sa.len())?;
    if (0..sa.len()).any(|k| k != axis && sa[k] != sb[k]) {
        return Err(reject(format!("concat: shapes {} and {} differ off axis {axis}", a.spec, b.spec)));
    }
    let outer: usize = sa[..axis].iter().product();
    let inner: usize = sa[axis + 1..].iter().product();
    let (ca, cb) = (sa[axis] * inner, sb[axis] * inner);
    let mut values = Vec::with_capacity(a.values.len() + b.values.len());
    for o in 0..outer {
        values.extend_from_slice(&a.values[o * ca..(o + 1) * ca]);
        values.extend_from_slice(&b.values[o * cb..(o + 1) * cb]);
    }
    let mut shape = sa.clone();
    shape[axis] += sb[axis];
    finish(shape, a.spec.dtype, values, Precision::F64)
}

pub fn transpose(x: &TensorData, dim0: i64, dim1: i64) -> KernelResult {
    let shape = &x.spec.shape;
    let d0 = checked_axis("transpose", dim0, shape.len())?;
    let d1 = checked_axis("transpose", dim1, shape.len())?;
    let mut out_shape = shape.clone();
    out_shape.swap(d0, d1);
    let src_strides = strides(shape);
    let mut coords = vec![0; shape.len()];
    let values = (0..x.values.len())
        .map(|flat| {
            unravel(flat, &out_shape, &mut coords);
            coords.swap(d0, d1);
            let src: usize = coords.iter().zip(&src_strides).map(|(c, s)| c * s).sum();
            x.values[src]
        })
        .collect();
    finish(out_shape, x.spec.dtype, values, Precision::F64)
}

pub fn slice(x: &TensorData, axis: i64, start: i64, end: i64) -> KernelResult {
    let shape = &x.spec.shape;
    let axis = checked_axis("slice", axis, shape.len())?;
    let len = shape[axis] as i64;
    if start < 0 || end > len || start >= end {
        return Err(reject(format!("slice: range {start}..{end} invalid for extent {len}")));
    }
    let (start, end) = (start as usize, end as usize);
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();
    let mut values = Vec::with_capacity(outer * (end - start) * inner);
    for o in 0..outer {
        let base = o * shape[axis] * inner;
        values.extend_from_slice(&x.values[base + start * inner..base + end * inner]);
    }
    let mut out_shape = shape.clone();
    out_shape[axis] = end - start;
    finish(out_shape, x.spec.dtype, values, Precision::F64)
}
