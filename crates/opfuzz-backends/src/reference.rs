//! In-tree reference interpreter.

use crate::backend::Backend;
use crate::error::ExecutionError;
use crate::kernels::{self, Precision};
use opfuzz_common::TensorData;
use opfuzz_graph::{Graph, NodeKind};
use tracing::trace;

/// Executes graphs with the built-in operator semantics.
///
/// `reference` accumulates in f64; `reference-f32` rounds every arithmetic
/// step to f32. Both reject empty tensors, dtype mismatches, out-of-range
/// axes, incompatible broadcasts and integer division by zero.
#[derive(Debug, Clone)]
pub struct ReferenceBackend {
    precision: Precision,
}

impl ReferenceBackend {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }

    pub fn f64() -> Self {
        Self::new(Precision::F64)
    }

    pub fn f32() -> Self {
        Self::new(Precision::F32)
    }
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::f64()
    }
}

fn attr(attrs: &[i64], index: usize, op: &str, count: usize) -> Result<i64, ExecutionError> {
    if attrs.len() != count {
        return Err(ExecutionError::rejected(format!("{op}: expected {count} attributes, got {}", attrs.len())));
    }
    Ok(attrs[index])
}

fn no_attrs(op: &str, attrs: &[i64]) -> Result<(), ExecutionError> {
    if !attrs.is_empty() {
        return Err(ExecutionError::rejected(format!("{op}: takes no attributes, got {}", attrs.len())));
    }
    Ok(())
}

fn arity(op: &str, args: &[&TensorData], expected: usize) -> Result<(), ExecutionError> {
    if args.len() != expected {
        return Err(ExecutionError::rejected(format!("{op}: expected {expected} operands, got {}", args.len())));
    }
    Ok(())
}

impl ReferenceBackend {
    fn eval(&self, op: &str, attrs: &[i64], args: &[&TensorData]) -> Result<TensorData, ExecutionError> {
        kernels::require_nonempty(op, args)?;
        let p = self.precision;
        match op {
            "relu" | "abs" | "neg" | "sigmoid" | "tanh" | "exp" | "log" | "sqrt" => {
                arity(op, args, 1)?;
                no_attrs(op, attrs)?;
                kernels::unary(op, args[0], p)
            }
            "add" | "sub" | "mul" | "div" | "maximum" | "minimum" => {
                arity(op, args, 2)?;
                no_attrs(op, attrs)?;
                kernels::binary(op, args[0], args[1], p)
            }
            "reduce_sum" | "reduce_mean" | "reduce_max" => {
                arity(op, args, 1)?;
                let axis = attr(attrs, 0, op, 2)?;
                let keepdim = attr(attrs, 1, op, 2)? != 0;
                kernels::reduce(op, args[0], axis, keepdim, p)
            }
            "softmax" => {
                arity(op, args, 1)?;
                kernels::softmax(args[0], attr(attrs, 0, op, 1)?, p)
            }
            "matmul" => {
                arity(op, args, 2)?;
                no_attrs(op, attrs)?;
                kernels::matmul(args[0], args[1], p)
            }
            "concat" => {
                arity(op, args, 2)?;
                kernels::concat(args[0], args[1], attr(attrs, 0, op, 1)?)
            }
            "transpose" => {
                arity(op, args, 1)?;
                kernels::transpose(args[0], attr(attrs, 0, op, 2)?, attr(attrs, 1, op, 2)?)
            }
            "slice" => {
                arity(op, args, 1)?;
                kernels::slice(args[0], attr(attrs, 0, op, 3)?, attr(attrs, 1, op, 3)?, attr(attrs, 2, op, 3)?)
            }
            other => Err(ExecutionError::rejected(format!("unsupported operator `{other}`"))),
        }
    }
}

impl Backend for ReferenceBackend {
    fn name(&self) -> &str {
        match self.precision {
            Precision::F64 => "reference",
            Precision::F32 => "reference-f32",
        }
    }

    fn execute(&self, graph: &Graph, inputs: &[TensorData]) -> Result<Vec<TensorData>, ExecutionError> {
        let mut feeds = inputs.iter();
        let mut values: Vec<Vec<TensorData>> = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            let produced = match &node.kind {
                NodeKind::Input | NodeKind::Constant => {
                    let feed = feeds
                        .next()
                        .ok_or_else(|| ExecutionError::rejected(format!("no value fed for source node {}", node.id)))?;
                    if node.outputs.first() != Some(&feed.spec) {
                        return Err(ExecutionError::rejected(format!(
                            "source node {} fed {} but declares {:?}",
                            node.id, feed.spec, node.outputs
                        )));
                    }
                    feed.clone()
                }
                NodeKind::Op { op, attrs } => {
                    let args = node
                        .inputs
                        .iter()
                        .map(|r| values.get(r.node).and_then(|outs| outs.get(r.output)))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| ExecutionError::rejected(format!("node {} reads a missing value", node.id)))?;
                    let out = self.eval(op, attrs, &args)?;
                    trace!(backend = self.name(), node = node.id, op = %op, out = %out.spec, "evaluated");
                    out
                }
            };
            values.push(vec![produced]);
        }
        if feeds.next().is_some() {
            return Err(ExecutionError::rejected("more values fed than the graph has source nodes"));
        }
        graph
            .outputs
            .iter()
            .map(|r| {
                values
                    .get(r.node)
                    .and_then(|outs| outs.get(r.output))
                    .cloned()
                    .ok_or_else(|| ExecutionError::rejected(format!("graph output {r} does not exist")))
            })
            .collect()
    }
}
