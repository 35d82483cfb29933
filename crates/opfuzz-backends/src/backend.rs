//! The execution interface every backend under test implements.

use crate::error::ExecutionError;
use opfuzz_common::TensorData;
use opfuzz_graph::Graph;

/// A runtime that can execute a [`Graph`].
///
/// `inputs` carries one value per source node (inputs and constants), in
/// node order; see [`crate::materialize`]. On success the returned tensors
/// correspond one-to-one with `graph.outputs`.
///
/// The output specs declared on op nodes are advisory. A backend computes
/// whatever its semantics produce; the runner compares the result against
/// the declaration.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, graph: &Graph, inputs: &[TensorData]) -> Result<Vec<TensorData>, ExecutionError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute(&self, graph: &Graph, inputs: &[TensorData]) -> Result<Vec<TensorData>, ExecutionError> {
        (**self).execute(graph, inputs)
    }
}

impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute(&self, graph: &Graph, inputs: &[TensorData]) -> Result<Vec<TensorData>, ExecutionError> {
        (**self).execute(graph, inputs)
    }
}
