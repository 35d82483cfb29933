//! Computation graphs for opfuzz: the IR, its invariant checks, structural
//! fingerprints, DOT rendering and the solver-guided [`GraphBuilder`].

pub mod builder;
pub mod dot;
pub mod fingerprint;
pub mod graph;

pub use builder::{BuildStats, GraphBuilder};
pub use dot::to_dot;
pub use fingerprint::Fingerprint;
pub use graph::{GRAPH_FORMAT_VERSION, Graph, GraphError, GraphNode, NodeKind, TensorRef};
