//! Backend execution for opfuzz.
//!
//! A [`Backend`] executes a [`opfuzz_graph::Graph`] on concrete inputs and
//! returns its output tensors or an [`ExecutionError`]. This crate provides
//! the reference interpreters used as in-tree backends and probing oracles,
//! a command backend for external runtimes, a fault-injecting backend for
//! self-tests, and the JSON protocol a worker process speaks.

pub mod backend;
pub mod command;
pub mod error;
pub mod factory;
pub mod faulty;
pub mod kernels;
pub mod protocol;
pub mod reference;
pub mod values;

pub use backend::Backend;
pub use command::CommandBackend;
pub use error::ExecutionError;
pub use factory::{KNOWN_BACKENDS, check_backends, create_backend};
pub use faulty::{FaultMode, FaultyBackend};
pub use kernels::Precision;
pub use protocol::{WorkerRequest, WorkerResponse, decode_response, encode_request, serve};
pub use reference::ReferenceBackend;
pub use values::materialize;
