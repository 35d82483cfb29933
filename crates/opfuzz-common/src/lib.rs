//! Common types, configuration, and errors shared across opfuzz crates
//!
//! This crate provides the foundational pieces every other crate builds on:
//! element types, concrete tensor specifications and values, the campaign
//! configuration surface, and the top-level error taxonomy.

pub mod config;
pub mod dtype;
pub mod error;
pub mod fs;
pub mod tensor;

pub use config::*;
pub use dtype::DType;
pub use error::*;
pub use tensor::{TensorData, TensorSpec};
