//! JSON wire protocol between the orchestrator and a worker process.
//!
//! The orchestrator writes one [`WorkerRequest`] to the worker's stdin and
//! closes it; the worker answers with one [`WorkerResponse`] on stdout and
//! exits 0. Anything else (a non-zero exit, a signal, garbage on stdout) is
//! a failed execution.

use crate::backend::Backend;
use crate::error::ExecutionError;
use opfuzz_common::TensorData;
use opfuzz_graph::Graph;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub graph: Graph,
    pub inputs: Vec<TensorData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResponse {
    Ok { outputs: Vec<TensorData> },
    Error { error: ExecutionError },
}

impl WorkerResponse {
    pub fn into_result(self) -> Result<Vec<TensorData>, ExecutionError> {
        match self {
            WorkerResponse::Ok { outputs } => Ok(outputs),
            WorkerResponse::Error { error } => Err(error),
        }
    }
}

impl From<Result<Vec<TensorData>, ExecutionError>> for WorkerResponse {
    fn from(result: Result<Vec<TensorData>, ExecutionError>) -> Self {
        match result {
            Ok(outputs) => WorkerResponse::Ok { outputs },
            Err(error) => WorkerResponse::Error { error },
        }
    }
}

/// Decode a worker's stdout.
pub fn decode_response(stdout: &[u8]) -> Result<Vec<TensorData>, ExecutionError> {
    let response: WorkerResponse = serde_json::from_slice(stdout).map_err(|e| {
        let head = String::from_utf8_lossy(&stdout[..stdout.len().min(200)]).into_owned();
        ExecutionError::protocol(format!("undecodable worker response ({e}): {head}"))
    })?;
    response.into_result()
}

pub fn encode_request(graph: &Graph, inputs: &[TensorData]) -> Result<Vec<u8>, ExecutionError> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        graph: &'a Graph,
        inputs: &'a [TensorData],
    }
    serde_json::to_vec(&Borrowed { graph, inputs }).map_err(|e| ExecutionError::protocol(e.to_string()))
}

/// Run one request through `backend`, containing panics.
pub fn handle(backend: &dyn Backend, request: &WorkerRequest) -> WorkerResponse {
    catch_unwind(AssertUnwindSafe(|| backend.execute(&request.graph, &request.inputs)))
        .unwrap_or_else(|payload| Err(ExecutionError::from_panic(payload)))
        .into()
}

/// Worker main loop body: read one request, answer it.
///
/// Only I/O failures on the pipes are returned as errors; a malformed
/// request is answered with a protocol error.
pub fn serve<R: Read, W: Write>(backend: &dyn Backend, mut reader: R, mut writer: W) -> io::Result<()> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    let response = match serde_json::from_slice::<WorkerRequest>(&raw) {
        Ok(request) => {
            debug!(backend = backend.name(), nodes = request.graph.nodes.len(), "worker executing");
            handle(backend, &request)
        }
        Err(e) => WorkerResponse::Error { error: ExecutionError::protocol(format!("malformed request: {e}")) },
    };
    serde_json::to_writer(&mut writer, &response).map_err(io::Error::other)?;
    writer.flush()
}
