//! Backends implemented by an external program speaking the worker protocol.

use crate::backend::Backend;
use crate::error::ExecutionError;
use crate::protocol::{decode_response, encode_request};
use opfuzz_common::TensorData;
use opfuzz_graph::Graph;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// `command:<program> [args..]`: spawns `program` per execution, writes a
/// worker request to its stdin and reads the response from stdout.
///
/// Hangs are not bounded here; the runner's isolation layer owns timeouts.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        let name = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        Self { name: format!("command:{name}"), program, args }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Backend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, graph: &Graph, inputs: &[TensorData]) -> Result<Vec<TensorData>, ExecutionError> {
        let request = encode_request(graph, inputs)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        debug!(backend = %self.name, pid = child.id(), "spawned command backend");
        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading its input is judged by its exit status.
            if let Err(e) = stdin.write_all(&request) {
                debug!(backend = %self.name, error = %e, "stdin closed early");
            }
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ExecutionError::AbnormalExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        decode_response(&output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use opfuzz_common::{DType, TensorSpec};
    use opfuzz_graph::{GRAPH_FORMAT_VERSION, GraphNode, NodeKind};

    fn source_only() -> Graph {
        let spec = TensorSpec::new(vec![1], DType::Float32);
        Graph {
            version: GRAPH_FORMAT_VERSION,
            seed: 0,
            nodes: vec![GraphNode { id: 0, kind: NodeKind::Input, inputs: vec![], outputs: vec![spec] }],
            inputs: vec![0],
            outputs: vec![],
        }
    }

    fn sh(script: &str) -> CommandBackend {
        CommandBackend::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn name_includes_arguments() {
        assert_eq!(sh("true").name(), "command:sh -c true");
    }

    #[test]
    fn canned_ok_response_is_decoded() {
        let backend = sh(r#"cat > /dev/null; printf '{"status":"ok","outputs":[]}'"#);
        assert_eq!(backend.execute(&source_only(), &[]).unwrap(), vec![]);
    }

    #[test]
    fn non_zero_exit_is_abnormal() {
        let backend = sh("cat > /dev/null; echo segfault >&2; exit 139");
        match backend.execute(&source_only(), &[]) {
            Err(ExecutionError::AbnormalExit { code, stderr }) => {
                assert_eq!(code, Some(139));
                assert_eq!(stderr, "segfault");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_io_error() {
        let backend = CommandBackend::new("/nonexistent/opfuzz-backend", vec![]);
        assert!(matches!(backend.execute(&source_only(), &[]), Err(ExecutionError::Io { .. })));
    }
}
