//! Isolated, time-bounded backend execution.
//!
//! Process isolation runs each execution in a fresh worker process fed over
//! stdin/stdout, so aborts, stack overflows and runaway allocations stay in
//! the child. Thread isolation contains panics and detects hangs, but a hung
//! thread is abandoned rather than killed.

use crate::outcome::Execution;
use opfuzz_backends::{Backend, ExecutionError, decode_response, encode_request};
use opfuzz_common::{BackendConfig, ConfigError, IsolationMode, TensorData};
use opfuzz_graph::Graph;
use std::io::{Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// How to launch a worker: `program args.. --backend <name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// The running executable's `worker` subcommand.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["worker".to_string()]))
    }

    fn command(&self, backend: &str) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg("--backend").arg(backend);
        command
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Isolation {
    Thread,
    Process(WorkerCommand),
}

impl Isolation {
    /// Resolve `[backend].isolation`. Process isolation needs the command
    /// that starts a worker.
    pub fn from_mode(mode: IsolationMode, worker: Option<WorkerCommand>) -> Result<Self, ConfigError> {
        match mode {
            IsolationMode::Thread => Ok(Isolation::Thread),
            IsolationMode::Process => worker.map(Isolation::Process).ok_or_else(|| {
                ConfigError::invalid("backend.isolation", "process isolation needs a worker command")
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    /// Extra time allowed for collecting output after a worker exits.
    pub grace: Duration,
}

impl From<&BackendConfig> for Limits {
    fn from(config: &BackendConfig) -> Self {
        Self { timeout: config.timeout(), grace: config.grace() }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), grace: Duration::from_millis(500) }
    }
}

/// Execute `graph` on `backend` under `isolation`. Never blocks longer than
/// `limits.timeout + limits.grace` plus scheduling noise.
pub fn execute_isolated(
    backend: &Arc<dyn Backend>,
    isolation: &Isolation,
    graph: &Graph,
    inputs: &[TensorData],
    limits: Limits,
) -> Execution {
    match isolation {
        Isolation::Thread => in_thread(Arc::clone(backend), graph, inputs, limits),
        Isolation::Process(worker) => in_process(worker, backend.name(), graph, inputs, limits),
    }
}

fn in_thread(backend: Arc<dyn Backend>, graph: &Graph, inputs: &[TensorData], limits: Limits) -> Execution {
    let (tx, rx) = mpsc::channel();
    let graph = graph.clone();
    let inputs = inputs.to_vec();
    let name = format!("opfuzz-exec-{}", backend.name());
    let spawned = thread::Builder::new().name(name).spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(|| backend.execute(&graph, &inputs)))
            .unwrap_or_else(|payload| Err(ExecutionError::from_panic(payload)));
        // The receiver is gone when the execution already timed out.
        let _ = tx.send(result);
    });
    if let Err(e) = spawned {
        return Execution::Finished(Err(e.into()));
    }
    match rx.recv_timeout(limits.timeout) {
        Ok(result) => Execution::Finished(result),
        Err(RecvTimeoutError::Timeout) => {
            warn!(timeout_ms = limits.timeout.as_millis() as u64, "execution thread abandoned after timeout");
            Execution::TimedOut
        }
        Err(RecvTimeoutError::Disconnected) => Execution::Finished(Err(ExecutionError::Panicked {
            message: "execution thread exited without a result".to_string(),
        })),
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut bytes);
        }
        let _ = tx.send(bytes);
    });
    rx
}

fn terminate_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn describe_exit(status: ExitStatus, stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stderr).trim().to_string();
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("terminated by signal {signal}"));
        }
    }
    #[cfg(not(unix))]
    let _ = status;
    text
}

fn in_process(worker: &WorkerCommand, backend: &str, graph: &Graph, inputs: &[TensorData], limits: Limits) -> Execution {
    let request = match encode_request(graph, inputs) {
        Ok(request) => request,
        Err(e) => return Execution::Finished(Err(e)),
    };
    let spawned = worker
        .command(backend)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => return Execution::Finished(Err(e.into())),
    };
    let started = Instant::now();
    debug!(backend, pid = child.id(), "worker spawned");

    if let Some(mut stdin) = child.stdin.take() {
        thread::spawn(move || {
            // A worker that dies before reading is judged by its exit status.
            let _ = stdin.write_all(&request);
        });
    }
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                terminate_and_reap(&mut child);
                return Execution::Finished(Err(e.into()));
            }
        }
        if started.elapsed() >= limits.timeout {
            terminate_and_reap(&mut child);
            warn!(backend, timeout_ms = limits.timeout.as_millis() as u64, "worker killed after timeout");
            return Execution::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let deadline = Instant::now() + limits.grace;
    let stdout = stdout.recv_timeout(limits.grace).unwrap_or_default();
    let stderr = stderr.recv_timeout(deadline.saturating_duration_since(Instant::now())).unwrap_or_default();
    if !status.success() {
        return Execution::Finished(Err(ExecutionError::AbnormalExit {
            code: status.code(),
            stderr: describe_exit(status, &stderr),
        }));
    }
    Execution::Finished(decode_response(&stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfuzz_backends::{FaultMode, FaultyBackend, ReferenceBackend};
    use opfuzz_common::{DType, TensorSpec};
    use opfuzz_graph::{GRAPH_FORMAT_VERSION, GraphNode, NodeKind, TensorRef};

    fn relu_graph() -> Graph {
        let spec = TensorSpec::new(vec![3], DType::Float32);
        Graph {
            version: GRAPH_FORMAT_VERSION,
            seed: 2,
            nodes: vec![
                GraphNode { id: 0, kind: NodeKind::Input, inputs: vec![], outputs: vec![spec.clone()] },
                GraphNode {
                    id: 1,
                    kind: NodeKind::Op { op: "relu".to_string(), attrs: vec![] },
                    inputs: vec![TensorRef::new(0, 0)],
                    outputs: vec![spec],
                },
            ],
            inputs: vec![0],
            outputs: vec![TensorRef::new(1, 0)],
        }
    }

    fn limits(ms: u64) -> Limits {
        Limits { timeout: Duration::from_millis(ms), grace: Duration::from_millis(100) }
    }

    #[test]
    fn thread_isolation_runs_and_contains_panics() {
        let graph = relu_graph();
        let inputs = opfuzz_backends::materialize(&graph);
        let good: Arc<dyn Backend> = Arc::new(ReferenceBackend::f64());
        assert!(matches!(
            execute_isolated(&good, &Isolation::Thread, &graph, &inputs, limits(5_000)),
            Execution::Finished(Ok(_))
        ));
        let bad: Arc<dyn Backend> = Arc::new(FaultyBackend::new(FaultMode::Panic, None));
        assert!(matches!(
            execute_isolated(&bad, &Isolation::Thread, &graph, &inputs, limits(5_000)),
            Execution::Finished(Err(ExecutionError::Panicked { .. }))
        ));
    }

    #[test]
    fn thread_isolation_times_out() {
        let graph = relu_graph();
        let hang: Arc<dyn Backend> = Arc::new(FaultyBackend::new(FaultMode::Hang, None));
        let started = Instant::now();
        let execution = execute_isolated(&hang, &Isolation::Thread, &graph, &[], limits(150));
        assert!(matches!(execution, Execution::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn process_isolation_kills_hung_worker() {
        let worker = WorkerCommand::new("sh", vec!["-c".to_string(), "sleep 30".to_string()]);
        let backend: Arc<dyn Backend> = Arc::new(ReferenceBackend::f64());
        let started = Instant::now();
        let execution = execute_isolated(&backend, &Isolation::Process(worker), &relu_graph(), &[], limits(200));
        assert!(matches!(execution, Execution::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn process_isolation_reports_abnormal_exit() {
        let script = "cat > /dev/null; echo 'worker aborted' >&2; kill -ABRT $$";
        let worker = WorkerCommand::new("sh", vec!["-c".to_string(), script.to_string()]);
        let backend: Arc<dyn Backend> = Arc::new(ReferenceBackend::f64());
        match execute_isolated(&backend, &Isolation::Process(worker), &relu_graph(), &[], limits(5_000)) {
            Execution::Finished(Err(ExecutionError::AbnormalExit { code, stderr })) => {
                assert_eq!(code, None);
                assert!(stderr.contains("worker aborted"), "{stderr}");
                assert!(stderr.contains("signal 6"), "{stderr}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn process_isolation_decodes_worker_response() {
        let script = r#"cat > /dev/null; printf '{"status":"error","error":{"kind":"rejected","reason":"no"}}'"#;
        let worker = WorkerCommand::new("sh", vec!["-c".to_string(), script.to_string()]);
        let backend: Arc<dyn Backend> = Arc::new(ReferenceBackend::f64());
        let execution = execute_isolated(&backend, &Isolation::Process(worker), &relu_graph(), &[], limits(5_000));
        assert!(matches!(execution, Execution::Finished(Err(ExecutionError::Rejected { .. }))));
    }
}
