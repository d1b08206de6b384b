// src/sandbox/mod.rs — Process-isolated code execution
//
// Every `execute` spawns a fresh worker (`<exe> sandbox-worker`), feeds it the
// persistent namespace plus the code, and collects one JSON response. The
// namespace lives here in the parent, so a crashed or killed worker loses
// nothing but the bindings from that one block.

pub mod engine;
pub mod protocol;
pub mod worker;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::core::truncation::tail_chars;
use crate::core::types::ExecutionResult;
use crate::infra::config::{RlmConfig, SandboxMode};
use crate::infra::errors::RlmError;
use crate::tools::{Tool, ToolRegistry};

use protocol::{Namespace, WorkerRequest, WorkerResponse, FINAL_ANSWER_VAR, WORKER_SUBCOMMAND};

/// Time a worker gets to exit after SIGTERM before it is killed outright.
const TERM_GRACE: Duration = Duration::from_millis(200);

/// How much worker stderr to quote when a worker dies without a response.
const CRASH_STDERR_TAIL: usize = 2_000;

pub struct Sandbox {
    program: PathBuf,
    mode: SandboxMode,
    max_print_chars: usize,
    namespace: Namespace,
    tools: ToolRegistry,
    started: bool,
    spawns: u64,
}

impl Sandbox {
    /// A sandbox whose workers are this same executable.
    pub fn new(config: &RlmConfig) -> Result<Self, RlmError> {
        let program = std::env::current_exe()?;
        Ok(Self::with_program(config, program))
    }

    /// A sandbox that launches `program sandbox-worker` for each execution.
    pub fn with_program(config: &RlmConfig, program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            mode: config.sandbox_mode,
            max_print_chars: config.max_print_chars,
            namespace: Namespace::new(),
            tools: ToolRegistry::new(),
            started: false,
            spawns: 0,
        }
    }

    pub fn start(&mut self) -> Result<(), RlmError> {
        if self.mode == SandboxMode::Strict {
            return Err(RlmError::NotImplemented(
                "strict sandbox mode (container isolation)".into(),
            ));
        }
        self.namespace.clear();
        self.started = true;
        tracing::debug!(program = %self.program.display(), "Sandbox started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.started
    }

    /// Run one block in a fresh worker. Script-level failures, timeouts and
    /// worker crashes come back as a failed `ExecutionResult`; only a worker
    /// that cannot be launched at all is an `Err`.
    pub async fn execute(
        &mut self,
        code: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, RlmError> {
        self.execute_with(code, &[], timeout).await
    }

    /// Like `execute`, with extra bindings visible to this block only. They are
    /// never added to the persistent namespace.
    pub async fn execute_with(
        &mut self,
        code: &str,
        bindings: &[(String, Value)],
        timeout: Duration,
    ) -> Result<ExecutionResult, RlmError> {
        if !self.started {
            return Err(RlmError::Sandbox("sandbox is not running".into()));
        }

        let mut namespace = self.namespace.clone();
        namespace.extend(bindings.iter().cloned());
        let request = WorkerRequest {
            code: code.to_string(),
            namespace,
            stubs: self.tools.names(),
            max_print_chars: self.max_print_chars,
        };
        let payload = serde_json::to_vec(&request)?;

        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .arg(WORKER_SUBCOMMAND)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RlmError::Sandbox(format!(
                    "failed to launch worker '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;
        self.spawns += 1;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(err) = stderr.as_mut() {
                let _ = err.read_to_end(&mut buf).await;
            }
            buf
        });

        let mut stdin = child.stdin.take();
        let run = async {
            if let Some(pipe) = stdin.as_mut() {
                // A worker that dies early closes the pipe; the exit status says why.
                if let Err(e) = pipe.write_all(&payload).await {
                    tracing::debug!(error = %e, "Worker stdin closed early");
                }
            }
            drop(stdin.take());
            child.wait().await
        };

        let waited = tokio::time::timeout(timeout, run).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                let elapsed = start.elapsed().as_millis() as u64;
                tracing::warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    "Sandbox execution timed out; worker killed"
                );
                return Ok(ExecutionResult {
                    timed_out: true,
                    ..ExecutionResult::failure(
                        format!(
                            "Execution timed out after {}s; worker process was killed",
                            format_secs(timeout)
                        ),
                        elapsed,
                    )
                });
            }
        };

        let out = stdout_task.await.unwrap_or_default();
        let err = stderr_task.await.unwrap_or_default();
        let elapsed = start.elapsed().as_millis() as u64;

        let response = match serde_json::from_slice::<WorkerResponse>(&out) {
            Ok(response) => response,
            Err(parse_err) => {
                let stderr_text = String::from_utf8_lossy(&err);
                tracing::warn!(
                    %status,
                    error = %parse_err,
                    "Sandbox worker produced no response"
                );
                return Ok(ExecutionResult::failure(
                    format!(
                        "Worker process crashed ({}) without producing a result. stderr: {}",
                        status,
                        tail_chars(stderr_text.trim(), CRASH_STDERR_TAIL)
                    ),
                    elapsed,
                ));
            }
        };

        tracing::debug!(
            success = response.success,
            updates = response.updates.len(),
            elapsed_ms = elapsed,
            "Sandbox execution finished"
        );

        // Bindings made before a runtime error still persist.
        self.namespace.extend(response.updates);

        Ok(ExecutionResult {
            success: response.success,
            stdout: response.stdout,
            stderr: response.stderr,
            error: response.error,
            final_answer: response.final_answer,
            execution_time_ms: elapsed,
            timed_out: false,
        })
    }

    /// Bind `name` in the namespace seen by every later execution.
    pub fn inject_variable<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
    ) -> Result<(), RlmError> {
        if !is_identifier(name) || name == FINAL_ANSWER_VAR {
            return Err(RlmError::NotTransferable {
                name: name.to_string(),
                reason: "not a bindable identifier".into(),
            });
        }
        let value = serde_json::to_value(value).map_err(|e| RlmError::NotTransferable {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.namespace.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.namespace.get(name)
    }

    /// Expose a host tool to scripts. Calls are resolved by the interceptor
    /// before the worker runs; inside the worker the name is a raising stub.
    pub fn register_callback(&mut self, tool: Arc<dyn Tool>) {
        self.tools.register(tool);
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Number of workers launched so far.
    pub fn spawn_count(&self) -> u64 {
        self.spawns
    }

    /// Idempotent. Drops every binding and registered tool.
    pub fn stop(&mut self) {
        if self.started {
            tracing::debug!(spawns = self.spawns, "Sandbox stopped");
        }
        self.started = false;
        self.namespace.clear();
        self.tools.clear();
    }
}

/// SIGTERM, a short grace period, then SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .status()
                .await;
            if let Ok(Ok(_)) = tokio::time::timeout(TERM_GRACE, child.wait()).await {
                return;
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill sandbox worker");
    }
}

fn format_secs(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}", secs as u64)
    } else {
        format!("{:.1}", secs)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
