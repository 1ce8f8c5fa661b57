//! Compiled-Language Judge
//!
//! One `execute` call is one invocation: fresh workspace, optional compile
//! step under its own timeout, one bounded run, workspace removed on return.
//! Nothing is shared between invocations except the read-only registry.
//!
//! Compile errors, runtime errors, TLE and output overflow come back as an
//! `ExecutionResult`. `Err` is reserved for requests that cannot be judged
//! (unknown language, bad request) and for failures of the host itself.

use crate::command::{self, Placeholders};
use crate::entry;
use crate::process::{run_bounded, OutputLimits, ProcessOutcome, RunSpec, Termination};
use crate::workspace::Workspace;
use capsule_common::config::{env_or, env_string};
use capsule_common::languages::{LanguageRegistry, LanguageSpec, DEFAULT_COMPILE_TIMEOUT_SECS};
use capsule_common::types::{
    ErrorKind, ExecuteRequest, ExecutionError, ExecutionResult, Tier, TLE_EXIT_CODE, TLE_MESSAGE,
};
use capsule_common::{CapsuleError, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Reported for a run killed because stdout went past its cap
pub const OVERFLOW_EXIT_CODE: i32 = 137;

/// Binary name inside the workspace for languages that produce one
const BINARY_NAME: &str = "main";

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub workspace_root: PathBuf,
    /// Used for languages that do not set their own compile timeout
    pub compile_timeout: Duration,
    pub output_limits: OutputLimits,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("capsule-judge"),
            compile_timeout: Duration::from_secs(DEFAULT_COMPILE_TIMEOUT_SECS),
            output_limits: OutputLimits::default(),
        }
    }
}

impl JudgeConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let root = env_string(
            "WORKSPACE_ROOT",
            &defaults.workspace_root.display().to_string(),
        );
        Ok(Self {
            workspace_root: PathBuf::from(root),
            compile_timeout: Duration::from_secs(env_or(
                "COMPILE_TIMEOUT_SECS",
                DEFAULT_COMPILE_TIMEOUT_SECS,
            )?),
            output_limits: defaults.output_limits,
        })
    }
}

pub struct Judge {
    registry: Arc<LanguageRegistry>,
    config: JudgeConfig,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

fn spawn_failure(phase: &str, program: &str, e: io::Error) -> CapsuleError {
    if e.kind() == io::ErrorKind::NotFound {
        CapsuleError::Infrastructure(format!("{} program '{}' not found", phase, program))
    } else {
        CapsuleError::Infrastructure(format!("failed to start {} program '{}': {}", phase, program, e))
    }
}

impl Judge {
    pub fn new(registry: Arc<LanguageRegistry>, config: JudgeConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    fn compile_timeout(&self, spec: &LanguageSpec) -> Duration {
        spec.compile_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.compile_timeout)
    }

    #[instrument(skip(self, request), fields(language = %request.language))]
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<ExecutionResult> {
        request.validate()?;
        let spec = self.registry.resolve(&request.language)?;
        if spec.tier != Tier::Compiled {
            return Err(CapsuleError::InvalidRequest(format!(
                "language '{}' is not a compiled language",
                spec.name
            )));
        }
        let run_template = spec.run_command.as_deref().ok_or_else(|| {
            CapsuleError::Config(format!("language '{}' has no run_command", spec.name))
        })?;

        let limits = spec.limits(request.time_limit);
        let entry = match &spec.entry_point {
            Some(rule) => entry::resolve(rule, request.entry_point.as_deref(), &request.source_code)?,
            None => String::new(),
        };

        // dropped on every return below, which removes the directory
        let workspace = Workspace::create(&self.config.workspace_root).map_err(|e| {
            CapsuleError::Infrastructure(format!("failed to create workspace: {}", e))
        })?;

        let stem = if entry.is_empty() { BINARY_NAME } else { entry.as_str() };
        let source_path = workspace.file(&format!("{}.{}", stem, spec.file_extension));
        let binary_path = workspace.file(BINARY_NAME);
        tokio::fs::write(&source_path, &request.source_code)
            .await
            .map_err(|e| CapsuleError::Infrastructure(format!("failed to write source: {}", e)))?;

        let values = Placeholders::new(
            workspace.path(),
            &source_path,
            &binary_path,
            &entry,
            limits.memory_limit_mb,
        );
        let env = command::expand_env(&spec.env, &values);

        info!(
            execution_id = %workspace.execution_id(),
            language = %spec.name,
            source_bytes = request.source_code.len(),
            stdin_bytes = request.stdin().len(),
            time_limit_ms = millis(limits.time_limit),
            "Judging submission"
        );

        let mut compilation_time_ms = None;
        if let Some(template) = &spec.compile_command {
            let compile = command::expand(template, &values)?;
            let timeout = self.compile_timeout(spec);
            let program = compile.program.clone();
            let outcome = run_bounded(RunSpec {
                program: compile.program,
                args: compile.args,
                cwd: workspace.path().to_path_buf(),
                env: env.clone(),
                stdin: String::new(),
                time_limit: timeout,
                limits: self.config.output_limits,
            })
            .await
            .map_err(|e| spawn_failure("compiler", &program, e))?;

            compilation_time_ms = Some(millis(outcome.elapsed));
            if outcome.termination != Termination::Exited(0) {
                let result = compile_failure(outcome, timeout);
                info!(
                    execution_id = %workspace.execution_id(),
                    exit_code = result.exit_code,
                    compile_ms = compilation_time_ms.unwrap_or_default(),
                    "Compilation failed"
                );
                return Ok(result);
            }
        }

        let run = command::expand(run_template, &values)?;
        let program = run.program.clone();
        let outcome = run_bounded(RunSpec {
            program: run.program,
            args: run.args,
            cwd: workspace.path().to_path_buf(),
            env,
            stdin: request.stdin().to_string(),
            time_limit: limits.time_limit,
            limits: self.config.output_limits,
        })
        .await
        .map_err(|e| spawn_failure("run", &program, e))?;

        let result = run_result(outcome, compilation_time_ms, self.config.output_limits);
        info!(
            execution_id = %workspace.execution_id(),
            exit_code = result.exit_code,
            success = result.success,
            execution_ms = result.execution_time_ms.unwrap_or_default(),
            "Run finished"
        );
        if result.error_kind() == Some(ErrorKind::OutputOverflow) {
            warn!(execution_id = %workspace.execution_id(), "Output cap exceeded, process killed");
        }
        Ok(result)
    }
}

fn compile_failure(outcome: ProcessOutcome, timeout: Duration) -> ExecutionResult {
    let (exit_code, diagnostics, message) = match outcome.termination {
        Termination::TimedOut => {
            let text = format!("Compilation timed out after {}s", timeout.as_secs());
            (1, text.clone(), text)
        }
        Termination::Exited(code) => {
            let diagnostics = if outcome.stderr.trim().is_empty() {
                outcome.stdout
            } else {
                outcome.stderr
            };
            (code, diagnostics, format!("Compilation failed with exit code {}", code))
        }
        Termination::OutputOverflow => {
            let diagnostics = if outcome.stderr.trim().is_empty() {
                outcome.stdout
            } else {
                outcome.stderr
            };
            (
                1,
                diagnostics,
                "Compilation failed: compiler output exceeded the cap".to_string(),
            )
        }
    };

    ExecutionResult {
        success: false,
        stdout: String::new(),
        stderr: diagnostics,
        exit_code,
        execution_time_ms: None,
        compilation_time_ms: Some(millis(outcome.elapsed)),
        error: Some(ExecutionError {
            kind: ErrorKind::CompilationError,
            message,
        }),
    }
}

fn run_result(
    outcome: ProcessOutcome,
    compilation_time_ms: Option<u64>,
    limits: OutputLimits,
) -> ExecutionResult {
    let execution_time_ms = Some(millis(outcome.elapsed));
    let (success, exit_code, stderr, error) = match outcome.termination {
        Termination::Exited(0) => (true, 0, outcome.stderr, None),
        Termination::Exited(code) => (
            false,
            code,
            outcome.stderr,
            Some(ExecutionError {
                kind: ErrorKind::RuntimeError,
                message: format!("Process exited with code {}", code),
            }),
        ),
        Termination::TimedOut => (
            false,
            TLE_EXIT_CODE,
            TLE_MESSAGE.to_string(),
            Some(ExecutionError {
                kind: ErrorKind::TimeoutError,
                message: TLE_MESSAGE.to_string(),
            }),
        ),
        Termination::OutputOverflow => {
            let note = format!("Output limit exceeded ({} characters)", limits.stdout_chars);
            let stderr = if outcome.stderr.is_empty() {
                note.clone()
            } else {
                format!("{}\n{}", outcome.stderr, note)
            };
            (
                false,
                OVERFLOW_EXIT_CODE,
                stderr,
                Some(ExecutionError {
                    kind: ErrorKind::OutputOverflow,
                    message: note,
                }),
            )
        }
    };

    ExecutionResult {
        success,
        stdout: outcome.stdout,
        stderr,
        exit_code,
        execution_time_ms,
        compilation_time_ms,
        error,
    }
}
