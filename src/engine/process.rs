//! Inference engine running as a child process
//!
//! Protocol over the child's stdio, one JSON document per line:
//! - the engine prints `{"ready":true}` once the model is loaded, or
//!   `{"error":"..."}` if loading failed
//! - each request is `{"prompts":[...],"sampling_params":{...}}`
//! - each response is `{"outputs":[{"index":0,"text":"..."}]}` or
//!   `{"error":"..."}`
//!
//! Non-JSON stdout lines are treated as engine logs. The child is killed
//! when the engine is dropped.

use super::{EngineFactory, EngineOptions, GenerationOutput, InferenceEngine, SamplingParams};
use crate::error::{LifecycleError, LifecycleResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Configuration for the engine process
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine name, recorded as the `framework` label
    pub name: String,
    pub binary_path: String,
    /// Arguments placed before the generated `--model/--tokenizer/--options`
    pub args: Vec<String>,
    pub startup_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Default engine options, overridden per call
    pub options: EngineOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "vllm".to_string(),
            binary_path: "vllm-batch-runner".to_string(),
            args: Vec::new(),
            startup_timeout_secs: 600, // large models take minutes to load
            request_timeout_secs: 600,
            options: EngineOptions::new(),
        }
    }
}

#[derive(Serialize)]
struct EngineRequest<'a> {
    prompts: &'a [String],
    sampling_params: &'a SamplingParams,
}

#[derive(Debug, Deserialize)]
struct EngineMessage {
    #[serde(default)]
    ready: Option<bool>,
    #[serde(default)]
    outputs: Option<Vec<GenerationOutput>>,
    #[serde(default)]
    error: Option<String>,
}

/// Spawns one engine process per build
pub struct ProcessEngineFactory {
    config: EngineConfig,
}

impl ProcessEngineFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn command(
        &self,
        model_location: &str,
        tokenizer_dir: &Path,
        options: &EngineOptions,
    ) -> LifecycleResult<Command> {
        let options_json = serde_json::to_string(options).map_err(|e| {
            LifecycleError::EngineConstruction(format!("Failed to encode engine options: {}", e))
        })?;

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(&self.config.args)
            .arg("--model")
            .arg(model_location)
            .arg("--tokenizer")
            .arg(tokenizer_dir)
            .arg("--options")
            .arg(options_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }
}

#[async_trait]
impl EngineFactory for ProcessEngineFactory {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn build(
        &self,
        model_location: &str,
        tokenizer_dir: &Path,
        options: &EngineOptions,
    ) -> LifecycleResult<Box<dyn InferenceEngine>> {
        tracing::debug!(
            binary = %self.config.binary_path,
            model = %model_location,
            tokenizer = ?tokenizer_dir,
            "Spawning engine process"
        );

        let mut child = self
            .command(model_location, tokenizer_dir, options)?
            .spawn()
            .map_err(|e| {
                LifecycleError::EngineConstruction(format!("Failed to spawn engine process: {}", e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LifecycleError::EngineConstruction("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LifecycleError::EngineConstruction("Failed to capture stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let engine = self.config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::trace!(engine = %engine, line = %line, "Engine output");
                }
            });
        }

        let mut io = EngineIo {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let startup = Duration::from_secs(self.config.startup_timeout_secs);
        match timeout(startup, io.wait_for_ready()).await {
            Ok(Ok(())) => {
                tracing::info!(engine = %self.config.name, model = %model_location, "Engine ready");
            }
            Ok(Err(e)) => {
                tracing::error!(engine = %self.config.name, error = %e, "Engine failed to start");
                return Err(e);
            }
            Err(_) => {
                tracing::error!(
                    engine = %self.config.name,
                    timeout_secs = self.config.startup_timeout_secs,
                    "Engine startup timed out"
                );
                return Err(LifecycleError::EngineConstruction(format!(
                    "Timeout after {}s waiting for engine to load",
                    self.config.startup_timeout_secs
                )));
            }
        }

        Ok(Box::new(ProcessEngine {
            io: Mutex::new(io),
            request_timeout: Duration::from_secs(self.config.request_timeout_secs),
        }))
    }
}

struct EngineIo {
    // Held so the process is killed on drop
    #[allow(dead_code)]
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl EngineIo {
    /// Next stdout line that parses as a protocol message
    async fn next_message(&mut self) -> std::io::Result<Option<EngineMessage>> {
        while let Some(line) = self.stdout.next_line().await? {
            match serde_json::from_str::<EngineMessage>(&line) {
                Ok(message) => return Ok(Some(message)),
                Err(_) => tracing::trace!(line = %line, "Engine output"),
            }
        }
        Ok(None)
    }

    async fn wait_for_ready(&mut self) -> LifecycleResult<()> {
        loop {
            let message = self
                .next_message()
                .await
                .map_err(|e| LifecycleError::EngineConstruction(e.to_string()))?;

            match message {
                Some(EngineMessage {
                    error: Some(error), ..
                }) => return Err(LifecycleError::EngineConstruction(error)),
                Some(EngineMessage {
                    ready: Some(true), ..
                }) => return Ok(()),
                Some(_) => continue,
                None => {
                    return Err(LifecycleError::EngineConstruction(
                        "engine process exited before becoming ready".to_string(),
                    ));
                }
            }
        }
    }

    async fn request(
        &mut self,
        prompts: &[String],
        params: &SamplingParams,
    ) -> LifecycleResult<Vec<GenerationOutput>> {
        let mut line = serde_json::to_vec(&EngineRequest {
            prompts,
            sampling_params: params,
        })
        .map_err(|e| LifecycleError::Generation(format!("Failed to encode request: {}", e)))?;
        line.push(b'\n');

        self.stdin
            .write_all(&line)
            .await
            .map_err(|e| LifecycleError::Generation(format!("Failed to send prompts: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| LifecycleError::Generation(format!("Failed to send prompts: {}", e)))?;

        loop {
            let message = self
                .next_message()
                .await
                .map_err(|e| LifecycleError::Generation(e.to_string()))?;

            match message {
                Some(EngineMessage {
                    error: Some(error), ..
                }) => return Err(LifecycleError::Generation(error)),
                Some(EngineMessage {
                    outputs: Some(outputs),
                    ..
                }) => return Ok(outputs),
                Some(_) => continue,
                None => {
                    return Err(LifecycleError::Generation(
                        "engine process exited during generation".to_string(),
                    ));
                }
            }
        }
    }
}

/// Engine backed by a running child process
///
/// Requests are serialized; the process handles one batch at a time.
struct ProcessEngine {
    io: Mutex<EngineIo>,
    request_timeout: Duration,
}

#[async_trait]
impl InferenceEngine for ProcessEngine {
    async fn generate(
        &self,
        prompts: &[String],
        params: &SamplingParams,
    ) -> LifecycleResult<Vec<GenerationOutput>> {
        let mut io = self.io.lock().await;
        match timeout(self.request_timeout, io.request(prompts, params)).await {
            Ok(result) => result,
            Err(_) => Err(LifecycleError::Generation(format!(
                "Timeout after {}s waiting for generation",
                self.request_timeout.as_secs()
            ))),
        }
    }
}
