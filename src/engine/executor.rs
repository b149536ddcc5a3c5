//! Executor pools that run named steps.
//!
//! Each pool is reached either by spawning a worker command once per attempt
//! or by POSTing to a worker's HTTP endpoint. Both speak the same JSON
//! envelope:
//!
//! - request: `{"step", "activity_id", "attempt", "input"}`
//! - reply: `{"ok": <value>}` or `{"error": {"message", "retryable"}}`

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::ExecutorConfig;
use crate::core::StepFailure;

/// Payload delivered to a worker for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub step: String,
    pub activity_id: String,
    pub attempt: u32,
    pub input: Value,
}

/// Worker reply envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepReply {
    Ok(Value),
    Error {
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

impl StepReply {
    pub fn into_result(self) -> Result<Value, StepFailure> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Error {
                message,
                retryable: true,
            } => Err(StepFailure::transient(message)),
            Self::Error { message, .. } => Err(StepFailure::terminal(message)),
        }
    }
}

/// A pool of workers able to run steps
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Run one attempt. Timeouts are enforced by the caller.
    async fn execute(&self, request: &StepRequest) -> Result<Value, StepFailure>;
}

/// Executor that spawns a worker process per attempt
pub struct ProcessExecutor {
    /// Program to run
    command: String,

    /// Arguments placed before the step name
    args: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl StepExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        &self.command
    }

    async fn execute(&self, request: &StepRequest) -> Result<Value, StepFailure> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| StepFailure::engine(format!("Failed to encode step request: {}", e)))?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(&request.step)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StepFailure::transient(format!("Failed to spawn worker '{}': {}", self.command, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await.map_err(|e| {
                StepFailure::transient(format!("Failed to write to worker stdin: {}", e))
            })?;
            // Drop stdin to signal EOF
        }

        let output = child.wait_with_output().await.map_err(|e| {
            StepFailure::transient(format!("Failed to wait for worker '{}': {}", self.command, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(StepFailure::transient(format!(
                "Worker '{}' exited with code {}: {}",
                self.command,
                exit_code,
                stderr.trim()
            )));
        }

        let reply: StepReply = serde_json::from_slice(&output.stdout).map_err(|e| {
            StepFailure::terminal(format!("Worker '{}' sent an invalid reply: {}", self.command, e))
        })?;

        reply.into_result()
    }
}

/// Executor that POSTs attempts to `<url>/<step>`
pub struct HttpExecutor {
    url: String,
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn step_url(&self, step: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), step)
    }
}

#[async_trait]
impl StepExecutor for HttpExecutor {
    fn name(&self) -> &str {
        &self.url
    }

    async fn execute(&self, request: &StepRequest) -> Result<Value, StepFailure> {
        let response = self
            .client
            .post(self.step_url(&request.step))
            .json(request)
            .send()
            .await
            .map_err(|e| StepFailure::transient(format!("Failed to reach worker: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StepFailure::transient(format!("Worker returned {}", status)));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(StepFailure::terminal(format!(
                "Worker rejected request ({}): {}",
                status,
                body.trim()
            )));
        }

        let reply: StepReply = response
            .json()
            .await
            .map_err(|e| StepFailure::terminal(format!("Worker sent an invalid reply: {}", e)))?;

        reply.into_result()
    }
}

/// Executor pools addressed by name
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    pools: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build executors for every configured pool
    pub fn from_config(pools: &HashMap<String, ExecutorConfig>) -> Self {
        let mut registry = Self::new();
        for (pool, config) in pools {
            let executor: Arc<dyn StepExecutor> = match config {
                ExecutorConfig::Process { command, args } => {
                    Arc::new(ProcessExecutor::new(command.clone(), args.clone()))
                }
                ExecutorConfig::Http { url } => Arc::new(HttpExecutor::new(url.clone())),
            };
            registry.register(pool.clone(), executor);
        }
        registry
    }

    pub fn register(&mut self, pool: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        self.pools.insert(pool.into(), executor);
    }

    pub fn with(mut self, pool: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        self.register(pool, executor);
        self
    }

    pub fn get(&self, pool: &str) -> Option<&Arc<dyn StepExecutor>> {
        self.pools.get(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_envelope() {
        let ok: StepReply = serde_json::from_value(json!({ "ok": "mocked-s3-link" })).unwrap();
        assert_eq!(ok.into_result(), Ok(json!("mocked-s3-link")));

        let retry: StepReply =
            serde_json::from_value(json!({ "error": { "message": "busy", "retryable": true } }))
                .unwrap();
        assert_eq!(retry.into_result(), Err(StepFailure::transient("busy")));

        let fatal: StepReply =
            serde_json::from_value(json!({ "error": { "message": "bad input" } })).unwrap();
        assert_eq!(fatal.into_result(), Err(StepFailure::terminal("bad input")));
    }

    #[test]
    fn test_http_step_url() {
        let executor = HttpExecutor::new("http://localhost:8002/steps/");
        assert_eq!(
            executor.step_url("ValidateText"),
            "http://localhost:8002/steps/ValidateText"
        );
    }

    #[test]
    fn test_registry_from_config() {
        let mut pools = HashMap::new();
        pools.insert(
            "ts-worker".to_string(),
            ExecutorConfig::Process {
                command: "node".to_string(),
                args: vec!["worker.js".to_string()],
            },
        );
        pools.insert(
            "python-worker".to_string(),
            ExecutorConfig::Http {
                url: "http://localhost:8002/steps".to_string(),
            },
        );

        let registry = ExecutorRegistry::from_config(&pools);
        assert_eq!(registry.get("ts-worker").unwrap().name(), "node");
        assert_eq!(
            registry.get("python-worker").unwrap().name(),
            "http://localhost:8002/steps"
        );
        assert!(registry.get("go-worker").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_executor_reads_reply() {
        let executor = ProcessExecutor::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"cat > /dev/null; echo '{"ok": true}'"#.to_string(),
                "worker".to_string(),
            ],
        );
        let request = StepRequest {
            step: "ValidateText".to_string(),
            activity_id: "id".to_string(),
            attempt: 1,
            input: json!("Mocked MIDIText"),
        };

        assert_eq!(executor.execute(&request).await, Ok(json!(true)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_executor_nonzero_exit_is_transient() {
        let executor = ProcessExecutor::new(
            "sh",
            vec!["-c".to_string(), "cat > /dev/null; echo nope >&2; exit 3".to_string(), "worker".to_string()],
        );
        let request = StepRequest {
            step: "ValidateText".to_string(),
            activity_id: "id".to_string(),
            attempt: 1,
            input: json!("text"),
        };

        let failure = executor.execute(&request).await.unwrap_err();
        assert!(failure.is_transient());
        assert!(failure.to_string().contains("nope"));
    }
}
