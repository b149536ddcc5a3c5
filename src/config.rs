//! Configuration for midiflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MIDIFLOW_HOME)
//! 2. Config file (.midiflow/config.yaml)
//! 3. Defaults (~/.midiflow, local HTTP workers, production step tuning)
//!
//! Config file discovery:
//! - Searches current directory and parents for .midiflow/config.yaml
//! - `paths.home` is relative to the .midiflow/ directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{RetryPolicy, StageOptions, StepKind, StepOptions, StepRoutes, WorkflowOptions};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Default endpoint of the text synthesis worker
pub const DEFAULT_TEXT_WORKER_URL: &str = "http://localhost:8001/steps";

/// Default endpoint of the validation / file worker
pub const DEFAULT_FILE_WORKER_URL: &str = "http://localhost:8002/steps";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Executor pools by name
    #[serde(default)]
    pub executors: HashMap<String, ExecutorConfig>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .midiflow/)
    pub home: Option<String>,
}

/// How a pool's workers are reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// Spawn `command [args..] <step>` per attempt
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// POST attempts to `<url>/<step>`
    Http { url: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub validation: StageOptions,
    #[serde(default)]
    pub generation: StageOptions,
    #[serde(default)]
    pub steps: StepsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepsConfig {
    pub generate_candidate_text: Option<StepConfig>,
    pub validate_text: Option<StepConfig>,
    pub materialize_artifact: Option<StepConfig>,
}

/// Per-step overrides; anything unset keeps its default
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepConfig {
    /// Registered step name the workers dispatch on
    pub name: Option<String>,
    pub pool: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
}

impl StepConfig {
    fn apply(&self, options: &mut StepOptions) {
        if let Some(name) = &self.name {
            options.name = name.clone();
        }
        if let Some(pool) = &self.pool {
            options.route.pool = pool.clone();
        }
        if let Some(secs) = self.timeout_seconds {
            options.route.timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = &self.retry_policy {
            options.retry_policy = policy.clone();
        }
    }
}

impl StepsConfig {
    fn get(&self, kind: StepKind) -> Option<&StepConfig> {
        match kind {
            StepKind::GenerateCandidateText => self.generate_candidate_text.as_ref(),
            StepKind::ValidateText => self.validate_text.as_ref(),
            StepKind::MaterializeArtifact => self.materialize_artifact.as_ref(),
        }
    }
}

impl WorkflowConfig {
    /// Layer the overrides on top of the default workflow options
    pub fn options(&self) -> WorkflowOptions {
        let mut steps = StepRoutes::default();
        for kind in StepKind::ALL {
            if let Some(overrides) = self.steps.get(kind) {
                overrides.apply(steps.get_mut(kind));
            }
        }

        WorkflowOptions {
            steps,
            validation: self.validation.clone(),
            generation: self.generation.clone(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to midiflow home (run histories)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Executor pools by name
    pub executors: HashMap<String, ExecutorConfig>,
    /// Step routes and stage tuning
    pub workflow: WorkflowOptions,
}

impl ResolvedConfig {
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }
}

/// Pools used when the config file names none
pub fn default_executors() -> HashMap<String, ExecutorConfig> {
    [
        (StepKind::GenerateCandidateText.default_pool(), DEFAULT_TEXT_WORKER_URL),
        (StepKind::MaterializeArtifact.default_pool(), DEFAULT_FILE_WORKER_URL),
    ]
    .into_iter()
    .map(|(pool, url)| {
        (
            pool.to_string(),
            ExecutorConfig::Http {
                url: url.to_string(),
            },
        )
    })
    .collect()
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".midiflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a config file (if any) with the environment and defaults
fn resolve(
    config_file: Option<PathBuf>,
    env_home: Option<String>,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let Some(config_path) = config_file else {
        return Ok(ResolvedConfig {
            home: env_home.map(PathBuf::from).unwrap_or(default_home),
            config_file: None,
            executors: default_executors(),
            workflow: WorkflowOptions::default(),
        });
    };

    let config = load_config_file(&config_path)?;

    let home = if let Some(env_home) = env_home {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = config.paths.home {
        let midiflow_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(midiflow_dir, home_path)
    } else {
        default_home
    };

    let executors = if config.executors.is_empty() {
        default_executors()
    } else {
        config.executors
    };

    let workflow = config.workflow.options();
    workflow
        .validate()
        .with_context(|| format!("Invalid workflow settings in {}", config_path.display()))?;

    Ok(ResolvedConfig {
        home,
        config_file: Some(config_path),
        executors,
        workflow,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".midiflow");

    resolve(
        find_config_file(),
        std::env::var("MIDIFLOW_HOME").ok(),
        default_home,
    )
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepErrorPolicy;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let dir = temp.path().join(".midiflow");
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, None, PathBuf::from("/home/user/.midiflow")).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/user/.midiflow"));
        assert_eq!(config.runs_dir(), PathBuf::from("/home/user/.midiflow/runs"));
        assert!(config.config_file.is_none());
        assert_eq!(config.workflow, WorkflowOptions::default());
        assert_eq!(
            config.executors.get("ts-worker"),
            Some(&ExecutorConfig::Http {
                url: DEFAULT_TEXT_WORKER_URL.to_string()
            })
        );
        assert!(config.executors.contains_key("python-worker"));
    }

    #[test]
    fn test_env_home_wins() {
        let config = resolve(
            None,
            Some("/tmp/midiflow".to_string()),
            PathBuf::from("/home/user/.midiflow"),
        )
        .unwrap();
        assert_eq!(config.home, PathBuf::from("/tmp/midiflow"));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: /var/lib/midiflow
executors:
  ts-worker:
    kind: process
    command: node
    args: [worker.js]
  python-worker:
    kind: http
    url: http://workers:8002/steps
workflow:
  validation:
    max_iterations: 3
    on_step_error: consume_iteration
  steps:
    generate_candidate_text:
      name: SendMIDITextRequest
      timeout_seconds: 30
    materialize_artifact:
      name: GenerateMIDIFile
      retry_policy:
        max_attempts: 5
        initial_delay_ms: 200
"#,
        );

        let config = resolve(Some(config_path.clone()), None, PathBuf::from("/unused")).unwrap();

        assert_eq!(config.home, PathBuf::from("/var/lib/midiflow"));
        assert_eq!(config.config_file, Some(config_path));
        assert_eq!(
            config.executors.get("ts-worker"),
            Some(&ExecutorConfig::Process {
                command: "node".to_string(),
                args: vec!["worker.js".to_string()],
            })
        );

        let workflow = &config.workflow;
        assert_eq!(workflow.validation.max_iterations, 3);
        assert_eq!(
            workflow.validation.on_step_error,
            StepErrorPolicy::ConsumeIteration
        );
        assert_eq!(workflow.generation, StageOptions::default());

        let generate = workflow.steps.get(StepKind::GenerateCandidateText);
        assert_eq!(generate.name, "SendMIDITextRequest");
        assert_eq!(generate.route.pool, "ts-worker");
        assert_eq!(generate.route.timeout, Duration::from_secs(30));

        let materialize = workflow.steps.get(StepKind::MaterializeArtifact);
        assert_eq!(materialize.name, "GenerateMIDIFile");
        assert_eq!(materialize.retry_policy.max_attempts, 5);
        assert_eq!(materialize.retry_policy.initial_delay_ms, 200);
        assert_eq!(materialize.retry_policy.backoff_multiplier, 2.0);

        assert_eq!(
            workflow.steps.get(StepKind::ValidateText),
            &StepKind::ValidateText.default_options()
        );
    }

    #[test]
    fn test_invalid_workflow_rejected() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
workflow:
  generation:
    max_iterations: 0
"#,
        );

        let err = resolve(Some(config_path), None, PathBuf::from("/unused")).unwrap_err();
        assert!(format!("{:#}", err).contains("generation"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
