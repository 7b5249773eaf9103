//! Agents that turn a prompt into review or fix output.
//!
//! Agent futures are cancel-safe: dropping one kills the subprocess it
//! started, so callers stop an agent by dropping its future.

use crate::error::AgentError;
use crate::settings::Settings;
use crate::types::ReviewJob;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

const OUTPUT_LIMIT: usize = 1024 * 1024;
const STDERR_LIMIT: usize = 4 * 1024;

pub const TEST_AGENT: &str = "test";
pub const TEST_AGENT_OUTPUT: &str = "No issues found.\n\n## Verdict: PASS";

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub workdir: PathBuf,
    pub model: Option<String>,
    pub reasoning: Option<String>,
    pub options: BTreeMap<String, String>,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, request: &AgentRequest) -> Result<String, AgentError>;
}

/// One-line instruction for the job, review or fix.
pub fn build_prompt(job: &ReviewJob) -> String {
    match job.parent_job_id {
        Some(parent) => format!(
            "Fix the issues reported by review job {parent} for commit {} and leave the changes in the working tree.",
            job.target()
        ),
        None => format!(
            "Review commit {} and finish with '## Verdict: PASS' or '## Verdict: FAIL'.",
            job.target()
        ),
    }
}

/// Runs a configured command line, writing the prompt to its stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    name: String,
    argv: Vec<String>,
}

impl CommandAgent {
    pub fn new(name: &str, command: &str) -> Result<Self, AgentError> {
        let argv = shell_words::split(command).map_err(|err| AgentError::Spawn {
            message: format!("{name}: {err}"),
        })?;
        if argv.is_empty() {
            return Err(AgentError::Spawn {
                message: format!("{name}: command empty"),
            });
        }
        Ok(Self {
            name: name.to_string(),
            argv,
        })
    }
}

#[async_trait]
impl Agent for CommandAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, request: &AgentRequest) -> Result<String, AgentError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(AgentError::Spawn {
                message: format!("{}: command empty", self.name),
            });
        };
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&request.workdir)
            .env("RQ_AGENT", &self.name)
            .env("RQ_MODEL", request.model.as_deref().unwrap_or_default())
            .env("RQ_REASONING", request.reasoning.as_deref().unwrap_or_default())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &request.options {
            command.env(format!("RQ_OPT_{}", key.to_ascii_uppercase()), value);
        }

        let mut child = command.spawn().map_err(|err| AgentError::Spawn {
            message: format!("{program}: {err}"),
        })?;
        let stdin = child.stdin.take();
        let prompt = request.prompt.as_bytes();
        let write = async move {
            if let Some(mut stdin) = stdin {
                // The agent may exit without reading its input.
                let _ = stdin.write_all(prompt).await;
            }
        };
        let ((), output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|err| AgentError::Failed {
            message: err.to_string(),
        })?;

        if !output.status.success() {
            let stderr = limit_output(&output.stderr, STDERR_LIMIT);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            return Err(AgentError::Failed {
                message: format!("exit {code}: {}", stderr.trim()),
            });
        }
        Ok(limit_output(&output.stdout, OUTPUT_LIMIT))
    }
}

fn limit_output(data: &[u8], limit: usize) -> String {
    let end = data.len().min(limit);
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Deterministic agent for tests and dry runs.
#[derive(Debug, Clone)]
pub struct TestAgent {
    output: String,
    delay: Duration,
    edit: Option<(String, String)>,
}

impl Default for TestAgent {
    fn default() -> Self {
        Self::new(TEST_AGENT_OUTPUT)
    }
}

impl TestAgent {
    pub fn new(output: &str) -> Self {
        Self {
            output: output.to_string(),
            delay: Duration::ZERO,
            edit: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Writes `contents` to `path` inside the workdir, as a fix would.
    pub fn with_edit(mut self, path: &str, contents: &str) -> Self {
        self.edit = Some((path.to_string(), contents.to_string()));
        self
    }
}

#[async_trait]
impl Agent for TestAgent {
    fn name(&self) -> &str {
        TEST_AGENT
    }

    async fn run(&self, request: &AgentRequest) -> Result<String, AgentError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((path, contents)) = &self.edit {
            write_in(&request.workdir, path, contents)
                .await
                .map_err(|err| AgentError::Failed {
                    message: format!("write {path}: {err}"),
                })?;
        }
        Ok(self.output.clone())
    }
}

async fn write_in(dir: &Path, path: &str, contents: &str) -> std::io::Result<()> {
    let target = dir.join(path);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, contents).await
}

#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `test` agent plus one command agent per `agents.<name>` setting.
    pub fn from_settings(settings: &Settings) -> Result<Self, AgentError> {
        let mut registry = Self::new();
        registry.register(Arc::new(TestAgent::default()));
        for (name, command) in &settings.agents {
            registry.register(Arc::new(CommandAgent::new(name, command)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Agent>, AgentError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownAgent {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
