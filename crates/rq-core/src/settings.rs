//! Typed runtime settings and the key schema used to read and write them.
//!
//! Every key maps to one [`ValueKind`] and a validator, so textual input
//! (`rq config set`) and typed input (TOML) go through the same checks.
//! Nothing here touches the filesystem.

use crate::verdict::{DEFAULT_FAIL_SEVERITIES, VerdictParser};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const AGENT_PREFIX: &str = "agents.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Int,
    Bool,
    StringList,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Int => "integer",
            ValueKind::Bool => "boolean",
            ValueKind::StringList => "list of strings",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    StringList(Vec<String>),
    String(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Int(_) => ValueKind::Int,
            Value::Bool(_) => ValueKind::Bool,
            Value::StringList(_) => ValueKind::StringList,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(value) => f.write_str(value),
            Value::Int(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::StringList(values) => f.write_str(&values.join(",")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unknown config key: {key}")]
    UnknownKey { key: String },
    #[error("{key} expects a {expected}")]
    TypeMismatch { key: String, expected: ValueKind },
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

pub struct KeySpec {
    pub key: &'static str,
    pub kind: ValueKind,
    pub validate: fn(&Value) -> Result<(), String>,
}

pub static SCHEMA: &[KeySpec] = &[
    KeySpec {
        key: "default_agent",
        kind: ValueKind::String,
        validate: non_empty,
    },
    KeySpec {
        key: "max_workers",
        kind: ValueKind::Int,
        validate: worker_count,
    },
    KeySpec {
        key: "poll_interval_ms",
        kind: ValueKind::Int,
        validate: poll_interval,
    },
    KeySpec {
        key: "job_timeout_secs",
        kind: ValueKind::Int,
        validate: positive,
    },
    KeySpec {
        key: "cancel_grace_ms",
        kind: ValueKind::Int,
        validate: non_negative,
    },
    KeySpec {
        key: "daemon_addr",
        kind: ValueKind::String,
        validate: socket_addr,
    },
    KeySpec {
        key: "db_path",
        kind: ValueKind::String,
        validate: non_empty,
    },
    KeySpec {
        key: "machine_id",
        kind: ValueKind::String,
        validate: non_empty,
    },
    KeySpec {
        key: "verdict.fail_severities",
        kind: ValueKind::StringList,
        validate: non_empty_list,
    },
];

static AGENT_SPEC: KeySpec = KeySpec {
    key: "agents.<name>",
    kind: ValueKind::String,
    validate: command_line,
};

pub fn spec_for(key: &str) -> Option<&'static KeySpec> {
    if let Some(name) = key.strip_prefix(AGENT_PREFIX) {
        return (!name.is_empty() && !name.contains('.')).then_some(&AGENT_SPEC);
    }
    SCHEMA.iter().find(|spec| spec.key == key)
}

/// Parses `raw` into the kind `key` expects and validates it.
pub fn parse_value(key: &str, raw: &str) -> Result<Value, SettingsError> {
    let spec = spec_for(key).ok_or_else(|| SettingsError::UnknownKey {
        key: key.to_string(),
    })?;
    let raw = raw.trim();
    let value = match spec.kind {
        ValueKind::String => Value::String(raw.to_string()),
        ValueKind::Int => Value::Int(raw.parse().map_err(|_| SettingsError::TypeMismatch {
            key: key.to_string(),
            expected: ValueKind::Int,
        })?),
        ValueKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => {
                return Err(SettingsError::TypeMismatch {
                    key: key.to_string(),
                    expected: ValueKind::Bool,
                });
            }
        },
        ValueKind::StringList => Value::StringList(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(ToString::to_string)
                .collect(),
        ),
    };
    check(spec, key, &value)?;
    Ok(value)
}

fn check(spec: &KeySpec, key: &str, value: &Value) -> Result<(), SettingsError> {
    if value.kind() != spec.kind {
        return Err(SettingsError::TypeMismatch {
            key: key.to_string(),
            expected: spec.kind,
        });
    }
    (spec.validate)(value).map_err(|message| SettingsError::InvalidValue {
        key: key.to_string(),
        message,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub default_agent: String,
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_secs: u64,
    /// How long a cancel of a running job waits for its worker before marking it directly.
    pub cancel_grace_ms: u64,
    pub daemon_addr: String,
    pub db_path: PathBuf,
    pub machine_id: String,
    pub fail_severities: Vec<String>,
    /// Agent name to command line.
    pub agents: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_agent: "test".to_string(),
            max_workers: 4,
            poll_interval_ms: 500,
            job_timeout_secs: 1800,
            cancel_grace_ms: 10_000,
            daemon_addr: "127.0.0.1:7373".to_string(),
            db_path: PathBuf::from("~/.rq/reviews.db"),
            machine_id: "local".to_string(),
            fail_severities: DEFAULT_FAIL_SEVERITIES
                .iter()
                .map(ToString::to_string)
                .collect(),
            agents: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn get(&self, key: &str) -> Result<Value, SettingsError> {
        if let Some(name) = key.strip_prefix(AGENT_PREFIX) {
            return self
                .agents
                .get(name)
                .map(|command| Value::String(command.clone()))
                .ok_or_else(|| SettingsError::UnknownKey {
                    key: key.to_string(),
                });
        }
        let value = match key {
            "default_agent" => Value::String(self.default_agent.clone()),
            "max_workers" => Value::Int(i64::try_from(self.max_workers).unwrap_or(i64::MAX)),
            "poll_interval_ms" => Value::Int(clamp_i64(self.poll_interval_ms)),
            "job_timeout_secs" => Value::Int(clamp_i64(self.job_timeout_secs)),
            "cancel_grace_ms" => Value::Int(clamp_i64(self.cancel_grace_ms)),
            "daemon_addr" => Value::String(self.daemon_addr.clone()),
            "db_path" => Value::String(self.db_path.display().to_string()),
            "machine_id" => Value::String(self.machine_id.clone()),
            "verdict.fail_severities" => Value::StringList(self.fail_severities.clone()),
            _ => {
                return Err(SettingsError::UnknownKey {
                    key: key.to_string(),
                });
            }
        };
        Ok(value)
    }

    /// Parses a textual value by the key's kind and stores it.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), SettingsError> {
        let value = parse_value(key, raw)?;
        self.store(key, value)
    }

    /// Stores an already-typed value after checking it against the schema.
    pub fn apply(&mut self, key: &str, value: Value) -> Result<(), SettingsError> {
        let spec = spec_for(key).ok_or_else(|| SettingsError::UnknownKey {
            key: key.to_string(),
        })?;
        check(spec, key, &value)?;
        self.store(key, value)
    }

    /// Every key with its current value, agents last.
    pub fn list(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = SCHEMA
            .iter()
            .filter_map(|spec| {
                self.get(spec.key)
                    .ok()
                    .map(|value| (spec.key.to_string(), value))
            })
            .collect();
        for (name, command) in &self.agents {
            entries.push((
                format!("{AGENT_PREFIX}{name}"),
                Value::String(command.clone()),
            ));
        }
        entries
    }

    pub fn verdict_parser(&self) -> VerdictParser {
        VerdictParser::new(self.fail_severities.iter().cloned())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    fn store(&mut self, key: &str, value: Value) -> Result<(), SettingsError> {
        let mismatch = |expected| SettingsError::TypeMismatch {
            key: key.to_string(),
            expected,
        };
        if let Some(name) = key.strip_prefix(AGENT_PREFIX) {
            let Value::String(command) = value else {
                return Err(mismatch(ValueKind::String));
            };
            self.agents.insert(name.to_string(), command);
            return Ok(());
        }
        match (key, value) {
            ("default_agent", Value::String(v)) => self.default_agent = v,
            ("max_workers", Value::Int(v)) => {
                self.max_workers = usize::try_from(v).map_err(|_| mismatch(ValueKind::Int))?;
            }
            ("poll_interval_ms", Value::Int(v)) => {
                self.poll_interval_ms = u64::try_from(v).map_err(|_| mismatch(ValueKind::Int))?;
            }
            ("job_timeout_secs", Value::Int(v)) => {
                self.job_timeout_secs = u64::try_from(v).map_err(|_| mismatch(ValueKind::Int))?;
            }
            ("cancel_grace_ms", Value::Int(v)) => {
                self.cancel_grace_ms = u64::try_from(v).map_err(|_| mismatch(ValueKind::Int))?;
            }
            ("daemon_addr", Value::String(v)) => self.daemon_addr = v,
            ("db_path", Value::String(v)) => self.db_path = PathBuf::from(v),
            ("machine_id", Value::String(v)) => self.machine_id = v,
            ("verdict.fail_severities", Value::StringList(v)) => self.fail_severities = v,
            (other, _) => {
                return Err(spec_for(other).map_or_else(
                    || SettingsError::UnknownKey {
                        key: other.to_string(),
                    },
                    |spec| mismatch(spec.kind),
                ));
            }
        }
        Ok(())
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn non_empty(value: &Value) -> Result<(), String> {
    match value {
        Value::String(text) if text.trim().is_empty() => Err("must not be empty".to_string()),
        _ => Ok(()),
    }
}

fn int_in(value: &Value, min: i64, max: i64) -> Result<(), String> {
    match value {
        Value::Int(n) if *n < min || *n > max => {
            if max == i64::MAX {
                Err(format!("must be at least {min}"))
            } else {
                Err(format!("must be between {min} and {max}"))
            }
        }
        _ => Ok(()),
    }
}

fn worker_count(value: &Value) -> Result<(), String> {
    int_in(value, 1, 64)
}

fn poll_interval(value: &Value) -> Result<(), String> {
    int_in(value, 10, i64::MAX)
}

fn non_negative(value: &Value) -> Result<(), String> {
    int_in(value, 0, i64::MAX)
}

fn positive(value: &Value) -> Result<(), String> {
    int_in(value, 1, i64::MAX)
}

fn socket_addr(value: &Value) -> Result<(), String> {
    match value {
        Value::String(text) => text
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|_| format!("not a socket address: {text}")),
        _ => Ok(()),
    }
}

fn non_empty_list(value: &Value) -> Result<(), String> {
    match value {
        Value::StringList(items) if items.is_empty() => Err("must list at least one item".to_string()),
        Value::StringList(items) if items.iter().any(|item| item.trim().is_empty()) => {
            Err("items must not be empty".to_string())
        }
        _ => Ok(()),
    }
}

fn command_line(value: &Value) -> Result<(), String> {
    let Value::String(text) = value else {
        return Ok(());
    };
    let words = shell_words::split(text).map_err(|err| err.to_string())?;
    if words.is_empty() {
        return Err("command must not be empty".to_string());
    }
    Ok(())
}
