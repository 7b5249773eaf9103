//! Loads settings from `config.toml` and edits that file for `rq config set`.
//!
//! Keys are dotted paths into the TOML document (`verdict.fail_severities`,
//! `agents.claude`). Every value passes through the settings schema, whether
//! it comes from the file, the environment or the command line.

use anyhow::{Context, Result, bail};
use rq_core::Settings;
use rq_core::settings::{self, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "RQ_CONFIG";
pub const DB_PATH_ENV: &str = "RQ_DB_PATH";
pub const DAEMON_ADDR_ENV: &str = "RQ_DAEMON_ADDR";

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

/// `$RQ_CONFIG`, else `~/.rq/config.toml`.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|path| !path.is_empty()) {
        return PathBuf::from(path);
    }
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rq")
        .join("config.toml")
}

/// Settings from the user's config file with environment overrides applied.
pub fn load() -> Result<Settings> {
    load_from(&config_path(), |name| std::env::var(name).ok())
}

pub fn load_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let mut settings = Settings::default();
    if let Some(host) = env("HOSTNAME").filter(|host| !host.trim().is_empty()) {
        settings.machine_id = host.trim().to_string();
    }

    for (key, value) in read_entries(path)? {
        settings
            .apply(&key, value)
            .with_context(|| format!("{}: {key}", path.display()))?;
    }

    for (name, key) in [(DB_PATH_ENV, "db_path"), (DAEMON_ADDR_ENV, "daemon_addr")] {
        if let Some(raw) = env(name).filter(|raw| !raw.trim().is_empty()) {
            settings
                .set(key, &raw)
                .with_context(|| format!("{name}={raw}"))?;
        }
    }

    settings.db_path = expand_home(&settings.db_path);
    Ok(settings)
}

/// Validates `raw` for `key` and writes it into the file at `path`.
pub fn set_key(path: &Path, key: &str, raw: &str) -> Result<()> {
    let value = settings::parse_value(key, raw)?;
    let mut document = read_table(path)?;
    insert_dotted(&mut document, key, to_toml(&value))?;

    let text = toml::to_string_pretty(&document).context("serialize config")?;
    write_atomic(path, &text)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    match fs::read_to_string(path) {
        Ok(text) => text
            .parse::<toml::Table>()
            .with_context(|| format!("parse {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

fn read_entries(path: &Path) -> Result<Vec<(String, Value)>> {
    let table = read_table(path)?;
    let mut entries = Vec::new();
    flatten(&table, "", &mut entries)?;
    Ok(entries)
}

fn flatten(table: &toml::Table, prefix: &str, out: &mut Vec<(String, Value)>) -> Result<()> {
    for (name, item) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match item {
            toml::Value::Table(nested) => flatten(nested, &key, out)?,
            other => out.push((key.clone(), from_toml(&key, other)?)),
        }
    }
    Ok(())
}

fn from_toml(key: &str, item: &toml::Value) -> Result<Value> {
    let value = match item {
        toml::Value::String(text) => Value::String(text.clone()),
        toml::Value::Integer(number) => Value::Int(*number),
        toml::Value::Boolean(flag) => Value::Bool(*flag),
        toml::Value::Array(items) => Value::StringList(
            items
                .iter()
                .map(|item| match item {
                    toml::Value::String(text) => Ok(text.clone()),
                    _ => bail!("{key}: list items must be strings"),
                })
                .collect::<Result<_>>()?,
        ),
        _ => bail!("{key}: unsupported value type {}", item.type_str()),
    };
    Ok(value)
}

fn to_toml(value: &Value) -> toml::Value {
    match value {
        Value::String(text) => toml::Value::String(text.clone()),
        Value::Int(number) => toml::Value::Integer(*number),
        Value::Bool(flag) => toml::Value::Boolean(*flag),
        Value::StringList(items) => {
            toml::Value::Array(items.iter().cloned().map(toml::Value::String).collect())
        }
    }
}

fn insert_dotted(document: &mut toml::Table, key: &str, value: toml::Value) -> Result<()> {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(last) = parts.pop() else {
        bail!("empty config key");
    };
    let mut table = document;
    for part in parts {
        let entry = table
            .entry(part.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        table = match entry {
            toml::Value::Table(nested) => nested,
            _ => bail!("{part} is not a table in the config file"),
        };
    }
    table.insert(last.to_string(), value);
    Ok(())
}

/// Writes through a temp file in the same directory so readers never see a partial file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "config.toml".to_string());
    let tmp = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));
    fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("replace {}", path.display()));
    }
    Ok(())
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_from(&dir.path().join("config.toml"), env(&[])).unwrap();
        assert_eq!(settings.max_workers, 4);
        assert_eq!(settings.daemon_addr, "127.0.0.1:7373");
        assert_eq!(settings.machine_id, "local");
    }

    #[test]
    fn nested_tables_map_to_dotted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
default_agent = "claude"
max_workers = 2

[verdict]
fail_severities = ["critical", "high"]

[agents]
claude = "claude -p --model sonnet"
"#,
        )
        .unwrap();

        let settings = load_from(&path, env(&[("HOSTNAME", "build-box")])).unwrap();
        assert_eq!(settings.default_agent, "claude");
        assert_eq!(settings.max_workers, 2);
        assert_eq!(settings.fail_severities, vec!["critical", "high"]);
        assert_eq!(settings.agents["claude"], "claude -p --model sonnet");
        assert_eq!(settings.machine_id, "build-box");
    }

    #[test]
    fn bad_values_and_unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "max_workers = \"lots\"\n").unwrap();
        assert!(load_from(&path, env(&[])).is_err());

        fs::write(&path, "max_workers = 0\n").unwrap();
        assert!(load_from(&path, env(&[])).is_err());

        fs::write(&path, "colour = true\n").unwrap();
        let err = load_from(&path, env(&[])).unwrap_err();
        assert!(format!("{err:#}").contains("unknown config key"));
    }

    #[test]
    fn environment_overrides_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "daemon_addr = \"127.0.0.1:9000\"\n").unwrap();

        let settings = load_from(
            &path,
            env(&[
                (DAEMON_ADDR_ENV, "127.0.0.1:9100"),
                (DB_PATH_ENV, "/var/lib/rq/reviews.db"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.daemon_addr, "127.0.0.1:9100");
        assert_eq!(settings.db_path, PathBuf::from("/var/lib/rq/reviews.db"));
    }

    #[test]
    fn set_key_writes_nested_tables_and_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        set_key(&path, "max_workers", "8").unwrap();
        set_key(&path, "verdict.fail_severities", "critical, high").unwrap();
        set_key(&path, "agents.codex", "codex exec").unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table["max_workers"].as_integer(), Some(8));
        assert_eq!(
            table["verdict"]["fail_severities"].as_array().unwrap().len(),
            2
        );
        assert_eq!(table["agents"]["codex"].as_str(), Some("codex exec"));

        let settings = load_from(&path, env(&[])).unwrap();
        assert_eq!(settings.max_workers, 8);
        assert_eq!(settings.agents["codex"], "codex exec");
    }

    #[test]
    fn set_key_rejects_invalid_values_without_touching_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        set_key(&path, "max_workers", "3").unwrap();
        let before = fs::read_to_string(&path).unwrap();

        assert!(set_key(&path, "max_workers", "many").is_err());
        assert!(set_key(&path, "daemon_addr", "not an address").is_err());
        assert!(set_key(&path, "nope", "1").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }
}
