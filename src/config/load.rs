use std::fs;
use std::path::{Path, PathBuf};

use toml::Value;

use super::{Config, ConfigError};

/// Environment override consulted when `--config` is not given.
pub const CONFIG_ENV: &str = "RETCON_CONFIG";

pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/retcond/retcond.toml")
}

/// Resolve the configuration path: explicit flag, then `RETCON_CONFIG`,
/// then the system default.
pub fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(env) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(env);
    }
    default_config_path()
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents).map_err(|err| match err {
        ConfigError::Parse { reason, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    })
}

/// Parse configuration text, applying `$(var)` interpolation over top-level
/// string scalars before deserializing.
pub fn parse(contents: &str) -> Result<Config, ConfigError> {
    let raw: Value = contents.parse().map_err(|err: toml::de::Error| ConfigError::Parse {
        path: PathBuf::new(),
        reason: err.to_string(),
    })?;

    let vars: Vec<(String, String)> = raw
        .as_table()
        .map(|table| {
            table
                .iter()
                .filter_map(|(key, value)| {
                    value.as_str().map(|text| (key.clone(), text.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let interpolated = interpolate_value(raw, &vars)?;
    interpolated
        .try_into()
        .map_err(|err: toml::de::Error| ConfigError::Parse {
            path: PathBuf::new(),
            reason: err.to_string(),
        })
}

pub fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let contents = toml::to_string_pretty(config).map_err(|err| ConfigError::Render {
        reason: err.to_string(),
    })?;
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    let temp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir),
        None => tempfile::NamedTempFile::new(),
    }
    .map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(temp.path(), data).map_err(|source| ConfigError::Read {
        path: temp.path().to_path_buf(),
        source,
    })?;
    temp.persist(path).map_err(|err| ConfigError::Read {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

fn interpolate_value(value: Value, vars: &[(String, String)]) -> Result<Value, ConfigError> {
    Ok(match value {
        Value::String(text) => Value::String(interpolate_str(&text, vars)?),
        Value::Table(table) => Value::Table(
            table
                .into_iter()
                .map(|(key, value)| Ok((key, interpolate_value(value, vars)?)))
                .collect::<Result<_, ConfigError>>()?,
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| interpolate_value(item, vars))
                .collect::<Result<_, ConfigError>>()?,
        ),
        other => other,
    })
}

/// Single-pass substitution of `$(var)` references; a reference to an
/// undefined variable is a configuration error.
fn interpolate_str(text: &str, vars: &[(String, String)]) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("$(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find(')') else {
            return Err(ConfigError::UnknownVariable {
                var: after.to_string(),
            });
        };
        let var = &after[..end];
        match vars.iter().find(|(key, _)| key == var) {
            Some((_, value)) => out.push_str(value),
            None => {
                return Err(ConfigError::UnknownVariable {
                    var: var.to_string(),
                });
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
base = "/var/lib/retcon"

[server]
listen = "tcp://127.0.0.1:1234"
log-level = "DEBUG"
database = "$(base)/retcon.sqlite"

[entities.customer]
merge-policy = "ignore-conflicts"
enabled = ["data", "test-results"]

[entities.customer.sources.data]
create = "$(base)/bin/data-create"
read = "$(base)/bin/data-read %fk"
update = "$(base)/bin/data-update %fk"
delete = "$(base)/bin/data-delete %fk"

[entities.customer.sources.test-results]
create = "test-create"
read = "test-read %fk"
update = "test-update %fk"
delete = "test-delete %fk"
"#;

    #[test]
    fn parses_and_interpolates() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(
            config.server.database.as_deref(),
            Some(Path::new("/var/lib/retcon/retcon.sqlite"))
        );
        assert_eq!(config.server.log_level, super::super::LogLevel::Debug);
        let customer = &config.entities["customer"];
        assert_eq!(customer.enabled, vec!["data", "test-results"]);
        assert_eq!(
            customer.sources["data"].read,
            "/var/lib/retcon/bin/data-read %fk"
        );
    }

    #[test]
    fn unknown_interpolation_variable_is_an_error() {
        let err = parse("x = \"$(missing)\"").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownVariable { var } if var == "missing"));
    }

    #[test]
    fn defaults_apply_when_sections_are_absent() {
        let config = parse("").unwrap();
        assert_eq!(config.retry.max_attempts, super::super::DEFAULT_RETRY_ATTEMPTS);
        assert!(config.entities.is_empty());
    }

    #[test]
    fn write_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retcond.toml");
        let config = parse(SAMPLE).unwrap();
        write_config(&path, &config).unwrap();
        let reloaded = load(&path).unwrap();
        assert_eq!(
            reloaded.entities["customer"].sources["data"].read,
            config.entities["customer"].sources["data"].read
        );
    }

    #[test]
    fn resolve_prefers_flag_over_default() {
        let flag = PathBuf::from("/tmp/custom.toml");
        assert_eq!(resolve_config_path(Some(&flag)), flag);
    }
}
