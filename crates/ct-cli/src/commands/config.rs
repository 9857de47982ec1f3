//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_info, print_success, print_warning};
use ct_core::config;

const MASKED: &str = "********";

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&Path>) -> Result<()> {
    println!("{}", resolve_path(config_path).display());
    Ok(())
}

/// Get a config value by dotted key, e.g. `server.url`
pub fn config_get(config_path: Option<&Path>, key: &str) -> Result<()> {
    let path = resolve_path(config_path);
    if !path.exists() {
        anyhow::bail!(
            "Config file not found: {:?} (run 'ci-term config init' to create one)",
            path
        );
    }

    let table = toml::Value::Table(read_table(&path)?);
    let value = key
        .split('.')
        .try_fold(&table, |current, part| current.get(part))
        .ok_or_else(|| anyhow::anyhow!("Key not found: {}", key))?;

    match value {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Table(_) => println!("{}", toml::to_string_pretty(value)?),
        other => println!("{}", other),
    }

    Ok(())
}

/// Set a config value by dotted key, creating the file if needed
pub fn config_set(config_path: Option<&Path>, key: &str, value: &str) -> Result<()> {
    let path = resolve_path(config_path);
    if !path.exists() {
        print_info("Creating default configuration...");
        config_init(Some(&path), false)?;
    }

    let mut table = read_table(&path)?;

    let parts: Vec<&str> = key.split('.').collect();
    let (last_key, parents) = parts
        .split_last()
        .filter(|(last, _)| !last.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Invalid key: {:?}", key))?;

    let mut current = &mut table;
    for part in parents {
        current = current
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("Cannot navigate to key: {}", key))?;
    }

    current.insert(last_key.to_string(), parse_value(value));

    // Round-trip through the typed config so bad values are caught now
    let content = toml::to_string_pretty(&table)?;
    toml::from_str::<config::ConfigFile>(&content)
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;

    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    let shown = if is_secret(key) { MASKED } else { value };
    print_success(&format!("Set {} = {}", key, shown));
    Ok(())
}

/// Show the current configuration with secrets masked
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_path(config_path);
    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'ci-term config init' to create one");
        return Ok(());
    }

    let mut table = read_table(&path)?;
    if let Some(token) = table
        .get_mut("server")
        .and_then(|server| server.as_table_mut())
        .and_then(|server| server.get_mut("token"))
    {
        *token = toml::Value::String(MASKED.to_string());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!("{}", toml::to_string_pretty(&table)?);
    Ok(())
}

/// Write a commented default configuration
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config_file = resolve_path(config_path);

    if let Some(dir) = config_file.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
            print_success(&format!("Created config directory: {:?}", dir));
        }
    }

    if config_file.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {:?} (use --force to overwrite)",
            config_file
        );
    }

    std::fs::write(&config_file, default_config())
        .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

    print_success(&format!("Created configuration file: {:?}", config_file));
    print_info("Set the server with 'ci-term config set server.url <url>'");
    Ok(())
}

fn parse_value(value: &str) -> toml::Value {
    if value == "true" {
        toml::Value::Boolean(true)
    } else if value == "false" {
        toml::Value::Boolean(false)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else {
        toml::Value::String(value.to_string())
    }
}

fn is_secret(key: &str) -> bool {
    key == "server.token"
}

fn default_config() -> String {
    r#"# ci-term configuration

[server]
# Base URL of the CI server
# url = "https://ci.example.com"

# Username for Basic auth. Leave unset when using an access token.
# username = "alice"

# Password or access token (or set CI_TERM_TOKEN)
# token = ""

# Endpoint paths of the agent terminal plugin
session_path = "app/agent-terminal/session"
terminal_path = "app/agent-terminal/ws"

# Multi-node routing: header carrying the node id, and the cookie that pins
# the WebSocket to that node
node_header = "X-Node-Id"
node_cookie = "node-id"

[terminal]
# Keep-alive interval in seconds; keep below any proxy idle timeout
keepalive_interval = 30

# Deadline for a single write, in seconds
write_timeout = 10

# Deadline for session negotiation and the WebSocket upgrade, in seconds
connect_timeout = 30

# Overall deadline for `ci-term exec`, in seconds
exec_timeout = 60

# Pause after disabling remote echo before the command is sent, in milliseconds
exec_settle = 500
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let file: config::ConfigFile = toml::from_str(&default_config()).unwrap();
        assert!(file.server.url.is_none());
        assert_eq!(file.terminal, config::TerminalConfig::default());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_value("45"), toml::Value::Integer(45));
        assert_eq!(
            parse_value("https://ci"),
            toml::Value::String("https://ci".to_string())
        );
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        config_set(Some(&path), "server.url", "https://ci.example.com").unwrap();
        config_set(Some(&path), "terminal.exec_timeout", "120").unwrap();

        let file: config::ConfigFile = config::load_config(&path).unwrap();
        assert_eq!(file.server.url.as_deref(), Some("https://ci.example.com"));
        assert_eq!(file.terminal.exec_timeout.as_secs(), 120);
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(config_set(Some(&path), "terminal.exec_timeout", "soon").is_err());
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        config_init(Some(&path), false).unwrap();
        assert!(config_init(Some(&path), false).is_err());
        assert!(config_init(Some(&path), true).is_ok());
    }
}
