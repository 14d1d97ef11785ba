use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OtellyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub otlp_grpc_addr: String,
    pub otlp_http_addr: String,
    /// How long a finished batch waits for a live subscriber.
    pub publish_timeout: Duration,
    pub channel_capacity: usize,
    pub render_width: usize,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("otelly/otelly.duckdb"),
            otlp_grpc_addr: "127.0.0.1:4317".to_string(),
            otlp_http_addr: "127.0.0.1:4318".to_string(),
            publish_timeout: Duration::from_secs(1),
            channel_capacity: 64,
            render_width: 80,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(file_overrides) = load_file_overrides(&config_file_path())? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        apply_overrides(&mut cfg, load_env_overrides()?, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    otlp_grpc_addr: Option<String>,
    otlp_http_addr: Option<String>,
    publish_timeout: Option<String>,
    channel_capacity: Option<usize>,
    render_width: Option<usize>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("OTELLY_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("otelly/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| OtellyError::Config(format!("failed reading {}: {e}", path.display())))?;
    parse_file_overrides(&raw)
        .map(Some)
        .map_err(|e| OtellyError::Config(format!("failed parsing {}: {e}", path.display())))
}

fn parse_file_overrides(raw: &str) -> std::result::Result<ConfigOverrides, toml::de::Error> {
    toml::from_str(raw)
}

fn env_number(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(v) => v
            .parse::<usize>()
            .map(Some)
            .map_err(|e| OtellyError::Config(format!("bad {key} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        db_path: env::var("OTELLY_DB_PATH").ok().map(PathBuf::from),
        otlp_grpc_addr: env::var("OTELLY_OTLP_GRPC_ADDR").ok(),
        otlp_http_addr: env::var("OTELLY_OTLP_HTTP_ADDR").ok(),
        publish_timeout: env::var("OTELLY_PUBLISH_TIMEOUT").ok(),
        channel_capacity: env_number("OTELLY_CHANNEL_CAPACITY")?,
        render_width: env_number("OTELLY_RENDER_WIDTH")?,
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.otlp_grpc_addr {
        cfg.otlp_grpc_addr = v;
    }
    if let Some(v) = overrides.otlp_http_addr {
        cfg.otlp_http_addr = v;
    }
    if let Some(v) = overrides.publish_timeout {
        cfg.publish_timeout = humantime::parse_duration(&v).map_err(|e| {
            OtellyError::Config(format!("bad publish_timeout in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.channel_capacity {
        if v == 0 {
            return Err(OtellyError::Config(format!(
                "channel_capacity in {source} must be at least 1"
            )));
        }
        cfg.channel_capacity = v;
    }
    if let Some(v) = overrides.render_width {
        cfg.render_width = v;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_expected_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.otlp_grpc_addr, "127.0.0.1:4317");
        assert_eq!(cfg.otlp_http_addr, "127.0.0.1:4318");
        assert!(cfg.db_path.ends_with("otelly/otelly.duckdb"));
    }

    #[test]
    fn default_publish_window_is_one_second() {
        let cfg = Config::default();
        assert_eq!(cfg.publish_timeout, Duration::from_secs(1));
        assert_eq!(cfg.channel_capacity, 64);
        assert_eq!(cfg.render_width, 80);
    }

    #[test]
    fn file_overrides_parse_and_apply() {
        let file = parse_file_overrides(
            r#"
            db_path = "/tmp/otelly-test.duckdb"
            publish_timeout = "250ms"
            render_width = 120
            "#,
        )
        .unwrap();

        let mut cfg = Config::default();
        apply_overrides(&mut cfg, file, "config file").unwrap();

        assert_eq!(cfg.db_path, PathBuf::from("/tmp/otelly-test.duckdb"));
        assert_eq!(cfg.publish_timeout, Duration::from_millis(250));
        assert_eq!(cfg.render_width, 120);
        assert_eq!(cfg.channel_capacity, 64);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(parse_file_overrides("retention_ttl = \"1d\"").is_err());
    }

    #[test]
    fn bad_values_name_their_source() {
        let mut cfg = Config::default();
        let err = apply_overrides(
            &mut cfg,
            ConfigOverrides {
                publish_timeout: Some("soon".to_string()),
                ..ConfigOverrides::default()
            },
            "environment",
        )
        .unwrap_err();
        assert!(err.to_string().contains("publish_timeout in environment"));

        let err = apply_overrides(
            &mut cfg,
            ConfigOverrides {
                channel_capacity: Some(0),
                ..ConfigOverrides::default()
            },
            "config file",
        )
        .unwrap_err();
        assert!(matches!(err, OtellyError::Config(_)));
    }
}
