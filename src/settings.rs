use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use config::{Config, ConfigError, Environment, File};
use http::header::HeaderName;
use serde::Deserialize;

use crate::logging::LogFormat;
use crate::rules::CacheRule;

fn default_max_age() -> u64 {
    60
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Lifetime in seconds applied when a cache rule matches but the response
    /// carries no explicit freshness directives.
    #[serde(default = "default_max_age")]
    pub default_max_age: u64,
    /// Response header annotated with `hit`/`miss`/`skip`. Empty or absent
    /// means responses are not annotated.
    #[serde(default)]
    pub status_header: Option<String>,
    #[serde(default)]
    pub cache_rules: Vec<CacheRule>,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageSettings {
    #[default]
    InMemory,
    OnDisk {
        path: PathBuf,
    },
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_max_age: default_max_age(),
            status_header: None,
            cache_rules: Vec::new(),
            storage: StorageSettings::default(),
            log: default_log_format(),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file layered with `STREAMCACHE__*`
    /// environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(true))
            .add_source(
                Environment::with_prefix("STREAMCACHE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(to_anyhow)?;
        let settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.status_header_name()?;
        if let StorageSettings::OnDisk { path } = &self.storage {
            ensure!(
                !path.as_os_str().is_empty(),
                "on_disk storage requires a non-empty path"
            );
        }
        Ok(())
    }

    pub fn status_header_name(&self) -> Result<Option<HeaderName>> {
        match &self.status_header {
            Some(name) if !name.is_empty() => {
                let parsed = HeaderName::try_from(name.as_str())
                    .with_context(|| format!("invalid status header name '{name}'"))?;
                Ok(Some(parsed))
            }
            _ => Ok(None),
        }
    }

    pub fn default_max_age(&self) -> Duration {
        Duration::from_secs(self.default_max_age)
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn loads_full_configuration() {
        let file = write_config(
            r#"
default_max_age = 120
status_header = "X-Cache-Status"
log = "text"

[[cache_rules]]
kind = "path_prefix"
path = "/assets"

[[cache_rules]]
kind = "header_value"
header = "Content-Type"
values = ["image/png", "image/gif"]

[storage]
kind = "on_disk"
path = "/tmp/streamcache-test"
"#,
        );

        let settings = Settings::load(file.path()).expect("load settings");
        assert_eq!(settings.default_max_age(), Duration::from_secs(120));
        assert_eq!(
            settings.status_header_name().unwrap().unwrap().as_str(),
            "x-cache-status"
        );
        assert_eq!(settings.cache_rules.len(), 2);
        assert!(matches!(settings.storage, StorageSettings::OnDisk { .. }));
    }

    #[test]
    fn defaults_apply_when_file_is_minimal() {
        let file = write_config("");
        let settings = Settings::load(file.path()).expect("load settings");
        assert_eq!(settings.default_max_age(), Duration::from_secs(60));
        assert!(settings.status_header.is_none());
        assert!(settings.cache_rules.is_empty());
        assert!(matches!(settings.storage, StorageSettings::InMemory));
    }

    #[test]
    fn rejects_invalid_status_header_name() {
        let settings = Settings {
            status_header: Some("not a header".to_string()),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_status_header_disables_annotation() {
        let settings = Settings {
            status_header: Some(String::new()),
            ..Settings::default()
        };
        assert!(settings.status_header_name().unwrap().is_none());
    }
}
