//! Configuration module for Faultline.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, defaults, and DSN resolution (including
//! the environment-variable override used for testing/staging).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Environment variable that overrides the configured ingestion DSN.
pub const DSN_ENV: &str = "FAULTLINE_DSN";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Faultline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
    pub release: ReleaseConfig,
    pub capture: CaptureSettings,
}

/// Ingestion endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// DSN in the form `https://KEY@HOST/PROJECT`. Empty means upload is
    /// unconfigured; capture still works locally.
    pub dsn: String,
}

/// Local artifact storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Artifact directory. `None` selects the platform default
    /// (`<data_local_dir>/faultline/crash-reports`).
    pub dir: Option<PathBuf>,
    /// Artifacts older than this are pruned regardless of upload state.
    pub retention_days: u32,
}

/// Release identification attached to every report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Application version, e.g. `1.4.0`.
    pub version: String,
    /// Build suffix, e.g. `-dev` or `-ptb`. Also drives environment
    /// classification.
    pub build: String,
}

/// Capture behavior settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Verbose backend diagnostics. Forced on outside production builds.
    pub verbose: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            retention_days: 30,
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/faultline/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("faultline")
            .join("config.yaml")
    }

    /// Effective artifact directory.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("faultline")
                .join("crash-reports")
        })
    }

    /// Release string attached to reports: `<version><build>`.
    pub fn release_string(&self) -> String {
        format!("{}{}", self.release.version, self.release.build)
    }

    /// Resolves the effective DSN, honoring the `FAULTLINE_DSN` override.
    ///
    /// Returns `None` when neither the environment nor the configuration
    /// provides one; upload is then disabled while local capture continues.
    pub fn resolve_dsn(&self) -> Option<Result<Dsn, DomainError>> {
        let raw = std::env::var(DSN_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.ingest.dsn.clone());
        if raw.is_empty() {
            return None;
        }
        Some(Dsn::parse(&raw))
    }

    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.storage.retention_days == 0 {
            errors.push(ValidationError {
                field: "storage.retention_days".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !self.ingest.dsn.is_empty() && Dsn::parse(&self.ingest.dsn).is_err() {
            errors.push(ValidationError {
                field: "ingest.dsn".into(),
                message: "must be https://KEY@HOST/PROJECT".into(),
            });
        }
        if self.release.version.is_empty() {
            errors.push(ValidationError {
                field: "release.version".into(),
                message: "must not be empty".into(),
            });
        }

        errors
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"storage.retention_days"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

// ---------------------------------------------------------------------------
// DSN parsing
// ---------------------------------------------------------------------------

/// Parsed ingestion DSN: `https://KEY@HOST/PROJECT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    scheme: String,
    public_key: String,
    host: String,
    project_id: String,
}

impl Dsn {
    /// Parses a DSN string.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let invalid = || DomainError::InvalidDsn(raw.to_string());

        let (scheme, rest) = raw
            .split_once("://")
            .filter(|(s, _)| *s == "http" || *s == "https")
            .ok_or_else(invalid)?;
        let (key, rest) = rest.split_once('@').ok_or_else(invalid)?;
        let (host, project) = rest.rsplit_once('/').ok_or_else(invalid)?;

        if key.is_empty() || host.is_empty() || project.is_empty() {
            return Err(invalid());
        }
        if !project.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }

        Ok(Self {
            scheme: scheme.to_string(),
            public_key: key.to_string(),
            host: host.to_string(),
            project_id: project.to_string(),
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Minidump ingestion endpoint for this DSN:
    /// `https://HOST/api/PROJECT/minidump/?sentry_key=KEY`.
    pub fn minidump_url(&self) -> String {
        format!(
            "{}://{}/api/{}/minidump/?sentry_key={}",
            self.scheme, self.host, self.project_id, self.public_key
        )
    }
}
