//! Capture context - metadata frozen at arm time
//!
//! Established once when capture is armed and attached to every event
//! captured afterwards. Re-arming re-establishes it. Never includes
//! hostname or username.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runtime environment classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Preview,
    Production,
}

impl Environment {
    /// Classifies the environment from the build suffix.
    ///
    /// `-ptb` builds are preview, `-dev` builds are development, debug
    /// builds are always development, everything else is production.
    pub fn from_build_string(build: &str) -> Self {
        if cfg!(debug_assertions) {
            return Environment::Development;
        }
        if build.contains("-ptb") {
            Environment::Preview
        } else if build.contains("-dev") {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Preview => "preview",
            Environment::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-identifying system information attached to captured events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub kernel: String,
    pub arch: String,
}

impl SystemInfo {
    /// Collect system information from the current host.
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            kernel: read_kernel_version(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

fn read_kernel_version() -> String {
    std::fs::read_to_string("/proc/version")
        .ok()
        .and_then(|v| v.split_whitespace().nth(2).map(String::from))
        .unwrap_or_default()
}

/// Process-wide metadata attached to every captured event
///
/// Write-rarely/read-often: built once in `arm()`, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureContext {
    /// Release identifier, `<version><build>` (e.g. `1.4.0-dev`).
    pub release: String,
    pub environment: Environment,
    pub system: SystemInfo,
    /// When capture was armed with this context.
    pub armed_at: DateTime<Utc>,
}

impl CaptureContext {
    pub fn new(version: &str, build: &str) -> Self {
        Self {
            release: format!("{version}{build}"),
            environment: Environment::from_build_string(build),
            system: SystemInfo::collect(),
            armed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_from_build_string() {
        // Debug builds short-circuit to development, so only exercise the
        // suffix logic in release mode.
        if cfg!(debug_assertions) {
            assert_eq!(
                Environment::from_build_string("-ptb"),
                Environment::Development
            );
        } else {
            assert_eq!(
                Environment::from_build_string("-ptb"),
                Environment::Preview
            );
            assert_eq!(
                Environment::from_build_string("-dev"),
                Environment::Development
            );
            assert_eq!(Environment::from_build_string(""), Environment::Production);
        }
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Preview.to_string(), "preview");
    }

    #[test]
    fn test_system_info_collect() {
        let info = SystemInfo::collect();
        assert!(!info.os.is_empty());
        assert!(!info.arch.is_empty());
    }

    #[test]
    fn test_context_release_string() {
        let ctx = CaptureContext::new("1.4.0", "-dev");
        assert_eq!(ctx.release, "1.4.0-dev");
    }
}
