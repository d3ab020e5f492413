//! Client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where host records are kept.
    pub storage: StorageConfig,
    /// Discovery probing.
    pub discovery: DiscoveryConfig,
    /// PIN pairing.
    pub registration: RegistrationConfig,
    /// Presentation settings.
    pub display: DisplayConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Host settings storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the per-host settings file.
    pub hosts_file: PathBuf,
}

/// Discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Address probed when no host is named.
    pub target: String,
    /// Listen window in milliseconds.
    pub timeout_ms: u64,
}

/// Registration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Handshake timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Scaler output width.
    pub width: u32,
    /// Scaler output height.
    pub height: u32,
    /// Driver loop cadence.
    pub frame_rate_hz: u32,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, used when `RUST_LOG` is unset.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            hosts_file: PathBuf::from(rps_core::settings::DEFAULT_SETTINGS_FILE),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            target: rps_core::BROADCAST_TARGET.into(),
            timeout_ms: rps_core::DEFAULT_DISCOVERY_WINDOW.as_millis() as u64,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: rps_core::DEFAULT_REGISTRATION_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        let (width, height) = rps_core::video::DEFAULT_OUTPUT_SIZE;
        Self {
            width,
            height,
            frame_rate_hz: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Derived values ───────────────────────────────────────────────

impl DiscoveryConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RegistrationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl DisplayConfig {
    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn session_options(&self) -> rps_core::SessionOptions {
        rps_core::SessionOptions {
            output_size: self.output_size(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────
