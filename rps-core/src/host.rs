//! Per-host record: identity, discovery data, user identity, pairing
//! secrets, and stream preferences.
//!
//! A [`HostRecord`] has no behaviour of its own beyond small typed
//! accessors; the coordinators mutate it under the registry's per-record
//! lock.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RpsError;

/// Size of the opaque regist key block.
pub const REGIST_KEY_SIZE: usize = 0x10;

/// Size of the session key (`morning`) block.
pub const SESSION_KEY_SIZE: usize = 0x10;

/// Size of a decoded PSN account id.
pub const ACCOUNT_ID_SIZE: usize = 8;

/// Firmware version from which registration uses the account id.
pub const ACCOUNT_ID_MIN_SYSTEM_VERSION: i32 = 7_000_000;

// ── HostState ─────────────────────────────────────────────────────

/// Power state reported by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HostState {
    #[default]
    Unknown,
    Standby,
    Ready,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Standby => write!(f, "standby"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

// ── Video preferences ─────────────────────────────────────────────

/// Stream resolution preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoResolution {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "540p")]
    P540,
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl VideoResolution {
    /// Decode input dimensions for this preset.
    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            Self::P360 => (640, 360),
            Self::P540 => (950, 540),
            Self::P720 => (1280, 720),
            Self::P1080 => (1920, 1080),
        }
    }

    /// Target bitrate in kbit/s negotiated for this preset.
    pub const fn bitrate_kbps(self) -> u32 {
        match self {
            Self::P360 => 2000,
            Self::P540 => 6000,
            Self::P720 => 10000,
            Self::P1080 => 15000,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P360 => "360p",
            Self::P540 => "540p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
        }
    }
}

impl fmt::Display for VideoResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoResolution {
    type Err = RpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "360p" => Ok(Self::P360),
            "540p" => Ok(Self::P540),
            "720p" => Ok(Self::P720),
            "1080p" => Ok(Self::P1080),
            other => Err(RpsError::precondition(format!(
                "unknown video resolution `{other}`"
            ))),
        }
    }
}

/// Stream frame-rate preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoFps {
    #[default]
    #[serde(rename = "30")]
    Fps30,
    #[serde(rename = "60")]
    Fps60,
}

impl VideoFps {
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Fps30 => 30,
            Self::Fps60 => 60,
        }
    }
}

impl fmt::Display for VideoFps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

impl FromStr for VideoFps {
    type Err = RpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "30" => Ok(Self::Fps30),
            "60" => Ok(Self::Fps60),
            other => Err(RpsError::precondition(format!(
                "unsupported frame rate `{other}`"
            ))),
        }
    }
}

/// Video profile handed to the engine when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub max_fps: u32,
    pub bitrate_kbps: u32,
}

impl VideoProfile {
    /// Build the profile for a `(resolution, fps)` preset pair.
    pub fn preset(resolution: VideoResolution, fps: VideoFps) -> Self {
        let (width, height) = resolution.dimensions();
        Self {
            width,
            height,
            max_fps: fps.as_u32(),
            bitrate_kbps: resolution.bitrate_kbps(),
        }
    }
}

// ── Pairing data ──────────────────────────────────────────────────

/// Long-lived secrets obtained from a successful registration.
///
/// Always stored as a unit: a host either has all three or none.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecrets {
    pub regist_key: [u8; REGIST_KEY_SIZE],
    pub key_type: u32,
    pub session_key: [u8; SESSION_KEY_SIZE],
}

impl SessionSecrets {
    /// Short, non-reversible identifier for logs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.regist_key);
        hasher.update(&self.session_key);
        hasher.finalize().to_hex().as_str()[..12].to_string()
    }

    /// The regist key's ASCII prefix (up to the first NUL).
    pub fn regist_key_text(&self) -> &[u8] {
        let end = self
            .regist_key
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(REGIST_KEY_SIZE);
        &self.regist_key[..end]
    }
}

impl fmt::Debug for SessionSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSecrets")
            .field("key_type", &self.key_type)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Access-point details reported by the console on registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub bssid: String,
    pub key: String,
    pub name: String,
    pub console_mac: [u8; 6],
    pub nickname: String,
}

/// Application running on the host at discovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApp {
    pub title_id: Option<String>,
    pub name: Option<String>,
}

// ── HostRecord ────────────────────────────────────────────────────

/// Identity and mutable state for one remote host.
#[derive(Debug, Clone, Default)]
pub struct HostRecord {
    // identity
    pub name: String,
    pub address: String,
    pub host_id: Option<String>,
    pub host_type: Option<String>,

    // discovery
    pub state: HostState,
    /// Firmware-derived version, e.g. `7020001`. Zero means unknown.
    pub system_version: i32,
    pub discovery_protocol_version: i32,
    pub request_port: Option<u16>,
    pub running_app: Option<RunningApp>,

    // user identity
    pub online_id: String,
    /// Base64 text of the 8-byte account id.
    pub account_id: String,

    // pairing
    pub wifi: Option<WifiCredentials>,
    secrets: Option<SessionSecrets>,

    // preferences
    pub video_resolution: VideoResolution,
    pub video_fps: VideoFps,

    // flags
    pub discovered: bool,
    pub registered: bool,
}

impl HostRecord {
    /// A default record keyed by `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// `true` iff regist key, key type, and session key are all present.
    pub fn has_secrets(&self) -> bool {
        self.secrets.is_some()
    }

    pub fn secrets(&self) -> Option<&SessionSecrets> {
        self.secrets.as_ref()
    }

    /// Store a complete secret triple (settings load path).
    pub fn set_secrets(&mut self, secrets: SessionSecrets) {
        self.secrets = Some(secrets);
    }

    /// Commit the result of a successful pairing in one step.
    pub fn commit_pairing(&mut self, wifi: WifiCredentials, secrets: SessionSecrets) {
        self.wifi = Some(wifi);
        self.secrets = Some(secrets);
        self.registered = true;
    }

    /// Video profile for the host's preferences.
    pub fn video_profile(&self) -> VideoProfile {
        VideoProfile::preset(self.video_resolution, self.video_fps)
    }
}

// ── Tests ────────────────────────────────────────────────────────
