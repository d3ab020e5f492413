//! Host settings file.
//!
//! A flat, INI-like file with one section per host:
//!
//! ```text
//! [LIVING-ROOM]
//! host_ip = "192.168.1.20"
//! video_resolution = "720p"
//! video_fps = 30
//! psn_account_id = "AQIDBAUGBwg="
//! rp_key = "..."
//! rp_regist_key = "..."
//! rp_key_type = 2
//! ```
//!
//! Values may be quoted or bare. Reading is forgiving: unknown lines are
//! skipped and bad values are logged, never fatal. The file is rewritten in
//! full on save.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::RpsError;
use crate::host::{
    HostRecord, REGIST_KEY_SIZE, SESSION_KEY_SIZE, SessionSecrets, VideoFps, VideoResolution,
};
use crate::registry::HostRegistry;

/// Default file name, relative to the client's data directory.
pub const DEFAULT_SETTINGS_FILE: &str = "rps-hosts.conf";

// ── Parsed form ──────────────────────────────────────────────────

/// One `[name]` section as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSettings {
    pub name: String,
    pub host_ip: Option<String>,
    pub video_resolution: Option<VideoResolution>,
    pub video_fps: Option<VideoFps>,
    pub psn_online_id: Option<String>,
    pub psn_account_id: Option<String>,
    rp_key: Option<[u8; SESSION_KEY_SIZE]>,
    rp_regist_key: Option<[u8; REGIST_KEY_SIZE]>,
    rp_key_type: Option<u32>,
}

impl HostSettings {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// The secret triple, only if the section carried all three keys.
    pub fn secrets(&self) -> Option<SessionSecrets> {
        Some(SessionSecrets {
            regist_key: self.rp_regist_key?,
            key_type: self.rp_key_type?,
            session_key: self.rp_key?,
        })
    }
}

// ── Settings ─────────────────────────────────────────────────────

/// The settings file at a fixed path.
#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
}

impl Settings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file into `registry`. A missing file loads zero hosts.
    pub fn load(&self, registry: &HostRegistry) -> Result<usize, RpsError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no settings file yet");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let sections = parse_str(&text);
        let count = apply(registry, &sections);
        tracing::info!(path = %self.path.display(), hosts = count, "settings loaded");
        Ok(count)
    }

    /// Overwrite the file with every host in `registry`.
    pub fn save(&self, registry: &HostRegistry) -> Result<(), RpsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let hosts = registry.snapshot();
        fs::write(&self.path, render(&hosts))?;
        tracing::info!(path = %self.path.display(), hosts = hosts.len(), "settings saved");
        Ok(())
    }
}

// ── Reading ──────────────────────────────────────────────────────

/// Parse settings text into sections.
pub fn parse_str(text: &str) -> Vec<HostSettings> {
    let mut sections: Vec<HostSettings> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = section_name(line) {
            sections.push(HostSettings::new(name));
            continue;
        }

        let Some((key, value)) = split_entry(line) else {
            tracing::debug!(line = line_no, "skipping unrecognised settings line");
            continue;
        };
        let Some(section) = sections.last_mut() else {
            tracing::debug!(line = line_no, key, "skipping entry outside a host section");
            continue;
        };
        if let Err(e) = apply_entry(section, key, value, line_no) {
            tracing::warn!("{e}");
        }
    }

    sections
}

/// Merge parsed sections into the registry. Returns the number of sections.
pub fn apply(registry: &HostRegistry, sections: &[HostSettings]) -> usize {
    for section in sections {
        let host = registry.get_or_create(&section.name);
        let mut record = host.lock();
        if let Some(ip) = &section.host_ip {
            record.address = ip.clone();
        }
        if let Some(resolution) = section.video_resolution {
            record.video_resolution = resolution;
        }
        if let Some(fps) = section.video_fps {
            record.video_fps = fps;
        }
        if let Some(id) = &section.psn_online_id {
            record.online_id = id.clone();
        }
        if let Some(id) = &section.psn_account_id {
            record.account_id = id.clone();
        }
        match section.secrets() {
            Some(secrets) => {
                tracing::debug!(host = %section.name, fingerprint = %secrets.fingerprint(), "loaded pairing");
                record.set_secrets(secrets);
            }
            None if section.rp_key.is_some()
                || section.rp_regist_key.is_some()
                || section.rp_key_type.is_some() =>
            {
                tracing::warn!(host = %section.name, "incomplete pairing data ignored");
            }
            None => {}
        }
    }
    sections.len()
}

fn section_name(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?.trim();
    (!inner.is_empty()).then_some(inner)
}

fn split_entry(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key.trim(), value))
}

fn apply_entry(
    section: &mut HostSettings,
    key: &str,
    value: &str,
    line: usize,
) -> Result<(), RpsError> {
    let bad = |reason: String| RpsError::Settings { line, reason };

    match key {
        "host_ip" => {
            value
                .parse::<IpAddr>()
                .map_err(|e| bad(format!("host_ip `{value}`: {e}")))?;
            section.host_ip = Some(value.to_string());
        }
        "video_resolution" => {
            section.video_resolution = Some(value.parse().map_err(|e| bad(format!("{e}")))?);
        }
        "video_fps" => {
            section.video_fps = Some(value.parse().map_err(|e| bad(format!("{e}")))?);
        }
        "psn_online_id" => section.psn_online_id = Some(value.to_string()),
        "psn_account_id" => section.psn_account_id = Some(value.to_string()),
        "rp_key" => {
            section.rp_key = Some(decode_key(value).map_err(|e| bad(format!("rp_key: {e}")))?);
        }
        "rp_regist_key" => {
            section.rp_regist_key =
                Some(decode_key(value).map_err(|e| bad(format!("rp_regist_key: {e}")))?);
        }
        "rp_key_type" => {
            section.rp_key_type = Some(
                value
                    .parse()
                    .map_err(|e| bad(format!("rp_key_type `{value}`: {e}")))?,
            );
        }
        other => tracing::debug!(line, key = other, "skipping unknown settings key"),
    }
    Ok(())
}

fn decode_key<const N: usize>(text: &str) -> Result<[u8; N], RpsError> {
    let bytes = STANDARD.decode(text)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| RpsError::Encoding(format!("expected {N} bytes, got {len}")))
}

// ── Writing ──────────────────────────────────────────────────────

/// Render hosts in settings-file form.
pub fn render(hosts: &[HostRecord]) -> String {
    let mut out = String::new();
    for host in hosts {
        // Writing into a String cannot fail.
        let _ = write_host(&mut out, host);
    }
    out
}

fn write_host(out: &mut String, host: &HostRecord) -> std::fmt::Result {
    writeln!(out, "[{}]", host.name)?;
    if !host.address.is_empty() {
        writeln!(out, "host_ip = \"{}\"", host.address)?;
    }
    writeln!(out, "video_resolution = \"{}\"", host.video_resolution)?;
    writeln!(out, "video_fps = {}", host.video_fps)?;
    if !host.online_id.is_empty() {
        writeln!(out, "psn_online_id = \"{}\"", host.online_id)?;
    }
    if !host.account_id.is_empty() {
        writeln!(out, "psn_account_id = \"{}\"", host.account_id)?;
    }
    if let Some(secrets) = host.secrets() {
        writeln!(out, "rp_key = \"{}\"", STANDARD.encode(secrets.session_key))?;
        writeln!(out, "rp_regist_key = \"{}\"", STANDARD.encode(secrets.regist_key))?;
        writeln!(out, "rp_key_type = {}", secrets.key_type)?;
    }
    writeln!(out)
}

// ── Tests ────────────────────────────────────────────────────────
