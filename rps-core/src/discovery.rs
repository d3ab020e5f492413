//! Host discovery and console wake-up.
//!
//! A probe starts an engine listener, sends one search request, and merges
//! every response into the [`HostRegistry`] from the engine's receive
//! thread. The probe returns once the window elapses, the caller cancels,
//! or (for unicast targets) the first response arrives.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::engine::{DiscoveryCallback, DiscoveryEngine, DiscoveryResult};
use crate::error::RpsError;
use crate::host::{RunningApp, SessionSecrets};
use crate::registry::{HostRegistry, SharedHost};

/// How long a probe listens for responses.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(1);

/// Limited broadcast address for LAN-wide probes.
pub const BROADCAST_TARGET: &str = "255.255.255.255";

/// Longest regist key prefix usable as a wake-up credential.
const MAX_CREDENTIAL_DIGITS: usize = 8;

pub struct DiscoveryCoordinator {
    engine: Arc<dyn DiscoveryEngine>,
    registry: Arc<HostRegistry>,
    window: Duration,
}

impl DiscoveryCoordinator {
    pub fn new(engine: Arc<dyn DiscoveryEngine>, registry: Arc<HostRegistry>) -> Self {
        Self {
            engine,
            registry,
            window: DEFAULT_DISCOVERY_WINDOW,
        }
    }

    /// Override the listen window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Probe `target` and merge every response into the registry.
    ///
    /// Returns the number of responses merged; zero is not an error. The
    /// listener is stopped on every path.
    pub async fn probe(&self, target: &str, cancel: &CancellationToken) -> Result<usize, RpsError> {
        let merged = Arc::new(AtomicUsize::new(0));
        let first = Arc::new(Notify::new());

        let on_host: DiscoveryCallback = {
            let registry = Arc::clone(&self.registry);
            let merged = Arc::clone(&merged);
            let first = Arc::clone(&first);
            Box::new(move |result: DiscoveryResult| {
                if merge(&registry, &result).is_some() {
                    merged.fetch_add(1, Ordering::SeqCst);
                    first.notify_one();
                }
            })
        };

        let mut listener = self.engine.listen(on_host).map_err(RpsError::Connection)?;
        tracing::debug!(dest = target, window = ?self.window, "discovery probe");

        let outcome = match listener.send_probe(target) {
            Ok(()) => {
                let early = !is_broadcast(target);
                tokio::select! {
                    _ = tokio::time::sleep(self.window) => {}
                    _ = first.notified(), if early => {}
                    _ = cancel.cancelled() => {
                        tracing::debug!(dest = target, "discovery cancelled");
                    }
                }
                Ok(())
            }
            Err(e) => Err(RpsError::Engine(e)),
        };

        listener.stop();
        outcome?;

        let count = merged.load(Ordering::SeqCst);
        tracing::debug!(dest = target, count, "discovery probe finished");
        Ok(count)
    }

    /// Send a wake-up packet to a paired host.
    pub fn wakeup(&self, host: &SharedHost) -> Result<(), RpsError> {
        let (name, address, credential) = {
            let record = host.lock();
            let secrets = record.secrets().ok_or_else(|| {
                RpsError::precondition(format!("{} is not registered", record.name))
            })?;
            if record.address.is_empty() {
                return Err(RpsError::precondition(format!(
                    "{} has no address",
                    record.name
                )));
            }
            (
                record.name.clone(),
                record.address.clone(),
                wakeup_credential(secrets)?,
            )
        };

        self.engine.wakeup(&address, credential)?;
        tracing::info!(host = %name, %address, "wake-up sent");
        Ok(())
    }
}

/// Derive the wake-up credential from the regist key's hex prefix.
pub fn wakeup_credential(secrets: &SessionSecrets) -> Result<u64, RpsError> {
    let text = secrets.regist_key_text();
    if text.is_empty() || text.len() > MAX_CREDENTIAL_DIGITS {
        return Err(RpsError::precondition(format!(
            "regist key prefix must be 1 to {MAX_CREDENTIAL_DIGITS} hex digits, got {}",
            text.len()
        )));
    }
    if !text.iter().all(u8::is_ascii_hexdigit) {
        return Err(RpsError::precondition("regist key prefix is not hex"));
    }
    // All bytes are ASCII hex digits at this point.
    let digits = std::str::from_utf8(text)
        .map_err(|_| RpsError::precondition("regist key prefix is not hex"))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpsError::precondition(format!("regist key prefix: {e}")))
}

/// Merge one discovery response into the registry.
///
/// Returns the updated record, or `None` if the response carried no host
/// name.
pub fn merge(registry: &HostRegistry, result: &DiscoveryResult) -> Option<SharedHost> {
    let Some(name) = result.host_name.as_deref().filter(|n| !n.is_empty()) else {
        tracing::warn!(address = ?result.host_addr, "ignoring discovery response without host name");
        return None;
    };

    let host = registry.get_or_create(name);
    {
        let mut record = host.lock();
        record.state = result.state;
        record.name = name.to_string();
        if let Some(addr) = &result.host_addr {
            record.address = addr.clone();
        }
        if let Some(v) = parse_version(name, "system_version", result.system_version.as_deref()) {
            record.system_version = v;
        }
        if let Some(v) = parse_version(
            name,
            "device_discovery_protocol_version",
            result.device_discovery_protocol_version.as_deref(),
        ) {
            record.discovery_protocol_version = v;
        }
        if result.host_id.is_some() {
            record.host_id = result.host_id.clone();
        }
        if result.host_type.is_some() {
            record.host_type = result.host_type.clone();
        }
        if result.host_request_port.is_some() {
            record.request_port = result.host_request_port;
        }
        if result.running_app_titleid.is_some() || result.running_app_name.is_some() {
            record.running_app = Some(RunningApp {
                title_id: result.running_app_titleid.clone(),
                name: result.running_app_name.clone(),
            });
        }
        record.discovered = true;

        tracing::info!(
            host = %name,
            address = %record.address,
            state = %record.state,
            system_version = record.system_version,
            protocol_version = record.discovery_protocol_version,
            app = ?result.running_app_name,
            "host discovered"
        );
    }
    Some(host)
}

/// Parse a decimal version string; `None` keeps the previous value.
fn parse_version(host: &str, field: &str, text: Option<&str>) -> Option<i32> {
    let text = text?;
    match text.trim().parse::<i32>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(%host, field, value = text, "unparsable version, keeping previous");
            None
        }
    }
}

/// Only the limited broadcast address counts; a `.255` host can be unicast
/// on wider subnets.
pub(crate) fn is_broadcast(target: &str) -> bool {
    target
        .parse::<Ipv4Addr>()
        .is_ok_and(|ip| ip.is_broadcast())
}

// ── Tests ────────────────────────────────────────────────────────
