//! PIN pairing.
//!
//! Builds the registration request from a discovered host, runs the engine
//! handshake, waits for its single terminal event and commits the result
//! into the host record.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::discovery::is_broadcast;
use crate::engine::{PsnIdentity, RegistCallback, RegistEngine, RegistEvent, RegistRequest};
use crate::error::{EngineError, RpsError};
use crate::host::{
    ACCOUNT_ID_MIN_SYSTEM_VERSION, ACCOUNT_ID_SIZE, HostRecord, SessionSecrets, WifiCredentials,
};
use crate::registry::SharedHost;

/// Upper bound on one pairing handshake.
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// How a pairing attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistOutcome {
    Success,
    Failed,
    Canceled,
}

pub struct RegistrationCoordinator {
    engine: Arc<dyn RegistEngine>,
    timeout: Duration,
}

impl RegistrationCoordinator {
    pub fn new(engine: Arc<dyn RegistEngine>) -> Self {
        Self {
            engine,
            timeout: DEFAULT_REGISTRATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pair with `host` using the PIN shown on the console.
    ///
    /// Preconditions are checked before the engine is touched. A timeout is
    /// an error and leaves the record as it was; caller cancellation is
    /// `Ok(Canceled)`. The handshake is stopped on every path.
    pub async fn register(
        &self,
        host: &SharedHost,
        pin: &str,
        cancel: &CancellationToken,
    ) -> Result<RegistOutcome, RpsError> {
        let (name, request) = {
            let record = host.lock();
            (record.name.clone(), build_request(&record, pin)?)
        };
        tracing::info!(
            host = %name,
            address = %request.host,
            account_id = matches!(request.identity, PsnIdentity::AccountId(_)),
            "starting registration"
        );

        let (tx, mut rx) = oneshot::channel();
        let mut tx = Some(tx);
        let on_event: RegistCallback = Box::new(move |event| {
            // Only the first terminal event counts.
            if let Some(tx) = tx.take() {
                let _ = tx.send(event);
            }
        });

        let handshake = self
            .engine
            .start(request, on_event)
            .map_err(RpsError::Connection)?;

        // A delivered event always beats cancel and timeout.
        let (waited, settled) = tokio::select! {
            biased;
            event = &mut rx => {
                let event = event.map_err(|_| {
                    RpsError::Engine(EngineError::Failed("handshake ended without an event".into()))
                });
                (event, true)
            }
            _ = cancel.cancelled() => (Ok(RegistEvent::Canceled), false),
            _ = tokio::time::sleep(self.timeout) => (Err(RpsError::Timeout(self.timeout)), false),
        };

        handshake.stop();

        // The engine may still report while being stopped.
        let waited = match (settled, rx.try_recv()) {
            (false, Ok(event)) => {
                tracing::debug!(host = %name, "terminal event arrived during stop");
                Ok(event)
            }
            _ => waited,
        };

        match waited {
            Ok(event) => Ok(apply_outcome(host, event)),
            Err(e) => {
                tracing::warn!(host = %name, "registration aborted: {e}");
                Err(e)
            }
        }
    }
}

/// Validate `record` and `pin` and build the engine request.
pub fn build_request(record: &HostRecord, pin: &str) -> Result<RegistRequest, RpsError> {
    let pin: u32 = pin
        .trim()
        .parse()
        .map_err(|_| RpsError::precondition("PIN must be numeric"))?;

    if record.address.is_empty() {
        return Err(RpsError::precondition(format!(
            "{} has no address, run discovery first",
            record.name
        )));
    }

    let identity = if record.system_version >= ACCOUNT_ID_MIN_SYSTEM_VERSION {
        PsnIdentity::AccountId(decode_account_id(&record.account_id)?)
    } else if record.system_version > 0 {
        if record.online_id.is_empty() {
            return Err(RpsError::precondition("PSN online id is required"));
        }
        PsnIdentity::OnlineId(record.online_id.clone())
    } else {
        return Err(RpsError::precondition(format!(
            "{} has an unknown system version, run discovery first",
            record.name
        )));
    };

    Ok(RegistRequest {
        host: record.address.clone(),
        broadcast: is_broadcast(&record.address),
        pin,
        identity,
    })
}

fn decode_account_id(text: &str) -> Result<[u8; ACCOUNT_ID_SIZE], RpsError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(RpsError::precondition("PSN account id is required"));
    }
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| RpsError::precondition(format!("PSN account id is not base64: {e}")))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        RpsError::precondition(format!(
            "PSN account id must decode to {ACCOUNT_ID_SIZE} bytes, got {len}"
        ))
    })
}

/// Apply a terminal registration event to the host record.
pub fn apply_outcome(host: &SharedHost, event: RegistEvent) -> RegistOutcome {
    let mut record = host.lock();
    match event {
        RegistEvent::Canceled => {
            tracing::info!(host = %record.name, "registration canceled");
            RegistOutcome::Canceled
        }
        RegistEvent::Failed => {
            // Secrets from an earlier pairing stay usable.
            record.registered = false;
            tracing::warn!(host = %record.name, "registration failed");
            RegistOutcome::Failed
        }
        RegistEvent::Success(paired) => {
            let paired = *paired;
            let secrets = SessionSecrets {
                regist_key: paired.regist_key,
                key_type: paired.key_type,
                session_key: paired.session_key,
            };
            let fingerprint = secrets.fingerprint();
            let wifi = WifiCredentials {
                ssid: paired.ap_ssid,
                bssid: paired.ap_bssid,
                key: paired.ap_key,
                name: paired.ap_name,
                console_mac: paired.console_mac,
                nickname: paired.console_nickname,
            };
            record.commit_pairing(wifi, secrets);
            tracing::info!(host = %record.name, %fingerprint, "registration succeeded");
            RegistOutcome::Success
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
