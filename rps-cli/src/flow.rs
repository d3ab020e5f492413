//! Pair-and-stream flow.
//!
//! ```text
//! load settings ─► pick host ─► discover ─► (unpaired) PIN prompt ─► register ─► save
//!                                       └─► (standby) wake-up
//! connect ─► start ─► StreamDriver::run ─► stop
//! ```
//!
//! The protocol engine and the media backends are supplied by the embedder.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rps_core::engine::{DiscoveryEngine, RegistEngine, SessionEngine};
use rps_core::{
    AudioBackend, DiscoveryCoordinator, HostRegistry, HostState, RegistOutcome,
    RegistrationCoordinator, RpsError, Settings, SharedHost, StreamingSession, VideoBackend,
};

use crate::config::ClientConfig;
use crate::driver::{DriverStats, StreamDriver, Surface};

/// Everything the flow needs from outside the crate.
#[derive(Clone)]
pub struct Engines {
    pub discovery: Arc<dyn DiscoveryEngine>,
    pub regist: Arc<dyn RegistEngine>,
    pub session: Arc<dyn SessionEngine>,
    pub video: Arc<dyn VideoBackend>,
    pub audio: Arc<dyn AudioBackend>,
}

/// Asks the user for the PIN shown on the console.
pub trait PinPrompt {
    fn read_pin(&mut self, host: &str) -> io::Result<String>;
}

/// Line-based prompt over any reader/writer pair.
pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl LinePrompt<io::StdinLock<'static>, io::Stdout> {
    /// Prompt on the terminal.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> PinPrompt for LinePrompt<R, W> {
    fn read_pin(&mut self, host: &str) -> io::Result<String> {
        write!(self.output, "Remote play PIN for {host}: ")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no PIN entered"));
        }
        Ok(line.trim().to_string())
    }
}

/// Load hosts, pair if needed, then stream until the surface quits or
/// `cancel` fires.
///
/// `host_name` selects a settings section; without it the settings file
/// must hold exactly one host. A canceled pairing ends the flow with empty
/// stats.
pub async fn pair_and_stream(
    config: &ClientConfig,
    engines: &Engines,
    host_name: Option<&str>,
    prompt: &mut dyn PinPrompt,
    surface: &mut dyn Surface,
    cancel: &CancellationToken,
) -> Result<DriverStats, RpsError> {
    let registry = Arc::new(HostRegistry::new());
    let settings = Settings::new(&config.storage.hosts_file);
    settings.load(&registry)?;

    let host = pick_host(&registry, host_name)?;
    let name = host.lock().name.clone();

    let discovery = DiscoveryCoordinator::new(Arc::clone(&engines.discovery), Arc::clone(&registry))
        .with_window(config.discovery.window());
    let target = {
        let record = host.lock();
        if record.address.is_empty() {
            config.discovery.target.clone()
        } else {
            record.address.clone()
        }
    };
    let found = discovery.probe(&target, cancel).await?;
    info!(host = %name, %target, found, "discovery done");

    if !host.lock().has_secrets() {
        let pin = prompt.read_pin(&name)?;
        let outcome = RegistrationCoordinator::new(Arc::clone(&engines.regist))
            .with_timeout(config.registration.timeout())
            .register(&host, &pin, cancel)
            .await?;
        match outcome {
            RegistOutcome::Success => settings.save(&registry)?,
            RegistOutcome::Failed => {
                return Err(RpsError::precondition(format!("{name} rejected the PIN")));
            }
            RegistOutcome::Canceled => return Ok(DriverStats::default()),
        }
    }

    if host.lock().state == HostState::Standby {
        if let Err(e) = discovery.wakeup(&host) {
            warn!(host = %name, "wake-up failed: {e}");
        }
    }

    let mut session = StreamingSession::connect(
        engines.session.as_ref(),
        &host,
        engines.video.as_ref(),
        Arc::clone(&engines.audio),
        config.display.session_options(),
    )?;
    session.start()?;

    let mut driver = StreamDriver::new(&session, config.display.frame_rate_hz);
    let stats = driver.run(&session, surface, cancel).await;
    session.stop()?;
    Ok(stats)
}

fn pick_host(registry: &HostRegistry, host_name: Option<&str>) -> Result<SharedHost, RpsError> {
    match host_name {
        Some(name) => registry
            .lookup(name)
            .ok_or_else(|| RpsError::precondition(format!("no host named {name} in settings"))),
        None => {
            let names = registry.names();
            match names.as_slice() {
                [only] => registry
                    .lookup(only)
                    .ok_or_else(|| RpsError::precondition(format!("{only} vanished"))),
                [] => Err(RpsError::precondition("settings file has no hosts")),
                _ => Err(RpsError::precondition(format!(
                    "{} hosts configured, name one",
                    names.len()
                ))),
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
