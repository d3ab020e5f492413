//! Interfaces to the external remote-play protocol engine.
//!
//! The engine implements the discovery, registration, and session wire
//! protocols and delivers its results on its own background threads through
//! the callbacks registered here. This crate only orchestrates it.
//!
//! ```text
//! DiscoveryCoordinator ──listen/send_probe──► DiscoveryEngine ──DiscoveryResult──► callback
//! RegistrationCoordinator ──start─────────► RegistEngine ──────RegistEvent──────► callback
//! StreamingSession ──connect/start/stop───► SessionEngine ─────video/audio──────► sinks
//!                  ◄──────────────────────────────────────────ControllerFeed────┘
//! ```

use crate::error::EngineError;
use crate::host::{ACCOUNT_ID_SIZE, HostState, REGIST_KEY_SIZE, SESSION_KEY_SIZE, VideoProfile};
use crate::input::ControllerFeed;

// ── Discovery ─────────────────────────────────────────────────────

/// One discovery response, with fields exactly as they came off the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub state: HostState,
    /// Decimal string, e.g. `"07020001"`.
    pub system_version: Option<String>,
    /// Decimal string, e.g. `"00020020"`.
    pub device_discovery_protocol_version: Option<String>,
    pub host_request_port: Option<u16>,
    pub host_addr: Option<String>,
    pub host_name: Option<String>,
    pub host_type: Option<String>,
    pub host_id: Option<String>,
    pub running_app_titleid: Option<String>,
    pub running_app_name: Option<String>,
}

/// Invoked by the engine for every discovery response.
pub type DiscoveryCallback = Box<dyn Fn(DiscoveryResult) + Send + Sync + 'static>;

/// A running discovery receive loop.
pub trait DiscoveryListener: Send {
    /// Send one search request to `target` (unicast or broadcast address).
    fn send_probe(&mut self, target: &str) -> Result<(), EngineError>;

    /// Stop the receive loop and release the socket. No callback fires
    /// after this returns.
    fn stop(self: Box<Self>);
}

/// Factory for discovery listeners.
pub trait DiscoveryEngine: Send + Sync {
    fn listen(&self, on_host: DiscoveryCallback) -> Result<Box<dyn DiscoveryListener>, EngineError>;

    /// Send a wake-up packet carrying `credential` to `address`.
    fn wakeup(&self, address: &str, credential: u64) -> Result<(), EngineError>;
}

// ── Registration ──────────────────────────────────────────────────

/// Which PSN identity the console expects for pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsnIdentity {
    /// Firmware below 7.0.
    OnlineId(String),
    /// Firmware 7.0 and later.
    AccountId([u8; ACCOUNT_ID_SIZE]),
}

/// Parameters of one pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistRequest {
    pub host: String,
    pub broadcast: bool,
    pub pin: u32,
    pub identity: PsnIdentity,
}

/// Data returned by the console on successful pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredHost {
    pub ap_ssid: String,
    pub ap_bssid: String,
    pub ap_key: String,
    pub ap_name: String,
    pub console_mac: [u8; 6],
    pub console_nickname: String,
    pub regist_key: [u8; REGIST_KEY_SIZE],
    pub key_type: u32,
    pub session_key: [u8; SESSION_KEY_SIZE],
}

/// Terminal event of a pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistEvent {
    Canceled,
    Failed,
    Success(Box<RegisteredHost>),
}

/// Invoked by the engine when the handshake finishes.
pub type RegistCallback = Box<dyn FnMut(RegistEvent) + Send + 'static>;

/// A running pairing handshake.
pub trait RegistHandshake: Send {
    /// Abort (if still running), join the worker, and free resources.
    fn stop(self: Box<Self>);
}

pub trait RegistEngine: Send + Sync {
    fn start(
        &self,
        request: RegistRequest,
        on_event: RegistCallback,
    ) -> Result<Box<dyn RegistHandshake>, EngineError>;
}

// ── Session ───────────────────────────────────────────────────────

/// Connection parameters built from a paired host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub regist_key: [u8; REGIST_KEY_SIZE],
    pub session_key: [u8; SESSION_KEY_SIZE],
    pub video_profile: VideoProfile,
}

/// Receives compressed video access units from the engine.
pub trait VideoSink: Send {
    /// Returns `true` if a new frame was produced.
    fn on_video_packet(&mut self, packet: &[u8]) -> bool;
}

/// Receives decoded audio from the engine.
pub trait AudioSink: Send {
    fn on_format(&mut self, channels: u32, sample_rate: u32);
    fn on_samples(&mut self, pcm: &[i16], frames: usize);
}

/// Everything the engine calls back into while streaming.
pub struct SessionSinks {
    pub video: Box<dyn VideoSink>,
    pub audio: Box<dyn AudioSink>,
    pub controller: ControllerFeed,
}

/// One engine-side streaming session.
pub trait EngineSession: Send {
    /// Spawn the session's network threads.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Ask the session to stop and join its threads.
    fn stop(&mut self) -> Result<(), EngineError>;

    /// Release every engine resource. Consumes the handle.
    fn finalize(self: Box<Self>);
}

pub trait SessionEngine: Send + Sync {
    fn connect(
        &self,
        params: ConnectParams,
        sinks: SessionSinks,
    ) -> Result<Box<dyn EngineSession>, EngineError>;
}
