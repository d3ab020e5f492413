//! # rps-core
//!
//! Client-side orchestration for remote-console streaming.
//!
//! This crate contains:
//! - **Hosts**: `HostRecord` and the shared `HostRegistry`
//! - **Discovery**: `DiscoveryCoordinator` probes, merges responses, and wakes consoles
//! - **Registration**: `RegistrationCoordinator` runs PIN pairing and commits secrets
//! - **Session**: `StreamingSession` owns one engine session and its media plumbing
//! - **Media**: `VideoPipeline` (decode/scale with backpressure) and `AudioPipeline`
//! - **Input**: `InputEncoder` and the controller-state mailbox
//! - **Settings**: the per-host settings file
//! - **Engine**: traits the external protocol engine implements
//! - **Error**: `RpsError`, a typed `thiserror`-based error hierarchy

pub mod audio;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod host;
pub mod input;
pub mod registration;
pub mod registry;
pub mod session;
pub mod settings;
pub mod video;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use audio::{AudioBackend, AudioDevice, AudioFormat, AudioPipeline};
pub use discovery::{BROADCAST_TARGET, DEFAULT_DISCOVERY_WINDOW, DiscoveryCoordinator};
pub use error::{EngineError, ErrorKind, RpsError};
pub use host::{
    HostRecord, HostState, SessionSecrets, VideoFps, VideoProfile, VideoResolution,
    WifiCredentials,
};
pub use input::{
    Buttons, ControllerFeed, ControllerSender, ControllerState, InputEncoder, InputEvent,
    controller_channel,
};
pub use registration::{DEFAULT_REGISTRATION_TIMEOUT, RegistOutcome, RegistrationCoordinator};
pub use registry::{HostRegistry, SharedHost};
pub use session::{SessionOptions, SessionPhase, StreamingSession};
pub use settings::Settings;
pub use video::{FrameReceiver, VideoBackend, VideoConfig, VideoFrame, VideoPipeline};
