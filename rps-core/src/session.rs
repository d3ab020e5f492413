//! Streaming session lifecycle.
//!
//! A [`StreamingSession`] owns one engine session plus the video, audio and
//! controller plumbing wired into it. The engine session is finalized
//! exactly once whichever way the session ends.
//!
//! ```text
//!  connect ──► Connected ──start──► Running ──stop──► Stopped
//!                  │                   │
//!                  └──start fails──────┴──drop──► Closed
//! ```

use std::sync::Arc;

use crate::audio::{AudioBackend, AudioPipeline};
use crate::engine::{ConnectParams, EngineSession, SessionEngine, SessionSinks};
use crate::error::RpsError;
use crate::input::{ControllerSender, ControllerState, controller_channel};
use crate::registry::SharedHost;
use crate::video::{DEFAULT_OUTPUT_SIZE, FrameReceiver, VideoBackend, VideoConfig, VideoPipeline};

/// Client-side knobs that are not part of the host record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Presentation size the scaler targets.
    pub output_size: (u32, u32),
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            output_size: DEFAULT_OUTPUT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    Running,
    Stopped,
    /// Start failed or the session was dropped.
    Closed,
}

impl SessionPhase {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connected | Self::Running)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

pub struct StreamingSession {
    host: String,
    phase: SessionPhase,
    engine_session: Option<Box<dyn EngineSession>>,
    controller: ControllerSender,
    frames: FrameReceiver,
}

impl StreamingSession {
    /// Connect to a paired host.
    ///
    /// The video pipeline is initialised before the engine is asked to
    /// connect, so a decoder failure never leaves an engine session behind.
    pub fn connect(
        engine: &dyn SessionEngine,
        host: &SharedHost,
        video: &dyn VideoBackend,
        audio: Arc<dyn AudioBackend>,
        options: SessionOptions,
    ) -> Result<Self, RpsError> {
        let (name, params, resolution) = {
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
            let params = ConnectParams {
                host: record.address.clone(),
                regist_key: secrets.regist_key,
                session_key: secrets.session_key,
                video_profile: record.video_profile(),
            };
            (record.name.clone(), params, record.video_resolution)
        };

        let (controller, feed) = controller_channel();

        let mut video_pipeline = VideoPipeline::new();
        video_pipeline.init(video, VideoConfig::for_preset(resolution, options.output_size))?;
        let frames = video_pipeline.frames();

        let profile = params.video_profile;
        let sinks = SessionSinks {
            video: Box::new(video_pipeline),
            audio: Box::new(AudioPipeline::new(audio)),
            controller: feed,
        };
        let engine_session = engine
            .connect(params, sinks)
            .map_err(RpsError::Connection)?;

        tracing::info!(
            host = %name,
            width = profile.width,
            height = profile.height,
            fps = profile.max_fps,
            bitrate_kbps = profile.bitrate_kbps,
            "session connected"
        );

        Ok(Self {
            host: name,
            phase: SessionPhase::Connected,
            engine_session: Some(engine_session),
            controller,
            frames,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Start streaming.
    ///
    /// Valid from: `Connected`. On failure the engine session is finalized
    /// and the session is `Closed`.
    pub fn start(&mut self) -> Result<(), RpsError> {
        if self.phase != SessionPhase::Connected {
            return Err(RpsError::InvalidState("session can only start once, from connected"));
        }
        let session = self
            .engine_session
            .as_mut()
            .ok_or(RpsError::InvalidState("session already finalized"))?;

        if let Err(e) = session.start() {
            tracing::error!(host = %self.host, "session start failed: {e}");
            self.finalize();
            self.phase = SessionPhase::Closed;
            return Err(RpsError::SessionStart(e));
        }

        self.phase = SessionPhase::Running;
        tracing::info!(host = %self.host, "session running");
        Ok(())
    }

    /// Stop the engine session and finalize it.
    ///
    /// Valid from: `Connected`, `Running`.
    pub fn stop(&mut self) -> Result<(), RpsError> {
        if !self.phase.is_live() {
            return Err(RpsError::InvalidState("session is not live"));
        }
        let stopped = match self.engine_session.as_mut() {
            Some(session) => session.stop(),
            None => Ok(()),
        };
        self.finalize();
        self.phase = SessionPhase::Stopped;
        tracing::info!(host = %self.host, "session stopped");
        stopped.map_err(RpsError::Engine)
    }

    /// Publish a controller snapshot; the engine sends the newest one.
    pub fn send_controller_state(&self, state: ControllerState) {
        self.controller.send(state);
    }

    /// A presentation-side reader for decoded frames.
    pub fn frames(&self) -> FrameReceiver {
        self.frames.clone()
    }

    fn finalize(&mut self) {
        if let Some(session) = self.engine_session.take() {
            session.finalize();
            tracing::debug!(host = %self.host, "engine session finalized");
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        if self.phase == SessionPhase::Running {
            if let Some(session) = self.engine_session.as_mut() {
                if let Err(e) = session.stop() {
                    tracing::warn!(host = %self.host, "stop on drop failed: {e}");
                }
            }
        }
        self.finalize();
        if self.phase.is_live() {
            self.phase = SessionPhase::Closed;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioDevice, AudioFormat};
    use crate::error::EngineError;
    use crate::host::{REGIST_KEY_SIZE, SESSION_KEY_SIZE, SessionSecrets, VideoResolution};
    use crate::registry::HostRegistry;
    use crate::video::{DecodedFrame, FrameScaler, Submit, VideoDecoder, VideoFrame};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Fakes ──

    struct NullDecoder;

    impl VideoDecoder for NullDecoder {
        fn submit_packet(&mut self, _: &[u8]) -> Result<Submit, RpsError> {
            Ok(Submit::Accepted)
        }
        fn receive_frame(&mut self, _: &mut DecodedFrame) -> bool {
            false
        }
    }

    struct NullScaler;

    impl FrameScaler for NullScaler {
        fn scale(&mut self, _: &DecodedFrame, _: u32, _: &mut VideoFrame) -> Result<(), RpsError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Video {
        fail: bool,
        configs: Mutex<Vec<VideoConfig>>,
    }

    impl VideoBackend for Video {
        fn open_decoder(&self, config: &VideoConfig) -> Result<Box<dyn VideoDecoder>, RpsError> {
            if self.fail {
                return Err(RpsError::VideoInit("no decoder".into()));
            }
            self.configs.lock().push(*config);
            Ok(Box::new(NullDecoder))
        }
        fn open_scaler(&self, _: &VideoConfig) -> Result<Box<dyn FrameScaler>, RpsError> {
            Ok(Box::new(NullScaler))
        }
    }

    struct Audio;

    impl AudioBackend for Audio {
        fn open(&self, _: AudioFormat) -> Result<Box<dyn AudioDevice>, RpsError> {
            Err(RpsError::AudioOpen("not in tests".into()))
        }
    }

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        stops: AtomicUsize,
        finalized: AtomicUsize,
    }

    #[derive(Default)]
    struct Engine {
        fail_start: bool,
        fail_connect: bool,
        counters: Arc<Counters>,
        params: Mutex<Option<ConnectParams>>,
    }

    struct Session {
        fail_start: bool,
        counters: Arc<Counters>,
    }

    impl EngineSession for Session {
        fn start(&mut self) -> Result<(), EngineError> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                Err(EngineError::Failed("handshake rejected".into()))
            } else {
                Ok(())
            }
        }
        fn stop(&mut self) -> Result<(), EngineError> {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn finalize(self: Box<Self>) {
            self.counters.finalized.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SessionEngine for Engine {
        fn connect(
            &self,
            params: ConnectParams,
            _sinks: SessionSinks,
        ) -> Result<Box<dyn EngineSession>, EngineError> {
            if self.fail_connect {
                return Err(EngineError::Init("out of memory".into()));
            }
            *self.params.lock() = Some(params);
            Ok(Box::new(Session {
                fail_start: self.fail_start,
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    fn paired_host() -> SharedHost {
        let registry = HostRegistry::new();
        let host = registry.get_or_create("den");
        {
            let mut record = host.lock();
            record.address = "10.0.0.2".into();
            record.video_resolution = VideoResolution::P1080;
            record.set_secrets(SessionSecrets {
                regist_key: [0x31; REGIST_KEY_SIZE],
                key_type: 1,
                session_key: [0x77; SESSION_KEY_SIZE],
            });
        }
        host
    }

    fn connect(engine: &Engine, video: &Video, host: &SharedHost) -> Result<StreamingSession, RpsError> {
        StreamingSession::connect(engine, host, video, Arc::new(Audio), SessionOptions::default())
    }

    #[test]
    fn connect_requires_secrets() {
        let registry = HostRegistry::new();
        let host = registry.get_or_create("bare");
        host.lock().address = "10.0.0.3".into();
        let engine = Engine::default();
        assert!(matches!(
            connect(&engine, &Video::default(), &host),
            Err(RpsError::Precondition(_))
        ));
        assert!(engine.params.lock().is_none());
    }

    #[test]
    fn connect_builds_params_from_record() {
        let engine = Engine::default();
        let video = Video::default();
        let session = connect(&engine, &video, &paired_host()).unwrap();
        assert_eq!(session.phase(), SessionPhase::Connected);

        let params = engine.params.lock().clone().unwrap();
        assert_eq!(params.host, "10.0.0.2");
        assert_eq!(params.session_key, [0x77; SESSION_KEY_SIZE]);
        assert_eq!(params.video_profile.bitrate_kbps, 15000);

        let config = video.configs.lock()[0];
        assert_eq!((config.source_width, config.source_height), (1920, 1080));
        assert_eq!((config.output_width, config.output_height), (1280, 720));
    }

    #[test]
    fn video_init_failure_never_reaches_engine() {
        let engine = Engine::default();
        let video = Video {
            fail: true,
            ..Default::default()
        };
        assert!(matches!(
            connect(&engine, &video, &paired_host()),
            Err(RpsError::VideoInit(_))
        ));
        assert!(engine.params.lock().is_none());
    }

    #[test]
    fn engine_connect_failure_is_connection_error() {
        let engine = Engine {
            fail_connect: true,
            ..Default::default()
        };
        assert!(matches!(
            connect(&engine, &Video::default(), &paired_host()),
            Err(RpsError::Connection(EngineError::Init(_)))
        ));
    }

    #[test]
    fn start_failure_finalizes_once() {
        let engine = Engine {
            fail_start: true,
            ..Default::default()
        };
        let mut session = connect(&engine, &Video::default(), &paired_host()).unwrap();
        assert!(matches!(session.start(), Err(RpsError::SessionStart(_))));
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert_eq!(engine.counters.finalized.load(Ordering::SeqCst), 1);

        drop(session);
        assert_eq!(engine.counters.finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_finalizes_once() {
        let engine = Engine::default();
        let mut session = connect(&engine, &Video::default(), &paired_host()).unwrap();
        session.start().unwrap();
        assert_eq!(session.phase(), SessionPhase::Running);
        session.stop().unwrap();
        assert_eq!(session.phase(), SessionPhase::Stopped);
        assert!(session.stop().is_err());
        drop(session);

        assert_eq!(engine.counters.stops.load(Ordering::SeqCst), 1);
        assert_eq!(engine.counters.finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_while_running_stops_and_finalizes() {
        let engine = Engine::default();
        let mut session = connect(&engine, &Video::default(), &paired_host()).unwrap();
        session.start().unwrap();
        drop(session);
        assert_eq!(engine.counters.stops.load(Ordering::SeqCst), 1);
        assert_eq!(engine.counters.finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_twice_is_invalid() {
        let engine = Engine::default();
        let mut session = connect(&engine, &Video::default(), &paired_host()).unwrap();
        session.start().unwrap();
        assert!(matches!(session.start(), Err(RpsError::InvalidState(_))));
        assert_eq!(engine.counters.starts.load(Ordering::SeqCst), 1);
    }
}
