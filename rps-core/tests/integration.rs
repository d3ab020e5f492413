//! Integration tests: discover, pair, persist, and stream against an
//! in-process fake engine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use rps_core::audio::{AudioBackend, AudioDevice, AudioFormat};
use rps_core::engine::{
    ConnectParams, DiscoveryCallback, DiscoveryEngine, DiscoveryListener, DiscoveryResult,
    EngineSession, RegistCallback, RegistEngine, RegistEvent, RegistHandshake, RegistRequest,
    RegisteredHost, SessionEngine, SessionSinks,
};
use rps_core::video::{DecodedFrame, FrameScaler, Submit, VideoDecoder};
use rps_core::{
    Buttons, ControllerState, DiscoveryCoordinator, EngineError, HostRegistry, HostState,
    InputEncoder, InputEvent, RegistOutcome, RegistrationCoordinator, RpsError, SessionOptions,
    SessionPhase, Settings, StreamingSession, VideoBackend, VideoConfig, VideoFrame,
};

// ── Fake discovery ───────────────────────────────────────────────

struct Discovery;

struct Listener {
    on_host: Arc<DiscoveryCallback>,
}

impl DiscoveryListener for Listener {
    fn send_probe(&mut self, _target: &str) -> Result<(), EngineError> {
        let on_host = Arc::clone(&self.on_host);
        std::thread::spawn(move || {
            (*on_host)(DiscoveryResult {
                state: HostState::Ready,
                system_version: Some("07020001".into()),
                device_discovery_protocol_version: Some("00020020".into()),
                host_addr: Some("192.168.1.20".into()),
                host_name: Some("LIVING-ROOM".into()),
                host_id: Some("0123456789AB".into()),
                ..Default::default()
            });
        });
        Ok(())
    }

    fn stop(self: Box<Self>) {}
}

impl DiscoveryEngine for Discovery {
    fn listen(&self, on_host: DiscoveryCallback) -> Result<Box<dyn DiscoveryListener>, EngineError> {
        Ok(Box::new(Listener {
            on_host: Arc::new(on_host),
        }))
    }

    fn wakeup(&self, _address: &str, _credential: u64) -> Result<(), EngineError> {
        Ok(())
    }
}

// ── Fake registration ────────────────────────────────────────────

#[derive(Default)]
struct Regist {
    seen: Mutex<Option<RegistRequest>>,
}

struct Handshake;

impl RegistHandshake for Handshake {
    fn stop(self: Box<Self>) {}
}

impl RegistEngine for Regist {
    fn start(
        &self,
        request: RegistRequest,
        mut on_event: RegistCallback,
    ) -> Result<Box<dyn RegistHandshake>, EngineError> {
        *self.seen.lock() = Some(request);
        std::thread::spawn(move || {
            on_event(RegistEvent::Success(Box::new(RegisteredHost {
                ap_ssid: "PS4-0123".into(),
                ap_bssid: "01:23:45:67:89:ab".into(),
                ap_key: "wpa".into(),
                ap_name: "PS4".into(),
                console_mac: [0x01, 0x23, 0x45, 0x67, 0x89, 0xab],
                console_nickname: "LIVING-ROOM".into(),
                regist_key: *b"c0ffee00\0\0\0\0\0\0\0\0",
                key_type: 2,
                session_key: [0x11; 16],
            })));
        });
        Ok(Box::new(Handshake))
    }
}

// ── Fake video ───────────────────────────────────────────────────

/// One frame per packet; the frame's luma is the packet's first byte.
#[derive(Default)]
struct Decoder {
    queued: VecDeque<u8>,
}

impl VideoDecoder for Decoder {
    fn submit_packet(&mut self, packet: &[u8]) -> Result<Submit, RpsError> {
        let tag = *packet
            .first()
            .ok_or_else(|| RpsError::Decode("empty packet".into()))?;
        self.queued.push_back(tag);
        Ok(Submit::Accepted)
    }

    fn receive_frame(&mut self, frame: &mut DecodedFrame) -> bool {
        let Some(tag) = self.queued.pop_front() else {
            return false;
        };
        frame.width = 1920;
        frame.height = 1080;
        frame.linesize = [1920, 960, 960];
        frame.planes[0].clear();
        frame.planes[0].push(tag);
        true
    }
}

struct Scaler;

impl FrameScaler for Scaler {
    fn scale(&mut self, src: &DecodedFrame, _rows: u32, dst: &mut VideoFrame) -> Result<(), RpsError> {
        dst.planes[0].fill(src.planes[0][0]);
        Ok(())
    }
}

struct Video;

impl VideoBackend for Video {
    fn open_decoder(&self, _: &VideoConfig) -> Result<Box<dyn VideoDecoder>, RpsError> {
        Ok(Box::new(Decoder::default()))
    }

    fn open_scaler(&self, _: &VideoConfig) -> Result<Box<dyn FrameScaler>, RpsError> {
        Ok(Box::new(Scaler))
    }
}

// ── Fake audio ───────────────────────────────────────────────────

#[derive(Default)]
struct Audio {
    samples: Arc<AtomicUsize>,
}

struct Speaker {
    samples: Arc<AtomicUsize>,
}

impl AudioDevice for Speaker {
    fn enqueue(&mut self, samples: &[i16]) -> Result<(), RpsError> {
        self.samples.fetch_add(samples.len(), Ordering::SeqCst);
        Ok(())
    }
}

impl AudioBackend for Audio {
    fn open(&self, _: AudioFormat) -> Result<Box<dyn AudioDevice>, RpsError> {
        Ok(Box::new(Speaker {
            samples: Arc::clone(&self.samples),
        }))
    }
}

// ── Fake session ─────────────────────────────────────────────────

#[derive(Default)]
struct Engine {
    params: Mutex<Option<ConnectParams>>,
    sent: Arc<Mutex<Vec<ControllerState>>>,
    finalized: Arc<AtomicUsize>,
}

struct Session {
    sinks: Option<SessionSinks>,
    worker: Option<JoinHandle<SessionSinks>>,
    sent: Arc<Mutex<Vec<ControllerState>>>,
    finalized: Arc<AtomicUsize>,
}

impl EngineSession for Session {
    fn start(&mut self) -> Result<(), EngineError> {
        let mut sinks = self
            .sinks
            .take()
            .ok_or_else(|| EngineError::Failed("already started".into()))?;
        self.worker = Some(std::thread::spawn(move || {
            sinks.audio.on_format(2, 48_000);
            sinks.audio.on_samples(&[0; 2048], 1024);
            for tag in 1..=3u8 {
                sinks.video.on_video_packet(&[tag]);
            }
            sinks
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        if let Some(worker) = self.worker.take() {
            let mut sinks = worker
                .join()
                .map_err(|_| EngineError::Failed("worker panicked".into()))?;
            if let Some(state) = sinks.controller.take_latest() {
                self.sent.lock().push(state);
            }
        }
        Ok(())
    }

    fn finalize(self: Box<Self>) {
        self.finalized.fetch_add(1, Ordering::SeqCst);
    }
}

impl SessionEngine for Engine {
    fn connect(
        &self,
        params: ConnectParams,
        sinks: SessionSinks,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        *self.params.lock() = Some(params);
        Ok(Box::new(Session {
            sinks: Some(sinks),
            worker: None,
            sent: Arc::clone(&self.sent),
            finalized: Arc::clone(&self.finalized),
        }))
    }
}

fn scratch_settings(name: &str) -> Settings {
    Settings::new(
        std::env::temp_dir()
            .join(format!("rps-it-{}-{name}", std::process::id()))
            .join("hosts.conf"),
    )
}

// ── End to end ───────────────────────────────────────────────────

#[tokio::test]
async fn discover_pair_persist_and_stream() {
    let registry = Arc::new(HostRegistry::new());
    let cancel = CancellationToken::new();

    // Discover.
    let discovery = DiscoveryCoordinator::new(Arc::new(Discovery), Arc::clone(&registry))
        .with_window(Duration::from_secs(5));
    assert_eq!(discovery.probe("192.168.1.20", &cancel).await.unwrap(), 1);
    let host = registry.lookup("LIVING-ROOM").unwrap();
    assert_eq!(host.lock().system_version, 7020001);

    // Pair with an account id (firmware >= 7.0).
    host.lock().account_id = "AQIDBAUGBwg=".into();
    let regist = Arc::new(Regist::default());
    let outcome = RegistrationCoordinator::new(regist.clone())
        .register(&host, "12345678", &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, RegistOutcome::Success);
    assert!(host.lock().has_secrets());
    assert_eq!(regist.seen.lock().as_ref().map(|r| r.pin), Some(12345678));

    // Wake-up derives its credential from the regist key.
    discovery.wakeup(&host).unwrap();

    // Persist and reload into a fresh registry.
    let settings = scratch_settings("e2e");
    settings.save(&registry).unwrap();
    let reloaded = HostRegistry::new();
    assert_eq!(settings.load(&reloaded).unwrap(), 1);
    let host = reloaded.lookup("LIVING-ROOM").unwrap();
    assert!(host.lock().has_secrets());
    let _ = std::fs::remove_dir_all(settings.path().parent().unwrap());

    // Stream.
    let engine = Engine::default();
    let audio = Audio::default();
    let samples = Arc::clone(&audio.samples);
    let mut session = StreamingSession::connect(
        &engine,
        &host,
        &Video,
        Arc::new(audio),
        SessionOptions::default(),
    )
    .unwrap();
    assert_eq!(
        engine.params.lock().as_ref().map(|p| p.session_key),
        Some([0x11; 16])
    );

    let mut frames = session.frames();
    assert_ok!(session.start());

    let mut state = ControllerState::default();
    InputEncoder::apply(&mut state, &InputEvent::ButtonDown(1));
    session.send_controller_state(state);

    let newest = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = frames.changed().await.unwrap();
            if frame.sequence == 3 {
                break frame;
            }
        }
    })
    .await
    .unwrap();
    assert!(newest.planes[0].iter().all(|&b| b == 3));
    assert_eq!((newest.width, newest.height), (1280, 720));

    assert_ok!(session.stop());
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert_eq!(engine.finalized.load(Ordering::SeqCst), 1);
    assert_eq!(samples.load(Ordering::SeqCst), 2048);
    assert_eq!(engine.sent.lock().last().map(|s| s.buttons), Some(Buttons::CROSS));
}

#[tokio::test]
async fn unpaired_host_cannot_stream() {
    let registry = HostRegistry::new();
    let host = registry.get_or_create("den");
    host.lock().address = "10.0.0.2".into();

    let engine = Engine::default();
    let err = StreamingSession::connect(
        &engine,
        &host,
        &Video,
        Arc::new(Audio::default()),
        SessionOptions::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RpsError::Precondition(_)));
    assert!(engine.params.lock().is_none());
}

#[test]
fn dropped_session_finalizes_once() {
    let registry = HostRegistry::new();
    let host = registry.get_or_create("den");
    {
        let mut record = host.lock();
        record.address = "10.0.0.2".into();
        record.set_secrets(rps_core::SessionSecrets {
            regist_key: [0x41; 16],
            key_type: 1,
            session_key: [0x42; 16],
        });
    }

    let engine = Engine::default();
    let mut session = StreamingSession::connect(
        &engine,
        &host,
        &Video,
        Arc::new(Audio::default()),
        SessionOptions::default(),
    )
    .unwrap();
    session.start().unwrap();
    drop(session);
    assert_eq!(engine.finalized.load(Ordering::SeqCst), 1);
}
