//! Fixed-cadence stream driver.
//!
//! Each tick drains the presentation surface's input events, folds them
//! into the controller state, hands any change to the session, and shows
//! the newest decoded frame if one arrived since the last tick. Frames that
//! arrive faster than the cadence are skipped, never queued.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rps_core::{
    ControllerState, FrameReceiver, InputEncoder, InputEvent, RpsError, StreamingSession,
    VideoFrame,
};

/// Something the surface reports between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Input(InputEvent),
    /// The user closed the surface.
    Quit,
}

/// Presentation surface and input source.
pub trait Surface {
    /// Events since the last call, oldest first.
    fn poll_events(&mut self) -> Vec<SurfaceEvent>;

    /// Show one YUV 4:2:0 frame.
    fn present(&mut self, frame: &VideoFrame) -> Result<(), RpsError>;
}

/// Counters for one driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub ticks: u64,
    pub presented: u64,
    pub controller_updates: u64,
    pub unhandled_inputs: u64,
}

pub struct StreamDriver {
    period: Duration,
    state: ControllerState,
    frames: FrameReceiver,
    stats: DriverStats,
}

impl StreamDriver {
    /// A driver for `session` ticking at `frame_rate_hz`.
    pub fn new(session: &StreamingSession, frame_rate_hz: u32) -> Self {
        Self {
            period: Duration::from_secs(1) / frame_rate_hz.max(1),
            state: ControllerState::default(),
            frames: session.frames(),
            stats: DriverStats::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    /// Controller state as of the last tick.
    pub fn controller_state(&self) -> ControllerState {
        self.state
    }

    /// Run one iteration. Returns `false` once the surface asks to quit.
    pub fn tick(&mut self, session: &StreamingSession, surface: &mut dyn Surface) -> bool {
        self.stats.ticks += 1;

        let mut changed = false;
        let mut quit = false;
        for event in surface.poll_events() {
            match event {
                SurfaceEvent::Quit => {
                    debug!("surface closed");
                    quit = true;
                    break;
                }
                SurfaceEvent::Input(input) => {
                    if InputEncoder::apply(&mut self.state, &input) {
                        changed = true;
                    } else {
                        self.stats.unhandled_inputs += 1;
                    }
                }
            }
        }
        if changed {
            session.send_controller_state(self.state);
            self.stats.controller_updates += 1;
        }
        if quit {
            return false;
        }

        if self.frames.has_new() {
            if let Some(frame) = self.frames.latest() {
                match surface.present(&frame) {
                    Ok(()) => self.stats.presented += 1,
                    Err(e) => warn!(sequence = frame.sequence, "present failed: {e}"),
                }
            }
        }
        true
    }

    /// Tick until the surface quits or `cancel` fires.
    pub async fn run(
        &mut self,
        session: &StreamingSession,
        surface: &mut dyn Surface,
        cancel: &CancellationToken,
    ) -> DriverStats {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.tick(session, surface) {
                        break;
                    }
                }
            }
        }

        debug!(stats = ?self.stats, host = session.host(), "driver stopped");
        self.stats
    }
}

// ── Tests ────────────────────────────────────────────────────────
