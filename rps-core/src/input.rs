//! Local input → controller-state encoding.
//!
//! Translates raw joystick / touch events from the presentation surface
//! into the controller-state record the engine sends to the console, and
//! provides the single-slot mailbox that carries that record from the
//! driver thread to the engine's send thread.

use bitflags::bitflags;
use tokio::sync::watch;

use crate::error::RpsError;

// ── Buttons ──────────────────────────────────────────────────────

bitflags! {
    /// Console button bitmask as carried on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Buttons: u32 {
        const CROSS      = 1 << 0;
        const MOON       = 1 << 1;
        const BOX        = 1 << 2;
        const PYRAMID    = 1 << 3;
        const DPAD_LEFT  = 1 << 4;
        const DPAD_RIGHT = 1 << 5;
        const DPAD_UP    = 1 << 6;
        const DPAD_DOWN  = 1 << 7;
        const L1         = 1 << 8;
        const R1         = 1 << 9;
        const L3         = 1 << 10;
        const R3         = 1 << 11;
        const OPTIONS    = 1 << 12;
        const SHARE      = 1 << 13;
        const TOUCHPAD   = 1 << 14;
        const PS         = 1 << 15;
    }
}

// ── ControllerState ──────────────────────────────────────────────

/// Full controller snapshot sent to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerState {
    pub buttons: Buttons,
    pub l2_state: u8,
    pub r2_state: u8,
    pub left_x: i16,
    pub left_y: i16,
    pub right_x: i16,
    pub right_y: i16,
}

impl ControllerState {
    /// Encoded size on the wire.
    pub const SIZE: usize = 14;

    /// Serialize to bytes (little-endian).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.buttons.bits().to_le_bytes());
        buf[4] = self.l2_state;
        buf[5] = self.r2_state;
        buf[6..8].copy_from_slice(&self.left_x.to_le_bytes());
        buf[8..10].copy_from_slice(&self.left_y.to_le_bytes());
        buf[10..12].copy_from_slice(&self.right_x.to_le_bytes());
        buf[12..14].copy_from_slice(&self.right_y.to_le_bytes());
        buf
    }

    /// Deserialize from bytes. Unknown button bits are dropped.
    pub fn from_bytes(data: &[u8]) -> Result<Self, RpsError> {
        if data.len() < Self::SIZE {
            return Err(RpsError::Encoding(format!(
                "controller state too short: {} < {}",
                data.len(),
                Self::SIZE
            )));
        }
        let i16_at = |i: usize| i16::from_le_bytes([data[i], data[i + 1]]);
        Ok(Self {
            buttons: Buttons::from_bits_truncate(u32::from_le_bytes([
                data[0], data[1], data[2], data[3],
            ])),
            l2_state: data[4],
            r2_state: data[5],
            left_x: i16_at(6),
            left_y: i16_at(8),
            right_x: i16_at(10),
            right_y: i16_at(12),
        })
    }
}

// ── InputEvent ───────────────────────────────────────────────────

/// Raw input event from the presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Analog axis motion on joystick `joystick`.
    Axis { joystick: u8, axis: u8, value: i16 },
    /// Joystick button pressed.
    ButtonDown(u8),
    /// Joystick button released.
    ButtonUp(u8),
    /// Touch screen contact began.
    TouchDown,
    /// Touch screen contact ended.
    TouchUp,
}

/// What a physical button code drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Button(Buttons),
    L2,
    R2,
}

/// Joy-Con button code → console control.
fn control_for(code: u8) -> Option<Control> {
    let control = match code {
        0 => Control::Button(Buttons::MOON),     // A
        1 => Control::Button(Buttons::CROSS),    // B
        2 => Control::Button(Buttons::PYRAMID),  // X
        3 => Control::Button(Buttons::BOX),      // Y
        4 => Control::Button(Buttons::L3),       // left stick
        5 => Control::Button(Buttons::R3),       // right stick
        6 => Control::Button(Buttons::L1),       // L
        7 => Control::Button(Buttons::R1),       // R
        8 => Control::L2,                        // ZL
        9 => Control::R2,                        // ZR
        10 => Control::Button(Buttons::OPTIONS), // plus
        11 => Control::Button(Buttons::PS),      // minus
        12 => Control::Button(Buttons::DPAD_LEFT),
        13 => Control::Button(Buttons::DPAD_UP),
        14 => Control::Button(Buttons::DPAD_RIGHT),
        15 => Control::Button(Buttons::DPAD_DOWN),
        _ => return None,
    };
    Some(control)
}

// ── InputEncoder ─────────────────────────────────────────────────

/// Stateless mapping from [`InputEvent`] to [`ControllerState`] changes.
pub struct InputEncoder;

impl InputEncoder {
    /// Apply one event to `state`.
    ///
    /// Returns `false` for events this mapping does not handle; `state` is
    /// left untouched in that case.
    pub fn apply(state: &mut ControllerState, event: &InputEvent) -> bool {
        match *event {
            InputEvent::Axis {
                joystick,
                axis,
                value,
            } => {
                let slot = match (joystick, axis) {
                    (0, 0) => &mut state.left_x,
                    (0, 1) => &mut state.left_y,
                    (0, 2) | (1, 0) => &mut state.right_x,
                    (0, 3) | (1, 1) => &mut state.right_y,
                    _ => return false,
                };
                *slot = value;
                true
            }
            InputEvent::ButtonDown(code) => match control_for(code) {
                Some(Control::Button(b)) => {
                    state.buttons.insert(b);
                    true
                }
                Some(Control::L2) => {
                    state.l2_state = u8::MAX;
                    true
                }
                Some(Control::R2) => {
                    state.r2_state = u8::MAX;
                    true
                }
                None => false,
            },
            InputEvent::ButtonUp(code) => match control_for(code) {
                // Explicit clear: a repeated or reordered release must not
                // turn the button back on.
                Some(Control::Button(b)) => {
                    state.buttons.remove(b);
                    true
                }
                Some(Control::L2) => {
                    state.l2_state = 0;
                    true
                }
                Some(Control::R2) => {
                    state.r2_state = 0;
                    true
                }
                None => false,
            },
            InputEvent::TouchDown => {
                state.buttons.insert(Buttons::TOUCHPAD);
                true
            }
            InputEvent::TouchUp => {
                state.buttons.remove(Buttons::TOUCHPAD);
                true
            }
        }
    }
}

// ── Controller mailbox ───────────────────────────────────────────

/// Driver-side half of the controller mailbox.
#[derive(Debug)]
pub struct ControllerSender {
    tx: watch::Sender<ControllerState>,
}

/// Engine-side half of the controller mailbox.
///
/// Holds at most one pending snapshot; a newer send replaces it.
#[derive(Debug, Clone)]
pub struct ControllerFeed {
    rx: watch::Receiver<ControllerState>,
}

/// Create a mailbox seeded with a zeroed controller state.
pub fn controller_channel() -> (ControllerSender, ControllerFeed) {
    let (tx, rx) = watch::channel(ControllerState::default());
    (ControllerSender { tx }, ControllerFeed { rx })
}

impl ControllerSender {
    /// Publish `state`, replacing any snapshot the engine has not sent yet.
    /// Never blocks and never fails, even after the engine side is gone.
    pub fn send(&self, state: ControllerState) {
        self.tx.send_replace(state);
    }
}

impl ControllerFeed {
    /// Take the newest snapshot if one arrived since the last call.
    pub fn take_latest(&mut self) -> Option<ControllerState> {
        match self.rx.has_changed() {
            Ok(true) => Some(*self.rx.borrow_and_update()),
            _ => None,
        }
    }

    /// The newest snapshot, whether or not it was already taken.
    pub fn current(&self) -> ControllerState {
        *self.rx.borrow()
    }

    /// Wait until a new snapshot is published. Returns `None` once the
    /// driver side is dropped.
    pub async fn changed(&mut self) -> Option<ControllerState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

// ── Tests ────────────────────────────────────────────────────────
