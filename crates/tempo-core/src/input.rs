//! Input samples captured once per client tick

use crate::Timestamp;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Discrete actions held during a tick
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ButtonFlags: u16 {
        const UP = 0b0000_0000_0001;
        const DOWN = 0b0000_0000_0010;
        const LEFT = 0b0000_0000_0100;
        const RIGHT = 0b0000_0000_1000;
        const JUMP = 0b0000_0001_0000;
        const ACTION = 0b0000_0010_0000;
        const CARRY_DROP = 0b0000_0100_0000;
        const WEAPON_PREV = 0b0000_1000_0000;
        const WEAPON_NEXT = 0b0001_0000_0000;
        const STRAFE = 0b0010_0000_0000;
    }
}

/// Analogue stick magnitude quantized to a byte
///
/// 0 maps to 0.0 and 255 maps to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalogueMultiplier(pub u8);

impl AnalogueMultiplier {
    /// Full deflection
    pub const FULL: AnalogueMultiplier = AnalogueMultiplier(u8::MAX);

    /// Quantize a magnitude, clamping to `0.0..=1.0`
    pub fn from_f32(value: f32) -> Self {
        if value.is_nan() {
            return AnalogueMultiplier(0);
        }
        let clamped = value.clamp(0.0, 1.0);
        AnalogueMultiplier((clamped * u8::MAX as f32).round() as u8)
    }

    /// The magnitude as a float in `0.0..=1.0`
    pub fn as_f32(self) -> f32 {
        self.0 as f32 / u8::MAX as f32
    }
}

impl Default for AnalogueMultiplier {
    fn default() -> Self {
        Self::FULL
    }
}

/// One tick of player input
///
/// Immutable once recorded: the client applies it to its prediction, the
/// server applies it to the authoritative state, and reconciliation may
/// apply it again during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputSample {
    /// When the sample was captured
    pub timestamp: Timestamp,
    /// Buttons held
    pub buttons: ButtonFlags,
    /// Analogue magnitude applied to movement
    pub analogue: AnalogueMultiplier,
}

impl InputSample {
    /// Create a sample
    pub fn new(timestamp: Timestamp, buttons: ButtonFlags, analogue: AnalogueMultiplier) -> Self {
        Self {
            timestamp,
            buttons,
            analogue,
        }
    }

    /// A sample with no buttons held
    pub fn quiet(timestamp: Timestamp) -> Self {
        Self::new(timestamp, ButtonFlags::empty(), AnalogueMultiplier::FULL)
    }

    /// True when no buttons are held
    pub fn is_quiet(&self) -> bool {
        self.buttons.is_empty()
    }

    /// Horizontal intent: -1 for left, 1 for right, 0 for neither or both
    pub fn horizontal(&self) -> f32 {
        let mut dir = 0.0;
        if self.buttons.contains(ButtonFlags::LEFT) {
            dir -= 1.0;
        }
        if self.buttons.contains(ButtonFlags::RIGHT) {
            dir += 1.0;
        }
        dir
    }

    /// Vertical intent: -1 for down, 1 for up
    pub fn vertical(&self) -> f32 {
        let mut dir = 0.0;
        if self.buttons.contains(ButtonFlags::DOWN) {
            dir -= 1.0;
        }
        if self.buttons.contains(ButtonFlags::UP) {
            dir += 1.0;
        }
        dir
    }
}
