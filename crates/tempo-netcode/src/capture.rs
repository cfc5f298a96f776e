//! Client input capture
//!
//! Once per client tick the current device state is mapped through a binding
//! table into an [`InputSample`], stamped with the capture clock, recorded and
//! applied by the [`PredictionEngine`], and handed back as exactly one
//! `InputUpdate` packet for the caller to send unreliably.

use crate::{ConnectionId, InputUpdate, Packet, PredictionEngine};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tempo_core::{AnalogueMultiplier, ButtonFlags, Clock, InputSample, SideEffect, Timestamp};

/// A physical control on a keyboard or controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Control {
    /// Keyboard key code
    Key(u32),
    /// Controller button index
    Button(u8),
}

/// Anything that can report which controls are held right now
pub trait InputDevice {
    /// Check if a control is held
    fn is_held(&self, control: Control) -> bool;

    /// Stick deflection in `0.0..=1.0`
    fn analogue(&self) -> f32 {
        1.0
    }
}

/// A polled copy of device state
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    held: IndexSet<Control>,
    analogue: Option<f32>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, control: Control) {
        self.held.insert(control);
    }

    pub fn release(&mut self, control: Control) {
        self.held.shift_remove(&control);
    }

    pub fn set_analogue(&mut self, value: f32) {
        self.analogue = Some(value);
    }

    pub fn release_all(&mut self) {
        self.held.clear();
        self.analogue = None;
    }
}

impl InputDevice for DeviceState {
    fn is_held(&self, control: Control) -> bool {
        self.held.contains(&control)
    }

    fn analogue(&self) -> f32 {
        self.analogue.unwrap_or(1.0)
    }
}

/// Binding table from controls to action flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBindings {
    bindings: IndexMap<Control, ButtonFlags>,
}

impl InputBindings {
    /// A table with nothing bound
    pub fn empty() -> Self {
        Self {
            bindings: IndexMap::new(),
        }
    }

    /// Bind a control, adding to whatever it already triggers
    pub fn bind(&mut self, control: Control, flags: ButtonFlags) {
        *self.bindings.entry(control).or_default() |= flags;
    }

    /// Remove a control from the table
    pub fn unbind(&mut self, control: Control) {
        self.bindings.shift_remove(&control);
    }

    /// Flags triggered by the controls currently held
    pub fn resolve(&self, device: &impl InputDevice) -> ButtonFlags {
        self.bindings
            .iter()
            .filter(|(control, _)| device.is_held(**control))
            .fold(ButtonFlags::empty(), |acc, (_, flags)| acc | *flags)
    }
}

impl Default for InputBindings {
    /// WASD, space and E/Q/R/shift on the keyboard, plus a face-button layout
    fn default() -> Self {
        let mut table = Self::empty();
        let keys = [
            ('w', ButtonFlags::UP),
            ('a', ButtonFlags::LEFT),
            ('s', ButtonFlags::DOWN),
            ('d', ButtonFlags::RIGHT),
            (' ', ButtonFlags::JUMP),
            ('e', ButtonFlags::ACTION),
            ('r', ButtonFlags::CARRY_DROP),
            ('q', ButtonFlags::WEAPON_PREV),
            ('f', ButtonFlags::WEAPON_NEXT),
        ];
        for (key, flags) in keys {
            table.bind(Control::Key(key as u32), flags);
        }
        // Left shift
        table.bind(Control::Key(0xe1), ButtonFlags::STRAFE);

        let buttons = [
            (0, ButtonFlags::JUMP),
            (1, ButtonFlags::CARRY_DROP),
            (2, ButtonFlags::ACTION),
            (4, ButtonFlags::WEAPON_PREV),
            (5, ButtonFlags::WEAPON_NEXT),
            (11, ButtonFlags::UP),
            (12, ButtonFlags::DOWN),
            (13, ButtonFlags::LEFT),
            (14, ButtonFlags::RIGHT),
        ];
        for (button, flags) in buttons {
            table.bind(Control::Button(button), flags);
        }
        table
    }
}

/// One tick's capture result
#[derive(Debug, Clone, PartialEq)]
pub struct Captured {
    /// The recorded sample
    pub sample: InputSample,
    /// Packet to send unreliably
    pub packet: Packet,
    /// Notifications raised by applying the sample locally
    pub effects: Vec<SideEffect>,
}

/// Samples a device once per tick for one predicted entity
#[derive(Debug, Clone)]
pub struct InputCapture<C: Clock> {
    bindings: InputBindings,
    clock: C,
    connection: ConnectionId,
    last_timestamp: Option<Timestamp>,
}

impl<C: Clock> InputCapture<C> {
    pub fn new(bindings: InputBindings, clock: C, connection: ConnectionId) -> Self {
        Self {
            bindings,
            clock,
            connection,
            last_timestamp: None,
        }
    }

    pub fn bindings_mut(&mut self) -> &mut InputBindings {
        &mut self.bindings
    }

    /// Sample the device, apply locally, and build the outgoing packet
    ///
    /// Timestamps strictly increase even if the clock has not moved, since the
    /// server drops a sample that is not newer than its last one. While the
    /// engine waits for a resync the sample carries no buttons.
    pub fn capture(
        &mut self,
        device: &impl InputDevice,
        engine: &mut PredictionEngine,
    ) -> Captured {
        let now = self.clock.now_ms();
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last.saturating_add(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);

        let buttons = if engine.is_waiting_resync() {
            ButtonFlags::empty()
        } else {
            self.bindings.resolve(device)
        };
        let sample = InputSample::new(
            timestamp,
            buttons,
            AnalogueMultiplier::from_f32(device.analogue()),
        );

        let effects = engine.predict(sample);
        let packet = Packet::InputUpdate(InputUpdate {
            entity: engine.entity(),
            connection: self.connection,
            sample,
        });

        Captured {
            sample,
            packet,
            effects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::collision::SpatialGrid;
    use tempo_core::{EntityId, EntityState, ManualClock, MovementConfig, Vec3};

    fn engine() -> PredictionEngine {
        PredictionEngine::new(
            EntityId::from_raw_parts(1, 0),
            EntityState::spawned_at(Vec3::ZERO),
            SpatialGrid::default(),
            MovementConfig::default(),
            8,
        )
    }

    #[test]
    fn test_bindings_resolve() {
        let bindings = InputBindings::default();
        let mut device = DeviceState::new();
        device.press(Control::Key('d' as u32));
        device.press(Control::Button(0));
        assert_eq!(bindings.resolve(&device), ButtonFlags::RIGHT | ButtonFlags::JUMP);

        device.release(Control::Key('d' as u32));
        assert_eq!(bindings.resolve(&device), ButtonFlags::JUMP);

        device.release_all();
        assert!(bindings.resolve(&device).is_empty());
    }

    #[test]
    fn test_rebinding() {
        let mut bindings = InputBindings::empty();
        bindings.bind(Control::Key(1), ButtonFlags::LEFT);
        bindings.bind(Control::Key(1), ButtonFlags::STRAFE);
        let mut device = DeviceState::new();
        device.press(Control::Key(1));
        assert_eq!(bindings.resolve(&device), ButtonFlags::LEFT | ButtonFlags::STRAFE);

        bindings.unbind(Control::Key(1));
        assert!(bindings.resolve(&device).is_empty());
    }

    #[test]
    fn test_capture_one_packet_per_tick() {
        let clock = ManualClock::new();
        let mut capture = InputCapture::new(InputBindings::default(), clock.clone(), ConnectionId(2));
        let mut engine = engine();
        let mut device = DeviceState::new();
        device.press(Control::Key('a' as u32));
        device.set_analogue(0.5);

        clock.advance_ms(16);
        let captured = capture.capture(&device, &mut engine);
        assert_eq!(captured.sample.timestamp, 16);
        assert_eq!(captured.sample.buttons, ButtonFlags::LEFT);
        assert_eq!(captured.sample.analogue, AnalogueMultiplier::from_f32(0.5));
        match captured.packet {
            Packet::InputUpdate(update) => {
                assert_eq!(update.connection, ConnectionId(2));
                assert_eq!(update.entity, EntityId::from_raw_parts(1, 0));
                assert_eq!(update.sample, captured.sample);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(engine.state().position.x < 0.0);
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let clock = ManualClock::new();
        let mut capture = InputCapture::new(InputBindings::default(), clock.clone(), ConnectionId(0));
        let mut engine = engine();
        let device = DeviceState::new();

        clock.advance_ms(5);
        let a = capture.capture(&device, &mut engine).sample.timestamp;
        let b = capture.capture(&device, &mut engine).sample.timestamp;
        assert_eq!(a, 5);
        assert_eq!(b, 6);
    }

    #[test]
    fn test_quiet_while_waiting_resync() {
        let clock = ManualClock::new();
        let mut capture = InputCapture::new(InputBindings::default(), clock, ConnectionId(0));
        let mut engine = engine();
        engine.wait_resync = true;
        let mut device = DeviceState::new();
        device.press(Control::Key('d' as u32));

        let captured = capture.capture(&device, &mut engine);
        assert!(captured.sample.is_quiet());
    }
}
