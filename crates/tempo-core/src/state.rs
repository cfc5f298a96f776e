//! Entity simulation state

use crate::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gameplay state machine tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayerState {
    /// Airborne, under gravity
    #[default]
    Falling,
    /// Standing on solid ground
    Walking,
    /// Being moved back to spawn
    Teleport,
    /// Waiting to respawn
    Dead,
    /// Respawning this tick
    Reset,
    /// Free-flying observer, no collision
    Spectate,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Falling => "falling",
            PlayerState::Walking => "walking",
            PlayerState::Teleport => "teleport",
            PlayerState::Dead => "dead",
            PlayerState::Reset => "reset",
            PlayerState::Spectate => "spectate",
        };
        f.write_str(name)
    }
}

/// Everything the simulation step reads and writes for one entity
///
/// The server owns the authoritative copy; a client owns a predicted copy of
/// its own entity only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub state: PlayerState,
    /// Steps spent in the current state (respawn and teleport timers)
    pub state_ticks: u16,
    /// Materials touched during the last step, see `CollisionMaterial::bit`
    pub collision_flags: u16,
    /// Where `Reset` and `Teleport` put the entity
    pub spawn_position: Vec3,
}

impl EntityState {
    /// A fresh entity standing at its spawn point
    pub fn spawned_at(position: Vec3) -> Self {
        Self {
            position,
            spawn_position: position,
            ..Self::default()
        }
    }

    /// Switch state, restarting the state timer
    pub fn enter(mut self, state: PlayerState) -> Self {
        self.state = state;
        self.state_ticks = 0;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawned_at() {
        let state = EntityState::spawned_at(Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(state.position, state.spawn_position);
        assert_eq!(state.state, PlayerState::Falling);
        assert_eq!(state.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_enter_resets_timer() {
        let mut state = EntityState::default();
        state.state_ticks = 12;
        let dead = state.enter(PlayerState::Dead);
        assert_eq!(dead.state, PlayerState::Dead);
        assert_eq!(dead.state_ticks, 0);
        assert_eq!(format!("{}", dead.state), "dead");
    }
}
