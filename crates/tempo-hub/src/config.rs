//! Server, client and map configuration
//!
//! Everything here is plain serde data with a `Default`, loadable from RON.
//! Setters clamp instead of failing, so a hand-edited file can never produce a
//! loop that stalls or spins.
//!
//! # Example
//!
//! ```
//! use tempo_hub::ServerConfig;
//!
//! let config = ServerConfig::from_ron_str("(broadcast_interval_ms: 100, max_clients: 2)").unwrap();
//! assert_eq!(config.broadcast_interval_ms(), 100);
//! assert_eq!(config.max_clients(), 2);
//! // Unspecified fields keep their defaults
//! assert_eq!(config.ping_interval_ms(), 1000);
//! ```

use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tempo_core::collision::{Collider, CollisionMaterial, SpatialGrid};
use tempo_core::{FloatRect, MovementConfig, Vec3};
use tempo_netcode::{InterpolationConfig, ResyncPolicy};

fn from_ron<T: DeserializeOwned>(source: &str) -> Result<T> {
    Ok(ron::from_str(source)?)
}

fn millis_f32(ms: f32) -> Duration {
    let ms = if ms.is_nan() { 1000.0 / 60.0 } else { ms.clamp(1.0, 1000.0) };
    Duration::from_micros((ms * 1000.0).round() as u64)
}

fn to_ron<T: Serialize>(value: &T) -> Result<String> {
    Ok(ron::ser::to_string_pretty(
        value,
        ron::ser::PrettyConfig::default(),
    )?)
}

/// Authoritative server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Simulation step. Inputs are drained once per step.
    fixed_step_ms: f32,
    /// Interval between pose broadcasts (20 Hz by default)
    broadcast_interval_ms: u32,
    /// Interval between latency pings
    ping_interval_ms: u32,
    /// Connections accepted in the lobby
    max_clients: usize,
    /// Input samples retained per entity
    history_capacity: usize,
    /// Simulation steps one loop iteration may run before dropping time
    max_steps_per_iteration: u32,
    /// First spawn point
    pub spawn_position: Vec3,
    /// Horizontal distance between consecutive spawn points
    pub spawn_spacing: f32,
    /// Movement tuning; clients must use the same values
    pub movement: MovementConfig,
}

impl ServerConfig {
    pub fn from_ron_str(source: &str) -> Result<Self> {
        from_ron(source)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_ron_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_ron_string(&self) -> Result<String> {
        to_ron(self)
    }

    pub fn fixed_step(&self) -> Duration {
        millis_f32(self.fixed_step_ms)
    }

    pub fn fixed_step_ms(&self) -> f32 {
        self.fixed_step_ms
    }

    /// Set the simulation step, clamped to `[1, 1000]` ms
    pub fn set_fixed_step_ms(&mut self, ms: f32) {
        self.fixed_step_ms = if ms.is_nan() { 1000.0 / 60.0 } else { ms.clamp(1.0, 1000.0) };
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms.clamp(1, 10_000) as u64)
    }

    pub fn broadcast_interval_ms(&self) -> u32 {
        self.broadcast_interval_ms
    }

    /// Set the broadcast interval, clamped to `[1, 10000]` ms
    pub fn set_broadcast_interval_ms(&mut self, ms: u32) {
        self.broadcast_interval_ms = ms.clamp(1, 10_000);
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.clamp(10, 60_000) as u64)
    }

    pub fn ping_interval_ms(&self) -> u32 {
        self.ping_interval_ms
    }

    /// Set the ping interval, clamped to `[10, 60000]` ms
    pub fn set_ping_interval_ms(&mut self, ms: u32) {
        self.ping_interval_ms = ms.clamp(10, 60_000);
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Set the client limit, clamped to `[1, 255]`
    pub fn set_max_clients(&mut self, n: usize) {
        self.max_clients = n.clamp(1, u8::MAX as usize);
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity.max(1)
    }

    /// Set the per-entity input history size, at least 1
    pub fn set_history_capacity(&mut self, n: usize) {
        self.history_capacity = n.max(1);
    }

    pub fn max_steps_per_iteration(&self) -> u32 {
        self.max_steps_per_iteration.max(1)
    }

    pub fn set_max_steps_per_iteration(&mut self, n: u32) {
        self.max_steps_per_iteration = n.max(1);
    }

    /// Spawn point for the `index`-th player
    pub fn spawn_point(&self, index: usize) -> Vec3 {
        self.spawn_position + Vec3::X * (self.spawn_spacing * index as f32)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            fixed_step_ms: 1000.0 / 60.0,
            broadcast_interval_ms: 50,
            ping_interval_ms: 1000,
            max_clients: 4,
            history_capacity: 120,
            max_steps_per_iteration: 10,
            spawn_position: Vec3::new(0.0, 1.0, 0.0),
            spawn_spacing: 2.0,
            movement: MovementConfig::default(),
        }
    }
}

/// Client session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Input samples retained for reconciliation
    history_capacity: usize,
    /// Capture cadence; should match `movement.fixed_step`
    input_step_ms: f32,
    /// Silence from the server after which the session is dropped
    disconnect_timeout_ms: u32,
    pub interpolation: InterpolationConfig,
    pub resync_policy: ResyncPolicy,
    pub movement: MovementConfig,
}

impl ClientConfig {
    pub fn from_ron_str(source: &str) -> Result<Self> {
        from_ron(source)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_ron_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_ron_string(&self) -> Result<String> {
        to_ron(self)
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity.max(1)
    }

    pub fn set_history_capacity(&mut self, n: usize) {
        self.history_capacity = n.max(1);
    }

    pub fn input_step(&self) -> Duration {
        millis_f32(self.input_step_ms)
    }

    /// Set the capture cadence, clamped to `[1, 1000]` ms
    pub fn set_input_step_ms(&mut self, ms: f32) {
        self.input_step_ms = if ms.is_nan() { 1000.0 / 60.0 } else { ms.clamp(1.0, 1000.0) };
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms.max(100) as u64)
    }

    /// Set the silence timeout, at least 100 ms
    pub fn set_disconnect_timeout_ms(&mut self, ms: u32) {
        self.disconnect_timeout_ms = ms.max(100);
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            history_capacity: 120,
            input_step_ms: 1000.0 / 60.0,
            disconnect_timeout_ms: 5000,
            interpolation: InterpolationConfig::default(),
            resync_policy: ResyncPolicy::default(),
            movement: MovementConfig::default(),
        }
    }
}

/// Static collision geometry shared by server and clients
///
/// Each side builds its own [`SpatialGrid`] from the same data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapData {
    pub cell_size: f32,
    pub colliders: Vec<Collider>,
}

impl MapData {
    pub fn from_ron_str(source: &str) -> Result<Self> {
        from_ron(source)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_ron_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_ron_string(&self) -> Result<String> {
        to_ron(self)
    }

    /// Build the broad-phase index for this map
    pub fn build_grid(&self) -> SpatialGrid {
        let cell_size = if self.cell_size > 0.0 { self.cell_size } else { 4.0 };
        SpatialGrid::from_colliders(cell_size, self.colliders.iter().cloned())
    }
}

impl Default for MapData {
    /// A floor with a wall at each end, a pit of spikes and a teleporter
    fn default() -> Self {
        Self {
            cell_size: 4.0,
            colliders: vec![
                Collider::solid(FloatRect::new(-30.0, -1.0, 60.0, 1.0)),
                Collider::solid(FloatRect::new(-31.0, -1.0, 1.0, 10.0)),
                Collider::solid(FloatRect::new(30.0, -1.0, 1.0, 10.0)),
                Collider::solid(FloatRect::new(8.0, 2.0, 4.0, 0.5)),
                Collider::with_material(FloatRect::new(20.0, 0.0, 2.0, 0.4), CollisionMaterial::Hazard),
                Collider::with_material(FloatRect::new(-24.0, 0.0, 1.0, 2.0), CollisionMaterial::Teleport),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_netcode::InterpolationMode;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.broadcast_interval(), Duration::from_millis(50));
        assert_eq!(config.ping_interval(), Duration::from_millis(1000));
        assert_eq!(config.max_clients(), 4);
        assert_eq!(config.history_capacity(), 120);
        assert!((config.fixed_step().as_secs_f32() - 1.0 / 60.0).abs() < 1.0e-4);
    }

    #[test]
    fn test_setters_clamp() {
        let mut config = ServerConfig::default();
        config.set_broadcast_interval_ms(0);
        assert_eq!(config.broadcast_interval_ms(), 1);
        config.set_max_clients(1000);
        assert_eq!(config.max_clients(), 255);
        config.set_fixed_step_ms(-5.0);
        assert_eq!(config.fixed_step_ms(), 1.0);
        config.set_fixed_step_ms(f32::NAN);
        assert!(config.fixed_step_ms() > 16.0);

        let mut client = ClientConfig::default();
        client.set_disconnect_timeout_ms(0);
        assert_eq!(client.disconnect_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_server_ron_round_trip() {
        let mut config = ServerConfig::default();
        config.set_ping_interval_ms(500);
        config.spawn_spacing = 3.5;
        let text = config.to_ron_string().unwrap();
        assert_eq!(ServerConfig::from_ron_str(&text).unwrap(), config);
    }

    #[test]
    fn test_client_ron_partial() {
        let text = "(disconnect_timeout_ms: 2000, interpolation: (mode: Hermite), resync_policy: NextSnapshot)";
        let config = ClientConfig::from_ron_str(text).unwrap();
        assert_eq!(config.disconnect_timeout(), Duration::from_millis(2000));
        assert_eq!(config.interpolation.mode, InterpolationMode::Hermite);
        assert_eq!(config.interpolation.jump_threshold_sq, 100.0);
        assert_eq!(config.resync_policy, ResyncPolicy::NextSnapshot);
    }

    #[test]
    fn test_bad_ron_is_config_error() {
        let err = ServerConfig::from_ron_str("(max_clients: \"many\")").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ServerConfig::load("/definitely/not/here.ron").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn test_spawn_points() {
        let config = ServerConfig::default();
        assert_eq!(config.spawn_point(0), config.spawn_position);
        assert_eq!(config.spawn_point(2).x, config.spawn_position.x + 4.0);
    }

    #[test]
    fn test_map_builds_grid() {
        let map = MapData::default();
        let grid = map.build_grid();
        assert_eq!(grid.len(), map.colliders.len());

        let text = map.to_ron_string().unwrap();
        assert_eq!(MapData::from_ron_str(&text).unwrap(), map);
    }
}
