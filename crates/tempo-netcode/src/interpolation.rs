//! Remote entity interpolation
//!
//! Entities the client does not control are drawn between the two most recent
//! authoritative poses, with later poses waiting in a short queue. Rendering
//! is therefore one update behind the server, in exchange for smooth motion at
//! any display rate.
//!
//! Per entity, each render tick:
//! - a removal timestamp that playback has reached destroys the entity
//! - a jump between previous and target beyond the threshold snaps (teleport)
//! - a zero-length span snaps
//! - otherwise position blends (linear or cubic Hermite) and rotation slerps
//!   by `t = min(1, elapsed / span)`; reaching `t == 1` promotes the next
//!   queued pose, carrying the overflow, or holds

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tempo_core::{EntityId, Quat, Timestamp, Vec3};
use tracing::trace;

/// One authoritative pose of a remote entity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterpolationPoint {
    pub position: Vec3,
    pub rotation: Quat,
    /// Used by Hermite blending and extrapolation
    pub velocity: Vec3,
    pub timestamp: Timestamp,
}

impl InterpolationPoint {
    pub fn new(position: Vec3, rotation: Quat, timestamp: Timestamp) -> Self {
        Self {
            position,
            rotation,
            velocity: Vec3::ZERO,
            timestamp,
        }
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }
}

/// How positions are blended between poses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpolationMode {
    #[default]
    Linear,
    /// Cubic Hermite using each pose's velocity as its tangent
    Hermite,
}

/// Tuning for [`Interpolator`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Squared distance above which a new pose is a teleport
    pub jump_threshold_sq: f32,
    /// How far past the last pose to extrapolate along its velocity; 0 holds
    pub max_extrapolation_ms: u32,
    /// A span longer than this is shortened so the entity catches up
    pub max_time_gap_ms: u32,
    /// Length of the shortened span
    pub catch_up_ms: u32,
    /// Poses queued beyond the current target
    pub pending_capacity: usize,
    pub mode: InterpolationMode,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            jump_threshold_sq: 100.0,
            max_extrapolation_ms: 0,
            max_time_gap_ms: 250,
            catch_up_ms: 10,
            pending_capacity: 8,
            mode: InterpolationMode::Linear,
        }
    }
}

/// Pose to draw this frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

/// Something the interpolator wants the caller to know about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationEvent {
    /// Jumped straight to the target pose
    Snapped(EntityId),
    /// Removal time reached; the entity is gone
    Removed(EntityId),
}

#[derive(Debug, Clone)]
struct RemoteEntity {
    previous: InterpolationPoint,
    target: InterpolationPoint,
    pending: VecDeque<InterpolationPoint>,
    /// Playback time since `previous`
    elapsed_ms: f32,
    removal_at: Option<Timestamp>,
    transform: Transform,
}

impl RemoteEntity {
    fn new(point: InterpolationPoint) -> Self {
        Self {
            previous: point,
            target: point,
            pending: VecDeque::new(),
            elapsed_ms: 0.0,
            removal_at: None,
            transform: Transform {
                position: point.position,
                rotation: point.rotation,
                velocity: point.velocity,
            },
        }
    }

    fn newest_timestamp(&self) -> Timestamp {
        self.pending.back().unwrap_or(&self.target).timestamp
    }

    fn span_ms(&self) -> f32 {
        self.target.timestamp.saturating_sub(self.previous.timestamp) as f32
    }

    fn playback_time(&self) -> f32 {
        self.previous.timestamp as f32 + self.elapsed_ms
    }

    fn holding(&self) -> bool {
        self.elapsed_ms >= self.span_ms()
    }

    /// Make the next queued pose the target. Returns false if none is queued.
    fn promote(&mut self, config: &InterpolationConfig) -> bool {
        let Some(next) = self.pending.pop_front() else {
            return false;
        };
        self.previous = self.target;
        self.target = next;

        let gap = self.target.timestamp - self.previous.timestamp;
        if gap > config.max_time_gap_ms {
            self.previous.timestamp = self.target.timestamp - config.catch_up_ms.min(gap);
        }
        true
    }

    fn show_target(&mut self) {
        self.transform = Transform {
            position: self.target.position,
            rotation: self.target.rotation,
            velocity: self.target.velocity,
        };
    }

    fn snap(&mut self) {
        self.show_target();
        self.previous = self.target;
        self.elapsed_ms = 0.0;
    }

    fn is_jump(&self, config: &InterpolationConfig) -> bool {
        (self.target.position - self.previous.position).length_squared() > config.jump_threshold_sq
    }

    fn blend(&mut self, t: f32, mode: InterpolationMode) {
        let (a, b) = (self.previous, self.target);
        let (position, velocity) = match mode {
            InterpolationMode::Linear => (a.position.lerp(b.position, t), a.velocity.lerp(b.velocity, t)),
            InterpolationMode::Hermite => hermite(&a, &b, t),
        };
        self.transform = Transform {
            position,
            rotation: a.rotation.slerp(b.rotation, t),
            velocity,
        };
    }

    fn extrapolate(&mut self, config: &InterpolationConfig) {
        let over = (self.elapsed_ms - self.span_ms())
            .clamp(0.0, config.max_extrapolation_ms as f32);
        self.transform = Transform {
            position: self.target.position + self.target.velocity * (over / 1000.0),
            rotation: self.target.rotation,
            velocity: self.target.velocity,
        };
    }

    /// Advance playback; returns true when the entity snapped
    fn advance(&mut self, dt_ms: f32, config: &InterpolationConfig) -> bool {
        self.elapsed_ms += dt_ms;
        let mut snapped = false;

        loop {
            if self.is_jump(config) {
                self.snap();
                snapped = true;
                if !self.promote(config) {
                    return snapped;
                }
                continue;
            }

            let span = self.span_ms();
            if span <= 0.0 {
                self.show_target();
                if !self.promote(config) {
                    return snapped;
                }
                continue;
            }

            if self.elapsed_ms < span {
                self.blend(self.elapsed_ms / span, config.mode);
                return snapped;
            }

            // Past the target: move on, carrying the overflow
            if self.pending.is_empty() {
                self.blend(1.0, config.mode);
                if config.max_extrapolation_ms > 0 {
                    self.extrapolate(config);
                }
                return snapped;
            }
            self.elapsed_ms -= span;
            self.promote(config);
        }
    }
}

/// Cubic Hermite blend using velocities (units per second) as tangents
fn hermite(a: &InterpolationPoint, b: &InterpolationPoint, t: f32) -> (Vec3, Vec3) {
    let span_s = b.timestamp.saturating_sub(a.timestamp) as f32 / 1000.0;
    let m0 = a.velocity * span_s;
    let m1 = b.velocity * span_s;

    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    let position = a.position * h00 + m0 * h10 + b.position * h01 + m1 * h11;

    // d/dt of the above, rescaled from per-span to per-second
    let d00 = 6.0 * t2 - 6.0 * t;
    let d10 = 3.0 * t2 - 4.0 * t + 1.0;
    let d01 = -6.0 * t2 + 6.0 * t;
    let d11 = 3.0 * t2 - 2.0 * t;
    let velocity = if span_s > 0.0 {
        (a.position * d00 + m0 * d10 + b.position * d01 + m1 * d11) * (1.0 / span_s)
    } else {
        b.velocity
    };
    (position, velocity)
}

/// Interpolates every remote entity the client knows about
#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    config: InterpolationConfig,
    entities: IndexMap<EntityId, RemoteEntity>,
}

impl Interpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            entities: IndexMap::new(),
        }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    /// Start tracking an entity at a pose, replacing any previous track
    pub fn spawn(&mut self, entity: EntityId, point: InterpolationPoint) {
        self.entities.insert(entity, RemoteEntity::new(point));
    }

    /// Queue a new authoritative pose
    ///
    /// The first pose for an unknown entity spawns it. A pose not newer than
    /// the newest already held is dropped, as is the oldest queued pose when
    /// the queue is full. Returns whether the pose was kept.
    pub fn push(&mut self, entity: EntityId, point: InterpolationPoint) -> bool {
        let config = self.config;
        let Some(remote) = self.entities.get_mut(&entity) else {
            self.spawn(entity, point);
            return true;
        };

        if point.timestamp <= remote.newest_timestamp() {
            trace!(%entity, timestamp = point.timestamp, "dropping out of order pose");
            return false;
        }

        let was_holding = remote.pending.is_empty() && remote.holding();
        if remote.pending.len() >= config.pending_capacity.max(1) {
            remote.pending.pop_front();
        }
        remote.pending.push_back(point);

        // Idle at the last target: start the new span now instead of
        // skipping through it with the time spent holding
        if was_holding {
            remote.elapsed_ms = 0.0;
            remote.promote(&config);
        }
        true
    }

    /// Schedule destruction once playback reaches `timestamp`
    pub fn remove_at(&mut self, entity: EntityId, timestamp: Timestamp) {
        if let Some(remote) = self.entities.get_mut(&entity) {
            remote.removal_at = Some(timestamp);
        }
    }

    /// Forget an entity at once
    pub fn remove(&mut self, entity: EntityId) -> bool {
        self.entities.shift_remove(&entity).is_some()
    }

    /// Advance every entity by `dt_ms` of render time
    pub fn update(&mut self, dt_ms: f32) -> Vec<InterpolationEvent> {
        let config = self.config;
        let mut events = Vec::new();

        self.entities.retain(|id, remote| {
            if remote.advance(dt_ms, &config) {
                events.push(InterpolationEvent::Snapped(*id));
            }
            match remote.removal_at {
                Some(at) if remote.playback_time() >= at as f32 => {
                    events.push(InterpolationEvent::Removed(*id));
                    false
                }
                _ => true,
            }
        });
        events
    }

    /// Pose to draw for an entity
    pub fn transform(&self, entity: EntityId) -> Option<Transform> {
        self.entities.get(&entity).map(|r| r.transform)
    }

    /// Every tracked entity with its current pose
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, Transform)> + '_ {
        self.entities.iter().map(|(id, r)| (*id, r.transform))
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn id() -> EntityId {
        EntityId::from_raw_parts(7, 0)
    }

    fn at(x: f32, ts: Timestamp) -> InterpolationPoint {
        InterpolationPoint::new(Vec3::new(x, 0.0, 0.0), Quat::IDENTITY, ts)
    }

    #[test]
    fn test_midpoint() {
        let mut interp = Interpolator::default();
        interp.push(id(), at(0.0, 0));
        interp.push(id(), at(10.0, 100));

        let events = interp.update(50.0);
        assert!(events.is_empty());
        let t = interp.transform(id()).unwrap();
        assert_relative_eq!(t.position.x, 5.0);
        assert_relative_eq!(t.position.y, 0.0);
    }

    #[test]
    fn test_jump_snaps_without_blending() {
        let mut interp = Interpolator::default();
        interp.push(id(), at(0.0, 0));
        interp.push(id(), at(50.0, 100));

        let events = interp.update(1.0);
        assert_eq!(events, vec![InterpolationEvent::Snapped(id())]);
        assert_eq!(interp.transform(id()).unwrap().position, Vec3::new(50.0, 0.0, 0.0));
    }

    #[test]
    fn test_holds_at_last_target() {
        let mut interp = Interpolator::default();
        interp.push(id(), at(0.0, 0));
        interp.push(id(), at(4.0, 100));
        interp.update(250.0);
        assert_relative_eq!(interp.transform(id()).unwrap().position.x, 4.0);
    }

    #[test]
    fn test_promotes_with_overflow() {
        let mut interp = Interpolator::default();
        interp.push(id(), at(0.0, 0));
        interp.push(id(), at(4.0, 100));
        interp.push(id(), at(8.0, 200));

        interp.update(150.0);
        assert_relative_eq!(interp.transform(id()).unwrap().position.x, 6.0);
    }

    #[test]
    fn test_out_of_order_dropped() {
        let mut interp = Interpolator::default();
        assert!(interp.push(id(), at(0.0, 100)));
        assert!(interp.push(id(), at(1.0, 200)));
        assert!(!interp.push(id(), at(2.0, 150)));
        assert!(!interp.push(id(), at(2.0, 200)));

        interp.update(100.0);
        assert_relative_eq!(interp.transform(id()).unwrap().position.x, 1.0);
    }

    #[test]
    fn test_pending_queue_bounded() {
        let config = InterpolationConfig {
            pending_capacity: 2,
            ..InterpolationConfig::default()
        };
        let mut interp = Interpolator::new(config);
        interp.push(id(), at(0.0, 0));
        for i in 1..=5 {
            interp.push(id(), at(i as f32, i * 100));
        }
        // 200 and 300 fell out of the queue, so playback goes 100 -> 400 -> 500
        interp.update(100.0);
        assert_relative_eq!(interp.transform(id()).unwrap().position.x, 1.0);
        interp.update(100.0);
        assert_relative_eq!(interp.transform(id()).unwrap().position.x, 4.9, epsilon = 1.0e-4);
    }

    #[test]
    fn test_zero_span_snaps() {
        let mut interp = Interpolator::default();
        interp.spawn(id(), at(3.0, 10));
        interp.update(16.0);
        assert_eq!(interp.transform(id()).unwrap().position, Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_large_gap_catches_up() {
        let mut interp = Interpolator::default();
        interp.push(id(), at(0.0, 0));
        interp.update(20.0);
        // Next pose arrives a full second later
        interp.push(id(), at(5.0, 1000));
        interp.update(10.0);
        assert_relative_eq!(interp.transform(id()).unwrap().position.x, 5.0);
    }

    #[test]
    fn test_removal() {
        let mut interp = Interpolator::default();
        interp.push(id(), at(0.0, 0));
        interp.push(id(), at(1.0, 100));
        interp.remove_at(id(), 150);

        assert!(interp.update(100.0).is_empty());
        assert!(interp.contains(id()));
        assert_eq!(interp.update(60.0), vec![InterpolationEvent::Removed(id())]);
        assert!(!interp.contains(id()));
        assert!(interp.is_empty());
    }

    #[test]
    fn test_rotation_on_slerp_path() {
        let mut interp = Interpolator::default();
        let from = Quat::IDENTITY;
        let to = Quat::from_axis_angle(Vec3::Y, PI / 2.0);
        interp.push(id(), InterpolationPoint::new(Vec3::ZERO, from, 0));
        interp.push(id(), InterpolationPoint::new(Vec3::ZERO, to, 100));

        for _ in 0..9 {
            interp.update(10.0);
            let r = interp.transform(id()).unwrap().rotation;
            let total = from.angle_between(to);
            assert_relative_eq!(
                r.angle_between(from) + r.angle_between(to),
                total,
                epsilon = 1.0e-3
            );
        }
    }

    #[test]
    fn test_position_stays_on_segment() {
        let mut interp = Interpolator::default();
        let a = Vec3::new(1.0, 2.0, 0.0);
        let b = Vec3::new(4.0, -2.0, 1.0);
        interp.push(id(), InterpolationPoint::new(a, Quat::IDENTITY, 0));
        interp.push(id(), InterpolationPoint::new(b, Quat::IDENTITY, 100));

        for _ in 0..12 {
            interp.update(9.0);
            let p = interp.transform(id()).unwrap().position;
            let along = (p - a).length() + (b - p).length();
            assert_relative_eq!(along, (b - a).length(), epsilon = 1.0e-4);
        }
    }

    #[test]
    fn test_hermite_hits_endpoints() {
        let config = InterpolationConfig {
            mode: InterpolationMode::Hermite,
            ..InterpolationConfig::default()
        };
        let mut interp = Interpolator::new(config);
        interp.push(id(), at(0.0, 0).with_velocity(Vec3::new(10.0, 0.0, 0.0)));
        interp.push(id(), at(1.0, 100).with_velocity(Vec3::new(10.0, 0.0, 0.0)));

        interp.update(50.0);
        let mid = interp.transform(id()).unwrap();
        // Constant velocity matching the displacement is a straight line
        assert_relative_eq!(mid.position.x, 0.5, epsilon = 1.0e-5);
        assert_relative_eq!(mid.velocity.x, 10.0, epsilon = 1.0e-3);

        interp.update(50.0);
        assert_relative_eq!(interp.transform(id()).unwrap().position.x, 1.0, epsilon = 1.0e-5);
    }

    #[test]
    fn test_bounded_extrapolation() {
        let config = InterpolationConfig {
            max_extrapolation_ms: 100,
            ..InterpolationConfig::default()
        };
        let mut interp = Interpolator::new(config);
        interp.push(id(), at(0.0, 0).with_velocity(Vec3::new(10.0, 0.0, 0.0)));
        interp.push(id(), at(1.0, 100).with_velocity(Vec3::new(10.0, 0.0, 0.0)));

        interp.update(150.0);
        assert_relative_eq!(interp.transform(id()).unwrap().position.x, 1.5, epsilon = 1.0e-5);
        interp.update(500.0);
        assert_relative_eq!(interp.transform(id()).unwrap().position.x, 2.0, epsilon = 1.0e-5);
    }
}
