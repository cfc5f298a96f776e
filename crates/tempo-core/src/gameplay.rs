//! Per-state gameplay dispatch
//!
//! Each [`PlayerState`] maps to a pure handler
//! `(entity, input, context) -> Transition`. The same table runs on the server
//! for authoritative updates and on the client for prediction and replay, so
//! identical ordered inputs from an identical start produce identical output.

use crate::collision::{calc_manifold, CollisionLayer, CollisionMaterial, SpatialGrid};
use crate::{EntityState, FloatRect, InputSample, PlayerState, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// Collision shape of a player, relative to its position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerShape {
    /// Main body
    pub body: FloatRect,
    /// Thin probe under the feet used to detect ground contact
    pub foot: FloatRect,
}

impl Default for PlayerShape {
    fn default() -> Self {
        Self {
            body: FloatRect::new(-0.4, 0.0, 0.8, 1.6),
            foot: FloatRect::new(-0.3, -0.05, 0.6, 0.1),
        }
    }
}

/// Movement tuning shared by server and client
///
/// Both sides must use the same values or replay will diverge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Seconds advanced by one input sample
    pub fixed_step: f32,
    /// Horizontal speed on the ground
    pub walk_speed: f32,
    /// Fraction of walk speed available in the air
    pub air_control: f32,
    /// Downward acceleration (negative)
    pub gravity: f32,
    /// Terminal fall velocity (negative)
    pub max_fall_speed: f32,
    /// Upward velocity applied by a jump
    pub jump_impulse: f32,
    /// Anything below this height dies
    pub kill_plane: f32,
    /// Steps spent dead before respawning
    pub respawn_ticks: u16,
    /// Steps spent teleporting
    pub teleport_ticks: u16,
    /// Spectator speed
    pub fly_speed: f32,
    /// Collision shape
    pub shape: PlayerShape,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            fixed_step: 1.0 / 60.0,
            walk_speed: 6.0,
            air_control: 0.6,
            gravity: -30.0,
            max_fall_speed: -40.0,
            jump_impulse: 11.0,
            kill_plane: -20.0,
            respawn_ticks: 60,
            teleport_ticks: 30,
            fly_speed: 8.0,
            shape: PlayerShape::default(),
        }
    }
}

/// A gameplay notification produced by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SideEffect {
    /// Touched ground after falling
    Landed,
    /// Started jumping
    Jumped,
    /// Hit a hazard or fell out of the world
    Died,
    /// Entered a teleporter
    Teleported,
    /// Back at spawn
    Respawned,
}

/// Result of dispatching one input sample
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The entity after the step
    pub entity: EntityState,
    /// Notifications raised during the step
    pub effects: Vec<SideEffect>,
}

impl Transition {
    fn quiet(entity: EntityState) -> Self {
        Self {
            entity,
            effects: Vec::new(),
        }
    }
}

/// Everything a handler may read besides the entity and its input
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub config: &'a MovementConfig,
    pub world: &'a SpatialGrid,
}

/// A state handler
pub type Handler = fn(EntityState, &InputSample, &StepContext<'_>) -> Transition;

impl PlayerState {
    /// The handler for this state
    pub fn handler(self) -> Handler {
        match self {
            PlayerState::Falling => falling,
            PlayerState::Walking => walking,
            PlayerState::Teleport => teleport,
            PlayerState::Dead => dead,
            PlayerState::Reset => reset,
            PlayerState::Spectate => spectate,
        }
    }
}

/// Dispatch one input sample to the entity's current state
pub fn step(entity: &EntityState, input: &InputSample, ctx: &StepContext<'_>) -> Transition {
    let mut entity = *entity;
    entity.state_ticks = entity.state_ticks.saturating_add(1);
    (entity.state.handler())(entity, input, ctx)
}

fn face(mut entity: EntityState, dir: f32) -> EntityState {
    if dir != 0.0 {
        entity.rotation = Quat::from_axis_angle(Vec3::Y, dir * FRAC_PI_2);
    }
    entity
}

fn integrate(mut entity: EntityState, dt: f32) -> EntityState {
    entity.position += entity.velocity * dt;
    entity
}

#[derive(Debug, Default)]
struct Contact {
    foot: bool,
    hazard: bool,
    teleport: bool,
}

/// Narrow phase against everything the broad phase returns
fn resolve_collisions(entity: &mut EntityState, ctx: &StepContext<'_>) -> Contact {
    let shape = ctx.config.shape;
    let body_at = |p: Vec3| shape.body.translated(p.truncate());
    let foot_at = |p: Vec3| shape.foot.translated(p.truncate());

    let probe = body_at(entity.position).union(&foot_at(entity.position));
    let layers = CollisionLayer::WORLD | CollisionLayer::HAZARD | CollisionLayer::TRIGGER;
    let candidates = ctx.world.query(&probe, layers);

    let mut contact = Contact::default();
    entity.collision_flags = 0;

    for id in &candidates {
        let Some(collider) = ctx.world.get(*id) else {
            continue;
        };
        for rect in collider.world_rects() {
            let body = body_at(entity.position);
            let Some(overlap) = body.intersection(&rect.bounds) else {
                continue;
            };
            entity.collision_flags |= rect.material.bit();

            match rect.material {
                CollisionMaterial::Solid => {
                    let manifold = calc_manifold(&body, &rect.bounds, &overlap);
                    entity.position.x += manifold.normal.x * manifold.penetration;
                    entity.position.y += manifold.normal.y * manifold.penetration;

                    if manifold.normal.y > 0.0 && entity.velocity.y < 0.0 {
                        entity.velocity.y = 0.0;
                    } else if manifold.normal.y < 0.0 && entity.velocity.y > 0.0 {
                        entity.velocity.y = 0.0;
                    } else if manifold.normal.x != 0.0 {
                        entity.velocity.x = 0.0;
                    }
                }
                CollisionMaterial::Hazard => contact.hazard = true,
                CollisionMaterial::Teleport => contact.teleport = true,
                CollisionMaterial::Body | CollisionMaterial::Foot => {}
            }
        }
    }

    // Ground probe runs on the resolved position
    let foot = foot_at(entity.position);
    for id in &candidates {
        let Some(collider) = ctx.world.get(*id) else {
            continue;
        };
        if collider
            .world_rects()
            .any(|r| r.material == CollisionMaterial::Solid && r.bounds.intersects(&foot))
        {
            contact.foot = true;
            entity.collision_flags |= CollisionMaterial::Foot.bit();
            break;
        }
    }

    contact
}

/// Shared post-movement checks for physical states
fn settle(mut entity: EntityState, contact: Contact, ctx: &StepContext<'_>, effects: &mut Vec<SideEffect>) -> EntityState {
    if contact.hazard || entity.position.y < ctx.config.kill_plane {
        entity.velocity = Vec3::ZERO;
        effects.push(SideEffect::Died);
        return entity.enter(PlayerState::Dead);
    }

    if contact.teleport {
        entity.velocity = Vec3::ZERO;
        effects.push(SideEffect::Teleported);
        return entity.enter(PlayerState::Teleport);
    }

    match entity.state {
        PlayerState::Falling if contact.foot && entity.velocity.y <= 0.0 => {
            entity.velocity.y = 0.0;
            effects.push(SideEffect::Landed);
            entity.enter(PlayerState::Walking)
        }
        PlayerState::Walking if !contact.foot => entity.enter(PlayerState::Falling),
        _ => entity,
    }
}

fn falling(entity: EntityState, input: &InputSample, ctx: &StepContext<'_>) -> Transition {
    let cfg = ctx.config;
    let dir = input.horizontal();
    let mut entity = face(entity, dir);

    entity.velocity.x = dir * cfg.walk_speed * cfg.air_control * input.analogue.as_f32();
    entity.velocity.y = (entity.velocity.y + cfg.gravity * cfg.fixed_step).max(cfg.max_fall_speed);
    let mut entity = integrate(entity, cfg.fixed_step);

    let contact = resolve_collisions(&mut entity, ctx);
    let mut effects = Vec::new();
    let entity = settle(entity, contact, ctx, &mut effects);
    Transition { entity, effects }
}

fn walking(entity: EntityState, input: &InputSample, ctx: &StepContext<'_>) -> Transition {
    let cfg = ctx.config;
    let dir = input.horizontal();
    let mut entity = face(entity, dir);
    let mut effects = Vec::new();

    entity.velocity.x = dir * cfg.walk_speed * input.analogue.as_f32();
    entity.velocity.y = 0.0;

    if input.buttons.contains(crate::ButtonFlags::JUMP) {
        entity.velocity.y = cfg.jump_impulse;
        effects.push(SideEffect::Jumped);
        entity = entity.enter(PlayerState::Falling);
    }

    let mut entity = integrate(entity, cfg.fixed_step);
    let contact = resolve_collisions(&mut entity, ctx);
    let entity = settle(entity, contact, ctx, &mut effects);
    Transition { entity, effects }
}

fn teleport(mut entity: EntityState, _input: &InputSample, ctx: &StepContext<'_>) -> Transition {
    entity.velocity = Vec3::ZERO;
    if entity.state_ticks >= ctx.config.teleport_ticks {
        entity.position = entity.spawn_position;
        return Transition {
            entity: entity.enter(PlayerState::Falling),
            effects: vec![SideEffect::Respawned],
        };
    }
    Transition::quiet(entity)
}

fn dead(mut entity: EntityState, _input: &InputSample, ctx: &StepContext<'_>) -> Transition {
    entity.velocity = Vec3::ZERO;
    if entity.state_ticks >= ctx.config.respawn_ticks {
        return Transition::quiet(entity.enter(PlayerState::Reset));
    }
    Transition::quiet(entity)
}

fn reset(mut entity: EntityState, _input: &InputSample, _ctx: &StepContext<'_>) -> Transition {
    entity.position = entity.spawn_position;
    entity.velocity = Vec3::ZERO;
    entity.rotation = Quat::IDENTITY;
    entity.collision_flags = 0;
    Transition {
        entity: entity.enter(PlayerState::Falling),
        effects: vec![SideEffect::Respawned],
    }
}

fn spectate(entity: EntityState, input: &InputSample, ctx: &StepContext<'_>) -> Transition {
    let cfg = ctx.config;
    let mut entity = face(entity, input.horizontal());
    let speed = cfg.fly_speed * input.analogue.as_f32();
    entity.velocity = Vec3::new(input.horizontal() * speed, input.vertical() * speed, 0.0);
    entity.collision_flags = 0;
    Transition::quiet(integrate(entity, cfg.fixed_step))
}
