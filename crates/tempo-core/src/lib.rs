//! Tempo Core - Deterministic simulation primitives
//!
//! This crate holds everything both ends of a connection must agree on
//! bit-for-bit:
//! - Math types (`Vec3`, `Quat`, `FloatRect`)
//! - Time sources (`Clock`, `Timestamp`)
//! - Generational entity handles (`EntityId`, `Arena`)
//! - Input samples (`InputSample`, `ButtonFlags`)
//! - Entity state and the gameplay state machine (`EntityState`, `step`)
//! - Broad/narrow phase collision (`SpatialGrid`, `calc_manifold`)
//! - The gameplay event bus (`EventBus`, `GameEvent`)
//!
//! The server uses it to advance the authoritative simulation and the client
//! uses the exact same code to predict and replay its own entity.

pub mod collision;
mod error;
mod event;
pub mod gameplay;
mod identity;
mod input;
mod math;
mod state;
pub mod time;

pub use collision::{
    calc_manifold, Collider, CollisionLayer, CollisionMaterial, CollisionRect, Manifold,
    SpatialGrid,
};
pub use error::{Error, Result};
pub use event::{EventBus, GameEvent};
pub use gameplay::{step, MovementConfig, PlayerShape, SideEffect, StepContext, Transition};
pub use identity::{Arena, EntityId};
pub use input::{AnalogueMultiplier, ButtonFlags, InputSample};
pub use math::{FloatRect, Quat, Vec2, Vec3};
pub use state::{EntityState, PlayerState};
pub use time::{Clock, ManualClock, MonotonicClock, Timestamp};
