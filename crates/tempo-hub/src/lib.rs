//! Tempo Hub - Authoritative server, client session and loop scheduling
//!
//! This crate wires the netcode pieces into running loops.
//!
//! ## Architecture
//!
//! ```text
//! ServerLoop (one thread, one clock)
//!  │
//!  ├── message bus drain ── GameBegin / EndGame
//!  ├── HostTransport poll ── input intake, ready, ping echo
//!  ├── fixed steps ──────── Server::simulate (per entity, oldest input first)
//!  ├── broadcast (20 Hz) ── PlayerUpdate to owner, ActorUpdate to the rest
//!  └── ping
//!
//! ClientSession::frame (variable rate)
//!  │
//!  ├── ClientTransport poll ── reconcile / interpolate on receipt
//!  ├── input tick ──────────── capture, predict, send one InputUpdate
//!  └── Interpolator::update
//! ```
//!
//! ## Key Components
//!
//! - [`Server`]: Owns every entity, its input history and the connections
//! - [`ServerLoop`]: Accumulator-driven outer loop with [`LoopMetrics`]
//! - [`ClientSession`]: Connection lifecycle, prediction and interpolation
//! - [`spawn_local_server`]: A server on a background thread for local play
//! - [`ServerConfig`] / [`ClientConfig`] / [`MapData`]: RON-loadable settings

mod client;
pub mod config;
mod error;
mod local;
mod metrics;
mod scheduler;
mod server;

pub use client::{ClientSession, DisconnectReason, SessionEvent, SessionState};
pub use config::{ClientConfig, MapData, ServerConfig};
pub use error::{Error, Result};
pub use local::{spawn_local_server, LocalServer};
pub use metrics::{ClientMetrics, LoopMetrics};
pub use scheduler::{Accumulator, ServerLoop};
pub use server::{Server, ServerMessage};
