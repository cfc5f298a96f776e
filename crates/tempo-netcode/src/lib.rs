//! Tempo Netcode - Network synchronization for a fixed-step authoritative server
//!
//! This crate holds the client and wire halves of the netcode:
//!
//! - **Wire codec**: Fixed-point compression of floats, vectors and rotations
//! - **Input history**: Per-entity ring of timestamped input samples
//! - **Capture**: Device state to input sample, once per client tick
//! - **Prediction**: Apply local input at once through the shared gameplay step
//! - **Reconciliation**: Rewind to an authoritative snapshot and replay newer input
//! - **Interpolation**: Smooth remote entities between infrequent updates
//! - **Packets and transport**: Framed packets with a fixed channel per kind
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            Client                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │   Capture    │─▶│  Prediction  │  │    Interpolation     │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘  │
//! │         │                  ▲                    ▲              │
//! │         ▼                  │                    │              │
//! │  ┌──────────────┐  ┌──────────────┐             │              │
//! │  │  Transport   │─▶│Reconciliation│      ActorUpdate           │
//! │  └──────────────┘  └──────────────┘                            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use tempo_core::collision::SpatialGrid;
//! use tempo_core::{ButtonFlags, EntityId, EntityState, InputSample, MovementConfig, Vec3};
//! use tempo_netcode::{PredictionEngine, ReconcileOutcome, Snapshot};
//!
//! let id = EntityId::from_raw_parts(0, 0);
//! let spawn = EntityState::spawned_at(Vec3::ZERO);
//! let mut engine =
//!     PredictionEngine::new(id, spawn, SpatialGrid::default(), MovementConfig::default(), 120);
//!
//! // Client tick: predict immediately
//! engine.predict(InputSample::new(16, ButtonFlags::RIGHT, Default::default()));
//! engine.predict(InputSample::new(32, ButtonFlags::RIGHT, Default::default()));
//!
//! // Server acknowledged the first sample: rewind and replay the second
//! let snapshot = Snapshot::capture(id, &spawn, 16);
//! assert_eq!(engine.reconcile(&snapshot), ReconcileOutcome::Replayed { replayed: 1 });
//! ```

pub mod capture;
pub mod codec;
mod error;
mod input_history;
mod interpolation;
mod packets;
mod prediction;
mod reconciliation;
pub mod transport;

pub use capture::{Captured, Control, DeviceState, InputBindings, InputCapture, InputDevice};
pub use error::{Error, Result};
pub use input_history::{HistoryState, InputHistory, Rewind};
pub use interpolation::{
    InterpolationConfig, InterpolationEvent, InterpolationMode, InterpolationPoint, Interpolator,
    Transform,
};
pub use packets::{
    channel_of, ActorUpdate, Channel, ConnectionId, InputUpdate, Packet, PacketKind,
    RefusalReason, ServerState, Snapshot, SpawnInfo,
};
pub use prediction::PredictionEngine;
pub use reconciliation::{ReconcileOutcome, ResyncPolicy};
pub use transport::{
    ClientEvent, ClientTransport, HostEvent, HostTransport, MemoryClient, MemoryConnector,
    MemoryHost,
};
