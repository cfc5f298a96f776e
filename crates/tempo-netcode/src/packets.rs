//! Wire packets and their framing
//!
//! A datagram is a one-byte [`PacketKind`] tag followed by the bincode body of
//! the [`Packet`]. The tag alone decides the channel, so a transport can route
//! a datagram without decoding it.

use crate::codec::{
    compress_quat, compress_vec3, decompress_quat, decompress_vec3, POSITION_SCALE,
    VELOCITY_SCALE,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tempo_core::{EntityId, EntityState, InputSample, PlayerState, Quat, Timestamp, Vec3};

/// Identifies a client connection on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u8);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Delivery guarantee for a packet kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Delivered in order, exactly once
    Reliable,
    /// Best effort, superseded by the next tick
    Unreliable,
}

/// Server-wide phase, announced with `StateChange`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServerState {
    #[default]
    Lobby,
    Game,
}

/// Why a connection was turned away or dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefusalReason {
    ServerFull,
    NotInLobby,
    ServerQuit,
}

/// A sample as sent by the client that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputUpdate {
    pub entity: EntityId,
    pub connection: ConnectionId,
    pub sample: InputSample,
}

/// Authoritative state of a player-controlled entity
///
/// Sent only to the owning client, which reconciles against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity: EntityId,
    pub rotation: [i16; 4],
    pub position: [i16; 3],
    pub velocity: [i16; 3],
    /// Timestamp of the last input sample the server applied
    pub timestamp: Timestamp,
    pub state: PlayerState,
    pub state_ticks: u16,
    pub collision_flags: u16,
}

impl Snapshot {
    /// Compress an entity's state
    pub fn capture(entity: EntityId, state: &EntityState, timestamp: Timestamp) -> Self {
        Self {
            entity,
            rotation: compress_quat(state.rotation),
            position: compress_vec3(state.position, POSITION_SCALE),
            velocity: compress_vec3(state.velocity, VELOCITY_SCALE),
            timestamp,
            state: state.state,
            state_ticks: state.state_ticks,
            collision_flags: state.collision_flags,
        }
    }

    pub fn position(&self) -> Vec3 {
        decompress_vec3(self.position, POSITION_SCALE)
    }

    pub fn rotation(&self) -> Quat {
        decompress_quat(self.rotation)
    }

    pub fn velocity(&self) -> Vec3 {
        decompress_vec3(self.velocity, VELOCITY_SCALE)
    }

    /// Overwrite everything the snapshot carries; the spawn point is kept
    pub fn apply_to(&self, state: &mut EntityState) {
        state.position = self.position();
        state.rotation = self.rotation();
        state.velocity = self.velocity();
        state.state = self.state;
        state.state_ticks = self.state_ticks;
        state.collision_flags = self.collision_flags;
    }
}

/// Pose of an entity the receiving client does not control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorUpdate {
    pub entity: EntityId,
    pub position: [i16; 3],
    pub rotation: [i16; 4],
    pub velocity: [i16; 3],
    pub timestamp: Timestamp,
}

impl ActorUpdate {
    pub fn capture(entity: EntityId, state: &EntityState, timestamp: Timestamp) -> Self {
        Self {
            entity,
            position: compress_vec3(state.position, POSITION_SCALE),
            rotation: compress_quat(state.rotation),
            velocity: compress_vec3(state.velocity, VELOCITY_SCALE),
            timestamp,
        }
    }

    pub fn position(&self) -> Vec3 {
        decompress_vec3(self.position, POSITION_SCALE)
    }

    pub fn rotation(&self) -> Quat {
        decompress_quat(self.rotation)
    }

    pub fn velocity(&self) -> Vec3 {
        decompress_vec3(self.velocity, VELOCITY_SCALE)
    }
}

/// Full initial state of an entity, sent reliably
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnInfo {
    pub entity: EntityId,
    /// Owner of the entity
    pub connection: ConnectionId,
    pub position: Vec3,
    pub rotation: Quat,
    pub timestamp: Timestamp,
}

/// Everything that crosses the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    InputUpdate(InputUpdate),
    PlayerUpdate(Snapshot),
    ActorUpdate(ActorUpdate),
    EntityRemoved {
        entity: EntityId,
        timestamp: Timestamp,
    },
    ClientReady {
        connection: ConnectionId,
    },
    ConnectionAccepted {
        connection: ConnectionId,
    },
    ConnectionRefused {
        reason: RefusalReason,
    },
    PlayerSpawn(SpawnInfo),
    ActorSpawn(SpawnInfo),
    StateChange {
        state: ServerState,
    },
    PlayerDisconnect {
        connection: ConnectionId,
    },
    /// Sent by the server, echoed unchanged by the client
    Ping {
        timestamp: Timestamp,
    },
}

/// Wire tag of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    InputUpdate = 0x01,
    PlayerUpdate = 0x02,
    ActorUpdate = 0x03,
    EntityRemoved = 0x04,
    ClientReady = 0x05,
    ConnectionAccepted = 0x06,
    ConnectionRefused = 0x07,
    PlayerSpawn = 0x08,
    ActorSpawn = 0x09,
    StateChange = 0x0a,
    PlayerDisconnect = 0x0b,
    Ping = 0x0c,
}

impl PacketKind {
    /// The fixed channel for this kind
    pub fn channel(self) -> Channel {
        match self {
            PacketKind::InputUpdate
            | PacketKind::PlayerUpdate
            | PacketKind::ActorUpdate
            | PacketKind::Ping => Channel::Unreliable,
            PacketKind::EntityRemoved
            | PacketKind::ClientReady
            | PacketKind::ConnectionAccepted
            | PacketKind::ConnectionRefused
            | PacketKind::PlayerSpawn
            | PacketKind::ActorSpawn
            | PacketKind::StateChange
            | PacketKind::PlayerDisconnect => Channel::Reliable,
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        let kind = match tag {
            0x01 => PacketKind::InputUpdate,
            0x02 => PacketKind::PlayerUpdate,
            0x03 => PacketKind::ActorUpdate,
            0x04 => PacketKind::EntityRemoved,
            0x05 => PacketKind::ClientReady,
            0x06 => PacketKind::ConnectionAccepted,
            0x07 => PacketKind::ConnectionRefused,
            0x08 => PacketKind::PlayerSpawn,
            0x09 => PacketKind::ActorSpawn,
            0x0a => PacketKind::StateChange,
            0x0b => PacketKind::PlayerDisconnect,
            0x0c => PacketKind::Ping,
            other => return Err(Error::UnknownKind(other)),
        };
        Ok(kind)
    }
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::InputUpdate(_) => PacketKind::InputUpdate,
            Packet::PlayerUpdate(_) => PacketKind::PlayerUpdate,
            Packet::ActorUpdate(_) => PacketKind::ActorUpdate,
            Packet::EntityRemoved { .. } => PacketKind::EntityRemoved,
            Packet::ClientReady { .. } => PacketKind::ClientReady,
            Packet::ConnectionAccepted { .. } => PacketKind::ConnectionAccepted,
            Packet::ConnectionRefused { .. } => PacketKind::ConnectionRefused,
            Packet::PlayerSpawn(_) => PacketKind::PlayerSpawn,
            Packet::ActorSpawn(_) => PacketKind::ActorSpawn,
            Packet::StateChange { .. } => PacketKind::StateChange,
            Packet::PlayerDisconnect { .. } => PacketKind::PlayerDisconnect,
            Packet::Ping { .. } => PacketKind::Ping,
        }
    }

    pub fn channel(&self) -> Channel {
        self.kind().channel()
    }

    /// Frame the packet for the wire
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.kind() as u8];
        bincode::serialize_into(&mut out, self)?;
        Ok(out)
    }

    /// Parse a framed datagram
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, body) = bytes.split_first().ok_or(Error::Truncated(bytes.len()))?;
        let tag = PacketKind::try_from(tag)?;
        let packet: Packet = bincode::deserialize(body)?;
        if packet.kind() != tag {
            return Err(Error::KindMismatch {
                tag,
                body: packet.kind(),
            });
        }
        Ok(packet)
    }
}

/// Channel a framed datagram travels on, read from its tag
pub fn channel_of(bytes: &[u8]) -> Option<Channel> {
    let tag = *bytes.first()?;
    PacketKind::try_from(tag).ok().map(PacketKind::channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::{AnalogueMultiplier, ButtonFlags};

    fn entity() -> EntityId {
        EntityId::from_raw_parts(4, 2)
    }

    #[test]
    fn test_encode_decode() {
        let packet = Packet::InputUpdate(InputUpdate {
            entity: entity(),
            connection: ConnectionId(1),
            sample: InputSample::new(1234, ButtonFlags::JUMP | ButtonFlags::LEFT, AnalogueMultiplier(128)),
        });
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes[0], PacketKind::InputUpdate as u8);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_channel_contract() {
        let removed = Packet::EntityRemoved {
            entity: entity(),
            timestamp: 5,
        };
        assert_eq!(removed.channel(), Channel::Reliable);
        assert_eq!(Packet::Ping { timestamp: 0 }.channel(), Channel::Unreliable);
        assert_eq!(
            Packet::StateChange { state: ServerState::Game }.channel(),
            Channel::Reliable
        );

        let bytes = removed.encode().unwrap();
        assert_eq!(channel_of(&bytes), Some(Channel::Reliable));
        assert_eq!(channel_of(&[]), None);
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(matches!(Packet::decode(&[]), Err(Error::Truncated(0))));
        assert!(matches!(Packet::decode(&[0xff, 0, 0]), Err(Error::UnknownKind(0xff))));

        let bytes = Packet::Ping { timestamp: 77 }.encode().unwrap();
        assert!(matches!(
            Packet::decode(&bytes[..bytes.len() - 1]),
            Err(Error::Decode(_))
        ));

        let mut wrong_tag = bytes.clone();
        wrong_tag[0] = PacketKind::ClientReady as u8;
        assert!(matches!(
            Packet::decode(&wrong_tag),
            Err(Error::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_snapshot_applies_within_quantization() {
        let mut state = EntityState::spawned_at(Vec3::new(1.0, 2.0, 0.0));
        state.position = Vec3::new(3.3, -1.7, 0.0);
        state.velocity = Vec3::new(6.0, -12.5, 0.0);
        state.state = PlayerState::Walking;
        state.state_ticks = 9;

        let snapshot = Snapshot::capture(entity(), &state, 500);
        let mut applied = EntityState::spawned_at(Vec3::new(1.0, 2.0, 0.0));
        snapshot.apply_to(&mut applied);

        assert!((applied.position.x - 3.3).abs() <= 0.5 / POSITION_SCALE + 1.0e-5);
        assert!((applied.velocity.y + 12.5).abs() <= 0.5 / VELOCITY_SCALE + 1.0e-5);
        assert_eq!(applied.state, PlayerState::Walking);
        assert_eq!(applied.state_ticks, 9);
        assert_eq!(applied.spawn_position, Vec3::new(1.0, 2.0, 0.0));
    }
}
