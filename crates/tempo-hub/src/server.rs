//! Authoritative server
//!
//! The server owns every player entity in a generational [`Arena`] along with
//! the entity's input history. Clients only ever send input; the server drains
//! each history once per fixed step through the shared gameplay dispatch and
//! periodically broadcasts the result.
//!
//! Connection handling follows a small lobby protocol:
//!
//! ```text
//!   connect ──▶ Lobby ── all ClientReady ──▶ GameBegin ──▶ Game
//!                 ▲                                          │
//!                 └──────────── last client leaves ◀─────────┘
//! ```
//!
//! Nothing a client sends can fail the server. Malformed datagrams, packets
//! for entities that no longer exist and out-of-order input are logged,
//! counted in [`LoopMetrics`] and dropped.

use crate::{LoopMetrics, ServerConfig};
use indexmap::IndexMap;
use tempo_core::collision::SpatialGrid;
use tempo_core::{
    step, Arena, EntityId, EntityState, EventBus, GameEvent, StepContext, Timestamp,
};
use tempo_netcode::{
    ActorUpdate, ConnectionId, HostEvent, HostTransport, InputHistory, InputUpdate, Packet,
    RefusalReason, ServerState, Snapshot, SpawnInfo,
};
use tracing::{debug, error, info, trace, warn};

/// Messages the server posts to itself and handles on the next loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessage {
    /// Every connected client is ready
    GameBegin,
    /// The game has nobody left in it
    EndGame,
}

/// A player entity as the server sees it
#[derive(Debug, Clone)]
struct ServerEntity {
    connection: ConnectionId,
    history: InputHistory,
    state: EntityState,
    /// Timestamp of the newest sample applied; stamped on snapshots
    last_applied: Timestamp,
}

#[derive(Debug, Clone, Default)]
struct ClientSlot {
    ready: bool,
    entity: Option<EntityId>,
    latency_ms: Option<u32>,
}

/// The authoritative simulation and its connections
pub struct Server<T: HostTransport> {
    transport: T,
    config: ServerConfig,
    world: SpatialGrid,
    entities: Arena<ServerEntity>,
    clients: IndexMap<ConnectionId, ClientSlot>,
    state: ServerState,
    messages: EventBus<ServerMessage>,
    events: EventBus<GameEvent>,
}

impl<T: HostTransport> Server<T> {
    pub fn new(transport: T, config: ServerConfig, world: SpatialGrid) -> Self {
        Self {
            transport,
            config,
            world,
            entities: Arena::new(),
            clients: IndexMap::new(),
            state: ServerState::Lobby,
            messages: EventBus::new(),
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Connections in the order they joined
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.clients.keys().copied().collect()
    }

    /// The entity a connection controls, once the game has begun
    pub fn entity_of(&self, connection: ConnectionId) -> Option<EntityId> {
        self.clients.get(&connection).and_then(|slot| slot.entity)
    }

    /// Authoritative state of an entity
    pub fn entity_state(&self, entity: EntityId) -> Option<&EntityState> {
        self.entities.get(entity).map(|e| &e.state)
    }

    /// Timestamp of the newest input applied to an entity
    pub fn last_applied(&self, entity: EntityId) -> Option<Timestamp> {
        self.entities.get(entity).map(|e| e.last_applied)
    }

    /// Round-trip latency measured by the last ping echo
    pub fn latency(&self, connection: ConnectionId) -> Option<u32> {
        self.clients.get(&connection).and_then(|slot| slot.latency_ms)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Queue a message for the next [`Server::process_messages`]
    pub fn post(&mut self, message: ServerMessage) {
        self.messages.post(message);
    }

    /// Gameplay notifications raised by the simulation
    pub fn events(&mut self) -> &mut EventBus<GameEvent> {
        &mut self.events
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drain the internal message bus
    ///
    /// Returns true when the server changed state.
    pub fn process_messages(&mut self, now: Timestamp, metrics: &mut LoopMetrics) -> bool {
        let mut changed = false;
        while let Some(message) = self.messages.poll() {
            metrics.messages_drained += 1;
            changed |= match message {
                ServerMessage::GameBegin => self.begin_game(now),
                ServerMessage::EndGame => self.end_game(),
            };
        }
        changed
    }

    /// Handle every transport event currently queued
    pub fn poll_network(&mut self, now: Timestamp, metrics: &mut LoopMetrics) {
        while let Some(event) = self.transport.poll() {
            self.handle_event(event, now, metrics);
        }
    }

    pub fn handle_event(&mut self, event: HostEvent, now: Timestamp, metrics: &mut LoopMetrics) {
        match event {
            HostEvent::Connected(connection) => self.handle_connect(connection, metrics),
            HostEvent::Disconnected(connection) => self.handle_disconnect(connection, now),
            HostEvent::Received { from, bytes } => match Packet::decode(&bytes) {
                Ok(packet) => self.handle_packet(from, packet, now, metrics),
                Err(error) => {
                    metrics.malformed_packets += 1;
                    warn!(peer = %from, len = bytes.len(), %error, "dropping malformed packet");
                }
            },
        }
    }

    fn handle_connect(&mut self, connection: ConnectionId, metrics: &mut LoopMetrics) {
        let refusal = if self.state != ServerState::Lobby {
            Some(RefusalReason::NotInLobby)
        } else if self.clients.len() >= self.config.max_clients() {
            Some(RefusalReason::ServerFull)
        } else {
            None
        };

        if let Some(reason) = refusal {
            metrics.refusals += 1;
            info!(peer = %connection, ?reason, "refusing connection");
            self.send(connection, &Packet::ConnectionRefused { reason });
            self.transport.disconnect(connection);
            return;
        }

        metrics.connections += 1;
        self.clients.insert(connection, ClientSlot::default());
        info!(peer = %connection, clients = self.clients.len(), "client connected");
        self.send(connection, &Packet::ConnectionAccepted { connection });
    }

    fn handle_disconnect(&mut self, connection: ConnectionId, now: Timestamp) {
        let Some(slot) = self.clients.shift_remove(&connection) else {
            return;
        };
        info!(peer = %connection, clients = self.clients.len(), "client disconnected");

        if let Some(entity) = slot.entity {
            if self.entities.remove(entity).is_some() {
                self.broadcast(&Packet::EntityRemoved {
                    entity,
                    timestamp: now,
                });
            }
        }
        self.broadcast(&Packet::PlayerDisconnect { connection });

        if self.clients.is_empty() && self.state == ServerState::Game {
            self.messages.post(ServerMessage::EndGame);
        } else {
            self.check_all_ready();
        }
    }

    fn handle_packet(
        &mut self,
        from: ConnectionId,
        packet: Packet,
        now: Timestamp,
        metrics: &mut LoopMetrics,
    ) {
        match packet {
            Packet::InputUpdate(update) => {
                self.handle_input(from, &update, metrics);
            }
            Packet::ClientReady { .. } => self.handle_ready(from),
            Packet::Ping { timestamp } => self.handle_ping(from, timestamp, now),
            other => debug!(peer = %from, kind = ?other.kind(), "ignoring server-bound packet"),
        }
    }

    /// Store a client's input sample for the next simulation step
    ///
    /// Returns false when the sample is dropped: outside a game, for a stale
    /// or foreign entity, or not newer than what is already stored.
    pub fn handle_input(
        &mut self,
        from: ConnectionId,
        update: &InputUpdate,
        metrics: &mut LoopMetrics,
    ) -> bool {
        if self.state != ServerState::Game {
            metrics.inputs_dropped += 1;
            return false;
        }
        let entity = match self.entities.try_get_mut(update.entity) {
            Ok(entity) => entity,
            Err(error) => {
                metrics.stale_handles += 1;
                debug!(peer = %from, %error, "input for missing entity");
                return false;
            }
        };
        if entity.connection != from {
            metrics.inputs_dropped += 1;
            debug!(peer = %from, entity = %update.entity, "input for an entity the peer does not own");
            return false;
        }
        if let Some(newest) = entity
            .history
            .newest_timestamp()
            .filter(|newest| update.sample.timestamp <= *newest)
        {
            metrics.inputs_dropped += 1;
            trace!(entity = %update.entity, ts = update.sample.timestamp, newest, "dropping old input");
            return false;
        }
        entity.history.append(update.sample);
        metrics.inputs_received += 1;
        true
    }

    fn handle_ready(&mut self, from: ConnectionId) {
        let Some(slot) = self.clients.get_mut(&from) else {
            return;
        };
        if !slot.ready {
            slot.ready = true;
            debug!(peer = %from, "client ready");
        }
        self.check_all_ready();
    }

    fn check_all_ready(&mut self) {
        if self.state == ServerState::Lobby
            && !self.clients.is_empty()
            && self.clients.values().all(|slot| slot.ready)
        {
            self.messages.post(ServerMessage::GameBegin);
        }
    }

    fn handle_ping(&mut self, from: ConnectionId, echoed: Timestamp, now: Timestamp) {
        if let Some(slot) = self.clients.get_mut(&from) {
            let latency = now.saturating_sub(echoed);
            slot.latency_ms = Some(latency);
            trace!(peer = %from, latency, "ping echo");
        }
    }

    /// Lobby to Game: spawn one entity per client and send the spawn burst
    fn begin_game(&mut self, now: Timestamp) -> bool {
        if self.state != ServerState::Lobby {
            return false;
        }
        self.state = ServerState::Game;
        info!(clients = self.clients.len(), "game begins");
        self.broadcast(&Packet::StateChange { state: self.state });

        let mut spawns = Vec::with_capacity(self.clients.len());
        for (index, (connection, slot)) in self.clients.iter_mut().enumerate() {
            let state = EntityState::spawned_at(self.config.spawn_point(index));
            let entity = self.entities.insert(ServerEntity {
                connection: *connection,
                history: InputHistory::new(self.config.history_capacity()),
                state,
                last_applied: 0,
            });
            if let Some(spawned) = self.entities.get_mut(entity) {
                spawned.history.bind(entity);
            }
            slot.entity = Some(entity);
            spawns.push(SpawnInfo {
                entity,
                connection: *connection,
                position: state.position,
                rotation: state.rotation,
                timestamp: now,
            });
        }

        for connection in self.connections() {
            for info in &spawns {
                let packet = if info.connection == connection {
                    Packet::PlayerSpawn(*info)
                } else {
                    Packet::ActorSpawn(*info)
                };
                self.send(connection, &packet);
            }
        }
        true
    }

    /// Game to Lobby: drop every entity and wait for ready again
    fn end_game(&mut self) -> bool {
        if self.state != ServerState::Game {
            return false;
        }
        self.state = ServerState::Lobby;
        self.entities.clear();
        for slot in self.clients.values_mut() {
            slot.ready = false;
            slot.entity = None;
        }
        info!("game over, back to lobby");
        self.broadcast(&Packet::StateChange { state: self.state });
        true
    }

    /// Run one fixed simulation step
    ///
    /// Each entity consumes all of its unread input oldest first. An entity
    /// with nothing unread is left exactly where it is.
    pub fn simulate(&mut self, metrics: &mut LoopMetrics) {
        if self.state != ServerState::Game {
            return;
        }
        let ctx = StepContext {
            config: &self.config.movement,
            world: &self.world,
        };
        for (id, entity) in self.entities.iter_mut() {
            let samples = entity.history.drain();
            if samples.is_empty() {
                metrics.starved_ticks += 1;
                continue;
            }
            for sample in &samples {
                let transition = step(&entity.state, sample, &ctx);
                entity.state = transition.entity;
                entity.last_applied = sample.timestamp;
                for effect in transition.effects {
                    trace!(entity = %id, ?effect, "gameplay event");
                    self.events.post(GameEvent {
                        entity: id,
                        effect,
                        timestamp: sample.timestamp,
                    });
                }
            }
        }
    }

    /// Send every entity's pose: a full snapshot to its owner, a compact
    /// actor update to everyone else
    pub fn broadcast_state(&mut self, now: Timestamp) {
        if self.state != ServerState::Game {
            return;
        }
        let mut outgoing = Vec::with_capacity(self.entities.len());
        for (id, entity) in self.entities.iter() {
            let snapshot = Packet::PlayerUpdate(Snapshot::capture(id, &entity.state, entity.last_applied));
            let actor = Packet::ActorUpdate(ActorUpdate::capture(id, &entity.state, now));
            outgoing.push((entity.connection, snapshot, actor));
        }
        for connection in self.connections() {
            for (owner, snapshot, actor) in &outgoing {
                let packet = if *owner == connection { snapshot } else { actor };
                self.send(connection, packet);
            }
        }
    }

    /// Send a ping to every client; echoes arrive as `Ping` packets
    pub fn ping(&mut self, now: Timestamp) {
        self.broadcast(&Packet::Ping { timestamp: now });
    }

    /// Tell every client the server is going away and drop them
    pub fn shutdown(&mut self) {
        info!(clients = self.clients.len(), "server shutting down");
        for connection in self.connections() {
            self.send(
                connection,
                &Packet::ConnectionRefused {
                    reason: RefusalReason::ServerQuit,
                },
            );
            self.transport.disconnect(connection);
        }
        self.clients.clear();
        self.entities.clear();
    }

    fn send(&mut self, to: ConnectionId, packet: &Packet) {
        if let Err(error) = self.transport.send_packet(to, packet) {
            debug!(peer = %to, kind = ?packet.kind(), %error, "send failed");
        }
    }

    fn broadcast(&mut self, packet: &Packet) {
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(error) => {
                error!(kind = ?packet.kind(), %error, "failed to encode packet");
                return;
            }
        };
        for connection in self.connections() {
            if let Err(error) = self.transport.send(connection, packet.channel(), &bytes) {
                debug!(peer = %connection, kind = ?packet.kind(), %error, "send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::collision::Collider;
    use tempo_core::{ButtonFlags, FloatRect, InputSample, PlayerState};
    use tempo_netcode::{ClientEvent, ClientTransport, MemoryClient, MemoryConnector, MemoryHost};
    use test_log::test;

    fn world() -> SpatialGrid {
        SpatialGrid::from_colliders(4.0, [Collider::solid(FloatRect::new(-50.0, -1.0, 100.0, 1.0))])
    }

    fn server() -> (Server<MemoryHost>, MemoryConnector) {
        let (host, connector) = MemoryHost::new();
        (Server::new(host, ServerConfig::default(), world()), connector)
    }

    fn received(client: &mut MemoryClient) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Some(event) = client.poll() {
            if let ClientEvent::Received(bytes) = event {
                packets.push(Packet::decode(&bytes).unwrap());
            }
        }
        packets
    }

    /// Two connected clients, both ready, game started
    fn started() -> (Server<MemoryHost>, MemoryClient, MemoryClient, LoopMetrics) {
        let (mut server, connector) = server();
        let mut metrics = LoopMetrics::default();
        let mut a = connector.connect().unwrap();
        let mut b = connector.connect().unwrap();
        server.poll_network(0, &mut metrics);
        for client in [&mut a, &mut b] {
            let connection = match client.poll() {
                Some(ClientEvent::Connected(id)) => id,
                other => panic!("unexpected {other:?}"),
            };
            client.send_packet(&Packet::ClientReady { connection }).unwrap();
        }
        server.poll_network(0, &mut metrics);
        assert!(server.process_messages(0, &mut metrics));
        (server, a, b, metrics)
    }

    fn input(server: &Server<MemoryHost>, connection: u8, ts: u32, buttons: ButtonFlags) -> InputUpdate {
        let connection = ConnectionId(connection);
        InputUpdate {
            entity: server.entity_of(connection).unwrap(),
            connection,
            sample: InputSample::new(ts, buttons, Default::default()),
        }
    }

    #[test]
    fn test_accepts_in_lobby_until_full() {
        let (host, connector) = MemoryHost::new();
        let mut config = ServerConfig::default();
        config.set_max_clients(1);
        let mut server = Server::new(host, config, world());
        let mut metrics = LoopMetrics::default();

        let mut first = connector.connect().unwrap();
        let mut second = connector.connect().unwrap();
        server.poll_network(0, &mut metrics);

        assert_eq!(server.client_count(), 1);
        assert_eq!(metrics.connections, 1);
        assert_eq!(metrics.refusals, 1);
        assert_eq!(
            received(&mut first),
            vec![Packet::ConnectionAccepted {
                connection: ConnectionId(0)
            }]
        );
        assert_eq!(
            received(&mut second),
            vec![Packet::ConnectionRefused {
                reason: RefusalReason::ServerFull
            }]
        );
        assert!(!second.is_connected());
    }

    #[test]
    fn test_game_begins_when_all_ready() {
        let (server, mut a, mut b, metrics) = started();
        assert_eq!(server.state(), ServerState::Game);
        assert_eq!(server.entity_count(), 2);
        assert_eq!(metrics.messages_drained, 1);

        let packets = received(&mut a);
        assert!(packets.contains(&Packet::StateChange {
            state: ServerState::Game
        }));
        let own = server.entity_of(ConnectionId(0)).unwrap();
        let other = server.entity_of(ConnectionId(1)).unwrap();
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::PlayerSpawn(info) if info.entity == own)));
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::ActorSpawn(info) if info.entity == other)));

        let packets = received(&mut b);
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::PlayerSpawn(info) if info.entity == other)));
    }

    #[test]
    fn test_refuses_during_game() {
        let (mut server, _a, _b, mut metrics) = started();
        server.handle_event(HostEvent::Connected(ConnectionId(9)), 0, &mut metrics);
        assert_eq!(server.client_count(), 2);
        assert_eq!(metrics.refusals, 1);
    }

    #[test]
    fn test_input_intake_ordering() {
        let (mut server, _a, _b, mut metrics) = started();
        assert!(server.handle_input(ConnectionId(0), &input(&server, 0, 16, ButtonFlags::RIGHT), &mut metrics));
        assert!(server.handle_input(ConnectionId(0), &input(&server, 0, 32, ButtonFlags::RIGHT), &mut metrics));
        // Duplicate and reordered samples are dropped
        assert!(!server.handle_input(ConnectionId(0), &input(&server, 0, 32, ButtonFlags::RIGHT), &mut metrics));
        assert!(!server.handle_input(ConnectionId(0), &input(&server, 0, 20, ButtonFlags::RIGHT), &mut metrics));
        assert_eq!(metrics.inputs_received, 2);
        assert_eq!(metrics.inputs_dropped, 2);

        // After a step, still nothing older than the last applied sample
        server.simulate(&mut metrics);
        assert!(!server.handle_input(ConnectionId(0), &input(&server, 0, 30, ButtonFlags::RIGHT), &mut metrics));
        assert!(server.handle_input(ConnectionId(0), &input(&server, 0, 48, ButtonFlags::RIGHT), &mut metrics));
    }

    #[test]
    fn test_rejects_foreign_and_stale_entities() {
        let (mut server, _a, _b, mut metrics) = started();
        // Connection 1 sending for connection 0's entity
        let mut update = input(&server, 0, 16, ButtonFlags::RIGHT);
        update.connection = ConnectionId(1);
        assert!(!server.handle_input(ConnectionId(1), &update, &mut metrics));
        assert_eq!(metrics.inputs_dropped, 1);

        let stale = EntityId::from_raw_parts(0, 99);
        update.entity = stale;
        assert!(!server.handle_input(ConnectionId(1), &update, &mut metrics));
        assert_eq!(metrics.stale_handles, 1);
    }

    #[test]
    fn test_malformed_packet_is_counted() {
        let (mut server, _a, _b, mut metrics) = started();
        server.handle_event(
            HostEvent::Received {
                from: ConnectionId(0),
                bytes: vec![0xff, 1, 2],
            },
            0,
            &mut metrics,
        );
        server.handle_event(
            HostEvent::Received {
                from: ConnectionId(0),
                bytes: Vec::new(),
            },
            0,
            &mut metrics,
        );
        assert_eq!(metrics.malformed_packets, 2);
        assert_eq!(server.client_count(), 2);
    }

    #[test]
    fn test_starved_entity_freezes() {
        let (mut server, _a, _b, mut metrics) = started();
        let moving = server.entity_of(ConnectionId(0)).unwrap();
        let idle = server.entity_of(ConnectionId(1)).unwrap();
        let idle_before = *server.entity_state(idle).unwrap();

        server.handle_input(ConnectionId(0), &input(&server, 0, 16, ButtonFlags::RIGHT), &mut metrics);
        server.simulate(&mut metrics);

        assert_eq!(*server.entity_state(idle).unwrap(), idle_before);
        assert_eq!(metrics.starved_ticks, 1);
        assert_eq!(server.last_applied(moving), Some(16));
        assert_eq!(server.last_applied(idle), Some(0));
    }

    #[test]
    fn test_simulation_raises_events() {
        let (mut server, _a, _b, mut metrics) = started();
        for ts in 1..=120 {
            let update = input(&server, 0, ts * 16, ButtonFlags::empty());
            server.handle_input(ConnectionId(0), &update, &mut metrics);
            server.simulate(&mut metrics);
        }
        let entity = server.entity_of(ConnectionId(0)).unwrap();
        assert_eq!(server.entity_state(entity).unwrap().state, PlayerState::Walking);
        let events: Vec<_> = server.events().drain().collect();
        assert!(events
            .iter()
            .any(|e| e.entity == entity && e.effect == tempo_core::SideEffect::Landed));
    }

    #[test]
    fn test_broadcast_splits_owner_and_others() {
        let (mut server, mut a, _b, mut metrics) = started();
        received(&mut a);
        server.handle_input(ConnectionId(0), &input(&server, 0, 16, ButtonFlags::RIGHT), &mut metrics);
        server.simulate(&mut metrics);
        server.broadcast_state(40);

        let own = server.entity_of(ConnectionId(0)).unwrap();
        let packets = received(&mut a);
        assert_eq!(packets.len(), 2);
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::PlayerUpdate(s) if s.entity == own && s.timestamp == 16)));
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::ActorUpdate(u) if u.entity != own && u.timestamp == 40)));
    }

    #[test]
    fn test_ping_echo_measures_latency() {
        let (mut server, mut a, _b, mut metrics) = started();
        received(&mut a);
        server.ping(100);
        let echoed = received(&mut a);
        assert_eq!(echoed, vec![Packet::Ping { timestamp: 100 }]);
        a.send_packet(&echoed[0]).unwrap();
        server.poll_network(130, &mut metrics);
        assert_eq!(server.latency(ConnectionId(0)), Some(30));
    }

    #[test]
    fn test_disconnect_removes_entity_and_ends_game() {
        let (mut server, a, mut b, mut metrics) = started();
        received(&mut b);
        let gone = server.entity_of(ConnectionId(0)).unwrap();
        drop(a);
        server.poll_network(50, &mut metrics);

        assert_eq!(server.entity_count(), 1);
        let packets = received(&mut b);
        assert!(packets.contains(&Packet::EntityRemoved {
            entity: gone,
            timestamp: 50
        }));
        assert!(packets.contains(&Packet::PlayerDisconnect {
            connection: ConnectionId(0)
        }));

        drop(b);
        server.poll_network(60, &mut metrics);
        assert!(server.process_messages(60, &mut metrics));
        assert_eq!(server.state(), ServerState::Lobby);
        assert_eq!(server.entity_count(), 0);
    }

    #[test]
    fn test_shutdown_sends_server_quit() {
        let (mut server, mut a, _b, _metrics) = started();
        received(&mut a);
        server.shutdown();
        assert_eq!(
            received(&mut a),
            vec![Packet::ConnectionRefused {
                reason: RefusalReason::ServerQuit
            }]
        );
        assert_eq!(server.client_count(), 0);
    }
}
