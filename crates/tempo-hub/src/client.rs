//! Client session
//!
//! A [`ClientSession`] is the client's variable-rate loop. Every display
//! frame it drains the transport, applies snapshots and reconciliation the
//! moment they arrive, captures and sends input on its own fixed cadence, and
//! advances remote entity interpolation by the frame time.
//!
//! ```text
//! Connecting ──ConnectionAccepted──▶ Lobby ──StateChange(Game)──▶ Playing
//!     │                                ▲                             │
//!     │                                └────StateChange(Lobby)───────┘
//!     └──refused / timed out / closed──▶ Disconnected (terminal)
//! ```

use crate::{Accumulator, ClientConfig, ClientMetrics, Error, Result};
use std::time::Duration;
use tempo_core::collision::SpatialGrid;
use tempo_core::{Clock, EntityId, EntityState, EventBus, GameEvent};
use tempo_netcode::{
    ClientEvent, ClientTransport, ConnectionId, InputBindings, InputCapture, InputDevice,
    InterpolationEvent, InterpolationPoint, Interpolator, Packet, PredictionEngine,
    ReconcileOutcome, RefusalReason, ServerState, SpawnInfo, Transform,
};
use tracing::{debug, info, warn};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server turned the connection down or quit
    Refused(RefusalReason),
    /// Nothing heard from the server within the configured timeout
    TimedOut,
    /// The transport closed underneath the session
    TransportClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Lobby,
    Playing,
    /// Terminal
    Disconnected(DisconnectReason),
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected(ConnectionId),
    StateChanged(ServerState),
    /// The locally predicted entity was spawned
    Spawned(EntityId),
    /// A remote entity was spawned
    ActorSpawned(EntityId),
    /// A remote entity was destroyed
    Removed(EntityId),
    PeerLeft(ConnectionId),
    /// Raised by live prediction, never by replay
    Gameplay(GameEvent),
    Disconnected(DisconnectReason),
}

/// One client's connection, prediction and interpolation state
pub struct ClientSession<T: ClientTransport, C: Clock + Clone> {
    transport: T,
    clock: C,
    config: ClientConfig,
    world: SpatialGrid,
    bindings: InputBindings,
    state: SessionState,
    connection: Option<ConnectionId>,
    capture: Option<InputCapture<C>>,
    engine: Option<PredictionEngine>,
    interpolator: Interpolator,
    input_tick: Accumulator,
    last_frame: Duration,
    last_heard: Duration,
    events: EventBus<SessionEvent>,
    metrics: ClientMetrics,
}

impl<T: ClientTransport, C: Clock + Clone> ClientSession<T, C> {
    /// Start a session over an already opened transport
    ///
    /// `world` is the client's own copy of the collision map, used for
    /// prediction and replay.
    pub fn new(transport: T, clock: C, config: ClientConfig, world: SpatialGrid) -> Self {
        let now = clock.elapsed();
        Self {
            transport,
            clock,
            interpolator: Interpolator::new(config.interpolation),
            input_tick: Accumulator::new(config.input_step()),
            config,
            world,
            bindings: InputBindings::default(),
            state: SessionState::Connecting,
            connection: None,
            capture: None,
            engine: None,
            last_frame: now,
            last_heard: now,
            events: EventBus::new(),
            metrics: ClientMetrics::default(),
        }
    }

    pub fn with_bindings(mut self, bindings: InputBindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state, SessionState::Disconnected(_))
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn engine(&self) -> Option<&PredictionEngine> {
        self.engine.as_ref()
    }

    /// The locally predicted entity
    pub fn predicted(&self) -> Option<&EntityState> {
        self.engine.as_ref().map(PredictionEngine::state)
    }

    /// Interpolated pose of a remote entity
    pub fn remote(&self, entity: EntityId) -> Option<Transform> {
        self.interpolator.transform(entity)
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }

    pub fn events(&mut self) -> &mut EventBus<SessionEvent> {
        &mut self.events
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Tell the server this client is ready to play
    pub fn ready(&mut self) -> Result<()> {
        let connection = self
            .connection
            .filter(|_| self.state == SessionState::Lobby)
            .ok_or(Error::NotInLobby(self.state))?;
        self.transport
            .send_packet(&Packet::ClientReady { connection })?;
        Ok(())
    }

    /// Leave the session
    pub fn close(&mut self) {
        self.transport.disconnect();
        self.end(DisconnectReason::TransportClosed);
    }

    /// Run one display frame
    pub fn frame(&mut self, device: &impl InputDevice) {
        if self.is_disconnected() {
            return;
        }
        let elapsed = self.clock.elapsed();
        let dt = elapsed.saturating_sub(self.last_frame);
        self.last_frame = elapsed;
        self.metrics.frames += 1;

        while let Some(event) = self.transport.poll() {
            self.last_heard = elapsed;
            self.handle_event(event);
            if self.is_disconnected() {
                return;
            }
        }

        if elapsed.saturating_sub(self.last_heard) > self.config.disconnect_timeout() {
            warn!(silent_ms = (elapsed - self.last_heard).as_millis() as u64, "server timed out");
            self.transport.disconnect();
            self.end(DisconnectReason::TimedOut);
            return;
        }

        self.input_tick.add(dt);
        if self.input_tick.consume_all() > 0 && self.state == SessionState::Playing {
            self.capture_input(device);
        }

        for event in self.interpolator.update(dt.as_secs_f32() * 1000.0) {
            match event {
                InterpolationEvent::Snapped(_) => self.metrics.snaps += 1,
                InterpolationEvent::Removed(entity) => {
                    self.events.post(SessionEvent::Removed(entity))
                }
            }
        }
    }

    fn capture_input(&mut self, device: &impl InputDevice) {
        let (Some(capture), Some(engine)) = (self.capture.as_mut(), self.engine.as_mut()) else {
            return;
        };
        let captured = capture.capture(device, engine);
        let entity = engine.entity();
        if let Err(error) = self.transport.send_packet(&captured.packet) {
            debug!(%error, "failed to send input");
        } else {
            self.metrics.samples_sent += 1;
        }
        for effect in captured.effects {
            self.events.post(SessionEvent::Gameplay(GameEvent {
                entity,
                effect,
                timestamp: captured.sample.timestamp,
            }));
        }
    }

    fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected(connection) => {
                debug!(%connection, "transport link up");
                self.connection = Some(connection);
            }
            ClientEvent::Disconnected => self.end(DisconnectReason::TransportClosed),
            ClientEvent::Received(bytes) => match Packet::decode(&bytes) {
                Ok(packet) => self.handle_packet(packet),
                Err(error) => {
                    self.metrics.malformed_packets += 1;
                    warn!(len = bytes.len(), %error, "dropping malformed packet");
                }
            },
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::ConnectionAccepted { connection } => {
                info!(%connection, "connected to server");
                self.connection = Some(connection);
                self.state = SessionState::Lobby;
                self.events.post(SessionEvent::Connected(connection));
            }
            Packet::ConnectionRefused { reason } => {
                self.transport.disconnect();
                self.end(DisconnectReason::Refused(reason));
            }
            Packet::StateChange { state } => self.handle_state_change(state),
            Packet::PlayerSpawn(info) => self.spawn_player(&info),
            Packet::ActorSpawn(info) => {
                self.interpolator.spawn(
                    info.entity,
                    InterpolationPoint::new(info.position, info.rotation, info.timestamp),
                );
                self.events.post(SessionEvent::ActorSpawned(info.entity));
            }
            Packet::PlayerUpdate(snapshot) => {
                let Some(engine) = self.engine.as_mut() else {
                    return;
                };
                match engine.reconcile(&snapshot) {
                    ReconcileOutcome::Stale => self.metrics.snapshots_stale += 1,
                    ReconcileOutcome::Replayed { replayed } => {
                        self.metrics.snapshots_applied += 1;
                        self.metrics.replayed += replayed as u64;
                    }
                    ReconcileOutcome::Desync => {
                        self.metrics.snapshots_applied += 1;
                        self.metrics.desyncs += 1;
                    }
                    ReconcileOutcome::AwaitingResync => self.metrics.snapshots_applied += 1,
                    ReconcileOutcome::Resynced { replayed } => {
                        self.metrics.snapshots_applied += 1;
                        self.metrics.resyncs += 1;
                        self.metrics.replayed += replayed as u64;
                    }
                }
            }
            Packet::ActorUpdate(update) => {
                let point =
                    InterpolationPoint::new(update.position(), update.rotation(), update.timestamp)
                        .with_velocity(update.velocity());
                self.interpolator.push(update.entity, point);
            }
            Packet::EntityRemoved { entity, timestamp } => {
                if self.engine.as_ref().is_some_and(|e| e.entity() == entity) {
                    self.engine = None;
                    self.capture = None;
                    self.events.post(SessionEvent::Removed(entity));
                } else {
                    self.interpolator.remove_at(entity, timestamp);
                }
            }
            Packet::PlayerDisconnect { connection } => {
                self.events.post(SessionEvent::PeerLeft(connection));
            }
            Packet::Ping { timestamp } => {
                match self.transport.send_packet(&Packet::Ping { timestamp }) {
                    Ok(()) => self.metrics.pings_echoed += 1,
                    Err(error) => debug!(%error, "failed to echo ping"),
                }
            }
            other => debug!(kind = ?other.kind(), "ignoring client-bound packet"),
        }
    }

    fn handle_state_change(&mut self, state: ServerState) {
        info!(?state, "server state changed");
        match state {
            ServerState::Game => self.state = SessionState::Playing,
            ServerState::Lobby => {
                self.state = SessionState::Lobby;
                self.engine = None;
                self.capture = None;
                self.interpolator.clear();
            }
        }
        self.events.post(SessionEvent::StateChanged(state));
    }

    fn spawn_player(&mut self, info: &SpawnInfo) {
        let mut state = EntityState::spawned_at(info.position);
        state.rotation = info.rotation;
        let engine = PredictionEngine::new(
            info.entity,
            state,
            self.world.clone(),
            self.config.movement,
            self.config.history_capacity(),
        )
        .with_policy(self.config.resync_policy);
        self.engine = Some(engine);
        self.capture = Some(InputCapture::new(
            self.bindings.clone(),
            self.clock.clone(),
            info.connection,
        ));
        self.input_tick.reset();
        debug!(entity = %info.entity, "local player spawned");
        self.events.post(SessionEvent::Spawned(info.entity));
    }

    fn end(&mut self, reason: DisconnectReason) {
        if self.is_disconnected() {
            return;
        }
        info!(?reason, "session ended");
        self.state = SessionState::Disconnected(reason);
        self.engine = None;
        self.capture = None;
        self.interpolator.clear();
        self.events.post(SessionEvent::Disconnected(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::{ManualClock, Quat, Vec3};
    use tempo_netcode::{
        ActorUpdate, Control, DeviceState, HostEvent, HostTransport, MemoryClient, MemoryHost,
    };
    use test_log::test;

    type Session = ClientSession<MemoryClient, ManualClock>;

    fn setup() -> (MemoryHost, Session, ManualClock) {
        let (mut host, connector) = MemoryHost::new();
        let clock = ManualClock::new();
        let mut config = ClientConfig::default();
        config.set_input_step_ms(10.0);
        let session = ClientSession::new(
            connector.connect().unwrap(),
            clock.clone(),
            config,
            SpatialGrid::default(),
        );
        assert_eq!(host.poll(), Some(HostEvent::Connected(ConnectionId(0))));
        (host, session, clock)
    }

    fn accept(host: &mut MemoryHost, session: &mut Session) {
        host.send_packet(
            ConnectionId(0),
            &Packet::ConnectionAccepted {
                connection: ConnectionId(0),
            },
        )
        .unwrap();
        session.frame(&DeviceState::new());
    }

    fn spawn_info(entity: EntityId, connection: u8) -> SpawnInfo {
        SpawnInfo {
            entity,
            connection: ConnectionId(connection),
            position: Vec3::new(0.0, 1.0, 0.0),
            rotation: Quat::IDENTITY,
            timestamp: 0,
        }
    }

    fn host_packets(host: &mut MemoryHost) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Some(event) = host.poll() {
            if let HostEvent::Received { bytes, .. } = event {
                packets.push(Packet::decode(&bytes).unwrap());
            }
        }
        packets
    }

    #[test]
    fn test_accepted_then_ready() {
        let (mut host, mut session, _clock) = setup();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(matches!(
            session.ready(),
            Err(Error::NotInLobby(SessionState::Connecting))
        ));

        accept(&mut host, &mut session);
        assert_eq!(session.state(), SessionState::Lobby);
        assert_eq!(session.connection(), Some(ConnectionId(0)));
        assert_eq!(
            session.events().poll(),
            Some(SessionEvent::Connected(ConnectionId(0)))
        );

        session.ready().unwrap();
        assert_eq!(
            host_packets(&mut host),
            vec![Packet::ClientReady {
                connection: ConnectionId(0)
            }]
        );
    }

    #[test]
    fn test_ready_while_playing_is_a_state_error() {
        let (mut host, mut session, _clock) = setup();
        accept(&mut host, &mut session);
        host.send_packet(
            ConnectionId(0),
            &Packet::StateChange {
                state: ServerState::Game,
            },
        )
        .unwrap();
        session.frame(&DeviceState::new());
        assert_eq!(session.state(), SessionState::Playing);

        let err = session.ready().unwrap_err();
        assert!(matches!(err, Error::NotInLobby(SessionState::Playing)));
        assert_eq!(err.to_string(), "not in the lobby, session is Playing");
        assert!(host_packets(&mut host).is_empty());
    }

    #[test]
    fn test_refused_is_terminal() {
        let (mut host, mut session, _clock) = setup();
        host.send_packet(
            ConnectionId(0),
            &Packet::ConnectionRefused {
                reason: RefusalReason::ServerFull,
            },
        )
        .unwrap();
        session.frame(&DeviceState::new());
        assert_eq!(
            session.state(),
            SessionState::Disconnected(DisconnectReason::Refused(RefusalReason::ServerFull))
        );

        // Later frames do nothing
        session.frame(&DeviceState::new());
        assert_eq!(session.metrics().frames, 1);
    }

    #[test]
    fn test_silence_times_out() {
        let (mut host, mut session, clock) = setup();
        accept(&mut host, &mut session);

        clock.advance_ms(4000);
        session.frame(&DeviceState::new());
        assert_eq!(session.state(), SessionState::Lobby);

        clock.advance_ms(1500);
        session.frame(&DeviceState::new());
        assert_eq!(
            session.state(),
            SessionState::Disconnected(DisconnectReason::TimedOut)
        );
        assert_eq!(host.poll(), Some(HostEvent::Disconnected(ConnectionId(0))));
    }

    #[test]
    fn test_transport_close_disconnects() {
        let (mut host, mut session, _clock) = setup();
        accept(&mut host, &mut session);
        host.disconnect(ConnectionId(0));
        session.frame(&DeviceState::new());
        assert_eq!(
            session.state(),
            SessionState::Disconnected(DisconnectReason::TransportClosed)
        );
    }

    #[test]
    fn test_ping_is_echoed() {
        let (mut host, mut session, _clock) = setup();
        accept(&mut host, &mut session);
        host.send_packet(ConnectionId(0), &Packet::Ping { timestamp: 77 }).unwrap();
        session.frame(&DeviceState::new());
        assert_eq!(host_packets(&mut host), vec![Packet::Ping { timestamp: 77 }]);
        assert_eq!(session.metrics().pings_echoed, 1);
    }

    #[test]
    fn test_playing_sends_one_input_per_tick() {
        let (mut host, mut session, clock) = setup();
        accept(&mut host, &mut session);
        let own = EntityId::from_raw_parts(0, 0);
        host.send_packet(ConnectionId(0), &Packet::StateChange { state: ServerState::Game })
            .unwrap();
        host.send_packet(ConnectionId(0), &Packet::PlayerSpawn(spawn_info(own, 0)))
            .unwrap();
        session.frame(&DeviceState::new());
        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(session.engine().map(PredictionEngine::entity), Some(own));

        let mut device = DeviceState::new();
        device.press(Control::Key('d' as u32));
        for _ in 0..5 {
            clock.advance_ms(10);
            session.frame(&device);
        }
        // A long frame still sends a single sample
        clock.advance_ms(35);
        session.frame(&device);

        let inputs: Vec<_> = host_packets(&mut host)
            .into_iter()
            .filter_map(|p| match p {
                Packet::InputUpdate(update) => Some(update),
                _ => None,
            })
            .collect();
        assert_eq!(inputs.len(), 6);
        assert_eq!(session.metrics().samples_sent, 6);
        assert!(inputs.windows(2).all(|w| w[0].sample.timestamp < w[1].sample.timestamp));
        assert!(session.predicted().unwrap().position.x > 0.0);
    }

    #[test]
    fn test_snapshot_reconciles() {
        let (mut host, mut session, clock) = setup();
        accept(&mut host, &mut session);
        let own = EntityId::from_raw_parts(0, 0);
        host.send_packet(ConnectionId(0), &Packet::StateChange { state: ServerState::Game })
            .unwrap();
        host.send_packet(ConnectionId(0), &Packet::PlayerSpawn(spawn_info(own, 0)))
            .unwrap();
        session.frame(&DeviceState::new());
        for _ in 0..3 {
            clock.advance_ms(10);
            session.frame(&DeviceState::new());
        }

        let start = EntityState::spawned_at(Vec3::new(0.0, 1.0, 0.0));
        let snapshot = tempo_netcode::Snapshot::capture(own, &start, 10);
        host.send_packet(ConnectionId(0), &Packet::PlayerUpdate(snapshot)).unwrap();
        host.send_packet(ConnectionId(0), &Packet::PlayerUpdate(snapshot)).unwrap();
        session.frame(&DeviceState::new());

        assert_eq!(session.metrics().snapshots_applied, 1);
        assert_eq!(session.metrics().snapshots_stale, 1);
        assert_eq!(session.metrics().replayed, 2);
    }

    #[test]
    fn test_remote_entities_interpolate_and_remove() {
        let (mut host, mut session, clock) = setup();
        accept(&mut host, &mut session);
        let remote = EntityId::from_raw_parts(1, 0);
        let state = EntityState::spawned_at(Vec3::ZERO);
        host.send_packet(ConnectionId(0), &Packet::StateChange { state: ServerState::Game })
            .unwrap();
        host.send_packet(ConnectionId(0), &Packet::ActorSpawn(spawn_info(remote, 1)))
            .unwrap();
        host.send_packet(
            ConnectionId(0),
            &Packet::ActorUpdate(ActorUpdate::capture(remote, &state, 0)),
        )
        .unwrap();
        let moved = EntityState::spawned_at(Vec3::new(4.0, 0.0, 0.0));
        host.send_packet(
            ConnectionId(0),
            &Packet::ActorUpdate(ActorUpdate::capture(remote, &moved, 100)),
        )
        .unwrap();
        session.frame(&DeviceState::new());
        assert!(session.interpolator().contains(remote));

        clock.advance_ms(50);
        session.frame(&DeviceState::new());
        let x = session.remote(remote).unwrap().position.x;
        assert!(x > 0.0 && x < 4.0, "x = {x}");

        host.send_packet(
            ConnectionId(0),
            &Packet::EntityRemoved {
                entity: remote,
                timestamp: 100,
            },
        )
        .unwrap();
        clock.advance_ms(100);
        session.frame(&DeviceState::new());
        assert!(!session.interpolator().contains(remote));
        assert!(session
            .events()
            .drain()
            .any(|e| e == SessionEvent::Removed(remote)));
    }

    #[test]
    fn test_malformed_packet_counted() {
        let (mut host, mut session, _clock) = setup();
        host.send(ConnectionId(0), tempo_netcode::Channel::Unreliable, &[0x02, 0xff])
            .unwrap();
        session.frame(&DeviceState::new());
        assert_eq!(session.metrics().malformed_packets, 1);
        assert_eq!(session.state(), SessionState::Connecting);
    }
}
