//! Network loop scheduling
//!
//! The server runs a single-threaded loop against a single clock. Each
//! iteration:
//!
//! 1. drains the internal message bus (a state change resets the broadcast
//!    accumulator)
//! 2. handles every queued transport event
//! 3. runs as many fixed simulation steps as the elapsed time covers, up to
//!    `max_steps_per_iteration`, then drains the gameplay events they raised
//! 4. broadcasts poses when the broadcast interval has elapsed
//! 5. pings clients when the ping interval has elapsed
//!
//! The client loop lives in [`ClientSession::frame`](crate::ClientSession::frame).

use crate::{LoopMetrics, Server};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempo_core::Clock;
use tempo_netcode::{HostTransport, ServerState};
use tracing::{debug, info, trace, warn};

/// Fixed-interval time accumulator
///
/// Time goes in through [`add`](Self::add) in whatever chunks the loop sees
/// and comes out in constant `interval` chunks through
/// [`consume`](Self::consume).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulator {
    interval: Duration,
    accumulated: Duration,
}

impl Accumulator {
    pub fn new(interval: Duration) -> Self {
        assert!(!interval.is_zero(), "Interval must be greater than 0");
        Self {
            interval,
            accumulated: Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    pub fn add(&mut self, elapsed: Duration) {
        self.accumulated += elapsed;
    }

    /// Take one interval if enough time has built up
    pub fn consume(&mut self) -> bool {
        if self.accumulated >= self.interval {
            self.accumulated -= self.interval;
            true
        } else {
            false
        }
    }

    /// Take every whole interval, returning how many there were
    pub fn consume_all(&mut self) -> u32 {
        let mut n = 0;
        while self.consume() {
            n += 1;
        }
        n
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
    }
}

/// The server's outer loop
pub struct ServerLoop<T: HostTransport, C: Clock> {
    server: Server<T>,
    clock: C,
    last: Duration,
    simulation: Accumulator,
    broadcast: Accumulator,
    ping: Accumulator,
    metrics: LoopMetrics,
}

impl<T: HostTransport, C: Clock> ServerLoop<T, C> {
    pub fn new(server: Server<T>, clock: C) -> Self {
        let config = server.config();
        let simulation = Accumulator::new(config.fixed_step());
        let broadcast = Accumulator::new(config.broadcast_interval());
        let ping = Accumulator::new(config.ping_interval());
        let last = clock.elapsed();
        Self {
            server,
            clock,
            last,
            simulation,
            broadcast,
            ping,
            metrics: LoopMetrics::default(),
        }
    }

    pub fn server(&self) -> &Server<T> {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut Server<T> {
        &mut self.server
    }

    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    /// Run one iteration against the current clock reading
    pub fn run_iteration(&mut self) {
        let elapsed = self.clock.elapsed();
        let dt = elapsed.saturating_sub(self.last);
        self.last = elapsed;
        let now = self.clock.now_ms();
        self.metrics.iterations += 1;

        if self.server.process_messages(now, &mut self.metrics) {
            debug!(state = ?self.server.state(), "state changed, resetting broadcast timer");
            self.broadcast.reset();
        }

        self.server.poll_network(now, &mut self.metrics);

        self.simulation.add(dt);
        let max_steps = self.server.config().max_steps_per_iteration();
        let mut steps = 0;
        while self.simulation.consume() {
            self.server.simulate(&mut self.metrics);
            self.metrics.sim_ticks += 1;
            steps += 1;
            if steps >= max_steps {
                let dropped = self.simulation.consume_all();
                if dropped > 0 {
                    self.metrics.sim_ticks_dropped += dropped as u64;
                    warn!(dropped, "simulation fell behind, dropping steps");
                }
                break;
            }
        }

        for event in self.server.events().drain() {
            trace!(entity = %event.entity, effect = ?event.effect, timestamp = event.timestamp, "game event");
            self.metrics.game_events += 1;
        }

        self.broadcast.add(dt);
        if self.broadcast.consume_all() > 0 && self.server.state() == ServerState::Game {
            self.server.broadcast_state(now);
            self.metrics.broadcasts += 1;
        }

        self.ping.add(dt);
        if self.ping.consume_all() > 0 && self.server.client_count() > 0 {
            self.server.ping(now);
            self.metrics.pings += 1;
        }
    }

    /// Iterate until `stop` is set, sleeping `idle` between iterations, then
    /// shut the server down
    pub fn run(&mut self, stop: &AtomicBool, idle: Duration) {
        info!("server loop started");
        while !stop.load(Ordering::Acquire) {
            self.run_iteration();
            if !idle.is_zero() {
                std::thread::sleep(idle);
            }
        }
        self.server.shutdown();
        info!(
            iterations = self.metrics.iterations,
            sim_ticks = self.metrics.sim_ticks,
            "server loop stopped"
        );
    }

    /// Take the server and the counters back
    pub fn into_parts(self) -> (Server<T>, LoopMetrics) {
        (self.server, self.metrics)
    }
}
