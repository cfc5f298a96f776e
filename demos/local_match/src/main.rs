//! Local Match Demo
//!
//! Runs the server on a background thread and two clients on the main thread.
//! One client walks right and jumps, the other stands still; each watches the
//! other through interpolation.
//!
//! Set `RUST_LOG=debug` for more detail.

use std::thread;
use std::time::Duration;
use tempo_core::{Clock, MonotonicClock};
use tempo_hub::{
    spawn_local_server, ClientConfig, ClientSession, MapData, ServerConfig, SessionEvent,
    SessionState,
};
use tempo_netcode::{Control, DeviceState, MemoryClient};
use tracing_subscriber::EnvFilter;

type Session = ClientSession<MemoryClient, MonotonicClock>;

const FRAME: Duration = Duration::from_millis(8);
const MATCH_LENGTH: Duration = Duration::from_secs(3);

fn main() -> tempo_hub::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Tempo Local Match ===\n");

    let map = MapData::default();
    let server = spawn_local_server(ServerConfig::default(), &map)?;

    let clock = MonotonicClock::new();
    let mut sessions: Vec<Session> = (0..2)
        .map(|_| -> tempo_hub::Result<Session> {
            Ok(ClientSession::new(
                server.connect()?,
                clock,
                ClientConfig::default(),
                map.build_grid(),
            ))
        })
        .collect::<tempo_hub::Result<_>>()?;

    let mut runner = DeviceState::new();
    runner.press(Control::Key('d' as u32));
    let idle = DeviceState::new();

    // Lobby: wait for both connections, then ready up
    let mut ready = [false; 2];
    while !ready.iter().all(|r| *r) {
        for (i, session) in sessions.iter_mut().enumerate() {
            session.frame(&idle);
            if !ready[i] && session.state() == SessionState::Lobby {
                session.ready()?;
                ready[i] = true;
            }
        }
        thread::sleep(FRAME);
    }
    println!("Both clients ready, starting match\n");

    let start = clock.elapsed();
    let mut jumped = false;
    while clock.elapsed() - start < MATCH_LENGTH {
        let played = clock.elapsed() - start;
        if !jumped && played > Duration::from_millis(1500) {
            runner.press(Control::Key(' ' as u32));
            jumped = true;
        } else if jumped {
            runner.release(Control::Key(' ' as u32));
        }

        sessions[0].frame(&runner);
        sessions[1].frame(&idle);

        for (i, session) in sessions.iter_mut().enumerate() {
            for event in session.events().drain() {
                if let SessionEvent::Gameplay(game) = event {
                    println!("  client {i}: {:?} at {} ms", game.effect, game.timestamp);
                }
            }
        }
        thread::sleep(FRAME);
    }

    println!("\nFinal positions:");
    for (i, session) in sessions.iter().enumerate() {
        if let Some(state) = session.predicted() {
            println!(
                "  client {i} predicts itself at ({:.2}, {:.2}) [{}]",
                state.position.x, state.position.y, state.state
            );
        }
        for (entity, transform) in session.interpolator().iter() {
            println!(
                "  client {i} sees {entity} at ({:.2}, {:.2})",
                transform.position.x, transform.position.y
            );
        }
        println!("  client {i} metrics: {:?}", session.metrics());
    }

    for session in &mut sessions {
        session.close();
    }
    let metrics = server.stop()?;
    println!("\nServer metrics: {metrics:?}");
    Ok(())
}
