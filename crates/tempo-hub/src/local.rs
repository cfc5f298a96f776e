//! Local multiplayer server
//!
//! Runs a [`ServerLoop`] over the in-memory transport on a dedicated thread.
//! The transport is the only state shared with the rest of the process.

use crate::{Error, LoopMetrics, MapData, Result, Server, ServerConfig, ServerLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempo_core::MonotonicClock;
use tempo_netcode::{MemoryClient, MemoryConnector, MemoryHost};
use tracing::info;

/// Sleep between server iterations
const IDLE: Duration = Duration::from_millis(1);

/// Handle to a server running on a background thread
///
/// Dropping the handle stops the server and waits for the thread.
pub struct LocalServer {
    connector: MemoryConnector,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<LoopMetrics>>,
}

/// Start a server thread for `map`
pub fn spawn_local_server(config: ServerConfig, map: &MapData) -> Result<LocalServer> {
    let (host, connector) = MemoryHost::new();
    let server = Server::new(host, config, map.build_grid());
    let stop = Arc::new(AtomicBool::new(false));

    let thread_stop = Arc::clone(&stop);
    let handle = thread::Builder::new()
        .name("tempo-server".to_string())
        .spawn(move || {
            let mut server_loop = ServerLoop::new(server, MonotonicClock::new());
            server_loop.run(&thread_stop, IDLE);
            let (_, metrics) = server_loop.into_parts();
            metrics
        })?;

    info!("local server started");
    Ok(LocalServer {
        connector,
        stop,
        handle: Some(handle),
    })
}

impl LocalServer {
    /// Open a client link to the server
    pub fn connect(&self) -> Result<MemoryClient> {
        Ok(self.connector.connect()?)
    }

    /// A connector other threads can clone and join through
    pub fn connector(&self) -> MemoryConnector {
        self.connector.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the server and return its counters
    pub fn stop(mut self) -> Result<LoopMetrics> {
        self.join()
    }

    fn join(&mut self) -> Result<LoopMetrics> {
        self.stop.store(true, Ordering::Release);
        let handle = self.handle.take().ok_or(Error::ServerPanicked)?;
        handle.join().map_err(|_| Error::ServerPanicked)
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.join();
        }
    }
}
