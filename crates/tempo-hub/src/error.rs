//! Error types for tempo-hub

use crate::SessionState;
use thiserror::Error;

/// Result type for tempo-hub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tempo-hub
///
/// Dropped, stale or malformed packets are not errors; they are logged and
/// counted in the loop metrics.
#[derive(Debug, Error)]
pub enum Error {
    /// Netcode error
    #[error("netcode error: {0}")]
    Netcode(#[from] tempo_netcode::Error),

    /// Core error
    #[error("core error: {0}")]
    Core(#[from] tempo_core::Error),

    /// Config file failed to parse
    #[error("config parse error: {0}")]
    Config(#[from] ron::error::SpannedError),

    /// Config failed to serialize
    #[error("config serialize error: {0}")]
    ConfigWrite(#[from] ron::Error),

    /// A session call that is only valid in the lobby
    #[error("not in the lobby, session is {0:?}")]
    NotInLobby(SessionState),

    /// Reading a config file or starting a thread failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The background server thread panicked
    #[error("server thread panicked")]
    ServerPanicked,
}

// Compile-time check that Error can cross the local server thread boundary
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
