//! Error types for tempo-core

use crate::EntityId;
use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Stale or unknown entity handle: {0}")]
    StaleHandle(EntityId),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
