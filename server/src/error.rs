//! Error types for the tank server.

use shared::PeerId;
use thiserror::Error;

/// Structured outcome of a registry operation that could not be applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Tank with ID {id} not found")]
    NotFound { id: PeerId },

    #[error("Tank {id} is already destroyed")]
    AlreadyDestroyed { id: PeerId },
}

impl RegistryError {
    pub fn not_found(id: PeerId) -> Self {
        Self::NotFound { id }
    }

    pub fn already_destroyed(id: PeerId) -> Self {
        Self::AlreadyDestroyed { id }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("Server full")]
    ServerFull,

    #[error("Protocol version mismatch")]
    VersionMismatch { expected: u128, actual: u128 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Invalid parameters. Format: {0}")]
    Usage(&'static str),

    #[error("Invalid tank ID format: {0}")]
    InvalidId(String),
}
