//! Error types for the harvesting engine.

use thiserror::Error;

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by engine control operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid port, address, label, or a toggle on an unavailable source.
    /// The rejected update has no side effects.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Not enough whitened output accumulated before the mint timeout.
    #[error("insufficient entropy: needed {needed} whitened bytes, {available} available after {waited_ms} ms")]
    InsufficientEntropy {
        needed: usize,
        available: usize,
        waited_ms: u128,
    },

    /// Uplink or P2P send/bind failure.
    #[error("network error: {0}")]
    Network(String),

    /// Vault read or write failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Post-quantum key derivation failed.
    #[error("key generation error: {0}")]
    KeyGeneration(String),

    /// The engine has been shut down.
    #[error("engine stopped")]
    Stopped,
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}
