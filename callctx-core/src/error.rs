//! Call context errors

use thiserror::Error;

/// Errors raised while constructing a call context
///
/// Once a context exists no operation returns an error; engine failure is
/// reported through the state stream and persistence is best effort.
#[derive(Error, Debug)]
pub enum CallContextError {
    /// The legacy engine requires a reflector primary connection
    #[error("No usable primary connection for the legacy engine")]
    NoPrimaryConnection,

    /// Temp artifact allocation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Construction happened outside a tokio runtime
    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}
