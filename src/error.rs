use std::result;

use thiserror::Error;

pub type Result<T, E = Error> = result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport could not be opened, or is no longer open
    #[error("Connection error: {0}")]
    Connection(String),
    /// Device returned a response that does not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
    /// No reply from the transport within the configured bound
    #[error("Timed out: {0}")]
    Timeout(String),
    /// Argument rejected before anything was sent to the device
    #[error("Validation error: {0}")]
    Validation(String),
    /// A session is already bound to this resource
    #[error("Already connected to {0}")]
    AlreadyConnected(String),
    /// Resource type or feature not supported
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
