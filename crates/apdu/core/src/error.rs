//! Crate-level error type
//!
//! Errors from the command, response and transport layers are folded into one
//! enum so callers can bubble them up with `?`.

use crate::response::ResponseError;
use crate::transport::TransportError;

/// Result type for APDU operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type covering every layer of this crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport failed to deliver the command
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The card answered with something that is not a response APDU
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// The command could not be encoded
    #[error("Command payload too long: {actual} bytes (max {max})")]
    PayloadTooLong {
        /// Length of the payload that was supplied
        actual: usize,
        /// Largest payload the requested encoding can carry
        max: usize,
    },
}
