//! APDU primitives for talking to a WIM (Wireless Identity Module) smart card
//!
//! This crate provides the byte-level building blocks the PKCS#15 layer sits on:
//!
//! - [`Command`] for ISO/IEC 7816-4 command APDUs, in short or extended form
//! - [`Response`] and [`StatusWord`] for response APDUs
//! - [`CardTransport`], the byte-in/byte-out channel to a card
//!
//! Enable the `mock` feature to get [`transport::MockTransport`], a scripted
//! transport used by downstream tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod response;
pub mod transport;

mod error;
pub use error::{Error, Result};

pub use command::{Command, MAX_SHORT_LC};
pub use response::status::StatusWord;
pub use response::{Response, ResponseError};
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, CardTransport, Command, Error, Response, Result, StatusWord,
        response::status::common as status,
    };
}
