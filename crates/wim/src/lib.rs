//! PKCS#15 object store for WIM (Wireless Identity Module) smart cards
//!
//! The crate reads the PKCS#15 structures of the WIM application, keeps the
//! card's free space bookkeeping in EF(UnusedSpace) and manages credentials:
//!
//! - [`CardSession`] selects the application and loads keys, PINs and
//!   certificates from the object directories
//! - [`CredentialManager`] creates certificate requests, generates keys,
//!   stores and removes certificate chains and produces CMS signatures
//! - [`UserInterface`] is how the manager talks to the card holder
//!
//! All card access goes through a [`wim_apdu_core::CardTransport`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]

pub mod commands;
pub mod config;
pub mod connection;
pub mod constants;
pub mod directory;
pub mod dn;
pub mod fs;
pub mod manager;
pub mod pin;
pub mod pkcs15;
pub mod session;
pub mod signer;
pub mod space;
pub mod tlv;
pub mod types;
pub mod ui;
pub mod update;
pub mod x509;

mod error;
pub use error::{Error, Result};

pub use config::WimConfig;
pub use manager::{CredentialManager, CsrRequest, Outcome, SignatureOptions};
pub use pin::{PinOutcome, PinStatus};
pub use session::CardSession;
pub use tlv::Tlv;
pub use types::{
    Certificate, CertificateDirectory, KeyUsage, Location, Path, PinAttributes, PrivateKey,
    TokenInfo,
};
pub use ui::{Confirmation, NewPin, UserInterface};
pub use x509::X509;
