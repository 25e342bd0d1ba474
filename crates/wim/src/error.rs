use iso7816_tlv::TlvError;
use wim_apdu_core::{ResponseError, StatusWord, TransportError};

/// Result type for WIM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for WIM operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-related errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The card's answer was not a response APDU
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// A command payload did not fit the APDU encoding
    #[error("Command payload too long: {0} bytes")]
    CommandTooLong(usize),

    /// The card answered with a non-success status word
    #[error("Card returned status {status}: {}", status.description())]
    Io {
        /// Status word reported by the card
        status: StatusWord,
    },

    /// TLV/DER structure could not be decoded
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(&'static str),

    /// RFC 2253 name could not be parsed
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// The PIN protecting the operation is blocked
    #[error("PIN is blocked")]
    SecurityError,

    /// The user aborted at a prompt
    #[error("Operation cancelled")]
    Cancelled,

    /// A file operation needs an elementary file to be selected
    #[error("No elementary file selected")]
    NoFileSelected,

    #[error("No matching private key on the card")]
    NoMatchingKey,

    #[error("No public key found for the selected private key")]
    MissingPublicKey,

    #[error("Insufficient free space on the card")]
    InsufficientSpace,

    #[error("Directory file is full")]
    DirectoryFull,

    #[error("Invalid certificate chain: {0}")]
    InvalidChain(&'static str),

    #[error("Credential already present on the card")]
    DuplicateCredential,

    #[error("No PINs found on the card")]
    NoPinsFound,

    #[error("Key generation is not supported by the card")]
    KeyGenUnsupported,

    #[error("No space on the card for a new key")]
    NoKeySpace,

    #[error("TlvError: {0}")]
    Tlv(TlvError),

    #[error(transparent)]
    Time(#[from] time::error::ComponentRange),
}

impl Error {
    /// Status word carried by an [`Error::Io`]
    pub const fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::Io { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<TlvError> for Error {
    fn from(error: TlvError) -> Self {
        Self::Tlv(error)
    }
}

impl From<StatusWord> for Error {
    fn from(status: StatusWord) -> Self {
        Self::Io { status }
    }
}

impl From<wim_apdu_core::Error> for Error {
    fn from(error: wim_apdu_core::Error) -> Self {
        match error {
            wim_apdu_core::Error::Transport(e) => Self::Transport(e),
            wim_apdu_core::Error::Response(e) => Self::Response(e),
            wim_apdu_core::Error::PayloadTooLong { actual, .. } => Self::CommandTooLong(actual),
        }
    }
}
