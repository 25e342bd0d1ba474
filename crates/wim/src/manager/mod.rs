//! Credential management on a WIM card
//!
//! [`CredentialManager`] owns the user interface and works on a borrowed
//! [`CardSession`]. Operations that change the card collect their writes in a
//! [`PendingUpdate`](crate::update::PendingUpdate) and commit them only after
//! space has been found and every PIN involved has been verified; a cancelled
//! or failed operation leaves the card untouched.

mod credential;
mod csr;
mod keygen;
mod signature;

use wim_apdu_core::CardTransport;

pub use csr::CsrRequest;
pub use signature::SignatureOptions;

use crate::constants::oid;
use crate::pin::PinOutcome;
use crate::session::CardSession;
use crate::tlv::Tlv;
use crate::types::PinAttributes;
use crate::ui::UserInterface;
use crate::{Error, Result};

/// How a credential operation ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Nothing to do on this card
    Skip,
    /// The user declined at a prompt
    Cancelled,
}

#[derive(Debug)]
pub struct CredentialManager<U: UserInterface> {
    ui: U,
}

impl<U: UserInterface> CredentialManager<U> {
    pub const fn new(ui: U) -> Self {
        Self { ui }
    }

    pub const fn ui(&self) -> &U {
        &self.ui
    }

    pub const fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn into_ui(self) -> U {
        self.ui
    }

    /// Verify `pins` in order; `Ok(false)` once the user cancels
    fn verify_pins<T: CardTransport>(
        &mut self,
        session: &mut CardSession<T>,
        pins: &[PinAttributes],
    ) -> Result<bool> {
        for pin in pins {
            match session.check_pin(&mut self.ui, pin)? {
                PinOutcome::Disabled => {}
                PinOutcome::Cancelled => return Ok(false),
                PinOutcome::Blocked => return Err(Error::SecurityError),
            }
        }
        Ok(true)
    }
}

/// `AlgorithmIdentifier` with NULL parameters
fn algorithm_identifier(algorithm: &str) -> Result<Tlv> {
    Ok(Tlv::sequence([Tlv::oid(algorithm)?, Tlv::null()]))
}

/// `SubjectPublicKeyInfo` for an RSA public key
fn rsa_public_key_info(rsa_public_key: &[u8]) -> Result<Tlv> {
    Ok(Tlv::sequence([
        algorithm_identifier(oid::RSA_ENCRYPTION)?,
        Tlv::bit_string(0, rsa_public_key),
    ]))
}
