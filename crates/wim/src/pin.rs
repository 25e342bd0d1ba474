//! PIN status probing and verification

use tracing::{debug, info, instrument, warn};
use wim_apdu_core::CardTransport;
use zeroize::Zeroizing;

use crate::Result;
use crate::commands::{verify, verify_status};
use crate::connection::Connection;
use crate::types::PinAttributes;
use crate::ui::UserInterface;

/// What the card reports for a PIN before any value is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinStatus {
    /// Verification disabled, or already verified in this session
    Disabled,
    Blocked,
    Required,
}

/// Result of [`check_pin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    /// The PIN no longer stands in the way
    Disabled,
    Blocked,
    Cancelled,
}

/// Probe `pin` with an empty VERIFY
pub fn pin_status<T: CardTransport>(
    connection: &mut Connection<T>,
    pin: &PinAttributes,
) -> Result<PinStatus> {
    let status = connection.transmit(&verify_status(pin.pin_reference))?.status();
    let pin_status = if status.is_success() {
        PinStatus::Disabled
    } else if status.is_authentication_blocked() {
        PinStatus::Blocked
    } else {
        PinStatus::Required
    };
    debug!(pin = %pin.label, %status, ?pin_status, "PIN status");
    Ok(pin_status)
}

/// Make sure `pin` is verified, prompting the user as long as needed
///
/// A blocked PIN is reported once to the user and never prompted for. Wrong
/// values are reported and prompted for again; the card's own retry counter
/// ends the loop by blocking the PIN.
#[instrument(level = "debug", skip_all, fields(pin = %pin.label))]
pub fn check_pin<T: CardTransport, U: UserInterface + ?Sized>(
    connection: &mut Connection<T>,
    ui: &mut U,
    pin: &PinAttributes,
) -> Result<PinOutcome> {
    match pin_status(connection, pin)? {
        PinStatus::Disabled => return Ok(PinOutcome::Disabled),
        PinStatus::Blocked => return Ok(blocked(ui, pin)),
        PinStatus::Required => {}
    }

    loop {
        let Some(value) = ui.enter_pin(pin) else {
            info!("PIN entry cancelled");
            return Ok(PinOutcome::Cancelled);
        };

        let padded = pad_pin(pin, &value);
        let status = connection
            .transmit(&verify(pin.pin_reference, &padded))?
            .status();
        if status.is_success() {
            debug!("PIN verified");
            return Ok(PinOutcome::Disabled);
        }
        if status.is_authentication_blocked() {
            return Ok(blocked(ui, pin));
        }

        warn!(%status, retries = ?status.retries_left(), "PIN not verified");
        ui.show_message(&pin.label, "PIN not verified", false);
    }
}

fn blocked<U: UserInterface + ?Sized>(ui: &mut U, pin: &PinAttributes) -> PinOutcome {
    warn!(pin = %pin.label, "PIN blocked");
    ui.show_message(&pin.label, &format!("{} is blocked", pin.label), false);
    PinOutcome::Blocked
}

/// PIN value padded with the pad character up to its stored length
pub fn pad_pin(pin: &PinAttributes, value: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut padded = Zeroizing::new(Vec::with_capacity(pin.stored_length.max(value.len())));
    padded.extend_from_slice(value);
    if padded.len() < pin.stored_length {
        padded.resize(pin.stored_length, pin.pad_char);
    }
    padded
}
