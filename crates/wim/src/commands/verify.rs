use bytes::Bytes;
use wim_apdu_core::Command;

use crate::constants::{cla, ins};

/// VERIFY without data, reporting whether the PIN still needs verification
pub fn verify_status(pin_reference: u8) -> Command {
    Command::new(cla::ISO, ins::VERIFY, 0x00, pin_reference)
}

/// VERIFY with a padded PIN value
pub fn verify(pin_reference: u8, pin: &[u8]) -> Command {
    verify_status(pin_reference).with_data(Bytes::copy_from_slice(pin))
}
