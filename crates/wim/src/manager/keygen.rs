use tracing::{info, instrument, warn};
use wim_apdu_core::CardTransport;
use zeroize::Zeroizing;

use super::CredentialManager;
use crate::commands::{GENERATE_KEY_RUN, generate_key_probe};
use crate::constants::{KEYGEN_PROBE_ACK, NEW_PIN_LABEL_LENGTH, NEW_PIN_LENGTH, cla, ins};
use crate::session::CardSession;
use crate::types::KeyUsage;
use crate::ui::UserInterface;
use crate::{Error, Result};

impl<U: UserInterface> CredentialManager<U> {
    /// Have the card generate an RSA key pair, returning its key reference
    ///
    /// The card is first asked whether it can. Non-repudiation keys get a PIN
    /// of their own, whose label and value are asked from the user.
    #[instrument(level = "debug", skip_all, fields(modulus_bits = modulus_bits, usage = %usage))]
    pub fn generate_key<T: CardTransport>(
        &mut self,
        session: &mut CardSession<T>,
        modulus_bits: u16,
        usage: KeyUsage,
    ) -> Result<u8> {
        let connection = session.connection_mut();
        let probe = connection.transmit(&generate_key_probe(modulus_bits, usage))?;
        if probe.status().is_no_key_space() {
            warn!("No room for another key");
            return Err(Error::NoKeySpace);
        }
        if !probe.is_success() || probe.payload().as_ref() != KEYGEN_PROBE_ACK {
            info!(status = %probe.status(), "Key generation not supported");
            return Err(Error::KeyGenUnsupported);
        }

        let new_pin = match usage {
            KeyUsage::NonRepudiation => Some(self.ui.enter_new_pin().ok_or(Error::Cancelled)?),
            KeyUsage::Authentication => None,
        };

        connection
            .reset_command()
            .set_class(cla::PROPRIETARY)
            .put_short(modulus_bits)
            .put_byte(usage.keygen_flag());
        if let Some(new_pin) = &new_pin {
            connection.put_bytes(&padded(
                new_pin.label.as_bytes(),
                NEW_PIN_LABEL_LENGTH,
                b' ',
            ));
            connection.put_bytes(&padded(new_pin.pin.as_bytes(), NEW_PIN_LENGTH, 0xFF));
        }

        let response = connection.transceive_command(
            ins::GENERATE_KEY,
            u16::from(GENERATE_KEY_RUN) << 8,
            Some(256),
        )?;
        let status = response.status();
        if status.is_no_key_space() {
            return Err(Error::NoKeySpace);
        }
        if !status.is_success() {
            return Err(status.into());
        }

        let key_reference = *response
            .payload()
            .first()
            .ok_or(Error::MalformedEncoding("key generation returned no key reference"))?;
        info!(key_reference, "Key pair generated");
        Ok(key_reference)
    }
}

/// `value` cut or padded with `pad` to exactly `length` bytes
fn padded(value: &[u8], length: usize, pad: u8) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![pad; length]);
    let used = value.len().min(length);
    out[..used].copy_from_slice(&value[..used]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding() {
        assert_eq!(padded(b"1234", 8, 0xFF).as_slice(), b"1234\xFF\xFF\xFF\xFF");
        assert_eq!(padded(b"abc", 2, b' ').as_slice(), b"ab");
        assert_eq!(padded(b"", 3, b' ').as_slice(), b"   ");
    }
}
