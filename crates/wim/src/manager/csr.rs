use bytes::Bytes;
use tracing::{debug, info, instrument};
use wim_apdu_core::CardTransport;

use super::{CredentialManager, algorithm_identifier, rsa_public_key_info};
use crate::constants::oid;
use crate::dn;
use crate::pin::{PinOutcome, PinStatus};
use crate::session::CardSession;
use crate::tlv::{Tlv, tags};
use crate::types::{Certificate, KeyUsage, PrivateKey};
use crate::ui::{Confirmation, UserInterface};
use crate::x509::X509;
use crate::{Error, Result};

/// Parameters of a certificate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrRequest {
    /// RFC 2253 subject, `CN=<card serial>` when absent
    pub subject: Option<String>,
    /// Modulus length of the key in bits
    pub modulus_length: usize,
    pub usage: KeyUsage,
    /// Generate a fresh key pair instead of picking an existing key
    pub generate_key: bool,
}

impl CsrRequest {
    pub const fn new(modulus_length: usize, usage: KeyUsage) -> Self {
        Self {
            subject: None,
            modulus_length,
            usage,
            generate_key: false,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub const fn with_key_generation(mut self, generate_key: bool) -> Self {
        self.generate_key = generate_key;
        self
    }
}

/// How much a key has been used for requests so far, lower is preferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum KeyHistory {
    Unused,
    Requested,
    Certified,
}

impl<U: UserInterface> CredentialManager<U> {
    /// Build and sign a PKCS#10 request for a key on the card
    ///
    /// Keys listed in `seen_key_ids` already had a request made for them and
    /// are picked only when no unused key fits. The chosen key id is added to
    /// the list once the request is signed.
    #[instrument(
        level = "debug",
        skip_all,
        fields(modulus_length = request.modulus_length, usage = %request.usage)
    )]
    pub fn generate_csr<T: CardTransport>(
        &mut self,
        session: &mut CardSession<T>,
        request: &CsrRequest,
        seen_key_ids: &mut Vec<Bytes>,
    ) -> Result<Bytes> {
        let subject = match &request.subject {
            Some(subject) => subject.clone(),
            None => format!("CN={}", session.token_info().serial_hex()),
        };
        let subject = Tlv::from_bytes(dn::to_der(&subject)?)?;

        let prompt = format!(
            "Subject: {}\nKey usage: {}\nAlgorithm: RSA\nKey length: {} bits",
            dn::name_to_string(&subject)?,
            request.usage,
            request.modulus_length
        );
        if self.ui.show_message("Certificate request", &prompt, true) == Confirmation::Cancelled {
            info!("Certificate request cancelled");
            return Err(Error::Cancelled);
        }

        let generated = if request.generate_key {
            let bits =
                u16::try_from(request.modulus_length).map_err(|_| Error::KeyGenUnsupported)?;
            Some(self.generate_key(session, bits, request.usage)?)
        } else {
            None
        };

        let keys = session.load_private_keys()?;
        session.load_pins()?;
        let certificates = session.load_certificates(false, false)?;
        let key = select_key(session, &keys, &certificates, request, generated, seen_key_ids)?;
        debug!(key = %hex::encode_upper(&key.id), label = %key.label, "Key selected");

        let pin = session.pin(key.auth_id).cloned().ok_or(Error::NoMatchingKey)?;
        match session.check_pin(&mut self.ui, &pin)? {
            PinOutcome::Disabled => {}
            PinOutcome::Cancelled => return Err(Error::Cancelled),
            PinOutcome::Blocked => return Err(Error::SecurityError),
        }

        let public_key = public_key_info(session, key, &certificates)?;
        let info = certification_request_info(subject, public_key, request.usage)?;
        let signature = session.sign(key, &info.der_data())?;
        let csr = Tlv::sequence([
            info,
            algorithm_identifier(oid::SHA1_WITH_RSA)?,
            Tlv::bit_string(0, &signature),
        ]);

        if !seen_key_ids.contains(&key.id) {
            seen_key_ids.push(key.id.clone());
        }
        info!(key = %hex::encode_upper(&key.id), "Certificate request created");
        Ok(csr.der_data())
    }
}

/// Pick the key to certify
///
/// A freshly generated key is matched by its reference. Otherwise the first
/// key of the right size and usage, with a usable PIN and the least history,
/// wins.
fn select_key<'k, T: CardTransport>(
    session: &mut CardSession<T>,
    keys: &'k [PrivateKey],
    certificates: &[Certificate],
    request: &CsrRequest,
    generated: Option<u8>,
    seen_key_ids: &[Bytes],
) -> Result<&'k PrivateKey> {
    if let Some(reference) = generated {
        return keys
            .iter()
            .find(|key| key.key_reference == reference && key.has_usage(request.usage))
            .ok_or(Error::NoMatchingKey);
    }

    let mut best: Option<(KeyHistory, &PrivateKey)> = None;
    for key in keys {
        if key.modulus_length != request.modulus_length || !key.has_usage(request.usage) {
            continue;
        }
        let Some(pin) = session.pin(key.auth_id).cloned() else {
            continue;
        };
        if session.pin_status(&pin)? == PinStatus::Blocked {
            debug!(key = %key.label, "Skipping key behind a blocked PIN");
            continue;
        }

        let history = if certificates.iter().any(|c| c.id == key.id) {
            KeyHistory::Certified
        } else if seen_key_ids.contains(&key.id) {
            KeyHistory::Requested
        } else {
            KeyHistory::Unused
        };
        if best.is_none_or(|(current, _)| history < current) {
            best = Some((history, key));
        }
    }
    best.map(|(_, key)| key).ok_or(Error::NoMatchingKey)
}

/// Subject public key of `key`, from its certificate or its public key object
fn public_key_info<T: CardTransport>(
    session: &mut CardSession<T>,
    key: &PrivateKey,
    certificates: &[Certificate],
) -> Result<Tlv> {
    if let Some(certificate) = certificates.iter().find(|c| c.id == key.id) {
        let body = Tlv::from_bytes(session.read_location(&certificate.body)?)?;
        return Ok(X509::new(&body)?.subject_public_key_info().clone());
    }

    let public_key = session
        .load_public_keys()?
        .into_iter()
        .find(|p| p.id == key.id)
        .ok_or(Error::MissingPublicKey)?;
    let body = Tlv::from_bytes(session.read_location(&public_key.body)?)?;
    // a SubjectPublicKeyInfo opens with its AlgorithmIdentifier sequence
    if body.child().is_some_and(|c| c.tag() == tags::SEQUENCE) {
        Ok(body)
    } else {
        rsa_public_key_info(&body.der_data())
    }
}

/// `CertificationRequestInfo` asking for a keyUsage extension
fn certification_request_info(subject: Tlv, public_key: Tlv, usage: KeyUsage) -> Result<Tlv> {
    let key_usage = Tlv::sequence([
        Tlv::oid(oid::KEY_USAGE)?,
        Tlv::boolean(true),
        Tlv::octet_string(Tlv::named_bits(&[usage.x509_bit()]).der_data()),
    ]);
    let extension_request = Tlv::sequence([
        Tlv::oid(oid::EXTENSION_REQUEST)?,
        Tlv::set([Tlv::sequence([key_usage])]),
    ]);
    Ok(Tlv::sequence([
        Tlv::integer(0),
        subject,
        public_key,
        Tlv::context(0, [extension_request]),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_info_layout() {
        let subject = Tlv::from_bytes(dn::to_der("CN=Test").unwrap()).unwrap();
        let public_key = rsa_public_key_info(
            &Tlv::sequence([Tlv::unsigned_integer(&[0xC1; 8]), Tlv::integer(3)]).der_data(),
        )
        .unwrap();
        let info =
            certification_request_info(subject.clone(), public_key, KeyUsage::NonRepudiation)
                .unwrap();
        let info = Tlv::from_bytes(info.der_data()).unwrap();

        assert_eq!(info.child_at(0).unwrap().as_integer().unwrap(), 0);
        assert!(info.child_at(1).unwrap().matches(&subject));
        let attributes = info.child_at(3).unwrap();
        assert_eq!(attributes.tag(), tags::context(0));

        let request = attributes.child().unwrap();
        assert_eq!(request.child().unwrap().as_oid().unwrap(), oid::EXTENSION_REQUEST);
        let extension = request.child_at(1).unwrap().child().unwrap().child().unwrap();
        assert_eq!(extension.child().unwrap().as_oid().unwrap(), oid::KEY_USAGE);
        // nonRepudiation is bit 1: 03 02 06 40
        assert_eq!(
            extension.child_at(2).unwrap().value().as_ref(),
            &[0x03, 0x02, 0x06, 0x40]
        );
    }

    #[test]
    fn test_history_order() {
        assert!(KeyHistory::Unused < KeyHistory::Requested);
        assert!(KeyHistory::Requested < KeyHistory::Certified);
    }
}
