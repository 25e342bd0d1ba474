use std::ops::BitOr;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use wim_apdu_core::CardTransport;

use super::{CredentialManager, algorithm_identifier};
use crate::constants::oid;
use crate::dn;
use crate::pin::PinOutcome;
use crate::session::CardSession;
use crate::tlv::{Tlv, tags};
use crate::types::{Certificate, KeyUsage, PrivateKey};
use crate::ui::{Confirmation, UserInterface};
use crate::x509::X509;
use crate::{Error, Result};

/// What goes into a CMS `SignedData` besides the signature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SignatureOptions(u8);

impl SignatureOptions {
    /// Embed the signed data
    pub const INCLUDE_CONTENT: Self = Self(0x01);
    /// Embed the signer's certificate
    pub const INCLUDE_SIGNER_CERT: Self = Self(0x02);
    /// Embed the signer's certificate and every CA certificate of its chain
    pub const INCLUDE_CHAIN: Self = Self(0x04);

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Options from raw flag bits, unknown bits dropped
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x07)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SignatureOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl<U: UserInterface> CredentialManager<U> {
    /// Sign `data` and wrap the signature in a CMS `SignedData` ContentInfo
    ///
    /// Every certificate on the card whose key allows the requested usage is a
    /// candidate, provided a chain can be built for it. With
    /// `trusted_ca_names` (RFC 2253) the chain must reach one of those names.
    /// Returns `Ok(None)` when the user cancels.
    #[instrument(level = "debug", skip_all, fields(non_repudiation = non_repudiation, length = data.len()))]
    pub fn generate_signature<T: CardTransport>(
        &mut self,
        session: &mut CardSession<T>,
        non_repudiation: bool,
        data: &[u8],
        options: SignatureOptions,
        trusted_ca_names: &[&str],
    ) -> Result<Option<Bytes>> {
        let usage = if non_repudiation {
            KeyUsage::NonRepudiation
        } else {
            KeyUsage::Authentication
        };
        let trusted = trusted_ca_names
            .iter()
            .map(|name| dn::to_der(name).and_then(Tlv::from_bytes))
            .collect::<Result<Vec<_>>>()?;

        let keys = session.load_private_keys()?;
        let certificates = session.load_certificates(true, true)?;
        let views: Vec<Option<X509<'_>>> = certificates
            .iter()
            .map(|c| c.parsed.as_ref().and_then(|p| X509::new(p).ok()))
            .collect();
        let now = OffsetDateTime::now_utc();

        let mut candidates: Vec<(&PrivateKey, Vec<usize>)> = Vec::new();
        for (index, certificate) in certificates.iter().enumerate() {
            let Some(key) = keys
                .iter()
                .find(|key| key.id == certificate.id && key.has_usage(usage))
            else {
                continue;
            };
            match build_chain(&views, index, now, &trusted) {
                Some(chain) => candidates.push((key, chain)),
                None => debug!(label = %certificate.label, "No acceptable chain"),
            }
        }

        let selected = match candidates.len() {
            0 => {
                warn!(%usage, "No certificate available for signing");
                return Err(Error::NoMatchingKey);
            }
            1 => {
                let prompt = describe_chain(&certificates, &views, &candidates[0].1);
                if self.ui.show_message("Signature", &prompt, true) == Confirmation::Cancelled {
                    info!("Signature cancelled");
                    return Ok(None);
                }
                0
            }
            count => {
                let labels: Vec<&str> = candidates
                    .iter()
                    .map(|(_, chain)| certificates[chain[0]].label.as_str())
                    .collect();
                match self.ui.choose_item("Signature", "Signing certificate", &labels) {
                    Some(choice) if choice < count => choice,
                    _ => {
                        info!("Signature cancelled");
                        return Ok(None);
                    }
                }
            }
        };
        let (key, chain) = &candidates[selected];

        let pin = session.pin(key.auth_id).cloned().ok_or(Error::NoMatchingKey)?;
        match session.check_pin(&mut self.ui, &pin)? {
            PinOutcome::Disabled => {}
            PinOutcome::Cancelled => return Ok(None),
            PinOutcome::Blocked => return Err(Error::SecurityError),
        }

        let attributes = signed_attributes(data, now)?;
        let signature = session.sign(key, &attributes.der_data())?;

        let signer = views[chain[0]].ok_or(Error::MalformedEncoding("signer certificate"))?;
        let embedded: Vec<Tlv> = if options.contains(SignatureOptions::INCLUDE_CHAIN) {
            chain
                .iter()
                .filter_map(|index| certificates[*index].parsed.clone())
                .collect()
        } else if options.contains(SignatureOptions::INCLUDE_SIGNER_CERT) {
            vec![signer.certificate().clone()]
        } else {
            Vec::new()
        };
        let content = options
            .contains(SignatureOptions::INCLUDE_CONTENT)
            .then_some(data);

        let cms = signed_data(&signer, &attributes, signature, embedded, content)?;
        info!(label = %certificates[chain[0]].label, "Signature created");
        Ok(Some(cms.der_data()))
    }
}

/// Certificates from `leaf` up through its issuers
///
/// Issuers must be valid at `now`. With trusted names the chain is cut at the
/// first certificate whose subject is one of them, and rejected if there is
/// none; without, whatever chain can be built is accepted.
fn build_chain(
    views: &[Option<X509<'_>>],
    leaf: usize,
    now: OffsetDateTime,
    trusted: &[Tlv],
) -> Option<Vec<usize>> {
    let mut chain = vec![leaf];
    loop {
        let current = views[*chain.last()?]?;
        if trusted.iter().any(|name| dn::compare(current.subject(), name)) {
            return Some(chain);
        }
        if current.is_self_issued() {
            break;
        }
        let issuer = views.iter().enumerate().position(|(index, candidate)| {
            !chain.contains(&index)
                && candidate.is_some_and(|c| {
                    c.is_valid_at(now) && dn::compare(current.issuer(), c.subject())
                })
        });
        match issuer {
            Some(issuer) => chain.push(issuer),
            None => break,
        }
    }
    trusted.is_empty().then_some(chain)
}

fn describe_chain(
    certificates: &[Certificate],
    views: &[Option<X509<'_>>],
    chain: &[usize],
) -> String {
    let mut lines = vec![format!("Sign with {}", certificates[chain[0]].label)];
    for index in chain {
        if let Some(view) = views[*index] {
            let subject = dn::name_to_string(view.subject()).unwrap_or_default();
            lines.push(format!("  {subject}"));
        }
    }
    lines.join("\n")
}

/// `SignedAttributes` as the SET that gets signed
fn signed_attributes(data: &[u8], now: OffsetDateTime) -> Result<Tlv> {
    let digest = Sha1::digest(data);
    let signing_time = Tlv::utc_time(now).unwrap_or_else(|_| Tlv::generalized_time(now));
    Ok(Tlv::set([
        attribute(oid::CONTENT_TYPE, Tlv::oid(oid::DATA)?)?,
        attribute(oid::SIGNING_TIME, signing_time)?,
        attribute(
            oid::MESSAGE_DIGEST,
            Tlv::octet_string(Bytes::copy_from_slice(&digest)),
        )?,
    ]))
}

fn attribute(attribute_type: &str, value: Tlv) -> Result<Tlv> {
    Ok(Tlv::sequence([Tlv::oid(attribute_type)?, Tlv::set([value])]))
}

/// ContentInfo holding a SignedData with a single signer
fn signed_data(
    signer: &X509<'_>,
    attributes: &Tlv,
    signature: Bytes,
    certificates: Vec<Tlv>,
    content: Option<&[u8]>,
) -> Result<Tlv> {
    let digest_algorithm = algorithm_identifier(oid::SHA1)?;

    let mut encapsulated = vec![Tlv::oid(oid::DATA)?];
    if let Some(content) = content {
        encapsulated.push(Tlv::context(
            0,
            [Tlv::octet_string(Bytes::copy_from_slice(content))],
        ));
    }

    let signer_info = Tlv::sequence([
        Tlv::integer(1),
        signer.issuer_and_serial(),
        digest_algorithm.clone(),
        Tlv::constructed(tags::context(0), attributes.children().cloned()),
        algorithm_identifier(oid::RSA_ENCRYPTION)?,
        Tlv::octet_string(signature),
    ]);

    let mut fields = vec![
        Tlv::integer(1),
        Tlv::set([digest_algorithm]),
        Tlv::sequence(encapsulated),
    ];
    if !certificates.is_empty() {
        fields.push(Tlv::constructed(tags::context(0), certificates));
    }
    fields.push(Tlv::set([signer_info]));

    Ok(Tlv::sequence([
        Tlv::oid(oid::SIGNED_DATA)?,
        Tlv::context(0, [Tlv::sequence(fields)]),
    ]))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_options() {
        let options = SignatureOptions::INCLUDE_CONTENT | SignatureOptions::INCLUDE_CHAIN;
        assert_eq!(options.bits(), 0x05);
        assert!(options.contains(SignatureOptions::INCLUDE_CHAIN));
        assert!(!options.contains(SignatureOptions::INCLUDE_SIGNER_CERT));
        assert_eq!(SignatureOptions::from_bits(0xFF).bits(), 0x07);
        assert!(SignatureOptions::empty().contains(SignatureOptions::empty()));
    }

    #[test]
    fn test_signed_attributes_are_sorted() {
        let attributes = signed_attributes(b"abc", datetime!(2024-03-01 12:00 UTC)).unwrap();
        assert_eq!(attributes.tag(), tags::SET);

        let encoded: Vec<Bytes> = attributes.children().map(Tlv::der_data).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);

        let digest = attributes
            .children()
            .find(|a| a.child().unwrap().as_oid().unwrap() == oid::MESSAGE_DIGEST)
            .unwrap();
        assert_eq!(
            hex::encode_upper(digest.child_at(1).unwrap().child().unwrap().value()),
            "A9993E364706816ABA3E25717850C26C9CD0D89D"
        );

        let time = attributes
            .children()
            .find(|a| a.child().unwrap().as_oid().unwrap() == oid::SIGNING_TIME)
            .unwrap();
        assert_eq!(
            time.child_at(1).unwrap().child().unwrap().value().as_ref(),
            b"240301120000Z"
        );
    }
}
