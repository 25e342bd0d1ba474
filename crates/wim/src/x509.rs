//! Read-only view over a decoded X.509 certificate

use std::fmt;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use time::OffsetDateTime;

use crate::constants::oid;
use crate::dn;
use crate::tlv::{Tlv, tags};
use crate::{Error, Result};

/// Fields of a certificate's `TBSCertificate`
#[derive(Debug, Clone, Copy)]
pub struct X509<'a> {
    certificate: &'a Tlv,
    serial: &'a Tlv,
    issuer: &'a Tlv,
    validity: &'a Tlv,
    subject: &'a Tlv,
    spki: &'a Tlv,
}

impl<'a> X509<'a> {
    /// Locate the certificate fields, failing when the structure is not X.509
    pub fn new(certificate: &'a Tlv) -> Result<Self> {
        if certificate.tag() != tags::SEQUENCE {
            return Err(Error::MalformedEncoding("certificate is not a sequence"));
        }
        let tbs = certificate
            .child()
            .filter(|t| t.tag() == tags::SEQUENCE)
            .ok_or(Error::MalformedEncoding("certificate without TBSCertificate"))?;

        let mut fields = tbs.children().skip_while(|f| f.tag() == tags::context(0));
        let mut next = |what: &'static str, tag: u32| {
            fields
                .next()
                .filter(|f| f.tag() == tag)
                .ok_or(Error::MalformedEncoding(what))
        };
        let serial = next("certificate without serial number", tags::INTEGER)?;
        next("certificate without signature algorithm", tags::SEQUENCE)?;
        let issuer = next("certificate without issuer", tags::SEQUENCE)?;
        let validity = next("certificate without validity", tags::SEQUENCE)?;
        let subject = next("certificate without subject", tags::SEQUENCE)?;
        let spki = next("certificate without public key", tags::SEQUENCE)?;

        Ok(Self {
            certificate,
            serial,
            issuer,
            validity,
            subject,
            spki,
        })
    }

    pub const fn certificate(&self) -> &'a Tlv {
        self.certificate
    }

    pub const fn serial(&self) -> &'a Tlv {
        self.serial
    }

    pub const fn issuer(&self) -> &'a Tlv {
        self.issuer
    }

    pub const fn subject(&self) -> &'a Tlv {
        self.subject
    }

    /// `SubjectPublicKeyInfo`
    pub const fn subject_public_key_info(&self) -> &'a Tlv {
        self.spki
    }

    pub fn not_before(&self) -> Result<OffsetDateTime> {
        self.validity
            .child()
            .ok_or(Error::MalformedEncoding("validity without notBefore"))?
            .as_time()
    }

    pub fn not_after(&self) -> Result<OffsetDateTime> {
        self.validity
            .child_at(1)
            .ok_or(Error::MalformedEncoding("validity without notAfter"))?
            .as_time()
    }

    /// Within the validity period at `at`
    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        match (self.not_before(), self.not_after()) {
            (Ok(start), Ok(end)) => start <= at && at <= end,
            _ => false,
        }
    }

    /// Issuer and subject names match
    pub fn is_self_issued(&self) -> bool {
        dn::compare(self.issuer, self.subject)
    }

    /// Same issuer and serial number, compared byte for byte
    pub fn same_issuer_and_serial(&self, other: &X509<'_>) -> bool {
        self.issuer.matches(other.issuer) && self.serial.matches(other.serial)
    }

    /// `IssuerAndSerialNumber` structure
    pub fn issuer_and_serial(&self) -> Tlv {
        Tlv::sequence([self.issuer.clone(), self.serial.clone()])
    }

    /// SHA-1 of the public key, used as PKCS#15 identifier
    ///
    /// RSA keys hash the modulus, EC keys the point without its leading format
    /// byte, anything else the raw subjectPublicKey bits.
    pub fn public_key_hash(&self) -> Result<Bytes> {
        let algorithm = self
            .spki
            .child()
            .and_then(Tlv::child)
            .ok_or(Error::MalformedEncoding("public key without algorithm"))?
            .as_oid()?;
        let bits = self
            .spki
            .child_at(1)
            .ok_or(Error::MalformedEncoding("public key without key bits"))?
            .bit_string_bytes()?;

        let hashed = match algorithm.as_str() {
            oid::RSA_ENCRYPTION => {
                let key = Tlv::from_bytes(bits)?;
                let modulus = key
                    .child()
                    .filter(|m| m.tag() == tags::INTEGER)
                    .ok_or(Error::MalformedEncoding("RSA key without modulus"))?
                    .value();
                let first = modulus.iter().position(|b| *b != 0).unwrap_or(modulus.len());
                modulus.slice(first..)
            }
            oid::EC_PUBLIC_KEY if !bits.is_empty() => bits.slice(1..),
            _ => bits,
        };
        Ok(Bytes::copy_from_slice(&Sha1::digest(&hashed)))
    }
}

impl fmt::Display for X509<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |n: &Tlv| dn::name_to_string(n).unwrap_or_else(|_| "?".into());
        writeln!(f, "Subject: {}", name(self.subject))?;
        writeln!(f, "Issuer: {}", name(self.issuer))?;
        writeln!(f, "Serial: {}", hex::encode_upper(self.serial.value()))?;
        match (self.not_before(), self.not_after()) {
            (Ok(start), Ok(end)) => write!(f, "Valid: {start} - {end}"),
            _ => write!(f, "Valid: ?"),
        }
    }
}
