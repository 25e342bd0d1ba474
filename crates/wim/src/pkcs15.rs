//! PKCS#15 object records: decoding directory entries and encoding the
//! records written back by the credential manager

use bytes::Bytes;
use tracing::trace;

use crate::constants::odf;
use crate::tlv::{Tlv, tags};
use crate::types::{
    Certificate, CertificateDirectory, FreeBlock, KeyUsage, Location, ObjectDirectory, Path,
    PinAttributes, PrivateKey, PublicKey, SecurityEnvironment, TokenInfo,
};
use crate::{Error, Result};

/// `CredentialIdentifier` type for a hash of the issuer public key
const ISSUER_KEY_HASH: i64 = 5;

/// Decoded PKCS#15 `Path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValue {
    pub path: Path,
    pub index: Option<u16>,
    pub length: Option<u16>,
}

impl PathValue {
    /// Location covered by this path; a missing length yields 0
    pub fn location(&self) -> Location {
        Location::new(
            self.path.clone(),
            self.index.unwrap_or(0),
            self.length.unwrap_or(0),
        )
    }
}

impl TryFrom<&Tlv> for PathValue {
    type Error = Error;

    fn try_from(tlv: &Tlv) -> Result<Self> {
        if tlv.tag() != tags::SEQUENCE {
            return Err(Error::MalformedEncoding("path is not a sequence"));
        }
        let mut path = None;
        let mut index = None;
        let mut length = None;
        for field in tlv.children() {
            match field.tag() {
                tags::OCTET_STRING => path = Some(Path::from_bytes(&field.value())?),
                tags::INTEGER => index = Some(to_u16(field.as_integer()?)?),
                t if t == tags::implicit(0) => length = Some(to_u16(field.as_integer()?)?),
                _ => {}
            }
        }
        Ok(Self {
            path: path.ok_or(Error::MalformedEncoding("path without file identifiers"))?,
            index,
            length,
        })
    }
}

/// PKCS#15 `Path` covering `location`
pub fn path_tlv(location: &Location) -> Tlv {
    Tlv::sequence([
        Tlv::octet_string(location.path.to_bytes()),
        Tlv::integer(location.offset as i64),
        implicit_integer(0, location.length as i64),
    ])
}

fn implicit_integer(n: u8, value: i64) -> Tlv {
    Tlv::primitive(tags::implicit(n), Tlv::integer(value).value())
}

/// Identifier octets of an authentication object
pub fn auth_id_bytes(id: u32) -> Bytes {
    let bytes = id.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    Bytes::copy_from_slice(&bytes[first..])
}

fn to_u16(value: i64) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::MalformedEncoding("value out of range"))
}

fn to_usize(value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::MalformedEncoding("value out of range"))
}

#[derive(Debug, Default)]
struct CommonObjectAttributes {
    label: String,
    auth_id: Option<u32>,
}

impl CommonObjectAttributes {
    fn decode(tlv: Option<&Tlv>) -> Result<Self> {
        let mut attributes = Self::default();
        let Some(tlv) = tlv.filter(|t| t.tag() == tags::SEQUENCE) else {
            return Ok(attributes);
        };
        for field in tlv.children() {
            match field.tag() {
                tags::UTF8_STRING => attributes.label = field.as_string().unwrap_or_default(),
                tags::OCTET_STRING => attributes.auth_id = Some(field.as_u32()?),
                _ => {}
            }
        }
        Ok(attributes)
    }
}

/// Parse EF(ODF)
pub fn parse_odf(records: &[Tlv]) -> Result<ObjectDirectory> {
    let mut directory = ObjectDirectory::default();
    for record in records {
        let Some(path) = record.child() else {
            continue;
        };
        let path = PathValue::try_from(path)?.path;
        let target = match record.tag() {
            odf::PRIVATE_KEYS => &mut directory.private_keys,
            odf::PUBLIC_KEYS => &mut directory.public_keys,
            odf::CERTIFICATES => &mut directory.certificates,
            odf::TRUSTED_CERTIFICATES => &mut directory.trusted_certificates,
            odf::USEFUL_CERTIFICATES => &mut directory.useful_certificates,
            odf::AUTH_OBJECTS => &mut directory.auth_objects,
            other => {
                trace!(tag = other, "Ignoring ODF entry");
                continue;
            }
        };
        target.push(path);
    }
    Ok(directory)
}

/// Parse EF(TokenInfo)
pub fn parse_token_info(tlv: &Tlv) -> Result<TokenInfo> {
    if tlv.tag() != tags::SEQUENCE {
        return Err(Error::MalformedEncoding("TokenInfo is not a sequence"));
    }
    let mut info = TokenInfo::default();
    let mut fields = tlv.children();

    info.version = fields
        .next()
        .filter(|f| f.tag() == tags::INTEGER)
        .ok_or(Error::MalformedEncoding("TokenInfo without version"))?
        .as_integer()?;
    info.serial_number = fields
        .next()
        .filter(|f| f.tag() == tags::OCTET_STRING)
        .ok_or(Error::MalformedEncoding("TokenInfo without serial number"))?
        .value();

    for field in fields {
        match field.tag() {
            tags::UTF8_STRING => info.manufacturer = field.as_string(),
            t if t == tags::implicit(0) => {
                info.label = Some(String::from_utf8_lossy(&field.value()).into_owned());
            }
            tags::BIT_STRING => info.flags = field.bit_string_bytes()?,
            tags::SEQUENCE if info.security_environments.is_empty() => {
                for entry in field.children() {
                    info.security_environments
                        .push(parse_security_environment(entry)?);
                }
            }
            _ => {}
        }
    }
    Ok(info)
}

fn parse_security_environment(tlv: &Tlv) -> Result<SecurityEnvironment> {
    let se = tlv
        .find(tags::INTEGER)
        .ok_or(Error::MalformedEncoding("seInfo without se"))?
        .as_integer()?;
    let owner = tlv.find(tags::OID).map(Tlv::as_oid).transpose()?;
    Ok(SecurityEnvironment {
        se: u8::try_from(se).map_err(|_| Error::MalformedEncoding("se out of range"))?,
        owner,
    })
}

/// Decode a PrKDF record, `None` for non-RSA keys
pub fn parse_private_key(tlv: &Tlv) -> Result<Option<PrivateKey>> {
    if tlv.tag() != tags::SEQUENCE {
        return Ok(None);
    }
    let Some(rsa) = tlv
        .find(tags::context(1))
        .and_then(Tlv::child)
        .filter(|a| a.tag() == tags::SEQUENCE)
    else {
        return Ok(None);
    };
    let (Some(path), Some(modulus_length)) = (
        rsa.find(tags::SEQUENCE),
        rsa.find(tags::INTEGER),
    ) else {
        return Ok(None);
    };

    let common = CommonObjectAttributes::decode(tlv.child())?;
    let key = tlv
        .child_at(1)
        .filter(|k| k.tag() == tags::SEQUENCE)
        .ok_or(Error::MalformedEncoding("private key without key attributes"))?;

    let id = key
        .find(tags::OCTET_STRING)
        .ok_or(Error::MalformedEncoding("private key without identifier"))?
        .value();
    let usage = key.find(tags::BIT_STRING);
    let key_reference = match key.find(tags::INTEGER) {
        Some(reference) => u8::try_from(reference.as_integer()?)
            .map_err(|_| Error::MalformedEncoding("key reference out of range"))?,
        None => 0,
    };

    Ok(Some(PrivateKey {
        id,
        label: common.label,
        auth_id: common.auth_id.unwrap_or(0),
        path: PathValue::try_from(path)?.path,
        modulus_length: to_usize(modulus_length.as_integer()?)?,
        key_reference,
        authentication: usage.is_some_and(|u| u.bit_is_set(KeyUsage::Authentication.pkcs15_bit())),
        non_repudiation: usage
            .is_some_and(|u| u.bit_is_set(KeyUsage::NonRepudiation.pkcs15_bit())),
    }))
}

/// Decode a PuKDF record, `None` for non-RSA keys
pub fn parse_public_key(tlv: &Tlv) -> Result<Option<PublicKey>> {
    if tlv.tag() != tags::SEQUENCE {
        return Ok(None);
    }
    let Some(path) = tlv
        .find(tags::context(1))
        .and_then(Tlv::child)
        .and_then(|a| a.find(tags::SEQUENCE))
    else {
        return Ok(None);
    };
    let id = tlv
        .child_at(1)
        .and_then(|k| k.find(tags::OCTET_STRING))
        .ok_or(Error::MalformedEncoding("public key without identifier"))?
        .value();
    Ok(Some(PublicKey {
        id,
        body: PathValue::try_from(path)?.location(),
    }))
}

/// Decode an AODF record, `None` for non-PIN authentication objects
pub fn parse_pin(tlv: &Tlv) -> Result<Option<PinAttributes>> {
    if tlv.tag() != tags::SEQUENCE {
        return Ok(None);
    }
    let Some(attributes) = tlv
        .find(tags::context(1))
        .and_then(Tlv::child)
        .filter(|a| a.tag() == tags::SEQUENCE)
    else {
        return Ok(None);
    };

    let common = CommonObjectAttributes::decode(tlv.child())?;
    let id = tlv
        .child_at(1)
        .and_then(|a| a.find(tags::OCTET_STRING))
        .ok_or(Error::MalformedEncoding("PIN without authentication identifier"))?
        .as_u32()?;

    let mut pin = PinAttributes {
        id,
        label: common.label,
        path: Path::default(),
        pin_reference: 0,
        min_length: 0,
        stored_length: 0,
        max_length: 0,
        pad_char: 0xFF,
        flags: 0,
    };
    let mut lengths = Vec::with_capacity(3);
    for field in attributes.children() {
        match field.tag() {
            tags::BIT_STRING => {
                let bits = field.bit_string_bytes()?;
                pin.flags = u16::from_be_bytes([
                    bits.first().copied().unwrap_or(0),
                    bits.get(1).copied().unwrap_or(0),
                ]);
            }
            tags::INTEGER => lengths.push(to_usize(field.as_integer()?)?),
            tags::OCTET_STRING => pin.pad_char = field.value().first().copied().unwrap_or(0xFF),
            tags::SEQUENCE => pin.path = PathValue::try_from(field)?.path,
            t if t == tags::implicit(0) => {
                pin.pin_reference = u8::try_from(field.as_integer()?)
                    .map_err(|_| Error::MalformedEncoding("PIN reference out of range"))?;
            }
            _ => {}
        }
    }
    pin.min_length = lengths.first().copied().unwrap_or(0);
    pin.stored_length = lengths.get(1).copied().unwrap_or(pin.min_length);
    pin.max_length = lengths.get(2).copied().unwrap_or(pin.stored_length);
    Ok(Some(pin))
}

/// Decode a CDF record
pub fn parse_certificate(
    tlv: &Tlv,
    header: Location,
    directory: CertificateDirectory,
) -> Result<Option<Certificate>> {
    if tlv.tag() != tags::SEQUENCE {
        return Ok(None);
    }
    let Some(path) = tlv
        .find(tags::context(1))
        .and_then(Tlv::child)
        .and_then(|a| a.find(tags::SEQUENCE))
    else {
        return Ok(None);
    };

    let common = CommonObjectAttributes::decode(tlv.child())?;
    let attributes = tlv
        .child_at(1)
        .filter(|a| a.tag() == tags::SEQUENCE)
        .ok_or(Error::MalformedEncoding("certificate without attributes"))?;
    let id = attributes
        .find(tags::OCTET_STRING)
        .ok_or(Error::MalformedEncoding("certificate without identifier"))?
        .value();
    let issuer_id = attributes
        .children()
        .filter(|c| c.tag() == tags::SEQUENCE)
        .find(|c| {
            c.find(tags::INTEGER)
                .and_then(|t| t.as_integer().ok())
                == Some(ISSUER_KEY_HASH)
        })
        .and_then(|c| c.find(tags::OCTET_STRING))
        .map(Tlv::value);

    Ok(Some(Certificate {
        id,
        label: common.label,
        issuer_id,
        body: PathValue::try_from(path)?.location(),
        header,
        directory,
        parsed: None,
    }))
}

/// CDF record for a certificate stored at `body`
pub fn certificate_record(
    label: &str,
    id: &[u8],
    issuer_id: Option<&[u8]>,
    authority: bool,
    body: &Location,
) -> Tlv {
    let mut attributes = vec![Tlv::octet_string(Bytes::copy_from_slice(id))];
    if authority {
        attributes.push(Tlv::boolean(true));
    }
    if let Some(issuer_id) = issuer_id {
        attributes.push(Tlv::sequence([
            Tlv::integer(ISSUER_KEY_HASH),
            Tlv::octet_string(Bytes::copy_from_slice(issuer_id)),
        ]));
    }

    Tlv::sequence([
        Tlv::sequence([Tlv::utf8_string(label)]),
        Tlv::sequence(attributes),
        Tlv::context(1, [Tlv::sequence([path_tlv(body)])]),
    ])
}

/// Decode an EF(UnusedSpace) record found at `record`
pub fn parse_free_block(tlv: &Tlv, record: Location) -> Result<FreeBlock> {
    let path = tlv
        .find(tags::SEQUENCE)
        .ok_or(Error::MalformedEncoding("unused space record without path"))?;
    let auth_id = tlv.find(tags::OCTET_STRING).map(Tlv::as_u32).transpose()?;
    Ok(FreeBlock {
        location: PathValue::try_from(path)?.location(),
        auth_id,
        record,
    })
}

/// EF(UnusedSpace) record describing a free range
pub fn free_block_record(location: &Location, auth_id: Option<u32>) -> Tlv {
    let mut fields = vec![path_tlv(location)];
    if let Some(auth_id) = auth_id {
        fields.push(Tlv::octet_string(auth_id_bytes(auth_id)));
    }
    Tlv::sequence(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlv(hex_str: &str) -> Tlv {
        Tlv::from_bytes(hex::decode(hex_str.replace(' ', "")).unwrap()).unwrap()
    }

    #[test]
    fn test_path_value() {
        let path = PathValue::try_from(&tlv("300B 0402 4402 020100 80020120")).unwrap();
        assert_eq!(path.path.to_string(), "4402");
        assert_eq!(path.index, Some(0));
        assert_eq!(path.length, Some(0x120));

        let location = path.location();
        assert_eq!(path_tlv(&location).der_data(), tlv("300B 0402 4402 020100 80020120").der_data());
    }

    #[test]
    fn test_odf() {
        let records = [
            tlv("A006 3004 0402 4401"),
            tlv("A806 3004 0402 4404"),
            tlv("A406 3004 0402 4402"),
            tlv("A606 3004 0402 4403"),
        ];
        let directory = parse_odf(&records).unwrap();
        assert_eq!(directory.private_keys, vec![Path::from(vec![0x4401])]);
        assert_eq!(directory.auth_objects, vec![Path::from(vec![0x4404])]);
        assert_eq!(directory.certificates, vec![Path::from(vec![0x4402])]);
        assert_eq!(directory.useful_certificates, vec![Path::from(vec![0x4403])]);
        assert!(directory.trusted_certificates.is_empty());
    }

    #[test]
    fn test_token_info() {
        let info = Tlv::sequence([
            Tlv::integer(0),
            Tlv::octet_string(vec![0x12, 0x34]),
            Tlv::utf8_string("Vendor"),
            Tlv::primitive(tags::implicit(0), Bytes::from_static(b"WIM")),
            Tlv::bit_string(0, &[0x00]),
            Tlv::sequence([Tlv::sequence([
                Tlv::integer(2),
                Tlv::oid("2.23.43.1.1.1").unwrap(),
            ])]),
        ]);
        let info = parse_token_info(&info).unwrap();
        assert_eq!(info.serial_hex(), "1234");
        assert_eq!(info.manufacturer.as_deref(), Some("Vendor"));
        assert_eq!(info.label.as_deref(), Some("WIM"));
        assert_eq!(info.security_environments[0].se, 2);
        assert_eq!(
            info.security_environments[0].owner.as_deref(),
            Some("2.23.43.1.1.1")
        );
    }

    fn rsa_key(bits: &[usize], reference: i64) -> Tlv {
        Tlv::sequence([
            Tlv::sequence([Tlv::utf8_string("Sign key"), Tlv::octet_string(vec![0x02])]),
            Tlv::sequence([
                Tlv::octet_string(vec![0xAB; 20]),
                Tlv::named_bits(bits),
                Tlv::integer(reference),
            ]),
            Tlv::context(1, [Tlv::sequence([
                path_tlv(&Location::new(Path::from(vec![0x3F00, 0x4B02]), 0, 0)),
                Tlv::integer(1024),
            ])]),
        ])
    }

    #[test]
    fn test_private_key() {
        let key = parse_private_key(&rsa_key(&[9], 2)).unwrap().unwrap();
        assert_eq!(key.label, "Sign key");
        assert_eq!(key.auth_id, 2);
        assert_eq!(key.modulus_length, 1024);
        assert_eq!(key.key_reference, 2);
        assert!(key.non_repudiation);
        assert!(!key.authentication);
        assert_eq!(key.path.to_string(), "3F00/4B02");

        let auth = parse_private_key(&rsa_key(&[2], 1)).unwrap().unwrap();
        assert!(auth.authentication);
    }

    #[test]
    fn test_non_rsa_key_is_skipped() {
        let ec = Tlv::context(0, [Tlv::sequence([Tlv::utf8_string("ec")])]);
        assert!(parse_private_key(&ec).unwrap().is_none());

        let no_type_attributes = Tlv::sequence([
            Tlv::sequence([Tlv::utf8_string("odd")]),
            Tlv::sequence([Tlv::octet_string(vec![1])]),
        ]);
        assert!(parse_private_key(&no_type_attributes).unwrap().is_none());
    }

    #[test]
    fn test_pin() {
        let pin = Tlv::sequence([
            Tlv::sequence([Tlv::utf8_string("PIN-G")]),
            Tlv::sequence([Tlv::octet_string(vec![0x01])]),
            Tlv::context(1, [Tlv::sequence([
                Tlv::bit_string(0, &[0x0C, 0x00]),
                Tlv::primitive(0x0A, vec![0x01]),
                Tlv::integer(4),
                Tlv::integer(8),
                Tlv::integer(8),
                implicit_integer(0, 0x81),
                Tlv::octet_string(vec![0xFF]),
                path_tlv(&Location::new(Path::from(vec![0x3F00]), 0, 0)),
            ])]),
        ]);
        let pin = parse_pin(&pin).unwrap().unwrap();
        assert_eq!(pin.id, 1);
        assert_eq!(pin.label, "PIN-G");
        assert_eq!(pin.pin_reference, 0x81);
        assert_eq!((pin.min_length, pin.stored_length, pin.max_length), (4, 8, 8));
        assert_eq!(pin.pad_char, 0xFF);
        assert_eq!(pin.flags, 0x0C00);
    }

    #[test]
    fn test_certificate_record() {
        let body = Location::new(Path::from(vec![0x4405]), 0x40, 0x2F0);
        let record = certificate_record("certificate # 1", &[0x11; 20], Some(&[0x22; 20]), true, &body);
        let header = Location::new(Path::from(vec![0x4403]), 0, record.encoded_len() as u16);

        let reparsed = Tlv::from_bytes(record.der_data()).unwrap();
        let certificate = parse_certificate(&reparsed, header.clone(), CertificateDirectory::Useful)
            .unwrap()
            .unwrap();
        assert_eq!(certificate.label, "certificate # 1");
        assert_eq!(certificate.id.as_ref(), &[0x11; 20]);
        assert_eq!(certificate.issuer_id.as_deref(), Some(&[0x22; 20][..]));
        assert_eq!(certificate.body, body);
        assert_eq!(certificate.header, header);
    }

    #[test]
    fn test_free_block_record() {
        let location = Location::new(Path::from(vec![0x4405]), 0x100, 0x80);
        let record = free_block_record(&location, Some(2));
        let at = Location::new(Path::from(vec![0x5033]), 0, record.encoded_len() as u16);
        let block = parse_free_block(&record, at.clone()).unwrap();
        assert_eq!(block.location, location);
        assert_eq!(block.auth_id, Some(2));
        assert_eq!(block.record, at);
        assert!(!block.is_empty());

        assert_eq!(auth_id_bytes(0).as_ref(), &[0x00]);
        assert_eq!(auth_id_bytes(0x0102).as_ref(), &[0x01, 0x02]);
    }
}
