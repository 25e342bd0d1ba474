//! Snapshots of the PKCS#15 objects found on a card

use std::fmt;

use bytes::Bytes;
use derive_more::{Deref, From};

use crate::constants::MF_FID;
use crate::tlv::Tlv;
use crate::{Error, Result};

/// File identifiers leading from a DF to a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deref, From)]
pub struct Path(Vec<u16>);

impl Path {
    /// Decode the big-endian identifier pairs of a PKCS#15 `Path.path`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(Error::MalformedEncoding("path has odd length"));
        }
        Ok(Self(
            bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect(),
        ))
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.iter().flat_map(|fid| fid.to_be_bytes()).collect()
    }

    /// Path starting at the master file
    pub fn is_absolute(&self) -> bool {
        self.0.first() == Some(&MF_FID)
    }

    /// This path with `fid` appended
    pub fn join(&self, fid: u16) -> Self {
        let mut fids = self.0.clone();
        fids.push(fid);
        Self(fids)
    }

    /// Absolute form of this path, relative paths being rooted at `base`
    pub fn resolve(&self, base: &Path) -> Self {
        if self.is_absolute() {
            self.clone()
        } else {
            let mut fids = base.0.clone();
            fids.extend_from_slice(&self.0);
            Self(fids)
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, fid) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{fid:04X}")?;
        }
        Ok(())
    }
}

/// Byte range within an elementary file
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location {
    pub path: Path,
    pub offset: u16,
    pub length: u16,
}

impl Location {
    pub const fn new(path: Path, offset: u16, length: u16) -> Self {
        Self {
            path,
            offset,
            length,
        }
    }

    /// Offset just past the range
    pub const fn end(&self) -> usize {
        self.offset as usize + self.length as usize
    }

    /// Same file and `other` starts where this range ends
    pub fn precedes(&self, other: &Location) -> bool {
        self.path == other.path && self.end() == other.offset as usize
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}+{}]", self.path, self.offset, self.length)
    }
}

/// What a key may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsage {
    /// Client authentication signatures
    Authentication,
    /// Legally binding signatures
    NonRepudiation,
}

impl KeyUsage {
    /// Bit in PKCS#15 `KeyUsageFlags`
    pub const fn pkcs15_bit(self) -> usize {
        match self {
            Self::Authentication => 2,
            Self::NonRepudiation => 9,
        }
    }

    /// Bit in the X.509 `keyUsage` extension
    pub const fn x509_bit(self) -> usize {
        match self {
            Self::Authentication => 0,
            Self::NonRepudiation => 1,
        }
    }

    /// Usage byte of the key generation command
    pub const fn keygen_flag(self) -> u8 {
        match self {
            Self::Authentication => 0x00,
            Self::NonRepudiation => 0x01,
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "digital signature"),
            Self::NonRepudiation => write!(f, "non-repudiation"),
        }
    }
}

/// Private RSA key listed in a PrKDF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pub id: Bytes,
    pub label: String,
    /// Links the key to the PIN protecting it
    pub auth_id: u32,
    pub path: Path,
    pub modulus_length: usize,
    pub key_reference: u8,
    pub authentication: bool,
    pub non_repudiation: bool,
}

impl PrivateKey {
    pub const fn has_usage(&self, usage: KeyUsage) -> bool {
        match usage {
            KeyUsage::Authentication => self.authentication,
            KeyUsage::NonRepudiation => self.non_repudiation,
        }
    }
}

/// Public key object listed in a PuKDF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub id: Bytes,
    pub body: Location,
}

/// PIN object listed in an AODF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinAttributes {
    pub id: u32,
    pub label: String,
    pub path: Path,
    pub pin_reference: u8,
    pub min_length: usize,
    pub stored_length: usize,
    pub max_length: usize,
    pub pad_char: u8,
    pub flags: u16,
}

/// Directory file a certificate is listed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateDirectory {
    /// CDF, certificates belonging to the card holder
    User,
    /// Trusted CDF
    Trusted,
    /// Useful CDF, intermediate certificates
    Useful,
}

/// Certificate listed in a CDF
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Hash of the subject public key
    pub id: Bytes,
    pub label: String,
    /// Hash of the issuer public key, when the entry records one
    pub issuer_id: Option<Bytes>,
    /// X.509 bytes
    pub body: Location,
    /// CDF record
    pub header: Location,
    pub directory: CertificateDirectory,
    /// Decoded X.509 structure, present when values were loaded
    pub parsed: Option<Tlv>,
}

/// Free range recorded in EF(UnusedSpace)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeBlock {
    /// The free range
    pub location: Location,
    /// PIN that must be verified before the range may be consumed
    pub auth_id: Option<u32>,
    /// The EF(UnusedSpace) record describing the range
    pub record: Location,
}

impl FreeBlock {
    /// Record left behind by a fully consumed block
    pub const fn is_empty(&self) -> bool {
        self.location.length == 0
    }
}

/// Directory files listed in EF(ODF)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectDirectory {
    pub private_keys: Vec<Path>,
    pub public_keys: Vec<Path>,
    pub certificates: Vec<Path>,
    pub trusted_certificates: Vec<Path>,
    pub useful_certificates: Vec<Path>,
    pub auth_objects: Vec<Path>,
}

/// Contents of EF(TokenInfo)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenInfo {
    pub version: i64,
    pub serial_number: Bytes,
    pub manufacturer: Option<String>,
    pub label: Option<String>,
    pub flags: Bytes,
    pub security_environments: Vec<SecurityEnvironment>,
}

impl TokenInfo {
    /// Serial number as printed in default certificate subjects
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(&self.serial_number)
    }
}

/// `SecurityEnvironmentInfo` entry of TokenInfo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityEnvironment {
    pub se: u8,
    pub owner: Option<String>,
}
