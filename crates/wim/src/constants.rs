/// AID of the WAP-WIM application
pub const WIM_AID: &[u8] = b"\xA0\x00\x00\x00\x63WAP-WIM";

/// Default location of the PKCS#15 application DF
pub const WIM_APPLICATION_PATH: &[u16] = &[0x3F00, 0x5015];

pub const ODF_FID: u16 = 0x5031;
pub const TOKEN_INFO_FID: u16 = 0x5032;
pub const UNUSED_SPACE_FID: u16 = 0x5033;

/// Master file identifier
pub const MF_FID: u16 = 0x3F00;

/// Card I/O buffer size
pub const MAX_CHUNK: usize = 240;

pub const DEFAULT_SE_ID: u8 = 0x01;

/// `wap-wsg-idm-wim-se-genericRSA`
pub const GENERIC_RSA_SE_OWNER: &str = "2.23.43.1.1.1";

/// Label of a PIN created during non-repudiation key generation is padded to this
pub const NEW_PIN_LABEL_LENGTH: usize = 32;
/// PIN value sent during key generation is padded to this
pub const NEW_PIN_LENGTH: usize = 8;

pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const READ_BINARY: u8 = 0xB0;
    pub const UPDATE_BINARY: u8 = 0xD6;
    pub const VERIFY: u8 = 0x20;
    pub const MSE: u8 = 0x22;
    pub const PSO: u8 = 0x2A;
    /// Proprietary WIM key pair generation
    pub const GENERATE_KEY: u8 = 0x46;
}

pub mod cla {
    pub const ISO: u8 = 0x00;
    pub const PROPRIETARY: u8 = 0x80;
}

/// ODF choice tags
pub mod odf {
    pub const PRIVATE_KEYS: u32 = 0xA0;
    pub const PUBLIC_KEYS: u32 = 0xA1;
    pub const CERTIFICATES: u32 = 0xA4;
    pub const TRUSTED_CERTIFICATES: u32 = 0xA5;
    pub const USEFUL_CERTIFICATES: u32 = 0xA6;
    pub const AUTH_OBJECTS: u32 = 0xA8;
}

/// Dotted object identifiers
pub mod oid {
    pub const RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
    pub const SHA1_WITH_RSA: &str = "1.2.840.113549.1.1.5";
    pub const EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
    pub const SHA1: &str = "1.3.14.3.2.26";
    pub const DATA: &str = "1.2.840.113549.1.7.1";
    pub const SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
    pub const CONTENT_TYPE: &str = "1.2.840.113549.1.9.3";
    pub const MESSAGE_DIGEST: &str = "1.2.840.113549.1.9.4";
    pub const SIGNING_TIME: &str = "1.2.840.113549.1.9.5";
    pub const EXTENSION_REQUEST: &str = "1.2.840.113549.1.9.14";
    pub const KEY_USAGE: &str = "2.5.29.15";
}

/// DER encoding of `DigestInfo { sha1, NULL }` up to the digest octets
pub const SHA1_DIGEST_INFO_PREFIX: &[u8] = &[
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2B, 0x0E, 0x03, 0x02, 0x1A, 0x05, 0x00, 0x04, 0x14,
];

/// Acknowledgement returned by the key generation capability probe
pub const KEYGEN_PROBE_ACK: [u8; 4] = [0x12, 0x34, 0x43, 0x21];
