//! Common test utilities: a simulated WIM card, a scripted user and fixtures
#![allow(dead_code, unreachable_pub)]

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use sha1::{Digest, Sha1};
use time::macros::datetime;
use wim_apdu_core::{CardTransport, Command, TransportError};
use wim_pkcs15::constants::{GENERIC_RSA_SE_OWNER, WIM_AID, cla, ins, odf, oid};
use wim_pkcs15::directory::DirectoryParser;
use wim_pkcs15::pkcs15::{certificate_record, free_block_record, path_tlv};
use wim_pkcs15::tlv::{Tlv, tags};
use wim_pkcs15::{Confirmation, Location, NewPin, Path, PinAttributes, UserInterface, dn};
use zeroize::Zeroizing;

pub const ODF: u16 = 0x5031;
pub const TOKEN_INFO: u16 = 0x5032;
pub const UNUSED_SPACE: u16 = 0x5033;
pub const PRKDF: u16 = 0x4401;
pub const CDF: u16 = 0x4402;
pub const USEFUL_CDF: u16 = 0x4403;
pub const AODF: u16 = 0x4404;
pub const PUKDF: u16 = 0x4405;
pub const TRUSTED_CDF: u16 = 0x4406;
pub const PUBLIC_KEYS: u16 = 0x4407;
/// Certificate bodies managed through EF(UnusedSpace)
pub const CERTIFICATES: u16 = 0x4410;
/// Certificate bodies present when the card was personalized
pub const PRELOADED: u16 = 0x4411;

pub const DIRECTORY_SIZE: usize = 512;
pub const UNUSED_SPACE_SIZE: usize = 128;
pub const CERTIFICATES_SIZE: u16 = 2048;

pub const SERIAL: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
pub const SIGNATURE: [u8; 16] = [0x5A; 16];
pub const GOOD_PIN: &str = "1234";
pub const NEW_KEY_REFERENCE: u8 = 0x03;

pub const AUTH_MODULUS: [u8; 128] = [0xA1; 128];
pub const SIGN_MODULUS: [u8; 128] = [0xB2; 128];
pub const CA_MODULUS: [u8; 128] = [0xC3; 128];
pub const ROOT_MODULUS: [u8; 128] = [0xD4; 128];
pub const FOREIGN_MODULUS: [u8; 128] = [0xEE; 128];

pub const HOLDER: &str = "CN=Holder,O=Org";
pub const ISSUING_CA: &str = "CN=Issuing CA,O=Org";
pub const ROOT_CA: &str = "CN=Root CA,O=Org";

/// Install a test subscriber; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Absolute path of a file in the WIM application DF
pub fn app_path(fid: u16) -> Vec<u16> {
    vec![0x3F00, 0x5015, fid]
}

pub fn relative(fid: u16) -> Path {
    Path::from(vec![fid])
}

pub fn key_id(modulus: &[u8]) -> Bytes {
    Bytes::copy_from_slice(&Sha1::digest(modulus))
}

/// What the card answers to GENERATE KEY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGeneration {
    Supported,
    NoSpace,
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct SimulatedPin {
    pub reference: u8,
    pub value: Vec<u8>,
    pub retries: u8,
    pub verified: bool,
    pub disabled: bool,
}

/// One UPDATE BINARY that reached the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardWrite {
    pub path: Vec<u16>,
    pub offset: usize,
    pub data: Vec<u8>,
}

/// In-memory WIM card answering the commands the crate sends
#[derive(Debug, Clone)]
pub struct SimulatedCard {
    pub files: BTreeMap<Vec<u16>, Vec<u8>>,
    pub pins: Vec<SimulatedPin>,
    pub key_generation: KeyGeneration,
    pub commands: Vec<Command>,
    pub writes: Vec<CardWrite>,
    pub signed: Vec<Vec<u8>>,
    selected: Option<Vec<u16>>,
    /// Next free byte of [`PRELOADED`]
    preload_cursor: usize,
}

impl SimulatedCard {
    /// Card with every PKCS#15 file present and empty directories
    pub fn blank() -> Self {
        let mut card = Self {
            files: BTreeMap::new(),
            pins: Vec::new(),
            key_generation: KeyGeneration::Supported,
            commands: Vec::new(),
            writes: Vec::new(),
            signed: Vec::new(),
            selected: None,
            preload_cursor: 0,
        };
        for fid in [ODF, PRKDF, CDF, USEFUL_CDF, AODF, PUKDF, TRUSTED_CDF] {
            card.files.insert(app_path(fid), vec![0xFF; DIRECTORY_SIZE]);
        }
        card.files
            .insert(app_path(UNUSED_SPACE), vec![0xFF; UNUSED_SPACE_SIZE]);
        card.files.insert(app_path(PUBLIC_KEYS), vec![0xFF; 512]);
        card.files
            .insert(app_path(CERTIFICATES), vec![0xFF; CERTIFICATES_SIZE as usize]);
        card.files.insert(app_path(PRELOADED), vec![0xFF; 2048]);

        for (tag, fid) in [
            (odf::PRIVATE_KEYS, PRKDF),
            (odf::PUBLIC_KEYS, PUKDF),
            (odf::CERTIFICATES, CDF),
            (odf::TRUSTED_CERTIFICATES, TRUSTED_CDF),
            (odf::USEFUL_CERTIFICATES, USEFUL_CDF),
            (odf::AUTH_OBJECTS, AODF),
        ] {
            let entry = Tlv::constructed(
                tag,
                [Tlv::sequence([Tlv::octet_string(relative(fid).to_bytes())])],
            );
            card.append_record(ODF, &entry);
        }
        card.files.insert(app_path(TOKEN_INFO), token_info().der_data().to_vec());
        card
    }

    /// Card with a PIN-G protected authentication key, a PIN-NR protected
    /// signing key and free room for certificates
    pub fn personalized() -> Self {
        let mut card = Self::blank();
        card.add_pin(1, "PIN-G", 0x01);
        card.add_pin(2, "PIN-NR", 0x02);
        card.add_key("Authentication key", &AUTH_MODULUS, 0x01, 1, false);
        card.add_key("Signing key", &SIGN_MODULUS, 0x02, 2, true);
        card.add_free_block(Location::new(relative(CERTIFICATES), 0, CERTIFICATES_SIZE), 1);
        card
    }

    pub fn file(&self, fid: u16) -> &[u8] {
        self.files.get(&app_path(fid)).map_or(&[][..], Vec::as_slice)
    }

    /// Write `record` into the first free gap of directory file `fid`
    pub fn append_record(&mut self, fid: u16, record: &Tlv) -> Location {
        let der = record.der_data();
        let file = self.files.entry(app_path(fid)).or_default();
        let mut parser = DirectoryParser::new(false, false, true);
        parser
            .parse_bytes(&relative(fid), &Bytes::copy_from_slice(&file[..]))
            .unwrap();
        let gap = parser
            .free()
            .iter()
            .find(|gap| gap.length as usize >= der.len())
            .expect("directory file full");
        let offset = gap.offset as usize;
        file[offset..offset + der.len()].copy_from_slice(&der);
        Location::new(relative(fid), offset as u16, der.len() as u16)
    }

    pub fn add_pin(&mut self, id: u8, label: &str, reference: u8) {
        let record = Tlv::sequence([
            Tlv::sequence([Tlv::utf8_string(label)]),
            Tlv::sequence([Tlv::octet_string(vec![id])]),
            Tlv::context(1, [Tlv::sequence([
                Tlv::bit_string(0, &[0x0C, 0x00]),
                Tlv::primitive(0x0A, vec![0x01]),
                Tlv::integer(4),
                Tlv::integer(8),
                Tlv::integer(8),
                Tlv::primitive(tags::implicit(0), vec![reference]),
                Tlv::octet_string(vec![0xFF]),
                path_tlv(&Location::new(Path::from(vec![0x3F00]), 0, 0)),
            ])]),
        ]);
        self.append_record(AODF, &record);
        let mut value = GOOD_PIN.as_bytes().to_vec();
        value.resize(8, 0xFF);
        self.pins.push(SimulatedPin {
            reference,
            value,
            retries: 3,
            verified: false,
            disabled: false,
        });
    }

    pub fn pin_mut(&mut self, reference: u8) -> &mut SimulatedPin {
        self.pins
            .iter_mut()
            .find(|pin| pin.reference == reference)
            .unwrap()
    }

    /// RSA key in the PrKDF plus its public key object in the PuKDF
    pub fn add_key(
        &mut self,
        label: &str,
        modulus: &[u8],
        reference: u8,
        auth_id: u8,
        non_repudiation: bool,
    ) {
        let usage = if non_repudiation { 9 } else { 2 };
        let id = key_id(modulus);
        let record = Tlv::sequence([
            Tlv::sequence([Tlv::utf8_string(label), Tlv::octet_string(vec![auth_id])]),
            Tlv::sequence([
                Tlv::octet_string(id.clone()),
                Tlv::named_bits(&[usage]),
                Tlv::integer(reference as i64),
            ]),
            Tlv::context(1, [Tlv::sequence([
                path_tlv(&Location::new(Path::from(vec![0x3F00, 0x5015, 0x4B01]), 0, 0)),
                Tlv::integer(1024),
            ])]),
        ]);
        self.append_record(PRKDF, &record);

        let body = rsa_public_key(modulus);
        let location = self.append_record(PUBLIC_KEYS, &body);
        let public = Tlv::sequence([
            Tlv::sequence([Tlv::utf8_string(label)]),
            Tlv::sequence([Tlv::octet_string(id)]),
            Tlv::context(1, [Tlv::sequence([path_tlv(&location)])]),
        ]);
        self.append_record(PUKDF, &public);
    }

    pub fn add_free_block(&mut self, location: Location, auth_id: u32) {
        self.append_record(UNUSED_SPACE, &free_block_record(&location, Some(auth_id)));
    }

    /// Store `certificate` outside the managed space and list it in `cdf`
    pub fn preload_certificate(
        &mut self,
        cdf: u16,
        label: &str,
        certificate: &Tlv,
        issuer: Option<&Tlv>,
    ) {
        let der = certificate.der_data();
        let offset = self.preload_cursor;
        let file = self.files.entry(app_path(PRELOADED)).or_default();
        file[offset..offset + der.len()].copy_from_slice(&der);
        self.preload_cursor += der.len();

        let body = Location::new(relative(PRELOADED), offset as u16, der.len() as u16);
        let issuer_id = issuer.map(public_key_hash);
        let record = certificate_record(
            label,
            &public_key_hash(certificate),
            issuer_id.as_deref(),
            cdf != CDF,
            &body,
        );
        self.append_record(cdf, &record);
    }

    /// UPDATE BINARY calls aimed at `fid`
    pub fn writes_to(&self, fid: u16) -> Vec<&CardWrite> {
        self.writes.iter().filter(|w| w.path == app_path(fid)).collect()
    }

    pub fn sent(&self, ins: u8) -> Vec<&Command> {
        self.commands.iter().filter(|c| c.ins == ins).collect()
    }

    fn handle(&mut self, command: &Command) -> Vec<u8> {
        match (command.cla, command.ins) {
            (cla::ISO, ins::SELECT) => self.select(command),
            (cla::ISO, ins::READ_BINARY) => self.read_binary(command),
            (cla::ISO, ins::UPDATE_BINARY) => self.update_binary(command),
            (cla::ISO, ins::VERIFY) => self.verify(command),
            (cla::ISO, ins::MSE) => vec![0x90, 0x00],
            (cla::ISO, ins::PSO) => {
                self.signed.push(command.payload().to_vec());
                let mut response = vec![0x00];
                response.extend_from_slice(&SIGNATURE);
                response.extend_from_slice(&[0x90, 0x00]);
                response
            }
            (cla::PROPRIETARY, ins::GENERATE_KEY) => self.generate_key(command),
            _ => vec![0x6D, 0x00],
        }
    }

    fn select(&mut self, command: &Command) -> Vec<u8> {
        self.selected = None;
        match command.p1 {
            0x04 if command.payload() == WIM_AID => vec![0x90, 0x00],
            0x08 => {
                let mut path = vec![0x3F00];
                path.extend(
                    command
                        .payload()
                        .chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]])),
                );
                let Some(size) = self.files.get(&path).map(Vec::len) else {
                    return vec![0x6A, 0x82];
                };
                self.selected = Some(path);
                let [hi, lo] = (size as u16).to_be_bytes();
                vec![0x62, 0x04, 0x80, 0x02, hi, lo, 0x90, 0x00]
            }
            _ => vec![0x6A, 0x82],
        }
    }

    fn read_binary(&mut self, command: &Command) -> Vec<u8> {
        let Some(file) = self.selected.as_ref().and_then(|p| self.files.get(p)) else {
            return vec![0x69, 0x86];
        };
        let offset = command.p1p2() as usize;
        if offset >= file.len() {
            return vec![0x6B, 0x00];
        }
        let end = (offset + command.le.unwrap_or(256)).min(file.len());
        let mut response = file[offset..end].to_vec();
        response.extend_from_slice(&[0x90, 0x00]);
        response
    }

    fn update_binary(&mut self, command: &Command) -> Vec<u8> {
        if !self.pins.iter().any(|p| p.verified || p.disabled) {
            return vec![0x69, 0x82];
        }
        let Some(path) = self.selected.clone() else {
            return vec![0x69, 0x86];
        };
        let offset = command.p1p2() as usize;
        let data = command.payload().to_vec();
        let Some(file) = self.files.get_mut(&path) else {
            return vec![0x6A, 0x82];
        };
        if offset + data.len() > file.len() {
            return vec![0x67, 0x00];
        }
        file[offset..offset + data.len()].copy_from_slice(&data);
        self.writes.push(CardWrite { path, offset, data });
        vec![0x90, 0x00]
    }

    fn verify(&mut self, command: &Command) -> Vec<u8> {
        let Some(pin) = self.pins.iter_mut().find(|p| p.reference == command.p2) else {
            return vec![0x6A, 0x88];
        };
        if pin.retries == 0 {
            return vec![0x69, 0x83];
        }
        if command.payload().is_empty() {
            return if pin.verified || pin.disabled {
                vec![0x90, 0x00]
            } else {
                vec![0x63, 0xC0 | pin.retries]
            };
        }
        if command.payload() == pin.value.as_slice() {
            pin.verified = true;
            pin.retries = 3;
            return vec![0x90, 0x00];
        }
        pin.verified = false;
        pin.retries -= 1;
        if pin.retries == 0 {
            vec![0x69, 0x83]
        } else {
            vec![0x63, 0xC0 | pin.retries]
        }
    }

    fn generate_key(&mut self, command: &Command) -> Vec<u8> {
        match (self.key_generation, command.p1) {
            (KeyGeneration::NoSpace, _) => vec![0x90, 0x01],
            (KeyGeneration::Unsupported, _) => vec![0x6D, 0x00],
            (KeyGeneration::Supported, 0x00) => vec![0x12, 0x34, 0x43, 0x21, 0x90, 0x00],
            (KeyGeneration::Supported, _) => vec![NEW_KEY_REFERENCE, 0x90, 0x00],
        }
    }
}

impl CardTransport for SimulatedCard {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let command =
            Command::from_bytes(command).map_err(|e| TransportError::other(e.to_string()))?;
        let response = self.handle(&command);
        self.commands.push(command);
        Ok(Bytes::from(response))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.selected = None;
        for pin in &mut self.pins {
            pin.verified = false;
        }
        Ok(())
    }
}

/// User whose answers are queued up front
///
/// Once a queue runs dry, messages are confirmed, the first item is chosen and
/// PIN prompts are cancelled.
#[derive(Debug, Default)]
pub struct ScriptedUi {
    pub confirmations: VecDeque<Confirmation>,
    pub choices: VecDeque<Option<usize>>,
    pub pins: VecDeque<Option<&'static str>>,
    pub new_pin: Option<NewPin>,
    /// `(title, text)` of every message shown
    pub messages: Vec<(String, String)>,
    /// Labels of the PINs asked for
    pub pin_prompts: Vec<String>,
    /// Options offered by each `choose_item`
    pub offered: Vec<Vec<String>>,
}

impl ScriptedUi {
    /// User who confirms everything and knows the PIN
    pub fn cooperative() -> Self {
        Self {
            pins: VecDeque::from([Some(GOOD_PIN); 4]),
            ..Self::default()
        }
    }

    pub fn with_pins(pins: &[Option<&'static str>]) -> Self {
        Self {
            pins: pins.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn declining() -> Self {
        Self {
            confirmations: VecDeque::from([Confirmation::Cancelled]),
            ..Self::cooperative()
        }
    }
}

impl UserInterface for ScriptedUi {
    fn show_message(&mut self, title: &str, text: &str, allow_cancel: bool) -> Confirmation {
        self.messages.push((title.to_string(), text.to_string()));
        if !allow_cancel {
            return Confirmation::Confirmed;
        }
        self.confirmations
            .pop_front()
            .unwrap_or(Confirmation::Confirmed)
    }

    fn choose_item(&mut self, _title: &str, _label: &str, options: &[&str]) -> Option<usize> {
        self.offered
            .push(options.iter().map(ToString::to_string).collect());
        self.choices.pop_front().unwrap_or(Some(0))
    }

    fn enter_new_pin(&mut self) -> Option<NewPin> {
        self.new_pin.clone()
    }

    fn enter_pin(&mut self, pin: &PinAttributes) -> Option<Zeroizing<Vec<u8>>> {
        self.pin_prompts.push(pin.label.clone());
        self.pins
            .pop_front()
            .flatten()
            .map(|value| Zeroizing::new(value.as_bytes().to_vec()))
    }
}

pub fn token_info() -> Tlv {
    Tlv::sequence([
        Tlv::integer(0),
        Tlv::octet_string(SERIAL.to_vec()),
        Tlv::utf8_string("Vendor"),
        Tlv::primitive(tags::implicit(0), Bytes::from_static(b"WIM")),
        Tlv::bit_string(0, &[0x00]),
        Tlv::sequence([Tlv::sequence([
            Tlv::integer(2),
            Tlv::oid(GENERIC_RSA_SE_OWNER).unwrap(),
        ])]),
    ])
}

pub fn rsa_public_key(modulus: &[u8]) -> Tlv {
    Tlv::sequence([Tlv::unsigned_integer(modulus), Tlv::integer(65537)])
}

fn name(rfc2253: &str) -> Tlv {
    Tlv::from_bytes(dn::to_der(rfc2253).unwrap()).unwrap()
}

/// RSA certificate valid from 2020 to 2060
pub fn certificate(subject: &str, issuer: &str, serial: i64, modulus: &[u8]) -> Tlv {
    let algorithm = || Tlv::sequence([Tlv::oid(oid::SHA1_WITH_RSA).unwrap(), Tlv::null()]);
    let tbs = Tlv::sequence([
        Tlv::context(0, [Tlv::integer(2)]),
        Tlv::integer(serial),
        algorithm(),
        name(issuer),
        Tlv::sequence([
            Tlv::utc_time(datetime!(2020-01-01 0:00 UTC)).unwrap(),
            Tlv::generalized_time(datetime!(2060-01-01 0:00 UTC)),
        ]),
        name(subject),
        Tlv::sequence([
            Tlv::sequence([Tlv::oid(oid::RSA_ENCRYPTION).unwrap(), Tlv::null()]),
            Tlv::bit_string(0, &rsa_public_key(modulus).der_data()),
        ]),
    ]);
    let certificate = Tlv::sequence([tbs, algorithm(), Tlv::bit_string(0, &[0x3C; 16])]);
    Tlv::from_bytes(certificate.der_data()).unwrap()
}

/// Holder certificate for the authentication key
pub fn holder_certificate() -> Tlv {
    certificate(HOLDER, ISSUING_CA, 0x1001, &AUTH_MODULUS)
}

pub fn issuing_ca_certificate() -> Tlv {
    certificate(ISSUING_CA, ROOT_CA, 0x11, &CA_MODULUS)
}

pub fn root_certificate() -> Tlv {
    certificate(ROOT_CA, ROOT_CA, 0x01, &ROOT_MODULUS)
}

fn public_key_hash(certificate: &Tlv) -> Bytes {
    wim_pkcs15::X509::new(certificate)
        .unwrap()
        .public_key_hash()
        .unwrap()
}
