//! An open session with the WIM application of one card

use std::collections::HashSet;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use wim_apdu_core::CardTransport;

use crate::config::WimConfig;
use crate::connection::Connection;
use crate::directory::DirectoryParser;
use crate::fs::FileSystem;
use crate::pin::{self, PinOutcome, PinStatus};
use crate::pkcs15::{
    parse_certificate, parse_odf, parse_pin, parse_private_key, parse_public_key,
    parse_token_info,
};
use crate::signer;
use crate::tlv::Tlv;
use crate::types::{
    Certificate, CertificateDirectory, Location, ObjectDirectory, Path, PinAttributes, PrivateKey,
    PublicKey, TokenInfo,
};
use crate::ui::UserInterface;
use crate::{Error, Result};

/// Card file system plus the PKCS#15 structures read when the session opened
///
/// Key, certificate and PIN lists are snapshots: every `load_*` call reads the
/// directory files again and nothing is cached between calls, apart from the
/// PINs found blocked during this session.
#[derive(Debug)]
pub struct CardSession<T: CardTransport> {
    fs: FileSystem<T>,
    config: WimConfig,
    directory: ObjectDirectory,
    token_info: TokenInfo,
    se_id: u8,
    pins: Vec<PinAttributes>,
    blocked: HashSet<u32>,
}

impl<T: CardTransport> CardSession<T> {
    /// Select the WIM application and read EF(ODF), EF(TokenInfo) and the PINs
    #[instrument(level = "debug", skip_all)]
    pub fn open(transport: T, config: WimConfig) -> Result<Self> {
        let mut fs = FileSystem::new(
            Connection::new(transport),
            config.application_path(),
            config.max_chunk,
        );
        fs.select_application(config.application_aid)?;

        let mut parser = DirectoryParser::new(true, false, false);
        parser.parse_directory_file(&mut fs, &config.odf_path())?;
        let directory = parse_odf(parser.objects())?;

        let token_info = parse_token_info(&Tlv::from_bytes(
            fs.read_path(&config.token_info_path())?,
        )?)?;
        let se_id = token_info
            .security_environments
            .iter()
            .find(|se| se.owner.as_deref() == Some(config.generic_rsa_se_owner))
            .map_or(config.default_se_id, |se| se.se);
        info!(
            serial = %token_info.serial_hex(),
            label = ?token_info.label,
            se_id,
            "WIM application opened"
        );

        let mut session = Self {
            fs,
            config,
            directory,
            token_info,
            se_id,
            pins: Vec::new(),
            blocked: HashSet::new(),
        };
        session.load_pins()?;
        Ok(session)
    }

    pub const fn config(&self) -> &WimConfig {
        &self.config
    }

    pub const fn directory(&self) -> &ObjectDirectory {
        &self.directory
    }

    pub const fn token_info(&self) -> &TokenInfo {
        &self.token_info
    }

    /// Security environment restored before each signature
    pub const fn se_id(&self) -> u8 {
        self.se_id
    }

    pub const fn fs(&self) -> &FileSystem<T> {
        &self.fs
    }

    pub const fn fs_mut(&mut self) -> &mut FileSystem<T> {
        &mut self.fs
    }

    pub const fn connection_mut(&mut self) -> &mut Connection<T> {
        self.fs.connection_mut()
    }

    pub fn into_transport(self) -> T {
        self.fs.into_connection().into_transport()
    }

    /// PINs as of the last [`CardSession::load_pins`]
    pub fn pins(&self) -> &[PinAttributes] {
        &self.pins
    }

    pub fn pin(&self, id: u32) -> Option<&PinAttributes> {
        self.pins.iter().find(|pin| pin.id == id)
    }

    /// PIN authorizing changes to the object directories
    pub fn primary_pin(&self) -> Result<&PinAttributes> {
        self.pins.first().ok_or(Error::NoPinsFound)
    }

    pub(crate) fn unused_space_path(&self) -> Path {
        self.config.unused_space_path()
    }

    fn read_directories(&mut self, paths: &[Path]) -> Result<Vec<(Tlv, Location)>> {
        let mut parser = DirectoryParser::default();
        let mut records = Vec::new();
        for path in paths {
            parser.reset(true, true, false);
            parser.parse_directory_file(&mut self.fs, path)?;
            records.extend(parser.take_objects().into_iter().zip(parser.take_locations()));
        }
        Ok(records)
    }

    /// RSA private keys of all PrKDFs
    pub fn load_private_keys(&mut self) -> Result<Vec<PrivateKey>> {
        let paths = self.directory.private_keys.clone();
        let mut keys = Vec::new();
        for (record, _) in self.read_directories(&paths)? {
            match parse_private_key(&record)? {
                Some(key) => keys.push(key),
                None => debug!("Skipping non-RSA private key"),
            }
        }
        debug!(count = keys.len(), "Private keys loaded");
        Ok(keys)
    }

    /// RSA public keys of all PuKDFs
    pub fn load_public_keys(&mut self) -> Result<Vec<PublicKey>> {
        let paths = self.directory.public_keys.clone();
        let mut keys = Vec::new();
        for (record, _) in self.read_directories(&paths)? {
            if let Some(key) = parse_public_key(&record)? {
                keys.push(key);
            }
        }
        debug!(count = keys.len(), "Public keys loaded");
        Ok(keys)
    }

    /// Reread the PINs of all AODFs, failing when there are none
    pub fn load_pins(&mut self) -> Result<&[PinAttributes]> {
        let paths = self.directory.auth_objects.clone();
        let mut pins = Vec::new();
        for (record, _) in self.read_directories(&paths)? {
            if let Some(pin) = parse_pin(&record)? {
                pins.push(pin);
            }
        }
        if pins.is_empty() {
            warn!("No PINs on the card");
            return Err(Error::NoPinsFound);
        }
        debug!(count = pins.len(), "PINs loaded");
        self.pins = pins;
        Ok(&self.pins)
    }

    /// Certificates of the user and useful CDFs, optionally the trusted CDFs
    ///
    /// With `load_values` each certificate body is read and decoded as well.
    pub fn load_certificates(
        &mut self,
        load_values: bool,
        load_trusted: bool,
    ) -> Result<Vec<Certificate>> {
        let mut sources = vec![
            (CertificateDirectory::User, self.directory.certificates.clone()),
            (
                CertificateDirectory::Useful,
                self.directory.useful_certificates.clone(),
            ),
        ];
        if load_trusted {
            sources.push((
                CertificateDirectory::Trusted,
                self.directory.trusted_certificates.clone(),
            ));
        }

        let mut certificates = Vec::new();
        for (kind, paths) in sources {
            for (record, header) in self.read_directories(&paths)? {
                if let Some(certificate) = parse_certificate(&record, header, kind)? {
                    certificates.push(certificate);
                }
            }
        }

        if load_values {
            for certificate in &mut certificates {
                let body = self.read_location(&certificate.body)?;
                certificate.parsed = Some(Tlv::from_bytes(body)?);
            }
        }
        debug!(count = certificates.len(), load_values, load_trusted, "Certificates loaded");
        Ok(certificates)
    }

    /// Bytes of `location`; a zero length means the whole file
    pub fn read_location(&mut self, location: &Location) -> Result<Bytes> {
        if location.length == 0 {
            self.fs.read_path(&location.path)
        } else {
            self.fs.read_range(
                &location.path,
                location.offset as usize,
                location.length as usize,
            )
        }
    }

    /// Status of `pin` without prompting
    pub fn pin_status(&mut self, pin: &PinAttributes) -> Result<PinStatus> {
        if self.blocked.contains(&pin.id) {
            return Ok(PinStatus::Blocked);
        }
        let status = pin::pin_status(self.fs.connection_mut(), pin)?;
        if status == PinStatus::Blocked {
            self.blocked.insert(pin.id);
        }
        Ok(status)
    }

    /// Verify `pin`, prompting through `ui`
    ///
    /// A PIN once seen blocked is not sent to the card again in this session.
    pub fn check_pin<U: UserInterface + ?Sized>(
        &mut self,
        ui: &mut U,
        pin: &PinAttributes,
    ) -> Result<PinOutcome> {
        if self.blocked.contains(&pin.id) {
            ui.show_message(&pin.label, &format!("{} is blocked", pin.label), false);
            return Ok(PinOutcome::Blocked);
        }
        let outcome = pin::check_pin(self.fs.connection_mut(), ui, pin)?;
        if outcome == PinOutcome::Blocked {
            self.blocked.insert(pin.id);
        }
        Ok(outcome)
    }

    /// Sign `data` with `key` in the session's security environment
    pub fn sign(&mut self, key: &PrivateKey, data: &[u8]) -> Result<Bytes> {
        let se_id = self.se_id;
        signer::sign(self.fs.connection_mut(), se_id, key, data)
    }
}
