//! Linear scan of PKCS#15 directory files
//!
//! A directory file is a run of DER records interleaved with free space. Free
//! space shows up either as `FF` filler bytes or as a record whose tag is zero
//! (a "skip" marker); both may appear in the same file. A lone zero byte at the
//! very end is free space too. Every byte range not
//! covered by a real record is reported as a free block, including the tail of
//! the file after the last record.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, instrument};
use wim_apdu_core::CardTransport;

use crate::fs::FileSystem;
use crate::tlv::{Tlv, tags};
use crate::types::{Location, Path};
use crate::{Error, Result};

/// Filler byte of erased directory space
pub const FILLER: u8 = 0xFF;

/// Collects records, their locations and the free gaps of directory files
///
/// Each output is optional; [`DirectoryParser::reset`] chooses which ones are
/// collected. Objects and locations stay index-aligned.
#[derive(Debug, Default)]
pub struct DirectoryParser {
    objects: Option<Vec<Tlv>>,
    locations: Option<Vec<Location>>,
    free: Option<Vec<Location>>,
}

impl DirectoryParser {
    pub fn new(objects: bool, locations: bool, free: bool) -> Self {
        let mut parser = Self::default();
        parser.reset(objects, locations, free);
        parser
    }

    /// Clear all outputs and choose which ones the next parses fill
    pub fn reset(&mut self, objects: bool, locations: bool, free: bool) {
        self.objects = objects.then(Vec::new);
        self.locations = locations.then(Vec::new);
        self.free = free.then(Vec::new);
    }

    /// Select and read the directory file at `path`, then scan it
    ///
    /// Returns the file image so that callers can splice into it.
    #[instrument(level = "debug", skip_all, fields(path = %path))]
    pub fn parse_directory_file<T: CardTransport>(
        &mut self,
        fs: &mut FileSystem<T>,
        path: &Path,
    ) -> Result<Bytes> {
        let data = fs.read_path(path)?;
        self.parse_bytes(path, &data)?;
        Ok(data)
    }

    /// Scan a directory file image read from `path`
    pub fn parse_bytes(&mut self, path: &Path, data: &Bytes) -> Result<()> {
        let mut pos = 0;
        let mut gap_start: Option<usize> = None;
        let mut records = 0usize;

        while pos < data.len() {
            // a single trailing zero has no room for a length byte
            let lone_zero = data[pos] == tags::EMPTY as u8 && pos + 1 == data.len();
            if data[pos] == FILLER || lone_zero {
                gap_start.get_or_insert(pos);
                pos += 1;
                continue;
            }

            let record = Tlv::parse(data, pos)?;
            let end = record.end_offset();
            if record.is_empty_marker() {
                gap_start.get_or_insert(pos);
                pos = end;
                continue;
            }

            if let Some(start) = gap_start.take() {
                self.push_free(path, start, pos)?;
            }
            if let Some(locations) = self.locations.as_mut() {
                locations.push(location(path, pos, end)?);
            }
            if let Some(objects) = self.objects.as_mut() {
                objects.push(record);
            }
            records += 1;
            pos = end;
        }

        if let Some(start) = gap_start {
            self.push_free(path, start, data.len())?;
        }
        debug!(records, size = data.len(), "Directory file scanned");
        Ok(())
    }

    fn push_free(&mut self, path: &Path, start: usize, end: usize) -> Result<()> {
        if let Some(free) = self.free.as_mut() {
            free.push(location(path, start, end)?);
        }
        Ok(())
    }

    pub fn objects(&self) -> &[Tlv] {
        self.objects.as_deref().unwrap_or_default()
    }

    pub fn locations(&self) -> &[Location] {
        self.locations.as_deref().unwrap_or_default()
    }

    pub fn free(&self) -> &[Location] {
        self.free.as_deref().unwrap_or_default()
    }

    pub fn take_objects(&mut self) -> Vec<Tlv> {
        self.objects.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub fn take_locations(&mut self) -> Vec<Location> {
        self.locations
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn take_free(&mut self) -> Vec<Location> {
        self.free.as_mut().map(std::mem::take).unwrap_or_default()
    }
}

fn location(path: &Path, start: usize, end: usize) -> Result<Location> {
    let offset = u16::try_from(start).map_err(|_| Error::MalformedEncoding("offset overflow"))?;
    let length =
        u16::try_from(end - start).map_err(|_| Error::MalformedEncoding("length overflow"))?;
    Ok(Location::new(path.clone(), offset, length))
}

/// Bytes that mark `length` bytes of a directory file as free
///
/// A single byte becomes `FF`; anything longer is one zero-tagged record
/// spanning the whole range, with a header of two, three or four bytes.
pub fn skip_marker(length: usize) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(length);
    match length {
        0 => {}
        1 => out.put_u8(FILLER),
        2..130 => {
            out.put_slice(&[0x00, (length - 2) as u8]);
        }
        130..259 => {
            out.put_slice(&[0x00, 0x81, (length - 3) as u8]);
        }
        _ => {
            let remainder = u16::try_from(length - 4)
                .map_err(|_| Error::MalformedEncoding("skip marker too long"))?;
            out.put_slice(&[0x00, 0x82]);
            out.put_u16(remainder);
        }
    }
    out.resize(length, 0x00);
    Ok(out.freeze())
}
