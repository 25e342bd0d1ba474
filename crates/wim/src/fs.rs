//! File system access on the card
//!
//! Reads and writes are split into chunks of at most `max_chunk` bytes. A
//! failure part way through a chunked write leaves the earlier chunks on the
//! card; nothing is rolled back.

use bytes::{Bytes, BytesMut};
use iso7816_tlv::ber::{Tag, Tlv as BerTlv, Value};
use tracing::{debug, instrument, trace};
use wim_apdu_core::CardTransport;

use crate::commands::{read_binary, select_application, select_path, update_binary};
use crate::connection::Connection;
use crate::types::Path;
use crate::{Error, Result};

const FCP_TEMPLATE: u8 = 0x62;
const FCP_FILE_SIZE: u8 = 0x80;
const FCP_DESCRIPTOR: u8 = 0x82;

/// What a SELECT reported about the selected file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileControl {
    /// Size of the file body, `None` for directory files
    pub size: Option<usize>,
}

impl TryFrom<&[u8]> for FileControl {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self { size: None });
        }

        let fcp = BerTlv::from_bytes(data)?;
        if fcp.tag() != &Tag::try_from(FCP_TEMPLATE)? {
            return Err(Error::MalformedEncoding("expected FCP template"));
        }
        let Value::Constructed(entries) = fcp.value() else {
            return Err(Error::MalformedEncoding("FCP template is not constructed"));
        };

        let size_tag = Tag::try_from(FCP_FILE_SIZE)?;
        let descriptor_tag = Tag::try_from(FCP_DESCRIPTOR)?;
        let mut size = None;
        let mut directory = false;
        for entry in entries {
            match entry.value() {
                Value::Primitive(bytes) if entry.tag() == &size_tag => {
                    size = Some(bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize));
                }
                Value::Primitive(bytes) if entry.tag() == &descriptor_tag => {
                    directory = bytes.first().is_some_and(|d| d & 0x38 == 0x38);
                }
                _ => {}
            }
        }

        Ok(Self {
            size: if directory { None } else { size },
        })
    }
}

/// Selection state plus chunked binary I/O over a [`Connection`]
#[derive(Debug)]
pub struct FileSystem<T: CardTransport> {
    connection: Connection<T>,
    application_path: Path,
    max_chunk: usize,
    selected: Option<Path>,
    current_file_size: Option<usize>,
}

impl<T: CardTransport> FileSystem<T> {
    pub fn new(connection: Connection<T>, application_path: Path, max_chunk: usize) -> Self {
        Self {
            connection,
            application_path,
            max_chunk: max_chunk.max(1),
            selected: None,
            current_file_size: None,
        }
    }

    pub const fn connection(&self) -> &Connection<T> {
        &self.connection
    }

    pub const fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.connection
    }

    pub fn into_connection(self) -> Connection<T> {
        self.connection
    }

    pub const fn application_path(&self) -> &Path {
        &self.application_path
    }

    /// Size of the selected EF, `None` when no EF is selected
    pub const fn current_file_size(&self) -> Option<usize> {
        self.current_file_size
    }

    /// Select an application by AID
    #[instrument(level = "debug", skip_all, fields(aid = %hex::encode_upper(aid)))]
    pub fn select_application(&mut self, aid: &[u8]) -> Result<Bytes> {
        self.selected = None;
        self.current_file_size = None;
        self.connection.execute(&select_application(aid))
    }

    /// Select a file; relative paths start at the application DF
    #[instrument(level = "debug", skip_all, fields(path = %path))]
    pub fn select(&mut self, path: &Path) -> Result<()> {
        let absolute = path.resolve(&self.application_path);
        self.selected = None;
        self.current_file_size = None;

        let fcp = self.connection.execute(&select_path(&absolute))?;
        let control = FileControl::try_from(fcp.as_ref())?;
        debug!(size = ?control.size, "File selected");

        self.current_file_size = control.size;
        self.selected = Some(absolute);
        Ok(())
    }

    /// Absolute path of the current selection
    pub const fn selected(&self) -> Option<&Path> {
        self.selected.as_ref()
    }

    /// Read the whole selected EF
    pub fn read_file(&mut self) -> Result<Bytes> {
        let size = self.current_file_size.ok_or(Error::NoFileSelected)?;
        let mut buffer = vec![0u8; size];
        self.read_data(&mut buffer, 0, size, 0)?;
        Ok(Bytes::from(buffer))
    }

    /// Read `length` bytes at `file_offset` into `output[output_offset..]`
    pub fn read_data(
        &mut self,
        output: &mut [u8],
        output_offset: usize,
        length: usize,
        file_offset: usize,
    ) -> Result<()> {
        if output_offset + length > output.len() {
            return Err(Error::MalformedEncoding("read exceeds output buffer"));
        }

        let mut done = 0;
        while done < length {
            let chunk = (length - done).min(self.max_chunk);
            let offset = file_offset + done;
            trace!(offset, chunk, "READ BINARY");
            let data = self
                .connection
                .execute(&read_binary(file_offset_u16(offset)?, chunk))?;
            if data.is_empty() {
                return Err(Error::MalformedEncoding("card returned no data"));
            }
            let got = data.len().min(chunk);
            let start = output_offset + done;
            output[start..start + got].copy_from_slice(&data[..got]);
            done += got;
        }
        Ok(())
    }

    /// Write `data[data_offset..data_offset + length]` at `file_offset`
    pub fn write_data(
        &mut self,
        data: &[u8],
        data_offset: usize,
        length: usize,
        file_offset: usize,
    ) -> Result<()> {
        let source = data
            .get(data_offset..data_offset + length)
            .ok_or(Error::MalformedEncoding("write exceeds input buffer"))?;

        for (i, chunk) in source.chunks(self.max_chunk).enumerate() {
            let offset = file_offset + i * self.max_chunk;
            trace!(offset, chunk = chunk.len(), "UPDATE BINARY");
            self.connection.execute(&update_binary(
                file_offset_u16(offset)?,
                Bytes::copy_from_slice(chunk),
            ))?;
        }
        Ok(())
    }

    /// Select `path` and read it entirely
    pub fn read_path(&mut self, path: &Path) -> Result<Bytes> {
        self.select(path)?;
        self.read_file()
    }

    /// Select `path` and read `length` bytes at `offset`
    pub fn read_range(&mut self, path: &Path, offset: usize, length: usize) -> Result<Bytes> {
        self.select(path)?;
        let mut buffer = BytesMut::zeroed(length);
        self.read_data(&mut buffer, 0, length, offset)?;
        Ok(buffer.freeze())
    }
}

fn file_offset_u16(offset: usize) -> Result<u16> {
    u16::try_from(offset)
        .ok()
        .filter(|o| *o <= 0x7FFF)
        .ok_or(Error::MalformedEncoding("file offset out of range"))
}
