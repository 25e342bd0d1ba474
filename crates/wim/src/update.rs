//! Deferred card writes
//!
//! Adding or removing a credential touches several files. Every change is
//! first applied to an in-memory [`DirectoryImage`] and queued in a
//! [`PendingUpdate`]; the queue reaches the card only through
//! [`PendingUpdate::commit`], after all checks have passed.

use bytes::{Bytes, BytesMut};
use tracing::{debug, instrument};
use wim_apdu_core::CardTransport;

use crate::directory::{DirectoryParser, skip_marker};
use crate::fs::FileSystem;
use crate::tlv::Tlv;
use crate::types::{Location, Path};
use crate::{Error, Result};

/// One queued write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: Path,
    pub offset: usize,
    pub data: Bytes,
}

/// Writes collected during one operation, applied in registration order
#[derive(Debug, Clone, Default)]
pub struct PendingUpdate {
    writes: Vec<FileWrite>,
}

impl PendingUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: Path, offset: usize, data: impl Into<Bytes>) {
        self.writes.push(FileWrite {
            path,
            offset,
            data: data.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[FileWrite] {
        &self.writes
    }

    /// Apply every queued write
    ///
    /// A failure stops the commit; earlier writes stay on the card.
    #[instrument(level = "debug", skip_all, fields(writes = self.writes.len()))]
    pub fn commit<T: CardTransport>(self, fs: &mut FileSystem<T>) -> Result<()> {
        for write in self.writes {
            debug!(path = %write.path, offset = write.offset, length = write.data.len(), "Writing");
            fs.select(&write.path)?;
            fs.write_data(&write.data, 0, write.data.len(), write.offset)?;
        }
        Ok(())
    }
}

/// In-memory copy of a directory file and its free gaps
#[derive(Debug, Clone)]
pub struct DirectoryImage {
    path: Path,
    data: BytesMut,
    objects: Vec<Tlv>,
    locations: Vec<Location>,
    free: Vec<Location>,
}

impl DirectoryImage {
    /// Read and scan the directory file at `path`
    pub fn load<T: CardTransport>(fs: &mut FileSystem<T>, path: &Path) -> Result<Self> {
        let mut parser = DirectoryParser::new(true, true, true);
        let data = parser.parse_directory_file(fs, path)?;
        Ok(Self::from_parts(path.clone(), data, parser))
    }

    /// Scan a file image that is already in memory
    pub fn from_bytes(path: Path, data: Bytes) -> Result<Self> {
        let mut parser = DirectoryParser::new(true, true, true);
        parser.parse_bytes(&path, &data)?;
        Ok(Self::from_parts(path, data, parser))
    }

    fn from_parts(path: Path, data: Bytes, mut parser: DirectoryParser) -> Self {
        Self {
            path,
            data: BytesMut::from(data.as_ref()),
            objects: parser.take_objects(),
            locations: parser.take_locations(),
            free: parser.take_free(),
        }
    }

    pub const fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Records found when the file was loaded
    pub fn objects(&self) -> &[Tlv] {
        &self.objects
    }

    /// Locations of [`DirectoryImage::objects`], index-aligned
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Free gaps, kept current across splices
    pub fn free(&self) -> &[Location] {
        &self.free
    }

    /// Overwrite `bytes.len()` bytes at `offset` in the image and queue the write
    pub fn splice(&mut self, offset: usize, bytes: &[u8], pending: &mut PendingUpdate) -> Result<()> {
        let target = self
            .data
            .get_mut(offset..offset + bytes.len())
            .ok_or(Error::MalformedEncoding("write outside directory file"))?;
        target.copy_from_slice(bytes);
        pending.push(self.path.clone(), offset, Bytes::copy_from_slice(bytes));
        Ok(())
    }

    /// Write `record` into the first gap large enough to hold it
    ///
    /// The rest of the gap is marked free again.
    pub fn place(&mut self, record: &[u8], pending: &mut PendingUpdate) -> Result<Location> {
        let index = self
            .free
            .iter()
            .position(|gap| gap.length as usize >= record.len())
            .ok_or(Error::DirectoryFull)?;
        let gap = self.free.remove(index);
        let offset = gap.offset as usize;

        self.splice(offset, record, pending)?;
        let remainder = gap.length as usize - record.len();
        if remainder > 0 {
            let rest = offset + record.len();
            self.splice(rest, &skip_marker(remainder)?, pending)?;
            self.insert_free(location(&self.path, rest, remainder)?);
        }

        let placed = location(&self.path, offset, record.len())?;
        debug!(%placed, "Record placed");
        Ok(placed)
    }

    /// Overwrite the record at `slot` with a record no longer than it
    ///
    /// Bytes of the slot left over are marked free.
    pub fn replace(
        &mut self,
        slot: &Location,
        record: &[u8],
        pending: &mut PendingUpdate,
    ) -> Result<Location> {
        let capacity = slot.length as usize;
        if record.len() > capacity {
            return Err(Error::MalformedEncoding("record does not fit its slot"));
        }
        let offset = slot.offset as usize;
        self.splice(offset, record, pending)?;
        let remainder = capacity - record.len();
        if remainder > 0 {
            let rest = offset + record.len();
            self.splice(rest, &skip_marker(remainder)?, pending)?;
            self.insert_free(location(&self.path, rest, remainder)?);
        }
        location(&self.path, offset, record.len())
    }

    /// Mark the range of `record` as free space
    pub fn release(&mut self, record: &Location, pending: &mut PendingUpdate) -> Result<()> {
        let length = record.length as usize;
        self.splice(record.offset as usize, &skip_marker(length)?, pending)?;
        self.insert_free(record.clone());
        Ok(())
    }

    /// Add a gap to the sorted free list, joining it with adjacent gaps
    fn insert_free(&mut self, gap: Location) {
        let at = self
            .free
            .iter()
            .position(|g| g.offset > gap.offset)
            .unwrap_or(self.free.len());
        self.free.insert(at, gap);

        if at + 1 < self.free.len() && self.free[at].precedes(&self.free[at + 1]) {
            let next = self.free.remove(at + 1);
            self.free[at].length += next.length;
        }
        if at > 0 && self.free[at - 1].precedes(&self.free[at]) {
            let current = self.free.remove(at);
            self.free[at - 1].length += current.length;
        }
    }
}

fn location(path: &Path, offset: usize, length: usize) -> Result<Location> {
    Ok(Location::new(
        path.clone(),
        u16::try_from(offset).map_err(|_| Error::MalformedEncoding("offset overflow"))?,
        u16::try_from(length).map_err(|_| Error::MalformedEncoding("length overflow"))?,
    ))
}
