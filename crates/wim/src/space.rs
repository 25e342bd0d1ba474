//! Free space bookkeeping in EF(UnusedSpace)
//!
//! Each record of EF(UnusedSpace) describes one free range of some EF, plus
//! optionally the PIN guarding it. Allocation is first fit in record order and
//! takes bytes from the start of a range. Released ranges are merged into an
//! adjacent range when possible:
//!
//! - a range ending where the released one starts grows by its length
//! - a range starting where the released one ends moves back to its offset
//! - when both exist the first absorbs the second, whose record is dropped
//!
//! Otherwise an emptied record is reused or a new record is written into the
//! slack of EF(UnusedSpace).

use tracing::{debug, instrument};
use wim_apdu_core::CardTransport;

use crate::fs::FileSystem;
use crate::pkcs15::{free_block_record, parse_free_block};
use crate::types::{FreeBlock, Location, Path};
use crate::update::{DirectoryImage, PendingUpdate};
use crate::{Error, Result};

/// Free blocks of a card, with the image of EF(UnusedSpace) they live in
#[derive(Debug, Clone)]
pub struct FreeSpace {
    image: DirectoryImage,
    blocks: Vec<FreeBlock>,
}

/// Range handed out by [`FreeSpace::allocate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub location: Location,
    /// PIN to verify before writing into the range
    pub auth_id: Option<u32>,
}

impl FreeSpace {
    #[instrument(level = "debug", skip_all, fields(path = %path))]
    pub fn load<T: CardTransport>(fs: &mut FileSystem<T>, path: &Path) -> Result<Self> {
        Self::from_image(DirectoryImage::load(fs, path)?)
    }

    pub fn from_image(image: DirectoryImage) -> Result<Self> {
        let blocks = image
            .objects()
            .iter()
            .zip(image.locations())
            .map(|(record, location)| parse_free_block(record, location.clone()))
            .collect::<Result<Vec<_>>>()?;
        debug!(blocks = blocks.len(), "Free space loaded");
        Ok(Self { image, blocks })
    }

    pub fn blocks(&self) -> &[FreeBlock] {
        &self.blocks
    }

    pub const fn image(&self) -> &DirectoryImage {
        &self.image
    }

    /// Index of the first block holding at least `length` bytes
    pub fn first_fit(&self, length: usize) -> Option<usize> {
        self.blocks
            .iter()
            .position(|block| block.location.length as usize >= length)
    }

    /// Take `length` bytes from the first block large enough
    pub fn allocate(&mut self, length: usize, pending: &mut PendingUpdate) -> Result<Allocation> {
        let length16 = u16::try_from(length).map_err(|_| Error::InsufficientSpace)?;
        let index = self.first_fit(length).ok_or(Error::InsufficientSpace)?;

        let block = &mut self.blocks[index];
        let allocation = Allocation {
            location: Location::new(block.location.path.clone(), block.location.offset, length16),
            auth_id: block.auth_id,
        };
        block.location.offset += length16;
        block.location.length -= length16;
        debug!(location = %allocation.location, "Space allocated");

        self.rewrite(index, pending)?;
        Ok(allocation)
    }

    /// Return `freed` to the free list, tagging a brand new record with `auth_id`
    pub fn release(
        &mut self,
        freed: &Location,
        auth_id: u32,
        pending: &mut PendingUpdate,
    ) -> Result<()> {
        if freed.length == 0 {
            return Ok(());
        }
        let head = self.blocks.iter().position(|b| b.location.precedes(freed));
        let tail = self.blocks.iter().position(|b| freed.precedes(&b.location));

        match (head, tail) {
            (Some(head), Some(tail)) => {
                let absorbed = self.blocks[tail].location.length;
                self.blocks[head].location.length += freed.length + absorbed;
                debug!(head = %self.blocks[head].location, "Released range joins two blocks");
                self.rewrite(head, pending)?;
                self.remove(tail, pending)
            }
            (Some(head), None) => {
                self.blocks[head].location.length += freed.length;
                debug!(head = %self.blocks[head].location, "Released range extends block");
                self.rewrite(head, pending)
            }
            (None, Some(tail)) => {
                let block = &mut self.blocks[tail];
                block.location.offset = freed.offset;
                block.location.length += freed.length;
                debug!(tail = %block.location, "Released range prepended to block");
                self.rewrite(tail, pending)
            }
            (None, None) => {
                if let Some(empty) = self.blocks.iter().position(FreeBlock::is_empty) {
                    self.blocks[empty].location = freed.clone();
                    debug!(location = %freed, "Released range reuses empty record");
                    self.rewrite(empty, pending)
                } else {
                    self.insert(freed, Some(auth_id), pending)
                }
            }
        }
    }

    /// Write the record of block `index` back, moving it if it grew
    fn rewrite(&mut self, index: usize, pending: &mut PendingUpdate) -> Result<()> {
        let block = &self.blocks[index];
        let encoded = free_block_record(&block.location, block.auth_id).der_data();
        let slot = block.record.clone();

        let placed = if encoded.len() <= slot.length as usize {
            self.image.replace(&slot, &encoded, pending)?
        } else {
            let placed = self.image.place(&encoded, pending)?;
            self.image.release(&slot, pending)?;
            debug!(from = %slot, to = %placed, "Free block record relocated");
            placed
        };
        self.blocks[index].record = placed;
        Ok(())
    }

    fn remove(&mut self, index: usize, pending: &mut PendingUpdate) -> Result<()> {
        let block = self.blocks.remove(index);
        self.image.release(&block.record, pending)
    }

    fn insert(
        &mut self,
        location: &Location,
        auth_id: Option<u32>,
        pending: &mut PendingUpdate,
    ) -> Result<()> {
        let encoded = free_block_record(location, auth_id).der_data();
        let record = self.image.place(&encoded, pending)?;
        debug!(%location, %record, "Free block record added");
        self.blocks.push(FreeBlock {
            location: location.clone(),
            auth_id,
            record,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::*;
    use crate::directory::DirectoryParser;

    fn unused_space() -> Path {
        Path::from(vec![0x5033])
    }

    fn body_file() -> Path {
        Path::from(vec![0x4B02])
    }

    /// EF(UnusedSpace) image with one record per `(offset, length)` and `slack` free bytes
    fn space(blocks: &[(u16, u16)], slack: usize) -> FreeSpace {
        let mut data = BytesMut::new();
        for (offset, length) in blocks {
            let record = free_block_record(&Location::new(body_file(), *offset, *length), Some(1));
            data.extend_from_slice(&record.der_data());
        }
        data.resize(data.len() + slack, 0xFF);
        let image = DirectoryImage::from_bytes(unused_space(), data.freeze()).unwrap();
        FreeSpace::from_image(image).unwrap()
    }

    fn lengths(space: &FreeSpace) -> Vec<(u16, u16)> {
        space
            .blocks()
            .iter()
            .map(|b| (b.location.offset, b.location.length))
            .collect()
    }

    /// Scan the image again and decode its records
    fn reread(space: &FreeSpace) -> Vec<(u16, u16)> {
        let data = Bytes::copy_from_slice(space.image().data());
        let mut parser = DirectoryParser::new(true, true, false);
        parser.parse_bytes(&unused_space(), &data).unwrap();
        let mut blocks: Vec<_> = parser
            .objects()
            .iter()
            .zip(parser.locations())
            .map(|(o, l)| {
                let block = parse_free_block(o, l.clone()).unwrap();
                (block.location.offset, block.location.length)
            })
            .collect();
        blocks.sort();
        blocks
    }

    #[test]
    fn test_first_fit_takes_first_large_enough_block() {
        let mut space = space(&[(0, 5), (100, 20), (300, 8)], 0);
        assert_eq!(space.first_fit(6), Some(1));

        let mut pending = PendingUpdate::new();
        let allocation = space.allocate(6, &mut pending).unwrap();
        assert_eq!(allocation.location, Location::new(body_file(), 100, 6));
        assert_eq!(allocation.auth_id, Some(1));
        assert_eq!(lengths(&space), vec![(0, 5), (106, 14), (300, 8)]);
        assert_eq!(reread(&space), vec![(0, 5), (106, 14), (300, 8)]);
    }

    #[test]
    fn test_allocation_failure_writes_nothing() {
        let mut space = space(&[(0, 5), (100, 20)], 0);
        let mut pending = PendingUpdate::new();
        assert!(matches!(
            space.allocate(21, &mut pending),
            Err(Error::InsufficientSpace)
        ));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_release_after_block_extends_it() {
        let mut space = space(&[(0, 10)], 0);
        let mut pending = PendingUpdate::new();
        space
            .release(&Location::new(body_file(), 10, 5), 1, &mut pending)
            .unwrap();
        assert_eq!(lengths(&space), vec![(0, 15)]);
        assert_eq!(reread(&space), vec![(0, 15)]);
    }

    #[test]
    fn test_release_before_block_moves_it() {
        let mut space = space(&[(20, 10)], 0);
        let mut pending = PendingUpdate::new();
        space
            .release(&Location::new(body_file(), 15, 5), 1, &mut pending)
            .unwrap();
        assert_eq!(lengths(&space), vec![(15, 15)]);
    }

    #[test]
    fn test_release_between_blocks_merges_them() {
        let mut space = space(&[(0, 10), (15, 5)], 0);
        let mut pending = PendingUpdate::new();
        space
            .release(&Location::new(body_file(), 10, 5), 1, &mut pending)
            .unwrap();
        assert_eq!(lengths(&space), vec![(0, 20)]);
        assert_eq!(reread(&space), vec![(0, 20)]);
    }

    #[test]
    fn test_release_reuses_empty_record() {
        let mut space = space(&[(0, 10), (50, 0)], 0);
        let mut pending = PendingUpdate::new();
        space
            .release(&Location::new(body_file(), 30, 5), 1, &mut pending)
            .unwrap();
        assert_eq!(lengths(&space), vec![(0, 10), (30, 5)]);
    }

    #[test]
    fn test_release_adds_record_in_slack() {
        let mut space = space(&[(0, 10)], 40);
        let mut pending = PendingUpdate::new();
        space
            .release(&Location::new(body_file(), 30, 5), 1, &mut pending)
            .unwrap();
        assert_eq!(lengths(&space), vec![(0, 10), (30, 5)]);
        assert_eq!(reread(&space), vec![(0, 10), (30, 5)]);
    }

    #[test]
    fn test_release_without_slack() {
        let mut space = space(&[(0, 10)], 0);
        let mut pending = PendingUpdate::new();
        assert!(matches!(
            space.release(&Location::new(body_file(), 30, 5), 1, &mut pending),
            Err(Error::DirectoryFull)
        ));
    }

    #[test]
    fn test_growing_record_moves_into_slack() {
        // offset 0x70 encodes in one byte, 0x80 needs two
        let mut space = space(&[(0x70, 0x10)], 20);
        let before = space.blocks()[0].record.clone();

        let mut pending = PendingUpdate::new();
        space.allocate(0x10, &mut pending).unwrap();

        let after = &space.blocks()[0].record;
        assert_eq!(after.offset as usize, before.end());
        assert_eq!(after.length, before.length + 1);
        assert_eq!(reread(&space), vec![(0x80, 0x00)]);
        assert_eq!(space.image().free()[0].offset, 0);
    }
}
