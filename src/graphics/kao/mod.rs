//! The KAO portrait archive (`FONT/kaomado.kao`).
//!
//! The file starts with one all-zero padding entry, followed by the table of
//! contents and then the image payloads. Each table entry holds
//! `SUBENTRIES` signed pointers, one per emotion. Pointers `<= 0` mark empty
//! slots. Each payload is a 16 colour palette followed by an AT4PX container.

pub mod codec;
pub mod portrait;
pub mod table;

use std::fs;
use std::path::Path;

use image::RgbaImage;
use tracing::{debug, trace};

use crate::error::{KaoError, Result};
use codec::{At4pxCodec, PortraitCodec};
use portrait::KaoImage;
use table::{PointerTable, SubEntry};

pub const SUBENTRIES: usize = 40;
pub const SUBENTRY_LEN: usize = 4;
pub const KAO_IMG_PAL_COLORS: usize = 16;
pub const KAO_IMG_PAL_SIZE: usize = KAO_IMG_PAL_COLORS * 3;
pub const KAO_IMG_DIM: usize = 40;
pub const KAO_TILE_DIM: usize = 8;
pub const KAO_META_DIM: usize = 5;
pub const KAO_IMG_PIXELS: usize = KAO_IMG_DIM * KAO_IMG_DIM;
/// Decompressed size: two pixels per byte
pub const KAO_IMG_PACKED_SIZE: usize = KAO_IMG_PIXELS / 2;
/// The first entry is padding
pub const KAO_FIRST_TOC_OFFSET: usize = SUBENTRIES * SUBENTRY_LEN;

pub type Palette = [[u8; 3]; KAO_IMG_PAL_COLORS];

/// A portrait archive that can be queried, edited and written back.
///
/// Payload storage starts as the loaded file and only grows: `set` appends
/// the new payload and repoints the slot. Bytes that are no longer
/// referenced are dropped by `save`.
#[derive(Debug, Clone)]
pub struct Kao<C = At4pxCodec> {
    table: PointerTable,
    storage: Vec<u8>,
    codec: C,
}

impl Kao<At4pxCodec> {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with_codec(data, At4pxCodec::default())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        debug!(path = %path.as_ref().display(), bytes = data.len(), "loading KAO archive");
        Self::from_bytes(data)
    }

    pub fn new_empty(index_count: usize) -> Self {
        Self::new_empty_with_codec(index_count, At4pxCodec::default())
    }
}

impl<C: PortraitCodec> Kao<C> {
    pub fn from_bytes_with_codec(data: Vec<u8>, codec: C) -> Result<Self> {
        let table = PointerTable::parse(&data)?;
        Ok(Kao {
            table,
            storage: data,
            codec,
        })
    }

    pub fn new_empty_with_codec(index_count: usize, codec: C) -> Self {
        Kao {
            table: PointerTable::new(index_count),
            storage: Vec::new(),
            codec,
        }
    }

    /// Number of indices in the table
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn sub_entries(&self) -> usize {
        SUBENTRIES
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn table(&self) -> &PointerTable {
        &self.table
    }

    /// `Ok(None)` for an empty slot, `OutOfRange` outside the table
    pub fn get(&self, index: usize, subindex: usize) -> Result<Option<KaoImage>> {
        match self.table.get_offset(index, subindex)? {
            Some(offset) => {
                KaoImage::decode_from(offset as usize, &self.storage, &self.codec).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Stores the image's payload as is; nothing is re-encoded
    pub fn set(&mut self, index: usize, subindex: usize, image: &KaoImage) -> Result<()> {
        self.table.check_range(index, subindex)?;
        let offset = self.append_payload(image.payload())?;
        trace!(index, subindex, offset, "set portrait");
        self.table.set_offset(index, subindex, offset)
    }

    /// Encodes a 40x40 bitmap with at most 16 colours and stores it
    pub fn set_from_img(&mut self, index: usize, subindex: usize, img: &RgbaImage) -> Result<()> {
        self.table.check_range(index, subindex)?;
        let image = KaoImage::from_rgba(img, &self.codec)?;
        self.set(index, subindex, &image)
    }

    /// Encodes row-major palette indices and stores them
    pub fn set_from_pixels(
        &mut self,
        index: usize,
        subindex: usize,
        pixels: Vec<u8>,
        palette: Palette,
    ) -> Result<()> {
        self.table.check_range(index, subindex)?;
        let image = KaoImage::encode(pixels, palette, &self.codec)?;
        self.set(index, subindex, &image)
    }

    /// Empties a slot. Empty or out of range slots are left alone.
    pub fn delete(&mut self, index: usize, subindex: usize) {
        if self.table.clear(index, subindex) {
            trace!(index, subindex, "deleted portrait");
        } else if !self.table.in_range(index, subindex) {
            debug!(index, subindex, "ignoring delete outside the table");
        }
    }

    /// Grows the table to `new_index_count` entries. Never shrinks.
    pub fn expand(&mut self, new_index_count: usize) {
        let old = self.table.len();
        self.table.expand(new_index_count);
        if self.table.len() != old {
            debug!(from = old, to = self.table.len(), "expanded KAO table");
        }
    }

    /// All slots in row-major order, decoding populated ones
    pub fn iter(&self) -> KaoIter<'_, C> {
        KaoIter {
            kao: self,
            index: 0,
            subindex: 0,
        }
    }

    /// Coordinates of populated slots, without decoding
    pub fn populated(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.table
            .entries()
            .iter()
            .enumerate()
            .flat_map(|(index, entry)| {
                entry
                    .slots()
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| matches!(slot, SubEntry::Offset(_)))
                    .map(move |(subindex, _)| (index, subindex))
            })
    }

    /// Writes the table followed by the payload of every populated slot, in slot order
    pub fn save(&self) -> Result<Vec<u8>> {
        let toc_end = self.table.toc_end();
        let mut new_table = PointerTable::new(self.table.len());
        let mut payloads = Vec::new();

        for (index, subindex) in self.populated() {
            let Some(offset) = self.table.get_offset(index, subindex)? else {
                continue;
            };
            let data = self.storage.get(offset as usize..).ok_or_else(|| {
                KaoError::CorruptPayload(format!(
                    "portrait ({}, {}) points past the end of payload storage",
                    index, subindex
                ))
            })?;
            let len = self.codec.payload_len(data)?;
            let payload = data.get(..len).ok_or_else(|| {
                KaoError::CorruptPayload(format!(
                    "portrait ({}, {}) runs past the end of payload storage",
                    index, subindex
                ))
            })?;

            let new_offset = pointer_for(toc_end + payloads.len())?;
            new_table.set_offset(index, subindex, new_offset)?;
            payloads.extend_from_slice(payload);
        }

        let payload_end = pointer_for(toc_end + payloads.len())?;
        let mut out = new_table.serialise(payload_end);
        out.extend_from_slice(&payloads);

        debug!(
            entries = self.table.len(),
            bytes = out.len(),
            dropped = self.storage.len().saturating_sub(out.len()),
            "serialised KAO archive"
        );

        Ok(out)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.save()?;
        fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    fn append_payload(&mut self, payload: &[u8]) -> Result<u32> {
        let offset = pointer_for(self.storage.len())?;
        pointer_for(self.storage.len() + payload.len())?;
        self.storage.extend_from_slice(payload);
        Ok(offset)
    }
}

/// Pointers are stored as signed 32-bit values
fn pointer_for(offset: usize) -> Result<u32> {
    i32::try_from(offset)
        .map(|o| o as u32)
        .map_err(|_| KaoError::MalformedArchive(format!("offset {:#x} does not fit a pointer", offset)))
}

/// Cursor over every slot: sub-index first, then the next index
pub struct KaoIter<'a, C> {
    kao: &'a Kao<C>,
    index: usize,
    subindex: usize,
}

impl<C: PortraitCodec> Iterator for KaoIter<'_, C> {
    type Item = Result<(usize, usize, Option<KaoImage>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.kao.len() {
            return None;
        }

        let (index, subindex) = (self.index, self.subindex);
        self.subindex += 1;
        if self.subindex == SUBENTRIES {
            self.subindex = 0;
            self.index += 1;
        }

        Some(
            self.kao
                .get(index, subindex)
                .map(|image| (index, subindex, image)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .kao
            .len()
            .saturating_sub(self.index)
            .saturating_mul(SUBENTRIES)
            .saturating_sub(self.subindex);
        (remaining, Some(remaining))
    }
}

impl<'a, C: PortraitCodec> IntoIterator for &'a Kao<C> {
    type Item = Result<(usize, usize, Option<KaoImage>)>;
    type IntoIter = KaoIter<'a, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
