use std::io::Cursor;

use tracing::debug;

use super::{KAO_FIRST_TOC_OFFSET, SUBENTRIES, SUBENTRY_LEN};
use crate::binary_utils::{read_i32_le, seek_to, write_i32_le};
use crate::error::{KaoError, Result};

/// Size of one index entry in the pointer table
pub const KAO_ENTRY_SIZE: usize = SUBENTRIES * SUBENTRY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubEntry {
    /// No portrait; never dereferenced
    Empty,
    /// Offset into payload storage
    Offset(u32),
}

impl SubEntry {
    fn from_pointer(pointer: i32) -> Self {
        // Any non-positive pointer marks an empty slot
        if pointer > 0 {
            SubEntry::Offset(pointer as u32)
        } else {
            SubEntry::Empty
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    slots: [SubEntry; SUBENTRIES],
}

impl IndexEntry {
    pub fn empty() -> Self {
        IndexEntry {
            slots: [SubEntry::Empty; SUBENTRIES],
        }
    }

    pub fn slots(&self) -> &[SubEntry; SUBENTRIES] {
        &self.slots
    }
}

/// The table of contents: `len()` entries of `SUBENTRIES` pointers each
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerTable {
    entries: Vec<IndexEntry>,
}

impl PointerTable {
    pub fn new(index_count: usize) -> Self {
        PointerTable {
            entries: vec![IndexEntry::empty(); index_count],
        }
    }

    /// Reads the table from a whole archive.
    ///
    /// The table length is not stored; it ends where the first image begins,
    /// which is the lowest positive pointer (or end of file if all slots are empty).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < KAO_FIRST_TOC_OFFSET {
            return Err(KaoError::MalformedArchive(format!(
                "Data too short for KAO file: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        seek_to(&mut cursor, KAO_FIRST_TOC_OFFSET as u64)
            .map_err(|e| KaoError::MalformedArchive(e.to_string()))?;

        let mut toc_end = data.len();
        let mut pointers = Vec::new();

        while cursor.position() as usize + SUBENTRY_LEN <= toc_end {
            let pointer = read_i32_le(&mut cursor)
                .map_err(|e| KaoError::MalformedArchive(e.to_string()))?;

            if pointer > 0 {
                let target = pointer as usize;
                if target < cursor.position() as usize || target >= data.len() {
                    return Err(KaoError::MalformedArchive(format!(
                        "pointer {:#x} at {:#x} is outside the payload region",
                        target,
                        cursor.position() - SUBENTRY_LEN as u64
                    )));
                }
                toc_end = toc_end.min(target);
            }

            pointers.push(pointer);
        }

        let toc_size = toc_end - KAO_FIRST_TOC_OFFSET;
        if cursor.position() as usize != toc_end || toc_size % KAO_ENTRY_SIZE != 0 {
            return Err(KaoError::MalformedArchive(format!(
                "table of contents size {} is not a multiple of {}",
                toc_size, KAO_ENTRY_SIZE
            )));
        }

        let entries: Vec<IndexEntry> = pointers
            .chunks_exact(SUBENTRIES)
            .map(|chunk| {
                let mut entry = IndexEntry::empty();
                for (slot, &pointer) in entry.slots.iter_mut().zip(chunk) {
                    *slot = SubEntry::from_pointer(pointer);
                }
                entry
            })
            .collect();

        debug!(
            entries = entries.len(),
            toc_end, "parsed KAO table of contents"
        );

        Ok(PointerTable { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Byte offset at which the payload region of a serialised table begins
    pub fn toc_end(&self) -> usize {
        KAO_FIRST_TOC_OFFSET + self.entries.len() * KAO_ENTRY_SIZE
    }

    pub fn in_range(&self, index: usize, subindex: usize) -> bool {
        index < self.entries.len() && subindex < SUBENTRIES
    }

    pub fn check_range(&self, index: usize, subindex: usize) -> Result<()> {
        if self.in_range(index, subindex) {
            Ok(())
        } else {
            Err(KaoError::OutOfRange {
                index,
                subindex,
                len: self.entries.len(),
                sub_entries: SUBENTRIES,
            })
        }
    }

    pub fn get_offset(&self, index: usize, subindex: usize) -> Result<Option<u32>> {
        self.check_range(index, subindex)?;
        Ok(match self.entries[index].slots[subindex] {
            SubEntry::Offset(offset) => Some(offset),
            SubEntry::Empty => None,
        })
    }

    pub fn set_offset(&mut self, index: usize, subindex: usize, offset: u32) -> Result<()> {
        self.check_range(index, subindex)?;
        self.entries[index].slots[subindex] = SubEntry::Offset(offset);
        Ok(())
    }

    /// Empties a slot. Out of range coordinates are ignored.
    /// Returns whether a populated slot was cleared.
    pub fn clear(&mut self, index: usize, subindex: usize) -> bool {
        let Some(slot) = self
            .entries
            .get_mut(index)
            .and_then(|entry| entry.slots.get_mut(subindex))
        else {
            return false;
        };
        let was_populated = matches!(slot, SubEntry::Offset(_));
        *slot = SubEntry::Empty;
        was_populated
    }

    /// Grows the table with empty entries. Never shrinks.
    pub fn expand(&mut self, new_index_count: usize) {
        if new_index_count > self.entries.len() {
            self.entries.resize(new_index_count, IndexEntry::empty());
        }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Writes the padding entry and the table.
    ///
    /// Empty slots are written as the negated offset where the next image
    /// starts, `payload_end` for slots after the last image.
    pub fn serialise(&self, payload_end: u32) -> Vec<u8> {
        let mut pointers = Vec::with_capacity(self.entries.len() * SUBENTRIES);
        let mut next_image = payload_end as i64;

        for slot in self.entries.iter().rev().flat_map(|e| e.slots.iter().rev()) {
            pointers.push(match *slot {
                SubEntry::Offset(offset) => {
                    next_image = offset as i64;
                    offset as i32
                }
                SubEntry::Empty => -(next_image as i32),
            });
        }

        let mut out = vec![0u8; KAO_FIRST_TOC_OFFSET];
        out.reserve(pointers.len() * SUBENTRY_LEN);
        for pointer in pointers.into_iter().rev() {
            write_i32_le(&mut out, pointer);
        }
        out
    }
}
