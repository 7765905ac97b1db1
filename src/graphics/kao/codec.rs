//! Conversion between portrait payloads and indexed pixel grids.
//!
//! A payload is the 48 byte palette followed by an AT4PX container holding
//! 800 bytes of 4bpp pixel data, tiled as a 5x5 grid of 8x8 tiles.

use tracing::trace;

use super::{
    Palette, KAO_IMG_DIM, KAO_IMG_PACKED_SIZE, KAO_IMG_PAL_COLORS, KAO_IMG_PAL_SIZE,
    KAO_IMG_PIXELS, KAO_META_DIM, KAO_TILE_DIM,
};
use crate::containers::compression::at4px::At4pxContainer;
use crate::containers::CompressionContainer;
use crate::error::{KaoError, Result};
use crate::formats::px::PXCompLevel;

/// The compression algorithm behind portrait payloads.
///
/// A payload starts with the 48 byte palette; what follows belongs to the
/// codec. Decoding must be deterministic. Encoding only has to preserve pixel
/// colours: two encodings of the same image may differ byte for byte.
pub trait PortraitCodec {
    /// Length of the payload starting at `data[0]`; `data` may run past it.
    fn payload_len(&self, data: &[u8]) -> Result<usize>;

    /// Decodes an exact payload into row-major palette indices and the palette.
    fn decode(&self, payload: &[u8]) -> Result<(Vec<u8>, Palette)>;

    /// Encodes `KAO_IMG_PIXELS` row-major palette indices with their palette.
    fn encode(&self, pixels: &[u8], palette: &Palette) -> Result<Vec<u8>>;
}

/// PX compression wrapped in an AT4PX container, as the game stores portraits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct At4pxCodec {
    level: PXCompLevel,
    search_first: bool,
}

impl Default for At4pxCodec {
    fn default() -> Self {
        At4pxCodec::new(PXCompLevel::Level3, true)
    }
}

impl At4pxCodec {
    pub fn new(level: PXCompLevel, search_first: bool) -> Self {
        At4pxCodec {
            level,
            search_first,
        }
    }

    pub fn level(&self) -> PXCompLevel {
        self.level
    }

    pub fn search_first(&self) -> bool {
        self.search_first
    }
}

impl PortraitCodec for At4pxCodec {
    fn payload_len(&self, data: &[u8]) -> Result<usize> {
        if data.len() < KAO_IMG_PAL_SIZE {
            return Err(KaoError::CorruptPayload(
                "Data too short for portrait".to_string(),
            ));
        }
        let (container_size, _) =
            At4pxContainer::get_container_size_and_deserialise(&data[KAO_IMG_PAL_SIZE..])
                .map_err(|e| KaoError::CorruptPayload(format!("Failed to parse AT4PX container: {}", e)))?;
        Ok(KAO_IMG_PAL_SIZE + container_size)
    }

    fn decode(&self, payload: &[u8]) -> Result<(Vec<u8>, Palette)> {
        if payload.len() < KAO_IMG_PAL_SIZE {
            return Err(KaoError::CorruptPayload(format!(
                "payload is {} bytes, shorter than the palette",
                payload.len()
            )));
        }

        let palette = read_palette(&payload[..KAO_IMG_PAL_SIZE]);

        let (_, container) =
            At4pxContainer::get_container_size_and_deserialise(&payload[KAO_IMG_PAL_SIZE..])
                .map_err(|e| KaoError::CorruptPayload(format!("Failed to parse AT4PX container: {}", e)))?;

        let packed = container.decompress().map_err(KaoError::CorruptPayload)?;
        if packed.len() != KAO_IMG_PACKED_SIZE {
            return Err(KaoError::CorruptPayload(format!(
                "portrait decompressed to {} bytes, expected {}",
                packed.len(),
                KAO_IMG_PACKED_SIZE
            )));
        }

        Ok((untile_pixels(&packed), palette))
    }

    fn encode(&self, pixels: &[u8], palette: &Palette) -> Result<Vec<u8>> {
        if pixels.len() != KAO_IMG_PIXELS {
            return Err(KaoError::Compression(format!(
                "expected {} pixels, got {}",
                KAO_IMG_PIXELS,
                pixels.len()
            )));
        }
        if let Some(&bad) = pixels.iter().find(|&&p| p as usize >= KAO_IMG_PAL_COLORS) {
            return Err(KaoError::Compression(format!(
                "palette index {} out of range",
                bad
            )));
        }

        let packed = tile_pixels(pixels);
        let container = At4pxContainer::from_uncompressed(&packed, self.level, self.search_first)
            .map_err(KaoError::Compression)?;

        let mut payload = Vec::with_capacity(KAO_IMG_PAL_SIZE + container.container_length());
        payload.extend(palette.iter().flatten());
        payload.extend_from_slice(&container.to_bytes());

        trace!(
            level = ?self.level,
            bytes = payload.len(),
            "encoded portrait payload"
        );

        Ok(payload)
    }
}

fn read_palette(bytes: &[u8]) -> Palette {
    let mut palette = [[0u8; 3]; KAO_IMG_PAL_COLORS];
    for (colour, rgb) in palette.iter_mut().zip(bytes.chunks_exact(3)) {
        colour.copy_from_slice(rgb);
    }
    palette
}

/// Linear position inside the tiled stream -> (x, y) in the image
fn tiled_position(idx: usize) -> (usize, usize) {
    let pixels_per_tile = KAO_TILE_DIM * KAO_TILE_DIM;
    let tile_id = idx / pixels_per_tile;
    let idx_in_tile = idx % pixels_per_tile;

    let tile_x = (tile_id % KAO_META_DIM) * KAO_TILE_DIM;
    let tile_y = (tile_id / KAO_META_DIM) * KAO_TILE_DIM;

    (
        tile_x + idx_in_tile % KAO_TILE_DIM,
        tile_y + idx_in_tile / KAO_TILE_DIM,
    )
}

/// 4bpp tiled stream (low nibble first) to row-major indices
fn untile_pixels(packed: &[u8]) -> Vec<u8> {
    let mut pixels = vec![0u8; KAO_IMG_PIXELS];
    for (byte_idx, &byte) in packed.iter().enumerate() {
        for (i, colour_idx) in [byte & 0xF, (byte >> 4) & 0xF].into_iter().enumerate() {
            let (x, y) = tiled_position(byte_idx * 2 + i);
            pixels[y * KAO_IMG_DIM + x] = colour_idx;
        }
    }
    pixels
}

fn tile_pixels(pixels: &[u8]) -> Vec<u8> {
    let mut packed = vec![0u8; KAO_IMG_PACKED_SIZE];
    for (byte_idx, byte) in packed.iter_mut().enumerate() {
        let (x1, y1) = tiled_position(byte_idx * 2);
        let (x2, y2) = tiled_position(byte_idx * 2 + 1);
        *byte = (pixels[y1 * KAO_IMG_DIM + x1] & 0xF) | ((pixels[y2 * KAO_IMG_DIM + x2] & 0xF) << 4);
    }
    packed
}
