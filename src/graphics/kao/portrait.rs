use std::hash::Hasher;

use image::{Rgba, RgbaImage};
use twox_hash::XxHash64;

use super::codec::PortraitCodec;
use super::{Palette, KAO_IMG_DIM, KAO_IMG_PAL_COLORS, KAO_IMG_PAL_SIZE, KAO_IMG_PIXELS};
use crate::error::{KaoError, Result};

/// A single portrait: its decoded pixels plus the exact payload it came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KaoImage {
    palette: Palette,
    pixels: Vec<u8>,
    // Palette bytes followed by the codec's compressed image
    payload: Vec<u8>,
}

impl KaoImage {
    /// Materialises the portrait stored at `offset` in the payload storage
    pub fn decode_from<C: PortraitCodec + ?Sized>(
        offset: usize,
        storage: &[u8],
        codec: &C,
    ) -> Result<Self> {
        let data = storage.get(offset..).ok_or_else(|| {
            KaoError::CorruptPayload(format!(
                "offset {:#x} is past the end of payload storage ({:#x})",
                offset,
                storage.len()
            ))
        })?;
        let len = codec.payload_len(data)?;
        let payload = data.get(..len).ok_or_else(|| {
            KaoError::CorruptPayload(format!(
                "portrait at {:#x} claims {} bytes, only {} left",
                offset,
                len,
                data.len()
            ))
        })?;
        Self::from_payload(payload.to_vec(), codec)
    }

    pub fn from_payload<C: PortraitCodec + ?Sized>(payload: Vec<u8>, codec: &C) -> Result<Self> {
        if payload.len() < KAO_IMG_PAL_SIZE {
            return Err(KaoError::CorruptPayload(format!(
                "payload is {} bytes, shorter than the palette",
                payload.len()
            )));
        }
        let (pixels, palette) = codec.decode(&payload)?;
        if pixels.len() != KAO_IMG_PIXELS {
            return Err(KaoError::CorruptPayload(format!(
                "portrait decoded to {} pixels, expected {}",
                pixels.len(),
                KAO_IMG_PIXELS
            )));
        }
        if let Some(&bad) = pixels.iter().find(|&&p| p as usize >= KAO_IMG_PAL_COLORS) {
            return Err(KaoError::CorruptPayload(format!(
                "palette index {} out of range",
                bad
            )));
        }
        Ok(KaoImage {
            palette,
            pixels,
            payload,
        })
    }

    /// Compresses row-major palette indices into a new portrait
    pub fn encode<C: PortraitCodec + ?Sized>(
        pixels: Vec<u8>,
        palette: Palette,
        codec: &C,
    ) -> Result<Self> {
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
        let payload = codec.encode(&pixels, &palette)?;
        if payload.len() < KAO_IMG_PAL_SIZE {
            return Err(KaoError::Compression(format!(
                "encoded payload is {} bytes, shorter than the palette",
                payload.len()
            )));
        }
        Ok(KaoImage {
            palette,
            pixels,
            payload,
        })
    }

    /// Builds a portrait from a 40x40 bitmap using at most 16 colours.
    ///
    /// Colours are assigned palette slots in order of first appearance, so the
    /// palette may be ordered differently from the image the bitmap was
    /// exported from. Alpha is ignored.
    pub fn from_rgba<C: PortraitCodec + ?Sized>(img: &RgbaImage, codec: &C) -> Result<Self> {
        if img.width() != KAO_IMG_DIM as u32 || img.height() != KAO_IMG_DIM as u32 {
            return Err(KaoError::InvalidDimensions {
                width: img.width(),
                height: img.height(),
                expected: KAO_IMG_DIM as u32,
            });
        }

        let mut colours: Vec<[u8; 3]> = Vec::with_capacity(KAO_IMG_PAL_COLORS);
        let mut pixels = Vec::with_capacity(KAO_IMG_DIM * KAO_IMG_DIM);

        for pixel in img.pixels() {
            let rgb = [pixel[0], pixel[1], pixel[2]];
            let idx = match colours.iter().position(|&c| c == rgb) {
                Some(idx) => idx,
                None => {
                    colours.push(rgb);
                    colours.len() - 1
                }
            };
            pixels.push(idx as u8);
        }

        if colours.len() > KAO_IMG_PAL_COLORS {
            return Err(KaoError::TooManyColours(colours.len()));
        }

        let mut palette = [[0u8; 3]; KAO_IMG_PAL_COLORS];
        palette[..colours.len()].copy_from_slice(&colours);

        Self::encode(pixels, palette, codec)
    }

    /// Rebuilds a portrait from the parts returned by [`KaoImage::raw`] without recompressing
    pub fn create_from_raw<C: PortraitCodec + ?Sized>(
        compressed: &[u8],
        palette: &[u8],
        codec: &C,
    ) -> Result<Self> {
        if palette.len() != KAO_IMG_PAL_SIZE {
            return Err(KaoError::CorruptPayload(format!(
                "palette must be {} bytes, got {}",
                KAO_IMG_PAL_SIZE,
                palette.len()
            )));
        }
        let mut payload = Vec::with_capacity(palette.len() + compressed.len());
        payload.extend_from_slice(palette);
        payload.extend_from_slice(compressed);

        // Reject trailing bytes so the payload stays exactly what gets stored
        let len = codec.payload_len(&payload)?;
        if len != payload.len() {
            return Err(KaoError::CorruptPayload(format!(
                "portrait framing covers {} of {} bytes",
                len,
                payload.len()
            )));
        }

        Self::from_payload(payload, codec)
    }

    /// The compressed image and palette bytes, exactly as stored
    pub fn raw(&self) -> (&[u8], &[u8]) {
        (
            &self.payload[KAO_IMG_PAL_SIZE..],
            &self.payload[..KAO_IMG_PAL_SIZE],
        )
    }

    /// Renders the portrait to RGBA
    pub fn get(&self) -> RgbaImage {
        let dim = KAO_IMG_DIM as u32;
        RgbaImage::from_fn(dim, dim, |x, y| {
            let colour_idx = self.pixels[y as usize * KAO_IMG_DIM + x as usize] as usize;
            let [r, g, b] = self.palette[colour_idx];
            Rgba([r, g, b, 255])
        })
    }

    /// Byte length of the compressed container
    pub fn size(&self) -> usize {
        self.payload.len() - KAO_IMG_PAL_SIZE
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Hash of the rendered colours; independent of palette order
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        for &colour_idx in &self.pixels {
            hasher.write(&self.palette[colour_idx as usize]);
        }
        hasher.finish()
    }
}
