use std::cell::Cell;
use std::collections::HashMap;

use image::{Rgba, RgbaImage};
use pmd_kao::{At4pxCodec, Kao, KaoError, KaoImage, Palette, PortraitCodec, SUBENTRIES};

const FIX_IN_LEN: usize = 1154;

fn fixture_map() -> HashMap<usize, Vec<usize>> {
    HashMap::from([
        (0, vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 22, 24, 26, 32, 34]),
        (552, vec![0, 2, 4, 6, 8, 10]),
        (1153, vec![]),
    ])
}

/// A distinct 12 colour portrait per slot
fn portrait_for(idx: usize, sidx: usize) -> RgbaImage {
    let seed = (idx * 41 + sidx * 7) as u32;
    RgbaImage::from_fn(40, 40, |x, y| {
        let band = ((x + y + seed) / 7) % 12;
        let v = (band * 20 + seed % 13) as u8;
        Rgba([v, v.wrapping_mul(3), 255 - v, 255])
    })
}

fn foreign_portrait() -> RgbaImage {
    RgbaImage::from_fn(40, 40, |x, y| {
        if (x / 5 + y / 5) % 2 == 0 {
            Rgba([250, 200, 0, 255])
        } else {
            Rgba([0, 40, 80, 255])
        }
    })
}

fn fixture() -> Kao {
    let mut kao = Kao::new_empty(FIX_IN_LEN);
    for (idx, sidxs) in fixture_map() {
        for sidx in sidxs {
            kao.set_from_img(idx, sidx, &portrait_for(idx, sidx)).unwrap();
        }
    }
    Kao::from_bytes(kao.save().unwrap()).unwrap()
}

fn save_and_reload(kao: &Kao) -> Kao {
    Kao::from_bytes(kao.save().unwrap()).unwrap()
}

#[test]
fn get_returns_stored_pixels() {
    let kao = fixture();
    assert_eq!(kao.len(), FIX_IN_LEN);
    for (idx, sidxs) in fixture_map() {
        for sidx in sidxs {
            let portrait = kao.get(idx, sidx).unwrap().unwrap();
            assert!(portrait.size() > 0);
            assert_eq!(portrait.get(), portrait_for(idx, sidx));
        }
    }
}

#[test]
fn get_missing_and_out_of_range() {
    let kao = fixture();
    assert!(kao.get(552, 1).unwrap().is_none());
    assert!(matches!(kao.get(0, SUBENTRIES), Err(KaoError::OutOfRange { .. })));
    assert!(matches!(kao.get(FIX_IN_LEN, 0), Err(KaoError::OutOfRange { .. })));
}

#[test]
fn set_from_img_survives_reload() {
    let mut kao = fixture();
    let img = foreign_portrait();
    kao.set_from_img(552, 8, &img).unwrap();
    kao.set_from_img(1153, 4, &img).unwrap();

    let new_kao = save_and_reload(&kao);
    assert_ne!(new_kao.get(0, 2).unwrap().unwrap().get(), img);
    assert_eq!(new_kao.get(552, 8).unwrap().unwrap().get(), img);
    assert_ne!(new_kao.get(552, 4).unwrap().unwrap().get(), img);
    assert_eq!(new_kao.get(1153, 4).unwrap().unwrap().get(), img);
    assert!(new_kao.get(1153, 0).unwrap().is_none());
}

#[test]
fn delete_is_permissive_and_persists() {
    let mut kao = fixture();
    kao.delete(552, 4);
    kao.delete(1_232_132, 432_131);
    kao.delete(552, 1);

    let new_kao = save_and_reload(&kao);
    assert!(new_kao.get(0, 2).unwrap().is_some());
    assert!(new_kao.get(552, 8).unwrap().is_some());
    assert!(new_kao.get(0, 1).unwrap().is_none());
    assert!(new_kao.get(552, 0).unwrap().is_some());
    assert!(new_kao.get(552, 1).unwrap().is_none());
    assert!(new_kao.get(552, 2).unwrap().is_some());
    assert!(new_kao.get(552, 4).unwrap().is_none());
    assert!(new_kao.get(552, 6).unwrap().is_some());
    assert_eq!(new_kao.get(552, 6).unwrap().unwrap().get(), portrait_for(552, 6));
}

#[test]
fn delete_compacts_payload_storage() {
    let kao = fixture();
    let before = kao.save().unwrap().len();
    let mut kao = kao;
    let dropped = kao.get(552, 4).unwrap().unwrap().payload().len();
    kao.delete(552, 4);
    assert_eq!(kao.save().unwrap().len(), before - dropped);
}

#[test]
fn expand_adds_empty_entries() {
    let mut kao = fixture();
    assert!(kao.get(2000, 0).is_err());
    kao.expand(2001);
    kao.expand(10);

    let new_kao = save_and_reload(&kao);
    assert_eq!(new_kao.len(), 2001);
    assert!(matches!(new_kao.get(2001, 0), Err(KaoError::OutOfRange { .. })));
    for sidx in 0..SUBENTRIES {
        assert!(new_kao.get(2000, sidx).unwrap().is_none());
        assert!(new_kao.get(FIX_IN_LEN, sidx).unwrap().is_none());
    }
    assert_eq!(new_kao.get(552, 10).unwrap().unwrap().get(), portrait_for(552, 10));
}

#[test]
fn raw_passthrough_between_slots() {
    let mut kao = fixture();
    let original = kao.get(0, 2).unwrap().unwrap();
    let (compressed, palette) = original.raw();
    let portrait = KaoImage::create_from_raw(compressed, palette, kao.codec()).unwrap();
    assert_eq!(portrait.get(), original.get());

    kao.set(552, 8, &portrait).unwrap();
    kao.set(1153, 4, &portrait).unwrap();
    assert!(kao.set(1153, SUBENTRIES, &portrait).is_err());

    let new_kao = save_and_reload(&kao);
    assert_eq!(new_kao.get(0, 2).unwrap().unwrap().get(), portrait.get());
    assert_ne!(new_kao.get(0, 4).unwrap().unwrap().get(), portrait.get());
    assert_eq!(new_kao.get(552, 8).unwrap().unwrap().get(), portrait.get());
    assert_ne!(new_kao.get(552, 4).unwrap().unwrap().get(), portrait.get());
    assert_eq!(new_kao.get(1153, 4).unwrap().unwrap().raw(), portrait.raw());
    assert!(new_kao.get(1153, 0).unwrap().is_none());
}

#[test]
fn iterate_is_row_major_and_complete() {
    let kao = fixture();
    let map = fixture_map();
    let mut expected = (0usize, 0usize);
    let mut count = 0;

    for entry in &kao {
        let (idx, sidx, portrait) = entry.unwrap();
        assert_eq!((idx, sidx), expected);
        match map.get(&idx) {
            Some(sidxs) if sidxs.contains(&sidx) => {
                assert_eq!(portrait.unwrap().get(), portrait_for(idx, sidx));
            }
            Some(_) => assert!(portrait.is_none()),
            None => {}
        }
        expected = if sidx + 1 == SUBENTRIES { (idx + 1, 0) } else { (idx, sidx + 1) };
        count += 1;
    }
    assert_eq!(count, FIX_IN_LEN * SUBENTRIES);

    // A second traversal starts over from (0, 0)
    let first = kao.iter().next().unwrap().unwrap();
    assert_eq!((first.0, first.1), (0, 0));
}

#[test]
fn corrupt_payload_is_reported_on_access() {
    let kao = fixture();
    let mut bytes = kao.save().unwrap();
    let offset = kao_offset(&bytes, 552, 2);
    // Break the AT4PX magic of one portrait
    bytes[offset + 48] = b'X';

    let broken = Kao::from_bytes(bytes).unwrap();
    assert!(broken.get(552, 0).unwrap().is_some());
    assert!(matches!(broken.get(552, 2), Err(KaoError::CorruptPayload(_))));
    assert!(broken.iter().any(|entry| entry.is_err()));
}

#[test]
fn malformed_archive_is_rejected() {
    assert!(matches!(
        Kao::from_bytes(vec![0; 10]),
        Err(KaoError::MalformedArchive(_))
    ));
    let mut bytes = fixture().save().unwrap();
    let toc_end = 160 + FIX_IN_LEN * SUBENTRIES * 4;
    bytes.truncate(toc_end + 10);
    // All but the first portrait now point past the end of the file
    assert!(Kao::from_bytes(bytes).is_err());
}

#[test]
fn file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kaomado.kao");
    let kao = fixture();
    kao.save_to_file(&path).unwrap();
    let loaded = Kao::from_file(&path).unwrap();
    assert_eq!(loaded.populated().count(), kao.populated().count());
    assert_eq!(loaded.save().unwrap(), kao.save().unwrap());
}

struct CountingCodec {
    inner: At4pxCodec,
    encodes: Cell<usize>,
}

impl PortraitCodec for CountingCodec {
    fn payload_len(&self, data: &[u8]) -> pmd_kao::Result<usize> {
        self.inner.payload_len(data)
    }

    fn decode(&self, payload: &[u8]) -> pmd_kao::Result<(Vec<u8>, Palette)> {
        self.inner.decode(payload)
    }

    fn encode(&self, pixels: &[u8], palette: &Palette) -> pmd_kao::Result<Vec<u8>> {
        self.encodes.set(self.encodes.get() + 1);
        self.inner.encode(pixels, palette)
    }
}

#[test]
fn set_does_not_reencode() {
    let bytes = fixture().save().unwrap();
    let mut kao = Kao::from_bytes_with_codec(
        bytes,
        CountingCodec {
            inner: At4pxCodec::default(),
            encodes: Cell::new(0),
        },
    )
    .unwrap();

    let portrait = kao.get(0, 4).unwrap().unwrap();
    kao.set(1153, 1, &portrait).unwrap();
    assert_eq!(kao.codec().encodes.get(), 0);
    assert_eq!(kao.get(1153, 1).unwrap().unwrap().payload(), portrait.payload());

    kao.set_from_img(1153, 2, &foreign_portrait()).unwrap();
    assert_eq!(kao.codec().encodes.get(), 1);
}

/// Palette followed by one uncompressed index byte per pixel
struct PlainCodec;

const PLAIN_LEN: usize = 48 + 1600;

impl PortraitCodec for PlainCodec {
    fn payload_len(&self, data: &[u8]) -> pmd_kao::Result<usize> {
        if data.len() < PLAIN_LEN {
            return Err(KaoError::CorruptPayload(format!(
                "{} bytes left, a plain portrait needs {}",
                data.len(),
                PLAIN_LEN
            )));
        }
        Ok(PLAIN_LEN)
    }

    fn decode(&self, payload: &[u8]) -> pmd_kao::Result<(Vec<u8>, Palette)> {
        let mut palette = [[0u8; 3]; 16];
        for (colour, rgb) in palette.iter_mut().zip(payload[..48].chunks_exact(3)) {
            colour.copy_from_slice(rgb);
        }
        Ok((payload[48..].to_vec(), palette))
    }

    fn encode(&self, pixels: &[u8], palette: &Palette) -> pmd_kao::Result<Vec<u8>> {
        let mut payload: Vec<u8> = palette.iter().flatten().copied().collect();
        payload.extend_from_slice(pixels);
        Ok(payload)
    }
}

#[test]
fn archive_works_with_any_codec() {
    let mut kao = Kao::new_empty_with_codec(3, PlainCodec);
    kao.set_from_img(0, 0, &portrait_for(0, 0)).unwrap();
    kao.set_from_img(2, 39, &foreign_portrait()).unwrap();
    kao.set_from_img(1, 1, &portrait_for(1, 1)).unwrap();
    kao.delete(1, 1);

    let original = kao.get(2, 39).unwrap().unwrap();
    assert_eq!(original.get(), foreign_portrait());
    assert_eq!(original.size(), 1600);

    let (compressed, palette) = original.raw();
    let copy = KaoImage::create_from_raw(compressed, palette, kao.codec()).unwrap();
    assert!(KaoImage::create_from_raw(&compressed[1..], palette, kao.codec()).is_err());
    kao.set(1, 7, &copy).unwrap();

    let bytes = kao.save().unwrap();
    assert_eq!(bytes.len(), 160 + 3 * SUBENTRIES * 4 + 3 * PLAIN_LEN);

    let reloaded = Kao::from_bytes_with_codec(bytes, PlainCodec).unwrap();
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded.get(0, 0).unwrap().unwrap().get(), portrait_for(0, 0));
    assert!(reloaded.get(1, 1).unwrap().is_none());
    assert_eq!(reloaded.get(1, 7).unwrap().unwrap().raw(), original.raw());
    assert_eq!(reloaded.get(2, 39).unwrap().unwrap().get(), foreign_portrait());
    assert_eq!(reloaded.iter().filter(|e| matches!(e, Ok((_, _, Some(_))))).count(), 3);
}

fn kao_offset(bytes: &[u8], idx: usize, sidx: usize) -> usize {
    let pos = 160 + (idx * SUBENTRIES + sidx) * 4;
    i32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize
}
