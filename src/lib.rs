//! GCIF - a lossless 32-bit RGBA image codec tuned for flat game artwork and
//! sprites (palettes, large flat runs, dominant background colours) rather
//! than photographic content.
//!
//! # Data format
//!
//! A GCIF stream is a sequence of 32-bit little-endian words:
//!
//! ```text
//! Word 0: magic ("GCIF")
//! Word 1: dims  (width-1 in the low 16 bits, height-1 in the high 16 bits)
//! Word 2: head_hash (HotRodHash of words 0..2, seeded with HEAD_SEED)
//! Word 3: fast_hash (HotRodHash of the body words, seeded with DATA_SEED)
//! Word 4: good_hash (reserved; always 0 on encode, never verified on decode)
//! Word 5..: body, a packed bitstream
//! ```
//!
//! The body starts with a one-bit mask flag and, if set, a dominant-colour
//! mask layer ([`mask`]); a 2-bit colour-mode selector then picks between a
//! small palette, a global palette ([`palette`]), or the general RGBA writer
//! ([`rgba`]). Every numeric field inside the body uses the bit-packed
//! primitives and variable-length integer forms in [`bitstream`]; repeated
//! structure (Huffman tables, entropy-coded symbol runs, chaos contexts,
//! tile filter maps) is built from [`huffman`], [`entropy`], and [`chaos`].
//!
//! Pixels are encoded top to bottom, left to right. Claimed regions (the
//! dominant-colour mask, 2-D LZ matches) are skipped entirely by the
//! pixel-level coders; everything else is filtered, chaos-binned, and
//! entropy-coded per [`filters`] and [`chaos`].
#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "logging")]
macro_rules! gcif_log {
    ($lvl:ident, $($arg:tt)+) => { log::$lvl!($($arg)+) };
}
#[cfg(not(feature = "logging"))]
macro_rules! gcif_log {
    ($lvl:ident, $($arg:tt)+) => {{}};
}

pub mod bitstream;
pub mod chaos;
pub mod entropy;
pub mod error;
pub mod filters;
pub mod hash;
pub mod huffman;
pub mod image;
pub mod knobs;
pub mod lz;
pub mod mask;
pub mod mono;
pub mod palette;
pub mod rgba;

pub use error::{ReadError, WriteError};
pub use image::Image;
pub use knobs::{Knobs, Preset};

use alloc::vec::Vec;

use bitstream::{BitReader, BitWriter};
use palette::PaletteMode;

/// `u32::from_le_bytes(*b"GCIF")`, the fixed magic at word 0.
const MAGIC: u32 = u32::from_le_bytes(*b"GCIF");

/// Minimum stream length: the 5-word header, even for an empty body.
const HEADER_WORDS: usize = 5;

/// Encode `img` to a GCIF word stream using `knobs` to parameterise the
/// mask/palette/RGBA layer choices and their filter/LZ search effort.
pub fn encode(img: &image::Image, knobs: &Knobs) -> Result<Vec<u32>, WriteError> {
    if !knobs.validate() {
        return Err(WriteError::BadParams);
    }
    if !img.dims_valid() {
        return Err(WriteError::BadDims);
    }

    gcif_log!(info, "gcif: encoding {}x{} image", img.width, img.height);

    let mask = mask::design_mask(img, &knobs.mask);
    gcif_log!(debug, "gcif: mask layer {}", if mask.is_some() { "active" } else { "inactive" });

    let mut w = BitWriter::new();
    w.write_bit(mask.is_some());
    if let Some(ref m) = mask {
        mask::write_mask(&mut w, m);
    }

    let (mode, palette) = palette::choose_mode(img, &mask);
    gcif_log!(debug, "gcif: colour mode = {:?} ({} colours)", mode, palette.len());
    match mode {
        PaletteMode::None => {
            w.write_bits(0, 2);
            rgba::write_rgba(&mut w, img, &mask, &knobs.rgba);
        }
        PaletteMode::Small => {
            w.write_bits(1, 2);
            palette::write_small_palette(&mut w, img, &mask, &palette, &knobs.palette);
        }
        PaletteMode::Global => {
            w.write_bits(2, 2);
            palette::write_global_palette(&mut w, img, &mask, &palette, &knobs.palette);
        }
    }

    let body = w.finish();

    let dims_word = (img.width - 1) | ((img.height - 1) << 16);
    let head_hash = hash::hash_words(hash::HEAD_SEED, &[MAGIC, dims_word]);
    let fast_hash = hash::hash_words(hash::DATA_SEED, &body);

    let mut out = Vec::with_capacity(HEADER_WORDS + body.len());
    out.push(MAGIC);
    out.push(dims_word);
    out.push(head_hash);
    out.push(fast_hash);
    out.push(0); // good_hash: reserved, never verified on decode (see DESIGN.md)
    out.extend_from_slice(&body);

    gcif_log!(info, "gcif: encoded to {} words ({} body)", out.len(), body.len());
    Ok(out)
}

/// Decode a GCIF word stream produced by [`encode`].
///
/// Decoding is fully self-describing: every structural choice the encoder
/// made (tile size, filter catalogue, LZ matches, entropy tables) is present
/// in the stream itself, so no knob set is required here.
pub fn decode(words: &[u32]) -> Result<image::Image, ReadError> {
    if words.len() < HEADER_WORDS {
        return Err(ReadError::BadHead);
    }

    let magic = words[0];
    let dims_word = words[1];
    let head_hash = words[2];
    let fast_hash = words[3];
    let _good_hash = words[4]; // reserved; not authenticated (see DESIGN.md)

    if magic != MAGIC {
        return Err(ReadError::BadHead);
    }
    if hash::hash_words(hash::HEAD_SEED, &[magic, dims_word]) != head_hash {
        return Err(ReadError::BadHead);
    }

    let width = (dims_word & 0xffff) + 1;
    let height = (dims_word >> 16) + 1;
    if width > image::MAX_DIMENSION || height > image::MAX_DIMENSION {
        return Err(ReadError::BadDims);
    }

    let body = &words[HEADER_WORDS..];
    if hash::hash_words(hash::DATA_SEED, body) != fast_hash {
        return Err(ReadError::BadData);
    }

    gcif_log!(info, "gcif: decoding {}x{} image", width, height);

    let mut r = BitReader::new(body);
    let has_mask = r.read_bit();
    let mask = if has_mask {
        Some(mask::read_mask(&mut r, width, height)?)
    } else {
        None
    };

    let default_knobs = Knobs::default();
    let mode = r.read_bits(2);
    let img = match mode {
        0 => rgba::read_rgba(&mut r, width, height, &mask, &default_knobs.rgba)?,
        1 => {
            let (palette, indices) = palette::read_small_palette(&mut r, width, height, &default_knobs.palette)?;
            rebuild_from_indices(width, height, &mask, &palette, &indices)
        }
        2 => {
            let (palette, indices) = palette::read_global_palette(&mut r, width, height, &default_knobs.palette)?;
            rebuild_from_indices(width, height, &mask, &palette, &indices)
        }
        _ => return Err(ReadError::BadData),
    };

    if r.is_eof() {
        return Err(ReadError::BadData);
    }

    Ok(img)
}

fn rebuild_from_indices(
    width: u32,
    height: u32,
    mask: &Option<mask::Mask>,
    palette: &[[u8; 4]],
    indices: &[u8],
) -> image::Image {
    let mut img = image::Image::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let color = if let Some(m) = mask {
                if m.is_masked(x, y) {
                    m.color
                } else {
                    palette[indices[(y * width + x) as usize] as usize]
                }
            } else {
                palette[indices[(y * width + x) as usize] as usize]
            };
            img.set(x, y, color);
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    fn make_image(w: u32, h: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> Image {
        let mut img = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                img.set(x, y, f(x, y));
            }
        }
        img
    }

    #[test]
    fn single_pixel_roundtrip() {
        let img = make_image(1, 1, |_, _| [0xff, 0x80, 0x40, 0xff]);
        let knobs = Knobs::default();
        let words = encode(&img, &knobs).unwrap();
        let decoded = decode(&words).unwrap();
        assert_eq!(decoded.get(0, 0), [0xff, 0x80, 0x40, 0xff]);
    }

    #[test]
    fn solid_transparent_roundtrip() {
        let img = Image::from_pixels(16, 16, alloc::vec![0u8; 16 * 16 * 4]);
        let knobs = Knobs::default();
        let words = encode(&img, &knobs).unwrap();
        let decoded = decode(&words).unwrap();
        for y in 0..16u32 {
            for x in 0..16u32 {
                assert_eq!(decoded.get(x, y), [0, 0, 0, 0]);
            }
        }
    }

    #[test]
    fn gradient_roundtrips_across_presets() {
        let img = make_image(64, 64, |x, y| [x as u8, y as u8, (x ^ y) as u8, 255]);
        for preset in [Preset::Faster, Preset::Better, Preset::Harder, Preset::Stronger] {
            let knobs = preset.knobs();
            let words = encode(&img, &knobs).unwrap();
            let decoded = decode(&words).unwrap();
            for y in 0..64u32 {
                for x in 0..64u32 {
                    assert_eq!(decoded.get(x, y), img.get(x, y), "preset {:?} mismatch at ({},{})", preset, x, y);
                }
            }
        }
    }

    #[test]
    fn checkerboard_small_palette_roundtrip() {
        let img = make_image(64, 64, |x, y| if (x + y) % 2 == 0 { [0, 0, 0, 255] } else { [255, 255, 255, 255] });
        let knobs = Knobs::default();
        let words = encode(&img, &knobs).unwrap();
        let decoded = decode(&words).unwrap();
        for y in 0..64u32 {
            for x in 0..64u32 {
                assert_eq!(decoded.get(x, y), img.get(x, y));
            }
        }
    }

    #[test]
    fn duplicated_rectangle_roundtrip_lz_enabled_and_disabled() {
        let img = make_image(128, 128, |x, y| {
            let bx = x % 64;
            [(bx * 3) as u8, (y * 2) as u8, (bx ^ y) as u8, 255]
        });
        for preset in [Preset::Faster, Preset::Stronger] {
            let knobs = preset.knobs();
            let words = encode(&img, &knobs).unwrap();
            let decoded = decode(&words).unwrap();
            for y in 0..128u32 {
                for x in 0..128u32 {
                    assert_eq!(decoded.get(x, y), img.get(x, y));
                }
            }
        }
    }

    #[test]
    fn corrupted_last_word_is_rejected() {
        let img = make_image(8, 8, |x, y| [x as u8, y as u8, 0, 255]);
        let knobs = Knobs::default();
        let mut words = encode(&img, &knobs).unwrap();
        let last = words.len() - 1;
        words[last] ^= 1;
        assert_eq!(decode(&words), Err(ReadError::BadData));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let img = make_image(4, 4, |_, _| [1, 2, 3, 4]);
        let knobs = Knobs::default();
        let mut words = encode(&img, &knobs).unwrap();
        words[0] = 0xdead_beef;
        assert_eq!(decode(&words), Err(ReadError::BadHead));
    }

    #[test]
    fn invalid_knobs_rejected_before_encoding() {
        let img = make_image(2, 2, |_, _| [0, 0, 0, 0]);
        let mut knobs = Knobs::default();
        knobs.mask.min_color_rat = 5.0;
        assert_eq!(encode(&img, &knobs), Err(WriteError::BadParams));
    }
}
