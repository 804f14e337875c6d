//! Small-palette and global-palette colour modes (`spec.md` §4.7).
//!
//! Small palette: at most 16 distinct colours, a single fast path when the
//! whole (unmasked) image is one colour, otherwise 2/4/8 pixels packed per
//! byte depending on how many index bits are needed, the packed byte plane
//! handed to the Mono writer. Global palette: at most 256 distinct colours,
//! a palette table plus a one-byte-per-pixel index plane, again via Mono.

use alloc::vec;
use alloc::vec::Vec;

use crate::bitstream::{BitReader, BitWriter};
use crate::error::ReadError;
use crate::image::Image;
use crate::knobs::PaletteKnobs;
use crate::mask::Mask;
use crate::mono::{self, MonoInput};

/// Small palette caps out at 16 colours (4-bit indices, packable 2/4/8 per
/// byte). Global palette caps out at 256 (one byte per index).
pub const SMALL_PALETTE_MAX: usize = 16;
pub const GLOBAL_PALETTE_MAX: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaletteMode {
    /// Not worth it: too many distinct colours.
    None,
    Small,
    Global,
}

/// Distinct unmasked colours in raster-first-seen order, capped at
/// `GLOBAL_PALETTE_MAX + 1` (stops counting once it's clear neither mode
/// will apply).
fn distinct_colors(img: &Image, mask: &Option<Mask>) -> Vec<[u8; 4]> {
    use alloc::collections::BTreeSet;
    let mut seen: BTreeSet<[u8; 4]> = BTreeSet::new();
    let mut order = Vec::new();
    'outer: for y in 0..img.height {
        for x in 0..img.width {
            if let Some(m) = mask {
                if m.is_masked(x, y) {
                    continue;
                }
            }
            let c = img.get(x, y);
            if seen.insert(c) {
                order.push(c);
                if order.len() > GLOBAL_PALETTE_MAX {
                    break 'outer;
                }
            }
        }
    }
    order
}

/// Decide which palette mode (if any) applies.
pub fn choose_mode(img: &Image, mask: &Option<Mask>) -> (PaletteMode, Vec<[u8; 4]>) {
    let colors = distinct_colors(img, mask);
    if colors.len() <= SMALL_PALETTE_MAX {
        (PaletteMode::Small, colors)
    } else if colors.len() <= GLOBAL_PALETTE_MAX {
        (PaletteMode::Global, colors)
    } else {
        (PaletteMode::None, colors)
    }
}

fn index_plane(img: &Image, mask: &Option<Mask>, palette: &[[u8; 4]]) -> Vec<u8> {
    use alloc::collections::BTreeMap;
    let mut lut: BTreeMap<[u8; 4], u8> = BTreeMap::new();
    for (i, &c) in palette.iter().enumerate() {
        lut.insert(c, i as u8);
    }
    let mut out = vec![0u8; img.width as usize * img.height as usize];
    for y in 0..img.height {
        for x in 0..img.width {
            if let Some(m) = mask {
                if m.is_masked(x, y) {
                    continue;
                }
            }
            let c = img.get(x, y);
            out[(y * img.width + x) as usize] = lut[&c];
        }
    }
    out
}

fn write_palette_table(w: &mut BitWriter, palette: &[[u8; 4]]) {
    w.write_9(palette.len() as u32);
    for &c in palette {
        w.write_word(u32::from_le_bytes(c));
    }
}

fn read_palette_table(r: &mut BitReader) -> Vec<[u8; 4]> {
    let n = r.read_9() as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(r.read_word().to_le_bytes());
    }
    out
}

/// Write the small-palette body: palette table, packing factor, then the
/// packed index bytes through the Mono writer.
pub fn write_small_palette(
    w: &mut BitWriter,
    img: &Image,
    mask: &Option<Mask>,
    palette: &[[u8; 4]],
    knobs: &PaletteKnobs,
) {
    write_palette_table(w, palette);

    if palette.len() <= 1 {
        // Every unmasked pixel is the same colour; nothing further to send.
        return;
    }

    let bits_per_index: u32 = if palette.len() <= 2 {
        1
    } else if palette.len() <= 4 {
        2
    } else {
        4
    };
    let per_byte = 8 / bits_per_index;
    w.write_bits(bits_per_index, 4);

    let indices = index_plane(img, mask, palette);
    let packed_width = (img.width + per_byte - 1) / per_byte;
    let mut packed = vec![0u8; packed_width as usize * img.height as usize];
    for y in 0..img.height {
        for x in 0..img.width {
            let idx = indices[(y * img.width + x) as usize];
            let slot = x / per_byte;
            let shift = (x % per_byte) * bits_per_index;
            packed[(y * packed_width + slot) as usize] |= idx << shift;
        }
    }

    // The packed plane has no mask of its own: masked source pixels pack as
    // index 0 but are harmless padding, not separately claimed here (the
    // RGBA/top-level driver already skips those positions on reconstruction
    // using the original mask).
    let input = MonoInput {
        width: packed_width,
        height: img.height,
        data: &packed,
        num_syms: 256,
        mask: &|_, _| false,
    };
    let tile_bits = mono::default_tile_bits(packed_width, img.height);
    mono::write_mono(w, &input, tile_bits, &mono_knobs(knobs), 0);
}

pub fn read_small_palette(
    r: &mut BitReader,
    width: u32,
    height: u32,
    knobs: &PaletteKnobs,
) -> Result<(Vec<[u8; 4]>, Vec<u8>), ReadError> {
    let palette = read_palette_table(r);
    if palette.is_empty() || palette.len() > SMALL_PALETTE_MAX {
        return Err(ReadError::BadPal);
    }
    if palette.len() == 1 {
        return Ok((palette, vec![0u8; width as usize * height as usize]));
    }

    let bits_per_index = r.read_bits(4);
    if bits_per_index == 0 || bits_per_index > 4 {
        return Err(ReadError::BadPal);
    }
    let per_byte = 8 / bits_per_index;
    let packed_width = (width + per_byte - 1) / per_byte;

    let (packed, _) = mono::read_mono(r, packed_width, height, 256, &|_, _| false, &mono_knobs(knobs), 0)?;

    let mask_bits = (1u8 << bits_per_index) - 1;
    let mut indices = vec![0u8; width as usize * height as usize];
    for y in 0..height {
        for x in 0..width {
            let slot = x / per_byte;
            let shift = (x % per_byte) * bits_per_index;
            let byte = packed[(y * packed_width + slot) as usize];
            indices[(y * width + x) as usize] = (byte >> shift) & mask_bits;
        }
    }
    Ok((palette, indices))
}

/// Write the global-palette body: palette table, then a one-byte-per-pixel
/// index plane through the Mono writer.
pub fn write_global_palette(w: &mut BitWriter, img: &Image, mask: &Option<Mask>, palette: &[[u8; 4]], knobs: &PaletteKnobs) {
    write_palette_table(w, palette);
    let indices = index_plane(img, mask, palette);
    let input = MonoInput {
        width: img.width,
        height: img.height,
        data: &indices,
        num_syms: palette.len().max(1),
        mask: &|_, _| false,
    };
    let tile_bits = mono::default_tile_bits(img.width, img.height);
    mono::write_mono(w, &input, tile_bits, &mono_knobs(knobs), 0);
}

pub fn read_global_palette(
    r: &mut BitReader,
    width: u32,
    height: u32,
    knobs: &PaletteKnobs,
) -> Result<(Vec<[u8; 4]>, Vec<u8>), ReadError> {
    let palette = read_palette_table(r);
    if palette.is_empty() || palette.len() > GLOBAL_PALETTE_MAX {
        return Err(ReadError::BadPal);
    }
    let (indices, _) = mono::read_mono(r, width, height, palette.len(), &|_, _| false, &mono_knobs(knobs), 0)?;
    for &i in &indices {
        if (i as usize) >= palette.len() {
            return Err(ReadError::BadPal);
        }
    }
    Ok((palette, indices))
}

fn mono_knobs(knobs: &PaletteKnobs) -> crate::knobs::MonoKnobs {
    crate::knobs::MonoKnobs {
        revisit_count: 0,
        lz_prematch_limit: if knobs.design.enable_lz { 8 } else { 0 },
        lz_inmatch_limit: if knobs.design.enable_lz { 8 } else { 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knobs::Preset;

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
    fn chooses_small_palette_for_two_colors() {
        let img = make_image(8, 8, |x, y| if (x + y) % 2 == 0 { [0, 0, 0, 255] } else { [255, 255, 255, 255] });
        let (mode, colors) = choose_mode(&img, &None);
        assert_eq!(mode, PaletteMode::Small);
        assert_eq!(colors.len(), 2);
    }

    #[test]
    fn chooses_global_palette_above_small_threshold() {
        let img = make_image(8, 8, |x, y| [x as u8, y as u8, 0, 255]);
        let (mode, colors) = choose_mode(&img, &None);
        assert_eq!(mode, PaletteMode::Global);
        assert_eq!(colors.len(), 64);
    }

    #[test]
    fn small_palette_checkerboard_roundtrip() {
        let img = make_image(64, 64, |x, y| if (x + y) % 2 == 0 { [10, 20, 30, 255] } else { [200, 210, 220, 255] });
        let (mode, palette) = choose_mode(&img, &None);
        assert_eq!(mode, PaletteMode::Small);
        let knobs = Preset::Faster.knobs().palette;

        let mut w = BitWriter::new();
        write_small_palette(&mut w, &img, &None, &palette, &knobs);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let (decoded_palette, indices) = read_small_palette(&mut r, 64, 64, &knobs).unwrap();
        assert_eq!(decoded_palette, palette);
        for y in 0..64u32 {
            for x in 0..64u32 {
                let expect = img.get(x, y);
                let idx = indices[(y * 64 + x) as usize];
                assert_eq!(decoded_palette[idx as usize], expect);
            }
        }
    }

    #[test]
    fn single_color_small_palette_fast_path() {
        let img = make_image(5, 5, |_, _| [7, 8, 9, 255]);
        let (mode, palette) = choose_mode(&img, &None);
        assert_eq!(mode, PaletteMode::Small);
        assert_eq!(palette.len(), 1);
        let knobs = Preset::Faster.knobs().palette;

        let mut w = BitWriter::new();
        write_small_palette(&mut w, &img, &None, &palette, &knobs);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let (decoded_palette, _indices) = read_small_palette(&mut r, 5, 5, &knobs).unwrap();
        assert_eq!(decoded_palette, palette);
    }

    #[test]
    fn global_palette_gradient_roundtrip() {
        let img = make_image(16, 16, |x, y| [x as u8 * 16, y as u8 * 16, 0, 255]);
        let (mode, palette) = choose_mode(&img, &None);
        assert_eq!(mode, PaletteMode::Global);
        let knobs = Preset::Faster.knobs().palette;

        let mut w = BitWriter::new();
        write_global_palette(&mut w, &img, &None, &palette, &knobs);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let (decoded_palette, indices) = read_global_palette(&mut r, 16, 16, &knobs).unwrap();
        assert_eq!(decoded_palette, palette);
        for y in 0..16u32 {
            for x in 0..16u32 {
                let expect = img.get(x, y);
                let idx = indices[(y * 16 + x) as usize];
                assert_eq!(decoded_palette[idx as usize], expect);
            }
        }
    }
}
