//! Dominant-colour mask layer (`spec.md` §4.6 step 1, §6.1 step 3).
//!
//! The mask claims every pixel equal to the image's most common colour.
//! Claimed pixels are never visited by the palette/RGBA coder; the mask
//! bitmap itself is written as a run-length stream (run of "mask" pixels,
//! run of "not mask" pixels, alternating, starting with "not mask") through
//! the entropy coder.

use alloc::vec;
use alloc::vec::Vec;

use crate::bitstream::{BitReader, BitWriter};
use crate::entropy::{self, EntropyDecoder};
use crate::error::ReadError;
use crate::image::Image;
use crate::knobs::MaskKnobs;

/// Run lengths longer than this are split into multiple symbols so the
/// run-length alphabet stays small; a 255255 varint carries the remainder.
const RUN_BASE_SYMS: usize = 32;

/// A claimed-pixel bitmap plus the colour it represents.
#[derive(Clone, Debug)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub color: [u8; 4],
    bits: Vec<bool>,
}

impl Mask {
    #[inline]
    pub fn is_masked(&self, x: u32, y: u32) -> bool {
        self.bits[(y as usize * self.width as usize) + x as usize]
    }
}

/// Count the dominant colour in the image; ties broken by first occurrence
/// in raster order (keeps encode deterministic per `spec.md` §8.1 #6).
fn dominant_color(img: &Image) -> ([u8; 4], usize) {
    use alloc::collections::BTreeMap;
    let mut counts: BTreeMap<[u8; 4], usize> = BTreeMap::new();
    let mut order: Vec<[u8; 4]> = Vec::new();
    for y in 0..img.height {
        for x in 0..img.width {
            let c = img.get(x, y);
            let entry = counts.entry(c).or_insert_with(|| {
                order.push(c);
                0
            });
            *entry += 1;
        }
    }
    let mut best = order[0];
    let mut best_count = counts[&best];
    for c in order {
        let n = counts[&c];
        if n > best_count {
            best = c;
            best_count = n;
        }
    }
    (best, best_count)
}

/// Decide whether the mask layer should activate, and if so build it.
pub fn design_mask(img: &Image, knobs: &MaskKnobs) -> Option<Mask> {
    let (color, count) = dominant_color(img);
    let total = img.width as usize * img.height as usize;
    if total == 0 {
        return None;
    }
    let ratio = count as f32 / total as f32;
    if ratio < knobs.min_color_rat {
        return None;
    }
    let mut bits = vec![false; total];
    for y in 0..img.height {
        for x in 0..img.width {
            if img.get(x, y) == color {
                bits[(y as usize * img.width as usize) + x as usize] = true;
            }
        }
    }
    Some(Mask {
        width: img.width,
        height: img.height,
        color,
        bits,
    })
}

/// Write the mask body: colour, then an alternating run-length stream
/// starting with a (possibly zero) run of unmasked pixels.
pub fn write_mask(w: &mut BitWriter, mask: &Mask) {
    w.write_word(u32::from_le_bytes(mask.color));

    let mut runs: Vec<u32> = Vec::new();
    let mut cur_masked = false;
    let mut run_len: u32 = 0;
    for &b in &mask.bits {
        if b == cur_masked {
            run_len += 1;
        } else {
            runs.push(run_len);
            cur_masked = b;
            run_len = 1;
        }
    }
    runs.push(run_len);

    // Encode run lengths through the entropy coder: small runs as direct
    // symbols `0..RUN_BASE_SYMS-1`, longer runs as an escape plus a
    // 255255-coded remainder, mirroring the ZRLE escape shape used
    // elsewhere in the format.
    let mut symbols = Vec::with_capacity(runs.len());
    let mut extras = Vec::new();
    for &r in &runs {
        if (r as usize) < RUN_BASE_SYMS {
            symbols.push(r);
        } else {
            symbols.push(RUN_BASE_SYMS as u32);
            extras.push(r - RUN_BASE_SYMS as u32);
        }
    }
    w.write_9(runs.len() as u32);
    entropy::design_and_encode(w, &symbols, RUN_BASE_SYMS + 1);
    w.write_9(extras.len() as u32);
    for e in extras {
        w.write_255255(e);
    }
}

/// Read a mask body as written by [`write_mask`].
pub fn read_mask(r: &mut BitReader, width: u32, height: u32) -> Result<Mask, ReadError> {
    let color = r.read_word().to_le_bytes();
    let total = width as usize * height as usize;

    let run_count = r.read_9() as usize;
    let model = entropy::read_model(r, RUN_BASE_SYMS + 1);
    let mut dec = EntropyDecoder::new(&model);
    let mut symbols = Vec::with_capacity(run_count);
    for _ in 0..run_count {
        match dec.decode_one(r) {
            Some(s) => symbols.push(s),
            None => return Err(ReadError::MaskCodes),
        }
    }
    let extra_count = r.read_9() as usize;
    let mut extras = Vec::with_capacity(extra_count);
    for _ in 0..extra_count {
        extras.push(r.read_255255());
    }

    let mut bits = vec![false; total];
    let mut extra_iter = extras.into_iter();
    let mut cur_masked = false;
    let mut pos = 0usize;
    for s in symbols {
        let run = if (s as usize) < RUN_BASE_SYMS {
            s
        } else {
            RUN_BASE_SYMS as u32 + extra_iter.next().ok_or(ReadError::MaskDeci)?
        };
        let end = pos + run as usize;
        if end > total {
            return Err(ReadError::MaskDeci);
        }
        if cur_masked {
            for b in &mut bits[pos..end] {
                *b = true;
            }
        }
        pos = end;
        cur_masked = !cur_masked;
    }
    if pos != total {
        return Err(ReadError::MaskDeci);
    }

    Ok(Mask {
        width,
        height,
        color,
        bits,
    })
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
    fn dominant_color_found() {
        let img = make_image(4, 4, |x, y| if x == 0 && y == 0 { [1, 2, 3, 4] } else { [9, 9, 9, 255] });
        let (c, n) = dominant_color(&img);
        assert_eq!(c, [9, 9, 9, 255]);
        assert_eq!(n, 15);
    }

    #[test]
    fn mask_activates_above_threshold() {
        let img = make_image(10, 10, |_, _| [5, 5, 5, 255]);
        let knobs = Preset::Faster.knobs().mask;
        let mask = design_mask(&img, &knobs).unwrap();
        assert_eq!(mask.color, [5, 5, 5, 255]);
        for y in 0..10 {
            for x in 0..10 {
                assert!(mask.is_masked(x, y));
            }
        }
    }

    #[test]
    fn mask_skips_below_threshold() {
        let img = make_image(10, 10, |x, y| [(x * 25) as u8, (y * 25) as u8, 0, 255]);
        let knobs = Preset::Faster.knobs().mask;
        assert!(design_mask(&img, &knobs).is_none());
    }

    #[test]
    fn mask_bitmap_roundtrip() {
        let img = make_image(16, 16, |x, y| {
            if (x + y) % 5 == 0 {
                [0, 0, 0, 0]
            } else {
                [1, 2, 3, 4]
            }
        });
        let knobs = MaskKnobs {
            min_color_rat: 0.0,
            huff_thresh: 0.6,
        };
        let mask = design_mask(&img, &knobs).unwrap();
        let mut w = BitWriter::new();
        write_mask(&mut w, &mask);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let decoded = read_mask(&mut r, 16, 16).unwrap();
        assert_eq!(decoded.color, mask.color);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(decoded.is_masked(x, y), mask.is_masked(x, y));
            }
        }
    }
}
