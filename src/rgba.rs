//! RGBA pixel-stream writer/reader (`spec.md` §4.6), the top-level per-pixel
//! coding loop once the mask and palette layers have claimed what they can.
//!
//! Per unmasked, non-LZ-claimed pixel: predict each of R/G/B from its causal
//! neighbourhood using the tile's chosen spatial filter, decorrelate the
//! residual triple with the tile's chosen colour filter into (y, u, v), then
//! chaos-bin and entropy-code each of the three planes independently. Alpha
//! is delegated to the Mono writer as its own byte plane.

use alloc::vec;
use alloc::vec::Vec;

use crate::bitstream::{BitReader, BitWriter};
use crate::chaos::ChaosContext;
use crate::entropy::{self, EntropyDecoder};
use crate::error::ReadError;
use crate::filters::{self, ColorFilter, Neighborhood, CF_COUNT, SF_FIXED_COUNT, TAP_CANDIDATES};
use crate::image::{Image, TileGrid};
use crate::knobs::RgbaKnobs;
use crate::lz::{self, Match};
use crate::mono::{self, MonoInput};

/// `true` wherever the mask layer already owns the pixel.
fn mask_predicate<'a>(mask: &'a Option<crate::mask::Mask>) -> impl Fn(u32, u32) -> bool + 'a {
    move |x, y| match mask {
        Some(m) => m.is_masked(x, y),
        None => false,
    }
}

fn rgb_key(c: [u8; 4]) -> u32 {
    (u32::from(c[0]) << 16) | (u32::from(c[1]) << 8) | u32::from(c[2])
}

/// Write the RGBA body for every pixel the mask didn't already claim.
pub fn write_rgba(w: &mut BitWriter, img: &Image, mask: &Option<crate::mask::Mask>, knobs: &RgbaKnobs) {
    let is_masked = mask_predicate(mask);

    // --- LZ pass over the RGB plane --------------------------------------
    let enable_lz = knobs.design.enable_lz && knobs.lz_inmatch_limit > 0;
    let sample = |x: u32, y: u32| rgb_key(img.get(x, y));
    let matches = lz::find_matches(img.width, img.height, sample, &is_masked, enable_lz);
    write_match_list(w, &matches);
    let lz_claimed = claim_grid(img.width, img.height, &matches);
    let is_claimed = |x: u32, y: u32| is_masked(x, y) || lz_claimed[(y * img.width + x) as usize];

    // --- Tapped filter discovery ------------------------------------------
    let tapped = discover_tapped_filter(img, &is_claimed);
    w.write_bit(tapped.is_some());
    let sf_count = if let Some(f) = tapped {
        let idx = TAP_CANDIDATES.iter().position(|c| same_filter(c, &f)).unwrap();
        w.write_bits(idx as u32, 4);
        SF_FIXED_COUNT + 1
    } else {
        SF_FIXED_COUNT
    };

    let tile_bits = default_tile_bits(img.width, img.height);
    w.write_bits(tile_bits, 4);
    let grid = TileGrid::new(img.width, img.height, tile_bits);

    let mut sf = vec![0u8; grid.tile_count()];
    let mut cf = vec![0u8; grid.tile_count()];
    for t in 0..grid.tile_count() {
        let (s, c) = choose_tile_filters(img, &grid, t, sf_count, tapped, &is_claimed);
        sf[t] = s;
        cf[t] = c;
    }
    write_filter_map(w, &sf, &grid, knobs);
    write_filter_map(w, &cf, &grid, knobs);

    let chaos_levels = choose_chaos_levels(img, &grid, &sf, &cf, tapped, &is_claimed);
    w.write_bits(chaos_levels - 1, 4);

    encode_planes(w, img, &grid, &sf, &cf, tapped, &is_claimed, chaos_levels);

    // --- Alpha plane --------------------------------------------------
    let has_alpha = (0..img.height).any(|y| (0..img.width).any(|x| img.get(x, y)[3] != 255));
    w.write_bit(has_alpha);
    if has_alpha {
        let alpha: Vec<u8> = (0..img.height)
            .flat_map(|y| (0..img.width).map(move |x| (x, y)))
            .map(|(x, y)| img.get(x, y)[3])
            .collect();
        let input = MonoInput {
            width: img.width,
            height: img.height,
            data: &alpha,
            num_syms: 256,
            mask: &is_masked,
        };
        let alpha_tile_bits = mono::default_tile_bits(img.width, img.height);
        let mono_knobs = crate::knobs::MonoKnobs {
            revisit_count: knobs.revisit_count,
            lz_prematch_limit: knobs.lz_prematch_limit,
            lz_inmatch_limit: knobs.lz_inmatch_limit,
        };
        mono::write_mono(w, &input, alpha_tile_bits, &mono_knobs, 0);
    }
}

pub fn read_rgba(
    r: &mut BitReader,
    width: u32,
    height: u32,
    mask: &Option<crate::mask::Mask>,
    knobs: &RgbaKnobs,
) -> Result<Image, ReadError> {
    let is_masked = mask_predicate(mask);

    let matches = read_match_list(r)?;
    for m in &matches {
        if !m.geometry_valid(width, height) {
            return Err(ReadError::LzBad);
        }
    }
    let lz_claimed = claim_grid(width, height, &matches);
    let is_claimed = |x: u32, y: u32| is_masked(x, y) || lz_claimed[(y * width + x) as usize];

    let has_tapped = r.read_bit();
    let (tapped, sf_count) = if has_tapped {
        let idx = r.read_bits(4) as usize;
        if idx >= TAP_CANDIDATES.len() {
            return Err(ReadError::BadRgba);
        }
        (Some(TAP_CANDIDATES[idx]), SF_FIXED_COUNT + 1)
    } else {
        (None, SF_FIXED_COUNT)
    };

    let tile_bits = r.read_bits(4);
    let grid = TileGrid::new(width, height, tile_bits);

    let sf = read_filter_map(r, &grid, sf_count, knobs)?;
    let cf = read_filter_map(r, &grid, CF_COUNT, knobs)?;

    let chaos_levels = r.read_bits(4) + 1;

    let mut img = Image::new(width, height);
    if let Some(m) = mask {
        for y in 0..height {
            for x in 0..width {
                if m.is_masked(x, y) {
                    img.set(x, y, m.color);
                }
            }
        }
    }

    decode_planes(r, &mut img, &grid, &sf, &cf, tapped, &matches, &is_claimed, chaos_levels)?;

    let has_alpha = r.read_bit();
    if has_alpha {
        let mono_knobs = crate::knobs::MonoKnobs {
            revisit_count: knobs.revisit_count,
            lz_prematch_limit: knobs.lz_prematch_limit,
            lz_inmatch_limit: knobs.lz_inmatch_limit,
        };
        let (alpha, _) = mono::read_mono(r, width, height, 256, &is_masked, &mono_knobs, 0)?;
        for y in 0..height {
            for x in 0..width {
                if is_masked(x, y) {
                    continue; // alpha already set from the mask colour above
                }
                let mut c = img.get(x, y);
                c[3] = alpha[(y * width + x) as usize];
                img.set(x, y, c);
            }
        }
    } else {
        for y in 0..height {
            for x in 0..width {
                if is_masked(x, y) {
                    continue;
                }
                let mut c = img.get(x, y);
                c[3] = 255;
                img.set(x, y, c);
            }
        }
    }

    Ok(img)
}

fn same_filter(a: &filters::TappedFilter, b: &filters::TappedFilter) -> bool {
    a.taps == b.taps && a.shift == b.shift
}

fn default_tile_bits(width: u32, height: u32) -> u32 {
    mono::default_tile_bits(width, height)
}

fn claim_grid(width: u32, height: u32, matches: &[Match]) -> Vec<bool> {
    let mut claimed = vec![false; width as usize * height as usize];
    for m in matches {
        for y in m.dy..m.dy + m.h {
            for x in m.dx..m.dx + m.w {
                claimed[(y * width + x) as usize] = true;
            }
        }
    }
    claimed
}

fn write_match_list(w: &mut BitWriter, matches: &[Match]) {
    w.write_9(matches.len() as u32);
    for m in matches {
        w.write_9(m.sx);
        w.write_9(m.sy);
        w.write_9(m.dx);
        w.write_9(m.dy);
        w.write_9(m.w - lz::ZONEW);
        w.write_9(m.h - lz::ZONEH);
    }
}

fn read_match_list(r: &mut BitReader) -> Result<Vec<Match>, ReadError> {
    let n = r.read_9() as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let sx = r.read_9();
        let sy = r.read_9();
        let dx = r.read_9();
        let dy = r.read_9();
        let w = r.read_9() + lz::ZONEW;
        let h = r.read_9() + lz::ZONEH;
        out.push(Match { sx, sy, dx, dy, w, h });
    }
    Ok(out)
}

/// Try every tap candidate over the whole (unclaimed) image and keep the one
/// with lowest total residual cost, if it beats the best fixed filter.
fn discover_tapped_filter(img: &Image, is_claimed: &impl Fn(u32, u32) -> bool) -> Option<filters::TappedFilter> {
    let cost_of = |predict: &dyn Fn(Neighborhood) -> u8| -> u64 {
        let mut cost = 0u64;
        for y in 0..img.height {
            for x in 0..img.width {
                if is_claimed(x, y) {
                    continue;
                }
                let c = img.get(x, y);
                for ch in 0..3 {
                    let n = channel_neighborhood(img, is_claimed, x, y, ch);
                    let pred = predict(n);
                    cost += u64::from(c[ch].wrapping_sub(pred).min(pred.wrapping_sub(c[ch])));
                }
            }
        }
        cost
    };

    let best_fixed = (0..SF_FIXED_COUNT)
        .map(|i| cost_of(&|n| filters::predict_fixed(i, n)))
        .min()
        .unwrap_or(u64::MAX);

    let mut best: Option<(usize, u64)> = None;
    for (i, cand) in TAP_CANDIDATES.iter().enumerate() {
        let cost = cost_of(&|n| cand.predict(n));
        let better = match best {
            None => true,
            Some((_, b)) => cost < b,
        };
        if better {
            best = Some((i, cost));
        }
    }

    match best {
        Some((i, cost)) if cost < best_fixed => Some(TAP_CANDIDATES[i]),
        _ => None,
    }
}

fn channel_neighborhood(img: &Image, is_claimed: &impl Fn(u32, u32) -> bool, x: u32, y: u32, ch: usize) -> Neighborhood {
    let at = |dx: i64, dy: i64| -> u8 {
        let (nx, ny) = (x as i64 + dx, y as i64 + dy);
        if nx < 0 || ny < 0 || nx as u32 >= img.width || ny as u32 >= img.height {
            return 0;
        }
        let (nx, ny) = (nx as u32, ny as u32);
        let _ = is_claimed;
        img.get(nx, ny)[ch]
    };
    Neighborhood {
        a: at(-1, 0),
        b: at(0, -1),
        c: at(-1, -1),
        d: at(1, -1),
    }
}

fn predict_channel(idx: u8, tapped: Option<filters::TappedFilter>, n: Neighborhood) -> u8 {
    let idx = idx as usize;
    if idx < SF_FIXED_COUNT {
        filters::predict_fixed(idx, n)
    } else {
        tapped.expect("tapped filter index without a discovered filter").predict(n)
    }
}

fn choose_tile_filters(
    img: &Image,
    grid: &TileGrid,
    tile: usize,
    sf_count: usize,
    tapped: Option<filters::TappedFilter>,
    is_claimed: &impl Fn(u32, u32) -> bool,
) -> (u8, u8) {
    let (x0, y0, x1, y1) = grid.tile_bounds(tile);

    let mut best_sf = 0u8;
    let mut best_sf_cost = u64::MAX;
    for f in 0..sf_count {
        let mut cost = 0u64;
        for y in y0..y1 {
            for x in x0..x1 {
                if is_claimed(x, y) {
                    continue;
                }
                let c = img.get(x, y);
                for ch in 0..3 {
                    let n = channel_neighborhood(img, is_claimed, x, y, ch);
                    let pred = predict_channel(f as u8, tapped, n);
                    cost += u64::from(c[ch].wrapping_sub(pred).min(pred.wrapping_sub(c[ch])));
                }
            }
        }
        if cost < best_sf_cost {
            best_sf_cost = cost;
            best_sf = f as u8;
        }
    }

    let mut best_cf = 0u8;
    let mut best_cf_cost = u64::MAX;
    for f in 0..CF_COUNT {
        let cf = ColorFilter::from_index(f);
        let mut cost = 0u64;
        for y in y0..y1 {
            for x in x0..x1 {
                if is_claimed(x, y) {
                    continue;
                }
                let c = img.get(x, y);
                let nr = channel_neighborhood(img, is_claimed, x, y, 0);
                let ng = channel_neighborhood(img, is_claimed, x, y, 1);
                let nb = channel_neighborhood(img, is_claimed, x, y, 2);
                let pr = predict_channel(best_sf, tapped, nr);
                let pg = predict_channel(best_sf, tapped, ng);
                let pb = predict_channel(best_sf, tapped, nb);
                let (resr, resg, resb) = (c[0].wrapping_sub(pr), c[1].wrapping_sub(pg), c[2].wrapping_sub(pb));
                let (y_, u_, v_) = cf.forward(resr, resg, resb);
                cost += u64::from(y_.min(255 - y_)) + u64::from(u_.min(255 - u_)) + u64::from(v_.min(255 - v_));
            }
        }
        if cost < best_cf_cost {
            best_cf_cost = cost;
            best_cf = f as u8;
        }
    }

    (best_sf, best_cf)
}

fn write_filter_map(w: &mut BitWriter, values: &[u8], grid: &TileGrid, knobs: &RgbaKnobs) {
    let data = values.to_vec();
    let input = MonoInput {
        width: grid.tiles_x,
        height: grid.tiles_y,
        data: &data,
        num_syms: 256,
        mask: &|_, _| false,
    };
    let tile_bits = mono::default_tile_bits(grid.tiles_x, grid.tiles_y);
    let mono_knobs = crate::knobs::MonoKnobs {
        revisit_count: knobs.revisit_count,
        lz_prematch_limit: 0,
        lz_inmatch_limit: 0,
    };
    mono::write_mono(w, &input, tile_bits, &mono_knobs, 0);
}

fn read_filter_map(r: &mut BitReader, grid: &TileGrid, max_value: usize, knobs: &RgbaKnobs) -> Result<Vec<u8>, ReadError> {
    let mono_knobs = crate::knobs::MonoKnobs {
        revisit_count: knobs.revisit_count,
        lz_prematch_limit: 0,
        lz_inmatch_limit: 0,
    };
    let (values, _) = mono::read_mono(r, grid.tiles_x, grid.tiles_y, 256, &|_, _| false, &mono_knobs, 0)?;
    if values.len() != grid.tile_count() {
        return Err(ReadError::BadRgba);
    }
    for &v in &values {
        if v as usize >= max_value {
            return Err(ReadError::BadRgba);
        }
    }
    Ok(values)
}

fn residual_for(
    img: &Image,
    grid: &TileGrid,
    sf: &[u8],
    cf: &[u8],
    tapped: Option<filters::TappedFilter>,
    is_claimed: &impl Fn(u32, u32) -> bool,
    x: u32,
    y: u32,
) -> (u8, u8, u8) {
    let tile = grid.tile_index_of(x, y);
    let c = img.get(x, y);
    let nr = channel_neighborhood(img, is_claimed, x, y, 0);
    let ng = channel_neighborhood(img, is_claimed, x, y, 1);
    let nb = channel_neighborhood(img, is_claimed, x, y, 2);
    let pr = predict_channel(sf[tile], tapped, nr);
    let pg = predict_channel(sf[tile], tapped, ng);
    let pb = predict_channel(sf[tile], tapped, nb);
    let (resr, resg, resb) = (c[0].wrapping_sub(pr), c[1].wrapping_sub(pg), c[2].wrapping_sub(pb));
    ColorFilter::from_index(cf[tile] as usize).forward(resr, resg, resb)
}

fn choose_chaos_levels(
    img: &Image,
    grid: &TileGrid,
    sf: &[u8],
    cf: &[u8],
    tapped: Option<filters::TappedFilter>,
    is_claimed: &impl Fn(u32, u32) -> bool,
) -> u32 {
    let mut best_levels = 1u32;
    let mut best_cost = u64::MAX;
    for &levels in &[1u32, 2, 4, 8, 16] {
        let mut ctx_y = ChaosContext::new(img.width as usize, levels);
        ctx_y.start_image();
        let mut cost = 0u64;
        for y in 0..img.height {
            ctx_y.start_row();
            for x in 0..img.width {
                if is_claimed(x, y) {
                    ctx_y.set_tranquil(x as usize);
                    continue;
                }
                let (yy, _, _) = residual_for(img, grid, sf, cf, tapped, is_claimed, x, y);
                let _ = ctx_y.bin_at(x as usize);
                cost += u64::from(yy.min(255 - yy)) + 1;
                ctx_y.set_residual(x as usize, yy);
            }
        }
        if cost < best_cost {
            best_cost = cost;
            best_levels = levels;
        }
    }
    best_levels
}

#[allow(clippy::too_many_arguments)]
fn encode_planes(
    w: &mut BitWriter,
    img: &Image,
    grid: &TileGrid,
    sf: &[u8],
    cf: &[u8],
    tapped: Option<filters::TappedFilter>,
    is_claimed: &impl Fn(u32, u32) -> bool,
    chaos_levels: u32,
) {
    let mut ctx = ChaosContext::new(img.width as usize, chaos_levels);
    ctx.start_image();
    let mut y_bins: Vec<Vec<u32>> = vec![Vec::new(); chaos_levels as usize];
    let mut u_bins: Vec<Vec<u32>> = vec![Vec::new(); chaos_levels as usize];
    let mut v_bins: Vec<Vec<u32>> = vec![Vec::new(); chaos_levels as usize];

    for y in 0..img.height {
        ctx.start_row();
        for x in 0..img.width {
            if is_claimed(x, y) {
                ctx.set_tranquil(x as usize);
                continue;
            }
            let bin = ctx.bin_at(x as usize);
            let (yy, uu, vv) = residual_for(img, grid, sf, cf, tapped, is_claimed, x, y);
            y_bins[bin].push(u32::from(yy));
            u_bins[bin].push(u32::from(uu));
            v_bins[bin].push(u32::from(vv));
            ctx.set_residual(x as usize, yy);
        }
    }

    for bins in [&y_bins, &u_bins, &v_bins] {
        for symbols in bins {
            entropy::design_and_encode(w, symbols, 256);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_planes(
    r: &mut BitReader,
    img: &mut Image,
    grid: &TileGrid,
    sf: &[u8],
    cf: &[u8],
    tapped: Option<filters::TappedFilter>,
    matches: &[Match],
    is_claimed: &impl Fn(u32, u32) -> bool,
    chaos_levels: u32,
) -> Result<(), ReadError> {
    let mut y_models = Vec::with_capacity(chaos_levels as usize);
    let mut u_models = Vec::with_capacity(chaos_levels as usize);
    let mut v_models = Vec::with_capacity(chaos_levels as usize);
    for _ in 0..chaos_levels {
        y_models.push(entropy::read_model(r, 256));
    }
    for _ in 0..chaos_levels {
        u_models.push(entropy::read_model(r, 256));
    }
    for _ in 0..chaos_levels {
        v_models.push(entropy::read_model(r, 256));
    }
    let mut y_dec: Vec<EntropyDecoder> = y_models.iter().map(EntropyDecoder::new).collect();
    let mut u_dec: Vec<EntropyDecoder> = u_models.iter().map(EntropyDecoder::new).collect();
    let mut v_dec: Vec<EntropyDecoder> = v_models.iter().map(EntropyDecoder::new).collect();

    let mut ctx = ChaosContext::new(img.width as usize, chaos_levels);
    ctx.start_image();

    for y in 0..img.height {
        ctx.start_row();
        for x in 0..img.width {
            if is_claimed(x, y) {
                ctx.set_tranquil(x as usize);
                if let Some(m) = matches.iter().find(|m| x >= m.dx && x < m.dx + m.w && y >= m.dy && y < m.dy + m.h) {
                    let sx = m.sx + (x - m.dx);
                    let sy = m.sy + (y - m.dy);
                    let mut src = img.get(sx, sy);
                    src[3] = 255;
                    img.set(x, y, src);
                }
                continue;
            }
            let tile = grid.tile_index_of(x, y);
            let bin = ctx.bin_at(x as usize);
            let yy = y_dec[bin].decode_one(r).ok_or(ReadError::BadRgba)? as u8;
            let uu = u_dec[bin].decode_one(r).ok_or(ReadError::BadRgba)? as u8;
            let vv = v_dec[bin].decode_one(r).ok_or(ReadError::BadRgba)? as u8;
            let (resr, resg, resb) = ColorFilter::from_index(cf[tile] as usize).inverse(yy, uu, vv);

            let nr = channel_neighborhood(img, is_claimed, x, y, 0);
            let ng = channel_neighborhood(img, is_claimed, x, y, 1);
            let nb = channel_neighborhood(img, is_claimed, x, y, 2);
            let pr = predict_channel(sf[tile], tapped, nr);
            let pg = predict_channel(sf[tile], tapped, ng);
            let pb = predict_channel(sf[tile], tapped, nb);

            img.set(x, y, [pr.wrapping_add(resr), pg.wrapping_add(resg), pb.wrapping_add(resb), 255]);
            ctx.set_residual(x as usize, yy);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knobs::Preset;

    #[test]
    fn gradient_roundtrip_no_mask() {
        let mut img = Image::new(32, 32);
        for y in 0..32u32 {
            for x in 0..32u32 {
                img.set(x, y, [x as u8 * 8, y as u8 * 8, (x ^ y) as u8, 255]);
            }
        }
        let knobs = Preset::Faster.knobs().rgba;
        let mut w = BitWriter::new();
        write_rgba(&mut w, &img, &None, &knobs);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let decoded = read_rgba(&mut r, 32, 32, &None, &knobs).unwrap();
        for y in 0..32u32 {
            for x in 0..32u32 {
                assert_eq!(decoded.get(x, y), img.get(x, y));
            }
        }
    }

    #[test]
    fn flat_image_roundtrip_with_mask() {
        let img = Image::from_pixels(16, 16, vec![9u8; 16 * 16 * 4]);
        let mask_knobs = crate::knobs::MaskKnobs {
            min_color_rat: 0.0,
            huff_thresh: 0.6,
        };
        let mask = crate::mask::design_mask(&img, &mask_knobs);
        let knobs = Preset::Faster.knobs().rgba;
        let mut w = BitWriter::new();
        write_rgba(&mut w, &img, &mask, &knobs);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let decoded = read_rgba(&mut r, 16, 16, &mask, &knobs).unwrap();
        for y in 0..16u32 {
            for x in 0..16u32 {
                assert_eq!(decoded.get(x, y)[..3], img.get(x, y)[..3]);
            }
        }
    }

    #[test]
    fn alpha_plane_roundtrips() {
        let mut img = Image::new(10, 10);
        for y in 0..10u32 {
            for x in 0..10u32 {
                img.set(x, y, [100, 120, 140, ((x * 10 + y) % 256) as u8]);
            }
        }
        let knobs = Preset::Faster.knobs().rgba;
        let mut w = BitWriter::new();
        write_rgba(&mut w, &img, &None, &knobs);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let decoded = read_rgba(&mut r, 10, 10, &None, &knobs).unwrap();
        for y in 0..10u32 {
            for x in 0..10u32 {
                assert_eq!(decoded.get(x, y), img.get(x, y));
            }
        }
    }

    #[test]
    fn duplicated_rectangle_roundtrips_via_lz() {
        let mut img = Image::new(40, 20);
        for y in 0..20u32 {
            for x in 0..40u32 {
                let bx = x % 20;
                img.set(x, y, [bx as u8 * 6, y as u8 * 6, (bx ^ y) as u8, 255]);
            }
        }
        let knobs = Preset::Harder.knobs().rgba;
        let mut w = BitWriter::new();
        write_rgba(&mut w, &img, &None, &knobs);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let decoded = read_rgba(&mut r, 40, 20, &None, &knobs).unwrap();
        for y in 0..20u32 {
            for x in 0..40u32 {
                assert_eq!(decoded.get(x, y)[..3], img.get(x, y)[..3]);
            }
        }
    }
}
