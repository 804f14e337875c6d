//! Recursive tile-based single-channel coder (`spec.md` §4.8), the generic
//! workhorse reused for the alpha plane, global-palette index plane, and
//! the SF/CF filter tile maps.
//!
//! Pipeline per `spec.md` §4.8: mask tiles -> palette filters -> per-tile
//! filter design -> (row-filter the tile array, or recurse into a child
//! `Mono` coder over the tile array once it's large enough) -> chaos +
//! entropy code the residual plane.

use alloc::vec;
use alloc::vec::Vec;

use crate::bitstream::{BitReader, BitWriter};
use crate::chaos::ChaosContext;
use crate::entropy::{self, EntropyDecoder};
use crate::error::ReadError;
use crate::filters::{self, Neighborhood, SF_FIXED_COUNT};
use crate::image::TileGrid;
use crate::knobs::MonoKnobs;
use crate::lz::{self, Match};

/// Once a tile-filter array has at least this many entries, compressing it
/// recursively with a child `Mono` coder beats a flat row-filter scheme.
/// Keeps recursion depth at `log2(max(W, H)) / min_tile_bits`, which the
/// design notes (`spec.md` §9) bound at 3 in practice.
pub const RECURSE_THRESH_COUNT: usize = 64;

/// Maximum recursion depth, a hard backstop independent of image size.
pub const MAX_RECURSE_DEPTH: u32 = 3;

const MF_PALETTE_BASE: usize = SF_FIXED_COUNT;
const MAX_PALETTE_FILTERS: usize = 8;

/// Four row-level predictors applied to the tile-filter array before it is
/// chaos/entropy coded directly (used when recursion bottoms out).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RowFilter {
    Noop,
    Left,
    Up,
    UpLeft,
}

impl RowFilter {
    fn all() -> [RowFilter; 4] {
        [RowFilter::Noop, RowFilter::Left, RowFilter::Up, RowFilter::UpLeft]
    }

    fn code(self) -> u32 {
        match self {
            RowFilter::Noop => 0,
            RowFilter::Left => 1,
            RowFilter::Up => 2,
            RowFilter::UpLeft => 3,
        }
    }

    fn from_code(c: u32) -> Self {
        match c {
            0 => RowFilter::Noop,
            1 => RowFilter::Left,
            2 => RowFilter::Up,
            _ => RowFilter::UpLeft,
        }
    }

    fn predict(self, grid: &[u8], w: usize, x: usize, y: usize) -> u8 {
        let at = |x: i64, y: i64| -> u8 {
            if x < 0 || y < 0 {
                0
            } else {
                grid[y as usize * w + x as usize]
            }
        };
        match self {
            RowFilter::Noop => 0,
            RowFilter::Left => at(x as i64 - 1, y as i64),
            RowFilter::Up => at(x as i64, y as i64 - 1),
            RowFilter::UpLeft => at(x as i64 - 1, y as i64 - 1),
        }
    }
}

/// A plane of bytes with a mask delegate: `mask(x, y)` reports pixels the
/// Mono coder must skip (already claimed upstream, e.g. by the dominant
/// colour mask or an RGBA-level LZ copy).
pub struct MonoInput<'a> {
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
    pub num_syms: usize,
    pub mask: &'a dyn Fn(u32, u32) -> bool,
}

/// Write one Mono-coded plane. `tile_bits` picks the tile size; callers
/// that don't have a strong opinion use `default_tile_bits`.
pub fn write_mono(w: &mut BitWriter, input: &MonoInput, tile_bits: u32, knobs: &MonoKnobs, depth: u32) {
    let grid = TileGrid::new(input.width, input.height, tile_bits);
    w.write_bits(tile_bits, 4);

    // --- LZ pass -----------------------------------------------------
    let enable_lz = knobs.lz_inmatch_limit > 0 && depth == 0;
    let sample = |x: u32, y: u32| u32::from(input.data[(y * input.width + x) as usize]);
    let matches = lz::find_matches(input.width, input.height, sample, input.mask, enable_lz);
    write_match_list(w, &matches);
    let lz_claimed = build_claim_grid(input.width, input.height, &matches);

    let is_claimed = |x: u32, y: u32| (input.mask)(x, y) || lz_claimed[(y * input.width + x) as usize];

    // --- Palette (uniform-tile) filters --------------------------------
    let palette_filters = discover_palette_filters(input, &grid, &is_claimed);
    w.write_9(palette_filters.len() as u32);
    for &v in &palette_filters {
        w.write_bits(u32::from(v), 8);
    }

    // --- Per-tile filter design -----------------------------------------
    let tile_count = grid.tile_count();
    let mut tile_filters = vec![0u8; tile_count];
    for t in 0..tile_count {
        tile_filters[t] = choose_tile_filter(input, &grid, t, &palette_filters, &is_claimed);
    }

    write_tile_filter_array(w, &tile_filters, grid.tiles_x, grid.tiles_y, knobs, depth);

    // --- Residual + chaos + entropy --------------------------------------
    let residuals = compute_residuals(input, &grid, &tile_filters, &palette_filters, &is_claimed);
    let chaos_levels = choose_chaos_levels(&residuals, &is_claimed, input.width, input.height);
    w.write_bits(chaos_levels - 1, 4);

    encode_residual_plane(w, input, &residuals, &is_claimed, chaos_levels);
}

fn build_claim_grid(width: u32, height: u32, matches: &[Match]) -> Vec<bool> {
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

fn discover_palette_filters(
    input: &MonoInput,
    grid: &TileGrid,
    is_claimed: &impl Fn(u32, u32) -> bool,
) -> Vec<u8> {
    use alloc::collections::BTreeMap;
    let mut counts: BTreeMap<u8, u32> = BTreeMap::new();
    for t in 0..grid.tile_count() {
        let (x0, y0, x1, y1) = grid.tile_bounds(t);
        let mut uniform: Option<u8> = None;
        let mut any = false;
        for y in y0..y1 {
            for x in x0..x1 {
                if is_claimed(x, y) {
                    continue;
                }
                let v = input.data[(y * input.width + x) as usize];
                any = true;
                match uniform {
                    None => uniform = Some(v),
                    Some(u) if u == v => {}
                    _ => {
                        uniform = None;
                        any = false;
                        break;
                    }
                }
            }
            if !any && uniform.is_none() {
                break;
            }
        }
        if let Some(v) = uniform {
            *counts.entry(v).or_insert(0) += 1;
        }
    }
    let total_tiles = grid.tile_count().max(1) as f32;
    let mut entries: Vec<(u8, u32)> = counts
        .into_iter()
        .filter(|&(_, c)| (c as f32 / total_tiles) > 0.02)
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(MAX_PALETTE_FILTERS);
    entries.into_iter().map(|(v, _)| v).collect()
}

fn neighborhood_at(data: &[u8], width: u32, height: u32, is_claimed: &impl Fn(u32, u32) -> bool, x: u32, y: u32) -> Neighborhood {
    let at = |x: i64, y: i64| -> u8 {
        if x < 0 || y < 0 || x as u32 >= width || y as u32 >= height {
            return 0;
        }
        let (x, y) = (x as u32, y as u32);
        if is_claimed(x, y) {
            0
        } else {
            data[(y * width + x) as usize]
        }
    };
    Neighborhood {
        a: at(x as i64 - 1, y as i64),
        b: at(x as i64, y as i64 - 1),
        c: at(x as i64 - 1, y as i64 - 1),
        d: at(x as i64 + 1, y as i64 - 1),
    }
}

fn predict(filter: u8, n: Neighborhood, palette_filters: &[u8]) -> u8 {
    let idx = filter as usize;
    if idx < SF_FIXED_COUNT {
        filters::predict_fixed(idx, n)
    } else {
        palette_filters[idx - MF_PALETTE_BASE]
    }
}

fn choose_tile_filter(
    input: &MonoInput,
    grid: &TileGrid,
    tile: usize,
    palette_filters: &[u8],
    is_claimed: &impl Fn(u32, u32) -> bool,
) -> u8 {
    let (x0, y0, x1, y1) = grid.tile_bounds(tile);
    let candidate_count = SF_FIXED_COUNT + palette_filters.len();
    let mut best_filter = 0u8;
    let mut best_cost = u64::MAX;
    for f in 0..candidate_count {
        let mut cost = 0u64;
        for y in y0..y1 {
            for x in x0..x1 {
                if is_claimed(x, y) {
                    continue;
                }
                let n = neighborhood_at(input.data, input.width, input.height, is_claimed, x, y);
                let pred = predict(f as u8, n, palette_filters);
                let actual = input.data[(y * input.width + x) as usize];
                cost += u64::from(actual.wrapping_sub(pred).min(pred.wrapping_sub(actual)));
            }
        }
        if cost < best_cost {
            best_cost = cost;
            best_filter = f as u8;
        }
    }
    best_filter
}

fn compute_residuals(
    input: &MonoInput,
    grid: &TileGrid,
    tile_filters: &[u8],
    palette_filters: &[u8],
    is_claimed: &impl Fn(u32, u32) -> bool,
) -> Vec<u8> {
    let mut out = vec![0u8; input.width as usize * input.height as usize];
    for t in 0..grid.tile_count() {
        let (x0, y0, x1, y1) = grid.tile_bounds(t);
        let filter = tile_filters[t];
        for y in y0..y1 {
            for x in x0..x1 {
                if is_claimed(x, y) {
                    continue;
                }
                let n = neighborhood_at(input.data, input.width, input.height, is_claimed, x, y);
                let pred = predict(filter, n, palette_filters);
                let actual = input.data[(y * input.width + x) as usize];
                out[(y * input.width + x) as usize] = actual.wrapping_sub(pred);
            }
        }
    }
    out
}

fn choose_chaos_levels(residuals: &[u8], is_claimed: &impl Fn(u32, u32) -> bool, width: u32, height: u32) -> u32 {
    let mut best_levels = 1u32;
    let mut best_cost = u64::MAX;
    for &levels in &[1u32, 2, 4, 8, 16] {
        let cost = estimate_chaos_cost(residuals, is_claimed, width, height, levels);
        if cost < best_cost {
            best_cost = cost;
            best_levels = levels;
        }
    }
    best_levels
}

fn estimate_chaos_cost(
    residuals: &[u8],
    is_claimed: &impl Fn(u32, u32) -> bool,
    width: u32,
    height: u32,
    levels: u32,
) -> u64 {
    let mut ctx = ChaosContext::new(width as usize, levels);
    ctx.start_image();
    let mut cost = 0u64;
    for y in 0..height {
        ctx.start_row();
        for x in 0..width {
            if is_claimed(x, y) {
                ctx.set_tranquil(x as usize);
                continue;
            }
            let r = residuals[(y * width + x) as usize];
            let _bin = ctx.bin_at(x as usize);
            cost += u64::from(r.min(255 - r)) + 1;
            ctx.set_residual(x as usize, r);
        }
    }
    cost
}

/// `chaos_levels` independent symbol streams (one per bin), fed to the
/// entropy coder in bin order.
fn encode_residual_plane(
    w: &mut BitWriter,
    input: &MonoInput,
    residuals: &[u8],
    is_claimed: &impl Fn(u32, u32) -> bool,
    chaos_levels: u32,
) {
    let mut ctx = ChaosContext::new(input.width as usize, chaos_levels);
    ctx.start_image();
    let mut per_bin: Vec<Vec<u32>> = vec![Vec::new(); chaos_levels as usize];

    for y in 0..input.height {
        ctx.start_row();
        for x in 0..input.width {
            if is_claimed(x, y) {
                ctx.set_tranquil(x as usize);
                continue;
            }
            let bin = ctx.bin_at(x as usize);
            let r = residuals[(y * input.width + x) as usize];
            per_bin[bin].push(u32::from(r));
            ctx.set_residual(x as usize, r);
        }
    }

    for symbols in &per_bin {
        entropy::design_and_encode(w, symbols, 256);
    }
}

fn write_tile_filter_array(
    w: &mut BitWriter,
    tile_filters: &[u8],
    tiles_x: u32,
    tiles_y: u32,
    knobs: &MonoKnobs,
    depth: u32,
) {
    let recurse = tile_filters.len() >= RECURSE_THRESH_COUNT && depth < MAX_RECURSE_DEPTH;
    w.write_bit(recurse);

    if recurse {
        let data: Vec<u8> = tile_filters.to_vec();
        let input = MonoInput {
            width: tiles_x,
            height: tiles_y,
            data: &data,
            num_syms: SF_FIXED_COUNT + MAX_PALETTE_FILTERS,
            mask: &|_, _| false,
        };
        write_mono(w, &input, default_tile_bits(tiles_x, tiles_y), knobs, depth + 1);
    } else {
        let mut best_filter = RowFilter::Noop;
        let mut best_cost = u64::MAX;
        for rf in RowFilter::all() {
            let mut cost = 0u64;
            for y in 0..tiles_y as usize {
                for x in 0..tiles_x as usize {
                    let actual = tile_filters[y * tiles_x as usize + x];
                    let pred = rf.predict(tile_filters, tiles_x as usize, x, y);
                    cost += u64::from(actual.wrapping_sub(pred));
                }
            }
            if cost < best_cost {
                best_cost = cost;
                best_filter = rf;
            }
        }
        w.write_bits(best_filter.code(), 2);
        let mut symbols = Vec::with_capacity(tile_filters.len());
        for y in 0..tiles_y as usize {
            for x in 0..tiles_x as usize {
                let actual = tile_filters[y * tiles_x as usize + x];
                let pred = best_filter.predict(tile_filters, tiles_x as usize, x, y);
                symbols.push(u32::from(actual.wrapping_sub(pred)));
            }
        }
        entropy::design_and_encode(w, &symbols, 256);
    }
}

fn read_tile_filter_array(
    r: &mut BitReader,
    tiles_x: u32,
    tiles_y: u32,
    knobs: &MonoKnobs,
    depth: u32,
) -> Result<Vec<u8>, ReadError> {
    let recurse = r.read_bit();
    if recurse {
        let (decoded, _) = read_mono(
            r,
            tiles_x,
            tiles_y,
            SF_FIXED_COUNT + MAX_PALETTE_FILTERS,
            &|_, _| false,
            knobs,
            depth + 1,
        )?;
        Ok(decoded)
    } else {
        let rf = RowFilter::from_code(r.read_bits(2));
        let model = entropy::read_model(r, 256);
        let mut dec = EntropyDecoder::new(&model);
        let n = (tiles_x * tiles_y) as usize;
        let mut out = vec![0u8; n];
        for y in 0..tiles_y as usize {
            for x in 0..tiles_x as usize {
                let diff = dec.decode_one(r).ok_or(ReadError::BadMono)? as u8;
                let pred = rf.predict(&out, tiles_x as usize, x, y);
                out[y * tiles_x as usize + x] = pred.wrapping_add(diff);
            }
        }
        Ok(out)
    }
}

/// A reasonable default tile size for Mono clients that don't search over a
/// tile-bits range themselves.
pub fn default_tile_bits(width: u32, height: u32) -> u32 {
    let dim = width.max(height).max(1);
    let mut bits = 2;
    while (1u32 << bits) < dim && bits < 6 {
        bits += 1;
    }
    bits
}

/// Read one Mono-coded plane as written by [`write_mono`], returning the
/// reconstructed byte plane and the set of positions the LZ pass claimed
/// (callers that also track mask claims need only their own).
pub fn read_mono(
    r: &mut BitReader,
    width: u32,
    height: u32,
    _num_syms: usize,
    mask: &dyn Fn(u32, u32) -> bool,
    knobs: &MonoKnobs,
    depth: u32,
) -> Result<(Vec<u8>, Vec<bool>), ReadError> {
    let tile_bits = r.read_bits(4);
    let grid = TileGrid::new(width, height, tile_bits);

    let matches = read_match_list(r)?;
    for m in &matches {
        if !m.geometry_valid(width, height) {
            return Err(ReadError::LzBad);
        }
    }
    let lz_claimed = build_claim_grid(width, height, &matches);
    let is_claimed = |x: u32, y: u32| mask(x, y) || lz_claimed[(y * width + x) as usize];

    let palette_count = r.read_9() as usize;
    if palette_count > MAX_PALETTE_FILTERS {
        return Err(ReadError::BadMono);
    }
    let mut palette_filters = Vec::with_capacity(palette_count);
    for _ in 0..palette_count {
        palette_filters.push(r.read_bits(8) as u8);
    }

    let tile_filters = read_tile_filter_array(r, grid.tiles_x, grid.tiles_y, knobs, depth)?;
    if tile_filters.len() != grid.tile_count() {
        return Err(ReadError::BadMono);
    }
    for &f in &tile_filters {
        if (f as usize) >= SF_FIXED_COUNT + palette_filters.len() {
            return Err(ReadError::BadMono);
        }
    }

    let chaos_levels = r.read_bits(4) + 1;

    let mut out = vec![0u8; width as usize * height as usize];
    let mut ctx = ChaosContext::new(width as usize, chaos_levels);
    ctx.start_image();

    let mut models = Vec::with_capacity(chaos_levels as usize);
    for _ in 0..chaos_levels {
        models.push(entropy::read_model(r, 256));
    }
    let mut decoders: Vec<EntropyDecoder> = models.iter().map(EntropyDecoder::new).collect();

    for y in 0..height {
        ctx.start_row();
        for x in 0..width {
            if is_claimed(x, y) {
                ctx.set_tranquil(x as usize);
                if let Some(m) = matches.iter().find(|m| x >= m.dx && x < m.dx + m.w && y >= m.dy && y < m.dy + m.h) {
                    let sx = m.sx + (x - m.dx);
                    let sy = m.sy + (y - m.dy);
                    out[(y * width + x) as usize] = out[(sy * width + sx) as usize];
                }
                continue;
            }
            let tile = grid.tile_index_of(x, y);
            let filter = tile_filters[tile];
            let bin = ctx.bin_at(x as usize);
            let diff = decoders[bin].decode_one(r).ok_or(ReadError::BadMono)? as u8;
            let n = neighborhood_at(&out, width, height, &is_claimed, x, y);
            let pred = predict(filter, n, &palette_filters);
            let value = pred.wrapping_add(diff);
            out[(y * width + x) as usize] = value;
            ctx.set_residual(x as usize, diff);
        }
    }

    Ok((out, lz_claimed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knobs::Preset;

    fn knobs() -> MonoKnobs {
        Preset::Faster.knobs().mono
    }

    #[test]
    fn flat_plane_roundtrip() {
        let width = 16;
        let height = 16;
        let data = vec![42u8; (width * height) as usize];
        let input = MonoInput {
            width,
            height,
            data: &data,
            num_syms: 256,
            mask: &|_, _| false,
        };
        let mut w = BitWriter::new();
        write_mono(&mut w, &input, 3, &knobs(), 0);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let (decoded, _) = read_mono(&mut r, width, height, 256, &|_, _| false, &knobs(), 0).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn gradient_plane_roundtrip() {
        let width = 32;
        let height = 32;
        let mut data = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                data[(y * width + x) as usize] = ((x + y) % 256) as u8;
            }
        }
        let input = MonoInput {
            width,
            height,
            data: &data,
            num_syms: 256,
            mask: &|_, _| false,
        };
        let mut w = BitWriter::new();
        write_mono(&mut w, &input, 4, &knobs(), 0);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let (decoded, _) = read_mono(&mut r, width, height, 256, &|_, _| false, &knobs(), 0).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn masked_pixels_are_skipped_both_ways() {
        let width = 8;
        let height = 8;
        let mut data = vec![5u8; (width * height) as usize];
        data[0] = 255; // inside the "masked" region; value never observed
        let mask = |x: u32, y: u32| x < 4 && y < 4;
        let input = MonoInput {
            width,
            height,
            data: &data,
            num_syms: 256,
            mask: &mask,
        };
        let mut w = BitWriter::new();
        write_mono(&mut w, &input, 2, &knobs(), 0);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let (decoded, _) = read_mono(&mut r, width, height, 256, &mask, &knobs(), 0).unwrap();
        for y in 0..height {
            for x in 0..width {
                if !mask(x, y) {
                    assert_eq!(decoded[(y * width + x) as usize], 5);
                }
            }
        }
    }

    #[test]
    fn recursive_filter_map_roundtrip() {
        // Large enough tile grid to trigger recursion into a child Mono
        // coder for the filter-index array itself.
        let width = 256;
        let height = 256;
        let mut data = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                data[(y * width + x) as usize] = (((x / 16) + (y / 16)) % 7) as u8;
            }
        }
        let input = MonoInput {
            width,
            height,
            data: &data,
            num_syms: 256,
            mask: &|_, _| false,
        };
        let mut w = BitWriter::new();
        write_mono(&mut w, &input, 4, &knobs(), 0);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let (decoded, _) = read_mono(&mut r, width, height, 256, &|_, _| false, &knobs(), 0).unwrap();
        assert_eq!(decoded, data);
    }
}
