//! Order-1 residual-activity classifier producing per-pixel context bins
//! (`spec.md` §4.4).
//!
//! `bin(x) = CHAOS_TABLE[score(residual[x-1, y]) + score(residual[x, y-1])]`
//! where `score(r) = r` for `r <= 128` and `256 - r` otherwise. The table
//! saturates at `chaos_levels - 1` and is rebuilt whenever `chaos_levels`
//! changes (the decoder receives `chaos_levels - 1` in 4 bits and rebuilds
//! the identical table from it, so `bin` is a pure function of the two
//! neighbour scores and the active level count).

use alloc::vec;
use alloc::vec::Vec;

/// Upper bound on `chaos_levels`; fits the 4-bit `chaos_levels - 1` header
/// field (`spec.md` §6.1 step 6).
pub const MAX_CHAOS_LEVELS: u32 = 16;

/// Highest value `score(l) + score(r)` can take for 8-bit residuals.
pub const CHAOS_SCORE_DOMAIN: usize = 256;

/// `score(r) = r` for `r <= 128`, else `256 - r`. Symmetric around the
/// residual midpoint so near-zero and near-255 residuals (which wrap to the
/// same "small error") count as equally tranquil.
#[inline]
pub fn score(r: u8) -> u32 {
    let r = u32::from(r);
    if r <= 128 {
        r
    } else {
        256 - r
    }
}

/// Build the monotone step function mapping `score(left) + score(up)`
/// (range `0..=256`, doubled in domain to leave room for future scorers,
/// hence `CHAOS_TABLE` spans `0..=510` per `spec.md` §4.4) to a chaos bin in
/// `0..chaos_levels`.
pub struct ChaosTable {
    table: Vec<u8>,
    pub levels: u32,
}

impl ChaosTable {
    pub fn new(levels: u32) -> Self {
        debug_assert!(levels >= 1 && levels <= MAX_CHAOS_LEVELS);
        let domain = 2 * CHAOS_SCORE_DOMAIN;
        let mut table = vec![0u8; domain];
        if levels > 1 {
            // Monotone quantization of the summed-score domain into
            // `levels` buckets, saturating at `levels - 1`.
            let step = domain as f64 / levels as f64;
            for (v, slot) in table.iter_mut().enumerate() {
                let bin = (v as f64 / step) as u32;
                *slot = bin.min(levels - 1) as u8;
            }
        }
        ChaosTable { table, levels }
    }

    #[inline]
    pub fn bin(&self, left_residual: u8, up_residual: u8) -> usize {
        let sum = score(left_residual) + score(up_residual);
        self.table[sum as usize] as usize
    }

    #[inline]
    pub fn bin_from_scores(&self, left_score: u32, up_score: u32) -> usize {
        self.table[(left_score + up_score) as usize] as usize
    }
}

/// One scratch row of residual "scores" (pre-`score()` applied is stored
/// raw; masked/LZ-claimed pixels store `0`, the "tranquil" value, per
/// `spec.md` §4.4's final paragraph).
#[derive(Debug, Clone)]
pub struct ChaosRow {
    pub residuals: Vec<u8>,
}

impl ChaosRow {
    pub fn new(width: usize) -> Self {
        ChaosRow {
            residuals: vec![0u8; width],
        }
    }

    pub fn clear(&mut self) {
        for v in self.residuals.iter_mut() {
            *v = 0;
        }
    }
}

/// Tracks the previous/current row pair for one plane's chaos context, with
/// zeroed state at the start of every image per the invariant in §4.4.
pub struct ChaosContext {
    pub table: ChaosTable,
    prev_row: ChaosRow,
    cur_row: ChaosRow,
    width: usize,
}

impl ChaosContext {
    pub fn new(width: usize, levels: u32) -> Self {
        ChaosContext {
            table: ChaosTable::new(levels),
            prev_row: ChaosRow::new(width),
            cur_row: ChaosRow::new(width),
            width,
        }
    }

    pub fn start_image(&mut self) {
        self.prev_row.clear();
        self.cur_row.clear();
    }

    pub fn start_row(&mut self) {
        core::mem::swap(&mut self.prev_row, &mut self.cur_row);
        self.cur_row.clear();
    }

    /// Bin for pixel `x` in the row currently being produced: left neighbour
    /// comes from the row under construction, up neighbour from the row
    /// above (already swapped into `prev_row` by [`Self::start_row`]).
    pub fn bin_at(&self, x: usize) -> usize {
        let left = if x == 0 { 0 } else { self.cur_row.residuals[x - 1] };
        let up = self.prev_row.residuals[x];
        self.table.bin(left, up)
    }

    pub fn set_residual(&mut self, x: usize, residual: u8) {
        self.cur_row.residuals[x] = residual;
    }

    /// Record that pixel `x` was claimed by the mask or an LZ copy: its
    /// residual contributes `score == 0` to neighbours.
    pub fn set_tranquil(&mut self, x: usize) {
        self.cur_row.residuals[x] = 0;
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_symmetric_around_midpoint() {
        assert_eq!(score(0), 0);
        assert_eq!(score(1), 1);
        assert_eq!(score(128), 128);
        assert_eq!(score(129), 127);
        assert_eq!(score(255), 1);
    }

    #[test]
    fn table_saturates_and_is_monotone() {
        let table = ChaosTable::new(4);
        let mut last = 0u8;
        for v in 0..2 * CHAOS_SCORE_DOMAIN {
            let bin = table.table[v];
            assert!(bin >= last || bin == last);
            assert!(u32::from(bin) < table.levels);
            last = bin;
        }
    }

    #[test]
    fn single_level_always_bin_zero() {
        let table = ChaosTable::new(1);
        for v in [0u8, 64, 128, 200, 255] {
            assert_eq!(table.bin(v, v), 0);
        }
    }

    #[test]
    fn pure_function_of_neighbours_and_levels() {
        let t4 = ChaosTable::new(4);
        let t8 = ChaosTable::new(8);
        // Same neighbours, different level counts may give different bins,
        // but repeated calls are identical.
        assert_eq!(t4.bin(10, 20), t4.bin(10, 20));
        assert_eq!(t8.bin(10, 20), t8.bin(10, 20));
    }

    #[test]
    fn start_image_zeros_state() {
        let mut ctx = ChaosContext::new(4, 4);
        ctx.set_residual(0, 200);
        ctx.start_row();
        ctx.set_residual(1, 50);
        ctx.start_image();
        assert_eq!(ctx.bin_at(0), ChaosTable::new(4).bin(0, 0));
    }
}
