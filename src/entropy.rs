//! Symbol + zero-run-length entropy coder (`spec.md` §4.3).
//!
//! Each context (chaos bin) owns either:
//! - a ZRLE-mode pair of Huffman tables (before-zero / after-zero), with
//!   zero runs folded into escape symbols on the before-zero alphabet, or
//! - a single basic-mode table over the raw alphabet.
//!
//! The encoder simulates both options' bit costs using the already-built
//! code lengths and picks the cheaper one; the choice is written as one
//! bit ahead of the table(s).

use alloc::vec;
use alloc::vec::Vec;

use crate::bitstream::{BitReader, BitWriter};
use crate::huffman::{self, HuffmanTable};

/// Number of short zero-run escape symbols appended after the raw alphabet
/// in before-zero mode; the last one is followed by a 255255-coded extra
/// count for runs that don't fit the short form.
pub const ZRLE_SYMS: usize = 16;

/// A fully built per-context entropy model, ready to encode or decode.
pub enum EntropyModel {
    Basic {
        num_syms: usize,
        table: HuffmanTable,
    },
    Zrle {
        num_syms: usize,
        bz: HuffmanTable,
        az: HuffmanTable,
    },
}

struct Histograms {
    bz: Vec<u64>,
    az: Vec<u64>,
    basic: Vec<u64>,
}

fn build_histograms(symbols: &[u32], num_syms: usize) -> Histograms {
    let mut bz = vec![0u64; num_syms + ZRLE_SYMS];
    let mut az = vec![0u64; num_syms];
    let mut basic = vec![0u64; num_syms];

    let mut run: u32 = 0;
    for &s in symbols {
        basic[s as usize] += 1;
        if s == 0 {
            run += 1;
        } else {
            if run > 0 {
                let escape = if (run as usize) < ZRLE_SYMS {
                    num_syms + run as usize - 1
                } else {
                    num_syms + ZRLE_SYMS - 1
                };
                bz[escape] += 1;
                run = 0;
            }
            az[s as usize] += 1;
        }
    }
    if run > 0 {
        let escape = if (run as usize) < ZRLE_SYMS {
            num_syms + run as usize - 1
        } else {
            num_syms + ZRLE_SYMS - 1
        };
        bz[escape] += 1;
    }
    // Non-zero, non-run-starting symbols in before-zero position.
    let mut prev_zero = true;
    for &s in symbols {
        if s != 0 {
            if !prev_zero {
                bz[s as usize] += 1;
            }
            prev_zero = false;
        } else {
            prev_zero = true;
        }
    }

    Histograms { bz, az, basic }
}

fn estimated_bits(hist: &[u64], table: &HuffmanTable) -> u64 {
    hist.iter()
        .enumerate()
        .map(|(sym, &count)| count * u64::from(table.codelens[sym]))
        .sum()
}

/// Build the cheaper of ZRLE-mode or basic-mode models for one context's
/// symbol sequence, and immediately encode that sequence plus its table(s).
pub fn design_and_encode(w: &mut BitWriter, symbols: &[u32], num_syms: usize) {
    let hists = build_histograms(symbols, num_syms);

    let bz_table = HuffmanTable::from_histogram(&hists.bz);
    let az_table = HuffmanTable::from_histogram(&hists.az);
    let basic_table = HuffmanTable::from_histogram(&hists.basic);

    let zrle_bits = estimated_bits(&hists.bz, &bz_table) + estimated_bits(&hists.az, &az_table);
    let basic_bits = estimated_bits(&hists.basic, &basic_table);

    let use_zrle = zrle_bits <= basic_bits;
    w.write_bit(use_zrle);

    if use_zrle {
        huffman::write_table(w, &bz_table.codelens);
        huffman::write_table(w, &az_table.codelens);
        encode_zrle(w, symbols, num_syms, &bz_table, &az_table);
    } else {
        huffman::write_table(w, &basic_table.codelens);
        for &s in symbols {
            basic_table.write_symbol(w, s as usize);
        }
    }
}

fn encode_zrle(
    w: &mut BitWriter,
    symbols: &[u32],
    num_syms: usize,
    bz: &HuffmanTable,
    az: &HuffmanTable,
) {
    let mut run: u32 = 0;
    let mut after_zero = false;
    for &s in symbols {
        if s == 0 {
            run += 1;
            after_zero = false;
        } else {
            if run > 0 {
                emit_run(w, bz, num_syms, run);
                run = 0;
                after_zero = true;
            }
            if after_zero {
                az.write_symbol(w, s as usize);
                after_zero = false;
            } else {
                bz.write_symbol(w, s as usize);
            }
        }
    }
    if run > 0 {
        emit_run(w, bz, num_syms, run);
    }
}

fn emit_run(w: &mut BitWriter, bz: &HuffmanTable, num_syms: usize, run: u32) {
    if (run as usize) < ZRLE_SYMS {
        bz.write_symbol(w, num_syms + run as usize - 1);
    } else {
        bz.write_symbol(w, num_syms + ZRLE_SYMS - 1);
        w.write_255255(run - ZRLE_SYMS as u32);
    }
}

/// Read a context's table(s) as written by [`design_and_encode`], returning
/// a ready-to-use [`EntropyModel`].
pub fn read_model(r: &mut BitReader, num_syms: usize) -> EntropyModel {
    let use_zrle = r.read_bit();
    if use_zrle {
        let bz = HuffmanTable::from_codelens(huffman::read_table(r));
        let az = HuffmanTable::from_codelens(huffman::read_table(r));
        EntropyModel::Zrle { num_syms, bz, az }
    } else {
        let table = HuffmanTable::from_codelens(huffman::read_table(r));
        EntropyModel::Basic { num_syms, table }
    }
}

/// Stateful decoder for one context, tracking before/after-zero mode across
/// calls to [`Self::decode_one`].
pub struct EntropyDecoder<'m> {
    model: &'m EntropyModel,
    pending_run: u32,
    after_zero: bool,
}

impl<'m> EntropyDecoder<'m> {
    pub fn new(model: &'m EntropyModel) -> Self {
        EntropyDecoder {
            model,
            pending_run: 0,
            after_zero: false,
        }
    }

    /// Decode the next symbol, consuming bits from `r`. Returns `None` on a
    /// structural impossibility (unknown code, truncated stream) so callers
    /// can map it to the appropriate `ReadError` variant.
    pub fn decode_one(&mut self, r: &mut BitReader) -> Option<u32> {
        if self.pending_run > 0 {
            self.pending_run -= 1;
            self.after_zero = self.pending_run == 0;
            return Some(0);
        }

        match self.model {
            EntropyModel::Basic { table, .. } => table.read_symbol(r).map(|s| s as u32),
            EntropyModel::Zrle { num_syms, bz, az } => {
                let table = if self.after_zero { az } else { bz };
                let sym = table.read_symbol(r)?;
                if !self.after_zero && sym >= *num_syms {
                    let run_code = sym - num_syms;
                    let run = if run_code + 1 < ZRLE_SYMS {
                        run_code as u32 + 1
                    } else {
                        ZRLE_SYMS as u32 + r.read_255255()
                    };
                    self.pending_run = run - 1;
                    self.after_zero = self.pending_run == 0;
                    return Some(0);
                }
                self.after_zero = false;
                Some(sym as u32)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(symbols: &[u32], num_syms: usize) {
        let mut w = BitWriter::new();
        design_and_encode(&mut w, symbols, num_syms);
        let words = w.finish();
        let mut r = BitReader::new(&words);
        let model = read_model(&mut r, num_syms);
        let mut dec = EntropyDecoder::new(&model);
        for &expect in symbols {
            assert_eq!(dec.decode_one(&mut r), Some(expect));
        }
    }

    #[test]
    fn mostly_zero_picks_zrle() {
        let mut symbols = vec![0u32; 500];
        symbols[10] = 3;
        symbols[300] = 7;
        symbols[301] = 7;
        roundtrip(&symbols, 16);
    }

    #[test]
    fn dense_random_like_picks_basic() {
        let symbols: Vec<u32> = (0..200).map(|i| (i * 37 % 16) as u32).collect();
        roundtrip(&symbols, 16);
    }

    #[test]
    fn long_zero_run_uses_255255_tail() {
        let mut symbols = vec![0u32; 20];
        symbols.extend(core::iter::repeat(0u32).take(40));
        symbols.push(5);
        symbols.push(0);
        roundtrip(&symbols, 8);
    }

    #[test]
    fn zero_run_exactly_at_zrle_syms_boundary() {
        // A run of exactly ZRLE_SYMS zeros must take the tail-escape path
        // (escape symbol + 255255(0)), not the short form.
        let mut symbols = vec![0u32; ZRLE_SYMS];
        symbols.push(9);
        symbols.extend(vec![0u32; ZRLE_SYMS - 1]);
        roundtrip(&symbols, 16);
    }

    #[test]
    fn all_zero_stream() {
        let symbols = vec![0u32; 10];
        roundtrip(&symbols, 4);
    }

    #[test]
    fn single_symbol_alphabet() {
        let symbols = vec![0u32; 5];
        roundtrip(&symbols, 1);
    }
}
