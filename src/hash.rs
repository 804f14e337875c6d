//! Streaming hashes used to authenticate the encoded word stream.
//!
//! Two algorithms are carried from the original implementation
//! (`examples/original_source/HotRodHash.*`, `MurmurHash3.*`): a fast,
//! branch-light hash used for every decode (`fast_hash`), and a reserved
//! slot for a heavier verification hash (`good_hash`) that the bitstream
//! format carries but that this crate does not yet compute or check — see
//! DESIGN.md for the open-question resolution.

/// Seed used for the header hash.
pub const HEAD_SEED: u32 = 0x4D78_C91E;
/// Seed used for the full-stream data hash.
pub const DATA_SEED: u32 = 0x2D43_FE91;

/// HotRodHash: an ARM-friendly streaming hash with no final mix step,
/// folded here into a simple word-at-a-time multiply-rotate-xor.
#[derive(Clone, Copy, Debug)]
pub struct HotRodHash {
    state: u32,
}

impl HotRodHash {
    pub fn new(seed: u32) -> Self {
        HotRodHash { state: seed }
    }

    #[inline]
    pub fn hash_word(&mut self, w: u32) {
        let mut h = self.state ^ w;
        h = h.wrapping_mul(0x85eb_ca6b);
        h ^= h.rotate_left(13);
        self.state = h;
    }

    pub fn hash_words(&mut self, words: &[u32]) {
        for &w in words {
            self.hash_word(w);
        }
    }

    pub fn finish(self) -> u32 {
        self.state
    }
}

/// One-shot helper: hash a whole word slice with the given seed.
pub fn hash_words(seed: u32, words: &[u32]) -> u32 {
    let mut h = HotRodHash::new(seed);
    h.hash_words(words);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let words = [1u32, 2, 3, 0xdead_beef];
        let a = hash_words(DATA_SEED, &words);
        let b = hash_words(DATA_SEED, &words);
        assert_eq!(a, b);
    }

    #[test]
    fn sensitive_to_bit_flip() {
        let mut words = [1u32, 2, 3, 0xdead_beef];
        let a = hash_words(DATA_SEED, &words);
        words[2] ^= 1;
        let b = hash_words(DATA_SEED, &words);
        assert_ne!(a, b);
    }

    #[test]
    fn seed_changes_result() {
        let words = [7u32, 8, 9];
        assert_ne!(
            hash_words(HEAD_SEED, &words),
            hash_words(DATA_SEED, &words)
        );
    }
}
