//! 2-D exact-match finder (`spec.md` §4.9, §8.2's LZ law, §9's match-advance
//! redesign).
//!
//! The original implementation builds a suffix array over the pixel stream.
//! Per `spec.md` §9 ("virtual filter catalogues" / "cyclic work lists" note)
//! this crate re-expresses the same *contract* — exact rectangular matches,
//! sorted by destination, advanced by an explicit cursor rather than an
//! intrusive ring — using a row-hash index instead of a suffix array. This
//! is a documented simplification of the matcher's internals (see
//! DESIGN.md); the match list it produces satisfies the same invariants.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// Minimum match width/height worth transmitting as a zone; below this the
/// escape-code overhead would exceed the savings (`spec.md` glossary:
/// "LZ zone").
pub const ZONEW: u32 = 4;
pub const ZONEH: u32 = 4;

/// How far back (in rows) a match source may be searched, bounding both
/// search cost and the distance-code alphabet.
pub const WIN_SIZE: u32 = 256;

/// One rectangular exact match: `width = w`, `height = h`, source rectangle
/// `(sx, sy)..(sx+w, sy+h)`, destination rectangle `(dx, dy)..(dx+w, dy+h)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    pub sx: u32,
    pub sy: u32,
    pub dx: u32,
    pub dy: u32,
    pub w: u32,
    pub h: u32,
}

impl Match {
    /// The invariant checked in `spec.md` §8.2: both rectangles lie inside
    /// the image and the source strictly precedes the destination in
    /// raster order.
    pub fn geometry_valid(&self, width: u32, height: u32) -> bool {
        self.sx + self.w <= width
            && self.sy + self.h <= height
            && self.dx + self.w <= width
            && self.dy + self.h <= height
            && (self.sy < self.dy || (self.sy == self.dy && self.sx < self.dx))
    }
}

/// Find non-overlapping rectangular matches over a sampled plane (pixels or
/// bytes, via `sample`), each at least `ZONEW x ZONEH`, sorted by
/// destination `(y, x)`.
///
/// `claimed` marks destination pixels that are already spoken for by the
/// caller (e.g. mask-claimed pixels) and must not be covered by a match,
/// matching the mask/LZ exclusivity invariant in `spec.md` §3.2.
pub fn find_matches(
    width: u32,
    height: u32,
    sample: impl Fn(u32, u32) -> u32,
    claimed: impl Fn(u32, u32) -> bool,
    enable: bool,
) -> Vec<Match> {
    let mut matches = Vec::new();
    if !enable || width < ZONEW || height < ZONEH {
        return matches;
    }

    // covered[y][x]: true once a pixel has been assigned to a match, so
    // later candidates never overlap earlier ones (earlier-position wins,
    // per `spec.md` §4.9's rejection rule).
    let mut covered = alloc::vec![false; width as usize * height as usize];
    let is_free = |covered: &[bool], x: u32, y: u32| {
        !covered[y as usize * width as usize + x as usize] && !claimed(x, y)
    };

    // Hash the top-left ZONEW x ZONEH block at every position into a map
    // from block content to its earliest occurrence, chained by raster
    // order so the first stored position is always the earliest valid
    // source for later duplicates.
    let mut index: BTreeMap<Vec<u32>, Vec<(u32, u32)>> = BTreeMap::new();

    for dy in 0..=(height - ZONEH) {
        for dx in 0..=(width - ZONEW) {
            if !is_free(&covered, dx, dy) {
                continue;
            }
            let key = block_key(&sample, dx, dy, ZONEW, ZONEH);
            let mut found: Option<(u32, u32)> = None;
            if let Some(candidates) = index.get(&key) {
                for &(sx, sy) in candidates.iter() {
                    if sy + ZONEH > height || sx + ZONEW > width {
                        continue;
                    }
                    if dy.saturating_sub(sy) > WIN_SIZE {
                        continue;
                    }
                    if !(sy < dy || (sy == dy && sx < dx)) {
                        continue;
                    }
                    if region_free(&covered, width, sx, sy, ZONEW, ZONEH) {
                        found = Some((sx, sy));
                        break;
                    }
                }
            }

            if let Some((sx, sy)) = found {
                let (w, h) = grow_match(&sample, &covered, width, height, sx, sy, dx, dy, &claimed);
                mark_covered(&mut covered, width, dx, dy, w, h);
                matches.push(Match { sx, sy, dx, dy, w, h });
            }

            index.entry(key).or_default().push((dx, dy));
        }
    }

    matches.sort_by_key(|m| (m.dy, m.dx));
    matches
}

fn block_key(sample: &impl Fn(u32, u32) -> u32, x0: u32, y0: u32, w: u32, h: u32) -> Vec<u32> {
    let mut key = Vec::with_capacity((w * h) as usize);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            key.push(sample(x, y));
        }
    }
    key
}

fn region_free(covered: &[bool], width: u32, x0: u32, y0: u32, w: u32, h: u32) -> bool {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            if covered[y as usize * width as usize + x as usize] {
                return false;
            }
        }
    }
    true
}

fn mark_covered(covered: &mut [bool], width: u32, x0: u32, y0: u32, w: u32, h: u32) {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            covered[y as usize * width as usize + x as usize] = true;
        }
    }
}

/// Grow an accepted `ZONEW x ZONEH` seed match as far right/down as the
/// source and destination pixels keep matching and stay inside the image
/// and both rectangles remain uncovered/unclaimed.
#[allow(clippy::too_many_arguments)]
fn grow_match(
    sample: &impl Fn(u32, u32) -> u32,
    covered: &[bool],
    width: u32,
    height: u32,
    sx: u32,
    sy: u32,
    dx: u32,
    dy: u32,
    claimed: &impl Fn(u32, u32) -> bool,
) -> (u32, u32) {
    let mut w = ZONEW;
    let mut h = ZONEH;

    let can_extend_right = |w: u32, h: u32| -> bool {
        if sx + w >= width || dx + w >= width {
            return false;
        }
        for y in 0..h {
            if sample(sx + w, sy + y) != sample(dx + w, dy + y) {
                return false;
            }
            if covered[(dy + y) as usize * width as usize + (dx + w) as usize]
                || claimed(dx + w, dy + y)
            {
                return false;
            }
        }
        true
    };
    while can_extend_right(w, h) {
        w += 1;
    }

    let can_extend_down = |w: u32, h: u32| -> bool {
        if sy + h >= height || dy + h >= height {
            return false;
        }
        for x in 0..w {
            if sample(sx + x, sy + h) != sample(dx + x, dy + h) {
                return false;
            }
            if covered[(dy + h) as usize * width as usize + (dx + x) as usize]
                || claimed(dx + x, dy + h)
            {
                return false;
            }
        }
        true
    };
    while can_extend_down(w, h) {
        h += 1;
    }

    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_sample(w: u32) -> impl Fn(u32, u32) -> u32 {
        move |x, y| ((x / 8 + y / 8) % 2) as u32 * 0xffffff + (x % w)
    }

    #[test]
    fn duplicated_rectangle_is_found() {
        // Build a plane where a 8x8 block at (0,0) is exactly repeated at
        // (16, 0).
        let width = 32;
        let height = 8;
        let sample = move |x: u32, y: u32| -> u32 {
            let bx = x % 16;
            bx * 31 + y * 17
        };
        let matches = find_matches(width, height, sample, |_, _| false, true);
        assert!(!matches.is_empty());
        for m in &matches {
            assert!(m.geometry_valid(width, height));
            for dy in 0..m.h {
                for dx in 0..m.w {
                    assert_eq!(sample(m.sx + dx, m.sy + dy), sample(m.dx + dx, m.dy + dy));
                }
            }
        }
    }

    #[test]
    fn no_matches_when_disabled() {
        let sample = checker_sample(32);
        let matches = find_matches(32, 32, sample, |_, _| false, false);
        assert!(matches.is_empty());
    }

    #[test]
    fn matches_never_overlap() {
        let width = 40;
        let height = 16;
        let sample = move |x: u32, y: u32| -> u32 {
            let bx = x % 20;
            bx * 7 + y * 3
        };
        let matches = find_matches(width, height, sample, |_, _| false, true);
        let mut covered = alloc::vec![false; (width * height) as usize];
        for m in &matches {
            for y in m.dy..m.dy + m.h {
                for x in m.dx..m.dx + m.w {
                    let idx = y as usize * width as usize + x as usize;
                    assert!(!covered[idx], "overlap at ({x},{y})");
                    covered[idx] = true;
                }
            }
        }
    }

    #[test]
    fn claimed_pixels_are_never_covered() {
        let width = 32;
        let height = 8;
        let sample = move |x: u32, y: u32| -> u32 {
            let bx = x % 16;
            bx * 31 + y * 17
        };
        let claimed = |x: u32, _y: u32| x >= 16 && x < 20;
        let matches = find_matches(width, height, sample, claimed, true);
        for m in &matches {
            for y in m.dy..m.dy + m.h {
                for x in m.dx..m.dx + m.w {
                    assert!(!claimed(x, y));
                }
            }
        }
    }
}
