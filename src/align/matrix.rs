//! Flat storage for the banded edit-distance state.

/// Triangular DP array indexed by error count `e` and diagonal `d = j - i`.
///
/// Row `e` spans diagonals `-(e + 2) ..= e + 2`: the band itself reaches
/// `[-e, e]`, and the two extra diagonals on each side absorb the sentinel
/// writes that seal the previous row's band edges. Rows live in one flat
/// slab with precomputed per-row centers.
#[derive(Debug)]
pub(crate) struct EditMatrix {
    cells: Vec<i32>,
    center: Vec<usize>,
    rows: usize,
}

impl EditMatrix {
    pub(crate) fn new(rows: usize) -> Self {
        let mut center = Vec::with_capacity(rows);
        let mut len = 0usize;
        for e in 0..rows {
            center.push(len + e + 2);
            len += 2 * e + 5;
        }
        Self {
            cells: vec![0; len],
            center,
            rows,
        }
    }

    #[inline]
    fn index(&self, e: usize, d: i32) -> usize {
        debug_assert!(e < self.rows);
        debug_assert!((d.unsigned_abs() as usize) <= e + 2);
        (self.center[e] as isize + d as isize) as usize
    }

    #[inline]
    pub(crate) fn get(&self, e: usize, d: i32) -> i32 {
        self.cells[self.index(e, d)]
    }

    #[inline]
    pub(crate) fn set(&mut self, e: usize, d: i32, value: i32) {
        let idx = self.index(e, d);
        self.cells[idx] = value;
    }
}
