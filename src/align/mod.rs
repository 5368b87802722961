//! Banded Levenshtein prefix alignment.
//!
//! The aligner matches one sequence against a prefix of another under a
//! bounded error budget, using the diagonal formulation traditional in
//! overlap aligners: state is indexed by error count `e` and diagonal
//! `d = j - i`, and each cell records the farthest row reachable with
//! exactly `e` errors along `d`. When the band collapses before either
//! sequence is exhausted, the best branch point seen so far is reported
//! instead of a complete match.

mod delta;
mod matrix;

pub use delta::{Delta, DeltaEvent, Indel};

use crate::bounds::ErrorModel;
use matrix::EditMatrix;

/// Score added per matched base when evaluating branch points.
const BRANCH_PT_MATCH_VALUE: f64 = 0.272;

/// Outcome of a prefix alignment.
#[derive(Debug, Clone)]
pub struct PrefixAlignment {
    /// Indel encoding of the alignment.
    pub delta: Delta,
    /// One past the last aligned position in the first sequence.
    pub a_end: usize,
    /// One past the last aligned position in the second sequence.
    pub b_end: usize,
    /// Number of errors in the alignment.
    pub errors: usize,
    /// True when the alignment reached the end of either sequence; false
    /// when it was truncated at a branch point.
    pub match_to_end: bool,
}

/// Prefix aligner with its own DP storage.
///
/// Each worker thread owns one `Aligner`; the backing storage is sized once
/// from the error model and reused across calls.
#[derive(Debug)]
pub struct Aligner<'m> {
    model: &'m ErrorModel,
    matrix: EditMatrix,
}

impl<'m> Aligner<'m> {
    /// Allocate DP storage for the model's maximum error count.
    pub fn new(model: &'m ErrorModel) -> Self {
        Self {
            model,
            matrix: EditMatrix::new(model.max_errors()),
        }
    }

    /// Align `a` against a prefix of `t` (or `t` against a prefix of `a`)
    /// with at most `error_limit` errors.
    ///
    /// Returns the minimum-error alignment if one reaches an endpoint within
    /// the budget, otherwise the best branch-point truncation observed while
    /// the band was still live.
    pub fn prefix_align(&mut self, a: &[u8], t: &[u8], error_limit: usize) -> PrefixAlignment {
        let error_limit = error_limit.min(self.model.max_errors() - 1);
        let m = a.len() as i32;
        let n = t.len() as i32;
        let shorter = m.min(n);

        let mut row = 0i32;
        while row < shorter && a[row as usize] == t[row as usize] {
            row += 1;
        }
        self.matrix.set(0, 0, row);

        if row == shorter {
            return PrefixAlignment {
                delta: Delta::empty(),
                a_end: row as usize,
                b_end: row as usize,
                errors: 0,
                match_to_end: true,
            };
        }

        let mut left = 0i32;
        let mut right = 0i32;
        let mut best_d = 0i32;
        let mut best_e = 0usize;
        let mut longest = 0i32;
        let mut max_score = 0.0f64;
        let mut max_score_len = 0i32;
        let mut max_score_d = 0i32;
        let mut max_score_e = 0usize;

        for e in 1..=error_limit {
            let ei = e as i32;
            left = (left - 1).max(-ei);
            right = (right + 1).min(ei);
            self.matrix.set(e - 1, left, -2);
            self.matrix.set(e - 1, left - 1, -2);
            self.matrix.set(e - 1, right, -2);
            self.matrix.set(e - 1, right + 1, -2);

            for d in left..=right {
                let mut row = 1 + self.matrix.get(e - 1, d);
                let j = self.matrix.get(e - 1, d - 1);
                if j > row {
                    row = j;
                }
                let j = 1 + self.matrix.get(e - 1, d + 1);
                if j > row {
                    row = j;
                }
                while row < m && row + d < n && a[row as usize] == t[(row + d) as usize] {
                    row += 1;
                }
                self.matrix.set(e, d, row);

                if row == m || row + d == n {
                    // Force the last error to be a mismatch rather than an
                    // insertion; downstream vote analysis depends on this
                    // tie-break.
                    let mut d = d;
                    if row == m
                        && 1 + self.matrix.get(e - 1, d + 1) == self.matrix.get(e, d)
                        && d < right
                    {
                        d += 1;
                        let inherited = self.matrix.get(e, d - 1);
                        self.matrix.set(e, d, inherited);
                    }
                    return PrefixAlignment {
                        delta: Delta::from_backtrace(&self.matrix, e, d, row),
                        a_end: row as usize,
                        b_end: (row + d) as usize,
                        errors: e,
                        match_to_end: true,
                    };
                }
            }

            let limit = self.model.edit_match_limit(e);
            while left <= right && left < 0 && self.matrix.get(e, left) < limit {
                left += 1;
            }
            if left >= 0 {
                while left <= right && self.matrix.get(e, left) + left < limit {
                    left += 1;
                }
            }
            if left > right {
                break;
            }
            while right > 0 && self.matrix.get(e, right) + right < limit {
                right -= 1;
            }
            if right <= 0 {
                while self.matrix.get(e, right) < limit {
                    right -= 1;
                }
            }
            assert!(left <= right, "alignment band collapsed inconsistently");

            for d in left..=right {
                if self.matrix.get(e, d) > longest {
                    best_d = d;
                    best_e = e;
                    longest = self.matrix.get(e, d);
                }
            }

            let score = longest as f64 * BRANCH_PT_MATCH_VALUE - e as f64;
            let olap = longest.min(longest + best_d).max(0) as usize;
            if score > max_score && best_e <= self.model.error_bound(olap) {
                max_score = score;
                max_score_len = longest;
                max_score_d = best_d;
                max_score_e = best_e;
            }
        }

        PrefixAlignment {
            delta: Delta::from_backtrace(&self.matrix, max_score_e, max_score_d, max_score_len),
            a_end: max_score_len as usize,
            b_end: (max_score_len + max_score_d) as usize,
            errors: max_score_e,
            match_to_end: false,
        }
    }
}
