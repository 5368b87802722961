//! Error-budget tables for the banded aligner.
//!
//! Two fixed tables are computed once per run:
//!
//! * `error_bound[n]` — the maximum number of errors tolerated in a match
//!   between sequences of length `n`, i.e. `n * ERROR_RATE` truncated.
//! * `edit_match_limit[e]` — the minimum row the banded edit-distance
//!   computation must have reached at error level `e` for a diagonal to be
//!   worth pursuing, derived from a binomial/Poisson tail bound.

/// Permissible overlap error rate. Matches lengths are budgeted against it.
pub const ERROR_RATE: f64 = 0.06;

/// Longest read the aligner is dimensioned for.
pub const MAX_READ_LEN: usize = 2048;

/// Errors ignored when setting the probability bound that terminates
/// alignment extension.
pub const ERRORS_FOR_FREE: usize = 1;

/// Probability limit used to band the edit-distance calculation.
const EDIT_DIST_PROB_BOUND: f64 = 1e-4;

/// Standardized-deviate threshold below which the normal approximation
/// accepts a trial count outright. Determined by `EDIT_DIST_PROB_BOUND`.
const NORMAL_DISTRIB_THOLD: f64 = 3.62;

/// Precomputed per-length error ceilings and per-error match-length
/// thresholds shared by every aligner in a run.
#[derive(Debug)]
pub struct ErrorModel {
    error_bound: Vec<usize>,
    edit_match_limit: Vec<i32>,
    max_errors: usize,
}

impl ErrorModel {
    /// Build both tables for reads up to [`MAX_READ_LEN`].
    ///
    /// Panics if the match-limit table comes out non-monotonic, which would
    /// indicate a broken tail-bound computation.
    pub fn new() -> Self {
        let max_errors = 1 + (MAX_READ_LEN as f64 * ERROR_RATE) as usize;

        let error_bound: Vec<usize> = (0..=MAX_READ_LEN)
            .map(|n| (n as f64 * ERROR_RATE) as usize)
            .collect();

        let mut edit_match_limit = vec![0i32; max_errors];
        let mut start = 1;
        for e in (ERRORS_FOR_FREE + 1)..max_errors {
            start = binomial_bound(
                e - ERRORS_FOR_FREE,
                ERROR_RATE,
                start,
                EDIT_DIST_PROB_BOUND,
            );
            edit_match_limit[e] = start as i32 - 1;
            assert!(
                edit_match_limit[e] >= edit_match_limit[e - 1],
                "edit match limit must be non-decreasing"
            );
        }

        Self {
            error_bound,
            edit_match_limit,
            max_errors,
        }
    }

    /// Maximum errors allowed in a match of length `len`.
    #[inline]
    pub fn error_bound(&self, len: usize) -> usize {
        self.error_bound[len]
    }

    /// Minimum worthwhile row at error level `e`.
    #[inline]
    pub fn edit_match_limit(&self, e: usize) -> i32 {
        self.edit_match_limit[e]
    }

    /// Number of error levels the DP storage must accommodate.
    #[inline]
    pub fn max_errors(&self) -> usize {
        self.max_errors
    }
}

impl Default for ErrorModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest `n >= start` such that the probability of `e` or more errors in
/// `n` independent trials with error probability `p` exceeds `limit`.
///
/// Uses the exact binomial sum for `n <= 35` and a Poisson approximation
/// with a normal-distribution guard for larger `n`.
fn binomial_bound(e: usize, p: f64, start: usize, limit: f64) -> usize {
    let q = 1.0 - p;
    let start = start.max(e);

    for n in start..MAX_READ_LEN {
        if n <= 35 {
            let mut sum = 0.0;
            let mut bin_coeff: i64 = 1;
            let mut ct: i64 = 0;
            let mut p_power = 1.0;
            let mut q_power = q.powi(n as i32);

            for _ in 0..e {
                if 1.0 - sum <= limit {
                    break;
                }
                sum += bin_coeff as f64 * p_power * q_power;
                bin_coeff *= n as i64 - ct;
                ct += 1;
                bin_coeff /= ct;
                p_power *= p;
                q_power /= q;
            }
            if 1.0 - sum > limit {
                return n;
            }
        } else {
            let mean = n as f64 * p;
            let normal_z = (e as f64 - 0.5 - mean) / (mean * q).sqrt();
            if normal_z <= NORMAL_DISTRIB_THOLD {
                return n;
            }
            let mut sum = 0.0;
            let mut mu_power = 1.0;
            let mut factorial = 1.0;
            let poisson_coeff = (-mean).exp();
            for k in 0..e {
                sum += mu_power * poisson_coeff / factorial;
                mu_power *= mean;
                factorial *= (k + 1) as f64;
            }
            if 1.0 - sum > limit {
                return n;
            }
        }
    }

    MAX_READ_LEN
}
