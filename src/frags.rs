//! The working set of A-reads being corrected, plus their vote arena.
//!
//! Sequences are loaded once and shared read-only across worker threads;
//! the mutable state (tallies and end-degree counters) lives in a separate
//! arena that can be split into per-thread shards by `a_iid mod n`, giving
//! each worker exclusive write access without locks.

use log::warn;

use crate::store::{filter_seq, ReadStore};
use crate::vote::VoteTally;
use crate::CorrectError;

/// Cap on the end-degree counters.
pub(crate) const MAX_DEGREE: u16 = 32_767;

/// One A-read: filtered sequence from the clear-range start, plus the
/// metadata the driver and emitter consult.
#[derive(Debug, Clone)]
pub struct Frag {
    /// Filtered lowercase bases, starting at the clear-range start. Runs to
    /// the clear-range end, or to the full read length when clear-range
    /// extension is enabled.
    pub seq: Vec<u8>,
    /// Length of the trusted prefix of `seq`.
    pub clear_len: usize,
    /// Shredded reads never vote on other shredded reads.
    pub shredded: bool,
    /// Deleted reads keep their slot but take no part in correction.
    pub deleted: bool,
}

/// Mutable per-read correction state: one tally per base plus the two
/// saturating end-degree counters.
#[derive(Debug, Clone, Default)]
pub struct ReadVotes {
    /// One tally per base of the fragment's sequence.
    pub votes: Vec<VoteTally>,
    /// Overlaps covering the left end.
    pub left_degree: u16,
    /// Overlaps covering the right end.
    pub right_degree: u16,
}

impl ReadVotes {
    /// Count an overlap touching the left end.
    #[inline]
    pub fn bump_left(&mut self) {
        if self.left_degree < MAX_DEGREE {
            self.left_degree += 1;
        }
    }

    /// Count an overlap touching the right end.
    #[inline]
    pub fn bump_right(&mut self) {
        if self.right_degree < MAX_DEGREE {
            self.right_degree += 1;
        }
    }
}

/// The contiguous range of A-reads being corrected.
#[derive(Debug)]
pub struct FragSet {
    /// First iid of the range.
    pub lo: u32,
    /// Last iid of the range.
    pub hi: u32,
    /// One entry per iid in `lo..=hi`.
    pub frags: Vec<Frag>,
}

impl FragSet {
    /// Load reads `lo..=hi` from the store, filtering their sequences.
    ///
    /// With `extend` set, sequences run to the full read length so votes
    /// can accumulate beyond the clear range.
    pub fn load<S: ReadStore>(
        store: &S,
        lo: u32,
        hi: u32,
        extend: bool,
    ) -> Result<Self, CorrectError> {
        let mut frags = Vec::with_capacity((hi - lo + 1) as usize);
        let mut rewrites = 0usize;

        for iid in lo..=hi {
            let read = store
                .get(iid)
                .ok_or_else(|| CorrectError::IidOutOfStore { iid })?;
            if read.deleted {
                frags.push(Frag {
                    seq: Vec::new(),
                    clear_len: 0,
                    shredded: false,
                    deleted: true,
                });
                continue;
            }
            let end = if extend { read.seq.len() } else { read.clear_end };
            let (seq, n) = filter_seq(&read.seq[read.clear_start..end]);
            rewrites += n;
            frags.push(Frag {
                seq,
                clear_len: read.clear_len(),
                shredded: read.shredded,
                deleted: false,
            });
        }

        if rewrites > 0 {
            warn!("{rewrites} non-ACGT bases in reads {lo}..={hi} were rewritten to 'a'");
        }

        Ok(Self { lo, hi, frags })
    }

    /// Index of `a_iid` within the set.
    #[inline]
    pub fn sub(&self, a_iid: u32) -> Result<usize, CorrectError> {
        if a_iid < self.lo || a_iid > self.hi {
            return Err(CorrectError::IidOutOfRange {
                iid: a_iid,
                lo: self.lo,
                hi: self.hi,
            });
        }
        Ok((a_iid - self.lo) as usize)
    }

    /// Fresh zeroed vote arena, one [`ReadVotes`] per fragment, each sized
    /// to its sequence.
    pub fn new_votes(&self) -> Vec<ReadVotes> {
        self.frags
            .iter()
            .map(|frag| ReadVotes {
                votes: vec![VoteTally::default(); frag.seq.len()],
                ..ReadVotes::default()
            })
            .collect()
    }
}

/// Partition a vote arena into `n` shards; shard `t` owns the reads whose
/// iid satisfies `iid % n == t`, in ascending sub order.
pub(crate) fn split_shards(votes: Vec<ReadVotes>, lo: u32, n: usize) -> Vec<Vec<ReadVotes>> {
    let mut shards: Vec<Vec<ReadVotes>> = (0..n).map(|_| Vec::new()).collect();
    for (sub, rv) in votes.into_iter().enumerate() {
        let iid = lo + sub as u32;
        shards[(iid % n as u32) as usize].push(rv);
    }
    shards
}

/// Reassemble shards into sub order. `total` is the fragment count.
pub(crate) fn merge_shards(
    mut shards: Vec<Vec<ReadVotes>>,
    lo: u32,
    total: usize,
) -> Vec<ReadVotes> {
    let n = shards.len();
    let mut merged = Vec::with_capacity(total);
    for sub in 0..total {
        let shard = ((lo + sub as u32) % n as u32) as usize;
        let local = sub / n;
        merged.push(std::mem::take(&mut shards[shard][local]));
    }
    merged
}
