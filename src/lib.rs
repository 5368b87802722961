//! # Overlap-based read correction
//!
//! Given a store of DNA fragment reads and precomputed pairwise overlaps
//! among them, this library recomputes each overlap at base-level
//! resolution, aggregates per-base evidence into vote tallies on a
//! designated range of reads, and emits a compact stream of single-base
//! corrections (substitutions, deletions, insertions) to apply before
//! later assembly stages.
//!
//! ## Pipeline
//!
//! 1. **Load** the A-read range from the read store ([`store`], [`frags`]).
//! 2. **Sort** overlaps by `(b_iid, a_iid)` and stream B-reads in batches,
//!    re-aligning every overlap with the banded prefix aligner
//!    ([`overlap`], [`driver`], [`align`]).
//! 3. **Vote**: each alignment casts confirm/substitute/insert/delete
//!    evidence into the A-read's tallies ([`vote`]).
//! 4. **Emit**: walk the final tallies and write the correction stream
//!    ([`corrections`]).
//!
//! ## Usage example
//!
//! ```no_run
//! use fragcorrect::{CorrectConfig, Corrector};
//! use fragcorrect::store::FastaStore;
//! use fragcorrect::overlap::load_text_overlaps;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FastaStore::from_path("reads.fasta")?;
//! let config = CorrectConfig::for_range(1, 1000);
//! let overlaps = load_text_overlaps("overlaps.txt", 1, 1000)?;
//! let mut out = std::fs::File::create("frag.cor")?;
//! let summary = Corrector::new(store, config)?.run(overlaps, &mut out)?;
//! eprintln!("{} overlaps failed their error budget", summary.failed_olaps);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod align;
pub mod bounds;
pub mod corrections;
pub mod driver;
pub mod frags;
pub mod overlap;
pub mod store;
pub mod vote;

pub use bounds::ErrorModel;
pub use corrections::{CorrectionKind, CorrectionReader, CorrectionRecord};
pub use overlap::{Orientation, Overlap};
pub use store::{FastaStore, ReadStore};

use log::info;
use thiserror::Error;

use corrections::EmitStats;
use frags::FragSet;
use store::StoreError;

/// Tunables controlling correction of one read range.
#[derive(Debug, Clone)]
pub struct CorrectConfig {
    /// First A-read identifier to correct.
    pub lo_iid: u32,
    /// Last A-read identifier to correct.
    pub hi_iid: u32,
    /// Keep an end flag set when fewer than this many overlaps cover it.
    pub degree_threshold: u16,
    /// Minimum exact-match run that confirms base pairs.
    pub kmer_len: usize,
    /// Matched bases that must surround a discrepancy for it to vote.
    pub vote_qualify_len: usize,
    /// Length at each end of an exact run excluded from confirmation.
    pub end_exclude_len: usize,
    /// Try to extend each read's clear range over confirmed tail bases.
    pub extend_fragments: bool,
    /// Suppress corrections where vote counts suggest two haplotypes.
    pub use_haplo_ct: bool,
    /// Worker threads; 0 selects the single-threaded path.
    pub num_threads: usize,
}

impl CorrectConfig {
    /// Defaults for correcting reads `lo..=hi`.
    pub fn for_range(lo: u32, hi: u32) -> Self {
        Self {
            lo_iid: lo,
            hi_iid: hi,
            degree_threshold: 2,
            kmer_len: 9,
            vote_qualify_len: 9,
            end_exclude_len: 3,
            extend_fragments: false,
            use_haplo_ct: true,
            num_threads: 2,
        }
    }
}

/// Everything that can go wrong while correcting.
#[derive(Debug, Error)]
pub enum CorrectError {
    /// Invalid run configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// An overlap named an A-read outside the corrected range.
    #[error("read {iid} is outside the corrected range {lo}..={hi}")]
    IidOutOfRange {
        /// The offending identifier.
        iid: u32,
        /// First iid of the range.
        lo: u32,
        /// Last iid of the range.
        hi: u32,
    },
    /// An overlap named a read the store does not hold.
    #[error("read {iid} is not in the store")]
    IidOutOfStore {
        /// The offending identifier.
        iid: u32,
    },
    /// An overlap hang fell outside its read.
    #[error("overlap {a_iid}/{b_iid}: hang {hang} exceeds the read")]
    BadHang {
        /// A-read identifier.
        a_iid: u32,
        /// B-read identifier.
        b_iid: u32,
        /// The offending hang.
        hang: i32,
    },
    /// The aligner reported endpoints inconsistent with its inputs.
    #[error(
        "bad edit distance for overlap {a_iid}/{b_iid}: \
         a_end {a_end}/{a_len}, b_end {b_end}/{b_len}"
    )]
    BadAlignment {
        /// A-read identifier.
        a_iid: u32,
        /// B-read identifier.
        b_iid: u32,
        /// Reported A endpoint.
        a_end: usize,
        /// A prefix length.
        a_len: usize,
        /// Reported B endpoint.
        b_end: usize,
        /// B prefix length.
        b_len: usize,
    },
    /// A sequence consulted during vote analysis was malformed.
    #[error(transparent)]
    Vote(#[from] vote::VoteError),
    /// The read store could not be loaded.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Overlap input could not be loaded.
    #[error(transparent)]
    Overlap(#[from] overlap::OverlapError),
    /// The correction stream could not be written.
    #[error(transparent)]
    Correction(#[from] corrections::CorrectionError),
    /// General I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A worker thread terminated abnormally.
    #[error("a worker thread panicked")]
    WorkerPanic,
}

/// Counters reported after a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Reads in the corrected range.
    pub num_reads: usize,
    /// Overlaps processed.
    pub num_olaps: usize,
    /// Overlaps that failed their error budget.
    pub failed_olaps: u64,
    /// Reads whose clear range was examined for extension.
    pub extension_ct: usize,
    /// Mean 3' extension in bases.
    pub mean_extension: f64,
}

/// The correction pipeline, owning the read store and configuration.
#[derive(Debug)]
pub struct Corrector<S> {
    store: S,
    config: CorrectConfig,
    model: ErrorModel,
}

impl<S: ReadStore> Corrector<S> {
    /// Validate the configuration against the store and build the numeric
    /// tables shared by every aligner.
    pub fn new(store: S, mut config: CorrectConfig) -> Result<Self, CorrectError> {
        if config.hi_iid == 0 {
            config.hi_iid = store.num_reads();
        }
        if config.lo_iid < 1 || config.lo_iid > config.hi_iid {
            return Err(CorrectError::Config(format!(
                "bad iid range {}..={}",
                config.lo_iid, config.hi_iid
            )));
        }
        if config.hi_iid > store.num_reads() {
            return Err(CorrectError::Config(format!(
                "hi iid {} is past the last read in the store ({})",
                config.hi_iid,
                store.num_reads()
            )));
        }
        if config.kmer_len <= 1 {
            return Err(CorrectError::Config(format!(
                "k-mer length {} is too small",
                config.kmer_len
            )));
        }
        Ok(Self {
            store,
            config,
            model: ErrorModel::new(),
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &CorrectConfig {
        &self.config
    }

    /// Run the full pipeline: sort and stream `overlaps`, then write the
    /// correction stream to `out`.
    pub fn run<W: std::io::Write>(
        &self,
        mut overlaps: Vec<Overlap>,
        out: &mut W,
    ) -> Result<RunSummary, CorrectError> {
        let config = &self.config;

        info!("loading reads {}..={}", config.lo_iid, config.hi_iid);
        let frags = FragSet::load(
            &self.store,
            config.lo_iid,
            config.hi_iid,
            config.extend_fragments,
        )?;

        info!("sorting {} overlaps", overlaps.len());
        overlap::sort_for_processing(&mut overlaps);

        let mut failed_olaps = 0u64;
        let votes = if overlaps.is_empty() {
            frags.new_votes()
        } else if config.num_threads == 0 {
            let mut votes = frags.new_votes();
            failed_olaps = driver::stream_serial(
                &self.store,
                &frags,
                &overlaps,
                &mut votes,
                config,
                &self.model,
            )?;
            votes
        } else {
            let mut shards =
                frags::split_shards(frags.new_votes(), frags.lo, config.num_threads);
            failed_olaps = driver::stream_threaded(
                &self.store,
                &frags,
                &overlaps,
                &mut shards,
                config,
                &self.model,
            )?;
            frags::merge_shards(shards, frags.lo, frags.frags.len())
        };
        info!("{failed_olaps} overlaps failed their error budget");

        let stats: EmitStats = corrections::emit_corrections(&frags, &votes, config, out)?;

        Ok(RunSummary {
            num_reads: frags.frags.len(),
            num_olaps: overlaps.len(),
            failed_olaps,
            extension_ct: stats.extension_ct,
            mean_extension: stats.mean_extension(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::StoredRead;

    #[test]
    fn defaults_match_the_documented_tunables() {
        let config = CorrectConfig::for_range(1, 10);
        assert_eq!(config.degree_threshold, 2);
        assert_eq!(config.kmer_len, 9);
        assert_eq!(config.vote_qualify_len, 9);
        assert_eq!(config.end_exclude_len, 3);
        assert!(!config.extend_fragments);
        assert!(config.use_haplo_ct);
        assert_eq!(config.num_threads, 2);
    }

    #[test]
    fn hi_iid_zero_means_through_the_store() {
        let store = FastaStore::from_reads(vec![
            StoredRead::new(b"acgt".to_vec()),
            StoredRead::new(b"acgt".to_vec()),
        ])
        .unwrap();
        let corrector = Corrector::new(store, CorrectConfig::for_range(1, 0)).unwrap();
        assert_eq!(corrector.config().hi_iid, 2);
    }

    #[test]
    fn out_of_store_range_is_a_config_error() {
        let store = FastaStore::from_reads(vec![StoredRead::new(b"acgt".to_vec())]).unwrap();
        assert!(matches!(
            Corrector::new(store, CorrectConfig::for_range(1, 5)),
            Err(CorrectError::Config(_))
        ));
    }
}
