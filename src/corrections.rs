//! The correction stream: fixed-size records and the emitter that walks
//! final tallies to produce them.
//!
//! Records are 8 bytes, little-endian, so downstream consumers can
//! memory-map a correction file and walk it directly:
//!
//! ```text
//! byte 0      tag: 1 = ID record, 0 = correction record
//! byte 1      ID: keep flags (bit 0 left, bit 1 right); correction: type
//! bytes 2..4  reserved, zero
//! bytes 4..8  ID: iid; correction: position (u32 LE)
//! ```

use std::io::{Read, Write};

use log::info;
use thiserror::Error;

use crate::frags::{FragSet, ReadVotes};
use crate::vote::Base;
use crate::CorrectConfig;

/// Size of one record on disk.
pub const RECORD_LEN: usize = 8;

/// This many or more votes for the same base indicate a separate
/// haplotype rather than an error.
const MIN_HAPLO_OCCURS: u8 = 3;

/// Kind of change a correction record requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionKind {
    /// Remove the base at `pos`.
    Delete,
    /// Replace the base at `pos`.
    Subst(Base),
    /// Insert a base after `pos`.
    Insert(Base),
    /// Extend the clear range by `pos` bases.
    Extension,
}

impl CorrectionKind {
    fn code(self) -> u8 {
        match self {
            CorrectionKind::Delete => 0,
            CorrectionKind::Subst(Base::A) => 1,
            CorrectionKind::Subst(Base::C) => 2,
            CorrectionKind::Subst(Base::G) => 3,
            CorrectionKind::Subst(Base::T) => 4,
            CorrectionKind::Insert(Base::A) => 5,
            CorrectionKind::Insert(Base::C) => 6,
            CorrectionKind::Insert(Base::G) => 7,
            CorrectionKind::Insert(Base::T) => 8,
            CorrectionKind::Extension => 9,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => CorrectionKind::Delete,
            1 => CorrectionKind::Subst(Base::A),
            2 => CorrectionKind::Subst(Base::C),
            3 => CorrectionKind::Subst(Base::G),
            4 => CorrectionKind::Subst(Base::T),
            5 => CorrectionKind::Insert(Base::A),
            6 => CorrectionKind::Insert(Base::C),
            7 => CorrectionKind::Insert(Base::G),
            8 => CorrectionKind::Insert(Base::T),
            9 => CorrectionKind::Extension,
            _ => return None,
        })
    }
}

/// One record of the correction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionRecord {
    /// Announces a read; precedes all of its correction records.
    Id {
        /// The read's identifier.
        iid: u32,
        /// Keep the left end (its overlap degree was below threshold).
        keep_left: bool,
        /// Keep the right end.
        keep_right: bool,
    },
    /// A single-base change (or clear-range extension) for the current read.
    Correction {
        /// Position within the read, or the extension length.
        pos: u32,
        /// What to do there.
        kind: CorrectionKind,
    },
}

impl CorrectionRecord {
    /// Encode into the on-disk layout.
    pub fn to_bytes(self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        match self {
            CorrectionRecord::Id {
                iid,
                keep_left,
                keep_right,
            } => {
                bytes[0] = 1;
                bytes[1] = (keep_left as u8) | ((keep_right as u8) << 1);
                bytes[4..8].copy_from_slice(&iid.to_le_bytes());
            }
            CorrectionRecord::Correction { pos, kind } => {
                bytes[1] = kind.code();
                bytes[4..8].copy_from_slice(&pos.to_le_bytes());
            }
        }
        bytes
    }

    /// Decode one on-disk record.
    pub fn from_bytes(bytes: [u8; RECORD_LEN]) -> Result<Self, CorrectionError> {
        let value = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        match bytes[0] {
            1 => Ok(CorrectionRecord::Id {
                iid: value,
                keep_left: bytes[1] & 1 != 0,
                keep_right: bytes[1] & 2 != 0,
            }),
            0 => Ok(CorrectionRecord::Correction {
                pos: value,
                kind: CorrectionKind::from_code(bytes[1])
                    .ok_or(CorrectionError::BadType { code: bytes[1] })?,
            }),
            tag => Err(CorrectionError::BadTag { tag }),
        }
    }
}

/// Defects in a correction stream being read back.
#[derive(Debug, Error)]
pub enum CorrectionError {
    /// Underlying I/O failure.
    #[error("correction stream I/O: {0}")]
    Io(#[from] std::io::Error),
    /// A record carried an unknown tag byte.
    #[error("unknown record tag {tag}")]
    BadTag {
        /// The tag byte.
        tag: u8,
    },
    /// A correction record carried an unknown type code.
    #[error("unknown correction type {code}")]
    BadType {
        /// The type code.
        code: u8,
    },
    /// The stream ended inside a record.
    #[error("correction stream is truncated")]
    Truncated,
}

/// Iterator over the records of a correction stream.
#[derive(Debug)]
pub struct CorrectionReader<R: Read> {
    source: R,
}

impl<R: Read> CorrectionReader<R> {
    /// Wrap a byte source.
    pub fn new(source: R) -> Self {
        Self { source }
    }
}

impl<R: Read> Iterator for CorrectionReader<R> {
    type Item = Result<CorrectionRecord, CorrectionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut bytes = [0u8; RECORD_LEN];
        let mut filled = 0usize;
        while filled < RECORD_LEN {
            match self.source.read(&mut bytes[filled..]) {
                Ok(0) => {
                    return if filled == 0 {
                        None
                    } else {
                        Some(Err(CorrectionError::Truncated))
                    }
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
        Some(CorrectionRecord::from_bytes(bytes))
    }
}

/// Statistics from one emitter pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmitStats {
    /// Reads walked.
    pub reads: usize,
    /// Reads whose clear range was (possibly trivially) extended.
    pub extension_ct: usize,
    /// Total bases of extension across those reads.
    pub extension_sum: i64,
}

impl EmitStats {
    /// Mean 3' extension, in bases.
    pub fn mean_extension(&self) -> f64 {
        if self.extension_ct == 0 {
            0.0
        } else {
            self.extension_sum as f64 / self.extension_ct as f64
        }
    }
}

/// Walk final tallies in read order and append correction records to `out`.
pub fn emit_corrections<W: Write>(
    frags: &FragSet,
    votes: &[ReadVotes],
    config: &CorrectConfig,
    out: &mut W,
) -> Result<EmitStats, CorrectionError> {
    let mut stats = EmitStats::default();

    for (sub, frag) in frags.frags.iter().enumerate() {
        let rv = &votes[sub];
        stats.reads += 1;

        out.write_all(
            &CorrectionRecord::Id {
                iid: frags.lo + sub as u32,
                keep_left: rv.left_degree < config.degree_threshold,
                keep_right: rv.right_degree < config.degree_threshold,
            }
            .to_bytes(),
        )?;
        if frag.deleted {
            continue;
        }

        let mut last_conf = frag.clear_len as i64 - 1;
        if config.extend_fragments {
            let mut j = frag.clear_len;
            while j < frag.seq.len() {
                if rv.votes[j].confirmed > 0 {
                    last_conf = j as i64;
                } else if j as i64 - last_conf > 2 * config.end_exclude_len as i64 + 1 {
                    break;
                }
                j += 1;
            }
            let extension = 1 + last_conf - frag.clear_len as i64;
            stats.extension_sum += extension;
            stats.extension_ct += 1;
            out.write_all(
                &CorrectionRecord::Correction {
                    pos: extension as u32,
                    kind: CorrectionKind::Extension,
                }
                .to_bytes(),
            )?;
        }

        for j in 0..(last_conf + 1) as usize {
            let tally = &rv.votes[j];

            if tally.confirmed < 2 {
                if let Some(kind) = choose_substitution(tally, frag.seq[j], config) {
                    out.write_all(
                        &CorrectionRecord::Correction {
                            pos: j as u32,
                            kind,
                        }
                        .to_bytes(),
                    )?;
                }
            }

            if tally.no_insert < 2 {
                if let Some(kind) = choose_insertion(tally, config) {
                    out.write_all(
                        &CorrectionRecord::Correction {
                            pos: j as u32,
                            kind,
                        }
                        .to_bytes(),
                    )?;
                }
            }
        }
    }

    info!("corrections emitted for {} reads", stats.reads);
    if config.extend_fragments {
        info!(
            "mean 3' extension {:.1} bases over {} reads",
            stats.mean_extension(),
            stats.extension_ct
        );
    }

    Ok(stats)
}

/// Pick the winning substitution-family action (DELETE competes here), or
/// `None` when no action clears the majority and gating rules.
fn choose_substitution(
    tally: &crate::vote::VoteTally,
    current: u8,
    config: &CorrectConfig,
) -> Option<CorrectionKind> {
    let mut haplo_ct = 0u32;
    let mut kind = CorrectionKind::Delete;
    let mut max = tally.deletes as u32;
    let mut total = max;
    let mut is_change = true;
    if tally.deletes >= MIN_HAPLO_OCCURS {
        haplo_ct += 1;
    }

    let candidates = [
        (tally.a_subst, Base::A),
        (tally.c_subst, Base::C),
        (tally.g_subst, Base::G),
        (tally.t_subst, Base::T),
    ];
    for (count, base) in candidates {
        let count_u32 = count as u32;
        total += count_u32;
        if count_u32 > max {
            max = count_u32;
            kind = CorrectionKind::Subst(base);
            is_change = current != base.to_ascii();
        }
        if count >= MIN_HAPLO_OCCURS {
            haplo_ct += 1;
        }
    }

    let confirmed_ok =
        tally.confirmed == 0 || (tally.confirmed == 1 && max > 6);
    if 2 * max > total
        && total > 1
        && is_change
        && (haplo_ct < 2 || !config.use_haplo_ct)
        && confirmed_ok
    {
        Some(kind)
    } else {
        None
    }
}

/// Pick the winning insertion, independent of the substitution family.
fn choose_insertion(
    tally: &crate::vote::VoteTally,
    config: &CorrectConfig,
) -> Option<CorrectionKind> {
    let mut haplo_ct = 0u32;
    let mut kind = CorrectionKind::Insert(Base::A);
    let mut max = tally.a_insert as u32;
    let mut total = max;
    if tally.a_insert >= MIN_HAPLO_OCCURS {
        haplo_ct += 1;
    }

    let candidates = [
        (tally.c_insert, Base::C),
        (tally.g_insert, Base::G),
        (tally.t_insert, Base::T),
    ];
    for (count, base) in candidates {
        let count_u32 = count as u32;
        total += count_u32;
        if count_u32 > max {
            max = count_u32;
            kind = CorrectionKind::Insert(base);
        }
        if count >= MIN_HAPLO_OCCURS {
            haplo_ct += 1;
        }
    }

    let no_insert_ok =
        tally.no_insert == 0 || (tally.no_insert == 1 && max > 6);
    if 2 * max > total && total > 1 && (haplo_ct < 2 || !config.use_haplo_ct) && no_insert_ok {
        Some(kind)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frags::Frag;
    use crate::vote::VoteTally;

    fn config() -> CorrectConfig {
        CorrectConfig::for_range(1, 1)
    }

    fn frag_set(seq: &[u8]) -> FragSet {
        FragSet {
            lo: 1,
            hi: 1,
            frags: vec![Frag {
                seq: seq.to_vec(),
                clear_len: seq.len(),
                shredded: false,
                deleted: false,
            }],
        }
    }

    fn votes_for(set: &FragSet) -> Vec<ReadVotes> {
        set.new_votes()
    }

    fn records(bytes: &[u8]) -> Vec<CorrectionRecord> {
        CorrectionReader::new(bytes)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn record_codec_round_trips() {
        let samples = [
            CorrectionRecord::Id {
                iid: 41,
                keep_left: true,
                keep_right: false,
            },
            CorrectionRecord::Correction {
                pos: 1023,
                kind: CorrectionKind::Subst(Base::G),
            },
            CorrectionRecord::Correction {
                pos: 0,
                kind: CorrectionKind::Extension,
            },
        ];
        for record in samples {
            assert_eq!(CorrectionRecord::from_bytes(record.to_bytes()).unwrap(), record);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0] = 7;
        assert!(matches!(
            CorrectionRecord::from_bytes(bytes),
            Err(CorrectionError::BadTag { tag: 7 })
        ));
    }

    #[test]
    fn majority_substitution_is_emitted() {
        let set = frag_set(b"acgt");
        let mut votes = votes_for(&set);
        votes[0].votes[2].g_subst = 0;
        votes[0].votes[2].t_subst = 5;
        let mut out = Vec::new();
        emit_corrections(&set, &votes, &config(), &mut out).unwrap();
        let recs = records(&out);
        assert_eq!(recs.len(), 2);
        assert_eq!(
            recs[1],
            CorrectionRecord::Correction {
                pos: 2,
                kind: CorrectionKind::Subst(Base::T)
            }
        );
    }

    #[test]
    fn vote_for_current_base_is_not_a_change() {
        let set = frag_set(b"acgt");
        let mut votes = votes_for(&set);
        votes[0].votes[2].g_subst = 5;
        let mut out = Vec::new();
        emit_corrections(&set, &votes, &config(), &mut out).unwrap();
        assert_eq!(records(&out).len(), 1);
    }

    #[test]
    fn two_haplotypes_suppress_the_correction() {
        let set = frag_set(b"acgt");
        let mut votes = votes_for(&set);
        votes[0].votes[1].t_subst = 7;
        votes[0].votes[1].deletes = 3;
        let mut out = Vec::new();
        emit_corrections(&set, &votes, &config(), &mut out).unwrap();
        assert_eq!(records(&out).len(), 1);

        // With haplotype gating off the majority wins again.
        let mut cfg = config();
        cfg.use_haplo_ct = false;
        let mut out = Vec::new();
        emit_corrections(&set, &votes, &cfg, &mut out).unwrap();
        assert_eq!(records(&out).len(), 2);
    }

    #[test]
    fn confirmed_base_needs_a_strong_majority() {
        let set = frag_set(b"acgt");
        let mut votes = votes_for(&set);
        votes[0].votes[3].confirmed = 1;
        votes[0].votes[3].a_subst = 5;
        let mut out = Vec::new();
        emit_corrections(&set, &votes, &config(), &mut out).unwrap();
        // Five votes against one confirmation is not enough (max <= 6).
        assert_eq!(records(&out).len(), 1);

        votes[0].votes[3].a_subst = 7;
        let mut out = Vec::new();
        emit_corrections(&set, &votes, &config(), &mut out).unwrap();
        assert_eq!(records(&out).len(), 2);
    }

    #[test]
    fn insertions_are_decided_independently() {
        let set = frag_set(b"acgt");
        let mut votes = votes_for(&set);
        votes[0].votes[1].c_insert = 4;
        votes[0].votes[1].g_subst = 4;
        let mut out = Vec::new();
        emit_corrections(&set, &votes, &config(), &mut out).unwrap();
        let recs = records(&out);
        assert_eq!(recs.len(), 3);
        assert_eq!(
            recs[1],
            CorrectionRecord::Correction {
                pos: 1,
                kind: CorrectionKind::Subst(Base::G)
            }
        );
        assert_eq!(
            recs[2],
            CorrectionRecord::Correction {
                pos: 1,
                kind: CorrectionKind::Insert(Base::C)
            }
        );
    }

    #[test]
    fn extension_record_reports_confirmed_tail() {
        let set = {
            let mut set = frag_set(b"acgtacgtac");
            set.frags[0].clear_len = 6;
            set
        };
        let mut votes = votes_for(&set);
        for j in 6..9 {
            votes[0].votes[j].confirmed = 1;
        }
        let mut cfg = config();
        cfg.extend_fragments = true;
        let mut out = Vec::new();
        let stats = emit_corrections(&set, &votes, &cfg, &mut out).unwrap();
        assert_eq!(stats.extension_ct, 1);
        assert_eq!(stats.extension_sum, 3);
        let recs = records(&out);
        assert_eq!(
            recs[1],
            CorrectionRecord::Correction {
                pos: 3,
                kind: CorrectionKind::Extension
            }
        );
    }

    #[test]
    fn emitter_is_idempotent() {
        let set = frag_set(b"acgtacgt");
        let mut votes = votes_for(&set);
        votes[0].votes[4].deletes = 3;
        let mut first = Vec::new();
        emit_corrections(&set, &votes, &config(), &mut first).unwrap();
        let mut second = Vec::new();
        emit_corrections(&set, &votes, &config(), &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn deleted_read_gets_only_an_id_record() {
        let mut set = frag_set(b"");
        set.frags[0].deleted = true;
        let votes = votes_for(&set);
        let mut out = Vec::new();
        emit_corrections(&set, &votes, &config(), &mut out).unwrap();
        let recs = records(&out);
        assert_eq!(recs.len(), 1);
        assert!(matches!(
            recs[0],
            CorrectionRecord::Id {
                iid: 1,
                keep_left: true,
                keep_right: true
            }
        ));
    }
}
