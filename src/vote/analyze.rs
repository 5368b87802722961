//! Converting one alignment into votes on the A read.

use crate::align::{Delta, Indel};
use crate::CorrectConfig;

use super::{Base, Vote, VoteError, VoteKind, VoteTally};

fn subst_vote(b_part: &[u8], j: usize) -> Result<VoteKind, VoteError> {
    match Base::from_ascii(b_part[j]) {
        Some(base) => Ok(VoteKind::Subst(base)),
        None => Err(VoteError::BadSequenceByte {
            byte: b_part[j],
            pos: j,
        }),
    }
}

fn insert_vote(b_part: &[u8], j: usize) -> Result<VoteKind, VoteError> {
    match Base::from_ascii(b_part[j]) {
        Some(base) => Ok(VoteKind::Insert(base)),
        None => Err(VoteError::BadSequenceByte {
            byte: b_part[j],
            pos: j,
        }),
    }
}

/// Cast `kind` at A-read position `pos`, dropping votes that would land
/// before the first base (a leading insert with no offset).
#[inline]
fn cast_at(tallies: &mut [VoteTally], pos: i32, kind: VoteKind) {
    if pos >= 0 {
        tallies[pos as usize].cast(kind);
    }
}

/// Analyze the delta-encoded alignment between `a_part` and `b_part` and
/// fold the resulting votes into `tallies` (the A read's full tally slice).
///
/// `a_end` and `b_end` are the aligned prefix lengths; `a_offset` is the
/// number of A positions skipped before the aligned region. Matched runs of
/// at least `kmer_len` columns confirm interior bases (excluding
/// `end_exclude_len` positions at each end of the run); discrepancies vote
/// only when flanked by `vote_qualify_len` total matched columns.
pub fn analyze_alignment(
    delta: &Delta,
    a_part: &[u8],
    b_part: &[u8],
    a_end: usize,
    b_end: usize,
    a_offset: usize,
    tallies: &mut [VoteTally],
    config: &CorrectConfig,
) -> Result<(), VoteError> {
    let mut votes: Vec<Vote> = Vec::with_capacity(delta.len() + a_end / 4 + 2);

    // Leading sentinel; the dummy substitution kind lets the first real
    // event pass the consecutive-insert gate, as an alignment start would.
    votes.push(Vote {
        frag_sub: -1,
        align_sub: -1,
        kind: VoteKind::Subst(Base::A),
    });

    let mut i = 0usize;
    let mut j = 0usize;
    let mut p = 0i32;

    for event in delta.events() {
        for _ in 0..event.matches {
            if a_part[i] != b_part[j] {
                votes.push(Vote {
                    frag_sub: i as i32,
                    align_sub: p,
                    kind: subst_vote(b_part, j)?,
                });
            }
            i += 1;
            j += 1;
            p += 1;
        }
        match event.indel {
            Indel::Insert => {
                votes.push(Vote {
                    frag_sub: i as i32 - 1,
                    align_sub: p,
                    kind: insert_vote(b_part, j)?,
                });
                j += 1;
                p += 1;
            }
            Indel::Delete => {
                votes.push(Vote {
                    frag_sub: i as i32,
                    align_sub: p,
                    kind: VoteKind::Delete,
                });
                i += 1;
                p += 1;
            }
        }
    }

    while i < a_end && j < b_end {
        if a_part[i] != b_part[j] {
            votes.push(Vote {
                frag_sub: i as i32,
                align_sub: p,
                kind: subst_vote(b_part, j)?,
            });
        }
        i += 1;
        j += 1;
        p += 1;
    }

    // Trailing sentinel bounding the final matched run.
    votes.push(Vote {
        frag_sub: i as i32,
        align_sub: p,
        kind: VoteKind::NoVote,
    });

    let ct = votes.len() - 1;
    let kmer_len = config.kmer_len as i32;
    let end_exclude = config.end_exclude_len as i32;
    let qualify = config.vote_qualify_len as i32;
    let offset = a_offset as i32;

    for idx in 1..=ct {
        let prev_match = votes[idx].align_sub - votes[idx - 1].align_sub - 1;
        let p_lo = if idx == 1 { 0 } else { end_exclude };
        let p_hi = if idx == ct {
            prev_match
        } else {
            prev_match - end_exclude
        };

        if prev_match >= kmer_len {
            let run_base = votes[idx - 1].frag_sub;

            for p in 0..p_lo.min(prev_match) {
                let at = run_base + p + 1;
                cast_at(tallies, offset + at, VoteKind::matching(a_part[at as usize]));
            }
            for p in p_lo..p_hi {
                let at = (offset + run_base + p + 1) as usize;
                tallies[at].confirm();
                if p < p_hi - 1 {
                    tallies[at].confirm_no_insert();
                }
            }
            for p in p_hi.max(0)..prev_match {
                let at = run_base + p + 1;
                cast_at(tallies, offset + at, VoteKind::matching(a_part[at as usize]));
            }
        }

        // A discrepancy votes only when it is not the second of two adjacent
        // inserts and its flanking exact runs are long enough.
        if idx < ct
            && (prev_match > 0 || !votes[idx - 1].kind.is_insert() || !votes[idx].kind.is_insert())
        {
            let next_match = votes[idx + 1].align_sub - votes[idx].align_sub - 1;
            if prev_match + next_match >= qualify {
                cast_at(tallies, offset + votes[idx].frag_sub, votes[idx].kind);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::Delta;

    fn config() -> CorrectConfig {
        let mut cfg = CorrectConfig::for_range(1, 10);
        cfg.kmer_len = 9;
        cfg.vote_qualify_len = 9;
        cfg.end_exclude_len = 3;
        cfg
    }

    fn tallies(len: usize) -> Vec<VoteTally> {
        vec![VoteTally::default(); len]
    }

    #[test]
    fn clean_substitution_votes_at_its_position() {
        let a = b"acgtacgtacgtacgtacgt";
        let mut b = a.to_vec();
        b[10] = b'g';
        let mut t = tallies(a.len());
        analyze_alignment(&Delta::empty(), a, &b, a.len(), b.len(), 0, &mut t, &config())
            .unwrap();
        assert_eq!(t[10].g_subst, 1);
        assert_eq!(t[10].confirmed, 0);
        // Interior positions of both flanking runs are confirmed.
        assert_eq!(t[4].confirmed, 1);
        assert_eq!(t[15].confirmed, 1);
    }

    #[test]
    fn exact_overlap_confirms_interior() {
        let a = b"acgtacgtacgtacgtacgt";
        let mut t = tallies(a.len());
        analyze_alignment(&Delta::empty(), a, a, a.len(), a.len(), 0, &mut t, &config())
            .unwrap();
        // Both window ends use the sentinel rule, so every position confirms.
        for (j, tally) in t.iter().enumerate() {
            assert_eq!(tally.confirmed, 1, "position {j}");
        }
        // The final position carries no no-insert evidence.
        assert_eq!(t[19].no_insert, 0);
        assert_eq!(t[18].no_insert, 1);
    }

    #[test]
    fn short_runs_do_not_confirm() {
        let a = b"acgtacgt";
        let mut t = tallies(a.len());
        analyze_alignment(&Delta::empty(), a, a, a.len(), a.len(), 0, &mut t, &config())
            .unwrap();
        assert!(t.iter().all(|v| v.confirmed == 0));
    }

    #[test]
    fn unqualified_discrepancy_is_suppressed() {
        // Mismatch three bases from the start: flanking runs total 3 + 16,
        // which qualifies; then tighten the qualify length to suppress it.
        let a = b"acgtacgtacgtacgtacgt";
        let mut b = a.to_vec();
        b[3] = b'a';
        let mut cfg = config();
        cfg.vote_qualify_len = 30;
        let mut t = tallies(a.len());
        analyze_alignment(&Delta::empty(), a, &b, a.len(), b.len(), 0, &mut t, &cfg).unwrap();
        assert_eq!(t[3].a_subst, 0);
    }

    #[test]
    fn offset_translates_vote_positions() {
        let a_full = b"ggggacgtacgtacgtacgtacgt";
        let a_part = &a_full[4..];
        let mut b = a_part.to_vec();
        b[10] = b'c';
        let mut t = tallies(a_full.len());
        analyze_alignment(
            &Delta::empty(),
            a_part,
            &b,
            a_part.len(),
            b.len(),
            4,
            &mut t,
            &config(),
        )
        .unwrap();
        assert_eq!(t[14].c_subst, 1);
    }

    #[test]
    fn delete_event_votes_delete() {
        // A has an extra base at position 10; delta records one deletion
        // after ten matched columns.
        let a = b"acgtacgtacatacgtacgta";
        let b = b"acgtacgtactacgtacgta";
        let delta = Delta::from_entries(vec![11]);
        let mut t = tallies(a.len());
        analyze_alignment(&delta, a, b, a.len(), b.len(), 0, &mut t, &config()).unwrap();
        assert_eq!(t[10].deletes, 1);
    }

    #[test]
    fn insert_event_votes_insert_at_previous_position() {
        // B has an extra 'g' after A position 9.
        let a = b"acgtacgtactacgtacgta";
        let b = b"acgtacgtacgtacgtacgta";
        let delta = Delta::from_entries(vec![-11]);
        let mut t = tallies(a.len());
        analyze_alignment(&delta, a, b, a.len(), b.len(), 0, &mut t, &config()).unwrap();
        assert_eq!(t[9].g_insert, 1);
    }

    #[test]
    fn adjacent_inserts_cast_one_vote() {
        // Two inserts in a row: the second is gated off.
        let a = b"acgtacgtacacgtacgtac";
        let b = b"acgtacgtacggacgtacgtac";
        let delta = Delta::from_entries(vec![-11, -1]);
        let mut t = tallies(a.len());
        analyze_alignment(&delta, a, b, a.len(), b.len(), 0, &mut t, &config()).unwrap();
        assert_eq!(t[9].g_insert, 1);
        assert_eq!(t.iter().map(|v| v.g_insert as u32).sum::<u32>(), 1);
    }

    #[test]
    fn bad_alphabet_byte_is_fatal() {
        let a = b"acgtacgtacgtacgtacgt";
        let mut b = a.to_vec();
        b[10] = b'n';
        let mut t = tallies(a.len());
        let err = analyze_alignment(
            &Delta::empty(),
            a,
            &b,
            a.len(),
            b.len(),
            0,
            &mut t,
            &config(),
        );
        assert!(matches!(err, Err(VoteError::BadSequenceByte { .. })));
    }
}
