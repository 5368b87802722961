//! Streaming the overlap set against batches of B-reads.
//!
//! Overlaps are visited exactly once, in `(b_iid, a_iid)` order. The
//! threaded variant processes B-reads in contiguous iid-span batches:
//! while the fixed worker pool handles batch `k`, the main thread extracts
//! batch `k + 1` (double buffering). Worker `t` touches only overlaps with
//! `a_iid % n == t`, so each worker holds an exclusive shard of the vote
//! arena and no locking is needed.

use std::ops::Range;

use log::{debug, info, trace};

use crate::align::Aligner;
use crate::bounds::ErrorModel;
use crate::frags::{FragSet, ReadVotes};
use crate::overlap::{Orientation, Overlap};
use crate::store::{filter_into, ReadStore};
use crate::vote::analyze_alignment;
use crate::{CorrectConfig, CorrectError};

/// Number of B-read identifiers spanned by one batch.
const FRAGS_PER_BATCH: u32 = 100_000;

/// Per-thread scratch: aligner DP storage plus the reverse-complement
/// memo keyed by the last INNIE b_iid this thread handled.
struct WorkArea<'m> {
    aligner: Aligner<'m>,
    rev_seq: Vec<u8>,
    rev_iid: Option<u32>,
}

impl<'m> WorkArea<'m> {
    fn new(model: &'m ErrorModel) -> Self {
        Self {
            aligner: Aligner::new(model),
            rev_seq: Vec::new(),
            rev_iid: None,
        }
    }
}

#[inline]
fn complement(base: u8) -> u8 {
    match base {
        b'a' => b't',
        b'c' => b'g',
        b'g' => b'c',
        b't' => b'a',
        _ => b'a',
    }
}

/// One B-read staged for processing, with the overlaps that consult it.
struct BatchEntry {
    b_iid: u32,
    shredded: bool,
    seq: Range<usize>,
    olaps: Range<usize>,
}

/// A staged batch: entries index into one shared sequence buffer.
struct Batch {
    entries: Vec<BatchEntry>,
    buffer: Vec<u8>,
}

/// Stage the B-reads with iids in `lo_b..=hi_b` that have overlaps at or
/// beyond `*next_olap`, advancing the cursor past everything staged.
/// Overlaps of deleted B-reads are consumed but not staged.
fn extract_batch<S: ReadStore>(
    store: &S,
    lo_b: u32,
    hi_b: u32,
    overlaps: &[Overlap],
    next_olap: &mut usize,
) -> Result<Batch, CorrectError> {
    let mut batch = Batch {
        entries: Vec::new(),
        buffer: Vec::new(),
    };
    let mut stream_ct = 0usize;
    let mut rewrites = 0usize;

    while *next_olap < overlaps.len() {
        let b_iid = overlaps[*next_olap].b_iid;
        if b_iid > hi_b {
            break;
        }
        let start = *next_olap;
        while *next_olap < overlaps.len() && overlaps[*next_olap].b_iid == b_iid {
            *next_olap += 1;
        }
        stream_ct += 1;

        let read = store
            .get(b_iid)
            .ok_or(CorrectError::IidOutOfStore { iid: b_iid })?;
        if read.deleted {
            debug!("skipping deleted b-read {b_iid} and its overlaps");
            continue;
        }

        let seq_start = batch.buffer.len();
        rewrites += filter_into(
            &read.seq[read.clear_start..read.clear_end],
            &mut batch.buffer,
        );
        batch.entries.push(BatchEntry {
            b_iid,
            shredded: read.shredded,
            seq: seq_start..batch.buffer.len(),
            olaps: start..*next_olap,
        });
    }

    info!(
        "extracted {} of {} reads in iid range {}..={}",
        batch.entries.len(),
        stream_ct,
        lo_b,
        hi_b
    );
    if rewrites > 0 {
        debug!("{rewrites} non-ACGT bases rewritten to 'a' in batch {lo_b}..={hi_b}");
    }
    Ok(batch)
}

/// Recompute one overlap at base level and fold its votes into `rv`
/// (the A-read's vote record). Returns `false` when the overlap failed
/// its error budget.
#[allow(clippy::too_many_arguments)]
fn process_olap(
    olap: &Overlap,
    b_seq: &[u8],
    b_shredded: bool,
    frags: &FragSet,
    sub: usize,
    rv: &mut ReadVotes,
    wa: &mut WorkArea<'_>,
    config: &CorrectConfig,
    model: &ErrorModel,
) -> Result<bool, CorrectError> {
    let frag = &frags.frags[sub];
    if frag.deleted {
        debug!("overlap {}/{} names a deleted a-read", olap.a_iid, olap.b_iid);
        return Ok(true);
    }
    if b_shredded && frag.shredded {
        return Ok(true);
    }

    if olap.a_hang <= 0 {
        rv.bump_left();
    }
    if olap.b_hang >= 0 {
        rv.bump_right();
    }

    let bad_hang = |hang: i32| CorrectError::BadHang {
        a_iid: olap.a_iid,
        b_iid: olap.b_iid,
        hang,
    };

    let (a_part, a_offset): (&[u8], usize) = if olap.a_hang > 0 {
        let off = olap.a_hang as usize;
        if off > frag.seq.len() {
            return Err(bad_hang(olap.a_hang));
        }
        (&frag.seq[off..], off)
    } else {
        (&frag.seq[..], 0)
    };

    let WorkArea {
        aligner,
        rev_seq,
        rev_iid,
    } = wa;

    let b_oriented: &[u8] = match olap.orient {
        Orientation::Normal => b_seq,
        Orientation::Innie => {
            if *rev_iid != Some(olap.b_iid) {
                rev_seq.clear();
                rev_seq.extend(b_seq.iter().rev().map(|&b| complement(b)));
                *rev_iid = Some(olap.b_iid);
            }
            rev_seq.as_slice()
        }
    };
    let b_part: &[u8] = if olap.a_hang < 0 {
        let off = (-olap.a_hang) as usize;
        if off > b_oriented.len() {
            return Err(bad_hang(olap.a_hang));
        }
        &b_oriented[off..]
    } else {
        b_oriented
    };

    let mut olap_len = a_part.len().min(b_part.len());
    let aln = aligner.prefix_align(a_part, b_part, model.error_bound(olap_len));

    if aln.a_end > a_part.len() || aln.b_end > b_part.len() {
        return Err(CorrectError::BadAlignment {
            a_iid: olap.a_iid,
            b_iid: olap.b_iid,
            a_end: aln.a_end,
            a_len: a_part.len(),
            b_end: aln.b_end,
            b_len: b_part.len(),
        });
    }

    trace!(
        "overlap {}/{}: errors {} a_end {}/{} b_end {}/{} match_to_end {}",
        olap.a_iid,
        olap.b_iid,
        aln.errors,
        aln.a_end,
        a_part.len(),
        aln.b_end,
        b_part.len(),
        aln.match_to_end
    );

    let mut match_to_end = aln.match_to_end;
    if !match_to_end && aln.a_end + a_offset + 1 >= frag.clear_len {
        // The truncated alignment still reaches the clear-range end.
        olap_len = aln.a_end.min(aln.b_end);
        match_to_end = true;
    }

    if aln.errors <= model.error_bound(olap_len) && match_to_end {
        analyze_alignment(
            &aln.delta,
            a_part,
            b_part,
            aln.a_end,
            aln.b_end,
            a_offset,
            &mut rv.votes,
            config,
        )?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Single-threaded streaming pass: walk overlaps grouped by B-read,
/// fetching each B sequence once. Returns the failed-overlap count.
pub(crate) fn stream_serial<S: ReadStore>(
    store: &S,
    frags: &FragSet,
    overlaps: &[Overlap],
    votes: &mut [ReadVotes],
    config: &CorrectConfig,
    model: &ErrorModel,
) -> Result<u64, CorrectError> {
    let mut wa = WorkArea::new(model);
    let mut failed = 0u64;
    let mut next_olap = 0usize;
    let mut b_seq = Vec::new();

    while next_olap < overlaps.len() {
        let b_iid = overlaps[next_olap].b_iid;
        let start = next_olap;
        while next_olap < overlaps.len() && overlaps[next_olap].b_iid == b_iid {
            next_olap += 1;
        }

        let read = store
            .get(b_iid)
            .ok_or(CorrectError::IidOutOfStore { iid: b_iid })?;
        if read.deleted {
            debug!("skipping deleted b-read {b_iid} and its overlaps");
            continue;
        }
        b_seq.clear();
        filter_into(&read.seq[read.clear_start..read.clear_end], &mut b_seq);

        for olap in &overlaps[start..next_olap] {
            let sub = frags.sub(olap.a_iid)?;
            if !process_olap(
                olap,
                &b_seq,
                read.shredded,
                frags,
                sub,
                &mut votes[sub],
                &mut wa,
                config,
                model,
            )? {
                failed += 1;
            }
        }
    }

    Ok(failed)
}

/// Worker body: process this thread's share of one batch.
fn process_batch_shard(
    thread_id: usize,
    n_threads: usize,
    shard: &mut [ReadVotes],
    batch: &Batch,
    overlaps: &[Overlap],
    frags: &FragSet,
    config: &CorrectConfig,
    model: &ErrorModel,
) -> Result<u64, CorrectError> {
    let mut wa = WorkArea::new(model);
    let mut olap_ct = 0u64;
    let mut failed = 0u64;

    for entry in &batch.entries {
        let b_seq = &batch.buffer[entry.seq.clone()];
        for olap in &overlaps[entry.olaps.clone()] {
            if olap.a_iid % n_threads as u32 != thread_id as u32 {
                continue;
            }
            let sub = frags.sub(olap.a_iid)?;
            if !process_olap(
                olap,
                b_seq,
                entry.shredded,
                frags,
                sub,
                &mut shard[sub / n_threads],
                &mut wa,
                config,
                model,
            )? {
                failed += 1;
            }
            olap_ct += 1;
        }
    }

    debug!("thread {thread_id} processed {olap_ct} overlaps");
    Ok(failed)
}

/// Multi-threaded streaming pass over shards produced by
/// [`crate::frags::split_shards`]. Returns the failed-overlap count.
pub(crate) fn stream_threaded<S: ReadStore>(
    store: &S,
    frags: &FragSet,
    overlaps: &[Overlap],
    shards: &mut [Vec<ReadVotes>],
    config: &CorrectConfig,
    model: &ErrorModel,
) -> Result<u64, CorrectError> {
    let n_threads = shards.len();
    let first = overlaps[0].b_iid;
    let last = overlaps[overlaps.len() - 1].b_iid;
    info!("streaming overlaps with {n_threads} worker threads");

    let mut next_olap = 0usize;
    let mut hi_b = last.min(first.saturating_add(FRAGS_PER_BATCH - 1));
    let mut current = extract_batch(store, first, hi_b, overlaps, &mut next_olap)?;
    let mut failed = 0u64;

    loop {
        let batch = &current;
        let mut next_span = None;
        if hi_b < last {
            let nlo = hi_b + 1;
            next_span = Some((nlo, last.min(nlo.saturating_add(FRAGS_PER_BATCH - 1))));
        }

        let (batch_failed, next_batch) = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = shards
                .iter_mut()
                .enumerate()
                .map(|(thread_id, shard)| {
                    scope.spawn(move |_| {
                        process_batch_shard(
                            thread_id, n_threads, shard, batch, overlaps, frags, config, model,
                        )
                    })
                })
                .collect();

            // Double buffering: stage the next batch while workers run.
            let next_batch = match next_span {
                Some((nlo, nhi)) => {
                    Some(extract_batch(store, nlo, nhi, overlaps, &mut next_olap))
                }
                None => None,
            };

            let mut batch_failed = 0u64;
            for handle in handles {
                match handle.join() {
                    Ok(result) => batch_failed += result?,
                    Err(_) => return Err(CorrectError::WorkerPanic),
                }
            }
            Ok((batch_failed, next_batch))
        })
        .map_err(|_| CorrectError::WorkerPanic)??;

        failed += batch_failed;

        match next_batch {
            Some(batch) => {
                current = batch?;
                let (_, nhi) = next_span.expect("next batch implies a next span");
                hi_b = nhi;
            }
            None => break,
        }
    }

    Ok(failed)
}
