//! Read-store collaborator interface and its FASTA-backed implementation.
//!
//! The correction core needs very little from a read store: the total
//! fragment count and, per read, a deletion flag, a clear range, a
//! shredded flag, and the raw sequence. [`FastaStore`] satisfies this from
//! a FASTA file whose description fields may carry the metadata as
//! whitespace-separated tags: `clr=START..END`, `deleted`, `shredded`.

use std::path::Path;

use thiserror::Error;

use crate::bounds::MAX_READ_LEN;

/// Access to fragment metadata and sequence by identifier.
///
/// Identifiers are 1-based and dense: a store with `num_reads() == n`
/// answers `get` for every iid in `1..=n`.
pub trait ReadStore {
    /// Total number of reads in the store.
    fn num_reads(&self) -> u32;

    /// Fetch one read, or `None` when `iid` is outside the store.
    fn get(&self, iid: u32) -> Option<&StoredRead>;
}

/// One read as held by the store.
#[derive(Debug, Clone)]
pub struct StoredRead {
    /// 1-based identifier.
    pub iid: u32,
    /// Raw sequence bytes as read from the source.
    pub seq: Vec<u8>,
    /// Start of the trusted clear range (inclusive).
    pub clear_start: usize,
    /// End of the trusted clear range (exclusive).
    pub clear_end: usize,
    /// Deleted reads are skipped entirely.
    pub deleted: bool,
    /// Shredded (synthetic) reads never vote on other shredded reads.
    pub shredded: bool,
}

impl StoredRead {
    /// A live read whose clear range covers the whole sequence.
    pub fn new(seq: Vec<u8>) -> Self {
        let clear_end = seq.len();
        Self {
            iid: 0,
            seq,
            clear_start: 0,
            clear_end,
            deleted: false,
            shredded: false,
        }
    }

    /// Restrict the clear range.
    pub fn with_clear(mut self, start: usize, end: usize) -> Self {
        self.clear_start = start;
        self.clear_end = end;
        self
    }

    /// Mark the read shredded.
    pub fn shredded(mut self) -> Self {
        self.shredded = true;
        self
    }

    /// Mark the read deleted.
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Length of the clear range.
    pub fn clear_len(&self) -> usize {
        self.clear_end - self.clear_start
    }
}

/// Defects found while loading a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying file could not be read.
    #[error("failed to read store: {0}")]
    Io(#[from] std::io::Error),
    /// FASTA-level parse failure.
    #[error("malformed FASTA record: {0}")]
    Fasta(String),
    /// A metadata tag did not parse.
    #[error("read {iid}: bad description tag '{tag}'")]
    BadTag {
        /// Identifier of the offending read.
        iid: u32,
        /// The tag text.
        tag: String,
    },
    /// A clear range fell outside its sequence.
    #[error("read {iid}: clear range {start}..{end} exceeds sequence length {len}")]
    BadClearRange {
        /// Identifier of the offending read.
        iid: u32,
        /// Clear-range start.
        start: usize,
        /// Clear-range end.
        end: usize,
        /// Sequence length.
        len: usize,
    },
    /// A read longer than the aligner is dimensioned for.
    #[error("read {iid} is {len} bases; the aligner handles at most {MAX_READ_LEN}")]
    ReadTooLong {
        /// Identifier of the offending read.
        iid: u32,
        /// Sequence length.
        len: usize,
    },
}

/// In-memory read store populated from FASTA.
#[derive(Debug)]
pub struct FastaStore {
    reads: Vec<StoredRead>,
}

impl FastaStore {
    /// Load every record of a FASTA file, assigning iids in file order.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let reader = bio::io::fasta::Reader::from_file(path.as_ref())
            .map_err(|e| StoreError::Fasta(e.to_string()))?;

        let mut reads = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|e| StoreError::Fasta(e.to_string()))?;
            let iid = idx as u32 + 1;
            let mut read = StoredRead::new(record.seq().to_vec());
            read.iid = iid;
            if let Some(desc) = record.desc() {
                apply_tags(&mut read, desc)?;
            }
            validate(&read)?;
            reads.push(read);
        }
        Ok(Self { reads })
    }

    /// Build a store from already-assembled reads; iids are assigned by
    /// position, overriding whatever the records carried.
    pub fn from_reads(mut reads: Vec<StoredRead>) -> Result<Self, StoreError> {
        for (idx, read) in reads.iter_mut().enumerate() {
            read.iid = idx as u32 + 1;
            validate(read)?;
        }
        Ok(Self { reads })
    }
}

impl ReadStore for FastaStore {
    fn num_reads(&self) -> u32 {
        self.reads.len() as u32
    }

    fn get(&self, iid: u32) -> Option<&StoredRead> {
        if iid == 0 {
            return None;
        }
        self.reads.get(iid as usize - 1)
    }
}

fn validate(read: &StoredRead) -> Result<(), StoreError> {
    if read.seq.len() > MAX_READ_LEN {
        return Err(StoreError::ReadTooLong {
            iid: read.iid,
            len: read.seq.len(),
        });
    }
    if read.clear_start > read.clear_end || read.clear_end > read.seq.len() {
        return Err(StoreError::BadClearRange {
            iid: read.iid,
            start: read.clear_start,
            end: read.clear_end,
            len: read.seq.len(),
        });
    }
    Ok(())
}

fn apply_tags(read: &mut StoredRead, desc: &str) -> Result<(), StoreError> {
    for tag in desc.split_whitespace() {
        if tag == "deleted" {
            read.deleted = true;
        } else if tag == "shredded" {
            read.shredded = true;
        } else if let Some(range) = tag.strip_prefix("clr=") {
            let (start, end) = range
                .split_once("..")
                .and_then(|(s, e)| Some((s.parse().ok()?, e.parse().ok()?)))
                .ok_or_else(|| StoreError::BadTag {
                    iid: read.iid,
                    tag: tag.to_string(),
                })?;
            read.clear_start = start;
            read.clear_end = end;
        }
        // Unknown tags are someone else's metadata; ignore them.
    }
    Ok(())
}

/// Lowercase `byte`, mapping anything outside the alphabet to 'a'.
#[inline]
pub fn filter_base(byte: u8) -> u8 {
    match byte.to_ascii_lowercase() {
        b @ (b'a' | b'c' | b'g' | b't') => b,
        _ => b'a',
    }
}

/// Filter a sequence slice, returning the cleaned bytes and how many were
/// rewritten to 'a' because they fell outside the alphabet.
pub(crate) fn filter_seq(seq: &[u8]) -> (Vec<u8>, usize) {
    let mut rewrites = 0usize;
    let filtered = seq
        .iter()
        .map(|&b| {
            let f = filter_base(b);
            if f != b.to_ascii_lowercase() {
                rewrites += 1;
            }
            f
        })
        .collect();
    (filtered, rewrites)
}

/// Append a filtered sequence slice to `out`, counting rewrites.
pub(crate) fn filter_into(seq: &[u8], out: &mut Vec<u8>) -> usize {
    let mut rewrites = 0usize;
    out.extend(seq.iter().map(|&b| {
        let f = filter_base(b);
        if f != b.to_ascii_lowercase() {
            rewrites += 1;
        }
        f
    }));
    rewrites
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn filter_lowers_and_rewrites() {
        assert_eq!(filter_base(b'A'), b'a');
        assert_eq!(filter_base(b'g'), b'g');
        assert_eq!(filter_base(b'N'), b'a');
        assert_eq!(filter_base(b'x'), b'a');

        let (seq, rewrites) = filter_seq(b"ACgNnT");
        assert_eq!(seq, b"acgaat");
        assert_eq!(rewrites, 2);
    }

    #[test]
    fn from_reads_assigns_dense_iids() {
        let store = FastaStore::from_reads(vec![
            StoredRead::new(b"acgt".to_vec()),
            StoredRead::new(b"ttgg".to_vec()),
        ])
        .unwrap();
        assert_eq!(store.num_reads(), 2);
        assert_eq!(store.get(1).unwrap().seq, b"acgt");
        assert_eq!(store.get(2).unwrap().iid, 2);
        assert!(store.get(0).is_none());
        assert!(store.get(3).is_none());
    }

    #[test]
    fn fasta_descriptions_carry_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ">r1 clr=2..6 shredded\nacgtacgt").unwrap();
        writeln!(file, ">r2 deleted\nttttgggg").unwrap();
        writeln!(file, ">r3\nacacacac").unwrap();
        file.flush().unwrap();

        let store = FastaStore::from_path(file.path()).unwrap();
        assert_eq!(store.num_reads(), 3);

        let r1 = store.get(1).unwrap();
        assert_eq!((r1.clear_start, r1.clear_end), (2, 6));
        assert!(r1.shredded && !r1.deleted);

        let r2 = store.get(2).unwrap();
        assert!(r2.deleted);

        let r3 = store.get(3).unwrap();
        assert_eq!(r3.clear_len(), 8);
    }

    #[test]
    fn bad_clear_range_is_rejected() {
        let read = StoredRead::new(b"acgt".to_vec()).with_clear(2, 9);
        assert!(matches!(
            FastaStore::from_reads(vec![read]),
            Err(StoreError::BadClearRange { .. })
        ));
    }
}
