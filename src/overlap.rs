//! Overlap model and the two on-disk overlap sources.
//!
//! Overlaps arrive either from a line-oriented text file (the format the
//! overlap extractor prints) or from a binary overlap file of fixed-width
//! little-endian records. Both loaders restrict to an A-read identifier
//! range; the driver then sorts globally by `(b_iid, a_iid)` so B-read
//! sequences can be fetched once per batch.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

/// Relative orientation of the two reads of an overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// B is used as stored.
    Normal,
    /// B is reverse-complemented relative to A.
    Innie,
}

/// A precomputed pairwise overlap.
#[derive(Debug, Clone, Copy)]
pub struct Overlap {
    /// Identifier of the read being corrected.
    pub a_iid: u32,
    /// Identifier of the read supplying evidence.
    pub b_iid: u32,
    /// Signed offset of B's start relative to A's start.
    pub a_hang: i32,
    /// Signed offset of B's end relative to A's end.
    pub b_hang: i32,
    /// Orientation of B.
    pub orient: Orientation,
}

/// Size of one binary overlap record on disk.
pub const OVERLAP_RECORD_LEN: usize = 16;

/// Defects in overlap input.
#[derive(Debug, Error)]
pub enum OverlapError {
    /// Underlying file could not be read.
    #[error("failed to read overlaps: {0}")]
    Io(#[from] std::io::Error),
    /// A text line did not have the expected six fields.
    #[error("malformed overlap line {line}: {text:?}")]
    MalformedLine {
        /// 1-based line number.
        line: usize,
        /// The offending text.
        text: String,
    },
    /// A hang fell outside the representable 15-bit range.
    #[error("overlap line {line}: hang {hang} out of range")]
    HangOutOfRange {
        /// 1-based line number.
        line: usize,
        /// The offending hang.
        hang: i64,
    },
    /// A binary overlap file was not a whole number of records.
    #[error("binary overlap file is truncated ({extra} trailing bytes)")]
    Truncated {
        /// Bytes beyond the last whole record.
        extra: usize,
    },
}

const HANG_LIMIT: i64 = 1 << 14;

/// Read overlaps from the text format, one per line:
/// `a_iid b_iid a_hang b_hang orient error_rate`.
///
/// An orient token starting with 'O' denotes outie orientation, translated
/// on load to `(-b_hang, -a_hang)` with [`Orientation::Innie`]; anything
/// else is [`Orientation::Normal`]. Only overlaps with `a_iid` in
/// `lo..=hi` are kept, and reading stops early once `a_iid` passes `hi`
/// (the file is sorted by `a_iid`). The trailing error-rate field is
/// checked for shape and discarded.
pub fn load_text_overlaps<P: AsRef<Path>>(
    path: P,
    lo: u32,
    hi: u32,
) -> Result<Vec<Overlap>, OverlapError> {
    let reader = BufReader::new(File::open(path)?);
    let mut overlaps = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let text = line?;
        if text.trim().is_empty() {
            continue;
        }

        let mut fields = text.split_whitespace();
        let parsed: Option<(u32, u32, i64, i64, &str, f64)> = (|| {
            let a_iid = fields.next()?.parse().ok()?;
            let b_iid = fields.next()?.parse().ok()?;
            let a_hang = fields.next()?.parse().ok()?;
            let b_hang = fields.next()?.parse().ok()?;
            let orient = fields.next()?;
            let error_rate = fields.next()?.parse().ok()?;
            Some((a_iid, b_iid, a_hang, b_hang, orient, error_rate))
        })();
        let (a_iid, b_iid, a_hang, b_hang, orient, _error_rate) =
            parsed.ok_or_else(|| OverlapError::MalformedLine {
                line: line_no,
                text: text.clone(),
            })?;

        for hang in [a_hang, b_hang] {
            if hang.abs() >= HANG_LIMIT {
                return Err(OverlapError::HangOutOfRange {
                    line: line_no,
                    hang,
                });
            }
        }

        if a_iid > hi {
            // The file is sorted by a_iid; nothing further can match.
            break;
        }
        if a_iid < lo {
            continue;
        }

        let overlap = if orient.starts_with('O') {
            Overlap {
                a_iid,
                b_iid,
                a_hang: -b_hang as i32,
                b_hang: -a_hang as i32,
                orient: Orientation::Innie,
            }
        } else {
            Overlap {
                a_iid,
                b_iid,
                a_hang: a_hang as i32,
                b_hang: b_hang as i32,
                orient: Orientation::Normal,
            }
        };
        overlaps.push(overlap);
    }

    Ok(overlaps)
}

/// Read overlaps with `a_iid` in `lo..=hi` from a binary overlap file.
pub fn load_binary_overlaps<P: AsRef<Path>>(
    path: P,
    lo: u32,
    hi: u32,
) -> Result<Vec<Overlap>, OverlapError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let extra = bytes.len() % OVERLAP_RECORD_LEN;
    if extra != 0 {
        return Err(OverlapError::Truncated { extra });
    }

    let mut overlaps = Vec::with_capacity(bytes.len() / OVERLAP_RECORD_LEN);
    for record in bytes.chunks_exact(OVERLAP_RECORD_LEN) {
        let a_iid = u32::from_le_bytes(record[0..4].try_into().unwrap());
        if a_iid < lo || a_iid > hi {
            continue;
        }
        let b_iid = u32::from_le_bytes(record[4..8].try_into().unwrap());
        let a_hang = i16::from_le_bytes(record[8..10].try_into().unwrap());
        let b_hang = i16::from_le_bytes(record[10..12].try_into().unwrap());
        let flipped = record[12] & 1 != 0;
        overlaps.push(Overlap {
            a_iid,
            b_iid,
            a_hang: a_hang as i32,
            b_hang: b_hang as i32,
            orient: if flipped {
                Orientation::Innie
            } else {
                Orientation::Normal
            },
        });
    }
    Ok(overlaps)
}

/// Write overlaps in the binary record layout.
pub fn write_binary_overlaps<W: Write>(writer: &mut W, overlaps: &[Overlap]) -> std::io::Result<()> {
    for olap in overlaps {
        let mut record = [0u8; OVERLAP_RECORD_LEN];
        record[0..4].copy_from_slice(&olap.a_iid.to_le_bytes());
        record[4..8].copy_from_slice(&olap.b_iid.to_le_bytes());
        record[8..10].copy_from_slice(&(olap.a_hang as i16).to_le_bytes());
        record[10..12].copy_from_slice(&(olap.b_hang as i16).to_le_bytes());
        record[12] = matches!(olap.orient, Orientation::Innie) as u8;
        writer.write_all(&record)?;
    }
    Ok(())
}

/// Sort overlaps for batched processing: by `b_iid`, then `a_iid`.
pub fn sort_for_processing(overlaps: &mut [Overlap]) {
    overlaps.sort_unstable_by_key(|o| (o.b_iid, o.a_iid));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn text_overlaps_parse_and_translate_outies() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1 5 3 -2 N 0.015").unwrap();
        writeln!(file, "2 7 4 6 O 0.020").unwrap();
        writeln!(file, "3 9 -1 2 I 0.010").unwrap();
        file.flush().unwrap();

        let overlaps = load_text_overlaps(file.path(), 1, 10).unwrap();
        assert_eq!(overlaps.len(), 3);

        assert_eq!(overlaps[0].a_hang, 3);
        assert_eq!(overlaps[0].orient, Orientation::Normal);

        // Outie: hangs are negated and swapped.
        assert_eq!(overlaps[1].a_hang, -6);
        assert_eq!(overlaps[1].b_hang, -4);
        assert_eq!(overlaps[1].orient, Orientation::Innie);

        // Any token other than 'O' is NORMAL, including 'I'.
        assert_eq!(overlaps[2].orient, Orientation::Normal);
    }

    #[test]
    fn text_loader_stops_past_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1 5 0 0 N 0.01").unwrap();
        writeln!(file, "4 6 0 0 N 0.01").unwrap();
        writeln!(file, "9 9 0 0 this line would not parse").unwrap();
        file.flush().unwrap();

        let overlaps = load_text_overlaps(file.path(), 1, 3).unwrap();
        assert_eq!(overlaps.len(), 1);
    }

    #[test]
    fn malformed_line_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1 5 0 N").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            load_text_overlaps(file.path(), 1, 10),
            Err(OverlapError::MalformedLine { line: 1, .. })
        ));
    }

    #[test]
    fn binary_round_trip_preserves_fields() {
        let overlaps = vec![
            Overlap {
                a_iid: 3,
                b_iid: 11,
                a_hang: -4,
                b_hang: 9,
                orient: Orientation::Innie,
            },
            Overlap {
                a_iid: 7,
                b_iid: 2,
                a_hang: 0,
                b_hang: 0,
                orient: Orientation::Normal,
            },
        ];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_binary_overlaps(&mut file, &overlaps).unwrap();
        file.flush().unwrap();

        let loaded = load_binary_overlaps(file.path(), 1, 10).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].a_hang, -4);
        assert_eq!(loaded[0].orient, Orientation::Innie);
        assert_eq!(loaded[1].b_iid, 2);

        // Range restriction drops the out-of-range record.
        let restricted = load_binary_overlaps(file.path(), 4, 10).unwrap();
        assert_eq!(restricted.len(), 1);
        assert_eq!(restricted[0].a_iid, 7);
    }

    #[test]
    fn processing_order_is_b_then_a() {
        let mut overlaps = vec![
            Overlap { a_iid: 9, b_iid: 2, a_hang: 0, b_hang: 0, orient: Orientation::Normal },
            Overlap { a_iid: 1, b_iid: 5, a_hang: 0, b_hang: 0, orient: Orientation::Normal },
            Overlap { a_iid: 3, b_iid: 2, a_hang: 0, b_hang: 0, orient: Orientation::Normal },
        ];
        sort_for_processing(&mut overlaps);
        let order: Vec<_> = overlaps.iter().map(|o| (o.b_iid, o.a_iid)).collect();
        assert_eq!(order, vec![(2, 3), (2, 9), (5, 1)]);
    }
}
