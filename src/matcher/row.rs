//! Per-state transition storage, compacted into one of four layouts.

use super::FAIL;

const ALPHABET_SIZE: usize = 256;

/// Target row layout requested for a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// `[next[0..alphabet)]` — dense, one entry per symbol.
    Full,
    /// `[(key, next) × n]`, keys ascending; promotes to `Full` for state 0
    /// or when the explicit-transition count exceeds the machine's
    /// threshold.
    Sparse,
    /// `[first, next[first..first+n)]` — one contiguous run.
    Banded,
    /// Several `Banded`-style runs, opening a new band whenever a run of
    /// default entries exceeds the machine's `max_zero_count`.
    SparseBands,
}

/// One contiguous run within a `SparseBands` row.
#[derive(Debug, Clone)]
pub struct Band {
    first: u8,
    next: Vec<u32>,
}

/// A single state's compacted outgoing transitions plus its match flag.
#[derive(Debug, Clone)]
pub enum Row {
    /// See [`RowFormat::Full`].
    Full { next: Box<[u32; ALPHABET_SIZE]>, has_match: bool },
    /// See [`RowFormat::Sparse`].
    Sparse { pairs: Vec<(u8, u32)>, has_match: bool },
    /// See [`RowFormat::Banded`].
    Banded { first: u8, next: Vec<u32>, has_match: bool },
    /// See [`RowFormat::SparseBands`].
    SparseBands { bands: Vec<Band>, has_match: bool },
}

impl Row {
    /// Whether this state's match list is non-empty.
    pub fn has_match(&self) -> bool {
        match self {
            Row::Full { has_match, .. }
            | Row::Sparse { has_match, .. }
            | Row::Banded { has_match, .. }
            | Row::SparseBands { has_match, .. } => *has_match,
        }
    }

    /// Resolve the transition for input symbol `b`, yielding `miss` if no
    /// explicit transition was stored for it.
    pub fn decode_next(&self, b: u8, miss: u32) -> u32 {
        match self {
            Row::Full { next, .. } => next[b as usize],
            Row::Banded { first, next, .. } => {
                let offset = b.wrapping_sub(*first) as usize;
                if b < *first || offset >= next.len() {
                    miss
                } else {
                    next[offset]
                }
            }
            Row::Sparse { pairs, .. } => pairs
                .binary_search_by_key(&b, |&(key, _)| key)
                .map(|i| pairs[i].1)
                .unwrap_or(miss),
            Row::SparseBands { bands, .. } => {
                for band in bands {
                    let offset = b.wrapping_sub(band.first) as usize;
                    if b >= band.first && offset < band.next.len() {
                        return band.next[offset];
                    }
                }
                miss
            }
        }
    }
}

/// Compact a dense 256-entry transition array into the requested format,
/// applying the promotion rules a real machine enforces.
pub fn compact(
    dense: &[u32; ALPHABET_SIZE],
    state_id: usize,
    default_fill: u32,
    has_match: bool,
    format: RowFormat,
    max_sparse_transitions: usize,
    max_zero_count: usize,
) -> Row {
    let explicit_count = dense.iter().filter(|&&v| v != default_fill).count();

    let format = match format {
        RowFormat::Sparse if state_id == 0 || explicit_count > max_sparse_transitions => {
            RowFormat::Full
        }
        other => other,
    };

    match format {
        RowFormat::Full => Row::Full {
            next: Box::new(*dense),
            has_match,
        },
        RowFormat::Sparse => {
            let pairs = (0..ALPHABET_SIZE)
                .filter(|&b| dense[b] != default_fill)
                .map(|b| (b as u8, dense[b]))
                .collect();
            Row::Sparse { pairs, has_match }
        }
        RowFormat::Banded => {
            let first = (0..ALPHABET_SIZE).find(|&b| dense[b] != default_fill);
            match first {
                None => Row::Banded { first: 0, next: Vec::new(), has_match },
                Some(first) => {
                    let last = (0..ALPHABET_SIZE)
                        .rev()
                        .find(|&b| dense[b] != default_fill)
                        .unwrap_or(first);
                    let next = dense[first..=last].to_vec();
                    Row::Banded { first: first as u8, next, has_match }
                }
            }
        }
        RowFormat::SparseBands => {
            let mut bands = Vec::new();
            let mut i = 0usize;
            while i < ALPHABET_SIZE {
                if dense[i] == default_fill {
                    i += 1;
                    continue;
                }
                let band_start = i;
                let mut zero_run = 0usize;
                let mut last_nondefault = i;
                let mut j = i;
                while j < ALPHABET_SIZE {
                    if dense[j] == default_fill {
                        zero_run += 1;
                        if zero_run > max_zero_count {
                            break;
                        }
                    } else {
                        zero_run = 0;
                        last_nondefault = j;
                    }
                    j += 1;
                }
                let next = dense[band_start..=last_nondefault].to_vec();
                bands.push(Band { first: band_start as u8, next });
                i = last_nondefault + 1;
            }
            Row::SparseBands { bands, has_match }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dense() -> [u32; ALPHABET_SIZE] {
        let mut dense = [FAIL; ALPHABET_SIZE];
        dense[b'a' as usize] = 5;
        dense[b'b' as usize] = 6;
        dense[200] = 9;
        dense
    }

    #[test]
    fn test_full_roundtrip() {
        let dense = sample_dense();
        let row = compact(&dense, 1, FAIL, false, RowFormat::Full, 64, 8);
        assert_eq!(row.decode_next(b'a', FAIL), 5);
        assert_eq!(row.decode_next(b'z', FAIL), FAIL);
    }

    #[test]
    fn test_sparse_roundtrip() {
        let dense = sample_dense();
        let row = compact(&dense, 1, FAIL, false, RowFormat::Sparse, 64, 8);
        assert_eq!(row.decode_next(b'a', FAIL), 5);
        assert_eq!(row.decode_next(b'b', FAIL), 6);
        assert_eq!(row.decode_next(200, FAIL), 9);
        assert_eq!(row.decode_next(b'z', FAIL), FAIL);
    }

    #[test]
    fn test_sparse_promotes_to_full_at_row_zero() {
        let dense = sample_dense();
        let row = compact(&dense, 0, FAIL, false, RowFormat::Sparse, 64, 8);
        assert!(matches!(row, Row::Full { .. }));
    }

    #[test]
    fn test_banded_roundtrip() {
        let mut dense = [FAIL; ALPHABET_SIZE];
        dense[10] = 1;
        dense[11] = 2;
        dense[12] = 3;
        let row = compact(&dense, 1, FAIL, false, RowFormat::Banded, 64, 8);
        assert_eq!(row.decode_next(10, FAIL), 1);
        assert_eq!(row.decode_next(12, FAIL), 3);
        assert_eq!(row.decode_next(9, FAIL), FAIL);
        assert_eq!(row.decode_next(13, FAIL), FAIL);
    }

    #[test]
    fn test_sparse_bands_splits_on_long_zero_run() {
        let mut dense = [FAIL; ALPHABET_SIZE];
        dense[0] = 1;
        dense[100] = 2;
        let row = compact(&dense, 1, FAIL, false, RowFormat::SparseBands, 64, 4);
        match &row {
            Row::SparseBands { bands, .. } => assert_eq!(bands.len(), 2),
            _ => panic!("expected sparse bands"),
        }
        assert_eq!(row.decode_next(0, FAIL), 1);
        assert_eq!(row.decode_next(100, FAIL), 2);
        assert_eq!(row.decode_next(50, FAIL), FAIL);
    }
}
