//! Pattern matching backend: query normalization and SIMD/parallel scans.

use std::ops::ControlFlow;

use memchr::memmem;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Window used for cancellable scans. Matches spanning windows are found via
/// an overlap of `pattern.len() - 1` bytes.
pub const SCAN_WINDOW: usize = 16 * 1024 * 1024;

/// How user input is turned into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Hex,
    Ascii,
}

/// A search as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub kind: SearchKind,
    pub text: String,
    pub ignore_case: bool,
}

impl SearchQuery {
    pub fn hex(text: &str) -> Self {
        Self { kind: SearchKind::Hex, text: text.to_string(), ignore_case: false }
    }

    pub fn ascii(text: &str, ignore_case: bool) -> Self {
        Self { kind: SearchKind::Ascii, text: text.to_string(), ignore_case }
    }
}

/// A query reduced to the bytes the matcher sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPattern {
    pub kind: SearchKind,
    pub bytes: Vec<u8>,
    /// Always false for hex patterns.
    pub ignore_case: bool,
}

impl NormalizedPattern {
    /// Canonical text form used as a cache key. Case-insensitive patterns
    /// are folded so "ABC" and "abc" share an entry.
    pub fn key(&self) -> String {
        if self.ignore_case {
            hex::encode(self.bytes.to_ascii_lowercase())
        } else {
            hex::encode(&self.bytes)
        }
    }
}

pub fn normalize(query: &SearchQuery) -> EngineResult<NormalizedPattern> {
    match query.kind {
        SearchKind::Hex => Ok(NormalizedPattern {
            kind: SearchKind::Hex,
            bytes: parse_hex_pattern(&query.text)?,
            ignore_case: false,
        }),
        SearchKind::Ascii => {
            if query.text.is_empty() {
                return Err(EngineError::InvalidPattern("empty search text".into()));
            }
            Ok(NormalizedPattern {
                kind: SearchKind::Ascii,
                bytes: query.text.as_bytes().to_vec(),
                ignore_case: query.ignore_case,
            })
        }
    }
}

/// Parse "41 42", "4142", "0x41 0x42" or "41,42" into bytes.
pub fn parse_hex_pattern(text: &str) -> EngineResult<Vec<u8>> {
    let mut digits = String::with_capacity(text.len());
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        digits.push_str(token);
    }

    if digits.is_empty() {
        return Err(EngineError::InvalidPattern("empty hex pattern".into()));
    }
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(EngineError::InvalidPattern(format!("'{bad}' is not a hex digit")));
    }
    if digits.len() % 2 != 0 {
        return Err(EngineError::InvalidPattern(format!(
            "odd number of hex digits ({})",
            digits.len()
        )));
    }

    hex::decode(&digits).map_err(|e| EngineError::InvalidPattern(e.to_string()))
}

/// Every offset where `needle` starts in `haystack`, overlapping
/// occurrences included ("aa" occurs at 0, 1 and 2 in "aaaa").
fn find_all(finder: &memmem::Finder<'_>, haystack: &[u8]) -> Vec<u64> {
    let mut hits = Vec::new();
    let mut from = 0;
    while let Some(pos) = finder.find(&haystack[from..]) {
        hits.push((from + pos) as u64);
        from += pos + 1;
    }
    hits
}

/// Parallel scan: rayon splits `data` into per-core slices that overlap by
/// `pattern.len() - 1` bytes, and each slice is searched with memmem. A
/// match starting in an overlap cannot fit in the slice before it, so every
/// offset is reported exactly once. Returns sorted offsets.
pub fn scan_pattern_parallel(data: &[u8], pattern: &[u8]) -> Vec<u64> {
    if pattern.is_empty() || data.len() < pattern.len() {
        return vec![];
    }

    let finder = memmem::Finder::new(pattern);
    let min_parallel_size = 1024 * 1024;
    if data.len() < min_parallel_size {
        return find_all(&finder, data);
    }

    let num_threads = rayon::current_num_threads().max(1);
    let chunk_size = (data.len() / num_threads).max(min_parallel_size);
    let overlap = pattern.len() - 1;

    let mut chunks: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;
    while start < data.len() {
        let end = (start + chunk_size).min(data.len());
        chunks.push((start, end));
        if end >= data.len() {
            break;
        }
        start = end - overlap;
    }

    let mut results: Vec<u64> = chunks
        .par_iter()
        .flat_map_iter(|&(chunk_start, chunk_end)| {
            find_all(&finder, &data[chunk_start..chunk_end])
                .into_iter()
                .map(move |pos| pos + chunk_start as u64)
        })
        .collect();

    results.sort_unstable();
    results
}

/// ASCII case-insensitive scan: SIMD search for either case of the first
/// byte, then verify the tail with `eq_ignore_ascii_case`. Reports the same
/// overlapping offsets as [`scan_pattern_parallel`].
pub fn scan_pattern_ignore_case(data: &[u8], pattern: &[u8]) -> Vec<u64> {
    if pattern.is_empty() || data.len() < pattern.len() {
        return vec![];
    }
    let first = pattern[0];
    let limit = data.len() - pattern.len();
    memchr::memchr2_iter(first.to_ascii_lowercase(), first.to_ascii_uppercase(), data)
        .take_while(|&pos| pos <= limit)
        .filter(|&pos| data[pos..pos + pattern.len()].eq_ignore_ascii_case(pattern))
        .map(|pos| pos as u64)
        .collect()
}

/// Scan `data` window by window, calling `between_windows` with the number
/// of bytes scanned so far. Returns `None` if the callback breaks.
pub fn scan_windowed<F>(
    data: &[u8],
    pattern: &NormalizedPattern,
    window: usize,
    mut between_windows: F,
) -> Option<Vec<u64>>
where
    F: FnMut(u64) -> ControlFlow<()>,
{
    let needle = pattern.bytes.as_slice();
    if needle.is_empty() || data.len() < needle.len() {
        return Some(vec![]);
    }
    let window = window.max(needle.len());
    let overlap = needle.len() - 1;
    let mut hits = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + window).min(data.len());
        let slice = &data[start..end];
        let found = if pattern.ignore_case {
            scan_pattern_ignore_case(slice, needle)
        } else {
            scan_pattern_parallel(slice, needle)
        };
        hits.extend(found.into_iter().map(|pos| pos + start as u64));

        if between_windows(end as u64).is_break() {
            return None;
        }
        if end >= data.len() {
            break;
        }
        start = end - overlap;
    }

    Some(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_accepts_common_spellings() {
        assert_eq!(parse_hex_pattern("41 42").unwrap(), vec![0x41, 0x42]);
        assert_eq!(parse_hex_pattern("4142").unwrap(), vec![0x41, 0x42]);
        assert_eq!(parse_hex_pattern("0x41 0X42").unwrap(), vec![0x41, 0x42]);
        assert_eq!(parse_hex_pattern("ff,d8, FF").unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn parse_hex_rejects_garbage() {
        assert!(matches!(parse_hex_pattern(""), Err(EngineError::InvalidPattern(_))));
        assert!(matches!(parse_hex_pattern("4"), Err(EngineError::InvalidPattern(_))));
        assert!(matches!(parse_hex_pattern("zz"), Err(EngineError::InvalidPattern(_))));
    }

    #[test]
    fn normalized_key_folds_case_only_when_ignoring_case() {
        let a = normalize(&SearchQuery::ascii("ABC", true)).unwrap();
        let b = normalize(&SearchQuery::ascii("abc", true)).unwrap();
        let c = normalize(&SearchQuery::ascii("ABC", false)).unwrap();
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert!(normalize(&SearchQuery::ascii("", false)).is_err());
    }

    #[test]
    fn hex_search_on_small_buffer() {
        let data = [0x00, 0x41, 0x42, 0x00, 0x41, 0x42, 0x00, 0x00, 0x41, 0x42];
        let pattern = normalize(&SearchQuery::hex("41 42")).unwrap();
        let hits = scan_windowed(&data, &pattern, SCAN_WINDOW, |_| ControlFlow::Continue(()));
        assert_eq!(hits, Some(vec![1, 4, 8]));
    }

    /// Byte-by-byte reference scan.
    fn naive_hits(data: &[u8], pattern: &[u8], ignore_case: bool) -> Vec<u64> {
        if pattern.is_empty() || data.len() < pattern.len() {
            return vec![];
        }
        (0..=data.len() - pattern.len())
            .filter(|&i| {
                let window = &data[i..i + pattern.len()];
                if ignore_case { window.eq_ignore_ascii_case(pattern) } else { window == pattern }
            })
            .map(|i| i as u64)
            .collect()
    }

    fn scan_both(data: &[u8], text: &str, window: usize) -> (Vec<u64>, Vec<u64>) {
        let exact = normalize(&SearchQuery::ascii(text, false)).unwrap();
        let folded = normalize(&SearchQuery::ascii(text, true)).unwrap();
        let go = |_: u64| ControlFlow::<()>::Continue(());
        (
            scan_windowed(data, &exact, window, go).unwrap(),
            scan_windowed(data, &folded, window, go).unwrap(),
        )
    }

    #[test]
    fn overlapping_matches_agree_across_case_modes() {
        let (exact, folded) = scan_both(b"aaaa", "aa", SCAN_WINDOW);
        assert_eq!(exact, vec![0, 1, 2]);
        assert_eq!(folded, exact);

        let (exact, folded) = scan_both(b"abababa", "aba", SCAN_WINDOW);
        assert_eq!(exact, vec![0, 2, 4]);
        assert_eq!(folded, exact);
    }

    #[test]
    fn overlapping_matches_survive_window_boundaries() {
        let data = vec![b'a'; 50];
        let expected: Vec<u64> = (0..=47).collect();
        for window in [4, 7, 16] {
            let (exact, folded) = scan_both(&data, "aaa", window);
            assert_eq!(exact, expected, "window {window}");
            assert_eq!(folded, expected, "window {window}");
        }
    }

    #[test]
    fn parallel_chunks_do_not_change_results() {
        // Long enough for several rayon slices, so runs of 'a' straddle
        // slice boundaries.
        let data: Vec<u8> = (0..3 * 1024 * 1024 + 17)
            .map(|i: usize| if i % 7 < 4 { b'a' } else { b'b' })
            .collect();
        let expected = naive_hits(&data, b"aa", false);
        assert_eq!(scan_pattern_parallel(&data, b"aa"), expected);
        assert_eq!(scan_pattern_ignore_case(&data, b"AA"), expected);

        let solid = vec![b'a'; 2 * 1024 * 1024 + 5];
        let expected: Vec<u64> = (0..=solid.len() as u64 - 3).collect();
        assert_eq!(scan_pattern_parallel(&solid, b"aaa"), expected);
    }

    #[test]
    fn parallel_scan_boundary_crossing() {
        let mut data = vec![0u8; 2 * 1024 * 1024 + 100];
        let pattern = b"BOUNDARY";
        let boundary_pos = 1024 * 1024 - 3;
        data[boundary_pos..boundary_pos + pattern.len()].copy_from_slice(pattern);

        let hits = scan_pattern_parallel(&data, pattern);
        assert_eq!(hits, vec![boundary_pos as u64]);
    }

    #[test]
    fn parallel_matches_naive() {
        let data: Vec<u8> = (0..100_000).map(|i| (i % 256) as u8).collect();
        let pattern = &[0u8, 1, 2, 3];
        assert_eq!(naive_hits(&data, pattern, false), scan_pattern_parallel(&data, pattern));
    }

    #[test]
    fn ignore_case_matches_mixed_case() {
        let data = b"Spyglass SPYGLASS spyGlass spy";
        let hits = scan_pattern_ignore_case(data, b"spyglass");
        assert_eq!(hits, vec![0, 9, 18]);
        assert_eq!(hits, naive_hits(data, b"spyglass", true));
        assert!(scan_pattern_ignore_case(b"spy", b"spyglass").is_empty());
    }

    #[test]
    fn windowed_scan_finds_matches_across_windows_once() {
        let mut data = vec![0u8; 100];
        for pos in [0usize, 14, 15, 30, 97] {
            data[pos..pos + 3].copy_from_slice(b"abc");
        }
        let pattern = normalize(&SearchQuery::ascii("abc", false)).unwrap();
        let hits = scan_windowed(&data, &pattern, 16, |_| ControlFlow::Continue(()));
        // Writing at 15 clobbers the match at 14, leaving "aabc".
        assert_eq!(hits, Some(vec![0, 15, 30, 97]));
    }

    #[test]
    fn windowed_scan_stops_when_asked() {
        let data = vec![b'a'; 64];
        let pattern = normalize(&SearchQuery::ascii("a", false)).unwrap();
        let mut calls = 0;
        let hits = scan_windowed(&data, &pattern, 16, |scanned| {
            calls += 1;
            if scanned >= 32 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        });
        assert_eq!(hits, None);
        assert_eq!(calls, 2);
    }
}
