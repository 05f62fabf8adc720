//! Multi-pattern Aho–Corasick string matcher: keyword trie, NFA failure
//! function, optional NFA→DFA conversion, and row compaction into one of
//! four per-state storage formats.

mod row;
mod xlatcase;

pub use row::{Row, RowFormat};
pub use xlatcase::upper;

use crate::error::{Result, RingtapError};
use std::collections::{HashMap, VecDeque};

/// Sentinel meaning "no transition" in NFA form. Never observed once a
/// machine has been converted to DFA form.
pub const FAIL: u32 = u32::MAX;

const ALPHABET_SIZE: usize = 256;
const DEFAULT_MAX_SPARSE_TRANSITIONS: usize = 64;
const DEFAULT_MAX_ZERO_COUNT: usize = 8;

/// Which automaton representation was selected for this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatonKind {
    /// Transitions fall back through failure links at search time.
    Nfa,
    /// Every state has a transition for every symbol; no failure chain walk.
    Dfa,
    /// Structural trie only; `search` is not implemented for this kind.
    Trie,
}

/// One registered pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Caller-assigned identifier, returned on match.
    pub id: u32,
    /// Original-case bytes, used to verify case-sensitive matches.
    pub original: Vec<u8>,
    /// Upper-cased bytes, used to walk the automaton.
    pub upper: Vec<u8>,
    /// If true, a transition-table hit is reported without a byte-exact
    /// recheck against `original`.
    pub nocase: bool,
}

impl Pattern {
    /// Length of the pattern in bytes.
    pub fn len(&self) -> usize {
        self.upper.len()
    }

    /// Whether the pattern is empty.
    pub fn is_empty(&self) -> bool {
        self.upper.is_empty()
    }
}

struct BuildState {
    goto_: Vec<HashMap<u8, u32>>,
    fail: Vec<u32>,
    matches: Vec<Vec<u32>>,
    depth: Vec<u32>,
}

impl BuildState {
    fn new() -> Self {
        Self {
            goto_: vec![HashMap::new()],
            fail: vec![0],
            matches: vec![Vec::new()],
            depth: vec![0],
        }
    }

    fn new_state(&mut self, depth: u32) -> u32 {
        let id = self.goto_.len() as u32;
        self.goto_.push(HashMap::new());
        self.fail.push(0);
        self.matches.push(Vec::new());
        self.depth.push(depth);
        id
    }

    fn insert(&mut self, pattern: &Pattern) {
        let mut state = 0u32;
        for &b in &pattern.upper {
            state = match self.goto_[state as usize].get(&b) {
                Some(&next) => next,
                None => {
                    let depth = self.depth[state as usize] + 1;
                    let next = self.new_state(depth);
                    self.goto_[state as usize].insert(b, next);
                    next
                }
            };
        }
        self.matches[state as usize].push(pattern.id);
    }

    /// Breadth-first construction of the failure function, copying inherited
    /// match lists along the way.
    fn build_failure_function(&mut self) {
        let mut queue = VecDeque::new();
        for b in 0..=255u8 {
            if let Some(&s) = self.goto_[0].get(&b) {
                self.fail[s as usize] = 0;
                queue.push_back(s);
            }
        }
        while let Some(r) = queue.pop_front() {
            let edges: Vec<(u8, u32)> = self.goto_[r as usize]
                .iter()
                .map(|(&b, &s)| (b, s))
                .collect();
            for (b, s) in edges {
                queue.push_back(s);
                let mut state = self.fail[r as usize];
                while state != 0 && !self.goto_[state as usize].contains_key(&b) {
                    state = self.fail[state as usize];
                }
                let target = self.goto_[state as usize].get(&b).copied().unwrap_or(0);
                self.fail[s as usize] = if target == s { 0 } else { target };
                let inherited = self.matches[self.fail[s as usize] as usize].clone();
                self.matches[s as usize].extend(inherited);
            }
        }
    }

    /// For every state, fill in the transitions missing after trie
    /// construction so that no failure-link walk is needed at search time.
    fn convert_to_dfa(&mut self) {
        for b in 0..=255u8 {
            self.goto_[0].entry(b).or_insert(0);
        }
        let mut queue: VecDeque<u32> = self
            .goto_[0]
            .values()
            .copied()
            .filter(|&s| self.depth[s as usize] == 1)
            .collect();
        while let Some(r) = queue.pop_front() {
            let r_depth = self.depth[r as usize];
            let existing: Vec<(u8, u32)> = self.goto_[r as usize]
                .iter()
                .map(|(&b, &s)| (b, s))
                .collect();
            let mut child_edges: Vec<u8> = Vec::new();
            for (b, s) in &existing {
                if self.depth[*s as usize] == r_depth + 1 {
                    child_edges.push(*b);
                }
            }
            for b in 0..=255u8 {
                if !self.goto_[r as usize].contains_key(&b) {
                    let f = self.fail[r as usize];
                    let target = self.goto_[f as usize].get(&b).copied().unwrap_or(0);
                    self.goto_[r as usize].insert(b, target);
                }
            }
            for b in child_edges {
                if let Some(&s) = self.goto_[r as usize].get(&b) {
                    queue.push_back(s);
                }
            }
        }
    }
}

/// A compiled multi-pattern matcher.
pub struct Automaton {
    kind: AutomatonKind,
    row_format: RowFormat,
    patterns: Vec<Pattern>,
    rows: Vec<Row>,
    match_lists: Vec<Vec<u32>>,
    fail: Vec<u32>,
    max_sparse_transitions: usize,
    max_zero_count: usize,
    compiled: bool,
}

impl Automaton {
    /// Create an empty, uncompiled machine.
    pub fn new(kind: AutomatonKind, row_format: RowFormat) -> Self {
        Self {
            kind,
            row_format,
            patterns: Vec::new(),
            rows: Vec::new(),
            match_lists: Vec::new(),
            fail: Vec::new(),
            max_sparse_transitions: DEFAULT_MAX_SPARSE_TRANSITIONS,
            max_zero_count: DEFAULT_MAX_ZERO_COUNT,
            compiled: false,
        }
    }

    /// Override the per-machine sparse-row-to-full promotion threshold.
    pub fn with_max_sparse_transitions(mut self, max: usize) -> Self {
        self.max_sparse_transitions = max;
        self
    }

    /// Override the per-machine sparse-band segmentation threshold.
    pub fn with_max_zero_count(mut self, max: usize) -> Self {
        self.max_zero_count = max;
        self
    }

    /// Register a pattern. Must be called before `compile`; adding patterns
    /// after compilation is not supported.
    pub fn add_pattern(
        &mut self,
        id: u32,
        bytes: &[u8],
        nocase: bool,
    ) -> Result<()> {
        if self.compiled {
            return Err(RingtapError::unexpected(
                "pattern insertion after compile is not supported",
            ));
        }
        if bytes.is_empty() {
            return Err(RingtapError::config("pattern must be non-empty"));
        }
        self.patterns.push(Pattern {
            id,
            original: bytes.to_vec(),
            upper: bytes.iter().map(|&b| upper(b)).collect(),
            nocase,
        });
        Ok(())
    }

    /// Build the trie, failure function, optional DFA conversion, and
    /// compacted row storage.
    pub fn compile(&mut self) -> Result<()> {
        let mut build = BuildState::new();
        for pattern in &self.patterns {
            build.insert(pattern);
        }
        build.build_failure_function();

        let default_fill = match self.kind {
            AutomatonKind::Dfa => {
                build.convert_to_dfa();
                0u32
            }
            AutomatonKind::Nfa | AutomatonKind::Trie => FAIL,
        };

        let num_states = build.goto_.len();
        let mut rows = Vec::with_capacity(num_states);
        for state in 0..num_states {
            let mut dense = [default_fill; ALPHABET_SIZE];
            for (&b, &s) in &build.goto_[state] {
                dense[b as usize] = s;
            }
            let has_match = !build.matches[state].is_empty();
            rows.push(row::compact(
                &dense,
                state,
                default_fill,
                has_match,
                self.row_format,
                self.max_sparse_transitions,
                self.max_zero_count,
            ));
        }

        self.rows = rows;
        self.match_lists = build.matches;
        self.fail = build.fail;
        self.compiled = true;
        Ok(())
    }

    /// Number of states in the compiled automaton.
    pub fn num_states(&self) -> usize {
        self.rows.len()
    }

    /// Whether every state whose match list is non-empty has its match flag
    /// set, and vice versa. Used by tests; always true for a correctly
    /// compiled machine.
    pub fn match_flags_consistent(&self) -> bool {
        self.rows
            .iter()
            .zip(self.match_lists.iter())
            .all(|(row, matches)| row.has_match() == !matches.is_empty())
    }

    /// Scan `haystack`, invoking `report(pattern_id, end_offset)` for every
    /// match. `end_offset` is the 1-based count of bytes consumed when the
    /// match was recognized. Stops early if `report` returns `true`.
    pub fn search(
        &self,
        haystack: &[u8],
        mut report: impl FnMut(u32, usize) -> bool,
    ) -> Result<()> {
        if !self.compiled {
            return Err(RingtapError::AutomatonNotCompiled);
        }
        if self.kind == AutomatonKind::Trie {
            return Err(RingtapError::SearchNotImplemented);
        }

        let miss = match self.kind {
            AutomatonKind::Dfa => 0u32,
            _ => FAIL,
        };

        let mut state = 0u32;
        for (i, &raw) in haystack.iter().enumerate() {
            let b = upper(raw);
            let position = i + 1;

            loop {
                let row = &self.rows[state as usize];
                let next = row.decode_next(b, miss);
                if next != FAIL {
                    state = next;
                    break;
                }
                // NFA miss: fall back through the failure chain and retry.
                if state == 0 {
                    break;
                }
                state = self.failure_of(state);
            }

            let row = &self.rows[state as usize];
            if row.has_match() {
                for &pattern_id in &self.match_lists[state as usize] {
                    let pattern = self
                        .patterns
                        .iter()
                        .find(|p| p.id == pattern_id)
                        .expect("match list references a registered pattern");
                    if position < pattern.len() {
                        continue;
                    }
                    let start = position - pattern.len();
                    let verified = pattern.nocase
                        || haystack
                            .get(start..position)
                            .map(|slice| slice == pattern.original.as_slice())
                            .unwrap_or(false);
                    if verified && report(pattern.id, position) {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    fn failure_of(&self, state: u32) -> u32 {
        self.fail[state as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(kind: AutomatonKind, format: RowFormat) -> Automaton {
        let mut automaton = Automaton::new(kind, format);
        automaton.add_pattern(1, b"he", false).unwrap();
        automaton.add_pattern(2, b"she", false).unwrap();
        automaton.add_pattern(3, b"his", false).unwrap();
        automaton.add_pattern(4, b"hers", false).unwrap();
        automaton.compile().unwrap();
        automaton
    }

    fn collect_matches(automaton: &Automaton, haystack: &[u8]) -> Vec<(u32, usize)> {
        let mut hits = Vec::new();
        automaton
            .search(haystack, |id, pos| {
                hits.push((id, pos));
                false
            })
            .unwrap();
        hits.sort();
        hits
    }

    #[test]
    fn test_ushers_dfa_full() {
        let automaton = build(AutomatonKind::Dfa, RowFormat::Full);
        let mut hits = collect_matches(&automaton, b"ushers");
        hits.sort();
        let mut expected = vec![(2u32, 4usize), (1, 4), (4, 6)];
        expected.sort();
        assert_eq!(hits, expected);
        assert!(automaton.match_flags_consistent());
    }

    #[test]
    fn test_row_format_determinism() {
        let formats = [
            RowFormat::Full,
            RowFormat::Sparse,
            RowFormat::Banded,
            RowFormat::SparseBands,
        ];
        let mut results = Vec::new();
        for format in formats {
            let automaton = build(AutomatonKind::Dfa, format);
            results.push(collect_matches(&automaton, b"ushers"));
        }
        for pair in results.windows(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_nfa_dfa_equivalence() {
        let nfa = build(AutomatonKind::Nfa, RowFormat::Full);
        let dfa = build(AutomatonKind::Dfa, RowFormat::Full);
        assert_eq!(
            collect_matches(&nfa, b"ushers"),
            collect_matches(&dfa, b"ushers")
        );
    }

    #[test]
    fn test_trie_search_not_implemented() {
        let automaton = build(AutomatonKind::Trie, RowFormat::Full);
        let result = automaton.search(b"ushers", |_, _| false);
        assert!(matches!(result, Err(RingtapError::SearchNotImplemented)));
    }

    #[test]
    fn test_search_before_compile_errors() {
        let automaton = Automaton::new(AutomatonKind::Dfa, RowFormat::Full);
        let result = automaton.search(b"x", |_, _| false);
        assert!(matches!(result, Err(RingtapError::AutomatonNotCompiled)));
    }

    #[test]
    fn test_insert_after_compile_rejected() {
        let mut automaton = build(AutomatonKind::Dfa, RowFormat::Full);
        let result = automaton.add_pattern(99, b"x", false);
        assert!(result.is_err());
    }

    #[test]
    fn test_case_sensitive_pattern_requires_exact_case() {
        let mut automaton = Automaton::new(AutomatonKind::Dfa, RowFormat::Full);
        automaton.add_pattern(1, b"He", false).unwrap();
        automaton.compile().unwrap();
        assert!(collect_matches(&automaton, b"he").is_empty());
        assert_eq!(collect_matches(&automaton, b"He"), vec![(1, 2)]);
    }

    #[test]
    fn test_nocase_pattern_matches_any_case() {
        let mut automaton = Automaton::new(AutomatonKind::Dfa, RowFormat::Full);
        automaton.add_pattern(1, b"He", true).unwrap();
        automaton.compile().unwrap();
        assert_eq!(collect_matches(&automaton, b"he"), vec![(1, 2)]);
    }
}
