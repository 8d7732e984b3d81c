//! Inverted index from normalized lexical terms to concept ids.
//!
//! The index is derived data: it is never persisted and is rebuilt wholesale
//! when a graph is loaded. Its one correctness contract is that
//! [`normalize_term`] is applied identically on insert and on lookup.

use std::collections::{BTreeMap, BTreeSet};

use unicode_normalization::UnicodeNormalization;

use super::ConceptId;

/// Canonical form of a term: NFKC, lower-cased, trimmed, internal
/// whitespace collapsed to single spaces.
pub fn normalize_term(term: &str) -> String {
    term.nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Words of a multi-word label (split on whitespace and `.`/`_`/`-`).
/// Single-word labels have no separate word terms.
pub fn label_words(label: &str) -> BTreeSet<String> {
    let full = normalize_term(label);
    let words: BTreeSet<String> = full
        .split(|c: char| c.is_whitespace() || matches!(c, '.' | '_' | '-'))
        .filter(|word| !word.is_empty())
        .map(str::to_owned)
        .collect();
    if words.len() == 1 && words.contains(&full) {
        return BTreeSet::new();
    }
    words
}

/// Term → postings map, with a secondary word map for partial matches.
///
/// [`lookup`](InvertedIndex::lookup) only ever sees full labels; word terms
/// live apart and are reached through [`lookup_word`](InvertedIndex::lookup_word).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvertedIndex {
    postings: BTreeMap<String, BTreeSet<ConceptId>>,
    words: BTreeMap<String, BTreeSet<ConceptId>>,
}

fn post(map: &mut BTreeMap<String, BTreeSet<ConceptId>>, term: String, id: ConceptId) -> bool {
    map.entry(term).or_default().insert(id)
}

fn unpost(map: &mut BTreeMap<String, BTreeSet<ConceptId>>, term: &str, id: ConceptId) -> bool {
    let Some(ids) = map.get_mut(term) else {
        return false;
    };
    let removed = ids.remove(&id);
    if ids.is_empty() {
        map.remove(term);
    }
    removed
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post `id` under `term`. Returns false if it was already posted.
    pub fn add(&mut self, term: &str, id: ConceptId) -> bool {
        let term = normalize_term(term);
        if term.is_empty() {
            return false;
        }
        post(&mut self.postings, term, id)
    }

    /// Remove `id` from `term`'s postings, dropping the term when it empties.
    pub fn remove(&mut self, term: &str, id: ConceptId) -> bool {
        unpost(&mut self.postings, &normalize_term(term), id)
    }

    /// Exact-term lookup: ids whose full label normalizes to `term`. An
    /// unknown term yields the empty set.
    pub fn lookup(&self, term: &str) -> BTreeSet<ConceptId> {
        self.postings
            .get(&normalize_term(term))
            .cloned()
            .unwrap_or_default()
    }

    /// Ids whose label is `term` or contains it as a separate word.
    pub fn lookup_word(&self, term: &str) -> BTreeSet<ConceptId> {
        let term = normalize_term(term);
        let mut ids = self.postings.get(&term).cloned().unwrap_or_default();
        if let Some(more) = self.words.get(&term) {
            ids.extend(more);
        }
        ids
    }

    /// Post a concept under its full label and, separately, its words.
    pub fn index_label(&mut self, label: &str, id: ConceptId) {
        self.add(label, id);
        for word in label_words(label) {
            post(&mut self.words, word, id);
        }
    }

    /// Undo [`index_label`](Self::index_label).
    pub fn unindex_label(&mut self, label: &str, id: ConceptId) {
        self.remove(label, id);
        for word in label_words(label) {
            unpost(&mut self.words, &word, id);
        }
    }

    /// Discard all postings and re-index from `(id, label)` pairs.
    pub fn rebuild<'a>(&mut self, concepts: impl IntoIterator<Item = (ConceptId, &'a str)>) {
        self.postings.clear();
        self.words.clear();
        for (id, label) in concepts {
            self.index_label(label, id);
        }
    }

    /// Number of distinct full-label terms.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Total number of (term, id) full-label postings.
    pub fn posting_count(&self) -> usize {
        self.postings.values().map(BTreeSet::len).sum()
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.postings.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty() && self.words.is_empty()
    }
}
