//! Token canonicalization: case folding, lemmatization, synonym folding.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::KnowledgeConfig;
use crate::graph::index::normalize_term;

/// Reduces a single lower-case word to its dictionary form.
pub trait Lemmatizer: Send + Sync + fmt::Debug {
    fn lemmatize(&self, word: &str) -> String;
}

/// Leaves words unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityLemmatizer;

impl Lemmatizer for IdentityLemmatizer {
    fn lemmatize(&self, word: &str) -> String {
        word.to_owned()
    }
}

const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("men", "man"),
    ("women", "woman"),
    ("children", "child"),
    ("mice", "mouse"),
    ("people", "person"),
    ("geese", "goose"),
    ("feet", "foot"),
    ("teeth", "tooth"),
];

/// English plural stripping by suffix rules plus a small irregular table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixLemmatizer;

impl Lemmatizer for SuffixLemmatizer {
    fn lemmatize(&self, word: &str) -> String {
        if let Some((_, singular)) = IRREGULAR_PLURALS.iter().find(|(plural, _)| *plural == word) {
            return (*singular).to_owned();
        }
        if word.chars().count() <= 3 {
            return word.to_owned();
        }
        if let Some(stem) = word.strip_suffix("ies") {
            if stem.chars().count() > 1 {
                return format!("{stem}y");
            }
        }
        for suffix in ["sses", "ches", "shes", "xes", "zes"] {
            if word.ends_with(suffix) {
                return word[..word.len() - 2].to_owned();
            }
        }
        if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
            return word.to_owned();
        }
        match word.strip_suffix('s') {
            Some(stem) => stem.to_owned(),
            None => word.to_owned(),
        }
    }
}

/// Maps raw tokens to the canonical label concepts are stored under.
#[derive(Debug)]
pub struct Normalizer {
    lemmatizer: Box<dyn Lemmatizer>,
    synonyms: BTreeMap<String, String>,
}

impl Normalizer {
    /// Synonym targets are canonicalized like any token, so a concept
    /// stored under one is found again by [`canonicalize`](Self::canonicalize).
    pub fn new(lemmatizer: Box<dyn Lemmatizer>, synonyms: &BTreeMap<String, String>) -> Self {
        let mut normalizer = Self {
            lemmatizer,
            synonyms: BTreeMap::new(),
        };
        let folded = synonyms
            .iter()
            .map(|(from, to)| (normalize_term(from), normalizer.lemmatize_phrase(&normalize_term(to))))
            .collect();
        normalizer.synonyms = folded;
        normalizer
    }

    pub fn from_config(config: &KnowledgeConfig) -> Self {
        let lemmatizer: Box<dyn Lemmatizer> = if config.lemmatize {
            Box::new(SuffixLemmatizer)
        } else {
            Box::new(IdentityLemmatizer)
        };
        Self::new(lemmatizer, &config.synonyms)
    }

    /// Canonical label for `token`. The last word of a phrase is lemmatized;
    /// synonyms match the phrase before or after lemmatization.
    pub fn canonicalize(&self, token: &str) -> String {
        let term = normalize_term(token);
        if term.is_empty() {
            return term;
        }
        if let Some(canonical) = self.synonyms.get(&term) {
            return canonical.clone();
        }
        let lemma = self.lemmatize_phrase(&term);
        self.synonyms.get(&lemma).cloned().unwrap_or(lemma)
    }

    fn lemmatize_phrase(&self, term: &str) -> String {
        match term.rsplit_once(' ') {
            Some((head, last)) => format!("{head} {}", self.lemmatizer.lemmatize(last)),
            None => self.lemmatizer.lemmatize(term),
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&KnowledgeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_rules() {
        let l = SuffixLemmatizer;
        assert_eq!(l.lemmatize("cats"), "cat");
        assert_eq!(l.lemmatize("cities"), "city");
        assert_eq!(l.lemmatize("boxes"), "box");
        assert_eq!(l.lemmatize("churches"), "church");
        assert_eq!(l.lemmatize("classes"), "class");
        assert_eq!(l.lemmatize("glass"), "glass");
        assert_eq!(l.lemmatize("virus"), "virus");
        assert_eq!(l.lemmatize("analysis"), "analysis");
        assert_eq!(l.lemmatize("has"), "has");
        assert_eq!(l.lemmatize("children"), "child");
        assert_eq!(l.lemmatize("mice"), "mouse");
    }

    #[test]
    fn canonicalize_case_and_plural() {
        let n = Normalizer::default();
        assert_eq!(n.canonicalize("Cats"), "cat");
        assert_eq!(n.canonicalize("  CAT "), "cat");
        assert_eq!(n.canonicalize("black Cats"), "black cat");
        assert_eq!(n.canonicalize("   "), "");
    }

    #[test]
    fn synonyms_fold_before_and_after_lemmas() {
        let synonyms = BTreeMap::from([
            ("Kitty".to_string(), "cat".to_string()),
            ("puss".to_string(), "cat".to_string()),
        ]);
        let n = Normalizer::new(Box::new(SuffixLemmatizer), &synonyms);
        assert_eq!(n.canonicalize("kitty"), "cat");
        assert_eq!(n.canonicalize("KITTY"), "cat");
        assert_eq!(n.canonicalize("puss"), "cat");
        // Plural form reaches the synonym through its lemma.
        assert_eq!(n.canonicalize("kitties"), "cat");
    }

    #[test]
    fn synonym_targets_are_lemmatized() {
        let synonyms = BTreeMap::from([("kitty".to_string(), "Felines".to_string())]);
        let n = Normalizer::new(Box::new(SuffixLemmatizer), &synonyms);
        assert_eq!(n.canonicalize("kitty"), "feline");
        assert_eq!(n.canonicalize("felines"), n.canonicalize("kitty"));

        let n = Normalizer::new(Box::new(IdentityLemmatizer), &synonyms);
        assert_eq!(n.canonicalize("kitty"), "felines");
    }

    #[test]
    fn lemmatization_can_be_disabled() {
        let config = KnowledgeConfig {
            lemmatize: false,
            ..Default::default()
        };
        let n = Normalizer::from_config(&config);
        assert_eq!(n.canonicalize("Cats"), "cats");
    }
}
