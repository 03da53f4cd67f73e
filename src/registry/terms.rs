//! Session-side TermSet editing
//!
//! A control session keeps a working copy of the TermSet taken at connect
//! time. Each accepted line is applied to that copy; if the copy changed,
//! the whole copy is committed to the registry. Concurrent sessions
//! therefore follow last-writer-wins.

use std::collections::BTreeSet;

/// One term token from a comma-separated line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermEdit {
    Add(String),
    Remove(String),
}

impl TermEdit {
    /// Parse a trimmed token. Empty tokens and bare `-` yield `None`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if let Some(term) = token.strip_prefix('-') {
            let term = term.trim();
            if term.is_empty() {
                None
            } else {
                Some(Self::Remove(term.to_string()))
            }
        } else if token.is_empty() {
            None
        } else {
            Some(Self::Add(token.to_string()))
        }
    }
}

/// Session-local working copy of the TermSet
#[derive(Debug, Clone, Default)]
pub struct WorkingTerms {
    terms: BTreeSet<String>,
    dirty: bool,
}

impl WorkingTerms {
    pub fn new(terms: BTreeSet<String>) -> Self {
        Self {
            terms,
            dirty: false,
        }
    }

    /// Apply one edit. Removing an absent term is ignored.
    pub fn apply(&mut self, edit: TermEdit) -> bool {
        let changed = match edit {
            TermEdit::Add(term) => self.terms.insert(term),
            TermEdit::Remove(term) => self.terms.remove(&term),
        };
        self.dirty |= changed;
        changed
    }

    /// Take the pending change flag, returning the set to commit if dirty
    pub fn take_commit(&mut self) -> Option<BTreeSet<String>> {
        if std::mem::take(&mut self.dirty) {
            Some(self.terms.clone())
        } else {
            None
        }
    }

    pub fn terms(&self) -> &BTreeSet<String> {
        &self.terms
    }
}

/// Render a TermSet as `{a, b, c}`
pub fn format_terms(terms: &BTreeSet<String>) -> String {
    let joined: Vec<&str> = terms.iter().map(String::as_str).collect();
    format!("{{{}}}", joined.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse() {
        assert_eq!(TermEdit::parse(" cats "), Some(TermEdit::Add("cats".into())));
        assert_eq!(TermEdit::parse("-cats"), Some(TermEdit::Remove("cats".into())));
        assert_eq!(TermEdit::parse("x-men"), Some(TermEdit::Add("x-men".into())));
        assert_eq!(TermEdit::parse(""), None);
        assert_eq!(TermEdit::parse("-"), None);
    }

    #[test]
    fn test_add_then_remove_restores() {
        let original = set(&["crystals", "jeans"]);
        let mut working = WorkingTerms::new(original.clone());

        working.apply(TermEdit::Add("cats".into()));
        assert_eq!(working.take_commit(), Some(set(&["cats", "crystals", "jeans"])));

        working.apply(TermEdit::Remove("cats".into()));
        assert_eq!(working.take_commit(), Some(original));
    }

    #[test]
    fn test_noop_edits_do_not_commit() {
        let mut working = WorkingTerms::new(set(&["cats"]));
        assert!(!working.apply(TermEdit::Add("cats".into())));
        assert!(!working.apply(TermEdit::Remove("dogs".into())));
        assert_eq!(working.take_commit(), None);
    }

    #[test]
    fn test_format_terms() {
        assert_eq!(format_terms(&set(&[])), "{}");
        assert_eq!(format_terms(&set(&["b", "a"])), "{a, b}");
    }
}
