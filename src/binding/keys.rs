//! Shared key table for binding segments
//!
//! Object keys are stored once, so `Segment::Key`s parsed from different
//! paths point at the same `Arc<str>` and compare by pointer first.
//! All-digit text never reaches the table: it becomes an array index.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::trace;

use super::instance::Segment;

static KEYS: Lazy<KeyTable> = Lazy::new(KeyTable::new);

/// Concurrent set of binding keys
#[derive(Default)]
pub struct KeyTable {
    keys: DashMap<Arc<str>, ()>,
}

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared `Arc<str>` for `name`
    pub fn key(&self, name: &str) -> Arc<str> {
        if let Some(existing) = self.keys.get(name) {
            return Arc::clone(existing.key());
        }
        // entry() settles two threads adding the same key
        Arc::clone(self.keys.entry(Arc::from(name)).or_insert(()).key())
    }

    /// Segment for one piece of path text: all digits is an index, anything else a key
    pub fn segment(&self, text: &str) -> Segment {
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = text.parse::<usize>() {
                return Segment::Index(index);
            }
        }
        Segment::Key(self.key(text))
    }

    /// Drop keys no live binding refers to; returns how many went
    pub fn sweep(&self) -> usize {
        let before = self.keys.len();
        self.keys.retain(|key, _| Arc::strong_count(key) > 1);
        let removed = before - self.keys.len();
        trace!(removed, "swept binding keys");
        removed
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Key from the process-wide table
pub fn key(name: &str) -> Arc<str> {
    KEYS.key(name)
}

/// Segment from the process-wide table
pub fn segment(text: &str) -> Segment {
    KEYS.segment(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;

    fn key_of(segment: &Segment) -> &Arc<str> {
        match segment {
            Segment::Key(k) => k,
            Segment::Index(i) => panic!("expected a key, got index {i}"),
        }
    }

    #[test]
    fn digits_become_indices_and_words_keys() {
        let table = KeyTable::new();
        assert_eq!(table.segment("12"), Segment::Index(12));
        assert!(matches!(table.segment("1a"), Segment::Key(_)));
        assert!(matches!(table.segment(""), Segment::Key(_)));
        // Too large for usize: stays a key
        assert!(matches!(table.segment("99999999999999999999999"), Segment::Key(_)));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn equal_keys_share_one_allocation() {
        let table = KeyTable::new();
        let a = table.segment("user");
        let b = table.segment("user");
        assert!(Arc::ptr_eq(key_of(&a), key_of(&b)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn bindings_from_different_paths_share_keys() {
        let parser = BindingParser::new();
        let first = parser.parse("profile.name").unwrap();
        let second = parser.parse("['profile'][\"email\"]").unwrap();
        assert!(Arc::ptr_eq(
            key_of(&first.segments()[0]),
            key_of(&second.segments()[0])
        ));
    }

    #[test]
    fn sweep_keeps_keys_still_in_use() {
        let table = KeyTable::new();
        let held = table.segment("held");
        drop(table.segment("dropped"));

        assert_eq!(table.sweep(), 1);
        assert_eq!(table.len(), 1);
        assert!(Arc::ptr_eq(key_of(&held), &table.key("held")));
    }

    #[test]
    fn concurrent_callers_get_the_same_key() {
        use std::sync::mpsc;
        use std::thread;

        let table = Arc::new(KeyTable::new());
        let (tx, rx) = mpsc::channel();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            let tx = tx.clone();
            thread::spawn(move || {
                tx.send(table.key("shared")).unwrap();
            });
        }
        drop(tx);

        let results: Vec<Arc<str>> = rx.iter().collect();
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }
}
