//! Per-run memoization of successful fetches.

use std::collections::HashMap;

use super::{RequestMethod, RetryBudget};

/// Cache key: the full identity of a fetch call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub method: RequestMethod,
    pub url: String,
    pub budget: RetryBudget,
}

/// Successful response bodies, keyed by request.
///
/// One cache lives for one top-level operation and is dropped with it, so
/// results never leak between runs. Entries are written once; a second
/// insert for the same key keeps the first body.
#[derive(Debug, Default)]
pub struct FetchCache {
    entries: HashMap<FetchKey, Vec<u8>>,
}

impl FetchCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &FetchKey) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Stores `body` unless the key already has one, and returns the stored body.
    pub fn insert(&mut self, key: FetchKey, body: Vec<u8>) -> &[u8] {
        self.entries.entry(key).or_insert(body).as_slice()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
