//! Per-client record of listing IDs already delivered.
//!
//! The ledger only grows. An ID is marked after its notification is handed
//! to the notifier, so a crash mid-cycle can re-send at most that cycle's
//! listings and never loses one.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeenLedger {
    entries: HashMap<String, HashSet<String>>,
}

impl SeenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `chat_id` has a (possibly empty) set.
    pub fn ensure(&mut self, chat_id: &str) -> &mut HashSet<String> {
        self.entries.entry(chat_id.to_string()).or_default()
    }

    pub fn seen_ids(&self, chat_id: &str) -> Option<&HashSet<String>> {
        self.entries.get(chat_id)
    }

    pub fn contains(&self, chat_id: &str, listing_id: &str) -> bool {
        self.entries
            .get(chat_id)
            .is_some_and(|ids| ids.contains(listing_id))
    }

    /// Record a delivered listing. Returns `false` if it was already there.
    pub fn mark(&mut self, chat_id: &str, listing_id: &str) -> bool {
        self.ensure(chat_id).insert(listing_id.to_string())
    }

    /// Number of clients tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total IDs across all clients.
    pub fn total_ids(&self) -> usize {
        self.entries.values().map(HashSet::len).sum()
    }

    /// Serializable form with sorted IDs, for stable files on disk.
    pub fn to_document(&self) -> BTreeMap<String, Vec<String>> {
        self.entries
            .iter()
            .map(|(chat_id, ids)| {
                let mut ids: Vec<String> = ids.iter().cloned().collect();
                ids.sort();
                (chat_id.clone(), ids)
            })
            .collect()
    }

    /// Rebuild from the on-disk document. Entries that are not arrays of
    /// strings are skipped.
    pub fn from_document(doc: &Value) -> Self {
        let mut ledger = Self::new();
        if let Some(map) = doc.as_object() {
            for (chat_id, ids) in map {
                if let Some(ids) = ids.as_array() {
                    let set = ledger.ensure(chat_id);
                    set.extend(ids.iter().filter_map(Value::as_str).map(str::to_string));
                }
            }
        }
        ledger
    }
}
