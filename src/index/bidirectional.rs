//! Generic bidirectional index.
//!
//! Maintains a forward map (`key → pages`) and a reverse map
//! (`page → keys`) in lockstep. The invariant: every pair present in one
//! direction is present in the other. Lookups in either direction are O(1)
//! in the index size (O(size-of-answer) to materialize), which is what makes
//! taxonomy and query updates cheap on large sites: `remove_all_for_page`
//! never scans all keys.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize + Ord, P: Serialize + Ord",
    deserialize = "K: Deserialize<'de> + Eq + Hash + Ord, P: Deserialize<'de> + Eq + Hash + Ord"
))]
pub struct BidirectionalIndex<K, P>
where
    K: Eq + Hash,
    P: Eq + Hash,
{
    forward: HashMap<K, BTreeSet<P>>,
    reverse: HashMap<P, BTreeSet<K>>,
}

impl<K, P> Default for BidirectionalIndex<K, P>
where
    K: Eq + Hash + Ord + Clone + Display,
    P: Eq + Hash + Ord + Clone + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> BidirectionalIndex<K, P>
where
    K: Eq + Hash + Ord + Clone + Display,
    P: Eq + Hash + Ord + Clone + Display,
{
    pub fn new() -> Self {
        BidirectionalIndex {
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Insert a pair into both directions. Idempotent.
    pub fn add(&mut self, key: K, page: P) {
        self.forward
            .entry(key.clone())
            .or_default()
            .insert(page.clone());
        self.reverse.entry(page).or_default().insert(key);
    }

    /// Remove a pair from both directions. Keys and pages whose sets become
    /// empty are dropped entirely.
    pub fn remove(&mut self, key: &K, page: &P) {
        if let Some(pages) = self.forward.get_mut(key) {
            pages.remove(page);
            if pages.is_empty() {
                self.forward.remove(key);
            }
        }
        if let Some(keys) = self.reverse.get_mut(page) {
            keys.remove(key);
            if keys.is_empty() {
                self.reverse.remove(page);
            }
        }
    }

    /// Remove every pair involving a page, via the reverse index. Returns
    /// the keys the page was removed from.
    pub fn remove_all_for_page(&mut self, page: &P) -> BTreeSet<K> {
        let Some(keys) = self.reverse.remove(page) else {
            return BTreeSet::new();
        };
        for key in &keys {
            if let Some(pages) = self.forward.get_mut(key) {
                pages.remove(page);
                if pages.is_empty() {
                    self.forward.remove(key);
                }
            }
        }
        keys
    }

    pub fn keys_for_page(&self, page: &P) -> BTreeSet<K> {
        self.reverse.get(page).cloned().unwrap_or_default()
    }

    pub fn pages_for_key(&self, key: &K) -> BTreeSet<P> {
        self.forward.get(key).cloned().unwrap_or_default()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.forward.contains_key(key)
    }

    /// Replace a page's key set with `new_keys`, diffing against the old
    /// set. Returns every affected key: added, removed, and unchanged;
    /// unchanged keys are included because membership order within a key's
    /// listing may still have changed.
    pub fn update_page_keys(&mut self, page: P, new_keys: BTreeSet<K>) -> BTreeSet<K> {
        let old_keys = self.keys_for_page(&page);

        for removed in old_keys.difference(&new_keys) {
            if let Some(pages) = self.forward.get_mut(removed) {
                pages.remove(&page);
                if pages.is_empty() {
                    self.forward.remove(removed);
                }
            }
        }
        for added in new_keys.difference(&old_keys) {
            self.forward
                .entry(added.clone())
                .or_default()
                .insert(page.clone());
        }
        if new_keys.is_empty() {
            self.reverse.remove(&page);
        } else {
            self.reverse.insert(page, new_keys.clone());
        }

        old_keys.union(&new_keys).cloned().collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.forward.keys()
    }

    pub fn pages(&self) -> impl Iterator<Item = &P> {
        self.reverse.keys()
    }

    pub fn key_count(&self) -> usize {
        self.forward.len()
    }

    pub fn page_count(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Scan both directions for pairs missing from the other. Not called on
    /// the hot path; used after deserialization and before saves.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for (page, keys) in &self.reverse {
            for key in keys {
                match self.forward.get(key) {
                    None => violations.push(format!(
                        "reverse has key '{}' for page '{}' but key not in forward",
                        key, page
                    )),
                    Some(pages) if !pages.contains(page) => violations.push(format!(
                        "page '{}' in reverse for key '{}' but not in forward",
                        page, key
                    )),
                    Some(_) => {}
                }
            }
        }

        for (key, pages) in &self.forward {
            for page in pages {
                match self.reverse.get(page) {
                    None => violations.push(format!(
                        "forward has page '{}' for key '{}' but page not in reverse",
                        page, key
                    )),
                    Some(keys) if !keys.contains(key) => violations.push(format!(
                        "key '{}' for page '{}' in forward but not in reverse",
                        key, page
                    )),
                    Some(_) => {}
                }
            }
        }

        violations
    }
}

impl<K, P> PartialEq for BidirectionalIndex<K, P>
where
    K: Eq + Hash,
    P: Eq + Hash,
{
    fn eq(&self, other: &Self) -> bool {
        self.forward == other.forward && self.reverse == other.reverse
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn index() -> BidirectionalIndex<String, String> {
        BidirectionalIndex::new()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_populates_both_directions() {
        let mut idx = index();
        idx.add("python".to_string(), "post-1.md".to_string());

        assert_eq!(idx.pages_for_key(&"python".to_string()), set(&["post-1.md"]));
        assert_eq!(idx.keys_for_page(&"post-1.md".to_string()), set(&["python"]));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut idx = index();
        idx.add("python".to_string(), "post-1.md".to_string());
        idx.add("python".to_string(), "post-1.md".to_string());

        assert_eq!(idx.pages_for_key(&"python".to_string()).len(), 1);
        assert!(idx.check_invariants().is_empty());
    }

    #[test]
    fn test_remove_drops_empty_keys() {
        let mut idx = index();
        idx.add("python".to_string(), "post-1.md".to_string());
        idx.remove(&"python".to_string(), &"post-1.md".to_string());

        assert!(!idx.contains_key(&"python".to_string()));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_remove_all_for_page_uses_reverse_index() {
        let mut idx = index();
        idx.add("python".to_string(), "post-1.md".to_string());
        idx.add("async".to_string(), "post-1.md".to_string());
        idx.add("python".to_string(), "post-2.md".to_string());

        let removed = idx.remove_all_for_page(&"post-1.md".to_string());
        assert_eq!(removed, set(&["python", "async"]));
        assert!(!idx.contains_key(&"async".to_string()));
        assert_eq!(idx.pages_for_key(&"python".to_string()), set(&["post-2.md"]));
        assert!(idx.check_invariants().is_empty());
    }

    #[test]
    fn test_update_page_keys_returns_all_affected() {
        let mut idx = index();
        idx.update_page_keys("post-1.md".to_string(), set(&["python"]));

        // python stays (sort order may change), async is added.
        let affected = idx.update_page_keys("post-1.md".to_string(), set(&["python", "async"]));
        assert_eq!(affected, set(&["python", "async"]));

        // rust added, python removed, async unchanged.
        let affected = idx.update_page_keys("post-1.md".to_string(), set(&["async", "rust"]));
        assert_eq!(affected, set(&["python", "async", "rust"]));
        assert!(!idx.contains_key(&"python".to_string()));
        assert!(idx.check_invariants().is_empty());
    }

    #[test]
    fn test_update_page_keys_to_empty_clears_page() {
        let mut idx = index();
        idx.update_page_keys("post-1.md".to_string(), set(&["python"]));
        let affected = idx.update_page_keys("post-1.md".to_string(), BTreeSet::new());

        assert_eq!(affected, set(&["python"]));
        assert_eq!(idx.page_count(), 0);
        assert!(idx.is_empty());
    }

    #[test]
    fn test_invariants_hold_after_mixed_operations() {
        let mut idx = index();
        for i in 0..20 {
            idx.add(format!("tag-{}", i % 5), format!("page-{}.md", i));
        }
        idx.remove(&"tag-0".to_string(), &"page-0.md".to_string());
        idx.remove_all_for_page(&"page-7.md".to_string());
        idx.update_page_keys("page-3.md".to_string(), set(&["tag-9"]));

        assert!(idx.check_invariants().is_empty());
    }

    #[test]
    fn test_check_invariants_detects_corruption() {
        let mut idx = index();
        idx.add("python".to_string(), "post-1.md".to_string());
        // Corrupt the forward side directly.
        idx.forward
            .get_mut("python")
            .unwrap()
            .insert("ghost.md".to_string());

        let violations = idx.check_invariants();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("ghost.md"));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut idx = index();
        idx.add("python".to_string(), "post-1.md".to_string());
        idx.add("rust".to_string(), "post-2.md".to_string());

        let json = serde_json::to_string(&idx).unwrap();
        let back: BidirectionalIndex<String, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, idx);
        assert!(back.check_invariants().is_empty());
    }

    #[test]
    fn test_lookup_scales_with_answer_not_index() {
        // Structural stand-in for the performance contract: reverse lookups
        // touch only the page's own keys, so corrupting an unrelated key is
        // invisible to them.
        let mut idx = index();
        for i in 0..1000 {
            idx.add(format!("tag-{}", i), format!("page-{}.md", i % 100));
        }
        let keys = idx.keys_for_page(&"page-5.md".to_string());
        assert_eq!(keys.len(), 10);
    }
}
