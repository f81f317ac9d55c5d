//! LRU cache of completed search results, keyed by tab and pattern.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use sg_core::{NormalizedPattern, SearchKind, TabId};

pub const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchKey {
    pub tab: TabId,
    pub kind: SearchKind,
    /// Canonical pattern text, see [`NormalizedPattern::key`].
    pub pattern: String,
    pub ignore_case: bool,
}

impl SearchKey {
    pub fn new(tab: TabId, pattern: &NormalizedPattern) -> Self {
        Self {
            tab,
            kind: pattern.kind,
            pattern: pattern.key(),
            ignore_case: pattern.ignore_case,
        }
    }
}

pub struct SearchResultCache {
    capacity: usize,
    entries: HashMap<SearchKey, Arc<Vec<u64>>>,
    /// Least recently used at the front.
    order: VecDeque<SearchKey>,
}

impl Default for SearchResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SearchResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: &SearchKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up and mark as most recently used.
    pub fn get(&mut self, key: &SearchKey) -> Option<Arc<Vec<u64>>> {
        let hit = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(hit)
    }

    pub fn insert(&mut self, key: SearchKey, indices: Arc<Vec<u64>>) {
        if self.entries.insert(key.clone(), indices).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// Drop every entry of a closed tab.
    pub fn invalidate_tab(&mut self, tab: TabId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.tab != tab);
        self.order.retain(|key| key.tab != tab);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, key: &SearchKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::{normalize, SearchQuery};

    fn key(tab: u64, text: &str) -> SearchKey {
        SearchKey::new(TabId(tab), &normalize(&SearchQuery::ascii(text, false)).unwrap())
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = SearchResultCache::new(2);
        cache.insert(key(1, "a"), Arc::new(vec![1]));
        cache.insert(key(1, "b"), Arc::new(vec![2]));
        assert!(cache.get(&key(1, "a")).is_some());
        cache.insert(key(1, "c"), Arc::new(vec![3]));

        assert!(cache.contains(&key(1, "a")));
        assert!(!cache.contains(&key(1, "b")));
        assert!(cache.contains(&key(1, "c")));
    }

    #[test]
    fn capacity_is_bounded() {
        let mut cache = SearchResultCache::default();
        for i in 0..50 {
            cache.insert(key(1, &format!("p{i}")), Arc::new(vec![i]));
        }
        assert_eq!(cache.len(), DEFAULT_CAPACITY);
        assert!(cache.contains(&key(1, "p49")));
        assert!(!cache.contains(&key(1, "p0")));
    }

    #[test]
    fn keys_distinguish_tab_kind_and_case() {
        let hex = SearchKey::new(TabId(1), &normalize(&SearchQuery::hex("41")).unwrap());
        let ascii = key(1, "A");
        assert_ne!(hex, ascii);
        assert_ne!(key(1, "A"), key(2, "A"));

        let folded_upper = SearchKey::new(TabId(1), &normalize(&SearchQuery::ascii("ABC", true)).unwrap());
        let folded_lower = SearchKey::new(TabId(1), &normalize(&SearchQuery::ascii("abc", true)).unwrap());
        assert_eq!(folded_upper, folded_lower);
        assert_ne!(folded_upper, key(1, "abc"));
    }

    #[test]
    fn invalidate_tab_removes_only_that_tab() {
        let mut cache = SearchResultCache::new(10);
        cache.insert(key(1, "a"), Arc::new(vec![]));
        cache.insert(key(2, "a"), Arc::new(vec![]));
        cache.insert(key(1, "b"), Arc::new(vec![]));
        assert_eq!(cache.invalidate_tab(TabId(1)), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(2, "a")));
    }
}
