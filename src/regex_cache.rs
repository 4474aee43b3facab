//! Compiled-regex cache shared by all resolutions.
//!
//! Patterns are compiled once and reused until evicted. The cache is bounded
//! and evicts the least recently used pattern when full. Failed compilations
//! are cached too, so a broken pattern is not recompiled on every request.
//!
//! Stalls are prevented by the engine itself: the `regex` crate matches in
//! linear time in the haystack, so a pattern like `(a+)+$` cannot backtrack
//! catastrophically. Compiled programs are capped by `size_limit`. The time
//! budget covers the match only and is checked once the match returns; a
//! slow match fails its condition but is not interrupted. Compilation
//! happens once per pattern and is not charged to any request.

use crate::error::EvaluationError;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

type Compiled = Result<Arc<Regex>, String>;

struct CacheSlot {
    compiled: Compiled,
    last_used: AtomicU64,
}

/// Bounded LRU cache of compiled patterns.
pub struct RegexCache {
    capacity: usize,
    size_limit: usize,
    timeout: Duration,
    entries: RwLock<HashMap<String, CacheSlot>>,
    /// Logical clock for recency
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RegexCache {
    pub fn new(capacity: usize, size_limit: usize, timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            size_limit,
            timeout,
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Match `haystack` against `pattern` within the time budget.
    pub fn is_match(&self, pattern: &str, haystack: &str) -> Result<bool, EvaluationError> {
        let regex = self.get_or_compile(pattern)?;

        let started = Instant::now();
        let matched = regex.is_match(haystack);

        let elapsed = started.elapsed();
        if elapsed > self.timeout {
            return Err(EvaluationError::RegexTimeout {
                pattern: pattern.to_string(),
                elapsed,
            });
        }
        Ok(matched)
    }

    /// Fetch a compiled pattern, compiling and caching it on a miss.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>, EvaluationError> {
        let compiled = match self.lookup(pattern) {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                hit
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let compiled = self.compile(pattern);
                self.insert(pattern, compiled.clone());
                compiled
            }
        };

        compiled.map_err(|reason| EvaluationError::InvalidRegex {
            pattern: pattern.to_string(),
            reason,
        })
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(pattern)
    }

    /// (hits, misses) since creation.
    pub fn hit_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn lookup(&self, pattern: &str) -> Option<Compiled> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(pattern).map(|slot| {
            slot.last_used.store(self.tick(), Ordering::Relaxed);
            slot.compiled.clone()
        })
    }

    fn insert(&self, pattern: &str, compiled: Compiled) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if !entries.contains_key(pattern) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(pattern = %oldest, "Evicting compiled regex");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            pattern.to_string(),
            CacheSlot {
                compiled,
                last_used: AtomicU64::new(self.tick()),
            },
        );
    }

    fn compile(&self, pattern: &str) -> Compiled {
        RegexBuilder::new(pattern)
            .size_limit(self.size_limit)
            .dfa_size_limit(self.size_limit)
            .build()
            .map(Arc::new)
            .map_err(|e| e.to_string())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> RegexCache {
        RegexCache::new(capacity, 1 << 20, Duration::from_millis(50))
    }

    #[test]
    fn test_compiles_once() {
        let cache = cache(8);
        assert!(cache.is_match("^ab+c$", "abbbc").unwrap());
        assert!(!cache.is_match("^ab+c$", "ac").unwrap());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hit_stats(), (1, 1));
    }

    #[test]
    fn test_invalid_pattern_is_cached_error() {
        let cache = cache(8);
        let err = cache.is_match("(unclosed", "x").unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidRegex { .. }));
        assert!(cache.contains("(unclosed"));

        assert!(cache.is_match("(unclosed", "x").is_err());
        assert_eq!(cache.hit_stats(), (1, 1));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = cache(2);
        cache.get_or_compile("a").unwrap();
        cache.get_or_compile("b").unwrap();
        // Touch "a" so "b" becomes the oldest
        cache.get_or_compile("a").unwrap();
        cache.get_or_compile("c").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_size_limit_rejects_huge_programs() {
        let cache = RegexCache::new(8, 1024, Duration::from_millis(50));
        let err = cache.get_or_compile(r"\w{1000}").unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidRegex { .. }));
    }

    #[test]
    fn test_pathological_pattern_is_bounded() {
        let cache = RegexCache::new(8, 1 << 20, Duration::from_secs(1));
        let haystack = format!("{}!", "a".repeat(50_000));

        let started = Instant::now();
        let matched = cache.is_match("^(a+)+$", &haystack).unwrap();
        assert!(!matched);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_zero_budget_times_out() {
        let cache = RegexCache::new(8, 1 << 20, Duration::ZERO);
        let err = cache.is_match("a", &"a".repeat(10_000)).unwrap_err();
        assert!(matches!(err, EvaluationError::RegexTimeout { .. }));
    }

    #[test]
    fn test_first_match_agrees_with_cached_match() {
        let cache = cache(8);
        let pattern = r"^([a-z]{1,8}-){1,40}[0-9]{1,20}$";
        let haystack = format!("{}42", "abc-".repeat(40));

        assert!(!cache.contains(pattern));
        assert!(cache.is_match(pattern, &haystack).unwrap());
        assert!(cache.is_match(pattern, &haystack).unwrap());
        assert_eq!(cache.hit_stats(), (1, 1));
    }
}
