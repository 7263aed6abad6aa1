use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use alertstore_core::{Labels, Result};

/// Memoizes decoded label and annotation columns.
///
/// Many rules share identical label sets, so decoding them once per
/// distinct JSON text saves most of the work on large listings. The cache
/// is owned by a store instance and bounded.
pub struct JsonDecodeCache {
    entries: Mutex<LruCache<String, Labels>>,
}

impl JsonDecodeCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Decode a `{"k":"v"}` column. Empty text decodes to an empty map.
    pub fn labels(&self, raw: &str) -> Result<Labels> {
        if raw.is_empty() {
            return Ok(Labels::new());
        }
        if let Some(hit) = self.entries.lock().expect("lock poisoned").get(raw) {
            return Ok(hit.clone());
        }
        let decoded: Labels = serde_json::from_str(raw)?;
        self.entries
            .lock()
            .expect("lock poisoned")
            .put(raw.to_string(), decoded.clone());
        Ok(decoded)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_and_memoizes() {
        let cache = JsonDecodeCache::new(2);
        let labels = cache.labels(r#"{"severity":"critical"}"#).unwrap();
        assert_eq!(labels.get("severity").map(String::as_str), Some("critical"));
        assert_eq!(cache.len(), 1);

        cache.labels(r#"{"severity":"critical"}"#).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn bounded_and_tolerant_of_empty_text() {
        let cache = JsonDecodeCache::new(1);
        assert!(cache.labels("").unwrap().is_empty());
        assert!(cache.is_empty());

        cache.labels(r#"{"a":"1"}"#).unwrap();
        cache.labels(r#"{"b":"2"}"#).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let cache = JsonDecodeCache::new(4);
        assert!(cache.labels("{not json").is_err());
        assert!(cache.is_empty());
    }
}
