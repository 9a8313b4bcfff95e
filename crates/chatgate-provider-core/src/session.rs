use dashmap::DashMap;

pub const DEFAULT_SESSION_KEY: &str = "default";

/// Client session key to vendor conversation id, for one provider.
#[derive(Debug, Default)]
pub struct SessionMap {
    inner: DashMap<String, String>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: &str, session_id: String) {
        self.inner.insert(key.to_string(), session_id);
    }

    /// Removes the mapping only while it still points at `stale`, so a fresh
    /// id written by a concurrent request is left alone.
    pub fn evict(&self, key: &str, stale: &str) -> bool {
        self.inner
            .remove_if(key, |_, current| current == stale)
            .is_some()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evict_only_removes_matching_id() {
        let sessions = SessionMap::new();
        sessions.insert(DEFAULT_SESSION_KEY, "old".into());
        assert!(!sessions.evict(DEFAULT_SESSION_KEY, "other"));
        assert_eq!(sessions.get(DEFAULT_SESSION_KEY).as_deref(), Some("old"));
        assert!(sessions.evict(DEFAULT_SESSION_KEY, "old"));
        assert!(sessions.get(DEFAULT_SESSION_KEY).is_none());
    }

    #[test]
    fn keys_are_independent() {
        let sessions = SessionMap::new();
        sessions.insert("a", "1".into());
        sessions.insert("b", "2".into());
        sessions.insert("a", "3".into());
        assert_eq!(sessions.get("a").as_deref(), Some("3"));
        assert_eq!(sessions.len(), 2);
        sessions.clear();
        assert!(sessions.is_empty());
    }
}
