//! Shared configuration options / 共享配置项
//!
//! `Options` is a string map owned by the caller. Clones share the same
//! underlying map, so values written by the credential injection step are
//! visible to whoever handed the options in.
//!
//! Plugins link their own copy of `parking_lot`, so a plugin is only ever
//! handed a snapshot built for it, never a map host threads still lock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Options {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.read().get(key).cloned()
    }

    /// Set a value, last write wins / 设置配置值
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.write().insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Get a boolean option ("true"/"false", case-insensitive) / 获取布尔配置
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        })
    }

    /// Copy of the current contents / 当前配置快照
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.read().clone()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_writes() {
        let options = Options::new();
        let shared = options.clone();
        shared.set("s3.access-key", "AK1");
        assert_eq!(options.get("s3.access-key").as_deref(), Some("AK1"));

        shared.set("s3.access-key", "AK2");
        assert_eq!(options.get("s3.access-key").as_deref(), Some("AK2"));
    }

    #[test]
    fn test_get_bool() {
        let options: Options = [("a", "TRUE"), ("b", "false"), ("c", "yes")].into_iter().collect();
        assert_eq!(options.get_bool("a"), Some(true));
        assert_eq!(options.get_bool("b"), Some(false));
        assert_eq!(options.get_bool("c"), None);
        assert_eq!(options.get_bool("missing"), None);
    }
}
