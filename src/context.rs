//! # Execution Context
//!
//! Shared key/value context handed to sources on `open` and to every filter and
//! mapper invocation. Clones share the same underlying map.

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    entries: Arc<DashMap<String, Value>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Store any serializable value; returns false if it could not be serialized
    pub fn put_serialized<V: Serialize>(&self, key: impl Into<String>, value: &V) -> bool {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.put(key, v);
                true
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_as<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clones_share_entries() {
        let ctx = ExecutionContext::new();
        let other = ctx.clone();
        other.put("threshold", json!(10));
        assert_eq!(ctx.get("threshold"), Some(json!(10)));
        assert_eq!(ctx.get_as::<u32>("threshold"), Some(10));
    }

    #[test]
    fn typed_round_trip_and_removal() {
        let ctx = ExecutionContext::new();
        assert!(ctx.put_serialized("ids", &vec![1, 2, 3]));
        assert_eq!(ctx.get_as::<Vec<i32>>("ids"), Some(vec![1, 2, 3]));
        assert_eq!(ctx.get_as::<String>("ids"), None);
        assert!(ctx.remove("ids").is_some());
        assert!(ctx.is_empty());
    }
}
