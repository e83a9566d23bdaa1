use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use skein_core::error::Result;

/// Well-known RunContext keys.
///
/// The orchestration and the adapter write the `run.*` and `request.*` keys;
/// `refine.iterations` is the default counter of `RefinePolicy`. Every other
/// key is owned by whichever nodes agree on it.
pub mod keys {
    /// Id of the current run, set when the traversal starts.
    pub const RUN_ID: &str = "run.id";
    /// Id of the external request that started the run.
    pub const REQUEST_ID: &str = "request.id";
    /// Session of the external request.
    pub const REQUEST_SESSION: &str = "request.session";
    /// Raw text of the external request.
    pub const REQUEST_TEXT: &str = "request.text";
    /// Default refinement-loop iteration counter.
    pub const REFINE_ITERATIONS: &str = "refine.iterations";
}

/// Shared, run-scoped key/value store.
///
/// Cloning yields another handle to the same map. Values are JSON so a node
/// can persist and restore its own entries. The map tolerates concurrent
/// inserts from a node's internal fan-out; across nodes, readers always run
/// after the writing node returned.
#[derive(Clone, Default)]
pub struct RunContext {
    data: Arc<DashMap<String, serde_json::Value>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RunContext from previously persisted data.
    pub fn from_map(data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            data: Arc::new(data.into_iter().collect()),
        }
    }

    /// Get a copy of a value by key.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.get(key).map(|v| v.value().clone())
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.data
            .get(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Deserialize a value into `T`. Missing keys yield `Ok(None)`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Set a value.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Set a string value.
    pub fn set_str(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Serialize `value` and store it.
    pub fn put<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        self.data.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Current value of an integer counter (0 when unset).
    pub fn counter(&self, key: &str) -> u64 {
        self.data.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    /// Atomically increment a counter and return the new value.
    pub fn increment(&self, key: impl Into<String>) -> u64 {
        let mut entry = self
            .data
            .entry(key.into())
            .or_insert(serde_json::Value::from(0u64));
        let next = match entry.as_u64() {
            Some(current) => current + 1,
            None => {
                warn!(value = %entry.value(), "Counter held a non-numeric value, restarting at 1");
                1
            }
        };
        *entry = serde_json::Value::from(next);
        next
    }

    /// Merge another context into this one (overwrites on conflict).
    pub fn merge(&self, other: &RunContext) {
        for item in other.data.iter() {
            self.data.insert(item.key().clone(), item.value().clone());
        }
    }

    /// Copy out the current contents, e.g. for persistence.
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.data
            .iter()
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("data", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_basic_operations() {
        let ctx = RunContext::new();
        ctx.set_str("name", "Alice");
        ctx.set("count", serde_json::json!(42));

        assert_eq!(ctx.get_str("name").as_deref(), Some("Alice"));
        assert_eq!(ctx.get("count"), Some(serde_json::json!(42)));
        assert_eq!(ctx.get("missing"), None);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_clones_share_storage() {
        let ctx = RunContext::new();
        let other = ctx.clone();
        other.set_str("k", "v");
        assert_eq!(ctx.get_str("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_typed_roundtrip() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Outline {
            title: String,
            sections: Vec<String>,
        }

        let ctx = RunContext::new();
        let outline = Outline {
            title: "Async Rust".into(),
            sections: vec!["intro".into(), "pinning".into()],
        };
        ctx.put("outline", &outline).unwrap();
        let back: Option<Outline> = ctx.get_as("outline").unwrap();
        assert_eq!(back, Some(outline));

        let missing: Option<Outline> = ctx.get_as("nope").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_get_as_wrong_shape_is_error() {
        let ctx = RunContext::new();
        ctx.set_str("n", "not a number");
        assert!(ctx.get_as::<u32>("n").is_err());
    }

    #[test]
    fn test_counter_increment() {
        let ctx = RunContext::new();
        assert_eq!(ctx.counter(keys::REFINE_ITERATIONS), 0);
        assert_eq!(ctx.increment(keys::REFINE_ITERATIONS), 1);
        assert_eq!(ctx.increment(keys::REFINE_ITERATIONS), 2);
        assert_eq!(ctx.counter(keys::REFINE_ITERATIONS), 2);
    }

    #[test]
    fn test_increment_over_non_numeric_value() {
        let ctx = RunContext::new();
        ctx.set_str("rounds", "three");
        assert_eq!(ctx.increment("rounds"), 1);
        assert_eq!(ctx.counter("rounds"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let ctx = RunContext::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    ctx.increment("hits");
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ctx.counter("hits"), 400);
    }

    #[test]
    fn test_merge_and_snapshot() {
        let a = RunContext::new();
        a.set_str("a", "1");
        a.set_str("b", "2");

        let b = RunContext::new();
        b.set_str("b", "overwritten");
        b.set_str("c", "3");

        a.merge(&b);
        let snap = a.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap["b"], serde_json::json!("overwritten"));

        let restored = RunContext::from_map(snap);
        assert_eq!(restored.get_str("c").as_deref(), Some("3"));
        assert_eq!(restored.remove("a"), Some(serde_json::json!("1")));
        assert!(!restored.contains("a"));
    }
}
