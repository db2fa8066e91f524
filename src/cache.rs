use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use dashmap::DashMap;

use crate::value::Value;

/// A key-value store usable as an expression cache backend.
///
/// Implementations must tolerate concurrent reads and writes through `&self`.
pub trait Cache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn put(&self, key: K, value: V);
    fn remove(&self, key: &K) -> Option<V>;
    fn clear(&self);
    fn contains_key(&self, key: &K) -> bool;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded in-memory cache on a sharded concurrent map.
pub struct InMemoryCache<K, V> {
    entries: DashMap<K, V>,
}

impl<K: Eq + Hash, V> Default for InMemoryCache<K, V> {
    fn default() -> Self {
        InMemoryCache {
            entries: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> InMemoryCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V> Cache<K, V> for InMemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Evaluation cache key: expression text plus the state of its variables.
///
/// Names are sorted before hashing, so two maps with equal contents always
/// produce equal keys regardless of iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpressionCacheKey {
    pub expression: String,
    pub variable_state_hash: u64,
    pub relevant_variables: Vec<String>,
}

impl ExpressionCacheKey {
    /// # Examples
    ///
    /// ```
    /// use expr_engine::{ExpressionCacheKey, Value};
    ///
    /// let a = [("x", Value::Integer(10)), ("y", Value::Integer(20))];
    /// let b = [("y", Value::Integer(20)), ("x", Value::Integer(10))];
    /// assert_eq!(
    ///     ExpressionCacheKey::new("x + y", a.iter().map(|(k, v)| (*k, v))),
    ///     ExpressionCacheKey::new("x + y", b.iter().map(|(k, v)| (*k, v))),
    /// );
    /// ```
    pub fn new<'a, S>(expression: &str, variables: impl IntoIterator<Item = (S, &'a Value)>) -> Self
    where
        S: AsRef<str>,
    {
        let mut entries: Vec<(String, &Value)> = variables
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v))
            .collect();

        if entries.is_empty() {
            return ExpressionCacheKey {
                expression: expression.to_string(),
                variable_state_hash: 0,
                relevant_variables: Vec::new(),
            };
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = DefaultHasher::new();
        for (name, value) in &entries {
            name.hash(&mut hasher);
            value.hash(&mut hasher);
        }

        ExpressionCacheKey {
            expression: expression.to_string(),
            variable_state_hash: hasher.finish(),
            relevant_variables: entries.into_iter().map(|(name, _)| name).collect(),
        }
    }
}

/// Typed facade over a pluggable cache backend.
pub struct ExpressionCache<K, V> {
    backend: Box<dyn Cache<K, V>>,
}

impl<K, V> Default for ExpressionCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        ExpressionCache::new(InMemoryCache::new())
    }
}

impl<K, V> ExpressionCache<K, V> {
    pub fn new(backend: impl Cache<K, V> + 'static) -> Self {
        ExpressionCache {
            backend: Box::new(backend),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.backend.get(key)
    }

    pub fn put(&self, key: K, value: V) {
        self.backend.put(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.backend.remove(key)
    }

    pub fn clear(&self) {
        self.backend.clear();
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.backend.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }
}
