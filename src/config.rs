use std::{collections::HashSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Runtime limits and name filters for an engine.
///
/// Loadable from JSON; missing fields keep their defaults.
///
/// # Examples
///
/// ```
/// use expr_engine::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{ "max_recursion_depth": 20, "function_blacklist": ["exec"] }"#).unwrap();
/// assert_eq!(config.max_recursion_depth, 20);
/// assert!(config.strict_mode);
/// assert!(!config.is_function_allowed("exec"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Undefined variables and functions are errors rather than `undefined_value`.
    pub strict_mode: bool,
    /// Nesting limit during evaluation, capped at `MAX_EVALUATION_DEPTH`.
    pub max_recursion_depth: usize,
    /// Wall-clock limit per top-level evaluation, `0` disables it.
    pub evaluation_timeout_ms: u64,
    /// Node visits between deadline checks.
    pub timeout_check_interval: u64,
    /// Enables the logger hook and per-node trace events.
    pub debug_mode: bool,
    pub variable_whitelist: HashSet<String>,
    pub variable_blacklist: HashSet<String>,
    pub function_whitelist: HashSet<String>,
    pub function_blacklist: HashSet<String>,
    /// Substituted for undefined names outside strict mode.
    pub undefined_value: Value,
    pub cache_evaluations: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            strict_mode: true,
            max_recursion_depth: 100,
            evaluation_timeout_ms: 0,
            timeout_check_interval: 64,
            debug_mode: false,
            variable_whitelist: HashSet::new(),
            variable_blacklist: HashSet::new(),
            function_whitelist: HashSet::new(),
            function_blacklist: HashSet::new(),
            undefined_value: Value::Null,
            cache_evaluations: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Blacklisted names are always denied; a non-empty whitelist denies everything else.
    pub fn is_variable_allowed(&self, name: &str) -> bool {
        allowed(name, &self.variable_whitelist, &self.variable_blacklist)
    }

    pub fn is_function_allowed(&self, name: &str) -> bool {
        allowed(name, &self.function_whitelist, &self.function_blacklist)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.evaluation_timeout_ms > 0).then(|| Duration::from_millis(self.evaluation_timeout_ms))
    }
}

fn allowed(name: &str, whitelist: &HashSet<String>, blacklist: &HashSet<String>) -> bool {
    if blacklist.contains(name) {
        return false;
    }
    whitelist.is_empty() || whitelist.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_wins_over_whitelist() {
        let mut config = EngineConfig::default();
        config.variable_whitelist.insert("x".into());
        config.variable_blacklist.insert("x".into());
        assert!(!config.is_variable_allowed("x"));
        assert!(!config.is_variable_allowed("y"));
    }

    #[test]
    fn empty_whitelist_allows_all() {
        let config = EngineConfig::default();
        assert!(config.is_function_allowed("anything"));
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn json_round_trip_keeps_values() {
        let mut config = EngineConfig::default();
        config.evaluation_timeout_ms = 250;
        config.undefined_value = Value::Integer(0);
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }
}
