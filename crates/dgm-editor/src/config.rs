//! Editor configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`) is a
//! valid configuration.

use dgm_core::routing::RouterConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Undo steps kept per diagram; older entries are trimmed.
    pub history_depth: usize,
    /// Quiet period before a continuous local edit is persisted.
    pub debounce_ms: u64,
    pub router: RouterConfig,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            history_depth: 100,
            debounce_ms: 300,
            router: RouterConfig::default(),
        }
    }
}

impl EditorConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = EditorConfig::from_json(r#"{ "debounce_ms": 50, "router": { "margin": 4 } }"#)
            .unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.history_depth, 100);
        assert_eq!(config.router.margin, 4.0);
        assert_eq!(config.router.bend_penalty, 40.0);
        assert_eq!(config.router.max_expansions, 20_000);
        assert_eq!(config.debounce(), Duration::from_millis(50));
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(EditorConfig::from_json("{}").unwrap(), EditorConfig::default());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(EditorConfig::from_json("{ history_depth: }").is_err());
    }
}
