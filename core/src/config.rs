//! Dispatcher configuration.
//!
//! # Design
//! The identification header travels in the configuration instead of living
//! in a process-wide default, so two dispatchers in one process can present
//! different identities. Every field has a default and a partial JSON
//! document is enough to load a config.

use serde::{Deserialize, Serialize};

/// `User-Agent` sent when the configuration does not name one.
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Value injected as `User-Agent` into every dispatched request.
    pub user_agent: String,
    /// Worker threads running `submit` and `dispatch_async` jobs.
    pub workers: usize,
    /// Jobs that may wait for a worker before submitting blocks.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            workers: 4,
            queue_capacity: 64,
        }
    }
}

impl DispatcherConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DispatcherConfig::default();
        assert!(config.user_agent.starts_with("courier/"));
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = DispatcherConfig::from_json(r#"{"user_agent":"TgHttpLib4Go"}"#).unwrap();
        assert_eq!(config.user_agent, "TgHttpLib4Go");
        assert_eq!(config.workers, DispatcherConfig::default().workers);
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(DispatcherConfig::from_json(r#"{"workers":"many"}"#).is_err());
    }

    #[test]
    fn roundtrips_through_json() {
        let config = DispatcherConfig::default().with_workers(2).with_queue_capacity(8);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(DispatcherConfig::from_json(&json).unwrap(), config);
    }
}
