//! Producer configuration.

use serde::{Deserialize, Serialize};

use crate::Thread;

/// Records a link's tick ring holds before the producer reports overflow.
pub const DEFAULT_RING_CAPACITY: u32 = 10_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceConfig {
    /// Thread that owns the authoritative registry.
    pub producer: Thread,
    /// Minimum capacity of each consumer link's tick ring.
    pub ring_capacity: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            producer: Thread::Game,
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl ResourceConfig {
    pub fn with_producer(mut self, producer: Thread) -> Self {
        self.producer = producer;
        self
    }

    pub fn with_ring_capacity(mut self, ring_capacity: u32) -> Self {
        self.ring_capacity = ring_capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = ResourceConfig::default()
            .with_producer(Thread::Main)
            .with_ring_capacity(256);
        let json = serde_json::to_string(&config).expect("serialize");
        assert_eq!(json, r#"{"producer":"main","ringCapacity":256}"#);
        let back: ResourceConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let partial: ResourceConfig =
            serde_json::from_str(r#"{"ringCapacity": 64}"#).expect("partial");
        assert_eq!(partial, ResourceConfig::default().with_ring_capacity(64));
        assert_eq!(partial.producer, Thread::Game);

        let empty: ResourceConfig = serde_json::from_str("{}").expect("empty");
        assert_eq!(empty, ResourceConfig::default());
        assert!(serde_json::from_str::<ResourceConfig>(r#"{"producer": "audio"}"#).is_err());
    }
}
