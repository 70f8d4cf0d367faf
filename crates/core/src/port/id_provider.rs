// ID Provider Port (consumer tags)

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of unique identifiers
pub trait IdProvider: Send + Sync {
    fn generate_id(&self) -> String;
}

/// UUID v4 provider
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic ids for tests: `prefix-1`, `prefix-2`, ...
pub struct SequentialIdProvider {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(1),
        }
    }
}

impl IdProvider for SequentialIdProvider {
    fn generate_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids_are_prefixed_and_increasing() {
        let ids = SequentialIdProvider::new("worker");
        assert_eq!(ids.generate_id(), "worker-1");
        assert_eq!(ids.generate_id(), "worker-2");
    }

    #[test]
    fn test_uuid_ids_are_unique() {
        let a = UuidProvider.generate_id();
        let b = UuidProvider.generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
