// Time Provider Port (stamps `processed_at` on result records)

/// Clock used when recording results
pub trait TimeProvider: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;
}

/// Wall clock
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Frozen clock for tests
pub struct FixedTimeProvider(pub i64);

impl TimeProvider for FixedTimeProvider {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemTimeProvider.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_fixed_clock_never_moves() {
        let clock = FixedTimeProvider(42);
        assert_eq!(clock.now_millis(), 42);
        assert_eq!(clock.now_millis(), 42);
    }
}
