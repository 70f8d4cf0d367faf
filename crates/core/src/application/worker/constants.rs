// Pipeline constants (No magic values)
use std::time::Duration;

/// Sleep duration after a subscription error before polling again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default number of concurrent workers, each with its own channel
pub const DEFAULT_POOL_SIZE: usize = 2;

/// Unacked deliveries a single channel may hold (manual ack only)
pub const DEFAULT_PREFETCH: u16 = 8;

/// Reconnect attempts after the first failed broker connect
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;

/// Delay before the first reconnect attempt (500ms)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Time given to workers to drain in-flight deliveries on shutdown (10s)
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of AMQP consumer tags
pub const CONSUMER_TAG_PREFIX: &str = "imgpipe-worker";
