// Application Layer - Use Cases and Business Logic

pub mod producer;
pub mod retry;
pub mod worker;

// Re-exports
pub use producer::{Producer, ProducerMode, ProducerReport};
pub use retry::{BackoffPolicy, RetryDecision};
pub use worker::{
    shutdown_channel, DeliveryOutcome, PipelineContext, ShutdownSender, ShutdownToken,
    StatsSnapshot, Worker, WorkerPool, WorkerPoolHandle, WorkerStats,
};
