// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod message_queue;
pub mod result_sink;
pub mod time_provider;
pub mod transcoder;
pub mod work_source;

// Re-exports
pub use id_provider::IdProvider;
pub use message_queue::{
    AckMode, ConsumeOptions, Delivery, DeliveryAcker, OutgoingMessage, QueueChannel,
    QueueConnection, Subscription,
};
pub use result_sink::ResultSink;
pub use time_provider::TimeProvider;
pub use transcoder::{ImageTranscoder, TranscodeError};
pub use work_source::{ResultLedger, WorkFilter, WorkSource};
