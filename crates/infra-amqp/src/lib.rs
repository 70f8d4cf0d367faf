// imgpipe Infrastructure - AMQP Adapter (lapin)
// Implements: QueueConnection, QueueChannel, Subscription, DeliveryAcker

mod channel;
mod config;
mod connection;
mod error;

pub use channel::AmqpChannel;
pub use config::AmqpConfig;
pub use connection::AmqpConnection;
