//! AMQP integration for the rating ladder service
//!
//! Match reports arrive on a durable queue; recorded and rejected matches
//! are announced on a topic exchange.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{process_delivery, MatchReportConsumer, MessageHandler, Settlement};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, MockEventPublisher, PublisherConfig};
