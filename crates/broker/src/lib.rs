pub mod amqp;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod topology;
mod traits;

pub use amqp::AmqpBroker;
pub use envelope::{Delivery, MessageEnvelope};
pub use error::{BrokerError, Result};
pub use memory::InMemoryBroker;
pub use topology::QueueSpec;
pub use traits::{Broker, ExchangeKind, ExchangeSpec, QueueArgs};
