pub mod admin;
pub mod consumer;
pub mod processing;
pub mod producer;

pub use consumer::MessageConsumer;
pub use processing::{Disposition, MessageProcessor};
pub use producer::{DeliveryReceipt, MessageProducer};
