pub mod amqp;
pub mod clock;
pub mod json_reply;
pub mod security;

pub use amqp::{AmqpFlavor, AmqpTransport, AmqpTransportFactory};
pub use clock::SystemClock;
pub use json_reply::JsonReplyParser;
pub use security::{SoftwareTpm, StaticX509};
