pub mod amqp;
pub mod clock;
pub mod reply;
pub mod security;
pub mod transport;

pub use amqp::*;
pub use clock::Clock;
pub use reply::ReplyParser;
pub use security::{DeviceError, TpmDevice, X509Device};
pub use transport::*;
