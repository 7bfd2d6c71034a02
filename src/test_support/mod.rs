//! Doubles and fixtures for exercising the crate without a provisioning
//! service: a hand-driven clock, a scripted AMQP connection, a scripted
//! transport and JSON reply builders.
//!
//! Compiled for unit tests and behind the `test-support` feature, which the
//! integration tests enable.

pub mod amqp;
pub mod clock;
pub mod events;
pub mod support;
pub mod transport;

pub use amqp::{RecordedConnect, ScriptState, ScriptedAmqp, ScriptedConnector, Step};
pub use clock::ManualClock;
pub use events::RecordingEvents;
pub use support::*;
pub use transport::{TransportAction, TransportLog, TransportScript};
