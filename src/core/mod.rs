//! Protocol-independent building blocks.
pub mod codec;
