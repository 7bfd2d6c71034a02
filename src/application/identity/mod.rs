pub mod errors;
pub mod provider;

pub use errors::*;
pub use provider::*;
