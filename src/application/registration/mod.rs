pub mod errors;
pub mod session;
pub mod session_types;

pub use errors::*;
pub use session::*;
pub use session_types::*;
