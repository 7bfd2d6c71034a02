use crate::domain::identity::IdentityKind;
use crate::domain::reply::{RegistrationReply, ReplyError};

/// Turns a raw service reply into a [`RegistrationReply`].
///
/// The identity kind decides which fields an `assigned` reply must carry
/// (hardware identities also receive a wrapped device key).
pub trait ReplyParser {
    /// # Errors
    /// Returns [`ReplyError`] if the payload is malformed or a field required
    /// by its status is missing.
    fn parse(&self, payload: &str, kind: IdentityKind) -> Result<RegistrationReply, ReplyError>;
}
