use thiserror::Error;
use zeroize::Zeroizing;

/// Service-side registration status carried by a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Unassigned,
    Assigning,
    Assigned,
    Blacklisted,
    Error,
}

/// Reply payload could not be turned into a [`RegistrationReply`].
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("reply is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reply root is not a JSON object")]
    NotAnObject,
    #[error("reply is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("reply field `{0}` is not valid base64")]
    InvalidBase64(&'static str),
}

/// Normalized parse of a service reply.
///
/// Each variant carries exactly the fields its status requires, so a reply
/// can never be half populated: anything missing is a [`ReplyError`] at parse
/// time instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationReply {
    /// Device known, proof of possession still required.
    Unassigned {
        /// Decoded challenge/credential blob.
        auth_key: Zeroizing<Vec<u8>>,
        key_name: String,
        /// Some services already hand out the operation id here.
        operation_id: Option<String>,
    },
    /// Assignment running asynchronously; poll with the operation id.
    Assigning { operation_id: String },
    /// Device assigned to an endpoint.
    Assigned {
        /// Wrapped device key; present for hardware identities only.
        auth_key: Option<Zeroizing<Vec<u8>>>,
        assigned_endpoint: String,
        assigned_id: String,
    },
    /// Device refused by the service.
    Blacklisted,
    /// Registration failed or the status was absent/unrecognized.
    Error,
}

impl RegistrationReply {
    #[must_use]
    pub fn status(&self) -> ReplyStatus {
        match self {
            Self::Unassigned { .. } => ReplyStatus::Unassigned,
            Self::Assigning { .. } => ReplyStatus::Assigning,
            Self::Assigned { .. } => ReplyStatus::Assigned,
            Self::Blacklisted => ReplyStatus::Blacklisted,
            Self::Error => ReplyStatus::Error,
        }
    }

    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::Unassigned { operation_id, .. } => operation_id.as_deref(),
            Self::Assigning { operation_id } => Some(operation_id),
            _ => None,
        }
    }
}
