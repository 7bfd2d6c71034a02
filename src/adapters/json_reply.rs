//! JSON reply parser for the provisioning service.
//!
//! Consumed fields:
//! - `status`: `unassigned | assigning | assigned | failed | blacklisted`
//!   (absent or anything else is treated as an error status)
//! - `authenticationKey`, `keyName`, `operationId` (top level)
//! - `registrationStatus.{assignedHub, deviceId, tpm.authenticationKey}`

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use tracing::warn;
use zeroize::Zeroizing;

use crate::domain::identity::IdentityKind;
use crate::domain::reply::{RegistrationReply, ReplyError};
use crate::ports::reply::ReplyParser;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReply {
    status: Option<String>,
    authentication_key: Option<String>,
    key_name: Option<String>,
    operation_id: Option<String>,
    registration_status: Option<WireRegistrationStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRegistrationStatus {
    assigned_hub: Option<String>,
    device_id: Option<String>,
    tpm: Option<WireTpm>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTpm {
    authentication_key: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ReplyError> {
    value.filter(|v| !v.is_empty()).ok_or(ReplyError::MissingField(field))
}

fn decode_key(value: Option<String>, field: &'static str) -> Result<Zeroizing<Vec<u8>>, ReplyError> {
    let encoded = Zeroizing::new(required(value, field)?);
    let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|_| ReplyError::InvalidBase64(field))?;
    if bytes.is_empty() {
        return Err(ReplyError::MissingField(field));
    }
    Ok(Zeroizing::new(bytes))
}

/// `serde_json` backed [`ReplyParser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReplyParser;

impl ReplyParser for JsonReplyParser {
    fn parse(&self, payload: &str, kind: IdentityKind) -> Result<RegistrationReply, ReplyError> {
        let root: serde_json::Value = serde_json::from_str(payload)?;
        if !root.is_object() {
            return Err(ReplyError::NotAnObject);
        }
        let wire: WireReply = serde_json::from_value(root)?;

        let reply = match wire.status.as_deref() {
            Some("unassigned") => RegistrationReply::Unassigned {
                auth_key: decode_key(wire.authentication_key, "authenticationKey")?,
                key_name: required(wire.key_name, "keyName")?,
                operation_id: wire.operation_id.filter(|id| !id.is_empty()),
            },
            Some("assigning") => RegistrationReply::Assigning {
                operation_id: required(wire.operation_id, "operationId")?,
            },
            Some("assigned") => {
                let status = wire
                    .registration_status
                    .ok_or(ReplyError::MissingField("registrationStatus"))?;
                let auth_key = if kind.is_hardware() {
                    let tpm = status.tpm.ok_or(ReplyError::MissingField("registrationStatus.tpm"))?;
                    Some(decode_key(tpm.authentication_key, "registrationStatus.tpm.authenticationKey")?)
                } else {
                    None
                };
                RegistrationReply::Assigned {
                    auth_key,
                    assigned_endpoint: required(status.assigned_hub, "registrationStatus.assignedHub")?,
                    assigned_id: required(status.device_id, "registrationStatus.deviceId")?,
                }
            }
            Some("blacklisted") => RegistrationReply::Blacklisted,
            Some("failed") => RegistrationReply::Error,
            other => {
                warn!(status = ?other, "reply carries no recognised status");
                RegistrationReply::Error
            }
        };
        Ok(reply)
    }
}
