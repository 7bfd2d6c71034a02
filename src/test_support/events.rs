use crate::adapters::json_reply::JsonReplyParser;
use crate::domain::identity::IdentityKind;
use crate::domain::reply::{RegistrationReply, ReplyError};
use crate::ports::reply::ReplyParser;
use crate::ports::transport::{TransportEvents, TransportReply, TransportStatus};

/// [`TransportEvents`] sink that records everything and answers challenges
/// with a fixed token.
#[derive(Debug)]
pub struct RecordingEvents {
    pub kind: IdentityKind,
    pub statuses: Vec<TransportStatus>,
    pub replies: Vec<TransportReply>,
    pub challenges: Vec<(Vec<u8>, String)>,
    pub challenge_answer: Option<String>,
}

impl RecordingEvents {
    #[must_use]
    pub fn new(kind: IdentityKind) -> Self {
        Self {
            kind,
            statuses: Vec::new(),
            replies: Vec::new(),
            challenges: Vec::new(),
            challenge_answer: Some("SharedAccessSignature sr=scope&sig=abc&se=1&skn=".into()),
        }
    }
}

impl TransportEvents for RecordingEvents {
    fn on_status(&mut self, status: TransportStatus) {
        self.statuses.push(status);
    }

    fn on_reply(&mut self, reply: TransportReply) {
        self.replies.push(reply);
    }

    fn on_challenge(&mut self, nonce: &[u8], key_name: &str) -> Option<String> {
        self.challenges.push((nonce.to_vec(), key_name.to_string()));
        self.challenge_answer.clone()
    }

    fn parse_reply(&mut self, payload: &str) -> Result<RegistrationReply, ReplyError> {
        JsonReplyParser.parse(payload, self.kind)
    }
}
