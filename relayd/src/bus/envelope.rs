// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{Outcome, Topic};

/// Inbound message as it travels over the datagram bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Kept as a string so unknown topics can be reported instead of failing the parse.
    pub topic: String,

    /// Correlation id, echoed back in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Where to send the reply. Defaults to the sender's bound address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<PathBuf>,

    #[serde(with = "crate::serde_base64")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyStatus {
    Ok,
    Failed,
    BackendUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub relay: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub topic: Topic,

    pub status: ReplyStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, with = "crate::serde_base64")]
    pub stdout: Vec<u8>,

    #[serde(default, with = "crate::serde_base64")]
    pub stderr: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReplyEnvelope {
    pub fn from_outcome(relay: &str, id: Option<String>, topic: Topic, outcome: &Outcome) -> Self {
        let mut reply = Self {
            relay: relay.to_string(),
            id,
            topic,
            status: ReplyStatus::Ok,
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            reason: None,
        };
        match outcome {
            Outcome::Completed(output) => {
                reply.exit_code = Some(output.exit_code);
                reply.stdout = output.stdout.clone();
                reply.stderr = output.stderr.clone();
            }
            Outcome::Failed(reason) => {
                reply.status = ReplyStatus::Failed;
                reply.reason = Some(reason.clone());
            }
            Outcome::BackendUnavailable(reason) => {
                reply.status = ReplyStatus::BackendUnavailable;
                reply.reason = Some(reason.clone());
            }
        }
        reply
    }

    /// Stand-in for a reply of `size` bytes that did not fit in one datagram.
    /// The exit code survives so the requester still learns whether the run succeeded.
    pub fn too_large(self, size: usize) -> Self {
        Self {
            status: ReplyStatus::Failed,
            stdout: Vec::new(),
            stderr: Vec::new(),
            reason: Some(format!("reply of {size} bytes exceeds the bus message limit")),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExecOutput;

    #[test]
    fn inbound_envelope_decodes_base64_payload() {
        let envelope: InboundEnvelope = serde_json::from_str(
            r#"{"topic":"command","id":"42","reply_to":"/tmp/peer.sock","payload":"eyJhIjoxfQ=="}"#,
        )
        .unwrap();
        assert_eq!(envelope.topic, "command");
        assert_eq!(envelope.id.as_deref(), Some("42"));
        assert_eq!(envelope.reply_to, Some(PathBuf::from("/tmp/peer.sock")));
        assert_eq!(envelope.payload, br#"{"a":1}"#);
    }

    #[test]
    fn inbound_envelope_rejects_invalid_base64() {
        let parsed = serde_json::from_str::<InboundEnvelope>(r#"{"topic":"command","payload":"%%%"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn completed_reply_carries_output() {
        let outcome = Outcome::Completed(ExecOutput {
            exit_code: 3,
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
        });
        let reply = ReplyEnvelope::from_outcome("r1", Some("7".into()), Topic::Command, &outcome);
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["exit_code"], 3);
        assert_eq!(json["stdout"], "b3V0");
        assert_eq!(json["relay"], "r1");
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn unavailable_reply_carries_reason() {
        let outcome = Outcome::BackendUnavailable("engine down".into());
        let reply = ReplyEnvelope::from_outcome("r1", None, Topic::Execution, &outcome);
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "backend-unavailable");
        assert_eq!(json["topic"], "execution");
        assert_eq!(json["reason"], "engine down");
        assert!(json.get("exit_code").is_none());
    }

    #[test]
    fn too_large_reply_drops_output_but_keeps_exit_code() {
        let outcome = Outcome::Completed(ExecOutput {
            exit_code: 0,
            stdout: vec![b'x'; 1000],
            stderr: b"warn".to_vec(),
        });
        let reply = ReplyEnvelope::from_outcome("r1", Some("9".into()), Topic::Command, &outcome)
            .too_large(4321);
        assert_eq!(reply.status, ReplyStatus::Failed);
        assert_eq!(reply.exit_code, Some(0));
        assert_eq!(reply.id.as_deref(), Some("9"));
        assert!(reply.stdout.is_empty());
        assert!(reply.stderr.is_empty());
        assert!(reply.reason.unwrap().contains("4321 bytes"));
    }
}
