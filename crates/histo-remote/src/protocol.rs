//! Network message protocol.
//!
//! Messages travel as one JSON object per line. Application commands are
//! carried inside `Message` frames as the hex encoded command wire frame, so
//! the peer decodes them with the same [`CommandCodec`] registry as an
//! in-process channel would.
//!
//! Handshake:
//!
//! ```text
//!   server                         client
//!     |-- Authentication{challenge} -->|
//!     |<-- Login{name, digest} --------|
//!     |-- Welcome -------------------->|   (or Refused{reason})
//!     |<======= HeartBeat / Message / Ack =======>|
//! ```

use hmac::{Hmac, Mac};
use histo_core::{Acknowledge, Command, CommandCodec, Reference};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{RemoteError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A message exchanged with a network peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NetMessage {
    /// Login challenge sent by the server on accept.
    Authentication { challenge: String },
    /// Client answer to the challenge.
    Login { name: String, digest: String },
    /// Login accepted.
    Welcome,
    /// Login rejected.
    Refused { reason: String },
    /// Liveness message, numbered per sender.
    HeartBeat { nr: u64 },
    /// Forwarded application command.
    Message {
        name: String,
        reference: u32,
        body: String,
    },
    /// Acknowledge of a forwarded command.
    Ack { reference: u32, ack: Acknowledge },
}

impl NetMessage {
    /// Message type name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            NetMessage::Authentication { .. } => "Authentication",
            NetMessage::Login { .. } => "Login",
            NetMessage::Welcome => "Welcome",
            NetMessage::Refused { .. } => "Refused",
            NetMessage::HeartBeat { .. } => "HeartBeat",
            NetMessage::Message { .. } => "Message",
            NetMessage::Ack { .. } => "Ack",
        }
    }

    /// Whether the message belongs to the application layer.
    pub fn is_application(&self) -> bool {
        matches!(self, NetMessage::Message { .. } | NetMessage::Ack { .. })
    }

    /// Wrap a command for forwarding.
    pub fn command(reference: Reference, cmd: &dyn Command, codec: &CommandCodec) -> Result<Self> {
        let frame = codec.encode(cmd)?;
        Ok(NetMessage::Message {
            name: cmd.name().to_string(),
            reference: reference.0,
            body: hex::encode(frame),
        })
    }

    /// Unwrap a forwarded command.
    pub fn decode_command(&self, codec: &CommandCodec) -> Result<(Reference, Box<dyn Command>)> {
        let NetMessage::Message {
            name,
            reference,
            body,
        } = self
        else {
            return Err(RemoteError::Protocol(format!("{} is not a command", self.kind())));
        };
        let frame = hex::decode(body)
            .map_err(|e| RemoteError::Frame(format!("{}: {}", name, e)))?;
        let cmd = codec.decode(&frame)?;
        if cmd.name() != name {
            return Err(RemoteError::Frame(format!(
                "frame carries {} but message names {}",
                cmd.name(),
                name
            )));
        }
        Ok((Reference(*reference), cmd))
    }

    /// Serialize as one line, without the terminator.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one line.
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Serde adapter storing a [`NetMessage`] as its JSON line.
///
/// The tagged message layout only works with self-describing formats;
/// command bodies are bincode, so messages embedded in commands travel as
/// a string.
pub mod as_line {
    use serde::{Deserialize, Deserializer, Serializer, de};

    use super::NetMessage;

    pub fn serialize<S: Serializer>(msg: &NetMessage, serializer: S) -> Result<S::Ok, S::Error> {
        let line = msg.to_line().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&line)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NetMessage, D::Error> {
        let line = String::deserialize(deserializer)?;
        NetMessage::from_line(&line).map_err(de::Error::custom)
    }
}

/// Login digest: HMAC-SHA256 keyed by the shared secret over
/// `challenge || name`, hex encoded.
pub fn login_digest(secret: &str, challenge: &str, name: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(challenge.as_bytes());
    mac.update(name.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check a login digest in constant time.
pub fn verify_login(secret: &str, challenge: &str, name: &str, digest: &str) -> bool {
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(challenge.as_bytes());
    mac.update(name.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Fresh login challenge.
pub fn new_challenge() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use histo_core::{Timeout, impl_command};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct CmdRemoteStatus {
        timeout: Timeout,
        detail: bool,
    }
    impl_command!(CmdRemoteStatus, "CmdRemoteStatus");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct CmdOther {
        timeout: Timeout,
    }
    impl_command!(CmdOther, "CmdOther");

    #[test]
    fn test_line_format() {
        let line = NetMessage::HeartBeat { nr: 7 }.to_line().unwrap();
        assert_eq!(line, r#"{"type":"HeartBeat","nr":7}"#);
        assert_eq!(NetMessage::from_line(&line).unwrap(), NetMessage::HeartBeat { nr: 7 });
        assert_eq!(
            NetMessage::from_line("{\"type\":\"Welcome\"}\r\n").unwrap(),
            NetMessage::Welcome
        );
    }

    #[test]
    fn test_malformed_line() {
        assert!(matches!(
            NetMessage::from_line("{\"type\":\"Bogus\"}"),
            Err(RemoteError::Json(_))
        ));
        assert!(NetMessage::from_line("not json").is_err());
    }

    #[test]
    fn test_command_wrapping() {
        let mut codec = CommandCodec::new();
        codec.register::<CmdRemoteStatus>().unwrap();

        let cmd = CmdRemoteStatus {
            timeout: Timeout(1000),
            detail: true,
        };
        let msg = NetMessage::command(Reference(9), &cmd, &codec).unwrap();
        assert!(msg.is_application());

        let line = msg.to_line().unwrap();
        let (reference, decoded) = NetMessage::from_line(&line)
            .unwrap()
            .decode_command(&codec)
            .unwrap();
        assert_eq!(reference, Reference(9));
        let decoded = histo_core::command::downcast::<CmdRemoteStatus>(decoded).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_unregistered_command_is_rejected() {
        let mut codec = CommandCodec::new();
        codec.register::<CmdRemoteStatus>().unwrap();
        let mut sender = CommandCodec::new();
        sender.register::<CmdOther>().unwrap();

        let msg = NetMessage::command(Reference(1), &CmdOther { timeout: Timeout::NONE }, &sender)
            .unwrap();
        assert!(msg.decode_command(&codec).is_err());
        assert!(NetMessage::Welcome.decode_command(&codec).is_err());
    }

    #[test]
    fn test_corrupt_body() {
        let codec = CommandCodec::new();
        let msg = NetMessage::Message {
            name: "CmdRemoteStatus".into(),
            reference: 1,
            body: "zz".into(),
        };
        assert!(matches!(msg.decode_command(&codec), Err(RemoteError::Frame(_))));
    }

    #[test]
    fn test_login_digest() {
        let challenge = new_challenge();
        let digest = login_digest("secret", &challenge, "Himalaya");
        assert_eq!(digest.len(), 64);
        assert!(verify_login("secret", &challenge, "Himalaya", &digest));
        assert!(!verify_login("other", &challenge, "Himalaya", &digest));
        assert!(!verify_login("secret", &challenge, "Intruder", &digest));
        assert!(!verify_login("secret", &challenge, "Himalaya", "not hex"));
        assert_ne!(new_challenge(), challenge);
    }
}
