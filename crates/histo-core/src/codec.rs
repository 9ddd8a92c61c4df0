//! Command wire format.
//!
//! A frame is the command name followed by the command body:
//!
//! ```text
//! +-----------------+-----------+-----------------+-------------------+
//! | name len u16 BE | name utf8 | body len u32 BE | body (bincode)    |
//! +-----------------+-----------+-----------------+-------------------+
//! ```
//!
//! The body is the serde struct encoded field by field in declaration
//! order, so the base fields (`timeout`) precede the payload. There is no
//! version tag; changing a command's field list breaks compatibility.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::command::{Command, NamedCommand};
use crate::error::{Error, Result};

type Decoder = fn(&[u8]) -> Result<Box<dyn Command>>;

/// Encode a command body.
pub fn encode_body<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a command body.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode a complete frame.
pub fn encode_frame(cmd: &dyn Command) -> Result<Vec<u8>> {
    let name = cmd.name().as_bytes();
    let body = cmd.encode_body()?;

    let name_len = u16::try_from(name.len())
        .map_err(|_| Error::Codec(format!("command name too long: {}", cmd.name())))?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| Error::Codec(format!("command body too long: {}", cmd.name())))?;

    let mut frame = Vec::with_capacity(6 + name.len() + body.len());
    frame.extend_from_slice(&name_len.to_be_bytes());
    frame.extend_from_slice(name);
    frame.extend_from_slice(&body_len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Split a frame into command name and body.
pub fn split_frame(frame: &[u8]) -> Result<(&str, &[u8])> {
    let (name_len, rest) = take::<2>(frame)?;
    let name_len = u16::from_be_bytes(name_len) as usize;
    if rest.len() < name_len {
        return Err(Error::Codec("truncated command name".into()));
    }
    let (name, rest) = rest.split_at(name_len);
    let name = std::str::from_utf8(name)
        .map_err(|e| Error::Codec(format!("command name is not utf-8: {}", e)))?;

    let (body_len, rest) = take::<4>(rest)?;
    let body_len = u32::from_be_bytes(body_len) as usize;
    if rest.len() != body_len {
        return Err(Error::Codec(format!(
            "body length mismatch for {}: header {} actual {}",
            name,
            body_len,
            rest.len()
        )));
    }
    Ok((name, rest))
}

fn take<const N: usize>(bytes: &[u8]) -> Result<([u8; N], &[u8])> {
    if bytes.len() < N {
        return Err(Error::Codec("truncated frame header".into()));
    }
    let (head, rest) = bytes.split_at(N);
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok((out, rest))
}

fn decode_boxed<C: NamedCommand>(body: &[u8]) -> Result<Box<dyn Command>> {
    Ok(Box::new(decode_body::<C>(body)?))
}

/// Registry of command decoders keyed by command name.
#[derive(Default)]
pub struct CommandCodec {
    decoders: HashMap<&'static str, Decoder>,
}

impl CommandCodec {
    /// Create an empty codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command type for decoding.
    pub fn register<C: NamedCommand>(&mut self) -> Result<()> {
        if self.decoders.contains_key(C::NAME) {
            return Err(Error::AlreadyRegistered(C::NAME.to_string()));
        }
        self.decoders.insert(C::NAME, decode_boxed::<C>);
        Ok(())
    }

    /// Whether a command name can be decoded.
    pub fn is_registered(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Registered command names.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.decoders.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Encode a command into a frame.
    pub fn encode(&self, cmd: &dyn Command) -> Result<Vec<u8>> {
        encode_frame(cmd)
    }

    /// Decode a frame into a boxed command.
    pub fn decode(&self, frame: &[u8]) -> Result<Box<dyn Command>> {
        let (name, body) = split_frame(frame)?;
        let decoder = self
            .decoders
            .get(name)
            .ok_or_else(|| Error::UnsupportedCommand(name.to_string()))?;
        decoder(body)
    }

    /// Decode a frame that must hold a `C`.
    pub fn decode_as<C: NamedCommand>(frame: &[u8]) -> Result<C> {
        let (name, body) = split_frame(frame)?;
        if name != C::NAME {
            return Err(Error::Codec(format!(
                "expected {} but frame holds {}",
                C::NAME,
                name
            )));
        }
        decode_body(body)
    }
}

impl std::fmt::Debug for CommandCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCodec")
            .field("commands", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Timeout, downcast};
    use crate::impl_command;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct CmdMoveArm {
        timeout: Timeout,
        station: String,
        position: i32,
        slow: bool,
    }
    impl_command!(CmdMoveArm, "CmdMoveArm");

    fn sample() -> CmdMoveArm {
        CmdMoveArm {
            timeout: Timeout::from_millis(1500),
            station: "R1".to_string(),
            position: -42,
            slow: true,
        }
    }

    #[test]
    fn test_frame_roundtrip_through_registry() {
        let mut codec = CommandCodec::new();
        codec.register::<CmdMoveArm>().unwrap();

        let frame = codec.encode(&sample()).unwrap();
        let decoded = codec.decode(&frame).unwrap();
        assert_eq!(decoded.name(), "CmdMoveArm");
        assert_eq!(downcast::<CmdMoveArm>(decoded).unwrap(), sample());
    }

    #[test]
    fn test_decode_as() {
        let frame = encode_frame(&sample()).unwrap();
        let cmd = CommandCodec::decode_as::<CmdMoveArm>(&frame).unwrap();
        assert_eq!(cmd, sample());
    }

    #[test]
    fn test_timeout_precedes_payload() {
        let body = sample().encode_body().unwrap();
        assert_eq!(&body[..4], &1500u32.to_le_bytes());
    }

    #[test]
    fn test_unknown_command() {
        let codec = CommandCodec::new();
        let frame = encode_frame(&sample()).unwrap();
        let err = codec.decode(&frame).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCommand(name) if name == "CmdMoveArm"));
    }

    #[test]
    fn test_truncated_frame() {
        let frame = encode_frame(&sample()).unwrap();
        assert!(matches!(split_frame(&frame[..1]), Err(Error::Codec(_))));
        assert!(matches!(
            split_frame(&frame[..frame.len() - 1]),
            Err(Error::Codec(_))
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut codec = CommandCodec::new();
        codec.register::<CmdMoveArm>().unwrap();
        assert!(matches!(
            codec.register::<CmdMoveArm>(),
            Err(Error::AlreadyRegistered(_))
        ));
        assert_eq!(codec.names(), vec!["CmdMoveArm"]);
    }
}
