//! Commands exchanged by the event handler.

use histo_core::{CommandCodec, EventKey, Result, SystemEvent, Timeout, impl_command};
use serde::{Deserialize, Serialize};

use crate::config::{ButtonType, ErrorType};

/// A raised event, delivered to the event handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifySystemEvent {
    pub timeout: Timeout,
    pub event: SystemEvent,
}
impl_command!(NotifySystemEvent, "NotifySystemEvent", notification);

impl NotifySystemEvent {
    pub fn new(event: SystemEvent) -> Self {
        Self {
            timeout: Timeout::NONE,
            event,
        }
    }
}

/// Perform the action of an ACT step.
///
/// `Ok` continues with the step's success target, `Nok` with its failure
/// target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdEventAction {
    pub timeout: Timeout,
    pub key: EventKey,
    pub event_id: u32,
    pub step: u32,
    /// Component that raised the event
    pub source: String,
    pub action: String,
}
impl_command!(CmdEventAction, "CmdEventAction");

/// Prompt the operator for a MSG step.
///
/// Acknowledged with the operator's choice: `Ok` for OK, Yes or Retry,
/// `Nok` for Cancel or No.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdShowEventMessage {
    pub timeout: Timeout,
    pub key: EventKey,
    pub event_id: u32,
    pub text: String,
    pub buttons: ButtonType,
}
impl_command!(CmdShowEventMessage, "CmdShowEventMessage");

/// Event notice for the GUI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyEventInfo {
    pub timeout: Timeout,
    pub key: EventKey,
    pub event_id: u32,
    pub error_type: ErrorType,
    pub text: String,
}
impl_command!(NotifyEventInfo, "NotifyEventInfo", notification);

/// Register the commands the event handler sends to other processes.
pub fn register_codec(codec: &mut CommandCodec) -> Result<()> {
    codec.register::<CmdEventAction>()?;
    codec.register::<CmdShowEventMessage>()?;
    codec.register::<NotifyEventInfo>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use histo_core::ActionResult;

    #[test]
    fn test_message_round_trip() {
        let mut codec = CommandCodec::new();
        register_codec(&mut codec).unwrap();

        let cmd = CmdShowEventMessage {
            timeout: Timeout(60_000),
            key: EventKey(9),
            event_id: 0x0001_0008,
            text: "rack A7; retry?".into(),
            buttons: ButtonType::RetryCancel,
        };
        let frame = codec.encode(&cmd).unwrap();
        let decoded = CommandCodec::decode_as::<CmdShowEventMessage>(&frame).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_event_action_round_trip() {
        let mut codec = CommandCodec::new();
        register_codec(&mut codec).unwrap();

        let cmd = CmdEventAction {
            timeout: Timeout(30_000),
            key: EventKey(42),
            event_id: 0x0002_0101,
            step: 3,
            source: "DeviceControl".into(),
            action: "ReleaseRack".into(),
        };
        let frame = codec.encode(&cmd).unwrap();
        let decoded = CommandCodec::decode_as::<CmdEventAction>(&frame).unwrap();
        assert_eq!(decoded.timeout, Timeout(30_000));
        assert_eq!(decoded.key, EventKey(42));
        assert_eq!(decoded.event_id, 0x0002_0101);
        assert_eq!(decoded.step, 3);
        assert_eq!(decoded.source, "DeviceControl");
        assert_eq!(decoded.action, "ReleaseRack");
    }

    #[test]
    fn test_event_info_round_trip() {
        let mut codec = CommandCodec::new();
        register_codec(&mut codec).unwrap();

        let cmd = NotifyEventInfo {
            timeout: Timeout::NONE,
            key: EventKey(7),
            event_id: 0x0001_0008,
            error_type: ErrorType::Fatal,
            text: "oven temperature out of range".into(),
        };
        let frame = codec.encode(&cmd).unwrap();
        let decoded = codec.decode(&frame).unwrap();
        assert!(decoded.is_notification());
        let decoded = histo_core::command::downcast::<NotifyEventInfo>(decoded).unwrap();
        assert_eq!(decoded.key, EventKey(7));
        assert_eq!(decoded.event_id, 0x0001_0008);
        assert_eq!(decoded.error_type, ErrorType::Fatal);
        assert_eq!(decoded.text, "oven temperature out of range");
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_system_event_survives_encoding() {
        let cmd = NotifySystemEvent::new(
            SystemEvent::new(7)
                .with_key(EventKey(2))
                .with_result(ActionResult::Fail),
        );
        let mut codec = CommandCodec::new();
        codec.register::<NotifySystemEvent>().unwrap();
        let frame = codec.encode(&cmd).unwrap();
        assert_eq!(CommandCodec::decode_as::<NotifySystemEvent>(&frame).unwrap(), cmd);
    }
}
