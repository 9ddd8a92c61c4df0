//! Console stand-in for the GUI process.
//!
//! Prints event prompts and information and answers every prompt with its
//! default button, so event sequences run to completion without a display.

use histo_commands::{ControllerContext, ThreadController, ThreadHandler};
use histo_core::{Acknowledge, AdjustedTime, Reference, Result, Timeout};
use histo_events::{CmdEventAction, CmdShowEventMessage, ErrorType, NotifyEventInfo};
use histo_remote::{CmdRemoteCareEvent, CmdRemoteCareStatus};

/// Controller name.
pub const CONSOLE: &str = "Console";

const REMOTE_EVENT_TIMEOUT: Timeout = Timeout(10_000);

pub struct Console {
    serial_number: String,
    operating_mode: String,
    clock: AdjustedTime,
    forward_to_remote: bool,
    prompts: u64,
}

impl Console {
    pub fn new(
        serial_number: impl Into<String>,
        operating_mode: impl Into<String>,
        clock: AdjustedTime,
    ) -> Self {
        Self {
            serial_number: serial_number.into(),
            operating_mode: operating_mode.into(),
            clock,
            forward_to_remote: false,
            prompts: 0,
        }
    }

    /// Report errors to the remote-care service as well.
    pub fn with_remote_care(mut self, enabled: bool) -> Self {
        self.forward_to_remote = enabled;
        self
    }

    pub fn register(controller: &mut ThreadController<Self>) -> Result<()> {
        controller.register_command_for_processing(Self::on_show_message)?;
        controller.register_command_for_processing(Self::on_event_action)?;
        controller.register_command_for_processing(Self::on_event_info)?;
        controller.register_command_for_processing(Self::on_status)?;
        Ok(())
    }

    fn status_text(&self) -> String {
        format!(
            "serial={} mode={} prompts={} time={}",
            self.serial_number,
            self.operating_mode,
            self.prompts,
            self.clock.now().format("%Y-%m-%dT%H:%M:%SZ")
        )
    }

    fn on_show_message(
        &mut self,
        ctx: &mut ControllerContext,
        reference: Reference,
        cmd: CmdShowEventMessage,
    ) -> Result<()> {
        self.prompts += 1;
        println!("[0x{:08X}] {} ({:?})", cmd.event_id, cmd.text, cmd.buttons);
        ctx.send_ack(reference, Acknowledge::ok())
    }

    fn on_event_action(
        &mut self,
        ctx: &mut ControllerContext,
        reference: Reference,
        cmd: CmdEventAction,
    ) -> Result<()> {
        tracing::info!(
            event_id = cmd.event_id,
            step = cmd.step,
            source = %cmd.source,
            action = %cmd.action,
            "Event action"
        );
        ctx.send_ack(reference, Acknowledge::ok())
    }

    fn on_event_info(
        &mut self,
        ctx: &mut ControllerContext,
        _reference: Reference,
        cmd: NotifyEventInfo,
    ) -> Result<()> {
        println!("{} 0x{:08X}: {}", cmd.error_type.as_str(), cmd.event_id, cmd.text);
        if self.forward_to_remote && matches!(cmd.error_type, ErrorType::Error | ErrorType::Fatal)
        {
            ctx.send(CmdRemoteCareEvent {
                timeout: REMOTE_EVENT_TIMEOUT,
                event_id: cmd.event_id,
                active: true,
                text: cmd.text,
            })?;
        }
        Ok(())
    }

    fn on_status(
        &mut self,
        ctx: &mut ControllerContext,
        reference: Reference,
        _cmd: CmdRemoteCareStatus,
    ) -> Result<()> {
        ctx.send_ack(reference, Acknowledge::ok_with(self.status_text()))
    }
}

impl ThreadHandler for Console {
    fn on_go(&mut self, _ctx: &mut ControllerContext) {
        tracing::info!(remote_care = self.forward_to_remote, "Console ready");
    }

    fn on_acknowledge(
        &mut self,
        _ctx: &mut ControllerContext,
        reference: Reference,
        command: &'static str,
        ack: Acknowledge,
    ) {
        if !ack.is_ok() {
            tracing::warn!(command, reference = %reference, text = ?ack.text, "Refused");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        let mut console = Console::new("SN-0001", "service", AdjustedTime::new());
        console.prompts = 2;
        let text = console.status_text();
        assert!(text.starts_with("serial=SN-0001 mode=service prompts=2 time="));
        assert!(text.ends_with('Z'));
    }
}
