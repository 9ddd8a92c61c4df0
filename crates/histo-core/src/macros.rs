//! Common macros for HistoCore command types.
//!
//! Concrete commands are plain serde structs. These macros generate the
//! boilerplate trait implementations so a command definition stays a
//! single struct declaration.

/// Implement [`Command`](crate::command::Command) and
/// [`NamedCommand`](crate::command::NamedCommand) for a serde struct.
///
/// The struct must have a `timeout: Timeout` field, declared first so the
/// base fields precede the payload on the wire. Append `notification` for
/// fire-and-forget commands that must not carry a timeout.
///
/// # Example
///
/// ```rust
/// use histo_core::command::{Command, Timeout};
/// use histo_core::impl_command;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct CmdOpenLid {
///     pub timeout: Timeout,
///     pub force: bool,
/// }
///
/// impl_command!(CmdOpenLid, "CmdOpenLid");
///
/// let cmd = CmdOpenLid { timeout: Timeout::from_millis(2000), force: false };
/// assert_eq!(cmd.name(), "CmdOpenLid");
/// ```
#[macro_export]
macro_rules! impl_command {
    ($ty:ty, $name:literal) => {
        $crate::impl_command!(@impl $ty, $name, false);
    };
    ($ty:ty, $name:literal, notification) => {
        $crate::impl_command!(@impl $ty, $name, true);
    };
    (@impl $ty:ty, $name:literal, $notification:expr) => {
        impl $crate::command::Command for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn timeout(&self) -> $crate::command::Timeout {
                self.timeout
            }

            fn is_notification(&self) -> bool {
                $notification
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn into_any(self: Box<Self>) -> Box<dyn ::std::any::Any + Send> {
                self
            }

            fn encode_body(&self) -> $crate::error::Result<Vec<u8>> {
                $crate::codec::encode_body(self)
            }
        }

        impl $crate::command::NamedCommand for $ty {
            const NAME: &'static str = $name;
        }
    };
}
