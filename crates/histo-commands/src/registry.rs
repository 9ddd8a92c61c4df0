//! Per-controller table of command handlers.
//!
//! Each command type maps to exactly one handler functor within one
//! controller. Handlers receive the controller state, the context, the
//! reference the command arrived with and the command already downcast to
//! its concrete type.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use histo_core::{Command, Error, NamedCommand, Reference, Result};

use crate::controller::ControllerContext;

type Functor<S> =
    Box<dyn FnMut(&mut S, &mut ControllerContext, Reference, Box<dyn Command>) -> Result<()> + Send>;

struct Entry<S> {
    name: &'static str,
    critical: bool,
    functor: Functor<S>,
}

/// Handler table keyed by command type.
pub struct FunctorRegistry<S> {
    entries: HashMap<TypeId, Entry<S>>,
}

impl<S> FunctorRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register the handler for command type `C`.
    ///
    /// `critical` handlers keep running during power-fail.
    pub fn register<C, F>(&mut self, critical: bool, mut handler: F) -> Result<()>
    where
        C: NamedCommand,
        F: FnMut(&mut S, &mut ControllerContext, Reference, C) -> Result<()> + Send + 'static,
    {
        let type_id = TypeId::of::<C>();
        if self.entries.contains_key(&type_id) {
            return Err(Error::AlreadyRegistered(C::NAME.to_string()));
        }

        let functor: Functor<S> = Box::new(move |state, ctx, reference, cmd| {
            let cmd = histo_core::command::downcast::<C>(cmd)
                .ok_or_else(|| Error::UnsupportedCommand(C::NAME.to_string()))?;
            handler(state, ctx, reference, cmd)
        });

        self.entries.insert(
            type_id,
            Entry {
                name: C::NAME,
                critical,
                functor,
            },
        );
        Ok(())
    }

    /// Whether a handler for `C` exists.
    pub fn contains<C: NamedCommand>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<C>())
    }

    /// Whether the command's handler is marked critical.
    pub fn is_critical(&self, cmd: &dyn Command) -> bool {
        self.entries
            .get(&type_of(cmd))
            .is_some_and(|entry| entry.critical)
    }

    /// Whether the command has a handler.
    pub fn handles(&self, cmd: &dyn Command) -> bool {
        self.entries.contains_key(&type_of(cmd))
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.name).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the handler for `cmd`.
    pub fn dispatch(
        &mut self,
        state: &mut S,
        ctx: &mut ControllerContext,
        reference: Reference,
        cmd: Box<dyn Command>,
    ) -> Result<()> {
        match self.entries.get_mut(&type_of(cmd.as_ref())) {
            Some(entry) => (entry.functor)(state, ctx, reference, cmd),
            None => Err(Error::UnsupportedCommand(cmd.name().to_string())),
        }
    }
}

impl<S> Default for FunctorRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for FunctorRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctorRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

fn type_of(cmd: &dyn Command) -> TypeId {
    Any::type_id(cmd.as_any())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CommandChannel;
    use histo_core::{EventReporter, Timeout, impl_command};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CmdPing {
        timeout: Timeout,
    }
    impl_command!(CmdPing, "CmdPing");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CmdOther {
        timeout: Timeout,
    }
    impl_command!(CmdOther, "CmdOther");

    #[derive(Default)]
    struct Counter {
        pings: u32,
    }

    fn context() -> ControllerContext {
        let (end, _peer) = CommandChannel::pair("test", "peer", 4);
        let (sender, _receiver) = end.split();
        ControllerContext::new("test", sender, EventReporter::detached())
    }

    #[test]
    fn test_register_twice_fails() {
        let mut registry = FunctorRegistry::<Counter>::new();
        registry
            .register::<CmdPing, _>(false, |s, _, _, _| {
                s.pings += 1;
                Ok(())
            })
            .unwrap();
        let err = registry
            .register::<CmdPing, _>(true, |_, _, _, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(name) if name == "CmdPing"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dispatch() {
        let mut registry = FunctorRegistry::<Counter>::new();
        registry
            .register::<CmdPing, _>(true, |s, _, _, _| {
                s.pings += 1;
                Ok(())
            })
            .unwrap();

        let mut state = Counter::default();
        let mut ctx = context();
        let ping: Box<dyn Command> = Box::new(CmdPing {
            timeout: Timeout::NONE,
        });
        assert!(registry.is_critical(ping.as_ref()));
        registry
            .dispatch(&mut state, &mut ctx, Reference(1), ping)
            .unwrap();
        assert_eq!(state.pings, 1);

        let other: Box<dyn Command> = Box::new(CmdOther {
            timeout: Timeout::NONE,
        });
        assert!(!registry.handles(other.as_ref()));
        let err = registry
            .dispatch(&mut state, &mut ctx, Reference(2), other)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedCommand(name) if name == "CmdOther"));
    }
}
