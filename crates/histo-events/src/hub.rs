//! Event/action hub.
//!
//! Every raised [`SystemEvent`] passes through [`EventActionHub::process_event`].
//! The hub resolves the event's configuration, writes the log entry and
//! decides what else happens: nothing, a GUI notice, an alarm, or an action
//! sequence. Action sequences are interpreted step by step from the
//! configuration; each step's outcome selects the next step.
//!
//! The hub does no I/O. It returns [`HubEffect`]s which the event handler
//! carries out, and it is fed the outcome of ACT and MSG steps as events
//! carrying the occurrence key and an [`ActionResult`].

use std::collections::HashMap;

use histo_core::{ActionResult, EventKey, SystemEvent, Timeout};

use crate::config::{
    AlarmType, ButtonType, Disposition, ErrorType, EventCatalog, EventConfig, LogLevel, StepType,
    END_OF_SEQUENCE,
};
use crate::log::LogEntry;
use crate::runtime::EventRuntimeInfo;
use crate::translator::Translator;

/// Something the event handler has to do.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEffect {
    /// Append to the event log.
    Log(LogEntry),
    /// Inform the GUI about an event that needs no answer.
    Inform {
        key: EventKey,
        event_id: u32,
        error_type: ErrorType,
        text: String,
    },
    /// Prompt the operator (MSG step).
    ShowMessage {
        key: EventKey,
        event_id: u32,
        step: u32,
        text: String,
        buttons: ButtonType,
        timeout: Timeout,
    },
    /// Ask a component to perform an action (ACT step).
    Forward {
        key: EventKey,
        event_id: u32,
        step: u32,
        source: String,
        action: String,
        timeout: Timeout,
    },
    /// Raise or clear an alarm.
    Alarm {
        key: EventKey,
        event_id: u32,
        alarm_type: AlarmType,
        active: bool,
    },
    /// The occurrence's action sequence ended.
    Completed {
        key: EventKey,
        event_id: u32,
        cancelled: bool,
    },
}

#[derive(Debug, Clone, Copy)]
struct ActiveAlarm {
    event_id: u32,
    alarm_type: AlarmType,
}

/// Interpreter of the configured event handling.
#[derive(Debug)]
pub struct EventActionHub {
    catalog: EventCatalog,
    translator: Translator,
    threshold: LogLevel,
    next_key: u64,
    runtime: HashMap<EventKey, EventRuntimeInfo>,
    alarms: HashMap<EventKey, ActiveAlarm>,
}

impl EventActionHub {
    pub fn new(catalog: EventCatalog) -> Self {
        Self {
            translator: catalog.translator(),
            catalog,
            threshold: LogLevel::Info,
            next_key: 1,
            runtime: HashMap::new(),
            alarms: HashMap::new(),
        }
    }

    /// Only events configured at or above `threshold` are logged.
    pub fn with_log_threshold(mut self, threshold: LogLevel) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    /// Runtime state of an occurrence with a running action sequence.
    pub fn runtime(&self, key: EventKey) -> Option<&EventRuntimeInfo> {
        self.runtime.get(&key)
    }

    /// Number of occurrences with a running action sequence.
    pub fn running(&self) -> usize {
        self.runtime.len()
    }

    /// Event ids with a raised alarm, sorted.
    pub fn active_alarms(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.alarms.values().map(|a| a.event_id).collect();
        ids.sort_unstable();
        ids
    }

    /// Process one raised event.
    pub fn process_event(&mut self, event: SystemEvent) -> Vec<HubEffect> {
        match (event.key, event.action_result) {
            (Some(key), Some(result)) => self.step_result(key, result),
            _ if !event.active => self.deactivate(&event),
            (Some(key), None) => self.update(key, event),
            (None, None) | (None, Some(_)) => self.activate(event),
        }
    }

    /// Continue the sequence of `key` with the outcome of its current step.
    pub fn step_result(&mut self, key: EventKey, result: ActionResult) -> Vec<HubEffect> {
        let Some(info) = self.runtime.get_mut(&key) else {
            tracing::debug!(key = %key, ?result, "Step result for finished occurrence ignored");
            return Vec::new();
        };
        if !info.awaiting_result {
            tracing::warn!(key = %key, step = info.current_step, ?result, "Unexpected step result");
            return Vec::new();
        }
        info.last_result = Some(result);
        info.awaiting_result = false;

        let event_id = info.event_id;
        let current = info.current_step;
        let Some(config) = self.catalog.get(event_id) else {
            return self.finish(key, false);
        };
        let next = config
            .step(current)
            .map(|s| s.next(result))
            .unwrap_or(END_OF_SEQUENCE);
        tracing::debug!(key = %key, event_id, step = current, ?result, next, "Step finished");
        self.run_from(key, next)
    }

    fn activate(&mut self, event: SystemEvent) -> Vec<HubEffect> {
        let key = EventKey(self.next_key);
        self.next_key += 1;

        let Some(config) = self.catalog.get(event.event_id) else {
            tracing::warn!(event_id = event.event_id, source = %event.source, "Unconfigured event");
            return vec![HubEffect::Log(LogEntry {
                timestamp: event.raised_at,
                source: event.source.clone(),
                event_type: ErrorType::Error.as_str().to_string(),
                status: "Active".to_string(),
                code: event.event_id,
                message: format!("Unconfigured event: {}", event.string_args.join(", ")),
            })];
        };

        let mut effects = Vec::new();
        let text = self.event_text(config, &event.string_args);
        if self.loggable(config) {
            effects.push(HubEffect::Log(log_entry(config, &event, "Active", &text)));
        }
        tracing::info!(
            key = %key,
            event_id = event.event_id,
            source = %event.source,
            disposition = ?config.disposition(),
            "Event raised"
        );

        match config.disposition() {
            Disposition::LogOnly => {}
            Disposition::LogAndGui => effects.push(HubEffect::Inform {
                key,
                event_id: event.event_id,
                error_type: config.error_type,
                text,
            }),
            Disposition::LogAndAlarm => {
                let alarm_type = config.alarm_type;
                effects.extend(self.set_alarm(key, event.event_id, alarm_type, true));
            }
            Disposition::LogAndAction => {
                let root = config.root_for(event.scenario);
                self.runtime.insert(key, EventRuntimeInfo::new(key, &event));
                effects.extend(self.run_from(key, root));
            }
        }
        effects
    }

    fn update(&mut self, key: EventKey, event: SystemEvent) -> Vec<HubEffect> {
        match self.runtime.get_mut(&key) {
            Some(info) => {
                info.string_args.push(event.string_args);
                Vec::new()
            }
            None => self.activate(SystemEvent { key: None, ..event }),
        }
    }

    fn deactivate(&mut self, event: &SystemEvent) -> Vec<HubEffect> {
        let mut keys: Vec<EventKey> = match event.key {
            Some(key) => vec![key],
            None => self
                .runtime
                .values()
                .filter(|i| i.event_id == event.event_id)
                .map(|i| i.key)
                .chain(
                    self.alarms
                        .iter()
                        .filter(|(_, a)| a.event_id == event.event_id)
                        .map(|(k, _)| *k),
                )
                .collect(),
        };
        keys.sort_unstable();
        keys.dedup();

        let mut effects = Vec::new();
        if let Some(config) = self.catalog.get(event.event_id) {
            if self.loggable(config) {
                let text = self.event_text(config, &event.string_args);
                effects.push(HubEffect::Log(log_entry(config, event, "Inactive", &text)));
            }
        }
        for key in keys {
            if let Some(alarm) = self.alarms.get(&key).copied() {
                effects.extend(self.set_alarm(key, alarm.event_id, alarm.alarm_type, false));
            }
            if self.runtime.contains_key(&key) {
                effects.extend(self.finish(key, true));
            }
        }
        tracing::info!(event_id = event.event_id, "Event deactivated");
        effects
    }

    /// Execute steps starting at `step` until one waits for a result.
    fn run_from(&mut self, key: EventKey, mut step: u32) -> Vec<HubEffect> {
        let mut effects = Vec::new();
        loop {
            let Some(info) = self.runtime.get_mut(&key) else {
                return effects;
            };
            let Some(config) = self.catalog.get(info.event_id) else {
                break;
            };
            if step == END_OF_SEQUENCE {
                break;
            }
            let Some(current) = config.step(step) else {
                tracing::warn!(key = %key, step, "Missing step, sequence ended");
                break;
            };

            info.enter_step(step);
            match current.step_type {
                StepType::Alm => {
                    let alarm_type = match config.alarm_type {
                        AlarmType::Off => AlarmType::Local,
                        other => other,
                    };
                    let event_id = info.event_id;
                    let raise = current.raises_alarm();
                    step = current.next_on_success;
                    effects.extend(self.set_alarm(key, event_id, alarm_type, raise));
                }
                StepType::Act => {
                    info.awaiting_result = true;
                    effects.push(HubEffect::Forward {
                        key,
                        event_id: info.event_id,
                        step,
                        source: info.source.clone(),
                        action: current.action.clone(),
                        timeout: current.timeout(),
                    });
                    return effects;
                }
                StepType::Msg => {
                    info.awaiting_result = true;
                    info.pending_selection = Some(current.buttons);
                    let string_id = current.string_id.or(config.string_id);
                    let text = match string_id {
                        Some(id) => self.translator.translate(id, info.latest_args()),
                        None => info.latest_args().join(", "),
                    };
                    effects.push(HubEffect::ShowMessage {
                        key,
                        event_id: info.event_id,
                        step,
                        text,
                        buttons: current.buttons,
                        timeout: current.timeout(),
                    });
                    return effects;
                }
            }
        }
        effects.extend(self.finish(key, false));
        effects
    }

    fn finish(&mut self, key: EventKey, cancelled: bool) -> Vec<HubEffect> {
        match self.runtime.remove(&key) {
            Some(info) => {
                tracing::debug!(
                    key = %key,
                    correlation = %info.correlation,
                    event_id = info.event_id,
                    cancelled,
                    "Action sequence finished"
                );
                vec![HubEffect::Completed {
                    key,
                    event_id: info.event_id,
                    cancelled,
                }]
            }
            None => Vec::new(),
        }
    }

    fn set_alarm(
        &mut self,
        key: EventKey,
        event_id: u32,
        alarm_type: AlarmType,
        active: bool,
    ) -> Option<HubEffect> {
        let changed = if active {
            self.alarms
                .insert(
                    key,
                    ActiveAlarm {
                        event_id,
                        alarm_type,
                    },
                )
                .is_none()
        } else {
            self.alarms.remove(&key).is_some()
        };
        changed.then_some(HubEffect::Alarm {
            key,
            event_id,
            alarm_type,
            active,
        })
    }

    fn loggable(&self, config: &EventConfig) -> bool {
        config.log_level != LogLevel::None && config.log_level >= self.threshold
    }

    fn event_text(&self, config: &EventConfig, args: &[String]) -> String {
        match config.string_id {
            Some(id) => self.translator.translate(id, args),
            None => args.join(", "),
        }
    }
}

fn log_entry(config: &EventConfig, event: &SystemEvent, status: &str, text: &str) -> LogEntry {
    LogEntry {
        timestamp: event.raised_at,
        source: if event.source.is_empty() {
            config.source.clone()
        } else {
            event.source.clone()
        },
        event_type: config.error_type.as_str().to_string(),
        status: status.to_string(),
        code: event.event_id,
        message: text.to_string(),
    }
}
