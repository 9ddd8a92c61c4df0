//! Event, scenario and action step configuration.
//!
//! The catalog is loaded from JSON or TOML, grouped by raising source:
//!
//! ```toml
//! [[sources]]
//! name = "DeviceControl"
//!
//! [[sources.events]]
//! code = 65544
//! error_type = "Error"
//! alarm_type = "Local"
//! string_id = 100
//! root_step = 1
//!
//! [[sources.events.steps]]
//! id = 1
//! type = "MSG"
//! string_id = 101
//! buttons = "RetryCancel"
//! timeout_ms = 60000
//! next_on_success = 2
//!
//! [[strings]]
//! id = 100
//! text = "Rack RFID read failed: %1"
//! ```
//!
//! Every catalog is validated on load. Step targets must exist (`0` ends
//! the sequence) and a loop must pass through at least one MSG step, so an
//! operator can always break it.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use histo_core::{ActionResult, Timeout};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigIssue, EventConfigError, Result};
use crate::translator::Translator;

/// Step id that ends an action sequence.
pub const END_OF_SEQUENCE: u32 = 0;

/// Action step category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepType {
    /// Perform an action on a component.
    Act,
    /// Prompt the operator.
    Msg,
    /// Raise or clear an alarm.
    Alm,
}

/// Event type column of the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorType {
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Info => "Info",
            ErrorType::Warning => "Warning",
            ErrorType::Error => "Error",
            ErrorType::Fatal => "Fatal",
        }
    }
}

/// How important an event is for the event log.
///
/// `None` events are never logged; the others are logged when they reach
/// the hub's threshold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum LogLevel {
    None,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

/// Alarm raised for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlarmType {
    #[default]
    Off,
    /// Instrument buzzer
    Local,
    /// Local plus remote alarm contact
    Remote,
}

/// Buttons of an operator prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ButtonType {
    #[default]
    None,
    Ok,
    OkCancel,
    YesNo,
    RetryCancel,
}

/// Who may acknowledge an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthorityType {
    #[default]
    Operator,
    Supervisor,
    Service,
}

/// One step of an action sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub id: u32,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// ACT: action name passed to the component. ALM: `on` or `off`.
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub next_on_success: u32,
    #[serde(default)]
    pub next_on_fail: u32,
    #[serde(default)]
    pub next_on_timeout: u32,
    #[serde(default)]
    pub string_id: Option<u32>,
    /// 0 waits forever
    #[serde(default)]
    pub timeout_ms: u32,
    #[serde(default)]
    pub buttons: ButtonType,
}

impl StepConfig {
    /// Step to continue with after `result`.
    pub fn next(&self, result: ActionResult) -> u32 {
        match result {
            ActionResult::Success => self.next_on_success,
            ActionResult::Fail => self.next_on_fail,
            ActionResult::Timeout => self.next_on_timeout,
        }
    }

    pub fn timeout(&self) -> Timeout {
        Timeout(self.timeout_ms)
    }

    /// For ALM steps: whether the step raises the alarm.
    pub fn raises_alarm(&self) -> bool {
        !self.action.eq_ignore_ascii_case("off")
    }

    fn targets(&self) -> impl Iterator<Item = u32> {
        let mut targets = vec![self.next_on_success, self.next_on_fail, self.next_on_timeout];
        targets.sort_unstable();
        targets.dedup();
        targets.into_iter().filter(|t| *t != END_OF_SEQUENCE)
    }
}

/// Root step used in one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioRoot {
    pub scenario: u32,
    pub root_step: u32,
}

/// What the hub does with an event besides logging it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    LogOnly,
    LogAndGui,
    LogAndAction,
    LogAndAlarm,
}

/// Configuration of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    pub code: u32,
    #[serde(default)]
    pub error_type: ErrorType,
    #[serde(default)]
    pub authority: AuthorityType,
    #[serde(default)]
    pub alarm_type: AlarmType,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Forward to the GUI when no action sequence is configured
    #[serde(default)]
    pub show_gui: bool,
    /// Log message template
    #[serde(default)]
    pub string_id: Option<u32>,
    /// First step, `0` for none
    #[serde(default)]
    pub root_step: u32,
    #[serde(default)]
    pub scenarios: Vec<ScenarioRoot>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    /// Name of the source group the event was declared in
    #[serde(skip)]
    pub source: String,
}

impl EventConfig {
    pub fn disposition(&self) -> Disposition {
        if self.root_step != END_OF_SEQUENCE {
            Disposition::LogAndAction
        } else if self.alarm_type != AlarmType::Off {
            Disposition::LogAndAlarm
        } else if self.show_gui {
            Disposition::LogAndGui
        } else {
            Disposition::LogOnly
        }
    }

    pub fn step(&self, id: u32) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Root step for `scenario`, falling back to the default root.
    pub fn root_for(&self, scenario: u32) -> u32 {
        self.scenarios
            .iter()
            .find(|s| s.scenario == scenario)
            .map(|s| s.root_step)
            .unwrap_or(self.root_step)
    }

    fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        let code = self.code;
        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id == END_OF_SEQUENCE {
                issues.push(ConfigIssue::ReservedStepId { code });
            } else if !ids.insert(step.id) {
                issues.push(ConfigIssue::DuplicateStep { code, step: step.id });
            }
        }

        if self.root_step != END_OF_SEQUENCE && !ids.contains(&self.root_step) {
            issues.push(ConfigIssue::MissingRootStep {
                code,
                step: self.root_step,
            });
        }
        for s in &self.scenarios {
            if s.root_step != END_OF_SEQUENCE && !ids.contains(&s.root_step) {
                issues.push(ConfigIssue::MissingScenarioRoot {
                    code,
                    scenario: s.scenario,
                    step: s.root_step,
                });
            }
        }
        for step in &self.steps {
            for target in step.targets() {
                if !ids.contains(&target) {
                    issues.push(ConfigIssue::DanglingTarget {
                        code,
                        step: step.id,
                        target,
                    });
                }
            }
        }

        if let Some(steps) = self.unattended_cycle() {
            issues.push(ConfigIssue::UnattendedCycle { code, steps });
        }
    }

    /// Find a loop made of ACT/ALM steps only.
    fn unattended_cycle(&self) -> Option<Vec<u32>> {
        let automatic: HashMap<u32, &StepConfig> = self
            .steps
            .iter()
            .filter(|s| s.step_type != StepType::Msg)
            .map(|s| (s.id, s))
            .collect();

        let mut ids: Vec<u32> = automatic.keys().copied().collect();
        ids.sort_unstable();
        let mut visited = HashSet::new();
        for id in ids {
            let mut path = Vec::new();
            if let Some(cycle) = visit(id, &automatic, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }
}

/// Depth-first search; `path` holds the steps being visited.
fn visit(
    id: u32,
    automatic: &HashMap<u32, &StepConfig>,
    visited: &mut HashSet<u32>,
    path: &mut Vec<u32>,
) -> Option<Vec<u32>> {
    if let Some(start) = path.iter().position(|p| *p == id) {
        let mut cycle = path[start..].to_vec();
        cycle.push(id);
        return Some(cycle);
    }
    if visited.contains(&id) {
        return None;
    }
    // MSG steps and unknown targets end the search.
    let step = automatic.get(&id)?;

    path.push(id);
    for target in step.targets() {
        if let Some(cycle) = visit(target, automatic, visited, path) {
            return Some(cycle);
        }
    }
    path.pop();
    visited.insert(id);
    None
}

/// Events raised by one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

/// Translatable string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringEntry {
    pub id: u32,
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
struct EventFile {
    #[serde(default)]
    sources: Vec<SourceConfig>,
    #[serde(default)]
    strings: Vec<StringEntry>,
}

/// Validated event configuration.
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    events: HashMap<u32, EventConfig>,
    strings: HashMap<u32, String>,
}

impl EventCatalog {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        Self::build(serde_json::from_str(text)?)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        Self::build(toml::from_str(text)?)
    }

    /// Load a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EventConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&text)?,
            _ => Self::from_json(&text)?,
        };
        tracing::info!(
            path = %path.display(),
            events = catalog.len(),
            strings = catalog.strings.len(),
            "Event configuration loaded"
        );
        Ok(catalog)
    }

    fn build(file: EventFile) -> Result<Self> {
        let mut issues = Vec::new();
        let mut events = HashMap::new();
        for source in file.sources {
            for mut event in source.events {
                event.source = source.name.clone();
                event.validate(&mut issues);
                if events.contains_key(&event.code) {
                    issues.push(ConfigIssue::DuplicateEvent { code: event.code });
                } else {
                    events.insert(event.code, event);
                }
            }
        }
        if !issues.is_empty() {
            return Err(EventConfigError::Invalid(issues));
        }

        let strings = file.strings.into_iter().map(|s| (s.id, s.text)).collect();
        Ok(Self { events, strings })
    }

    pub fn get(&self, code: u32) -> Option<&EventConfig> {
        self.events.get(&code)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Configured event codes, sorted.
    pub fn codes(&self) -> Vec<u32> {
        let mut codes: Vec<u32> = self.events.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    /// Translator over the catalog's strings.
    pub fn translator(&self) -> Translator {
        Translator::new(self.strings.clone())
    }
}
