//! Action sequence tests for the event/action hub.

use histo_core::{ActionResult, EventKey, SystemEvent, Timeout};
use histo_events::{AlarmType, ButtonType, EventActionHub, EventCatalog, HubEffect};

const RFID_FAILED: u32 = 0x0001_0108;

const CATALOG: &str = r#"
[[sources]]
name = "DeviceControl"

[[sources.events]]
code = 65800
error_type = "Error"
alarm_type = "Local"
string_id = 100
root_step = 1
scenarios = [{ scenario = 200, root_step = 10 }]

[[sources.events.steps]]
id = 1
type = "ALM"
action = "on"
next_on_success = 2

[[sources.events.steps]]
id = 2
type = "ACT"
action = "RetryRead"
timeout_ms = 5000
next_on_success = 5
next_on_fail = 3
next_on_timeout = 3

[[sources.events.steps]]
id = 3
type = "MSG"
string_id = 101
buttons = "RetryCancel"
timeout_ms = 60000
next_on_success = 2

[[sources.events.steps]]
id = 5
type = "ALM"
action = "off"

[[sources.events.steps]]
id = 10
type = "ACT"
action = "Abort"

[[strings]]
id = 100
text = "Rack RFID read failed on channel %1"

[[strings]]
id = 101
text = "Rack on channel %1 cannot be identified. Retry?"
"#;

fn hub() -> EventActionHub {
    EventActionHub::new(EventCatalog::from_toml(CATALOG).unwrap())
}

fn raise(hub: &mut EventActionHub, channel: &str) -> (EventKey, Vec<HubEffect>) {
    let effects = hub.process_event(
        SystemEvent::new(RFID_FAILED)
            .with_source("DeviceControl")
            .with_args(vec![channel.to_string()]),
    );
    let key = effects
        .iter()
        .find_map(|e| match e {
            HubEffect::Forward { key, .. } | HubEffect::Alarm { key, .. } => Some(*key),
            _ => None,
        })
        .unwrap();
    (key, effects)
}

fn result(hub: &mut EventActionHub, key: EventKey, result: ActionResult) -> Vec<HubEffect> {
    hub.process_event(SystemEvent::new(RFID_FAILED).with_key(key).with_result(result))
}

#[test]
fn test_retry_after_operator_prompt() {
    let mut hub = hub();
    let (key, effects) = raise(&mut hub, "3");

    assert_eq!(effects.len(), 3);
    match &effects[0] {
        HubEffect::Log(entry) => {
            assert_eq!(entry.message, "Rack RFID read failed on channel 3");
            assert_eq!(entry.event_type, "Error");
            assert_eq!(entry.source, "DeviceControl");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        effects[1],
        HubEffect::Alarm {
            key,
            event_id: RFID_FAILED,
            alarm_type: AlarmType::Local,
            active: true
        }
    );
    assert_eq!(
        effects[2],
        HubEffect::Forward {
            key,
            event_id: RFID_FAILED,
            step: 2,
            source: "DeviceControl".into(),
            action: "RetryRead".into(),
            timeout: Timeout(5000),
        }
    );
    assert_eq!(hub.runtime(key).unwrap().current_step, 2);

    // The retry times out, the operator is asked.
    let effects = result(&mut hub, key, ActionResult::Timeout);
    assert_eq!(
        effects,
        vec![HubEffect::ShowMessage {
            key,
            event_id: RFID_FAILED,
            step: 3,
            text: "Rack on channel 3 cannot be identified. Retry?".into(),
            buttons: ButtonType::RetryCancel,
            timeout: Timeout(60_000),
        }]
    );
    let info = hub.runtime(key).unwrap();
    assert_eq!(info.pending_selection, Some(ButtonType::RetryCancel));
    assert_eq!(info.last_result, Some(ActionResult::Timeout));

    // Retry, which now succeeds.
    let effects = result(&mut hub, key, ActionResult::Success);
    assert!(matches!(effects[..], [HubEffect::Forward { step: 2, .. }]));
    let effects = result(&mut hub, key, ActionResult::Success);
    assert_eq!(
        effects,
        vec![
            HubEffect::Alarm {
                key,
                event_id: RFID_FAILED,
                alarm_type: AlarmType::Local,
                active: false
            },
            HubEffect::Completed {
                key,
                event_id: RFID_FAILED,
                cancelled: false
            },
        ]
    );
    assert_eq!(hub.running(), 0);
    assert!(hub.active_alarms().is_empty());
}

#[test]
fn test_cancel_keeps_alarm_until_deactivated() {
    let mut hub = hub();
    let (key, _) = raise(&mut hub, "1");
    result(&mut hub, key, ActionResult::Fail);

    let effects = result(&mut hub, key, ActionResult::Fail);
    assert!(matches!(
        effects[..],
        [HubEffect::Completed {
            cancelled: false,
            ..
        }]
    ));
    assert_eq!(hub.active_alarms(), vec![RFID_FAILED]);

    let effects = hub.process_event(SystemEvent::new(RFID_FAILED).deactivated());
    assert!(matches!(&effects[0], HubEffect::Log(entry) if entry.status == "Inactive"));
    assert!(matches!(effects[1], HubEffect::Alarm { active: false, .. }));
    assert!(hub.active_alarms().is_empty());
}

#[test]
fn test_scenario_selects_root_step() {
    let mut hub = hub();
    let effects = hub.process_event(SystemEvent::new(RFID_FAILED).with_scenario(200));
    assert!(matches!(
        &effects[1],
        HubEffect::Forward { step: 10, action, .. } if action == "Abort"
    ));
    assert!(hub.active_alarms().is_empty());
}

#[test]
fn test_deactivation_cancels_running_sequence() {
    let mut hub = hub();
    let (key, _) = raise(&mut hub, "2");

    let effects = hub.process_event(SystemEvent::new(RFID_FAILED).with_key(key).deactivated());
    assert!(effects.contains(&HubEffect::Completed {
        key,
        event_id: RFID_FAILED,
        cancelled: true
    }));
    assert!(effects.contains(&HubEffect::Alarm {
        key,
        event_id: RFID_FAILED,
        alarm_type: AlarmType::Local,
        active: false
    }));
    assert!(hub.runtime(key).is_none());

    // A late acknowledge for the cancelled step changes nothing.
    assert!(result(&mut hub, key, ActionResult::Success).is_empty());
}

#[test]
fn test_occurrences_are_independent() {
    let mut hub = hub();
    let (first, _) = raise(&mut hub, "1");
    let (second, _) = raise(&mut hub, "4");
    assert_ne!(first, second);
    assert_eq!(hub.running(), 2);

    result(&mut hub, first, ActionResult::Success);
    assert!(hub.runtime(first).is_none());
    assert_eq!(hub.runtime(second).unwrap().current_step, 2);
}

#[test]
fn test_update_changes_prompt_arguments() {
    let mut hub = hub();
    let (key, _) = raise(&mut hub, "1");
    let update = hub.process_event(
        SystemEvent::new(RFID_FAILED)
            .with_key(key)
            .with_args(vec!["5".into()]),
    );
    assert!(update.is_empty());

    let effects = result(&mut hub, key, ActionResult::Fail);
    assert!(matches!(
        &effects[0],
        HubEffect::ShowMessage { text, .. } if text == "Rack on channel 5 cannot be identified. Retry?"
    ));
}
