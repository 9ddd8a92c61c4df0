//! Event handler tests.
//!
//! The handler runs on its controller; the test plays the master side of
//! the channel and answers the step commands.

use std::time::Duration;

use histo_commands::{ChannelEndpoint, CommandChannel, ControllerHandle, Inbound, ThreadController};
use histo_core::command::downcast;
use histo_core::config::LogConfig;
use histo_core::{Acknowledge, Command, EventReporter, NotificationBus, Reference, StateNotification};
use histo_events::{
    ButtonType, CmdEventAction, CmdShowEventMessage, DataLogger, EventActionHub, EventCatalog,
    EventHandler, EVENT_HANDLER,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

const CATALOG: &str = r#"{
    "sources": [{
        "name": "DeviceControl",
        "events": [
            {
                "code": 7,
                "root_step": 1,
                "steps": [
                    {"id": 1, "type": "ACT", "action": "Check", "timeout_ms": 1000,
                     "next_on_fail": 2, "next_on_timeout": 2},
                    {"id": 2, "type": "MSG", "buttons": "OkCancel", "timeout_ms": 2000,
                     "next_on_success": 1}
                ]
            },
            {"code": 8, "alarm_type": "Local", "error_type": "Error"}
        ]
    }]
}"#;

struct Running {
    handle: ControllerHandle,
    master: ChannelEndpoint,
    events: EventReporter,
    task: JoinHandle<EventHandler>,
}

fn spawn(logger: Option<DataLogger>, bus: NotificationBus) -> Running {
    let (events, rx) = EventReporter::channel();
    let hub = EventActionHub::new(EventCatalog::from_json(CATALOG).unwrap());
    let mut handler = EventHandler::new(hub, rx);
    if let Some(logger) = logger {
        handler = handler.with_logger(logger);
    }

    let (end, master) = CommandChannel::pair(EVENT_HANDLER, "master", 16);
    let mut controller =
        ThreadController::new(EVENT_HANDLER, handler, end, events.clone()).with_notifications(bus);
    EventHandler::register(&mut controller).unwrap();
    let (handle, task) = controller.spawn();
    handle.go();
    Running {
        handle,
        master,
        events: events.for_source("DeviceControl"),
        task,
    }
}

async fn next_command(master: &mut ChannelEndpoint) -> (Reference, Box<dyn Command>) {
    match timeout(WAIT, master.recv()).await.unwrap() {
        Some(Inbound::Command(reference, cmd)) => (reference, cmd),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_acknowledges_drive_the_sequence() {
    let mut running = spawn(None, NotificationBus::new());
    running.events.raise(7, vec!["rack".into()]);

    let (reference, cmd) = next_command(&mut running.master).await;
    let action = downcast::<CmdEventAction>(cmd).unwrap();
    assert_eq!(action.action, "Check");
    assert_eq!(action.source, "DeviceControl");
    assert_eq!(action.timeout.millis(), 1000);
    running
        .master
        .send_ack(reference, Acknowledge::nok("still open"))
        .unwrap();

    let (reference, cmd) = next_command(&mut running.master).await;
    let prompt = downcast::<CmdShowEventMessage>(cmd).unwrap();
    assert_eq!(prompt.buttons, ButtonType::OkCancel);
    assert_eq!(prompt.key, action.key);
    running.master.send_ack(reference, Acknowledge::ok()).unwrap();

    let (reference, cmd) = next_command(&mut running.master).await;
    assert_eq!(cmd.name(), "CmdEventAction");
    running.master.send_ack(reference, Acknowledge::ok()).unwrap();

    // Give the handler a moment to process the last acknowledge.
    tokio::time::sleep(Duration::from_millis(50)).await;
    running.handle.stop();
    let handler = running.task.await.unwrap();
    assert_eq!(handler.hub().running(), 0);
    assert_eq!(handler.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_steps_time_out() {
    let mut running = spawn(None, NotificationBus::new());
    running.events.raise(7, Vec::new());

    let (_, cmd) = next_command(&mut running.master).await;
    assert_eq!(cmd.name(), "CmdEventAction");
    let started = tokio::time::Instant::now();

    // The action times out, the prompt follows; it times out too.
    let (_, cmd) = next_command(&mut running.master).await;
    assert_eq!(cmd.name(), "CmdShowEventMessage");
    assert!(started.elapsed() >= Duration::from_millis(1000));

    tokio::time::sleep(Duration::from_secs(3)).await;
    running.handle.stop();
    let handler = running.task.await.unwrap();
    assert_eq!(handler.hub().running(), 0);
    assert_eq!(handler.outstanding(), 0);
}

#[tokio::test]
async fn test_alarm_is_published_and_logged() {
    let dir = tempfile::tempdir().unwrap();
    let bus = NotificationBus::new();
    let mut alarms = bus.subscribe_filtered(|n| matches!(n, StateNotification::Alarm { .. }));
    let logger = DataLogger::new(dir.path(), &LogConfig::default(), "SN1", "service");
    let running = spawn(Some(logger), bus);

    running.events.raise(8, vec!["door".into()]);
    assert_eq!(
        timeout(WAIT, alarms.recv()).await.unwrap(),
        Some(StateNotification::Alarm {
            event_id: 8,
            active: true
        })
    );
    running
        .events
        .report(histo_core::SystemEvent::new(8).deactivated());
    assert_eq!(
        timeout(WAIT, alarms.recv()).await.unwrap(),
        Some(StateNotification::Alarm {
            event_id: 8,
            active: false
        })
    );

    running.handle.stop();
    let handler = running.task.await.unwrap();
    assert!(handler.hub().active_alarms().is_empty());
    drop(handler);

    let file = std::fs::read_dir(dir.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let text = std::fs::read_to_string(file).unwrap();
    let lines: Vec<&str> = text.lines().skip(11).collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(";Error;Active;0x00000008;door"));
    assert!(lines[1].ends_with(";Error;Inactive;0x00000008;"));
}
