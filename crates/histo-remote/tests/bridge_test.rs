//! Remote-care bridge tests.
//!
//! The agent side is a server session on a local TCP listener.

use std::time::Duration;

use histo_commands::{ChannelEndpoint, CommandChannel, ControllerHandle, Inbound, ThreadController};
use histo_core::config::RemoteCareConfig;
use histo_core::{
    Acknowledge, CommandCodec, EventReporter, NotificationBus, Reference, StateNotification,
    SystemEvent, Timeout,
};
use histo_remote::bridge::codes;
use histo_remote::commands::register_codec;
use histo_remote::{
    CmdRemoteCareConnect, CmdRemoteCareEvent, CmdRemoteCareStatus, LineChannel, NetMessage,
    NetSignal, NetworkDevice, RemoteCareBridge, Session, SessionConfig,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Agent {
    outbound: mpsc::Sender<NetMessage>,
    signals: mpsc::UnboundedReceiver<NetSignal>,
}

fn remote_config(address: String, enabled: bool) -> RemoteCareConfig {
    RemoteCareConfig {
        enabled,
        address,
        client_name: "Himalaya".into(),
        shared_secret: "s3cret".into(),
        ..RemoteCareConfig::default()
    }
}

fn codec() -> CommandCodec {
    let mut codec = CommandCodec::new();
    register_codec(&mut codec).unwrap();
    codec
}

/// Accept one connection and serve it with an agent session.
async fn agent(listener: TcpListener) -> Agent {
    let (stream, _) = listener.accept().await.unwrap();
    let (outbound, rx) = mpsc::channel(16);
    let (tx, signals) = mpsc::unbounded_channel();
    let session = Session::new(
        NetworkDevice::server("Himalaya", "s3cret", Duration::from_secs(5)),
        SessionConfig::default(),
    );
    tokio::spawn(session.run(LineChannel::tcp(stream), rx, move |signal| {
        let _ = tx.send(signal);
    }));
    Agent { outbound, signals }
}

fn spawn_bridge(
    config: RemoteCareConfig,
    events: EventReporter,
    bus: NotificationBus,
) -> (ControllerHandle, ChannelEndpoint, tokio::task::JoinHandle<RemoteCareBridge>) {
    let (end, master) = CommandChannel::pair("RemoteCare", "master", 16);
    let mut controller = ThreadController::new(
        "RemoteCare",
        RemoteCareBridge::new(config, codec()),
        end,
        events,
    )
    .with_notifications(bus);
    RemoteCareBridge::register(&mut controller).unwrap();
    let (handle, task) = controller.spawn();
    handle.go();
    (handle, master, task)
}

async fn wait_for_state(states: &mut histo_core::NotificationReceiver, wanted: &str) {
    timeout(WAIT, async {
        loop {
            match states.recv().await {
                Some(StateNotification::NetworkState { state, .. }) if state == wanted => return,
                Some(_) => continue,
                None => panic!("notification bus closed"),
            }
        }
    })
    .await
    .unwrap();
}

async fn next_delivery(agent: &mut Agent) -> NetMessage {
    match timeout(WAIT, agent.signals.recv()).await.unwrap() {
        Some(NetSignal::Delivered(msg)) => msg,
        other => panic!("unexpected agent signal {:?}", other),
    }
}

async fn next_inbound(master: &mut ChannelEndpoint) -> Inbound {
    timeout(WAIT, master.recv()).await.unwrap().unwrap()
}

fn event() -> Box<CmdRemoteCareEvent> {
    Box::new(CmdRemoteCareEvent {
        timeout: Timeout(5000),
        event_id: 0x0001_0008,
        active: true,
        text: "rack RFID read failed".into(),
    })
}

#[tokio::test]
async fn test_commands_cross_in_both_directions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let bus = NotificationBus::new();
    let mut states = bus.subscribe();

    let (handle, mut master, task) =
        spawn_bridge(remote_config(address, true), EventReporter::detached(), bus);
    let mut agent = agent(listener).await;
    assert_eq!(
        timeout(WAIT, agent.signals.recv()).await.unwrap(),
        Some(NetSignal::Authenticated)
    );
    wait_for_state(&mut states, "Authenticated").await;

    // Master to agent.
    master.send_command(Reference(7), event()).unwrap();
    match next_delivery(&mut agent).await {
        NetMessage::Message {
            name, reference, ..
        } => {
            assert_eq!(name, "CmdRemoteCareEvent");
            assert_eq!(reference, 7);
        }
        other => panic!("unexpected {:?}", other),
    }
    agent
        .outbound
        .send(NetMessage::Ack {
            reference: 7,
            ack: Acknowledge::ok_with("logged"),
        })
        .await
        .unwrap();
    match next_inbound(&mut master).await {
        Inbound::Ack(reference, ack) => {
            assert_eq!(reference, Reference(7));
            assert_eq!(ack.text.as_deref(), Some("logged"));
        }
        other => panic!("unexpected {:?}", other),
    }

    // Agent to master.
    let status = CmdRemoteCareStatus {
        timeout: Timeout(5000),
    };
    agent
        .outbound
        .send(NetMessage::command(Reference(3), &status, &codec()).unwrap())
        .await
        .unwrap();
    let local = match next_inbound(&mut master).await {
        Inbound::Command(reference, cmd) => {
            assert_eq!(cmd.name(), "CmdRemoteCareStatus");
            reference
        }
        other => panic!("unexpected {:?}", other),
    };
    master.send_ack(local, Acknowledge::ok_with("idle")).unwrap();
    assert_eq!(
        next_delivery(&mut agent).await,
        NetMessage::Ack {
            reference: 3,
            ack: Acknowledge::ok_with("idle"),
        }
    );

    handle.stop();
    let bridge = task.await.unwrap();
    assert_eq!(bridge.pending_from_agent(), 0);
}

#[tokio::test]
async fn test_unknown_agent_command_is_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let bus = NotificationBus::new();
    let mut states = bus.subscribe();
    let (handle, _master, task) =
        spawn_bridge(remote_config(address, true), EventReporter::detached(), bus);
    let mut agent = agent(listener).await;
    wait_for_state(&mut states, "Authenticated").await;

    // CmdRemoteCareConnect is not part of the agent codec.
    let mut sender_codec = CommandCodec::new();
    sender_codec.register::<CmdRemoteCareConnect>().unwrap();
    let connect = CmdRemoteCareConnect {
        timeout: Timeout(1000),
    };
    agent
        .outbound
        .send(NetMessage::command(Reference(11), &connect, &sender_codec).unwrap())
        .await
        .unwrap();

    loop {
        match next_delivery(&mut agent).await {
            NetMessage::Ack { reference, ack } => {
                assert_eq!(reference, 11);
                assert!(!ack.is_ok());
                break;
            }
            _ => continue,
        }
    }

    handle.stop();
    task.await.unwrap();
}

#[tokio::test]
async fn test_forward_while_disconnected() {
    let bus = NotificationBus::new();
    let (handle, mut master, task) = spawn_bridge(
        remote_config("127.0.0.1:1".into(), false),
        EventReporter::detached(),
        bus,
    );

    master.send_command(Reference(2), event()).unwrap();
    match next_inbound(&mut master).await {
        Inbound::Ack(reference, ack) => {
            assert_eq!(reference, Reference(2));
            assert_eq!(ack.text.as_deref(), Some("remote care not connected"));
        }
        other => panic!("unexpected {:?}", other),
    }

    handle.stop();
    task.await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    // Reserve a port, then free it so nobody listens there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let (events, mut event_rx) = EventReporter::channel();
    let (handle, mut master, task) = spawn_bridge(
        remote_config(address, false),
        events,
        NotificationBus::new(),
    );

    master
        .send_command(
            Reference(1),
            Box::new(CmdRemoteCareConnect {
                timeout: Timeout(1000),
            }),
        )
        .unwrap();
    match next_inbound(&mut master).await {
        Inbound::Ack(_, ack) => assert!(ack.is_ok()),
        other => panic!("unexpected {:?}", other),
    }

    let raised: SystemEvent = timeout(WAIT, event_rx.recv()).await.unwrap().unwrap();
    assert_eq!(raised.event_id, codes::REMOTE_CONNECTION_LOST);
    assert_eq!(raised.source, "RemoteCare");

    handle.stop();
    let bridge = task.await.unwrap();
    assert_eq!(bridge.state(), histo_remote::NetState::ConnectFailed);
}

#[tokio::test]
async fn test_connection_loss_fails_forwarded_commands() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let bus = NotificationBus::new();
    let mut states = bus.subscribe();
    let (handle, mut master, task) =
        spawn_bridge(remote_config(address, true), EventReporter::detached(), bus);
    let mut agent = agent(listener).await;
    wait_for_state(&mut states, "Authenticated").await;

    master.send_command(Reference(5), event()).unwrap();
    next_delivery(&mut agent).await;

    // The agent goes away without answering.
    drop(agent);
    match next_inbound(&mut master).await {
        Inbound::Ack(reference, ack) => {
            assert_eq!(reference, Reference(5));
            assert_eq!(ack.text.as_deref(), Some("remote care connection lost"));
        }
        other => panic!("unexpected {:?}", other),
    }

    handle.stop();
    task.await.unwrap();
}
