//! Controller wiring for `histoctl run`.
//!
//! Every subsystem runs on its own thread controller connected to the
//! command router. The router forwards commands by type:
//!
//! ```text
//!   EventHandler  --CmdEventAction/CmdShowEventMessage-->  Console
//!   Console       --CmdRemoteCareEvent------------------>  RemoteCare
//!   RemoteCare    --CmdReadRackRfid--------------------->  DeviceControl
//!   RemoteCare    --CmdRemoteCareStatus----------------->  Console
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use histo_commands::{
    ChannelEndpoint, CommandChannel, CommandRouter, ControllerHandle, PortId, RouterHandle,
    ThreadController, ThreadHandler,
};
use histo_core::{AdjustedTime, CommandCodec, EventReporter, NotificationBus, SystemConfig, SystemPaths};
use histo_devices::{CmdReadRackRfid, DEVICE_CONTROL, SimulatedTransceiver, simulated_device_control};
use histo_events::{
    CmdEventAction, CmdShowEventMessage, DataLogger, EVENT_HANDLER, EventActionHub, EventCatalog,
    EventHandler, NotifyEventInfo,
};
use histo_remote::{
    CmdRemoteCareConnect, CmdRemoteCareEvent, CmdRemoteCareStatus, ExternalProcess, REMOTE_CARE,
    RemoteCareBridge,
};
use tokio::task::JoinHandle;

use crate::console::{CONSOLE, Console};

/// Tag contents of the simulated rack transponders.
pub const SIM_TAG_UID: u32 = 0x0400_1234;
pub const SIM_TAG_DATA: u32 = 0x0000_0001;

/// A running controller set.
pub struct System {
    router: RouterHandle,
    router_task: JoinHandle<()>,
    controllers: Vec<(ControllerHandle, JoinHandle<()>)>,
    agent: Option<ExternalProcess>,
    terminate_grace: Duration,
}

/// Connect a controller to the router; the router port is named after it.
fn connect(router: &mut CommandRouter, name: &str, capacity: usize) -> (ChannelEndpoint, PortId) {
    let (end, master) = CommandChannel::pair(name, "master", capacity);
    let port = router.add_port(master);
    (end, port)
}

fn spawn<S: ThreadHandler>(controller: ThreadController<S>) -> (ControllerHandle, JoinHandle<()>) {
    let (handle, task) = controller.spawn();
    let name = handle.name().to_string();
    let task = tokio::spawn(async move {
        if let Err(e) = task.await {
            tracing::error!(controller = %name, error = %e, "Controller task failed");
        }
    });
    (handle, task)
}

impl System {
    /// Build, start and `Go` every controller.
    pub fn start(config: &SystemConfig, catalog: EventCatalog, clock: AdjustedTime) -> Result<Self> {
        let capacity = config.channel_capacity;
        let (events, event_rx) = EventReporter::channel();
        let events = events.with_clock(clock.clone());
        let bus = NotificationBus::new();
        let mut router =
            CommandRouter::new(events.clone()).with_reference_width(config.reference_width);

        // Event handling
        let paths = SystemPaths::from_root(&config.root_dir);
        paths
            .create_all()
            .with_context(|| format!("Cannot create directories below {}", paths.root().display()))?;
        let log_dir = config.log_dir();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Cannot create log directory {}", log_dir.display()))?;
        let logger = DataLogger::new(
            log_dir,
            &config.log,
            &config.serial_number,
            &config.operating_mode,
        );
        tracing::info!(events = catalog.len(), "Event configuration loaded");
        let handler = EventHandler::new(EventActionHub::new(catalog), event_rx).with_logger(logger);
        let (end, _) = connect(&mut router, EVENT_HANDLER, capacity);
        let mut event_handler =
            ThreadController::new(EVENT_HANDLER, handler, end, events.for_source(EVENT_HANDLER))
                .with_reference_width(config.reference_width)
                .with_notifications(bus.clone());
        EventHandler::register(&mut event_handler)?;

        // Device control
        let (end, port) = connect(&mut router, DEVICE_CONTROL, capacity);
        let devices = simulated_device_control(
            end,
            events.for_source(DEVICE_CONTROL),
            &config.device,
            SimulatedTransceiver::new(SIM_TAG_UID, SIM_TAG_DATA),
        )?
        .with_notifications(bus.clone());
        router.route::<CmdReadRackRfid>(port)?;

        // Console
        let remote_care = config.remote_care.enabled;
        let (end, port) = connect(&mut router, CONSOLE, capacity);
        let mut console = ThreadController::new(
            CONSOLE,
            Console::new(&config.serial_number, &config.operating_mode, clock)
                .with_remote_care(remote_care),
            end,
            events.for_source(CONSOLE),
        )
        .with_notifications(bus.clone());
        Console::register(&mut console)?;
        router.route::<CmdShowEventMessage>(port)?;
        router.route::<CmdEventAction>(port)?;
        router.route::<NotifyEventInfo>(port)?;
        router.route::<CmdRemoteCareStatus>(port)?;

        // Remote care
        let mut agent = None;
        let mut bridge = None;
        if remote_care {
            if let Some(program) = &config.remote_care.agent_executable {
                let mut process =
                    ExternalProcess::new("RemoteCareAgent", program).with_notifications(bus.clone());
                match process.start() {
                    Ok(pid) => tracing::info!(pid, "Remote-care agent started"),
                    Err(e) => tracing::error!(error = %e, "Remote-care agent failed to start"),
                }
                agent = Some(process);
            }

            let mut codec = CommandCodec::new();
            histo_remote::commands::register_codec(&mut codec)?;
            histo_devices::commands::register_codec(&mut codec)?;
            let (end, port) = connect(&mut router, REMOTE_CARE, capacity);
            let mut controller = ThreadController::new(
                REMOTE_CARE,
                RemoteCareBridge::new(config.remote_care.clone(), codec),
                end,
                events.for_source(REMOTE_CARE),
            )
            .with_notifications(bus.clone());
            RemoteCareBridge::register(&mut controller)?;
            router.route::<CmdRemoteCareEvent>(port)?;
            router.route::<CmdRemoteCareConnect>(port)?;
            bridge = Some(controller);
        }

        let (router, router_task) = router.spawn();
        let mut controllers = vec![spawn(event_handler), spawn(devices), spawn(console)];
        if let Some(bridge) = bridge {
            controllers.push(spawn(bridge));
        }
        for (handle, _) in &controllers {
            handle.go();
        }
        tracing::info!(
            controllers = controllers.len(),
            routes = router.routed_names().len(),
            "System running"
        );

        Ok(Self {
            router,
            router_task,
            controllers,
            agent,
            terminate_grace: Duration::from_millis(config.remote_care.terminate_grace_ms),
        })
    }

    /// Stop every controller, then the router and the agent process.
    pub async fn shutdown(mut self) -> Result<()> {
        for (handle, _) in &self.controllers {
            handle.stop();
        }
        for (_, task) in self.controllers.drain(..) {
            let _ = task.await;
        }
        self.router.shutdown();
        let _ = self.router_task.await;

        if let Some(mut agent) = self.agent.take() {
            let state = agent.terminate(self.terminate_grace).await?;
            tracing::info!(state = ?state, "Remote-care agent stopped");
        }
        tracing::info!("System stopped");
        Ok(())
    }
}
