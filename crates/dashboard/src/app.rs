//! Dashboard lifecycle
//!
//! Connect, start the poller, render until shutdown, then stop the poller,
//! close the link and tear down the surface, in that order.

use crate::config::DashboardConfig;
use crate::render::{RenderLoop, RenderSurface};
use obd_protocol::simulator::{Simulator, SimulatorConfig};
use obd_protocol::{ConnectionError, LinkConfig, LinkConnection, Pid};
use std::sync::Arc;
use telemetry_poller::{
    PollerConfig, PollerError, Shutdown, ShutdownReason, Subscriptions, TelemetryPoller,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use vehicle_state::VehicleState;

/// Port name that selects the built-in adapter simulator
pub const SIMULATOR_PORT: &str = "sim";

/// How the process ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Operator quit
    Quit,
    /// The link could not be established
    ConnectFailed,
    /// Configuration was invalid
    ConfigInvalid,
    /// The link died while running
    LinkLost,
    /// The render surface failed
    SurfaceFailed,
}

impl Exit {
    /// Process exit status
    pub fn code(&self) -> u8 {
        match self {
            Exit::Quit => 0,
            Exit::ConnectFailed => 1,
            Exit::ConfigInvalid => 2,
            Exit::LinkLost => 3,
            Exit::SurfaceFailed => 4,
        }
    }
}

impl From<ShutdownReason> for Exit {
    fn from(reason: ShutdownReason) -> Self {
        match reason {
            ShutdownReason::OperatorQuit => Exit::Quit,
            ShutdownReason::LinkLost => Exit::LinkLost,
            ShutdownReason::SurfaceFailed => Exit::SurfaceFailed,
        }
    }
}

/// What a shutdown pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Reason that started the shutdown
    pub reason: ShutdownReason,
    /// Whether this pass closed the link
    pub link_closed: bool,
    /// Whether this pass tore down the surface
    pub surface_torn_down: bool,
}

type PollerTask = JoinHandle<(Result<(), PollerError>, bool)>;

/// A running poller plus the state and signal it shares with the renderer
pub struct Session {
    state: Arc<VehicleState>,
    shutdown: Shutdown,
    poller: Option<PollerTask>,
    surface_torn_down: bool,
}

impl Session {
    /// Register subscriptions on a validated link and start polling it
    pub fn start(link: LinkConnection, config: PollerConfig) -> Result<Self, PollerError> {
        let subscriptions = Subscriptions::register(&link)?;
        let state = Arc::new(VehicleState::new());
        let shutdown = Shutdown::new();

        let mut poller = TelemetryPoller::new(link, Arc::clone(&state), subscriptions, config);
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = poller.run(&signal).await;
            let closed = poller.close().await;
            (result, closed)
        });

        Ok(Self {
            state,
            shutdown,
            poller: Some(task),
            surface_torn_down: false,
        })
    }

    /// State written by the poller
    pub fn state(&self) -> Arc<VehicleState> {
        Arc::clone(&self.state)
    }

    /// Signal shared by the poller and the renderer
    pub fn shutdown_signal(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Stop the poller, close the link, tear down the surface.
    ///
    /// Every step runs even if an earlier one failed. Later calls do nothing
    /// but report the first reason.
    pub async fn shutdown<S: RenderSurface + ?Sized>(&mut self, surface: &mut S) -> ShutdownReport {
        self.shutdown.trigger(ShutdownReason::OperatorQuit);
        let reason = self.shutdown.wait().await;

        let mut link_closed = false;
        if let Some(task) = self.poller.take() {
            info!("Closing connection and shutting down.");
            match task.await {
                Ok((Ok(()), closed)) => link_closed = closed,
                Ok((Err(e), closed)) => {
                    warn!("Poller ended with error: {}", e);
                    link_closed = closed;
                }
                // The link was dropped together with the task
                Err(e) => error!("Poller task failed: {}", e),
            }
        }

        let surface_torn_down = !std::mem::replace(&mut self.surface_torn_down, true);
        if surface_torn_down {
            surface.teardown();
        }

        ShutdownReport {
            reason,
            link_closed,
            surface_torn_down,
        }
    }
}

/// Open the configured link, or the simulator for [`SIMULATOR_PORT`]
pub async fn open_link(config: &LinkConfig) -> Result<LinkConnection, ConnectionError> {
    info!("Attempting to connect to OBD-II adapter at {}...", config.port);
    if config.port == SIMULATOR_PORT {
        info!("Using simulated OBD-II adapter");
        let (transport, _handle) = Simulator::spawn(SimulatorConfig::demo());
        return LinkConnection::establish(transport, config, &Pid::REQUIRED).await;
    }
    LinkConnection::connect(config, &Pid::REQUIRED).await
}

/// Run the dashboard on a validated link until shutdown
pub async fn run_session<S: RenderSurface + ?Sized>(
    link: LinkConnection,
    config: &DashboardConfig,
    surface: &mut S,
) -> Exit {
    let mut session = match Session::start(link, config.poller_config()) {
        Ok(session) => session,
        Err(e) => {
            error!("Error starting telemetry poller: {}", e);
            surface.teardown();
            return Exit::ConnectFailed;
        }
    };

    let quit = session.shutdown_signal().clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            quit.trigger(ShutdownReason::OperatorQuit);
        }
    });

    RenderLoop::new(session.state(), config.render.refresh_hz)
        .run(surface, session.shutdown_signal())
        .await;

    let report = session.shutdown(surface).await;
    ctrl_c.abort();
    info!("Dashboard stopped: {:?}", report.reason);
    Exit::from(report.reason)
}

/// Connect and run the dashboard
pub async fn run<S: RenderSurface + ?Sized>(config: &DashboardConfig, surface: &mut S) -> Exit {
    let link_config = match config.link_config() {
        Ok(link_config) => link_config,
        Err(e) => {
            error!("{}", e);
            return Exit::ConfigInvalid;
        }
    };

    let link = match open_link(&link_config).await {
        Ok(link) => link,
        Err(e) => {
            error!("Error connecting to OBD-II adapter: {}", e);
            return Exit::ConnectFailed;
        }
    };

    run_session(link, config, surface).await
}
