//! Telemetry Poller Implementation

use crate::shutdown::{Shutdown, ShutdownReason};
use crate::subscriptions::Subscriptions;
use obd_protocol::{LinkConnection, ObdError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use vehicle_state::VehicleState;

/// Errors that stop the poller
#[derive(Debug, Error)]
pub enum PollerError {
    /// The link died while polling
    #[error("OBD link lost: {0}")]
    LinkLost(String),

    /// The link cannot be polled yet
    #[error("Link not ready for polling: {0}")]
    NotReady(String),
}

/// Configuration for the telemetry poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between the start of two polling passes (default: 250ms)
    pub poll_interval: Duration,
    /// Consecutive request timeouts before the link is declared lost
    pub max_consecutive_timeouts: u8,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_consecutive_timeouts: 3,
        }
    }
}

/// Counters for one poller run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Completed passes over every subscription
    pub passes: u64,
    /// Readings stored into the vehicle state
    pub readings: u64,
    /// Requests answered without a usable value
    pub unavailable: u64,
    /// Requests that hit the request timeout
    pub timeouts: u64,
}

/// Polls subscribed PIDs and stores the results in the vehicle state
pub struct TelemetryPoller {
    /// Exclusively owned link
    link: LinkConnection,
    /// Shared state written after each successful decode
    state: Arc<VehicleState>,
    /// What to poll and where it goes
    subscriptions: Subscriptions,
    /// Configuration
    config: PollerConfig,
    /// Timeouts since the last answered request
    consecutive_timeouts: u8,
    /// Counters
    stats: PollStats,
}

impl TelemetryPoller {
    /// Create a poller that takes ownership of the link
    pub fn new(
        link: LinkConnection,
        state: Arc<VehicleState>,
        subscriptions: Subscriptions,
        config: PollerConfig,
    ) -> Self {
        info!(
            "Telemetry poller created for {} PIDs every {:?}",
            subscriptions.len(),
            config.poll_interval
        );
        Self {
            link,
            state,
            subscriptions,
            config,
            consecutive_timeouts: 0,
            stats: PollStats::default(),
        }
    }

    /// Poll until `shutdown` fires or the link is lost.
    ///
    /// A lost link raises `shutdown` with [`ShutdownReason::LinkLost`].
    pub async fn run(&mut self, shutdown: &Shutdown) -> Result<(), PollerError> {
        info!("Starting telemetry poller on {}", self.link.port());

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break Ok(()),
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.wait() => break Ok(()),
                pass = self.poll_once() => {
                    if let Err(e) = pass {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = &result {
            error!("Telemetry poller failed: {}", e);
            shutdown.trigger(ShutdownReason::LinkLost);
        }
        info!(
            "Telemetry poller stopped after {} passes ({} readings, {} unavailable, {} timeouts)",
            self.stats.passes, self.stats.readings, self.stats.unavailable, self.stats.timeouts
        );
        result
    }

    /// Request every subscribed PID once
    pub async fn poll_once(&mut self) -> Result<(), PollerError> {
        if !self.link.is_live() {
            return Err(PollerError::LinkLost("link is no longer live".to_string()));
        }

        for route in self.subscriptions.iter() {
            let pid = route.pid;
            match self.link.request_parameter(pid).await {
                Ok(Some(reading)) => {
                    self.consecutive_timeouts = 0;
                    let value = route.apply(&reading, &self.state);
                    self.stats.readings += 1;
                    metrics::counter!("obd_readings_total", "pid" => pid.name()).increment(1);
                    trace!("{} = {} -> {}", pid, reading.value, value);
                }
                Ok(None) => {
                    self.consecutive_timeouts = 0;
                    self.stats.unavailable += 1;
                    metrics::counter!("obd_readings_unavailable_total", "pid" => pid.name())
                        .increment(1);
                    debug!("{} unavailable, keeping last value", pid);
                }
                Err(ObdError::Timeout(ms)) => {
                    self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);
                    self.stats.timeouts += 1;
                    metrics::counter!("obd_request_timeouts_total").increment(1);
                    warn!(
                        "{} timed out after {}ms ({} in a row)",
                        pid, ms, self.consecutive_timeouts
                    );

                    if self.consecutive_timeouts >= self.config.max_consecutive_timeouts {
                        return Err(PollerError::LinkLost(format!(
                            "{} consecutive request timeouts",
                            self.consecutive_timeouts
                        )));
                    }
                }
                Err(e) if e.is_link_failure() => {
                    return Err(PollerError::LinkLost(e.to_string()));
                }
                Err(e) => {
                    self.consecutive_timeouts = 0;
                    self.stats.unavailable += 1;
                    metrics::counter!("obd_readings_unavailable_total", "pid" => pid.name())
                        .increment(1);
                    debug!("{} reading rejected: {}", pid, e);
                }
            }

            if !self.link.is_live() {
                return Err(PollerError::LinkLost("link is no longer live".to_string()));
            }
        }

        self.stats.passes += 1;
        Ok(())
    }

    /// Close the owned link. Returns `false` if it was already closed.
    pub async fn close(&mut self) -> bool {
        self.link.close().await
    }

    /// The owned link
    pub fn link(&self) -> &LinkConnection {
        &self.link
    }

    /// Counters so far
    pub fn stats(&self) -> PollStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::simulator::{SimHandle, Simulator, SimulatorConfig};
    use obd_protocol::{LinkConfig, Pid};
    use vehicle_state::Snapshot;

    fn link_config() -> LinkConfig {
        LinkConfig {
            port: "sim".to_string(),
            connect_timeout: Duration::from_millis(500),
            settle: Duration::from_millis(1),
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn poller_config() -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(5),
            max_consecutive_timeouts: 3,
        }
    }

    async fn poller(sim: SimulatorConfig) -> (TelemetryPoller, Arc<VehicleState>, SimHandle) {
        let (transport, handle) = Simulator::spawn(sim);
        let link = LinkConnection::establish(transport, &link_config(), &Pid::REQUIRED)
            .await
            .unwrap();
        let subscriptions = Subscriptions::register(&link).unwrap();
        let state = Arc::new(VehicleState::new());
        let poller = TelemetryPoller::new(link, Arc::clone(&state), subscriptions, poller_config());
        (poller, state, handle)
    }

    #[tokio::test]
    async fn test_pass_stores_display_values() {
        let (mut poller, state, _sim) = poller(SimulatorConfig::default()).await;

        poller.poll_once().await.unwrap();

        assert_eq!(
            state.snapshot(),
            Snapshot {
                speed: 62,
                rpm: 3200,
                load: 45,
            }
        );
        assert_eq!(poller.stats().readings, 3);
    }

    #[tokio::test]
    async fn test_unavailable_load_keeps_previous_value() {
        let (mut poller, state, sim) = poller(SimulatorConfig::default()).await;
        poller.poll_once().await.unwrap();
        assert_eq!(state.snapshot().load, 45);

        sim.set_value(Pid::EngineLoad, None);
        sim.set_value(Pid::Speed, Some(50.0));
        poller.poll_once().await.unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.load, 45);
        assert_eq!(snapshot.speed, 31);
        assert_eq!(snapshot.rpm, 3200);
        assert_eq!(poller.stats().unavailable, 1);
        assert_eq!(poller.stats().readings, 5);
    }

    #[tokio::test]
    async fn test_single_timeout_is_routine() {
        let (mut poller, state, sim) = poller(SimulatorConfig::default()).await;
        sim.stall(Pid::Rpm);

        poller.poll_once().await.unwrap();

        assert_eq!(state.snapshot().rpm, 0);
        assert_eq!(state.snapshot().speed, 62);
        assert_eq!(poller.stats().timeouts, 1);
        assert!(poller.link().is_live());
    }

    #[tokio::test]
    async fn test_repeated_timeouts_are_link_lost() {
        let (mut poller, _state, sim) = poller(SimulatorConfig::default()).await;
        let shutdown = Shutdown::new();
        sim.set_silent(true);

        let result = tokio::time::timeout(Duration::from_secs(2), poller.run(&shutdown))
            .await
            .unwrap();

        assert!(matches!(result, Err(PollerError::LinkLost(_))));
        assert_eq!(shutdown.reason(), Some(ShutdownReason::LinkLost));
        assert_eq!(poller.stats().timeouts, 3);
    }

    #[tokio::test]
    async fn test_unplugged_adapter_raises_shutdown() {
        let (mut poller, _state, sim) = poller(SimulatorConfig::default()).await;
        let shutdown = Shutdown::new();
        sim.unplug();

        let result = tokio::time::timeout(Duration::from_secs(2), poller.run(&shutdown))
            .await
            .unwrap();

        assert!(matches!(result, Err(PollerError::LinkLost(_))));
        assert_eq!(shutdown.reason(), Some(ShutdownReason::LinkLost));
        assert!(!poller.link().is_live());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_close_is_idempotent() {
        let (mut poller, state, sim) = poller(SimulatorConfig::default()).await;
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.trigger(ShutdownReason::OperatorQuit);
        });

        tokio::time::timeout(Duration::from_secs(2), poller.run(&shutdown))
            .await
            .unwrap()
            .unwrap();

        assert!(sim.request_count(Pid::Speed) >= 2);
        assert_eq!(state.snapshot().speed, 62);
        assert_eq!(shutdown.reason(), Some(ShutdownReason::OperatorQuit));

        assert!(poller.close().await);
        assert!(!poller.close().await);
    }

    #[tokio::test]
    async fn test_register_requires_live_link() {
        let (transport, _sim) = Simulator::spawn(SimulatorConfig::default());
        let mut link = LinkConnection::establish(transport, &link_config(), &Pid::REQUIRED)
            .await
            .unwrap();
        link.close().await;

        assert!(matches!(
            Subscriptions::register(&link),
            Err(PollerError::NotReady(_))
        ));
    }
}
