//! OBD-II Link to an ELM327 Adapter
//!
//! Opens the serial port, initialises the adapter, discovers supported PIDs
//! and performs bounded single-PID exchanges.

use crate::elm327::{parse_response, BoxedTransport, Elm327, Response};
use crate::error::{ConnectionError, ObdError};
use crate::pid::{Pid, Reading, SupportedPids};
use crate::protocol::ObdProtocol;
use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Default serial device (Bluetooth RFCOMM binding)
pub const DEFAULT_PORT: &str = "/dev/rfcomm99";

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default timeout for the whole connect sequence
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default pause between opening the port and talking to the adapter
const DEFAULT_SETTLE_MS: u64 = 2000;

/// Default timeout for OBD commands
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2000;

/// Link parameters
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub port: String,
    /// Baud rate for serial communication
    pub baud_rate: u32,
    /// Bus protocol the adapter is told to use
    pub protocol: ObdProtocol,
    /// Upper bound for settle, adapter init and discovery
    pub connect_timeout: Duration,
    /// Pause after opening the port
    pub settle: Duration,
    /// Upper bound for one request/response exchange
    pub request_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            protocol: ObdProtocol::Iso15765_4Can11bit500,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

/// Validated link to an OBD-II adapter
pub struct LinkConnection {
    /// Serial port device path
    port: String,
    /// OBD protocol in use
    protocol: ObdProtocol,
    /// Command timeout
    request_timeout: Duration,
    /// PIDs the vehicle advertised during discovery
    supported: SupportedPids,
    /// Adapter channel, `None` once closed
    adapter: Option<Elm327>,
    /// Whether the link is believed to be working
    live: bool,
}

impl LinkConnection {
    /// Open the serial port and validate the adapter.
    ///
    /// Every PID in `required` must be advertised by the vehicle.
    pub async fn connect(config: &LinkConfig, required: &[Pid]) -> Result<Self, ConnectionError> {
        debug!("Opening serial port {} at {} baud", config.port, config.baud_rate);

        let stream = tokio_serial::new(&config.port, config.baud_rate)
            .timeout(config.request_timeout)
            .open_native_async()
            .map_err(|e| ConnectionError::Unreachable {
                port: config.port.clone(),
                detail: e.to_string(),
            })?;

        Self::establish(Box::new(stream), config, required).await
    }

    /// Run the connect sequence over an already-open transport.
    ///
    /// On failure the transport is closed before the error is returned.
    pub async fn establish(
        transport: BoxedTransport,
        config: &LinkConfig,
        required: &[Pid],
    ) -> Result<Self, ConnectionError> {
        let mut link = Self {
            port: config.port.clone(),
            protocol: config.protocol,
            request_timeout: config.request_timeout,
            supported: SupportedPids::default(),
            adapter: Some(Elm327::new(transport)),
            live: false,
        };

        let initialized =
            tokio::time::timeout(config.connect_timeout, link.initialize(config.settle)).await;

        let result = match initialized {
            Ok(Ok(())) => link.validate(required),
            Ok(Err(e)) => Err(ConnectionError::Unreachable {
                port: config.port.clone(),
                detail: e.to_string(),
            }),
            Err(_) => Err(ConnectionError::Timeout(config.connect_timeout)),
        };

        match result {
            Ok(()) => {
                link.live = true;
                info!(
                    "Connection successful: {} supported PIDs via {:?}",
                    link.supported.count(),
                    link.protocol
                );
                Ok(link)
            }
            Err(e) => {
                link.close().await;
                Err(e)
            }
        }
    }

    /// Reset the adapter, select the protocol and discover supported PIDs
    async fn initialize(&mut self, settle: Duration) -> Result<(), ObdError> {
        tokio::time::sleep(settle).await;

        let select_protocol = self.protocol.to_elm_command();
        let adapter = self.adapter.as_mut().ok_or(ObdError::Closed)?;

        let banner = adapter.command("ATZ").await?;
        let banner = banner
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != "ATZ")
            .last()
            .unwrap_or("unknown adapter");
        info!("Adapter identified as {}", banner);

        for command in ["ATE0", "ATL0", "ATH0", select_protocol.as_str()] {
            let response = adapter.command(command).await?;
            if !response.contains("OK") {
                warn!("Adapter answered {:?} to {}", response.trim(), command);
            }
        }

        let response = adapter.command("0100").await?;
        self.supported = match parse_response(&response, "0100", 0x00)? {
            Response::Data(bytes) if bytes.len() >= 4 => {
                SupportedPids::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            _ => SupportedPids::default(),
        };
        debug!("Supported PID bitmap: {:08X}", self.supported.bits());
        Ok(())
    }

    fn validate(&self, required: &[Pid]) -> Result<(), ConnectionError> {
        if self.supported.is_empty() {
            return Err(ConnectionError::NoSupportedParameters {
                port: self.port.clone(),
            });
        }

        let missing = self.supported.missing(required);
        if !missing.is_empty() {
            let missing = missing
                .iter()
                .map(|pid| pid.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConnectionError::MissingParameters { missing });
        }
        Ok(())
    }

    /// Request one PID.
    ///
    /// `Ok(None)` means the vehicle has no value right now. Link-level
    /// failures clear the live flag.
    pub async fn request_parameter(&mut self, pid: Pid) -> Result<Option<Reading>, ObdError> {
        if !self.live {
            return Err(ObdError::Closed);
        }

        let timeout = self.request_timeout;
        let adapter = self.adapter.as_mut().ok_or(ObdError::Closed)?;

        let result = match tokio::time::timeout(timeout, exchange(adapter, pid)).await {
            Ok(result) => result,
            Err(_) => Err(ObdError::Timeout(timeout.as_millis() as u64)),
        };

        if let Err(e) = &result {
            if e.is_link_failure() {
                warn!("OBD link on {} failed: {}", self.port, e);
                self.live = false;
            }
        }
        result
    }

    /// Close the link.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub async fn close(&mut self) -> bool {
        let was_live = std::mem::replace(&mut self.live, false);
        let Some(mut adapter) = self.adapter.take() else {
            return false;
        };

        info!("Closing OBD link on {}", self.port);
        match tokio::time::timeout(self.request_timeout, hang_up(&mut adapter, was_live)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error while closing OBD link: {}", e),
            Err(_) => debug!("Timed out closing OBD link"),
        }
        true
    }

    /// Check if the link is live
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Check if the link has been closed
    pub fn is_closed(&self) -> bool {
        self.adapter.is_none()
    }

    /// PIDs advertised by the vehicle
    pub fn supported(&self) -> SupportedPids {
        self.supported
    }

    /// Serial port device path
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Get current protocol
    pub fn protocol(&self) -> ObdProtocol {
        self.protocol
    }

    /// Set command timeout
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }
}

/// One request plus every response up to the one that answers it
async fn exchange(adapter: &mut Elm327, pid: Pid) -> Result<Option<Reading>, ObdError> {
    let command = pid.command();
    adapter.send(&command).await?;
    loop {
        let text = adapter.read_response().await?;
        match parse_response(&text, &command, pid.as_hex())? {
            Response::Data(bytes) => {
                return Reading::decode(pid, bytes, timestamp_ms())
                    .map(Some)
                    .ok_or_else(|| ObdError::InvalidResponse(format!("short payload for {}", pid)));
            }
            Response::NoData => return Ok(None),
            Response::Stale => debug!("Discarding stale response while waiting for {}", pid),
        }
    }
}

async fn hang_up(adapter: &mut Elm327, reset: bool) -> Result<(), ObdError> {
    if reset {
        // Leave the adapter in its power-on state for the next client
        adapter.send("ATZ").await?;
    }
    adapter.shutdown().await
}

fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectFailure;
    use crate::simulator::{Simulator, SimulatorConfig};
    use std::time::Instant;

    fn test_config() -> LinkConfig {
        LinkConfig {
            port: "sim".to_string(),
            connect_timeout: Duration::from_millis(500),
            settle: Duration::from_millis(1),
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    async fn connected(config: SimulatorConfig) -> (LinkConnection, crate::simulator::SimHandle) {
        let (transport, handle) = Simulator::spawn(config);
        let link = LinkConnection::establish(transport, &test_config(), &Pid::REQUIRED)
            .await
            .unwrap();
        (link, handle)
    }

    #[tokio::test]
    async fn test_establish_with_simulator() {
        let (link, _sim) = connected(SimulatorConfig::default()).await;
        assert!(link.is_live());
        assert!(!link.is_closed());
        assert!(link.supported().contains_all(&Pid::REQUIRED));
        assert_eq!(link.protocol(), ObdProtocol::Iso15765_4Can11bit500);
    }

    #[tokio::test]
    async fn test_zero_supported_is_unsupported_and_closed() {
        let (transport, sim) = Simulator::spawn(SimulatorConfig {
            supported: Vec::new(),
            ..Default::default()
        });
        let err = LinkConnection::establish(transport, &test_config(), &Pid::REQUIRED)
            .await
            .err()
            .unwrap();
        assert_eq!(err.reason(), ConnectFailure::Unsupported);
        assert!(matches!(err, ConnectionError::NoSupportedParameters { .. }));

        // The adapter sees the port hang up: nothing is left open
        tokio::time::timeout(Duration::from_secs(1), sim.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_required_is_unsupported() {
        let (transport, _sim) = Simulator::spawn(SimulatorConfig {
            supported: vec![Pid::Speed, Pid::Rpm],
            ..Default::default()
        });
        let err = LinkConnection::establish(transport, &test_config(), &Pid::REQUIRED)
            .await
            .err()
            .unwrap();
        assert_eq!(err.reason(), ConnectFailure::Unsupported);
        assert!(err.to_string().contains("engine_load"));
    }

    #[tokio::test]
    async fn test_silent_adapter_times_out() {
        let (transport, sim) = Simulator::spawn(SimulatorConfig::default());
        sim.set_silent(true);

        let config = test_config();
        let started = Instant::now();
        let err = LinkConnection::establish(transport, &config, &Pid::REQUIRED)
            .await
            .err()
            .unwrap();

        assert_eq!(err.reason(), ConnectFailure::Timeout);
        // Close after expiry is itself bounded by the request timeout
        assert!(started.elapsed() < config.connect_timeout + config.request_timeout * 2);
    }

    #[tokio::test]
    async fn test_unreachable_port() {
        let config = LinkConfig {
            port: "/dev/obd-dashboard-no-such-port".to_string(),
            ..test_config()
        };
        let started = Instant::now();
        let err = LinkConnection::connect(&config, &Pid::REQUIRED)
            .await
            .err()
            .unwrap();
        assert_eq!(err.reason(), ConnectFailure::Unreachable);
        assert!(started.elapsed() <= config.connect_timeout);
    }

    #[tokio::test]
    async fn test_request_decodes_reading() {
        let (mut link, _sim) = connected(SimulatorConfig::default()).await;

        let speed = link.request_parameter(Pid::Speed).await.unwrap().unwrap();
        assert_eq!(speed.pid, Pid::Speed);
        assert!((speed.value - 100.0).abs() < 0.01);

        let rpm = link.request_parameter(Pid::Rpm).await.unwrap().unwrap();
        assert!((rpm.value - 3200.75).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_no_data_is_none() {
        let (mut link, sim) = connected(SimulatorConfig::default()).await;
        sim.set_value(Pid::EngineLoad, None);

        assert!(link.request_parameter(Pid::EngineLoad).await.unwrap().is_none());
        assert!(link.is_live());
    }

    #[tokio::test]
    async fn test_stalled_request_times_out_without_killing_link() {
        let (mut link, sim) = connected(SimulatorConfig::default()).await;
        sim.stall(Pid::Rpm);

        let result = link.request_parameter(Pid::Rpm).await;
        assert!(matches!(result, Err(ObdError::Timeout(200))));
        assert!(link.is_live());
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let (mut link, sim) = connected(SimulatorConfig::default()).await;
        sim.set_latency(Pid::Speed, Duration::from_millis(150));
        link.set_request_timeout(Duration::from_millis(50));

        assert!(matches!(
            link.request_parameter(Pid::Speed).await,
            Err(ObdError::Timeout(_))
        ));

        link.set_request_timeout(Duration::from_secs(1));
        let rpm = link.request_parameter(Pid::Rpm).await.unwrap().unwrap();
        assert_eq!(rpm.pid, Pid::Rpm);
    }

    #[tokio::test]
    async fn test_unplugged_adapter_is_not_live() {
        let (mut link, sim) = connected(SimulatorConfig::default()).await;
        sim.unplug();

        let err = link.request_parameter(Pid::Speed).await.err().unwrap();
        assert!(err.is_link_failure());
        assert!(!link.is_live());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut link, _sim) = connected(SimulatorConfig::default()).await;

        assert!(link.close().await);
        assert!(!link.close().await);
        assert!(!link.is_live());
        assert!(link.is_closed());
        assert!(matches!(
            link.request_parameter(Pid::Speed).await,
            Err(ObdError::Closed)
        ));
    }
}
