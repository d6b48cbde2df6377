//! In-Memory ELM327 Simulator
//!
//! Answers the adapter command set over a `tokio::io::duplex` pipe so the
//! link, the poller and the dashboard can run without hardware.

use crate::elm327::BoxedTransport;
use crate::pid::{Pid, SupportedPids};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{watch, Notify};
use tracing::debug;

/// Pipe buffer size
const PIPE_CAPACITY: usize = 1024;

/// Initial simulator setup
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// PIDs advertised in the `0100` bitmap
    pub supported: Vec<Pid>,
    /// Vehicle speed in km/h, `None` answers `NO DATA`
    pub speed_kph: Option<f64>,
    /// Engine RPM, `None` answers `NO DATA`
    pub rpm: Option<f64>,
    /// Engine load in percent, `None` answers `NO DATA`
    pub load_pct: Option<f64>,
    /// Add pseudo-random variation to every answer
    pub wander: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            supported: Pid::REQUIRED.to_vec(),
            speed_kph: Some(100.0),
            rpm: Some(3200.75),
            load_pct: Some(45.0),
            wander: false,
        }
    }
}

impl SimulatorConfig {
    /// Moving vehicle for demos
    pub fn demo() -> Self {
        Self {
            speed_kph: Some(60.0),
            rpm: Some(2200.0),
            load_pct: Some(35.0),
            wander: true,
            ..Default::default()
        }
    }
}

struct SimState {
    supported: SupportedPids,
    values: HashMap<Pid, Option<f64>>,
    stalled: HashSet<Pid>,
    latency: HashMap<Pid, Duration>,
    requests: HashMap<Pid, usize>,
    silent: bool,
    wander: bool,
    echo: bool,
    tick: u64,
}

/// Control handle for a running simulator
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
    unplug: Arc<Notify>,
    closed: watch::Receiver<bool>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the value answered for a PID (`None` answers `NO DATA`)
    pub fn set_value(&self, pid: Pid, value: Option<f64>) {
        self.lock().values.insert(pid, value);
    }

    /// Stop answering requests for a PID
    pub fn stall(&self, pid: Pid) {
        self.lock().stalled.insert(pid);
    }

    /// Delay every answer for a PID
    pub fn set_latency(&self, pid: Pid, latency: Duration) {
        self.lock().latency.insert(pid, latency);
    }

    /// Ignore every command, including AT commands
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Number of requests received for a PID
    pub fn request_count(&self, pid: Pid) -> usize {
        self.lock().requests.get(&pid).copied().unwrap_or(0)
    }

    /// Drop the adapter end of the pipe, as if the adapter lost power
    pub fn unplug(&self) {
        self.unplug.notify_one();
    }

    /// Wait until the pipe is gone (client hung up or adapter unplugged)
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // Sender dropped also means the simulator task is gone
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn respond(&self, command: &str) -> Option<(String, Duration)> {
        let mut state = self.lock();
        if state.silent {
            return None;
        }
        state.tick = state.tick.wrapping_add(1);
        let echo = state.echo;

        let mut latency = Duration::ZERO;
        let body = match command {
            "ATZ" => {
                state.echo = true;
                "\rELM327 v1.5".to_string()
            }
            "ATE0" => {
                state.echo = false;
                "OK".to_string()
            }
            "ATE1" => {
                state.echo = true;
                "OK".to_string()
            }
            cmd if cmd.starts_with("AT") => "OK".to_string(),
            "0100" if state.supported.is_empty() => "UNABLE TO CONNECT".to_string(),
            "0100" => format!("41 00 {}", hex_bytes(&state.supported.to_bytes())),
            cmd if cmd.len() == 4 && cmd.starts_with("01") => {
                let Some(pid) = u8::from_str_radix(&cmd[2..], 16).ok().and_then(Pid::from_hex)
                else {
                    return Some((reply(echo, command, "NO DATA"), latency));
                };
                if state.stalled.contains(&pid) {
                    return None;
                }
                *state.requests.entry(pid).or_insert(0) += 1;
                latency = state.latency.get(&pid).copied().unwrap_or_default();

                match state.values.get(&pid).copied().flatten() {
                    Some(value) => {
                        let value = if state.wander {
                            wander(pid, value, state.tick)
                        } else {
                            value
                        };
                        format!("41 {:02X} {}", pid.as_hex(), hex_bytes(&encode(pid, value)))
                    }
                    None => "NO DATA".to_string(),
                }
            }
            _ => "?".to_string(),
        };

        Some((reply(echo, command, &body), latency))
    }
}

fn reply(echo: bool, command: &str, body: &str) -> String {
    if echo {
        format!("{}\r{}\r\r>", command, body)
    } else {
        format!("{}\r\r>", body)
    }
}

/// Simulated ELM327 adapter
pub struct Simulator;

impl Simulator {
    /// Start a simulator task and return the client end of its pipe
    pub fn spawn(config: SimulatorConfig) -> (BoxedTransport, SimHandle) {
        let (client, adapter) = tokio::io::duplex(PIPE_CAPACITY);
        let (closed_tx, closed_rx) = watch::channel(false);

        let values = HashMap::from([
            (Pid::Speed, config.speed_kph),
            (Pid::Rpm, config.rpm),
            (Pid::EngineLoad, config.load_pct),
        ]);
        let handle = SimHandle {
            state: Arc::new(Mutex::new(SimState {
                supported: SupportedPids::from_pids(&config.supported),
                values,
                stalled: HashSet::new(),
                latency: HashMap::new(),
                requests: HashMap::new(),
                silent: false,
                wander: config.wander,
                echo: true,
                tick: 0,
            })),
            unplug: Arc::new(Notify::new()),
            closed: closed_rx,
        };

        let task_handle = handle.clone();
        tokio::spawn(async move {
            serve(adapter, &task_handle).await;
            let _ = closed_tx.send(true);
        });

        (Box::new(client), handle)
    }
}

async fn serve(mut stream: DuplexStream, handle: &SimHandle) {
    let mut line = Vec::new();
    let mut buf = [0u8; 64];

    loop {
        let n = tokio::select! {
            biased;
            _ = handle.unplug.notified() => {
                debug!("Simulated adapter unplugged");
                return;
            }
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
        };

        for &byte in &buf[..n] {
            if byte != b'\r' {
                if byte != b'\n' {
                    line.push(byte);
                }
                continue;
            }

            let command = String::from_utf8_lossy(&line).trim().to_uppercase();
            line.clear();
            if command.is_empty() {
                continue;
            }

            let Some((reply, latency)) = handle.respond(&command) else {
                continue;
            };
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if stream.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

/// Encode a value the way the vehicle ECU would
fn encode(pid: Pid, value: f64) -> Vec<u8> {
    match pid {
        Pid::EngineLoad => vec![(value * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8],
        Pid::Rpm => {
            let encoded = (value * 4.0).round().clamp(0.0, 65535.0) as u16;
            encoded.to_be_bytes().to_vec()
        }
        Pid::Speed => vec![value.round().clamp(0.0, 255.0) as u8],
    }
}

/// Pseudo-random but deterministic variation around `value`
fn wander(pid: Pid, value: f64, tick: u64) -> f64 {
    let mut hasher = DefaultHasher::new();
    tick.hash(&mut hasher);
    pid.hash(&mut hasher);
    let unit = (hasher.finish() % 1000) as f64 / 1000.0 - 0.5;

    let spread = match pid {
        Pid::EngineLoad => 10.0,
        Pid::Rpm => 400.0,
        Pid::Speed => 8.0,
    };
    (value + unit * spread).max(0.0)
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid::Reading;

    #[test]
    fn test_encode_matches_decode() {
        let bytes = encode(Pid::Rpm, 3200.75);
        let reading = Reading::decode(Pid::Rpm, bytes, 0).unwrap();
        assert!((reading.value - 3200.75).abs() < 0.01);

        let bytes = encode(Pid::EngineLoad, 45.0);
        let reading = Reading::decode(Pid::EngineLoad, bytes, 0).unwrap();
        assert_eq!(reading.value as u32, 45);
    }

    #[test]
    fn test_wander_stays_near_value() {
        for tick in 0..100 {
            let speed = wander(Pid::Speed, 60.0, tick);
            assert!((56.0..=64.0).contains(&speed));
        }
        assert!(wander(Pid::Speed, 0.0, 3) >= 0.0);
    }

    #[tokio::test]
    async fn test_answers_with_echo_until_disabled() {
        let (mut client, _sim) = Simulator::spawn(SimulatorConfig::default());

        client.write_all(b"ATZ\r").await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(text.starts_with("ATZ\r"));
        assert!(text.contains("ELM327"));
        assert!(text.ends_with('>'));

        client.write_all(b"ATE0\r").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("ATE0\rOK"));

        client.write_all(b"010D\r").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&buf[..n]), "41 0D 64\r\r>");
    }

    #[tokio::test]
    async fn test_counts_requests_and_reports_no_data() {
        let (mut client, sim) = Simulator::spawn(SimulatorConfig {
            load_pct: None,
            ..Default::default()
        });

        client.write_all(b"ATE0\r").await.unwrap();
        let mut buf = vec![0u8; 64];
        client.read(&mut buf).await.unwrap();

        client.write_all(b"0104\r").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&buf[..n]), "NO DATA\r\r>");
        assert_eq!(sim.request_count(Pid::EngineLoad), 1);
        assert_eq!(sim.request_count(Pid::Speed), 0);
    }

    #[tokio::test]
    async fn test_unplug_closes_pipe() {
        let (mut client, sim) = Simulator::spawn(SimulatorConfig::default());
        sim.unplug();
        sim.closed().await;

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
