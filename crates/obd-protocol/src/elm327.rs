//! ELM327 Command/Response Exchange
//!
//! The adapter speaks a line protocol: commands end with `\r`, responses end
//! with a `>` prompt. Data frames are hex bytes, optionally space separated.

use crate::error::ObdError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Prompt byte the adapter prints when it is ready for the next command
const PROMPT: u8 = b'>';

/// Mode 01 positive response marker
const MODE_01_RESPONSE: u8 = 0x41;

/// Adapter lines meaning "no value right now" rather than a broken link
const UNAVAILABLE_MARKERS: [&str; 5] = [
    "NO DATA",
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS INIT",
    "STOPPED",
];

/// Byte stream an adapter can be reached over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Type-erased transport (serial port, simulator pipe)
pub type BoxedTransport = Box<dyn Transport>;

/// Classified answer to a mode 01 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Response {
    /// Data bytes following the `41 <pid>` header
    Data(Vec<u8>),
    /// Adapter reported the value as unavailable
    NoData,
    /// Answer belongs to an earlier request
    Stale,
}

/// Framed command channel to an ELM327
pub(crate) struct Elm327 {
    transport: BoxedTransport,
    pending: Vec<u8>,
}

impl Elm327 {
    pub fn new(transport: BoxedTransport) -> Self {
        Self {
            transport,
            pending: Vec::with_capacity(64),
        }
    }

    /// Send one command line
    pub async fn send(&mut self, command: &str) -> Result<(), ObdError> {
        debug!(">> {}", command);
        self.transport.write_all(command.as_bytes()).await?;
        self.transport.write_all(b"\r").await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Read until the next prompt and return the text before it
    pub async fn read_response(&mut self) -> Result<String, ObdError> {
        let mut buf = [0u8; 256];
        loop {
            if let Some(pos) = self.pending.iter().position(|b| *b == PROMPT) {
                let frame: Vec<u8> = self.pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&frame[..pos]).replace('\0', "");
                debug!("<< {:?}", text.trim());
                return Ok(text);
            }

            let n = self.transport.read(&mut buf).await?;
            if n == 0 {
                return Err(ObdError::Disconnected);
            }
            self.pending.extend_from_slice(&buf[..n]);
        }
    }

    /// Send a command and wait for its response
    pub async fn command(&mut self, command: &str) -> Result<String, ObdError> {
        self.send(command).await?;
        self.read_response().await
    }

    /// Shut down the write half of the transport
    pub async fn shutdown(&mut self) -> Result<(), ObdError> {
        self.pending.clear();
        self.transport.shutdown().await?;
        Ok(())
    }
}

/// Classify the response to a mode 01 request for `code`.
///
/// Echoed commands and `SEARCHING...` lines are skipped. A frame for a
/// different PID marks the response as stale.
pub(crate) fn parse_response(text: &str, command: &str, code: u8) -> Result<Response, ObdError> {
    let mut saw_other_frame = false;
    let mut unknown = Vec::new();

    for line in text.split(['\r', '\n']).map(str::trim) {
        if line.is_empty() || line.eq_ignore_ascii_case(command) || line.starts_with("SEARCHING") {
            continue;
        }
        // Status lines carry no PID, so a late one from a timed-out request
        // answers this request. The field keeps its previous value for one pass.
        if UNAVAILABLE_MARKERS.iter().any(|marker| line.starts_with(marker)) {
            debug!("Adapter reports {:?} for {}", line, command);
            return Ok(Response::NoData);
        }
        if line == "?" {
            return Err(ObdError::InvalidResponse(format!("adapter rejected {}", command)));
        }
        match decode_hex(line) {
            Some(bytes) if bytes.len() >= 2 && bytes[0] == MODE_01_RESPONSE => {
                if bytes[1] == code {
                    return Ok(Response::Data(bytes[2..].to_vec()));
                }
                saw_other_frame = true;
            }
            _ if line == "OK" => saw_other_frame = true,
            _ => unknown.push(line),
        }
    }

    if unknown.is_empty() || saw_other_frame {
        Ok(Response::Stale)
    } else {
        Err(ObdError::InvalidResponse(unknown.join(" ")))
    }
}

/// Decode a line of hex digits, ignoring spaces
pub(crate) fn decode_hex(line: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = line.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}
