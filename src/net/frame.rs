use std::time::Duration;

use crate::error::ClientError;

use super::transport::{DEFAULT_READ_SIZE, Transport};

/// Every message on the wire ends with a single NUL byte
pub const TERMINATOR: u8 = 0;

/// Encode a command for the wire, appending the terminator.
pub fn encode(command: &str) -> Result<Vec<u8>, ClientError> {
    if command.as_bytes().contains(&TERMINATOR) {
        return Err(ClientError::InvalidCommand(format!(
            "embedded NUL in {:?}",
            command
        )));
    }

    let mut bytes = Vec::with_capacity(command.len() + 1);
    bytes.extend_from_slice(command.as_bytes());
    bytes.push(TERMINATOR);
    Ok(bytes)
}

/// One inbound message split into its leading verb and the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    verb: String,
    payload: String,
}

impl Frame {
    /// Parse the bytes of a single message, without its terminator.
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

        match text.split_once(char::is_whitespace) {
            Some((verb, payload)) => Self {
                verb: verb.to_string(),
                payload: payload.trim().to_string(),
            },
            None => Self {
                verb: text.to_string(),
                payload: String::new(),
            },
        }
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn is(&self, verb: &str) -> bool {
        self.verb == verb
    }

    /// The whole message as received, trimmed.
    pub fn text(&self) -> String {
        if self.payload.is_empty() {
            self.verb.clone()
        } else {
            format!("{} {}", self.verb, self.payload)
        }
    }
}

/// Reassembles NUL-terminated frames from arbitrary read boundaries.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next complete frame, waiting at most `timeout` for it.
    pub async fn next_frame<T: Transport>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<Frame, ClientError> {
        match tokio::time::timeout(timeout, self.fill(transport)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                operation,
                after: timeout,
            }),
        }
    }

    async fn fill<T: Transport>(&mut self, transport: &mut T) -> Result<Frame, ClientError> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(frame);
            }

            let chunk = transport.receive(DEFAULT_READ_SIZE).await?;
            if chunk.is_empty() {
                // Peer closed; an unterminated tail is still a message
                if self.buf.is_empty() {
                    return Err(ClientError::ConnectionClosed);
                }
                let rest = std::mem::take(&mut self.buf);
                return Ok(Frame::parse(&rest));
            }
            self.buf.extend_from_slice(&chunk);
        }
    }

    fn take_frame(&mut self) -> Option<Frame> {
        let end = self.buf.iter().position(|&b| b == TERMINATOR)?;
        let frame = Frame::parse(&self.buf[..end]);
        self.buf.drain(..=end);
        Some(frame)
    }

    /// Bytes received but not yet consumed as a frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
