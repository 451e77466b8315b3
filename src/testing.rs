//! In-memory transports for exercising the protocol without sockets.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ClientError;
use crate::instrument::{Mode, Role, RoleKey, StaticDirectory};
use crate::net::{Connector, Endpoint, TERMINATOR, Transport};

/// Split raw sent bytes into the commands they carry
pub fn sent_frames(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == TERMINATOR)
        .filter(|f| !f.is_empty())
        .map(|f| String::from_utf8_lossy(f).to_string())
        .collect()
}

/// Replays fixed chunks and records everything written to it
pub struct ScriptedTransport {
    chunks: VecDeque<(Duration, Vec<u8>)>,
    hang_when_empty: bool,
    sent: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl ScriptedTransport {
    /// Reports the peer as closed once the chunks run out
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().map(|c| (Duration::ZERO, c)).collect(),
            hang_when_empty: false,
            sent: Arc::default(),
            closed: Arc::default(),
        }
    }

    /// Never delivers anything
    pub fn silent() -> Self {
        Self {
            chunks: VecDeque::new(),
            hang_when_empty: true,
            sent: Arc::default(),
            closed: Arc::default(),
        }
    }
}

impl Transport for ScriptedTransport {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.sent.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    async fn receive(&mut self, _max_bytes: usize) -> io::Result<Vec<u8>> {
        match self.chunks.pop_front() {
            Some((delay, chunk)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(chunk)
            }
            None if self.hang_when_empty => std::future::pending().await,
            None => Ok(Vec::new()),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Hands out one scripted transport; the script is whole frames.
pub struct ScriptedConnector {
    script: Mutex<Option<Vec<(Duration, Vec<u8>)>>>,
    sent: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl ScriptedConnector {
    pub fn frames(frames: &[&str]) -> Self {
        let timed: Vec<_> = frames.iter().map(|f| (*f, Duration::ZERO)).collect();
        Self::timed(&timed)
    }

    /// Each frame is delivered only after its delay
    pub fn timed(frames: &[(&str, Duration)]) -> Self {
        let script = frames
            .iter()
            .map(|(f, delay)| (*delay, frame(f)))
            .collect();
        Self {
            script: Mutex::new(Some(script)),
            sent: Arc::default(),
            closed: Arc::default(),
        }
    }

    pub fn sent(&self) -> Vec<u8> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(&self, _endpoint: &Endpoint) -> Result<ScriptedTransport, ClientError> {
        let chunks = self.script.lock().unwrap().take().unwrap_or_default();
        Ok(ScriptedTransport {
            chunks: chunks.into(),
            hang_when_empty: true,
            sent: self.sent.clone(),
            closed: self.closed.clone(),
        })
    }
}

/// Simulated telescope, camera and sync services sharing one state.
///
/// After `TELSTART` the telescope reports `MOVING` for `slew_polls`
/// status queries, then `IDLE`. With `stuck_slew` it never stops.
/// Telescope polls whose index after `TELSTART` is in `dropped_slew_polls`
/// get no reply. With `busy_on_claim` the camera starts exposing as soon
/// as a control connection is opened.
#[derive(Clone, Default)]
pub struct FakeObservatory {
    state: Arc<Mutex<ObservatoryState>>,
}

#[derive(Default)]
pub struct ObservatoryState {
    pub telescope: String,
    pub ccd: String,
    pub slew_polls: usize,
    pub stuck_slew: bool,
    pub remaining_slew: Option<usize>,
    pub full: HashSet<RoleKey>,
    pub unreachable: HashSet<RoleKey>,
    pub rejected: HashSet<String>,
    pub values: HashMap<String, String>,
    pub commands: Vec<(RoleKey, String)>,
    pub opened: Vec<RoleKey>,
    pub closed: Vec<RoleKey>,
    pub telescope_polls_after_slew: usize,
    pub dropped_slew_polls: HashSet<usize>,
    pub busy_on_claim: bool,
}

const PORTS: [(Role, Mode, u16); 6] = [
    (Role::Telescope, Mode::Status, 7001),
    (Role::Telescope, Mode::Control, 7002),
    (Role::Ccd, Mode::Status, 7003),
    (Role::Ccd, Mode::Control, 7004),
    (Role::Sync, Mode::Status, 7005),
    (Role::Sync, Mode::Control, 7006),
];

impl FakeObservatory {
    pub const SERVER: &'static str = "fake";

    pub fn idle() -> Self {
        let obs = Self::default();
        {
            let mut state = obs.state.lock().unwrap();
            state.telescope = "IDLE".to_string();
            state.ccd = "IDLE".to_string();
            state.slew_polls = 2;
        }
        obs
    }

    pub fn directory() -> StaticDirectory {
        let mut directory = StaticDirectory::new();
        for (role, mode, port) in PORTS {
            directory.insert(
                Self::SERVER,
                &RoleKey::new(role, mode).to_string(),
                Endpoint::new(Self::SERVER, port),
            );
        }
        directory
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ObservatoryState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Commands received by one role, in order
    pub fn commands(&self, role: Role) -> Vec<String> {
        self.with(|s| {
            s.commands
                .iter()
                .filter(|(key, _)| key.role == role)
                .map(|(_, cmd)| cmd.clone())
                .collect()
        })
    }

    pub fn opened(&self) -> Vec<RoleKey> {
        self.with(|s| s.opened.clone())
    }

    /// Connections opened but never closed
    pub fn leaked(&self) -> usize {
        self.with(|s| s.opened.len().saturating_sub(s.closed.len()))
    }

    fn key_for(endpoint: &Endpoint) -> Option<RoleKey> {
        PORTS
            .iter()
            .find(|(_, _, port)| *port == endpoint.port)
            .map(|(role, mode, _)| RoleKey::new(*role, *mode))
    }
}

impl ObservatoryState {
    fn answer(&mut self, key: RoleKey, command: &str) -> Option<String> {
        self.commands.push((key, command.to_string()));

        let mut parts = command.splitn(3, ' ');
        let verb = parts.next().unwrap_or_default();
        let property = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();

        match verb {
            "IDENT" => Some("OK".to_string()),
            "QUIT" => None,
            "STATUS" => self.status(key.role, property),
            "SETSTATUS" => Some(self.set(property, value)),
            "NOTIFY" => Some("OK".to_string()),
            _ => Some("ERROR".to_string()),
        }
    }

    fn status(&mut self, role: Role, property: &str) -> Option<String> {
        let reply = match (role, property) {
            (Role::Telescope, "TEL") => {
                if self.remaining_slew.is_some() {
                    let poll = self.telescope_polls_after_slew;
                    self.telescope_polls_after_slew += 1;
                    if self.dropped_slew_polls.contains(&poll) {
                        return None;
                    }
                }
                match self.remaining_slew {
                    Some(0) => {
                        self.remaining_slew = None;
                        self.telescope = "IDLE".to_string();
                    }
                    Some(n) if !self.stuck_slew => self.remaining_slew = Some(n - 1),
                    _ => {}
                }
                format!("STATUS {}", self.telescope)
            }
            (Role::Ccd, "CCD") => format!("STATUS {}", self.ccd),
            (_, property) => match self.values.get(property) {
                Some(value) => format!("STATUS {}", value),
                None => "ERROR".to_string(),
            },
        };
        Some(reply)
    }

    fn set(&mut self, property: &str, value: &str) -> String {
        if self.rejected.contains(property) {
            return "ERROR".to_string();
        }

        match property {
            "TELSTART" => {
                self.telescope = "MOVING".to_string();
                self.remaining_slew = Some(self.slew_polls);
            }
            "CAMSTART" => self.ccd = "EXPOSING".to_string(),
            _ => {}
        }
        self.values.insert(property.to_string(), value.to_string());
        "OK".to_string()
    }
}

pub struct FakeTransport {
    key: RoleKey,
    state: Arc<Mutex<ObservatoryState>>,
    outbound: VecDeque<Vec<u8>>,
}

fn frame(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(TERMINATOR);
    bytes
}

impl Transport for FakeTransport {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        for command in sent_frames(bytes) {
            if let Some(reply) = state.answer(self.key, &command) {
                self.outbound.push_back(frame(&reply));
            }
        }
        Ok(())
    }

    async fn receive(&mut self, _max_bytes: usize) -> io::Result<Vec<u8>> {
        match self.outbound.pop_front() {
            Some(chunk) => Ok(chunk),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().closed.push(self.key);
        Ok(())
    }
}

impl Connector for FakeObservatory {
    type Transport = FakeTransport;

    async fn connect(&self, endpoint: &Endpoint) -> Result<FakeTransport, ClientError> {
        let Some(key) = Self::key_for(endpoint) else {
            return Err(ClientError::Connect {
                endpoint: endpoint.clone(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            });
        };

        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(&key) {
            return Err(ClientError::Connect {
                endpoint: endpoint.clone(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            });
        }
        state.opened.push(key);
        if state.busy_on_claim && key.mode == Mode::Control {
            state.ccd = "EXPOSING".to_string();
        }

        let greeting = if state.full.contains(&key) {
            "SERVER_FULL"
        } else {
            "HELLO"
        };

        Ok(FakeTransport {
            key,
            state: self.state.clone(),
            outbound: VecDeque::from([frame(greeting)]),
        })
    }
}
