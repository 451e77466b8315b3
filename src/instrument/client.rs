use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ClientError;
use crate::net::{Connector, Endpoint, Frame, FrameReader, Transport, encode};

use super::role::{Role, is_busy_state};

/// Receives human-readable progress lines when a client is verbose
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

const HANDSHAKE: &str = "IDENT INSTRUMENT";

/// Result of a status exchange that reached the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(String),
    Error,
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error)
    }

    fn from_frame(frame: &Frame) -> Self {
        if frame.is("ERROR") {
            Reply::Error
        } else {
            Reply::Value(frame.text())
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Value(v) => f.write_str(v),
            Reply::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Handshaking,
    Ready,
}

#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    /// Bound on every request/reply exchange
    pub read: Duration,
    /// Bound on waiting for a pushed notification
    pub notify: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(10),
            notify: Duration::from_secs(300),
        }
    }
}

struct Connection<T> {
    transport: T,
    reader: FrameReader,
}

impl<T: Transport> Connection<T> {
    async fn send(&mut self, command: &str) -> Result<(), ClientError> {
        let bytes = encode(command)?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    async fn recv(
        &mut self,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<Frame, ClientError> {
        self.reader
            .next_frame(&mut self.transport, timeout, operation)
            .await
    }

    async fn handshake(&mut self, timeout: Duration) -> Result<(), ClientError> {
        let greeting = self.recv(timeout, "greeting").await?;
        if greeting.is("SERVER_FULL") {
            return Err(ClientError::ServerFull);
        }

        self.send(HANDSHAKE).await?;
        let reply = self.recv(timeout, "handshake").await?;
        if reply.is("ERROR") {
            return Err(ClientError::HandshakeRejected);
        }
        Ok(())
    }
}

/// Protocol client for one instrument role.
///
/// A client owns at most one connection. Every exchange is a single
/// command followed by its reply, so methods take `&mut self`.
pub struct ServiceClient<T: Transport> {
    role: Role,
    endpoint: Endpoint,
    timeouts: ClientTimeouts,
    state: ClientState,
    connection: Option<Connection<T>>,
    progress: Option<ProgressSink>,
}

impl<T: Transport> ServiceClient<T> {
    pub fn new(role: Role, endpoint: Endpoint, timeouts: ClientTimeouts) -> Self {
        Self {
            role,
            endpoint,
            timeouts,
            state: ClientState::Disconnected,
            connection: None,
            progress: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Ready
    }

    /// Attach or detach a progress sink
    pub fn set_verbose(&mut self, sink: Option<ProgressSink>) {
        self.progress = sink;
    }

    /// Open the transport and perform the IDENT handshake.
    pub async fn connect<C>(&mut self, connector: &C) -> Result<(), ClientError>
    where
        C: Connector<Transport = T>,
    {
        if self.connection.is_some() {
            self.disconnect().await;
        }

        let transport = connector.connect(&self.endpoint).await?;
        let mut connection = Connection {
            transport,
            reader: FrameReader::new(),
        };

        self.state = ClientState::Handshaking;
        match connection.handshake(self.timeouts.read).await {
            Ok(()) => {
                debug!("{} ready at {}", self.role, self.endpoint);
                self.connection = Some(connection);
                self.state = ClientState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!("{} handshake with {} failed: {}", self.role, self.endpoint, e);
                if let Err(close_err) = connection.transport.close().await {
                    debug!("Close after failed handshake: {}", close_err);
                }
                self.state = ClientState::Disconnected;
                Err(e)
            }
        }
    }

    /// Read one property. `ERROR` from the server is a `Reply::Error`.
    pub async fn get_status(&mut self, property: &str) -> Result<Reply, ClientError> {
        let command = format!("STATUS {}", property);
        let frame = self
            .exchange(property, &command, self.timeouts.read, "status")
            .await?;

        let reply = if frame.is("ERROR") {
            Reply::Error
        } else if frame.is("STATUS") {
            Reply::Value(frame.payload().to_string())
        } else {
            return Err(ClientError::Protocol(frame.text()));
        };

        self.report(&format!("Reading {} ... {}", property, reply));
        Ok(reply)
    }

    /// Write one property. Any reply other than `ERROR` is an acknowledgement.
    pub async fn set_status(&mut self, property: &str, value: &str) -> Result<Reply, ClientError> {
        let command = format!("SETSTATUS {} {}", property, value);
        let frame = self
            .exchange(property, &command, self.timeouts.read, "setstatus")
            .await?;
        let reply = Reply::from_frame(&frame);

        self.report(&format!("Setting {} = {} ... {}", property, value, reply));
        Ok(reply)
    }

    /// Subscribe to `property` and wait for the next pushed change.
    pub async fn notify(&mut self, property: &str) -> Result<Reply, ClientError> {
        let command = format!("NOTIFY {}", property);
        let ack = self
            .exchange(property, &command, self.timeouts.read, "notify ack")
            .await?;
        if ack.is("ERROR") {
            return Ok(Reply::Error);
        }

        let pushed = self.await_reply(self.timeouts.notify, "notify").await?;
        if !pushed.is("NOTIFY") {
            return Err(ClientError::Protocol(pushed.text()));
        }

        // NOTIFY <property> <value>
        let value = match pushed.payload().split_once(char::is_whitespace) {
            Some((_, value)) => value.trim().to_string(),
            None => String::new(),
        };
        let reply = Reply::Value(value);

        self.report(&format!("Notified {} ... {}", property, reply));
        Ok(reply)
    }

    /// Whether the role reports anything other than an idle state.
    ///
    /// Unreadable states count as busy; only a missing connection is an error.
    pub async fn is_busy(&mut self) -> Result<bool, ClientError> {
        let name = self.role.name();
        match self.get_status(name).await {
            Ok(Reply::Value(value)) => Ok(is_busy_state(&value)),
            Ok(Reply::Error) => Ok(true),
            Err(ClientError::Protocol(reply)) => {
                warn!("{} sent unexpected busy reply: {}", self.role, reply);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Send QUIT and close. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };
        self.state = ClientState::Disconnected;

        if let Err(e) = conn.send("QUIT").await {
            debug!("{} QUIT failed: {}", self.role, e);
        }
        if let Err(e) = conn.transport.close().await {
            debug!("{} close failed: {}", self.role, e);
        }
        debug!("{} disconnected from {}", self.role, self.endpoint);
    }

    /// Send one command and read its reply.
    async fn exchange(
        &mut self,
        property: &str,
        command: &str,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<Frame, ClientError> {
        let sent = self.ready(property)?.send(command).await;
        if let Err(e) = sent {
            if e.breaks_connection() {
                self.abandon(&e).await;
            }
            return Err(e);
        }
        self.await_reply(timeout, operation).await
    }

    /// Read the next frame. A late or lost reply leaves the stream out of
    /// step with our commands, so the connection is dropped.
    async fn await_reply(
        &mut self,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<Frame, ClientError> {
        let conn = self.connection.as_mut().ok_or(ClientError::NotConnected)?;
        let result = conn.recv(timeout, operation).await;
        if let Err(e) = &result {
            if e.breaks_connection() {
                self.abandon(e).await;
            }
        }
        result
    }

    /// Close without QUIT; the peer may still owe us replies.
    async fn abandon(&mut self, cause: &ClientError) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };
        self.state = ClientState::Disconnected;
        warn!(
            "{} at {} dropped after {}",
            self.role, self.endpoint, cause
        );
        if let Err(e) = conn.transport.close().await {
            debug!("{} close failed: {}", self.role, e);
        }
    }

    fn ready(&mut self, property: &str) -> Result<&mut Connection<T>, ClientError> {
        if !self.role.accepts(property) {
            return Err(ClientError::InvalidProperty {
                role: self.role,
                property: property.to_string(),
            });
        }
        self.connection.as_mut().ok_or(ClientError::NotConnected)
    }

    fn report(&self, line: &str) {
        if let Some(sink) = &self.progress {
            sink(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedConnector, ScriptedTransport, sent_frames};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn client() -> ServiceClient<ScriptedTransport> {
        ServiceClient::new(
            Role::Telescope,
            Endpoint::new("localhost", 7000),
            ClientTimeouts {
                read: Duration::from_millis(200),
                notify: Duration::from_millis(200),
            },
        )
    }

    async fn ready_client(replies: &[&str]) -> (ServiceClient<ScriptedTransport>, ScriptedConnector) {
        let mut script = vec!["HELLO", "OK"];
        script.extend_from_slice(replies);
        let connector = ScriptedConnector::frames(&script);
        let mut client = client();
        client.connect(&connector).await.unwrap();
        (client, connector)
    }

    #[tokio::test]
    async fn test_connect_performs_handshake() {
        let (client, connector) = ready_client(&[]).await;
        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(sent_frames(&connector.sent()), vec!["IDENT INSTRUMENT"]);
    }

    #[tokio::test]
    async fn test_server_full_never_reaches_ready() {
        let connector = ScriptedConnector::frames(&["SERVER_FULL"]);
        let mut client = client();

        let result = client.connect(&connector).await;
        assert!(matches!(result, Err(ClientError::ServerFull)));
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(connector.sent().is_empty());
        assert!(connector.closed());

        assert!(matches!(
            client.is_busy().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let connector = ScriptedConnector::frames(&["HELLO", "ERROR"]);
        let mut client = client();

        let result = client.connect(&connector).await;
        assert!(matches!(result, Err(ClientError::HandshakeRejected)));
        assert!(!client.is_connected());
        assert!(connector.closed());
    }

    #[tokio::test]
    async fn test_invalid_property_sends_nothing() {
        let (mut client, connector) = ready_client(&[]).await;
        let before = connector.sent().len();

        let get = client.get_status("RA").await;
        assert!(matches!(get, Err(ClientError::InvalidProperty { .. })));

        let set = client.set_status("CAMSTART", "NOW").await;
        assert!(matches!(set, Err(ClientError::InvalidProperty { .. })));

        let notify = client.notify("FOCUS").await;
        assert!(matches!(notify, Err(ClientError::InvalidProperty { .. })));

        assert_eq!(connector.sent().len(), before);
    }

    #[tokio::test]
    async fn test_get_status_strips_verb() {
        let (mut client, connector) = ready_client(&["STATUS  SLEWING"]).await;

        let reply = client.get_status("TASK").await.unwrap();
        assert_eq!(reply, Reply::Value("SLEWING".to_string()));
        assert_eq!(
            sent_frames(&connector.sent()),
            vec!["IDENT INSTRUMENT", "STATUS TASK"]
        );
    }

    #[tokio::test]
    async fn test_get_status_error_reply() {
        let (mut client, _connector) = ready_client(&["ERROR"]).await;
        assert_eq!(client.get_status("TYPE").await.unwrap(), Reply::Error);
    }

    #[tokio::test]
    async fn test_get_status_unexpected_reply() {
        let (mut client, _connector) = ready_client(&["HELLO"]).await;
        assert!(matches!(
            client.get_status("TYPE").await,
            Err(ClientError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_set_status_reply() {
        let (mut client, connector) = ready_client(&["OK", "ERROR"]).await;

        let ok = client.set_status("TASK", "PARK").await.unwrap();
        assert_eq!(ok, Reply::Value("OK".to_string()));

        let err = client.set_status("TASK", "DANCE").await.unwrap();
        assert!(err.is_error());

        assert_eq!(
            sent_frames(&connector.sent())[1..].to_vec(),
            vec!["SETSTATUS TASK PARK", "SETSTATUS TASK DANCE"]
        );
    }

    #[tokio::test]
    async fn test_notify_waits_for_push() {
        let (mut client, connector) = ready_client(&["OK", "NOTIFY MOVING NO"]).await;

        let reply = client.notify("MOVING").await.unwrap();
        assert_eq!(reply, Reply::Value("NO".to_string()));
        assert_eq!(sent_frames(&connector.sent())[1], "NOTIFY MOVING");
    }

    #[tokio::test]
    async fn test_notify_rejected_ack() {
        let (mut client, _connector) = ready_client(&["ERROR"]).await;
        assert_eq!(client.notify("MOVING").await.unwrap(), Reply::Error);
    }

    #[tokio::test]
    async fn test_notify_times_out() {
        let (mut client, _connector) = ready_client(&["OK"]).await;
        assert!(matches!(
            client.notify("MOVING").await,
            Err(ClientError::Timeout {
                operation: "notify",
                ..
            })
        ));
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_late_reply_drops_connection() {
        let connector = ScriptedConnector::timed(&[
            ("HELLO", Duration::ZERO),
            ("OK", Duration::ZERO),
            ("STATUS MOVING", Duration::from_millis(300)),
            ("STATUS PARKED", Duration::ZERO),
        ]);
        let mut client = ServiceClient::new(
            Role::Telescope,
            Endpoint::new("localhost", 7000),
            ClientTimeouts {
                read: Duration::from_millis(100),
                notify: Duration::from_millis(100),
            },
        );
        client.connect(&connector).await.unwrap();

        assert!(matches!(
            client.get_status("TEL").await,
            Err(ClientError::Timeout { .. })
        ));
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(connector.closed());

        // The stale reply must never answer a later command
        assert!(matches!(
            client.get_status("TASK").await,
            Err(ClientError::NotConnected)
        ));
        assert_eq!(
            sent_frames(&connector.sent()),
            vec!["IDENT INSTRUMENT".to_string(), "STATUS TEL".to_string()]
        );
    }

    #[tokio::test]
    async fn test_is_busy_values() {
        let cases = [
            ("STATUS IDLE", false),
            ("STATUS OFFLINE", false),
            ("STATUS DISABLED", false),
            ("STATUS MOVING", true),
            ("STATUS", true),
            ("STATUS idle", true),
            ("ERROR", true),
            ("GARBAGE", true),
        ];

        for (reply, expected) in cases {
            let (mut client, _connector) = ready_client(&[reply]).await;
            assert_eq!(client.is_busy().await.unwrap(), expected, "reply {:?}", reply);
        }
    }

    #[tokio::test]
    async fn test_disconnect_sends_single_quit() {
        let (mut client, connector) = ready_client(&[]).await;

        client.disconnect().await;
        client.disconnect().await;

        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(
            sent_frames(&connector.sent()),
            vec!["IDENT INSTRUMENT", "QUIT"]
        );
        assert!(connector.closed());
    }

    #[tokio::test]
    async fn test_commands_after_disconnect_fail_fast() {
        let (mut client, _connector) = ready_client(&[]).await;
        client.disconnect().await;

        assert!(matches!(
            client.get_status("TEL").await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.set_status("TASK", "PARK").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_verbose_reports_progress() {
        let (mut client, _connector) = ready_client(&["STATUS IDLE", "OK"]).await;
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = lines.clone();
        client.set_verbose(Some(Arc::new(move |line: &str| {
            sink_lines.lock().unwrap().push(line.to_string());
        })));

        client.get_status("TEL").await.unwrap();
        client.set_status("TASK", "PARK").await.unwrap();

        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                "Reading TEL ... IDLE".to_string(),
                "Setting TASK = PARK ... OK".to_string(),
            ]
        );
    }
}
