//! The session controller.
//!
//! One actor task per open terminal view owns the socket, the credentials,
//! the idle timers and the reconnect timer. Everything else talks to it
//! through a cloneable [`SessionHandle`]: commands go in over an mpsc
//! channel, state comes out over a watch channel.

use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::config::SessionConfig;
use crate::credentials::Credentials;
use crate::error::{ErrorKind, SessionError};
use crate::idle::{IdleAlarm, IdleTimers};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::reconnect::{CloseContext, CloseVerdict, close_code};
use crate::terminal::{TerminalIo, TerminalSize};
use crate::transport::{Socket, SocketEvent, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Snapshot published on every observable change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub host_id: String,
    pub state: ConnectionState,
    /// The idle warning has fired and no activity has happened since.
    pub warning: bool,
    /// Most recent user-visible error, cleared by the next successful connect.
    pub last_error: Option<String>,
    pub credentials_held: bool,
    /// Automatic retries made since the session was last established.
    pub reconnect_attempt: u32,
    /// Last measured size of the visible area.
    pub geometry: TerminalSize,
    pub last_activity: Option<Instant>,
    /// When the session will be closed for inactivity.
    pub idle_deadline: Option<Instant>,
}

impl SessionStatus {
    fn new(host_id: String) -> Self {
        Self {
            host_id,
            state: ConnectionState::Idle,
            warning: false,
            last_error: None,
            credentials_held: false,
            reconnect_attempt: 0,
            geometry: TerminalSize::default(),
            last_activity: None,
            idle_deadline: None,
        }
    }
}

#[derive(Debug)]
enum SessionCommand {
    Connect(Credentials),
    Input(String),
    Disconnect,
    /// The terminal view is going away.
    Close,
}

/// Handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    viewport: Arc<Notify>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Start a session with `credentials`. Ignored unless the session is
    /// idle or disconnected.
    pub fn connect(&self, credentials: Credentials) -> Result<(), SessionError> {
        self.send(SessionCommand::Connect(credentials))
    }

    /// Forward raw keystrokes. Dropped unless the session is connected.
    pub fn send_input(&self, bytes: &[u8]) -> Result<(), SessionError> {
        self.send(SessionCommand::Input(
            String::from_utf8_lossy(bytes).into_owned(),
        ))
    }

    /// The visible area changed size. Bursts coalesce into one re-measure.
    pub fn viewport_changed(&self) {
        self.viewport.notify_one();
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Disconnect)
    }

    /// Tear the session down for good. The actor exits afterwards.
    pub fn close(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Close)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Resolves once the actor has exited.
    pub async fn closed(&self) {
        self.commands.closed().await;
    }

    fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(cmd).map_err(|_| SessionError::Ended)
    }
}

type Attempt = JoinHandle<Result<Socket, SessionError>>;

pub struct SessionActor<A, T, O> {
    host_id: String,
    config: SessionConfig,
    tokens: Arc<A>,
    transport: Arc<T>,
    terminal: O,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    viewport: Arc<Notify>,
    status: watch::Sender<SessionStatus>,

    state: ConnectionState,
    credentials: Option<Credentials>,
    /// Token fetch plus socket open, in flight while connecting.
    attempt: Option<Attempt>,
    socket: Option<Socket>,
    /// The current socket has delivered `connected`.
    acknowledged: bool,
    /// Armed from the `connect` frame until `connected` arrives.
    handshake: Option<Pin<Box<Sleep>>>,
    idle: IdleTimers,
    reconnect: Option<Pin<Box<Sleep>>>,
    reconnect_attempts: u32,
    view_open: bool,
    geometry: TerminalSize,
    /// Size the remote pseudo-terminal was last told about on this socket.
    remote_geometry: Option<TerminalSize>,
    warning: bool,
    last_error: Option<String>,
    last_activity: Option<Instant>,
}

impl<A, T, O> SessionActor<A, T, O>
where
    A: TokenSource,
    T: Transport,
    O: TerminalIo,
{
    /// Spawn the actor for `host_id` and return its handle.
    pub fn spawn(
        host_id: impl Into<String>,
        config: SessionConfig,
        tokens: A,
        transport: T,
        terminal: O,
    ) -> SessionHandle {
        let host_id = host_id.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::new(host_id.clone()));
        let viewport = Arc::new(Notify::new());

        let actor = Self {
            host_id,
            idle: IdleTimers::new(config.idle),
            config,
            tokens: Arc::new(tokens),
            transport: Arc::new(transport),
            terminal,
            commands: cmd_rx,
            viewport: Arc::clone(&viewport),
            status: status_tx,
            state: ConnectionState::Idle,
            credentials: None,
            attempt: None,
            socket: None,
            acknowledged: false,
            handshake: None,
            reconnect: None,
            reconnect_attempts: 0,
            view_open: true,
            geometry: TerminalSize::default(),
            remote_geometry: None,
            warning: false,
            last_error: None,
            last_activity: None,
        };
        tokio::spawn(actor.run());

        SessionHandle {
            commands: cmd_tx,
            viewport,
            status: status_rx,
        }
    }

    async fn run(mut self) {
        info!(host_id = %self.host_id, "session actor started");
        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => {
                    // Every handle dropped: same as closing the view.
                    let cmd = cmd.unwrap_or(SessionCommand::Close);
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                event = next_socket_event(&mut self.socket) => self.on_socket_event(event),
                result = join_attempt(&mut self.attempt) => self.on_attempt_finished(result),
                alarm = self.idle.expired() => self.on_idle_alarm(alarm),
                () = wait_timer(&mut self.handshake) => self.on_handshake_timeout(),
                () = wait_timer(&mut self.reconnect) => self.on_reconnect_due(),
                () = self.viewport.notified() => self.on_viewport_changed(),
            }
        }
        info!(host_id = %self.host_id, "session actor stopped");
    }

    /// Returns false once the actor should exit.
    fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Connect(credentials) => self.connect(credentials),
            SessionCommand::Input(data) => self.input(data),
            SessionCommand::Disconnect => {
                info!(host_id = %self.host_id, "disconnect requested");
                self.hang_up();
            }
            SessionCommand::Close => {
                self.view_open = false;
                self.hang_up();
                return false;
            }
        }
        true
    }

    fn connect(&mut self, credentials: Credentials) {
        if !matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Disconnected
        ) {
            warn!(host_id = %self.host_id, state = %self.state, "connect ignored");
            return;
        }
        if let Err(e) = credentials.validate() {
            self.report(&e);
            self.publish();
            return;
        }
        // A disconnected socket may still be open.
        self.go_idle();

        info!(
            host_id = %self.host_id,
            username = credentials.username(),
            port = credentials.port(),
            "connecting"
        );
        self.credentials = Some(credentials);
        self.reconnect_attempts = 0;
        self.last_error = None;
        self.begin_attempt();
    }

    fn input(&mut self, data: String) {
        if self.state != ConnectionState::Connected {
            debug!(state = %self.state, "dropping input while not connected");
            return;
        }
        match self.send(&ClientFrame::Input { data: &data }) {
            Ok(()) => self.touch(),
            Err(e) => self.report(&e),
        }
    }

    /// Fetch a fresh token and open the socket in a task that can be
    /// aborted if the session is torn down first.
    fn begin_attempt(&mut self) {
        let tokens = Arc::clone(&self.tokens);
        let transport = Arc::clone(&self.transport);
        let endpoint = self.config.endpoint.clone();
        let host_id = self.host_id.clone();
        self.attempt = Some(tokio::spawn(async move {
            let token = tokens.fetch_token().await?;
            transport.open(endpoint.terminal_url(&host_id, &token)).await
        }));
        self.state = ConnectionState::Connecting;
        self.publish();
    }

    fn on_attempt_finished(&mut self, result: Result<Socket, SessionError>) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        let socket = match result {
            Ok(socket) => socket,
            Err(e) => return self.fail(&e),
        };
        let Some(credentials) = &self.credentials else {
            return self.go_idle();
        };

        self.geometry = self.terminal.size().unwrap_or_default();
        let sent = socket.send_frame(&ClientFrame::connect(
            credentials,
            &self.config.term,
            self.geometry,
        ));
        self.socket = Some(socket);
        self.acknowledged = false;
        match sent {
            Ok(()) => {
                debug!(host_id = %self.host_id, geometry = %self.geometry, "connect frame sent");
                self.remote_geometry = Some(self.geometry);
                self.handshake = Some(Box::pin(tokio::time::sleep(
                    self.config.transport.handshake_timeout,
                )));
                self.publish();
            }
            Err(e) => self.fail(&e),
        }
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Message(text) => match ServerFrame::decode(&text) {
                Ok(frame) => self.on_frame(frame),
                Err(e) => warn!(host_id = %self.host_id, error = %e, "dropping frame"),
            },
            SocketEvent::Error(message) => {
                let err = SessionError::Transport(message);
                if self.state == ConnectionState::Connecting {
                    self.fail(&err);
                } else {
                    // The close that follows decides what happens next.
                    self.report(&err);
                    self.publish();
                }
            }
            SocketEvent::Closed { code, reason } => self.on_socket_closed(code, &reason),
        }
    }

    fn on_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Connected => {
                if self.state != ConnectionState::Connecting {
                    debug!(state = %self.state, "unexpected connected frame");
                    return;
                }
                info!(host_id = %self.host_id, "ssh session established");
                self.state = ConnectionState::Connected;
                self.acknowledged = true;
                self.handshake = None;
                self.reconnect_attempts = 0;
                self.last_error = None;
                // The view may have changed size during the handshake.
                if let Some(size) = self.terminal.size() {
                    self.geometry = size;
                }
                self.sync_remote_geometry();
                self.touch();
            }
            ServerFrame::Data { data } => {
                self.terminal.write(data.as_bytes());
                if self.state == ConnectionState::Connected {
                    self.touch();
                }
            }
            ServerFrame::Error { message } => {
                let err = SessionError::Remote(message);
                match self.state {
                    ConnectionState::Connecting => self.fail(&err),
                    ConnectionState::Connected => {
                        self.report(&err);
                        self.mark_disconnected();
                    }
                    _ => {
                        self.report(&err);
                        self.publish();
                    }
                }
            }
            ServerFrame::Closed => match self.state {
                ConnectionState::Connecting => self.fail(&SessionError::Remote(
                    "SSH session closed before it was established".into(),
                )),
                ConnectionState::Connected => {
                    self.terminal.notice("[Connection closed]");
                    self.mark_disconnected();
                }
                _ => {}
            },
            ServerFrame::Unknown => debug!("ignoring frame of unknown type"),
        }
    }

    fn on_socket_closed(&mut self, code: u16, reason: &str) {
        self.socket = None;
        self.handshake = None;
        self.remote_geometry = None;
        self.idle.cancel();
        self.warning = false;
        info!(host_id = %self.host_id, code, reason, state = %self.state, "terminal socket closed");

        let verdict = self.config.reconnect.judge(CloseContext {
            code,
            was_connected: self.acknowledged,
            view_open: self.view_open,
            attempts: self.reconnect_attempts,
        });
        match verdict {
            CloseVerdict::Reconnect { delay } => {
                self.state = ConnectionState::Disconnected;
                self.publish();

                self.reconnect_attempts += 1;
                self.terminal.notice(&format!(
                    "[Connection lost. Reconnecting in {}...]",
                    describe(delay)
                ));
                info!(
                    host_id = %self.host_id,
                    attempt = self.reconnect_attempts,
                    delay_secs = delay.as_secs(),
                    "scheduling reconnect"
                );
                self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                self.state = ConnectionState::Reconnecting;
                self.publish();
            }
            CloseVerdict::Reauthenticate => self.fail(&SessionError::SessionExpired),
            CloseVerdict::Stop if !self.acknowledged => {
                self.fail(&SessionError::ClosedBeforeConnect(code));
            }
            CloseVerdict::Stop => {
                if self.state == ConnectionState::Connected {
                    self.terminal.notice("[Connection closed]");
                }
                self.go_idle();
            }
        }
    }

    fn on_idle_alarm(&mut self, alarm: IdleAlarm) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let policy = self.idle.policy();
        match alarm {
            IdleAlarm::Warning => {
                info!(host_id = %self.host_id, "idle warning");
                self.warning = true;
                self.terminal.notice(&format!(
                    "[Idle session will be disconnected in {} unless there is activity]",
                    describe(policy.warning)
                ));
                self.publish();
            }
            IdleAlarm::Disconnect => {
                info!(host_id = %self.host_id, "disconnecting idle session");
                self.terminal.notice(&format!(
                    "[Disconnected after {} of inactivity]",
                    describe(policy.total)
                ));
                self.hang_up();
            }
        }
    }

    fn on_reconnect_due(&mut self) {
        if self.state != ConnectionState::Reconnecting {
            return;
        }
        if self.credentials.is_none() {
            return self.go_idle();
        }
        info!(host_id = %self.host_id, attempt = self.reconnect_attempts, "reconnecting");
        self.begin_attempt();
    }

    fn on_handshake_timeout(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        warn!(
            host_id = %self.host_id,
            secs = self.config.transport.handshake_timeout.as_secs(),
            "no connected frame"
        );
        self.fail(&SessionError::HandshakeTimeout);
    }

    fn on_viewport_changed(&mut self) {
        let Some(size) = self.terminal.size() else {
            return;
        };
        if size != self.geometry {
            self.geometry = size;
            self.publish();
        }
        if self.state == ConnectionState::Connected {
            self.sync_remote_geometry();
        }
    }

    /// Send a `resize` if the remote side has a different size than the view.
    fn sync_remote_geometry(&mut self) {
        if self.remote_geometry == Some(self.geometry) {
            return;
        }
        debug!(host_id = %self.host_id, geometry = %self.geometry, "resize");
        let sent = self.send(&ClientFrame::Resize {
            cols: self.geometry.cols,
            rows: self.geometry.rows,
        });
        match sent {
            Ok(()) => self.remote_geometry = Some(self.geometry),
            Err(e) => self.report(&e),
        }
    }

    // -- transitions --

    /// Say goodbye to the gateway if the SSH session is up, then go idle.
    fn hang_up(&mut self) {
        if self.state == ConnectionState::Connected {
            if let Err(e) = self.send(&ClientFrame::Disconnect) {
                debug!(error = %e, "could not send disconnect frame");
            }
        }
        self.go_idle();
    }

    fn fail(&mut self, err: &SessionError) {
        self.report(err);
        self.go_idle();
    }

    fn mark_disconnected(&mut self) {
        self.idle.cancel();
        self.warning = false;
        self.state = ConnectionState::Disconnected;
        self.publish();
    }

    /// Drop every connection resource and wipe the credentials.
    fn go_idle(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        if let Some(mut socket) = self.socket.take() {
            socket.close(close_code::NORMAL, "");
        }
        self.handshake = None;
        self.reconnect = None;
        self.remote_geometry = None;
        self.idle.cancel();
        self.warning = false;
        self.acknowledged = false;
        if let Some(mut credentials) = self.credentials.take() {
            credentials.clear();
        }
        if self.state != ConnectionState::Idle {
            info!(host_id = %self.host_id, from = %self.state, "session idle");
        }
        self.state = ConnectionState::Idle;
        self.publish();
    }

    // -- helpers --

    fn send(&self, frame: &ClientFrame<'_>) -> Result<(), SessionError> {
        match &self.socket {
            Some(socket) => socket.send_frame(frame),
            None => Err(SessionError::NotOpen {
                frame: frame.name(),
            }),
        }
    }

    /// Record traffic: restart the idle timers and clear the warning.
    fn touch(&mut self) {
        self.idle.restart();
        self.warning = false;
        self.last_activity = Some(Instant::now());
        self.publish();
    }

    /// Show an error to the user. Protocol errors are only logged.
    fn report(&mut self, err: &SessionError) {
        warn!(host_id = %self.host_id, error = %err, "session error");
        if err.kind() == ErrorKind::Protocol {
            return;
        }
        self.terminal.notice(&format!("\x1b[31m{err}\x1b[0m"));
        self.last_error = Some(err.to_string());
    }

    fn publish(&self) {
        self.status.send_replace(SessionStatus {
            host_id: self.host_id.clone(),
            state: self.state,
            warning: self.warning,
            last_error: self.last_error.clone(),
            credentials_held: self.credentials.is_some(),
            reconnect_attempt: self.reconnect_attempts,
            geometry: self.geometry,
            last_activity: self.last_activity,
            idle_deadline: self.idle.disconnect_deadline(),
        });
    }
}

async fn next_socket_event(socket: &mut Option<Socket>) -> SocketEvent {
    match socket {
        Some(socket) => socket.next_event().await,
        None => std::future::pending().await,
    }
}

async fn join_attempt(slot: &mut Option<Attempt>) -> Result<Socket, SessionError> {
    let Some(attempt) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let joined = attempt.await;
    *slot = None;
    joined.unwrap_or_else(|e| Err(SessionError::Transport(format!("connect task failed: {e}"))))
}

async fn wait_timer(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(sleep) => {
            sleep.as_mut().await;
            *slot = None;
        }
        None => std::future::pending().await,
    }
}

/// "15 minutes", "1 minute", "3 seconds".
fn describe(d: Duration) -> String {
    let secs = d.as_secs();
    let (n, unit) = if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::reconnect::ReconnectPolicy;
    use crate::transport::{Outbound, SocketPeer};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use url::Url;

    // -- test doubles --

    #[derive(Clone, Default)]
    struct FakeTokens {
        calls: Arc<AtomicUsize>,
        reject: Arc<AtomicBool>,
    }

    impl FakeTokens {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenSource for FakeTokens {
        async fn fetch_token(&self) -> Result<String, SessionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.reject.load(Ordering::SeqCst) {
                Err(SessionError::Unauthorized)
            } else {
                Ok(format!("tok-{n}"))
            }
        }
    }

    /// Hands the wire end of every opened socket to the test.
    struct FakeTransport {
        opened: mpsc::UnboundedSender<(Url, SocketPeer)>,
    }

    impl Transport for FakeTransport {
        async fn open(&self, url: Url) -> Result<Socket, SessionError> {
            let (socket, peer) = Socket::channel();
            self.opened
                .send((url, peer))
                .map_err(|_| SessionError::Unavailable)?;
            Ok(socket)
        }
    }

    #[derive(Clone, Default)]
    struct Screen {
        output: Arc<Mutex<Vec<u8>>>,
        size: Arc<Mutex<Option<TerminalSize>>>,
    }

    impl Screen {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
        }

        fn resize(&self, cols: u16, rows: u16) {
            *self.size.lock().unwrap() = Some(TerminalSize { cols, rows });
        }
    }

    impl TerminalIo for Screen {
        fn write(&self, bytes: &[u8]) {
            self.output.lock().unwrap().extend_from_slice(bytes);
        }

        fn size(&self) -> Option<TerminalSize> {
            *self.size.lock().unwrap()
        }
    }

    struct Harness {
        handle: SessionHandle,
        opened: mpsc::UnboundedReceiver<(Url, SocketPeer)>,
        tokens: FakeTokens,
        screen: Screen,
    }

    fn harness_with(configure: impl FnOnce(&mut SessionConfig)) -> Harness {
        let mut config = SessionConfig::new(Endpoint::parse("https://gw.example").unwrap());
        configure(&mut config);
        let (tx, rx) = mpsc::unbounded_channel();
        let tokens = FakeTokens::default();
        let screen = Screen::default();
        let handle = SessionActor::spawn(
            "host-1",
            config,
            tokens.clone(),
            FakeTransport { opened: tx },
            screen.clone(),
        );
        Harness {
            handle,
            opened: rx,
            tokens,
            screen,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn creds() -> Credentials {
        Credentials::password("root", "hunter2", 22)
    }

    impl Harness {
        async fn next_socket(&mut self) -> (Url, SocketPeer) {
            self.opened.recv().await.expect("transport dropped")
        }

        async fn wait_state(&self, want: ConnectionState) -> SessionStatus {
            let mut rx = self.handle.subscribe();
            let status = rx.wait_for(|s| s.state == want).await.unwrap().clone();
            status
        }

        /// Connect and acknowledge; returns the wire end of the socket.
        async fn establish(&mut self) -> SocketPeer {
            self.handle.connect(creds()).unwrap();
            let (_, mut peer) = self.next_socket().await;
            assert_eq!(recv_frame(&mut peer).await["type"], "connect");
            push(&peer, json!({ "type": "connected" })).await;
            self.wait_state(ConnectionState::Connected).await;
            peer
        }
    }

    async fn recv_frame(peer: &mut SocketPeer) -> Value {
        match peer.outbound.recv().await {
            Some(Outbound::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("Expected a text frame, got {other:?}"),
        }
    }

    async fn push(peer: &SocketPeer, frame: Value) {
        peer.events
            .send(SocketEvent::Message(frame.to_string()))
            .await
            .unwrap();
    }

    async fn close(peer: &SocketPeer, code: u16) {
        peer.events
            .send(SocketEvent::Closed {
                code,
                reason: String::new(),
            })
            .await
            .unwrap();
    }

    // -- connecting --

    #[tokio::test(start_paused = true)]
    async fn connect_sends_credentials_and_geometry() {
        let mut h = harness();
        h.screen.resize(120, 40);
        h.handle.connect(creds()).unwrap();

        let (url, mut peer) = h.next_socket().await;
        assert_eq!(
            url.as_str(),
            "wss://gw.example/api/v1/ssh-terminal/host-1?token=tok-1"
        );
        let frame = recv_frame(&mut peer).await;
        assert_eq!(
            frame,
            json!({
                "type": "connect",
                "username": "root",
                "port": 22,
                "terminal": "xterm-256color",
                "cols": 120,
                "rows": 40,
                "password": "hunter2",
            })
        );
        let status = h.wait_state(ConnectionState::Connecting).await;
        assert!(status.credentials_held);

        push(&peer, json!({ "type": "connected" })).await;
        let status = h.wait_state(ConnectionState::Connected).await;
        assert_eq!(status.geometry, TerminalSize { cols: 120, rows: 40 });
        assert!(status.idle_deadline.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unmeasured_terminal_defaults_to_80x24() {
        let mut h = harness();
        h.handle.connect(creds()).unwrap();
        let (_, mut peer) = h.next_socket().await;
        let frame = recv_frame(&mut peer).await;
        assert_eq!(frame["cols"], 80);
        assert_eq!(frame["rows"], 24);
    }

    #[tokio::test(start_paused = true)]
    async fn output_is_rendered() {
        let mut h = harness();
        let peer = h.establish().await;
        let mut rx = h.handle.subscribe();
        push(&peer, json!({ "type": "data", "data": "\u{1b}[32mok\u{1b}[0m\r\n" })).await;
        rx.changed().await.unwrap();
        assert!(h.screen.text().contains("\u{1b}[32mok"));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_credentials_never_touch_the_network() {
        let h = harness();
        h.handle
            .connect(Credentials::password("", "pw", 22))
            .unwrap();
        let mut rx = h.handle.subscribe();
        let status = rx
            .wait_for(|s| s.last_error.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(
            status.last_error.as_deref(),
            Some("invalid credentials: username is required")
        );
        assert_eq!(status.state, ConnectionState::Idle);
        assert_eq!(h.tokens.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn token_failure_reports_and_stays_idle() {
        let mut h = harness();
        h.tokens.reject.store(true, Ordering::SeqCst);
        h.handle.connect(creds()).unwrap();

        let mut rx = h.handle.subscribe();
        let status = rx
            .wait_for(|s| s.last_error.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(status.last_error.as_deref(), Some("Authentication required"));
        assert_eq!(status.state, ConnectionState::Idle);
        assert!(!status.credentials_held);
        assert!(h.opened.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.tokens.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_while_connecting_goes_idle() {
        let mut h = harness();
        h.handle.connect(creds()).unwrap();
        let (_, mut peer) = h.next_socket().await;
        recv_frame(&mut peer).await;

        push(
            &peer,
            json!({ "type": "error", "message": "Failed to connect: All configured authentication methods failed" }),
        )
        .await;
        let status = h.wait_state(ConnectionState::Idle).await;
        assert_eq!(
            status.last_error.as_deref(),
            Some("Failed to connect: All configured authentication methods failed")
        );
        assert!(h.screen.text().contains("authentication methods failed"));
        assert!(matches!(
            peer.outbound.recv().await,
            Some(Outbound::Close { code: 1000, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_frame_while_connecting_goes_idle() {
        let mut h = harness();
        h.handle.connect(creds()).unwrap();
        let (_, mut peer) = h.next_socket().await;
        recv_frame(&mut peer).await;

        push(&peer, json!({ "type": "closed" })).await;
        let status = h.wait_state(ConnectionState::Idle).await;
        assert_eq!(
            status.last_error.as_deref(),
            Some("SSH session closed before it was established")
        );
        assert!(!status.credentials_held);
        assert!(matches!(
            peer.outbound.recv().await,
            Some(Outbound::Close { code: 1000, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_gateway_times_out_the_handshake() {
        let mut h = harness();
        h.handle.connect(creds()).unwrap();
        let (_, mut peer) = h.next_socket().await;
        recv_frame(&mut peer).await;
        let sent_at = Instant::now();

        let status = h.wait_state(ConnectionState::Idle).await;
        assert_eq!(sent_at.elapsed(), Duration::from_secs(30));
        assert_eq!(
            status.last_error.as_deref(),
            Some("timed out waiting for the SSH session to start")
        );
        assert!(matches!(
            peer.outbound.recv().await,
            Some(Outbound::Close { code: 1000, .. })
        ));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.tokens.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_in_time_disarms_the_handshake_timer() {
        let mut h = harness();
        let _peer = h.establish().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        let status = h.handle.status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(status.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_before_connected_asks_for_reauthentication() {
        let mut h = harness();
        h.handle.connect(creds()).unwrap();
        let (_, mut peer) = h.next_socket().await;
        recv_frame(&mut peer).await;

        close(&peer, close_code::ABNORMAL).await;
        let status = h.wait_state(ConnectionState::Idle).await;
        assert_eq!(
            status.last_error.as_deref(),
            Some("session likely expired, please reauthenticate")
        );
        assert!(!status.credentials_held);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.tokens.calls(), 1);
        assert!(h.opened.try_recv().is_err());
    }

    // -- input and resize --

    #[tokio::test(start_paused = true)]
    async fn input_is_only_sent_while_connected() {
        let mut h = harness();
        h.handle.send_input(b"early").unwrap();

        h.handle.connect(creds()).unwrap();
        let (_, mut peer) = h.next_socket().await;
        assert_eq!(recv_frame(&mut peer).await["type"], "connect");
        h.handle.send_input(b"too soon").unwrap();

        push(&peer, json!({ "type": "connected" })).await;
        h.wait_state(ConnectionState::Connected).await;
        h.handle.send_input(b"ls -la\r").unwrap();

        assert_eq!(
            recv_frame(&mut peer).await,
            json!({ "type": "input", "data": "ls -la\r" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resize_is_sent_only_when_geometry_changes() {
        let mut h = harness();
        h.screen.resize(80, 24);
        let mut peer = h.establish().await;

        h.screen.resize(100, 30);
        h.handle.viewport_changed();
        assert_eq!(
            recv_frame(&mut peer).await,
            json!({ "type": "resize", "cols": 100, "rows": 30 })
        );

        // Same size again: nothing to send.
        h.handle.viewport_changed();
        h.handle.send_input(b"x").unwrap();
        assert_eq!(recv_frame(&mut peer).await["type"], "input");
    }

    #[tokio::test(start_paused = true)]
    async fn resize_while_idle_sends_nothing() {
        let mut h = harness();
        h.screen.resize(132, 50);
        h.handle.viewport_changed();
        let mut rx = h.handle.subscribe();
        let status = rx
            .wait_for(|s| s.geometry.cols == 132)
            .await
            .unwrap()
            .clone();
        assert_eq!(status.state, ConnectionState::Idle);
        assert!(h.opened.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn resize_during_handshake_is_sent_once_connected() {
        let mut h = harness();
        h.handle.connect(creds()).unwrap();
        let (_, mut peer) = h.next_socket().await;
        let frame = recv_frame(&mut peer).await;
        assert_eq!(frame["cols"], 80);
        assert_eq!(frame["rows"], 24);

        h.screen.resize(120, 40);
        h.handle.viewport_changed();
        let mut rx = h.handle.subscribe();
        rx.wait_for(|s| s.geometry.cols == 120).await.unwrap();
        assert_eq!(h.handle.status().state, ConnectionState::Connecting);

        push(&peer, json!({ "type": "connected" })).await;
        assert_eq!(
            recv_frame(&mut peer).await,
            json!({ "type": "resize", "cols": 120, "rows": 40 })
        );

        // Already in sync: nothing more to send.
        h.handle.viewport_changed();
        h.handle.send_input(b"x").unwrap();
        assert_eq!(recv_frame(&mut peer).await["type"], "input");
    }

    #[tokio::test(start_paused = true)]
    async fn unnoticed_resize_during_handshake_is_caught_on_connected() {
        let mut h = harness();
        h.screen.resize(100, 30);
        h.handle.connect(creds()).unwrap();
        let (_, mut peer) = h.next_socket().await;
        assert_eq!(recv_frame(&mut peer).await["cols"], 100);

        // No viewport notification this time.
        h.screen.resize(90, 20);
        push(&peer, json!({ "type": "connected" })).await;
        assert_eq!(
            recv_frame(&mut peer).await,
            json!({ "type": "resize", "cols": 90, "rows": 20 })
        );
        let status = h.wait_state(ConnectionState::Connected).await;
        assert_eq!(status.geometry, TerminalSize { cols: 90, rows: 20 });
    }

    // -- idle timeout --

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_warned_then_disconnected() {
        let mut h = harness();
        let mut peer = h.establish().await;
        let start = Instant::now();

        tokio::time::sleep(Duration::from_secs(14 * 60 + 1)).await;
        let status = h.handle.status();
        assert!(status.warning);
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(h.screen.text().contains("disconnected in 1 minute"));

        let status = h.wait_state(ConnectionState::Idle).await;
        assert_eq!(start.elapsed(), Duration::from_secs(15 * 60));
        assert!(!status.credentials_held);
        assert!(!status.warning);
        assert!(h.screen.text().contains("after 15 minutes of inactivity"));

        assert_eq!(recv_frame(&mut peer).await, json!({ "type": "disconnect" }));
        assert!(matches!(
            peer.outbound.recv().await,
            Some(Outbound::Close { code: 1000, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_restarts_idle_timers() {
        let mut h = harness();
        let mut peer = h.establish().await;

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        let now = Instant::now();
        push(&peer, json!({ "type": "data", "data": "tick" })).await;
        let mut rx = h.handle.subscribe();
        let status = rx
            .wait_for(|s| s.last_activity == Some(now))
            .await
            .unwrap()
            .clone();
        assert_eq!(status.idle_deadline, Some(now + Duration::from_secs(15 * 60)));

        // 20 minutes since connect, 10 since the output.
        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(h.handle.status().state, ConnectionState::Connected);

        let now = Instant::now();
        h.handle.send_input(b"q").unwrap();
        recv_frame(&mut peer).await;
        let status = rx
            .wait_for(|s| s.last_activity == Some(now))
            .await
            .unwrap()
            .clone();
        assert_eq!(status.idle_deadline, Some(now + Duration::from_secs(15 * 60)));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_after_warning_clears_it() {
        let mut h = harness();
        let _peer = h.establish().await;

        tokio::time::sleep(Duration::from_secs(14 * 60 + 30)).await;
        assert!(h.handle.status().warning);

        h.handle.send_input(b"\r").unwrap();
        let mut rx = h.handle.subscribe();
        rx.wait_for(|s| !s.warning).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(h.handle.status().state, ConnectionState::Connected);
    }

    // -- closing and reconnecting --

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_after_backoff() {
        let mut h = harness();
        let peer = h.establish().await;

        close(&peer, 1011).await;
        let status = h.wait_state(ConnectionState::Reconnecting).await;
        assert_eq!(status.reconnect_attempt, 1);
        assert!(status.credentials_held);
        let lost_at = Instant::now();

        let (url, mut peer) = h.next_socket().await;
        assert_eq!(lost_at.elapsed(), Duration::from_secs(3));
        assert_eq!(h.tokens.calls(), 2);
        assert_eq!(url.query(), Some("token=tok-2"));

        let frame = recv_frame(&mut peer).await;
        assert_eq!(frame["type"], "connect");
        assert_eq!(frame["password"], "hunter2");
        push(&peer, json!({ "type": "connected" })).await;
        h.wait_state(ConnectionState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reserved_close_codes_go_idle() {
        for code in [1000, 1006, 1008] {
            let mut h = harness();
            let peer = h.establish().await;

            close(&peer, code).await;
            let status = h.wait_state(ConnectionState::Idle).await;
            assert!(!status.credentials_held, "code {code}");
            assert!(status.last_error.is_none(), "code {code}");

            tokio::time::sleep(Duration::from_secs(30)).await;
            assert_eq!(h.tokens.calls(), 1, "code {code}");
            assert!(h.opened.try_recv().is_err(), "code {code}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_attempts_disables_reconnect() {
        let mut h = harness_with(|c| {
            c.reconnect = ReconnectPolicy {
                max_attempts: 0,
                ..Default::default()
            }
        });
        let peer = h.establish().await;

        close(&peer, 1011).await;
        let status = h.wait_state(ConnectionState::Idle).await;
        assert_eq!(status.reconnect_attempt, 0);
        assert!(!status.credentials_held);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.opened.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn established_reconnects_reset_the_attempt_count() {
        let mut h = harness_with(|c| {
            c.reconnect = ReconnectPolicy {
                max_attempts: 2,
                ..Default::default()
            }
        });
        let mut peer = h.establish().await;

        for round in 2..=5 {
            close(&peer, 1011).await;
            let status = h.wait_state(ConnectionState::Reconnecting).await;
            assert_eq!(status.reconnect_attempt, 1, "round {round}");

            let (url, mut next) = h.next_socket().await;
            assert_eq!(url.query(), Some(format!("token=tok-{round}").as_str()));
            assert_eq!(recv_frame(&mut next).await["type"], "connect");
            push(&next, json!({ "type": "connected" })).await;
            let status = h.wait_state(ConnectionState::Connected).await;
            assert_eq!(status.reconnect_attempt, 0, "round {round}");

            h.handle.send_input(b"uptime\r").unwrap();
            assert_eq!(recv_frame(&mut next).await["type"], "input");
            peer = next;
        }
        assert_eq!(h.tokens.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_frame_marks_disconnected() {
        let mut h = harness();
        let peer = h.establish().await;

        push(&peer, json!({ "type": "closed" })).await;
        let status = h.wait_state(ConnectionState::Disconnected).await;
        assert!(status.idle_deadline.is_none());

        close(&peer, close_code::NORMAL).await;
        h.wait_state(ConnectionState::Idle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_and_unknown_frames_are_dropped() {
        let mut h = harness();
        let peer = h.establish().await;
        let mut rx = h.handle.subscribe();

        peer.events
            .send(SocketEvent::Message("not json".into()))
            .await
            .unwrap();
        push(&peer, json!({ "type": "banner", "text": "hi" })).await;
        push(&peer, json!({ "type": "data", "data": "still here" })).await;

        rx.changed().await.unwrap();
        let status = h.handle.status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(status.last_error.is_none());
        assert!(h.screen.text().contains("still here"));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_is_graceful() {
        let mut h = harness();
        let mut peer = h.establish().await;

        h.handle.disconnect().unwrap();
        assert_eq!(recv_frame(&mut peer).await, json!({ "type": "disconnect" }));
        assert!(matches!(
            peer.outbound.recv().await,
            Some(Outbound::Close { code: 1000, .. })
        ));
        let status = h.wait_state(ConnectionState::Idle).await;
        assert!(!status.credentials_held);

        // The actor is still alive and can connect again.
        h.handle.connect(creds()).unwrap();
        let (url, _) = h.next_socket().await;
        assert_eq!(url.query(), Some("token=tok-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let mut h = harness();
        let peer = h.establish().await;
        close(&peer, 1011).await;
        h.wait_state(ConnectionState::Reconnecting).await;

        h.handle.disconnect().unwrap();
        h.wait_state(ConnectionState::Idle).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.opened.try_recv().is_err());
        assert_eq!(h.tokens.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_view_while_connecting_sends_nothing_more() {
        let mut h = harness();
        h.handle.connect(creds()).unwrap();
        let (_, mut peer) = h.next_socket().await;
        assert_eq!(recv_frame(&mut peer).await["type"], "connect");

        h.handle.close().unwrap();
        h.handle.closed().await;
        assert!(matches!(
            peer.outbound.recv().await,
            Some(Outbound::Close { code: 1000, .. })
        ));
        assert_eq!(peer.outbound.recv().await, None);
        assert!(matches!(h.handle.disconnect(), Err(SessionError::Ended)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_hangs_up() {
        let mut h = harness();
        let mut peer = h.establish().await;
        drop(h.handle);

        assert_eq!(recv_frame(&mut peer).await, json!({ "type": "disconnect" }));
        assert!(matches!(
            peer.outbound.recv().await,
            Some(Outbound::Close { code: 1000, .. })
        ));
    }

    #[test]
    fn describe_durations() {
        assert_eq!(describe(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe(Duration::from_secs(900)), "15 minutes");
        assert_eq!(describe(Duration::from_secs(3)), "3 seconds");
        assert_eq!(describe(Duration::from_secs(90)), "90 seconds");
    }
}
