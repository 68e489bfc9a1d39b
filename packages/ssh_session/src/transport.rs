//! The WebSocket as seen by the session controller.
//!
//! A [`Socket`] is the controller's end of a pair of channels; whatever sits
//! on the [`SocketPeer`] end (a tungstenite pump task, or a test double)
//! moves frames to and from the wire.

use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, Sleep};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tracing::{debug, warn};
use url::Url;

use crate::config::TransportConfig;
use crate::error::SessionError;
use crate::protocol::ClientFrame;
use crate::reconnect::close_code;

/// Close code reported when the peer closed without a status.
pub const NO_STATUS: u16 = 1005;

const EVENT_BUFFER: usize = 256;

/// Inbound socket activity, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Message(String),
    Error(String),
    Closed { code: u16, reason: String },
}

/// Outbound socket traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Controller end of an open WebSocket.
pub struct Socket {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::Receiver<SocketEvent>,
    closing: bool,
}

/// Wire end of an open WebSocket.
pub struct SocketPeer {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub events: mpsc::Sender<SocketEvent>,
}

impl Socket {
    pub fn channel() -> (Socket, SocketPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::channel(EVENT_BUFFER);
        (
            Socket {
                outbound: out_tx,
                events: ev_rx,
                closing: false,
            },
            SocketPeer {
                outbound: out_rx,
                events: ev_tx,
            },
        )
    }

    /// Open and not yet closing.
    pub fn is_open(&self) -> bool {
        !self.closing && !self.outbound.is_closed()
    }

    pub fn send_frame(&self, frame: &ClientFrame<'_>) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotOpen {
                frame: frame.name(),
            });
        }
        let text = frame.encode()?;
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| SessionError::NotOpen {
                frame: frame.name(),
            })
    }

    /// Start the closing handshake. Idempotent.
    pub fn close(&mut self, code: u16, reason: &str) {
        if self.closing {
            return;
        }
        self.closing = true;
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next inbound event. A vanished peer reads as an abnormal close.
    pub async fn next_event(&mut self) -> SocketEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => SocketEvent::Closed {
                code: close_code::ABNORMAL,
                reason: String::new(),
            },
        }
    }
}

/// Opens terminal sockets.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: Url) -> impl Future<Output = Result<Socket, SessionError>> + Send;
}

/// [`Transport`] over tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    config: TransportConfig,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl Transport for WsTransport {
    async fn open(&self, url: Url) -> Result<Socket, SessionError> {
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(self.config.max_frame_bytes))
            .max_frame_size(Some(self.config.max_frame_bytes));

        let connect =
            tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), true);
        let (stream, _) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| SessionError::Transport("timed out opening the terminal socket".into()))?
            .map_err(SessionError::from_tungstenite)?;

        let (socket, peer) = Socket::channel();
        tokio::spawn(pump(
            stream,
            peer,
            self.config.keepalive,
            self.config.read_timeout,
        ));
        Ok(socket)
    }
}

/// Move frames between the WebSocket and the controller until either side
/// goes away. Always finishes by reporting exactly one `Closed`.
///
/// With a `read_timeout`, a socket that delivers nothing at all (not even a
/// pong) for that long is treated as dead.
async fn pump<S>(
    ws: WebSocketStream<S>,
    mut peer: SocketPeer,
    keepalive: Option<Duration>,
    read_timeout: Option<Duration>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_write, mut ws_read) = ws.split();
    let mut ping = keepalive.map(|period| tokio::time::interval_at(Instant::now() + period, period));
    let mut silence: Option<Pin<Box<Sleep>>> =
        read_timeout.map(|limit| Box::pin(tokio::time::sleep(limit)));

    let closed = loop {
        tokio::select! {
            out = peer.outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                        let _ = peer.events.send(SocketEvent::Error(e.to_string())).await;
                        break abnormal();
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    // Keep reading: the peer's close echo carries the final code.
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if ws_write.send(Message::Close(Some(frame))).await.is_err() {
                        break SocketEvent::Closed { code, reason: String::new() };
                    }
                }
                None => {
                    // Controller dropped its end.
                    let _ = ws_write.close().await;
                    return;
                }
            },

            msg = ws_read.next() => {
                if let (Some(limit), Some(timer)) = (read_timeout, silence.as_mut()) {
                    timer.as_mut().reset(Instant::now() + limit);
                }
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if peer.events.send(SocketEvent::Message(text.as_str().to_owned())).await.is_err() {
                            let _ = ws_write.close().await;
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => SocketEvent::Closed {
                                code: u16::from(frame.code),
                                reason: frame.reason.as_str().to_owned(),
                            },
                            None => SocketEvent::Closed { code: NO_STATUS, reason: String::new() },
                        };
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        debug!(len = bytes.len(), "ignoring binary frame");
                    }
                    Some(Ok(_)) => {
                        // Pings are answered by tungstenite. Pongs only reset the silence timer.
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "terminal socket error");
                        let _ = peer.events.send(SocketEvent::Error(e.to_string())).await;
                        break abnormal();
                    }
                    None => break abnormal(),
                }
            }

            () = tick(&mut ping) => {
                if let Err(e) = ws_write.send(Message::Ping(Default::default())).await {
                    let _ = peer.events.send(SocketEvent::Error(e.to_string())).await;
                    break abnormal();
                }
            }

            () = expired(&mut silence) => {
                let secs = read_timeout.unwrap_or_default().as_secs();
                warn!(secs, "terminal socket went silent");
                let message = format!("no traffic from the gateway for {secs} seconds");
                let _ = peer.events.send(SocketEvent::Error(message)).await;
                break abnormal();
            }
        }
    };

    let _ = peer.events.send(closed).await;
}

fn abnormal() -> SocketEvent {
    SocketEvent::Closed {
        code: close_code::ABNORMAL,
        reason: String::new(),
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expired(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}
