//! WebSocket transport as a queue of events.
//!
//! Each connection attempt gets one task that owns the socket. The controller
//! talks to it through two channels: outbound frames in, [`TransportEvent`]s
//! out. Per attempt the events arrive as `Opened`, then messages, then exactly
//! one `Closed` or `Error`.

use std::borrow::Cow;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::ClientError;

const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Frames the controller (or heartbeat monitor) asks the transport to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// A close frame; the transport task exits after sending it.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// What the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is open.
    Opened,
    /// A text frame arrived.
    Text(String),
    /// The peer closed the link.
    Closed {
        /// Close code, absent if the peer sent none.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// The link failed.
    Error(String),
}

/// One open connection attempt.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::Sender<Outbound>,
    events: mpsc::Receiver<TransportEvent>,
    task: JoinHandle<()>,
}

impl TransportLink {
    /// A sender for outbound frames, shared with the heartbeat monitor.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Outbound> {
        self.outbound.clone()
    }

    /// Queue a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport task has exited.
    pub async fn send_text(&self, text: String) -> Result<(), ClientError> {
        self.outbound
            .send(Outbound::Text(text))
            .await
            .map_err(|_| ClientError::GatewayConnection("transport closed".into()))
    }

    /// Next transport event; `None` once the task has exited.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Send a close frame and wait for the transport task to exit.
    ///
    /// The close is queued before the event receiver is dropped, and the task
    /// keeps draining outbound frames after its events go undelivered, so the
    /// frame reaches the peer unless the socket itself has already failed.
    pub async fn close(self, code: u16, reason: &str) {
        let Self {
            outbound,
            events,
            task,
        } = self;
        let queued = outbound
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .await;
        if queued.is_err() {
            trace!("transport task exited before close was queued");
        }
        drop(outbound);
        drop(events);
        if let Err(e) = task.await {
            debug!(error = %e, "transport task ended abnormally");
        }
    }
}

/// Open a WebSocket to `url` and spawn its transport task.
///
/// # Errors
///
/// Returns an error if the connection or WebSocket upgrade fails.
pub async fn connect(url: &str) -> Result<TransportLink, ClientError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| ClientError::GatewayConnection(format!("failed to connect: {e}")))?;

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

    let task = tokio::spawn(async move {
        link_task(ws_stream, outbound_rx, events_tx).await;
    });

    Ok(TransportLink {
        outbound: outbound_tx,
        events: events_rx,
        task,
    })
}

/// Deliver `event` while the controller is still listening.
///
/// Once the receiver is gone the sender is dropped and later events are
/// discarded; the task keeps running so a queued close still goes out.
async fn forward(events: &mut Option<mpsc::Sender<TransportEvent>>, event: TransportEvent) {
    if let Some(tx) = events.as_ref() {
        if tx.send(event).await.is_err() {
            trace!("event receiver dropped, discarding further events");
            *events = None;
        }
    }
}

async fn link_task(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<TransportEvent>,
) {
    let (mut write, mut read) = ws_stream.split();
    let mut events = Some(events);

    forward(&mut events, TransportEvent::Opened).await;

    loop {
        tokio::select! {
            biased;

            cmd = outbound.recv() => {
                match cmd {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            forward(&mut events, TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: WsCloseCode::from(code),
                            reason: Cow::Owned(reason),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!(error = %e, "close frame not delivered");
                        }
                        break;
                    }
                    None => break,
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "frame received");
                        forward(&mut events, TransportEvent::Text(text)).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            forward(&mut events, TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((None, String::new()), |f| {
                            (Some(u16::from(f.code)), f.reason.into_owned())
                        });
                        forward(&mut events, TransportEvent::Closed { code, reason }).await;
                        break;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(len = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        forward(&mut events, TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        forward(&mut events, TransportEvent::Error("connection closed".to_string())).await;
                        break;
                    }
                }
            }
        }
    }
}
