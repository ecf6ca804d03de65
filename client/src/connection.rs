//! The persistent socket to the synthesis service.
//!
//! A [`Connection`] owns at most one live link. Each link is a background task that
//! performs the WebSocket handshake, writes queued request units and classifies inbound
//! frames. Everything the task observes is published as a [`ConnectionEvent`] on a
//! broadcast channel, so any number of consumers can follow the connection.
//!
//! Every link gets a new epoch. State changes and events from a link that has since been
//! replaced carry an old epoch and are ignored.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use sirius_protocol::{classify, Frame, IncomingFrame};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Connected"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// Link that produced the event.
    pub epoch: u64,
    /// What happened on that link.
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    Opened,
    Frame(IncomingFrame),
    /// A frame that could not be classified.
    ProtocolError(String),
    /// The link is gone. `error` is set when it did not end cleanly.
    Closed { error: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkState {
    epoch: u64,
    state: ConnectionState,
}

struct Link {
    outbound: mpsc::UnboundedSender<Vec<Frame>>,
    task: JoinHandle<()>,
}

pub struct Connection {
    endpoint: String,
    epoch: u64,
    state: Arc<watch::Sender<LinkState>>,
    events: broadcast::Sender<ConnectionEvent>,
    link: Option<Link>,
}

impl Connection {
    /// A connection to `endpoint` that stays `Disconnected` until [`Connection::connect`].
    pub fn new(endpoint: impl Into<String>) -> Self {
        let (state, _) = watch::channel(LinkState {
            epoch: 0,
            state: ConnectionState::Disconnected,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            endpoint: endpoint.into(),
            epoch: 0,
            state: Arc::new(state),
            events,
            link: None,
        }
    }

    /// State of the current link.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().state
    }

    /// Epoch of the current link. Events carrying any other epoch are stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Follow the connection's events. Only events sent after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Wait until the current link leaves `Connecting`, returning the state it reached.
    pub async fn settled(&self) -> ConnectionState {
        let epoch = self.epoch;
        let mut rx = self.state.subscribe();
        let reached = rx
            .wait_for(|s| s.epoch != epoch || s.state != ConnectionState::Connecting)
            .await
            .map(|s| s.state);
        reached.unwrap_or(ConnectionState::Closed)
    }

    /// Start a new link unless one is already open. Returns immediately; the outcome
    /// arrives as an [`EventKind::Opened`] or [`EventKind::Closed`] event.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(&mut self) -> bool {
        if self.is_open() {
            debug!("Already connected to {}", self.endpoint);
            return false;
        }
        self.teardown();

        self.epoch += 1;
        let epoch = self.epoch;
        self.state.send_replace(LinkState {
            epoch,
            state: ConnectionState::Connecting,
        });
        info!("Connecting to {}", self.endpoint);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(
            self.endpoint.clone(),
            epoch,
            Arc::clone(&self.state),
            self.events.clone(),
            outbound_rx,
        ));
        self.link = Some(Link { outbound, task });
        true
    }

    /// Queue frames to be written back-to-back as one unit.
    pub fn send(&self, frames: Vec<Frame>) -> Result<()> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        let link = self.link.as_ref().ok_or(ClientError::NotConnected)?;
        link.outbound
            .send(frames)
            .map_err(|_| ClientError::NotConnected)
    }

    /// Tear down the link, whatever state it is in.
    pub fn close(&mut self) {
        let had_link = self.link.is_some();
        self.teardown();
        self.epoch += 1;
        self.state.send_replace(LinkState {
            epoch: self.epoch,
            state: ConnectionState::Closed,
        });
        if had_link {
            info!("Connection to {} closed", self.endpoint);
        }
    }

    fn teardown(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        if self.state() == ConnectionState::Connecting {
            // Handshake still pending: nothing to close gracefully.
            link.task.abort();
        }
        // Dropping the sender makes an open link send a Close frame and exit.
        drop(link.outbound);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn set_state(state: &watch::Sender<LinkState>, epoch: u64, next: ConnectionState) {
    state.send_if_modified(|current| {
        if current.epoch != epoch || current.state == next {
            return false;
        }
        current.state = next;
        true
    });
}

fn publish(events: &broadcast::Sender<ConnectionEvent>, epoch: u64, kind: EventKind) {
    // No receivers is fine.
    let _ = events.send(ConnectionEvent { epoch, kind });
}

/// Write every frame of a request before flushing, so nothing can come between them.
async fn write_unit<S>(sink: &mut S, frames: Vec<Frame>) -> std::result::Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    let count = frames.len();
    for frame in frames {
        debug!("Sending {} byte frame", frame.len());
        sink.feed(to_message(frame)).await?;
    }
    sink.flush().await?;
    debug!("Sent {} frame request", count);
    Ok(())
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
    }
}

async fn run_link(
    endpoint: String,
    epoch: u64,
    state: Arc<watch::Sender<LinkState>>,
    events: broadcast::Sender<ConnectionEvent>,
    mut outbound: mpsc::UnboundedReceiver<Vec<Frame>>,
) {
    let ws_stream = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            error!("Failed to connect to {}: {}", endpoint, e);
            set_state(&state, epoch, ConnectionState::Closed);
            publish(&events, epoch, EventKind::Closed {
                error: Some(e.to_string()),
            });
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    info!("Connected to {}", endpoint);
    set_state(&state, epoch, ConnectionState::Open);
    publish(&events, epoch, EventKind::Opened);

    let error = loop {
        tokio::select! {
            unit = outbound.recv() => match unit {
                Some(frames) => {
                    if let Err(e) = write_unit(&mut ws_sender, frames).await {
                        error!("Failed to send request to {}: {}", endpoint, e);
                        break Some(e.to_string());
                    }
                }
                None => {
                    // The owning Connection closed this link.
                    if let Err(e) = ws_sender.send(Message::Close(None)).await {
                        debug!("Close frame not delivered: {}", e);
                    }
                    break None;
                }
            },
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => dispatch(&events, epoch, Frame::Text(text)),
                Some(Ok(Message::Binary(data))) => dispatch(&events, epoch, Frame::Binary(data)),
                Some(Ok(Message::Close(frame))) => {
                    info!("Server closed the connection: {:?}", frame);
                    break None;
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error from {}: {}", endpoint, e);
                    break Some(e.to_string());
                }
                None => break None,
            },
        }
    };

    set_state(&state, epoch, ConnectionState::Closed);
    publish(&events, epoch, EventKind::Closed { error });
}

fn dispatch(events: &broadcast::Sender<ConnectionEvent>, epoch: u64, frame: Frame) {
    let kind = match classify(frame) {
        Ok(IncomingFrame::Audio(data)) => {
            debug!("Received {} bytes of audio", data.len());
            EventKind::Frame(IncomingFrame::Audio(data))
        }
        Ok(control) => EventKind::Frame(control),
        Err(e) => {
            warn!("Discarding unreadable frame: {}", e);
            EventKind::ProtocolError(e.to_string())
        }
    };
    publish(events, epoch, kind);
}
