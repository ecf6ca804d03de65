//! The interface the front-end talks to.
//!
//! [`TtsClient`] owns the connection, the synthesis state machine and the audio tracker.
//! Connection events are only applied when the caller pulls them with
//! [`TtsClient::next_update`], so session state has a single writer and is never touched
//! from the socket task.

use std::time::Instant;

use sirius_protocol::{
    encode, ControlMessage, IncomingFrame, ProtocolGeneration, ReferenceAudio, SynthesisRequest,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionEvent, ConnectionState, EventKind};
use crate::error::{ClientError, FailureReason, Result};
use crate::machine::{Phase, SynthesisMachine};
use crate::tracker::{AudioResource, AudioTracker, ResourceId};

/// Something the front-end may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientUpdate {
    Connected,
    /// The service pinged.
    Liveness,
    AudioReady(ResourceId),
    /// Audio arrived while no request was in flight and was dropped.
    StaleAudio { bytes: usize },
    Failed(FailureReason),
    Disconnected { error: Option<String> },
    ProtocolError(String),
}

/// Read-only view of the session.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisState<'a> {
    pub phase: Phase,
    pub error: Option<&'a FailureReason>,
    pub current: Option<&'a AudioResource>,
}

pub struct TtsClient {
    config: ClientConfig,
    connection: Connection,
    events: broadcast::Receiver<ConnectionEvent>,
    machine: SynthesisMachine,
    tracker: AudioTracker,
    last_ping: Option<Instant>,
    last_disconnect: Option<String>,
    /// A link was started and has not reported back yet.
    link_pending: bool,
    next_request_id: u64,
}

impl TtsClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connection = Connection::new(config.endpoint());
        let events = connection.subscribe();
        let tracker = AudioTracker::new(config.retention);
        Ok(Self {
            config,
            connection,
            events,
            machine: SynthesisMachine::new(),
            tracker,
            last_ping: None,
            last_disconnect: None,
            link_pending: false,
            next_request_id: 1,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the connection if it is not open already. Returns immediately.
    pub fn connect(&mut self) {
        if self.connection.connect() {
            self.last_disconnect = None;
            self.link_pending = true;
            self.machine.connecting();
        }
    }

    /// Drop the current connection, failing any in-flight request, and start a new one.
    pub fn reconnect(&mut self) {
        self.close();
        self.connect();
    }

    /// Close the connection. Resources are kept until [`TtsClient::shutdown`].
    pub fn close(&mut self) {
        self.connection.close();
        self.link_pending = false;
        self.machine.connection_lost(None);
    }

    /// Close the connection and release every tracked resource.
    pub fn shutdown(&mut self) {
        self.close();
        let released = self.tracker.release_all();
        if released > 0 {
            debug!("Released {} audio resources on shutdown", released);
        }
    }

    /// Switch the request framing used for subsequent submits.
    pub fn set_generation(&mut self, generation: ProtocolGeneration) {
        self.config.generation = generation;
    }

    pub fn set_language(&mut self, language: impl Into<String>) -> Result<()> {
        let language = language.into();
        if language.trim().is_empty() {
            return Err(ClientError::Config("language must not be empty".to_string()));
        }
        self.config.language = language;
        Ok(())
    }

    /// Submit text, with a voice sample when the service clones voices.
    pub fn submit(
        &mut self,
        text: impl Into<String>,
        reference: Option<ReferenceAudio>,
    ) -> Result<()> {
        let mut request = SynthesisRequest::new(text).with_language(self.config.language.clone());
        if let Some(reference) = reference {
            request = request.with_reference_audio(reference);
        }
        self.submit_request(request)
    }

    /// Validate, frame and send a request. Nothing is sent when this returns an error,
    /// and only a failed send changes the session state.
    pub fn submit_request(&mut self, mut request: SynthesisRequest) -> Result<()> {
        let tagged = self.config.tag_requests
            && self.config.generation == ProtocolGeneration::VoiceClone;
        if tagged {
            request.request_id = Some(self.next_request_id);
        }

        let frames = encode(&request, self.config.generation)?;
        if let Some(reference) = &request.reference_audio {
            debug!(
                "Attaching reference {} ({}, {} bytes)",
                reference.file_name,
                reference.content_type,
                reference.data.len()
            );
        }

        if !self.connection.is_open() {
            return Err(ClientError::NotConnected);
        }
        self.machine
            .begin(Instant::now())
            .map_err(ClientError::NotReady)?;
        self.tracker.clear_current();

        if let Err(e) = self.connection.send(frames) {
            self.machine.fail(FailureReason::Transport(e.to_string()));
            return Err(e);
        }
        if tagged {
            self.next_request_id += 1;
        }

        info!(
            "Submitted {} chars ({}, language {})",
            request.text.chars().count(),
            self.config.generation,
            request.language
        );
        Ok(())
    }

    /// Wait for the next connection event and apply it.
    ///
    /// While a request is in flight this also enforces the synthesis timeout. Waits
    /// indefinitely when nothing is connected and nothing is in flight.
    pub async fn next_update(&mut self) -> Option<ClientUpdate> {
        loop {
            let received = match self.machine.deadline(self.config.synthesis_timeout) {
                Some(deadline) => {
                    let deadline = tokio::time::Instant::from_std(deadline);
                    match tokio::time::timeout_at(deadline, self.events.recv()).await {
                        Ok(received) => received,
                        Err(_) => {
                            self.machine
                                .expire(Instant::now(), self.config.synthesis_timeout);
                            if let Some(reason) = self.machine.last_error() {
                                return Some(ClientUpdate::Failed(reason.clone()));
                            }
                            continue;
                        }
                    }
                }
                None => self.events.recv().await,
            };

            match received {
                Ok(event) => {
                    if let Some(update) = self.apply(event) {
                        return Some(update);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {} connection events", missed);
                    if let Some(update) = self.resync(missed) {
                        return Some(update);
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Pump events until the in-flight request has an outcome.
    pub async fn wait_for_outcome(&mut self) -> Result<ResourceId> {
        loop {
            match self.machine.phase() {
                Phase::Synthesizing => {}
                Phase::AudioReady => {
                    return self
                        .tracker
                        .current()
                        .map(AudioResource::id)
                        .ok_or(ClientError::NotReady(Phase::AudioReady));
                }
                Phase::Errored => {
                    let reason = self
                        .machine
                        .last_error()
                        .cloned()
                        .unwrap_or(FailureReason::ConnectionClosed);
                    return Err(ClientError::Failed(reason));
                }
                other => return Err(ClientError::NotReady(other)),
            }
            if self.next_update().await.is_none() {
                return Err(ClientError::NotConnected);
            }
        }
    }

    /// Pump events until the connection leaves `Connecting`.
    pub async fn wait_until_connected(&mut self) -> Result<()> {
        while self.link_pending {
            if self.next_update().await.is_none() {
                return Err(ClientError::NotConnected);
            }
        }
        if self.connection.is_open() {
            return Ok(());
        }
        Err(match self.last_disconnect.clone() {
            Some(error) => ClientError::Transport(error),
            None => ClientError::NotConnected,
        })
    }

    /// Line the session up with the connection after events were dropped.
    fn resync(&mut self, missed: u64) -> Option<ClientUpdate> {
        let state = self.connection.state();
        if state == ConnectionState::Connecting {
            return None;
        }
        self.link_pending = false;

        let before = self.machine.phase();
        if state == ConnectionState::Open {
            self.machine.connection_opened();
            if before != Phase::Synthesizing {
                return None;
            }
            // The reply may have been one of the dropped events.
            self.machine.fail(FailureReason::EventsLost(missed));
        } else {
            self.machine.connection_lost(None);
        }

        match self.machine.last_error() {
            Some(reason) if before == Phase::Synthesizing => {
                Some(ClientUpdate::Failed(reason.clone()))
            }
            _ if self.machine.phase() != before => {
                Some(ClientUpdate::Disconnected { error: None })
            }
            _ => None,
        }
    }

    fn apply(&mut self, event: ConnectionEvent) -> Option<ClientUpdate> {
        if event.epoch != self.connection.epoch() {
            debug!("Ignoring event from replaced connection {}", event.epoch);
            return None;
        }

        match event.kind {
            EventKind::Opened => {
                self.link_pending = false;
                self.machine.connection_opened();
                Some(ClientUpdate::Connected)
            }
            EventKind::Frame(IncomingFrame::Control(ControlMessage::Ping)) => {
                debug!("Received server ping");
                self.last_ping = Some(Instant::now());
                Some(ClientUpdate::Liveness)
            }
            EventKind::Frame(IncomingFrame::Control(ControlMessage::Other(kind))) => {
                debug!("Ignoring control frame {:?}", kind);
                None
            }
            EventKind::Frame(IncomingFrame::Audio(data)) => {
                if self.machine.audio_received() {
                    let resource = self.tracker.record(data);
                    info!("Audio ready: {} ({} bytes)", resource.id(), resource.len());
                    Some(ClientUpdate::AudioReady(resource.id()))
                } else {
                    Some(ClientUpdate::StaleAudio { bytes: data.len() })
                }
            }
            EventKind::ProtocolError(error) => Some(ClientUpdate::ProtocolError(error)),
            EventKind::Closed { error } => {
                let was_synthesizing = self.machine.phase() == Phase::Synthesizing;
                self.link_pending = false;
                self.machine.connection_lost(error.clone());
                self.last_disconnect = error.clone();
                match self.machine.last_error() {
                    Some(reason) if was_synthesizing => Some(ClientUpdate::Failed(reason.clone())),
                    _ => Some(ClientUpdate::Disconnected { error }),
                }
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn synthesis_state(&self) -> SynthesisState<'_> {
        SynthesisState {
            phase: self.machine.phase(),
            error: self.machine.last_error(),
            current: self.tracker.current(),
        }
    }

    pub fn audio(&self) -> &AudioTracker {
        &self.tracker
    }

    pub fn resource(&self, id: ResourceId) -> Option<&AudioResource> {
        self.tracker.get(id)
    }

    /// Retained audio, most recent first.
    pub fn history(&self) -> impl Iterator<Item = &AudioResource> {
        self.tracker.history()
    }

    pub fn release(&mut self, id: ResourceId) -> bool {
        self.tracker.release(id)
    }

    pub fn last_ping(&self) -> Option<Instant> {
        self.last_ping
    }

    /// Whether a submit would currently be accepted, text aside.
    pub fn can_submit(&self) -> bool {
        self.connection.is_open() && self.machine.phase().accepts_submit()
    }

    /// One-line human-readable status.
    pub fn status(&self) -> String {
        let state = self.connection.state();
        if state != ConnectionState::Open {
            return match (&self.last_disconnect, self.machine.last_error()) {
                (_, Some(reason)) => format!("{state} (last request failed: {reason})"),
                (Some(error), None) => format!("{state}: {error}"),
                (None, None) => state.to_string(),
            };
        }

        match self.machine.phase() {
            Phase::Synthesizing => "Synthesizing...".to_string(),
            Phase::AudioReady => match self.tracker.current() {
                Some(resource) => format!("Audio ready ({} bytes)", resource.len()),
                None => "Audio ready".to_string(),
            },
            Phase::Errored => match self.machine.last_error() {
                Some(reason) => format!("Error: {reason}"),
                None => "Error".to_string(),
            },
            Phase::Ready => state.to_string(),
            Phase::Idle | Phase::AwaitingConnection => ConnectionState::Connecting.to_string(),
        }
    }
}

impl Drop for TtsClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
