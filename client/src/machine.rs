//! Lifecycle of the single in-flight synthesis request.
//!
//! ```text
//! Idle ─connect─▶ AwaitingConnection ─open─▶ Ready ─submit─▶ Synthesizing ─audio─▶ AudioReady
//!                         ▲                    ▲                  │                    │
//!                         └──── closed ────────┤                  └─close/timeout─▶ Errored
//!                                              └──────────── submit ◀──────────────────┘
//! ```
//!
//! The machine does no I/O. The client feeds it connection events and submits, and reads
//! back the phase and the last failure.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No connection has been requested yet.
    #[default]
    Idle,
    AwaitingConnection,
    Ready,
    Synthesizing,
    AudioReady,
    Errored,
}

impl Phase {
    /// Whether a new request may start from this phase.
    pub fn accepts_submit(self) -> bool {
        matches!(self, Phase::Ready | Phase::AudioReady | Phase::Errored)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingConnection => "waiting for connection",
            Self::Ready => "ready",
            Self::Synthesizing => "synthesizing",
            Self::AudioReady => "audio ready",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct SynthesisMachine {
    phase: Phase,
    last_error: Option<FailureReason>,
    started_at: Option<Instant>,
}

impl SynthesisMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&FailureReason> {
        self.last_error.as_ref()
    }

    /// When the in-flight request was accepted.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// A connection attempt was started.
    pub fn connecting(&mut self) {
        match self.phase {
            Phase::Idle | Phase::Ready | Phase::AudioReady => {
                self.transition(Phase::AwaitingConnection)
            }
            // Keep the failure visible until the socket is back.
            Phase::Errored | Phase::AwaitingConnection | Phase::Synthesizing => {}
        }
    }

    /// The connection reported it is open. A failure kept from the previous link is
    /// cleared here, since no request is in flight on the new one.
    pub fn connection_opened(&mut self) {
        match self.phase {
            Phase::Idle | Phase::AwaitingConnection => self.transition(Phase::Ready),
            Phase::Errored => {
                self.last_error = None;
                self.started_at = None;
                self.transition(Phase::Ready);
            }
            _ => debug!("Connection opened while {}", self.phase),
        }
    }

    /// Accept a new request. On error the phase is unchanged.
    pub fn begin(&mut self, now: Instant) -> Result<(), Phase> {
        if !self.phase.accepts_submit() {
            return Err(self.phase);
        }
        self.last_error = None;
        self.started_at = Some(now);
        self.transition(Phase::Synthesizing);
        Ok(())
    }

    /// An audio frame arrived. Returns `false` if it was not expected.
    pub fn audio_received(&mut self) -> bool {
        if self.phase != Phase::Synthesizing {
            warn!("Ignoring stale audio frame while {}", self.phase);
            return false;
        }
        if let Some(started) = self.started_at.take() {
            info!("Synthesis finished in {:?}", started.elapsed());
        }
        self.transition(Phase::AudioReady);
        true
    }

    /// The in-flight request cannot complete.
    pub fn fail(&mut self, reason: FailureReason) {
        if self.phase != Phase::Synthesizing {
            debug!("Dropping failure outside synthesis: {}", reason);
            return;
        }
        warn!("Synthesis failed: {}", reason);
        self.started_at = None;
        self.last_error = Some(reason);
        self.transition(Phase::Errored);
    }

    /// The connection went away, with an error message when there was one.
    pub fn connection_lost(&mut self, error: Option<String>) {
        match self.phase {
            Phase::Synthesizing => self.fail(match error {
                Some(reason) => FailureReason::Transport(reason),
                None => FailureReason::ConnectionClosed,
            }),
            Phase::Errored | Phase::Idle => {}
            _ => self.transition(Phase::AwaitingConnection),
        }
    }

    /// When the in-flight request times out, if one is in flight.
    pub fn deadline(&self, timeout: Option<Duration>) -> Option<Instant> {
        match (self.phase, self.started_at, timeout) {
            (Phase::Synthesizing, Some(started), Some(timeout)) => Some(started + timeout),
            _ => None,
        }
    }

    /// Fail the in-flight request if its deadline has passed. Returns whether it did.
    pub fn expire(&mut self, now: Instant, timeout: Option<Duration>) -> bool {
        match (self.deadline(timeout), timeout) {
            (Some(deadline), Some(timeout)) if now >= deadline => {
                self.fail(FailureReason::Timeout(timeout));
                true
            }
            _ => false,
        }
    }

    fn transition(&mut self, next: Phase) {
        if self.phase != next {
            debug!("Synthesis phase: {} -> {}", self.phase, next);
            self.phase = next;
        }
    }
}
