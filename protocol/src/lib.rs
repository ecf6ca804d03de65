//! Shared protocol definitions for the Sirius voice client.
//!
//! Two request generations are spoken over the same `/tts-stream` socket:
//! - Generation A: the client sends the text to synthesize as one raw text frame
//! - Generation B: the client sends a JSON `{"text", "language"}` frame, immediately
//!   followed by a binary frame carrying the reference voice sample
//!
//! In both cases the service answers with one binary frame holding a complete WAV file,
//! and may send `{"type": "ping"}` text frames at any time to signal liveness.

pub mod codec;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::{classify, encode};

/// Fixed path of the synthesis socket on the service.
pub const STREAM_PATH: &str = "/tts-stream";

/// Language used when the caller does not pick one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Content type of the audio the service returns.
pub const AUDIO_CONTENT_TYPE: &str = "audio/wav";

/// One discrete message unit on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which request framing the service expects.
///
/// There is no version handshake on the wire, so the generation is always an explicit
/// client-side choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolGeneration {
    /// Raw text only.
    #[default]
    TextOnly,
    /// JSON control frame followed by the reference voice sample.
    VoiceClone,
}

impl ProtocolGeneration {
    pub fn requires_reference_audio(self) -> bool {
        matches!(self, ProtocolGeneration::VoiceClone)
    }
}

impl fmt::Display for ProtocolGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TextOnly => write!(f, "text"),
            Self::VoiceClone => write!(f, "clone"),
        }
    }
}

impl FromStr for ProtocolGeneration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "a" | "text-only" => Ok(Self::TextOnly),
            "clone" | "b" | "voice-clone" => Ok(Self::VoiceClone),
            other => Err(format!("unknown protocol generation '{other}' (expected 'text' or 'clone')")),
        }
    }
}

/// A user-supplied voice sample used to condition synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceAudio {
    /// Name the sample was loaded from, used in logs and errors.
    pub file_name: String,
    /// MIME type of `data`, `audio/wav` unless the caller says otherwise.
    pub content_type: String,
    /// The encoded sample, sent unchanged as the binary frame.
    pub data: Vec<u8>,
}

impl ReferenceAudio {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: AUDIO_CONTENT_TYPE.to_string(),
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// One submission, built fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    /// Text to synthesize. Must contain something other than whitespace.
    pub text: String,
    /// Language code, [`DEFAULT_LANGUAGE`] unless set.
    pub language: String,
    /// Voice sample to clone. Required by Generation B, refused by Generation A.
    pub reference_audio: Option<ReferenceAudio>,
    /// Echoed in the control frame when set. Only meaningful for Generation B.
    pub request_id: Option<u64>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            reference_audio: None,
            request_id: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_reference_audio(mut self, reference: ReferenceAudio) -> Self {
        self.reference_audio = Some(reference);
        self
    }

    pub fn with_request_id(mut self, id: u64) -> Self {
        self.request_id = Some(id);
        self
    }
}

/// JSON body of the Generation B control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneHeader {
    pub text: String,
    pub language: String,
    /// Client-chosen tag for the request. Omitted from the JSON when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

/// Structured control data received from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Keep-alive from the service.
    Ping,
    /// Any other control content; carried only for logging.
    Other(Option<String>),
}

/// An incoming frame after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingFrame {
    Control(ControlMessage),
    /// One complete synthesized audio artifact.
    Audio(Vec<u8>),
}

/// A request rejected before anything is put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("text to synthesize is empty")]
    EmptyText,
    #[error("language must not be empty")]
    EmptyLanguage,
    #[error("voice cloning requires a reference audio sample")]
    MissingReferenceAudio,
    #[error("reference audio '{0}' is empty")]
    EmptyReferenceAudio(String),
    #[error("the text-only protocol cannot carry reference audio")]
    ReferenceAudioNotSupported,
}

/// A request that could not be turned into frames.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("cannot serialize control frame: {0}")]
    Header(#[source] serde_json::Error),
}

/// An incoming frame that could not be understood.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed control frame: {0}")]
    MalformedControl(#[from] serde_json::Error),
}
