//! Sirius voice client
//!
//! Keeps one WebSocket open to a speech-synthesis service, sends text (and, for voice
//! cloning, a reference sample) and tracks the audio that comes back.
//!
//! ```rust,no_run
//! use sirius_client::{ClientConfig, TtsClient};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut client = TtsClient::new(ClientConfig::from_env()?)?;
//! client.connect();
//! client.wait_until_connected().await?;
//!
//! client.submit("Hello world", None)?;
//! let id = client.wait_for_outcome().await?;
//! if let Some(audio) = client.resource(id) {
//!     audio.save("hello.wav")?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod machine;
pub mod tracker;

pub use client::{ClientUpdate, SynthesisState, TtsClient};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionEvent, ConnectionState, EventKind};
pub use error::{ClientError, FailureReason, Result};
pub use machine::{Phase, SynthesisMachine};
pub use tracker::{AudioResource, AudioTracker, ResourceId, RetentionPolicy, TrackerStats, WavInfo};

pub use sirius_protocol::{ProtocolGeneration, ReferenceAudio, SynthesisRequest};
