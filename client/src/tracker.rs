//! Ownership of received audio.
//!
//! Every audio frame becomes an [`AudioResource`] owned by the [`AudioTracker`]. Callers
//! only ever borrow resources. Each resource is released exactly once: when a newer one
//! replaces it (single-slot), when it falls off the end of the history, or on teardown.

use std::collections::VecDeque;
use std::fmt;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sirius_protocol::AUDIO_CONTENT_TYPE;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep only the latest resource.
    SingleSlot,
    /// Keep up to this many, most recent first.
    History(NonZeroUsize),
}

impl RetentionPolicy {
    fn capacity(self) -> usize {
        match self {
            Self::SingleSlot => 1,
            Self::History(max) => max.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audio-{}", self.0)
    }
}

/// Format details read from the WAV header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub duration: Duration,
}

/// A playable handle for one synthesized audio artifact.
#[derive(Debug, Clone)]
pub struct AudioResource {
    id: ResourceId,
    data: Arc<[u8]>,
    received_at: SystemTime,
}

impl AudioResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle on the bytes, for handing to a player on another thread.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn content_type(&self) -> &'static str {
        AUDIO_CONTENT_TYPE
    }

    /// When the frame arrived.
    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// Header information, if the payload is a readable WAV file.
    pub fn wav_info(&self) -> Option<WavInfo> {
        let reader = hound::WavReader::new(Cursor::new(&self.data[..])).ok()?;
        let spec = reader.spec();
        let duration = if spec.sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(reader.duration() as f64 / spec.sample_rate as f64)
        };
        Some(WavInfo {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            duration,
        })
    }

    /// Write the audio as-is to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, &self.data)?;
        debug!("Saved {} to {}", self.id, path.display());
        Ok(())
    }
}

/// Lifetime counters, mainly for leak checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub created: u64,
    pub released: u64,
}

impl TrackerStats {
    pub fn live(&self) -> u64 {
        self.created - self.released
    }
}

pub struct AudioTracker {
    policy: RetentionPolicy,
    /// Most recent first.
    entries: VecDeque<AudioResource>,
    current: Option<ResourceId>,
    next_id: u64,
    stats: TrackerStats,
}

impl AudioTracker {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            entries: VecDeque::with_capacity(policy.capacity()),
            current: None,
            next_id: 1,
            stats: TrackerStats::default(),
        }
    }

    /// Take ownership of a received payload and make it the current resource.
    pub fn record(&mut self, data: Vec<u8>) -> &AudioResource {
        let id = ResourceId(self.next_id);
        self.next_id += 1;

        let evicted = match self.policy {
            RetentionPolicy::SingleSlot => self.entries.drain(..).collect::<Vec<_>>(),
            RetentionPolicy::History(max) => {
                let keep = max.get() - 1;
                if self.entries.len() > keep {
                    self.entries.drain(keep..).collect()
                } else {
                    Vec::new()
                }
            }
        };
        for resource in evicted {
            self.dispose(resource);
        }

        debug!("Recorded {} ({} bytes)", id, data.len());
        self.entries.push_front(AudioResource {
            id,
            data: data.into(),
            received_at: SystemTime::now(),
        });
        self.stats.created += 1;
        self.current = Some(id);

        &self.entries[0]
    }

    /// The resource produced by the latest successful synthesis, if it still stands.
    pub fn current(&self) -> Option<&AudioResource> {
        let id = self.current?;
        self.get(id)
    }

    /// Forget the current resource ahead of a new request.
    ///
    /// Single-slot mode releases it; history mode keeps it in the history.
    pub fn clear_current(&mut self) {
        if let Some(id) = self.current.take() {
            if self.policy == RetentionPolicy::SingleSlot {
                self.release(id);
            }
        }
    }

    pub fn get(&self, id: ResourceId) -> Option<&AudioResource> {
        self.entries.iter().find(|resource| resource.id == id)
    }

    /// Retained resources, most recent first.
    pub fn history(&self) -> impl Iterator<Item = &AudioResource> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release one resource. Returns `false` if it was already released.
    pub fn release(&mut self, id: ResourceId) -> bool {
        match self.entries.iter().position(|resource| resource.id == id) {
            Some(index) => {
                if let Some(resource) = self.entries.remove(index) {
                    self.dispose(resource);
                }
                true
            }
            None => {
                warn!("Release of unknown or already released {}", id);
                false
            }
        }
    }

    /// Release everything. Returns how many resources were released.
    pub fn release_all(&mut self) -> usize {
        let drained: Vec<_> = self.entries.drain(..).collect();
        let count = drained.len();
        for resource in drained {
            self.dispose(resource);
        }
        count
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    fn dispose(&mut self, resource: AudioResource) {
        if self.current == Some(resource.id) {
            self.current = None;
        }
        self.stats.released += 1;
        debug!("Released {}", resource.id);
    }
}

impl Drop for AudioTracker {
    fn drop(&mut self) {
        self.release_all();
    }
}
