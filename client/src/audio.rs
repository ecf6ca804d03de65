//! Audio playback using rodio

use std::io::Cursor;
use std::sync::Arc;

use anyhow::Result;
use rodio::{Decoder, OutputStream, Sink};

/// Play WAV audio on the default output device, blocking until it finishes.
pub fn play_wav_bytes(wav_data: Arc<[u8]>) -> Result<()> {
    let (_stream, stream_handle) = OutputStream::try_default()?;
    let sink = Sink::try_new(&stream_handle)?;

    let source = Decoder::new(Cursor::new(wav_data))?;
    sink.append(source);
    sink.sleep_until_end();

    Ok(())
}
