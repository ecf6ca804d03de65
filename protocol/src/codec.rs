//! Framing of outgoing requests and classification of incoming frames.

use serde_json::Value;

use crate::{
    CloneHeader, ControlMessage, EncodeError, Frame, IncomingFrame, ProtocolError,
    ProtocolGeneration, SynthesisRequest, ValidationError,
};

/// Turn a request into the ordered frames the given generation puts on the wire.
///
/// The returned frames form one unit: for [`ProtocolGeneration::VoiceClone`] the service
/// pairs the binary frame with the control frame sent right before it, so callers must
/// transmit the whole vector without interleaving anything else.
pub fn encode(
    request: &SynthesisRequest,
    generation: ProtocolGeneration,
) -> Result<Vec<Frame>, EncodeError> {
    if request.text.trim().is_empty() {
        return Err(ValidationError::EmptyText.into());
    }

    match generation {
        ProtocolGeneration::TextOnly => {
            if request.reference_audio.is_some() {
                return Err(ValidationError::ReferenceAudioNotSupported.into());
            }
            Ok(vec![Frame::Text(request.text.clone())])
        }
        ProtocolGeneration::VoiceClone => {
            let reference = request
                .reference_audio
                .as_ref()
                .ok_or(ValidationError::MissingReferenceAudio)?;
            if reference.data.is_empty() {
                return Err(
                    ValidationError::EmptyReferenceAudio(reference.file_name.clone()).into(),
                );
            }
            if request.language.trim().is_empty() {
                return Err(ValidationError::EmptyLanguage.into());
            }

            let header = CloneHeader {
                text: request.text.clone(),
                language: request.language.clone(),
                request_id: request.request_id,
            };
            let header = serde_json::to_string(&header).map_err(EncodeError::Header)?;

            Ok(vec![Frame::Text(header), Frame::Binary(reference.data.clone())])
        }
    }
}

/// Classify a received frame by its wire representation.
///
/// Binary frames are audio, whole and unframed. Text frames are decoded as JSON and only
/// their `type` tag is looked at.
pub fn classify(frame: Frame) -> Result<IncomingFrame, ProtocolError> {
    match frame {
        Frame::Binary(data) => Ok(IncomingFrame::Audio(data)),
        Frame::Text(text) => {
            let value: Value = serde_json::from_str(&text)?;
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string);

            Ok(IncomingFrame::Control(match kind.as_deref() {
                Some("ping") => ControlMessage::Ping,
                _ => ControlMessage::Other(kind),
            }))
        }
    }
}
