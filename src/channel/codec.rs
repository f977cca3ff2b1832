//! Wire formats for channel messages.

use crate::error::RelayError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

/// How values are framed on the WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WireFormat {
    /// One JSON document per text frame.
    #[default]
    Text,
    /// One gzip-compressed JSON document per binary frame.
    Compressed,
}

impl WireFormat {
    /// Serialize `value` into a single frame.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<WsMessage, RelayError> {
        let json = serde_json::to_string(value)?;
        match self {
            WireFormat::Text => Ok(WsMessage::Text(json.into())),
            WireFormat::Compressed => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(json.as_bytes())?;
                let compressed = encoder.finish()?;
                Ok(WsMessage::Binary(compressed.into()))
            }
        }
    }

    /// Decode a data frame.
    ///
    /// Returns `Ok(None)` for control frames. A frame of the wrong type for this
    /// format, or one that does not decode, is a protocol violation.
    pub fn decode<T: DeserializeOwned>(&self, frame: WsMessage) -> Result<Option<T>, RelayError> {
        match (self, frame) {
            (WireFormat::Text, WsMessage::Text(text)) => {
                let value = serde_json::from_str(text.as_str())
                    .map_err(|e| RelayError::ProtocolViolation(format!("malformed message: {e}")))?;
                Ok(Some(value))
            }
            (WireFormat::Compressed, WsMessage::Binary(data)) => {
                let mut json = Vec::new();
                GzDecoder::new(&data[..])
                    .read_to_end(&mut json)
                    .map_err(|e| RelayError::ProtocolViolation(format!("bad gzip payload: {e}")))?;
                let value = serde_json::from_slice(&json)
                    .map_err(|e| RelayError::ProtocolViolation(format!("malformed message: {e}")))?;
                Ok(Some(value))
            }
            (WireFormat::Text, WsMessage::Binary(_)) => Err(RelayError::ProtocolViolation(
                "binary frame on a text channel".to_string(),
            )),
            (WireFormat::Compressed, WsMessage::Text(_)) => Err(RelayError::ProtocolViolation(
                "text frame on a compressed channel".to_string(),
            )),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerMessage;

    fn sample() -> ServerMessage {
        ServerMessage::FileContentRequest {
            path: "/proj/x.ts".to_string(),
        }
    }

    #[test]
    fn compressed_frames_are_binary_gzip() {
        let frame = WireFormat::Compressed.encode(&sample()).expect("encodes");
        let WsMessage::Binary(data) = &frame else {
            panic!("expected binary frame, got {frame:?}");
        };
        assert_eq!(&data[..2], &[0x1f, 0x8b]);
        let decoded: Option<ServerMessage> = WireFormat::Compressed.decode(frame).expect("decodes");
        assert_eq!(decoded, Some(sample()));
    }

    #[test]
    fn text_frames_are_plain_json() {
        let frame = WireFormat::Text.encode(&sample()).expect("encodes");
        let WsMessage::Text(text) = &frame else {
            panic!("expected text frame, got {frame:?}");
        };
        assert!(text.as_str().contains("\"kind\":\"file_content_request\""));
    }

    #[test]
    fn mismatched_frame_type_is_a_violation() {
        let frame = WireFormat::Compressed.encode(&sample()).expect("encodes");
        let res: Result<Option<ServerMessage>, _> = WireFormat::Text.decode(frame);
        assert!(matches!(res, Err(RelayError::ProtocolViolation(_))));
    }

    #[test]
    fn garbage_is_a_violation() {
        let res: Result<Option<ServerMessage>, _> =
            WireFormat::Compressed.decode(WsMessage::Binary(vec![1u8, 2, 3].into()));
        assert!(matches!(res, Err(RelayError::ProtocolViolation(_))));
    }

    #[test]
    fn control_frames_are_skipped() {
        let res: Option<ServerMessage> = WireFormat::Text
            .decode(WsMessage::Ping(Vec::new().into()))
            .expect("ping is not an error");
        assert!(res.is_none());
    }
}
