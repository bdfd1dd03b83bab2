//! Tokio codec for framed protocol messages

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::connection::ConnectionId;
use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_BODY_SIZE};
use crate::message::Message;

/// One self-delimited record exchanged over the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Logical connection this frame belongs to
    pub connection_id: ConnectionId,
    /// The message payload
    pub message: Message,
}

impl Frame {
    /// Create a new frame
    pub fn new(connection_id: ConnectionId, message: Message) -> Self {
        Self {
            connection_id,
            message,
        }
    }

    /// Data frame for a connection
    pub fn data(connection_id: ConnectionId, payload: impl Into<bytes::Bytes>) -> Self {
        Self::new(connection_id, Message::Data(payload.into()))
    }

    /// Close request for a connection
    pub fn close_request(connection_id: ConnectionId) -> Self {
        Self::new(connection_id, Message::CloseRequest)
    }

    /// Close acknowledgment for a connection
    pub fn close_ack(connection_id: ConnectionId) -> Self {
        Self::new(connection_id, Message::CloseAck)
    }

    /// Keepalive ping
    pub fn keep_alive() -> Self {
        Self::new(ConnectionId::control(), Message::KeepAlive)
    }
}

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Header already consumed from the buffer, waiting for its body
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let body_len = header.body_length as usize;
        if body_len > MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge {
                size: body_len,
                max: MAX_BODY_SIZE,
            });
        }

        if src.len() < body_len {
            src.reserve(body_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let body = src.split_to(body_len).freeze();
        let frame: Frame = bincode::deserialize(&body)?;

        let body_type = frame.message.message_type();
        if body_type != header.message_type {
            return Err(ProtocolError::TypeMismatch {
                header: header.message_type,
                body: body_type,
            });
        }

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = bincode::serialize(&frame)?;
        if body.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge {
                size: body.len(),
                max: MAX_BODY_SIZE,
            });
        }

        let header = FrameHeader::new(frame.message.message_type(), body.len() as u32);
        header.encode(dst);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::HEADER_SIZE;
    use crate::message::MessageType;
    use bytes::Bytes;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::data("c1".into(), Bytes::from_static(b"PING")),
            Frame::data("c2".into(), Bytes::from_static(b"hello over there")),
            Frame::keep_alive(),
            Frame::data("c1".into(), Bytes::new()),
            Frame::close_request("c2".into()),
            Frame::data("c3".into(), Bytes::from(vec![0xAB; 3000])),
            Frame::close_ack("c2".into()),
            Frame::close_request("c1".into()),
        ]
    }

    fn encode_all(frames: &[Frame]) -> BytesMut {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for frame in frames {
            codec.encode(frame.clone(), &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_codec_data_message() {
        let mut codec = FrameCodec::new();
        let frame = Frame::data("127.0.0.1:5000".into(), Bytes::from("Hello, world!"));

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        assert_eq!(buf[0], MessageType::Data.as_u8());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = FrameCodec::new();
        let mut full_buf = encode_all(&[Frame::close_request("c1".into())]);

        // Header not complete yet
        let mut partial = full_buf.split_to(HEADER_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Header complete, body missing
        partial.extend_from_slice(&full_buf.split_to(2));
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, Frame::close_request("c1".into()));
    }

    #[test]
    fn test_interleaved_frames_survive_any_split_point() {
        let frames = sample_frames();
        let encoded = encode_all(&frames);

        for split in 0..=encoded.len() {
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();

            for chunk in [&encoded[..split], &encoded[split..]] {
                buf.extend_from_slice(chunk);
                while let Some(frame) = codec.decode(&mut buf).unwrap() {
                    decoded.push(frame);
                }
            }

            assert_eq!(decoded, frames, "split at byte {}", split);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let frames = sample_frames();
        let encoded = encode_all(&frames);

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in encoded.iter() {
            buf.extend_from_slice(&[*byte]);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }

        assert_eq!(decoded, frames);
    }

    #[test]
    fn test_header_body_type_mismatch_is_fatal() {
        let mut buf = encode_all(&[Frame::close_ack("c1".into())]);
        buf[0] = MessageType::CloseRequest.as_u8();

        let result = FrameCodec::new().decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::TypeMismatch {
                header: MessageType::CloseRequest,
                body: MessageType::CloseAck,
            })
        ));
    }

    #[test]
    fn test_garbage_body_is_fatal() {
        let mut buf = BytesMut::from(&[MessageType::Data.as_u8(), 0, 0, 3, 0xFF, 0xFF, 0xFF][..]);
        let result = FrameCodec::new().decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_framed_read_over_stream() {
        let frames = sample_frames();
        let encoded = encode_all(&frames).freeze();

        let reader = FramedRead::new(&encoded[..], FrameCodec::new());
        let decoded: Vec<Frame> = reader.map(|r| r.unwrap()).collect().await;

        assert_eq!(decoded, frames);
    }
}
