use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{self, Frame};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Turns a byte stream into RESP frames and back.
///
/// Decoded items are themselves results: a malformed frame that can be skipped is handed out as
/// an `Err` item and decoding carries on with the bytes after it, while a terminal failure is
/// returned as the decoder error, which ends a `FramedRead` stream.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> FrameCodec {
        FrameCodec { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, frame::Error>;
    type Error = frame::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&src[..]);
        let item = match Frame::parse(&mut cursor) {
            Ok(frame) => Ok(frame),
            Err(frame::Error::Incomplete) => {
                // A pending frame may not grow the buffer without bound.
                if src.len() > self.max_frame_size {
                    return Err(frame::Error::FrameTooLarge(self.max_frame_size));
                }
                return Ok(None);
            }
            Err(err) if err.is_terminal() => return Err(err),
            Err(err) => Err(err),
        };

        // The cursor never moves past the end of the buffer, so the position fits in usize.
        let position = cursor.position() as usize;

        // Remove the parsed (or rejected) frame from the buffer.
        src.advance(position);

        Ok(Some(item))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            None => Err(frame::Error::UnexpectedEof),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = frame::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&frame.serialize());
        Ok(())
    }
}
