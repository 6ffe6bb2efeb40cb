//! Stock filters: pass-through, length-prefixed framing and line framing.

use super::{expect_message, FilterError, Frame, Message, ProtocolFilter};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Passes every message through unchanged in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFilter;

impl ProtocolFilter for NoopFilter {
    fn name(&self) -> &str {
        "noop"
    }

    fn filter_in(&mut self, message: Box<dyn Message>) -> Result<Vec<Box<dyn Message>>, FilterError> {
        Ok(vec![message])
    }

    fn filter_out(&mut self, message: Box<dyn Message>) -> Result<Box<dyn Message>, FilterError> {
        Ok(message)
    }
}

const LENGTH_HEADER: usize = 4;

/// Frames carrying a 4-byte big-endian length header.
///
/// Inbound, partial frames are buffered across calls until complete. A header
/// announcing more than `max_frame_length` bytes drops the buffer and fails,
/// since the stream can no longer be trusted.
#[derive(Debug)]
pub struct LengthPrefixedFramer {
    max_frame_length: usize,
    buffer: BytesMut,
}

impl LengthPrefixedFramer {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            buffer: BytesMut::new(),
        }
    }

    /// Bytes currently held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn too_large(&self, size: usize) -> FilterError {
        FilterError::FrameTooLarge {
            filter: self.name().to_string(),
            size,
            limit: self.max_frame_length,
        }
    }
}

impl Default for LengthPrefixedFramer {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl ProtocolFilter for LengthPrefixedFramer {
    fn name(&self) -> &str {
        "length-prefixed"
    }

    fn filter_in(&mut self, message: Box<dyn Message>) -> Result<Vec<Box<dyn Message>>, FilterError> {
        let chunk: Frame = expect_message(message)?;
        self.buffer.extend_from_slice(&chunk.data);

        let mut frames: Vec<Box<dyn Message>> = Vec::new();
        while self.buffer.len() >= LENGTH_HEADER {
            let length = (&self.buffer[..LENGTH_HEADER]).get_u32() as usize;
            if length > self.max_frame_length {
                self.buffer.clear();
                return Err(self.too_large(length));
            }
            if self.buffer.len() < LENGTH_HEADER + length {
                break;
            }
            self.buffer.advance(LENGTH_HEADER);
            let data = self.buffer.split_to(length).freeze();
            frames.push(Box::new(Frame::new(chunk.origin, data)));
        }
        Ok(frames)
    }

    fn filter_out(&mut self, message: Box<dyn Message>) -> Result<Box<dyn Message>, FilterError> {
        let origin = message.origin();
        let payload = payload_of(&*message)?;
        if payload.len() > self.max_frame_length {
            return Err(self.too_large(payload.len()));
        }

        let mut framed = BytesMut::with_capacity(LENGTH_HEADER + payload.len());
        framed.put_u32(payload.len() as u32);
        framed.put_slice(&payload);
        Ok(Box::new(Frame::new(origin, framed.freeze())))
    }
}

/// Newline-delimited text framing. A trailing `\r` is stripped inbound and a
/// `\n` is appended outbound.
#[derive(Debug)]
pub struct LineFramer {
    max_line_length: usize,
    buffer: BytesMut,
}

impl LineFramer {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            buffer: BytesMut::new(),
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(8 * 1024)
    }
}

impl ProtocolFilter for LineFramer {
    fn name(&self) -> &str {
        "line"
    }

    fn filter_in(&mut self, message: Box<dyn Message>) -> Result<Vec<Box<dyn Message>>, FilterError> {
        let chunk: Frame = expect_message(message)?;
        self.buffer.extend_from_slice(&chunk.data);

        let mut lines: Vec<Box<dyn Message>> = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line = self.buffer.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }
            if line.len() > self.max_line_length {
                return Err(FilterError::FrameTooLarge {
                    filter: self.name().to_string(),
                    size: line.len(),
                    limit: self.max_line_length,
                });
            }
            lines.push(Box::new(Frame::new(chunk.origin, line.freeze())));
        }

        if self.buffer.len() > self.max_line_length {
            let size = self.buffer.len();
            self.buffer.clear();
            return Err(FilterError::FrameTooLarge {
                filter: self.name().to_string(),
                size,
                limit: self.max_line_length,
            });
        }
        Ok(lines)
    }

    fn filter_out(&mut self, message: Box<dyn Message>) -> Result<Box<dyn Message>, FilterError> {
        let origin = message.origin();
        let payload = payload_of(&*message)?;
        if payload.contains(&b'\n') {
            return Err(FilterError::Malformed {
                filter: self.name().to_string(),
                reason: "outbound line contains a newline".to_string(),
            });
        }

        let mut line = BytesMut::with_capacity(payload.len() + 1);
        line.put_slice(&payload);
        line.put_u8(b'\n');
        Ok(Box::new(Frame::new(origin, line.freeze())))
    }
}

fn payload_of(message: &dyn Message) -> Result<Bytes, FilterError> {
    message
        .payload()
        .ok_or(FilterError::NotEncodable(message.event_name()))
}
