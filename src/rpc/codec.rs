//! Length-prefixed message framing.
//!
//! Every message on the wire is a 5 byte header (1 byte compression flag,
//! 4 byte big-endian length) followed by the message bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::rpc::status::Status;

/// Size of the per-message frame header.
pub const HEADER_LEN: usize = 5;

/// Default upper bound on a single decoded message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Frame a single uncompressed message.
pub fn encode(message: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + message.len());
    frame.put_u8(0);
    frame.put_u32(message.len() as u32);
    frame.extend_from_slice(message);
    frame.freeze()
}

/// Incremental decoder fed with body chunks as they arrive.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_message_size,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<Bytes>, Status> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        match self.buffer[0] {
            0 => {}
            1 => return Err(Status::unimplemented("compressed messages are not supported")),
            flag => return Err(Status::internal(format!("invalid frame flag {flag}"))),
        }

        let len = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;
        if len > self.max_message_size {
            return Err(Status::resource_exhausted(format!(
                "message of {len} bytes exceeds the limit of {} bytes",
                self.max_message_size
            )));
        }
        if self.buffer.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buffer.advance(HEADER_LEN);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    /// Fail if the body ended in the middle of a frame.
    pub fn finish(&self) -> Result<(), Status> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(Status::internal("request body ended in the middle of a message"))
        }
    }
}
