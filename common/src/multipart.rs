//! Chunk encoding for the `multipart/x-mixed-replace` viewer stream.
//!
//! Each frame is sent as:
//!
//! ```text
//! [\r\n\r\n]--stream\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>
//! ```
//!
//! The leading `\r\n\r\n` separator is only written before the second and
//! later chunks of a given viewer.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::Frame;

pub const BOUNDARY: &str = "stream";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=stream";

const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Encode one multipart chunk for `frame`.
pub fn encode_chunk(frame: &Frame, first: bool) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let sep = if first { 0 } else { SEPARATOR.len() };
    let mut buf = BytesMut::with_capacity(sep + header.len() + frame.len());
    if !first {
        buf.put_slice(SEPARATOR);
    }
    buf.put_slice(header.as_bytes());
    buf.put_slice(frame.as_bytes());
    buf.freeze()
}

/// The two encodings of one frame: as a viewer's opening chunk, and as any
/// later chunk. Built once per broadcast and shared by every viewer.
#[derive(Debug, Clone)]
pub struct FrameChunks {
    pub first: Bytes,
    pub subsequent: Bytes,
}

impl FrameChunks {
    pub fn new(frame: &Frame) -> Self {
        let subsequent = encode_chunk(frame, false);
        let first = subsequent.slice(SEPARATOR.len()..);
        Self { first, subsequent }
    }

    pub fn for_client(&self, frames_sent: u64) -> Bytes {
        if frames_sent == 0 {
            self.first.clone()
        } else {
            self.subsequent.clone()
        }
    }
}
