use bytes::Bytes;

/// JPEG start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

const MIN_FRAME_LEN: usize = SOI.len() + EOI.len();

/// One still image, treated as an opaque blob.
///
/// A `Frame` can only be built from bytes that pass the weak JPEG check
/// (leading SOI, trailing EOI). Nothing else about the image is inspected.
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Validate `data` and wrap it.
    pub fn parse(data: Bytes) -> Result<Self, FrameError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort { got: data.len() });
        }
        if !data.starts_with(&SOI) {
            return Err(FrameError::MissingStartMarker);
        }
        if !data.ends_with(&EOI) {
            return Err(FrameError::MissingEndMarker);
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the payload.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: got {got} bytes, expected at least {min}", min = MIN_FRAME_LEN)]
    TooShort { got: usize },
    #[error("frame does not start with the JPEG SOI marker (FF D8)")]
    MissingStartMarker,
    #[error("frame does not end with the JPEG EOI marker (FF D9)")]
    MissingEndMarker,
}
