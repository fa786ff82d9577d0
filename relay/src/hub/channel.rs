use bytes::Bytes;
use tokio::sync::mpsc;

/// Output side of one viewer connection.
///
/// Writes never wait: a channel that cannot take a chunk right now reports
/// itself as not writable and the chunk is dropped for that viewer.
pub trait ClientChannel: Send {
    /// The viewer is gone and will never read again.
    fn is_closed(&self) -> bool;

    /// A chunk written now would be accepted without waiting.
    fn is_writable(&self) -> bool;

    /// Queue `chunk`. Returns `false` if it was not accepted.
    fn write(&self, chunk: Bytes) -> bool;
}

/// Bounded queue feeding an HTTP response body.
impl ClientChannel for mpsc::Sender<Bytes> {
    fn is_closed(&self) -> bool {
        mpsc::Sender::is_closed(self)
    }

    fn is_writable(&self) -> bool {
        !mpsc::Sender::is_closed(self) && self.capacity() > 0
    }

    fn write(&self, chunk: Bytes) -> bool {
        self.try_send(chunk).is_ok()
    }
}
