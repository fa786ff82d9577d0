use std::sync::Arc;

use bytes::Bytes;
use frame_relay_common::frame::{Frame, FrameError};
use tracing::{debug, warn};

use crate::hub::FrameHub;
use crate::watchdog::Watchdog;

/// Entry point for frames uploaded by the capture process.
#[derive(Clone)]
pub struct Ingest {
    hub: Arc<FrameHub>,
    watchdog: Arc<Watchdog>,
}

impl Ingest {
    pub fn new(hub: Arc<FrameHub>, watchdog: Arc<Watchdog>) -> Self {
        Self { hub, watchdog }
    }

    /// Validate and publish one frame. Returns how many viewers received it.
    ///
    /// A malformed upload is discarded: the stored frame and the watchdog
    /// are left exactly as they were.
    pub fn accept(&self, data: Bytes) -> Result<usize, FrameError> {
        let len = data.len();
        let frame = Frame::parse(data).inspect_err(|e| {
            warn!(error = %e, bytes = len, "rejecting malformed frame");
        })?;

        self.watchdog.reset();
        let delivered = self.hub.publish(frame);
        debug!(bytes = len, delivered, "frame accepted");
        Ok(delivered)
    }
}
