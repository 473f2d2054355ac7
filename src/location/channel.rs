use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::{LocationRequest, LocationSource, SourceError};
use crate::models::LocationSample;

/// A source fed by the host, for platforms that deliver fixes through callbacks.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Option<mpsc::Receiver<LocationSample>>,
}

/// Producer half handed to the host's location callback.
#[derive(Debug, Clone)]
pub struct SampleSender {
    tx: mpsc::Sender<LocationSample>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (Self, SampleSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { rx: Some(rx) }, SampleSender { tx })
    }
}

impl SampleSender {
    /// Non-blocking push. Returns `false` if the sample was dropped.
    pub fn push(&self, sample: LocationSample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(s)) => {
                warn!("Tracker is behind, dropping sample {},{}", s.lat, s.lng);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl LocationSource for ChannelSource {
    fn start(
        &mut self,
        _request: &LocationRequest,
    ) -> Result<mpsc::Receiver<LocationSample>, SourceError> {
        self.rx.take().ok_or(SourceError::AlreadyStarted)
    }

    // The host owns the producer; once the tracker drops the receiver,
    // further pushes report `false`.
    fn stop(&mut self) {}
}
