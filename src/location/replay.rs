use std::path::Path;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{LocationRequest, LocationSource, SourceError};
use crate::models::LocationSample;

/// Plays back a recorded track, one sample per request interval.
#[derive(Debug)]
pub struct ReplaySource {
    samples: Option<Vec<LocationSample>>,
    task: Option<JoinHandle<()>>,
}

impl ReplaySource {
    pub fn new(samples: Vec<LocationSample>) -> Self {
        Self {
            samples: Some(samples),
            task: None,
        }
    }

    /// Reads a track file of JSON lines or `lat,lng[,time]` lines. Lines that
    /// do not parse are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;

        let mut skipped = 0usize;
        let samples: Vec<LocationSample> = text
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
            .filter_map(|l| {
                let parsed = LocationSample::from_line(l);
                if parsed.is_none() {
                    skipped += 1;
                }
                parsed
            })
            .collect();

        if skipped > 0 {
            warn!("Skipped {} unreadable lines in {}", skipped, path.display());
        }
        info!("Loaded {} samples from {}", samples.len(), path.display());
        Ok(Self::new(samples))
    }

    pub fn len(&self) -> usize {
        self.samples.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocationSource for ReplaySource {
    fn start(
        &mut self,
        request: &LocationRequest,
    ) -> Result<mpsc::Receiver<LocationSample>, SourceError> {
        let samples = self.samples.take().ok_or(SourceError::AlreadyStarted)?;
        let (tx, rx) = mpsc::channel(request.capacity.max(1));
        let interval = request.interval;

        self.task = Some(tokio::spawn(async move {
            for (i, sample) in samples.into_iter().enumerate() {
                if i > 0 && !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
                match tx.try_send(sample) {
                    Ok(()) => {}
                    Err(TrySendError::Full(s)) => {
                        warn!("Tracker is behind, dropping sample {},{}", s.lat, s.lng);
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }));

        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        self.stop();
    }
}
