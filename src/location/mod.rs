//! Location sources.
//!
//! A source is started once with a [`LocationRequest`] and pushes samples into
//! a bounded channel until it is stopped. Delivery never blocks the producer:
//! when the consumer lags, samples are dropped.

pub mod channel;
pub mod replay;

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::LocationSample;

pub use channel::{ChannelSource, SampleSender};
pub use replay::ReplaySource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    High,
    Balanced,
    Low,
}

impl FromStr for Accuracy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Accuracy::High),
            "balanced" => Ok(Accuracy::Balanced),
            "low" => Ok(Accuracy::Low),
            other => Err(format!("unknown accuracy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationRequest {
    pub interval: Duration,
    /// Fixes closer than this to the last recorded point are ignored.
    pub min_distance_m: f64,
    pub accuracy: Accuracy,
    pub capacity: usize,
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            min_distance_m: 5.0,
            accuracy: Accuracy::High,
            capacity: 64,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("location source was already started")]
    AlreadyStarted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait LocationSource: Send {
    /// Begins delivery. Sources are single-use; a second call fails.
    fn start(
        &mut self,
        request: &LocationRequest,
    ) -> Result<mpsc::Receiver<LocationSample>, SourceError>;

    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_parse() {
        assert_eq!("HIGH".parse::<Accuracy>(), Ok(Accuracy::High));
        assert_eq!(" balanced ".parse::<Accuracy>(), Ok(Accuracy::Balanced));
        assert!("precise".parse::<Accuracy>().is_err());
    }
}
