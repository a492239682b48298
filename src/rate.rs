//! Conversion of monotonic counters into per-second rates across polling cycles.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Why no rate could be computed for a sample. None of these are failures; the sample is kept as
/// the new baseline.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum RateSkip {
    #[error("first sample, no rate yet")]
    NoBaseline,

    #[error("counter went backwards ({previous} -> {current}), reseeded")]
    CounterReset { previous: f64, current: f64 },

    #[error("no time elapsed since the previous sample")]
    ZeroInterval,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate state {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("rate state {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

/// Last seen counter sample per key. Keys combine the identity of the monitored entity with the
/// counter name, e.g. `opnsense_ipsec.<uuid>.if_in_bps`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RateTracker {
    samples: BTreeMap<String, Sample>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the state written by [RateTracker::save]. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no rate state yet");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        serde_json::from_slice(&data).map_err(|source| StoreError::Corrupt {
            path: path.to_owned(),
            source,
        })
    }

    /// Writes the state to a temporary file next to `path` and moves it into place.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_owned(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let data = serde_json::to_vec(self).map_err(|source| StoreError::Corrupt {
            path: path.to_owned(),
            source,
        })?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }

    /// Records `value` at `timestamp` (seconds) and returns the increase per second since the
    /// previous sample of `key`.
    pub fn rate(&mut self, key: &str, timestamp: f64, value: f64) -> Result<f64, RateSkip> {
        let sample = Sample { timestamp, value };
        let previous = match self.samples.insert(key.to_owned(), sample) {
            Some(previous) => previous,
            None => return Err(RateSkip::NoBaseline),
        };

        if value < previous.value {
            warn!(
                key,
                previous = previous.value,
                current = value,
                "counter reset detected"
            );
            return Err(RateSkip::CounterReset {
                previous: previous.value,
                current: value,
            });
        }

        let elapsed = timestamp - previous.timestamp;
        if elapsed <= 0.0 {
            return Err(RateSkip::ZeroInterval);
        }

        Ok((value - previous.value) / elapsed)
    }

    pub fn get(&self, key: &str) -> Option<&Sample> {
        self.samples.get(key)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
