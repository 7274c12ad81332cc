use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SurfingError;
use crate::selection::{DistanceMetric, Radius};

/// Where along the inner→outer segment of each node to sample the volume:
/// `steps` fractions evenly spaced over `[start, stop]`, 0 being the inner
/// surface and 1 the outer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub steps: usize,
    pub start: f64,
    pub stop: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            steps: 10,
            start: 0.0,
            stop: 1.0,
        }
    }
}

impl SamplingParams {
    pub fn new(steps: usize, start: f64, stop: f64) -> Self {
        Self { steps, start, stop }
    }

    /// Sampled fractions in ascending order. A single step samples the
    /// midpoint of the range.
    pub fn fractions(&self) -> Vec<f64> {
        match self.steps {
            0 => Vec::new(),
            1 => vec![(self.start + self.stop) / 2.0],
            n => {
                let span = self.stop - self.start;
                let last = (n - 1) as f64;
                (0..n)
                    .map(|i| self.start + span * i as f64 / last)
                    .collect()
            }
        }
    }

    pub fn validate(&self) -> Result<(), SurfingError> {
        if self.steps == 0 {
            return Err(SurfingError::Config("sampling needs at least one step".into()));
        }
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(SurfingError::Config(format!(
                "sampling range [{}, {}] is not finite",
                self.start, self.stop
            )));
        }
        if self.start > self.stop {
            return Err(SurfingError::Config(format!(
                "sampling start {} exceeds stop {}",
                self.start, self.stop
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub radius: Radius,
    pub metric: DistanceMetric,
    pub sampling: SamplingParams,
    /// Centre nodes; all nodes when absent.
    pub centers: Option<Vec<usize>>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            radius: Radius::Distance(10.0),
            metric: DistanceMetric::Dijkstra,
            sampling: SamplingParams::default(),
            centers: None,
        }
    }
}

impl SelectionConfig {
    pub fn from_json_str(text: &str) -> Result<Self, SurfingError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SurfingError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), SurfingError> {
        self.sampling.validate()?;
        match self.radius {
            Radius::Distance(r) if !r.is_finite() => Err(SurfingError::Config(format!(
                "radius {r} is not finite"
            ))),
            Radius::VoxelCount(0) => Err(SurfingError::Config(
                "voxel count radius must be positive".into(),
            )),
            _ => Ok(()),
        }
    }
}
