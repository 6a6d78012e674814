//! Error types for the output manager.

use std::fmt;

use thiserror::Error;

use crate::engine::clock::PlaybackState;

/// Sub-resource released while closing the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The device's render callback.
    RenderCallback,
    /// The claimed hardware unit / OS stream.
    HardwareUnit,
    /// Reader hand-off channels shared with the render thread.
    ReaderQueue,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::RenderCallback => f.write_str("render callback"),
            Resource::HardwareUnit => f.write_str("hardware unit"),
            Resource::ReaderQueue => f.write_str("reader queue"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutputError {
    /// Device busy, missing, or the format is unsupported
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Operation not allowed from the current state
    #[error("Cannot {operation} while {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: PlaybackState,
    },

    /// The device rejected a start, pause or stop request
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// A sub-resource failed to release during close
    #[error("Failed to release {resource}: {reason}")]
    TeardownFailure { resource: Resource, reason: String },

    /// Control operation issued from inside the render callback
    #[error("{0} called from the render callback")]
    ReentrantCall(&'static str),

    /// Settings could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OutputError>;

/// Every failure collected while closing the device, in teardown order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeardownErrors(Vec<OutputError>);

impl TeardownErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: OutputError) {
        self.0.push(error);
    }

    /// Records a failed release of `resource`, if `result` is an error.
    pub fn record<E: fmt::Display>(&mut self, resource: Resource, result: std::result::Result<(), E>) {
        if let Err(e) = result {
            self.0.push(OutputError::TeardownFailure {
                resource,
                reason: e.to_string(),
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OutputError> {
        self.0.iter()
    }

    /// Resources that failed to release, in teardown order.
    pub fn resources(&self) -> Vec<Resource> {
        self.0
            .iter()
            .filter_map(|e| match e {
                OutputError::TeardownFailure { resource, .. } => Some(*resource),
                _ => None,
            })
            .collect()
    }

    pub fn into_result(self) -> std::result::Result<(), TeardownErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for TeardownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} teardown failure(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "; {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownErrors {}

impl IntoIterator for TeardownErrors {
    type Item = OutputError;
    type IntoIter = std::vec::IntoIter<OutputError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<TeardownErrors> for Vec<OutputError> {
    fn from(errors: TeardownErrors) -> Self {
        errors.0
    }
}
