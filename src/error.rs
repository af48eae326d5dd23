use thiserror::Error;

use crate::control::modulation::DetectorError;
use crate::fx::graph::StageId;
use crate::fx::stages::Param;

#[derive(Debug, Error)]
pub enum Error {
    /// A device, permission or asset could not be acquired. Nothing was rewired.
    #[error("failed to acquire {resource}: {source:#}")]
    ResourceAcquisition {
        resource: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The external feature detector reported a failure. Fatal to the modulation loop.
    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error("audio engine is no longer receiving updates")]
    EngineDisconnected,

    #[error("no stage installed as {0}")]
    UnknownStage(StageId),

    #[error("a stage is already installed as {0}")]
    StageAlreadyInstalled(StageId),

    #[error("invalid value {value} for {param}: {reason}")]
    InvalidParameter {
        param: Param,
        value: f32,
        reason: &'static str,
    },
}

impl Error {
    pub fn resource(resource: &'static str, source: anyhow::Error) -> Self {
        Self::ResourceAcquisition { resource, source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
