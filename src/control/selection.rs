use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The single effect driven by the tracked feature. Selecting one clears the others.
#[derive(ValueEnum, Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    #[default]
    Volume,
    Wah,
    PitchShift,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume => write!(f, "Volume"),
            Self::Wah => write!(f, "Wah Wah"),
            Self::PitchShift => write!(f, "Pitch Shift"),
        }
    }
}
