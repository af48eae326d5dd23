use crate::fx::stages::{Param, Stage, StageKind};

/// Folds the captured signal down to the single channel the rest of the chain works on.
///
/// The graph is mono end to end, so this is a passthrough; it exists so the chain head
/// is always the same stage regardless of which effect is selected.
#[derive(Default)]
pub struct SplitterStage;

impl SplitterStage {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for SplitterStage {
    fn kind(&self) -> StageKind {
        StageKind::Splitter
    }

    fn process(&mut self, input: f32) -> f32 {
        input
    }

    fn process_block(&mut self, _input: &mut [f32]) {}

    fn set_parameter(&mut self, _param: Param, _value: f32) -> Result<(), &'static str> {
        Err("Splitter has no parameters")
    }

    fn get_parameter(&self, _param: Param) -> Result<f32, &'static str> {
        Err("Splitter has no parameters")
    }
}
