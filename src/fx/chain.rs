use log::{debug, warn};
use std::mem;

use crate::assets::PendingAssets;
use crate::control::selection::Effect;
use crate::error::{Error, Result};
use crate::fx::graph::{GraphBackend, GraphOp, Node, ParamWrite, StageId};
use crate::fx::stages::bandpass::BandpassStage;
use crate::fx::stages::convolution::ConvolutionStage;
use crate::fx::stages::level::LevelStage;
use crate::fx::stages::saturator::SaturatorStage;
use crate::fx::stages::splitter::SplitterStage;
use crate::fx::stages::{Param, Stage};

pub const MAKEUP_GAIN: f32 = 5.0;
pub const OUTPUT_GAIN: f32 = 1.0;
pub const WAH_FREQUENCY_HZ: f32 = 1000.0;
pub const WAH_Q: f32 = 1.0;
pub const OVERDRIVE_AMOUNT: f32 = 200.0;
pub const OVERDRIVE_CURVE_SAMPLES: usize = 44_100;
pub const NEUTRAL_PITCH_RATIO: f32 = 1.0;

/// The part a stage plays in the chain. Two gain stages share a kind but not a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    Splitter,
    PitchShifter,
    Wah,
    Convolution,
    MakeupGain,
    Saturator,
    OutputGain,
}

/// Handles of the long-lived stages. They are installed once and only ever rewired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStages {
    pub splitter: StageId,
    pub pitch_shifter: StageId,
    pub wah: StageId,
    pub convolution: StageId,
    pub makeup_gain: StageId,
    pub saturator: StageId,
    pub output_gain: StageId,
}

impl ChainStages {
    pub fn id(&self, role: StageRole) -> StageId {
        match role {
            StageRole::Splitter => self.splitter,
            StageRole::PitchShifter => self.pitch_shifter,
            StageRole::Wah => self.wah,
            StageRole::Convolution => self.convolution,
            StageRole::MakeupGain => self.makeup_gain,
            StageRole::Saturator => self.saturator,
            StageRole::OutputGain => self.output_gain,
        }
    }

    pub fn all(&self) -> [StageId; 7] {
        [
            self.splitter,
            self.pitch_shifter,
            self.wah,
            self.convolution,
            self.makeup_gain,
            self.saturator,
            self.output_gain,
        ]
    }
}

/// The ordered signal path, head next to the source and tail next to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectChain {
    selection: Effect,
    entries: Vec<(StageRole, StageId)>,
}

impl EffectChain {
    pub fn selection(&self) -> Effect {
        self.selection
    }

    pub fn find(&self, role: StageRole) -> Option<StageId> {
        self.entries
            .iter()
            .find(|&&(r, _)| r == role)
            .map(|&(_, id)| id)
    }

    pub fn contains(&self, role: StageRole) -> bool {
        self.find(role).is_some()
    }

    pub fn roles(&self) -> impl Iterator<Item = StageRole> + '_ {
        self.entries.iter().map(|&(role, _)| role)
    }

    pub fn stage_ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.entries.iter().map(|&(_, id)| id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Connect ops for this chain, source first.
    pub fn connect_ops(&self) -> Vec<GraphOp> {
        let mut ops = Vec::with_capacity(self.entries.len() + 1);
        let mut previous = Node::Source;
        for id in self.stage_ids() {
            let node = Node::Stage(id);
            ops.push(GraphOp::Connect {
                from: previous,
                to: node,
            });
            previous = node;
        }
        ops.push(GraphOp::Connect {
            from: previous,
            to: Node::Destination,
        });
        ops
    }
}

/// Decides the route for a selection. Pure: no wiring happens here.
pub fn plan(selection: Effect, convolution_enabled: bool, stages: &ChainStages) -> EffectChain {
    let mut roles = Vec::with_capacity(7);
    roles.push(StageRole::Splitter);
    match selection {
        Effect::PitchShift => roles.push(StageRole::PitchShifter),
        Effect::Wah => roles.push(StageRole::Wah),
        Effect::Volume => {}
    }
    if convolution_enabled {
        roles.push(StageRole::Convolution);
    }
    roles.extend([
        StageRole::MakeupGain,
        StageRole::Saturator,
        StageRole::OutputGain,
    ]);

    EffectChain {
        selection,
        entries: roles.into_iter().map(|r| (r, stages.id(r))).collect(),
    }
}

enum StageState {
    Pending(PendingAssets),
    Ready(ChainStages),
    /// Asset loading failed; the reason is reported on every later rebuild.
    Failed(String),
}

/// Owns the stages and the live route, and performs every rewiring.
pub struct EffectChainManager<G: GraphBackend> {
    backend: G,
    sample_rate: f32,
    state: StageState,
    chain: Option<EffectChain>,
    convolution_enabled: bool,
}

impl<G: GraphBackend> EffectChainManager<G> {
    pub fn new(backend: G, assets: PendingAssets, sample_rate: f32) -> Self {
        Self {
            backend,
            sample_rate,
            state: StageState::Pending(assets),
            chain: None,
            convolution_enabled: true,
        }
    }

    /// Tears down the current route and wires a fresh one for `selection`.
    ///
    /// Blocks on asset loading the first time. If the assets fail the current route is
    /// left exactly as it was.
    pub fn rebuild(&mut self, selection: Effect) -> Result<&EffectChain> {
        let stages = self.ensure_stages()?;
        let chain = plan(selection, self.convolution_enabled, &stages);

        let mut ops = Self::teardown_ops(&stages);
        ops.extend(chain.connect_ops());
        self.backend.rewire(ops)?;

        let now = self.backend.current_time();
        self.backend.schedule(ParamWrite {
            stage: stages.output_gain,
            param: Param::Gain,
            value: OUTPUT_GAIN,
            at: now,
        })?;
        self.backend.schedule(ParamWrite {
            stage: stages.pitch_shifter,
            param: Param::PitchRatio,
            value: NEUTRAL_PITCH_RATIO,
            at: now,
        })?;

        debug!(
            "Rebuilt chain for {}: {:?}",
            selection,
            chain.roles().collect::<Vec<_>>()
        );
        Ok(&*self.chain.insert(chain))
    }

    /// Disconnects the source and every stage. Output is silent until the next rebuild.
    pub fn teardown(&mut self) -> Result<()> {
        let StageState::Ready(stages) = &self.state else {
            self.backend.rewire(vec![GraphOp::Disconnect(Node::Source)])?;
            self.chain = None;
            return Ok(());
        };
        let ops = Self::teardown_ops(stages);
        self.backend.rewire(ops)?;
        self.chain = None;
        Ok(())
    }

    // Every installed stage is disconnected, not only the ones on the old route, so a
    // stale edge can never survive a rebuild.
    fn teardown_ops(stages: &ChainStages) -> Vec<GraphOp> {
        let mut ops = vec![GraphOp::Disconnect(Node::Source)];
        ops.extend(
            stages
                .all()
                .into_iter()
                .map(|id| GraphOp::Disconnect(Node::Stage(id))),
        );
        ops
    }

    fn ensure_stages(&mut self) -> Result<ChainStages> {
        match mem::replace(&mut self.state, StageState::Failed(String::new())) {
            StageState::Ready(stages) => {
                self.state = StageState::Ready(stages);
                Ok(stages)
            }
            StageState::Failed(reason) => {
                let err = Error::resource("chain assets", anyhow::anyhow!(reason.clone()));
                self.state = StageState::Failed(reason);
                Err(err)
            }
            StageState::Pending(pending) => match self.install_stages(pending) {
                Ok(stages) => {
                    self.state = StageState::Ready(stages);
                    Ok(stages)
                }
                Err(e) => {
                    self.state = StageState::Failed(e.to_string());
                    Err(e)
                }
            },
        }
    }

    fn install_stages(&mut self, pending: PendingAssets) -> Result<ChainStages> {
        let assets = pending.wait()?;
        let sr = self.sample_rate;

        let convolution = ConvolutionStage::new(&assets.impulse_response)
            .map_err(|e| Error::resource("impulse response", e))?;
        if convolution.tap_count() < assets.impulse_response.len() {
            warn!(
                "Impulse response truncated from {} to {} taps",
                assets.impulse_response.len(),
                convolution.tap_count()
            );
        }

        let ordered: [(StageRole, Box<dyn Stage>); 7] = [
            (StageRole::Splitter, Box::new(SplitterStage::new())),
            (StageRole::PitchShifter, Box::new(assets.pitch_shifter)),
            (
                StageRole::Wah,
                Box::new(BandpassStage::new(WAH_FREQUENCY_HZ, WAH_Q, sr)),
            ),
            (StageRole::Convolution, Box::new(convolution)),
            (StageRole::MakeupGain, Box::new(LevelStage::new(MAKEUP_GAIN))),
            (
                StageRole::Saturator,
                Box::new(SaturatorStage::new(
                    OVERDRIVE_AMOUNT,
                    OVERDRIVE_CURVE_SAMPLES,
                )),
            ),
            (StageRole::OutputGain, Box::new(LevelStage::new(OUTPUT_GAIN))),
        ];

        for (index, (role, stage)) in ordered.into_iter().enumerate() {
            debug!("Installing {role:?} as stage#{index}");
            self.backend.install(StageId::new(index), stage)?;
        }

        Ok(ChainStages {
            splitter: StageId::new(0),
            pitch_shifter: StageId::new(1),
            wah: StageId::new(2),
            convolution: StageId::new(3),
            makeup_gain: StageId::new(4),
            saturator: StageId::new(5),
            output_gain: StageId::new(6),
        })
    }

    pub fn set_convolution_enabled(&mut self, enabled: bool) {
        self.convolution_enabled = enabled;
    }

    pub fn convolution_enabled(&self) -> bool {
        self.convolution_enabled
    }

    pub fn chain(&self) -> Option<&EffectChain> {
        self.chain.as_ref()
    }

    pub fn stages(&self) -> Option<ChainStages> {
        match self.state {
            StageState::Ready(stages) => Some(stages),
            _ => None,
        }
    }

    /// Splits the borrow so the modulator can read the chain while writing to the backend.
    pub fn live(&mut self) -> Option<(&EffectChain, &mut G)> {
        let chain = self.chain.as_ref()?;
        Some((chain, &mut self.backend))
    }

    pub fn backend(&self) -> &G {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut G {
        &mut self.backend
    }
}
