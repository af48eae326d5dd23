use log::warn;
use std::fmt;

use crate::error::{Error, Result};
use crate::fx::stages::{Param, Stage, StageKind};

/// Handle to a stage installed in a graph. Stable for the life of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl StageId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// An endpoint in the signal graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    /// Captured input stream.
    Source,
    Stage(StageId),
    /// Playback stream.
    Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphOp {
    Connect { from: Node, to: Node },
    /// Drops every outgoing connection of the node.
    Disconnect(Node),
}

/// A parameter change that takes effect at `at` seconds on the audio clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamWrite {
    pub stage: StageId,
    pub param: Param,
    pub value: f32,
    pub at: f64,
}

/// What is currently wired, as seen from the audio side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    /// Stages between source and destination, in signal order.
    pub route: Vec<StageId>,
    /// Whether the source reaches the destination at all.
    pub routed: bool,
    pub destination_inbound: usize,
}

/// Where the chain manager sends its wiring and parameter changes.
///
/// Implemented by the in-process [`Graph`] and by the real-time engine handle.
pub trait GraphBackend {
    fn install(&mut self, id: StageId, stage: Box<dyn Stage>) -> Result<()>;

    /// Applies the ops in order, as one batch between two audio blocks.
    fn rewire(&mut self, ops: Vec<GraphOp>) -> Result<()>;

    fn schedule(&mut self, write: ParamWrite) -> Result<()>;

    /// Seconds of audio rendered so far.
    fn current_time(&self) -> f64;
}

/// Arena of stages plus the connections between them.
///
/// The connection list may describe anything; rendering follows the single path from
/// the source, which the chain manager guarantees is the only one.
pub struct Graph {
    sample_rate: f32,
    stages: Vec<Option<Box<dyn Stage>>>,
    edges: Vec<(Node, Node)>,
    route: Vec<StageId>,
    routed: bool,
    /// Pending writes as (frame, write), ordered by frame then arrival.
    pending: Vec<(u64, ParamWrite)>,
    clock: u64,
}

impl Graph {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            stages: Vec::new(),
            edges: Vec::with_capacity(16),
            route: Vec::with_capacity(16),
            routed: false,
            pending: Vec::with_capacity(64),
            clock: 0,
        }
    }

    pub fn install(&mut self, id: StageId, stage: Box<dyn Stage>) -> Result<()> {
        let index = id.index();
        if index >= self.stages.len() {
            self.stages.resize_with(index + 1, || None);
        }
        if self.stages[index].is_some() {
            return Err(Error::StageAlreadyInstalled(id));
        }
        self.stages[index] = Some(stage);
        Ok(())
    }

    /// Validates the whole batch first so a bad op leaves the wiring untouched.
    pub fn rewire(&mut self, ops: &[GraphOp]) -> Result<()> {
        for op in ops {
            match *op {
                GraphOp::Connect { from, to } => {
                    self.check_node(from)?;
                    self.check_node(to)?;
                }
                GraphOp::Disconnect(node) => self.check_node(node)?,
            }
        }

        for op in ops {
            match *op {
                GraphOp::Connect { from, to } => {
                    if !self.edges.contains(&(from, to)) {
                        self.edges.push((from, to));
                    }
                }
                GraphOp::Disconnect(node) => self.edges.retain(|&(from, _)| from != node),
            }
        }

        self.trace_route();
        Ok(())
    }

    pub fn schedule(&mut self, write: ParamWrite) -> Result<()> {
        if self.stage(write.stage).is_none() {
            return Err(Error::UnknownStage(write.stage));
        }
        let frame = (write.at.max(0.0) * self.sample_rate as f64).round() as u64;
        let index = self.pending.partition_point(|&(f, _)| f <= frame);
        self.pending.insert(index, (frame, write));
        Ok(())
    }

    /// Renders one block in place. Parameter writes land on their exact frame.
    pub fn process_block(&mut self, buffer: &mut [f32]) {
        let start = self.clock;
        let len = buffer.len();
        let mut offset = 0;

        while offset < len {
            self.apply_due(start + offset as u64);
            let end = self
                .pending
                .first()
                .map_or(len, |&(frame, _)| ((frame - start) as usize).min(len));
            self.render(&mut buffer[offset..end]);
            offset = end;
        }

        self.clock = start + len as u64;
    }

    fn apply_due(&mut self, now: u64) {
        while let Some(&(frame, write)) = self.pending.first() {
            if frame > now {
                break;
            }
            self.pending.remove(0);

            let Some(stage) = self.stages.get_mut(write.stage.index()).and_then(Option::as_mut)
            else {
                continue;
            };
            if let Err(e) = stage.set_parameter(write.param, write.value) {
                warn!(
                    "Dropped {} = {} on {}: {}",
                    write.param, write.value, write.stage, e
                );
            }
        }
    }

    fn render(&mut self, segment: &mut [f32]) {
        if !self.routed {
            segment.fill(0.0);
            return;
        }
        for id in &self.route {
            if let Some(Some(stage)) = self.stages.get_mut(id.index()) {
                stage.process_block(segment);
            }
        }
    }

    fn trace_route(&mut self) {
        self.route.clear();
        self.routed = false;

        let mut current = Node::Source;
        loop {
            let Some(&(_, next)) = self.edges.iter().find(|&&(from, _)| from == current) else {
                break;
            };
            match next {
                Node::Destination => {
                    self.routed = true;
                    break;
                }
                Node::Stage(id) => {
                    if self.route.contains(&id) {
                        warn!("Cycle through {id}, output muted");
                        self.route.clear();
                        break;
                    }
                    self.route.push(id);
                    current = next;
                }
                Node::Source => break,
            }
        }
    }

    fn check_node(&self, node: Node) -> Result<()> {
        match node {
            Node::Stage(id) if self.stage(id).is_none() => Err(Error::UnknownStage(id)),
            _ => Ok(()),
        }
    }

    fn stage(&self, id: StageId) -> Option<&dyn Stage> {
        self.stages.get(id.index()).and_then(|s| s.as_deref())
    }

    pub fn stage_kind(&self, id: StageId) -> Option<StageKind> {
        self.stage(id).map(|stage| stage.kind())
    }

    pub fn parameter(&self, id: StageId, param: Param) -> Result<f32> {
        let stage = self.stage(id).ok_or(Error::UnknownStage(id))?;
        stage
            .get_parameter(param)
            .map_err(|reason| Error::InvalidParameter {
                param,
                value: f32::NAN,
                reason,
            })
    }

    pub fn installed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.is_some()).count()
    }

    pub fn edges(&self) -> &[(Node, Node)] {
        &self.edges
    }

    pub fn inbound(&self, node: Node) -> usize {
        self.edges.iter().filter(|&&(_, to)| to == node).count()
    }

    pub fn outbound(&self, node: Node) -> usize {
        self.edges.iter().filter(|&&(from, _)| from == node).count()
    }

    pub fn route(&self) -> &[StageId] {
        &self.route
    }

    pub fn is_routed(&self) -> bool {
        self.routed
    }

    pub fn topology(&self) -> Topology {
        Topology {
            route: self.route.clone(),
            routed: self.routed,
            destination_inbound: self.inbound(Node::Destination),
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Frames rendered so far.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

impl GraphBackend for Graph {
    fn install(&mut self, id: StageId, stage: Box<dyn Stage>) -> Result<()> {
        Self::install(self, id, stage)
    }

    fn rewire(&mut self, ops: Vec<GraphOp>) -> Result<()> {
        Self::rewire(self, &ops)
    }

    fn schedule(&mut self, write: ParamWrite) -> Result<()> {
        Self::schedule(self, write)
    }

    fn current_time(&self) -> f64 {
        self.clock as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::stages::level::LevelStage;

    const SR: f32 = 1_000.0;

    fn graph_with_gains(gains: &[f32]) -> Graph {
        let mut graph = Graph::new(SR);
        for (i, &g) in gains.iter().enumerate() {
            graph
                .install(StageId::new(i), Box::new(LevelStage::new(g)))
                .unwrap();
        }
        graph
    }

    fn connect(from: Node, to: Node) -> GraphOp {
        GraphOp::Connect { from, to }
    }

    #[test]
    fn unrouted_graph_is_silent() {
        let mut graph = graph_with_gains(&[2.0]);
        let mut block = [1.0; 4];
        graph.process_block(&mut block);
        assert_eq!(block, [0.0; 4]);
    }

    #[test]
    fn renders_along_the_route() {
        let mut graph = graph_with_gains(&[2.0, 3.0]);
        let a = Node::Stage(StageId::new(0));
        let b = Node::Stage(StageId::new(1));
        graph
            .rewire(&[
                connect(Node::Source, a),
                connect(a, b),
                connect(b, Node::Destination),
            ])
            .unwrap();

        assert_eq!(graph.route(), &[StageId::new(0), StageId::new(1)]);
        let mut block = [1.0; 4];
        graph.process_block(&mut block);
        assert_eq!(block, [6.0; 4]);
    }

    #[test]
    fn direct_source_to_destination_passes_through() {
        let mut graph = Graph::new(SR);
        graph
            .rewire(&[connect(Node::Source, Node::Destination)])
            .unwrap();
        let mut block = [0.25; 3];
        graph.process_block(&mut block);
        assert_eq!(block, [0.25; 3]);
        assert!(graph.is_routed());
    }

    #[test]
    fn disconnect_drops_outgoing_edges_only() {
        let mut graph = graph_with_gains(&[1.0]);
        let a = Node::Stage(StageId::new(0));
        graph
            .rewire(&[connect(Node::Source, a), connect(a, Node::Destination)])
            .unwrap();
        graph.rewire(&[GraphOp::Disconnect(a)]).unwrap();

        assert_eq!(graph.edges(), &[(Node::Source, a)]);
        assert!(!graph.is_routed());
        assert_eq!(graph.inbound(Node::Destination), 0);
    }

    #[test]
    fn bad_batch_leaves_wiring_untouched() {
        let mut graph = graph_with_gains(&[1.0]);
        let a = Node::Stage(StageId::new(0));
        graph
            .rewire(&[connect(Node::Source, a), connect(a, Node::Destination)])
            .unwrap();

        let missing = Node::Stage(StageId::new(7));
        let result = graph.rewire(&[
            GraphOp::Disconnect(Node::Source),
            connect(Node::Source, missing),
        ]);
        assert!(matches!(result, Err(Error::UnknownStage(id)) if id == StageId::new(7)));
        assert_eq!(graph.route(), &[StageId::new(0)]);
        assert!(graph.is_routed());
    }

    #[test]
    fn reinstalling_a_stage_is_rejected() {
        let mut graph = graph_with_gains(&[1.0]);
        let result = graph.install(StageId::new(0), Box::new(LevelStage::new(2.0)));
        assert!(matches!(result, Err(Error::StageAlreadyInstalled(_))));
        assert_eq!(graph.installed_count(), 1);
    }

    #[test]
    fn writes_apply_on_their_frame() {
        let mut graph = graph_with_gains(&[1.0]);
        let a = Node::Stage(StageId::new(0));
        graph
            .rewire(&[connect(Node::Source, a), connect(a, Node::Destination)])
            .unwrap();

        // Frame 3 at 1kHz.
        graph
            .schedule(ParamWrite {
                stage: StageId::new(0),
                param: Param::Gain,
                value: 0.5,
                at: 0.003,
            })
            .unwrap();

        let mut block = [1.0; 6];
        graph.process_block(&mut block);
        assert_eq!(block, [1.0, 1.0, 1.0, 0.5, 0.5, 0.5]);
        assert_eq!(graph.pending_writes(), 0);
        assert_eq!(graph.parameter(StageId::new(0), Param::Gain).unwrap(), 0.5);
    }

    #[test]
    fn past_writes_apply_immediately_and_future_writes_wait() {
        let mut graph = graph_with_gains(&[1.0]);
        let mut block = [0.0; 10];
        graph.process_block(&mut block);

        graph
            .schedule(ParamWrite {
                stage: StageId::new(0),
                param: Param::Gain,
                value: 2.0,
                at: 0.0,
            })
            .unwrap();
        graph
            .schedule(ParamWrite {
                stage: StageId::new(0),
                param: Param::Gain,
                value: 3.0,
                at: 1.0,
            })
            .unwrap();

        let mut block = [0.0; 1];
        graph.process_block(&mut block);
        assert_eq!(graph.parameter(StageId::new(0), Param::Gain).unwrap(), 2.0);
        assert_eq!(graph.pending_writes(), 1);
        assert!((GraphBackend::current_time(&graph) - 0.011).abs() < 1e-9);
    }

    #[test]
    fn scheduling_on_missing_stage_fails() {
        let mut graph = Graph::new(SR);
        let result = graph.schedule(ParamWrite {
            stage: StageId::new(3),
            param: Param::Gain,
            value: 1.0,
            at: 0.0,
        });
        assert!(matches!(result, Err(Error::UnknownStage(_))));
    }
}
