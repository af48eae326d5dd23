use anyhow::{Result, bail};
use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender, unbounded};
use log::{debug, error};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;
use crate::fx::graph::{Graph, GraphBackend, GraphOp, ParamWrite, StageId, Topology};
use crate::fx::stages::Stage;

pub enum EngineMessage {
    InstallStage(StageId, Box<dyn Stage>),
    Rewire(Vec<GraphOp>),
    SetParameter(ParamWrite),
}

/// Runs the stage graph on the audio thread.
pub struct Engine {
    graph: Graph,
    /// Channel for graph updates from the control side.
    rx_updates: Receiver<EngineMessage>,
    clock: Arc<AtomicU64>,
    topology: Arc<ArcSwap<Topology>>,
}

/// Control-side handle to a running [`Engine`].
#[derive(Clone)]
pub struct EngineHandle {
    tx_updates: Sender<EngineMessage>,
    clock: Arc<AtomicU64>,
    topology: Arc<ArcSwap<Topology>>,
    sample_rate: f32,
}

impl Engine {
    pub fn new(sample_rate: f32) -> (Self, EngineHandle) {
        let (tx_updates, rx_updates) = unbounded();
        let clock = Arc::new(AtomicU64::new(0));
        let topology = Arc::new(ArcSwap::from_pointee(Topology::default()));

        let engine = Self {
            graph: Graph::new(sample_rate),
            rx_updates,
            clock: Arc::clone(&clock),
            topology: Arc::clone(&topology),
        };
        let handle = EngineHandle {
            tx_updates,
            clock,
            topology,
            sample_rate,
        };

        (engine, handle)
    }

    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.handle_messages();

        if input.len() != output.len() {
            bail!(
                "buffer size mismatch: input {}, output {}",
                input.len(),
                output.len()
            );
        }

        output.copy_from_slice(input);
        self.graph.process_block(output);
        self.clock.store(self.graph.clock(), Ordering::Release);

        Ok(())
    }

    /// Applies every queued update before the next block, so a teardown and the
    /// connects that follow it are never heard separately.
    pub fn handle_messages(&mut self) {
        let mut rewired = false;

        while let Ok(message) = self.rx_updates.try_recv() {
            match message {
                EngineMessage::InstallStage(id, stage) => {
                    if let Err(e) = self.graph.install(id, stage) {
                        error!("Failed to install stage: {e}");
                    }
                }
                EngineMessage::Rewire(ops) => {
                    if let Err(e) = self.graph.rewire(&ops) {
                        error!("Rejected rewire: {e}");
                    }
                    rewired = true;
                }
                EngineMessage::SetParameter(write) => {
                    if let Err(e) = self.graph.schedule(write) {
                        error!("Failed to schedule parameter: {e}");
                    }
                }
            }
        }

        if rewired {
            debug!("Route now {:?}", self.graph.route());
            self.topology.store(Arc::new(self.graph.topology()));
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl EngineHandle {
    fn send(&self, message: EngineMessage) -> Result<(), Error> {
        self.tx_updates
            .send(message)
            .map_err(|_| Error::EngineDisconnected)
    }

    /// Wiring as last applied by the audio thread.
    pub fn topology(&self) -> Arc<Topology> {
        self.topology.load_full()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

impl GraphBackend for EngineHandle {
    fn install(&mut self, id: StageId, stage: Box<dyn Stage>) -> Result<(), Error> {
        self.send(EngineMessage::InstallStage(id, stage))
    }

    fn rewire(&mut self, ops: Vec<GraphOp>) -> Result<(), Error> {
        self.send(EngineMessage::Rewire(ops))
    }

    fn schedule(&mut self, write: ParamWrite) -> Result<(), Error> {
        self.send(EngineMessage::SetParameter(write))
    }

    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }
}
