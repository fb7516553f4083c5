//! Pull-based render graph shared by a context and its output thread

use super::RENDER_QUANTUM;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a node within one context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Lifecycle of a context's rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// Timing information handed to processors for one quantum
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderScope {
    pub sample_rate: u32,
}

/// Per-node audio processing, run on whatever thread renders the graph
pub(crate) trait AudioProcessor: Send {
    /// Produce `output` from the summed `input`. Both have the quantum length.
    fn process(&mut self, input: &[f32], output: &mut [f32], scope: &RenderScope);

    /// Whether the node is rendered even when nothing downstream pulls it
    fn pulls_automatically(&self) -> bool {
        false
    }
}

/// Forwards its input unchanged
pub(crate) struct PassThrough;

impl AudioProcessor for PassThrough {
    fn process(&mut self, input: &[f32], output: &mut [f32], _scope: &RenderScope) {
        output.copy_from_slice(input);
    }
}

/// Reasons a connection was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectError {
    UnknownNode(NodeId),
    Cycle,
}

struct NodeEntry {
    processor: Box<dyn AudioProcessor>,
    inputs: Vec<NodeId>,
    output: Vec<f32>,
}

pub(crate) struct Graph {
    nodes: BTreeMap<NodeId, NodeEntry>,
    next_id: u64,
    destination: NodeId,
    current_frame: u64,
    sample_rate: u32,
    state: ContextState,

    // Processing order, rebuilt after the topology changes
    schedule: Option<Vec<NodeId>>,

    // Summed input for the node being processed
    scratch: Vec<f32>,
}

impl Graph {
    pub fn new(sample_rate: u32) -> Self {
        let mut graph = Self {
            nodes: BTreeMap::new(),
            next_id: 0,
            destination: NodeId(0),
            current_frame: 0,
            sample_rate,
            state: ContextState::Running,
            schedule: None,
            scratch: Vec::with_capacity(RENDER_QUANTUM),
        };
        graph.destination = graph.add_node(Box::new(PassThrough));
        graph
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Set by the output thread once the device rate is known, before playback
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn set_state(&mut self, state: ContextState) {
        self.state = state;
    }

    pub fn add_node(&mut self, processor: Box<dyn AudioProcessor>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            NodeEntry {
                processor,
                inputs: Vec::new(),
                output: Vec::with_capacity(RENDER_QUANTUM),
            },
        );
        self.schedule = None;
        id
    }

    /// Route `from`'s output into `to`. Repeated connections are no-ops.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), ConnectError> {
        if !self.nodes.contains_key(&from) {
            return Err(ConnectError::UnknownNode(from));
        }
        if !self.nodes.contains_key(&to) {
            return Err(ConnectError::UnknownNode(to));
        }
        if from == to || self.is_upstream(to, from) {
            return Err(ConnectError::Cycle);
        }

        if let Some(entry) = self.nodes.get_mut(&to) {
            if !entry.inputs.contains(&from) {
                entry.inputs.push(from);
                self.schedule = None;
                log::debug!("Connected {} -> {}", from, to);
            }
        }
        Ok(())
    }

    /// Remove every outgoing connection of `from`
    pub fn disconnect(&mut self, from: NodeId) {
        for entry in self.nodes.values_mut() {
            entry.inputs.retain(|&id| id != from);
        }
        self.schedule = None;
    }

    /// Whether `target` feeds (directly or not) into `node`
    fn is_upstream(&self, target: NodeId, node: NodeId) -> bool {
        let mut stack = vec![node];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = self.nodes.get(&id) {
                for &input in &entry.inputs {
                    if input == target {
                        return true;
                    }
                    stack.push(input);
                }
            }
        }
        false
    }

    #[cfg(test)]
    pub fn inputs_of(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|entry| entry.inputs.as_slice())
            .unwrap_or(&[])
    }

    /// Render `frames` frames and return the destination's mono output.
    ///
    /// A graph that is not running yields silence and keeps its clock.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        self.render_into(&mut out);
        out
    }

    /// Render `out.len()` frames into `out` without allocating once the
    /// graph has been rendered at this block size before.
    pub fn render_into(&mut self, out: &mut [f32]) {
        if self.state != ContextState::Running {
            out.fill(0.0);
            return;
        }

        let order = match self.schedule.take() {
            Some(order) => order,
            None => self.build_schedule(),
        };

        for block in out.chunks_mut(RENDER_QUANTUM) {
            self.process_quantum(&order, block.len());
            match self.nodes.get(&self.destination) {
                Some(dest) => block.copy_from_slice(&dest.output),
                None => block.fill(0.0),
            }
        }

        self.schedule = Some(order);
    }

    /// Nodes to process, each after all of its inputs
    fn build_schedule(&self) -> Vec<NodeId> {
        let mut roots = vec![self.destination];
        roots.extend(
            self.nodes
                .iter()
                .filter(|(_, entry)| entry.processor.pulls_automatically())
                .map(|(id, _)| *id),
        );

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = BTreeSet::new();
        for root in roots {
            self.visit(root, &mut visited, &mut order);
        }
        order
    }

    fn visit(&self, id: NodeId, visited: &mut BTreeSet<NodeId>, order: &mut Vec<NodeId>) {
        if !visited.insert(id) {
            return;
        }
        if let Some(entry) = self.nodes.get(&id) {
            for &input in &entry.inputs {
                self.visit(input, visited, order);
            }
        }
        order.push(id);
    }

    fn process_quantum(&mut self, order: &[NodeId], frames: usize) {
        let scope = RenderScope {
            sample_rate: self.sample_rate,
        };

        for &id in order {
            self.scratch.clear();
            self.scratch.resize(frames, 0.0);
            if let Some(entry) = self.nodes.get(&id) {
                for source in &entry.inputs {
                    if let Some(upstream) = self.nodes.get(source) {
                        for (acc, sample) in self.scratch.iter_mut().zip(&upstream.output) {
                            *acc += sample;
                        }
                    }
                }
            }

            if let Some(entry) = self.nodes.get_mut(&id) {
                entry.output.clear();
                entry.output.resize(frames, 0.0);
                entry
                    .processor
                    .process(&self.scratch, &mut entry.output, &scope);
            }
        }

        self.current_frame += frames as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits a constant value, ignoring its input
    struct Constant(f32);

    impl AudioProcessor for Constant {
        fn process(&mut self, _input: &[f32], output: &mut [f32], _scope: &RenderScope) {
            output.fill(self.0);
        }
    }

    /// Counts processed frames and outputs silence
    struct Probe(std::sync::Arc<parking_lot::Mutex<u64>>);

    impl AudioProcessor for Probe {
        fn process(&mut self, input: &[f32], output: &mut [f32], _scope: &RenderScope) {
            *self.0.lock() += input.len() as u64;
            output.fill(0.0);
        }

        fn pulls_automatically(&self) -> bool {
            true
        }
    }

    #[test]
    fn unconnected_graph_renders_silence_and_advances_clock() {
        let mut graph = Graph::new(48000);
        let out = graph.render(300);

        assert_eq!(out.len(), 300);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(graph.current_frame(), 300);
    }

    #[test]
    fn inputs_are_summed_at_the_destination() {
        let mut graph = Graph::new(48000);
        let a = graph.add_node(Box::new(Constant(0.25)));
        let b = graph.add_node(Box::new(Constant(0.5)));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();
        graph.connect(b, dest).unwrap();

        let out = graph.render(RENDER_QUANTUM);
        assert!(out.iter().all(|&s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn duplicate_connections_are_ignored() {
        let mut graph = Graph::new(48000);
        let a = graph.add_node(Box::new(Constant(0.25)));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();
        graph.connect(a, dest).unwrap();

        assert_eq!(graph.inputs_of(dest), &[a]);
        let out = graph.render(16);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn connecting_into_a_cycle_is_rejected() {
        let mut graph = Graph::new(48000);
        let a = graph.add_node(Box::new(PassThrough));
        let b = graph.add_node(Box::new(PassThrough));
        graph.connect(a, b).unwrap();

        assert_eq!(graph.connect(b, a), Err(ConnectError::Cycle));
        assert_eq!(graph.connect(a, a), Err(ConnectError::Cycle));
    }

    #[test]
    fn unknown_nodes_are_rejected() {
        let mut graph = Graph::new(48000);
        let dest = graph.destination();
        let missing = NodeId(99);

        assert_eq!(
            graph.connect(missing, dest),
            Err(ConnectError::UnknownNode(missing))
        );
    }

    #[test]
    fn disconnect_removes_outgoing_edges() {
        let mut graph = Graph::new(48000);
        let a = graph.add_node(Box::new(Constant(1.0)));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();
        graph.disconnect(a);

        let out = graph.render(32);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn automatic_pull_nodes_render_without_downstream() {
        let counter = std::sync::Arc::new(parking_lot::Mutex::new(0));
        let mut graph = Graph::new(48000);
        graph.add_node(Box::new(Probe(counter.clone())));

        graph.render(RENDER_QUANTUM * 2 + 10);
        assert_eq!(*counter.lock(), (RENDER_QUANTUM * 2 + 10) as u64);
    }

    #[test]
    fn schedule_is_reused_until_topology_changes() {
        let mut graph = Graph::new(48000);
        let a = graph.add_node(Box::new(Constant(0.5)));
        let dest = graph.destination();
        graph.render(16);
        assert_eq!(graph.schedule.as_deref(), Some(&[dest][..]));

        graph.connect(a, dest).unwrap();
        assert!(graph.schedule.is_none());
        let out = graph.render(16);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert_eq!(graph.schedule.as_deref(), Some(&[a, dest][..]));

        graph.disconnect(a);
        assert!(graph.schedule.is_none());
        let out = graph.render(16);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn render_into_fills_odd_sized_blocks() {
        let mut graph = Graph::new(48000);
        let a = graph.add_node(Box::new(Constant(0.25)));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();

        let scratch = graph.scratch.as_ptr();
        let mut out = vec![1.0; RENDER_QUANTUM + 37];
        graph.render_into(&mut out);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert_eq!(graph.current_frame(), (RENDER_QUANTUM + 37) as u64);
        assert_eq!(graph.scratch.as_ptr(), scratch);
    }

    #[test]
    fn suspended_graph_keeps_its_clock() {
        let mut graph = Graph::new(48000);
        let a = graph.add_node(Box::new(Constant(1.0)));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();
        graph.set_state(ContextState::Suspended);

        let out = graph.render(64);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(graph.current_frame(), 0);
    }
}
