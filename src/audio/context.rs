//! Audio context: owns the render graph and, for device playback, the output thread

use super::analyser::AnalyserNode;
use super::graph::{ConnectError, ContextState, Graph, NodeId};
use super::media::{MediaElement, MediaElementAudioSourceNode, MediaError};
use super::node::AudioDestinationNode;
use super::output::OutputHandle;
use super::{ContextConfig, DEFAULT_SAMPLE_RATE};
use cpal::traits::HostTrait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Supported sample rate range in Hz
const MIN_SAMPLE_RATE: u32 = 3000;
const MAX_SAMPLE_RATE: u32 = 768000;

/// Audio context errors
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("No output device found")]
    NoOutputDevice,

    #[error("Output device not found: {0}")]
    SinkNotFound(String),

    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamError(String),

    #[error("Failed to start stream: {0}")]
    PlayError(String),

    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error("Audio context is closed")]
    Closed,

    #[error("Manual rendering is not available on a device-backed context")]
    NotManual,

    #[error("Nodes belong to different audio contexts")]
    ForeignNode,

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Connection would create a cycle")]
    Cycle,

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl From<ConnectError> for ContextError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::UnknownNode(id) => ContextError::UnknownNode(id),
            ConnectError::Cycle => ContextError::Cycle,
        }
    }
}

/// How a context turns its graph into sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Rendered by the default (or selected) cpal output device
    Device,

    /// Rendered on demand through [`AudioContext::render`]
    Manual,
}

static DEFAULT_BACKEND: Lazy<BackendKind> = Lazy::new(probe_backend);

/// Backend used when a context is created without choosing one.
///
/// Probed once per process: a device when the default host has an output,
/// manual rendering otherwise.
pub fn default_backend() -> BackendKind {
    *DEFAULT_BACKEND
}

fn probe_backend() -> BackendKind {
    if cpal::default_host().default_output_device().is_some() {
        log::info!("Output device available, contexts render to hardware");
        BackendKind::Device
    } else {
        log::warn!("No output device available, contexts fall back to manual rendering");
        BackendKind::Manual
    }
}

struct ContextInner {
    graph: Arc<Mutex<Graph>>,
    backend: BackendKind,
    output: Mutex<Option<OutputHandle>>,
}

/// Handle to an audio context. Clones share the same graph.
#[derive(Clone)]
pub struct AudioContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioContext")
            .field("backend", &self.inner.backend)
            .field("sample_rate", &self.sample_rate())
            .field("state", &self.state())
            .finish()
    }
}

impl AudioContext {
    /// Create a context on the process-wide default backend
    pub fn new() -> Result<Self, ContextError> {
        Self::with_config(ContextConfig::default())
    }

    pub fn with_config(config: ContextConfig) -> Result<Self, ContextError> {
        if let Some(rate) = config.sample_rate {
            if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
                return Err(ContextError::UnsupportedSampleRate(rate));
            }
        }

        let backend = config.backend.unwrap_or_else(default_backend);
        let graph = Arc::new(Mutex::new(Graph::new(
            config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
        )));

        let output = match backend {
            BackendKind::Manual => None,
            BackendKind::Device => Some(OutputHandle::start(
                graph.clone(),
                config.sink_id.clone(),
                config.sample_rate,
            )?),
        };

        log::info!(
            "Audio context created: {:?} backend, {} Hz",
            backend,
            graph.lock().sample_rate()
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                graph,
                backend,
                output: Mutex::new(output),
            }),
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.inner.backend
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.graph.lock().sample_rate()
    }

    /// Seconds of audio rendered so far
    pub fn current_time(&self) -> f64 {
        let graph = self.inner.graph.lock();
        graph.current_frame() as f64 / graph.sample_rate() as f64
    }

    pub fn state(&self) -> ContextState {
        self.inner.graph.lock().state()
    }

    pub fn destination(&self) -> AudioDestinationNode {
        let id = self.inner.graph.lock().destination();
        AudioDestinationNode::new(id, self.clone())
    }

    /// Route `element`'s audio into this context.
    ///
    /// An element can only feed one source node over its lifetime.
    pub fn create_media_element_source(
        &self,
        element: &MediaElement,
    ) -> Result<MediaElementAudioSourceNode, ContextError> {
        self.ensure_open()?;
        element.capture()?;
        let id = self
            .inner
            .graph
            .lock()
            .add_node(Box::new(element.processor()));
        Ok(MediaElementAudioSourceNode::new(
            id,
            self.clone(),
            element.clone(),
        ))
    }

    pub fn create_analyser(&self) -> Result<AnalyserNode, ContextError> {
        self.ensure_open()?;
        let (processor, state) = AnalyserNode::build();
        let id = self.inner.graph.lock().add_node(Box::new(processor));
        Ok(AnalyserNode::new(id, self.clone(), state))
    }

    /// Render `frames` frames of a manual context, returning the destination output
    pub fn render(&self, frames: usize) -> Result<Vec<f32>, ContextError> {
        if self.inner.backend != BackendKind::Manual {
            return Err(ContextError::NotManual);
        }
        self.ensure_open()?;
        Ok(self.inner.graph.lock().render(frames))
    }

    /// Pause rendering; the clock stops and the device plays silence
    pub fn suspend(&self) -> Result<(), ContextError> {
        self.ensure_open()?;
        self.inner.graph.lock().set_state(ContextState::Suspended);
        Ok(())
    }

    pub fn resume(&self) -> Result<(), ContextError> {
        self.ensure_open()?;
        self.inner.graph.lock().set_state(ContextState::Running);
        Ok(())
    }

    /// Stop rendering for good and release the output device
    pub fn close(&self) {
        self.inner.graph.lock().set_state(ContextState::Closed);
        if let Some(mut output) = self.inner.output.lock().take() {
            output.stop();
        }
    }

    fn ensure_open(&self) -> Result<(), ContextError> {
        match self.state() {
            ContextState::Closed => Err(ContextError::Closed),
            _ => Ok(()),
        }
    }

    pub(crate) fn connect_nodes(
        &self,
        from: NodeId,
        destination: &AudioContext,
        to: NodeId,
    ) -> Result<(), ContextError> {
        if !Arc::ptr_eq(&self.inner, &destination.inner) {
            return Err(ContextError::ForeignNode);
        }
        self.inner.graph.lock().connect(from, to)?;
        Ok(())
    }

    pub(crate) fn disconnect_node(&self, from: NodeId) {
        self.inner.graph.lock().disconnect(from);
    }

    #[cfg(test)]
    pub(crate) fn inputs_of(&self, id: NodeId) -> Vec<NodeId> {
        self.inner.graph.lock().inputs_of(id).to_vec()
    }
}
