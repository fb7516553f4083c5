//! Host audio graph: context, media element source, analyser and output

mod analyser;
mod context;
mod decode;
mod graph;
mod media;
mod node;
mod output;
mod sources;

pub use analyser::{AnalyserError, AnalyserNode};
pub use context::{default_backend, AudioContext, BackendKind, ContextError};
pub use graph::{ContextState, NodeId};
pub use media::{MediaElement, MediaElementAudioSourceNode, MediaError};
pub use node::{AudioDestinationNode, AudioNode};
pub use sources::{list_output_devices, OutputDevice, SourceError, DEFAULT_SINK_ID};

use serde::{Deserialize, Serialize};

/// Frames processed per graph pass
pub const RENDER_QUANTUM: usize = 128;

/// Sample rate used when nothing else decides one
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Audio context configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Rendering backend. `None` uses [`default_backend`].
    pub backend: Option<BackendKind>,

    /// Sample rate in Hz. `None` takes the device rate, or
    /// [`DEFAULT_SAMPLE_RATE`] for manual rendering.
    pub sample_rate: Option<u32>,

    /// Output device name, or `"default"`. Ignored by the manual backend.
    pub sink_id: Option<String>,
}

impl ContextConfig {
    /// Headless context driven by [`AudioContext::render`]
    pub fn manual(sample_rate: u32) -> Self {
        Self {
            backend: Some(BackendKind::Manual),
            sample_rate: Some(sample_rate),
            sink_id: None,
        }
    }
}
