//! Playable media elements and the source node that routes them into a context

use super::context::AudioContext;
use super::decode;
use super::graph::{AudioProcessor, NodeId, RenderScope};
use super::node::AudioNode;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Media element errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Failed to read media: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to probe media format: {0}")]
    Probe(String),

    #[error("No audio track found")]
    NoTrack,

    #[error("No sample rate in audio track")]
    NoSampleRate,

    #[error("Failed to create audio decoder: {0}")]
    Decoder(String),

    #[error("Invalid sample format: {0}")]
    InvalidFormat(String),

    #[error("Element is already connected to a source node")]
    AlreadyCaptured,

    #[error("Index size error: {0}")]
    IndexSize(String),
}

struct ElementState {
    // Mono down-mix
    samples: Vec<f32>,
    sample_rate: u32,

    // Read head in element frames
    position: f64,
    paused: bool,
    ended: bool,
    looping: bool,
    volume: f32,
    muted: bool,
    captured: bool,
    src: Option<PathBuf>,
}

impl ElementState {
    fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Fill `out` at `out_rate`, advancing the read head
    fn read(&mut self, out: &mut [f32], out_rate: u32) {
        if self.paused || self.ended {
            out.fill(0.0);
            return;
        }
        if self.samples.is_empty() {
            // Nothing to play: already at the end
            self.ended = true;
            self.paused = true;
            out.fill(0.0);
            return;
        }

        let len = self.samples.len();
        let step = self.sample_rate as f64 / out_rate as f64;
        let gain = if self.muted { 0.0 } else { self.volume };

        for slot in out.iter_mut() {
            if self.position >= len as f64 {
                if self.looping {
                    self.position %= len as f64;
                } else {
                    self.ended = true;
                    self.paused = true;
                    *slot = 0.0;
                    continue;
                }
            }

            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            let current = self.samples[index];
            let next = match self.samples.get(index + 1) {
                Some(&sample) => sample,
                None if self.looping => self.samples[0],
                None => current,
            };

            *slot = gain * (current + (next - current) * frac);
            self.position += step;
        }
    }
}

/// Handle to a playable piece of audio, owned by the caller.
///
/// Clones share playback state, so a clone handed to a context follows
/// `play`/`pause` calls made through any other clone.
#[derive(Clone)]
pub struct MediaElement {
    inner: Arc<Mutex<ElementState>>,
}

impl fmt::Debug for MediaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MediaElement")
            .field("src", &state.src)
            .field("sample_rate", &state.sample_rate)
            .field("duration", &state.duration())
            .field("paused", &state.paused)
            .field("ended", &state.ended)
            .finish()
    }
}

impl MediaElement {
    /// Build an element from interleaved samples
    pub fn from_samples(
        interleaved: Vec<f32>,
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, MediaError> {
        if channels == 0 {
            return Err(MediaError::InvalidFormat("zero channels".to_string()));
        }
        if sample_rate == 0 {
            return Err(MediaError::InvalidFormat("zero sample rate".to_string()));
        }

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels as usize)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(Self::with_state(samples, sample_rate, None))
    }

    /// Decode a media file into a paused element
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let path = path.as_ref();
        let decoded = decode::decode_to_mono(path)?;
        log::info!(
            "Opened {:?} ({:.2}s at {} Hz)",
            path,
            decoded.samples.len() as f64 / decoded.sample_rate as f64,
            decoded.sample_rate
        );
        Ok(Self::with_state(
            decoded.samples,
            decoded.sample_rate,
            Some(path.to_path_buf()),
        ))
    }

    fn with_state(samples: Vec<f32>, sample_rate: u32, src: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ElementState {
                samples,
                sample_rate,
                position: 0.0,
                paused: true,
                ended: false,
                looping: false,
                volume: 1.0,
                muted: false,
                captured: false,
                src,
            })),
        }
    }

    /// Start or continue playback; an ended element restarts from the beginning
    pub fn play(&self) {
        let mut state = self.inner.lock();
        if state.ended {
            state.position = 0.0;
            state.ended = false;
        }
        state.paused = false;
    }

    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn ended(&self) -> bool {
        self.inner.lock().ended
    }

    /// Playback position in seconds
    pub fn current_time(&self) -> f64 {
        let state = self.inner.lock();
        state.position / state.sample_rate as f64
    }

    /// Seek, clamped to the element's duration. Non-finite times are ignored.
    pub fn set_current_time(&self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        let mut state = self.inner.lock();
        let target = seconds.clamp(0.0, state.duration());
        state.position = target * state.sample_rate as f64;
        state.ended = false;
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.inner.lock().duration()
    }

    pub fn set_loop(&self, looping: bool) {
        self.inner.lock().looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.inner.lock().looping
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), MediaError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(MediaError::IndexSize(format!(
                "volume {} must be between 0 and 1",
                volume
            )));
        }
        self.inner.lock().volume = volume;
        Ok(())
    }

    pub fn muted(&self) -> bool {
        self.inner.lock().muted
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.lock().muted = muted;
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.lock().sample_rate
    }

    /// File the element was opened from
    pub fn src(&self) -> Option<PathBuf> {
        self.inner.lock().src.clone()
    }

    /// Claim the element for a source node
    pub(crate) fn capture(&self) -> Result<(), MediaError> {
        let mut state = self.inner.lock();
        if state.captured {
            return Err(MediaError::AlreadyCaptured);
        }
        state.captured = true;
        Ok(())
    }

    pub(crate) fn processor(&self) -> MediaSourceProcessor {
        MediaSourceProcessor {
            element: self.clone(),
        }
    }
}

/// Render-side half of a media element source
pub(crate) struct MediaSourceProcessor {
    element: MediaElement,
}

impl AudioProcessor for MediaSourceProcessor {
    fn process(&mut self, _input: &[f32], output: &mut [f32], scope: &RenderScope) {
        self.element.inner.lock().read(output, scope.sample_rate);
    }
}

/// Source node reading from a [`MediaElement`]
#[derive(Debug, Clone)]
pub struct MediaElementAudioSourceNode {
    id: NodeId,
    context: AudioContext,
    element: MediaElement,
}

impl MediaElementAudioSourceNode {
    pub(crate) fn new(id: NodeId, context: AudioContext, element: MediaElement) -> Self {
        Self {
            id,
            context,
            element,
        }
    }

    pub fn media_element(&self) -> &MediaElement {
        &self.element
    }
}

impl AudioNode for MediaElementAudioSourceNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn context(&self) -> &AudioContext {
        &self.context
    }
}
