//! Analyser node: passes audio through and exposes waveform and spectrum snapshots

use super::context::AudioContext;
use super::graph::{AudioProcessor, NodeId, RenderScope};
use super::node::AudioNode;
use parking_lot::Mutex;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32768;
pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_SMOOTHING_TIME_CONSTANT: f32 = 0.8;
pub const DEFAULT_MIN_DECIBELS: f32 = -100.0;
pub const DEFAULT_MAX_DECIBELS: f32 = -30.0;

/// Blackman window parameter
const BLACKMAN_ALPHA: f32 = 0.16;

/// Analyser parameter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyserError {
    #[error("Index size error: {0}")]
    IndexSize(String),
}

/// Circular audio buffer
pub struct AudioBuffer {
    samples: Vec<f32>,
    write_pos: usize,
    capacity: usize,
}

impl AudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            write_pos: 0,
            capacity,
        }
    }

    pub fn push_samples(&mut self, data: &[f32]) {
        for &sample in data {
            self.samples[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
    }

    pub fn get_latest(&self, count: usize) -> Vec<f32> {
        let count = count.min(self.capacity);
        let mut result = Vec::with_capacity(count);

        let start = if self.write_pos >= count {
            self.write_pos - count
        } else {
            self.capacity - (count - self.write_pos)
        };

        for i in 0..count {
            let idx = (start + i) % self.capacity;
            result.push(self.samples[idx]);
        }

        result
    }
}

/// Shared analyser state, written by the render thread and read by handles
pub(crate) struct AnalyserState {
    buffer: AudioBuffer,
    fft_size: usize,
    smoothing_time_constant: f32,
    min_decibels: f32,
    max_decibels: f32,
    planner: FftPlanner<f32>,
    window: Vec<f32>,

    // Smoothed magnitudes from the previous block, one per bin
    smoothed: Vec<f32>,

    // Frames received so far, and the count at the last spectrum computation
    frames_seen: u64,
    analysed_at: Option<u64>,
}

impl AnalyserState {
    fn new() -> Self {
        Self {
            buffer: AudioBuffer::new(MAX_FFT_SIZE),
            fft_size: DEFAULT_FFT_SIZE,
            smoothing_time_constant: DEFAULT_SMOOTHING_TIME_CONSTANT,
            min_decibels: DEFAULT_MIN_DECIBELS,
            max_decibels: DEFAULT_MAX_DECIBELS,
            planner: FftPlanner::new(),
            window: blackman_window(DEFAULT_FFT_SIZE),
            smoothed: vec![0.0; DEFAULT_FFT_SIZE / 2],
            frames_seen: 0,
            analysed_at: None,
        }
    }

    fn set_fft_size(&mut self, size: usize) -> Result<(), AnalyserError> {
        if !size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&size) {
            return Err(AnalyserError::IndexSize(format!(
                "fft size {} must be a power of two between {} and {}",
                size, MIN_FFT_SIZE, MAX_FFT_SIZE
            )));
        }
        if size != self.fft_size {
            self.fft_size = size;
            self.window = blackman_window(size);
            self.smoothed = vec![0.0; size / 2];
            self.analysed_at = None;
        }
        Ok(())
    }

    /// Update smoothed magnitudes if audio arrived since the last computation
    fn update_spectrum(&mut self) {
        if self.analysed_at == Some(self.frames_seen) {
            return;
        }

        let fft_size = self.fft_size;
        let fft = self.planner.plan_fft_forward(fft_size);
        let mut spectrum: Vec<Complex<f32>> = self
            .buffer
            .get_latest(fft_size)
            .iter()
            .zip(&self.window)
            .map(|(&sample, &w)| Complex::new(sample * w, 0.0))
            .collect();
        fft.process(&mut spectrum);

        let tau = self.smoothing_time_constant;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(&spectrum) {
            let magnitude = bin.norm() / fft_size as f32;
            let value = tau * *smoothed + (1.0 - tau) * magnitude;
            *smoothed = if value.is_finite() { value } else { 0.0 };
        }

        self.analysed_at = Some(self.frames_seen);
    }

    fn float_frequency_data(&mut self, out: &mut [f32]) {
        self.update_spectrum();
        for (slot, &magnitude) in out.iter_mut().zip(&self.smoothed) {
            *slot = linear_to_decibels(magnitude);
        }
    }

    fn byte_frequency_data(&mut self, out: &mut [u8]) {
        self.update_spectrum();
        let range = self.max_decibels - self.min_decibels;
        for (slot, &magnitude) in out.iter_mut().zip(&self.smoothed) {
            let db = linear_to_decibels(magnitude);
            let scaled = (255.0 / range * (db - self.min_decibels)).floor();
            *slot = if scaled.is_nan() {
                0
            } else {
                scaled.clamp(0.0, 255.0) as u8
            };
        }
    }

    fn float_time_domain_data(&self, out: &mut [f32]) {
        let window = self.buffer.get_latest(self.fft_size);
        for (slot, &sample) in out.iter_mut().zip(&window) {
            *slot = sample;
        }
    }

    fn byte_time_domain_data(&self, out: &mut [u8]) {
        let window = self.buffer.get_latest(self.fft_size);
        for (slot, &sample) in out.iter_mut().zip(&window) {
            *slot = (128.0 * (1.0 + sample)).floor().clamp(0.0, 255.0) as u8;
        }
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    let a0 = 0.5 * (1.0 - BLACKMAN_ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * BLACKMAN_ALPHA;
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

fn linear_to_decibels(value: f32) -> f32 {
    if value <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * value.log10()
    }
}

/// Render-side half of an analyser
pub(crate) struct AnalyserProcessor {
    state: Arc<Mutex<AnalyserState>>,
}

impl AudioProcessor for AnalyserProcessor {
    fn process(&mut self, input: &[f32], output: &mut [f32], _scope: &RenderScope) {
        output.copy_from_slice(input);
        let mut state = self.state.lock();
        state.buffer.push_samples(input);
        state.frames_seen += input.len() as u64;
    }

    fn pulls_automatically(&self) -> bool {
        true
    }
}

/// Handle to an analyser node
#[derive(Clone)]
pub struct AnalyserNode {
    id: NodeId,
    context: AudioContext,
    state: Arc<Mutex<AnalyserState>>,
}

impl fmt::Debug for AnalyserNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyserNode")
            .field("id", &self.id)
            .field("fft_size", &self.fft_size())
            .finish()
    }
}

impl AnalyserNode {
    pub(crate) fn build() -> (AnalyserProcessor, Arc<Mutex<AnalyserState>>) {
        let state = Arc::new(Mutex::new(AnalyserState::new()));
        (
            AnalyserProcessor {
                state: state.clone(),
            },
            state,
        )
    }

    pub(crate) fn new(id: NodeId, context: AudioContext, state: Arc<Mutex<AnalyserState>>) -> Self {
        Self { id, context, state }
    }

    pub fn fft_size(&self) -> usize {
        self.state.lock().fft_size
    }

    /// Must be a power of two between 32 and 32768
    pub fn set_fft_size(&self, size: usize) -> Result<(), AnalyserError> {
        self.state.lock().set_fft_size(size)
    }

    /// Half the FFT size
    pub fn frequency_bin_count(&self) -> usize {
        self.state.lock().fft_size / 2
    }

    pub fn smoothing_time_constant(&self) -> f32 {
        self.state.lock().smoothing_time_constant
    }

    pub fn set_smoothing_time_constant(&self, value: f32) -> Result<(), AnalyserError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(AnalyserError::IndexSize(format!(
                "smoothing time constant {} must be between 0 and 1",
                value
            )));
        }
        self.state.lock().smoothing_time_constant = value;
        Ok(())
    }

    pub fn min_decibels(&self) -> f32 {
        self.state.lock().min_decibels
    }

    pub fn set_min_decibels(&self, value: f32) -> Result<(), AnalyserError> {
        let mut state = self.state.lock();
        if value >= state.max_decibels {
            return Err(AnalyserError::IndexSize(format!(
                "min decibels {} must be below max decibels {}",
                value, state.max_decibels
            )));
        }
        state.min_decibels = value;
        Ok(())
    }

    pub fn max_decibels(&self) -> f32 {
        self.state.lock().max_decibels
    }

    pub fn set_max_decibels(&self, value: f32) -> Result<(), AnalyserError> {
        let mut state = self.state.lock();
        if value <= state.min_decibels {
            return Err(AnalyserError::IndexSize(format!(
                "max decibels {} must be above min decibels {}",
                value, state.min_decibels
            )));
        }
        state.max_decibels = value;
        Ok(())
    }

    /// Spectrum in dB, low to high frequency. Writes at most `frequency_bin_count` values.
    pub fn get_float_frequency_data(&self, out: &mut [f32]) {
        self.state.lock().float_frequency_data(out);
    }

    /// Spectrum scaled between min and max decibels to 0..=255
    pub fn get_byte_frequency_data(&self, out: &mut [u8]) {
        self.state.lock().byte_frequency_data(out);
    }

    /// Most recent waveform. Writes at most `fft_size` samples.
    pub fn get_float_time_domain_data(&self, out: &mut [f32]) {
        self.state.lock().float_time_domain_data(out);
    }

    /// Most recent waveform with silence at 128
    pub fn get_byte_time_domain_data(&self, out: &mut [u8]) {
        self.state.lock().byte_time_domain_data(out);
    }
}

impl AudioNode for AnalyserNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn context(&self) -> &AudioContext {
        &self.context
    }
}
