//! The Audica handle: one media element wired through an analyser

use crate::audio::{
    AnalyserError, AnalyserNode, AudioContext, AudioNode, ContextError, MediaElement,
    MediaElementAudioSourceNode,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Size used when the options leave it unset
pub const DEFAULT_SIZE: usize = 256;

/// Kind of data returned by [`Audica::get_data`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Waveform bytes, silence at 128
    #[default]
    Time,

    /// Spectrum bytes, bass first and treble last
    Hz,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Time => f.write_str("time"),
            DataType::Hz => f.write_str("hz"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown data type '{0}', expected 'time' or 'hz'")]
pub struct ParseDataTypeError(String);

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(DataType::Time),
            "hz" => Ok(DataType::Hz),
            other => Err(ParseDataTypeError(other.to_string())),
        }
    }
}

/// Options for [`audica`]. Unset fields take their documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudicaOptions {
    /// Number of values returned by `get_data`. Must be greater than 8 and
    /// divisible by 8. The analyser's FFT size becomes `size * 2`.
    ///
    /// Defaults to 256.
    pub size: Option<usize>,

    /// Element to draw audio from. Required.
    #[serde(skip)]
    pub element: Option<MediaElement>,

    /// Defaults to [`DataType::Time`].
    pub data_type: Option<DataType>,
}

/// Wrapper construction errors
#[derive(Error, Debug)]
pub enum AudicaError {
    #[error("Size must be a number greater than 8 and divisible by 8 (got {0})")]
    InvalidSize(usize),

    #[error("No element provided in options.element, pass in a media element")]
    MissingElement,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Analyser(#[from] AnalyserError),
}

/// Options with defaults applied and validated
#[derive(Debug, Clone)]
struct Settings {
    size: usize,
    element: MediaElement,
    data_type: DataType,
}

impl Settings {
    fn resolve(options: AudicaOptions) -> Result<Self, AudicaError> {
        let size = options.size.unwrap_or(DEFAULT_SIZE);
        if size % 8 != 0 || size <= 8 {
            return Err(AudicaError::InvalidSize(size));
        }

        let element = options.element.ok_or(AudicaError::MissingElement)?;

        Ok(Self {
            size,
            element,
            data_type: options.data_type.unwrap_or_default(),
        })
    }
}

/// Handle returned by [`audica`]
#[derive(Debug)]
pub struct Audica {
    settings: Settings,
    context: AudioContext,
    source: MediaElementAudioSourceNode,
    analyser: AnalyserNode,
}

/// Create an [`Audica`] handle for `options.element`
pub fn audica(options: AudicaOptions) -> Result<Audica, AudicaError> {
    Audica::new(options)
}

impl Audica {
    /// Validate `options` and wire the element into a new context on the
    /// default backend.
    pub fn new(options: AudicaOptions) -> Result<Self, AudicaError> {
        let settings = Settings::resolve(options)?;
        let context = AudioContext::new()?;
        Self::assemble(settings, context)
    }

    /// Like [`Audica::new`], but builds the graph on `context`
    pub fn with_context(options: AudicaOptions, context: AudioContext) -> Result<Self, AudicaError> {
        let settings = Settings::resolve(options)?;
        Self::assemble(settings, context)
    }

    fn assemble(settings: Settings, context: AudioContext) -> Result<Self, AudicaError> {
        let source = context.create_media_element_source(&settings.element)?;
        let analyser = context.create_analyser()?;
        analyser.set_fft_size(settings.size * 2)?;

        source
            .connect(&analyser)?
            .connect(&context.destination())?;

        log::debug!(
            "Audica ready: size {}, data type {}",
            settings.size,
            settings.data_type
        );

        Ok(Self {
            settings,
            context,
            source,
            analyser,
        })
    }

    pub fn set_data_type(&mut self, data_type: DataType) {
        self.settings.data_type = data_type;
    }

    pub fn data_type(&self) -> DataType {
        self.settings.data_type
    }

    pub fn size(&self) -> usize {
        self.settings.size
    }

    pub fn element(&self) -> &MediaElement {
        &self.settings.element
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    pub fn source(&self) -> &MediaElementAudioSourceNode {
        &self.source
    }

    pub fn analyser(&self) -> &AnalyserNode {
        &self.analyser
    }

    /// Snapshot of the current audio, one byte per frequency bin
    pub fn get_data(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.analyser.frequency_bin_count()];
        match self.settings.data_type {
            DataType::Time => self.analyser.get_byte_time_domain_data(&mut data),
            DataType::Hz => self.analyser.get_byte_frequency_data(&mut data),
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ContextConfig, MediaError};

    const RATE: u32 = 48000;

    fn manual() -> AudioContext {
        AudioContext::with_config(ContextConfig::manual(RATE)).unwrap()
    }

    fn constant_element(value: f32) -> MediaElement {
        MediaElement::from_samples(vec![value; RATE as usize], 1, RATE).unwrap()
    }

    fn options(element: MediaElement) -> AudicaOptions {
        AudicaOptions {
            element: Some(element),
            ..Default::default()
        }
    }

    #[test]
    fn sizes_not_divisible_by_eight_are_rejected() {
        for size in [9, 12, 100, 255, 257, 1001] {
            let result = Audica::with_context(
                AudicaOptions {
                    size: Some(size),
                    ..options(constant_element(0.0))
                },
                manual(),
            );
            assert!(
                matches!(result, Err(AudicaError::InvalidSize(s)) if s == size),
                "size {} accepted",
                size
            );
        }
    }

    #[test]
    fn sizes_up_to_eight_are_rejected() {
        for size in [0, 8] {
            let result = Audica::with_context(
                AudicaOptions {
                    size: Some(size),
                    ..options(constant_element(0.0))
                },
                manual(),
            );
            assert!(matches!(result, Err(AudicaError::InvalidSize(_))));
        }
    }

    #[test]
    fn missing_element_is_rejected() {
        let result = Audica::with_context(AudicaOptions::default(), manual());

        assert!(matches!(result, Err(AudicaError::MissingElement)));
    }

    #[test]
    fn size_is_checked_before_element() {
        let result = Audica::with_context(
            AudicaOptions {
                size: Some(10),
                ..Default::default()
            },
            manual(),
        );

        assert!(matches!(result, Err(AudicaError::InvalidSize(10))));
    }

    #[test]
    fn validation_errors_surface_from_factory_before_any_context() {
        let result = audica(AudicaOptions::default());

        assert!(matches!(result, Err(AudicaError::MissingElement)));
    }

    #[test]
    fn analyser_errors_propagate_for_non_power_of_two_sizes() {
        let result = Audica::with_context(
            AudicaOptions {
                size: Some(24),
                ..options(constant_element(0.0))
            },
            manual(),
        );

        assert!(matches!(
            result,
            Err(AudicaError::Analyser(AnalyserError::IndexSize(_)))
        ));
    }

    #[test]
    fn reusing_a_wired_element_propagates_the_host_error() {
        let element = constant_element(0.0);
        let context = manual();
        let _first = Audica::with_context(options(element.clone()), context.clone()).unwrap();

        let second = Audica::with_context(options(element), context);
        assert!(matches!(
            second,
            Err(AudicaError::Context(ContextError::Media(
                MediaError::AlreadyCaptured
            )))
        ));
    }

    #[test]
    fn defaults_are_size_256_and_time() {
        let audica = Audica::with_context(options(constant_element(0.0)), manual()).unwrap();

        assert_eq!(audica.size(), 256);
        assert_eq!(audica.data_type(), DataType::Time);
        assert_eq!(audica.analyser().fft_size(), 512);
        assert_eq!(audica.get_data().len(), 256);
    }

    #[test]
    fn data_length_matches_frequency_bin_count() {
        for size in [16, 64, 256, 1024] {
            let audica = Audica::with_context(
                AudicaOptions {
                    size: Some(size),
                    ..options(constant_element(0.0))
                },
                manual(),
            )
            .unwrap();

            assert_eq!(audica.analyser().frequency_bin_count(), size);
            assert_eq!(audica.get_data().len(), size);
        }
    }

    #[test]
    fn graph_is_wired_source_to_analyser_to_destination() {
        let context = manual();
        let audica = Audica::with_context(options(constant_element(0.0)), context.clone()).unwrap();

        assert_eq!(
            context.inputs_of(audica.analyser().id()),
            vec![audica.source().id()]
        );
        assert_eq!(
            context.inputs_of(context.destination().id()),
            vec![audica.analyser().id()]
        );
    }

    #[test]
    fn audio_passes_through_to_destination() {
        let context = manual();
        let audica = Audica::with_context(options(constant_element(0.5)), context.clone()).unwrap();
        audica.element().play();

        let out = context.render(256).unwrap();
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn time_mode_reads_the_waveform() {
        let context = manual();
        let audica = Audica::with_context(options(constant_element(0.5)), context.clone()).unwrap();

        assert!(audica.get_data().iter().all(|&b| b == 128));

        audica.element().play();
        context.render(1024).unwrap();
        assert!(audica.get_data().iter().all(|&b| b == 192));
    }

    #[test]
    fn switching_modes_changes_only_the_extraction_path() {
        let context = manual();
        let mut audica =
            Audica::with_context(options(constant_element(0.5)), context.clone()).unwrap();
        audica.element().play();
        context.render(1024).unwrap();

        let time = audica.get_data();
        audica.set_data_type(DataType::Hz);
        let hz = audica.get_data();

        assert_eq!(audica.data_type(), DataType::Hz);
        assert_eq!(time[0], 192);
        // DC energy lands in the lowest bins
        assert_eq!(hz[0], 255);
        assert_eq!(hz[200], 0);
        assert!(time.iter().all(|&b| b == 192));

        audica.set_data_type(DataType::Time);
        assert_eq!(audica.get_data(), time);
    }

    #[test]
    fn explicit_defaults_match_omitted_options() {
        let implicit_context = manual();
        let explicit_context = manual();
        let mut implicit =
            Audica::with_context(options(constant_element(0.25)), implicit_context.clone())
                .unwrap();
        let mut explicit = Audica::with_context(
            AudicaOptions {
                size: Some(256),
                data_type: Some(DataType::Time),
                ..options(constant_element(0.25))
            },
            explicit_context.clone(),
        )
        .unwrap();

        for audica in [&implicit, &explicit] {
            audica.element().play();
        }
        implicit_context.render(2048).unwrap();
        explicit_context.render(2048).unwrap();
        assert_eq!(implicit.get_data(), explicit.get_data());

        implicit.set_data_type(DataType::Hz);
        explicit.set_data_type(DataType::Hz);
        assert_eq!(implicit.get_data(), explicit.get_data());
    }

    #[test]
    fn data_type_parses_and_serializes_lowercase() {
        assert_eq!("time".parse::<DataType>(), Ok(DataType::Time));
        assert_eq!("hz".parse::<DataType>(), Ok(DataType::Hz));
        assert!("freq".parse::<DataType>().is_err());
        assert_eq!(DataType::Hz.to_string(), "hz");
        assert_eq!(serde_json::to_string(&DataType::Hz).unwrap(), "\"hz\"");
    }

    #[test]
    fn options_deserialize_without_element() {
        let options: AudicaOptions =
            serde_json::from_str(r#"{"size": 512, "data_type": "hz"}"#).unwrap();

        assert_eq!(options.size, Some(512));
        assert_eq!(options.data_type, Some(DataType::Hz));
        assert!(options.element.is_none());
    }
}
