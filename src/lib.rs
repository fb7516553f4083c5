//! Audica
//!
//! A simplified handle for reading waveform or spectrum bytes from a playing
//! media element. [`audica`] wires the element through an analyser node:
//!
//! ```no_run
//! use audica::{audica, AudicaOptions, DataType, MediaElement};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let element = MediaElement::open("track.mp3")?;
//! let mut handle = audica(AudicaOptions {
//!     element: Some(element.clone()),
//!     ..Default::default()
//! })?;
//!
//! element.play();
//! let waveform = handle.get_data();
//!
//! handle.set_data_type(DataType::Hz);
//! let spectrum = handle.get_data();
//! # let _ = (waveform, spectrum);
//! # Ok(())
//! # }
//! ```
//!
//! The [`audio`] module holds the audio graph the handle is built on.

mod audica;
pub mod audio;

pub use crate::audica::{
    audica, Audica, AudicaError, AudicaOptions, DataType, ParseDataTypeError, DEFAULT_SIZE,
};
pub use audio::MediaElement;
