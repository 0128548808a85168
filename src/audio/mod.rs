//! Audio capture subsystem

pub mod capture;
pub mod source;

pub use capture::AudioCapture;
pub use source::{CaptureBackend, CaptureSource, MicBackend, ScriptedBackend, ScriptedSource};
