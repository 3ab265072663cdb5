//! Audio pipeline: sources, frames and the per-frame processing stages.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod clock;
pub mod encode;
pub mod frame;
pub mod resample;
pub mod silence;
pub mod source;
pub mod wav;
