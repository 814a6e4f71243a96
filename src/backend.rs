//! Output devices a [`DspNetwork`](crate::DspNetwork) can run on.

#[cfg(feature = "device")]
mod cpal_backend;

#[cfg(feature = "device")]
pub use cpal_backend::{CpalBackend, CpalError, CpalStream};

/// The realtime callback of an output stream. Receives an interleaved
/// buffer to fill.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub channels: u16,
    pub sample_rate: u32,
}

/// Something that can drive an [`OutputCallback`] from an audio device.
pub trait AudioBackend {
    /// Keeps the stream running while alive.
    type StreamHandle;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open and start an output stream.
    ///
    /// `device_name` selects a device by case-insensitive substring
    /// match. `None` selects the default output device.
    fn open_output(
        &self,
        device_name: Option<&str>,
        config: &StreamConfig,
        callback: OutputCallback,
    ) -> Result<Self::StreamHandle, Self::Error>;
}
