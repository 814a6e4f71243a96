use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Host,
};

use super::{AudioBackend, OutputCallback, StreamConfig};

#[derive(Debug, thiserror::Error)]
pub enum CpalError {
    #[error("no default output device")]
    NoDevice,
    #[error("no output device matching \"{0}\"")]
    DeviceNotFound(String),
    #[error("could not enumerate devices: {0}")]
    Devices(#[from] cpal::DevicesError),
    #[error("could not build stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("could not start stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Plays a network through the default cpal host.
pub struct CpalBackend {
    host: Host,
}

/// A running output stream. Dropping it stops playback.
pub struct CpalStream {
    _stream: cpal::Stream,
}

impl CpalBackend {
    pub fn new() -> Self {
        let host = cpal::default_host();
        log::info!("CpalBackend::new # host {}", host.id().name());
        Self { host }
    }

    fn find_output_device(&self, name: Option<&str>) -> Result<cpal::Device, CpalError> {
        let Some(search) = name else {
            return self.host.default_output_device().ok_or(CpalError::NoDevice);
        };

        let search_lower = search.to_lowercase();
        for device in self.host.output_devices()? {
            if let Ok(dev_name) = device.name() {
                if dev_name.to_lowercase().contains(&search_lower) {
                    return Ok(device);
                }
            }
        }

        Err(CpalError::DeviceNotFound(search.to_string()))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    type StreamHandle = CpalStream;
    type Error = CpalError;

    fn open_output(
        &self,
        device_name: Option<&str>,
        config: &StreamConfig,
        mut callback: OutputCallback,
    ) -> Result<CpalStream, CpalError> {
        let device = self.find_output_device(device_name)?;

        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
            |err| log::error!("CpalBackend # stream error # {}", err),
            None,
        )?;
        stream.play()?;

        log::info!(
            "CpalBackend::open_output # \"{}\" started",
            device.name().unwrap_or_default()
        );

        Ok(CpalStream { _stream: stream })
    }
}
