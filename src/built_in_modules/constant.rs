use crate::{
    message::MessageBuffer,
    module::{ChannelConfig, Module, PrepareInfo, ProcessStatus},
};

/// Writes the same value to every output sample.
///
/// Control `value` (float) sets the value.
pub struct ConstantSource {
    value: f32,
    num_outputs: u16,
}

impl ConstantSource {
    pub fn new(value: f32, num_outputs: u16) -> Self {
        Self { value, num_outputs }
    }
}

impl Module for ConstantSource {
    fn prepare(&mut self, _info: &PrepareInfo) -> ChannelConfig {
        ChannelConfig::new(0, self.num_outputs)
    }

    fn control(&mut self, address: &str, message: &mut MessageBuffer<'_>) {
        match address {
            "value" => match message.read::<f32>() {
                Ok(v) => self.value = v,
                Err(e) => log::error!("ConstantSource::control # Could not parse value # {}", e),
            },
            _ => log::error!("ConstantSource::control # No param \"{}\"", address),
        }
    }

    fn process(&mut self, _: &[&[f32]], outputs: &mut [&mut [f32]], _: usize) -> ProcessStatus {
        for out in outputs.iter_mut() {
            out.fill(self.value);
        }
        ProcessStatus::Continue
    }
}
