use crate::{
    message::{DecodeError, MessageBuffer},
    module::{ChannelConfig, Module, ModuleId, PrepareInfo, ProcessStatus},
};

/// The identifier under which a network hosts its [`OutputCollector`].
pub const COLLECTOR_ID: &str = "collect";

/// Control address that adds a [`Mapping`].
pub const NEW_MAPPING: &str = "newmapping";
/// Control address that removes a [`Mapping`].
pub const REMOVE_MAPPING: &str = "removemapping";

/// Each mapping is one input channel of the collector.
pub const MAX_MAPPINGS: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("could not parse mapping: {0}")]
    Decode(#[from] DecodeError),
    #[error("negative channel index {0}")]
    NegativeChannel(i32),
    #[error("destination channel {to} out of range (device has {channels} channels)")]
    DestinationOutOfRange { to: usize, channels: usize },
    #[error("collector already holds {} mappings", MAX_MAPPINGS)]
    TooManyMappings,
}

/// Routes one output channel of a module to one physical output
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mapping {
    pub source: ModuleId,
    pub from: usize,
    pub to: usize,
}

impl Mapping {
    pub fn new(source: ModuleId, from: usize, to: usize) -> Self {
        Self { source, from, to }
    }

    /// Append this mapping as `(source, from, to)`.
    pub fn encode(&self, message: &mut MessageBuffer<'_>) {
        message.write(&self.source);
        message.write(&(self.from as i32));
        message.write(&(self.to as i32));
    }

    /// Read a `(source, from, to)` triple. All three values are consumed
    /// even when the first one fails.
    pub fn decode(message: &mut MessageBuffer<'_>) -> Result<Self, MappingError> {
        let source = message.read::<ModuleId>();
        let from = message.read::<i32>();
        let to = message.read::<i32>();

        let (source, from, to) = (source?, from?, to?);
        let from = usize::try_from(from).map_err(|_| MappingError::NegativeChannel(from))?;
        let to = usize::try_from(to).map_err(|_| MappingError::NegativeChannel(to))?;

        Ok(Self { source, from, to })
    }
}

/// The terminal stage of a network.
///
/// Sums module outputs into one interleaved buffer that is handed to the
/// audio device. Input `i` of this module is the source of mapping `i`.
/// It declares no outputs of its own.
pub struct OutputCollector {
    map: Vec<Mapping>,
    channels: usize,
    interleaved: Vec<f32>,
    frames: usize,
    changed: bool,
}

impl OutputCollector {
    pub fn new(channels: usize, max_cycle_frames: usize) -> Self {
        Self {
            map: Vec::new(),
            channels,
            interleaved: vec![0.0; channels * max_cycle_frames],
            frames: 0,
            changed: false,
        }
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.map
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The mix produced by the last call to [`Module::process`].
    pub fn interleaved(&self) -> &[f32] {
        &self.interleaved[..self.frames * self.channels]
    }

    pub fn add_mapping(&mut self, mapping: Mapping) -> Result<(), MappingError> {
        if mapping.to >= self.channels {
            return Err(MappingError::DestinationOutOfRange {
                to: mapping.to,
                channels: self.channels,
            });
        }
        if self.map.len() >= MAX_MAPPINGS {
            return Err(MappingError::TooManyMappings);
        }

        self.map.push(mapping);
        self.changed = true;
        Ok(())
    }

    /// Remove the first mapping equal to `mapping`. Returns `false` if
    /// there was none.
    pub fn remove_mapping(&mut self, mapping: &Mapping) -> bool {
        match self.map.iter().position(|m| m == mapping) {
            Some(i) => {
                self.map.remove(i);
                self.changed = true;
                true
            }
            None => false,
        }
    }

    /// Returns `true` once after the mapping table changed.
    pub(crate) fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}

impl Module for OutputCollector {
    fn prepare(&mut self, info: &PrepareInfo) -> ChannelConfig {
        assert!(info.out_channels != 0);

        if info.out_channels != self.channels {
            self.channels = info.out_channels;
            let channels = self.channels;
            self.map.retain(|m| {
                let keep = m.to < channels;
                if !keep {
                    log::warn!(
                        "OutputCollector::prepare # dropping mapping to channel {}",
                        m.to
                    );
                }
                keep
            });
        }

        let need = self.channels * info.max_cycle_frames;
        if self.interleaved.len() < need {
            self.interleaved.resize(need, 0.0);
        }

        ChannelConfig::new(self.map.len() as u16, 0)
    }

    fn control(&mut self, address: &str, message: &mut MessageBuffer<'_>) {
        let mapping = match Mapping::decode(message) {
            Ok(mapping) => mapping,
            Err(e) => {
                log::error!("OutputCollector::control # Could not parse control # {}", e);
                return;
            }
        };

        match address {
            NEW_MAPPING => {
                if let Err(e) = self.add_mapping(mapping) {
                    log::error!("OutputCollector::control # {}", e);
                }
            }
            REMOVE_MAPPING => {
                if !self.remove_mapping(&mapping) {
                    log::debug!(
                        "OutputCollector::control # No mapping {:?} to remove",
                        mapping
                    );
                }
            }
            _ => log::error!("OutputCollector::control # No param \"{}\"", address),
        }
    }

    fn process(&mut self, inputs: &[&[f32]], _: &mut [&mut [f32]], frames: usize) -> ProcessStatus {
        let chans = self.channels;
        assert!(self.interleaved.len() >= frames * chans);

        self.frames = frames;
        let dest = &mut self.interleaved[..frames * chans];
        dest.fill(0.0);

        if frames == 0 {
            return ProcessStatus::Continue;
        }

        for (mapping, src) in self.map.iter().zip(inputs.iter()) {
            for (out, s) in dest[mapping.to..]
                .iter_mut()
                .step_by(chans)
                .zip(src[..frames].iter())
            {
                *out += *s;
            }
        }

        ProcessStatus::Continue
    }
}
