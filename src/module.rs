use std::{fmt, ops::Deref};

use arrayvec::ArrayString;

use crate::{
    message::{Decode, DecodeError, Encode, Marker, MessageBuffer},
    MAX_ADDRESS_LENGTH, MAX_ID_LENGTH,
};

/// A control address such as `"newmapping"`.
pub type Address = ArrayString<MAX_ADDRESS_LENGTH>;

/// A processing unit that can be placed in a [`DspNetwork`](crate::DspNetwork).
pub trait Module: Send + 'static {
    /// Declare the channel layout of this module.
    ///
    /// Called before the module is first compiled into the network, and
    /// again whenever its layout may have changed. This is the place to
    /// allocate internal buffers.
    fn prepare(&mut self, info: &PrepareInfo) -> ChannelConfig;

    /// Apply a parameter change.
    ///
    /// `address` selects the parameter and `message` carries its
    /// arguments. Unknown addresses should be logged and ignored.
    #[allow(unused)]
    fn control(&mut self, address: &str, message: &mut MessageBuffer<'_>) {
        log::warn!("Module::control # No param \"{}\"", address);
    }

    /// Process one cycle.
    ///
    /// `inputs` and `outputs` match the declared [`ChannelConfig`] and
    /// each slice is exactly `frames` samples long. This must not
    /// allocate.
    fn process(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> ProcessStatus;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub num_inputs: u16,
    pub num_outputs: u16,
}

impl ChannelConfig {
    pub const fn new(num_inputs: u16, num_outputs: u16) -> Self {
        Self {
            num_inputs,
            num_outputs,
        }
    }
}

/// Information about the network a module is being prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareInfo {
    /// The sample rate of the stream
    pub sample_rate: u32,
    /// The maximum number of frames passed to [`Module::process`]
    pub max_cycle_frames: usize,
    /// The number of physical output channels
    pub out_channels: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    #[default]
    Continue,
    /// The module has reached the end of its stream. It will be retired
    /// at the next cycle boundary.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ModuleIdError {
    #[error("module identifier is empty")]
    Empty,
    #[error("module identifier of {0} bytes exceeds {} bytes", MAX_ID_LENGTH)]
    TooLong(usize),
}

/// The name of a module within a network.
///
/// At most [`MAX_ID_LENGTH`] bytes, stored inline.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(ArrayString<MAX_ID_LENGTH>);

impl ModuleId {
    pub fn new(id: &str) -> Result<Self, ModuleIdError> {
        if id.is_empty() {
            return Err(ModuleIdError::Empty);
        }
        ArrayString::from(id)
            .map(Self)
            .map_err(|_| ModuleIdError::TooLong(id.len()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ModuleId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ModuleId {
    type Error = ModuleIdError;

    fn try_from(id: &str) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl PartialEq<str> for ModuleId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ModuleId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({:?})", self.as_str())
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Encode for ModuleId {
    fn marker(&self) -> Marker {
        Marker::String
    }
    fn payload_len(&self) -> usize {
        self.as_str().payload_len()
    }
    fn encode_payload(&self, dst: &mut [u8]) {
        self.as_str().encode_payload(dst)
    }
}

impl Decode for ModuleId {
    const MARKER: Marker = Marker::String;

    fn decode(marker: Marker, payload: &[u8]) -> Result<Self, DecodeError> {
        if marker != Marker::String {
            return Err(DecodeError::TypeMismatch {
                expected: Self::MARKER,
                found: marker,
            });
        }

        let len = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        let s = std::str::from_utf8(&payload[..len]).map_err(|_| DecodeError::InvalidUtf8)?;
        ModuleId::new(s).map_err(|e| match e {
            ModuleIdError::Empty => DecodeError::Malformed {
                marker: Marker::String,
                len: 0,
            },
            ModuleIdError::TooLong(len) => DecodeError::TooLong {
                len,
                max: MAX_ID_LENGTH,
            },
        })
    }
}

/// A module that does nothing. Useful as a placeholder in tests.
pub struct DummyModule(pub ChannelConfig);

impl Module for DummyModule {
    fn prepare(&mut self, _info: &PrepareInfo) -> ChannelConfig {
        self.0
    }

    fn process(&mut self, _: &[&[f32]], outputs: &mut [&mut [f32]], _: usize) -> ProcessStatus {
        for out in outputs.iter_mut() {
            out.fill(0.0);
        }
        ProcessStatus::Continue
    }
}
