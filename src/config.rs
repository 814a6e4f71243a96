use crate::MAX_CYCLE_FRAMES;

/// Construction parameters for a [`DspNetwork`](crate::DspNetwork).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetworkConfig {
    /// The sample rate of the stream
    pub sample_rate: u32,
    /// The largest number of frames processed in one cycle.
    pub max_cycle_frames: usize,
    /// The number of physical output channels.
    pub out_channels: u16,
    /// Initial capacity of the pending command queue.
    pub command_capacity: usize,
    /// Capacity of the ring that returns retired items and spent
    /// messages to the control side.
    pub garbage_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            max_cycle_frames: MAX_CYCLE_FRAMES,
            out_channels: 2,
            command_capacity: 64,
            garbage_capacity: 256,
        }
    }
}
