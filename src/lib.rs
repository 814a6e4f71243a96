pub mod backend;
pub mod built_in_modules;
pub mod config;
pub mod graph;
pub mod message;
pub mod module;
pub mod util;

pub use backend::AudioBackend;
pub use config::NetworkConfig;
pub use graph::{DspNetwork, Item, NetworkHandle};
pub use message::MessageBuffer;
pub use module::{Module, ModuleId};

/// The default maximum number of frames that can appear in a single
/// processing cycle.
///
/// Device buffers larger than this are split into several cycles.
/// Every pool buffer is allocated with this many samples so that no
/// allocation is needed while the cycle runs.
pub const MAX_CYCLE_FRAMES: usize = 256;

/// The maximum length of a module identifier in bytes.
pub const MAX_ID_LENGTH: usize = 32;

/// The maximum length of a control address in bytes.
pub const MAX_ADDRESS_LENGTH: usize = 64;

/// The maximum input channel a connection may target on a module that
/// has not declared its channels yet.
pub const MAX_CHANNELS: usize = 256;
