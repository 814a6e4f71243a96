use crate::{message::DecodeError, module::ModuleId};

/// Why an item could not be wired in this cycle.
///
/// All of these are retried at every cycle boundary until they resolve
/// or the item is removed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("source module \"{0}\" does not exist")]
    UnknownSource(ModuleId),
    #[error("source module \"{0}\" is not compiled yet")]
    SourceNotCompiled(ModuleId),
    #[error("source module \"{module}\" has no output channel {channel}")]
    ChannelOutOfRange { module: ModuleId, channel: usize },
    #[error("module \"{0}\" cannot read its own output")]
    SelfConnection(ModuleId),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("could not parse connection: {0}")]
    Decode(#[from] DecodeError),
    #[error("negative channel index {0}")]
    NegativeChannel(i32),
}
