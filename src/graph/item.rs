use smallvec::SmallVec;

use crate::{
    message::MessageBuffer,
    module::{ChannelConfig, Module, ModuleId, ProcessStatus},
};

use super::{
    buffer_pool::{BufferIdx, BufferPool},
    error::ConnectionError,
    executor::Scratch,
};

/// One output channel of a named module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub source: ModuleId,
    pub channel: usize,
}

impl Connection {
    pub fn new(source: ModuleId, channel: usize) -> Self {
        Self { source, channel }
    }
}

/// A request to wire input `target_channel` of `target` to output
/// `source_channel` of `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NewConnection {
    pub target: ModuleId,
    pub target_channel: usize,
    pub source: ModuleId,
    pub source_channel: usize,
}

impl NewConnection {
    /// Append as `(target, target channel, source, source channel)`.
    pub fn encode(&self, message: &mut MessageBuffer<'_>) {
        message.write(&self.target);
        message.write(&(self.target_channel as i32));
        message.write(&self.source);
        message.write(&(self.source_channel as i32));
    }

    pub fn decode(message: &mut MessageBuffer<'_>) -> Result<Self, ConnectionError> {
        let target = message.read::<ModuleId>();
        let target_channel = message.read::<i32>();
        let source = message.read::<ModuleId>();
        let source_channel = message.read::<i32>();

        let channel = |c: i32| usize::try_from(c).map_err(|_| ConnectionError::NegativeChannel(c));

        Ok(Self {
            target: target?,
            target_channel: channel(target_channel?)?,
            source: source?,
            source_channel: channel(source_channel?)?,
        })
    }
}

/// The lifecycle of an [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Waiting for its inputs to resolve.
    Pending,
    /// Wired and part of the execution list.
    Compiled,
    /// Finished. Retired at the next cycle boundary.
    Done,
}

/// A module instance together with its wiring in the network.
pub struct Item {
    pub(crate) id: ModuleId,
    pub(crate) module: Box<dyn Module>,
    /// The connection feeding each input channel. `None` reads silence.
    pub(crate) inputs: SmallVec<[Option<Connection>; 4]>,
    /// Set by the first compile.
    pub(crate) channels: Option<ChannelConfig>,
    pub(crate) input_bufs: SmallVec<[BufferIdx; 4]>,
    pub(crate) output_bufs: SmallVec<[BufferIdx; 4]>,
    pub(crate) state: ItemState,
}

impl Item {
    pub fn new(id: ModuleId, module: impl Module) -> Self {
        Self {
            id,
            module: Box::new(module),
            inputs: SmallVec::new(),
            channels: None,
            input_bufs: SmallVec::new(),
            output_bufs: SmallVec::new(),
            state: ItemState::Pending,
        }
    }

    /// Builder form of [`Item::connect`].
    pub fn with_input(mut self, channel: usize, source: ModuleId, source_channel: usize) -> Self {
        self.connect(channel, Connection::new(source, source_channel));
        self
    }

    /// Feed input `channel` from `connection`, replacing any previous
    /// connection.
    pub fn connect(&mut self, channel: usize, connection: Connection) {
        if self.inputs.len() <= channel {
            self.inputs.resize(channel + 1, None);
        }
        self.inputs[channel] = Some(connection);
    }

    /// Feed input `channel` from silence. Returns the old connection.
    pub fn disconnect(&mut self, channel: usize) -> Option<Connection> {
        self.inputs.get_mut(channel).and_then(Option::take)
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn inputs(&self) -> &[Option<Connection>] {
        &self.inputs
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn is_compiled(&self) -> bool {
        self.state == ItemState::Compiled
    }

    pub fn is_done(&self) -> bool {
        self.state == ItemState::Done
    }

    pub fn module(&self) -> &dyn Module {
        self.module.as_ref()
    }

    pub fn into_module(self) -> Box<dyn Module> {
        self.module
    }

    /// The input channel reading from `buf`, if any.
    pub(crate) fn find_in_input(&self, buf: BufferIdx) -> Option<usize> {
        self.input_bufs.iter().position(|&b| b == buf)
    }

    pub(crate) fn process(
        &mut self,
        pool: &mut BufferPool,
        scratch: &mut Scratch,
        frames: usize,
    ) -> ProcessStatus {
        assert!(
            self.is_compiled(),
            "process called on uncompiled item \"{}\"",
            self.id
        );
        let channels = self.channels.unwrap_or_default();
        assert_eq!(self.input_bufs.len(), channels.num_inputs as usize);
        assert_eq!(self.output_bufs.len(), channels.num_outputs as usize);

        scratch.run(
            self.module.as_mut(),
            &self.input_bufs,
            &self.output_bufs,
            pool,
            frames,
        )
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.id)
            .field("inputs", &self.inputs)
            .field("channels", &self.channels)
            .field("input_bufs", &self.input_bufs)
            .field("output_bufs", &self.output_bufs)
            .field("state", &self.state)
            .finish()
    }
}
