use smallvec::SmallVec;
use thunderdome::{Arena, Index};

use crate::module::{Module, PrepareInfo};

use super::{
    buffer_pool::BufferIdx,
    error::CompileError,
    item::{Connection, Item, ItemState},
    DspNetwork,
};

impl DspNetwork {
    pub(super) fn prepare_info(&self) -> PrepareInfo {
        PrepareInfo {
            sample_rate: self.config.sample_rate,
            max_cycle_frames: self.config.max_cycle_frames,
            out_channels: self.config.out_channels as usize,
        }
    }

    /// The buffer holding output `connection.channel` of a compiled item.
    fn find_output(&self, connection: &Connection) -> Result<BufferIdx, CompileError> {
        let key = self
            .index
            .get(&connection.source)
            .ok_or(CompileError::UnknownSource(connection.source))?;
        let item = &self.items[*key];

        if !item.is_compiled() {
            return Err(CompileError::SourceNotCompiled(connection.source));
        }

        item.output_bufs
            .get(connection.channel)
            .copied()
            .ok_or(CompileError::ChannelOutOfRange {
                module: connection.source,
                channel: connection.channel,
            })
    }

    /// Wire an item into the network.
    ///
    /// The module is prepared on the first attempt only. Every input is
    /// resolved before anything is committed, so a failed attempt leaves
    /// the item exactly as it was. Output buffers are allocated once and
    /// kept across recompiles.
    pub(super) fn compile(&mut self, key: Index) -> Result<(), CompileError> {
        let info = self.prepare_info();

        let item = &mut self.items[key];
        let channels = match item.channels {
            Some(channels) => channels,
            None => {
                let channels = item.module.prepare(&info);
                item.channels = Some(channels);
                channels
            }
        };
        let num_inputs = channels.num_inputs as usize;
        let num_outputs = channels.num_outputs as usize;

        if item.inputs.len() > num_inputs {
            log::warn!(
                "DspNetwork::compile # \"{}\" has {} inputs, dropping connections past that",
                item.id,
                num_inputs
            );
            item.inputs.truncate(num_inputs);
        }
        item.inputs.resize(num_inputs, None);

        let id = item.id;
        let inputs = item.inputs.clone();

        let mut input_bufs: SmallVec<[BufferIdx; 4]> = SmallVec::with_capacity(num_inputs);
        for connection in inputs.iter() {
            input_bufs.push(match connection {
                None => BufferIdx::SILENCE,
                Some(c) if c.source == id => return Err(CompileError::SelfConnection(id)),
                Some(c) => self.find_output(c)?,
            });
        }

        let item = &mut self.items[key];
        for _ in item.output_bufs.len()..num_outputs {
            item.output_bufs
                .push(self.pool.find_free_buf(self.config.max_cycle_frames));
        }
        debug_assert!(input_bufs.iter().all(|b| !item.output_bufs.contains(b)));

        item.input_bufs = input_bufs;
        item.state = ItemState::Compiled;
        self.scratch.reserve(num_inputs, num_outputs);

        Ok(())
    }

    /// Point the collector at the current outputs of its mapping sources.
    ///
    /// Mappings whose source cannot be resolved read silence and are
    /// retried at the next cycle boundary.
    pub(super) fn compile_collector(&mut self) {
        let info = self.prepare_info();
        let channels = self.collector.module.prepare(&info);

        let mut input_bufs = std::mem::take(&mut self.collector.input_bufs);
        input_bufs.clear();

        let mut unresolved = false;
        for mapping in self.collector.module.mappings() {
            let connection = Connection::new(mapping.source, mapping.from);
            input_bufs.push(match self.find_output(&connection) {
                Ok(buf) => buf,
                Err(e) => {
                    log::debug!("DspNetwork::compile_collector # {}", e);
                    unresolved = true;
                    BufferIdx::SILENCE
                }
            });
        }
        debug_assert_eq!(input_bufs.len(), channels.num_inputs as usize);

        self.scratch.reserve(input_bufs.len(), 0);
        self.collector.input_bufs = input_bufs;
        self.collector.unresolved = unresolved;
    }

    pub(super) fn is_read(&self, buf: BufferIdx) -> bool {
        buffer_is_read(&self.items, &self.collector.input_bufs, buf)
    }
}

/// Whether any compiled item or the collector reads from `buf`.
pub(super) fn buffer_is_read(items: &Arena<Item>, collector_bufs: &[BufferIdx], buf: BufferIdx) -> bool {
    collector_bufs.contains(&buf)
        || items
            .iter()
            .any(|(_, item)| item.is_compiled() && item.find_in_input(buf).is_some())
}
