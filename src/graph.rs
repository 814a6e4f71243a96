//! The network of modules and the commands that mutate it.
//!
//! A [`DspNetwork`] is owned by the audio thread. Every other thread talks
//! to it through a [`NetworkHandle`], which queues commands that the
//! network applies at the start of its next cycle. Items and spent
//! messages are sent back to the handle for deallocation so that the
//! audio thread never frees memory it does not have to.

pub(crate) mod buffer_pool;
mod compiler;
mod error;
pub(crate) mod executor;
mod item;

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use thunderdome::{Arena, Index};

pub use error::{CompileError, ConnectionError};
pub use item::{Connection, Item, ItemState, NewConnection};

use crate::{
    built_in_modules::{Mapping, OutputCollector, COLLECTOR_ID, NEW_MAPPING, REMOVE_MAPPING},
    config::NetworkConfig,
    message::MessageBuffer,
    module::{Address, Module, ModuleId},
    MAX_CHANNELS,
};

use buffer_pool::{BufferIdx, BufferPool};
use executor::Scratch;

/// The identifier that addresses the network itself.
pub const NETWORK_ID: &str = "network";

/// Network control address. Arguments: target id, target channel, source
/// id, source channel.
pub const CONNECT: &str = "connect";
/// Network control address. Arguments: target id, target channel.
pub const DISCONNECT: &str = "disconnect";
/// Network control address. Arguments: id.
pub const REMOVE: &str = "remove";

/// Who a control message is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The network itself. See [`CONNECT`], [`DISCONNECT`] and [`REMOVE`].
    Network,
    /// The [`OutputCollector`].
    Collector,
    Module(ModuleId),
}

impl From<ModuleId> for Target {
    fn from(id: ModuleId) -> Self {
        if id == NETWORK_ID {
            Self::Network
        } else if id == COLLECTOR_ID {
            Self::Collector
        } else {
            Self::Module(id)
        }
    }
}

pub(crate) enum Command {
    AddItem(Item),
    Control {
        target: Target,
        address: Address,
        message: MessageBuffer<'static>,
    },
}

/// Memory handed back from the audio thread.
pub(crate) enum Garbage {
    Item(Item),
    Message(MessageBuffer<'static>),
}

struct Pending {
    commands: Vec<Command>,
    /// Every identifier that is queued or live in the network.
    ids: AHashSet<ModuleId>,
}

struct Shared {
    pending: Mutex<Pending>,
    garbage: Mutex<rtrb::Consumer<Garbage>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The control side of a [`DspNetwork`].
///
/// Cheap to clone and safe to use from any number of threads. Commands
/// are applied in the order they were queued, at the start of the next
/// cycle.
#[derive(Clone)]
pub struct NetworkHandle {
    shared: Arc<Shared>,
    out_channels: u16,
}

impl NetworkHandle {
    /// Queue a new item.
    ///
    /// # Panics
    ///
    /// Panics if an item with the same identifier is queued or live, or
    /// if the identifier is reserved.
    pub fn add_item(&self, item: Item) {
        assert!(
            item.id != NETWORK_ID && item.id != COLLECTOR_ID,
            "module identifier \"{}\" is reserved",
            item.id
        );

        let mut pending = lock(&self.shared.pending);
        if !pending.ids.insert(item.id) {
            let id = item.id;
            drop(pending);
            panic!("a module with identifier \"{id}\" already exists");
        }

        log::debug!("NetworkHandle::add_item # \"{}\"", item.id);
        pending.commands.push(Command::AddItem(item));
    }

    /// Queue a control message.
    ///
    /// # Panics
    ///
    /// Panics if `address` is longer than
    /// [`MAX_ADDRESS_LENGTH`](crate::MAX_ADDRESS_LENGTH) bytes.
    pub fn control(&self, target: impl Into<Target>, address: &str, message: MessageBuffer<'static>) {
        let mut addr = Address::new();
        addr.push_str(address);

        lock(&self.shared.pending).commands.push(Command::Control {
            target: target.into(),
            address: addr,
            message,
        });
    }

    pub fn connect(&self, connection: NewConnection) {
        let mut message = MessageBuffer::new();
        connection.encode(&mut message);
        self.control(Target::Network, CONNECT, message);
    }

    pub fn disconnect(&self, target: ModuleId, channel: usize) {
        let mut message = MessageBuffer::new();
        message.write(&target);
        message.write(&(channel as i32));
        self.control(Target::Network, DISCONNECT, message);
    }

    /// Retire an item at the next cycle boundary.
    pub fn remove(&self, id: ModuleId) {
        let mut message = MessageBuffer::new();
        message.write(&id);
        self.control(Target::Network, REMOVE, message);
    }

    pub fn add_mapping(&self, mapping: Mapping) {
        let mut message = MessageBuffer::new();
        mapping.encode(&mut message);
        self.control(Target::Collector, NEW_MAPPING, message);
    }

    pub fn remove_mapping(&self, mapping: Mapping) {
        let mut message = MessageBuffer::new();
        mapping.encode(&mut message);
        self.control(Target::Collector, REMOVE_MAPPING, message);
    }

    /// Whether `id` is queued or live in the network.
    pub fn contains(&self, id: &ModuleId) -> bool {
        lock(&self.shared.pending).ids.contains(id)
    }

    pub fn out_channels(&self) -> u16 {
        self.out_channels
    }

    /// Free memory handed back by the audio thread. Returns the retired
    /// items.
    pub fn collect_garbage(&self) -> Vec<Item> {
        let mut retired = Vec::new();
        let mut garbage = lock(&self.shared.garbage);

        while let Ok(g) = garbage.pop() {
            match g {
                Garbage::Item(item) => retired.push(item),
                Garbage::Message(message) => drop(message),
            }
        }

        retired
    }
}

pub(crate) struct Collector {
    pub(crate) module: OutputCollector,
    pub(crate) input_bufs: Vec<BufferIdx>,
    /// Some mapping source could not be resolved.
    pub(crate) unresolved: bool,
    dirty: bool,
}

/// A network of modules processed in realtime.
///
/// Items run in the order they were compiled, so an item always runs
/// after the items it reads from were first compiled. The network ends in
/// an [`OutputCollector`] that mixes module outputs into the device
/// buffer.
pub struct DspNetwork {
    config: NetworkConfig,
    shared: Arc<Shared>,
    garbage_tx: rtrb::Producer<Garbage>,

    items: Arena<Item>,
    index: AHashMap<ModuleId, Index>,
    /// Compiled items in execution order.
    schedule: Vec<Index>,
    /// Items that failed to compile, in arrival order.
    waiting: Vec<Index>,
    collector: Collector,

    pool: BufferPool,
    scratch: Scratch,

    batch: Vec<Command>,
    released_ids: Vec<ModuleId>,
    num_done: usize,
}

impl DspNetwork {
    pub fn new(config: NetworkConfig) -> (Self, NetworkHandle) {
        assert!(config.out_channels > 0);
        assert!(config.max_cycle_frames > 0);

        let (garbage_tx, garbage_rx) = rtrb::RingBuffer::new(config.garbage_capacity);
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending {
                commands: Vec::with_capacity(config.command_capacity),
                ids: AHashSet::new(),
            }),
            garbage: Mutex::new(garbage_rx),
        });

        let handle = NetworkHandle {
            shared: Arc::clone(&shared),
            out_channels: config.out_channels,
        };

        let network = Self {
            shared,
            garbage_tx,
            items: Arena::new(),
            index: AHashMap::new(),
            schedule: Vec::new(),
            waiting: Vec::new(),
            collector: Collector {
                module: OutputCollector::new(
                    config.out_channels as usize,
                    config.max_cycle_frames,
                ),
                input_bufs: Vec::new(),
                unresolved: false,
                dirty: true,
            },
            pool: BufferPool::new(config.max_cycle_frames),
            scratch: Scratch::new(),
            batch: Vec::with_capacity(config.command_capacity),
            released_ids: Vec::new(),
            num_done: 0,
            config,
        };

        (network, handle)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn out_channels(&self) -> u16 {
        self.config.out_channels
    }

    pub fn collector(&self) -> &OutputCollector {
        &self.collector.module
    }

    /// The compiled items in execution order.
    pub fn execution_order(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.schedule.iter().map(|key| self.items[*key].id)
    }

    pub fn item_state(&self, id: &ModuleId) -> Option<ItemState> {
        self.index.get(id).map(|key| self.items[*key].state)
    }

    /// The number of items in the network, compiled or not.
    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    /// Apply queued commands, then compile whatever can be compiled.
    ///
    /// Items that fail to compile stay queued and are retried here on
    /// every cycle. Never blocks: if a control thread holds the queue, the
    /// commands wait for the next cycle.
    pub fn check_new_items(&mut self) {
        self.take_commands();

        let mut batch = std::mem::take(&mut self.batch);
        for command in batch.drain(..) {
            self.apply(command);
        }
        self.batch = batch;

        self.compile_waiting();

        if self.collector.module.take_changed() || self.collector.dirty || self.collector.unresolved {
            self.collector.dirty = false;
            self.compile_collector();
            self.sweep_orphans();
        }
    }

    /// Retire every item marked done during the last cycle or by a remove
    /// command.
    pub fn check_done_items(&mut self) {
        if self.num_done == 0 {
            return;
        }
        self.num_done = 0;

        let mut i = 0;
        while i < self.schedule.len() {
            let key = self.schedule[i];
            if self.items[key].is_done() {
                self.schedule.remove(i);
                self.retire(key);
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < self.waiting.len() {
            let key = self.waiting[i];
            if self.items[key].is_done() {
                self.waiting.remove(i);
                self.retire(key);
            } else {
                i += 1;
            }
        }

        // Readers of retired items were moved to the waiting list.
        let items = &self.items;
        self.schedule
            .retain(|key| items.get(*key).is_some_and(|item| item.is_compiled()));

        self.collector.dirty = true;
        self.sweep_orphans();
    }

    fn take_commands(&mut self) {
        let mut pending = match self.shared.pending.try_lock() {
            Ok(pending) => pending,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };

        for id in self.released_ids.drain(..) {
            pending.ids.remove(&id);
        }

        debug_assert!(self.batch.is_empty());
        std::mem::swap(&mut pending.commands, &mut self.batch);
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::AddItem(item) => {
                assert!(
                    !self.index.contains_key(&item.id),
                    "a module with identifier \"{}\" already exists",
                    item.id
                );

                let id = item.id;
                let key = self.items.insert(item);
                self.index.insert(id, key);
                self.waiting.push(key);

                let live = self.items.len();
                if self.released_ids.capacity() < live {
                    self.released_ids.reserve(live - self.released_ids.len());
                }
            }
            Command::Control {
                target,
                address,
                mut message,
            } => {
                match target {
                    Target::Network => self.control(&address, &mut message),
                    Target::Collector => self.collector.module.control(&address, &mut message),
                    Target::Module(id) => match self.index.get(&id) {
                        Some(key) => self.items[*key].module.control(&address, &mut message),
                        None => log::warn!(
                            "DspNetwork::apply # No module \"{}\" for \"{}\"",
                            id,
                            address
                        ),
                    },
                }

                self.dispose(Garbage::Message(message));
            }
        }
    }

    /// Handle a message addressed to the network itself.
    fn control(&mut self, address: &str, message: &mut MessageBuffer<'_>) {
        match address {
            CONNECT => match NewConnection::decode(message) {
                Ok(c) => self.connect(c),
                Err(e) => log::error!("DspNetwork::control # Could not parse \"connect\" # {}", e),
            },
            DISCONNECT => {
                let target = message.read::<ModuleId>();
                let channel = message.read::<i32>();
                match (target, channel) {
                    (Ok(target), Ok(channel)) if channel >= 0 => {
                        self.disconnect(target, channel as usize)
                    }
                    _ => log::error!("DspNetwork::control # Could not parse \"disconnect\""),
                }
            }
            REMOVE => match message.read::<ModuleId>() {
                Ok(id) => self.remove(id),
                Err(e) => log::error!("DspNetwork::control # Could not parse \"remove\" # {}", e),
            },
            _ => log::error!("DspNetwork::control # No param \"{}\"", address),
        }
    }

    fn connect(&mut self, c: NewConnection) {
        let Some(&key) = self.index.get(&c.target) else {
            log::warn!("DspNetwork::connect # No module \"{}\"", c.target);
            return;
        };

        let num_inputs = self.items[key]
            .channels
            .map_or(MAX_CHANNELS, |channels| channels.num_inputs as usize);
        if c.target_channel >= num_inputs {
            log::error!(
                "DspNetwork::connect # \"{}\" has no input channel {}",
                c.target,
                c.target_channel
            );
            return;
        }

        self.items[key].connect(c.target_channel, Connection::new(c.source, c.source_channel));
        self.rewire(key);
    }

    fn disconnect(&mut self, target: ModuleId, channel: usize) {
        let Some(&key) = self.index.get(&target) else {
            log::warn!("DspNetwork::disconnect # No module \"{}\"", target);
            return;
        };

        if self.items[key].disconnect(channel).is_some() {
            self.rewire(key);
        }
    }

    /// Recompile a wired item in place. If that fails, it leaves the
    /// execution list and waits like a new item.
    fn rewire(&mut self, key: Index) {
        if !self.items[key].is_compiled() {
            return;
        }

        if let Err(e) = self.compile(key) {
            log::debug!(
                "DspNetwork::rewire # \"{}\" waits for its inputs # {}",
                self.items[key].id,
                e
            );
            self.demote(key);
            self.schedule.retain(|k| *k != key);
        }
    }

    /// Move a compiled item back to the waiting list. Its outputs read as
    /// silence until it compiles again. The caller removes it from the
    /// execution list.
    fn demote(&mut self, key: Index) {
        let item = &mut self.items[key];
        item.state = ItemState::Pending;
        for &buf in item.output_bufs.iter() {
            self.pool.silence(buf);
        }
        self.waiting.push(key);
    }

    fn remove(&mut self, id: ModuleId) {
        let Some(&key) = self.index.get(&id) else {
            log::warn!("DspNetwork::remove # No module \"{}\"", id);
            return;
        };

        let item = &mut self.items[key];
        if !item.is_done() {
            item.state = ItemState::Done;
            self.num_done += 1;

            for &buf in item.output_bufs.iter() {
                self.pool.silence(buf);
            }
        }
    }

    /// Compile waiting items in arrival order until a full pass makes no
    /// progress.
    fn compile_waiting(&mut self) {
        loop {
            let mut progress = false;

            let mut i = 0;
            while i < self.waiting.len() {
                let key = self.waiting[i];
                if self.items[key].is_done() {
                    i += 1;
                    continue;
                }

                match self.compile(key) {
                    Ok(()) => {
                        self.waiting.remove(i);
                        self.schedule.push(key);
                        progress = true;
                    }
                    Err(e) => {
                        log::trace!(
                            "DspNetwork::compile_waiting # \"{}\" # {}",
                            self.items[key].id,
                            e
                        );
                        i += 1;
                    }
                }
            }

            if !progress {
                break;
            }
        }
    }

    fn retire(&mut self, key: Index) {
        let Some(item) = self.items.remove(key) else {
            return;
        };
        self.index.remove(&item.id);
        self.released_ids.push(item.id);

        // Readers wait for a new source with the same identifier.
        let readers: SmallVec<[Index; 8]> = self
            .items
            .iter()
            .filter(|(_, other)| {
                other.is_compiled()
                    && item
                        .output_bufs
                        .iter()
                        .any(|buf| other.find_in_input(*buf).is_some())
            })
            .map(|(key, _)| key)
            .collect();
        for reader in readers {
            log::debug!(
                "DspNetwork::retire # \"{}\" waits for \"{}\"",
                self.items[reader].id,
                item.id
            );
            self.demote(reader);
        }

        for &buf in item.output_bufs.iter() {
            let still_read = self.is_read(buf);
            self.pool.release(buf, still_read);
        }

        log::debug!("DspNetwork::retire # \"{}\"", item.id);
        self.dispose(Garbage::Item(item));
    }

    fn sweep_orphans(&mut self) {
        if self.pool.num_orphans() == 0 {
            return;
        }

        let Self {
            pool,
            items,
            collector,
            ..
        } = self;
        pool.sweep(|buf| compiler::buffer_is_read(items, &collector.input_bufs, buf));
    }

    /// Hand memory back to the control side. If the ring is full the
    /// memory is dropped here instead.
    fn dispose(&mut self, garbage: Garbage) {
        if let Err(rtrb::PushError::Full(garbage)) = self.garbage_tx.push(garbage) {
            log::warn!("DspNetwork::dispose # Garbage queue full, deallocating on the audio thread");
            drop(garbage);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use super::*;
    use crate::{
        built_in_modules::{ConstantSource, TestToneGenerator},
        module::{ChannelConfig, PrepareInfo, ProcessStatus},
    };

    fn id(s: &str) -> ModuleId {
        ModuleId::new(s).unwrap()
    }

    fn config(out_channels: u16, max_cycle_frames: usize) -> NetworkConfig {
        NetworkConfig {
            out_channels,
            max_cycle_frames,
            ..Default::default()
        }
    }

    /// Multiplies its input by two.
    struct Doubler;

    impl Module for Doubler {
        fn prepare(&mut self, _: &PrepareInfo) -> ChannelConfig {
            ChannelConfig::new(1, 1)
        }

        fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], _: usize) -> ProcessStatus {
            for (out, s) in outputs[0].iter_mut().zip(inputs[0].iter()) {
                *out = *s * 2.0;
            }
            ProcessStatus::Continue
        }
    }

    /// Counts calls and checks that it was prepared before processing.
    struct Probe {
        prepared: Arc<AtomicBool>,
        prepares: Arc<AtomicUsize>,
        processed: Arc<AtomicUsize>,
    }

    impl Probe {
        fn new(prepares: &Arc<AtomicUsize>, processed: &Arc<AtomicUsize>) -> Self {
            Self {
                prepared: Arc::new(AtomicBool::new(false)),
                prepares: Arc::clone(prepares),
                processed: Arc::clone(processed),
            }
        }
    }

    impl Module for Probe {
        fn prepare(&mut self, _: &PrepareInfo) -> ChannelConfig {
            self.prepared.store(true, Ordering::SeqCst);
            self.prepares.fetch_add(1, Ordering::SeqCst);
            ChannelConfig::new(1, 1)
        }

        fn process(&mut self, _: &[&[f32]], outputs: &mut [&mut [f32]], _: usize) -> ProcessStatus {
            assert!(self.prepared.load(Ordering::SeqCst));
            self.processed.fetch_add(1, Ordering::SeqCst);
            outputs[0].fill(1.0);
            ProcessStatus::Continue
        }
    }

    #[test]
    fn constant_source_reaches_the_device() {
        let (mut network, handle) = DspNetwork::new(config(1, 256));

        handle.add_item(Item::new(id("gen"), ConstantSource::new(5.0, 1)));
        handle.add_mapping(Mapping::new(id("gen"), 0, 0));

        let mut out = [0.0f32; 4];
        network.process_interleaved(&mut out);

        assert_eq!(out, [5.0; 4]);
    }

    #[test]
    fn chain_runs_in_compile_order() {
        let (mut network, handle) = DspNetwork::new(config(2, 256));

        handle.add_item(Item::new(id("double"), Doubler).with_input(0, id("gen"), 0));
        handle.add_item(Item::new(id("gen"), ConstantSource::new(1.5, 1)));
        handle.add_mapping(Mapping::new(id("double"), 0, 1));

        let mut out = [0.0f32; 6];
        network.process_interleaved(&mut out);

        assert_eq!(out, [0.0, 3.0, 0.0, 3.0, 0.0, 3.0]);
        assert_eq!(
            network.execution_order().collect::<Vec<_>>(),
            [id("gen"), id("double")]
        );
    }

    #[test]
    fn item_waits_for_its_source() {
        let _ = env_logger::builder().is_test(true).try_init();

        let prepares = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        let (mut network, handle) = DspNetwork::new(NetworkConfig::default());
        handle.add_item(
            Item::new(id("b"), Probe::new(&prepares, &processed)).with_input(0, id("a"), 0),
        );

        network.cycle(16);
        network.cycle(16);
        assert_eq!(network.item_state(&id("b")), Some(ItemState::Pending));
        assert_eq!(processed.load(Ordering::SeqCst), 0);
        assert_eq!(prepares.load(Ordering::SeqCst), 1);

        handle.add_item(Item::new(id("a"), ConstantSource::new(0.0, 1)));
        network.cycle(16);

        assert_eq!(network.item_state(&id("b")), Some(ItemState::Compiled));
        assert_eq!(processed.load(Ordering::SeqCst), 1);
        assert_eq!(prepares.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_adds_all_compile() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 125;

        let prepares = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));
        let (mut network, handle) = DspNetwork::new(config(2, 64));

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let handle = handle.clone();
                let prepares = Arc::clone(&prepares);
                let processed = Arc::clone(&processed);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let name = format!("probe-{t}-{i}");
                        handle.add_item(Item::new(id(&name), Probe::new(&prepares, &processed)));
                    }
                })
            })
            .collect();

        while workers.iter().any(|w| !w.is_finished()) {
            network.cycle(64);
        }
        for w in workers {
            w.join().unwrap();
        }
        network.cycle(64);

        assert_eq!(network.num_items(), THREADS * PER_THREAD);
        assert_eq!(network.execution_order().count(), THREADS * PER_THREAD);
        assert_eq!(prepares.load(Ordering::SeqCst), THREADS * PER_THREAD);
        for t in 0..THREADS {
            for i in 0..PER_THREAD {
                let name = format!("probe-{t}-{i}");
                assert_eq!(network.item_state(&id(&name)), Some(ItemState::Compiled));
            }
        }
        assert!(processed.load(Ordering::SeqCst) >= THREADS * PER_THREAD);
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn duplicate_identifier_panics() {
        let (_network, handle) = DspNetwork::new(NetworkConfig::default());
        handle.add_item(Item::new(id("gen"), ConstantSource::new(1.0, 1)));
        handle.add_item(Item::new(id("gen"), ConstantSource::new(2.0, 1)));
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn reserved_identifier_panics() {
        let (_network, handle) = DspNetwork::new(NetworkConfig::default());
        handle.add_item(Item::new(id(COLLECTOR_ID), ConstantSource::new(1.0, 1)));
    }

    #[test]
    fn finished_items_are_retired() {
        let (mut network, handle) = DspNetwork::new(config(2, 16));

        handle.add_item(Item::new(id("tone"), TestToneGenerator::new(440.0, -12.0)));
        handle.add_mapping(Mapping::new(id("tone"), 0, 0));
        network.cycle(16);
        let pool_len = network.pool.len();
        assert_eq!(network.pool.num_free(), 0);

        handle.control(id("tone"), "stop", MessageBuffer::new());
        network.cycle(16);

        assert_eq!(network.item_state(&id("tone")), None);
        assert_eq!(network.num_items(), 0);
        // The collector still reads the first channel until it recompiles.
        assert_eq!(network.pool.num_orphans(), 1);
        assert_eq!(network.pool.num_free(), 1);

        let retired = handle.collect_garbage();
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].id(), id("tone"));
        assert!(retired[0].is_done());

        // The identifier is released at the next cycle boundary.
        assert!(handle.contains(&id("tone")));
        network.cycle(16);
        assert!(!handle.contains(&id("tone")));
        assert_eq!(network.pool.num_orphans(), 0);
        assert_eq!(network.pool.num_free(), 2);
        assert_eq!(network.pool.len(), pool_len);

        handle.add_item(Item::new(id("tone"), ConstantSource::new(0.25, 1)));
        network.cycle(16);
        assert_eq!(network.pool.len(), pool_len);
        assert_eq!(network.collector().interleaved()[0], 0.25);
    }

    #[test]
    fn removed_source_is_resolved_again() {
        let (mut network, handle) = DspNetwork::new(config(1, 4));

        handle.add_item(Item::new(id("gen"), ConstantSource::new(1.0, 1)));
        handle.add_item(Item::new(id("double"), Doubler).with_input(0, id("gen"), 0));
        handle.add_mapping(Mapping::new(id("double"), 0, 0));

        let mut out = [0.0f32; 4];
        network.process_interleaved(&mut out);
        assert_eq!(out, [2.0; 4]);

        handle.remove(id("gen"));
        network.process_interleaved(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(network.item_state(&id("double")), Some(ItemState::Pending));
        assert_eq!(network.pool.num_orphans(), 0);

        network.process_interleaved(&mut out);
        assert_eq!(out, [0.0; 4]);

        handle.add_item(Item::new(id("gen"), ConstantSource::new(1.5, 1)));
        network.process_interleaved(&mut out);
        assert_eq!(out, [3.0; 4]);
        assert_eq!(network.item_state(&id("double")), Some(ItemState::Compiled));
        assert_eq!(
            network.execution_order().collect::<Vec<_>>(),
            [id("gen"), id("double")]
        );

        handle.remove(id("double"));
        network.cycle(4);
        assert_eq!(network.collector().interleaved(), &[0.0; 4]);
        network.cycle(4);
        assert_eq!(network.pool.num_orphans(), 0);
        assert_eq!(network.pool.num_free(), 1);
    }

    #[test]
    fn failed_rewire_silences_the_item() {
        let (mut network, handle) = DspNetwork::new(config(1, 4));

        handle.add_item(Item::new(id("gen"), ConstantSource::new(0.5, 1)));
        handle.add_item(Item::new(id("double"), Doubler).with_input(0, id("gen"), 0));
        handle.add_item(Item::new(id("again"), Doubler).with_input(0, id("double"), 0));
        handle.add_mapping(Mapping::new(id("again"), 0, 0));

        let mut out = [0.0f32; 4];
        network.process_interleaved(&mut out);
        assert_eq!(out, [2.0; 4]);

        handle.connect(NewConnection {
            target: id("double"),
            target_channel: 0,
            source: id("missing"),
            source_channel: 0,
        });
        for _ in 0..3 {
            network.process_interleaved(&mut out);
            assert_eq!(out, [0.0; 4]);
        }
        assert_eq!(network.item_state(&id("double")), Some(ItemState::Pending));
        assert_eq!(network.item_state(&id("again")), Some(ItemState::Compiled));
    }

    #[test]
    fn connect_to_unknown_input_channel_is_dropped() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (mut network, handle) = DspNetwork::new(config(1, 4));

        handle.add_item(Item::new(id("gen"), ConstantSource::new(1.0, 1)));
        handle.add_item(Item::new(id("waiting"), Doubler).with_input(0, id("missing"), 0));
        handle.add_item(Item::new(id("double"), Doubler).with_input(0, id("gen"), 0));
        handle.add_mapping(Mapping::new(id("double"), 0, 0));
        network.cycle(4);

        // Not prepared yet when the connect is applied.
        handle.add_item(Item::new(id("fresh"), Doubler));

        for (target, target_channel) in [
            ("waiting", 20_000_000),
            ("waiting", i32::MAX as usize),
            ("double", 1),
            ("fresh", MAX_CHANNELS),
            ("fresh", 20_000_000),
        ] {
            handle.connect(NewConnection {
                target: id(target),
                target_channel,
                source: id("gen"),
                source_channel: 0,
            });
        }

        let mut out = [0.0f32; 4];
        network.process_interleaved(&mut out);
        assert_eq!(out, [2.0; 4]);

        for name in ["waiting", "double", "fresh"] {
            let key = network.index.get(&id(name)).copied().unwrap();
            let item = &network.items[key];
            assert_eq!(item.inputs.len(), 1);
            assert!(!item.inputs.spilled());
        }
        assert_eq!(network.item_state(&id("fresh")), Some(ItemState::Compiled));
        assert_eq!(network.item_state(&id("waiting")), Some(ItemState::Pending));
        assert_eq!(network.item_state(&id("double")), Some(ItemState::Compiled));
    }

    #[test]
    fn connect_and_disconnect_rewire() {
        let (mut network, handle) = DspNetwork::new(config(1, 4));

        handle.add_item(Item::new(id("a"), ConstantSource::new(1.0, 1)));
        handle.add_item(Item::new(id("b"), ConstantSource::new(3.0, 1)));
        handle.add_item(Item::new(id("double"), Doubler));
        handle.add_mapping(Mapping::new(id("double"), 0, 0));

        let mut out = [0.0f32; 4];
        network.process_interleaved(&mut out);
        assert_eq!(out, [0.0; 4]);

        handle.connect(NewConnection {
            target: id("double"),
            target_channel: 0,
            source: id("b"),
            source_channel: 0,
        });
        network.process_interleaved(&mut out);
        assert_eq!(out, [6.0; 4]);

        handle.disconnect(id("double"), 0);
        network.process_interleaved(&mut out);
        assert_eq!(out, [0.0; 4]);

        handle.connect(NewConnection {
            target: id("double"),
            target_channel: 0,
            source: id("missing"),
            source_channel: 0,
        });
        network.process_interleaved(&mut out);
        assert_eq!(network.item_state(&id("double")), Some(ItemState::Pending));

        handle.connect(NewConnection {
            target: id("double"),
            target_channel: 0,
            source: id("a"),
            source_channel: 0,
        });
        network.process_interleaved(&mut out);
        assert_eq!(out, [2.0; 4]);
    }

    #[test]
    fn unknown_targets_are_ignored() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (mut network, handle) = DspNetwork::new(config(1, 4));

        handle.add_item(Item::new(id("gen"), ConstantSource::new(1.0, 1)));
        handle.add_mapping(Mapping::new(id("gen"), 0, 0));
        handle.control(id("nobody"), "value", MessageBuffer::new());
        handle.control(Target::Network, "explode", MessageBuffer::new());
        handle.remove(id("nobody"));

        let mut msg = MessageBuffer::new();
        msg.write(&0.5f32);
        handle.control(id("gen"), "value", msg);

        let mut out = [0.0f32; 4];
        network.process_interleaved(&mut out);
        assert_eq!(out, [0.5; 4]);
        assert_eq!(handle.collect_garbage().len(), 0);
    }

    #[test]
    fn device_buffer_is_split_into_cycles() {
        let prepares = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));
        let (mut network, handle) = DspNetwork::new(config(2, 4));

        handle.add_item(Item::new(id("probe"), Probe::new(&prepares, &processed)));
        handle.add_mapping(Mapping::new(id("probe"), 0, 0));
        handle.add_mapping(Mapping::new(id("probe"), 0, 1));

        let mut out = [9.0f32; 21];
        network.process_interleaved(&mut out);

        assert_eq!(processed.load(Ordering::SeqCst), 3);
        assert_eq!(&out[..20], &[1.0; 20]);
        assert_eq!(out[20], 0.0);
    }

    #[test]
    fn mapping_before_source_resolves_later() {
        let (mut network, handle) = DspNetwork::new(config(1, 4));

        handle.add_mapping(Mapping::new(id("late"), 0, 0));
        let mut out = [0.0f32; 4];
        network.process_interleaved(&mut out);
        assert_eq!(out, [0.0; 4]);

        handle.add_item(Item::new(id("late"), ConstantSource::new(0.75, 1)));
        network.process_interleaved(&mut out);
        assert_eq!(out, [0.75; 4]);
    }

    #[test]
    fn messages_are_returned_for_deallocation() {
        let (mut network, handle) = DspNetwork::new(NetworkConfig {
            garbage_capacity: 1,
            ..config(1, 4)
        });

        handle.add_item(Item::new(id("gen"), ConstantSource::new(1.0, 1)));
        for _ in 0..3 {
            let mut msg = MessageBuffer::new();
            msg.write(&0.5f32);
            handle.control(id("gen"), "value", msg);
        }
        handle.remove(id("gen"));
        network.cycle(4);

        // The ring holds one message; the rest was dropped in place.
        assert_eq!(handle.collect_garbage().len(), 0);
        assert_eq!(network.num_items(), 0);
    }

    #[test]
    fn collecting_garbage_drains_messages() {
        let (mut network, handle) = DspNetwork::new(NetworkConfig {
            garbage_capacity: 3,
            ..config(1, 4)
        });

        handle.add_item(Item::new(id("gen"), ConstantSource::new(1.0, 1)));
        for _ in 0..3 {
            handle.control(id("gen"), "value", MessageBuffer::new());
        }
        network.cycle(4);
        assert!(handle.collect_garbage().is_empty());

        handle.control(id("gen"), "value", MessageBuffer::new());
        handle.remove(id("gen"));
        network.cycle(4);

        let retired = handle.collect_garbage();
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].id(), id("gen"));
    }
}
