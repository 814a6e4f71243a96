use crate::{
    backend::{AudioBackend, StreamConfig},
    module::{Module, ProcessStatus},
};

use super::{
    buffer_pool::{BufferIdx, BufferPool},
    DspNetwork, ItemState,
};

/// Preallocated lists used to hand buffers to [`Module::process`].
pub(crate) struct Scratch {
    inputs: Option<Vec<&'static [f32]>>,
    outputs: Option<Vec<&'static mut [f32]>>,
    taken: Vec<Vec<f32>>,
}

impl Scratch {
    pub fn new() -> Self {
        Self {
            inputs: Some(Vec::new()),
            outputs: Some(Vec::new()),
            taken: Vec::new(),
        }
    }

    /// Make room for an item with the given channel counts. Called at
    /// compile time so that [`Scratch::run`] never allocates.
    pub fn reserve(&mut self, num_inputs: usize, num_outputs: usize) {
        if let Some(inputs) = &mut self.inputs {
            inputs.reserve(num_inputs);
        }
        if let Some(outputs) = &mut self.outputs {
            outputs.reserve(num_outputs);
        }
        self.taken.reserve(num_outputs);
    }

    pub fn run(
        &mut self,
        module: &mut dyn Module,
        input_bufs: &[BufferIdx],
        output_bufs: &[BufferIdx],
        pool: &mut BufferPool,
        frames: usize,
    ) -> ProcessStatus {
        // Outputs are moved out of the pool so that they can be borrowed
        // mutably next to the inputs.
        for &idx in output_bufs {
            self.taken.push(pool.take(idx));
        }

        // This trick allows us to create a Vec of references without
        // allocating any memory.
        let mut inputs: Vec<&[f32]> = crate::util::recycle_vec(self.inputs.take().unwrap_or_default());
        let mut outputs: Vec<&mut [f32]> =
            crate::util::recycle_vec(self.outputs.take().unwrap_or_default());

        inputs.extend(input_bufs.iter().map(|&idx| &pool.buffer(idx)[..frames]));
        outputs.extend(self.taken.iter_mut().map(|buf| &mut buf[..frames]));

        let status = module.process(&inputs, &mut outputs, frames);

        self.inputs = Some(crate::util::recycle_vec(inputs));
        self.outputs = Some(crate::util::recycle_vec(outputs));

        for &idx in output_bufs.iter().rev() {
            if let Some(buf) = self.taken.pop() {
                pool.restore(idx, buf);
            }
        }

        status
    }
}

impl DspNetwork {
    /// Run every compiled item for `frames` frames, then the output
    /// collector.
    ///
    /// Items run in execution-list order. An item returning
    /// [`ProcessStatus::Done`] is marked for retirement at the next call to
    /// [`DspNetwork::check_done_items`].
    pub fn do_cycle(&mut self, frames: usize) {
        assert!(
            frames <= self.config.max_cycle_frames,
            "cycle of {} frames exceeds the maximum of {}",
            frames,
            self.config.max_cycle_frames
        );

        let Self {
            items,
            schedule,
            pool,
            scratch,
            collector,
            num_done,
            ..
        } = self;

        for &key in schedule.iter() {
            let Some(item) = items.get_mut(key) else {
                continue;
            };
            if !item.is_compiled() {
                continue;
            }

            if item.process(pool, scratch, frames) == ProcessStatus::Done {
                log::debug!("DspNetwork::do_cycle # \"{}\" is done", item.id);
                item.state = ItemState::Done;
                *num_done += 1;
            }
        }

        scratch.run(&mut collector.module, &collector.input_bufs, &[], pool, frames);
    }

    /// Run one full cycle: apply pending commands and compile, process,
    /// then retire finished items.
    pub fn cycle(&mut self, frames: usize) {
        self.check_new_items();
        self.do_cycle(frames);
        self.check_done_items();
    }

    /// Fill an interleaved device buffer, running as many cycles as
    /// needed.
    ///
    /// Samples past the last whole frame are set to silence.
    pub fn process_interleaved(&mut self, output: &mut [f32]) {
        let chans = self.collector.module.channels();
        let frames = output.len() / chans;
        let max = self.config.max_cycle_frames;

        let mut frames_processed = 0;
        while frames_processed < frames {
            let cycle_frames = (frames - frames_processed).min(max);

            self.cycle(cycle_frames);

            output[frames_processed * chans..(frames_processed + cycle_frames) * chans]
                .copy_from_slice(self.collector.module.interleaved());

            frames_processed += cycle_frames;
        }

        output[frames * chans..].fill(0.0);
    }

    /// Move the network into the realtime callback of an output stream.
    ///
    /// The returned stream handle keeps the stream alive. Keep using the
    /// [`NetworkHandle`](super::NetworkHandle) to talk to the network.
    pub fn start<B: AudioBackend>(
        mut self,
        backend: &B,
        device_name: Option<&str>,
    ) -> Result<B::StreamHandle, B::Error> {
        let config = StreamConfig {
            channels: self.config.out_channels,
            sample_rate: self.config.sample_rate,
        };

        log::info!(
            "DspNetwork::start # {} channels at {} Hz",
            config.channels,
            config.sample_rate
        );

        backend.open_output(
            device_name,
            &config,
            Box::new(move |output: &mut [f32]| self.process_interleaved(output)),
        )
    }
}
