/// A handle to a buffer in a [`BufferPool`].
///
/// Handles stay valid for the lifetime of the pool; buffers are never
/// removed, only returned to the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferIdx(pub(crate) u32);

impl BufferIdx {
    /// A buffer that always holds silence. Read by every unconnected
    /// input, never handed out as an output.
    pub const SILENCE: Self = Self(0);
}

impl From<BufferIdx> for usize {
    fn from(value: BufferIdx) -> Self {
        value.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    Free,
    /// The output of exactly one compiled item.
    Owned,
    /// The writer was retired but some item still reads the buffer. It
    /// holds silence until the last reader lets go.
    Orphaned,
    Reserved,
}

pub(crate) struct BufferPool {
    buffers: Vec<Vec<f32>>,
    states: Vec<BufferState>,
    num_orphans: usize,
}

impl BufferPool {
    pub fn new(frames: usize) -> Self {
        Self {
            buffers: vec![vec![0.0; frames]],
            states: vec![BufferState::Reserved],
            num_orphans: 0,
        }
    }

    /// Hand out an idle buffer of at least `size` samples, growing the
    /// pool when there is none.
    pub fn find_free_buf(&mut self, size: usize) -> BufferIdx {
        let free = self
            .states
            .iter()
            .zip(self.buffers.iter())
            .position(|(state, buf)| *state == BufferState::Free && buf.len() >= size);

        let i = match free {
            Some(i) => i,
            None => {
                self.buffers.push(vec![0.0; size]);
                self.states.push(BufferState::Free);
                self.buffers.len() - 1
            }
        };

        assert_eq!(self.states[i], BufferState::Free, "pool buffer {i} shared");
        self.states[i] = BufferState::Owned;
        self.buffers[i].fill(0.0);

        BufferIdx(i as u32)
    }

    /// Return the output buffer of a retired item. If `still_read`, the
    /// buffer is silenced and kept until [`BufferPool::sweep`] finds it
    /// unreferenced.
    pub fn release(&mut self, idx: BufferIdx, still_read: bool) {
        let i = usize::from(idx);
        debug_assert_eq!(self.states[i], BufferState::Owned);

        if still_read {
            self.buffers[i].fill(0.0);
            self.states[i] = BufferState::Orphaned;
            self.num_orphans += 1;
        } else {
            self.states[i] = BufferState::Free;
        }
    }

    /// Free every orphaned buffer for which `is_read` is false.
    pub fn sweep(&mut self, is_read: impl Fn(BufferIdx) -> bool) {
        if self.num_orphans == 0 {
            return;
        }

        for (i, state) in self.states.iter_mut().enumerate() {
            if *state == BufferState::Orphaned && !is_read(BufferIdx(i as u32)) {
                *state = BufferState::Free;
                self.num_orphans -= 1;
            }
        }
    }

    pub fn buffer(&self, idx: BufferIdx) -> &[f32] {
        &self.buffers[usize::from(idx)]
    }

    /// Move a buffer out of the pool for the duration of one process
    /// call. The pool keeps an empty vec in its place.
    pub fn take(&mut self, idx: BufferIdx) -> Vec<f32> {
        std::mem::take(&mut self.buffers[usize::from(idx)])
    }

    pub fn restore(&mut self, idx: BufferIdx, buf: Vec<f32>) {
        self.buffers[usize::from(idx)] = buf;
    }

    /// Zero an owned buffer whose writer stopped running.
    pub fn silence(&mut self, idx: BufferIdx) {
        debug_assert_ne!(idx, BufferIdx::SILENCE);
        self.buffers[usize::from(idx)].fill(0.0);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn num_free(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == BufferState::Free)
            .count()
    }

    pub fn num_orphans(&self) -> usize {
        self.num_orphans
    }
}
