//! Beeper/EAR audio mixer.
//!
//! The speaker bit and the tape EAR bit mix into 16-bit signed mono PCM at
//! 44,100 Hz. Downsampling uses a fractional T-state accumulator. Samples
//! collect in a lock-free pending buffer on the emulation thread and are
//! spliced into the shared buffer under a mutex; the host audio callback
//! drains the shared side and repeats the last sample on underrun to hold
//! the DC level.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 44_100;

/// Samples per 50 Hz frame.
pub const SAMPLES_PER_FRAME: usize = 882;

/// T-states per output sample: 69888 / (44100/50).
const T_STATES_PER_SAMPLE: f64 = 69_888.0 / (SAMPLE_RATE as f64 / 50.0);

/// Contribution of the speaker bit.
const SPEAKER_WEIGHT: i16 = 20_000;

/// Contribution of the EAR bit (tape audibly loading).
const EAR_WEIGHT: i16 = 8_000;

/// Silence cushion written on reset, ~45 ms.
const CUSHION_SAMPLES: usize = 2_000;

/// Splice pending samples into the shared buffer once this many collect.
const FLUSH_THRESHOLD: usize = 128;

/// Cap on buffered audio (about half a second) so a paused host does not
/// grow the queue without bound.
const MAX_BUFFERED: usize = SAMPLE_RATE as usize / 2;

struct SharedBuffer {
    samples: VecDeque<i16>,
    last: i16,
}

/// Consumer handle for the host audio callback. Clones share one buffer.
#[derive(Clone)]
pub struct AudioSink {
    shared: Arc<Mutex<SharedBuffer>>,
}

impl AudioSink {
    fn new() -> Self {
        let mut samples = VecDeque::with_capacity(MAX_BUFFERED);
        samples.extend(std::iter::repeat_n(0i16, CUSHION_SAMPLES));
        Self {
            shared: Arc::new(Mutex::new(SharedBuffer { samples, last: 0 })),
        }
    }

    /// Fill `out` from the buffer, repeating the last sample on underrun.
    /// Called from the host audio thread.
    pub fn fill(&self, out: &mut [i16]) {
        let Ok(mut shared) = self.shared.lock() else {
            out.fill(0);
            return;
        };
        for sample in out.iter_mut() {
            match shared.samples.pop_front() {
                Some(value) => {
                    shared.last = value;
                    *sample = value;
                }
                None => *sample = shared.last,
            }
        }
    }

    /// Buffered sample count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().map_or(0, |s| s.samples.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything and refill the silence cushion.
    fn reset(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.samples.clear();
            shared.samples.extend(std::iter::repeat_n(0i16, CUSHION_SAMPLES));
            shared.last = 0;
        }
    }

    fn splice(&self, pending: &mut Vec<i16>) {
        if pending.is_empty() {
            return;
        }
        if let Ok(mut shared) = self.shared.lock() {
            shared.samples.extend(pending.iter().copied());
            while shared.samples.len() > MAX_BUFFERED {
                shared.samples.pop_front();
            }
        }
        pending.clear();
    }
}

/// Producer side, owned by the machine.
pub struct Mixer {
    /// Fractional T-state accumulator for downsampling.
    accumulator: f64,
    pending: Vec<i16>,
    sink: AudioSink,
}

impl Mixer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accumulator: 0.0,
            pending: Vec::with_capacity(SAMPLES_PER_FRAME * 2),
            sink: AudioSink::new(),
        }
    }

    /// Handle to hand to the host audio callback.
    #[must_use]
    pub fn sink(&self) -> AudioSink {
        self.sink.clone()
    }

    /// Account `t_states` of emulated time at the given output levels,
    /// emitting samples as sample boundaries pass.
    pub fn advance(&mut self, t_states: u32, speaker: bool, ear: bool) {
        self.accumulator += f64::from(t_states);

        while self.accumulator >= T_STATES_PER_SAMPLE {
            self.accumulator -= T_STATES_PER_SAMPLE;
            let mut value = 0i16;
            if speaker {
                value += SPEAKER_WEIGHT;
            }
            if ear {
                value += EAR_WEIGHT;
            }
            self.pending.push(value);
        }

        if self.pending.len() >= FLUSH_THRESHOLD {
            self.flush();
        }
    }

    /// Splice pending samples into the shared buffer.
    pub fn flush(&mut self) {
        self.sink.splice(&mut self.pending);
    }

    /// Drop all state and restore the startup cushion.
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.pending.clear();
        self.sink.reset();
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}
