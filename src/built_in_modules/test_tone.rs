use crate::{
    message::MessageBuffer,
    module::{ChannelConfig, Module, PrepareInfo, ProcessStatus},
    util::db_to_amp_clamped_neg_100_db,
};

/// A sine generator with two identical outputs.
///
/// Controls:
/// * `frequency` (float, Hz)
/// * `gain` (float, dB)
/// * `stop` (no arguments), ends the stream after the current cycle
pub struct TestToneGenerator {
    freq_hz: f32,
    amplitude_raw: f32,
    sample_rate_recip: f32,

    phasor: f32,
    phasor_inc: f32,
    stopped: bool,
}

impl TestToneGenerator {
    pub fn new(freq_hz: f32, gain_db: f32) -> Self {
        Self {
            freq_hz,
            amplitude_raw: db_to_amp_clamped_neg_100_db(gain_db),
            sample_rate_recip: 0.0,
            phasor: 0.0,
            phasor_inc: 0.0,
            stopped: false,
        }
    }

    fn set_frequency(&mut self, freq_hz: f32) {
        self.freq_hz = freq_hz;
        self.phasor_inc = freq_hz * self.sample_rate_recip;
    }
}

impl Module for TestToneGenerator {
    fn prepare(&mut self, info: &PrepareInfo) -> ChannelConfig {
        self.sample_rate_recip = (info.sample_rate as f32).recip();
        self.set_frequency(self.freq_hz);

        ChannelConfig::new(0, 2)
    }

    fn control(&mut self, address: &str, message: &mut MessageBuffer<'_>) {
        match address {
            "frequency" => match message.read::<f32>() {
                Ok(hz) => self.set_frequency(hz),
                Err(e) => log::error!("TestToneGenerator::control # frequency # {}", e),
            },
            "gain" => match message.read::<f32>() {
                Ok(db) => self.amplitude_raw = db_to_amp_clamped_neg_100_db(db),
                Err(e) => log::error!("TestToneGenerator::control # gain # {}", e),
            },
            "stop" => self.stopped = true,
            _ => log::error!("TestToneGenerator::control # No param \"{}\"", address),
        }
    }

    fn process(&mut self, _: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) -> ProcessStatus {
        let (out_l, rest) = outputs.split_at_mut(1);
        let (out_l, out_r) = (&mut out_l[0][..frames], &mut rest[0][..frames]);

        if self.amplitude_raw == 0.0 {
            out_l.fill(0.0);
            out_r.fill(0.0);
        } else {
            for (l, r) in out_l.iter_mut().zip(out_r.iter_mut()) {
                let val = (self.phasor * std::f32::consts::TAU).sin() * self.amplitude_raw;
                self.phasor = (self.phasor + self.phasor_inc).fract();

                *l = val;
                *r = val;
            }
        }

        if self.stopped {
            ProcessStatus::Done
        } else {
            ProcessStatus::Continue
        }
    }
}
