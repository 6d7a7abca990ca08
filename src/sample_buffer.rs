// src/sample_buffer.rs

/// A fixed-length block of mono 16-bit samples. This is the unit the audio
/// device exchanges with the engine once per callback, so it is sized once
/// at startup and never resized afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleBuffer {
    samples: Box<[i16]>,
}

impl SampleBuffer {
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![0; len].into_boxed_slice(),
        }
    }

    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[i16] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    pub fn fill_silence(&mut self) {
        self.samples.fill(0);
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Copies `data` in. A shorter source leaves the tail silent, a longer one
    /// is cut to this buffer's length.
    pub fn copy_from(&mut self, data: &[i16]) {
        let n = data.len().min(self.samples.len());
        self.samples[..n].copy_from_slice(&data[..n]);
        self.samples[n..].fill(0);
    }

    /// Copies raw device input in with an arithmetic right shift, which leaves
    /// headroom for overdubs summed on top of it.
    pub fn attenuate_from(&mut self, raw: &[i16], shift: u32) {
        let n = raw.len().min(self.samples.len());
        for (dst, &src) in self.samples[..n].iter_mut().zip(raw) {
            *dst = src >> shift;
        }
        self.samples[n..].fill(0);
    }

    pub fn fade_in(&mut self) {
        let len = self.samples.len();
        for (i, s) in self.samples.iter_mut().enumerate() {
            *s = scale(*s, ramp_up(i, len));
        }
    }

    pub fn fade_out(&mut self) {
        let len = self.samples.len();
        for (i, s) in self.samples.iter_mut().enumerate() {
            *s = scale(*s, ramp_down(i, len));
        }
    }
}

/// Linear 0 → 1 ramp across `len` points, endpoints included.
pub fn ramp_up(i: usize, len: usize) -> f32 {
    if len < 2 {
        return 0.0;
    }
    i as f32 / (len - 1) as f32
}

/// Linear 1 → 0 ramp across `len` points, endpoints included.
pub fn ramp_down(i: usize, len: usize) -> f32 {
    if len < 2 {
        return 1.0;
    }
    1.0 - ramp_up(i, len)
}

/// Multiplies and narrows back to a sample, truncating toward zero.
#[inline]
pub fn scale(sample: i16, gain: f32) -> i16 {
    (sample as f32 * gain) as i16
}
