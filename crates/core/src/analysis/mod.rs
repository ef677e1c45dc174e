use std::fmt;

/// Full-scale value of a signed 16-bit sample. Levels are expressed on this
/// scale regardless of the device sample format, so thresholds such as the
/// audio trigger level stay meaningful.
pub const SAMPLE_SCALE: f32 = 32_768.0;

/// Maps the stored gain setting (nominally [0, 1]) to the multiplier applied
/// to raw samples before the RMS is taken.
pub fn derive_gain(setting: f32) -> f32 {
    setting * setting * 50.0 + 1.0
}

/// Root mean square of `samples` after scaling each by `gain`.
pub fn gained_rms(samples: &[f32], gain: f32) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .map(|sample| {
            let value = sample * gain;
            value * value
        })
        .sum();
    (sum / samples.len() as f32).sqrt()
}

/// Deinterleaves a raw capture stream and cuts it into fixed-size windows.
///
/// Device callbacks deliver arbitrary buffer lengths, so frames that do not
/// fill a window are carried over to the next call rather than dropped.
/// Mono input is mirrored to both channels; channels beyond the second are
/// ignored.
pub struct WindowedLevels {
    window: usize,
    channels: usize,
    left: Vec<f32>,
    right: Vec<f32>,
    windows_emitted: u64,
}

impl WindowedLevels {
    pub fn new(window: usize, channels: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            channels: channels.max(1),
            left: Vec::with_capacity(window),
            right: Vec::with_capacity(window),
            windows_emitted: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn windows_emitted(&self) -> u64 {
        self.windows_emitted
    }

    /// Feeds interleaved samples already expressed on the [`SAMPLE_SCALE`]
    /// scale. `on_window` runs once per completed window with the left and
    /// right halves.
    pub fn push_interleaved<F>(&mut self, samples: &[f32], mut on_window: F)
    where
        F: FnMut(&[f32], &[f32]),
    {
        for frame in samples.chunks_exact(self.channels) {
            let left = frame[0];
            let right = if self.channels > 1 { frame[1] } else { frame[0] };
            self.left.push(left);
            self.right.push(right);

            if self.left.len() == self.window {
                on_window(&self.left, &self.right);
                self.left.clear();
                self.right.clear();
                self.windows_emitted += 1;
            }
        }
    }

    /// Drops any partially filled window.
    pub fn reset(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

impl fmt::Debug for WindowedLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedLevels")
            .field("window", &self.window)
            .field("channels", &self.channels)
            .field("pending", &self.left.len())
            .field("windows_emitted", &self.windows_emitted)
            .finish()
    }
}
