//! Locked handoff between the audio sampler and the frame loop.
//!
//! Everything the two contexts share lives behind one mutex: both level
//! rings, the write cursor, the peak registers and the gain register. Each
//! operation takes the lock once and holds it for at most one ring copy.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{analysis::gained_rms, LumenError, Result};

/// Number of smoothed levels kept per channel.
pub const AUDIO_RING_LEN: usize = 100;

/// Consumer-side copy of the channel taken once per tick.
///
/// The rings are ordered oldest to newest: index `AUDIO_RING_LEN - 1` holds
/// the most recent level.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSnapshot {
    pub left: [f32; AUDIO_RING_LEN],
    pub right: [f32; AUDIO_RING_LEN],
    pub peak_left: f32,
    pub peak_right: f32,
    pub gain: f32,
    /// Total windows published since the channel was created.
    pub writes: u64,
}

impl AudioSnapshot {
    /// All-zero snapshot used when no sampler is running.
    pub fn silent() -> Self {
        Self {
            left: [0.0; AUDIO_RING_LEN],
            right: [0.0; AUDIO_RING_LEN],
            peak_left: 0.0,
            peak_right: 0.0,
            gain: 1.0,
            writes: 0,
        }
    }
}

impl Default for AudioSnapshot {
    fn default() -> Self {
        Self::silent()
    }
}

#[derive(Debug)]
struct ChannelState {
    left: [f32; AUDIO_RING_LEN],
    right: [f32; AUDIO_RING_LEN],
    write_index: usize,
    writes: u64,
    peak_left: f32,
    peak_right: f32,
    gain: f32,
}

impl ChannelState {
    fn write(&mut self, rms_left: f32, rms_right: f32) {
        self.left[self.write_index] = rms_left;
        self.right[self.write_index] = rms_right;
        self.write_index = (self.write_index + 1) % AUDIO_RING_LEN;
        self.writes += 1;
        self.peak_left = self.peak_left.max(rms_left);
        self.peak_right = self.peak_right.max(rms_right);
    }
}

/// Cloneable handle to the shared audio state.
#[derive(Clone)]
pub struct SharedAudioChannel {
    shared: Arc<Mutex<ChannelState>>,
}

impl SharedAudioChannel {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(ChannelState {
                left: [0.0; AUDIO_RING_LEN],
                right: [0.0; AUDIO_RING_LEN],
                write_index: 0,
                writes: 0,
                peak_left: 0.0,
                peak_right: 0.0,
                gain: 1.0,
            })),
        }
    }

    /// Producer: stores one RMS pair in the next slot and raises the peaks.
    pub fn publish(&self, rms_left: f32, rms_right: f32) -> Result<()> {
        let mut state = self.lock()?;
        state.write(rms_left, rms_right);
        Ok(())
    }

    /// Producer: computes the gained RMS of one window and publishes it, all
    /// inside a single critical section so the gain read and the write are
    /// consistent.
    pub fn publish_window(&self, left: &[f32], right: &[f32]) -> Result<(f32, f32)> {
        let mut state = self.lock()?;
        let gain = state.gain;
        let rms_left = gained_rms(left, gain);
        let rms_right = gained_rms(right, gain);
        state.write(rms_left, rms_right);
        Ok((rms_left, rms_right))
    }

    /// Consumer: copies both rings (oldest first) and the current peaks.
    pub fn snapshot(&self) -> Result<AudioSnapshot> {
        let state = self.lock()?;
        let mut snapshot = AudioSnapshot {
            left: [0.0; AUDIO_RING_LEN],
            right: [0.0; AUDIO_RING_LEN],
            peak_left: state.peak_left,
            peak_right: state.peak_right,
            gain: state.gain,
            writes: state.writes,
        };
        let split = state.write_index;
        let tail = AUDIO_RING_LEN - split;
        snapshot.left[..tail].copy_from_slice(&state.left[split..]);
        snapshot.left[tail..].copy_from_slice(&state.left[..split]);
        snapshot.right[..tail].copy_from_slice(&state.right[split..]);
        snapshot.right[tail..].copy_from_slice(&state.right[..split]);
        Ok(snapshot)
    }

    /// Consumer: sets the gain multiplier used for subsequent windows.
    pub fn set_gain(&self, gain: f32) -> Result<()> {
        let mut state = self.lock()?;
        state.gain = gain;
        Ok(())
    }

    pub fn gain(&self) -> Result<f32> {
        Ok(self.lock()?.gain)
    }

    /// Drops both peak registers back to zero.
    pub fn reset_peaks(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.peak_left = 0.0;
        state.peak_right = 0.0;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChannelState>> {
        self.shared
            .lock()
            .map_err(|_| LumenError::msg("audio channel has been poisoned"))
    }
}

impl Default for SharedAudioChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedAudioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedAudioChannel").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn snapshot_orders_newest_writes_last() {
        let channel = SharedAudioChannel::new();
        for i in 0..(AUDIO_RING_LEN + 25) {
            channel.publish(i as f32, -(i as f32)).unwrap();
        }

        let snapshot = channel.snapshot().unwrap();
        for (slot, value) in snapshot.left.iter().enumerate() {
            assert_eq!(*value, (25 + slot) as f32);
        }
        assert_eq!(snapshot.right[AUDIO_RING_LEN - 1], -((AUDIO_RING_LEN + 24) as f32));
        assert_eq!(snapshot.writes, (AUDIO_RING_LEN + 25) as u64);
    }

    #[test]
    fn peaks_only_rise_until_reset() {
        let channel = SharedAudioChannel::new();
        let inputs = [3.0, 9.0, 1.0, 4.0, 12.0, 0.5];
        let mut last = 0.0;
        for value in inputs {
            channel.publish(value, value / 2.0).unwrap();
            let peak = channel.snapshot().unwrap().peak_left;
            assert!(peak >= last);
            last = peak;
        }
        assert_eq!(last, 12.0);

        channel.reset_peaks().unwrap();
        let snapshot = channel.snapshot().unwrap();
        assert_eq!(snapshot.peak_left, 0.0);
        assert_eq!(snapshot.peak_right, 0.0);
    }

    #[test]
    fn gain_applies_to_later_windows_only() {
        let channel = SharedAudioChannel::new();
        let window = [10.0_f32; 8];

        let (first, _) = channel.publish_window(&window, &window).unwrap();
        channel.set_gain(4.0).unwrap();
        let (second, _) = channel.publish_window(&window, &window).unwrap();

        assert!((first - 10.0).abs() < 1e-3);
        assert!((second - 40.0).abs() < 1e-3);
        let snapshot = channel.snapshot().unwrap();
        assert!((snapshot.left[AUDIO_RING_LEN - 2] - 10.0).abs() < 1e-3);
    }

    #[test]
    fn concurrent_snapshots_never_see_torn_slots() {
        let channel = SharedAudioChannel::new();
        let producer = {
            let channel = channel.clone();
            thread::spawn(move || {
                for i in 1..=5_000 {
                    let value = i as f32;
                    channel.publish(value, value).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let snapshot = channel.snapshot().unwrap();
            assert_eq!(snapshot.left, snapshot.right);
            let written: Vec<f32> = snapshot.left.iter().copied().filter(|v| *v > 0.0).collect();
            assert!(written.windows(2).all(|pair| pair[1] == pair[0] + 1.0));
        }

        producer.join().unwrap();
    }
}
