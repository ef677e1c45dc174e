//! Audio sampler: the producer side of [`SharedAudioChannel`].
//!
//! The sampler owns its own thread. Whatever backend it runs (host capture
//! device or a generated test signal), the thread reports readiness once,
//! then keeps publishing windowed levels until it is told to stop.

#[cfg(feature = "capture")]
mod device;

use std::f32::consts::TAU;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    analysis::{WindowedLevels, SAMPLE_SCALE},
    config::{AudioBackend, AudioConfig},
    AudioInitError, SharedAudioChannel,
};

/// How long [`AudioSampler::spawn`] waits for the backend to report.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Frames generated per iteration of the synthetic backend.
const SYNTHETIC_PERIOD: usize = 512;

/// Outcome of sampler startup as seen by the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerStatus {
    Ready { device: String },
    Failed(AudioInitError),
}

impl SamplerStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, SamplerStatus::Ready { .. })
    }
}

/// Handle to the running producer thread.
pub struct AudioSampler {
    status: SamplerStatus,
    stop_tx: Option<Sender<()>>,
    done_rx: Option<Receiver<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioSampler {
    /// Starts the configured backend and waits for it to report `Ready` or
    /// `Failed`. A failed sampler leaves the channel untouched, so every
    /// level reads zero.
    pub fn spawn(config: &AudioConfig, channel: SharedAudioChannel) -> Self {
        Self::spawn_with_timeout(config, channel, STARTUP_TIMEOUT)
    }

    pub fn spawn_with_timeout(
        config: &AudioConfig,
        channel: SharedAudioChannel,
        startup_timeout: Duration,
    ) -> Self {
        if config.backend == AudioBackend::Silent {
            return Self::failed(AudioInitError::CaptureUnavailable);
        }

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<SamplerStatus>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let thread_config = config.clone();

        let spawned = thread::Builder::new()
            .name("audio-sampler".to_string())
            .spawn(move || {
                run_backend(&thread_config, channel, &ready_tx, &stop_rx);
                let _ = done_tx.send(());
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => return Self::failed(AudioInitError::Stream(err.to_string())),
        };

        let status = match ready_rx.recv_timeout(startup_timeout) {
            Ok(status) => status,
            Err(_) => SamplerStatus::Failed(AudioInitError::Timeout),
        };

        match &status {
            SamplerStatus::Ready { device } => tracing::info!(device, "audio sampler ready"),
            SamplerStatus::Failed(reason) => {
                tracing::error!(%reason, "audio sampler failed, running with silent input")
            }
        }

        Self {
            status,
            stop_tx: Some(stop_tx),
            done_rx: Some(done_rx),
            thread: Some(thread),
        }
    }

    fn failed(reason: AudioInitError) -> Self {
        Self {
            status: SamplerStatus::Failed(reason),
            stop_tx: None,
            done_rx: None,
            thread: None,
        }
    }

    pub fn status(&self) -> &SamplerStatus {
        &self.status
    }

    /// Signals the producer to stop and waits up to `grace` for it to exit.
    /// A thread that overstays the grace period is detached and left to die
    /// with the process. Calling this more than once is a no-op.
    pub fn shutdown(&mut self, grace: Duration) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let Some(done_rx) = self.done_rx.take() else {
            return;
        };

        match done_rx.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        tracing::error!("audio sampler thread panicked");
                    }
                }
                tracing::info!("audio sampler stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                self.thread.take();
                tracing::warn!(?grace, "audio sampler ignored stop request, detaching");
            }
        }
    }
}

impl Drop for AudioSampler {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(1));
    }
}

impl std::fmt::Debug for AudioSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSampler")
            .field("status", &self.status)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

fn run_backend(
    config: &AudioConfig,
    channel: SharedAudioChannel,
    ready_tx: &Sender<SamplerStatus>,
    stop_rx: &Receiver<()>,
) {
    match config.backend {
        AudioBackend::Device => run_device(config, channel, ready_tx, stop_rx),
        AudioBackend::Synthetic {
            frequency,
            amplitude,
        } => run_synthetic(config, frequency, amplitude, channel, ready_tx, stop_rx),
        AudioBackend::Silent => {
            let _ = ready_tx.send(SamplerStatus::Failed(AudioInitError::CaptureUnavailable));
        }
    }
}

#[cfg(feature = "capture")]
fn run_device(
    config: &AudioConfig,
    channel: SharedAudioChannel,
    ready_tx: &Sender<SamplerStatus>,
    stop_rx: &Receiver<()>,
) {
    device::run(config, channel, ready_tx, stop_rx);
}

#[cfg(not(feature = "capture"))]
fn run_device(
    _config: &AudioConfig,
    _channel: SharedAudioChannel,
    ready_tx: &Sender<SamplerStatus>,
    _stop_rx: &Receiver<()>,
) {
    let _ = ready_tx.send(SamplerStatus::Failed(AudioInitError::CaptureUnavailable));
}

/// Publishes every completed window of `samples`. Lock failures are logged
/// and the window is dropped; the producer never stops over one.
pub(crate) fn feed_levels(levels: &mut WindowedLevels, samples: &[f32], channel: &SharedAudioChannel) {
    levels.push_interleaved(samples, |left, right| {
        if let Err(err) = channel.publish_window(left, right) {
            tracing::warn!(%err, "dropping audio window");
        }
    });
}

/// Sine generator paced like a capture device, for hardware-free runs.
fn run_synthetic(
    config: &AudioConfig,
    frequency: f32,
    amplitude: f32,
    channel: SharedAudioChannel,
    ready_tx: &Sender<SamplerStatus>,
    stop_rx: &Receiver<()>,
) {
    let sample_rate = config.sample_rate.max(1) as f32;
    let channels = usize::from(config.channels.max(1));
    let period = Duration::from_secs_f32(SYNTHETIC_PERIOD as f32 / sample_rate);
    let mut levels = WindowedLevels::new(config.window, channels);
    let mut buffer = vec![0.0_f32; SYNTHETIC_PERIOD * channels];
    let mut phase = 0.0_f32;
    let step = TAU * frequency / sample_rate;

    let _ = ready_tx.send(SamplerStatus::Ready {
        device: format!("synthetic {frequency} Hz"),
    });

    loop {
        for frame in buffer.chunks_exact_mut(channels) {
            let value = phase.sin() * amplitude * SAMPLE_SCALE;
            frame.fill(value);
            phase = (phase + step) % TAU;
        }
        feed_levels(&mut levels, &buffer, &channel);

        match stop_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_config(amplitude: f32) -> AudioConfig {
        AudioConfig {
            backend: AudioBackend::Synthetic {
                frequency: 440.0,
                amplitude,
            },
            ..AudioConfig::default()
        }
    }

    #[test]
    fn synthetic_sampler_publishes_levels() {
        let channel = SharedAudioChannel::new();
        let mut sampler = AudioSampler::spawn(&synthetic_config(0.5), channel.clone());
        assert!(sampler.status().is_ready());

        let mut snapshot = channel.snapshot().unwrap();
        for _ in 0..200 {
            if snapshot.writes > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
            snapshot = channel.snapshot().unwrap();
        }
        sampler.shutdown(Duration::from_secs(1));

        assert!(snapshot.writes > 0);
        assert!(snapshot.peak_left > 0.0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let channel = SharedAudioChannel::new();
        let mut sampler = AudioSampler::spawn(&synthetic_config(0.1), channel);
        sampler.shutdown(Duration::from_secs(1));
        sampler.shutdown(Duration::from_secs(1));
        assert!(sampler.thread.is_none());
    }

    #[test]
    fn silent_backend_reports_failure_without_thread() {
        let config = AudioConfig {
            backend: AudioBackend::Silent,
            ..AudioConfig::default()
        };
        let sampler = AudioSampler::spawn(&config, SharedAudioChannel::new());
        assert_eq!(
            sampler.status(),
            &SamplerStatus::Failed(AudioInitError::CaptureUnavailable)
        );
    }

    #[test]
    fn feeds_gained_windows_into_channel() {
        let channel = SharedAudioChannel::new();
        channel.set_gain(2.0).unwrap();
        let mut levels = WindowedLevels::new(4, 2);
        let samples = [100.0_f32; 16];

        feed_levels(&mut levels, &samples, &channel);

        let snapshot = channel.snapshot().unwrap();
        assert_eq!(snapshot.writes, 2);
        assert!((snapshot.peak_left - 200.0).abs() < 1e-3);
    }
}
