//! Core library for lumenbox, a live audio-reactive video synthesizer.
//!
//! A sampler thread turns captured audio into windowed RMS levels and
//! publishes them into a shared ring. The frame loop ticks at a fixed rate:
//! it merges hardware knobs, remote overrides and knob-sequencer playback
//! into one [`ControlState`], pulls an audio snapshot, and runs the active
//! visual [`Mode`] inside a failure boundary before presenting the frame.
//! Each module owns one of those subsystems.

pub mod analysis;
pub mod audio;
pub mod channel;
pub mod config;
pub mod control;
pub mod error;
pub mod mode;
pub mod palette;
pub mod remote;
pub mod render;
pub mod scheduler;
pub mod sequencer;

pub use audio::{AudioSampler, SamplerStatus};
pub use channel::{AudioSnapshot, SharedAudioChannel, AUDIO_RING_LEN};
pub use config::{AppConfig, AudioBackend, AudioConfig};
pub use control::{ControlInputs, ControlState, SharedControls, TriggerSource};
pub use error::{AudioInitError, LumenError, RemoteError, Result};
pub use mode::{Mode, ModeError, ModeHost, ModeRegistry, ModeResult};
pub use remote::{RemoteControlBridge, RemoteLink, UdpBridge};
pub use render::{Color, HeadlessScreen, InputEvent, Screen, Surface};
pub use scheduler::{FrameScheduler, TickOutcome};
pub use sequencer::{KnobSequencer, SequencerState};
