//! Per-frame control snapshot shared with modes.
//!
//! [`ControlState`] merges, once per tick, the hardware knob readings, the
//! remote override layer, knob-sequencer playback, MIDI note state and the
//! audio snapshot. Edge flags raised during a tick are cleared by
//! [`ControlState::end_tick`].

mod buttons;
mod overrides;

use std::sync::{Arc, Mutex};

pub use buttons::{ButtonState, REPEAT_DELAY_TICKS, REPEAT_INTERVAL_TICKS};
pub use overrides::OverrideBank;

use crate::{
    channel::{AudioSnapshot, AUDIO_RING_LEN},
    palette::{default_palettes, ColorLfo, Palette},
    render::Color,
    sequencer::{KnobSequencer, SequencerError},
};

pub const KNOB_COUNT: usize = 5;
pub const NOTE_COUNT: usize = 128;
pub const BUTTON_COUNT: usize = 10;
/// Peak level (16-bit sample scale) above which audio raises the trigger.
pub const AUDIO_TRIGGER_LEVEL: f32 = 20_000.0;
/// Holding this button freezes the audio levels seen by modes.
pub const AUDIO_HOLD_BUTTON: usize = 9;

/// What raises the per-tick trigger flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriggerSource {
    #[default]
    Audio,
    Note,
    AudioOrNote,
    ClockSixteenth,
    ClockEighth,
    ClockQuarter,
    ClockWhole,
}

impl TriggerSource {
    pub const ALL: [TriggerSource; 7] = [
        TriggerSource::Audio,
        TriggerSource::Note,
        TriggerSource::AudioOrNote,
        TriggerSource::ClockSixteenth,
        TriggerSource::ClockEighth,
        TriggerSource::ClockQuarter,
        TriggerSource::ClockWhole,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn includes_audio(self) -> bool {
        matches!(self, TriggerSource::Audio | TriggerSource::AudioOrNote)
    }

    pub fn includes_notes(self) -> bool {
        matches!(self, TriggerSource::Note | TriggerSource::AudioOrNote)
    }
}

/// Layers of one knob. `effective` is what modes read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Knob {
    pub hardware: f32,
    pub overridden: bool,
    pub override_value: f32,
    pub effective: f32,
}

impl Default for Knob {
    fn default() -> Self {
        Self {
            hardware: 0.2,
            overridden: false,
            override_value: 0.0,
            effective: 0.2,
        }
    }
}

/// Gain knob with a lock. While locked the physical position is ignored and
/// the captured snapshot is used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainControl {
    unlocked: bool,
    snapshot: f32,
    hardware: Option<f32>,
}

impl GainControl {
    pub fn locked_at(value: f32) -> Self {
        Self {
            unlocked: false,
            snapshot: value,
            hardware: None,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Gain setting in [0, 1] that feeds the audio gain register.
    pub fn value(&self) -> f32 {
        match (self.unlocked, self.hardware) {
            (true, Some(hardware)) => hardware,
            _ => self.snapshot,
        }
    }

    pub fn set_hardware(&mut self, value: f32) {
        self.hardware = Some(value.clamp(0.0, 1.0));
    }

    /// Locking captures the current value; unlocking hands control back to
    /// the physical knob.
    pub fn toggle(&mut self) {
        if self.unlocked {
            self.snapshot = self.value();
        }
        self.unlocked = !self.unlocked;
    }
}

/// Raw readings from the control hardware for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareReading {
    pub knobs: [f32; KNOB_COUNT],
    /// Position of the gain knob, if the hardware has one.
    pub gain: Option<f32>,
    pub notes: [bool; NOTE_COUNT],
}

impl Default for HardwareReading {
    fn default() -> Self {
        Self {
            knobs: [0.2; KNOB_COUNT],
            gain: None,
            notes: [false; NOTE_COUNT],
        }
    }
}

/// Source of [`HardwareReading`]s: knob ADCs, a MIDI input, a test rig.
pub trait ControlInputs {
    fn read(&mut self) -> HardwareReading;
}

/// Control hardware whose state is written by another component (a MIDI
/// driver, a test) through cloned handles.
#[derive(Debug, Clone, Default)]
pub struct SharedControls {
    reading: Arc<Mutex<HardwareReading>>,
}

impl SharedControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_knob(&self, index: usize, value: f32) {
        self.update(|reading| {
            if let Some(knob) = reading.knobs.get_mut(index) {
                *knob = value;
            }
        });
    }

    pub fn set_gain_knob(&self, value: f32) {
        self.update(|reading| reading.gain = Some(value));
    }

    pub fn note_on(&self, note: u8) {
        self.update(|reading| reading.notes[usize::from(note) % NOTE_COUNT] = true);
    }

    pub fn note_off(&self, note: u8) {
        self.update(|reading| reading.notes[usize::from(note) % NOTE_COUNT] = false);
    }

    fn update(&self, apply: impl FnOnce(&mut HardwareReading)) {
        match self.reading.lock() {
            Ok(mut reading) => apply(&mut reading),
            Err(_) => tracing::warn!("control readings poisoned, dropping update"),
        }
    }
}

impl ControlInputs for SharedControls {
    fn read(&mut self) -> HardwareReading {
        self.reading
            .lock()
            .map(|reading| reading.clone())
            .unwrap_or_default()
    }
}

/// Everything a mode can see about the controls and audio for this frame.
#[derive(Debug)]
pub struct ControlState {
    knobs: [Knob; KNOB_COUNT],
    overrides: Arc<OverrideBank>,
    sequencer: KnobSequencer,
    gain: GainControl,
    trigger_source: TriggerSource,

    notes: [bool; NOTE_COUNT],
    notes_last: [bool; NOTE_COUNT],
    midi_note_new: bool,
    note_on_edge: bool,

    buttons: [ButtonState; BUTTON_COUNT],
    led: i32,
    new_led: bool,

    trig: bool,
    audio_trigger_armed: bool,
    audio_in: [f32; AUDIO_RING_LEN],
    audio_in_r: [f32; AUDIO_RING_LEN],
    audio_peak: f32,
    audio_peak_r: f32,
    peak_reset_requested: bool,

    palettes: Vec<Palette>,
    fg_palette: usize,
    bg_palette: usize,
    color_lfo: ColorLfo,
    bg_color: Color,

    width: u32,
    height: u32,
    fps: f32,
    frame_count: u64,
}

impl ControlState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            knobs: [Knob::default(); KNOB_COUNT],
            overrides: Arc::new(OverrideBank::new()),
            sequencer: KnobSequencer::new(),
            gain: GainControl::locked_at(0.25),
            trigger_source: TriggerSource::Audio,
            notes: [false; NOTE_COUNT],
            notes_last: [false; NOTE_COUNT],
            midi_note_new: false,
            note_on_edge: false,
            buttons: [ButtonState::default(); BUTTON_COUNT],
            led: 0,
            new_led: false,
            trig: false,
            audio_trigger_armed: true,
            audio_in: [0.0; AUDIO_RING_LEN],
            audio_in_r: [0.0; AUDIO_RING_LEN],
            audio_peak: 0.0,
            audio_peak_r: 0.0,
            peak_reset_requested: false,
            palettes: default_palettes(),
            fg_palette: 0,
            bg_palette: 0,
            color_lfo: ColorLfo::default(),
            bg_color: Color::BLACK,
            width,
            height,
            fps: 0.0,
            frame_count: 0,
        }
    }

    /// Handle to the override layer for the remote-control listener.
    pub fn overrides(&self) -> Arc<OverrideBank> {
        Arc::clone(&self.overrides)
    }

    // ---- per-tick pipeline -------------------------------------------------

    /// Merges this tick's hardware reading with overrides and sequencer
    /// playback, records into the sequencer, and derives note and LED edges.
    pub fn refresh(&mut self, reading: &HardwareReading) {
        let mut hardware = [0.0; KNOB_COUNT];
        for (slot, value) in hardware.iter_mut().zip(reading.knobs.iter()) {
            *slot = value.clamp(0.0, 1.0);
        }
        if let Some(gain) = reading.gain {
            self.gain.set_hardware(gain);
        }

        self.sequencer.observe_hardware(&hardware);

        for (index, knob) in self.knobs.iter_mut().enumerate() {
            knob.hardware = hardware[index];
            match self.overrides.knob(index) {
                Some(value) => {
                    knob.overridden = true;
                    knob.override_value = value;
                    knob.effective = value;
                }
                None => {
                    knob.overridden = false;
                    knob.effective = knob.hardware;
                }
            }
        }

        if let Some(values) = self.sequencer.next_playback() {
            for (knob, value) in self.knobs.iter_mut().zip(values) {
                knob.effective = value;
            }
        }
        let effective = self.knobs();
        self.sequencer.record(&effective);

        self.notes = reading.notes;
        self.midi_note_new = self.notes != self.notes_last;
        self.note_on_edge = self
            .notes
            .iter()
            .zip(self.notes_last.iter())
            .any(|(now, before)| *now && !*before);

        if let Some(led) = self.overrides.take_led() {
            self.led = led;
            self.new_led = true;
        }

        for button in &mut self.buttons {
            button.advance();
        }
    }

    /// Copies the audio snapshot in (unless the hold button is down) and
    /// evaluates the trigger. The audio trigger fires on the tick a peak
    /// rises above [`AUDIO_TRIGGER_LEVEL`] and re-arms once both peaks are
    /// back at or below it.
    pub fn apply_audio(&mut self, snapshot: &AudioSnapshot) {
        if !self.audio_hold() {
            self.audio_in = snapshot.left;
            self.audio_in_r = snapshot.right;
            self.audio_peak = snapshot.peak_left;
            self.audio_peak_r = snapshot.peak_right;
        }

        let above = self.audio_peak > AUDIO_TRIGGER_LEVEL || self.audio_peak_r > AUDIO_TRIGGER_LEVEL;
        if above && self.audio_trigger_armed && self.trigger_source.includes_audio() {
            self.trig = true;
        }
        self.audio_trigger_armed = !above;

        if self.note_on_edge && self.trigger_source.includes_notes() {
            self.trig = true;
        }
    }

    /// Resets every one-tick flag and rolls the note snapshot forward.
    pub fn end_tick(&mut self) {
        self.trig = false;
        self.midi_note_new = false;
        self.note_on_edge = false;
        self.notes_last = self.notes;
        self.new_led = false;
        for button in &mut self.buttons {
            button.clear_edge();
        }
    }

    pub fn set_button(&mut self, index: usize, down: bool) {
        match self.buttons.get_mut(index) {
            Some(button) => button.set(down),
            None => tracing::warn!(index, "ignoring unknown button"),
        }
    }

    pub fn set_trigger_source(&mut self, source: TriggerSource) {
        self.trigger_source = source;
    }

    pub fn trigger_source(&self) -> TriggerSource {
        self.trigger_source
    }

    // ---- knobs ---------------------------------------------------------------

    pub fn knob(&self, index: usize) -> f32 {
        self.knobs.get(index).map_or(0.0, |knob| knob.effective)
    }

    pub fn knobs(&self) -> [f32; KNOB_COUNT] {
        std::array::from_fn(|index| self.knobs[index].effective)
    }

    pub fn knob_layers(&self, index: usize) -> Option<&Knob> {
        self.knobs.get(index)
    }

    pub fn set_override(&self, index: usize, value: f32) -> bool {
        self.overrides.set_knob(index, value)
    }

    pub fn clear_override(&self, index: usize) -> bool {
        self.overrides.clear_knob(index)
    }

    pub fn sequencer(&self) -> &KnobSequencer {
        &self.sequencer
    }

    /// Flips whether playback wraps at the end of the recording.
    pub fn toggle_sequencer_loop(&mut self) {
        let looping = !self.sequencer.looping();
        self.sequencer.set_looping(looping);
        tracing::info!(looping, "sequencer looping toggled");
    }

    pub fn start_recording(&mut self) -> Result<(), SequencerError> {
        self.sequencer.start_recording()
    }

    pub fn start_playback(&mut self) -> Result<(), SequencerError> {
        self.sequencer.start_playback()
    }

    pub fn stop_sequencer(&mut self) {
        let current = self.knobs();
        self.sequencer.stop(current);
    }

    // ---- gain ------------------------------------------------------------------

    pub fn gain_control(&self) -> &GainControl {
        &self.gain
    }

    pub fn set_gain_control(&mut self, gain: GainControl) {
        self.gain = gain;
    }

    pub fn toggle_gain_lock(&mut self) {
        self.gain.toggle();
        tracing::info!(unlocked = self.gain.is_unlocked(), "gain knob lock toggled");
    }

    /// Gain setting in [0, 1] for this tick.
    pub fn audio_gain(&self) -> f32 {
        self.gain.value()
    }

    // ---- audio -----------------------------------------------------------------

    pub fn audio_left(&self) -> &[f32; AUDIO_RING_LEN] {
        &self.audio_in
    }

    pub fn audio_right(&self) -> &[f32; AUDIO_RING_LEN] {
        &self.audio_in_r
    }

    pub fn audio_peak(&self) -> f32 {
        self.audio_peak
    }

    pub fn audio_peak_r(&self) -> f32 {
        self.audio_peak_r
    }

    pub fn trig(&self) -> bool {
        self.trig
    }

    pub fn audio_hold(&self) -> bool {
        self.buttons[AUDIO_HOLD_BUTTON].down
    }

    /// Asks the frame loop to zero the peak registers after this tick.
    pub fn request_peak_reset(&mut self) {
        self.peak_reset_requested = true;
    }

    pub(crate) fn take_peak_reset(&mut self) -> bool {
        std::mem::take(&mut self.peak_reset_requested)
    }

    /// Arms the audio trigger again after the peak registers were zeroed,
    /// so the next crossing fires without waiting to observe a quiet tick.
    pub fn rearm_audio_trigger(&mut self) {
        self.audio_trigger_armed = true;
    }

    // ---- midi, buttons, led ----------------------------------------------------

    pub fn note(&self, note: u8) -> bool {
        self.notes[usize::from(note) % NOTE_COUNT]
    }

    pub fn midi_note_new(&self) -> bool {
        self.midi_note_new
    }

    pub fn button(&self, index: usize) -> ButtonState {
        self.buttons.get(index).copied().unwrap_or_default()
    }

    pub fn led(&self) -> i32 {
        self.led
    }

    pub fn new_led(&self) -> bool {
        self.new_led
    }

    /// Queues an LED change. It is applied, and announced, on the next
    /// refresh.
    pub fn set_led(&self, value: i32) {
        self.overrides.set_led(value);
    }

    // ---- colour ----------------------------------------------------------------

    pub fn set_palettes(&mut self, palettes: Vec<Palette>) {
        if palettes.is_empty() {
            tracing::warn!("ignoring empty palette set");
            return;
        }
        self.palettes = palettes;
    }

    pub fn select_palettes(&mut self, fg: usize, bg: usize) {
        self.fg_palette = fg;
        self.bg_palette = bg;
    }

    fn palette(&self, index: usize) -> Palette {
        self.palettes[index % self.palettes.len()]
    }

    /// Foreground colour at palette position `t`.
    pub fn color_picker(&self, t: f32) -> Color {
        self.palette(self.fg_palette).color_at(t)
    }

    /// Background colour at palette position `t`; also becomes the colour
    /// auto-clear fills with.
    pub fn color_picker_bg(&mut self, t: f32) -> Color {
        let color = self.palette(self.bg_palette).color_at(t);
        self.bg_color = color;
        color
    }

    /// Foreground colour from the colour LFO: static below 0.5, cycling
    /// faster the further `t` is above it.
    pub fn color_picker_lfo(&mut self, t: f32) -> Color {
        let position = self.color_lfo.position(t);
        self.palette(self.fg_palette).color_at(position)
    }

    pub fn bg_color(&self) -> Color {
        self.bg_color
    }

    pub fn set_bg_color(&mut self, color: Color) {
        self.bg_color = color;
    }

    // ---- frame -----------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn begin_frame(&mut self) {
        self.frame_count += 1;
    }

    pub(crate) fn set_fps(&mut self, fps: f32) {
        self.fps = fps;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::SequencerState;

    fn reading(knobs: [f32; KNOB_COUNT]) -> HardwareReading {
        HardwareReading {
            knobs,
            ..HardwareReading::default()
        }
    }

    fn audio(peak_left: f32, peak_right: f32) -> AudioSnapshot {
        AudioSnapshot {
            peak_left,
            peak_right,
            ..AudioSnapshot::silent()
        }
    }

    fn tick(state: &mut ControlState, hardware: &HardwareReading, snapshot: &AudioSnapshot) -> bool {
        state.refresh(hardware);
        state.apply_audio(snapshot);
        let trig = state.trig();
        state.end_tick();
        trig
    }

    #[test]
    fn override_wins_until_cleared() {
        let mut state = ControlState::new(64, 48);
        state.set_override(1, 0.9);
        state.refresh(&reading([0.3; KNOB_COUNT]));
        assert_eq!(state.knob(0), 0.3);
        assert_eq!(state.knob(1), 0.9);
        assert!(state.knob_layers(1).unwrap().overridden);

        state.end_tick();
        state.refresh(&reading([0.4; KNOB_COUNT]));
        assert_eq!(state.knob(1), 0.9);

        state.clear_override(1);
        state.refresh(&reading([0.4; KNOB_COUNT]));
        assert_eq!(state.knob(1), 0.4);
    }

    #[test]
    fn trigger_fires_once_per_upward_crossing() {
        let mut state = ControlState::new(64, 48);
        let hardware = HardwareReading::default();
        let peaks = [0.0, 15_000.0, 25_000.0, 26_000.0, 30_000.0, 0.0, 19_999.0, 21_000.0];
        let fired: Vec<bool> = peaks
            .iter()
            .map(|peak| tick(&mut state, &hardware, &audio(*peak, 0.0)))
            .collect();
        assert_eq!(fired, vec![false, false, true, false, false, false, false, true]);
    }

    #[test]
    fn rearm_lets_held_peak_fire_again() {
        let mut state = ControlState::new(64, 48);
        let hardware = HardwareReading::default();
        assert!(tick(&mut state, &hardware, &audio(25_000.0, 0.0)));
        assert!(!tick(&mut state, &hardware, &audio(25_000.0, 0.0)));

        state.rearm_audio_trigger();
        assert!(tick(&mut state, &hardware, &audio(25_000.0, 0.0)));
    }

    #[test]
    fn right_channel_also_triggers() {
        let mut state = ControlState::new(64, 48);
        assert!(tick(&mut state, &HardwareReading::default(), &audio(0.0, 20_001.0)));
    }

    #[test]
    fn trigger_ignores_audio_when_source_excludes_it() {
        let mut state = ControlState::new(64, 48);
        state.set_trigger_source(TriggerSource::Note);
        assert!(!tick(&mut state, &HardwareReading::default(), &audio(30_000.0, 0.0)));

        let mut notes = HardwareReading::default();
        notes.notes[60] = true;
        assert!(tick(&mut state, &notes, &audio(30_000.0, 0.0)));
        assert!(!tick(&mut state, &notes, &audio(30_000.0, 0.0)));
    }

    #[test]
    fn note_change_flag_lasts_one_tick() {
        let mut state = ControlState::new(64, 48);
        let mut hardware = HardwareReading::default();
        hardware.notes[42] = true;

        state.refresh(&hardware);
        assert!(state.midi_note_new());
        assert!(state.note(42));
        state.end_tick();

        state.refresh(&hardware);
        assert!(!state.midi_note_new());
        state.end_tick();

        hardware.notes[42] = false;
        state.refresh(&hardware);
        assert!(state.midi_note_new());
    }

    #[test]
    fn playback_reproduces_recorded_knobs() {
        let mut state = ControlState::new(64, 48);
        let recorded: Vec<[f32; KNOB_COUNT]> = (0..12)
            .map(|i| {
                let base = 0.2 + 0.05 * (i / 3) as f32;
                [base, base, 0.5, 0.5, 1.0 - base]
            })
            .collect();

        state.start_recording().unwrap();
        let mut seen = Vec::new();
        for values in &recorded {
            state.refresh(&reading(*values));
            seen.push(state.knobs());
            state.end_tick();
        }
        state.stop_sequencer();
        assert_eq!(seen, recorded);

        // Hardware rests where recording ended; playback drives the knobs.
        let rest = reading(*recorded.last().unwrap());
        state.start_playback().unwrap();
        for expected in recorded.iter().chain(recorded.iter()) {
            state.refresh(&rest);
            assert_eq!(&state.knobs(), expected);
            state.end_tick();
        }
        assert_eq!(state.sequencer().state(), SequencerState::Playing);
    }

    #[test]
    fn nudge_during_playback_returns_to_hardware_same_tick() {
        let mut state = ControlState::new(64, 48);
        state.start_recording().unwrap();
        for value in [0.8, 0.7, 0.6] {
            state.refresh(&reading([value; KNOB_COUNT]));
            state.end_tick();
        }
        state.stop_sequencer();

        state.refresh(&reading([0.1; KNOB_COUNT]));
        state.end_tick();
        state.start_playback().unwrap();
        state.refresh(&reading([0.1; KNOB_COUNT]));
        assert_eq!(state.knob(0), 0.8);
        state.end_tick();

        state.set_override(4, 0.33);
        let mut moved = [0.1; KNOB_COUNT];
        moved[2] = 0.5;
        state.refresh(&reading(moved));
        assert_eq!(state.sequencer().state(), SequencerState::Stopped);
        assert_eq!(state.knob(2), 0.5);
        assert_eq!(state.knob(0), 0.1);
        assert_eq!(state.knob(4), 0.33);
    }

    #[test]
    fn gain_lock_ignores_physical_knob() {
        let mut state = ControlState::new(64, 48);
        state.set_gain_control(GainControl::locked_at(0.25));
        let mut hardware = HardwareReading::default();
        hardware.gain = Some(0.9);

        state.refresh(&hardware);
        assert_eq!(state.audio_gain(), 0.25);

        state.toggle_gain_lock();
        assert_eq!(state.audio_gain(), 0.9);

        state.toggle_gain_lock();
        hardware.gain = Some(0.1);
        state.refresh(&hardware);
        assert_eq!(state.audio_gain(), 0.9);
    }

    #[test]
    fn audio_hold_freezes_levels() {
        let mut state = ControlState::new(64, 48);
        let hardware = HardwareReading::default();
        tick(&mut state, &hardware, &audio(100.0, 100.0));

        state.set_button(AUDIO_HOLD_BUTTON, true);
        tick(&mut state, &hardware, &audio(500.0, 500.0));
        assert_eq!(state.audio_peak(), 100.0);

        state.set_button(AUDIO_HOLD_BUTTON, false);
        tick(&mut state, &hardware, &audio(500.0, 500.0));
        assert_eq!(state.audio_peak(), 500.0);
    }

    #[test]
    fn led_change_is_flagged_for_one_tick() {
        let mut state = ControlState::new(64, 48);
        state.overrides().set_led(5);
        state.refresh(&HardwareReading::default());
        assert!(state.new_led());
        assert_eq!(state.led(), 5);
        state.end_tick();
        state.refresh(&HardwareReading::default());
        assert!(!state.new_led());
    }

    #[test]
    fn button_press_edge_clears_at_tick_end() {
        let mut state = ControlState::new(64, 48);
        state.set_button(0, true);
        assert!(state.button(0).pressed);
        state.end_tick();
        assert!(!state.button(0).pressed);
        assert!(state.button(0).down);
    }

    #[test]
    fn background_picker_updates_clear_colour() {
        let mut state = ControlState::new(64, 48);
        let color = state.color_picker_bg(0.3);
        assert_eq!(state.bg_color(), color);
    }
}
