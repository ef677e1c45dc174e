//! Knob automation recorder.
//!
//! Steps are stamped with the tick they were recorded on, relative to the
//! start of the recording. Playback advances one tick per frame and holds
//! the most recent step at or before the cursor, so a recording replays
//! frame-for-frame.

use crate::control::KNOB_COUNT;

/// Hardware movement (in knob units per tick) that interrupts playback.
pub const DEAD_BAND: f32 = 0.02;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequencerState {
    #[default]
    Stopped,
    Recording,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnobStep {
    pub tick: u32,
    pub knobs: [f32; KNOB_COUNT],
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequencerError {
    #[error("sequencer is {0:?}, stop it first")]
    Busy(SequencerState),
    #[error("nothing recorded")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct KnobSequencer {
    state: SequencerState,
    steps: Vec<KnobStep>,
    /// Ticks covered by the recording.
    length: u32,
    cursor: u32,
    step_index: usize,
    looping: bool,
    last_hardware: Option<[f32; KNOB_COUNT]>,
}

impl Default for KnobSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl KnobSequencer {
    pub fn new() -> Self {
        Self {
            state: SequencerState::Stopped,
            steps: Vec::new(),
            length: 0,
            cursor: 0,
            step_index: 0,
            looping: true,
            last_hardware: None,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn steps(&self) -> &[KnobStep] {
        &self.steps
    }

    pub fn len_ticks(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Discards any previous recording and starts a new one.
    pub fn start_recording(&mut self) -> Result<(), SequencerError> {
        if self.state != SequencerState::Stopped {
            return Err(SequencerError::Busy(self.state));
        }
        self.steps.clear();
        self.length = 0;
        self.cursor = 0;
        self.step_index = 0;
        self.state = SequencerState::Recording;
        tracing::info!("knob sequencer recording");
        Ok(())
    }

    pub fn start_playback(&mut self) -> Result<(), SequencerError> {
        if self.state != SequencerState::Stopped {
            return Err(SequencerError::Busy(self.state));
        }
        if self.steps.is_empty() {
            return Err(SequencerError::Empty);
        }
        self.cursor = 0;
        self.step_index = 0;
        self.state = SequencerState::Playing;
        tracing::info!(ticks = self.length, steps = self.steps.len(), "knob sequencer playing");
        Ok(())
    }

    /// Stops recording or playback. Ending a recording appends `current` as
    /// the closing snapshot.
    pub fn stop(&mut self, current: [f32; KNOB_COUNT]) {
        match self.state {
            SequencerState::Recording => {
                let tick = self.cursor.saturating_sub(1);
                self.steps.push(KnobStep {
                    tick,
                    knobs: current,
                });
                self.length = self.cursor.max(1);
                tracing::info!(ticks = self.length, steps = self.steps.len(), "knob sequencer recorded");
            }
            SequencerState::Playing => tracing::info!("knob sequencer stopped"),
            SequencerState::Stopped => {}
        }
        self.state = SequencerState::Stopped;
        self.cursor = 0;
        self.step_index = 0;
    }

    /// Compares this tick's hardware reading with the previous one. Movement
    /// beyond the dead-band stops playback; returns whether it did.
    pub fn observe_hardware(&mut self, hardware: &[f32; KNOB_COUNT]) -> bool {
        let moved = self.last_hardware.is_some_and(|last| {
            last.iter()
                .zip(hardware.iter())
                .any(|(before, now)| (now - before).abs() > DEAD_BAND)
        });
        self.last_hardware = Some(*hardware);

        if moved && self.state == SequencerState::Playing {
            tracing::info!("knob moved during playback, returning to manual control");
            self.state = SequencerState::Stopped;
            self.cursor = 0;
            self.step_index = 0;
            return true;
        }
        false
    }

    /// While playing, returns the knob values for this tick and advances the
    /// cursor. A non-looping sequence stops after its last tick.
    pub fn next_playback(&mut self) -> Option<[f32; KNOB_COUNT]> {
        if self.state != SequencerState::Playing {
            return None;
        }

        while self
            .steps
            .get(self.step_index + 1)
            .is_some_and(|next| next.tick <= self.cursor)
        {
            self.step_index += 1;
        }
        let values = self.steps[self.step_index].knobs;

        self.cursor += 1;
        if self.cursor >= self.length {
            self.cursor = 0;
            self.step_index = 0;
            if !self.looping {
                self.state = SequencerState::Stopped;
                tracing::info!("knob sequence finished");
            }
        }
        Some(values)
    }

    /// While recording, appends `effective` if it differs from the last
    /// recorded step, then advances the recording clock.
    pub fn record(&mut self, effective: &[f32; KNOB_COUNT]) {
        if self.state != SequencerState::Recording {
            return;
        }
        let changed = self.steps.last().map_or(true, |last| &last.knobs != effective);
        if changed {
            self.steps.push(KnobStep {
                tick: self.cursor,
                knobs: *effective,
            });
        }
        self.cursor += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knobs(value: f32) -> [f32; KNOB_COUNT] {
        [value; KNOB_COUNT]
    }

    fn record(sequencer: &mut KnobSequencer, values: &[f32]) {
        sequencer.start_recording().unwrap();
        for value in values {
            sequencer.record(&knobs(*value));
        }
        sequencer.stop(knobs(*values.last().unwrap_or(&0.0)));
    }

    #[test]
    fn records_only_changes() {
        let mut sequencer = KnobSequencer::new();
        record(&mut sequencer, &[0.1, 0.1, 0.4, 0.4, 0.4, 0.7]);

        let ticks: Vec<u32> = sequencer.steps().iter().map(|step| step.tick).collect();
        assert_eq!(ticks, vec![0, 2, 5, 5]);
        assert_eq!(sequencer.len_ticks(), 6);
    }

    #[test]
    fn playback_replays_tick_for_tick_and_loops() {
        let values = [0.1, 0.1, 0.4, 0.4, 0.4, 0.7];
        let mut sequencer = KnobSequencer::new();
        record(&mut sequencer, &values);
        sequencer.start_playback().unwrap();

        for lap in 0..2 {
            for (tick, expected) in values.iter().enumerate() {
                let played = sequencer.next_playback().unwrap();
                assert_eq!(played, knobs(*expected), "lap {lap} tick {tick}");
            }
        }
        assert_eq!(sequencer.state(), SequencerState::Playing);
    }

    #[test]
    fn non_looping_sequence_stops_when_exhausted() {
        let mut sequencer = KnobSequencer::new();
        record(&mut sequencer, &[0.2, 0.3]);
        sequencer.set_looping(false);
        sequencer.start_playback().unwrap();

        assert!(sequencer.next_playback().is_some());
        assert!(sequencer.next_playback().is_some());
        assert_eq!(sequencer.state(), SequencerState::Stopped);
        assert!(sequencer.next_playback().is_none());
    }

    #[test]
    fn playback_requires_a_recording() {
        let mut sequencer = KnobSequencer::new();
        assert_eq!(sequencer.start_playback(), Err(SequencerError::Empty));
    }

    #[test]
    fn cannot_record_while_playing() {
        let mut sequencer = KnobSequencer::new();
        record(&mut sequencer, &[0.5]);
        sequencer.start_playback().unwrap();
        assert_eq!(
            sequencer.start_recording(),
            Err(SequencerError::Busy(SequencerState::Playing))
        );
    }

    #[test]
    fn immediate_stop_keeps_a_single_snapshot() {
        let mut sequencer = KnobSequencer::new();
        sequencer.start_recording().unwrap();
        sequencer.stop(knobs(0.9));
        assert_eq!(sequencer.steps().len(), 1);
        assert_eq!(sequencer.len_ticks(), 1);
    }

    #[test]
    fn hardware_nudge_stops_playback() {
        let mut sequencer = KnobSequencer::new();
        record(&mut sequencer, &[0.5, 0.6]);
        assert!(!sequencer.observe_hardware(&knobs(0.2)));
        sequencer.start_playback().unwrap();

        assert!(!sequencer.observe_hardware(&knobs(0.21)));
        assert_eq!(sequencer.state(), SequencerState::Playing);

        let mut moved = knobs(0.21);
        moved[3] = 0.3;
        assert!(sequencer.observe_hardware(&moved));
        assert_eq!(sequencer.state(), SequencerState::Stopped);
    }
}
