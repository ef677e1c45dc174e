//! The frame loop. One [`FrameScheduler::tick`] drains input, merges the
//! controls, pulls an audio snapshot, renders, presents and keeps count.

mod grab;
mod overlay;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub use grab::{write_grab, GrabWriter, GRAB_QUEUE_LEN};
pub use overlay::{ModeMenu, Overlay, StatusOsd};

use crate::{
    analysis::derive_gain,
    audio::AudioSampler,
    channel::AudioSnapshot,
    config::AppConfig,
    control::{ControlInputs, ControlState, GainControl, OverrideBank},
    mode::{ModeHost, ModeRegistry},
    remote::RemoteLink,
    render::{InputEvent, Screen, Surface},
    Result, SharedAudioChannel,
};

/// Ticks between measured-fps updates.
pub const FPS_WINDOW_TICKS: u64 = 30;
/// Ticks between housekeeping passes.
pub const HOUSEKEEPING_TICKS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Exit,
}

/// Deadline-based rate limiter. A loop that falls more than one period
/// behind resynchronises instead of bursting to catch up.
#[derive(Debug)]
pub struct FrameClock {
    period: Duration,
    next: Instant,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        let period = Duration::from_secs(1) / fps.max(1);
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleeps until the next deadline. Returns how long it slept.
    pub fn wait(&mut self) -> Duration {
        let now = Instant::now();
        if now < self.next {
            let slept = self.next - now;
            thread::sleep(slept);
            self.next += self.period;
            return slept;
        }
        if now - self.next > self.period {
            self.next = now + self.period;
        } else {
            self.next += self.period;
        }
        Duration::ZERO
    }
}

pub struct FrameScheduler {
    control: ControlState,
    overrides: Arc<OverrideBank>,
    modes: ModeHost,
    surface: Surface,
    screen: Box<dyn Screen>,
    inputs: Box<dyn ControlInputs>,
    channel: SharedAudioChannel,
    sampler: Option<AudioSampler>,
    remote: Option<Box<dyn RemoteLink>>,
    menu: Option<Box<dyn Overlay>>,
    osd: Option<Box<dyn Overlay>>,

    menu_mode: bool,
    show_osd: bool,
    grab_requested: bool,
    grabs: GrabWriter,
    fps_target: u32,
    advance_ticks: Option<u64>,
    last_mode_change: u64,
    fps_window_start: Instant,
    last_writes: u64,
    shutdown_grace: Duration,
}

impl FrameScheduler {
    pub fn new(
        config: &AppConfig,
        registry: ModeRegistry,
        screen: Box<dyn Screen>,
        inputs: Box<dyn ControlInputs>,
        channel: SharedAudioChannel,
    ) -> Self {
        let video = &config.video;
        let mut control = ControlState::new(video.width, video.height);
        control.set_trigger_source(config.trigger());
        control.set_gain_control(GainControl::locked_at(config.audio.gain));
        control.select_palettes(config.palette.fg_palette, config.palette.bg_palette);
        control.set_bg_color(video.background);

        let mode_count = registry.len();
        let mut modes = ModeHost::new(registry);
        modes.set_auto_clear(video.auto_clear);
        if let Some(initial) = &config.modes.initial {
            if let Err(err) = modes.activate_by_name(initial) {
                tracing::warn!(%err, "initial mode not found, keeping the first one");
            }
        }

        let advance_ticks = config
            .modes
            .advance_seconds
            .filter(|seconds| *seconds > 0)
            .map(|seconds| u64::from(seconds) * u64::from(video.fps));

        Self {
            overrides: control.overrides(),
            control,
            modes,
            surface: Surface::new(video.width, video.height, video.background),
            screen,
            inputs,
            channel,
            sampler: None,
            remote: None,
            menu: Some(Box::new(ModeMenu::new(mode_count))),
            osd: Some(Box::new(StatusOsd)),
            menu_mode: false,
            show_osd: video.show_osd,
            grab_requested: false,
            grabs: GrabWriter::new(config.paths.grabs.clone()),
            fps_target: video.fps,
            advance_ticks,
            last_mode_change: 0,
            fps_window_start: Instant::now(),
            last_writes: 0,
            shutdown_grace: Duration::from_millis(config.audio.shutdown_grace_ms),
        }
    }

    pub fn set_sampler(&mut self, sampler: AudioSampler) {
        self.sampler = Some(sampler);
    }

    pub fn set_remote(&mut self, remote: Box<dyn RemoteLink>) {
        self.remote = Some(remote);
    }

    pub fn set_menu(&mut self, menu: Option<Box<dyn Overlay>>) {
        self.menu = menu;
    }

    pub fn set_osd(&mut self, osd: Option<Box<dyn Overlay>>) {
        self.osd = osd;
    }

    pub fn control(&self) -> &ControlState {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ControlState {
        &mut self.control
    }

    pub fn modes(&self) -> &ModeHost {
        &self.modes
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn menu_mode(&self) -> bool {
        self.menu_mode
    }

    pub fn show_osd(&self) -> bool {
        self.show_osd
    }

    /// Runs one frame.
    pub fn tick(&mut self) -> TickOutcome {
        self.control.begin_frame();
        let frame = self.control.frame_count();

        for event in self.screen.poll_events() {
            if self.handle_event(event) == TickOutcome::Exit {
                return TickOutcome::Exit;
            }
        }

        let reading = self.inputs.read();
        self.control.refresh(&reading);
        if let Some(index) = self.overrides.take_mode_request() {
            self.switch_mode(|modes| modes.activate(index));
        }
        if let Some(every) = self.advance_ticks {
            if !self.menu_mode && frame.saturating_sub(self.last_mode_change) >= every {
                self.switch_mode(ModeHost::next);
            }
        }

        if self.control.new_led() {
            if let Some(remote) = self.remote.as_mut() {
                remote.notify_led(self.control.led());
            }
        }

        let gain = derive_gain(self.control.audio_gain());
        if let Err(err) = self.channel.set_gain(gain) {
            tracing::warn!(%err, "could not update audio gain");
        }
        let snapshot = self.channel.snapshot().unwrap_or_else(|err| {
            tracing::warn!(%err, "audio snapshot failed, using silence");
            AudioSnapshot::silent()
        });
        self.last_writes = snapshot.writes;
        self.control.apply_audio(&snapshot);

        if self.menu_mode {
            self.render_menu();
        } else {
            self.modes.tick(&mut self.surface, &mut self.control);
            if self.show_osd {
                self.render_osd();
            }
        }

        if let Err(err) = self.screen.present(&self.surface) {
            tracing::warn!(%err, "present failed");
        }
        if std::mem::take(&mut self.grab_requested) {
            self.screengrab();
        }

        if frame % FPS_WINDOW_TICKS == 0 {
            let elapsed = self.fps_window_start.elapsed().as_secs_f32();
            if elapsed > 0.0 {
                self.control.set_fps(FPS_WINDOW_TICKS as f32 / elapsed);
            }
            self.fps_window_start = Instant::now();
        }

        if self.control.take_peak_reset() {
            match self.channel.reset_peaks() {
                Ok(()) => self.control.rearm_audio_trigger(),
                Err(err) => tracing::warn!(%err, "could not reset peaks"),
            }
        }
        self.control.end_tick();

        if frame % HOUSEKEEPING_TICKS == 0 {
            self.housekeeping(frame);
        }
        TickOutcome::Continue
    }

    /// Ticks at the configured rate until an exit request or `max_ticks`,
    /// then shuts the collaborators down. Returns the number of ticks run.
    pub fn run(&mut self, max_ticks: Option<u64>) -> u64 {
        let mut clock = FrameClock::new(self.fps_target);
        let mut ticks = 0;
        tracing::info!(fps = self.fps_target, "frame loop started");

        while max_ticks.map_or(true, |max| ticks < max) {
            ticks += 1;
            if self.tick() == TickOutcome::Exit {
                tracing::info!("exit requested");
                break;
            }
            clock.wait();
        }

        self.shutdown();
        ticks
    }

    /// Stops the sampler and the remote link, each within the configured
    /// grace period, then waits for pending screengrabs. Safe to call more
    /// than once.
    pub fn shutdown(&mut self) {
        if let Some(mut sampler) = self.sampler.take() {
            sampler.shutdown(self.shutdown_grace);
        }
        if let Some(mut remote) = self.remote.take() {
            remote.close(self.shutdown_grace);
        }
        self.grabs.finish();
    }

    /// Hands a copy of the current surface to the screengrab writer.
    /// Returns false if the grab was dropped.
    pub fn screengrab(&mut self) -> bool {
        self.grabs.submit(self.control.frame_count(), self.surface.clone())
    }

    fn handle_event(&mut self, event: InputEvent) -> TickOutcome {
        match event {
            InputEvent::Quit => return TickOutcome::Exit,
            InputEvent::Button { index, down } => self.control.set_button(index, down),
            InputEvent::ToggleMenu => {
                self.menu_mode = !self.menu_mode;
                tracing::info!(menu = self.menu_mode, "menu toggled");
            }
            InputEvent::ToggleOsd => self.show_osd = !self.show_osd,
            InputEvent::ToggleAutoClear => {
                let auto_clear = !self.modes.auto_clear();
                self.modes.set_auto_clear(auto_clear);
            }
            InputEvent::ToggleGainLock => self.control.toggle_gain_lock(),
            InputEvent::SelectMode(index) => self.switch_mode(|modes| modes.activate(index)),
            InputEvent::NextMode => self.switch_mode(ModeHost::next),
            InputEvent::PreviousMode => self.switch_mode(ModeHost::previous),
            InputEvent::Screengrab => self.grab_requested = true,
            InputEvent::ResetPeaks => self.control.request_peak_reset(),
            InputEvent::SequencerRecord => {
                if let Err(err) = self.control.start_recording() {
                    tracing::warn!(%err, "cannot start recording");
                }
            }
            InputEvent::SequencerPlay => {
                if let Err(err) = self.control.start_playback() {
                    tracing::warn!(%err, "cannot start playback");
                }
            }
            InputEvent::SequencerStop => self.control.stop_sequencer(),
            InputEvent::ToggleSequencerLoop => self.control.toggle_sequencer_loop(),
        }
        TickOutcome::Continue
    }

    fn switch_mode<F>(&mut self, change: F)
    where
        F: FnOnce(&mut ModeHost) -> Result<()>,
    {
        match change(&mut self.modes) {
            Ok(()) => self.last_mode_change = self.control.frame_count(),
            Err(err) => tracing::warn!(%err, "mode change rejected"),
        }
    }

    fn render_menu(&mut self) {
        let Some(menu) = self.menu.as_mut() else {
            self.surface.fill(self.control.bg_color());
            return;
        };
        if let Err(err) = menu.render(&mut self.surface, &self.control, self.modes.handle()) {
            tracing::warn!(%err, "menu render failed");
            self.surface.fill(self.control.bg_color());
        }
    }

    fn render_osd(&mut self) {
        if let Some(osd) = self.osd.as_mut() {
            if let Err(err) = osd.render(&mut self.surface, &self.control, self.modes.handle()) {
                tracing::warn!(%err, "osd render failed");
            }
        }
    }

    fn housekeeping(&self, frame: u64) {
        let handle = self.modes.handle();
        tracing::debug!(
            frame,
            fps = self.control.fps(),
            mode = handle.map(|handle| handle.name.as_str()),
            mode_error = handle.and_then(|handle| handle.error.as_deref()),
            audio_writes = self.last_writes,
            sequencer = ?self.control.sequencer().state(),
            "housekeeping"
        );
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("modes", &self.modes)
            .field("frame", &self.control.frame_count())
            .field("menu_mode", &self.menu_mode)
            .field("show_osd", &self.show_osd)
            .finish_non_exhaustive()
    }
}
