use super::{Mode, ModeResult};
use crate::{
    channel::AUDIO_RING_LEN,
    control::ControlState,
    render::{Color, Surface},
};

/// Pulsing centre disc sized by the left peak, with satellites sized by
/// recent levels.
///
/// Knob 1: disc scale. Knob 4: colour (LFO above half). Knob 5: background.
#[derive(Debug, Default)]
pub struct Circles {
    seed: u32,
}

impl Circles {
    fn next_random(&mut self) -> u32 {
        // Numerical Recipes LCG; only needs to look scattered.
        self.seed = self.seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.seed >> 8
    }
}

impl Mode for Circles {
    fn setup(&mut self, _surface: &mut Surface, control: &mut ControlState) -> ModeResult {
        control.set_bg_color(Color::BLACK);
        self.seed = 0x2545_f491;
        Ok(())
    }

    fn draw(&mut self, surface: &mut Surface, control: &mut ControlState) -> ModeResult {
        let (width, height) = surface.size();
        let background = control.color_picker_bg(control.knob(4));
        surface.fill(background);

        let scale = 0.25 + control.knob(0) * 1.5;
        let radius = ((50.0 + control.audio_peak() / 500.0) * scale) as u32;
        let color = control.color_picker_lfo(control.knob(3));
        surface.fill_circle(((width / 2) as i32, (height / 2) as i32), radius, color);

        let levels = control.audio_left();
        for i in 0..5 {
            let x = (self.next_random() % width.max(1)) as i32;
            let y = (self.next_random() % height.max(1)) as i32;
            let level = levels[(AUDIO_RING_LEN - 1).saturating_sub(i * 20)];
            let size = (10.0 + level / 1000.0).abs() as u32;
            surface.fill_circle((x, y), size, Color::CYAN);
        }
        Ok(())
    }
}

/// Fifty-segment trace of the most recent levels with a drop shadow.
///
/// Knob 1: line width. Knob 2: baseline height. Knob 3: shadow offset and
/// brightness. Knob 4: colour (LFO above half). Knob 5: background.
#[derive(Debug, Default)]
pub struct Oscilloscope {
    segment_width: i32,
    max_line_width: f32,
    amplitude: f32,
}

const SEGMENTS: usize = 50;

impl Mode for Oscilloscope {
    fn setup(&mut self, surface: &mut Surface, _control: &mut ControlState) -> ModeResult {
        let width = surface.width() as i32;
        self.segment_width = width / SEGMENTS as i32 + 1;
        self.max_line_width = 25.0;
        self.amplitude = 500.0;
        Ok(())
    }

    fn draw(&mut self, surface: &mut Surface, control: &mut ControlState) -> ModeResult {
        let height = surface.height() as f32;
        let background = control.color_picker_bg(control.knob(4));
        surface.fill(background);

        let line_width = (control.knob(0) * self.max_line_width) as u32 + 1;
        let shadow = control.knob(2);
        let shadow_offset = (150.0 * shadow) as i32;
        let shadow_color = Color::gray((shadow * 255.0) as u8);
        let color = control.color_picker_lfo(control.knob(3));
        let baseline = control.knob(1) * height;
        let levels = *control.audio_left();
        let first = AUDIO_RING_LEN - SEGMENTS;

        let mut last = (-(self.max_line_width as i32), (height / 2.0) as i32);
        for (i, level) in levels[first..].iter().enumerate() {
            let x = i as i32 * self.segment_width;
            let y = (baseline + level / FULL_SWING_LEVEL * self.amplitude) as i32;
            surface.draw_line(
                (last.0 - shadow_offset, last.1 + shadow_offset),
                (x - shadow_offset, y + shadow_offset),
                line_width,
                shadow_color,
            );
            surface.draw_line(last, (x, y), line_width, color);
            last = (x, y);
        }
        Ok(())
    }
}

/// Level that maps to a full `amplitude` swing.
const FULL_SWING_LEVEL: f32 = 32_700.0;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::AudioSnapshot;

    #[test]
    fn circles_grows_with_peak() {
        let mut surface = Surface::new(400, 400, Color::BLACK);
        let mut control = ControlState::new(400, 400);
        let mut mode = Circles::default();
        mode.setup(&mut surface, &mut control).unwrap();

        let mut loud = AudioSnapshot::silent();
        loud.peak_left = 50_000.0;
        control.apply_audio(&loud);
        mode.draw(&mut surface, &mut control).unwrap();

        // (50 + 100) px at the default knob scale of 0.55 is an 82 px radius.
        // Satellites may cover a few pixels of the disc.
        let disc = control.color_picker(0.4);
        let covered = (0..=75)
            .filter(|dy| surface.pixel(200, 200 + dy) == Some(disc))
            .count();
        assert!(covered > 50, "only {covered} disc pixels");
    }

    #[test]
    fn oscilloscope_draws_something() {
        let mut surface = Surface::new(320, 240, Color::BLACK);
        let mut control = ControlState::new(320, 240);
        let mut mode = Oscilloscope::default();
        mode.setup(&mut surface, &mut control).unwrap();
        mode.draw(&mut surface, &mut control).unwrap();

        let background = surface.pixel(0, 0).unwrap();
        let baseline = (control.knob(1) * 240.0) as u32;
        let traced = (0..320).any(|x| surface.pixel(x, baseline) != Some(background));
        assert!(traced);
    }
}
