use crate::{
    control::{ControlState, KNOB_COUNT},
    mode::ModeHandle,
    render::{Color, Surface},
    Result,
};

/// Something drawn by the frame loop itself rather than by a mode: the
/// menu, the on-screen display.
pub trait Overlay {
    fn render(
        &mut self,
        surface: &mut Surface,
        control: &ControlState,
        mode: Option<&ModeHandle>,
    ) -> Result<()>;
}

/// Status strip across the top of the frame: one bar per knob, then the
/// trigger lamp and the mode-error lamp.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusOsd;

impl Overlay for StatusOsd {
    fn render(
        &mut self,
        surface: &mut Surface,
        control: &ControlState,
        mode: Option<&ModeHandle>,
    ) -> Result<()> {
        let width = surface.width();
        let band = (surface.height() / 8).max(8);
        surface.fill_rect(0, 0, width, band, Color::OSD_BACKGROUND);

        // Lamps and bars share the left half of the strip.
        let slot = (width / 2 / (KNOB_COUNT as u32 + 2)).max(2);
        let inner = band.saturating_sub(4);
        let bar_width = slot.saturating_sub(1).max(1);

        for (index, value) in control.knobs().iter().enumerate() {
            let filled = (value.clamp(0.0, 1.0) * inner as f32).round() as u32;
            let x = (index as u32 * slot) as i32;
            let y = (2 + inner - filled) as i32;
            surface.fill_rect(x, y, bar_width, filled, Color::WHITE);
        }

        let lamps = [
            (KNOB_COUNT as u32, control.trig(), Color::CYAN),
            (
                KNOB_COUNT as u32 + 1,
                mode.is_some_and(|mode| mode.error.is_some()),
                Color::RED,
            ),
        ];
        for (position, lit, color) in lamps {
            if lit {
                surface.fill_rect((position * slot) as i32, 2, bar_width, inner, color);
            }
        }
        Ok(())
    }
}

/// Mode picker shown in menu mode: one row per registered mode, the active
/// one highlighted.
#[derive(Debug, Clone, Copy)]
pub struct ModeMenu {
    entries: usize,
}

impl ModeMenu {
    pub fn new(entries: usize) -> Self {
        Self { entries }
    }
}

impl Overlay for ModeMenu {
    fn render(
        &mut self,
        surface: &mut Surface,
        control: &ControlState,
        mode: Option<&ModeHandle>,
    ) -> Result<()> {
        surface.fill(control.bg_color());
        if self.entries == 0 {
            return Ok(());
        }

        let row = (surface.height() / self.entries as u32).clamp(1, 40);
        let width = surface.width().saturating_sub(20);
        let active = mode.map(|mode| mode.index);
        for entry in 0..self.entries {
            let color = if Some(entry) == active {
                control.color_picker(0.5)
            } else {
                Color::gray(90)
            };
            let y = (entry as u32 * row) as i32;
            surface.fill_rect(10, y + 1, width, row.saturating_sub(2).max(1), color);
        }
        Ok(())
    }
}
