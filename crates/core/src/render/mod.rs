use std::path::Path;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::Result;

/// 8-bit RGB colour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const CYAN: Color = Color::rgb(0, 255, 255);
    pub const ERROR_BACKGROUND: Color = Color::rgb(50, 50, 50);
    pub const OSD_BACKGROUND: Color = Color::rgb(0, 0, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Builds a colour from unit-range floats, clamping each channel.
    pub fn from_unit(r: f32, g: f32, b: f32) -> Self {
        let to_byte = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::rgb(to_byte(r), to_byte(g), to_byte(b))
    }

    pub fn gray(level: u8) -> Self {
        Self::rgb(level, level, level)
    }
}

/// Software framebuffer that modes paint into. All drawing is clipped to
/// the surface bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<Color>,
}

impl Surface {
    pub fn new(width: u32, height: u32, background: Color) -> Self {
        Self {
            width,
            height,
            pixels: vec![background; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn fill(&mut self, color: Color) {
        self.pixels.fill(color);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x < self.width && y < self.height {
            Some(self.pixels[y as usize * self.width as usize + x as usize])
        } else {
            None
        }
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        if x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height {
            let index = y as usize * self.width as usize + x as usize;
            self.pixels[index] = color;
        }
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Color) {
        let x0 = x.max(0) as i64;
        let y0 = y.max(0) as i64;
        let x1 = (x as i64 + width as i64).min(self.width as i64);
        let y1 = (y as i64 + height as i64).min(self.height as i64);
        if x0 >= x1 {
            return;
        }
        for row in y0..y1 {
            let start = (row * self.width as i64 + x0) as usize;
            let end = (row * self.width as i64 + x1) as usize;
            self.pixels[start..end].fill(color);
        }
    }

    /// Bresenham line with a square brush `thickness` pixels wide.
    pub fn draw_line(&mut self, from: (i32, i32), to: (i32, i32), thickness: u32, color: Color) {
        let thickness = thickness.max(1);
        let offset = (thickness / 2) as i32;
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            if thickness == 1 {
                self.set_pixel(x, y, color);
            } else {
                self.fill_rect(x - offset, y - offset, thickness, thickness, color);
            }
            if x == to.0 && y == to.1 {
                break;
            }
            let doubled = 2 * err;
            if doubled >= dy {
                err += dy;
                x += sx;
            }
            if doubled <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    pub fn fill_circle(&mut self, center: (i32, i32), radius: u32, color: Color) {
        let r = radius as i32;
        let r_squared = (radius as i64) * (radius as i64);
        for dy in -r..=r {
            let span = r_squared - (dy as i64) * (dy as i64);
            let half = (span as f64).sqrt() as i32;
            self.fill_rect(center.0 - half, center.1 + dy, (2 * half + 1) as u32, 1, color);
        }
    }

    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|color| [color.r, color.g, color.b])
            .collect()
    }

    /// Writes the surface as a PNG file.
    pub fn save_png(&self, path: &Path) -> Result<()> {
        image::save_buffer(
            path,
            &self.to_rgb_bytes(),
            self.width,
            self.height,
            image::ColorType::Rgb8,
        )?;
        Ok(())
    }
}

/// Paints the placeholder shown in place of a mode whose draw failed: a
/// dark fill with a red banner in the top-left corner.
pub fn draw_error_placeholder(surface: &mut Surface) {
    surface.fill(Color::ERROR_BACKGROUND);
    let banner_width = surface.width().saturating_sub(100).min(240);
    surface.fill_rect(50, 50, banner_width, 48, Color::RED);
}

/// Discrete input the frame loop reacts to. Produced by the display's event
/// pump (keyboard, window manager) and by menu collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Quit,
    Button { index: usize, down: bool },
    ToggleMenu,
    ToggleOsd,
    ToggleAutoClear,
    ToggleGainLock,
    SelectMode(usize),
    NextMode,
    PreviousMode,
    Screengrab,
    ResetPeaks,
    SequencerRecord,
    SequencerPlay,
    SequencerStop,
    ToggleSequencerLoop,
}

/// Output device the composed frame is flipped to, plus its event pump.
pub trait Screen {
    /// Drains events queued since the last call. Must not block.
    fn poll_events(&mut self) -> Vec<InputEvent>;

    /// Shows `frame`. May block for vsync.
    fn present(&mut self, frame: &Surface) -> Result<()>;
}

/// Screen without an output device. Events are injected through the sender
/// returned by [`HeadlessScreen::new`].
#[derive(Debug)]
pub struct HeadlessScreen {
    events: Receiver<InputEvent>,
    presented: u64,
}

impl HeadlessScreen {
    pub fn new() -> (Self, Sender<InputEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            Self {
                events: rx,
                presented: 0,
            },
            tx,
        )
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Screen for HeadlessScreen {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        self.events.try_iter().collect()
    }

    fn present(&mut self, _frame: &Surface) -> Result<()> {
        self.presented += 1;
        Ok(())
    }
}
