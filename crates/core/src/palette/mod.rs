use std::f32::consts::TAU;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{render::Color, LumenError, Result};

/// Cosine gradient `a + b * cos(2π(c·t + d))`, evaluated per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub a: [f32; 3],
    pub b: [f32; 3],
    pub c: [f32; 3],
    pub d: [f32; 3],
}

impl Palette {
    pub const fn new(a: [f32; 3], b: [f32; 3], c: [f32; 3], d: [f32; 3]) -> Self {
        Self { a, b, c, d }
    }

    /// Colour at position `t`; any real `t` is accepted.
    pub fn color_at(&self, t: f32) -> Color {
        let channel = |i: usize| self.a[i] + self.b[i] * (TAU * (self.c[i] * t + self.d[i])).cos();
        Color::from_unit(channel(0), channel(1), channel(2))
    }
}

/// Palettes available when no user set is loaded.
pub fn default_palettes() -> Vec<Palette> {
    vec![
        Palette::new([0.5; 3], [0.5; 3], [1.0; 3], [0.0, 0.33, 0.67]),
        Palette::new([0.5; 3], [0.5; 3], [1.0; 3], [0.0, 0.10, 0.20]),
        Palette::new([0.5; 3], [0.5; 3], [1.0, 1.0, 0.5], [0.8, 0.9, 0.3]),
        Palette::new([0.5; 3], [0.5; 3], [1.0, 0.7, 0.4], [0.0, 0.15, 0.20]),
        Palette::new([0.8, 0.5, 0.4], [0.2, 0.4, 0.2], [2.0, 1.0, 1.0], [0.0, 0.25, 0.25]),
        Palette::new([0.5; 3], [0.5; 3], [2.0, 1.0, 0.0], [0.5, 0.2, 0.25]),
    ]
}

/// Reads a JSON array of palettes from `path`. Entries that do not carry
/// three-element `a`, `b`, `c` and `d` arrays are skipped. A missing file, or
/// one with no usable entry, yields [`default_palettes`].
pub fn load_palettes(path: &Path) -> Result<Vec<Palette>> {
    if !path.exists() {
        tracing::info!(?path, "no palette file, using defaults");
        return Ok(default_palettes());
    }

    let text = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let serde_json::Value::Array(entries) = value else {
        return Err(LumenError::msg(format!(
            "{}: palette file must hold a JSON array",
            path.display()
        )));
    };

    let total = entries.len();
    let palettes: Vec<Palette> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(palette) => Some(palette),
            Err(err) => {
                tracing::warn!(index, %err, "skipping invalid palette");
                None
            }
        })
        .collect();

    if palettes.is_empty() {
        tracing::warn!(?path, total, "no valid palettes, using defaults");
        return Ok(default_palettes());
    }
    tracing::info!(?path, loaded = palettes.len(), total, "loaded palettes");
    Ok(palettes)
}

/// Free-running colour LFO driven by `color_picker_lfo`.
///
/// Knob values below 0.5 select a static position (`knob * 2`); above 0.5
/// the index advances each call at a speed proportional to how far the knob
/// is past the midpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorLfo {
    index: f32,
}

impl ColorLfo {
    /// Largest per-call advance, reached at knob = 1.0.
    pub const MAX_RATE: f32 = 0.02;

    pub fn position(&mut self, knob: f32) -> f32 {
        if knob < 0.5 {
            return knob * 2.0;
        }
        let rate = (knob - 0.5) * 2.0 * Self::MAX_RATE;
        self.index = (self.index + rate).fract();
        self.index
    }

    pub fn index(&self) -> f32 {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TWO_PALETTES: &str = r#"[
        { "a": [0.5, 0.5, 0.5], "b": [0.5, 0.5, 0.5], "c": [1, 1, 1], "d": [0, 0.1, 0.2] },
        { "a": [0.2, 0.2, 0.2], "b": [0.1, 0.1, 0.1], "c": [2, 2, 2], "d": [0.3, 0.3, 0.3] }
    ]"#;

    #[test]
    fn loads_palette_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("palettes.json");
        fs::write(&path, TWO_PALETTES).unwrap();

        let palettes = load_palettes(&path).unwrap();
        assert_eq!(palettes.len(), 2);
        assert_eq!(palettes[0], default_palettes()[1]);
        assert_eq!(palettes[1].c, [2.0; 3]);
    }

    #[test]
    fn invalid_palette_entries_are_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("palettes.json");
        fs::write(
            &path,
            r#"[
                { "a": [0.5, 0.5], "b": [0.5, 0.5, 0.5], "c": [1, 1, 1], "d": [0, 0, 0] },
                { "a": [0.1, 0.2, 0.3], "b": [0.5, 0.5, 0.5], "c": [1, 1, 1], "d": [0, 0, 0] },
                { "a": [0.5, 0.5, 0.5], "b": [0.5, 0.5, 0.5], "c": [1, 1, 1] },
                "red"
            ]"#,
        )
        .unwrap();

        let palettes = load_palettes(&path).unwrap();
        assert_eq!(palettes.len(), 1);
        assert_eq!(palettes[0].a, [0.1, 0.2, 0.3]);

        fs::write(&path, r#"[{ "a": 1 }]"#).unwrap();
        assert_eq!(load_palettes(&path).unwrap(), default_palettes());
    }

    #[test]
    fn missing_palette_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let palettes = load_palettes(&dir.path().join("absent.json")).unwrap();
        assert_eq!(palettes, default_palettes());
    }

    #[test]
    fn palette_file_must_be_an_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("palettes.json");
        fs::write(&path, r#"{ "a": [0, 0, 0] }"#).unwrap();
        assert!(load_palettes(&path).is_err());
    }

    #[test]
    fn rainbow_palette_starts_white_ish() {
        let palette = default_palettes()[0];
        let color = palette.color_at(0.0);
        assert_eq!(color.r, 255);
    }

    #[test]
    fn palettes_repeat_with_period_one() {
        let palette = default_palettes()[1];
        assert_eq!(palette.color_at(0.25), palette.color_at(1.25));
    }

    #[test]
    fn lfo_is_static_below_midpoint() {
        let mut lfo = ColorLfo::default();
        assert_eq!(lfo.position(0.2), 0.4);
        assert_eq!(lfo.position(0.2), 0.4);
        assert_eq!(lfo.index(), 0.0);
    }

    #[test]
    fn lfo_advances_and_wraps_above_midpoint() {
        let mut lfo = ColorLfo::default();
        let first = lfo.position(1.0);
        let second = lfo.position(1.0);
        assert!(second > first);
        for _ in 0..100 {
            let position = lfo.position(1.0);
            assert!((0.0..1.0).contains(&position));
        }
    }
}
