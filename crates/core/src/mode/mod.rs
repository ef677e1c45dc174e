//! Visual modes and the host that runs the active one.

mod builtin;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

pub use builtin::{Circles, Oscilloscope};

use crate::{
    control::ControlState,
    render::{draw_error_placeholder, Surface},
    LumenError, Result,
};

/// Failure reported by a mode. Panics inside a mode are converted into
/// [`ModeError::Panicked`] at the host boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeError {
    #[error("{0}")]
    Failed(String),
    #[error("panicked: {0}")]
    Panicked(String),
}

impl ModeError {
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Failed(msg.into())
    }
}

pub type ModeResult = std::result::Result<(), ModeError>;

/// A visual effect. `setup` runs once after each activation, `draw` once per
/// frame. Both may fail without affecting the frame loop.
pub trait Mode {
    fn setup(&mut self, surface: &mut Surface, control: &mut ControlState) -> ModeResult;

    fn draw(&mut self, surface: &mut Surface, control: &mut ControlState) -> ModeResult;
}

/// Named modes in a fixed order, built once at load time.
#[derive(Default)]
pub struct ModeRegistry {
    entries: Vec<(String, Box<dyn Mode>)>,
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the modes that ship with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("Circles", Circles::default());
        registry.register("Oscilloscope", Oscilloscope::default());
        registry
    }

    /// Adds a mode under `name`, replacing any mode already using it.
    pub fn register(&mut self, name: impl Into<String>, mode: impl Mode + 'static) {
        let name = name.into();
        let mode: Box<dyn Mode> = Box::new(mode);
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => {
                tracing::warn!(mode = %name, "replacing registered mode");
                entry.1 = mode;
            }
            None => self.entries.push((name, mode)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(existing, _)| existing == name)
    }
}

impl std::fmt::Debug for ModeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Identity and lifecycle flags of the active mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeHandle {
    pub index: usize,
    pub name: String,
    pub needs_setup: bool,
    pub error: Option<String>,
}

/// What happened during one [`ModeHost::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeTick {
    pub ran_setup: bool,
    pub setup_failed: bool,
    pub draw_failed: bool,
}

pub struct ModeHost {
    registry: ModeRegistry,
    handle: Option<ModeHandle>,
    auto_clear: bool,
}

impl ModeHost {
    /// Creates the host and activates the first registered mode, if any.
    pub fn new(registry: ModeRegistry) -> Self {
        let mut host = Self {
            registry,
            handle: None,
            auto_clear: true,
        };
        if !host.registry.is_empty() {
            let _ = host.activate(0);
        }
        host
    }

    pub fn registry(&self) -> &ModeRegistry {
        &self.registry
    }

    pub fn handle(&self) -> Option<&ModeHandle> {
        self.handle.as_ref()
    }

    pub fn auto_clear(&self) -> bool {
        self.auto_clear
    }

    pub fn set_auto_clear(&mut self, auto_clear: bool) {
        self.auto_clear = auto_clear;
    }

    /// Makes mode `index` active. The mode is not called until the next
    /// tick, which runs its setup first.
    pub fn activate(&mut self, index: usize) -> Result<()> {
        let Some((name, _)) = self.registry.entries.get(index) else {
            return Err(LumenError::UnknownMode(index.to_string()));
        };
        tracing::info!(mode = %name, index, "activating mode");
        self.handle = Some(ModeHandle {
            index,
            name: name.clone(),
            needs_setup: true,
            error: None,
        });
        Ok(())
    }

    pub fn activate_by_name(&mut self, name: &str) -> Result<()> {
        let index = self
            .registry
            .index_of(name)
            .ok_or_else(|| LumenError::UnknownMode(name.to_string()))?;
        self.activate(index)
    }

    pub fn next(&mut self) -> Result<()> {
        self.step(1)
    }

    pub fn previous(&mut self) -> Result<()> {
        self.step(self.registry.len().saturating_sub(1))
    }

    fn step(&mut self, offset: usize) -> Result<()> {
        let len = self.registry.len();
        if len == 0 {
            return Err(LumenError::UnknownMode("<none registered>".to_string()));
        }
        let current = self.handle.as_ref().map_or(0, |handle| handle.index);
        self.activate((current + offset) % len)
    }

    /// Renders the active mode into `surface`. Never fails: any setup or
    /// draw failure is recorded on the handle, and a failed draw leaves the
    /// error placeholder on the surface.
    pub fn tick(&mut self, surface: &mut Surface, control: &mut ControlState) -> ModeTick {
        let mut outcome = ModeTick::default();
        let Some(handle) = self.handle.as_mut() else {
            draw_error_placeholder(surface);
            outcome.draw_failed = true;
            return outcome;
        };
        let mode = &mut self.registry.entries[handle.index].1;

        if self.auto_clear {
            surface.fill(control.bg_color());
        }

        let mut failure: Option<String> = None;

        if handle.needs_setup {
            handle.needs_setup = false;
            outcome.ran_setup = true;
            if let Err(err) = guarded(|| mode.setup(surface, control)) {
                tracing::error!(mode = %handle.name, %err, "mode setup failed");
                outcome.setup_failed = true;
                failure = Some(err.to_string());
            }
        }

        if let Err(err) = guarded(|| mode.draw(surface, control)) {
            let message = err.to_string();
            if handle.error.as_deref() == Some(message.as_str()) {
                tracing::debug!(mode = %handle.name, %err, "mode draw still failing");
            } else {
                tracing::error!(mode = %handle.name, %err, "mode draw failed");
            }
            draw_error_placeholder(surface);
            outcome.draw_failed = true;
            failure = Some(message);
        }

        handle.error = failure;
        outcome
    }
}

impl std::fmt::Debug for ModeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeHost")
            .field("registry", &self.registry)
            .field("handle", &self.handle)
            .field("auto_clear", &self.auto_clear)
            .finish()
    }
}

/// Runs one plugin call, turning a panic into a [`ModeError`].
fn guarded<F>(call: F) -> ModeResult
where
    F: FnOnce() -> ModeResult,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(ModeError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
