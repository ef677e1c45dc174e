/// Ticks a button must be held before it starts repeating.
pub const REPEAT_DELAY_TICKS: u32 = 15;
/// Ticks between repeats once repeating.
pub const REPEAT_INTERVAL_TICKS: u32 = 3;

/// One physical button: level, press edge and the hold timer that drives
/// auto-repeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonState {
    pub down: bool,
    /// True for the tick of the press and for each repeat while held.
    pub pressed: bool,
    pub held_ticks: u32,
}

impl ButtonState {
    pub(crate) fn set(&mut self, down: bool) {
        if down && !self.down {
            self.pressed = true;
            self.held_ticks = 0;
        }
        self.down = down;
        if !down {
            self.held_ticks = 0;
        }
    }

    pub(crate) fn advance(&mut self) {
        if !self.down {
            return;
        }
        self.held_ticks += 1;
        if self.held_ticks >= REPEAT_DELAY_TICKS
            && (self.held_ticks - REPEAT_DELAY_TICKS) % REPEAT_INTERVAL_TICKS == 0
        {
            self.pressed = true;
        }
    }

    pub(crate) fn clear_edge(&mut self) {
        self.pressed = false;
    }
}
