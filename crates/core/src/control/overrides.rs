use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};

use super::KNOB_COUNT;

const ACTIVE_BIT: u64 = 1 << 32;
const NO_MODE_REQUEST: i64 = -1;

/// The override layer of [`ControlState`](super::ControlState), shared with
/// the remote-control listener.
///
/// Every field is a single atomic, so each remote write lands whole and the
/// frame loop picks it up on its next refresh. There is no acknowledgement.
#[derive(Debug)]
pub struct OverrideBank {
    // Low 32 bits: f32 bits of the value. Bit 32: override active.
    knobs: [AtomicU64; KNOB_COUNT],
    led: AtomicI32,
    led_dirty: AtomicBool,
    mode_request: AtomicI64,
}

impl Default for OverrideBank {
    fn default() -> Self {
        Self {
            knobs: std::array::from_fn(|_| AtomicU64::new(0)),
            led: AtomicI32::new(0),
            led_dirty: AtomicBool::new(false),
            mode_request: AtomicI64::new(NO_MODE_REQUEST),
        }
    }
}

impl OverrideBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces knob `index` to `value`, clamped to [0, 1], until cleared.
    /// Returns false, storing nothing, for an out-of-range index or a
    /// non-finite value.
    pub fn set_knob(&self, index: usize, value: f32) -> bool {
        let Some(slot) = self.knobs.get(index) else {
            return false;
        };
        if !value.is_finite() {
            tracing::warn!(index, value, "ignoring non-finite knob override");
            return false;
        }
        let value = value.clamp(0.0, 1.0);
        slot.store(ACTIVE_BIT | u64::from(value.to_bits()), Ordering::Release);
        true
    }

    pub fn clear_knob(&self, index: usize) -> bool {
        let Some(slot) = self.knobs.get(index) else {
            return false;
        };
        slot.store(0, Ordering::Release);
        true
    }

    pub fn knob(&self, index: usize) -> Option<f32> {
        let packed = self.knobs.get(index)?.load(Ordering::Acquire);
        (packed & ACTIVE_BIT != 0).then(|| f32::from_bits(packed as u32))
    }

    pub fn set_led(&self, value: i32) {
        self.led.store(value, Ordering::Release);
        self.led_dirty.store(true, Ordering::Release);
    }

    /// Returns the LED value if it was written since the last call.
    pub fn take_led(&self) -> Option<i32> {
        self.led_dirty
            .swap(false, Ordering::AcqRel)
            .then(|| self.led.load(Ordering::Acquire))
    }

    pub fn request_mode(&self, index: usize) {
        let index = i64::try_from(index).unwrap_or(i64::MAX);
        self.mode_request.store(index, Ordering::Release);
    }

    pub fn take_mode_request(&self) -> Option<usize> {
        let value = self.mode_request.swap(NO_MODE_REQUEST, Ordering::AcqRel);
        usize::try_from(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knob_overrides_round_trip_and_clear() {
        let bank = OverrideBank::new();
        assert_eq!(bank.knob(2), None);
        assert!(bank.set_knob(2, 0.75));
        assert_eq!(bank.knob(2), Some(0.75));
        assert!(bank.set_knob(2, 0.0));
        assert_eq!(bank.knob(2), Some(0.0));
        assert!(bank.clear_knob(2));
        assert_eq!(bank.knob(2), None);
        assert!(!bank.set_knob(KNOB_COUNT, 1.0));
    }

    #[test]
    fn knob_overrides_are_clamped_and_must_be_finite() {
        let bank = OverrideBank::new();
        assert!(bank.set_knob(0, 1.7));
        assert_eq!(bank.knob(0), Some(1.0));
        assert!(bank.set_knob(0, -0.3));
        assert_eq!(bank.knob(0), Some(0.0));

        assert!(!bank.set_knob(1, f32::NAN));
        assert!(!bank.set_knob(1, f32::INFINITY));
        assert_eq!(bank.knob(1), None);
        bank.set_knob(0, 0.5);
        assert!(!bank.set_knob(0, f32::NEG_INFINITY));
        assert_eq!(bank.knob(0), Some(0.5));
    }

    #[test]
    fn led_and_mode_are_taken_once() {
        let bank = OverrideBank::new();
        assert_eq!(bank.take_led(), None);
        bank.set_led(3);
        assert_eq!(bank.take_led(), Some(3));
        assert_eq!(bank.take_led(), None);

        bank.request_mode(4);
        assert_eq!(bank.take_mode_request(), Some(4));
        assert_eq!(bank.take_mode_request(), None);
    }
}
