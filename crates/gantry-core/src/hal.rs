//! Interfaces to the collaborators outside the core: the motion planner
//! and interpolator, the input pins and the settings storage.

use crate::{
    alarm::Alarm,
    signals::{ControlInputs, LimitInputs},
};
use bitflags::bitflags;
use gantry_gcode::{Axes, Coolant, MAX_AXES, PathMode, ProbeMode, Spindle, Status};
use std::collections::HashMap;

/// Everything the planner needs to know about a move besides its target.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionBlock {
    /// mm/min, or 1/min in inverse time. [`MotionBlock::RAPID`] for rapids.
    pub feed: f64,
    pub inverse_time: bool,
    pub path: PathMode,
    pub spindle: Spindle,
    pub spindle_speed: f64,
    pub coolant: Coolant,
    pub dwell_ms: u16,
    /// M48, feed and spindle overrides apply.
    pub overrides_enabled: bool,
    pub line_number: Option<u32>,
}

impl MotionBlock {
    pub const RAPID: f64 = f64::MAX;

    pub fn is_rapid(&self) -> bool {
        self.feed == Self::RAPID
    }
}

impl Default for MotionBlock {
    fn default() -> Self {
        Self {
            feed: 0.0,
            inverse_time: false,
            path: PathMode::ExactPath,
            spindle: Spindle::Off,
            spindle_speed: 0.0,
            coolant: Coolant::empty(),
            dwell_ms: 0,
            overrides_enabled: true,
            line_number: None,
        }
    }
}

/// A resolved arc. The linear axis and any rotary axes move with the arc
/// as a helix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcSpec {
    /// Center relative to the start point, along `axes.0` and `axes.1`.
    pub center: (f64, f64),
    pub radius: f64,
    /// The in-plane axis pair followed by the linear axis.
    pub axes: (usize, usize, usize),
    pub clockwise: bool,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct ProbeFlags: u8 {
        /// Succeed when contact is lost.
        const AWAY = 1 << 0;
        /// Failure is reported but raises no alarm.
        const NO_ALARM = 1 << 1;
    }
}

impl From<ProbeMode> for ProbeFlags {
    fn from(mode: ProbeMode) -> Self {
        let mut flags = ProbeFlags::empty();
        flags.set(ProbeFlags::AWAY, mode.is_away());
        flags.set(ProbeFlags::NO_ALARM, !mode.raises_alarm());
        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe changed state during the move.
    Contact,
    /// The move finished without a state change.
    NoContact,
    /// The probe was already in the target state before moving.
    InitialContact,
}

/// Override percentages currently applied by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overrides {
    pub feed: u8,
    pub rapid: u8,
    pub spindle: u8,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            feed: 100,
            rapid: 100,
            spindle: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideChange {
    FeedReset,
    /// Percentage points, clamped by the planner.
    Feed(i8),
    Rapid(u8),
    SpindleReset,
    Spindle(i8),
}

impl OverrideChange {
    pub const COARSE: i8 = 10;
    pub const FINE: i8 = 1;
    pub const RAPID_OVR1: u8 = 50;
    pub const RAPID_OVR2: u8 = 25;
}

/// Motion verbs offered by the planner and interpolator.
pub trait MotionControl {
    /// Queues a straight move to `target` in machine coordinates.
    fn line_to(&mut self, target: &Axes, block: &MotionBlock) -> Result<(), Status>;

    fn arc_to(&mut self, target: &Axes, arc: &ArcSpec, block: &MotionBlock)
    -> Result<(), Status>;

    /// Waits for queued motion, applies the block's tool state and pauses
    /// for `block.dwell_ms`.
    fn dwell(&mut self, block: &MotionBlock) -> Result<(), Status>;

    fn probe(
        &mut self,
        target: &Axes,
        flags: ProbeFlags,
        block: &MotionBlock,
    ) -> Result<ProbeOutcome, Status>;

    /// Applies spindle and coolant from `block` in planner order.
    fn update_tools(&mut self, block: &MotionBlock) -> Result<(), Status>;

    fn change_tool(&mut self, tool: u8) -> Result<(), Status>;

    /// Sets a servo or PWM output, used by M10.
    fn set_output(&mut self, pin: u8, value: u8);

    /// Runs the homing cycle. On failure the alarm to raise is returned.
    fn home(&mut self) -> Result<(), Alarm>;

    /// Resynchronizes the planner reference with the real-time position.
    fn sync(&mut self);

    /// Stops the interpolator immediately. Position may be lost.
    fn stop(&mut self);

    fn stop_tools(&mut self);

    /// Drops every queued move.
    fn clear(&mut self);

    /// Real-time machine position.
    fn position(&self) -> Axes;

    fn probe_position(&self) -> Axes;

    /// No motion queued or executing.
    fn is_empty(&self) -> bool;

    /// Real-time feed in mm/min.
    fn feed(&self) -> f64;

    fn apply_override(&mut self, change: OverrideChange);

    fn overrides(&self) -> Overrides;

    /// Measured or commanded spindle speed.
    fn tool_speed(&self) -> f64;

    fn set_spindle_speed(&mut self, speed: f64);

    fn toggle_coolant(&mut self, coolant: Coolant);

    /// Spindle and coolant of the last planned block, used to refresh the
    /// tools while nothing is queued.
    fn planned_tools(&self) -> (Spindle, f64, Coolant);

    /// Reapplies the planned coolant after a hold.
    fn restore_coolant(&mut self);

    /// Brings the spindle back to the planned speed after a hold.
    fn restore_spindle(&mut self);

    fn set_check_mode(&mut self, enabled: bool);

    fn check_mode(&self) -> bool;

    /// Blocks for `ms` milliseconds.
    fn delay(&mut self, ms: u32);

    /// Advances the interpolator. Called once per main-loop pass.
    fn run(&mut self);
}

/// Live input levels.
pub trait Inputs {
    fn controls(&self) -> ControlInputs;
    fn limits(&self) -> LimitInputs;
    fn probe_triggered(&self) -> bool;
}

/// A machine provides both motion and inputs.
pub trait Machine: MotionControl + Inputs {}

impl<T: MotionControl + Inputs + ?Sized> Machine for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsKey {
    /// 0 is G54.
    CoordSystem(u8),
    G28,
    G30,
    G92,
    StartupBlock(u8),
}

/// Non-volatile storage.
pub trait SettingsStore {
    fn load(&self, key: SettingsKey) -> Option<Vec<u8>>;
    fn save(&mut self, key: SettingsKey, value: &[u8]);
    fn erase(&mut self, key: SettingsKey);
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<SettingsKey, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self, key: SettingsKey) -> Option<Vec<u8>> {
        self.entries.get(&key).cloned()
    }

    fn save(&mut self, key: SettingsKey, value: &[u8]) {
        self.entries.insert(key, value.to_vec());
    }

    fn erase(&mut self, key: SettingsKey) {
        self.entries.remove(&key);
    }
}

/// Axis vectors are stored as little-endian `f64`, one per axis slot.
pub fn encode_axes(axes: &Axes) -> Vec<u8> {
    axes.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Returns `None` when the stored length does not match.
pub fn decode_axes(bytes: &[u8]) -> Option<Axes> {
    if bytes.len() != MAX_AXES * 8 {
        return None;
    }
    let mut axes = [0.0; MAX_AXES];
    for (slot, chunk) in axes.iter_mut().zip(bytes.chunks_exact(8)) {
        let raw: [u8; 8] = chunk.try_into().ok()?;
        *slot = f64::from_le_bytes(raw);
    }
    Some(axes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_flags_from_modes() {
        assert_eq!(ProbeFlags::from(ProbeMode::Toward), ProbeFlags::empty());
        assert_eq!(
            ProbeFlags::from(ProbeMode::AwayNoError),
            ProbeFlags::AWAY | ProbeFlags::NO_ALARM
        );
        assert_eq!(ProbeFlags::from(ProbeMode::TowardNoError), ProbeFlags::NO_ALARM);
    }

    #[test]
    fn axes_storage_layout() {
        let axes = [1.5, -2.0, 0.25, 0.0, 0.0, 9.0];
        let bytes = encode_axes(&axes);
        assert_eq!(bytes.len(), 48);
        assert_eq!(bytes[..8], 1.5f64.to_le_bytes());
        assert_eq!(decode_axes(&bytes), Some(axes));
        assert_eq!(decode_axes(&bytes[..40]), None);
    }

    #[test]
    fn memory_store() {
        let mut store = MemoryStore::new();
        assert!(store.load(SettingsKey::G28).is_none());
        store.save(SettingsKey::G28, &[1, 2]);
        store.save(SettingsKey::CoordSystem(1), &[3]);
        assert_eq!(store.load(SettingsKey::G28), Some(vec![1, 2]));
        store.erase(SettingsKey::G28);
        assert_eq!(store.len(), 1);
    }
}
