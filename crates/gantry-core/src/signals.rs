//! Flags shared between the main loop and interrupt-side producers.
//!
//! Producers (input callbacks, the transport reading realtime bytes) only
//! ever set or clear bits here. Everything that acts on those bits runs in
//! the main loop through [`crate::Cnc`].

use bitflags::bitflags;
use std::sync::atomic::{AtomicU8, AtomicU16, Ordering};

bitflags! {
    /// Machine execution state. Several flags can be active at once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct ExecState: u16 {
        /// Motion is being executed.
        const RUN = 1 << 0;
        const HOLD = 1 << 1;
        const JOG = 1 << 2;
        const HOMING = 1 << 3;
        /// Safety door open.
        const DOOR = 1 << 4;
        /// Position is unknown, either never homed or lost by an abrupt stop.
        const UNHOMED = 1 << 5;
        /// A limit switch tripped. Also called the halt flag.
        const LIMITS = 1 << 6;
        const KILL = 1 << 7;
        /// Releasing a hold is restoring tools.
        const RESUMING = 1 << 8;

        const HOMING_HIT = Self::HOMING.bits() | Self::LIMITS.bits();
        const INTERLOCKING_FAIL = Self::LIMITS.bits() | Self::KILL.bits();
        const ALARM = Self::UNHOMED.bits() | Self::INTERLOCKING_FAIL.bits();
        const RESET_LOCKED = Self::ALARM.bits() | Self::DOOR.bits() | Self::HOLD.bits();
        const GCODE_LOCKED = Self::ALARM.bits() | Self::DOOR.bits() | Self::HOMING.bits()
            | Self::JOG.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct RtCommand: u8 {
        const RESET = 1 << 0;
        const CYCLE_START = 1 << 1;
        const REPORT = 1 << 2;
    }
}

bitflags! {
    /// Pending feed and rapid override requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct FeedOverride: u8 {
        const FEED_100 = 1 << 0;
        const FEED_INC_COARSE = 1 << 1;
        const FEED_DEC_COARSE = 1 << 2;
        const FEED_INC_FINE = 1 << 3;
        const FEED_DEC_FINE = 1 << 4;
        const RAPID_100 = 1 << 5;
        const RAPID_OVR1 = 1 << 6;
        const RAPID_OVR2 = 1 << 7;

        const NORMAL = Self::FEED_100.bits() | Self::FEED_INC_COARSE.bits()
            | Self::FEED_DEC_COARSE.bits() | Self::FEED_INC_FINE.bits()
            | Self::FEED_DEC_FINE.bits();
        const RAPID = Self::RAPID_100.bits() | Self::RAPID_OVR1.bits() | Self::RAPID_OVR2.bits();
    }
}

bitflags! {
    /// Pending spindle override and coolant toggle requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct ToolOverride: u8 {
        const SPINDLE_100 = 1 << 0;
        const SPINDLE_INC_COARSE = 1 << 1;
        const SPINDLE_DEC_COARSE = 1 << 2;
        const SPINDLE_INC_FINE = 1 << 3;
        const SPINDLE_DEC_FINE = 1 << 4;
        const SPINDLE_TOGGLE = 1 << 5;
        const FLOOD_TOGGLE = 1 << 6;
        const MIST_TOGGLE = 1 << 7;

        const SPINDLE = Self::SPINDLE_100.bits() | Self::SPINDLE_INC_COARSE.bits()
            | Self::SPINDLE_DEC_COARSE.bits() | Self::SPINDLE_INC_FINE.bits()
            | Self::SPINDLE_DEC_FINE.bits() | Self::SPINDLE_TOGGLE.bits();
        const COOLANT = Self::FLOOD_TOGGLE.bits() | Self::MIST_TOGGLE.bits();
    }
}

bitflags! {
    /// Operator control inputs, active high.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct ControlInputs: u8 {
        const ESTOP = 1 << 0;
        const SAFETY_DOOR = 1 << 1;
        const FEED_HOLD = 1 << 2;
        const CYCLE_START = 1 << 3;
    }
}

bitflags! {
    /// Limit switches, one per axis in `XYZABC` order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct LimitInputs: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const A = 1 << 3;
        const B = 1 << 4;
        const C = 1 << 5;
    }
}

/// Realtime command bytes. They act as soon as they arrive and never enter
/// the line buffer.
pub mod codes {
    pub const RESET: u8 = 0x18;
    pub const FEED_HOLD: u8 = b'!';
    pub const REPORT: u8 = b'?';
    pub const CYCLE_START: u8 = b'~';
    pub const SAFETY_DOOR: u8 = 0x84;
    pub const JOG_CANCEL: u8 = 0x85;
    pub const FEED_100: u8 = 0x90;
    pub const RAPID_OVR2: u8 = 0x97;
    pub const SPINDLE_100: u8 = 0x99;
    pub const SPINDLE_TOGGLE: u8 = 0x9E;
    pub const FLOOD_TOGGLE: u8 = 0xA0;
    pub const MIST_TOGGLE: u8 = 0xA1;
}

/// Returns `true` for bytes handled by [`Signals::call_rt_command`].
pub fn is_realtime(byte: u8) -> bool {
    matches!(
        byte,
        codes::RESET | codes::FEED_HOLD | codes::REPORT | codes::CYCLE_START
    ) || byte >= 0x80
}

/// Lock-free state shared by every producer and the main loop.
#[derive(Debug, Default)]
pub struct Signals {
    exec: AtomicU16,
    rt: AtomicU8,
    feed: AtomicU8,
    tool: AtomicU8,
    controls: AtomicU8,
    limits: AtomicU8,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exec_state(&self) -> ExecState {
        ExecState::from_bits_truncate(self.exec.load(Ordering::Acquire))
    }

    /// The subset of `mask` that is currently set.
    pub fn get(&self, mask: ExecState) -> ExecState {
        self.exec_state() & mask
    }

    pub fn contains(&self, mask: ExecState) -> bool {
        self.exec_state().contains(mask)
    }

    pub fn intersects(&self, mask: ExecState) -> bool {
        self.exec_state().intersects(mask)
    }

    pub fn set(&self, mask: ExecState) {
        self.exec.fetch_or(mask.bits(), Ordering::AcqRel);
    }

    /// Clears bits without any interlocking. The main loop goes through
    /// [`crate::Cnc::clear`] instead.
    pub fn clear_raw(&self, mask: ExecState) {
        self.exec.fetch_and(!mask.bits(), Ordering::AcqRel);
    }

    pub(crate) fn store(&self, state: ExecState) {
        self.exec.store(state.bits(), Ordering::Release);
    }

    pub fn request(&self, command: RtCommand) {
        self.rt.fetch_or(command.bits(), Ordering::AcqRel);
    }

    pub fn pending(&self) -> RtCommand {
        RtCommand::from_bits_truncate(self.rt.load(Ordering::Acquire))
    }

    pub fn take_rt(&self) -> RtCommand {
        RtCommand::from_bits_truncate(self.rt.swap(0, Ordering::AcqRel))
    }

    /// Takes a single pending command, leaving the others queued.
    pub fn take(&self, command: RtCommand) -> bool {
        let previous = self.rt.fetch_and(!command.bits(), Ordering::AcqRel);
        RtCommand::from_bits_truncate(previous).intersects(command)
    }

    pub fn take_feed_overrides(&self) -> FeedOverride {
        FeedOverride::from_bits_truncate(self.feed.swap(0, Ordering::AcqRel))
    }

    pub fn take_tool_overrides(&self) -> ToolOverride {
        ToolOverride::from_bits_truncate(self.tool.swap(0, Ordering::AcqRel))
    }

    /// Drops every pending realtime request.
    pub fn clear_pending(&self) {
        self.rt.store(0, Ordering::Release);
        self.feed.store(0, Ordering::Release);
        self.tool.store(0, Ordering::Release);
    }

    /// Dispatches one realtime byte. Unknown bytes are ignored.
    pub fn call_rt_command(&self, byte: u8) {
        match byte {
            codes::RESET => self.request(RtCommand::RESET),
            codes::FEED_HOLD => self.set(ExecState::HOLD),
            codes::REPORT => self.request(RtCommand::REPORT),
            codes::CYCLE_START => {
                // a held cycle start input would otherwise retrigger itself
                if !self.intersects(ExecState::RESUMING) {
                    self.request(RtCommand::CYCLE_START);
                }
            }
            codes::SAFETY_DOOR => self.set(ExecState::HOLD | ExecState::DOOR),
            codes::JOG_CANCEL => {
                if self.contains(ExecState::JOG | ExecState::RUN) {
                    self.set(ExecState::HOLD);
                }
            }
            codes::FEED_100..=codes::RAPID_OVR2 => {
                self.feed
                    .store(1 << (byte - codes::FEED_100), Ordering::Release);
            }
            codes::SPINDLE_100..=codes::SPINDLE_TOGGLE => {
                let bit = 1 << (byte - codes::SPINDLE_100);
                self.update_tool(|pending| (pending & ToolOverride::COOLANT.bits()) | bit);
            }
            codes::FLOOD_TOGGLE..=codes::MIST_TOGGLE => {
                let bit = ToolOverride::FLOOD_TOGGLE.bits() << (byte - codes::FLOOD_TOGGLE);
                self.update_tool(|pending| (pending & ToolOverride::SPINDLE.bits()) | bit);
            }
            _ => {}
        }
    }

    fn update_tool(&self, f: impl Fn(u8) -> u8) {
        // the closure always returns Some, so this cannot fail
        let _ = self
            .tool
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| Some(f(pending)));
    }

    /// Reacts to a new control input snapshot. Repeated snapshots with no
    /// change are ignored.
    pub fn controls_changed(&self, controls: ControlInputs) {
        let previous = self.controls.swap(controls.bits(), Ordering::AcqRel);
        if previous == controls.bits() {
            return;
        }
        if controls.contains(ControlInputs::ESTOP) {
            self.request(RtCommand::RESET);
            return;
        }
        if controls.contains(ControlInputs::SAFETY_DOOR) {
            self.set(ExecState::HOLD | ExecState::DOOR);
        }
        if controls.contains(ControlInputs::FEED_HOLD) {
            self.set(ExecState::HOLD);
        }
        if controls.contains(ControlInputs::CYCLE_START) {
            self.call_rt_command(codes::CYCLE_START);
        }
    }

    /// Reacts to a new limit snapshot. `armed` is true while hard limits are
    /// enabled or a homing cycle is running. Returns `true` when a limit
    /// tripped and motion has to stop immediately.
    pub fn limits_changed(&self, limits: LimitInputs, armed: bool) -> bool {
        if !armed {
            return false;
        }
        let previous = self.limits.swap(limits.bits(), Ordering::AcqRel);
        if previous == limits.bits() || limits.is_empty() {
            return false;
        }
        self.set(ExecState::LIMITS);
        true
    }
}
