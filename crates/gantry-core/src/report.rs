//! Status report contents. Formatting belongs to the protocol layer.

use crate::{
    hal::Overrides,
    signals::{ControlInputs, ExecState, LimitInputs},
};
use gantry_gcode::{Axes, Coolant, Spindle};
use std::fmt;

/// Reports between forced work-offset and override refreshes.
pub const REPORT_REFRESH: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Alarm,
    Check,
    /// 0 closed and resumable, 1 open and stopped, 2 open while stopping,
    /// 3 closed while stopping.
    Door(u8),
    /// 0 stopped, 1 decelerating.
    Hold(u8),
    Home,
    Jog,
    Run,
    Idle,
}

impl MachineState {
    /// The most severe active flag wins.
    pub fn from_flags(state: ExecState, controls: ControlInputs, check_mode: bool) -> Self {
        let running = state.contains(ExecState::RUN);
        if check_mode && !state.intersects(ExecState::ALARM) {
            return Self::Check;
        }
        if state.intersects(ExecState::KILL) {
            Self::Alarm
        } else if state.intersects(ExecState::LIMITS) {
            Self::Alarm
        } else if state.intersects(ExecState::UNHOMED) {
            Self::Alarm
        } else if state.intersects(ExecState::DOOR) {
            let open = controls.contains(ControlInputs::SAFETY_DOOR);
            Self::Door(match (open, running) {
                (true, false) => 1,
                (true, true) => 2,
                (false, true) => 3,
                (false, false) => 0,
            })
        } else if state.intersects(ExecState::HOMING) {
            Self::Home
        } else if state.intersects(ExecState::JOG) {
            Self::Jog
        } else if state.intersects(ExecState::HOLD) {
            Self::Hold(u8::from(running))
        } else if state.intersects(ExecState::RUN | ExecState::RESUMING) {
            Self::Run
        } else {
            Self::Idle
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alarm => f.write_str("Alarm"),
            Self::Check => f.write_str("Check"),
            Self::Door(code) => write!(f, "Door:{code}"),
            Self::Hold(code) => write!(f, "Hold:{code}"),
            Self::Home => f.write_str("Home"),
            Self::Jog => f.write_str("Jog"),
            Self::Run => f.write_str("Run"),
            Self::Idle => f.write_str("Idle"),
        }
    }
}

/// Active input pins, `Pn:` in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pins {
    pub controls: ControlInputs,
    pub limits: LimitInputs,
    pub probe: bool,
}

impl Pins {
    pub fn is_empty(&self) -> bool {
        !self
            .controls
            .intersects(ControlInputs::ESTOP | ControlInputs::SAFETY_DOOR | ControlInputs::FEED_HOLD)
            && self.limits.is_empty()
            && !self.probe
    }
}

impl fmt::Display for Pins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let controls = [
            (ControlInputs::ESTOP, 'R'),
            (ControlInputs::SAFETY_DOOR, 'D'),
            (ControlInputs::FEED_HOLD, 'H'),
        ];
        for (flag, letter) in controls {
            if self.controls.contains(flag) {
                write!(f, "{letter}")?;
            }
        }
        if self.probe {
            f.write_str("P")?;
        }
        let limits = [
            (LimitInputs::X, 'X'),
            (LimitInputs::Y, 'Y'),
            (LimitInputs::Z, 'Z'),
            (LimitInputs::A, 'A'),
            (LimitInputs::B, 'B'),
            (LimitInputs::C, 'C'),
        ];
        for (flag, letter) in limits {
            if self.limits.contains(flag) {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

/// Spindle and coolant outputs, `A:` in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accessories {
    pub spindle: Spindle,
    pub coolant: Coolant,
}

impl Accessories {
    pub fn is_empty(&self) -> bool {
        self.spindle == Spindle::Off && self.coolant.is_empty()
    }
}

impl fmt::Display for Accessories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.spindle {
            Spindle::Clockwise => f.write_str("S")?,
            Spindle::CounterClockwise => f.write_str("C")?,
            Spindle::Off => {}
        }
        if self.coolant.contains(Coolant::FLOOD) {
            f.write_str("F")?;
        }
        if self.coolant.contains(Coolant::MIST) {
            f.write_str("M")?;
        }
        Ok(())
    }
}

/// The optional last field of a report. At most one is sent per report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportTail {
    None,
    WorkOffset(Axes),
    Overrides {
        overrides: Overrides,
        accessories: Accessories,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: MachineState,
    /// Machine coordinates in millimeters.
    pub position: Axes,
    pub feed: f64,
    pub spindle_speed: f64,
    pub pins: Pins,
    pub tail: ReportTail,
}

/// Decides which tail a report carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportCounters {
    work_offset: u8,
    overrides: u8,
}

impl ReportCounters {
    /// Counters start at zero so the first report carries the work offset
    /// and the second the overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns which tail the next report should carry.
    pub fn next(&mut self, offset_changed: bool) -> TailKind {
        if offset_changed {
            self.work_offset = 0;
        }
        if self.work_offset == 0 {
            self.work_offset = REPORT_REFRESH;
            return TailKind::WorkOffset;
        }
        self.work_offset -= 1;

        if self.overrides == 0 {
            self.overrides = REPORT_REFRESH;
            return TailKind::Overrides;
        }
        self.overrides -= 1;
        TailKind::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailKind {
    None,
    WorkOffset,
    Overrides,
}
