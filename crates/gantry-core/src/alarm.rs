use gantry_gcode::{Axes, Status};
use thiserror::Error;

/// Conditions that kill motion and need an unlock or reset to clear.
///
/// Codes are signed: negative alarms are resets and are never reported
/// with `ALARM:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Alarm {
    #[error("soft reset")]
    SoftReset,
    #[error("emergency stop")]
    EmergencyStop,
    #[error("hard limit triggered")]
    HardLimit,
    #[error("soft limit exceeded")]
    SoftLimit,
    #[error("reset while in motion")]
    AbortCycle,
    #[error("probe already in the expected state")]
    ProbeFailInitial,
    #[error("probe made no contact")]
    ProbeFailContact,
    #[error("reset during homing")]
    HomingFailReset,
    #[error("door opened during homing")]
    HomingFailDoor,
    #[error("homing pull-off failed to clear the limit")]
    HomingFailPulloff,
    #[error("homing switch not found")]
    HomingFailApproach,
    #[error("dual axis homing failed")]
    HomingFailDualApproach,
    #[error("limit switch active at start of homing")]
    HomingFailLimitActive,
    #[error("spindle failed to reach speed")]
    SpindleSyncFail,
    #[error("hard limit triggered with no motion")]
    HardLimitNoMotion,
}

impl Alarm {
    pub const fn code(self) -> i8 {
        match self {
            Alarm::SoftReset => -2,
            Alarm::EmergencyStop => -1,
            Alarm::HardLimit => 1,
            Alarm::SoftLimit => 2,
            Alarm::AbortCycle => 3,
            Alarm::ProbeFailInitial => 4,
            Alarm::ProbeFailContact => 5,
            Alarm::HomingFailReset => 6,
            Alarm::HomingFailDoor => 7,
            Alarm::HomingFailPulloff => 8,
            Alarm::HomingFailApproach => 9,
            Alarm::HomingFailDualApproach => 10,
            Alarm::HomingFailLimitActive => 11,
            Alarm::SpindleSyncFail => 12,
            Alarm::HardLimitNoMotion => 13,
        }
    }

    /// Alarms below [`Alarm::ProbeFailInitial`] invalidate the machine
    /// position and force a full reset.
    pub fn needs_reset(self) -> bool {
        self.code() < Alarm::ProbeFailInitial.code()
    }

    pub fn is_reported(self) -> bool {
        self.code() > 0
    }
}

/// `[MSG:...]` feedback texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feedback {
    ResetToContinue,
    Unlock,
    Unlocked,
    Enabled,
    Disabled,
    CheckDoor,
    CheckLimits,
    ProgramEnd,
    RestoringDefaults,
    RestoringSpindle,
    CheckEmergencyStop,
}

impl Feedback {
    pub fn as_str(self) -> &'static str {
        match self {
            Feedback::ResetToContinue => "Reset to continue",
            Feedback::Unlock => "'$H'|'$X' to unlock",
            Feedback::Unlocked => "Caution: Unlocked",
            Feedback::Enabled => "Enabled",
            Feedback::Disabled => "Disabled",
            Feedback::CheckDoor => "Check Door",
            Feedback::CheckLimits => "Check Limits",
            Feedback::ProgramEnd => "Pgm End",
            Feedback::RestoringDefaults => "Restoring defaults",
            Feedback::RestoringSpindle => "Restoring spindle",
            Feedback::CheckEmergencyStop => "Check Emergency stop",
        }
    }
}

/// Out-of-band output produced by the state machine and the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Alarm(Alarm),
    Feedback(Feedback),
    /// `(MSG,...)` comment text.
    Text(String),
    /// Probe result in machine coordinates.
    Probe { position: Axes, success: bool },
    /// Outcome of a stored startup line.
    StartupLine { line: String, result: Result<(), Status> },
    /// A status report was requested.
    StatusReport,
    /// Sent after every reset.
    Banner,
}
