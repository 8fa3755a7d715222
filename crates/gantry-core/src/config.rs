use gantry_gcode::{ParserConfig, WordFlags};

/// Runtime machine shape and behavior switches.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineConfig {
    pub parser: ParserConfig,
    pub hard_limits: bool,
    pub homing: bool,
    /// Spindle is a laser: no spindle settle delays, beam off on rapids.
    pub laser_mode: bool,
    /// Axes that always move incrementally, such as endless rotaries.
    pub force_relative: WordFlags,
    /// M1 pauses only when set.
    pub optional_stop: bool,
    /// Dwell after a spindle speed or direction change.
    pub spindle_delay_ms: u16,
    pub coolant_resume_delay_ms: u32,
    pub spindle_resume_delay_ms: u32,
    /// Wait for the measured spindle speed to come within this percentage
    /// of the commanded one.
    pub tool_speed_tolerance_percent: Option<u8>,
    pub startup_blocks: u8,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            parser: ParserConfig::default(),
            hard_limits: false,
            homing: false,
            laser_mode: false,
            force_relative: WordFlags::empty(),
            optional_stop: false,
            spindle_delay_ms: 0,
            coolant_resume_delay_ms: 1000,
            spindle_resume_delay_ms: 4000,
            tool_speed_tolerance_percent: None,
            startup_blocks: 2,
        }
    }
}
