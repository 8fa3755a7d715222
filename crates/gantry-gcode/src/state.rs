//! Modal state carried from one line to the next.

use crate::{config::ParserConfig, status::Status};
use bitflags::bitflags;
use serde::Serialize;
use std::fmt;

/// G38.2 through G38.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeMode {
    /// G38.2
    Toward,
    /// G38.3
    TowardNoError,
    /// G38.4
    Away,
    /// G38.5
    AwayNoError,
}

impl ProbeMode {
    pub fn from_mantissa(mantissa: u8) -> Option<Self> {
        match mantissa {
            2 => Some(Self::Toward),
            3 => Some(Self::TowardNoError),
            4 => Some(Self::Away),
            5 => Some(Self::AwayNoError),
            _ => None,
        }
    }

    pub fn mantissa(self) -> u8 {
        match self {
            Self::Toward => 2,
            Self::TowardNoError => 3,
            Self::Away => 4,
            Self::AwayNoError => 5,
        }
    }

    /// Probe succeeds when contact is lost instead of made.
    pub fn is_away(self) -> bool {
        self.mantissa() > 3
    }

    /// A probe that never changes state raises an alarm.
    pub fn raises_alarm(self) -> bool {
        self.mantissa() % 2 == 0
    }
}

/// G81 through G89.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CannedCycle {
    Drill,
    DrillDwell,
    PeckDrill,
    Tap,
    Bore,
    BoreSpindleStop,
    BackBore,
    BoreManual,
    BoreDwell,
}

impl CannedCycle {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            81 => Self::Drill,
            82 => Self::DrillDwell,
            83 => Self::PeckDrill,
            84 => Self::Tap,
            85 => Self::Bore,
            86 => Self::BoreSpindleStop,
            87 => Self::BackBore,
            88 => Self::BoreManual,
            89 => Self::BoreDwell,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Drill => 81,
            Self::DrillDwell => 82,
            Self::PeckDrill => 83,
            Self::Tap => 84,
            Self::Bore => 85,
            Self::BoreSpindleStop => 86,
            Self::BackBore => 87,
            Self::BoreManual => 88,
            Self::BoreDwell => 89,
        }
    }

    /// Cycles that dwell at the bottom and therefore need `P`.
    pub fn requires_dwell(self) -> bool {
        matches!(
            self,
            Self::DrillDwell | Self::BoreSpindleStop | Self::BoreManual | Self::BoreDwell
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Motion {
    Rapid,
    Linear,
    ArcCw,
    ArcCcw,
    Probe(ProbeMode),
    CancelCycle,
    Canned(CannedCycle),
}

impl Motion {
    /// G0 and G1 are the only modes allowed alongside G53.
    pub fn is_straight(self) -> bool {
        matches!(self, Self::Rapid | Self::Linear)
    }

    pub fn is_arc(self) -> bool {
        matches!(self, Self::ArcCw | Self::ArcCcw)
    }

    pub fn canned_cycle(self) -> Option<CannedCycle> {
        match self {
            Self::Canned(cycle) => Some(cycle),
            _ => None,
        }
    }
}

impl fmt::Display for Motion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rapid => f.write_str("G0"),
            Self::Linear => f.write_str("G1"),
            Self::ArcCw => f.write_str("G2"),
            Self::ArcCcw => f.write_str("G3"),
            Self::Probe(mode) => write!(f, "G38.{}", mode.mantissa()),
            Self::CancelCycle => f.write_str("G80"),
            Self::Canned(cycle) => write!(f, "G{}", cycle.code()),
        }
    }
}

/// Active plane for arcs and canned cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Plane {
    /// G17
    XY,
    /// G18
    ZX,
    /// G19
    YZ,
}

impl Plane {
    /// The two in-plane axes in arc order, followed by the linear axis.
    pub fn axes(self) -> (usize, usize, usize) {
        match self {
            Self::XY => (0, 1, 2),
            Self::ZX => (2, 0, 1),
            Self::YZ => (1, 2, 0),
        }
    }

    /// `I`/`J`/`K` slots matching [`Plane::axes`].
    pub fn offsets(self) -> (usize, usize) {
        match self {
            Self::XY => (0, 1),
            Self::ZX => (2, 0),
            Self::YZ => (1, 2),
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::XY => "G17",
            Self::ZX => "G18",
            Self::YZ => "G19",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Distance {
    Absolute,
    Incremental,
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Absolute => "G90",
            Self::Incremental => "G91",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedMode {
    InverseTime,
    UnitsPerMinute,
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InverseTime => "G93",
            Self::UnitsPerMinute => "G94",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Units {
    Inches,
    Millimeters,
}

impl Units {
    pub const MM_PER_INCH: f64 = 25.4;
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inches => "G20",
            Self::Millimeters => "G21",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CutterComp {
    Off,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToolLength {
    /// G43 and G43.1
    Dynamic,
    /// G49
    Cancel,
}

impl fmt::Display for ToolLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dynamic => "G43",
            Self::Cancel => "G49",
        })
    }
}

/// Retract target for canned cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReturnMode {
    /// G98, back to the starting height.
    InitialLevel,
    /// G99, back to `R`.
    RLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PathMode {
    /// G61
    ExactPath,
    /// G61.1
    ExactStop,
    /// G64
    Continuous,
}

impl fmt::Display for PathMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExactPath => "G61",
            Self::ExactStop => "G61.1",
            Self::Continuous => "G64",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stopping {
    Continue,
    /// M0
    Pause,
    /// M1
    OptionalPause,
    /// M2
    End,
    /// M30
    EndRewind,
    /// M60
    PalletPause,
}

impl Stopping {
    pub fn ends_program(self) -> bool {
        matches!(self, Self::End | Self::EndRewind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Spindle {
    Off,
    Clockwise,
    CounterClockwise,
}

impl fmt::Display for Spindle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clockwise => "M3",
            Self::CounterClockwise => "M4",
            Self::Off => "M5",
        })
    }
}

bitflags! {
    /// Coolant outputs. M7 and M8 accumulate on the same line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Coolant: u8 {
        /// M8
        const FLOOD = 1 << 0;
        /// M7
        const MIST = 1 << 1;
    }
}

/// The active code of every modal group.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalState {
    pub motion: Motion,
    pub plane: Plane,
    pub distance: Distance,
    pub feed_mode: FeedMode,
    pub units: Units,
    pub cutter_comp: CutterComp,
    pub tool_length: ToolLength,
    /// 0 is G54, 6 is G59.1.
    pub coord_system: u8,
    pub path: PathMode,
    pub return_mode: ReturnMode,
    pub stopping: Stopping,
    pub spindle: Spindle,
    pub coolant: Coolant,
    /// M48 enables the override inputs, M49 locks them at 100%.
    pub overrides_enabled: bool,
}

impl Default for ModalState {
    fn default() -> Self {
        Self {
            motion: Motion::Linear,
            plane: Plane::XY,
            distance: Distance::Absolute,
            feed_mode: FeedMode::UnitsPerMinute,
            units: Units::Millimeters,
            cutter_comp: CutterComp::Off,
            tool_length: ToolLength::Cancel,
            coord_system: 0,
            path: PathMode::ExactPath,
            return_mode: ReturnMode::InitialLevel,
            stopping: Stopping::Continue,
            spindle: Spindle::Off,
            coolant: Coolant::empty(),
            overrides_enabled: true,
        }
    }
}

/// Formats a coordinate system index as its G code, `G54` through `G59.3`.
pub fn coord_system_code(index: u8) -> String {
    if index < 6 {
        format!("G{}", 54 + index)
    } else {
        format!("G59.{}", index - 5)
    }
}

/// Everything the parser remembers between lines.
///
/// A line is parsed into a copy of this state; the copy only replaces the
/// committed one after the line executes successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserState {
    pub modes: ModalState,
    pub feed: f64,
    pub spindle_speed: f64,
    /// Tool picked by the last `T` word.
    pub tool: u8,
    /// Tool loaded by the last M6.
    pub active_tool: u8,
    user_vars: Vec<f64>,
}

impl ParserState {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            modes: ModalState::default(),
            feed: 0.0,
            spindle_speed: 0.0,
            tool: config.default_tool,
            active_tool: config.default_tool,
            user_vars: vec![0.0; usize::from(config.max_user_vars)],
        }
    }

    /// Restores power-on modes. Feed, speed and user variables survive.
    pub fn reset(&mut self, config: &ParserConfig) {
        self.modes = ModalState::default();
        self.tool = config.default_tool;
        self.active_tool = config.default_tool;
    }

    /// Clears a pending M0/M1/M2/M30/M60.
    pub fn reset_stopping(&mut self) {
        self.modes.stopping = Stopping::Continue;
    }

    /// Drops the previous line's stop unless this line asserts one again.
    /// After M2 or M30 nothing runs until the parser is reset.
    pub fn carry_stopping(&mut self, reasserted: bool) -> Result<(), Status> {
        if reasserted || self.modes.stopping == Stopping::Continue {
            return Ok(());
        }
        if self.modes.stopping.ends_program() {
            return Err(Status::ProgramEnded);
        }
        self.reset_stopping();
        Ok(())
    }

    /// Reads `#index`; unset and out-of-range variables read as zero.
    pub fn user_var(&self, index: u16) -> f64 {
        usize::from(index)
            .checked_sub(1)
            .and_then(|slot| self.user_vars.get(slot))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set_user_var(&mut self, index: u16, value: f64) -> bool {
        match usize::from(index)
            .checked_sub(1)
            .and_then(|slot| self.user_vars.get_mut(slot))
        {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// The `$G` modal summary without its brackets.
impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.modes;
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            m.motion,
            m.plane,
            m.distance,
            m.feed_mode,
            m.units,
            m.tool_length,
            coord_system_code(m.coord_system),
            m.path,
            m.spindle
        )?;
        if m.coolant.is_empty() {
            f.write_str(" M9")?;
        }
        if m.coolant.contains(Coolant::MIST) {
            f.write_str(" M7")?;
        }
        if m.coolant.contains(Coolant::FLOOD) {
            f.write_str(" M8")?;
        }
        write!(
            f,
            " {} T{} F{} S{}",
            if m.overrides_enabled { "M48" } else { "M49" },
            self.tool,
            self.feed as u32,
            self.spindle_speed as u32
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_modes_match_power_on() {
        let config = ParserConfig::default();
        let state = ParserState::new(&config);
        assert_eq!(
            state.to_string(),
            "G1 G17 G90 G94 G21 G49 G54 G61 M5 M9 M48 T0 F0 S0"
        );
    }

    #[test]
    fn reset_keeps_feed_and_user_vars() {
        let config = ParserConfig::default();
        let mut state = ParserState::new(&config);
        state.feed = 250.0;
        state.modes.units = Units::Inches;
        assert!(state.set_user_var(3, 1.5));
        state.reset(&config);
        assert_eq!(state.modes.units, Units::Millimeters);
        assert_eq!(state.feed, 250.0);
        assert_eq!(state.user_var(3), 1.5);
    }

    #[test]
    fn user_vars_are_bounded() {
        let config = ParserConfig::default();
        let mut state = ParserState::new(&config);
        assert!(!state.set_user_var(0, 1.0));
        assert!(!state.set_user_var(51, 1.0));
        assert_eq!(state.user_var(51), 0.0);
    }

    #[test]
    fn program_end_sticks_until_reset() {
        let config = ParserConfig::default();
        let mut state = ParserState::new(&config);
        state.modes.stopping = Stopping::Pause;
        state.carry_stopping(false).unwrap();
        assert_eq!(state.modes.stopping, Stopping::Continue);

        state.modes.stopping = Stopping::EndRewind;
        assert_eq!(state.carry_stopping(false), Err(Status::ProgramEnded));
        assert!(state.carry_stopping(true).is_ok());
        state.reset_stopping();
        assert!(state.carry_stopping(false).is_ok());
    }

    #[test]
    fn probe_modes_follow_mantissa() {
        let away = ProbeMode::from_mantissa(5).unwrap();
        assert!(away.is_away());
        assert!(!away.raises_alarm());
        let toward = ProbeMode::from_mantissa(2).unwrap();
        assert!(!toward.is_away());
        assert!(toward.raises_alarm());
        assert_eq!(ProbeMode::from_mantissa(1), None);
    }

    #[test]
    fn coolant_and_high_coord_systems_render() {
        let config = ParserConfig::default();
        let mut state = ParserState::new(&config);
        state.modes.coolant = Coolant::FLOOD | Coolant::MIST;
        state.modes.coord_system = 7;
        state.modes.motion = Motion::Probe(ProbeMode::Toward);
        assert_eq!(
            state.to_string(),
            "G38.2 G17 G90 G94 G21 G49 G59.2 G61 M5 M7 M8 M48 T0 F0 S0"
        );
    }
}
