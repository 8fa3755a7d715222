//! Modal groups and the G/M code tables.

use crate::{
    config::ParserConfig,
    state::{
        CannedCycle, Coolant, CutterComp, Distance, FeedMode, ModalState, Motion, PathMode, Plane,
        ProbeMode, ReturnMode, Spindle, Stopping, ToolLength, Units,
    },
    status::Status,
};
use bitflags::bitflags;
use serde::Serialize;

/// A G or M code split into its integer part and decimal class.
///
/// `.0` through `.5` classify as 0 through 5. Any other fraction is
/// [`Code::INVALID_MANTISSA`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Code {
    pub number: u8,
    pub mantissa: u8,
}

impl Code {
    pub const INVALID_MANTISSA: u8 = 255;

    pub fn from_value(value: f64) -> Option<Self> {
        if !(0.0..256.0).contains(&value) {
            return None;
        }
        let number = value.trunc();
        let hundredths = ((value - number) * 100.0).round() as u32;
        let mantissa = match hundredths {
            0 | 10 | 20 | 30 | 40 | 50 => (hundredths / 10) as u8,
            _ => Self::INVALID_MANTISSA,
        };
        Some(Self {
            number: number as u8,
            mantissa,
        })
    }
}

bitflags! {
    /// Modal groups touched by a line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct GroupFlags: u16 {
        const MOTION = 1 << 0;
        const PLANE = 1 << 1;
        const DISTANCE = 1 << 2;
        const FEEDRATE = 1 << 3;
        const UNITS = 1 << 4;
        const CUTTER_RADIUS = 1 << 5;
        const TOOL_LENGTH = 1 << 6;
        const RETURN_MODE = 1 << 7;
        const COORD_SYSTEM = 1 << 8;
        const PATH = 1 << 9;
        const STOPPING = 1 << 10;
        const TOOL_CHANGE = 1 << 11;
        const SPINDLE = 1 << 12;
        const COOLANT = 1 << 13;
        const OVERRIDES = 1 << 14;
        const NON_MODAL = 1 << 15;
    }
}

/// Group 0 codes. They apply to the line they appear on only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NonModal {
    /// G4
    Dwell,
    /// G10
    SetCoordData,
    /// G28
    Home,
    /// G30
    SecondaryHome,
    /// G53
    MachineCoords,
    /// G92
    SetOffset,
    /// G92.1, clears the active and stored offsets.
    ResetOffsets,
    /// G92.2, clears the active offset only.
    SuspendOffset,
    /// G92.3
    RestoreOffset,
}

impl NonModal {
    /// Codes that take ownership of the line's axis words.
    pub fn uses_axis_words(self) -> bool {
        !matches!(self, Self::Dwell | Self::MachineCoords)
    }
}

/// Which groups, non-modal code and extension command a line carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineCommand {
    pub groups: GroupFlags,
    /// M10 or a code claimed by an extension. At most one per line.
    pub extended: Option<u16>,
    pub nonmodal: Option<NonModal>,
    /// Set once a motion or axis-consuming non-modal code has claimed the
    /// axis words.
    pub axis_words_claimed: bool,
}

/// The servo output command, the one built-in extended code.
pub const M10: u16 = 10;

impl LineCommand {
    fn claim(&mut self, groups: GroupFlags) -> Result<(), Status> {
        if self.groups.contains(groups) {
            return Err(Status::ModalGroupViolation);
        }
        self.groups |= groups;
        Ok(())
    }

    fn claim_axis_words(&mut self) -> Result<(), Status> {
        if self.axis_words_claimed {
            return Err(Status::ModalGroupViolation);
        }
        self.axis_words_claimed = true;
        Ok(())
    }

    /// Marks an extension-defined command. Only one per line.
    pub fn set_extended(&mut self, id: u16) -> Result<(), Status> {
        if self.extended.is_some() {
            return Err(Status::ModalGroupViolation);
        }
        self.extended = Some(id);
        Ok(())
    }

    /// Applies a G code to `modes`.
    pub fn g_code(
        &mut self,
        code: Code,
        modes: &mut ModalState,
        config: &ParserConfig,
    ) -> Result<(), Status> {
        let Code { number, mantissa } = code;
        if mantissa != 0 && !matches!(number, 38 | 43 | 59 | 61 | 92) {
            return Err(Status::UnsupportedCommand);
        }

        match number {
            0..=3 | 38 | 80..=89 => {
                let motion = match number {
                    0 => Motion::Rapid,
                    1 => Motion::Linear,
                    2 => Motion::ArcCw,
                    3 => Motion::ArcCcw,
                    38 => Motion::Probe(
                        ProbeMode::from_mantissa(mantissa).ok_or(Status::UnsupportedCommand)?,
                    ),
                    80 => Motion::CancelCycle,
                    n => Motion::Canned(CannedCycle::from_code(n).ok_or(Status::UnsupportedCommand)?),
                };
                if self.axis_words_claimed {
                    return Err(Status::ModalGroupViolation);
                }
                if motion != Motion::CancelCycle {
                    self.axis_words_claimed = true;
                }
                self.claim(GroupFlags::MOTION)?;
                modes.motion = motion;
            }
            17..=19 => {
                self.claim(GroupFlags::PLANE)?;
                modes.plane = match number {
                    17 => Plane::XY,
                    18 => Plane::ZX,
                    _ => Plane::YZ,
                };
            }
            90 | 91 => {
                self.claim(GroupFlags::DISTANCE)?;
                modes.distance = if number == 90 {
                    Distance::Absolute
                } else {
                    Distance::Incremental
                };
            }
            93 | 94 => {
                self.claim(GroupFlags::FEEDRATE)?;
                modes.feed_mode = if number == 93 {
                    FeedMode::InverseTime
                } else {
                    FeedMode::UnitsPerMinute
                };
            }
            20 | 21 => {
                self.claim(GroupFlags::UNITS)?;
                modes.units = if number == 20 {
                    Units::Inches
                } else {
                    Units::Millimeters
                };
            }
            40..=42 => {
                self.claim(GroupFlags::CUTTER_RADIUS)?;
                modes.cutter_comp = match number {
                    40 => CutterComp::Off,
                    41 => CutterComp::Left,
                    _ => CutterComp::Right,
                };
            }
            43 | 49 => {
                if mantissa > 1 {
                    return Err(Status::UnsupportedCommand);
                }
                self.claim(GroupFlags::TOOL_LENGTH)?;
                modes.tool_length = if number == 43 {
                    ToolLength::Dynamic
                } else {
                    ToolLength::Cancel
                };
            }
            98 | 99 => {
                self.claim(GroupFlags::RETURN_MODE)?;
                modes.return_mode = if number == 98 {
                    ReturnMode::InitialLevel
                } else {
                    ReturnMode::RLevel
                };
            }
            54..=59 => {
                if mantissa > 3 {
                    return Err(Status::UnsupportedCommand);
                }
                let index = number - 54 + mantissa;
                if index >= config.coord_system_count {
                    return Err(Status::UnsupportedCoordSys);
                }
                self.claim(GroupFlags::COORD_SYSTEM)?;
                modes.coord_system = index;
            }
            61 | 64 => {
                if mantissa > 1 {
                    return Err(Status::UnsupportedCommand);
                }
                self.claim(GroupFlags::PATH)?;
                modes.path = match (number, mantissa) {
                    (61, 0) => PathMode::ExactPath,
                    (61, _) => PathMode::ExactStop,
                    _ => PathMode::Continuous,
                };
            }
            4 | 10 | 28 | 30 | 53 | 92 => {
                let nonmodal = match (number, mantissa) {
                    (4, _) => NonModal::Dwell,
                    (10, _) => NonModal::SetCoordData,
                    (28, _) => NonModal::Home,
                    (30, _) => NonModal::SecondaryHome,
                    (53, _) => NonModal::MachineCoords,
                    (_, 0) => NonModal::SetOffset,
                    (_, 1) => NonModal::ResetOffsets,
                    (_, 2) => NonModal::SuspendOffset,
                    (_, 3) => NonModal::RestoreOffset,
                    _ => return Err(Status::UnsupportedCommand),
                };
                if nonmodal.uses_axis_words() {
                    self.claim_axis_words()?;
                }
                self.claim(GroupFlags::NON_MODAL)?;
                self.nonmodal = Some(nonmodal);
            }
            _ => return Err(Status::UnsupportedCommand),
        }
        Ok(())
    }

    /// Applies a built-in M code to `modes`.
    pub fn m_code(&mut self, code: Code, modes: &mut ModalState) -> Result<(), Status> {
        let Code { number, mantissa } = code;
        if mantissa != 0 {
            return Err(Status::UnsupportedCommand);
        }

        match number {
            0 | 1 | 2 | 30 | 60 => {
                self.claim(GroupFlags::STOPPING)?;
                modes.stopping = match number {
                    0 => Stopping::Pause,
                    1 => Stopping::OptionalPause,
                    2 => Stopping::End,
                    30 => Stopping::EndRewind,
                    _ => Stopping::PalletPause,
                };
            }
            3..=5 => {
                self.claim(GroupFlags::SPINDLE)?;
                modes.spindle = match number {
                    3 => Spindle::Clockwise,
                    4 => Spindle::CounterClockwise,
                    _ => Spindle::Off,
                };
            }
            6 => self.claim(GroupFlags::TOOL_CHANGE)?,
            // coolant codes accumulate instead of conflicting
            7 => {
                self.groups |= GroupFlags::COOLANT;
                modes.coolant |= Coolant::MIST;
            }
            8 => {
                self.groups |= GroupFlags::COOLANT;
                modes.coolant |= Coolant::FLOOD;
            }
            9 => {
                self.groups |= GroupFlags::COOLANT;
                modes.coolant = Coolant::empty();
            }
            48 | 49 => {
                self.claim(GroupFlags::OVERRIDES)?;
                modes.overrides_enabled = number == 48;
            }
            10 => self.set_extended(M10)?,
            _ => return Err(Status::UnsupportedCommand),
        }
        Ok(())
    }
}
