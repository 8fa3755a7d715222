//! Numbered parameters readable through `#n`.

use crate::{AXIS_LETTERS, MAX_AXES, config::ParserConfig, state::ParserState};

/// A decoded `#n` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    /// `#1` onward, up to the configured user variable count.
    User(u16),
    /// 5061-5066
    ProbePosition(usize),
    /// 5070
    ProbeSucceeded,
    /// 5161-5166
    G28(usize),
    /// 5181-5186
    G30(usize),
    /// 5211-5216, the stored G92 offset.
    G92(usize),
    /// 5220, 1 for G54.
    CoordSystemNumber,
    /// 5221 onward in strides of 20.
    CoordSystem { index: u8, axis: usize },
    /// 5400
    Tool,
    /// 5401
    ToolLengthOffset,
    /// 5421-5426, last commanded machine position.
    Position(usize),
    /// Any other index from 5000 up. Reads as zero.
    Unassigned,
}

impl Parameter {
    /// Decodes an index. Returns `None` for indices that are not integral,
    /// below 1, or between the user variables and 5000.
    pub fn decode(index: f64, config: &ParserConfig) -> Option<Self> {
        if index < 1.0 || index.fract() != 0.0 {
            return None;
        }
        if index > f64::from(u16::MAX) {
            return Some(Self::Unassigned);
        }
        let n = index as u16;
        if n <= config.max_user_vars {
            return Some(Self::User(n));
        }
        if n < 5000 {
            return None;
        }

        let axes = config.axis_count.min(MAX_AXES);
        let axis = |base: u16| -> Option<usize> {
            let slot = usize::from(n - base);
            (1..=axes).contains(&slot).then(|| slot - 1)
        };

        let decoded = match n {
            5061..=5069 => axis(5060).map(Self::ProbePosition),
            5070 => Some(Self::ProbeSucceeded),
            5161..=5169 => axis(5160).map(Self::G28),
            5181..=5189 => axis(5180).map(Self::G30),
            5211..=5219 => axis(5210).map(Self::G92),
            5220 => Some(Self::CoordSystemNumber),
            5221..=5399 => {
                let rel = n - 5221;
                let index = (rel / 20) as u8;
                let axis = usize::from(rel % 20);
                (axis < axes && index < config.coord_system_count)
                    .then_some(Self::CoordSystem { index, axis })
            }
            5400 => Some(Self::Tool),
            5401 => Some(Self::ToolLengthOffset),
            5421..=5429 => axis(5420).map(Self::Position),
            _ => None,
        };
        Some(decoded.unwrap_or(Self::Unassigned))
    }
}

/// Predefined names with no backing value. They read as zero.
const UNASSIGNED_NAMES: &[&str] = &[
    "_VMAJOR",
    "_VMINOR",
    "_LINE",
    "_MOTION_MODE",
    "_PLANE",
    "_CCOMP",
    "_METRIC",
    "_IMPERIAL",
    "_ABSOLUTE",
    "_INCREMENTAL",
    "_INVERSE_TIME",
    "_UNITS_PER_MINUTE",
    "_UNITS_PER_REV",
    "_RETRACT_R_PLANE",
    "_RETRACT_OLD_Z",
    "_SPINDLE_RPM_MODE",
    "_SPINDLE_CSS_MODE",
    "_IJK_ABSOLUTE_MODE",
    "_LATHE_DIAMETER_MODE",
    "_LATHE_RADIUS_MODE",
    "_SPINDLE_ON",
    "_SPINDLE_CW",
    "_MIST",
    "_FLOOD",
    "_SPEED_OVERRIDE",
    "_FEED_OVERRIDE",
    "_ADAPTIVE_FEED",
    "_FEED_HOLD",
    "_FEED",
    "_RPM",
    "_U",
    "_V",
    "_W",
    "_ABS_X",
    "_ABS_Y",
    "_ABS_Z",
    "_ABS_A",
    "_ABS_B",
    "_ABS_C",
    "_CURRENT_POCKET",
    "_SELECTED_TOOL",
    "_SELECTED_POCKET",
    "_VALUE",
    "_VALUE_RETURNED",
    "_TASK",
    "_CALL_LEVEL",
    "_REMAP_LEVEL",
];

impl Parameter {
    /// Resolves a `#<name>` parameter, ignoring case. Returns `None` for
    /// names that are not predefined.
    pub fn named(name: &str, config: &ParserConfig) -> Option<Self> {
        let name = name.to_ascii_uppercase();
        let axes = config.axis_count.min(MAX_AXES);
        let parameter = match name.as_str() {
            "_COORD_SYSTEM" => Self::CoordSystemNumber,
            "_TOOL_OFFSET" => Self::ToolLengthOffset,
            "_CURRENT_TOOL" => Self::Tool,
            other => {
                let mut letters = other.strip_prefix('_').unwrap_or_default().chars();
                let axis = match (letters.next(), letters.next()) {
                    (Some(letter), None) => AXIS_LETTERS.iter().position(|&l| l == letter),
                    _ => None,
                };
                match axis {
                    Some(axis) if axis < axes => Self::Position(axis),
                    Some(_) => Self::Unassigned,
                    None if UNASSIGNED_NAMES.contains(&other) => Self::Unassigned,
                    None => return None,
                }
            }
        };
        Some(parameter)
    }
}

/// Source of parameter values for expression evaluation.
pub trait Parameters {
    fn read(&self, parameter: Parameter) -> f64;
}

/// Standalone parsing only knows the parser's own state. Machine-side
/// parameters read as zero.
impl Parameters for ParserState {
    fn read(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::User(index) => self.user_var(index),
            Parameter::CoordSystemNumber => f64::from(self.modes.coord_system) + 1.0,
            Parameter::Tool => f64::from(self.tool),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(index: f64) -> Option<Parameter> {
        Parameter::decode(index, &ParserConfig::default())
    }

    #[test]
    fn user_range_and_gap() {
        assert_eq!(decode(1.0), Some(Parameter::User(1)));
        assert_eq!(decode(50.0), Some(Parameter::User(50)));
        assert_eq!(decode(51.0), None);
        assert_eq!(decode(4999.0), None);
        assert_eq!(decode(0.0), None);
        assert_eq!(decode(2.5), None);
    }

    #[test]
    fn coordinate_system_stride() {
        assert_eq!(
            decode(5221.0),
            Some(Parameter::CoordSystem { index: 0, axis: 0 })
        );
        assert_eq!(
            decode(5243.0),
            Some(Parameter::CoordSystem { index: 1, axis: 2 })
        );
        // G59.1 is beyond the default six systems
        assert_eq!(decode(5341.0), Some(Parameter::Unassigned));
    }

    #[test]
    fn axis_parameters_respect_axis_count() {
        assert_eq!(decode(5063.0), Some(Parameter::ProbePosition(2)));
        assert_eq!(decode(5064.0), Some(Parameter::Unassigned));
        assert_eq!(decode(5421.0), Some(Parameter::Position(0)));
        assert_eq!(decode(5070.0), Some(Parameter::ProbeSucceeded));
        assert_eq!(decode(6000.0), Some(Parameter::Unassigned));
    }

    #[test]
    fn axis_count_is_capped() {
        let config = ParserConfig {
            axis_count: 12,
            ..ParserConfig::default()
        };
        let decode = |index| Parameter::decode(index, &config);
        assert_eq!(decode(5066.0), Some(Parameter::ProbePosition(5)));
        assert_eq!(decode(5067.0), Some(Parameter::Unassigned));
        assert_eq!(decode(5426.0), Some(Parameter::Position(5)));
        assert_eq!(decode(5427.0), Some(Parameter::Unassigned));
        assert_eq!(decode(5227.0), Some(Parameter::Unassigned));
    }

    #[test]
    fn named_parameters() {
        let config = ParserConfig::default();
        let named = |name| Parameter::named(name, &config);
        assert_eq!(named("_x"), Some(Parameter::Position(0)));
        assert_eq!(named("_Z"), Some(Parameter::Position(2)));
        assert_eq!(named("_a"), Some(Parameter::Unassigned));
        assert_eq!(named("_Coord_System"), Some(Parameter::CoordSystemNumber));
        assert_eq!(named("_tool_offset"), Some(Parameter::ToolLengthOffset));
        assert_eq!(named("_current_tool"), Some(Parameter::Tool));
        assert_eq!(named("_feed"), Some(Parameter::Unassigned));
        assert_eq!(named("_xy"), None);
        assert_eq!(named("x"), None);
        assert_eq!(named("_depth"), None);
    }
}
