use crate::offsets::Offsets;
use gantry_gcode::{Axes, Parameter, Parameters, ParserState};

/// `#n` reads against the live machine state.
#[derive(Debug, Clone, Copy)]
pub struct ParamView<'a> {
    pub state: &'a ParserState,
    pub offsets: &'a Offsets,
    pub position: &'a Axes,
}

impl Parameters for ParamView<'_> {
    fn read(&self, parameter: Parameter) -> f64 {
        let offsets = self.offsets;
        match parameter {
            Parameter::User(index) => self.state.user_var(index),
            Parameter::ProbePosition(axis) => offsets.probe_position[axis],
            Parameter::ProbeSucceeded => f64::from(u8::from(offsets.probe_succeeded)),
            Parameter::G28(axis) => offsets.g28[axis],
            Parameter::G30(axis) => offsets.g30[axis],
            Parameter::G92(axis) => offsets.g92_permanent[axis],
            Parameter::CoordSystemNumber => f64::from(offsets.active) + 1.0,
            Parameter::CoordSystem { index, axis } => offsets.stored(index)[axis],
            Parameter::Tool => f64::from(self.state.tool),
            Parameter::ToolLengthOffset => offsets.tool_length,
            Parameter::Position(axis) => self.position[axis],
            Parameter::Unassigned => 0.0,
        }
    }
}
