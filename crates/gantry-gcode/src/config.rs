/// Axis slots addressed by G-code words, in `XYZABC` order.
pub const MAX_AXES: usize = 6;

pub const AXIS_LETTERS: [char; MAX_AXES] = ['X', 'Y', 'Z', 'A', 'B', 'C'];

/// G54 through G59.3.
pub const MAX_COORD_SYSTEMS: u8 = 9;

/// One value per axis slot. Slots past the configured axis count stay zero.
pub type Axes = [f64; MAX_AXES];

/// Machine shape as seen by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserConfig {
    /// Number of axis letters accepted, starting from `X`.
    pub axis_count: usize,
    /// Highest valid `T` word.
    pub tool_count: u8,
    /// Number of selectable work coordinate systems (G54 onward).
    pub coord_system_count: u8,
    /// Highest user variable index, `#1` onward.
    pub max_user_vars: u16,
    /// Length offset per tool, indexed from tool 1.
    pub tool_length_offsets: Vec<f64>,
    /// Tool selected after a parser reset.
    pub default_tool: u8,
    /// Longest accepted line in bytes.
    pub line_buffer: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            axis_count: 3,
            tool_count: 16,
            coord_system_count: 6,
            max_user_vars: 50,
            tool_length_offsets: vec![0.0; 16],
            default_tool: 0,
            line_buffer: 256,
        }
    }
}

impl ParserConfig {
    /// Length offset for a 1-based tool number. Tool 0 and unknown tools have none.
    pub fn tool_length_offset(&self, tool: u8) -> f64 {
        if tool == 0 {
            return 0.0;
        }
        self.tool_length_offsets
            .get(usize::from(tool) - 1)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn axis_letters(&self) -> &[char] {
        &AXIS_LETTERS[..self.axis_count.min(MAX_AXES)]
    }
}
