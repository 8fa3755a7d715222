use anyhow::{Context, Result};
use gantry_core::MachineConfig;
use gantry_gcode::{AXIS_LETTERS, MAX_AXES, MAX_COORD_SYSTEMS, ParserConfig, WordFlags};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Machine configuration for the Gantry runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Machine shape
    #[serde(default)]
    pub machine: MachineSection,

    /// Motion and safety switches
    #[serde(default)]
    pub motion: MotionSection,

    /// Tool table and spindle timing
    #[serde(default)]
    pub tools: ToolsSection,

    /// Lines run after every unlock from reset
    #[serde(default)]
    pub startup: StartupSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSection {
    /// Number of axes, counted from X in `XYZABC` order
    #[serde(default = "default_axis_count")]
    pub axis_count: usize,

    /// Highest valid tool number
    #[serde(default = "default_tool_count")]
    pub tool_count: u8,

    /// Number of work coordinate systems, G54 onward
    #[serde(default = "default_coord_system_count")]
    pub coord_system_count: u8,

    /// Number of `#n` user variables
    #[serde(default = "default_max_user_vars")]
    pub max_user_vars: u16,

    /// Longest accepted line in bytes
    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,

    /// Tool selected after a reset
    #[serde(default)]
    pub default_tool: u8,
}

impl Default for MachineSection {
    fn default() -> Self {
        Self {
            axis_count: default_axis_count(),
            tool_count: default_tool_count(),
            coord_system_count: default_coord_system_count(),
            max_user_vars: default_max_user_vars(),
            line_buffer: default_line_buffer(),
            default_tool: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionSection {
    /// Maximum feed in mm/min, reported per axis by `$$`
    #[serde(default = "default_max_feed")]
    pub max_feed: f64,

    #[serde(default)]
    pub hard_limits: bool,

    #[serde(default)]
    pub homing: bool,

    /// The spindle drives a laser
    #[serde(default)]
    pub laser_mode: bool,

    /// Axis letters that always move incrementally, such as `"A"`
    #[serde(default)]
    pub force_relative: String,

    /// M1 pauses only when set
    #[serde(default)]
    pub optional_stop: bool,

    /// Report positions in inches
    #[serde(default)]
    pub report_inches: bool,

    /// Bit 0 reports machine positions, otherwise work positions
    #[serde(default = "default_status_mask")]
    pub status_mask: u8,
}

impl Default for MotionSection {
    fn default() -> Self {
        Self {
            max_feed: default_max_feed(),
            hard_limits: false,
            homing: false,
            laser_mode: false,
            force_relative: String::new(),
            optional_stop: false,
            report_inches: false,
            status_mask: default_status_mask(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsSection {
    /// Length offset per tool, starting with tool 1
    #[serde(default)]
    pub tool_length: Vec<f64>,

    /// Dwell after a spindle speed or direction change
    #[serde(default)]
    pub spindle_delay_ms: u16,

    #[serde(default = "default_coolant_resume_delay_ms")]
    pub coolant_resume_delay_ms: u32,

    #[serde(default = "default_spindle_resume_delay_ms")]
    pub spindle_resume_delay_ms: u32,

    /// Wait for the measured spindle speed to come within this percentage
    #[serde(default)]
    pub speed_tolerance_percent: Option<u8>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_length: Vec::new(),
            spindle_delay_ms: 0,
            coolant_resume_delay_ms: default_coolant_resume_delay_ms(),
            spindle_resume_delay_ms: default_spindle_resume_delay_ms(),
            speed_tolerance_percent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupSection {
    /// Number of `$N` slots
    #[serde(default = "default_block_count")]
    pub block_count: u8,

    /// Initial contents of the `$N` slots
    #[serde(default)]
    pub blocks: Vec<String>,
}

impl Default for StartupSection {
    fn default() -> Self {
        Self {
            block_count: default_block_count(),
            blocks: Vec::new(),
        }
    }
}

fn default_axis_count() -> usize {
    3
}

fn default_tool_count() -> u8 {
    16
}

fn default_coord_system_count() -> u8 {
    6
}

fn default_max_user_vars() -> u16 {
    50
}

fn default_line_buffer() -> usize {
    256
}

fn default_max_feed() -> f64 {
    5000.0
}

fn default_status_mask() -> u8 {
    1
}

fn default_coolant_resume_delay_ms() -> u32 {
    1000
}

fn default_spindle_resume_delay_ms() -> u32 {
    4000
}

fn default_block_count() -> u8 {
    2
}

impl Config {
    /// Load configuration from a file, auto-detecting TOML or JSON format
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content).or_else(|_| Self::from_json(&content)),
        }
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse config as TOML")
    }

    /// Parse configuration from JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("failed to parse config as JSON")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let machine = &self.machine;
        if !(1..=MAX_AXES).contains(&machine.axis_count) {
            anyhow::bail!("machine.axis_count must be between 1 and {MAX_AXES}");
        }
        if !(1..=MAX_COORD_SYSTEMS).contains(&machine.coord_system_count) {
            anyhow::bail!("machine.coord_system_count must be between 1 and {MAX_COORD_SYSTEMS}");
        }
        if machine.line_buffer == 0 {
            anyhow::bail!("machine.line_buffer cannot be zero");
        }
        if machine.default_tool > machine.tool_count {
            anyhow::bail!("machine.default_tool exceeds machine.tool_count");
        }
        if self.motion.max_feed <= 0.0 {
            anyhow::bail!("motion.max_feed must be positive");
        }
        if self.tools.tool_length.len() > usize::from(machine.tool_count) {
            anyhow::bail!(
                "tools.tool_length has {} entries for {} tools",
                self.tools.tool_length.len(),
                machine.tool_count
            );
        }
        if let Some(percent) = self.tools.speed_tolerance_percent
            && percent > 100
        {
            anyhow::bail!("tools.speed_tolerance_percent cannot exceed 100");
        }
        self.force_relative_axes()?;
        if self.startup.blocks.len() > usize::from(self.startup.block_count) {
            anyhow::bail!(
                "startup.blocks has {} lines for {} slots",
                self.startup.blocks.len(),
                self.startup.block_count
            );
        }
        Ok(())
    }

    fn force_relative_axes(&self) -> Result<WordFlags> {
        let letters = &AXIS_LETTERS[..self.machine.axis_count.min(MAX_AXES)];
        let mut flags = WordFlags::empty();
        for ch in self.motion.force_relative.chars() {
            if ch.is_whitespace() || ch == ',' {
                continue;
            }
            let upper = ch.to_ascii_uppercase();
            let Some(index) = letters.iter().position(|&letter| letter == upper) else {
                anyhow::bail!("motion.force_relative: unknown axis {ch:?}");
            };
            flags |= WordFlags::axis(index);
        }
        Ok(flags)
    }

    /// Builds the runtime configuration for the core.
    pub fn machine_config(&self) -> Result<MachineConfig> {
        let machine = &self.machine;
        let mut tool_length_offsets = self.tools.tool_length.clone();
        tool_length_offsets.resize(usize::from(machine.tool_count), 0.0);

        Ok(MachineConfig {
            parser: ParserConfig {
                axis_count: machine.axis_count,
                tool_count: machine.tool_count,
                coord_system_count: machine.coord_system_count,
                max_user_vars: machine.max_user_vars,
                tool_length_offsets,
                default_tool: machine.default_tool,
                line_buffer: machine.line_buffer,
            },
            hard_limits: self.motion.hard_limits,
            homing: self.motion.homing,
            laser_mode: self.motion.laser_mode,
            force_relative: self.force_relative_axes()?,
            optional_stop: self.motion.optional_stop,
            spindle_delay_ms: self.tools.spindle_delay_ms,
            coolant_resume_delay_ms: self.tools.coolant_resume_delay_ms,
            spindle_resume_delay_ms: self.tools.spindle_resume_delay_ms,
            tool_speed_tolerance_percent: self.tools.speed_tolerance_percent,
            startup_blocks: self.startup.block_count,
        })
    }

    /// `$$` lines, numbered the way Grbl senders expect.
    pub fn settings_dump(&self) -> Vec<String> {
        let flag = |value: bool| u8::from(value);
        let mut lines = vec![
            format!("$10={}", self.motion.status_mask),
            format!("$13={}", flag(self.motion.report_inches)),
            format!("$21={}", flag(self.motion.hard_limits)),
            format!("$22={}", flag(self.motion.homing)),
            format!("$32={}", flag(self.motion.laser_mode)),
        ];
        for axis in 0..self.machine.axis_count.min(MAX_AXES) {
            lines.push(format!("${}={:.3}", 110 + axis, self.motion.max_feed));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[machine]
axis_count = 4
coord_system_count = 9

[motion]
hard_limits = true
homing = true
force_relative = "A"

[tools]
tool_length = [1.5, 2.5]
spindle_delay_ms = 500

[startup]
blocks = ["G21 G90"]
"#;

        let config = Config::from_toml(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.machine.axis_count, 4);
        assert!(config.motion.homing);
        assert_eq!(config.startup.blocks, vec!["G21 G90".to_string()]);

        let machine = config.machine_config().unwrap();
        assert_eq!(machine.force_relative, WordFlags::A);
        assert_eq!(machine.parser.tool_length_offset(2), 2.5);
        assert_eq!(machine.parser.tool_length_offsets.len(), 16);
        assert_eq!(machine.spindle_delay_ms, 500);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "machine": { "axis_count": 3, "tool_count": 4 },
            "motion": { "laser_mode": true, "max_feed": 1200.0 },
            "tools": { "speed_tolerance_percent": 5 }
        }"#;

        let config = Config::from_json(json).unwrap();
        config.validate().unwrap();
        assert!(config.motion.laser_mode);
        assert_eq!(config.machine.tool_count, 4);
        assert_eq!(
            config.machine_config().unwrap().tool_speed_tolerance_percent,
            Some(5)
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.machine.axis_count, 3);
        assert_eq!(config.machine.coord_system_count, 6);
        assert_eq!(config.motion.status_mask, 1);
        assert_eq!(config.startup.block_count, 2);

        let machine = config.machine_config().unwrap();
        assert_eq!(machine.parser, ParserConfig::default());
        assert_eq!(machine, MachineConfig::default());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.machine.axis_count = 7;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.motion.force_relative = "Q".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.startup.blocks = vec!["G90".into(), "G21".into(), "G17".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tools.tool_length = vec![0.0; 17];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_dump() {
        let config = Config::default();
        assert_eq!(
            config.settings_dump(),
            vec![
                "$10=1",
                "$13=0",
                "$21=0",
                "$22=0",
                "$32=0",
                "$110=5000.000",
                "$111=5000.000",
                "$112=5000.000",
            ]
        );
    }
}
