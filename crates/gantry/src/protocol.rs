//! The Grbl-compatible command surface.
//!
//! Every completed line produces exactly one `ok` or `error:<code>`,
//! preceded by whatever the controller reported while running it. Realtime
//! bytes never reach this layer as lines; the transport hands them to
//! [`Signals`](gantry_core::Signals) directly.

use crate::config::Config;
use gantry_core::{
    Controller, ExecState, Machine, MemoryStore, Message, ReportTail, SettingsStore, Signals,
    StatusReport, sim::SimMachine,
};
use gantry_gcode::{Axes, MAX_AXES, Status, Units, coord_system_code};
use std::{fmt::Write as _, sync::Arc};
use tracing::debug;

pub const BANNER: &str = concat!(
    "Grbl 1.1f [Gantry v",
    env!("CARGO_PKG_VERSION"),
    " '$' for help]"
);

const HELP: &str = "[HLP:$$ $# $G $I $N $Nx=line $J=line $C $X $H $RST=# $RST=$ $RST=* ~ ! ? ctrl-x]";

/// A parsed `$` line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum System<'a> {
    Help,
    Settings,
    Offsets,
    Modes,
    Info,
    StartupBlocks,
    SetStartupBlock(u8, &'a str),
    CheckMode,
    Unlock,
    Home,
    Jog(&'a str),
    ResetOffsets,
    ResetSettings,
    ResetAll,
}

impl<'a> System<'a> {
    fn parse(line: &'a str) -> Result<Self, Status> {
        let body = &line[1..];
        let (head, arg) = match body.split_once('=') {
            Some((head, arg)) => (head, Some(arg)),
            None => (body, None),
        };
        let head = head.trim().to_ascii_uppercase();

        let command = match (head.as_str(), arg) {
            ("", None) => Self::Help,
            ("$", None) => Self::Settings,
            ("#", None) => Self::Offsets,
            ("G", None) => Self::Modes,
            ("I", None) => Self::Info,
            ("N", None) => Self::StartupBlocks,
            ("C", None) => Self::CheckMode,
            ("X", None) => Self::Unlock,
            ("H", None) => Self::Home,
            ("J", Some(line)) => Self::Jog(line),
            ("RST", Some(arg)) => match arg.trim() {
                "#" => Self::ResetOffsets,
                "$" => Self::ResetSettings,
                "*" => Self::ResetAll,
                _ => return Err(Status::InvalidStatement),
            },
            (slot, Some(line)) if slot.len() == 2 && slot.starts_with('N') => {
                let index = slot[1..]
                    .parse::<u8>()
                    .map_err(|_| Status::InvalidStatement)?;
                Self::SetStartupBlock(index, line)
            }
            _ => return Err(Status::InvalidStatement),
        };
        Ok(command)
    }

    /// Commands accepted while motion is running.
    fn allowed_while_running(&self) -> bool {
        matches!(self, Self::Offsets | Self::Modes | Self::Info | Self::Jog(_))
    }
}

pub struct Protocol<M, S = MemoryStore> {
    controller: Controller<M, S>,
    config: Config,
}

impl Protocol<SimMachine> {
    /// A protocol driving the in-memory machine with volatile settings.
    pub fn simulated(config: Config) -> anyhow::Result<Self> {
        let machine_config = config.machine_config()?;
        let signals = Arc::new(Signals::new());
        let machine = SimMachine::new(signals.clone());
        let controller = Controller::new(machine_config, signals, machine, MemoryStore::new());
        Ok(Self::new(controller, config))
    }
}

impl<M: Machine, S: SettingsStore> Protocol<M, S> {
    pub fn new(controller: Controller<M, S>, config: Config) -> Self {
        Self { controller, config }
    }

    pub fn controller(&self) -> &Controller<M, S> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller<M, S> {
        &mut self.controller
    }

    /// Resets the controller, stores the configured startup lines and
    /// returns the banner.
    pub fn start(&mut self) -> Vec<String> {
        for (index, line) in self.config.startup.blocks.iter().enumerate() {
            let Ok(index) = u8::try_from(index) else {
                break;
            };
            if let Err(status) = self.controller.set_startup_block(index, line) {
                debug!(%status, %line, "discarding configured startup block");
            }
        }
        self.controller.start();
        self.flush()
    }

    /// Dispatches one realtime byte.
    pub fn realtime(&self, byte: u8) {
        self.controller.signals().call_rt_command(byte);
    }

    /// Runs one main-loop pass and returns what it reported.
    pub fn poll(&mut self) -> Vec<String> {
        self.controller.dotasks();
        self.flush()
    }

    /// Runs passes until queued motion finishes or a hold stops it.
    pub fn wait_idle(&mut self) -> Vec<String> {
        self.controller.wait_idle();
        self.flush()
    }

    /// Handles one completed line.
    pub fn line(&mut self, line: &str) -> Vec<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut output = Vec::new();
        let result = if line.trim_start().starts_with('$') {
            self.system(line.trim_start(), &mut output)
        } else {
            self.controller.execute_line(line)
        };

        let mut responses = self.flush();
        responses.append(&mut output);
        responses.push(match result {
            Ok(()) => "ok".to_string(),
            Err(status) => format!("error:{}", status.code()),
        });
        responses
    }

    fn system(&mut self, line: &str, output: &mut Vec<String>) -> Result<(), Status> {
        let command = System::parse(line)?;
        if self.controller.cnc().exec_state().contains(ExecState::RUN)
            && !command.allowed_while_running()
        {
            return Err(Status::IdleError);
        }

        match command {
            System::Help => output.push(HELP.to_string()),
            System::Settings => output.extend(self.config.settings_dump()),
            System::Offsets => output.extend(self.offsets()),
            System::Modes => output.push(format!("[GC:{}]", self.controller.modes())),
            System::Info => {
                output.push(format!("[VER:{}.Gantry:]", env!("CARGO_PKG_VERSION")));
                let homing = if self.config.motion.homing { "L" } else { "" };
                output.push(format!(
                    "[OPT:VNM{homing},{},{}]",
                    self.config.machine.axis_count, self.config.machine.line_buffer
                ));
            }
            System::StartupBlocks => {
                for (index, line) in self.controller.startup_blocks().iter().enumerate() {
                    output.push(format!("$N{index}={line}"));
                }
            }
            System::SetStartupBlock(index, line) => {
                self.controller.set_startup_block(index, line)?;
            }
            System::CheckMode => {
                self.controller.toggle_check_mode();
            }
            System::Unlock => self.controller.unlock()?,
            System::Home => self.controller.home()?,
            System::Jog(line) => self.controller.jog(line)?,
            System::ResetOffsets => self.controller.erase_offsets(),
            System::ResetSettings => self.controller.erase_startup_blocks(),
            System::ResetAll => {
                self.controller.erase_startup_blocks();
                self.controller.erase_offsets();
            }
        }
        Ok(())
    }

    fn offsets(&self) -> Vec<String> {
        let offsets = self.controller.executor().offsets();
        let mut lines = Vec::new();
        for index in 0..offsets.coord_systems.len() {
            let index = index as u8;
            lines.push(format!(
                "[{}:{}]",
                coord_system_code(index),
                self.axes(&offsets.stored(index))
            ));
        }
        lines.push(format!("[G28:{}]", self.axes(&offsets.g28)));
        lines.push(format!("[G30:{}]", self.axes(&offsets.g30)));
        lines.push(format!("[G92:{}]", self.axes(&offsets.g92)));
        lines.push(format!("[TLO:{}]", self.number(offsets.tool_length)));
        lines.push(format!(
            "[PRB:{}:{}]",
            self.axes(&offsets.probe_position),
            u8::from(offsets.probe_succeeded)
        ));
        lines
    }

    /// Drains the controller's messages into response lines.
    pub fn flush(&mut self) -> Vec<String> {
        self.controller
            .take_messages()
            .into_iter()
            .map(|message| self.format_message(message))
            .collect()
    }

    fn format_message(&mut self, message: Message) -> String {
        match message {
            Message::Alarm(alarm) => format!("ALARM:{}", alarm.code()),
            Message::Feedback(feedback) => format!("[MSG:{}]", feedback.as_str()),
            Message::Text(text) => format!("[MSG:{text}]"),
            Message::Probe { position, success } => {
                format!("[PRB:{}:{}]", self.axes(&position), u8::from(success))
            }
            Message::StartupLine { line, result } => match result {
                Ok(()) => format!(">{line}:ok"),
                Err(status) => format!(">{line}:error:{}", status.code()),
            },
            Message::StatusReport => {
                let report = self.controller.status();
                self.format_status(&report)
            }
            Message::Banner => BANNER.to_string(),
        }
    }

    /// `<State|MPos:...|FS:...|Pn:...|WCO:...>`
    pub fn format_status(&self, report: &StatusReport) -> String {
        let mut out = String::new();
        let machine_position = self.config.motion.status_mask & 1 != 0;
        let position = if machine_position {
            report.position
        } else {
            let offset = self.controller.work_offset();
            let mut position = report.position;
            for (value, offset) in position.iter_mut().zip(offset) {
                *value -= offset;
            }
            position
        };

        let _ = write!(
            out,
            "<{}|{}:{}|FS:{:.0},{:.0}",
            report.state,
            if machine_position { "MPos" } else { "WPos" },
            self.axes(&position),
            self.feed(report.feed),
            report.spindle_speed
        );
        if !report.pins.is_empty() {
            let _ = write!(out, "|Pn:{}", report.pins);
        }
        match &report.tail {
            ReportTail::None => {}
            ReportTail::WorkOffset(offset) => {
                let _ = write!(out, "|WCO:{}", self.axes(offset));
            }
            ReportTail::Overrides {
                overrides,
                accessories,
            } => {
                let _ = write!(
                    out,
                    "|Ov:{},{},{}",
                    overrides.feed, overrides.rapid, overrides.spindle
                );
                if !accessories.is_empty() {
                    let _ = write!(out, "|A:{accessories}");
                }
            }
        }
        out.push('>');
        out
    }

    fn axes(&self, axes: &Axes) -> String {
        let count = self.config.machine.axis_count.min(MAX_AXES);
        axes[..count]
            .iter()
            .map(|&value| self.number(value))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn number(&self, value: f64) -> String {
        if self.config.motion.report_inches {
            format!("{:.4}", value / Units::MM_PER_INCH)
        } else {
            format!("{value:.3}")
        }
    }

    fn feed(&self, feed: f64) -> f64 {
        if self.config.motion.report_inches {
            feed / Units::MM_PER_INCH
        } else {
            feed
        }
    }
}
