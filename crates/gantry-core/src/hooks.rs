//! Handler registry for machine-specific extensions.
//!
//! Each extension point holds an ordered list of handlers. For points that
//! produce a result, the first handler that claims the event ends the
//! dispatch.

use crate::hal::{Machine, MotionBlock};
use gantry_gcode::{Axes, Block, Extensions, Status, WordEvent};
use tracing::debug;

/// A validated line about to run, or an extended command.
pub struct ExecEvent<'a> {
    pub block: &'a Block,
    /// Machine-coordinate target of the line.
    pub target: &'a Axes,
    pub motion_block: &'a MotionBlock,
    pub machine: &'a mut dyn Machine,
}

type TokenHandler = Box<dyn FnMut(char) -> bool>;
type WordHandler = Box<dyn FnMut(&mut WordEvent<'_>) -> Option<Result<(), Status>>>;
type ModifierHandler = Box<dyn FnMut(&mut Block)>;
type MotionHandler = Box<dyn FnMut(&Axes, &Block)>;
type ExecHandler = Box<dyn FnMut(&mut ExecEvent<'_>) -> Option<Result<(), Status>>>;
type ModesHandler = Box<dyn FnMut(&mut Vec<String>)>;
type Handler = Box<dyn FnMut()>;

#[derive(Default)]
pub struct Hooks {
    parse_token: Vec<TokenHandler>,
    gcode_parse: Vec<WordHandler>,
    gcode_exec_modifier: Vec<ModifierHandler>,
    gcode_before_motion: Vec<MotionHandler>,
    gcode_after_motion: Vec<MotionHandler>,
    gcode_exec: Vec<ExecHandler>,
    parser_get_modes: Vec<ModesHandler>,
    parser_reset: Vec<Handler>,
    cnc_reset: Vec<Handler>,
    cnc_dotasks: Vec<Handler>,
    cnc_stop: Vec<Handler>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("parse_token", &self.parse_token.len())
            .field("gcode_parse", &self.gcode_parse.len())
            .field("gcode_exec", &self.gcode_exec.len())
            .finish_non_exhaustive()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Characters that cannot start a word. Return `true` to consume it.
    pub fn on_parse_token(&mut self, handler: impl FnMut(char) -> bool + 'static) {
        debug!(point = "parse_token", "registering handler");
        self.parse_token.push(Box::new(handler));
    }

    /// Codes and letters the built-in tables reject.
    pub fn on_gcode_parse(
        &mut self,
        handler: impl FnMut(&mut WordEvent<'_>) -> Option<Result<(), Status>> + 'static,
    ) {
        debug!(point = "gcode_parse", "registering handler");
        self.gcode_parse.push(Box::new(handler));
    }

    /// Runs on every block before execution and may rewrite it.
    pub fn on_gcode_exec_modifier(&mut self, handler: impl FnMut(&mut Block) + 'static) {
        debug!(point = "gcode_exec_modifier", "registering handler");
        self.gcode_exec_modifier.push(Box::new(handler));
    }

    pub fn on_gcode_before_motion(&mut self, handler: impl FnMut(&Axes, &Block) + 'static) {
        debug!(point = "gcode_before_motion", "registering handler");
        self.gcode_before_motion.push(Box::new(handler));
    }

    pub fn on_gcode_after_motion(&mut self, handler: impl FnMut(&Axes, &Block) + 'static) {
        debug!(point = "gcode_after_motion", "registering handler");
        self.gcode_after_motion.push(Box::new(handler));
    }

    /// Extended commands, and motion lines a handler wants to take over.
    pub fn on_gcode_exec(
        &mut self,
        handler: impl FnMut(&mut ExecEvent<'_>) -> Option<Result<(), Status>> + 'static,
    ) {
        debug!(point = "gcode_exec", "registering handler");
        self.gcode_exec.push(Box::new(handler));
    }

    /// Extra words appended to the `$G` report.
    pub fn on_parser_get_modes(&mut self, handler: impl FnMut(&mut Vec<String>) + 'static) {
        debug!(point = "parser_get_modes", "registering handler");
        self.parser_get_modes.push(Box::new(handler));
    }

    pub fn on_parser_reset(&mut self, handler: impl FnMut() + 'static) {
        debug!(point = "parser_reset", "registering handler");
        self.parser_reset.push(Box::new(handler));
    }

    pub fn on_cnc_reset(&mut self, handler: impl FnMut() + 'static) {
        debug!(point = "cnc_reset", "registering handler");
        self.cnc_reset.push(Box::new(handler));
    }

    pub fn on_cnc_dotasks(&mut self, handler: impl FnMut() + 'static) {
        debug!(point = "cnc_dotasks", "registering handler");
        self.cnc_dotasks.push(Box::new(handler));
    }

    pub fn on_cnc_stop(&mut self, handler: impl FnMut() + 'static) {
        debug!(point = "cnc_stop", "registering handler");
        self.cnc_stop.push(Box::new(handler));
    }

    pub(crate) fn gcode_exec_modifier(&mut self, block: &mut Block) {
        for handler in &mut self.gcode_exec_modifier {
            handler(block);
        }
    }

    pub(crate) fn gcode_before_motion(&mut self, target: &Axes, block: &Block) {
        for handler in &mut self.gcode_before_motion {
            handler(target, block);
        }
    }

    pub(crate) fn gcode_after_motion(&mut self, target: &Axes, block: &Block) {
        for handler in &mut self.gcode_after_motion {
            handler(target, block);
        }
    }

    pub(crate) fn gcode_exec(&mut self, event: &mut ExecEvent<'_>) -> Option<Result<(), Status>> {
        self.gcode_exec.iter_mut().find_map(|handler| handler(event))
    }

    pub(crate) fn parser_get_modes(&mut self) -> Vec<String> {
        let mut modes = Vec::new();
        for handler in &mut self.parser_get_modes {
            handler(&mut modes);
        }
        modes
    }

    pub(crate) fn parser_reset(&mut self) {
        for handler in &mut self.parser_reset {
            handler();
        }
    }

    pub(crate) fn cnc_reset(&mut self) {
        for handler in &mut self.cnc_reset {
            handler();
        }
    }

    pub(crate) fn cnc_dotasks(&mut self) {
        for handler in &mut self.cnc_dotasks {
            handler();
        }
    }

    pub(crate) fn cnc_stop(&mut self) {
        for handler in &mut self.cnc_stop {
            handler();
        }
    }
}

impl Extensions for Hooks {
    fn parse_token(&mut self, ch: char) -> bool {
        self.parse_token.iter_mut().any(|handler| handler(ch))
    }

    fn parse_word(&mut self, event: &mut WordEvent<'_>) -> Option<Result<(), Status>> {
        self.gcode_parse.iter_mut().find_map(|handler| handler(event))
    }
}
