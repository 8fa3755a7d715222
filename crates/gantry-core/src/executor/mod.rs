//! Executes validated blocks in the RS274NGC order of operations.
//!
//! Each phase below is numbered the way the standard lists them. A phase
//! that fails aborts the rest of the line; the caller then keeps the
//! previously committed parser state.

mod arc;
mod canned;
mod params;

pub use arc::RADIUS_TOLERANCE;
pub use canned::CannedState;
pub use params::ParamView;

use crate::{
    alarm::{Alarm, Feedback, Message},
    cnc::{Cnc, Io},
    config::MachineConfig,
    hal::{MotionBlock, ProbeFlags, ProbeOutcome, SettingsStore},
    hooks::ExecEvent,
    offsets::Offsets,
    signals::ExecState,
};
use gantry_gcode::{
    Axes, Block, Distance, FeedMode, GroupFlags, M10, MAX_AXES, Motion, NonModal, ParserState,
    ProbeMode, Spindle, Status, Stopping, ToolLength, Units, WordFlags,
};
use tracing::{debug, info};

/// Everything a line may touch besides the executor's own state.
pub struct ExecContext<'a> {
    pub config: &'a MachineConfig,
    pub cnc: &'a mut Cnc,
    pub io: Io<'a>,
    pub store: &'a mut dyn SettingsStore,
}

/// Slot addressed by `G10 P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoredSlot {
    CoordSystem(u8),
    G28,
    G30,
}

#[derive(Debug)]
pub struct Executor {
    offsets: Offsets,
    /// Last commanded position in machine coordinates.
    last_pos: Axes,
    canned: Option<CannedState>,
}

impl Executor {
    pub fn new(offsets: Offsets) -> Self {
        Self {
            offsets,
            last_pos: [0.0; MAX_AXES],
            canned: None,
        }
    }

    pub fn offsets(&self) -> &Offsets {
        &self.offsets
    }

    pub fn offsets_mut(&mut self) -> &mut Offsets {
        &mut self.offsets
    }

    pub fn last_position(&self) -> Axes {
        self.last_pos
    }

    /// Makes the real-time position the start of the next move.
    pub fn sync_position(&mut self, position: Axes) {
        self.last_pos = position;
    }

    pub fn canned_state(&self) -> Option<&CannedState> {
        self.canned.as_ref()
    }

    /// Drops the volatile offsets and any canned cycle in progress.
    pub fn reset(&mut self) {
        self.offsets.reset();
        self.canned = None;
    }

    /// Parameter reads as seen by a line parsed against `state`.
    pub fn params<'a>(&'a self, state: &'a ParserState) -> ParamView<'a> {
        ParamView {
            state,
            offsets: &self.offsets,
            position: &self.last_pos,
        }
    }

    /// Runs one block. `committed` is the parser state before the line.
    ///
    /// On failure the coordinate system selection and the tool length
    /// offset are put back so they keep matching `committed`.
    pub fn execute(
        &mut self,
        block: &mut Block,
        committed: &ParserState,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Status> {
        let active = self.offsets.active;
        let tool_length = self.offsets.tool_length;
        let result = self.execute_block(block, committed, ctx);
        if result.is_err() {
            if self.offsets.active != active {
                self.offsets.select(active);
            }
            if self.offsets.tool_length != tool_length {
                self.offsets.set_tool_length(tool_length);
            }
        }
        result
    }

    fn execute_block(
        &mut self,
        block: &mut Block,
        committed: &ParserState,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Status> {
        ctx.io.hooks.gcode_exec_modifier(block);

        let canned_line = block.command.nonmodal.is_none()
            && block.words.has_axes()
            && block.state.modes.motion.canned_cycle().is_some();
        if !canned_line {
            self.canned = None;
        }

        // 1. program stops carry over until a line asserts another one
        let reasserted = block.command.groups.contains(GroupFlags::STOPPING);
        block.state.carry_stopping(reasserted)?;
        if let Some(code) = block.command.extended {
            return self.execute_extended(code, block, ctx);
        }
        if canned_line {
            canned::check(block)?;
        }

        let config = ctx.config;
        let groups = block.command.groups;
        let modes = block.state.modes.clone();
        let mut nonmodal = block.command.nonmodal;
        let mut motion = MotionBlock {
            line_number: block.line_number(),
            ..MotionBlock::default()
        };

        // 2. feed mode, the F word was absorbed while parsing
        motion.inverse_time = modes.feed_mode == FeedMode::InverseTime;
        motion.feed = block.state.feed;

        // 3. spindle speed, tool selection and tool change
        motion.spindle = modes.spindle;
        motion.spindle_speed = block.state.spindle_speed;
        motion.coolant = modes.coolant;
        if block.state.tool != committed.tool {
            debug!(tool = block.state.tool, "tool selected");
        }
        if groups.contains(GroupFlags::TOOL_CHANGE) {
            if !ctx.cnc.sync(&mut ctx.io) {
                return Err(Status::CriticalFail);
            }
            ctx.io.machine.change_tool(block.state.tool)?;
            info!(tool = block.state.tool, "tool changed");
        }

        let mut update_tools = block.state.spindle_speed != committed.spindle_speed
            || modes.spindle != committed.modes.spindle;
        if update_tools && !config.laser_mode {
            ctx.io.machine.update_tools(&motion)?;
            motion.dwell_ms = config.spindle_delay_ms;
            update_tools = false;
            self.wait_for_spindle(&motion, modes.overrides_enabled, ctx)?;
        }
        if groups.contains(GroupFlags::COOLANT) {
            update_tools = true;
        }

        // 4. feed and spindle override switches
        motion.overrides_enabled = modes.overrides_enabled;

        // 5. dwell
        if nonmodal == Some(NonModal::Dwell) {
            let ms = (block.words.p * 1000.0).min(f64::from(u16::MAX)) as u16;
            motion.dwell_ms = motion.dwell_ms.max(ms);
            nonmodal = None;
        }
        if motion.dwell_ms > 0 {
            ctx.io.machine.dwell(&motion)?;
            motion.dwell_ms = 0;
            update_tools = false;
        }

        // 6. the active plane is read from the block by arcs and cycles

        // 7. units
        if modes.units == Units::Inches {
            let words = &mut block.words;
            for axis in 0..MAX_AXES {
                if words.has(WordFlags::axis(axis)) {
                    words.axes[axis] *= Units::MM_PER_INCH;
                }
            }
            for offset in &mut words.ijk {
                *offset *= Units::MM_PER_INCH;
            }
            words.r *= Units::MM_PER_INCH;
            if canned_line {
                words.d *= Units::MM_PER_INCH;
            }
        }

        // 8. tool length offset, G43 consumes the Z word
        if groups.contains(GroupFlags::TOOL_LENGTH) {
            let mut offset = 0.0;
            if modes.tool_length == ToolLength::Dynamic {
                offset = block.words.axes[TOOL_AXIS];
                block.words.axes[TOOL_AXIS] = 0.0;
                block.words.flags.remove(WordFlags::Z);
            }
            self.offsets.set_tool_length(offset);
        }

        // 9. coordinate system
        if groups.contains(GroupFlags::COORD_SYSTEM) && self.offsets.active != modes.coord_system {
            self.offsets.select(modes.coord_system);
        }

        // 10. path control
        motion.path = modes.path;

        // 11. distance mode
        let axis_count = config.parser.axis_count.min(MAX_AXES);
        let absolute =
            modes.distance == Distance::Absolute || nonmodal == Some(NonModal::MachineCoords);
        let mut target = self.last_pos;
        for axis in 0..axis_count {
            let flag = WordFlags::axis(axis);
            if !block.words.has(flag) {
                continue;
            }
            let value = block.words.axes[axis];
            target[axis] = if absolute && !config.force_relative.contains(flag) {
                value
            } else {
                target[axis] + value
            };
        }

        // 12. non-modal codes
        let mut stored_slot = None;
        match nonmodal {
            Some(NonModal::SetCoordData) => {
                let p = block.words.p as u8;
                stored_slot = Some(match p {
                    0 => StoredSlot::CoordSystem(self.offsets.active),
                    28 => StoredSlot::G28,
                    30 => StoredSlot::G30,
                    n => StoredSlot::CoordSystem(n - 1),
                });
            }
            Some(NonModal::ResetOffsets) => {
                self.offsets.clear_g92(&mut *ctx.store);
                nonmodal = None;
            }
            Some(NonModal::SuspendOffset) => {
                self.offsets.suspend_g92();
                nonmodal = None;
            }
            Some(NonModal::RestoreOffset) => {
                self.offsets.restore_g92();
                nonmodal = None;
            }
            _ => {}
        }

        let offsets_apply = !matches!(
            nonmodal,
            Some(NonModal::SetCoordData | NonModal::MachineCoords)
        );
        if offsets_apply && modes.distance == Distance::Absolute {
            let coord = self.offsets.coord_system();
            for axis in 0..axis_count {
                let flag = WordFlags::axis(axis);
                if block.words.has(flag) && !config.force_relative.contains(flag) {
                    target[axis] += coord[axis] + self.offsets.g92[axis];
                }
            }
            if block.words.has(WordFlags::Z) {
                target[TOOL_AXIS] += self.offsets.tool_length;
            }
        }

        if let Some(slot) = stored_slot {
            self.store_coordinates(slot, block, &target, ctx);
        }

        if config.laser_mode && nonmodal.is_some() {
            motion.spindle = Spindle::Off;
        }

        match nonmodal {
            Some(code @ (NonModal::Home | NonModal::SecondaryHome)) => {
                motion.feed = MotionBlock::RAPID;
                if block.words.has_axes() {
                    ctx.io.machine.line_to(&target, &motion)?;
                    update_tools = false;
                }
                let point = if code == NonModal::Home {
                    self.offsets.g28
                } else {
                    self.offsets.g30
                };
                ctx.io.machine.line_to(&point, &motion)?;
                self.last_pos = point;
            }
            Some(NonModal::SetOffset) => {
                let mut g92 = self.offsets.g92;
                for axis in 0..axis_count {
                    g92[axis] = -(target[axis] - self.last_pos[axis] - g92[axis]);
                }
                self.offsets.set_g92(g92, &mut *ctx.store);
            }
            Some(NonModal::MachineCoords) => nonmodal = None,
            _ => {}
        }

        // 13. motion
        if nonmodal.is_none() && block.words.has_axes() {
            if let Some(cycle) = modes.motion.canned_cycle() {
                self.canned_cycle(cycle, block, &target, &motion, ctx)?;
                update_tools = false;
            } else if let Motion::Probe(mode) = modes.motion {
                ctx.io.hooks.gcode_before_motion(&target, block);
                self.probe(mode, &target, &motion, ctx)?;
                update_tools = false;
            } else {
                ctx.io.hooks.gcode_before_motion(&target, block);
                let mut event = ExecEvent {
                    block,
                    target: &target,
                    motion_block: &motion,
                    machine: &mut *ctx.io.machine,
                };
                match ctx.io.hooks.gcode_exec(&mut event) {
                    Some(result) => result?,
                    None => self.builtin_motion(modes.motion, block, &target, &motion, ctx)?,
                }
                ctx.io.hooks.gcode_after_motion(&target, block);
                self.last_pos = target;
                update_tools = false;
            }
        }

        // 14. program stops
        let hold = match modes.stopping {
            Stopping::Pause | Stopping::PalletPause | Stopping::End | Stopping::EndRewind => true,
            Stopping::OptionalPause => config.optional_stop,
            Stopping::Continue => false,
        };
        if hold && !ctx.io.machine.check_mode() {
            ctx.cnc.pause();
            if modes.stopping.ends_program() {
                ctx.cnc.stop(&mut ctx.io);
                ctx.cnc.send(Message::Feedback(Feedback::ProgramEnd));
                info!("program end");
            }
        }

        // 15. tool state no motion carried
        if update_tools {
            ctx.io.machine.update_tools(&motion)?;
        }

        for text in block.messages() {
            ctx.cnc.send(Message::Text(text.to_string()));
        }
        Ok(())
    }

    fn execute_extended(
        &mut self,
        code: u16,
        block: &Block,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Status> {
        if !ctx.cnc.sync(&mut ctx.io) {
            return Err(Status::CriticalFail);
        }

        if code == M10 {
            let pin = block.words.p;
            if (0.0..8.0).contains(&pin) {
                let value = block.words.s.clamp(0.0, f64::from(u8::MAX)) as u8;
                ctx.io.machine.set_output(pin as u8, value);
            }
            return Ok(());
        }

        let motion = MotionBlock {
            line_number: block.line_number(),
            ..MotionBlock::default()
        };
        let mut event = ExecEvent {
            block,
            target: &self.last_pos,
            motion_block: &motion,
            machine: &mut *ctx.io.machine,
        };
        ctx.io
            .hooks
            .gcode_exec(&mut event)
            .unwrap_or(Err(Status::UnsupportedCommand))
    }

    fn builtin_motion(
        &mut self,
        mode: Motion,
        block: &Block,
        target: &Axes,
        motion: &MotionBlock,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Status> {
        match mode {
            Motion::Rapid => self.straight(target, true, motion, ctx),
            Motion::Linear => self.straight(target, false, motion, ctx),
            Motion::ArcCw | Motion::ArcCcw => {
                if motion.feed == 0.0 {
                    return Err(Status::FeedNotSet);
                }
                let clockwise = mode == Motion::ArcCw;
                let spec = arc::resolve(
                    &self.last_pos,
                    target,
                    &block.words,
                    block.state.modes.plane,
                    clockwise,
                )?;
                ctx.io.machine.arc_to(target, &spec, motion)
            }
            // G80 left active with axis words on the line
            Motion::CancelCycle => Err(Status::AxisWordsExist),
            Motion::Probe(_) | Motion::Canned(_) => Err(Status::UnsupportedCommand),
        }
    }

    /// A G0 or G1 move. Canned cycles are built from these.
    fn straight(
        &mut self,
        target: &Axes,
        rapid: bool,
        motion: &MotionBlock,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Status> {
        if rapid {
            let mut rapid_block = motion.clone();
            rapid_block.feed = MotionBlock::RAPID;
            if ctx.config.laser_mode {
                rapid_block.spindle = Spindle::Off;
            }
            return ctx.io.machine.line_to(target, &rapid_block);
        }
        if motion.feed == 0.0 {
            return Err(Status::FeedNotSet);
        }
        ctx.io.machine.line_to(target, motion)
    }

    fn probe(
        &mut self,
        mode: ProbeMode,
        target: &Axes,
        motion: &MotionBlock,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Status> {
        let machine = &mut *ctx.io.machine;
        let outcome = machine.probe(target, ProbeFlags::from(mode), motion)?;
        let success = outcome == ProbeOutcome::Contact;

        self.last_pos = if machine.check_mode() {
            *target
        } else {
            machine.position()
        };
        self.offsets.probe_position = machine.probe_position();
        self.offsets.probe_succeeded = success;

        if !success && mode.raises_alarm() {
            let alarm = if outcome == ProbeOutcome::InitialContact {
                Alarm::ProbeFailInitial
            } else {
                Alarm::ProbeFailContact
            };
            ctx.cnc.alarm(alarm, &mut ctx.io);
            return Err(Status::CriticalFail);
        }

        debug!(?outcome, "probe finished");
        ctx.cnc.send(Message::Probe {
            position: self.offsets.probe_position,
            success,
        });
        Ok(())
    }

    fn store_coordinates(
        &mut self,
        slot: StoredSlot,
        block: &Block,
        target: &Axes,
        ctx: &mut ExecContext<'_>,
    ) {
        let mut coords = match slot {
            StoredSlot::CoordSystem(index) => self.offsets.stored(index),
            StoredSlot::G28 => self.offsets.g28,
            StoredSlot::G30 => self.offsets.g30,
        };
        let relative = block.words.l == 20;
        for (axis, value) in coords.iter_mut().enumerate() {
            if !block.words.has(WordFlags::axis(axis)) {
                continue;
            }
            *value = if relative {
                -(target[axis] - self.last_pos[axis] - self.offsets.g92[axis])
            } else {
                target[axis]
            };
        }
        if relative && block.words.has(WordFlags::Z) {
            coords[TOOL_AXIS] += self.offsets.tool_length;
        }

        debug!(?slot, ?coords, "storing coordinates");
        let store = &mut *ctx.store;
        match slot {
            StoredSlot::CoordSystem(index) => self.offsets.set_coord_system(index, coords, store),
            StoredSlot::G28 => self.offsets.set_g28(coords, store),
            StoredSlot::G30 => self.offsets.set_g30(coords, store),
        }
    }

    /// Blocks until the measured spindle speed matches the command.
    fn wait_for_spindle(
        &self,
        motion: &MotionBlock,
        overrides_enabled: bool,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Status> {
        let Some(tolerance) = ctx.config.tool_speed_tolerance_percent else {
            return Ok(());
        };
        if motion.spindle == Spindle::Off || ctx.io.machine.check_mode() {
            return Ok(());
        }

        let percent = if overrides_enabled {
            ctx.io.machine.overrides().spindle
        } else {
            100
        };
        let commanded = motion.spindle_speed * f64::from(percent) / 100.0;
        let band = commanded * f64::from(tolerance) / 100.0;
        while (ctx.io.machine.tool_speed() - commanded).abs() > band {
            if !ctx.cnc.dotasks(&mut ctx.io) || ctx.cnc.exec_state().contains(ExecState::KILL) {
                return Err(Status::CriticalFail);
            }
        }
        Ok(())
    }
}

const TOOL_AXIS: usize = 2;

#[cfg(test)]
mod tests;
