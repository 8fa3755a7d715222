//! G81 through G89 expanded into rapid, feed and dwell primitives.

use super::{ExecContext, Executor, TOOL_AXIS};
use crate::hal::MotionBlock;
use gantry_gcode::{
    Axes, Block, CannedCycle, CutterComp, Distance, FeedMode, MAX_AXES, ReturnMode, Spindle,
    Status, WordFlags,
};
use tracing::trace;

/// Levels shared by a run of consecutive canned-cycle lines, in machine
/// coordinates along the plane axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CannedState {
    /// Retract plane.
    pub r: f64,
    /// Plane-axis position before the first line of the run.
    pub old_z: f64,
    /// Hole depth.
    pub bottom: f64,
}

/// Rejects a canned line the machine cannot run.
pub(super) fn check(block: &Block) -> Result<(), Status> {
    let state = &block.state;
    let Some(cycle) = state.modes.motion.canned_cycle() else {
        return Ok(());
    };
    if matches!(
        cycle,
        CannedCycle::Tap | CannedCycle::BackBore | CannedCycle::BoreManual
    ) {
        return Err(Status::UnsupportedCommand);
    }
    if state.modes.feed_mode == FeedMode::InverseTime {
        return Err(Status::CannedInvalidFeedMode);
    }
    if state.modes.cutter_comp != CutterComp::Off {
        return Err(Status::CannedInvalidRadiusComp);
    }
    if state.feed == 0.0 {
        return Err(Status::FeedNotSet);
    }
    if cycle == CannedCycle::BoreSpindleStop
        && (state.modes.spindle == Spindle::Off || state.spindle_speed == 0.0)
    {
        return Err(Status::SpindleStopped);
    }
    Ok(())
}

impl Executor {
    pub(super) fn canned_cycle(
        &mut self,
        cycle: CannedCycle,
        block: &Block,
        target: &Axes,
        motion: &MotionBlock,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Status> {
        let modes = &block.state.modes;
        let words = &block.words;
        let (_, _, axis) = modes.plane.axes();
        let plane_word = WordFlags::axis(axis);

        let mut levels = match self.canned {
            Some(levels) => levels,
            None => {
                if !words.has(WordFlags::R) || !words.has(plane_word) {
                    return Err(Status::ValueWordMissing);
                }
                CannedState {
                    r: 0.0,
                    old_z: self.last_pos[axis],
                    bottom: 0.0,
                }
            }
        };

        let base = if modes.distance == Distance::Absolute {
            let mut base = self.offsets.coord_system()[axis] + self.offsets.g92[axis];
            if axis == TOOL_AXIS {
                base += self.offsets.tool_length;
            }
            base
        } else {
            levels.old_z
        };
        if words.has(WordFlags::R) {
            levels.r = words.r + base;
        }
        if words.has(plane_word) {
            levels.bottom = words.axes[axis] + base;
        }
        self.canned = Some(levels);

        let retract = if modes.return_mode == ReturnMode::InitialLevel {
            levels.r.max(levels.old_z)
        } else {
            levels.r
        };
        trace!(?cycle, ?levels, retract, "canned cycle");

        let mut pos = self.last_pos;
        if pos[axis] < retract {
            pos[axis] = retract;
            self.cycle_move(&pos, true, block, motion, ctx)?;
        }

        let mut moved = false;
        for i in (0..MAX_AXES).filter(|&i| i != axis) {
            if words.has(WordFlags::axis(i)) {
                pos[i] = target[i];
                moved = true;
            }
        }
        if moved {
            self.cycle_move(&pos, true, block, motion, ctx)?;
        }

        let repeats = if words.has(WordFlags::L) { words.l } else { 1 };
        let q = words.q();
        for _ in 0..repeats {
            if pos[axis] > levels.r {
                pos[axis] = levels.r;
                self.cycle_move(&pos, true, block, motion, ctx)?;
            }

            let mut depth = levels.r;
            loop {
                if cycle == CannedCycle::PeckDrill && q > 0.0 {
                    if depth < levels.r {
                        pos[axis] = (depth + q / 2.0).min(levels.r);
                        self.cycle_move(&pos, true, block, motion, ctx)?;
                    }
                    depth = (depth - q).max(levels.bottom);
                } else {
                    depth = levels.bottom;
                }

                pos[axis] = depth;
                self.cycle_move(&pos, false, block, motion, ctx)?;
                if depth <= levels.bottom {
                    break;
                }
                pos[axis] = levels.r;
                self.cycle_move(&pos, true, block, motion, ctx)?;
            }

            if cycle.requires_dwell() && cycle != CannedCycle::BoreSpindleStop {
                let ms = (words.p * 1000.0).min(f64::from(u16::MAX)) as u16;
                if ms > 0 {
                    let dwell = MotionBlock {
                        dwell_ms: ms,
                        ..motion.clone()
                    };
                    ctx.io.machine.dwell(&dwell)?;
                }
            }

            if cycle == CannedCycle::BoreSpindleStop {
                let stopped = MotionBlock {
                    spindle: Spindle::Off,
                    ..motion.clone()
                };
                ctx.io.machine.update_tools(&stopped)?;
            }

            pos[axis] = retract;
            let rapid_out = !matches!(cycle, CannedCycle::Bore | CannedCycle::BoreDwell);
            self.cycle_move(&pos, rapid_out, block, motion, ctx)?;

            if cycle == CannedCycle::BoreSpindleStop {
                ctx.io.machine.update_tools(motion)?;
                if !ctx.config.laser_mode && ctx.config.spindle_delay_ms > 0 {
                    let settle = MotionBlock {
                        dwell_ms: ctx.config.spindle_delay_ms,
                        ..motion.clone()
                    };
                    ctx.io.machine.dwell(&settle)?;
                }
            }
        }
        Ok(())
    }

    /// One cycle primitive, run like a G0 or G1 line of its own.
    fn cycle_move(
        &mut self,
        target: &Axes,
        rapid: bool,
        block: &Block,
        motion: &MotionBlock,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Status> {
        ctx.io.hooks.gcode_before_motion(target, block);
        self.straight(target, rapid, motion, ctx)?;
        ctx.io.hooks.gcode_after_motion(target, block);
        self.last_pos = *target;
        Ok(())
    }
}
