//! Cross-checks of a collected line before it may execute.

use crate::{
    config::ParserConfig,
    modal::{GroupFlags, LineCommand, M10, NonModal},
    state::{CannedCycle, FeedMode, Motion, ParserState, ToolLength},
    status::Status,
    words::{LineWords, WordFlags},
};

/// Turns `H` into the `Z` word of a G43 line.
pub(crate) fn resolve_tool_length_word(
    words: &mut LineWords,
    command: &LineCommand,
    config: &ParserConfig,
) -> Result<(), Status> {
    let Some(tool) = words.h else {
        return Ok(());
    };
    if !command.groups.contains(GroupFlags::TOOL_LENGTH) || config.axis_count < 3 {
        return Err(Status::UnusedWords);
    }
    if words.has(WordFlags::Z) {
        return Err(Status::WordRepeated);
    }
    words.axes[2] = config.tool_length_offset(tool);
    words.flags |= WordFlags::Z;
    Ok(())
}

pub(crate) fn validate(
    state: &mut ParserState,
    words: &LineWords,
    command: &mut LineCommand,
    config: &ParserConfig,
    jog: bool,
) -> Result<(), Status> {
    if jog {
        validate_jog(state, words, command)?;
    }

    if let Some(nonmodal) = command.nonmodal {
        validate_nonmodal(nonmodal, state, words, config)?;
    }

    if command.groups.contains(GroupFlags::MOTION) {
        validate_motion(state, words, command)?;
    }

    if state.modes.tool_length == ToolLength::Dynamic
        && command.groups.contains(GroupFlags::TOOL_LENGTH)
    {
        if !words.has(WordFlags::Z) {
            return Err(Status::AxisWordsExist);
        }
        // G43 consumes Z
        if command.groups.contains(GroupFlags::MOTION) {
            return Err(Status::ModalGroupViolation);
        }
    }

    if words.has(WordFlags::T) && words.t > config.tool_count {
        return Err(Status::InvalidTool);
    }

    if let Some(extended) = command.extended {
        if !command.groups.is_empty() {
            return Err(Status::ModalGroupViolation);
        }
        if extended == M10 && !words.flags.contains(WordFlags::S | WordFlags::P) {
            return Err(Status::ValueWordMissing);
        }
    }

    Ok(())
}

fn validate_jog(
    state: &mut ParserState,
    words: &LineWords,
    command: &mut LineCommand,
) -> Result<(), Status> {
    let allowed = GroupFlags::DISTANCE | GroupFlags::UNITS | GroupFlags::NON_MODAL;
    if !allowed.contains(command.groups) || command.extended.is_some() {
        return Err(Status::InvalidJogCommand);
    }
    if command
        .nonmodal
        .is_some_and(|nonmodal| nonmodal != NonModal::MachineCoords)
    {
        return Err(Status::InvalidJogCommand);
    }
    if words.has(WordFlags::JOG_INVALID) {
        return Err(Status::InvalidJogCommand);
    }
    state.modes.motion = Motion::Linear;
    command.groups |= GroupFlags::MOTION;
    Ok(())
}

fn validate_nonmodal(
    nonmodal: NonModal,
    state: &ParserState,
    words: &LineWords,
    config: &ParserConfig,
) -> Result<(), Status> {
    match nonmodal {
        NonModal::Dwell => {
            if !words.has(WordFlags::P) {
                return Err(Status::ValueWordMissing);
            }
            if words.p < 0.0 {
                return Err(Status::NegativeValue);
            }
        }
        NonModal::SetCoordData => {
            if !words.has(WordFlags::P | WordFlags::L) {
                return Err(Status::ValueWordMissing);
            }
            if words.l != 2 && words.l != 20 {
                return Err(Status::UnsupportedCommand);
            }
            let p = words.p;
            let stored_point = p == 28.0 || p == 30.0;
            if !stored_point && !(0.0..=f64::from(config.coord_system_count)).contains(&p) {
                return Err(Status::UnsupportedCoordSys);
            }
        }
        NonModal::SetOffset => {
            if !words.has_axes() {
                return Err(Status::NoAxisWords);
            }
        }
        NonModal::MachineCoords => {
            if !state.modes.motion.is_straight() {
                return Err(Status::G53InvalidMotionMode);
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_motion(
    state: &ParserState,
    words: &LineWords,
    command: &LineCommand,
) -> Result<(), Status> {
    let motion = state.modes.motion;
    match motion {
        Motion::Rapid | Motion::Linear | Motion::Probe(_) => {
            if !words.has_axes() {
                return Err(Status::NoAxisWords);
            }
        }
        Motion::ArcCw | Motion::ArcCcw => {
            let (a, b, _) = state.modes.plane.axes();
            let (i, j) = state.modes.plane.offsets();
            if !words.has(WordFlags::axis(a) | WordFlags::axis(b)) {
                return Err(Status::NoAxisWordsInPlane);
            }
            if !words.has(WordFlags::offset(i) | WordFlags::offset(j) | WordFlags::R) {
                return Err(Status::NoOffsetsInPlane);
            }
        }
        Motion::CancelCycle => {
            if words.has_axes() && !command.axis_words_claimed {
                return Err(Status::AxisWordsExist);
            }
        }
        Motion::Canned(cycle) => {
            if !words.has_axes() {
                return Err(Status::NoAxisWords);
            }
            if cycle.requires_dwell() && !words.has(WordFlags::P) {
                return Err(Status::CannedMissingP);
            }
            if cycle == CannedCycle::PeckDrill {
                if !words.has(WordFlags::Q) {
                    return Err(Status::CannedMissingQ);
                }
                if words.q() < 0.0 {
                    return Err(Status::NegativeValue);
                }
            }
        }
    }

    if !matches!(motion, Motion::Rapid | Motion::CancelCycle) {
        let defined = if words.has(WordFlags::F) {
            words.f > 0.0
        } else {
            state.modes.feed_mode != FeedMode::InverseTime && state.feed != 0.0
        };
        if !defined {
            return Err(Status::UndefinedFeedRate);
        }
    }

    Ok(())
}
