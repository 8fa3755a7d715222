use super::*;
use crate::{
    cnc::LoopState,
    hal::{MemoryStore, MotionControl},
    hooks::Hooks,
    signals::Signals,
    sim::{SimEvent, SimMachine},
};
use gantry_gcode::{Coolant, LineParser};
use std::{cell::Cell, rc::Rc, sync::Arc};

struct Harness {
    config: MachineConfig,
    state: ParserState,
    executor: Executor,
    cnc: Cnc,
    machine: SimMachine,
    hooks: Hooks,
    store: MemoryStore,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(MachineConfig::default())
    }

    fn with_config(config: MachineConfig) -> Self {
        let signals = Arc::new(Signals::new());
        let mut harness = Self {
            state: ParserState::new(&config.parser),
            executor: Executor::new(Offsets::new(config.parser.coord_system_count)),
            cnc: Cnc::new(signals.clone(), &config),
            machine: SimMachine::new(signals),
            hooks: Hooks::new(),
            store: MemoryStore::new(),
            config,
        };
        let mut io = Io {
            machine: &mut harness.machine,
            hooks: &mut harness.hooks,
        };
        harness.cnc.reset(&mut io);
        harness.cnc.unlock(false, &mut io);
        harness.cnc.set_loop_state(LoopState::Running);
        harness.cnc.take_messages();
        harness
    }

    fn run(&mut self, line: &str) -> Result<(), Status> {
        let mut block = {
            let params = self.executor.params(&self.state);
            LineParser::new(&self.config.parser)
                .with_params(&params)
                .parse(line, &self.state)?
        };
        let mut ctx = ExecContext {
            config: &self.config,
            cnc: &mut self.cnc,
            io: Io {
                machine: &mut self.machine,
                hooks: &mut self.hooks,
            },
            store: &mut self.store,
        };
        self.executor.execute(&mut block, &self.state, &mut ctx)?;
        self.state = block.state;
        Ok(())
    }

    fn run_all(&mut self, lines: &[&str]) {
        for line in lines {
            self.run(line).unwrap();
        }
    }

    /// Straight moves issued since the last call, as `(xyz, rapid)`.
    fn moves(&mut self) -> Vec<([f64; 3], bool)> {
        self.machine
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                SimEvent::Line { target, feed } => {
                    Some(([target[0], target[1], target[2]], feed == MotionBlock::RAPID))
                }
                _ => None,
            })
            .collect()
    }

    fn position(&self) -> [f64; 3] {
        let pos = self.executor.last_position();
        [pos[0], pos[1], pos[2]]
    }
}

#[test]
fn feed_carries_to_later_lines() {
    let mut h = Harness::new();
    h.run_all(&["G1 X10 F100", "X20"]);
    assert_eq!(
        h.machine.events(),
        [
            SimEvent::Line {
                target: [10.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                feed: 100.0
            },
            SimEvent::Line {
                target: [20.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                feed: 100.0
            },
        ]
    );
}

#[test]
fn missing_feed_is_rejected() {
    let mut h = Harness::new();
    assert!(h.run("G1 X5").is_err());
    assert_eq!(h.position(), [0.0; 3]);
    assert!(h.machine.events().is_empty());
}

#[test]
fn distance_modes() {
    bolero::check!()
        .with_type::<Vec<(i8, i8)>>()
        .for_each(|steps| {
            let mut h = Harness::new();
            h.run("G91").unwrap();
            let mut expected = [0.0; 3];
            for &(x, y) in steps.iter().take(16) {
                h.run(&format!("G0 X{x} Y{y}")).unwrap();
                expected[0] += f64::from(x);
                expected[1] += f64::from(y);
            }
            assert_eq!(h.position(), expected);

            // absolute targets do not depend on where the machine is
            h.run("G90 G0 X3 Y-4").unwrap();
            h.run("G0 X3 Y-4").unwrap();
            assert_eq!(h.position(), [3.0, -4.0, 0.0]);
        });
}

#[test]
fn force_relative_axes_always_add() {
    let config = MachineConfig {
        force_relative: WordFlags::axis(0),
        ..MachineConfig::default()
    };
    let mut h = Harness::with_config(config);
    h.run_all(&["G0 X5 Y5", "G0 X5 Y5"]);
    assert_eq!(h.position(), [10.0, 5.0, 0.0]);
}

#[test]
fn g92_shifts_and_persists() {
    let mut h = Harness::new();
    h.run_all(&["G0 X10", "G92 X0"]);
    assert_eq!(h.executor.offsets().g92[0], 10.0);
    assert_eq!(Offsets::load(6, &h.store).g92_permanent[0], 10.0);
    h.moves();

    h.run("G0 X5").unwrap();
    assert_eq!(h.position()[0], 15.0);

    h.run("G92.2").unwrap();
    h.run("G0 X5").unwrap();
    assert_eq!(h.position()[0], 5.0);
    h.run("G92.3").unwrap();
    h.run("G0 X5").unwrap();
    assert_eq!(h.position()[0], 15.0);

    h.run("G92.1").unwrap();
    assert_eq!(h.executor.offsets().g92, [0.0; MAX_AXES]);
    assert_eq!(Offsets::load(6, &h.store).g92_permanent, [0.0; MAX_AXES]);
}

#[test]
fn g10_stores_coordinate_systems() {
    let mut h = Harness::new();
    h.run("G10 L2 P1 X5 Y-1").unwrap();
    assert!(h.moves().is_empty());
    assert_eq!(h.executor.offsets().stored(0)[..2], [5.0, -1.0]);
    assert_eq!(Offsets::load(6, &h.store).stored(0)[..2], [5.0, -1.0]);

    h.run("G0 X1 Y1").unwrap();
    assert_eq!(h.position(), [6.0, 0.0, 0.0]);

    // L20 makes the current position read as the given value
    h.run("G10 L20 P2 X0").unwrap();
    assert_eq!(h.executor.offsets().stored(1)[0], 6.0);
    h.run("G55 G0 X0").unwrap();
    assert_eq!(h.position()[0], 6.0);
    assert_eq!(h.executor.offsets().active, 1);
}

#[test]
fn failed_line_keeps_the_coordinate_system() {
    let mut h = Harness::new();
    h.run_all(&["G10 L2 P2 X5", "G90 G54"]);
    assert_eq!(
        h.run("G55 G2 X10 Y0 I100 F100"),
        Err(Status::InvalidTarget)
    );
    assert_eq!(h.state.modes.coord_system, 0);
    assert_eq!(h.executor.offsets().active, 0);

    h.run("G1 X1 F100").unwrap();
    assert_eq!(h.moves(), [([1.0, 0.0, 0.0], false)]);
}

#[test]
fn named_position_is_the_machine_position() {
    let mut h = Harness::new();
    h.run_all(&["G10 L2 P1 X5", "G90 G0 X1", "#1=#<_x>", "G92 X0", "#2=#<_X>"]);
    assert_eq!(h.state.user_var(1), 6.0);
    assert_eq!(h.state.user_var(2), 6.0);

    h.run_all(&["G0 X2", "G10 L2 P2 X1", "G55", "#3=#<_x>", "#4=#<_coord_system>"]);
    assert_eq!(h.state.user_var(3), 8.0);
    assert_eq!(h.state.user_var(4), 2.0);
    assert_eq!(h.run("G0 X#<_depth>"), Err(Status::BadNumberFormat));
}

#[test]
fn g53_ignores_work_offsets() {
    let mut h = Harness::new();
    h.run_all(&["G10 L2 P1 X5", "G53 G0 X1"]);
    assert_eq!(h.position()[0], 1.0);
    h.run("G0 X1").unwrap();
    assert_eq!(h.position()[0], 6.0);
}

#[test]
fn g28_goes_through_the_intermediate_point() {
    let mut h = Harness::new();
    h.run_all(&["G10 L2 P28 Z20", "G0 X10 Y10"]);
    h.moves();

    h.run("G28 X0").unwrap();
    assert_eq!(
        h.moves(),
        [
            ([0.0, 10.0, 0.0], true),
            ([0.0, 0.0, 20.0], true),
        ]
    );
    assert_eq!(h.position(), [0.0, 0.0, 20.0]);

    h.run("G30").unwrap();
    assert_eq!(h.moves(), [([0.0, 0.0, 0.0], true)]);
}

#[test]
fn probe_records_contact() {
    let mut h = Harness::new();
    h.machine.inputs().lock().probe_contact = Some([0.0, 0.0, -4.0, 0.0, 0.0, 0.0]);
    h.run("G38.2 Z-10 F100").unwrap();

    assert_eq!(h.position(), [0.0, 0.0, -4.0]);
    assert!(h.executor.offsets().probe_succeeded);
    assert_eq!(h.executor.offsets().probe_position[2], -4.0);
    assert_eq!(
        h.cnc.take_messages(),
        vec![Message::Probe {
            position: [0.0, 0.0, -4.0, 0.0, 0.0, 0.0],
            success: true
        }]
    );
}

#[test]
fn probe_failures() {
    let mut h = Harness::new();
    assert_eq!(h.run("G38.2 Z-10 F100"), Err(Status::CriticalFail));
    assert_eq!(h.cnc.alarm_code(), Some(Alarm::ProbeFailContact));
    // the position follows the probe even when it fails
    assert_eq!(h.position(), [0.0, 0.0, -10.0]);

    let mut h = Harness::new();
    h.run("G38.3 Z-10 F100").unwrap();
    assert_eq!(h.cnc.alarm_code(), None);
    assert!(!h.executor.offsets().probe_succeeded);
    assert!(matches!(
        h.cnc.take_messages()[..],
        [Message::Probe { success: false, .. }]
    ));

    let mut h = Harness::new();
    h.machine.inputs().lock().probe = true;
    assert_eq!(h.run("G38.2 Z-10 F100"), Err(Status::CriticalFail));
    assert_eq!(h.cnc.alarm_code(), Some(Alarm::ProbeFailInitial));
}

#[test]
fn arcs() {
    let mut h = Harness::new();
    h.run("G2 X10 Y0 I5 J0 F100").unwrap();
    let events = h.machine.take_events();
    let [SimEvent::Arc { arc, feed, .. }] = &events[..] else {
        panic!("expected one arc, got {events:?}");
    };
    assert_eq!(arc.center, (5.0, 0.0));
    assert!(arc.clockwise);
    assert_eq!(*feed, 100.0);

    let mut h = Harness::new();
    assert_eq!(h.run("G2 X10 Y0 I4 J0 F100"), Err(Status::InvalidTarget));
    assert_eq!(h.run("G3 X10 Y0 R4 F100"), Err(Status::ArcRadiusError));
    assert_eq!(h.position(), [0.0; 3]);
}

#[test]
fn arcs_follow_the_plane_on_their_line() {
    let mut h = Harness::new();
    h.run("G18 G2 X10 Z0 I5 F100").unwrap();
    let events = h.machine.take_events();
    let [SimEvent::Arc { arc, .. }] = &events[..] else {
        panic!("expected one arc, got {events:?}");
    };
    assert_eq!(arc.axes, (2, 0, 1));
    assert_eq!(arc.center, (0.0, 5.0));
    assert_eq!(h.position(), [10.0, 0.0, 0.0]);
}

#[test]
fn drilling_cycle() {
    let mut h = Harness::new();
    h.run("G0 Z5").unwrap();
    h.moves();

    h.run("G81 X10 Y0 Z-2 R1 F100").unwrap();
    assert_eq!(
        h.moves(),
        [
            ([10.0, 0.0, 5.0], true),
            ([10.0, 0.0, 1.0], true),
            ([10.0, 0.0, -2.0], false),
            ([10.0, 0.0, 5.0], true),
        ]
    );
    let levels = h.executor.canned_state().copied().unwrap();
    assert_eq!((levels.r, levels.old_z, levels.bottom), (1.0, 5.0, -2.0));

    // the next hole reuses R and the depth
    h.run("X20").unwrap();
    assert_eq!(
        h.moves(),
        [
            ([20.0, 0.0, 5.0], true),
            ([20.0, 0.0, 1.0], true),
            ([20.0, 0.0, -2.0], false),
            ([20.0, 0.0, 5.0], true),
        ]
    );

    h.run("G80").unwrap();
    assert!(h.executor.canned_state().is_none());
}

#[test]
fn peck_drilling_to_r_level() {
    let mut h = Harness::new();
    h.run("G0 Z5").unwrap();
    h.moves();

    h.run("G99 G83 Z-3 R0 Q1.5 F50").unwrap();
    let depths: Vec<_> = h.moves().into_iter().map(|(xyz, rapid)| (xyz[2], rapid)).collect();
    assert_eq!(
        depths,
        [
            (0.0, true),
            (-1.5, false),
            (0.0, true),
            (-0.75, true),
            (-3.0, false),
            (0.0, true),
        ]
    );
}

#[test]
fn dwell_and_spindle_stop_cycles() {
    let mut h = Harness::new();
    h.run_all(&["M3 S1000", "G0 Z5"]);
    h.machine.take_events();

    h.run("G86 Z-1 R1 P0.5 F100").unwrap();
    let events = h.machine.take_events();
    let spindle: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            SimEvent::Tools { spindle, .. } => Some(*spindle),
            _ => None,
        })
        .collect();
    assert_eq!(spindle, [Spindle::Off, Spindle::Clockwise]);

    h.run("G80").unwrap();
    h.run("G82 Z-1 R1 P0.25").unwrap();
    assert!(h.machine.events().contains(&SimEvent::Dwell { ms: 250 }));
}

#[test]
fn canned_cycle_requirements() {
    let mut h = Harness::new();
    assert_eq!(h.run("G81 Z-1 F10"), Err(Status::ValueWordMissing));
    assert_eq!(h.run("G84 Z-1 R1 F10"), Err(Status::UnsupportedCommand));
    assert_eq!(h.run("G86 Z-1 R1 P1 F10"), Err(Status::SpindleStopped));
    assert_eq!(h.run("G93 G81 Z-1 R1 F10"), Err(Status::CannedInvalidFeedMode));
    assert!(h.machine.events().is_empty());
}

#[test]
fn program_end_locks_until_reset() {
    let mut h = Harness::new();
    h.run("G0 X1 M2").unwrap();
    assert!(h.cnc.exec_state().contains(ExecState::HOLD));
    assert!(
        h.cnc
            .take_messages()
            .contains(&Message::Feedback(Feedback::ProgramEnd))
    );
    assert_eq!(h.run("G0 X2"), Err(Status::ProgramEnded));

    h.state.reset(&h.config.parser);
    h.run("G0 X2").unwrap();
}

#[test]
fn pauses() {
    let mut h = Harness::new();
    h.run("M1").unwrap();
    assert!(!h.cnc.exec_state().contains(ExecState::HOLD));

    h.run("M0").unwrap();
    assert!(h.cnc.exec_state().contains(ExecState::HOLD));
    // the stop does not carry to the next line
    h.run("G0 X1").unwrap();
    assert_eq!(h.state.modes.stopping, Stopping::Continue);

    let mut h = Harness::with_config(MachineConfig {
        optional_stop: true,
        ..MachineConfig::default()
    });
    h.run("M1").unwrap();
    assert!(h.cnc.exec_state().contains(ExecState::HOLD));
}

#[test]
fn dwell_durations() {
    let mut h = Harness::new();
    h.run("G4 P0").unwrap();
    assert!(h.machine.events().is_empty());

    h.run("G4 P0.5").unwrap();
    h.run("G4 P100").unwrap();
    assert_eq!(
        h.machine.take_events(),
        [SimEvent::Dwell { ms: 500 }, SimEvent::Dwell { ms: u16::MAX }]
    );
}

#[test]
fn inch_words_convert() {
    let mut h = Harness::new();
    h.run("G20 G1 X1 F10").unwrap();
    let events = h.machine.take_events();
    let [SimEvent::Line { target, feed }] = &events[..] else {
        panic!("expected one move, got {events:?}");
    };
    assert!((target[0] - 25.4).abs() < 1e-9);
    assert!((feed - 254.0).abs() < 1e-9);
}

#[test]
fn tool_length_offset() {
    let mut h = Harness::new();
    h.run("G43.1 Z2").unwrap();
    assert!(h.machine.events().is_empty());
    assert_eq!(h.executor.offsets().tool_length, 2.0);

    h.run("G0 Z0").unwrap();
    assert_eq!(h.position()[2], 2.0);
    h.run_all(&["G49", "G0 Z0"]);
    assert_eq!(h.position()[2], 0.0);
}

#[test]
fn spindle_changes_settle() {
    let mut h = Harness::with_config(MachineConfig {
        spindle_delay_ms: 500,
        ..MachineConfig::default()
    });
    h.run("M3 S1000").unwrap();
    assert_eq!(
        h.machine.take_events(),
        [
            SimEvent::Tools {
                spindle: Spindle::Clockwise,
                speed: 1000.0,
                coolant: Coolant::empty()
            },
            SimEvent::Dwell { ms: 500 },
        ]
    );

    h.run("M8").unwrap();
    assert_eq!(
        h.machine.take_events(),
        [SimEvent::Tools {
            spindle: Spindle::Clockwise,
            speed: 1000.0,
            coolant: Coolant::FLOOD
        }]
    );
}

#[test]
fn laser_mode_skips_the_settle_delay() {
    let mut h = Harness::with_config(MachineConfig {
        laser_mode: true,
        spindle_delay_ms: 500,
        ..MachineConfig::default()
    });
    h.run("M3 S1000").unwrap();
    assert_eq!(h.machine.take_events().len(), 1);
}

#[test]
fn tool_change_waits_for_motion() {
    let mut h = Harness::new();
    h.run("G0 X5").unwrap();
    h.run("T2 M6").unwrap();
    assert!(h.machine.is_empty());
    assert!(h.machine.events().contains(&SimEvent::ToolChange(2)));
    assert_eq!(h.state.active_tool, 2);
}

#[test]
fn servo_outputs() {
    let mut h = Harness::new();
    h.run("M10 P3 S300").unwrap();
    assert_eq!(h.machine.output(3), 255);
    h.run("M10 P9 S10").unwrap();
    assert_eq!(
        h.machine.events(),
        [SimEvent::Output { pin: 3, value: 255 }]
    );
}

#[test]
fn messages_are_forwarded() {
    let mut h = Harness::new();
    h.run("(MSG,hello)").unwrap();
    assert_eq!(h.cnc.take_messages(), vec![Message::Text("hello".into())]);
}

#[test]
fn handlers_can_take_over_motion() {
    let mut h = Harness::new();
    let claimed = Rc::new(Cell::new(0));
    let seen = claimed.clone();
    h.hooks.on_gcode_exec(move |event| {
        if event.block.state.modes.motion != Motion::Linear {
            return None;
        }
        seen.set(seen.get() + 1);
        Some(Ok(()))
    });
    let moves = Rc::new(Cell::new(0));
    let counter = moves.clone();
    h.hooks
        .on_gcode_after_motion(move |_, _| counter.set(counter.get() + 1));

    h.run("G1 X3 F10").unwrap();
    h.run("G0 X4").unwrap();
    assert_eq!(claimed.get(), 1);
    assert_eq!(moves.get(), 2);
    assert_eq!(h.moves(), [([4.0, 0.0, 0.0], true)]);
}
