//! The main loop owner.
//!
//! [`Controller`] holds the committed parser state, the executor, the
//! real-time state machine and the collaborators, and moves between the
//! three loop states: it resets into [`LoopState::StartupReset`], runs
//! lines while [`LoopState::Running`], and parks in
//! [`LoopState::ErrorReset`] after an alarm that invalidated the position
//! until a soft reset arrives.

use crate::{
    alarm::{Alarm, Feedback, Message},
    cnc::{Cnc, Io, LoopState, Unlock},
    config::MachineConfig,
    executor::{ExecContext, Executor},
    hal::{Machine, MemoryStore, SettingsKey, SettingsStore},
    hooks::Hooks,
    offsets::Offsets,
    report::{Accessories, MachineState, Pins, ReportCounters, ReportTail, StatusReport, TailKind},
    signals::{ControlInputs, ExecState, Signals},
};
use gantry_gcode::{Axes, Block, LineParser, ParserState, Status, ToolLength};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Controller<M, S = MemoryStore> {
    config: MachineConfig,
    state: ParserState,
    executor: Executor,
    cnc: Cnc,
    machine: M,
    hooks: Hooks,
    store: S,
    counters: ReportCounters,
}

impl<M: Machine, S: SettingsStore> Controller<M, S> {
    /// Builds a controller in [`LoopState::StartupReset`]. Call
    /// [`Controller::start`] before feeding lines.
    pub fn new(config: MachineConfig, signals: Arc<Signals>, machine: M, store: S) -> Self {
        let offsets = Offsets::load(config.parser.coord_system_count, &store);
        Self {
            state: ParserState::new(&config.parser),
            executor: Executor::new(offsets),
            cnc: Cnc::new(signals, &config),
            machine,
            hooks: Hooks::new(),
            store,
            counters: ReportCounters::new(),
            config,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn cnc(&self) -> &Cnc {
        &self.cnc
    }

    pub fn signals(&self) -> &Arc<Signals> {
        self.cnc.signals()
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn take_messages(&mut self) -> Vec<Message> {
        self.cnc.take_messages()
    }

    fn io(&mut self) -> (&mut Cnc, Io<'_>) {
        (
            &mut self.cnc,
            Io {
                machine: &mut self.machine,
                hooks: &mut self.hooks,
            },
        )
    }

    /// Power-on and soft reset: resets the state machine, reloads the
    /// offsets and tries a non-forced unlock.
    pub fn start(&mut self) {
        let (cnc, mut io) = self.io();
        cnc.reset(&mut io);
        cnc.set_loop_state(LoopState::StartupReset);

        self.state.reset(&self.config.parser);
        let offsets = Offsets::load(self.config.parser.coord_system_count, &self.store);
        self.executor = Executor::new(offsets);
        self.hooks.parser_reset();
        self.executor.sync_position(self.machine.position());
        self.counters = ReportCounters::new();

        match self.unlock_and_reset(false) {
            Unlock::Error => {
                let (cnc, mut io) = self.io();
                cnc.check_fault_systems(&mut io);
                info!("waiting for the emergency stop to release");
            }
            _ => self.cnc.set_loop_state(LoopState::Running),
        }
    }

    /// One main-loop pass. Returns `false` when the pass stopped on a
    /// kill condition.
    pub fn dotasks(&mut self) -> bool {
        let jogging = self.cnc.exec_state().contains(ExecState::JOG);
        let (cnc, mut io) = self.io();
        let alive = cnc.dotasks(&mut io);
        if jogging {
            if alive && self.machine.is_empty() {
                self.signals().clear_raw(ExecState::JOG);
            }
            // a cancelled jog stops short of its target
            if !self.cnc.exec_state().contains(ExecState::JOG) {
                self.executor.sync_position(self.machine.position());
            }
        }
        if alive {
            return true;
        }

        match self.cnc.loop_state() {
            LoopState::StartupReset => {
                if !self.machine.controls().contains(ControlInputs::ESTOP) {
                    self.start();
                }
            }
            LoopState::Running => self.stop_on_alarm(),
            LoopState::ErrorReset => {
                if self.cnc.alarm_code() == Some(Alarm::SoftReset) {
                    self.start();
                }
            }
        }
        false
    }

    fn stop_on_alarm(&mut self) {
        let alarm = self.cnc.alarm_code();
        self.cnc.set_loop_state(LoopState::ErrorReset);
        if let Some(alarm) = alarm.filter(|alarm| alarm.is_reported()) {
            self.cnc.send(Message::Alarm(alarm));
        }

        match alarm {
            Some(Alarm::SoftReset) => self.start(),
            Some(alarm) if !alarm.needs_reset() => {
                // position is intact, the pending code keeps g-code locked
                if self.unlock_and_reset(false) != Unlock::Error {
                    self.cnc.set_loop_state(LoopState::Running);
                }
            }
            _ => {
                let (cnc, mut io) = self.io();
                cnc.check_fault_systems(&mut io);
            }
        }
    }

    fn unlock_and_reset(&mut self, force: bool) -> Unlock {
        let (cnc, mut io) = self.io();
        let unlock = cnc.unlock(force, &mut io);
        if unlock != Unlock::Ok {
            return unlock;
        }

        self.reset_parser();
        if self.cnc.loop_state() == LoopState::StartupReset && !self.config.homing {
            self.run_startup_blocks();
        }
        Unlock::Ok
    }

    fn reset_parser(&mut self) {
        self.state.reset(&self.config.parser);
        self.executor.reset();
        self.hooks.parser_reset();
        self.executor.sync_position(self.machine.position());
    }

    /// `$X`
    pub fn unlock(&mut self) -> Result<(), Status> {
        if self.cnc.loop_state() == LoopState::ErrorReset {
            self.cnc.send(Message::Feedback(Feedback::ResetToContinue));
            return Ok(());
        }
        if self.unlock_and_reset(true) == Unlock::Ok {
            if self.cnc.exec_state().contains(ExecState::DOOR) {
                return Err(Status::CheckDoor);
            }
            self.cnc.send(Message::Feedback(Feedback::Unlocked));
        }
        Ok(())
    }

    /// `$H`
    pub fn home(&mut self) -> Result<(), Status> {
        if !self.config.homing {
            return Err(Status::SettingDisabled);
        }
        if self.cnc.loop_state() == LoopState::ErrorReset {
            self.cnc.send(Message::Feedback(Feedback::ResetToContinue));
            return Ok(());
        }
        if self.unlock_and_reset(true) != Unlock::Ok {
            return Ok(());
        }
        if self.cnc.exec_state().contains(ExecState::DOOR) {
            return Err(Status::CheckDoor);
        }

        let (cnc, mut io) = self.io();
        if cnc.home(&mut io) {
            self.executor.sync_position(self.machine.position());
            self.run_startup_blocks();
        }
        Ok(())
    }

    /// Parses, validates and executes one g-code line. The parser state is
    /// committed only when every phase succeeds.
    pub fn execute_line(&mut self, line: &str) -> Result<(), Status> {
        let locked = !self
            .cnc
            .exec_state()
            .difference(ExecState::RUN | ExecState::HOLD)
            .is_empty();
        if locked || self.cnc.has_alarm() {
            return Err(Status::SystemGcLock);
        }
        self.run_line(line, false)
    }

    /// `$J=`. Jogs run only from idle or while another jog is running and
    /// never change the committed parser state.
    pub fn jog(&mut self, line: &str) -> Result<(), Status> {
        let state = self.cnc.exec_state();
        if self.cnc.has_alarm() || state.contains(ExecState::DOOR) {
            return Err(Status::SystemGcLock);
        }
        if !state.is_empty() && !state.contains(ExecState::JOG) {
            return Err(Status::IdleError);
        }
        self.run_line(line, true)
    }

    fn run_line(&mut self, line: &str, jog: bool) -> Result<(), Status> {
        let mut block = self.parse(line, jog)?;

        if block.is_empty() {
            for text in block.messages() {
                self.cnc.send(Message::Text(text.to_string()));
            }
            if !jog {
                self.state = block.state;
            }
            return Ok(());
        }

        let result = self.execute(&mut block);
        match result {
            Ok(()) if jog => {
                if !self.machine.check_mode() {
                    self.signals().set(ExecState::JOG);
                }
            }
            Ok(()) => self.state = block.state,
            Err(status) => debug!(%status, line, "line failed"),
        }
        result
    }

    fn parse(&mut self, line: &str, jog: bool) -> Result<Block, Status> {
        let params = self.executor.params(&self.state);
        let mut parser = LineParser::new(&self.config.parser)
            .with_params(&params)
            .with_extensions(&mut self.hooks);
        parser.jog = jog;
        parser.parse(line, &self.state)
    }

    fn execute(&mut self, block: &mut Block) -> Result<(), Status> {
        let mut ctx = ExecContext {
            config: &self.config,
            cnc: &mut self.cnc,
            io: Io {
                machine: &mut self.machine,
                hooks: &mut self.hooks,
            },
            store: &mut self.store,
        };
        self.executor.execute(block, &self.state, &mut ctx)
    }

    /// `$C`. Leaving check mode soft-resets the machine. Returns the new
    /// setting.
    pub fn toggle_check_mode(&mut self) -> bool {
        let enabled = !self.machine.check_mode();
        self.machine.set_check_mode(enabled);
        if enabled {
            self.cnc.send(Message::Feedback(Feedback::Enabled));
        } else {
            self.cnc.send(Message::Feedback(Feedback::Disabled));
            let (cnc, mut io) = self.io();
            cnc.alarm(Alarm::SoftReset, &mut io);
        }
        info!(enabled, "check mode");
        enabled
    }

    /// Stored startup lines, `$N`. Empty slots read as empty strings.
    pub fn startup_blocks(&self) -> Vec<String> {
        (0..self.config.startup_blocks)
            .map(|index| {
                self.store
                    .load(SettingsKey::StartupBlock(index))
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// `$Nx=line`. The line must parse against the current state; an empty
    /// line erases the slot.
    pub fn set_startup_block(&mut self, index: u8, line: &str) -> Result<(), Status> {
        if index >= self.config.startup_blocks {
            return Err(Status::InvalidStatement);
        }
        let key = SettingsKey::StartupBlock(index);
        if line.trim().is_empty() {
            self.store.erase(key);
            return Ok(());
        }
        if let Err(status) = self.parse(line, false) {
            self.store.erase(key);
            return Err(status);
        }
        self.store.save(key, line.as_bytes());
        Ok(())
    }

    fn run_startup_blocks(&mut self) {
        for line in self.startup_blocks() {
            if line.is_empty() {
                continue;
            }
            let result = self.execute_line(&line);
            if let Err(status) = result {
                warn!(%status, %line, "startup block failed");
            }
            self.cnc.send(Message::StartupLine { line, result });
        }
    }

    /// `$RST=#`
    pub fn erase_offsets(&mut self) {
        self.executor.offsets_mut().erase(&mut self.store);
        self.cnc.send(Message::Feedback(Feedback::RestoringDefaults));
    }

    /// `$RST=$` drops the stored startup lines.
    pub fn erase_startup_blocks(&mut self) {
        for index in 0..self.config.startup_blocks {
            self.store.erase(SettingsKey::StartupBlock(index));
        }
        self.cnc.send(Message::Feedback(Feedback::RestoringDefaults));
    }

    /// Offset from machine to work coordinates in effect.
    pub fn work_offset(&self) -> Axes {
        let tool_length = self.state.modes.tool_length == ToolLength::Dynamic;
        self.executor.offsets().work_offset(tool_length)
    }

    /// The `$G` summary: parser modes followed by anything the extension
    /// handlers add.
    pub fn modes(&mut self) -> String {
        let mut modes = self.state.to_string();
        for extra in self.hooks.parser_get_modes() {
            modes.push(' ');
            modes.push_str(&extra);
        }
        modes
    }

    pub fn status(&mut self) -> StatusReport {
        let machine = &self.machine;
        let state = MachineState::from_flags(
            self.cnc.exec_state(),
            machine.controls(),
            machine.check_mode(),
        );
        let pins = Pins {
            controls: machine.controls(),
            limits: machine.limits(),
            probe: machine.probe_triggered(),
        };

        let offset_changed = self.executor.offsets_mut().take_changed();
        let tail = match self.counters.next(offset_changed) {
            TailKind::WorkOffset => ReportTail::WorkOffset(self.work_offset()),
            TailKind::Overrides => {
                let (spindle, _, coolant) = self.machine.planned_tools();
                ReportTail::Overrides {
                    overrides: self.machine.overrides(),
                    accessories: Accessories { spindle, coolant },
                }
            }
            TailKind::None => ReportTail::None,
        };

        StatusReport {
            state,
            position: self.machine.position(),
            feed: self.machine.feed(),
            spindle_speed: self.machine.tool_speed(),
            pins,
            tail,
        }
    }

    /// Runs passes until queued motion finishes. Returns `false` when a
    /// pass stopped on a kill condition or a hold froze the queue.
    pub fn wait_idle(&mut self) -> bool {
        while !self.machine.is_empty() {
            if !self.dotasks() || self.cnc.exec_state().contains(ExecState::HOLD) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hal::MotionControl,
        signals::LimitInputs,
        sim::{SimEvent, SimMachine},
    };
    use gantry_gcode::{Distance, MAX_AXES, Units};

    type Sim = Controller<SimMachine>;

    fn controller(config: MachineConfig) -> Sim {
        let signals = Arc::new(Signals::new());
        let machine = SimMachine::new(signals.clone());
        let mut controller = Controller::new(config, signals, machine, MemoryStore::new());
        controller.start();
        controller.take_messages();
        controller
    }

    fn idle() -> Sim {
        controller(MachineConfig::default())
    }

    fn x(position: Axes) -> f64 {
        position[0]
    }

    #[test]
    fn starts_running_and_unlocked() {
        let controller = idle();
        assert_eq!(controller.cnc().loop_state(), LoopState::Running);
        assert_eq!(controller.cnc().exec_state(), ExecState::empty());
        assert!(!controller.cnc().has_alarm());
    }

    #[test]
    fn failed_lines_do_not_commit() {
        let mut controller = idle();
        controller.execute_line("G91 G1 X1 F100").unwrap();
        assert_eq!(controller.execute_line("G20 G1 X1 F0"), Err(Status::UndefinedFeedRate));
        assert_eq!(controller.state().modes.units, Units::Millimeters);
        assert_eq!(controller.state().feed, 100.0);

        controller.execute_line("#3=7").unwrap();
        assert_eq!(controller.state().user_var(3), 7.0);
    }

    #[test]
    fn moves_run_through_the_main_loop() {
        let mut controller = idle();
        controller.execute_line("G1 X10 F100").unwrap();
        assert!(controller.wait_idle());
        assert_eq!(x(controller.machine().position()), 10.0);
        assert_eq!(controller.status().state, MachineState::Idle);
    }

    #[test]
    fn hold_locks_nothing_but_other_flags_lock_gcode() {
        let mut controller = idle();
        controller.signals().call_rt_command(b'!');
        controller.dotasks();
        assert!(controller.execute_line("G1 X1 F10").is_ok());

        controller.signals().set(ExecState::DOOR);
        assert_eq!(controller.execute_line("G1 X2"), Err(Status::SystemGcLock));
    }

    #[test]
    fn jog_never_commits() {
        let mut controller = idle();
        controller.jog("G91 X5 F500").unwrap();
        assert!(controller.cnc().exec_state().contains(ExecState::JOG));
        assert_eq!(controller.state().modes.distance, Distance::Absolute);
        assert_eq!(controller.state().feed, 0.0);

        assert_eq!(controller.execute_line("G1 X1 F10"), Err(Status::SystemGcLock));
        assert!(controller.wait_idle());
        controller.dotasks();
        assert!(!controller.cnc().exec_state().contains(ExecState::JOG));
        assert_eq!(x(controller.machine().position()), 5.0);
    }

    #[test]
    fn jog_cancel_flushes_the_queue() {
        let mut controller = idle();
        controller.jog("G91 X5 F500").unwrap();
        controller.jog("G91 X5 F500").unwrap();
        controller.dotasks();
        controller.signals().call_rt_command(0x85);
        // the first pass decelerates, the second flushes
        controller.dotasks();
        controller.dotasks();
        assert!(!controller.cnc().exec_state().intersects(ExecState::JOG | ExecState::HOLD));
        assert_eq!(controller.machine().queued(), 0);
        assert_eq!(x(controller.machine().position()), 5.0);
        assert_eq!(x(controller.executor().last_position()), 5.0);
    }

    #[test]
    fn jog_needs_idle() {
        let mut controller = idle();
        controller.signals().set(ExecState::HOLD);
        assert_eq!(controller.jog("G91 X1 F100"), Err(Status::IdleError));
    }

    #[test]
    fn soft_reset_restarts() {
        let mut controller = idle();
        controller.execute_line("G91 G1 X1 F100").unwrap();
        controller.signals().call_rt_command(0x18);
        assert!(!controller.dotasks());
        assert_eq!(controller.cnc().loop_state(), LoopState::Running);
        assert_eq!(controller.cnc().alarm_code(), None);
        assert_eq!(controller.state().modes.distance, Distance::Absolute);
        assert!(controller.take_messages().contains(&Message::Banner));
    }

    #[test]
    fn probe_failure_locks_until_unlock() {
        let mut controller = idle();
        assert_eq!(
            controller.execute_line("G38.2 Z-10 F100"),
            Err(Status::CriticalFail)
        );
        assert!(!controller.dotasks());
        assert_eq!(controller.cnc().loop_state(), LoopState::Running);
        assert!(
            controller
                .take_messages()
                .contains(&Message::Alarm(Alarm::ProbeFailContact))
        );
        assert_eq!(controller.execute_line("G0 X1"), Err(Status::SystemGcLock));

        controller.unlock().unwrap();
        assert_eq!(
            controller.take_messages(),
            vec![Message::Feedback(Feedback::Unlocked)]
        );
        assert!(controller.execute_line("G0 X1").is_ok());
    }

    #[test]
    fn hard_limit_needs_a_reset() {
        let config = MachineConfig {
            hard_limits: true,
            ..MachineConfig::default()
        };
        let mut controller = controller(config);
        controller.execute_line("G1 X10 F100").unwrap();
        controller.dotasks();
        controller.machine().inputs().lock().limits = LimitInputs::X;
        assert!(!controller.dotasks());
        assert_eq!(controller.cnc().loop_state(), LoopState::ErrorReset);
        let messages = controller.take_messages();
        assert!(messages.contains(&Message::Alarm(Alarm::HardLimit)));
        assert!(messages.contains(&Message::Feedback(Feedback::CheckLimits)));
        assert!(messages.contains(&Message::Feedback(Feedback::ResetToContinue)));

        controller.unlock().unwrap();
        assert_eq!(controller.cnc().loop_state(), LoopState::ErrorReset);

        controller.machine().inputs().lock().limits = LimitInputs::empty();
        controller.signals().call_rt_command(0x18);
        controller.dotasks();
        assert_eq!(controller.cnc().loop_state(), LoopState::Running);
    }

    #[test]
    fn estop_waits_for_release() {
        let mut controller = idle();
        controller.machine().inputs().lock().controls = ControlInputs::ESTOP;
        assert!(!controller.dotasks());
        assert_eq!(controller.cnc().loop_state(), LoopState::StartupReset);
        assert!(
            controller
                .take_messages()
                .contains(&Message::Feedback(Feedback::CheckEmergencyStop))
        );
        assert!(!controller.dotasks());
        assert_eq!(controller.cnc().loop_state(), LoopState::StartupReset);

        controller.machine().inputs().lock().controls = ControlInputs::empty();
        controller.dotasks();
        assert_eq!(controller.cnc().loop_state(), LoopState::Running);
        assert!(!controller.cnc().has_alarm());
    }

    #[test]
    fn homing_unlocks_and_runs_startup_blocks() {
        let config = MachineConfig {
            homing: true,
            hard_limits: true,
            ..MachineConfig::default()
        };
        let mut controller = controller(config);
        controller.set_startup_block(0, "G91").unwrap();
        assert!(controller.cnc().has_alarm());
        assert_eq!(controller.execute_line("G0 X1"), Err(Status::SystemGcLock));

        controller.home().unwrap();
        assert!(controller.machine().events().contains(&SimEvent::Home));
        assert!(!controller.cnc().has_alarm());
        assert_eq!(controller.state().modes.distance, Distance::Incremental);
        assert!(controller.take_messages().contains(&Message::StartupLine {
            line: "G91".to_string(),
            result: Ok(()),
        }));
    }

    #[test]
    fn homing_can_be_disabled() {
        let mut controller = idle();
        assert_eq!(controller.home(), Err(Status::SettingDisabled));
    }

    #[test]
    fn startup_blocks_are_checked_before_saving() {
        let mut controller = idle();
        assert_eq!(
            controller.set_startup_block(1, "G1 G2"),
            Err(Status::ModalGroupViolation)
        );
        assert_eq!(controller.set_startup_block(5, "G90"), Err(Status::InvalidStatement));
        controller.set_startup_block(1, "G20").unwrap();
        assert_eq!(controller.startup_blocks(), vec![String::new(), "G20".to_string()]);

        controller.signals().call_rt_command(0x18);
        controller.dotasks();
        assert_eq!(controller.state().modes.units, Units::Inches);

        controller.erase_startup_blocks();
        assert_eq!(controller.startup_blocks(), vec![String::new(), String::new()]);
    }

    #[test]
    fn check_mode_moves_nothing() {
        let mut controller = idle();
        assert!(controller.toggle_check_mode());
        controller.execute_line("G1 X10 F100").unwrap();
        assert!(controller.wait_idle());
        assert_eq!(controller.machine().position(), [0.0; MAX_AXES]);
        assert_eq!(controller.status().state, MachineState::Check);

        assert!(!controller.toggle_check_mode());
        controller.dotasks();
        assert_eq!(controller.cnc().loop_state(), LoopState::Running);
        assert!(!controller.machine().check_mode());
    }

    #[test]
    fn status_tails() {
        let mut controller = idle();
        controller.execute_line("G92 X5").unwrap();
        let report = controller.status();
        assert_eq!(report.state, MachineState::Idle);
        match report.tail {
            ReportTail::WorkOffset(offset) => assert_eq!(offset[0], -5.0),
            other => panic!("unexpected tail {other:?}"),
        }
        assert!(matches!(controller.status().tail, ReportTail::Overrides { .. }));
        assert_eq!(controller.status().tail, ReportTail::None);
    }

    #[test]
    fn erasing_offsets_clears_the_store() {
        let mut controller = idle();
        controller.execute_line("G10 L2 P1 X3").unwrap();
        assert_eq!(controller.executor().offsets().stored(0)[0], 3.0);
        controller.erase_offsets();
        assert_eq!(controller.executor().offsets().stored(0)[0], 0.0);
        assert!(controller.store().is_empty());
    }

    #[test]
    fn modes_include_extensions() {
        let mut controller = idle();
        controller
            .hooks_mut()
            .on_parser_get_modes(|modes| modes.push("M101".to_string()));
        assert!(controller.modes().ends_with("S0 M101"));
    }
}
