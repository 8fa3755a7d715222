//! The real-time state machine.
//!
//! [`Cnc`] owns the alarm bookkeeping and reconciles the flags in
//! [`Signals`] with the live inputs once per main-loop pass. It never
//! blocks except through the explicit delays of [`Cnc::delay`] and
//! [`Cnc::sync`], both of which keep servicing housekeeping.

use crate::{
    alarm::{Alarm, Feedback, Message},
    config::MachineConfig,
    hal::{Machine, MotionBlock, OverrideChange},
    hooks::Hooks,
    signals::{ControlInputs, ExecState, FeedOverride, RtCommand, Signals, ToolOverride},
};
use gantry_gcode::Coolant;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators touched during a main-loop pass.
pub struct Io<'a> {
    pub machine: &'a mut dyn Machine,
    pub hooks: &'a mut Hooks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Initializing or waiting for the emergency stop to release.
    StartupReset,
    Running,
    /// An alarm stopped the command loop. Alarms are no longer reported.
    ErrorReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unlock {
    Ok,
    /// An alarm flag is still set but can be cleared with `$H` or `$X`.
    Locked,
    /// A kill condition is still active.
    Error,
}

#[derive(Debug)]
pub struct Cnc {
    signals: Arc<Signals>,
    loop_state: LoopState,
    alarm: Option<Alarm>,
    hard_limits: bool,
    homing: bool,
    laser_mode: bool,
    coolant_resume_delay_ms: u32,
    spindle_resume_delay_ms: u32,
    messages: Vec<Message>,
}

impl Cnc {
    pub fn new(signals: Arc<Signals>, config: &MachineConfig) -> Self {
        Self {
            signals,
            loop_state: LoopState::StartupReset,
            alarm: None,
            hard_limits: config.hard_limits,
            homing: config.homing,
            laser_mode: config.laser_mode,
            coolant_resume_delay_ms: config.coolant_resume_delay_ms,
            spindle_resume_delay_ms: config.spindle_resume_delay_ms,
            messages: Vec::new(),
        }
    }

    pub fn signals(&self) -> &Arc<Signals> {
        &self.signals
    }

    pub fn exec_state(&self) -> ExecState {
        self.signals.exec_state()
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    pub fn set_loop_state(&mut self, state: LoopState) {
        self.loop_state = state;
    }

    /// The pending alarm, cleared by a forced unlock or a reset.
    pub fn alarm_code(&self) -> Option<Alarm> {
        self.alarm
    }

    pub fn set(&self, mask: ExecState) {
        self.signals.set(mask);
    }

    pub fn has_alarm(&self) -> bool {
        self.signals.intersects(ExecState::ALARM) || self.alarm.is_some()
    }

    pub fn send(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }

    /// Pauses motion, as M0 does.
    pub fn pause(&self) {
        self.signals.set(ExecState::HOLD);
    }

    /// Clears `mask`, except for flags an active input or pending alarm
    /// still holds. Releasing a hold restores the tools first.
    pub fn clear(&mut self, mask: ExecState, io: &mut Io<'_>) {
        let mut mask = mask;
        let controls = io.machine.controls();
        if controls.contains(ControlInputs::ESTOP) {
            mask.remove(ExecState::KILL);
        }
        if controls.contains(ControlInputs::SAFETY_DOOR) {
            mask.remove(ExecState::DOOR | ExecState::HOLD);
        }
        if controls.contains(ControlInputs::FEED_HOLD) {
            mask.remove(ExecState::HOLD);
        }
        if self.alarm.is_some() {
            mask.remove(ExecState::LIMITS);
        }
        if self.hard_limits && (!io.machine.limits().is_empty() || self.homing) {
            mask.remove(ExecState::LIMITS);
        }

        if mask.contains(ExecState::HOLD) && self.signals.contains(ExecState::HOLD) {
            self.signals.set(ExecState::RESUMING);
            self.signals.clear_raw(ExecState::HOLD);
            let settle = !self.laser_mode && !io.machine.is_empty();
            io.machine.restore_coolant();
            if settle {
                self.delay(self.coolant_resume_delay_ms, io);
            }
            io.machine.restore_spindle();
            if settle {
                self.delay(self.spindle_resume_delay_ms, io);
            }
            self.signals.clear_raw(ExecState::RESUMING);
        }

        self.signals.clear_raw(mask);
    }

    /// Kills motion and records `alarm`.
    pub fn alarm(&mut self, alarm: Alarm, io: &mut Io<'_>) {
        warn!(code = alarm.code(), %alarm, "alarm");
        self.signals.set(ExecState::KILL);
        self.stop(io);
        self.alarm = Some(alarm);
    }

    /// Stops motion and every tool.
    pub fn stop(&mut self, io: &mut Io<'_>) {
        io.machine.stop();
        io.machine.stop_tools();
        io.hooks.cnc_stop();
    }

    pub fn unlock(&mut self, force: bool, io: &mut Io<'_>) -> Unlock {
        self.clear(ExecState::ALARM | ExecState::HOLD, io);
        self.check_interlocking(io);

        if force {
            self.signals.clear_raw(ExecState::LIMITS);
            self.alarm = None;
        }

        if self.signals.intersects(ExecState::ALARM) {
            if self.signals.intersects(ExecState::KILL) {
                return Unlock::Error;
            }
            self.send(Message::Feedback(Feedback::Unlock));
            return Unlock::Locked;
        }

        // limits latched by a past trip are released on request
        self.signals.clear_raw(ExecState::LIMITS);
        self.clear(ExecState::GCODE_LOCKED | ExecState::HOLD, io);
        info!(force, "unlocked");
        Unlock::Ok
    }

    /// Resets the state machine to power-on: every alarm flag and a hold.
    pub fn reset(&mut self, io: &mut Io<'_>) {
        self.signals.clear_pending();
        self.signals.store(
            ExecState::UNHOMED | ExecState::LIMITS | ExecState::KILL | ExecState::HOLD,
        );
        self.alarm = None;
        io.machine.clear();
        io.machine.sync();
        io.hooks.cnc_reset();
        self.send(Message::Banner);
        info!("reset");
    }

    /// Runs the homing cycle. Returns `true` on success.
    pub fn home(&mut self, io: &mut Io<'_>) -> bool {
        info!("homing");
        self.signals.set(ExecState::HOMING);
        match io.machine.home() {
            Ok(()) => {
                self.signals.clear_raw(ExecState::HOMING | ExecState::UNHOMED);
                io.machine.sync();
                true
            }
            Err(alarm) => {
                self.clear(ExecState::HOMING, io);
                self.alarm(alarm, io);
                false
            }
        }
    }

    /// Samples the inputs and answers status report requests.
    pub fn housekeeping(&mut self, io: &mut Io<'_>) {
        self.signals.controls_changed(io.machine.controls());
        let armed = self.hard_limits || self.signals.intersects(ExecState::HOMING);
        if self.signals.limits_changed(io.machine.limits(), armed) {
            let state = self.signals.exec_state();
            if state.contains(ExecState::HOMING) {
                io.machine.stop();
            } else if state.contains(ExecState::RUN) {
                self.signals.set(ExecState::UNHOMED);
                self.alarm(Alarm::HardLimit, io);
            } else {
                self.alarm(Alarm::HardLimitNoMotion, io);
            }
        }
        if self.signals.take(RtCommand::REPORT) {
            self.send(Message::StatusReport);
        }
    }

    /// Waits `ms` while servicing housekeeping.
    pub fn delay(&mut self, ms: u32, io: &mut Io<'_>) {
        io.machine.delay(ms);
        self.housekeeping(io);
    }

    /// Waits for queued motion to finish. Returns `false` when a pass
    /// reported a kill.
    pub fn sync(&mut self, io: &mut Io<'_>) -> bool {
        while !io.machine.is_empty() {
            if !self.dotasks(io) {
                return false;
            }
        }
        true
    }

    /// One pass of the main loop. Returns `false` once a kill condition
    /// requires the command loop to stop.
    pub fn dotasks(&mut self, io: &mut Io<'_>) -> bool {
        self.housekeeping(io);

        if self.loop_state == LoopState::StartupReset {
            return false;
        }

        self.exec_rt_commands(io);

        if self.has_alarm() {
            return !self
                .signals
                .intersects(ExecState::KILL | ExecState::HOMING);
        }

        if self.loop_state == LoopState::ErrorReset {
            return !self.signals.intersects(ExecState::KILL);
        }

        io.hooks.cnc_dotasks();

        if !self.check_interlocking(io) {
            return !self.signals.intersects(ExecState::KILL);
        }

        io.machine.run();
        !self.signals.intersects(ExecState::KILL)
    }

    /// Drains the pending realtime command sets.
    pub fn exec_rt_commands(&mut self, io: &mut Io<'_>) {
        let pending = self.signals.pending() & (RtCommand::RESET | RtCommand::CYCLE_START);
        if !pending.is_empty() {
            self.signals.take(pending);
            if pending.contains(RtCommand::RESET) {
                self.alarm(Alarm::SoftReset, io);
                return;
            }
            if pending.contains(RtCommand::CYCLE_START) {
                self.clear(ExecState::HOLD, io);
            }
        }

        let feed = self.signals.take_feed_overrides();
        if !feed.is_empty() {
            let normal = feed & FeedOverride::NORMAL;
            let change = if normal == FeedOverride::FEED_100 {
                Some(OverrideChange::FeedReset)
            } else if normal == FeedOverride::FEED_INC_COARSE {
                Some(OverrideChange::Feed(OverrideChange::COARSE))
            } else if normal == FeedOverride::FEED_DEC_COARSE {
                Some(OverrideChange::Feed(-OverrideChange::COARSE))
            } else if normal == FeedOverride::FEED_INC_FINE {
                Some(OverrideChange::Feed(OverrideChange::FINE))
            } else if normal == FeedOverride::FEED_DEC_FINE {
                Some(OverrideChange::Feed(-OverrideChange::FINE))
            } else {
                None
            };
            if let Some(change) = change {
                io.machine.apply_override(change);
            }

            let rapid = feed & FeedOverride::RAPID;
            let rapid = if rapid == FeedOverride::RAPID_100 {
                Some(100)
            } else if rapid == FeedOverride::RAPID_OVR1 {
                Some(OverrideChange::RAPID_OVR1)
            } else if rapid == FeedOverride::RAPID_OVR2 {
                Some(OverrideChange::RAPID_OVR2)
            } else {
                None
            };
            if let Some(percent) = rapid {
                io.machine.apply_override(OverrideChange::Rapid(percent));
            }
        }

        let tool = self.signals.take_tool_overrides();
        if tool.is_empty() {
            return;
        }

        let mut update_tools = true;
        let spindle = tool & ToolOverride::SPINDLE;
        if spindle == ToolOverride::SPINDLE_100 {
            io.machine.apply_override(OverrideChange::SpindleReset);
        } else if spindle == ToolOverride::SPINDLE_INC_COARSE {
            io.machine
                .apply_override(OverrideChange::Spindle(OverrideChange::COARSE));
        } else if spindle == ToolOverride::SPINDLE_DEC_COARSE {
            io.machine
                .apply_override(OverrideChange::Spindle(-OverrideChange::COARSE));
        } else if spindle == ToolOverride::SPINDLE_INC_FINE {
            io.machine
                .apply_override(OverrideChange::Spindle(OverrideChange::FINE));
        } else if spindle == ToolOverride::SPINDLE_DEC_FINE {
            io.machine
                .apply_override(OverrideChange::Spindle(-OverrideChange::FINE));
        } else if spindle == ToolOverride::SPINDLE_TOGGLE {
            // only a settled hold may stop the spindle
            let state = self.signals.get(ExecState::HOLD | ExecState::DOOR | ExecState::RUN);
            if state == ExecState::HOLD && io.machine.tool_speed() != 0.0 {
                update_tools = false;
                io.machine.set_spindle_speed(0.0);
            }
        }

        if !self.signals.intersects(ExecState::ALARM) {
            let coolant = tool & ToolOverride::COOLANT;
            if coolant.contains(ToolOverride::FLOOD_TOGGLE) {
                io.machine.toggle_coolant(Coolant::FLOOD);
            }
            if coolant.contains(ToolOverride::MIST_TOGGLE) {
                io.machine.toggle_coolant(Coolant::MIST);
            }
        }

        if update_tools && io.machine.is_empty() {
            let (spindle, spindle_speed, coolant) = io.machine.planned_tools();
            let block = MotionBlock {
                spindle,
                spindle_speed,
                coolant,
                ..MotionBlock::default()
            };
            if let Err(status) = io.machine.update_tools(&block) {
                warn!(%status, "tool update after override failed");
            }
        }
    }

    /// Reconciles the flags with the machine. Returns `true` when motion
    /// may continue.
    pub fn check_interlocking(&mut self, io: &mut Io<'_>) -> bool {
        let state = self.signals.exec_state();

        if state.contains(ExecState::KILL) {
            if io.machine.controls().contains(ControlInputs::ESTOP) {
                self.alarm(Alarm::EmergencyStop, io);
                return false;
            }
            if state.contains(ExecState::HOMING) {
                self.alarm(Alarm::HomingFailReset, io);
            } else if state.contains(ExecState::RUN) {
                self.alarm(Alarm::AbortCycle, io);
            }
            return false;
        }

        if state.contains(ExecState::DOOR | ExecState::HOMING) {
            self.alarm(Alarm::HomingFailDoor, io);
            return false;
        }

        if state.contains(ExecState::LIMITS | ExecState::RUN) {
            if !state.contains(ExecState::HOMING) && !io.machine.limits().is_empty() {
                self.alarm(Alarm::HardLimit, io);
            } else {
                self.signals.clear_raw(ExecState::RUN);
            }
            return false;
        }

        if state.intersects(ExecState::DOOR | ExecState::HOLD) && !state.contains(ExecState::RUN) {
            if state.contains(ExecState::DOOR) {
                self.stop(io);
            } else {
                io.machine.stop();
            }
            if state.intersects(ExecState::HOMING | ExecState::JOG) {
                debug!("hold ended a jog or homing motion, flushing");
                io.machine.clear();
                self.signals
                    .clear_raw(ExecState::HOMING | ExecState::JOG | ExecState::HOLD);
            }
            return false;
        }

        true
    }

    /// Explains why the machine stopped.
    pub fn check_fault_systems(&mut self, io: &mut Io<'_>) {
        let controls = io.machine.controls();
        if controls.contains(ControlInputs::ESTOP) {
            self.send(Message::Feedback(Feedback::CheckEmergencyStop));
        }
        if controls.contains(ControlInputs::SAFETY_DOOR) {
            self.send(Message::Feedback(Feedback::CheckDoor));
        }
        if self.hard_limits && !io.machine.limits().is_empty() {
            self.send(Message::Feedback(Feedback::CheckLimits));
        }
        if self.signals.intersects(ExecState::KILL)
            && !matches!(self.alarm, None | Some(Alarm::SoftReset))
        {
            self.send(Message::Feedback(Feedback::ResetToContinue));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hal::MotionControl, signals::LimitInputs, sim::SimMachine};
    use gantry_gcode::Spindle;

    struct Fixture {
        cnc: Cnc,
        machine: SimMachine,
        hooks: Hooks,
    }

    impl Fixture {
        fn new(config: MachineConfig) -> Self {
            let signals = Arc::new(Signals::new());
            let mut fixture = Self {
                cnc: Cnc::new(signals.clone(), &config),
                machine: SimMachine::new(signals),
                hooks: Hooks::new(),
            };
            fixture.with(|cnc, io| cnc.reset(io));
            fixture
        }

        fn with<T>(&mut self, f: impl FnOnce(&mut Cnc, &mut Io<'_>) -> T) -> T {
            let mut io = Io {
                machine: &mut self.machine,
                hooks: &mut self.hooks,
            };
            f(&mut self.cnc, &mut io)
        }

        fn started(config: MachineConfig) -> Self {
            let mut fixture = Self::new(config);
            assert_eq!(fixture.with(|cnc, io| cnc.unlock(false, io)), Unlock::Ok);
            fixture.cnc.set_loop_state(LoopState::Running);
            fixture
        }
    }

    #[test]
    fn reset_locks_everything_until_unlocked() {
        let mut fixture = Fixture::new(MachineConfig::default());
        assert!(fixture.cnc.has_alarm());
        assert!(fixture.cnc.exec_state().contains(ExecState::KILL | ExecState::HOLD));
        assert_eq!(fixture.cnc.take_messages(), vec![Message::Banner]);

        assert_eq!(fixture.with(|cnc, io| cnc.unlock(false, io)), Unlock::Ok);
        assert_eq!(fixture.cnc.exec_state(), ExecState::empty());
        assert!(!fixture.cnc.has_alarm());
    }

    #[test]
    fn homing_with_hard_limits_stays_locked() {
        let config = MachineConfig {
            hard_limits: true,
            homing: true,
            ..MachineConfig::default()
        };
        let mut fixture = Fixture::new(config);
        fixture.cnc.take_messages();
        assert_eq!(fixture.with(|cnc, io| cnc.unlock(false, io)), Unlock::Locked);
        assert!(fixture.cnc.exec_state().contains(ExecState::LIMITS));
        assert_eq!(
            fixture.cnc.take_messages(),
            vec![Message::Feedback(Feedback::Unlock)]
        );
        assert_eq!(fixture.with(|cnc, io| cnc.unlock(true, io)), Unlock::Ok);
    }

    #[test]
    fn kill_survives_clear_while_estop_is_pressed() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.with(|cnc, io| cnc.alarm(Alarm::HardLimit, io));
        fixture.machine.inputs().lock().controls = ControlInputs::ESTOP;

        fixture.with(|cnc, io| cnc.clear(ExecState::KILL, io));
        assert!(fixture.cnc.exec_state().contains(ExecState::KILL));

        fixture.machine.inputs().lock().controls = ControlInputs::empty();
        fixture.with(|cnc, io| cnc.clear(ExecState::KILL, io));
        assert!(!fixture.cnc.exec_state().contains(ExecState::KILL));
    }

    #[test]
    fn hold_input_pins_the_hold_flag() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.cnc.pause();
        fixture.machine.inputs().lock().controls = ControlInputs::FEED_HOLD;
        fixture.with(|cnc, io| cnc.clear(ExecState::HOLD, io));
        assert!(fixture.cnc.exec_state().contains(ExecState::HOLD));

        fixture.machine.inputs().lock().controls = ControlInputs::SAFETY_DOOR;
        fixture.cnc.set(ExecState::DOOR);
        fixture.with(|cnc, io| cnc.clear(ExecState::HOLD | ExecState::DOOR, io));
        assert!(fixture.cnc.exec_state().contains(ExecState::HOLD | ExecState::DOOR));
    }

    #[test]
    fn releasing_a_hold_restores_tools_after_a_delay() {
        let mut fixture = Fixture::started(MachineConfig::default());
        let block = MotionBlock {
            feed: 100.0,
            ..MotionBlock::default()
        };
        fixture.machine.line_to(&[10.0, 0.0, 0.0, 0.0, 0.0, 0.0], &block).unwrap();
        fixture.cnc.pause();
        let before = fixture.machine.elapsed_ms();
        fixture.with(|cnc, io| cnc.clear(ExecState::HOLD, io));
        assert!(!fixture.cnc.exec_state().intersects(ExecState::HOLD | ExecState::RESUMING));
        assert_eq!(fixture.machine.elapsed_ms() - before, 5000);
    }

    #[test]
    fn realtime_reset_raises_a_soft_reset() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.cnc.signals().call_rt_command(0x18);
        assert!(!fixture.with(|cnc, io| cnc.dotasks(io)));
        assert_eq!(fixture.cnc.alarm_code(), Some(Alarm::SoftReset));
    }

    #[test]
    fn cycle_start_releases_a_hold() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.cnc.signals().call_rt_command(b'!');
        assert!(fixture.with(|cnc, io| cnc.dotasks(io)));
        assert!(fixture.cnc.exec_state().contains(ExecState::HOLD));
        fixture.cnc.signals().call_rt_command(b'~');
        assert!(fixture.with(|cnc, io| cnc.dotasks(io)));
        assert!(!fixture.cnc.exec_state().contains(ExecState::HOLD));
    }

    #[test]
    fn overrides_reach_the_planner() {
        let mut fixture = Fixture::started(MachineConfig::default());
        let signals = fixture.cnc.signals().clone();
        signals.call_rt_command(0x91);
        fixture.with(|cnc, io| cnc.exec_rt_commands(io));
        signals.call_rt_command(0x97);
        fixture.with(|cnc, io| cnc.exec_rt_commands(io));
        signals.call_rt_command(0x9D);
        fixture.with(|cnc, io| cnc.exec_rt_commands(io));
        let overrides = fixture.machine.overrides();
        assert_eq!((overrides.feed, overrides.rapid, overrides.spindle), (110, 25, 99));

        signals.call_rt_command(0xA0);
        fixture.with(|cnc, io| cnc.exec_rt_commands(io));
        assert_eq!(fixture.machine.coolant(), Coolant::FLOOD);
    }

    #[test]
    fn spindle_toggle_needs_a_settled_hold() {
        let mut fixture = Fixture::started(MachineConfig::default());
        let block = MotionBlock {
            spindle: Spindle::Clockwise,
            spindle_speed: 1000.0,
            ..MotionBlock::default()
        };
        fixture.machine.update_tools(&block).unwrap();
        let signals = fixture.cnc.signals().clone();
        signals.call_rt_command(0x9E);
        fixture.with(|cnc, io| cnc.exec_rt_commands(io));
        assert_eq!(fixture.machine.tool_speed(), 1000.0);

        fixture.cnc.pause();
        signals.call_rt_command(0x9E);
        fixture.with(|cnc, io| cnc.exec_rt_commands(io));
        assert_eq!(fixture.machine.tool_speed(), 0.0);
    }

    #[test]
    fn limit_during_motion_is_a_hard_limit() {
        let config = MachineConfig {
            hard_limits: true,
            ..MachineConfig::default()
        };
        let mut fixture = Fixture::started(config);
        fixture.cnc.set(ExecState::RUN);
        fixture.machine.inputs().lock().limits = LimitInputs::X;
        assert!(!fixture.with(|cnc, io| cnc.dotasks(io)));
        assert_eq!(fixture.cnc.alarm_code(), Some(Alarm::HardLimit));
        assert!(fixture.cnc.exec_state().contains(ExecState::LIMITS | ExecState::UNHOMED));
        // still refused until unlocked
        assert!(!fixture.with(|cnc, io| cnc.dotasks(io)));
    }

    #[test]
    fn limit_at_rest_is_reported_separately() {
        let config = MachineConfig {
            hard_limits: true,
            ..MachineConfig::default()
        };
        let mut fixture = Fixture::started(config);
        fixture.machine.inputs().lock().limits = LimitInputs::Y;
        fixture.with(|cnc, io| cnc.housekeeping(io));
        assert_eq!(fixture.cnc.alarm_code(), Some(Alarm::HardLimitNoMotion));
    }

    #[test]
    fn limits_are_ignored_without_hard_limits() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.machine.inputs().lock().limits = LimitInputs::X;
        assert!(fixture.with(|cnc, io| cnc.dotasks(io)));
        assert_eq!(fixture.cnc.alarm_code(), None);
    }

    #[test]
    fn limit_during_homing_only_ends_the_run() {
        let config = MachineConfig {
            hard_limits: true,
            ..MachineConfig::default()
        };
        let mut fixture = Fixture::started(config);
        fixture.cnc.set(ExecState::RUN | ExecState::HOMING | ExecState::LIMITS);
        fixture.machine.inputs().lock().limits = LimitInputs::Z;
        assert!(!fixture.with(|cnc, io| cnc.check_interlocking(io)));
        assert_eq!(fixture.cnc.alarm_code(), None);
        assert!(!fixture.cnc.exec_state().contains(ExecState::RUN));
    }

    #[test]
    fn interlocking_alarms() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.cnc.set(ExecState::DOOR | ExecState::HOMING);
        assert!(!fixture.with(|cnc, io| cnc.check_interlocking(io)));
        assert_eq!(fixture.cnc.alarm_code(), Some(Alarm::HomingFailDoor));

        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.cnc.set(ExecState::KILL | ExecState::RUN);
        assert!(!fixture.with(|cnc, io| cnc.check_interlocking(io)));
        assert_eq!(fixture.cnc.alarm_code(), Some(Alarm::AbortCycle));

        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.machine.inputs().lock().controls = ControlInputs::ESTOP;
        fixture.cnc.set(ExecState::KILL);
        assert!(!fixture.with(|cnc, io| cnc.check_interlocking(io)));
        assert_eq!(fixture.cnc.alarm_code(), Some(Alarm::EmergencyStop));
    }

    #[test]
    fn hold_ends_a_jog() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.cnc.set(ExecState::JOG | ExecState::HOLD);
        assert!(!fixture.with(|cnc, io| cnc.check_interlocking(io)));
        assert_eq!(fixture.cnc.exec_state(), ExecState::empty());
        assert!(fixture.with(|cnc, io| cnc.check_interlocking(io)));
    }

    #[test]
    fn fault_feedback() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.machine.inputs().lock().controls = ControlInputs::SAFETY_DOOR;
        fixture.with(|cnc, io| cnc.alarm(Alarm::AbortCycle, io));
        fixture.cnc.take_messages();
        fixture.with(|cnc, io| cnc.check_fault_systems(io));
        assert_eq!(
            fixture.cnc.take_messages(),
            vec![
                Message::Feedback(Feedback::CheckDoor),
                Message::Feedback(Feedback::ResetToContinue),
            ]
        );
    }

    #[test]
    fn report_requests_become_messages() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.cnc.take_messages();
        fixture.cnc.signals().call_rt_command(b'?');
        fixture.with(|cnc, io| cnc.housekeeping(io));
        assert_eq!(fixture.cnc.take_messages(), vec![Message::StatusReport]);
    }

    #[test]
    fn failed_homing_raises_the_returned_alarm() {
        let mut fixture = Fixture::started(MachineConfig::default());
        fixture.machine.inputs().lock().homing_failure = Some(Alarm::HomingFailApproach);
        assert!(!fixture.with(|cnc, io| cnc.home(io)));
        assert_eq!(fixture.cnc.alarm_code(), Some(Alarm::HomingFailApproach));
        assert!(!fixture.cnc.exec_state().contains(ExecState::HOMING));

        let mut fixture = Fixture::started(MachineConfig::default());
        assert!(fixture.with(|cnc, io| cnc.home(io)));
        assert!(!fixture.cnc.exec_state().intersects(ExecState::HOMING | ExecState::UNHOMED));
    }
}
