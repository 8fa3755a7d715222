//! An in-memory machine.
//!
//! Moves are queued and executed one per [`MotionControl::run`] call.
//! Every command is appended to an event log at the time it is issued so
//! tests can assert on the exact sequence the executor produced.

use crate::{
    alarm::Alarm,
    hal::{
        ArcSpec, Inputs, MotionBlock, MotionControl, OverrideChange, Overrides, ProbeFlags,
        ProbeOutcome,
    },
    signals::{ControlInputs, ExecState, LimitInputs, Signals},
};
use gantry_gcode::{Axes, Coolant, MAX_AXES, Spindle, Status};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tracing::trace;

/// Input levels, shared with whatever plays the operator.
#[derive(Debug, Clone, Default)]
pub struct SimInputs {
    pub controls: ControlInputs,
    pub limits: LimitInputs,
    /// Live probe level.
    pub probe: bool,
    /// Where the next probe move makes contact. `None` never touches.
    pub probe_contact: Option<Axes>,
    /// Makes the next homing cycle fail with this alarm.
    pub homing_failure: Option<Alarm>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Line { target: Axes, feed: f64 },
    Arc { target: Axes, arc: ArcSpec, feed: f64 },
    Dwell { ms: u16 },
    Probe { target: Axes, outcome: ProbeOutcome },
    Tools { spindle: Spindle, speed: f64, coolant: Coolant },
    ToolChange(u8),
    Output { pin: u8, value: u8 },
    Home,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ToolState {
    spindle: Spindle,
    speed: f64,
    coolant: Coolant,
}

impl ToolState {
    const OFF: Self = Self {
        spindle: Spindle::Off,
        speed: 0.0,
        coolant: Coolant::empty(),
    };

    fn from_block(block: &MotionBlock) -> Self {
        Self {
            spindle: block.spindle,
            speed: block.spindle_speed,
            coolant: block.coolant,
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Move { target: Axes, feed: f64, tools: ToolState },
    Tools(ToolState),
}

#[derive(Debug)]
pub struct SimMachine {
    signals: Arc<Signals>,
    inputs: Arc<Mutex<SimInputs>>,
    queue: VecDeque<Segment>,
    position: Axes,
    probe_position: Axes,
    feed: f64,
    planned: ToolState,
    tools: ToolState,
    coolant_toggle: Coolant,
    overrides: Overrides,
    outputs: [u8; 8],
    check_mode: bool,
    clock_ms: u64,
    events: Vec<SimEvent>,
}

impl SimMachine {
    pub fn new(signals: Arc<Signals>) -> Self {
        Self {
            signals,
            inputs: Arc::new(Mutex::new(SimInputs::default())),
            queue: VecDeque::new(),
            position: [0.0; MAX_AXES],
            probe_position: [0.0; MAX_AXES],
            feed: 0.0,
            planned: ToolState::OFF,
            tools: ToolState::OFF,
            coolant_toggle: Coolant::empty(),
            overrides: Overrides::default(),
            outputs: [0; 8],
            check_mode: false,
            clock_ms: 0,
            events: Vec::new(),
        }
    }

    pub fn inputs(&self) -> &Arc<Mutex<SimInputs>> {
        &self.inputs
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    /// Number of segments waiting for the interpolator.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Simulated time spent in delays and dwells.
    pub fn elapsed_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn spindle(&self) -> Spindle {
        self.tools.spindle
    }

    pub fn coolant(&self) -> Coolant {
        self.tools.coolant ^ self.coolant_toggle
    }

    pub fn output(&self, pin: u8) -> u8 {
        self.outputs.get(usize::from(pin)).copied().unwrap_or(0)
    }

    /// Runs the interpolator until the queue is empty, ignoring holds.
    pub fn drain(&mut self) {
        while let Some(segment) = self.queue.pop_front() {
            self.execute(segment);
        }
        self.feed = 0.0;
    }

    fn execute(&mut self, segment: Segment) {
        match segment {
            Segment::Move {
                target,
                feed,
                tools,
            } => {
                self.tools = tools;
                self.position = target;
                self.feed = feed;
            }
            Segment::Tools(tools) => self.tools = tools,
        }
    }

    fn queue_move(&mut self, target: &Axes, block: &MotionBlock) {
        let tools = ToolState::from_block(block);
        self.planned = tools;
        if self.check_mode {
            return;
        }
        let feed = if block.is_rapid() { 0.0 } else { block.feed };
        self.queue.push_back(Segment::Move {
            target: *target,
            feed,
            tools,
        });
    }
}

impl MotionControl for SimMachine {
    fn line_to(&mut self, target: &Axes, block: &MotionBlock) -> Result<(), Status> {
        self.events.push(SimEvent::Line {
            target: *target,
            feed: block.feed,
        });
        self.queue_move(target, block);
        Ok(())
    }

    fn arc_to(
        &mut self,
        target: &Axes,
        arc: &ArcSpec,
        block: &MotionBlock,
    ) -> Result<(), Status> {
        self.events.push(SimEvent::Arc {
            target: *target,
            arc: *arc,
            feed: block.feed,
        });
        self.queue_move(target, block);
        Ok(())
    }

    fn dwell(&mut self, block: &MotionBlock) -> Result<(), Status> {
        self.events.push(SimEvent::Dwell { ms: block.dwell_ms });
        if self.check_mode {
            return Ok(());
        }
        self.drain();
        self.planned = ToolState::from_block(block);
        self.tools = self.planned;
        self.clock_ms += u64::from(block.dwell_ms);
        Ok(())
    }

    fn probe(
        &mut self,
        target: &Axes,
        flags: ProbeFlags,
        _block: &MotionBlock,
    ) -> Result<ProbeOutcome, Status> {
        if self.check_mode {
            return Ok(ProbeOutcome::Contact);
        }
        self.drain();
        let (triggered, contact) = {
            let inputs = self.inputs.lock();
            (inputs.probe, inputs.probe_contact)
        };
        let outcome = if triggered != flags.contains(ProbeFlags::AWAY) {
            ProbeOutcome::InitialContact
        } else if let Some(contact) = contact {
            self.position = contact;
            ProbeOutcome::Contact
        } else {
            self.position = *target;
            ProbeOutcome::NoContact
        };
        self.probe_position = self.position;
        self.events.push(SimEvent::Probe {
            target: *target,
            outcome,
        });
        Ok(outcome)
    }

    fn update_tools(&mut self, block: &MotionBlock) -> Result<(), Status> {
        let tools = ToolState::from_block(block);
        self.events.push(SimEvent::Tools {
            spindle: tools.spindle,
            speed: tools.speed,
            coolant: tools.coolant,
        });
        self.planned = tools;
        if self.check_mode {
            return Ok(());
        }
        if self.queue.is_empty() {
            self.tools = tools;
        } else {
            self.queue.push_back(Segment::Tools(tools));
        }
        Ok(())
    }

    fn change_tool(&mut self, tool: u8) -> Result<(), Status> {
        self.events.push(SimEvent::ToolChange(tool));
        Ok(())
    }

    fn set_output(&mut self, pin: u8, value: u8) {
        self.events.push(SimEvent::Output { pin, value });
        if let Some(slot) = self.outputs.get_mut(usize::from(pin)) {
            *slot = value;
        }
    }

    fn home(&mut self) -> Result<(), Alarm> {
        self.events.push(SimEvent::Home);
        if let Some(alarm) = self.inputs.lock().homing_failure.take() {
            return Err(alarm);
        }
        self.queue.clear();
        self.position = [0.0; MAX_AXES];
        Ok(())
    }

    fn sync(&mut self) {
        trace!(position = ?self.position, "planner resynced");
    }

    fn stop(&mut self) {
        self.feed = 0.0;
        self.signals.clear_raw(ExecState::RUN);
    }

    fn stop_tools(&mut self) {
        self.tools = ToolState::OFF;
        self.coolant_toggle = Coolant::empty();
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.feed = 0.0;
        self.signals.clear_raw(ExecState::RUN);
    }

    fn position(&self) -> Axes {
        self.position
    }

    fn probe_position(&self) -> Axes {
        self.probe_position
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty() && !self.signals.intersects(ExecState::RUN)
    }

    fn feed(&self) -> f64 {
        self.feed
    }

    fn apply_override(&mut self, change: OverrideChange) {
        let step = |value: u8, delta: i8| (i16::from(value) + i16::from(delta)).clamp(10, 200) as u8;
        match change {
            OverrideChange::FeedReset => self.overrides.feed = 100,
            OverrideChange::Feed(delta) => self.overrides.feed = step(self.overrides.feed, delta),
            OverrideChange::Rapid(percent) => self.overrides.rapid = percent,
            OverrideChange::SpindleReset => self.overrides.spindle = 100,
            OverrideChange::Spindle(delta) => {
                self.overrides.spindle = step(self.overrides.spindle, delta)
            }
        }
    }

    fn overrides(&self) -> Overrides {
        self.overrides
    }

    fn tool_speed(&self) -> f64 {
        if self.tools.spindle == Spindle::Off {
            return 0.0;
        }
        self.tools.speed * f64::from(self.overrides.spindle) / 100.0
    }

    fn set_spindle_speed(&mut self, speed: f64) {
        self.tools.speed = speed;
    }

    fn toggle_coolant(&mut self, coolant: Coolant) {
        self.coolant_toggle ^= coolant;
    }

    fn planned_tools(&self) -> (Spindle, f64, Coolant) {
        (self.planned.spindle, self.planned.speed, self.planned.coolant)
    }

    fn restore_coolant(&mut self) {
        self.tools.coolant = self.planned.coolant;
    }

    fn restore_spindle(&mut self) {
        self.tools.spindle = self.planned.spindle;
        self.tools.speed = self.planned.speed;
    }

    fn set_check_mode(&mut self, enabled: bool) {
        self.check_mode = enabled;
    }

    fn check_mode(&self) -> bool {
        self.check_mode
    }

    fn delay(&mut self, ms: u32) {
        self.clock_ms += u64::from(ms);
    }

    fn run(&mut self) {
        if self.signals.intersects(ExecState::HOLD) {
            self.feed = 0.0;
            self.signals.clear_raw(ExecState::RUN);
            return;
        }
        match self.queue.pop_front() {
            Some(segment) => {
                self.signals.set(ExecState::RUN);
                self.execute(segment);
            }
            None => {
                self.feed = 0.0;
                self.signals.clear_raw(ExecState::RUN);
            }
        }
    }
}

impl Inputs for SimMachine {
    fn controls(&self) -> ControlInputs {
        self.inputs.lock().controls
    }

    fn limits(&self) -> LimitInputs {
        self.inputs.lock().limits
    }

    fn probe_triggered(&self) -> bool {
        self.inputs.lock().probe
    }
}
