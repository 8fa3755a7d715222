//! Real-time state machine and g-code executor.
//!
//! The [`Controller`] runs validated lines from `gantry-gcode` through the
//! [`Executor`] while [`Cnc`] arbitrates every main-loop pass against the
//! flags raised asynchronously in [`Signals`]. The planner, the inputs and
//! the settings storage are reached through the traits in [`hal`];
//! [`sim::SimMachine`] implements them in memory.

pub mod alarm;
pub mod cnc;
pub mod config;
pub mod controller;
pub mod executor;
pub mod hal;
pub mod hooks;
pub mod offsets;
pub mod report;
pub mod signals;
pub mod sim;

pub use alarm::{Alarm, Feedback, Message};
pub use cnc::{Cnc, Io, LoopState, Unlock};
pub use config::MachineConfig;
pub use controller::Controller;
pub use executor::{ExecContext, Executor};
pub use hal::{
    ArcSpec, Inputs, Machine, MemoryStore, MotionBlock, MotionControl, OverrideChange, Overrides,
    ProbeFlags, ProbeOutcome, SettingsKey, SettingsStore,
};
pub use hooks::{ExecEvent, Hooks};
pub use offsets::Offsets;
pub use report::{Accessories, MachineState, Pins, ReportTail, StatusReport};
pub use signals::{ControlInputs, ExecState, LimitInputs, Signals};
