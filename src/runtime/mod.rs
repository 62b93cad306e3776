//! Runtime system
//!
//! This module contains the tick-driven scheduler, the sequencer scripting
//! layer on top of it, and the watchdog that guards the tick loop.

pub mod clock;
pub mod event;
pub mod global;
pub mod scheduler;
pub mod sequencer;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;
