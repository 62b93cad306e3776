//! tickflow
//!
//! Cooperative coroutines for event-driven control logic. Many small
//! scripts of "wait for this timer or event, then do that" run side by side,
//! and a single external clock tick moves them all forward.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tickflow::{Group, Sequencer};
//!
//! let group = Group::new();
//! let cancel = group
//!     .spawn(|co| {
//!         let mut s = Sequencer::new();
//!         s.wait_for(["start button"])
//!             .do_(|| println!("game started"))
//!             .sleep(Duration::from_secs(1))
//!             .do_(|| println!("ball served"));
//!         s.run(co)
//!     })
//!     .unwrap();
//!
//! group.post("start button");
//! loop {
//!     group.tick();
//!     if group.running() == 0 {
//!         break;
//!     }
//!     std::thread::sleep(Duration::from_millis(16));
//! }
//! cancel.cancel();
//! ```

#![warn(rust_2018_idioms)]

pub mod error;
pub mod runtime;
pub mod util;

// Re-exports
pub use error::{Cancelled, RuntimeError, RuntimeResult, SequencerError};
pub use runtime::clock::{Clock, MockClock, SystemClock};
pub use runtime::event::{Event, EventKey, Payload};
pub use runtime::scheduler::{
    BodyExit, CancelHandle, Co, CoroutineId, Group, GroupConfig, GroupStatsSnapshot, SlotSnapshot,
    WeakGroup,
};
pub use runtime::sequencer::{LastEvent, Sequencer};
pub use runtime::watchdog::{StallReport, Watchdog, WatchdogConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
