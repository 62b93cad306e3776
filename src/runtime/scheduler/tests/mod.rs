//! Scheduler unit tests


pub(super) use crate::runtime::testing::{guard, ms, Counter};
