//! Platform abstraction layer for the measurement clock.
//!
//! This module allows switching between the real monotonic clock and a fake clock whose time
//! only advances when test code advances it, so timing-dependent logic can be tested with
//! exact expectations.

mod abstractions;
mod facade;
#[cfg(test)]
mod fake;
mod real;

pub(crate) use abstractions::*;
pub(crate) use facade::*;
#[cfg(test)]
pub(crate) use fake::*;
pub(crate) use real::*;
