//! Per-contact session gate.
//!
//! All state changes for one contact (step, advisor flag, last activity) go
//! through [`SessionGate::run`], which holds a lock keyed by tenant and
//! contact for the duration of the work.

pub mod error;
pub mod gate;

pub use {
    error::{Error, Result},
    gate::{GateOptions, SessionGate, SessionState},
};
