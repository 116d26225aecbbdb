//! Dispatcher runtime: per-link lifecycle, worker threads, and the system
//! object owning every link slot.

pub mod dispatcher;
