//! Thread-coordination primitives for the dispatcher runtime.
//!
//! Workers are long-running loops, not one-shot tasks, so the controller
//! side needs three things: a way to ask a worker to wind down
//! ([`CancelToken`]), a way to know it actually started or finished
//! ([`Completion`]), and a way to wake a queue-driven worker when new work
//! arrives ([`WorkSignal`]).

mod cancel;
mod completion;
mod signal;

pub use cancel::CancelToken;
pub use completion::Completion;
pub use signal::{SignalWait, WorkSignal};
