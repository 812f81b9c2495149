//! End-to-end scenarios, grouped by capability.

mod actions;
mod completion;
mod diagnostics;
mod framing;
mod lifecycle;
