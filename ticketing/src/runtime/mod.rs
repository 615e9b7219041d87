//! Process lifecycle: serve HTTP, run consumers, shut down gracefully.

pub mod lifecycle;

pub use lifecycle::{Application, shutdown_signal};
