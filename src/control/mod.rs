//! Remote channel-change handling.
//!
//! Inbound SET_CHANNEL commands are received by a listener thread, validated
//! and applied by the simulation task (inline or after a delay), and
//! acknowledged with APPLIED/FAILED status messages on the status topic.

pub mod command;
pub mod listener;
pub mod scheduler;

pub use listener::spawn_command_listener;
