//! Script Supervisor - run package-manager scripts as supervised child
//! processes and republish their output as live line and chunk events.

pub mod config;
pub mod display;
pub mod process;
pub mod stream;
