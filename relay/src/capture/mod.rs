//! Supervision of the external capture process.

pub mod command;
pub mod supervisor;

pub use command::{check_program_available, CaptureCommand};
pub use supervisor::{CaptureState, CaptureSupervisor};
