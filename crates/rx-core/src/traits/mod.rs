//! Core trait definitions

mod process;

pub use process::{ProcessControl, ProcessHandle, ProcessLauncher};
