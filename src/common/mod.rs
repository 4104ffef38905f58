//! Shared infrastructure: run-level errors and CLI arguments

pub mod cli;
pub mod error;

pub use cli::{CommonArgs, ConvertArgs, EmulatorArgs, InspectArgs, InspectCommand};
pub use error::{ConvertError, ConvertResult};
