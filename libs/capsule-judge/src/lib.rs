//! Compiled-Language Judge: compiles and runs one untrusted submission per
//! invocation inside an ephemeral workspace and reports a structured result.

pub mod command;
pub mod entry;
pub mod judge;
pub mod process;
pub mod toolchain;
pub mod workspace;

pub use judge::{Judge, JudgeConfig};
